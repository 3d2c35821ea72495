use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use recon_core::{ActionKind, ExceptionRecord, JobId, Msg, SelectedFile, SourceRole};
use recon_engine::{
    ensure_state_dir, EngineEvent, EngineHandle, FileKeyValueStore, JobBoard, ReqwestJobClient,
    SnapshotStore, WorkflowEvent,
};
use recon_logging::{recon_info, recon_warn};

mod config;
mod effects;
mod render;

use config::ConsoleConfig;
use effects::EffectRunner;

#[derive(Parser)]
#[command(name = "recon_console")]
#[command(version, about = "Upload, reconcile and remediate against the reconciliation API")]
struct Cli {
    /// Configuration file (defaults to ./recon_console.ron when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the job API, e.g. http://localhost:8000/api
    #[arg(long, global = true)]
    api: Option<String>,

    /// Directory holding the job snapshots
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files and wait for the server to ingest them
    Upload {
        files: Vec<PathBuf>,
        /// File to upload tagged as source A
        #[arg(long)]
        source_a: Option<PathBuf>,
        /// File to upload tagged as source B
        #[arg(long)]
        source_b: Option<PathBuf>,
    },
    /// Show upload jobs and the tracked reconciliation run
    Jobs,
    /// Tag an upload job as one side of the reconciliation
    Tag { id: JobId, role: RoleArg },
    Remove { id: JobId },
    /// Forget every job and the tracked reconciliation run
    Reset,
    /// Reconcile the completed source A and source B uploads
    Reconcile,
    /// Resume polling for jobs left running by a previous session
    Resume,
    /// Run a remediation action on an exception record
    Workflow {
        /// JSON file with the exception record and its triggers
        #[arg(long)]
        exception: PathBuf,
        #[arg(long)]
        action: String,
        #[arg(long, value_enum, default_value = "execute")]
        kind: KindArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    SourceA,
    SourceB,
}

impl From<RoleArg> for SourceRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::SourceA => SourceRole::SourceA,
            RoleArg::SourceB => SourceRole::SourceB,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Execute,
    Review,
}

impl From<KindArg> for ActionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Execute => ActionKind::Execute,
            KindArg::Review => ActionKind::Review,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConsoleConfig::load(cli.config.as_deref())?;
    config.apply_overrides(cli.api.clone(), cli.state_dir.clone());

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    recon_logging::initialize(
        config.log_destination,
        level,
        &recon_logging::default_log_file(),
    );

    ensure_state_dir(&config.state_dir)
        .with_context(|| format!("state directory {:?}", config.state_dir))?;
    let snapshots = SnapshotStore::new(Arc::new(FileKeyValueStore::new(&config.state_dir)));
    let board = JobBoard::open(snapshots);

    match cli.command {
        Commands::Jobs => print!("{}", render::render_board(&board.view())),
        Commands::Tag { id, role } => {
            if board.get(id).is_none() {
                bail!("no upload job #{id}");
            }
            board.dispatch(Msg::RoleAssigned {
                job_id: id,
                role: role.into(),
            });
            print!("{}", render::render_board(&board.view()));
        }
        Commands::Remove { id } => {
            board.dispatch(Msg::JobRemoved { job_id: id });
            print!("{}", render::render_board(&board.view()));
        }
        Commands::Reset => {
            board.dispatch(Msg::SessionReset);
            println!("Session cleared.");
        }
        command => {
            let api = ReqwestJobClient::new(config.client_settings())
                .with_context(|| format!("API base URL {:?}", config.api_base_url))?;
            let engine = EngineHandle::new(Arc::new(api), board.clone(), config.engine_settings())
                .context("failed to start the engine runtime")?;
            let runner = EffectRunner::new(engine);
            let result = run_remote(&runner, &board, command);
            runner.shutdown();
            result?;
        }
    }
    Ok(())
}

fn run_remote(runner: &EffectRunner, board: &JobBoard, command: Commands) -> Result<()> {
    match command {
        Commands::Upload {
            files,
            source_a,
            source_b,
        } => {
            let mut selection = Vec::new();
            for path in &files {
                selection.push(read_selection(path, None)?);
            }
            if let Some(path) = &source_a {
                selection.push(read_selection(path, Some(SourceRole::SourceA))?);
            }
            if let Some(path) = &source_b {
                selection.push(read_selection(path, Some(SourceRole::SourceB))?);
            }
            if selection.is_empty() {
                bail!("no files given");
            }
            let effects = board.select_files(selection);
            runner.run(effects, &mut |event| report(board, event));
            print!("{}", render::render_board(&board.view()));
        }
        Commands::Reconcile => {
            let effects = board.dispatch(Msg::ReconcileRequested);
            if effects.is_empty() {
                bail!("reconciliation needs a completed source_a upload and a completed source_b upload");
            }
            runner.run(effects, &mut |event| report(board, event));
            print!("{}", render::render_board(&board.view()));
        }
        Commands::Resume => {
            let uploads = board.resumable_uploads();
            let reconcile_pending = board
                .reconcile()
                .is_some_and(|run| !run.status.is_terminal());
            if uploads.is_empty() && !reconcile_pending {
                println!("Nothing to resume.");
                return Ok(());
            }
            recon_info!(
                "Resuming {} upload(s){}",
                uploads.len(),
                if reconcile_pending { " and the reconciliation run" } else { "" }
            );
            runner.resume(uploads, reconcile_pending, &mut |event| report(board, event));
            print!("{}", render::render_board(&board.view()));
        }
        Commands::Workflow {
            exception,
            action,
            kind,
        } => {
            let text = fs::read_to_string(&exception)
                .with_context(|| format!("failed to read {:?}", exception))?;
            let record: ExceptionRecord = serde_json::from_str(&text)
                .with_context(|| format!("invalid exception record in {:?}", exception))?;
            let outcome =
                runner.execute_workflow(record, &action, kind.into(), &mut |event| report(board, event))?;
            print!("{}", render::render_outcome(&outcome));
        }
        Commands::Jobs | Commands::Tag { .. } | Commands::Remove { .. } | Commands::Reset => {}
    }
    Ok(())
}

fn report(board: &JobBoard, event: &EngineEvent) {
    match event {
        EngineEvent::UploadFinished { job_id, .. } => {
            if let Some(row) = board.view().jobs.iter().find(|row| row.job_id == *job_id) {
                println!("{}", render::format_job_row(row));
            }
        }
        EngineEvent::ReconcileStarted { run_id } => println!("Reconciliation {run_id} started"),
        EngineEvent::ReconcileStartFailed { message } => {
            eprintln!("Reconciliation not started: {message}")
        }
        EngineEvent::ReconcileFinished { job: None } => {
            recon_warn!("Reconciliation polling stopped before the run finished")
        }
        EngineEvent::Workflow(WorkflowEvent::StepsChanged(steps)) => {
            print!("{}", render::render_steps(steps));
        }
        EngineEvent::Workflow(WorkflowEvent::Started { run_id }) => {
            println!("Workflow run {run_id} started")
        }
        EngineEvent::UploadBatchFinished { .. }
        | EngineEvent::ReconcileFinished { job: Some(_) }
        | EngineEvent::WorkflowFinished(_) => {}
    }
}

fn read_selection(path: &Path, role: Option<SourceRole>) -> Result<(SelectedFile, Bytes)> {
    let payload = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let file = SelectedFile {
        name,
        size_bytes: payload.len() as u64,
        mime_type,
        role,
    };
    Ok((file, Bytes::from(payload)))
}
