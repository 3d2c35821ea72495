use std::fmt::Write;

use recon_core::{
    ConsoleViewModel, ReconcileRowView, ReconcileSummary, StepStatus, UploadRowView, UploadStatus,
    WorkflowStep,
};
use recon_engine::WorkflowOutcome;

/// Job table plus the tracked reconciliation run.
pub fn render_board(view: &ConsoleViewModel) -> String {
    let mut out = String::new();
    if view.jobs.is_empty() {
        out.push_str("No upload jobs.\n");
    } else {
        for job in &view.jobs {
            out.push_str(&format_job_row(job));
            out.push('\n');
        }
    }
    match &view.reconcile {
        Some(run) => {
            out.push_str(&format_reconcile(run));
            out.push('\n');
        }
        None if view.reconcile_ready => out.push_str("Ready to reconcile.\n"),
        None => {}
    }
    out
}

pub fn format_job_row(job: &UploadRowView) -> String {
    let role = job
        .role
        .map(|role| format!(" [{role}]"))
        .unwrap_or_default();
    let head = format!(
        "#{id} {name}{role} ({size} B) {status} {progress}%",
        id = job.job_id,
        name = job.name,
        size = format_with_commas(job.size_bytes),
        status = job.status,
        progress = job.progress,
    );
    match job.status {
        UploadStatus::Completed => match job.result {
            Some(result) => format!(
                "{head}: {} records, {} matches, {} exceptions",
                format_with_commas(result.records_processed),
                format_with_commas(result.matches_found),
                format_with_commas(result.exceptions_found)
            ),
            None => head,
        },
        UploadStatus::Error => match &job.error_message {
            Some(message) => format!("{head}: {message}"),
            None => head,
        },
        _ => match &job.server_job_id {
            Some(server_job_id) => format!("{head} (server job {server_job_id})"),
            None => head,
        },
    }
}

pub fn format_reconcile(run: &ReconcileRowView) -> String {
    if !run.status_known {
        return format!(
            "Reconciliation {} status unknown (run `resume` to refresh)",
            run.id
        );
    }
    let head = format!("Reconciliation {} {}", run.id, run.status);
    match &run.summary {
        Some(summary) => format!("{head}: {}", format_summary(summary)),
        None => head,
    }
}

fn format_summary(summary: &ReconcileSummary) -> String {
    format!(
        "{} matches, {} breaks, {} resolutions",
        format_with_commas(summary.total_matches),
        format_with_commas(summary.total_breaks),
        format_with_commas(summary.total_resolutions)
    )
}

pub fn render_steps(steps: &[WorkflowStep]) -> String {
    let mut out = String::new();
    for (index, step) in steps.iter().enumerate() {
        let marker = match step.status {
            StepStatus::Pending => ' ',
            StepStatus::Running => '>',
            StepStatus::Completed => '+',
            StepStatus::Failed => '!',
        };
        let _ = write!(out, "[{marker}] {}. {}", index + 1, step.title);
        if !step.description.is_empty() {
            let _ = write!(out, " - {}", step.description);
        }
        if let Some(details) = &step.details {
            let _ = write!(out, " ({details})");
        }
        out.push('\n');
    }
    out
}

pub fn render_outcome(outcome: &WorkflowOutcome) -> String {
    let mut out = format!(
        "{} (run {}, {:.1}s)\n",
        outcome.message,
        outcome.run_id,
        outcome.duration.as_secs_f64()
    );
    for change in &outcome.changes_applied {
        let _ = writeln!(out, "  - {change}");
    }
    out
}

fn format_with_commas(value: u64) -> String {
    let mut out = String::new();
    for (i, ch) in value.to_string().chars().rev().enumerate() {
        if i != 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}
