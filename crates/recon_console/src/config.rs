use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recon_engine::{ClientSettings, EngineSettings, PollPolicy};
use recon_logging::{recon_info, LogDestination};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "recon_console.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0:?} not found")]
    Missing(PathBuf),
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Console settings read from `recon_console.ron`. Every field is optional
/// in the file; absent ones take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    pub state_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub upload_poll: PollPolicy,
    pub reconcile_poll: PollPolicy,
    pub workflow_poll: PollPolicy,
    pub log_destination: LogDestination,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let client = ClientSettings::default();
        let engine = EngineSettings::default();
        Self {
            api_base_url: client.base_url,
            state_dir: PathBuf::from(".recon_state"),
            connect_timeout_ms: client.connect_timeout.as_millis() as u64,
            request_timeout_ms: client.request_timeout.as_millis() as u64,
            upload_poll: engine.upload_poll,
            reconcile_poll: engine.reconcile_poll,
            workflow_poll: engine.workflow_poll,
            log_destination: LogDestination::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load `explicit`, or `recon_console.ron` in the working directory.
    ///
    /// The default file may be absent (defaults apply); an explicitly named
    /// file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if required {
                    return Err(ConfigError::Missing(path));
                }
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        recon_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(content)
    }

    /// Command-line values win over the file.
    pub fn apply_overrides(&mut self, api_base_url: Option<String>, state_dir: Option<PathBuf>) {
        if let Some(url) = api_base_url {
            self.api_base_url = url;
        }
        if let Some(dir) = state_dir {
            self.state_dir = dir;
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api_base_url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            upload_poll: self.upload_poll,
            reconcile_poll: self.reconcile_poll,
            workflow_poll: self.workflow_poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use recon_engine::MaxAttempts;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = ConsoleConfig::parse(
            r#"(
                api_base_url: "https://recon.example.com/api",
                workflow_poll: (interval_ms: 2000, max_attempts: Limited(10)),
                log_destination: Both,
            )"#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://recon.example.com/api");
        assert_eq!(
            config.workflow_poll,
            PollPolicy::new(Duration::from_secs(2), MaxAttempts::Limited(10))
        );
        assert_eq!(config.log_destination, LogDestination::Both);
        assert_eq!(config.upload_poll, PollPolicy::upload());
        assert_eq!(config.reconcile_poll.max_attempts, MaxAttempts::Unbounded);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.ron");
        fs::write(&path, "(api_base_url: 42").unwrap();

        let err = ConsoleConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.ron");

        let err = ConsoleConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(missing) if missing == path));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = ConsoleConfig::default();
        config.apply_overrides(Some("http://10.0.0.5:9000/api".to_string()), None);
        assert_eq!(config.api_base_url, "http://10.0.0.5:9000/api");
        assert_eq!(config.state_dir, PathBuf::from(".recon_state"));

        let settings = config.client_settings();
        assert_eq!(settings.base_url, "http://10.0.0.5:9000/api");
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn written_config_reads_back() {
        let config = ConsoleConfig::default();
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new()).unwrap();
        assert_eq!(ConsoleConfig::parse(&text).unwrap(), config);
    }
}
