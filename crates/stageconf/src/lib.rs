//! Minimal configuration loading for Stagehand.
//!
//! Every Stagehand crate reads its settings from one [`StageConfig`]:
//! where the control surface listens, where Carabiner runs, which capture
//! tools to try, which analysis backends to chain.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, merged key by key):
//! 1. `/etc/stagehand/config.toml` (system)
//! 2. `~/.config/stagehand/config.toml` (user)
//! 3. `./stagehand.toml` (local override, replaced by an explicit `--config` path)
//! 4. Environment variables (`OSC_HOST`, `CAPTURE_DIR`, `STAGEHAND_*`, ...)
//!
//! # Example Config
//!
//! ```toml
//! [osc]
//! host = "127.0.0.1"
//! send_port = 11000
//! recv_port = 11001
//! query_timeout_ms = 500
//!
//! [capture]
//! dir = "~/captures"
//! tools = ["sox", "pw-record"]
//!
//! [analysis]
//! backends = ["waveform", "aubio"]
//!
//! [analysis.commands]
//! librosa = ["python3", "scripts/librosa_features.py"]
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use settings::{
    AnalysisSettings, CaptureSettings, LinkSettings, MonitorSettings, OscSettings,
    TelemetrySettings,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Stagehand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageConfig {
    #[serde(default)]
    pub osc: OscSettings,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub analysis: AnalysisSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl StageConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./stagehand.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table_from_file(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.capture.dir = expand_path(&config.capture.dir.to_string_lossy());

        Ok((config, sources))
    }

    /// Parse a single TOML document (no discovery, no env overlay).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let table = loader::parse_table(contents, Path::new("<string>"))?;
        loader::table_to_config(table, Path::new("<string>"))
    }

    /// Serialize the effective config to TOML.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# Stagehand Configuration\n\n{}", body)
    }

    /// Per-query reply timeout.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.osc.query_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StageConfig::default();
        assert_eq!(config.osc.send_port, 11000);
        assert_eq!(config.link.port, 17000);
        assert_eq!(config.monitor.interval_bars, 4);
        assert_eq!(config.query_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_to_toml() {
        let config = StageConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[osc]"));
        assert!(toml.contains("[capture]"));
        assert!(toml.contains("[analysis]"));
        assert!(toml.contains("send_port = 11000"));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let config = StageConfig::default();
        let parsed = StageConfig::from_toml_str(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[link]\nport = 17999\n").unwrap();

        let (config, sources) = StageConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.link.port, 17999);
        assert!(sources.files.contains(&path));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[osc\nhost = ").unwrap();

        let err = StageConfig::load_from(Some(&path)).unwrap_err();
        match err {
            ConfigError::Parse { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
