//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, StageConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only existing
/// files are returned.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stagehand/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stagehand/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("stagehand.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read and parse one config file into a raw TOML table.
///
/// The table is also checked against the [`StageConfig`] schema so that a
/// type error is reported against the file that caused it.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table = parse_table(&contents, path)?;
    table_to_config(table.clone(), path)?;
    Ok(table)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

pub(crate) fn table_to_config(table: toml::Table, path: &Path) -> Result<StageConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into::<StageConfig>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value (including arrays) in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut StageConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("OSC_HOST") {
        config.osc.host = v;
        sources.env_overrides.push("OSC_HOST".to_string());
    }
    if let Some(port) = parse_env("OSC_PORT") {
        config.osc.send_port = port;
        sources.env_overrides.push("OSC_PORT".to_string());
    }
    if let Some(port) = parse_env("OSC_RECV_PORT") {
        config.osc.recv_port = port;
        sources.env_overrides.push("OSC_RECV_PORT".to_string());
    }
    if let Some(ms) = parse_env("STAGEHAND_QUERY_TIMEOUT_MS") {
        config.osc.query_timeout_ms = ms;
        sources
            .env_overrides
            .push("STAGEHAND_QUERY_TIMEOUT_MS".to_string());
    }

    if let Ok(v) = env::var("CARABINER_HOST") {
        config.link.host = v;
        sources.env_overrides.push("CARABINER_HOST".to_string());
    }
    if let Some(port) = parse_env("CARABINER_PORT") {
        config.link.port = port;
        sources.env_overrides.push("CARABINER_PORT".to_string());
    }

    if let Ok(v) = env::var("CAPTURE_DIR") {
        config.capture.dir = expand_path(&v);
        sources.env_overrides.push("CAPTURE_DIR".to_string());
    }
    if let Some(bpm) = parse_env::<f64>("STAGEHAND_DEFAULT_BPM") {
        if bpm.is_finite() && bpm > 0.0 {
            config.capture.default_bpm = bpm;
            sources.env_overrides.push("STAGEHAND_DEFAULT_BPM".to_string());
        }
    }

    if let Ok(v) = env::var("STAGEHAND_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("STAGEHAND_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything else
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Expand `~/` and a leading `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}
