//! Analysis Backend Chain.
//!
//! Every backend is optional. The chain runs whichever are available
//! against one file and merges what they return under their names. A backend
//! that is missing or fails is left out of the report; only when nothing at
//! all comes back does the report carry an `error`.

mod external;
mod waveform;

pub use external::{AubioTempoBackend, JsonCommandBackend, SoxStatBackend};
pub use waveform::WaveformBackend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use stageconf::AnalysisSettings;
use tracing::{debug, info, warn};

/// Report-level error when no backend produced output.
pub const NO_BACKEND: &str = "no analysis backend available";

/// Report keys a backend may not be named after.
pub const RESERVED_NAMES: [&str; 2] = ["file", "error"];

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Audio file not found: {0}")]
    FileNotFound(PathBuf),
}

/// One independent way of describing an audio file.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Key this backend's result is stored under in the report.
    fn name(&self) -> &str;

    /// Whether the tool or library this backend needs is present right now.
    fn is_available(&self) -> bool;

    /// Describe `path`. Must return a JSON object.
    async fn analyze(&self, path: &Path) -> anyhow::Result<Value>;
}

/// Merged output of one chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub file: PathBuf,
    /// Backend results in chain order.
    pub results: Vec<(String, Value)>,
    /// Set only when `results` is empty.
    pub error: Option<String>,
}

impl AnalysisReport {
    pub fn backend(&self, name: &str) -> Option<&Value> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `{ "file": ..., "<backend>": {...}, ..., "error"? }`
impl Serialize for AnalysisReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + self.results.len() + usize::from(self.error.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("file", &self.file)?;
        for (name, value) in &self.results {
            map.serialize_entry(name, value)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// Ordered set of backends, run one after another.
#[derive(Clone, Default)]
pub struct AnalysisChain {
    backends: Vec<Arc<dyn AnalysisBackend>>,
}

impl AnalysisChain {
    /// Backends named like a report key (`file`, `error`) are dropped.
    pub fn new(backends: Vec<Arc<dyn AnalysisBackend>>) -> Self {
        let backends = backends
            .into_iter()
            .filter(|b| {
                let reserved = RESERVED_NAMES.contains(&b.name());
                if reserved {
                    warn!(backend = b.name(), "backend name is a reserved report key, skipping");
                }
                !reserved
            })
            .collect();
        Self { backends }
    }

    /// Backends named in `settings.backends`, in that order, followed by any
    /// `[analysis.commands]` entry not already named. A command entry with a
    /// built-in's name replaces the built-in.
    pub fn from_config(settings: &AnalysisSettings) -> Self {
        let mut backends: Vec<Arc<dyn AnalysisBackend>> = Vec::new();

        for name in &settings.backends {
            if let Some(command) = settings.commands.get(name) {
                backends.push(Arc::new(JsonCommandBackend::new(name.clone(), command.clone())));
                continue;
            }
            match builtin(name) {
                Some(backend) => backends.push(backend),
                None => warn!(backend = %name, "unknown analysis backend in config, skipping"),
            }
        }

        for (name, command) in &settings.commands {
            if !settings.backends.contains(name) {
                backends.push(Arc::new(JsonCommandBackend::new(name.clone(), command.clone())));
            }
        }

        Self::new(backends)
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Run every available backend against `path`.
    ///
    /// Fails only when `path` is not an existing file; backend failures are
    /// logged and dropped from the report.
    pub async fn analyze(&self, path: &Path) -> Result<AnalysisReport, AnalysisError> {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(AnalysisError::FileNotFound(path.to_path_buf()));
        }

        let mut results = Vec::new();
        for backend in &self.backends {
            if !backend.is_available() {
                debug!(backend = backend.name(), "not available, skipping");
                continue;
            }
            match backend.analyze(path).await {
                Ok(value) => results.push((backend.name().to_string(), value)),
                Err(e) => warn!(backend = backend.name(), error = %format!("{e:#}"), "analysis backend failed"),
            }
        }

        let error = results.is_empty().then(|| NO_BACKEND.to_string());
        info!(
            file = %path.display(),
            backends = results.len(),
            "analysis finished"
        );

        Ok(AnalysisReport {
            file: path.to_path_buf(),
            results,
            error,
        })
    }
}

/// Built-in backend by name.
pub fn builtin(name: &str) -> Option<Arc<dyn AnalysisBackend>> {
    match name {
        "waveform" => Some(Arc::new(WaveformBackend)),
        "sox" => Some(Arc::new(SoxStatBackend)),
        "aubio" => Some(Arc::new(AubioTempoBackend)),
        _ => None,
    }
}

/// Round to `places` decimal places for stable report values.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn chain_order_follows_config() {
        let settings = AnalysisSettings {
            backends: vec!["aubio".into(), "librosa".into(), "bogus".into(), "waveform".into()],
            commands: BTreeMap::from([
                ("librosa".to_string(), vec!["python3".to_string(), "f.py".to_string()]),
                ("essentia".to_string(), vec!["ess".to_string()]),
            ]),
        };
        let chain = AnalysisChain::from_config(&settings);
        assert_eq!(chain.names(), vec!["aubio", "librosa", "waveform", "essentia"]);
    }

    #[test]
    fn reserved_command_names_are_skipped() {
        let settings = AnalysisSettings {
            backends: vec!["waveform".into(), "file".into()],
            commands: BTreeMap::from([
                ("error".to_string(), vec!["echo".to_string()]),
                ("file".to_string(), vec!["echo".to_string()]),
                ("loudness".to_string(), vec!["ebur".to_string()]),
            ]),
        };
        let chain = AnalysisChain::from_config(&settings);
        assert_eq!(chain.names(), vec!["waveform", "loudness"]);
    }

    #[test]
    fn report_shape() {
        let report = AnalysisReport {
            file: PathBuf::from("/tmp/a.wav"),
            results: vec![("waveform".into(), serde_json::json!({"peak": 0.5}))],
            error: None,
        };
        assert_eq!(
            report.to_value(),
            serde_json::json!({"file": "/tmp/a.wav", "waveform": {"peak": 0.5}})
        );
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(440.04, 1), 440.0);
    }
}
