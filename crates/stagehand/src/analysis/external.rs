//! Backends that shell out to an analysis tool.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::debug;

use super::AnalysisBackend;
use crate::capture::find_on_path;

/// Upper bound on one analysis tool run.
const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

async fn run_tool(program: &str, args: &[String]) -> Result<Output> {
    debug!(program, ?args, "running analysis tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    tokio::time::timeout(TOOL_TIMEOUT, child.wait_with_output())
        .await
        .with_context(|| format!("{program} timed out after {TOOL_TIMEOUT:?}"))?
        .with_context(|| format!("failed to wait for {program}"))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `sox <file> -n stat`: amplitude and level statistics.
pub struct SoxStatBackend;

#[async_trait]
impl AnalysisBackend for SoxStatBackend {
    fn name(&self) -> &str {
        "sox"
    }

    fn is_available(&self) -> bool {
        find_on_path("sox").is_some()
    }

    async fn analyze(&self, path: &Path) -> Result<Value> {
        let args = vec![path_arg(path), "-n".to_string(), "stat".to_string()];
        let output = run_tool("sox", &args).await?;
        // `stat` reports on stderr
        let text = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!("sox exited with {}: {}", output.status, text.trim());
        }

        let stats = parse_sox_stat(&text);
        if stats.is_empty() {
            bail!("sox stat produced no statistics");
        }
        Ok(Value::Object(stats))
    }
}

/// `Key name:   value` lines into snake_case numeric keys.
fn parse_sox_stat(text: &str) -> Map<String, Value> {
    let mut stats = Map::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(number) = value.trim().parse::<f64>() else {
            continue;
        };
        let Some(number) = serde_json::Number::from_f64(number) else {
            continue;
        };
        stats.insert(snake_case(key), Value::Number(number));
    }
    stats
}

fn snake_case(key: &str) -> String {
    key.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// `aubio tempo <file>`: a single BPM estimate.
pub struct AubioTempoBackend;

#[async_trait]
impl AnalysisBackend for AubioTempoBackend {
    fn name(&self) -> &str {
        "aubio"
    }

    fn is_available(&self) -> bool {
        find_on_path("aubio").is_some()
    }

    async fn analyze(&self, path: &Path) -> Result<Value> {
        let args = vec!["tempo".to_string(), path_arg(path)];
        let output = run_tool("aubio", &args).await?;
        if !output.status.success() {
            bail!(
                "aubio exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let bpm = parse_aubio_tempo(&text).context("aubio printed no tempo")?;
        Ok(serde_json::json!({ "tempo": bpm }))
    }
}

/// Last `<float> bpm` line of aubio output.
fn parse_aubio_tempo(text: &str) -> Option<f64> {
    text.lines().rev().find_map(|line| {
        let number = line.trim().strip_suffix("bpm")?.trim();
        number.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
    })
}

/// Any command that takes the audio path as its last argument and prints
/// one JSON object on stdout.
pub struct JsonCommandBackend {
    name: String,
    command: Vec<String>,
}

impl JsonCommandBackend {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

#[async_trait]
impl AnalysisBackend for JsonCommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.command
            .first()
            .is_some_and(|program| find_on_path(program).is_some())
    }

    async fn analyze(&self, path: &Path) -> Result<Value> {
        let Some((program, rest)) = self.command.split_first() else {
            bail!("empty command for analysis backend {}", self.name);
        };
        let mut args = rest.to_vec();
        args.push(path_arg(path));

        let output = run_tool(program, &args).await?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("{} did not print valid JSON", self.name))?;
        if !value.is_object() {
            bail!("{} printed JSON that is not an object", self.name);
        }
        Ok(value)
    }
}
