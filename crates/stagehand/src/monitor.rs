//! Continuous capture -> analyze loop that keeps the newest result on disk.
//!
//! Each cycle overwrites `<dir>/latest_analysis.json`, so any process can
//! read the most recent picture of what the session sounds like. A failed
//! cycle writes `{error, timestamp}` instead and backs off before retrying.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use stageconf::MonitorSettings;
use stageproto::TempoSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::AnalysisChain;
use crate::capture::CaptureDriver;
use crate::pipeline::listen;

pub const LATEST_FILE: &str = "latest_analysis.json";

/// Handle to a running monitor. Dropping it stops the loop without waiting.
pub struct AudioMonitor {
    latest: PathBuf,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Cycle {
    driver: Arc<CaptureDriver>,
    tempo: Arc<dyn TempoSource>,
    chain: Arc<AnalysisChain>,
    bars: u32,
    latest: PathBuf,
    backoff: Duration,
}

impl AudioMonitor {
    /// Start looping in the background, writing into the capture directory.
    pub fn start(
        driver: Arc<CaptureDriver>,
        tempo: Arc<dyn TempoSource>,
        chain: Arc<AnalysisChain>,
        settings: &MonitorSettings,
    ) -> Self {
        let latest = driver.dir().join(LATEST_FILE);
        let cycle = Cycle {
            driver,
            tempo,
            chain,
            bars: settings.interval_bars.max(1),
            latest: latest.clone(),
            backoff: Duration::from_millis(settings.error_backoff_ms),
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(cycle, cancel.clone()));
        info!(path = %latest.display(), bars = settings.interval_bars, "monitor started");

        Self {
            latest,
            cancel,
            task: Some(task),
        }
    }

    pub fn latest_path(&self) -> &Path {
        &self.latest
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop, abandoning any capture in progress, and wait for it.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.context("monitor task failed")?;
        }
        info!("monitor stopped");
        Ok(())
    }
}

impl Drop for AudioMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(cycle: Cycle, cancel: CancellationToken) {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = one_cycle(&cycle) => outcome,
        };

        let failed = outcome.is_err();
        let document = match outcome {
            Ok(mut report) => {
                report["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
                report["bars"] = json!(cycle.bars);
                report
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "monitor cycle failed");
                json!({
                    "error": format!("{e:#}"),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })
            }
        };

        if let Err(e) = write_latest(&cycle.latest, &document).await {
            warn!(error = %format!("{e:#}"), path = %cycle.latest.display(), "could not write latest analysis");
        }

        if failed {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cycle.backoff) => {}
            }
        }
    }
}

async fn one_cycle(cycle: &Cycle) -> Result<Value> {
    let report = listen(
        &cycle.driver,
        cycle.tempo.as_ref(),
        &cycle.chain,
        f64::from(cycle.bars),
    )
    .await?;
    Ok(report.analysis.to_value())
}

/// Replace the file in one step so readers never see half a document.
async fn write_latest(path: &Path, document: &Value) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(document)?;
    tokio::fs::write(&tmp, text)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming onto {}", path.display()))?;
    Ok(())
}

/// Read the newest monitor result from `dir`, if there is one.
pub async fn read_latest(dir: &Path) -> Result<Option<Value>> {
    let path = dir.join(LATEST_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(Some(value))
}
