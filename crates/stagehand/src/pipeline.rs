//! Capture some bars, then describe them.

use anyhow::{Context, Result};
use serde::Serialize;
use stageproto::TempoSource;

use crate::analysis::{AnalysisChain, AnalysisReport};
use crate::capture::{Capture, CaptureDriver};

#[derive(Debug, Clone, Serialize)]
pub struct ListenReport {
    pub capture: Capture,
    pub analysis: AnalysisReport,
}

/// Capture `bars` bars at the current tempo and run the analysis chain on it.
pub async fn listen(
    driver: &CaptureDriver,
    tempo: &dyn TempoSource,
    chain: &AnalysisChain,
    bars: f64,
) -> Result<ListenReport> {
    let capture = driver
        .capture_bars(bars, tempo)
        .await
        .context("capture failed")?;
    let analysis = chain
        .analyze(&capture.path)
        .await
        .context("analysis failed")?;

    Ok(ListenReport { capture, analysis })
}
