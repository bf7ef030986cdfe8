//! Multi-step listening procedures: change something, settle, listen.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use stageproto::{LiveCommand, QueryEngine, TempoSource, Transport};
use tracing::{info, warn};

use crate::analysis::{AnalysisChain, AnalysisReport};
use crate::capture::CaptureDriver;
use crate::pipeline::listen;

/// Pause after unsoloing before the next track is soloed.
const RELEASE: Duration = Duration::from_millis(100);

/// Everything a procedure needs to drive the session and hear the result.
#[derive(Clone)]
pub struct Rig {
    pub transport: Arc<dyn Transport>,
    pub engine: Arc<QueryEngine>,
    pub driver: Arc<CaptureDriver>,
    pub tempo: Arc<dyn TempoSource>,
    pub chain: Arc<AnalysisChain>,
}

impl Rig {
    async fn send(&self, command: LiveCommand) -> Result<()> {
        self.transport
            .send_command(&command)
            .await
            .with_context(|| format!("sending {}", command.topic()))
    }

    async fn listen(&self, bars: f64) -> Result<AnalysisReport> {
        let report = listen(&self.driver, self.tempo.as_ref(), &self.chain, bars).await?;
        Ok(report.analysis)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub track: i32,
    pub device: i32,
    pub param: i32,
    pub start: f64,
    pub end: f64,
    pub steps: usize,
    pub bars: f64,
    pub settle: Duration,
}

impl SweepPlan {
    pub fn new(track: i32, device: i32, param: i32) -> Self {
        Self {
            track,
            device,
            param,
            start: 0.0,
            end: 1.0,
            steps: 5,
            bars: 1.0,
            settle: Duration::from_millis(300),
        }
    }

    /// `steps` evenly spaced values from `start` to `end` inclusive.
    pub fn values(&self) -> Vec<f64> {
        let span = self.end - self.start;
        let divisor = self.steps.saturating_sub(1).max(1) as f64;
        (0..self.steps)
            .map(|i| self.start + span * i as f64 / divisor)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepStep {
    pub param_value: f64,
    pub analysis: AnalysisReport,
}

/// Set a device parameter to each value of the plan and listen at every step.
pub async fn sweep_parameter(rig: &Rig, plan: &SweepPlan) -> Result<Vec<SweepStep>> {
    let values = plan.values();
    info!(
        track = plan.track,
        device = plan.device,
        param = plan.param,
        steps = values.len(),
        "parameter sweep"
    );

    let mut steps = Vec::with_capacity(values.len());
    for value in values {
        rig.send(LiveCommand::SetDeviceParam {
            track: plan.track,
            device: plan.device,
            param: plan.param,
            value: value as f32,
        })
        .await?;
        tokio::time::sleep(plan.settle).await;

        let analysis = rig
            .listen(plan.bars)
            .await
            .with_context(|| format!("listening at parameter value {value}"))?;
        steps.push(SweepStep {
            param_value: (value * 10_000.0).round() / 10_000.0,
            analysis,
        });
    }
    Ok(steps)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixCheckPlan {
    /// Asked from the session when not given.
    pub track_count: Option<usize>,
    pub bars: f64,
    pub settle: Duration,
}

impl Default for MixCheckPlan {
    fn default() -> Self {
        Self {
            track_count: None,
            bars: 2.0,
            settle: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackCheck {
    pub track: usize,
    pub analysis: AnalysisReport,
}

/// Solo each track in turn and listen to it alone.
///
/// The soloed track is unsoloed again whether or not its listen succeeded.
pub async fn mix_check(rig: &Rig, plan: &MixCheckPlan) -> Result<Vec<TrackCheck>> {
    let count = match plan.track_count {
        Some(count) => count,
        None => match rig.engine.num_tracks().await {
            Some(n) if n >= 0 => n as usize,
            _ => bail!("could not determine track count"),
        },
    };
    info!(tracks = count, bars = plan.bars, "mix check");

    let mut checks = Vec::with_capacity(count);
    for track in 0..count {
        let index = i32::try_from(track).context("track index out of range")?;

        rig.send(LiveCommand::SetSolo { track: index, on: true }).await?;
        tokio::time::sleep(plan.settle).await;
        let heard = rig.listen(plan.bars).await;

        if let Err(e) = rig.send(LiveCommand::SetSolo { track: index, on: false }).await {
            warn!(track, error = %format!("{e:#}"), "could not unsolo track");
        }
        tokio::time::sleep(RELEASE).await;

        let analysis = heard.with_context(|| format!("listening to track {track}"))?;
        checks.push(TrackCheck { track, analysis });
    }
    Ok(checks)
}
