//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use stageconf::{ConfigSources, StageConfig};
use stagehand::{
    read_latest, AnalysisChain, AudioMonitor, CaptureDriver, MixCheckPlan, Rig, SweepPlan,
};
use stageproto::{
    FallbackTempo, FixedTempo, LinkClient, LiveCommand, LiveSession, SessionTempo, TempoSource,
    Transport, UdpTransport,
};
use tracing::{info, warn};

use crate::QueryTarget;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value)?;
    println!("{}", output);
    Ok(())
}

async fn connect(config: &StageConfig) -> Result<LiveSession> {
    LiveSession::connect(&config.osc).await.with_context(|| {
        format!(
            "could not set up OSC to {}:{} (replies on port {})",
            config.osc.host, config.osc.send_port, config.osc.recv_port
        )
    })
}

fn link(config: &StageConfig) -> LinkClient {
    LinkClient::from_settings(&config.link)
}

/// Tempo for bar-based captures: an explicit `bpm`, else Link, else the
/// session's own tempo when a session is available.
fn tempo_source(
    config: &StageConfig,
    bpm: Option<f64>,
    session: Option<&LiveSession>,
) -> Arc<dyn TempoSource> {
    if let Some(bpm) = bpm {
        return Arc::new(FixedTempo(bpm));
    }
    let from_link: Arc<dyn TempoSource> = Arc::new(link(config));
    match session {
        Some(session) => Arc::new(FallbackTempo::new(
            from_link,
            Arc::new(SessionTempo::new(session.query_engine())),
        )),
        None => from_link,
    }
}

/// Session for tempo lookups only; capture still works without one.
async fn optional_session(config: &StageConfig, bpm: Option<f64>) -> Option<LiveSession> {
    if bpm.is_some() {
        return None;
    }
    match connect(config).await {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "no session for tempo, using Link only");
            None
        }
    }
}

async fn close(session: Option<LiveSession>) -> Result<()> {
    if let Some(session) = session {
        session.shutdown().await?;
    }
    Ok(())
}

fn driver(config: &StageConfig) -> CaptureDriver {
    CaptureDriver::from_settings(&config.capture)
}

fn chain(config: &StageConfig) -> AnalysisChain {
    AnalysisChain::from_config(&config.analysis)
}

pub async fn link_status(config: &StageConfig) -> Result<()> {
    let client = link(config);
    let status = client.status().await;
    let bpm = stageproto::link::parse_bpm(&status);
    print_json(&json!({ "status": status, "bpm": bpm }))
}

pub async fn link_tempo(config: &StageConfig, bpm: f64) -> Result<()> {
    let client = link(config);
    client
        .set_tempo(bpm)
        .await
        .with_context(|| format!("Carabiner at {} did not take the tempo", client.addr()))?;
    print_json(&json!({ "link": "tempo", "bpm": bpm }))
}

pub async fn link_start(config: &StageConfig) -> Result<()> {
    let client = link(config);
    client
        .start()
        .await
        .with_context(|| format!("could not start Link via {}", client.addr()))?;
    print_json(&json!({ "link": "start" }))
}

pub async fn link_stop(config: &StageConfig) -> Result<()> {
    let client = link(config);
    client
        .stop()
        .await
        .with_context(|| format!("could not stop Link via {}", client.addr()))?;
    print_json(&json!({ "link": "stop" }))
}

/// Fire-and-forget; no reply port is bound.
pub async fn send(config: &StageConfig, command: LiveCommand) -> Result<()> {
    let transport = UdpTransport::connect(&config.osc.host, config.osc.send_port).await?;
    transport.send_command(&command).await?;
    print_json(&json!({ "sent": command.topic(), "args": command.args() }))
}

pub async fn query(config: &StageConfig, target: QueryTarget) -> Result<()> {
    let session = connect(config).await?;
    let engine = session.query_engine();

    let result = match target {
        QueryTarget::Session => serde_json::to_value(engine.get_session_info().await)?,
        QueryTarget::Tracks => serde_json::to_value(engine.get_all_tracks().await)?,
        QueryTarget::Track { index } => serde_json::to_value(engine.get_track_info(index).await)?,
        QueryTarget::Clips { track } => serde_json::to_value(engine.get_clip_slots(track).await)?,
        QueryTarget::Devices { track } => serde_json::to_value(engine.get_devices(track).await)?,
        QueryTarget::Params { track, device } => {
            serde_json::to_value(engine.get_device_params(track, device).await)?
        }
    };

    session.shutdown().await?;
    print_json(&result)
}

pub async fn capture(config: &StageConfig, seconds: f64) -> Result<()> {
    let capture = driver(config).capture_duration(seconds).await?;
    print_json(&capture)
}

pub async fn capture_bars(config: &StageConfig, bars: f64, bpm: Option<f64>) -> Result<()> {
    let session = optional_session(config, bpm).await;
    let tempo = tempo_source(config, bpm, session.as_ref());

    let result = driver(config).capture_bars(bars, tempo.as_ref()).await;
    close(session).await?;
    print_json(&result?)
}

pub async fn analyze(config: &StageConfig, file: &Path) -> Result<()> {
    let report = chain(config).analyze(file).await?;
    print_json(&report)
}

pub async fn listen(config: &StageConfig, bars: f64, bpm: Option<f64>) -> Result<()> {
    let session = optional_session(config, bpm).await;
    let tempo = tempo_source(config, bpm, session.as_ref());

    let result = stagehand::listen(&driver(config), tempo.as_ref(), &chain(config), bars).await;
    close(session).await?;
    print_json(&result?)
}

pub async fn monitor_start(config: &StageConfig, bars: Option<u32>) -> Result<()> {
    let mut settings = config.monitor.clone();
    if let Some(bars) = bars {
        settings.interval_bars = bars;
    }

    let session = optional_session(config, None).await;
    let tempo = tempo_source(config, None, session.as_ref());
    let monitor = AudioMonitor::start(
        Arc::new(driver(config)),
        tempo,
        Arc::new(chain(config)),
        &settings,
    );
    info!(
        bars = settings.interval_bars,
        latest = %monitor.latest_path().display(),
        "monitoring, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;

    monitor.stop().await?;
    close(session).await
}

pub async fn monitor_latest(config: &StageConfig) -> Result<()> {
    match read_latest(&config.capture.dir).await? {
        Some(latest) => print_json(&latest),
        None => bail!(
            "no analysis in {} yet, run `stagectl monitor start` first",
            config.capture.dir.display()
        ),
    }
}

fn rig(config: &StageConfig, session: &LiveSession) -> Rig {
    Rig {
        transport: session.transport(),
        engine: session.query_engine(),
        driver: Arc::new(driver(config)),
        tempo: tempo_source(config, None, Some(session)),
        chain: Arc::new(chain(config)),
    }
}

pub async fn sweep(config: &StageConfig, plan: SweepPlan) -> Result<()> {
    let session = connect(config).await?;
    let result = stagehand::sweep_parameter(&rig(config, &session), &plan).await;
    session.shutdown().await?;
    print_json(&result?)
}

pub async fn mix_check(config: &StageConfig, plan: MixCheckPlan) -> Result<()> {
    let session = connect(config).await?;
    let result = stagehand::mix_check(&rig(config, &session), &plan).await;
    session.shutdown().await?;
    print_json(&result?)
}

pub fn show_config(config: &StageConfig, sources: &ConfigSources, as_toml: bool) -> Result<()> {
    if as_toml {
        print!("{}", config.to_toml());
        return Ok(());
    }

    print_json(&json!({
        "config": config,
        "sources": {
            "files": sources.files,
            "env_overrides": sources.env_overrides,
        },
    }))
}
