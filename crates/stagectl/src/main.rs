//! stagectl - drive, query and listen to a live DAW session
//!
//! Subcommands:
//! - transport and mixer sends (`play`, `fire`, `solo`, `volume`, `osc`, ...)
//! - `link ...` - Ableton Link through Carabiner
//! - `query ...` - read session state over OSC
//! - `capture`, `analyze`, `listen` - record and describe the output
//! - `monitor`, `sweep`, `mix-check` - longer listening procedures
//! - `config` - show the effective configuration
//!
//! Results go to stdout as JSON, logs to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stageconf::{ConfigSources, StageConfig};
use stageproto::{parse_cli_arg, LiveCommand};

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "stagectl")]
#[command(about = "Control, query and listen to a live DAW session")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ./stagehand.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reply timeout for session queries, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ableton Link via Carabiner
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Start session playback
    Play,

    /// Stop session playback
    Pause,

    /// Set the session tempo
    SetTempo { bpm: f32 },

    /// Launch a clip
    Fire { track: i32, clip: i32 },

    /// Stop a clip
    StopClip { track: i32, clip: i32 },

    /// Launch a scene
    FireScene { scene: i32 },

    Mute { track: i32 },
    Unmute { track: i32 },
    Solo { track: i32 },
    Unsolo { track: i32 },
    Arm { track: i32 },
    Disarm { track: i32 },

    /// Set a track's fader (0.0 to 1.0)
    Volume { track: i32, level: f32 },

    /// Set a track's panning (-1.0 left to 1.0 right)
    Pan {
        track: i32,
        #[arg(allow_negative_numbers = true)]
        value: f32,
    },

    /// Set a device parameter value
    DeviceParam {
        track: i32,
        device: i32,
        param: i32,
        #[arg(allow_negative_numbers = true)]
        value: f32,
    },

    /// Send any OSC message. Arguments are ints, floats (with a '.') or strings.
    Osc {
        address: String,
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Read session state
    Query {
        #[command(subcommand)]
        target: QueryTarget,
    },

    /// Record a number of seconds
    Capture { seconds: f64 },

    /// Record a number of bars at the current tempo
    CaptureBars {
        #[arg(default_value = "4")]
        bars: f64,

        /// Use this tempo instead of asking Link and the session
        #[arg(long)]
        bpm: Option<f64>,
    },

    /// Run the analysis chain on an audio file
    Analyze { file: PathBuf },

    /// Capture some bars and analyze them
    Listen {
        #[arg(default_value = "4")]
        bars: f64,

        #[arg(long)]
        bpm: Option<f64>,
    },

    /// Continuous capture and analysis
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },

    /// Step a device parameter through a range, listening at each value
    Sweep {
        track: i32,
        device: i32,
        param: i32,

        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        start: f64,

        #[arg(long, default_value = "1.0", allow_negative_numbers = true)]
        end: f64,

        #[arg(long, default_value = "5")]
        steps: usize,

        #[arg(long, default_value = "1")]
        bars: f64,
    },

    /// Solo each track in turn and listen to it
    MixCheck {
        /// Number of tracks (asked from the session when omitted)
        #[arg(long)]
        tracks: Option<usize>,

        #[arg(long, default_value = "2")]
        bars: f64,
    },

    /// Print the effective configuration and where it came from
    Config {
        /// Print as TOML instead of JSON
        #[arg(long)]
        toml: bool,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Raw Carabiner status
    Status,
    /// Set the Link tempo
    Tempo { bpm: f64 },
    /// Start the Link transport
    Start,
    /// Stop the Link transport
    Stop,
}

#[derive(Subcommand)]
pub(crate) enum QueryTarget {
    /// Tempo, track and scene counts, time signature
    Session,
    /// Every track
    Tracks,
    /// One track
    Track { index: i32 },
    /// Clip slots of a track
    Clips { track: i32 },
    /// Devices on a track
    Devices { track: i32 },
    /// Parameters of a device
    Params {
        track: i32,
        #[arg(default_value = "0")]
        device: i32,
    },
}

#[derive(Subcommand)]
enum MonitorAction {
    /// Run until Ctrl-C, rewriting latest_analysis.json every cycle
    Start {
        /// Bars per cycle
        bars: Option<u32>,
    },
    /// Print the newest monitor result
    Latest,
}

fn load_config(cli: &Cli) -> Result<(StageConfig, ConfigSources)> {
    let (mut config, sources) = StageConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(ms) = cli.timeout_ms {
        config.osc.query_timeout_ms = ms;
    }
    Ok((config, sources))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = load_config(&cli)?;
    telemetry::init(&config.telemetry.log_level)?;
    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "config loaded");

    match cli.command {
        Commands::Link { action } => match action {
            LinkAction::Status => commands::link_status(&config).await?,
            LinkAction::Tempo { bpm } => commands::link_tempo(&config, bpm).await?,
            LinkAction::Start => commands::link_start(&config).await?,
            LinkAction::Stop => commands::link_stop(&config).await?,
        },

        Commands::Play => commands::send(&config, LiveCommand::Play).await?,
        Commands::Pause => commands::send(&config, LiveCommand::Stop).await?,
        Commands::SetTempo { bpm } => commands::send(&config, LiveCommand::SetTempo(bpm)).await?,
        Commands::Fire { track, clip } => {
            commands::send(&config, LiveCommand::FireClip { track, clip }).await?
        }
        Commands::StopClip { track, clip } => {
            commands::send(&config, LiveCommand::StopClip { track, clip }).await?
        }
        Commands::FireScene { scene } => {
            commands::send(&config, LiveCommand::FireScene(scene)).await?
        }
        Commands::Mute { track } => {
            commands::send(&config, LiveCommand::SetMute { track, on: true }).await?
        }
        Commands::Unmute { track } => {
            commands::send(&config, LiveCommand::SetMute { track, on: false }).await?
        }
        Commands::Solo { track } => {
            commands::send(&config, LiveCommand::SetSolo { track, on: true }).await?
        }
        Commands::Unsolo { track } => {
            commands::send(&config, LiveCommand::SetSolo { track, on: false }).await?
        }
        Commands::Arm { track } => {
            commands::send(&config, LiveCommand::SetArm { track, on: true }).await?
        }
        Commands::Disarm { track } => {
            commands::send(&config, LiveCommand::SetArm { track, on: false }).await?
        }
        Commands::Volume { track, level } => {
            commands::send(&config, LiveCommand::SetVolume { track, level }).await?
        }
        Commands::Pan { track, value } => {
            commands::send(&config, LiveCommand::SetPan { track, value }).await?
        }
        Commands::DeviceParam {
            track,
            device,
            param,
            value,
        } => {
            commands::send(
                &config,
                LiveCommand::SetDeviceParam {
                    track,
                    device,
                    param,
                    value,
                },
            )
            .await?
        }
        Commands::Osc { address, args } => {
            let args = args.iter().map(|a| parse_cli_arg(a)).collect();
            commands::send(&config, LiveCommand::Raw { address, args }).await?
        }

        Commands::Query { target } => commands::query(&config, target).await?,

        Commands::Capture { seconds } => commands::capture(&config, seconds).await?,
        Commands::CaptureBars { bars, bpm } => commands::capture_bars(&config, bars, bpm).await?,
        Commands::Analyze { file } => commands::analyze(&config, &file).await?,
        Commands::Listen { bars, bpm } => commands::listen(&config, bars, bpm).await?,

        Commands::Monitor { action } => match action {
            MonitorAction::Start { bars } => commands::monitor_start(&config, bars).await?,
            MonitorAction::Latest => commands::monitor_latest(&config).await?,
        },

        Commands::Sweep {
            track,
            device,
            param,
            start,
            end,
            steps,
            bars,
        } => {
            let plan = stagehand::SweepPlan {
                start,
                end,
                steps,
                bars,
                ..stagehand::SweepPlan::new(track, device, param)
            };
            commands::sweep(&config, plan).await?
        }
        Commands::MixCheck { tracks, bars } => {
            let plan = stagehand::MixCheckPlan {
                track_count: tracks,
                bars,
                ..stagehand::MixCheckPlan::default()
            };
            commands::mix_check(&config, plan).await?
        }

        Commands::Config { toml } => commands::show_config(&config, &sources, toml)?,
    }

    Ok(())
}
