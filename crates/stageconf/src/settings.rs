//! Configuration sections. Every field has a compiled default so a missing
//! file, or a file that only sets one key, still yields a usable config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// OSC control surface endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscSettings {
    /// Host the control surface listens on.
    /// Default: 127.0.0.1
    #[serde(default = "OscSettings::default_host")]
    pub host: String,

    /// Port requests are sent to.
    /// Default: 11000
    #[serde(default = "OscSettings::default_send_port")]
    pub send_port: u16,

    /// Local port replies arrive on.
    /// Default: 11001
    #[serde(default = "OscSettings::default_recv_port")]
    pub recv_port: u16,

    /// Bounded wait for a single query reply, in milliseconds.
    /// Default: 500
    #[serde(default = "OscSettings::default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl OscSettings {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_send_port() -> u16 {
        11000
    }

    fn default_recv_port() -> u16 {
        11001
    }

    fn default_query_timeout_ms() -> u64 {
        500
    }
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            send_port: Self::default_send_port(),
            recv_port: Self::default_recv_port(),
            query_timeout_ms: Self::default_query_timeout_ms(),
        }
    }
}

/// Carabiner (Ableton Link bridge) endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Default: localhost
    #[serde(default = "LinkSettings::default_host")]
    pub host: String,

    /// Default: 17000
    #[serde(default = "LinkSettings::default_port")]
    pub port: u16,

    /// Connect + read timeout per command, in milliseconds.
    /// Default: 2000
    #[serde(default = "LinkSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl LinkSettings {
    fn default_host() -> String {
        "localhost".to_string()
    }

    fn default_port() -> u16 {
        17000
    }

    fn default_timeout_ms() -> u64 {
        2000
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Audio capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Where captured WAV files are written.
    /// Default: ./captures
    #[serde(default = "CaptureSettings::default_dir")]
    pub dir: PathBuf,

    /// Tempo used when no tempo source answers.
    /// Default: 120.0
    #[serde(default = "CaptureSettings::default_bpm")]
    pub default_bpm: f64,

    /// Capture tools in preference order. First one found on PATH wins.
    #[serde(default = "CaptureSettings::default_tools")]
    pub tools: Vec<String>,

    /// ffmpeg input format (`-f`).
    /// Default: avfoundation
    #[serde(default = "CaptureSettings::default_ffmpeg_format")]
    pub ffmpeg_format: String,

    /// ffmpeg input device (`-i`).
    /// Default: ":BlackHole 2ch"
    #[serde(default = "CaptureSettings::default_ffmpeg_input")]
    pub ffmpeg_input: String,

    /// Default: 2
    #[serde(default = "CaptureSettings::default_channels")]
    pub channels: u16,

    /// Extra allowance for tools that time themselves before they are killed.
    /// Default: 2000
    #[serde(default = "CaptureSettings::default_grace_ms")]
    pub grace_ms: u64,
}

impl CaptureSettings {
    fn default_dir() -> PathBuf {
        PathBuf::from("captures")
    }

    fn default_bpm() -> f64 {
        120.0
    }

    fn default_tools() -> Vec<String> {
        ["ffmpeg", "sox", "jack_capture", "pw-record"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn default_ffmpeg_format() -> String {
        "avfoundation".to_string()
    }

    fn default_ffmpeg_input() -> String {
        ":BlackHole 2ch".to_string()
    }

    fn default_channels() -> u16 {
        2
    }

    fn default_grace_ms() -> u64 {
        2000
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            default_bpm: Self::default_bpm(),
            tools: Self::default_tools(),
            ffmpeg_format: Self::default_ffmpeg_format(),
            ffmpeg_input: Self::default_ffmpeg_input(),
            channels: Self::default_channels(),
            grace_ms: Self::default_grace_ms(),
        }
    }
}

/// Analysis chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Built-in backends to run, in report order.
    #[serde(default = "AnalysisSettings::default_backends")]
    pub backends: Vec<String>,

    /// Extra backends: name -> command line. The audio file path is appended
    /// and the command must print one JSON object on stdout.
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,
}

impl AnalysisSettings {
    fn default_backends() -> Vec<String> {
        ["waveform", "sox", "aubio"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            backends: Self::default_backends(),
            commands: BTreeMap::new(),
        }
    }
}

/// Continuous monitor loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Default: 4
    #[serde(default = "MonitorSettings::default_interval_bars")]
    pub interval_bars: u32,

    /// Pause after a failed cycle, in milliseconds.
    /// Default: 2000
    #[serde(default = "MonitorSettings::default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl MonitorSettings {
    fn default_interval_bars() -> u32 {
        4
    }

    fn default_error_backoff_ms() -> u64 {
        2000
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_bars: Self::default_interval_bars(),
            error_backoff_ms: Self::default_error_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetrySettings::default_log_level")]
    pub log_level: String,
}

impl TelemetrySettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
