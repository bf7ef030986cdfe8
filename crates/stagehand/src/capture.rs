//! Timed audio capture through external recorders.
//!
//! Recorders are separate processes (ffmpeg, sox, jack_capture, pw-record).
//! The driver picks the first one present on this host, runs it for the
//! requested wall-clock time and makes sure it is gone afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use stageconf::CaptureSettings;
use stageproto::TempoSource;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

/// Beats in one bar. Capture length ignores the session's time signature.
pub const BEATS_PER_BAR: f64 = 4.0;

/// How long an interrupted recorder gets to finalize its file before it is killed.
const STOP_WINDOW: Duration = Duration::from_millis(500);

static CAPTURE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No capture tool found. Install one of: {}", tried.join(", "))]
    ToolUnavailable { tried: Vec<String> },

    #[error("Invalid capture duration: {0}")]
    InvalidDuration(f64),

    #[error("{tool} exited with status {status:?}: {stderr}")]
    ToolFailed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} finished but wrote no file at {path}")]
    NoOutput { tool: String, path: PathBuf },

    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One way of recording audio to a file.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Checked on every capture; tools can be installed or removed while we run.
    fn is_available(&self) -> bool;

    /// Record `seconds` of audio to `output`. Must not outlive its deadline.
    async fn record(&self, seconds: f64, output: &Path) -> Result<(), CaptureError>;
}

/// An external recorder described by program and argument template.
///
/// `{duration}` and `{output}` in the template are substituted per call.
/// A self-timed tool stops on its own and is only killed if it overruns by
/// more than `grace`; any other tool is stopped by us at the deadline.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    name: String,
    program: String,
    args: Vec<String>,
    self_timed: bool,
    grace: Duration,
}

impl CommandCapture {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        self_timed: bool,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            self_timed,
            grace: Duration::from_secs(2),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Built-in recorder by name, configured from settings.
    pub fn builtin(name: &str, settings: &CaptureSettings) -> Option<Self> {
        let args = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let channels = settings.channels.to_string();

        let capture = match name {
            "ffmpeg" => Self::new(
                "ffmpeg",
                "ffmpeg",
                args(&[
                    "-f",
                    settings.ffmpeg_format.as_str(),
                    "-i",
                    settings.ffmpeg_input.as_str(),
                    "-t",
                    "{duration}",
                    "-y",
                    "-loglevel",
                    "warning",
                    "{output}",
                ]),
                true,
            ),
            "sox" => Self::new(
                "sox",
                "sox",
                args(&["-d", "-c", channels.as_str(), "{output}", "trim", "0", "{duration}"]),
                true,
            ),
            "jack_capture" => Self::new(
                "jack_capture",
                "jack_capture",
                args(&["--duration", "{duration}", "{output}"]),
                true,
            ),
            "pw-record" => Self::new(
                "pw-record",
                "pw-record",
                args(&["--channels", channels.as_str(), "{output}"]),
                false,
            ),
            _ => return None,
        };

        Some(capture.with_grace(Duration::from_millis(settings.grace_ms)))
    }

    fn render_args(&self, seconds: f64, output: &Path) -> Vec<String> {
        let duration = format_seconds(seconds);
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{duration}", &duration).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl CaptureBackend for CommandCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        find_on_path(&self.program).is_some()
    }

    async fn record(&self, seconds: f64, output: &Path) -> Result<(), CaptureError> {
        let wall = wall_time(seconds)?;
        let limit = if self.self_timed {
            wall.saturating_add(self.grace)
        } else {
            wall
        };

        let args = self.render_args(seconds, output);
        debug!(tool = %self.name, ?args, "spawning recorder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                tool: self.name.clone(),
                source,
            })?;

        // Read stderr as it comes so a chatty recorder cannot block on a full pipe
        let stderr = tokio::spawn(drain_stderr(child.stderr.take()));

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if status.success() {
                    return Ok(());
                }
                Err(CaptureError::ToolFailed {
                    tool: self.name.clone(),
                    status: status.code(),
                    stderr: stderr.await.unwrap_or_default(),
                })
            }
            Err(_) => {
                if self.self_timed {
                    warn!(tool = %self.name, ?limit, "recorder overran its duration, stopping it");
                } else {
                    debug!(tool = %self.name, "duration reached, stopping recorder");
                }
                stop(&mut child).await?;

                if output.exists() {
                    Ok(())
                } else {
                    Err(CaptureError::NoOutput {
                        tool: self.name.clone(),
                        path: output.to_path_buf(),
                    })
                }
            }
        }
    }
}

/// Ask the recorder to stop so it can finalize its file, then kill it.
async fn stop(child: &mut Child) -> Result<(), CaptureError> {
    if interrupt(child).await && tokio::time::timeout(STOP_WINDOW, child.wait()).await.is_ok() {
        return Ok(());
    }
    child.kill().await?;
    Ok(())
}

#[cfg(unix)]
async fn interrupt(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn interrupt(_child: &Child) -> bool {
    false
}

async fn drain_stderr(stderr: Option<ChildStderr>) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_string(&mut text).await;
    }
    text.trim().to_string()
}

/// Resolve `program` the way a shell would: paths as given, bare names via `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Positive, finite seconds that fit in a `Duration`.
fn wall_time(seconds: f64) -> Result<Duration, CaptureError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CaptureError::InvalidDuration(seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| CaptureError::InvalidDuration(seconds))
}

/// Seconds as recorders accept them: at most two decimals, no trailing zeros.
fn format_seconds(seconds: f64) -> String {
    let text = format!("{:.2}", seconds);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// `bars × 4 × 60 / bpm`, rounded to centiseconds.
pub fn bars_to_seconds(bars: f64, bpm: f64) -> f64 {
    (bars * BEATS_PER_BAR * 60.0 / bpm * 100.0).round() / 100.0
}

/// A finished capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capture {
    pub path: PathBuf,
    pub seconds: f64,
    /// Tempo the duration was derived from, when captured by bars.
    pub bpm: Option<f64>,
    /// True when no tempo source answered and the default tempo was used.
    pub tempo_fallback: bool,
    pub tool: String,
}

/// Chooses a recorder and turns bar counts into timed captures.
pub struct CaptureDriver {
    backends: Vec<Arc<dyn CaptureBackend>>,
    dir: PathBuf,
    default_bpm: f64,
}

impl CaptureDriver {
    pub fn new(dir: impl Into<PathBuf>, default_bpm: f64, backends: Vec<Arc<dyn CaptureBackend>>) -> Self {
        Self {
            backends,
            dir: dir.into(),
            default_bpm,
        }
    }

    /// Built-in recorders in the configured preference order.
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        let backends = settings
            .tools
            .iter()
            .filter_map(|name| {
                let capture = CommandCapture::builtin(name, settings);
                if capture.is_none() {
                    warn!(tool = %name, "unknown capture tool in config, skipping");
                }
                capture
            })
            .map(|c| Arc::new(c) as Arc<dyn CaptureBackend>)
            .collect();

        Self::new(settings.dir.clone(), settings.default_bpm, backends)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_bpm(&self) -> f64 {
        self.default_bpm
    }

    /// First available recorder, in preference order.
    pub fn select(&self) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
        self.backends
            .iter()
            .find(|b| b.is_available())
            .cloned()
            .ok_or_else(|| CaptureError::ToolUnavailable {
                tried: self.backends.iter().map(|b| b.name().to_string()).collect(),
            })
    }

    /// Record `seconds` of audio with the first available recorder.
    pub async fn capture_duration(&self, seconds: f64) -> Result<Capture, CaptureError> {
        wall_time(seconds)?;

        let backend = self.select()?;
        let output = self.next_output_path().await?;

        info!(tool = backend.name(), seconds, path = %output.display(), "capture started");
        let started = Instant::now();
        backend.record(seconds, &output).await?;

        if !output.exists() {
            return Err(CaptureError::NoOutput {
                tool: backend.name().to_string(),
                path: output,
            });
        }
        info!(
            tool = backend.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "capture finished"
        );

        Ok(Capture {
            path: output,
            seconds,
            bpm: None,
            tempo_fallback: false,
            tool: backend.name().to_string(),
        })
    }

    /// Record `bars` bars at the current tempo, or at the default tempo when
    /// `tempo` has no answer.
    pub async fn capture_bars(&self, bars: f64, tempo: &dyn TempoSource) -> Result<Capture, CaptureError> {
        if !bars.is_finite() || bars <= 0.0 {
            return Err(CaptureError::InvalidDuration(bars));
        }

        let (bpm, tempo_fallback) = match tempo.get_bpm().await {
            Some(bpm) => (bpm, false),
            None => {
                warn!(
                    source = tempo.name(),
                    default_bpm = self.default_bpm,
                    "could not get tempo, using default"
                );
                (self.default_bpm, true)
            }
        };

        let seconds = bars_to_seconds(bars, bpm);
        info!(bars, bpm, seconds, "capturing bars");

        let capture = self.capture_duration(seconds).await?;
        Ok(Capture {
            bpm: Some(bpm),
            tempo_fallback,
            ..capture
        })
    }

    /// `<dir>/capture_<timestamp>_<seq>.wav`, creating the directory if needed.
    async fn next_output_path(&self) -> Result<PathBuf, CaptureError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let seq = CAPTURE_SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(self.dir.join(format!("capture_{}_{}.wav", stamp, seq)))
    }
}
