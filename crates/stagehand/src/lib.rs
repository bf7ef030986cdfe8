//! stagehand - hearing what the session sounds like
//!
//! Records a few bars of the session's output with whatever recorder is
//! installed, describes the recording with whatever analysis tools are
//! installed, and strings those together into longer procedures.
//!
//! - `capture` - recorder backends and the timed capture driver
//! - `analysis` - analysis backends and the chain that merges their output
//! - `pipeline` - capture then analyze, once
//! - `monitor` - capture then analyze, forever, newest result on disk
//! - `procedures` - parameter sweeps and solo-each-track mix checks

pub mod analysis;
pub mod capture;
pub mod monitor;
pub mod pipeline;
pub mod procedures;

pub use analysis::{AnalysisBackend, AnalysisChain, AnalysisError, AnalysisReport, NO_BACKEND};
pub use capture::{
    bars_to_seconds, Capture, CaptureBackend, CaptureDriver, CaptureError, CommandCapture,
    BEATS_PER_BAR,
};
pub use monitor::{read_latest, AudioMonitor, LATEST_FILE};
pub use pipeline::{listen, ListenReport};
pub use procedures::{mix_check, sweep_parameter, MixCheckPlan, Rig, SweepPlan, SweepStep, TrackCheck};
