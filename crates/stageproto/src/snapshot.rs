//! Client-assembled views of session state.
//!
//! Each field comes from its own query and is `None` when that query timed
//! out. Nothing here is atomic: the session may change between sub-queries.

use serde::Serialize;

use crate::osc::OscArg;

/// Song-level state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub tempo: Option<f64>,
    pub num_tracks: Option<i64>,
    pub num_scenes: Option<i64>,
    pub signature_numerator: Option<i64>,
    pub signature_denominator: Option<i64>,
}

/// Mixer state of one track.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub index: i32,
    pub name: Option<String>,
    pub volume: Option<f64>,
    pub panning: Option<f64>,
    pub mute: Option<bool>,
    pub solo: Option<bool>,
    pub arm: Option<bool>,
}

/// One clip slot. Empty slots have no name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipSnapshot {
    pub slot: usize,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSnapshot {
    pub index: usize,
    pub name: String,
    pub value: Option<f64>,
}

/// Name text from a reply argument. Nil and empty strings mean "no name".
pub(crate) fn name_of(arg: &OscArg) -> Option<String> {
    match arg {
        OscArg::Str(s) if !s.is_empty() => Some(s.clone()),
        OscArg::Str(_) | OscArg::Nil => None,
        other => other.as_f64().map(|v| v.to_string()),
    }
}

/// Round to four decimal places, the precision parameter values are reported at.
pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
