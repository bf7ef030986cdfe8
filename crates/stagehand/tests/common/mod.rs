//! In-process fakes shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::{json, Value};
use stagehand::{AnalysisBackend, CaptureBackend, CaptureError};
use stageproto::TempoSource;

/// Write `samples` as a mono 32-bit float WAV.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Recorder that writes a short tone immediately instead of waiting.
pub struct FakeRecorder {
    pub name: &'static str,
    pub available: bool,
    pub fail: bool,
    pub requested: Mutex<Vec<f64>>,
}

impl FakeRecorder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            available: true,
            fail: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(name: &'static str) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn requested(&self) -> Vec<f64> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeRecorder {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn record(&self, seconds: f64, output: &Path) -> Result<(), CaptureError> {
        self.requested.lock().unwrap().push(seconds);
        if self.fail {
            return Err(CaptureError::ToolFailed {
                tool: self.name.to_string(),
                status: Some(1),
                stderr: "device busy".to_string(),
            });
        }
        write_wav(output, 8000, &sine(440.0, 8000, 0.1, 0.5));
        Ok(())
    }
}

/// Analysis backend with a scripted outcome that counts its calls.
pub struct StubBackend {
    pub name: &'static str,
    pub available: bool,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StubBackend {
    pub fn ok(name: &'static str) -> Self {
        Self {
            name,
            available: true,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name)
        }
    }

    pub fn missing(name: &'static str) -> Self {
        Self {
            available: false,
            ..Self::ok(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisBackend for StubBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn analyze(&self, _path: &Path) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            anyhow::bail!("{} crashed", self.name);
        }
        Ok(json!({ "call": call }))
    }
}

/// Tempo source that never answers.
pub struct Silent;

#[async_trait]
impl TempoSource for Silent {
    async fn get_bpm(&self) -> Option<f64> {
        None
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}
