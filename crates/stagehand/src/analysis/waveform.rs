//! Native WAV analysis: levels, spectral shape and a tempo estimate.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use realfft::{RealFftPlanner, RealToComplex};
use serde_json::{json, Value};

use super::{round_to, AnalysisBackend};

const FRAME: usize = 2048;
const HOP: usize = 512;
/// Fraction of spectral energy below the rolloff frequency
const ROLLOFF: f32 = 0.85;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
/// Peak level below which a file is treated as silence
const SILENCE: f32 = 1e-4;

/// Always available; decodes the file itself.
pub struct WaveformBackend;

#[async_trait]
impl AnalysisBackend for WaveformBackend {
    fn name(&self) -> &str {
        "waveform"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(&self, path: &Path) -> Result<Value> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || analyze_file(&path))
            .await
            .context("waveform analysis task panicked")?
    }
}

fn analyze_file(path: &Path) -> Result<Value> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("not a readable WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("corrupt WAV data")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("corrupt WAV data")?
        }
    };

    let mono = downmix(&samples, spec.channels.max(1) as usize);
    if mono.is_empty() {
        bail!("WAV file has no samples");
    }

    describe(&mono, spec.sample_rate, spec.channels)
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn describe(mono: &[f32], sample_rate: u32, channels: u16) -> Result<Value> {
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FRAME);
    let window = hann(FRAME);
    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let bin_hz = sample_rate as f32 / FRAME as f32;

    let mut rms = Vec::new();
    let mut zcr = Vec::new();
    let mut centroids = Vec::new();
    let mut rolloffs = Vec::new();
    let mut flux = Vec::new();
    let mut previous: Option<Vec<f32>> = None;

    for start in frame_starts(mono.len()) {
        let frame = &mono[start..(start + FRAME).min(mono.len())];

        rms.push((frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt());
        zcr.push(zero_crossing_rate(frame));

        for (i, slot) in input.iter_mut().enumerate() {
            *slot = frame.get(i).copied().unwrap_or(0.0) * window[i];
        }
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| anyhow::anyhow!("fft failed: {e}"))?;
        let mags: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();

        centroids.push(spectral_centroid(&mags, bin_hz));
        rolloffs.push(spectral_rolloff(&mags, bin_hz));

        if let Some(prev) = &previous {
            flux.push(
                mags.iter()
                    .zip(prev)
                    .map(|(cur, old)| (cur - old).max(0.0))
                    .sum::<f32>(),
            );
        }
        previous = Some(mags);
    }

    let peak = mono.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let energy = Stats::of(&rms);

    let mut report = json!({
        "duration_secs": round_to(mono.len() as f64 / f64::from(sample_rate), 3),
        "sample_rate": sample_rate,
        "channels": channels,
        "peak": round_to(f64::from(peak), 4),
        "energy": {
            "mean": round_to(energy.mean, 4),
            "max": round_to(energy.max, 4),
            "std": round_to(energy.std, 4),
        },
        "brightness": {
            "centroid_mean": round_to(Stats::of(&centroids).mean, 1),
            "rolloff_mean": round_to(Stats::of(&rolloffs).mean, 1),
        },
        "dynamics": {
            "zcr_mean": round_to(Stats::of(&zcr).mean, 4),
        },
    });

    if peak >= SILENCE {
        let env_rate = f64::from(sample_rate) / HOP as f64;
        if let Some(tempo) = estimate_tempo(&flux, env_rate) {
            report["tempo"] = json!(round_to(tempo, 1));
        }
    }

    Ok(report)
}

/// Frame start offsets. Input shorter than one frame is one zero-padded frame.
fn frame_starts(len: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    if len <= FRAME {
        return vec![0];
    }
    (0..=len - FRAME).step_by(HOP).collect()
}

fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
        .collect()
}

fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

fn spectral_centroid(mags: &[f32], bin_hz: f32) -> f32 {
    let total: f32 = mags.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    mags.iter()
        .enumerate()
        .map(|(i, m)| i as f32 * bin_hz * m)
        .sum::<f32>()
        / total
}

fn spectral_rolloff(mags: &[f32], bin_hz: f32) -> f32 {
    let total: f32 = mags.iter().map(|m| m * m).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let threshold = ROLLOFF * total;
    let mut cumulative = 0.0;
    for (i, m) in mags.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return i as f32 * bin_hz;
        }
    }
    (mags.len() - 1) as f32 * bin_hz
}

/// Tempo from the periodicity of the onset envelope.
///
/// The envelope is smoothed and centered, then autocorrelated over the lags
/// that correspond to 60..=200 BPM. The strongest lag is refined with a
/// parabola through its neighbours.
fn estimate_tempo(flux: &[f32], env_rate: f64) -> Option<f64> {
    let lag_min = (env_rate * 60.0 / MAX_BPM).ceil() as usize;
    let lag_max = (env_rate * 60.0 / MIN_BPM).floor() as usize;
    if lag_min < 1 || lag_max <= lag_min || flux.len() <= lag_max * 2 {
        return None;
    }

    let mut env: Vec<f64> = flux.iter().map(|&v| f64::from(v)).collect();
    smooth3(&mut env);
    let mean = env.iter().sum::<f64>() / env.len() as f64;
    env.iter_mut().for_each(|v| *v -= mean);

    let score = |lag: usize| -> f64 { env.iter().zip(&env[lag..]).map(|(a, b)| a * b).sum() };
    let scores: Vec<f64> = (lag_min..=lag_max).map(score).collect();

    let (best_idx, &best) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    if best <= 0.0 {
        return None;
    }

    let mut lag = (lag_min + best_idx) as f64;
    if best_idx > 0 && best_idx + 1 < scores.len() {
        let (left, right) = (scores[best_idx - 1], scores[best_idx + 1]);
        let denom = left - 2.0 * best + right;
        if denom.abs() > f64::EPSILON {
            lag += (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
        }
    }

    Some(60.0 * env_rate / lag)
}

fn smooth3(values: &mut [f64]) {
    if values.len() < 3 {
        return;
    }
    let source = values.to_vec();
    for i in 1..source.len() - 1 {
        values[i] = (source[i - 1] + source[i] + source[i + 1]) / 3.0;
    }
}

struct Stats {
    mean: f64,
    max: f64,
    std: f64,
}

impl Stats {
    fn of(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                max: 0.0,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / n;
        let max = values.iter().fold(f32::MIN, |acc, &v| acc.max(v));
        Self {
            mean,
            max: f64::from(max),
            std: variance.sqrt(),
        }
    }
}
