//! Analysis chain and the built-in waveform backend on generated audio.

mod common;

use std::sync::Arc;

use common::{sine, write_wav, StubBackend};
use pretty_assertions::assert_eq;
use serde_json::json;
use stagehand::analysis::{JsonCommandBackend, WaveformBackend};
use stagehand::{AnalysisBackend, AnalysisChain, AnalysisError, NO_BACKEND};

fn wav_in(dir: &tempfile::TempDir, name: &str, sample_rate: u32, samples: &[f32]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    write_wav(&path, sample_rate, samples);
    path
}

#[tokio::test]
async fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let stub = Arc::new(StubBackend::ok("stub"));
    let chain = AnalysisChain::new(vec![stub.clone()]);

    let err = chain.analyze(&dir.path().join("gone.wav")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::FileNotFound(_)));
    assert_eq!(stub.calls(), 0);

    // a directory is not an audio file either
    assert!(chain.analyze(dir.path()).await.is_err());
}

#[tokio::test]
async fn failing_and_missing_backends_are_left_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "a.wav", 8000, &sine(440.0, 8000, 0.2, 0.5));

    let missing = Arc::new(StubBackend::missing("aubio"));
    let broken = Arc::new(StubBackend::failing("sox"));
    let chain = AnalysisChain::new(vec![
        missing.clone(),
        broken.clone(),
        Arc::new(StubBackend::ok("custom")),
    ]);

    let report = chain.analyze(&path).await.unwrap();

    assert_eq!(
        report.to_value(),
        json!({ "file": path, "custom": { "call": 1 } })
    );
    assert_eq!(report.error, None);
    assert_eq!(missing.calls(), 0);
    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn backends_cannot_shadow_report_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "a.wav", 8000, &sine(440.0, 8000, 0.2, 0.5));

    let file = Arc::new(StubBackend::ok("file"));
    let error = Arc::new(StubBackend::ok("error"));
    let chain = AnalysisChain::new(vec![
        file.clone(),
        error.clone(),
        Arc::new(StubBackend::ok("custom")),
    ]);
    assert_eq!(chain.names(), vec!["custom"]);

    let report = chain.analyze(&path).await.unwrap();
    assert_eq!(report.to_value(), json!({ "file": path, "custom": { "call": 1 } }));
    assert_eq!(report.error, None);
    assert_eq!(file.calls() + error.calls(), 0);

    // with only reserved names nothing runs, and the error is the chain's own
    let chain = AnalysisChain::new(vec![Arc::new(StubBackend::ok("error"))]);
    let report = chain.analyze(&path).await.unwrap();
    assert_eq!(report.to_value(), json!({ "file": path, "error": NO_BACKEND }));
}

#[tokio::test]
async fn nothing_available_reports_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "a.wav", 8000, &sine(440.0, 8000, 0.2, 0.5));
    let chain = AnalysisChain::new(vec![
        Arc::new(StubBackend::missing("sox")),
        Arc::new(StubBackend::failing("aubio")),
    ]);

    let report = chain.analyze(&path).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(report.to_value(), json!({ "file": path, "error": NO_BACKEND }));
}

#[tokio::test]
async fn waveform_describes_a_sine() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "tone.wav", 44_100, &sine(440.0, 44_100, 1.0, 0.5));

    let value = WaveformBackend.analyze(&path).await.unwrap();

    assert_eq!(value["duration_secs"], 1.0);
    assert_eq!(value["sample_rate"], 44_100);
    assert_eq!(value["channels"], 1);

    let peak = value["peak"].as_f64().unwrap();
    assert!((peak - 0.5).abs() < 0.01, "peak {peak}");

    let rms = value["energy"]["mean"].as_f64().unwrap();
    assert!((rms - 0.3536).abs() < 0.01, "rms {rms}");

    let centroid = value["brightness"]["centroid_mean"].as_f64().unwrap();
    assert!((400.0..500.0).contains(&centroid), "centroid {centroid}");

    // two crossings per cycle
    let zcr = value["dynamics"]["zcr_mean"].as_f64().unwrap();
    assert!((zcr - 880.0 / 44_100.0).abs() < 0.002, "zcr {zcr}");
}

#[tokio::test]
async fn waveform_hears_a_click_track_tempo() {
    // 32768 Hz puts one beat at 120 BPM exactly 32 analysis hops apart
    let rate = 32_768u32;
    let beat = rate as usize / 2;
    let mut samples = vec![0.0f32; rate as usize * 8];
    for start in (0..samples.len()).step_by(beat) {
        for (i, s) in samples[start..].iter_mut().take(256).enumerate() {
            let decay = 1.0 - i as f32 / 256.0;
            *s = 0.8 * decay * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / rate as f32).sin();
        }
    }
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "clicks.wav", rate, &samples);

    let value = WaveformBackend.analyze(&path).await.unwrap();

    let tempo = value["tempo"].as_f64().unwrap();
    assert!((tempo - 120.0).abs() < 3.0, "tempo {tempo}");
}

#[tokio::test]
async fn silence_has_no_tempo() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "quiet.wav", 32_768, &vec![0.0; 32_768 * 4]);

    let value = WaveformBackend.analyze(&path).await.unwrap();

    assert_eq!(value["peak"], 0.0);
    assert!(value.get("tempo").is_none());
}

#[tokio::test]
async fn non_wav_input_fails_softly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.wav");
    std::fs::write(&path, "definitely not audio").unwrap();

    assert!(WaveformBackend.analyze(&path).await.is_err());

    let chain = AnalysisChain::new(vec![Arc::new(WaveformBackend)]);
    let report = chain.analyze(&path).await.unwrap();
    assert_eq!(report.error.as_deref(), Some(NO_BACKEND));
}

#[tokio::test]
async fn json_command_backend_reads_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "a.wav", 8000, &sine(440.0, 8000, 0.1, 0.5));

    let script = r#"printf '{"file_seen": "%s", "loudness": -14.2}' "$1""#;
    let backend = JsonCommandBackend::new(
        "loudness",
        vec!["/bin/sh".into(), "-c".into(), script.into(), "sh".into()],
    );
    assert!(backend.is_available());

    let value = backend.analyze(&path).await.unwrap();
    assert_eq!(
        value,
        json!({ "file_seen": path.to_string_lossy(), "loudness": -14.2 })
    );
}

#[tokio::test]
async fn json_command_backend_rejects_non_objects() {
    let dir = tempfile::tempdir().unwrap();
    let path = wav_in(&dir, "a.wav", 8000, &sine(440.0, 8000, 0.1, 0.5));

    for script in ["echo not json", "echo '[1, 2]'", "exit 2"] {
        let backend = JsonCommandBackend::new(
            "odd",
            vec!["/bin/sh".into(), "-c".into(), script.into(), "sh".into()],
        );
        assert!(backend.analyze(&path).await.is_err(), "{script}");
    }
}
