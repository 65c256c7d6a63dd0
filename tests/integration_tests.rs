//! Integration tests for the musicroom separation pipeline
//!
//! These tests drive the public API end to end with WAV fixtures written by hound.

use musicroom::audio;
use musicroom::config::{
    default_models, load_models, ModelSpec, SecondPassSettings, SeparationSettings,
};
use musicroom::pipeline::{
    SeparationPipeline, SeparationRequest, SeparationWorker, Stage, WorkerEvent,
};
use musicroom::{SeparatedStems, SeparationError, StemKind, StereoBuffer};
use std::f32::consts::PI;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 44100;

/// Write stereo float samples to an in-memory WAV file
fn float_wav(left: &[f32], right: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("Failed to create WAV");
        for (l, r) in left.iter().zip(right.iter()) {
            writer.write_sample(*l).expect("Failed to write sample");
            writer.write_sample(*r).expect("Failed to write sample");
        }
        writer.finalize().expect("Failed to finalize WAV");
    }
    cursor.into_inner()
}

/// Write a mono 16-bit sine wave to an in-memory WAV file
fn pcm16_sine_wav(frequency_hz: f32, duration_secs: f32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("Failed to create WAV");
        let num_samples = (duration_secs * sample_rate as f32) as usize;
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * PI * frequency_hz * t).sin() * 0.5;
            writer
                .write_sample((sample * 32767.0) as i16)
                .expect("Failed to write sample");
        }
        writer.finalize().expect("Failed to finalize WAV");
    }
    cursor.into_inner()
}

/// Sum of sines, identical on both channels
fn tones(freqs: &[f32], amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            freqs
                .iter()
                .map(|f| amplitude * (2.0 * PI * f * t).sin())
                .sum()
        })
        .collect()
}

/// Amplitude of one frequency component (single-bin DFT)
fn tone_amplitude(samples: &[f32], frequency_hz: f32) -> f32 {
    let (mut re, mut im) = (0.0f64, 0.0f64);
    for (n, &x) in samples.iter().enumerate() {
        let phase = 2.0 * std::f64::consts::PI * frequency_hz as f64 * n as f64 / SAMPLE_RATE as f64;
        re += x as f64 * phase.cos();
        im -= x as f64 * phase.sin();
    }
    (2.0 * (re * re + im * im).sqrt() / samples.len() as f64) as f32
}

fn energy(buffer: &StereoBuffer) -> f64 {
    buffer
        .left
        .iter()
        .chain(buffer.right.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum()
}

fn decoded(stems: &SeparatedStems, kind: StemKind) -> StereoBuffer {
    let stem = stems.get(kind).expect("stem missing");
    audio::parse(&stem.wav_f32).expect("stem WAV should parse")
}

fn models_for(targets: &[StemKind]) -> Vec<ModelSpec> {
    default_models()
        .into_iter()
        .filter(|m| targets.contains(&m.target))
        .collect()
}

#[test]
fn test_two_tones_split_into_bass_and_vocal() {
    let len = SAMPLE_RATE as usize;
    let low = tones(&[220.0], 0.4, len);
    let high = tones(&[1000.0], 0.4, len);
    let mix: Vec<f32> = low.iter().zip(high.iter()).map(|(a, b)| a + b).collect();
    let wav = float_wav(&mix, &mix, SAMPLE_RATE);

    let pipeline = SeparationPipeline::new(
        SeparationSettings::default(),
        models_for(&[StemKind::Bass, StemKind::Vocal, StemKind::Others]),
        None,
    )
    .unwrap();
    let stems = pipeline.run(&wav, &mut |_| {}).unwrap();
    assert_eq!(stems.len(), 3);

    let bass = decoded(&stems, StemKind::Bass);
    let vocal = decoded(&stems, StemKind::Vocal);
    let others = decoded(&stems, StemKind::Others);

    let bass_low = tone_amplitude(&bass.left, 220.0);
    let bass_high = tone_amplitude(&bass.left, 1000.0);
    assert!(
        bass_low > 10.0 * bass_high,
        "bass: 220 Hz {:.4}, 1000 Hz {:.4}",
        bass_low,
        bass_high
    );

    let vocal_low = tone_amplitude(&vocal.left, 220.0);
    let vocal_high = tone_amplitude(&vocal.left, 1000.0);
    assert!(
        vocal_high > 10.0 * vocal_low,
        "vocal: 220 Hz {:.4}, 1000 Hz {:.4}",
        vocal_low,
        vocal_high
    );

    let mixture = StereoBuffer::new(mix.clone(), mix, SAMPLE_RATE);
    let share = energy(&others) / energy(&mixture);
    assert!(share < 0.05, "Others carries {:.2}% of the energy", share * 100.0);
}

#[test]
fn test_residual_completes_the_mixture() {
    let len = SAMPLE_RATE as usize / 2;
    let left = tones(&[110.0, 660.0, 2500.0, 7000.0], 0.2, len);
    let right: Vec<f32> = tones(&[330.0, 1500.0], 0.3, len)
        .iter()
        .enumerate()
        .map(|(i, s)| s + if i % 4410 < 40 { 0.3 } else { 0.0 })
        .collect();
    let wav = float_wav(&left, &right, SAMPLE_RATE);

    let pipeline =
        SeparationPipeline::new(SeparationSettings::default(), default_models(), None).unwrap();
    let stems = pipeline.run(&wav, &mut |_| {}).unwrap();
    assert_eq!(stems.len(), StemKind::ALL.len());

    let others = decoded(&stems, StemKind::Others);
    let rest: Vec<StereoBuffer> = StemKind::ALL
        .iter()
        .filter(|k| **k != StemKind::Others)
        .map(|k| decoded(&stems, *k))
        .collect();

    for i in 0..len {
        let sum_l: f32 = rest.iter().map(|b| b.left[i]).sum();
        let sum_r: f32 = rest.iter().map(|b| b.right[i]).sum();
        assert!((others.left[i] - (left[i] - sum_l)).abs() < 1e-5);
        assert!((others.right[i] - (right[i] - sum_r)).abs() < 1e-5);
    }
}

#[test]
fn test_silent_input_yields_silent_stems() {
    let silence = vec![0.0f32; 8192];
    let wav = float_wav(&silence, &silence, SAMPLE_RATE);

    let pipeline =
        SeparationPipeline::new(SeparationSettings::default(), default_models(), None).unwrap();
    let stems = pipeline.run(&wav, &mut |_| {}).unwrap();

    for (kind, stem) in &stems.stems {
        let buffer = audio::parse(&stem.wav_f32).unwrap();
        assert_eq!(buffer.len(), 8192, "{} length", kind);
        assert!(
            buffer.left.iter().chain(buffer.right.iter()).all(|s| s.is_finite() && s.abs() < 1e-6),
            "{} should be silent",
            kind
        );
        assert_eq!(stem.peak, 0.0);
    }
}

#[test]
fn test_pcm16_mono_input() {
    let wav = pcm16_sine_wav(440.0, 0.25, SAMPLE_RATE);
    let pipeline = SeparationPipeline::new(
        SeparationSettings::default(),
        models_for(&[StemKind::Vocal, StemKind::Bass]),
        None,
    )
    .unwrap();
    let stems = pipeline.run(&wav, &mut |_| {}).unwrap();

    let vocal = decoded(&stems, StemKind::Vocal);
    assert_eq!(vocal.len(), (0.25 * SAMPLE_RATE as f32) as usize);
    // Mono input is duplicated, so the stems stay centered
    for (l, r) in vocal.left.iter().zip(vocal.right.iter()) {
        assert!((l - r).abs() < 1e-6);
    }
    assert!((stems.get(StemKind::Vocal).unwrap().duration_seconds - 0.25).abs() < 1e-3);
}

#[test]
fn test_worker_progress_then_single_terminal_event() {
    let len = 8192;
    let mix = tones(&[220.0, 1000.0], 0.3, len);
    let wav = float_wav(&mix, &mix, SAMPLE_RATE);

    let worker = SeparationWorker::spawn(2, None).unwrap();
    let handle = worker
        .submit(
            99,
            SeparationRequest {
                wav,
                models: default_models(),
                settings: SeparationSettings::default(),
            },
        )
        .unwrap();

    let mut last_percent = 0.0f32;
    let mut last_stage = Stage::Parsing;
    let mut terminal = Vec::new();
    for message in handle.events().iter() {
        assert_eq!(message.id, 99);
        match message.event {
            WorkerEvent::Progress(p) => {
                assert!(terminal.is_empty(), "progress after terminal event");
                assert!(p.percent >= last_percent);
                assert!(p.stage >= last_stage);
                last_percent = p.percent;
                last_stage = p.stage;
            }
            event => {
                terminal.push(event);
                break;
            }
        }
    }

    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0], WorkerEvent::Done(_)));
    assert_eq!(last_stage, Stage::Done);
    assert_eq!(last_percent, 100.0);
}

#[test]
fn test_worker_reports_malformed_wav_as_error() {
    let worker = SeparationWorker::spawn(1, None).unwrap();
    let handle = worker
        .submit(
            3,
            SeparationRequest {
                wav: b"RIFF\x04\x00\x00\x00WAVEjunk".to_vec(),
                models: default_models(),
                settings: SeparationSettings::default(),
            },
        )
        .unwrap();

    let events: Vec<_> = handle.events().iter().collect();
    let terminal: Vec<_> = events.iter().filter(|m| m.event.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    match &terminal[0].event {
        WorkerEvent::Error(msg) => assert!(msg.contains("Invalid WAV")),
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn test_models_json_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("models.json");
    fs::write(
        &path,
        r#"{
            "models": [
                { "name": "bass", "path": "builtin://bass", "target": "Bass",
                  "n_fft": 1024, "hop_length": 256, "window": "hann", "inputLayout": "NCHW" },
                { "name": "drums", "path": "builtin://drums", "target": "Drums",
                  "n_fft": 1024, "hop_length": 256, "window": "hann", "inputLayout": "NCHW" }
            ],
            "separation": { "wiener_iterations": 2, "residual_target": "Guitar" }
        }"#,
    )
    .unwrap();

    let config = load_models(&path).unwrap();
    let settings = config.separation.unwrap();
    assert_eq!(settings.residual_target, StemKind::Guitar);

    let mix = tones(&[80.0, 3000.0], 0.3, 6000);
    let wav = float_wav(&mix, &mix, SAMPLE_RATE);
    let mut stages = Vec::new();
    let stems = SeparationPipeline::new(settings, config.models, None)
        .unwrap()
        .run(&wav, &mut |p| stages.push(p.stage))
        .unwrap();

    let kinds: Vec<StemKind> = stems.stems.keys().copied().collect();
    assert_eq!(kinds, vec![StemKind::Bass, StemKind::Drums, StemKind::Guitar]);
    assert_eq!(stages.iter().filter(|s| **s == Stage::Refining).count(), 2);
}

#[test]
fn test_non_power_of_two_fft_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("models.json");
    fs::write(
        &path,
        r#"{ "models": [ { "name": "v", "path": "builtin://v", "target": "Vocal",
             "n_fft": 3000, "hop_length": 750 } ] }"#,
    )
    .unwrap();

    let config = load_models(&path).unwrap();
    let result = SeparationPipeline::new(SeparationSettings::default(), config.models, None);
    assert!(matches!(result, Err(SeparationError::Config { .. })));
}

#[test]
fn test_learned_model_requires_adapter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("models.json");
    fs::write(
        &path,
        r#"{ "models": [ { "name": "mdx", "path": "weights/mdx.onnx", "target": "Vocal",
             "n_fft": 4096, "hop_length": 1024, "inputLayout": "NFCT", "magOnly": true } ] }"#,
    )
    .unwrap();

    let config = load_models(&path).unwrap();
    assert!(!config.models[0].source.is_builtin());
    let result = SeparationPipeline::new(SeparationSettings::default(), config.models, None);
    assert!(matches!(result, Err(SeparationError::Config { .. })));
}

#[test]
fn test_second_pass_keeps_mixture_consistency() {
    let len = 12000;
    let left = tones(&[150.0, 900.0], 0.3, len);
    let right = tones(&[250.0, 4000.0], 0.3, len);
    let wav = float_wav(&left, &right, SAMPLE_RATE);

    let settings = SeparationSettings {
        second_pass: Some(SecondPassSettings {
            fft_size: 1024,
            hop_size: 256,
            ..Default::default()
        }),
        ..Default::default()
    };
    let models: Vec<ModelSpec> = models_for(&[StemKind::Bass, StemKind::Vocal, StemKind::Piano])
        .into_iter()
        .map(|m| m.with_resolution(1024, 256))
        .collect();

    let mut second_pass_reports = 0;
    let stems = SeparationPipeline::new(settings, models, None)
        .unwrap()
        .run(&wav, &mut |p| {
            if p.stage == Stage::SecondPass {
                second_pass_reports += 1;
            }
        })
        .unwrap();
    assert_eq!(second_pass_reports, 3);

    let buffers: Vec<StereoBuffer> = stems.stems.keys().map(|k| decoded(&stems, *k)).collect();
    for i in (0..len).step_by(7) {
        let sum_l: f32 = buffers.iter().map(|b| b.left[i]).sum();
        let sum_r: f32 = buffers.iter().map(|b| b.right[i]).sum();
        assert!((sum_l - left[i]).abs() < 1e-5);
        assert!((sum_r - right[i]).abs() < 1e-5);
    }
}

#[test]
fn test_int16_render_matches_float_render() {
    let mix = tones(&[500.0], 0.5, 4096);
    let wav = float_wav(&mix, &mix, SAMPLE_RATE);
    let stems = SeparationPipeline::new(
        SeparationSettings::default(),
        models_for(&[StemKind::Vocal]),
        None,
    )
    .unwrap()
    .run(&wav, &mut |_| {})
    .unwrap();

    let stem = stems.get(StemKind::Vocal).unwrap();
    assert_eq!(&stem.wav_i16[..4], b"RIFF");
    let float = audio::parse(&stem.wav_f32).unwrap();
    let int = audio::parse(&stem.wav_i16).unwrap();
    for (a, b) in float.left.iter().zip(int.left.iter()) {
        assert!((a.clamp(-1.0, 1.0) - b).abs() <= 2.0 / 32768.0);
    }
}
