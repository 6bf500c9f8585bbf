use proptest::prelude::*;
use std::f32::consts::PI;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use voxbench::audio::{self, Waveform};
use voxbench::metrics::{load_results, save_results, EncoderLoader};
use voxbench::speaker::SpeakerEncoder;
use voxbench::{EvaluatorConfig, MetricsError, MetricsEvaluator, MetricsResult};

mockall::mock! {
    pub Encoder {}
    impl SpeakerEncoder for Encoder {
        fn sample_rate(&self) -> u32;
        fn embed_utterance(&self, samples: &[f32]) -> MetricsResult<Vec<f32>>;
    }
}

const SR: u32 = 16000;

fn tone(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (seconds * SR as f32) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

fn write_tone(path: &Path, freq: f32, seconds: f32) {
    audio::write_wav(path, &Waveform::new(tone(freq, seconds, 0.5), SR)).unwrap();
}

fn write_int16(path: &Path, samples: &[f32], rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for s in samples {
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn mock_loader(embedding: Vec<f32>) -> EncoderLoader {
    Box::new(move |rate| {
        let mut encoder = MockEncoder::new();
        encoder.expect_sample_rate().return_const(rate);
        let embedding = embedding.clone();
        encoder
            .expect_embed_utterance()
            .returning(move |_| Ok(embedding.clone()));
        let encoder: Arc<dyn SpeakerEncoder> = Arc::new(encoder);
        Ok(encoder)
    })
}

#[test]
fn test_close_tones_score_as_similar() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("a.wav");
    let synthetic = dir.path().join("b.wav");
    write_tone(&original, 440.0, 2.0);
    write_tone(&synthetic, 441.0, 2.0);

    let evaluator = MetricsEvaluator::default();
    let results = evaluator.comprehensive_evaluation(&original, &synthetic, false);

    let similarity = results.speaker_similarity.unwrap();
    assert!(similarity.is_finite());
    assert!((-1.0..=1.0 + 1e-6).contains(&similarity));
    assert!(results.mel_correlation.unwrap() > 0.9);
    assert!((results.duration_ratio.unwrap() - 1.0).abs() < 1e-9);

    let pitch = results.original_pitch.unwrap();
    assert!((pitch.mean_pitch - 440.0).abs() < 5.0, "got {}", pitch.mean_pitch);
    assert!(results.pitch_difference.unwrap() < 5.0);
}

#[test]
fn test_identical_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("same.wav");
    write_tone(&path, 220.0, 1.0);

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        mock_loader(vec![0.6, 0.8]),
    );
    let results = evaluator.comprehensive_evaluation(&path, &path, false);

    assert!((results.speaker_similarity.unwrap() - 1.0).abs() < 1e-6);
    assert!(results.mcd.unwrap().abs() < 1e-9);
    assert!(results.spectral_convergence.unwrap().abs() < 1e-9);
    assert_eq!(results.snr, Some(f64::INFINITY));
    assert!(results.mel_mse.unwrap().abs() < 1e-9);
    assert!((results.mel_correlation.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(results.duration_difference, Some(0.0));
    assert_eq!(results.duration_ratio, Some(1.0));
    assert_eq!(results.pitch_difference, Some(0.0));
    assert_eq!(results.original_pitch, results.synthetic_pitch);
}

#[test]
fn test_corrupt_synthetic_keeps_record_shape() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("ref.wav");
    let synthetic = dir.path().join("broken.wav");
    write_tone(&original, 300.0, 1.0);
    std::fs::write(&synthetic, b"not audio at all").unwrap();

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        mock_loader(vec![1.0, 0.0]),
    );
    let results = evaluator.comprehensive_evaluation(&original, &synthetic, true);

    assert!(results.speaker_similarity.is_none());
    assert!(results.mcd.is_none());
    assert!(results.snr.is_none());
    assert!(results.duration_ratio.is_none());
    assert!(results.synthetic_pitch.is_none());
    assert!(results.pitch_difference.is_none());
    assert!(results.original_pitch.is_some());
    assert!(results.original_energy.is_some());

    let json = serde_json::to_value(&results).unwrap();
    let object = json.as_object().unwrap();
    for key in [
        "speaker_similarity",
        "mcd",
        "spectral_convergence",
        "snr",
        "mel_mse",
        "mel_correlation",
        "original_duration",
        "synthetic_duration",
        "duration_difference",
        "duration_ratio",
        "original_pitch",
        "synthetic_pitch",
        "pitch_difference",
        "original_energy",
        "synthetic_energy",
    ] {
        assert!(object.contains_key(key), "missing {}", key);
    }
}

#[test]
fn test_zero_length_synthetic() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("ref.wav");
    let synthetic = dir.path().join("empty.wav");
    write_tone(&original, 300.0, 1.0);
    write_int16(&synthetic, &[], SR);

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        mock_loader(vec![1.0, 0.0]),
    );
    let results = evaluator.comprehensive_evaluation(&original, &synthetic, false);

    assert!(results.mcd.is_none());
    assert!(results.snr.is_none());
    assert_eq!(results.synthetic_duration, Some(0.0));
    assert!(results.synthetic_energy.is_none());
}

#[test]
fn test_resampled_input_matches_duration() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("ref.wav");
    let synthetic = dir.path().join("syn44.wav");
    write_tone(&original, 200.0, 1.0);
    let hi_rate: Vec<f32> = (0..44100)
        .map(|i| 0.5 * (2.0 * PI * 200.0 * i as f32 / 44100.0).sin())
        .collect();
    write_int16(&synthetic, &hi_rate, 44100);

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        mock_loader(vec![1.0, 0.0]),
    );
    let results = evaluator.comprehensive_evaluation(&original, &synthetic, false);

    assert!((results.synthetic_duration.unwrap() - 1.0).abs() < 1e-3);
    assert!(results.mel_correlation.unwrap() > 0.9);
}

#[test]
fn test_encoder_load_failure_nulls_similarity_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.wav");
    write_tone(&path, 330.0, 1.0);

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        Box::new(|_| Err(MetricsError::ModelLoad("weights missing".into()))),
    );
    let results = evaluator.comprehensive_evaluation(&path, &path, false);

    assert!(results.speaker_similarity.is_none());
    assert!(results.mcd.is_some());
    assert!(results.mel_correlation.is_some());
}

#[test]
fn test_saved_results_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.wav");
    write_tone(&path, 330.0, 1.0);

    let evaluator = MetricsEvaluator::with_encoder_loader(
        EvaluatorConfig::default(),
        mock_loader(vec![1.0, 1.0]),
    );
    let results = evaluator.comprehensive_evaluation(&path, &path, false);

    let out = dir.path().join("nested/results.json");
    save_results(&results, &out).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains("\"snr\": \"Infinity\""));
    assert_eq!(load_results(&out).unwrap(), results);
}

proptest! {
    #[test]
    fn prop_duration_ratio(a in 1usize..4000, b in 1usize..4000) {
        let evaluator = MetricsEvaluator::default();
        let original = Waveform::new(vec![0.1; a], SR);
        let synthetic = Waveform::new(vec![0.1; b], SR);
        let d = evaluator.duration_analysis(&original, &synthetic);
        prop_assert!((d.duration_ratio - b as f64 / a as f64).abs() < 1e-9);
        prop_assert!((d.duration_difference - (b as f64 - a as f64).abs() / SR as f64).abs() < 1e-9);
    }

    #[test]
    fn prop_truncate_pair_uses_shorter(
        a in prop::collection::vec(-1.0f32..1.0, 0..200),
        b in prop::collection::vec(-1.0f32..1.0, 0..200),
    ) {
        let (x, y) = audio::truncate_pair(&a, &b);
        prop_assert_eq!(x.len(), a.len().min(b.len()));
        prop_assert_eq!(y.len(), x.len());
        prop_assert_eq!(x, &a[..x.len()]);
    }

    #[test]
    fn prop_snr_formula(
        signal in prop::collection::vec(0.1f32..1.0, 1..300),
        noise in 0.001f32..0.1,
    ) {
        let evaluator = MetricsEvaluator::default();
        let synthetic: Vec<f32> = signal.iter().map(|s| s + noise).collect();
        let snr = evaluator
            .signal_to_noise_ratio(&Waveform::new(signal.clone(), SR), &Waveform::new(synthetic.clone(), SR))
            .unwrap();

        let power: f64 = synthetic.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / signal.len() as f64;
        let diff: f64 = signal
            .iter()
            .zip(&synthetic)
            .map(|(s, y)| (*s as f64 - *y as f64).powi(2))
            .sum::<f64>()
            / signal.len() as f64;
        let expected = 10.0 * (power / diff).log10();
        prop_assert!((snr - expected).abs() < 1e-6 * expected.abs().max(1.0));
    }
}
