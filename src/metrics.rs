//! Objective metrics comparing a synthetic recording with its reference.
//!
//! [`MetricsEvaluator::comprehensive_evaluation`] decodes both files once and
//! runs every metric on the shared buffers. Each metric is isolated: a failure
//! is logged and stored as `null` for that key only, so callers always get the
//! full record shape back.

use crate::audio::{self, truncate_pair, Waveform};
use crate::config_loader::Settings;
use crate::dsp::{self, DbRef};
use crate::error::{MetricsError, MetricsResult};
use crate::pitch::{self, YinTracker};
use crate::speaker::{self, SpeakerEncoder, SpectralVoiceEncoder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Analysis parameters for the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub pitch_fmin: f64,
    pub pitch_fmax: f64,
    pub pitch_threshold: f64,
    /// ONNX speaker encoder; `None` uses [`SpectralVoiceEncoder`]
    pub speaker_model_path: Option<PathBuf>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl EvaluatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            n_fft: settings.n_fft,
            hop_length: settings.hop_length,
            n_mels: settings.n_mels,
            n_mfcc: settings.n_mfcc,
            pitch_fmin: settings.pitch_fmin,
            pitch_fmax: settings.pitch_fmax,
            pitch_threshold: settings.pitch_threshold,
            speaker_model_path: Some(settings.speaker_model_path.trim())
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Reject parameter combinations the analysis cannot run with.
    pub fn validate(&self) -> MetricsResult<()> {
        let fail = |msg: String| Err(MetricsError::Config(msg));

        if self.sample_rate == 0 {
            return fail("sample_rate must be greater than 0".to_string());
        }
        if self.n_fft == 0 || self.hop_length == 0 {
            return fail("n_fft and hop_length must be greater than 0".to_string());
        }
        if self.hop_length > self.n_fft {
            return fail(format!(
                "hop_length ({}) must not exceed n_fft ({})",
                self.hop_length, self.n_fft
            ));
        }
        if self.n_mels == 0 {
            return fail("n_mels must be greater than 0".to_string());
        }
        if self.n_mfcc < 2 || self.n_mfcc > self.n_mels {
            return fail(format!(
                "Invalid n_mfcc: {}. Must be between 2 and n_mels ({})",
                self.n_mfcc, self.n_mels
            ));
        }
        if self.pitch_fmin <= 0.0 || self.pitch_fmax <= self.pitch_fmin {
            return fail(format!(
                "Invalid pitch range: {}..{} Hz",
                self.pitch_fmin, self.pitch_fmax
            ));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if self.pitch_fmax >= nyquist {
            return fail(format!(
                "pitch_fmax ({} Hz) must be below Nyquist ({} Hz) at {} Hz",
                self.pitch_fmax, nyquist, self.sample_rate
            ));
        }
        if self.pitch_threshold <= 0.0 || self.pitch_threshold >= 1.0 {
            return fail(format!(
                "Invalid pitch_threshold: {}. Must be between 0.0 and 1.0",
                self.pitch_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchStats {
    pub mean_pitch: f64,
    pub std_pitch: f64,
    pub min_pitch: f64,
    pub max_pitch: f64,
    pub pitch_range: f64,
}

impl PitchStats {
    fn zero() -> Self {
        Self {
            mean_pitch: 0.0,
            std_pitch: 0.0,
            min_pitch: 0.0,
            max_pitch: 0.0,
            pitch_range: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyStats {
    pub mean_energy: f64,
    pub std_energy: f64,
    pub max_energy: f64,
    pub mean_zcr: f64,
    pub std_zcr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSimilarity {
    pub mel_mse: f64,
    pub mel_correlation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationAnalysis {
    pub original_duration: f64,
    pub synthetic_duration: f64,
    pub duration_difference: f64,
    pub duration_ratio: f64,
}

/// Flat evaluation record. Every key is always serialized; failed metrics are
/// `null`. Non-finite values travel as `"Infinity"`, `"-Infinity"` or `"NaN"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub original_audio: String,
    pub synthetic_audio: String,
    #[serde(with = "nonfinite")]
    pub speaker_similarity: Option<f64>,
    #[serde(with = "nonfinite")]
    pub mcd: Option<f64>,
    #[serde(with = "nonfinite")]
    pub spectral_convergence: Option<f64>,
    #[serde(with = "nonfinite")]
    pub snr: Option<f64>,
    #[serde(with = "nonfinite")]
    pub mel_mse: Option<f64>,
    #[serde(with = "nonfinite")]
    pub mel_correlation: Option<f64>,
    #[serde(with = "nonfinite")]
    pub original_duration: Option<f64>,
    #[serde(with = "nonfinite")]
    pub synthetic_duration: Option<f64>,
    #[serde(with = "nonfinite")]
    pub duration_difference: Option<f64>,
    #[serde(with = "nonfinite")]
    pub duration_ratio: Option<f64>,
    pub original_pitch: Option<PitchStats>,
    pub synthetic_pitch: Option<PitchStats>,
    #[serde(with = "nonfinite")]
    pub pitch_difference: Option<f64>,
    pub original_energy: Option<EnergyStats>,
    pub synthetic_energy: Option<EnergyStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl MetricResult {
    fn empty(original: &Path, synthetic: &Path) -> Self {
        Self {
            original_audio: original.display().to_string(),
            synthetic_audio: synthetic.display().to_string(),
            speaker_similarity: None,
            mcd: None,
            spectral_convergence: None,
            snr: None,
            mel_mse: None,
            mel_correlation: None,
            original_duration: None,
            synthetic_duration: None,
            duration_difference: None,
            duration_ratio: None,
            original_pitch: None,
            synthetic_pitch: None,
            pitch_difference: None,
            original_energy: None,
            synthetic_energy: None,
            model_name: None,
        }
    }
}

/// JSON has no literal for infinities, so they travel as strings.
mod nonfinite {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_none(),
            Some(v) if v.is_nan() => serializer.serialize_some("NaN"),
            Some(v) if v.is_infinite() && *v > 0.0 => serializer.serialize_some("Infinity"),
            Some(v) if v.is_infinite() => serializer.serialize_some("-Infinity"),
            Some(v) => serializer.serialize_some(v),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(s)) => match s.as_str() {
                "Infinity" | "inf" => Ok(Some(f64::INFINITY)),
                "-Infinity" | "-inf" => Ok(Some(f64::NEG_INFINITY)),
                "NaN" | "nan" => Ok(Some(f64::NAN)),
                other => Err(serde::de::Error::custom(format!("invalid float: {}", other))),
            },
        }
    }
}

/// Builds the speaker encoder on first use.
pub type EncoderLoader = Box<dyn Fn(u32) -> MetricsResult<Arc<dyn SpeakerEncoder>> + Send + Sync>;

/// Pretrained ONNX encoder when `model_path` is set, spectral fallback otherwise.
pub fn default_encoder_loader(model_path: Option<PathBuf>) -> EncoderLoader {
    Box::new(move |sample_rate| match &model_path {
        Some(path) => load_onnx_encoder(path),
        None => {
            info!("No speaker model configured, using the uncalibrated spectral encoder");
            let encoder: Arc<dyn SpeakerEncoder> = Arc::new(SpectralVoiceEncoder::new(sample_rate)?);
            Ok(encoder)
        }
    })
}

#[cfg(feature = "onnx")]
fn load_onnx_encoder(path: &Path) -> MetricsResult<Arc<dyn SpeakerEncoder>> {
    let encoder: Arc<dyn SpeakerEncoder> = Arc::new(speaker::onnx::OnnxSpeakerEncoder::load(path)?);
    Ok(encoder)
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_encoder(path: &Path) -> MetricsResult<Arc<dyn SpeakerEncoder>> {
    Err(MetricsError::ModelLoad(format!(
        "cannot load {}: voxbench was built without the `onnx` feature",
        path.display()
    )))
}

pub struct MetricsEvaluator {
    config: EvaluatorConfig,
    loader: EncoderLoader,
    encoder: OnceLock<Arc<dyn SpeakerEncoder>>,
}

impl Default for MetricsEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}

impl MetricsEvaluator {
    /// Evaluator using the configured ONNX speaker model, or the spectral
    /// fallback when none is set.
    pub fn new(config: EvaluatorConfig) -> Self {
        let loader = default_encoder_loader(config.speaker_model_path.clone());
        Self::with_encoder_loader(config, loader)
    }

    pub fn with_encoder_loader(config: EvaluatorConfig, loader: EncoderLoader) -> Self {
        Self {
            config,
            loader,
            encoder: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Get or initialize the speaker encoder (lazy-loaded, kept for the
    /// evaluator's lifetime)
    fn encoder(&self) -> MetricsResult<Arc<dyn SpeakerEncoder>> {
        if let Some(encoder) = self.encoder.get() {
            return Ok(encoder.clone());
        }

        debug!("Loading speaker encoder ({} Hz)", self.config.sample_rate);
        let encoder = (self.loader)(self.config.sample_rate)?;
        if encoder.sample_rate() != self.config.sample_rate {
            return Err(MetricsError::ModelLoad(format!(
                "encoder expects {} Hz, evaluator decodes at {} Hz",
                encoder.sample_rate(),
                self.config.sample_rate
            )));
        }
        let _ = self.encoder.set(encoder.clone());
        Ok(encoder)
    }

    pub fn decode(&self, path: &Path) -> MetricsResult<Waveform> {
        audio::decode(path, self.config.sample_rate)
    }

    pub fn speaker_similarity(&self, original: &Waveform, synthetic: &Waveform) -> MetricsResult<f64> {
        let encoder = self.encoder()?;

        let original = speaker::preprocess_wav(&original.samples, original.sample_rate);
        let synthetic = speaker::preprocess_wav(&synthetic.samples, synthetic.sample_rate);

        let original_embed = encoder.embed_utterance(&original)?;
        let synthetic_embed = encoder.embed_utterance(&synthetic)?;

        speaker::cosine_similarity(&original_embed, &synthetic_embed)
    }

    /// Mean mel-cepstral distortion in dB over frame-aligned MFCCs, c0 excluded.
    pub fn mel_cepstral_distortion(&self, original: &Waveform, synthetic: &Waveform) -> MetricsResult<f64> {
        require_samples(original, "original")?;
        require_samples(synthetic, "synthetic")?;

        let c = &self.config;
        let mfcc_ref = dsp::mfcc(&original.samples, c.sample_rate, c.n_fft, c.hop_length, c.n_mels, c.n_mfcc);
        let mfcc_syn = dsp::mfcc(&synthetic.samples, c.sample_rate, c.n_fft, c.hop_length, c.n_mels, c.n_mfcc);

        let n_frames = mfcc_ref.len().min(mfcc_syn.len());
        if n_frames == 0 {
            return Err(MetricsError::computation("no cepstral frames to compare"));
        }

        let scale = 10.0 / std::f64::consts::LN_10;
        let per_frame: Vec<f64> = mfcc_ref[..n_frames]
            .iter()
            .zip(&mfcc_syn[..n_frames])
            .map(|(r, s)| {
                let sq: f64 = r[1..].iter().zip(&s[1..]).map(|(a, b)| (a - b).powi(2)).sum();
                scale * (2.0 * sq).sqrt()
            })
            .collect();

        Ok(dsp::mean(&per_frame))
    }

    /// `||S_ref - S_syn||_F / ||S_ref||_F` on magnitude STFTs.
    pub fn spectral_convergence(&self, original: &Waveform, synthetic: &Waveform) -> MetricsResult<f64> {
        let (a, b) = truncate_pair(&original.samples, &synthetic.samples);
        if a.is_empty() {
            return Err(MetricsError::computation("no overlapping samples"));
        }

        let c = &self.config;
        let spec_ref = dsp::stft_magnitude(a, c.n_fft, c.hop_length);
        let spec_syn = dsp::stft_magnitude(b, c.n_fft, c.hop_length);

        let mut diff_sq = 0.0;
        let mut ref_sq = 0.0;
        for (r, s) in spec_ref.iter().flatten().zip(spec_syn.iter().flatten()) {
            diff_sq += (r - s).powi(2);
            ref_sq += r * r;
        }
        if ref_sq <= 0.0 {
            return Err(MetricsError::computation("reference spectrogram is silent"));
        }
        Ok(diff_sq.sqrt() / ref_sq.sqrt())
    }

    /// Synthetic power over sample-wise difference power, in dB.
    ///
    /// Any misalignment between the recordings counts as noise.
    pub fn signal_to_noise_ratio(&self, original: &Waveform, synthetic: &Waveform) -> MetricsResult<f64> {
        let (a, b) = truncate_pair(&original.samples, &synthetic.samples);
        if a.is_empty() {
            return Err(MetricsError::computation("no overlapping samples"));
        }

        let n = a.len() as f64;
        let signal = b.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / n;
        let noise = a
            .iter()
            .zip(b)
            .map(|(&r, &s)| (r as f64 - s as f64).powi(2))
            .sum::<f64>()
            / n;

        if noise == 0.0 {
            return Ok(f64::INFINITY);
        }
        Ok(10.0 * (signal / noise).log10())
    }

    /// MSE and Pearson correlation between peak-referenced log-mel spectrograms.
    pub fn spectral_similarity(&self, original: &Waveform, synthetic: &Waveform) -> MetricsResult<SpectralSimilarity> {
        require_samples(original, "original")?;
        require_samples(synthetic, "synthetic")?;

        let c = &self.config;
        let mel = |w: &Waveform| {
            let spec = dsp::mel_spectrogram(&w.samples, c.sample_rate, c.n_fft, c.hop_length, c.n_mels);
            dsp::power_to_db(&spec, DbRef::Max)
        };
        let mel_ref = mel(original);
        let mel_syn = mel(synthetic);

        let n_frames = mel_ref.len().min(mel_syn.len());
        let flat_ref: Vec<f64> = mel_ref[..n_frames].iter().flatten().copied().collect();
        let flat_syn: Vec<f64> = mel_syn[..n_frames].iter().flatten().copied().collect();
        if flat_ref.is_empty() {
            return Err(MetricsError::computation("no mel frames to compare"));
        }

        let mel_mse = flat_ref
            .iter()
            .zip(&flat_syn)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            / flat_ref.len() as f64;
        let mel_correlation = dsp::pearson(&flat_ref, &flat_syn)
            .ok_or_else(|| MetricsError::computation("mel spectrogram has zero variance"))?;

        Ok(SpectralSimilarity {
            mel_mse,
            mel_correlation,
        })
    }

    pub fn duration_analysis(&self, original: &Waveform, synthetic: &Waveform) -> DurationAnalysis {
        let original_duration = original.duration();
        let synthetic_duration = synthetic.duration();
        DurationAnalysis {
            original_duration,
            synthetic_duration,
            duration_difference: (original_duration - synthetic_duration).abs(),
            duration_ratio: if original_duration > 0.0 {
                synthetic_duration / original_duration
            } else {
                0.0
            },
        }
    }

    /// F0 statistics over voiced frames. All zeros when nothing is voiced.
    pub fn pitch_metrics(&self, wav: &Waveform) -> PitchStats {
        let c = &self.config;
        let tracker = YinTracker::new(c.sample_rate, c.pitch_fmin, c.pitch_fmax, c.pitch_threshold);
        let voiced = pitch::voiced(&tracker.track(&wav.samples));
        if voiced.is_empty() {
            return PitchStats::zero();
        }

        let min_pitch = voiced.iter().copied().fold(f64::INFINITY, f64::min);
        let max_pitch = voiced.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        PitchStats {
            mean_pitch: dsp::mean(&voiced),
            std_pitch: dsp::std_dev(&voiced),
            min_pitch,
            max_pitch,
            pitch_range: max_pitch - min_pitch,
        }
    }

    /// Frame RMS energy and zero-crossing rate statistics.
    pub fn energy_metrics(&self, wav: &Waveform) -> MetricsResult<EnergyStats> {
        require_samples(wav, "input")?;

        let rms = dsp::rms(&wav.samples, pitch::FRAME_LENGTH, pitch::HOP_LENGTH);
        let zcr = dsp::zero_crossing_rate(&wav.samples, pitch::FRAME_LENGTH, pitch::HOP_LENGTH);

        Ok(EnergyStats {
            mean_energy: dsp::mean(&rms),
            std_energy: dsp::std_dev(&rms),
            max_energy: rms.iter().copied().fold(0.0, f64::max),
            mean_zcr: dsp::mean(&zcr),
            std_zcr: dsp::std_dev(&zcr),
        })
    }

    /// Run every metric on one (reference, synthetic) pair.
    ///
    /// Never fails: decode and metric errors are logged and leave the
    /// affected keys `null`.
    pub fn comprehensive_evaluation(&self, original_path: &Path, synthetic_path: &Path, verbose: bool) -> MetricResult {
        let mut results = MetricResult::empty(original_path, synthetic_path);

        if verbose {
            println!("\n{}", "=".repeat(60));
            println!("TTS EVALUATION");
            println!("{}", "=".repeat(60));
            println!("Original audio:  {}", original_path.display());
            println!("Synthetic audio: {}\n", synthetic_path.display());
        }

        let original = isolate("decode original", || self.decode(original_path));
        let synthetic = isolate("decode synthetic", || self.decode(synthetic_path));

        if let (Some(orig), Some(syn)) = (&original, &synthetic) {
            results.speaker_similarity = isolate("speaker_similarity", || self.speaker_similarity(orig, syn));
            results.mcd = isolate("mcd", || self.mel_cepstral_distortion(orig, syn));
            results.spectral_convergence =
                isolate("spectral_convergence", || self.spectral_convergence(orig, syn));
            results.snr = isolate("snr", || self.signal_to_noise_ratio(orig, syn));

            if let Some(sim) = isolate("spectral_similarity", || self.spectral_similarity(orig, syn)) {
                results.mel_mse = Some(sim.mel_mse);
                results.mel_correlation = Some(sim.mel_correlation);
            }

            let durations = self.duration_analysis(orig, syn);
            results.original_duration = Some(durations.original_duration);
            results.synthetic_duration = Some(durations.synthetic_duration);
            results.duration_difference = Some(durations.duration_difference);
            results.duration_ratio = Some(durations.duration_ratio);
        }

        results.original_pitch = original.as_ref().map(|w| self.pitch_metrics(w));
        results.synthetic_pitch = synthetic.as_ref().map(|w| self.pitch_metrics(w));
        if let (Some(a), Some(b)) = (&results.original_pitch, &results.synthetic_pitch) {
            results.pitch_difference = Some((a.mean_pitch - b.mean_pitch).abs());
        }

        results.original_energy = original
            .as_ref()
            .and_then(|w| isolate("original_energy", || self.energy_metrics(w)));
        results.synthetic_energy = synthetic
            .as_ref()
            .and_then(|w| isolate("synthetic_energy", || self.energy_metrics(w)));

        if verbose {
            let target = self.encoder.get().and_then(|e| e.calibrated_threshold());
            print_summary(&results, target);
        }

        results
    }
}

/// Run one metric, turning a failure into `None`.
fn isolate<T>(name: &str, metric: impl FnOnce() -> MetricsResult<T>) -> Option<T> {
    match metric() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed: {}", name, e);
            None
        }
    }
}

fn require_samples(wav: &Waveform, which: &str) -> MetricsResult<()> {
    if wav.is_empty() {
        return Err(MetricsError::computation(format!("{} signal is empty", which)));
    }
    Ok(())
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".to_string())
}

fn print_summary(results: &MetricResult, similarity_target: Option<f64>) {
    println!("{}", "=".repeat(60));
    println!("SUMMARY");
    println!("{}", "=".repeat(60));
    let similarity_note = match similarity_target {
        Some(target) => format!("target: >{}", target),
        None => "spectral fallback, uncalibrated".to_string(),
    };
    println!(
        "Speaker Similarity:   {} ({})",
        fmt_metric(results.speaker_similarity),
        similarity_note
    );
    println!("MCD:                  {} dB (lower is better)", fmt_metric(results.mcd));
    println!("Spectral Convergence: {} (lower is better)", fmt_metric(results.spectral_convergence));
    println!("SNR:                  {} dB", fmt_metric(results.snr));
    println!("Mel Correlation:      {}", fmt_metric(results.mel_correlation));
    println!("Mel MSE:              {}", fmt_metric(results.mel_mse));
    println!("Duration Ratio:       {} (ideal: 1.0)", fmt_metric(results.duration_ratio));
    println!("Pitch Difference:     {} Hz", fmt_metric(results.pitch_difference));
    println!("{}\n", "=".repeat(60));
}

/// Write any serializable value as indented JSON, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(value: &T, output_path: &Path) -> MetricsResult<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(output_path, content)?;
    Ok(())
}

pub fn save_results(results: &MetricResult, output_path: &Path) -> MetricsResult<()> {
    save_json(results, output_path)?;
    debug!("Results saved to {}", output_path.display());
    Ok(())
}

pub fn load_results(path: &Path) -> MetricsResult<MetricResult> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::MockSpeakerEncoder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn sine(freq: f32, secs: f32) -> Waveform {
        let samples = (0..(16000.0 * secs) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect();
        Waveform::new(samples, 16000)
    }

    fn mock_loader(calls: Arc<AtomicUsize>) -> EncoderLoader {
        Box::new(move |sr| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut mock = MockSpeakerEncoder::new();
            mock.expect_sample_rate().return_const(sr);
            mock.expect_embed_utterance().returning(|_| Ok(vec![1.0, 0.5]));
            let encoder: Arc<dyn SpeakerEncoder> = Arc::new(mock);
            Ok(encoder)
        })
    }

    #[test]
    fn test_identical_signals() {
        let evaluator = MetricsEvaluator::default();
        let wav = sine(440.0, 1.0);

        assert!(evaluator.mel_cepstral_distortion(&wav, &wav).unwrap().abs() < 1e-9);
        assert!(evaluator.spectral_convergence(&wav, &wav).unwrap().abs() < 1e-12);
        assert_eq!(evaluator.signal_to_noise_ratio(&wav, &wav).unwrap(), f64::INFINITY);
        let sim = evaluator.spectral_similarity(&wav, &wav).unwrap();
        assert!((sim.mel_correlation - 1.0).abs() < 1e-9);
        assert!(sim.mel_mse.abs() < 1e-12);
        assert!((evaluator.speaker_similarity(&wav, &wav).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_snr_formula() {
        let evaluator = MetricsEvaluator::default();
        let original = Waveform::new(vec![1.0, 1.0, 1.0, 1.0], 16000);
        let synthetic = Waveform::new(vec![2.0, 2.0, 2.0, 2.0, 9.0], 16000);
        // signal = 4, noise = 1
        let snr = evaluator.signal_to_noise_ratio(&original, &synthetic).unwrap();
        assert!((snr - 10.0 * 4f64.log10()).abs() < 1e-12);
    }

    #[test]
    fn test_snr_empty_fails() {
        let evaluator = MetricsEvaluator::default();
        let empty = Waveform::new(Vec::new(), 16000);
        assert!(evaluator.signal_to_noise_ratio(&empty, &sine(440.0, 0.1)).is_err());
    }

    #[test]
    fn test_duration_ratio() {
        let evaluator = MetricsEvaluator::default();
        let d = evaluator.duration_analysis(&sine(440.0, 1.0), &sine(440.0, 2.0));
        assert!((d.duration_ratio - 2.0).abs() < 1e-12);
        assert!((d.duration_difference - 1.0).abs() < 1e-12);

        let empty = Waveform::new(Vec::new(), 16000);
        assert_eq!(evaluator.duration_analysis(&empty, &sine(440.0, 1.0)).duration_ratio, 0.0);
    }

    #[test]
    fn test_pitch_of_silence_is_zero() {
        let evaluator = MetricsEvaluator::default();
        let stats = evaluator.pitch_metrics(&Waveform::new(vec![0.0; 32000], 16000));
        assert_eq!(stats, PitchStats::zero());
    }

    #[test]
    fn test_pitch_of_tone() {
        let evaluator = MetricsEvaluator::default();
        let stats = evaluator.pitch_metrics(&sine(220.0, 1.0));
        assert!((stats.mean_pitch - 220.0).abs() < 3.0, "mean {}", stats.mean_pitch);
        assert!(stats.pitch_range >= 0.0);
    }

    #[test]
    fn test_energy_metrics() {
        let evaluator = MetricsEvaluator::default();
        let stats = evaluator.energy_metrics(&sine(440.0, 1.0)).unwrap();
        assert!(stats.max_energy > 0.3 && stats.max_energy < 0.4);
        assert!(stats.mean_zcr > 0.0);
        assert!(evaluator.energy_metrics(&Waveform::new(Vec::new(), 16000)).is_err());
    }

    #[test]
    fn test_silent_reference_spectral_convergence_fails() {
        let evaluator = MetricsEvaluator::default();
        let silent = Waveform::new(vec![0.0; 16000], 16000);
        assert!(evaluator.spectral_convergence(&silent, &sine(440.0, 1.0)).is_err());
    }

    #[test]
    fn test_encoder_loaded_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let evaluator = MetricsEvaluator::with_encoder_loader(EvaluatorConfig::default(), mock_loader(calls.clone()));
        let wav = sine(300.0, 1.0);

        for _ in 0..3 {
            let sim = evaluator.speaker_similarity(&wav, &wav).unwrap();
            assert!((sim - 1.0).abs() < 1e-9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encoder_rate_mismatch_is_model_error() {
        let evaluator = MetricsEvaluator::with_encoder_loader(
            EvaluatorConfig::default(),
            Box::new(|_| {
                let mut mock = MockSpeakerEncoder::new();
                mock.expect_sample_rate().return_const(22050u32);
                let encoder: Arc<dyn SpeakerEncoder> = Arc::new(mock);
                Ok(encoder)
            }),
        );
        let wav = sine(300.0, 1.0);
        assert!(matches!(
            evaluator.speaker_similarity(&wav, &wav),
            Err(MetricsError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_failed_encoder_only_nulls_similarity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        audio::write_wav(&path, &sine(440.0, 1.0)).unwrap();

        let evaluator = MetricsEvaluator::with_encoder_loader(
            EvaluatorConfig::default(),
            Box::new(|_| Err(MetricsError::ModelLoad("weights missing".into()))),
        );
        let results = evaluator.comprehensive_evaluation(&path, &path, false);

        assert!(results.speaker_similarity.is_none());
        assert_eq!(results.snr, Some(f64::INFINITY));
        assert!(results.mcd.is_some());
        assert_eq!(results.duration_ratio, Some(1.0));
    }

    #[test]
    fn test_result_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        audio::write_wav(&path, &sine(440.0, 1.0)).unwrap();

        let evaluator = MetricsEvaluator::default();
        let mut results = evaluator.comprehensive_evaluation(&path, &path, false);
        results.model_name = Some("xtts".to_string());

        let out = dir.path().join("nested/dir/xtts_metrics.json");
        save_results(&results, &out).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("\"snr\": \"Infinity\""));

        assert_eq!(load_results(&out).unwrap(), results);
    }

    #[test]
    fn test_all_keys_serialized_when_null() {
        let results = MetricResult::empty(Path::new("a.wav"), Path::new("b.wav"));
        let value = serde_json::to_value(&results).unwrap();
        let obj = value.as_object().unwrap();
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
            assert!(obj[key].is_null(), "{} should be null", key);
        }
        assert!(!obj.contains_key("model_name"));
    }

    #[test]
    fn test_non_finite_metrics_survive_reload() {
        let dir = tempdir().unwrap();
        let mut results = MetricResult::empty(Path::new("a.wav"), Path::new("b.wav"));
        results.speaker_similarity = Some(f64::NAN);
        results.mcd = Some(f64::INFINITY);
        results.mel_mse = Some(f64::NEG_INFINITY);
        results.duration_ratio = Some(0.5);

        let out = dir.path().join("non_finite.json");
        save_results(&results, &out).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("\"speaker_similarity\": \"NaN\""));
        assert!(text.contains("\"mel_mse\": \"-Infinity\""));

        let loaded = load_results(&out).unwrap();
        assert!(loaded.speaker_similarity.unwrap().is_nan());
        assert_eq!(loaded.mcd, Some(f64::INFINITY));
        assert_eq!(loaded.mel_mse, Some(f64::NEG_INFINITY));
        assert_eq!(loaded.duration_ratio, Some(0.5));
        assert_eq!(loaded.snr, None);
    }

    #[test]
    fn test_config_validation() {
        assert!(EvaluatorConfig::default().validate().is_ok());

        // C7 is above Nyquist at 4 kHz
        let low_rate = EvaluatorConfig::default().with_sample_rate(4000);
        assert!(matches!(low_rate.validate(), Err(MetricsError::Config(_))));

        let mut config = EvaluatorConfig::default();
        config.n_mfcc = config.n_mels + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_loader_without_model_uses_spectral_fallback() {
        let loader = default_encoder_loader(None);
        let encoder = loader(16000).unwrap();
        assert_eq!(encoder.sample_rate(), 16000);
        assert_eq!(encoder.calibrated_threshold(), None);
    }

    #[test]
    fn test_configured_missing_model_nulls_similarity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        audio::write_wav(&path, &sine(300.0, 1.0)).unwrap();

        let mut config = EvaluatorConfig::default();
        config.speaker_model_path = Some(dir.path().join("missing_encoder.onnx"));
        let evaluator = MetricsEvaluator::new(config);

        let wav = sine(300.0, 1.0);
        assert!(matches!(
            evaluator.speaker_similarity(&wav, &wav),
            Err(MetricsError::ModelLoad(_))
        ));
        let results = evaluator.comprehensive_evaluation(&path, &path, false);
        assert!(results.speaker_similarity.is_none());
        assert!(results.mcd.is_some());
    }

    #[test]
    fn test_empty_model_path_setting_means_fallback() {
        let mut settings = Settings::default();
        settings.speaker_model_path = "  ".to_string();
        assert_eq!(EvaluatorConfig::from_settings(&settings).speaker_model_path, None);

        settings.speaker_model_path = "models/encoder.onnx".to_string();
        assert_eq!(
            EvaluatorConfig::from_settings(&settings).speaker_model_path,
            Some(PathBuf::from("models/encoder.onnx"))
        );
    }
}
