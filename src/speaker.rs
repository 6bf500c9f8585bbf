//! Speaker embeddings for voice similarity.
//!
//! Both recordings go through [`preprocess_wav`] (volume normalisation and
//! removal of long silences) before an encoder sees them. A pretrained
//! verification network exported to ONNX is loaded with the `onnx` feature;
//! the [`SpectralVoiceEncoder`] fallback summarises log-mel statistics over
//! overlapping 1.6 s partial windows. Any other encoder can be plugged in
//! through the [`SpeakerEncoder`] trait.

use crate::dsp::{self, Spectrogram};
use crate::error::{MetricsError, MetricsResult};
use std::ops::Range;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Trait that all speaker-embedding encoders must implement.
#[cfg_attr(test, mockall::automock)]
pub trait SpeakerEncoder: Send + Sync {
    /// Rate the encoder expects its input at
    fn sample_rate(&self) -> u32;

    /// Fixed-length embedding of an already preprocessed utterance
    fn embed_utterance(&self, samples: &[f32]) -> MetricsResult<Vec<f32>>;

    /// Similarity above which two recordings count as the same speaker, when
    /// the encoder was trained for verification
    fn calibrated_threshold(&self) -> Option<f64> {
        None
    }
}

// ============================================================================
// Preprocessing
// ============================================================================

const TARGET_DBFS: f64 = -30.0;
const VAD_WINDOW_MS: usize = 30;
const VAD_THRESHOLD_DBFS: f64 = -50.0;
const VAD_MOVING_AVERAGE_WIDTH: usize = 8;
const VAD_MAX_SILENCE_WINDOWS: usize = 6;

/// Scale up to `target_dbfs` average level. Never attenuates.
pub fn normalize_volume(samples: &[f32], target_dbfs: f64) -> Vec<f32> {
    let power = dsp::mean(&samples.iter().map(|&s| (s as f64).powi(2)).collect::<Vec<_>>());
    if power <= 0.0 {
        return samples.to_vec();
    }
    let change_db = target_dbfs - 10.0 * power.log10();
    if change_db < 0.0 {
        return samples.to_vec();
    }
    let gain = 10f64.powf(change_db / 20.0) as f32;
    samples.iter().map(|&s| s * gain).collect()
}

/// Volume normalisation followed by removal of unvoiced stretches.
///
/// Voicing is decided per 30 ms window by energy, smoothed with a moving
/// average, then dilated so short pauses inside speech survive. An all-silent
/// input yields an empty buffer.
pub fn preprocess_wav(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let wav = normalize_volume(samples, TARGET_DBFS);

    let window = (VAD_WINDOW_MS * sample_rate as usize / 1000).max(1);
    let usable = wav.len() - wav.len() % window;
    if usable == 0 {
        return Vec::new();
    }

    let flags: Vec<bool> = wav[..usable]
        .chunks(window)
        .map(|chunk| {
            let power = chunk.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / chunk.len() as f64;
            power > 0.0 && 10.0 * power.log10() > VAD_THRESHOLD_DBFS
        })
        .collect();

    let half = VAD_MOVING_AVERAGE_WIDTH / 2;
    let smoothed: Vec<bool> = (0..flags.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(flags.len());
            let voiced = flags[lo..hi].iter().filter(|&&f| f).count();
            voiced as f64 / VAD_MOVING_AVERAGE_WIDTH as f64 >= 0.5
        })
        .collect();

    let reach = VAD_MAX_SILENCE_WINDOWS / 2;
    let mask: Vec<bool> = (0..smoothed.len())
        .map(|i| {
            let lo = i.saturating_sub(reach);
            let hi = (i + reach + 1).min(smoothed.len());
            smoothed[lo..hi].iter().any(|&f| f)
        })
        .collect();

    wav[..usable]
        .chunks(window)
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .flat_map(|(chunk, _)| chunk.iter().copied())
        .collect()
}

// ============================================================================
// Encoders
// ============================================================================

const MEL_N_FFT_MS: usize = 25;
const MEL_HOP_MS: usize = 10;
pub(crate) const MEL_BANDS: usize = 40;
pub(crate) const PARTIAL_FRAMES: usize = 160;
const PARTIAL_STEP: usize = PARTIAL_FRAMES / 2;
const LOG_FLOOR: f64 = 1e-6;

/// 40-band mel power frames, 25 ms window and 10 ms hop.
pub(crate) struct MelFrontEnd {
    n_fft: usize,
    hop: usize,
    filters: Vec<Vec<f64>>,
}

impl MelFrontEnd {
    pub(crate) fn new(sample_rate: u32) -> MetricsResult<Self> {
        let n_fft = MEL_N_FFT_MS * sample_rate as usize / 1000;
        let hop = MEL_HOP_MS * sample_rate as usize / 1000;
        if n_fft < 2 || hop == 0 {
            return Err(MetricsError::ModelLoad(format!(
                "sample rate {} Hz is too low for the speaker encoder",
                sample_rate
            )));
        }

        Ok(Self {
            n_fft,
            hop,
            filters: dsp::mel_filterbank(sample_rate, n_fft, MEL_BANDS),
        })
    }

    pub(crate) fn frames(&self, samples: &[f32]) -> Spectrogram {
        let power = dsp::stft_power(samples, self.n_fft, self.hop);
        dsp::apply_filterbank(&power, &self.filters)
    }
}

/// Overlapping 1.6 s windows over `n_frames` mel frames. A short utterance is
/// one window covering everything it has.
pub(crate) fn partial_ranges(n_frames: usize) -> Vec<Range<usize>> {
    if n_frames <= PARTIAL_FRAMES {
        return vec![0..n_frames];
    }
    (0..=(n_frames - PARTIAL_FRAMES) / PARTIAL_STEP)
        .map(|i| i * PARTIAL_STEP..i * PARTIAL_STEP + PARTIAL_FRAMES)
        .collect()
}

/// Average of unit partial embeddings, normalised again.
pub(crate) fn utterance_embedding(partials: &[Vec<f64>]) -> Vec<f32> {
    let dim = partials.first().map(|p| p.len()).unwrap_or(0);
    let mut sum = vec![0.0; dim];
    for partial in partials {
        for (acc, v) in sum.iter_mut().zip(partial) {
            *acc += v;
        }
    }
    l2_normalize(sum).into_iter().map(|v| v as f32).collect()
}

/// Log-mel statistics encoder.
///
/// Fallback used when no pretrained model is configured. Each partial window
/// contributes the per-band mean and standard deviation of its log-mel
/// frames. Scores are not calibrated against a speaker-verification
/// threshold, so [`SpeakerEncoder::calibrated_threshold`] is `None`.
pub struct SpectralVoiceEncoder {
    sample_rate: u32,
    front_end: MelFrontEnd,
}

impl SpectralVoiceEncoder {
    pub fn new(sample_rate: u32) -> MetricsResult<Self> {
        Ok(Self {
            sample_rate,
            front_end: MelFrontEnd::new(sample_rate)?,
        })
    }

    pub fn embedding_size(&self) -> usize {
        2 * MEL_BANDS
    }

    fn partial_embedding(&self, frames: &[Vec<f64>]) -> Vec<f64> {
        let mut embed = Vec::with_capacity(self.embedding_size());
        for band in 0..MEL_BANDS {
            let values: Vec<f64> = frames.iter().map(|f| f[band]).collect();
            embed.push(dsp::mean(&values));
        }
        for band in 0..MEL_BANDS {
            let values: Vec<f64> = frames.iter().map(|f| f[band]).collect();
            embed.push(dsp::std_dev(&values));
        }
        l2_normalize(embed)
    }
}

impl SpeakerEncoder for SpectralVoiceEncoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn embed_utterance(&self, samples: &[f32]) -> MetricsResult<Vec<f32>> {
        if samples.is_empty() {
            return Err(MetricsError::computation(
                "no voiced audio left after preprocessing",
            ));
        }

        let log_mel: Spectrogram = self
            .front_end
            .frames(samples)
            .into_iter()
            .map(|frame| frame.into_iter().map(|v| (v + LOG_FLOOR).log10()).collect())
            .collect();

        let partials: Vec<Vec<f64>> = partial_ranges(log_mel.len())
            .into_iter()
            .map(|range| self.partial_embedding(&log_mel[range]))
            .collect();

        Ok(utterance_embedding(&partials))
    }
}

pub(crate) fn l2_normalize(v: Vec<f64>) -> Vec<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm <= 0.0 {
        return v;
    }
    v.into_iter().map(|x| x / norm).collect()
}

/// `1 - cosine distance` between two embeddings.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> MetricsResult<f64> {
    if a.len() != b.len() || a.is_empty() {
        return Err(MetricsError::computation(format!(
            "embedding size mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        na += (x as f64).powi(2);
        nb += (y as f64).powi(2);
    }
    if na <= 0.0 || nb <= 0.0 {
        return Err(MetricsError::computation("zero-norm speaker embedding"));
    }
    Ok(dot / (na.sqrt() * nb.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, secs: f32, amp: f32) -> Vec<f32> {
        (0..(16000.0 * secs) as usize)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_normalize_volume_only_increases() {
        let quiet = tone(200.0, 0.5, 0.001);
        let louder = normalize_volume(&quiet, TARGET_DBFS);
        assert!(louder[100].abs() > quiet[100].abs());

        let loud = tone(200.0, 0.5, 0.9);
        assert_eq!(normalize_volume(&loud, TARGET_DBFS), loud);
    }

    #[test]
    fn test_preprocess_trims_long_silence() {
        let mut wav = tone(200.0, 1.0, 0.5);
        wav.extend(vec![0.0; 32000]);
        wav.extend(tone(200.0, 1.0, 0.5));

        let trimmed = preprocess_wav(&wav, 16000);
        assert!(trimmed.len() < wav.len());
        assert!(trimmed.len() >= 32000);
    }

    #[test]
    fn test_preprocess_silence_is_empty() {
        assert!(preprocess_wav(&vec![0.0; 16000], 16000).is_empty());
        assert!(preprocess_wav(&[], 16000).is_empty());
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let encoder = SpectralVoiceEncoder::new(16000).unwrap();
        let embed = encoder.embed_utterance(&tone(180.0, 2.0, 0.3)).unwrap();
        assert_eq!(embed.len(), encoder.embedding_size());
        let norm: f32 = embed.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_identical_utterances_match() {
        let encoder = SpectralVoiceEncoder::new(16000).unwrap();
        let wav = tone(180.0, 2.0, 0.3);
        let a = encoder.embed_utterance(&wav).unwrap();
        let b = encoder.embed_utterance(&wav).unwrap();
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_utterance_fails() {
        let encoder = SpectralVoiceEncoder::new(16000).unwrap();
        assert!(encoder.embed_utterance(&[]).is_err());
    }

    #[test]
    fn test_cosine_similarity_errors() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_err());
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap()).abs() < 1e-12);
    }
}
