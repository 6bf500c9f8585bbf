//! Short-time analysis shared by the spectral metrics.
//!
//! Conventions match the usual speech-analysis defaults so numbers line up
//! with published TTS evaluations: periodic Hann window, centered frames
//! with zero padding of `n_fft / 2`, Slaney mel scale with area
//! normalisation, orthonormal DCT-II for cepstra.
//!
//! Spectrograms are `Vec<Vec<f64>>` indexed `[frame][bin]`.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

pub type Spectrogram = Vec<Vec<f64>>;

// ============================================================================
// Windowing and framing
// ============================================================================

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f64> {
    let factor = 2.0 * PI / size as f64;
    (0..size)
        .map(|i| 0.5 - 0.5 * (i as f64 * factor).cos())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Zero,
    Edge,
}

/// Pad `pad` samples on both sides.
pub fn pad_center(samples: &[f32], pad: usize, mode: PadMode) -> Vec<f32> {
    let (left, right) = match (mode, samples.first(), samples.last()) {
        (PadMode::Edge, Some(&first), Some(&last)) => (first, last),
        _ => (0.0, 0.0),
    };
    let mut padded = Vec::with_capacity(samples.len() + 2 * pad);
    padded.extend(std::iter::repeat(left).take(pad));
    padded.extend_from_slice(samples);
    padded.extend(std::iter::repeat(right).take(pad));
    padded
}

/// Number of centered frames: `1 + len / hop`.
pub fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Centered frames of `frame_length` samples every `hop` samples.
pub fn frames(samples: &[f32], frame_length: usize, hop: usize, mode: PadMode) -> Vec<Vec<f32>> {
    let padded = pad_center(samples, frame_length / 2, mode);
    (0..frame_count(samples.len(), hop))
        .map(|i| {
            let start = i * hop;
            let end = (start + frame_length).min(padded.len());
            let mut frame = padded[start..end].to_vec();
            frame.resize(frame_length, 0.0);
            frame
        })
        .collect()
}

// ============================================================================
// STFT
// ============================================================================

fn stft_with<F>(samples: &[f32], n_fft: usize, hop: usize, reduce: F) -> Spectrogram
where
    F: Fn(&Complex<f64>) -> f64,
{
    let window = hann_window(n_fft);
    let n_freqs = n_fft / 2 + 1;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_fft);

    frames(samples, n_fft, hop, PadMode::Zero)
        .into_iter()
        .map(|frame| {
            let mut buffer: Vec<Complex<f64>> = frame
                .iter()
                .zip(&window)
                .map(|(&s, &w)| Complex::new(s as f64 * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            buffer[..n_freqs].iter().map(&reduce).collect()
        })
        .collect()
}

/// Magnitude spectrogram `|STFT|`.
pub fn stft_magnitude(samples: &[f32], n_fft: usize, hop: usize) -> Spectrogram {
    stft_with(samples, n_fft, hop, |c| c.norm())
}

/// Power spectrogram `|STFT|^2`.
pub fn stft_power(samples: &[f32], n_fft: usize, hop: usize) -> Spectrogram {
    stft_with(samples, n_fft, hop, |c| c.norm_sqr())
}

// ============================================================================
// Mel scale
// ============================================================================

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const LOGSTEP: f64 = 0.068_751_777_420_949_12; // ln(6.4) / 27

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    let min_log_mel = MIN_LOG_HZ / F_SP;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / LOGSTEP
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    let min_log_mel = MIN_LOG_HZ / F_SP;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (LOGSTEP * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filters, `[mel][bin]`, Slaney area normalisation.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n_freqs = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let enorm = 2.0 / (upper - lower);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Apply a filterbank to a power spectrogram.
pub fn apply_filterbank(power: &Spectrogram, filters: &[Vec<f64>]) -> Spectrogram {
    power
        .iter()
        .map(|frame| {
            filters
                .iter()
                .map(|filter| filter.iter().zip(frame).map(|(w, p)| w * p).sum())
                .collect()
        })
        .collect()
}

/// Mel power spectrogram, `[frame][mel]`.
pub fn mel_spectrogram(
    samples: &[f32],
    sample_rate: u32,
    n_fft: usize,
    hop: usize,
    n_mels: usize,
) -> Spectrogram {
    let power = stft_power(samples, n_fft, hop);
    apply_filterbank(&power, &mel_filterbank(sample_rate, n_fft, n_mels))
}

// ============================================================================
// Decibels and cepstra
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DbRef {
    Value(f64),
    /// Peak of the spectrogram being converted
    Max,
}

const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// `10 log10(S / ref)`, floored at `amin` and clipped to 80 dB below the peak.
pub fn power_to_db(spec: &Spectrogram, reference: DbRef) -> Spectrogram {
    let ref_value = match reference {
        DbRef::Value(v) => v.abs(),
        DbRef::Max => spec
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
    };
    let offset = 10.0 * AMIN.max(ref_value).log10();

    let mut db: Spectrogram = spec
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&v| 10.0 * AMIN.max(v).log10() - offset)
                .collect()
        })
        .collect();

    let peak = db.iter().flatten().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let floor = peak - TOP_DB;
    for v in db.iter_mut().flatten() {
        *v = v.max(floor);
    }
    db
}

/// Orthonormal DCT-II of one frame, first `n_out` coefficients.
pub fn dct_ortho(input: &[f64], n_out: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..n_out)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// MFCC matrix `[frame][coefficient]`.
pub fn mfcc(
    samples: &[f32],
    sample_rate: u32,
    n_fft: usize,
    hop: usize,
    n_mels: usize,
    n_mfcc: usize,
) -> Spectrogram {
    let mel = mel_spectrogram(samples, sample_rate, n_fft, hop, n_mels);
    power_to_db(&mel, DbRef::Value(1.0))
        .iter()
        .map(|frame| dct_ortho(frame, n_mfcc))
        .collect()
}

// ============================================================================
// Frame features
// ============================================================================

/// Root-mean-square energy per centered frame.
pub fn rms(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f64> {
    frames(samples, frame_length, hop, PadMode::Zero)
        .iter()
        .map(|frame| {
            let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (energy / frame_length as f64).sqrt()
        })
        .collect()
}

/// Fraction of sign changes per centered frame. Zero counts as positive and
/// values within 1e-10 of zero are clipped to zero first.
pub fn zero_crossing_rate(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f64> {
    const THRESHOLD: f32 = 1e-10;
    frames(samples, frame_length, hop, PadMode::Edge)
        .iter()
        .map(|frame| {
            let negative = |s: f32| s < -THRESHOLD;
            let crossings = frame
                .windows(2)
                .filter(|w| negative(w[0]) != negative(w[1]))
                .count();
            crossings as f64 / frame_length as f64
        })
        .collect()
}

// ============================================================================
// Statistics
// ============================================================================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Pearson correlation, `None` when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n == 0 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some(cov / (va.sqrt() * vb.sqrt()))
}
