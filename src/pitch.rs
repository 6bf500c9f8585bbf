//! YIN fundamental-frequency tracking.
//!
//! de Cheveigné & Kawahara (2002): difference function, cumulative mean
//! normalisation, absolute threshold, parabolic interpolation. Unvoiced
//! frames are reported as `NaN`.

use crate::dsp::{frames, PadMode};

pub const FRAME_LENGTH: usize = 2048;
pub const HOP_LENGTH: usize = 512;

/// Frames with less energy than this per sample are treated as silence.
const SILENCE_ENERGY: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct YinTracker {
    pub sample_rate: u32,
    pub fmin: f64,
    pub fmax: f64,
    pub threshold: f64,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl YinTracker {
    pub fn new(sample_rate: u32, fmin: f64, fmax: f64, threshold: f64) -> Self {
        Self {
            sample_rate,
            fmin,
            fmax,
            threshold,
            frame_length: FRAME_LENGTH,
            hop_length: HOP_LENGTH,
        }
    }

    fn lag_range(&self) -> (usize, usize) {
        let sr = self.sample_rate as f64;
        let tau_min = ((sr / self.fmax).floor() as usize).max(2);
        let tau_max = ((sr / self.fmin).ceil() as usize).min(self.frame_length / 2);
        (tau_min, tau_max)
    }

    /// F0 contour in Hz, one value per centered frame.
    pub fn track(&self, samples: &[f32]) -> Vec<f64> {
        let (tau_min, tau_max) = self.lag_range();
        if tau_min + 1 >= tau_max {
            return vec![f64::NAN; crate::dsp::frame_count(samples.len(), self.hop_length)];
        }

        frames(samples, self.frame_length, self.hop_length, PadMode::Zero)
            .iter()
            .map(|frame| self.estimate(frame, tau_min, tau_max))
            .collect()
    }

    fn estimate(&self, frame: &[f32], tau_min: usize, tau_max: usize) -> f64 {
        let x: Vec<f64> = frame.iter().map(|&s| s as f64).collect();
        let width = x.len() - tau_max;

        let energy: f64 = x[..width].iter().map(|v| v * v).sum();
        if energy / (width as f64) < SILENCE_ENERGY {
            return f64::NAN;
        }

        let cmnd = cumulative_mean_normalized_difference(&x, width, tau_max);

        let mut tau = match (tau_min..tau_max).find(|&t| cmnd[t] < self.threshold) {
            Some(t) => t,
            None => return f64::NAN,
        };
        while tau + 1 < tau_max && cmnd[tau + 1] < cmnd[tau] {
            tau += 1;
        }

        let period = parabolic_peak(&cmnd, tau);
        if period <= 0.0 {
            return f64::NAN;
        }
        let f0 = self.sample_rate as f64 / period;
        if f0 < self.fmin || f0 > self.fmax {
            return f64::NAN;
        }
        f0
    }
}

fn cumulative_mean_normalized_difference(x: &[f64], width: usize, tau_max: usize) -> Vec<f64> {
    let mut cmnd = vec![1.0; tau_max + 1];
    let mut running = 0.0;
    for tau in 1..=tau_max {
        let d: f64 = (0..width)
            .map(|j| {
                let delta = x[j] - x[j + tau];
                delta * delta
            })
            .sum();
        running += d;
        cmnd[tau] = if running > 0.0 {
            d * tau as f64 / running
        } else {
            1.0
        };
    }
    cmnd
}

fn parabolic_peak(values: &[f64], idx: usize) -> f64 {
    if idx == 0 || idx + 1 >= values.len() {
        return idx as f64;
    }
    let (a, b, c) = (values[idx - 1], values[idx], values[idx + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return idx as f64;
    }
    idx as f64 + 0.5 * (a - c) / denom
}

/// Keep frames that carry a pitch estimate.
pub fn voiced(f0: &[f64]) -> Vec<f64> {
    f0.iter().copied().filter(|v| v.is_finite() && *v > 0.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> YinTracker {
        YinTracker::new(16000, 65.406, 2093.005, 0.1)
    }

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        (0..(16000.0 * secs) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_tracks_sine() {
        let f0 = tracker().track(&sine(220.0, 1.0));
        let v = voiced(&f0);
        assert!(v.len() > f0.len() / 2);
        let mid = v[v.len() / 2];
        assert!((mid - 220.0).abs() < 2.0, "got {}", mid);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let f0 = tracker().track(&vec![0.0; 16000]);
        assert_eq!(f0.len(), 1 + 16000 / HOP_LENGTH);
        assert!(voiced(&f0).is_empty());
    }

    #[test]
    fn test_empty_input() {
        let f0 = tracker().track(&[]);
        assert_eq!(f0.len(), 1);
        assert!(f0[0].is_nan());
    }

    #[test]
    fn test_parabolic_peak_symmetric() {
        assert_eq!(parabolic_peak(&[1.0, 0.0, 1.0], 1), 1.0);
        assert!(parabolic_peak(&[1.0, 0.0, 0.5], 1) > 1.0);
    }
}
