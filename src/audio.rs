//! Audio loading: decode any supported file to mono f32 at a fixed rate.
//!
//! WAV goes through `hound`; everything else falls back to `rodio`'s
//! decoders (mp3, flac, vorbis).

use crate::error::{MetricsError, MetricsResult};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Mono samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode `path`, collapse to mono and resample to `target_rate`.
pub fn decode(path: &Path, target_rate: u32) -> MetricsResult<Waveform> {
    if !path.is_file() {
        return Err(MetricsError::decode(path, "file not found"));
    }

    let (interleaved, channels, source_rate) = match read_wav(path) {
        Ok(decoded) => decoded,
        Err(wav_err) => read_with_rodio(path).map_err(|other_err| {
            MetricsError::decode(
                path,
                format!("WAV: {}; fallback decoder: {}", wav_err, other_err),
            )
        })?,
    };

    if channels == 0 || source_rate == 0 {
        return Err(MetricsError::decode(path, "invalid channel count or sample rate"));
    }

    let mono = downmix(&interleaved, channels as usize);
    debug!(
        "Decoded {} ({} samples, {} ch, {} Hz)",
        path.display(),
        mono.len(),
        channels,
        source_rate
    );

    let samples = if source_rate != target_rate {
        resample(&mono, source_rate, target_rate)
    } else {
        mono
    };

    Ok(Waveform::new(samples, target_rate))
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u16, u32), String> {
    let reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| e.to_string())?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| e.to_string())?
        }
    };

    Ok((samples, spec.channels, spec.sample_rate))
}

fn read_with_rodio(path: &Path) -> Result<(Vec<f32>, u16, u32), String> {
    use rodio::Source;

    let file = File::open(path).map_err(|e| e.to_string())?;
    let decoder = rodio::Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();

    Ok((samples, channels, sample_rate))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampling.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx = src_idx as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < input.len() {
            input[idx] * (1.0 - frac) + input[idx + 1] * frac
        } else if idx < input.len() {
            input[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

/// Slice both signals to the shorter length. No time warping.
pub fn truncate_pair<'a>(a: &'a [f32], b: &'a [f32]) -> (&'a [f32], &'a [f32]) {
    let n = a.len().min(b.len());
    (&a[..n], &b[..n])
}

/// Write a 32-bit float mono WAV.
pub fn write_wav(path: &Path, waveform: &Waveform) -> MetricsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let to_io = |e: hound::Error| MetricsError::Io(std::io::Error::other(e.to_string()));
    let mut writer = hound::WavWriter::create(path, spec).map_err(to_io)?;
    for &sample in &waveform.samples {
        writer.write_sample(sample).map_err(to_io)?;
    }
    writer.finalize().map_err(to_io)?;
    Ok(())
}
