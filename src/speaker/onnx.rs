//! Pretrained speaker encoder run through ONNX Runtime.
//!
//! Expects a GE2E-style d-vector network (e.g. an exported Resemblyzer
//! `VoiceEncoder`): input `[batch, 160, 40]` mel power frames at 16 kHz,
//! output `[batch, dim]` embeddings. Partial embeddings are averaged and
//! normalised into the utterance embedding.

use super::{
    l2_normalize, partial_ranges, utterance_embedding, MelFrontEnd, SpeakerEncoder, MEL_BANDS,
    PARTIAL_FRAMES,
};
use crate::error::{MetricsError, MetricsResult};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use std::borrow::Cow;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Rate the exported encoders are trained at.
pub const MODEL_SAMPLE_RATE: u32 = 16000;

/// Cosine similarity above which a GE2E encoder treats two clips as one voice.
pub const SAME_SPEAKER_THRESHOLD: f64 = 0.8;

pub struct OnnxSpeakerEncoder {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    front_end: MelFrontEnd,
}

fn load_error(e: impl std::fmt::Display) -> MetricsError {
    MetricsError::ModelLoad(format!("Failed to load speaker model: {}", e))
}

fn inference_error(e: impl std::fmt::Display) -> MetricsError {
    MetricsError::computation(format!("Speaker model inference failed: {}", e))
}

impl OnnxSpeakerEncoder {
    pub fn load(model_path: &Path) -> MetricsResult<Self> {
        if !model_path.is_file() {
            return Err(MetricsError::ModelLoad(format!(
                "Speaker model not found: {}",
                model_path.display()
            )));
        }

        // Runtime environment is process-wide; repeated init is a no-op
        let _ = ort::init().commit();

        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .commit_from_file(model_path)
            .map_err(load_error)?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| load_error("model has no inputs"))?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| load_error("model has no outputs"))?;

        info!(
            "Loaded speaker model {} ({} -> {})",
            model_path.display(),
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            front_end: MelFrontEnd::new(MODEL_SAMPLE_RATE)?,
        })
    }

    /// Partials as one `[batch, 160, 40]` buffer, zero-padding a short last
    /// window to the fixed frame count.
    fn batch(mel: &[Vec<f64>]) -> (usize, Vec<f32>) {
        let ranges = partial_ranges(mel.len());
        let mut data = Vec::with_capacity(ranges.len() * PARTIAL_FRAMES * MEL_BANDS);
        for range in &ranges {
            let window = &mel[range.clone()];
            for frame in window {
                data.extend(frame.iter().map(|&v| v as f32));
            }
            data.resize(data.len() + (PARTIAL_FRAMES - window.len()) * MEL_BANDS, 0.0);
        }
        (ranges.len(), data)
    }
}

impl SpeakerEncoder for OnnxSpeakerEncoder {
    fn sample_rate(&self) -> u32 {
        MODEL_SAMPLE_RATE
    }

    fn embed_utterance(&self, samples: &[f32]) -> MetricsResult<Vec<f32>> {
        if samples.is_empty() {
            return Err(MetricsError::computation(
                "no voiced audio left after preprocessing",
            ));
        }

        let (batch, data) = Self::batch(&self.front_end.frames(samples));
        let shape = vec![batch as i64, PARTIAL_FRAMES as i64, MEL_BANDS as i64];
        let tensor = Tensor::from_array((shape, data)).map_err(inference_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| inference_error(format!("session lock poisoned: {}", e)))?;
        let inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            vec![(Cow::Borrowed(self.input_name.as_str()), tensor.into())];
        let outputs = session
            .run(SessionInputs::from(inputs))
            .map_err(inference_error)?;

        let embeds = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(inference_error)?;
        let flat: Vec<f64> = embeds.iter().map(|&v| v as f64).collect();
        if flat.is_empty() || flat.len() % batch != 0 {
            return Err(inference_error(format!(
                "unexpected output shape {:?} for {} partials",
                embeds.shape(),
                batch
            )));
        }
        debug!("Speaker model: {} partials, output {:?}", batch, embeds.shape());

        let dim = flat.len() / batch;
        let partials: Vec<Vec<f64>> = flat
            .chunks(dim)
            .map(|chunk| l2_normalize(chunk.to_vec()))
            .collect();
        Ok(utterance_embedding(&partials))
    }

    fn calibrated_threshold(&self) -> Option<f64> {
        Some(SAME_SPEAKER_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_load_error() {
        let result = OnnxSpeakerEncoder::load(Path::new("/nonexistent/speaker_encoder.onnx"));
        assert!(matches!(result, Err(MetricsError::ModelLoad(_))));
    }

    #[test]
    fn test_invalid_model_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();
        assert!(matches!(
            OnnxSpeakerEncoder::load(&path),
            Err(MetricsError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_batch_pads_short_utterance() {
        let mel = vec![vec![1.0; MEL_BANDS]; 100];
        let (batch, data) = OnnxSpeakerEncoder::batch(&mel);
        assert_eq!(batch, 1);
        assert_eq!(data.len(), PARTIAL_FRAMES * MEL_BANDS);
        assert_eq!(data[100 * MEL_BANDS - 1], 1.0);
        assert_eq!(data[100 * MEL_BANDS], 0.0);
    }

    #[test]
    fn test_batch_overlapping_partials() {
        let mel = vec![vec![0.5; MEL_BANDS]; 400];
        let (batch, data) = OnnxSpeakerEncoder::batch(&mel);
        // windows start at 0, 80, 160 and 240
        assert_eq!(batch, 4);
        assert_eq!(data.len(), 4 * PARTIAL_FRAMES * MEL_BANDS);
    }
}
