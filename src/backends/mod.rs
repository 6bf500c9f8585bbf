pub mod coqui;
pub mod sovits;

use crate::config_loader::Settings;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use coqui::CoquiBackend;
pub use sovits::SovitsBackend;

/// Trait that all voice-cloning backends must implement.
/// The evaluator only ever sees the `.wav` files they leave behind.
pub trait CloningBackend: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "xtts")
    fn id(&self) -> &'static str;

    /// Synthesize `text` in the voice of `speaker_wav` into `output_path`
    fn synthesize(
        &self,
        text: &str,
        output_path: &Path,
        speaker_wav: &Path,
        language: &str,
    ) -> Result<PathBuf>;

    /// Language codes the model accepts
    fn list_languages(&self) -> Vec<String>;

    /// Synthesize several texts as `<id>_<index>.wav` in `output_dir`.
    /// Failed items are logged and skipped.
    fn batch_synthesize(
        &self,
        texts: &[String],
        output_dir: &Path,
        speaker_wav: &Path,
        language: &str,
    ) -> Vec<PathBuf> {
        texts
            .iter()
            .enumerate()
            .filter_map(|(i, text)| {
                let output = output_dir.join(format!("{}_{}.wav", self.id(), i));
                match self.synthesize(text, &output, speaker_wav, language) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!("{}: item {} failed: {}", self.id(), i, e);
                        None
                    }
                }
            })
            .collect()
    }
}

pub const BACKEND_NAMES: [&str; 3] = ["xtts", "yourtts", "gpt-sovits"];

/// Build a backend by CLI name.
pub fn backend_for(name: &str, settings: &Settings) -> Result<Box<dyn CloningBackend>> {
    let timeout = Duration::from_secs(settings.synthesis_timeout_secs);
    match name {
        "xtts" => Ok(Box::new(CoquiBackend::xtts(&settings.tts_binary, timeout))),
        "yourtts" => Ok(Box::new(CoquiBackend::yourtts(&settings.tts_binary, timeout))),
        "gpt-sovits" | "sovits" => Ok(Box::new(SovitsBackend::new(
            &settings.sovits_url,
            &settings.sovits_prompt_text,
            timeout,
        ))),
        other => Err(Error::new(
            ErrorKind::InvalidInput,
            format!(
                "Unknown model '{}'. Expected one of: {}",
                other,
                BACKEND_NAMES.join(", ")
            ),
        )),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
