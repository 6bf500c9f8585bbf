use super::{ensure_parent, CloningBackend};

use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const LANGUAGES: [&str; 5] = ["zh", "en", "ja", "ko", "yue"];

/// GPT-SoVITS served by its HTTP inference API (`api.py`).
pub struct SovitsBackend {
    base_url: String,
    prompt_text: String,
    timeout: Duration,
}

impl SovitsBackend {
    pub fn new(base_url: &str, prompt_text: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            prompt_text: prompt_text.to_string(),
            timeout,
        }
    }

    fn query<'a>(&'a self, text: &'a str, speaker_wav: &'a str, language: &'a str) -> Vec<(&'static str, &'a str)> {
        vec![
            ("refer_wav_path", speaker_wav),
            ("prompt_text", self.prompt_text.as_str()),
            ("prompt_language", language),
            ("text", text),
            ("text_language", language),
        ]
    }
}

fn looks_like_wav(body: &[u8]) -> bool {
    body.len() > 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WAVE"
}

impl CloningBackend for SovitsBackend {
    fn id(&self) -> &'static str {
        "gpt-sovits"
    }

    fn synthesize(
        &self,
        text: &str,
        output_path: &Path,
        speaker_wav: &Path,
        language: &str,
    ) -> Result<PathBuf> {
        if !speaker_wav.is_file() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Speaker reference not found: {}", speaker_wav.display()),
            ));
        }
        let speaker = speaker_wav.canonicalize()?;
        let speaker = speaker.to_string_lossy();

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::new(ErrorKind::Other, e))?;

        debug!("gpt-sovits: requesting {} ({})", self.base_url, language);
        let resp = client
            .get(&self.base_url)
            .query(&self.query(text, &speaker, language))
            .send()
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ErrorKind::TimedOut
                } else {
                    ErrorKind::ConnectionRefused
                };
                Error::new(kind, format!("GPT-SoVITS API unreachable: {}", e))
            })?;

        let status = resp.status();
        let body = resp.bytes().map_err(|e| Error::new(ErrorKind::Other, e))?;
        if !status.is_success() {
            return Err(Error::new(
                ErrorKind::Other,
                format!(
                    "GPT-SoVITS returned {}: {}",
                    status,
                    String::from_utf8_lossy(&body)
                ),
            ));
        }
        if !looks_like_wav(&body) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "GPT-SoVITS response is not a WAV file",
            ));
        }

        ensure_parent(output_path)?;
        std::fs::write(output_path, &body)?;
        Ok(output_path.to_path_buf())
    }

    fn list_languages(&self) -> Vec<String> {
        LANGUAGES.iter().map(|l| l.to_string()).collect()
    }
}
