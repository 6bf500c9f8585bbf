use super::{ensure_parent, CloningBackend};

use std::io::{Error, ErrorKind, Read, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

pub const XTTS_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";
pub const YOURTTS_MODEL: &str = "tts_models/multilingual/multi-dataset/your_tts";

const XTTS_LANGUAGES: [&str; 16] = [
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh-cn", "ja", "ko",
    "hu",
];
const YOURTTS_LANGUAGES: [&str; 3] = ["en", "fr-fr", "pt-br"];

/// Coqui TTS models driven through the `tts` command-line entry point.
pub struct CoquiBackend {
    id: &'static str,
    binary: String,
    model_name: &'static str,
    languages: &'static [&'static str],
    timeout: Duration,
}

impl CoquiBackend {
    pub fn xtts(binary: &str, timeout: Duration) -> Self {
        Self {
            id: "xtts",
            binary: binary.to_string(),
            model_name: XTTS_MODEL,
            languages: &XTTS_LANGUAGES,
            timeout,
        }
    }

    pub fn yourtts(binary: &str, timeout: Duration) -> Self {
        Self {
            id: "yourtts",
            binary: binary.to_string(),
            model_name: YOURTTS_MODEL,
            languages: &YOURTTS_LANGUAGES,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model_name
    }

    fn command(&self, text: &str, output_path: &Path, speaker_wav: &Path, language: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model_name")
            .arg(self.model_name)
            .arg("--text")
            .arg(text)
            .arg("--speaker_wav")
            .arg(speaker_wav)
            .arg("--language_idx")
            .arg(language)
            .arg("--out_path")
            .arg(output_path);
        cmd
    }
}

impl CloningBackend for CoquiBackend {
    fn id(&self) -> &'static str {
        self.id
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
        if !self.languages.contains(&language) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} does not support language '{}'", self.id, language),
            ));
        }
        ensure_parent(output_path)?;

        debug!("{}: running {} for {}", self.id, self.binary, output_path.display());
        let mut child = self
            .command(text, output_path, speaker_wav, language)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // The Coqui CLI writes progress bars to stderr; drain it so the child
        // never blocks on a full pipe.
        let stderr = child.stderr.take();
        let drain = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let err_msg = drain.join().unwrap_or_default();
                if status.success() && output_path.is_file() {
                    Ok(output_path.to_path_buf())
                } else {
                    Err(Error::new(
                        ErrorKind::Other,
                        format!("{} synthesis failed: {}", self.id, err_msg.trim()),
                    ))
                }
            }
            None => {
                // Timeout occurred, kill the process
                let _ = child.kill();
                let _ = child.wait();
                let _ = drain.join();
                Err(Error::new(
                    ErrorKind::TimedOut,
                    format!("{} timed out after {:?}", self.id, self.timeout),
                ))
            }
        }
    }

    fn list_languages(&self) -> Vec<String> {
        self.languages.iter().map(|l| l.to_string()).collect()
    }
}
