use crate::metrics::EvaluatorConfig;
use config::{Config, File};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::sync::RwLock;

pub const DEFAULT_TEXT: &str = "Hi, this is captain Santiago speaking, we will be landing soon";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Analysis settings
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    // Pitch tracker (C2..C7)
    pub pitch_fmin: f64,
    pub pitch_fmax: f64,
    pub pitch_threshold: f64,
    // Pretrained speaker encoder (ONNX); empty selects the spectral fallback
    pub speaker_model_path: String,
    // Comparison driver
    pub output_dir: String,
    pub default_model_dirs: Vec<String>,
    // Cloning backends
    pub tts_binary: String,  // Coqui TTS command-line entry point
    pub sovits_url: String,  // GPT-SoVITS api.py endpoint
    pub sovits_prompt_text: String,
    pub synthesis_timeout_secs: u64,
    pub default_text: String,
    pub default_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 13,
            pitch_fmin: 65.406,
            pitch_fmax: 2093.005,
            pitch_threshold: 0.1,
            speaker_model_path: String::new(),
            output_dir: "outputs/comparisons".to_string(),
            default_model_dirs: vec!["outputs/xtts".to_string(), "outputs/yourtts".to_string()],
            tts_binary: "tts".to_string(),
            sovits_url: "http://127.0.0.1:9880".to_string(),
            sovits_prompt_text: String::new(),
            synthesis_timeout_secs: 600,
            default_text: DEFAULT_TEXT.to_string(),
            default_language: "en".to_string(),
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: RwLock<Settings> = RwLock::new(Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Invalid configuration, falling back to defaults: {}", e);
        Settings::default()
    }));
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = Config::builder()
            .set_default("sample_rate", 16000)?
            .set_default("n_fft", 2048)?
            .set_default("hop_length", 512)?
            .set_default("n_mels", 128)?
            .set_default("n_mfcc", 13)?
            .set_default("pitch_fmin", 65.406)?
            .set_default("pitch_fmax", 2093.005)?
            .set_default("pitch_threshold", 0.1)?
            .set_default("speaker_model_path", "")?
            .set_default("output_dir", "outputs/comparisons")?
            .set_default("default_model_dirs", vec!["outputs/xtts", "outputs/yourtts"])?
            .set_default("tts_binary", "tts")?
            .set_default("sovits_url", "http://127.0.0.1:9880")?
            .set_default("sovits_prompt_text", "")?
            .set_default("synthesis_timeout_secs", 600)?
            .set_default("default_text", DEFAULT_TEXT)?
            .set_default("default_language", "en")?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Voxbench").required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/voxbench/Voxbench",
                    dirs::config_dir()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ))
                .required(false),
            )
            // Merge with environment variables (e.g. VOXBENCH_SAMPLE_RATE)
            .add_source(
                config::Environment::with_prefix("VOXBENCH")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("default_model_dirs"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        EvaluatorConfig::from_settings(self)
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        if self.synthesis_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "synthesis_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
