//! voxbench-clone - synthesize a cloned voice with one of the supported models
//!
//! Output lands in `outputs/<model>/<model>_output.wav`, where
//! `voxbench compare` picks it up by default.

use clap::Parser;
use std::path::PathBuf;
use voxbench::backends::{backend_for, BACKEND_NAMES};
use voxbench::config_loader::SETTINGS;

/// Voice cloning with XTTS v2, YourTTS or GPT-SoVITS
#[derive(Parser)]
#[command(name = "voxbench-clone")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Clone a voice with a third-party TTS model", long_about = None)]
struct Cli {
    /// TTS model to use
    #[arg(short, long, value_parser = BACKEND_NAMES)]
    model: String,
    /// Reference audio of the voice to clone
    #[arg(short, long)]
    audio: PathBuf,
    /// Text to synthesize (defaults to the configured text)
    #[arg(short, long)]
    text: Option<String>,
    /// Language code (en, es, fr, de, it, pt, ...)
    #[arg(short, long)]
    language: Option<String>,
    /// Output file (defaults to outputs/<model>/<model>_output.wav)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = SETTINGS
        .read()
        .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?
        .clone();

    let backend = backend_for(&cli.model, &settings)?;
    let text = cli.text.unwrap_or_else(|| settings.default_text.clone());
    let language = cli
        .language
        .unwrap_or_else(|| settings.default_language.clone());
    let dir_name = cli.model.replace('-', "_");
    let output = cli.output.unwrap_or_else(|| {
        PathBuf::from("outputs")
            .join(&dir_name)
            .join(format!("{}_output.wav", dir_name))
    });

    println!("\n{}", "=".repeat(60));
    println!("RUNNING {}", backend.id().to_uppercase());
    println!("{}", "=".repeat(60));

    println!("\nSupported languages:");
    for lang in backend.list_languages() {
        println!("  - {}", lang);
    }

    println!("\nSynthesizing: '{}' ({})", text, language);
    let path = backend.synthesize(&text, &output, &cli.audio, &language)?;
    println!("\nDone. Audio saved to: {}", path.display());

    Ok(())
}
