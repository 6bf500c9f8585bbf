//! voxbench - evaluate and compare voice-cloning outputs
//!
//! `evaluate` scores one synthetic file against a reference, `compare` scores
//! several model outputs and writes the comparison table.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use voxbench::compare::{self, comparison_rows};
use voxbench::config_loader::SETTINGS;
use voxbench::metrics::{save_results, EvaluatorConfig, MetricsEvaluator};

/// Objective metrics for voice-cloning TTS outputs
#[derive(Parser)]
#[command(name = "voxbench")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Evaluate and compare TTS voice-cloning outputs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one synthetic recording against its reference
    Evaluate {
        /// Original (reference) audio
        #[arg(long)]
        original: PathBuf,
        /// Synthetic audio
        #[arg(long)]
        synthetic: PathBuf,
        /// Write results as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Processing sample rate (defaults to the configured rate)
        #[arg(long)]
        sr: Option<u32>,
    },

    /// Compare several model outputs against one reference
    Compare {
        /// Reference audio
        #[arg(long)]
        reference: PathBuf,
        /// Synthetic .wav files or model output directories
        #[arg(long, num_args = 1..)]
        models: Vec<PathBuf>,
        /// Directory for per-model JSON, comparison.csv and comparison_full.json
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Only print the final table
        #[arg(short, long)]
        quiet: bool,
    },
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

    match cli.command {
        Commands::Evaluate {
            original,
            synthetic,
            output,
            sr,
        } => {
            let mut config = EvaluatorConfig::from_settings(&settings);
            if let Some(sr) = sr {
                config = config.with_sample_rate(sr);
            }
            config.validate()?;
            let evaluator = MetricsEvaluator::new(config);
            let results = evaluator.comprehensive_evaluation(&original, &synthetic, true);

            if let Some(path) = output {
                save_results(&results, &path)?;
                println!("Results saved to: {}", path.display());
            }
        }

        Commands::Compare {
            reference,
            models,
            output_dir,
            quiet,
        } => {
            if !reference.exists() {
                println!("Error: reference audio not found: {}", reference.display());
                return Ok(());
            }

            let default_dirs: Vec<PathBuf> = settings
                .default_model_dirs
                .iter()
                .map(PathBuf::from)
                .collect();
            let model_outputs = compare::discover_models(&models, &default_dirs);

            if model_outputs.is_empty() {
                println!("Error: no synthetic audio found to evaluate");
                println!("\nUsage:");
                println!(
                    "  voxbench compare --reference data/ref.wav --models outputs/xtts outputs/yourtts"
                );
                return Ok(());
            }

            let names: Vec<&str> = model_outputs.iter().map(|(n, _)| n.as_str()).collect();
            println!(
                "\nEvaluating {} model(s) against reference: {}",
                model_outputs.len(),
                reference.display()
            );
            println!("Models: {}\n", names.join(", "));

            let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&settings.output_dir));
            let evaluator = MetricsEvaluator::new(EvaluatorConfig::from_settings(&settings));
            let results = compare::compare_models(
                &evaluator,
                &reference,
                &model_outputs,
                Some(&output_dir),
                !quiet,
            )?;

            compare::print_comparison_table(&comparison_rows(&results));
        }
    }

    Ok(())
}
