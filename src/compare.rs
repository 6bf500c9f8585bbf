//! Multi-model comparison against a single reference recording.

use crate::error::MetricsResult;
use crate::metrics::{save_json, save_results, MetricResult, MetricsEvaluator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One CSV row of the comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Speaker Similarity")]
    pub speaker_similarity: Option<f64>,
    #[serde(rename = "MCD (dB)")]
    pub mcd: Option<f64>,
    #[serde(rename = "Spectral Convergence")]
    pub spectral_convergence: Option<f64>,
    #[serde(rename = "SNR (dB)")]
    pub snr: Option<f64>,
    #[serde(rename = "Mel Correlation")]
    pub mel_correlation: Option<f64>,
    #[serde(rename = "Mel MSE")]
    pub mel_mse: Option<f64>,
    #[serde(rename = "Duration Ratio")]
    pub duration_ratio: Option<f64>,
    #[serde(rename = "Pitch Difference (Hz)")]
    pub pitch_difference: Option<f64>,
}

impl From<&MetricResult> for ComparisonRow {
    fn from(result: &MetricResult) -> Self {
        Self {
            model: result
                .model_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            speaker_similarity: result.speaker_similarity,
            mcd: result.mcd,
            spectral_convergence: result.spectral_convergence,
            snr: result.snr,
            mel_correlation: result.mel_correlation,
            mel_mse: result.mel_mse,
            duration_ratio: result.duration_ratio,
            pitch_difference: result.pitch_difference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Better {
    Higher,
    Lower,
}

/// Headline metrics used to rank models.
pub const RANKED_METRICS: [(&str, Better); 4] = [
    ("Speaker Similarity", Better::Higher),
    ("MCD (dB)", Better::Lower),
    ("Mel Correlation", Better::Higher),
    ("SNR (dB)", Better::Higher),
];

fn ranked_value(row: &ComparisonRow, metric: &str) -> Option<f64> {
    match metric {
        "Speaker Similarity" => row.speaker_similarity,
        "MCD (dB)" => row.mcd,
        "Mel Correlation" => row.mel_correlation,
        "SNR (dB)" => row.snr,
        _ => None,
    }
    .filter(|v| !v.is_nan())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BestModel {
    pub metric: &'static str,
    pub model: String,
    pub value: f64,
    pub better: Better,
}

/// Best model per headline metric, ignoring missing values. The first model
/// wins ties.
pub fn best_models(rows: &[ComparisonRow]) -> Vec<BestModel> {
    RANKED_METRICS
        .iter()
        .filter_map(|&(metric, better)| {
            let mut best: Option<(&ComparisonRow, f64)> = None;
            for row in rows {
                let Some(value) = ranked_value(row, metric) else {
                    continue;
                };
                let improves = match (best, better) {
                    (None, _) => true,
                    (Some((_, current)), Better::Higher) => value > current,
                    (Some((_, current)), Better::Lower) => value < current,
                };
                if improves {
                    best = Some((row, value));
                }
            }
            best.map(|(row, value)| BestModel {
                metric,
                model: row.model.clone(),
                value,
                better,
            })
        })
        .collect()
}

pub fn comparison_rows(results: &[MetricResult]) -> Vec<ComparisonRow> {
    results.iter().map(ComparisonRow::from).collect()
}

fn first_wav(dir: &Path) -> Option<PathBuf> {
    let mut wavs: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_wav(p))
        .collect();
    wavs.sort();
    wavs.into_iter().next()
}

fn is_wav(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("wav")
}

fn insert_model(models: &mut Vec<(String, PathBuf)>, name: String, path: PathBuf) {
    match models.iter_mut().find(|(existing, _)| *existing == name) {
        Some(entry) => entry.1 = path,
        None => models.push((name, path)),
    }
}

/// Resolve model outputs from CLI paths.
///
/// A directory contributes its first `.wav` under the directory's name, a
/// `.wav` file contributes itself under its stem. With no paths the default
/// directories are scanned instead.
pub fn discover_models(paths: &[PathBuf], default_dirs: &[PathBuf]) -> Vec<(String, PathBuf)> {
    let mut models = Vec::new();

    if paths.is_empty() {
        for dir in default_dirs.iter().filter(|d| d.is_dir()) {
            if let (Some(wav), Some(name)) = (first_wav(dir), dir_name(dir)) {
                insert_model(&mut models, name, wav);
            }
        }
        return models;
    }

    for path in paths {
        if path.is_dir() {
            if let (Some(wav), Some(name)) = (first_wav(path), dir_name(path)) {
                insert_model(&mut models, name, wav);
            }
        } else if path.is_file() && is_wav(path) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                insert_model(&mut models, stem.to_string(), path.clone());
            }
        }
    }

    models
}

fn dir_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

/// Evaluate one model output and tag the record with its name.
pub fn evaluate_model_output(
    evaluator: &MetricsEvaluator,
    reference: &Path,
    synthetic: &Path,
    model_name: &str,
    verbose: bool,
) -> MetricResult {
    if verbose {
        println!("\n{}", "=".repeat(70));
        println!("EVALUATING: {}", model_name);
        println!("{}", "=".repeat(70));
    }

    let mut results = evaluator.comprehensive_evaluation(reference, synthetic, verbose);
    results.model_name = Some(model_name.to_string());
    results
}

/// Evaluate every model output and write the per-model JSON files,
/// `comparison.csv` and `comparison_full.json` when `output_dir` is set.
pub fn compare_models(
    evaluator: &MetricsEvaluator,
    reference: &Path,
    models: &[(String, PathBuf)],
    output_dir: Option<&Path>,
    verbose: bool,
) -> MetricsResult<Vec<MetricResult>> {
    let mut all_results = Vec::with_capacity(models.len());

    for (model_name, synthetic) in models {
        if !synthetic.exists() {
            warn!("Audio not found: {}", synthetic.display());
            println!("Audio not found: {}", synthetic.display());
            continue;
        }

        let results = evaluate_model_output(evaluator, reference, synthetic, model_name, verbose);

        if let Some(dir) = output_dir {
            let output_file = dir.join(format!("{}_metrics.json", model_name));
            match save_results(&results, &output_file) {
                Ok(()) if verbose => println!("Results saved to: {}", output_file.display()),
                Ok(()) => {}
                Err(e) => warn!("Could not save {}: {}", output_file.display(), e),
            }
        }
        all_results.push(results);
    }

    if let Some(dir) = output_dir {
        fs::create_dir_all(dir)?;

        let comparison_file = dir.join("comparison.csv");
        write_csv(&comparison_rows(&all_results), &comparison_file)?;
        println!("\nComparison saved to: {}", comparison_file.display());

        let json_file = dir.join("comparison_full.json");
        save_json(&all_results, &json_file)?;
        println!("Full results saved to: {}", json_file.display());
    }

    Ok(all_results)
}

pub fn write_csv(rows: &[ComparisonRow], path: &Path) -> MetricsResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        writer.write_record(CSV_HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

const CSV_HEADER: [&str; 9] = [
    "Model",
    "Speaker Similarity",
    "MCD (dB)",
    "Spectral Convergence",
    "SNR (dB)",
    "Mel Correlation",
    "Mel MSE",
    "Duration Ratio",
    "Pitch Difference (Hz)",
];

pub fn read_csv(path: &Path) -> MetricsResult<Vec<ComparisonRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => "NaN".to_string(),
    }
}

/// Fixed-width table, interpretation guide and best model per metric.
pub fn print_comparison_table(rows: &[ComparisonRow]) {
    println!("\n{}", "=".repeat(70));
    println!("MODEL COMPARISON");
    println!("{}", "=".repeat(70));
    println!("\nMain metrics:\n");

    let table: Vec<[String; 9]> = rows
        .iter()
        .map(|r| {
            [
                r.model.clone(),
                cell(r.speaker_similarity),
                cell(r.mcd),
                cell(r.spectral_convergence),
                cell(r.snr),
                cell(r.mel_correlation),
                cell(r.mel_mse),
                cell(r.duration_ratio),
                cell(r.pitch_difference),
            ]
        })
        .collect();

    let widths: Vec<usize> = (0..CSV_HEADER.len())
        .map(|col| {
            table
                .iter()
                .map(|r| r[col].len())
                .chain(std::iter::once(CSV_HEADER[col].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = CSV_HEADER
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:>w$}", h, w = w))
        .collect();
    println!("{}", header.join("  "));
    for row in &table {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>w$}", c, w = w))
            .collect();
        println!("{}", line.join("  "));
    }

    println!("\n{}", "-".repeat(70));
    println!("Interpretation:");
    println!("  * Speaker Similarity: >0.80 excellent, >0.70 good");
    println!("  * MCD: <6.0 excellent, <8.0 good");
    println!("  * Mel Correlation: >0.90 excellent, >0.85 good");
    println!("  * SNR: >20 dB excellent, >15 dB good");
    println!("  * Duration Ratio: ~1.0 ideal");
    println!("{}\n", "=".repeat(70));

    println!("BEST MODEL PER METRIC:");
    println!("{}", "-".repeat(70));
    for best in best_models(rows) {
        let hint = match best.better {
            Better::Higher => "higher is better",
            Better::Lower => "lower is better",
        };
        println!(
            "  {:25}: {:15} ({:.4}) - {}",
            best.metric, best.model, best.value, hint
        );
    }
    println!("{}\n", "=".repeat(70));
}
