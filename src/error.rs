//! Error types for the evaluation pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    /// Missing, unreadable or undecodable audio file
    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Numeric failure inside a single metric (empty or degenerate signal)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Analysis parameters that cannot produce meaningful metrics
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Speaker encoder could not be initialised
    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MetricsError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MetricsError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        MetricsError::Computation(msg.into())
    }
}

pub type MetricsResult<T> = Result<T, MetricsError>;
