//! voxbench: objective metrics for comparing voice-cloning TTS outputs.
//!
//! The core is [`metrics::MetricsEvaluator`]; [`compare`] drives it over several
//! model outputs and [`backends`] produces those outputs from third-party models.

pub mod audio;
pub mod backends;
pub mod compare;
pub mod config_loader;
pub mod dsp;
pub mod error;
pub mod metrics;
pub mod pitch;
pub mod speaker;

pub use audio::Waveform;
pub use error::{MetricsError, MetricsResult};
pub use metrics::{EvaluatorConfig, MetricResult, MetricsEvaluator};
