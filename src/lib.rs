//! Pulse Calib - Contextual heart-rate calibration against a reference device
//!
//! Pulse Calib learns how a wrist scan device's heart-rate readings relate to
//! a trusted reference device through a deterministic pipeline: overlap
//! resampling → reference pairing → context annotation → monotone model
//! fitting → per-context prediction and zone metrics.
//!
//! ## Modules
//!
//! - **Pairing**: resample scan segments onto time bins and join them with
//!   reference aggregates, labelled with sleep and activity context
//! - **Modelling**: isotonic and piecewise-monotone (PCHIP) calibration curves
//! - **Training**: per-context models with a global fallback, plus metrics

pub mod annotator;
pub mod binned;
pub mod config;
pub mod error;
pub mod export;
pub mod fitter;
pub mod metrics;
pub mod pairs;
pub mod predictor;
pub mod resampler;
pub mod source;
pub mod time;
pub mod trainer;
pub mod types;

pub use config::CalibrationConfig;
pub use error::CalibrationError;
pub use pairs::PairBuilder;
pub use source::{InMemoryReference, JsonReference, ReferenceSource};
pub use time::BinSize;
pub use trainer::{select_context, CalibrationRun, ContextualTrainer, ModelSet};
pub use types::{
    CalibratedRecord, CalibrationModel, CalibrationSummary, Context, ModelKind, PairedRecord,
    ScanRecord,
};

/// Crate version recorded in exported summaries and CLI output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported artifacts
pub const PRODUCER_NAME: &str = "pulse-calib";
