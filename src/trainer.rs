//! Contextual training orchestration
//!
//! Pipeline stages:
//! 1. PairBuilder - resample, join and annotate scan/reference bins
//! 2. Context split - rest (asleep) and active (sport or awake) partitions
//! 3. ModelFitter - one model per context with enough pairs, else one global model
//! 4. ModelSet - per-record model selection and prediction
//! 5. MetricsCalculator - per-context and overall zone metrics

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::fitter::ModelFitter;
use crate::metrics::{MetricsCalculator, Residual};
use crate::pairs::PairBuilder;
use crate::predictor::ModelPredictor;
use crate::source::ReferenceSource;
use crate::types::{
    BinContext, CalibratedRecord, CalibrationModel, CalibrationSummary, Context, ContextReport,
    ModelKind, OverallReport, PairedRecord, ResampledPoint, ScanPrediction, ScanRecord,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Output of a training run: the calibrated dataset and its summary
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub records: Vec<CalibratedRecord>,
    pub summary: CalibrationSummary,
}

/// Pick the context whose model should calibrate a bin.
///
/// Priority: rest for sleeping bins, then active, then rest, then global.
/// Returns None when no usable model exists.
pub fn select_context(
    sleep_status: u32,
    available: &BTreeMap<Context, CalibrationModel>,
) -> Option<Context> {
    let has = |context: Context| available.contains_key(&context);

    if sleep_status > 0 && has(Context::Rest) {
        Some(Context::Rest)
    } else if has(Context::Active) {
        Some(Context::Active)
    } else if has(Context::Rest) {
        Some(Context::Rest)
    } else if has(Context::Global) {
        Some(Context::Global)
    } else {
        None
    }
}

/// Split pairs into rest and active partitions.
///
/// A bin that is both asleep and flagged active lands in both partitions.
pub fn split_by_context(pairs: &[PairedRecord]) -> (Vec<&PairedRecord>, Vec<&PairedRecord>) {
    let rest = pairs.iter().filter(|p| p.sleep_status > 0).collect();
    let active = pairs
        .iter()
        .filter(|p| p.is_active || p.sleep_status == 0)
        .collect();
    (rest, active)
}

/// A set of fitted models addressable by context
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    models: BTreeMap<Context, CalibrationModel>,
}

impl ModelSet {
    pub fn new(models: BTreeMap<Context, CalibrationModel>) -> Self {
        Self { models }
    }

    /// Models chosen by a previous training run
    pub fn from_summary(summary: &CalibrationSummary) -> Self {
        Self::new(summary.chosen_models.clone())
    }

    pub fn models(&self) -> &BTreeMap<Context, CalibrationModel> {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, context: Context) -> Option<&CalibrationModel> {
        self.models.get(&context)
    }

    /// Calibrate resampled scan bins that have no reference pairing.
    ///
    /// `contexts` runs parallel to `points`. With `forced` set every bin uses
    /// that context's model, otherwise the usual selection applies.
    pub fn calibrate_scan(
        &self,
        points: &[ResampledPoint],
        contexts: &[BinContext],
        forced: Option<Context>,
    ) -> Result<Vec<ScanPrediction>, CalibrationError> {
        if points.len() != contexts.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} scan bins but {} context labels",
                points.len(),
                contexts.len()
            )));
        }

        let covered: Vec<(&ResampledPoint, BinContext, f64)> = points
            .iter()
            .zip(contexts.iter().copied())
            .filter_map(|(point, context)| point.scan_bpm.map(|bpm| (point, context, bpm)))
            .collect();

        let predictions: Vec<(f64, Context)> = match forced {
            Some(context) => {
                let model = self.get(context).ok_or_else(|| {
                    CalibrationError::NoSuitableModel(format!("model set has no {context} model"))
                })?;
                let xs: Vec<f64> = covered.iter().map(|(_, _, bpm)| *bpm).collect();
                ModelPredictor::predict(model, &xs)?
                    .into_iter()
                    .map(|y| (y, context))
                    .collect()
            }
            None => {
                let inputs: Vec<(f64, u32)> = covered
                    .iter()
                    .map(|(_, context, bpm)| (*bpm, context.sleep_status))
                    .collect();
                self.apply(&inputs)?
            }
        };

        Ok(covered
            .into_iter()
            .zip(predictions)
            .map(|((point, bin, scan_bpm), (predicted_bpm, context))| ScanPrediction {
                window_start: point.window_start,
                scan_bpm,
                coverage_s: point.coverage_s,
                sleep_status: bin.sleep_status,
                is_active: bin.is_active,
                predicted_bpm,
                context,
            })
            .collect())
    }

    /// Calibrate `(scan_bpm, sleep_status)` inputs, returning the prediction
    /// and the context used for each.
    pub fn apply(&self, inputs: &[(f64, u32)]) -> Result<Vec<(f64, Context)>, CalibrationError> {
        let mut chosen: Vec<Context> = Vec::with_capacity(inputs.len());
        for (index, &(_, sleep_status)) in inputs.iter().enumerate() {
            let context = select_context(sleep_status, &self.models).ok_or_else(|| {
                CalibrationError::NoSuitableModel(format!(
                    "record {index} (sleep_status {sleep_status}) has no rest, active or global model"
                ))
            })?;
            chosen.push(context);
        }

        let mut output = vec![0.0; inputs.len()];
        for (context, model) in &self.models {
            let indices: Vec<usize> = (0..inputs.len()).filter(|&i| chosen[i] == *context).collect();
            if indices.is_empty() {
                continue;
            }
            let xs: Vec<f64> = indices.iter().map(|&i| inputs[i].0).collect();
            let ys = ModelPredictor::predict(model, &xs)?;
            for (i, y) in indices.into_iter().zip(ys) {
                output[i] = y;
            }
        }

        Ok(output.into_iter().zip(chosen).collect())
    }
}

/// Trains per-context calibration models and applies them
#[derive(Debug, Clone)]
pub struct ContextualTrainer {
    config: CalibrationConfig,
    fitter: ModelFitter,
}

impl Default for ContextualTrainer {
    fn default() -> Self {
        let config = CalibrationConfig::default();
        let fitter = ModelFitter::new(config.clip_range(), config.num_bins);
        Self { config, fitter }
    }
}

impl ContextualTrainer {
    /// Create a trainer for a validated configuration
    pub fn new(config: CalibrationConfig) -> Result<Self, CalibrationError> {
        config.validate()?;
        let fitter = ModelFitter::new(config.clip_range(), config.num_bins);
        Ok(Self { config, fitter })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Build pairs from raw inputs, then train and apply
    pub fn train_and_apply(
        &self,
        scan: &[ScanRecord],
        reference: &dyn ReferenceSource,
    ) -> Result<CalibrationRun, CalibrationError> {
        let pairs = PairBuilder::from_config(&self.config).build(scan, reference)?;
        self.train_on_pairs(&pairs)
    }

    /// Train context models on an existing paired dataset and apply them
    pub fn train_on_pairs(&self, pairs: &[PairedRecord]) -> Result<CalibrationRun, CalibrationError> {
        if pairs.is_empty() {
            return Err(CalibrationError::NoData(
                "no paired bins to train on".to_string(),
            ));
        }

        let (rest, active) = split_by_context(pairs);
        let mut models: BTreeMap<Context, CalibrationModel> = BTreeMap::new();
        let mut contexts: BTreeMap<Context, ContextReport> = BTreeMap::new();

        for (context, partition) in [(Context::Rest, &rest), (Context::Active, &active)] {
            if partition.len() < self.config.min_samples_per_context {
                warn!(
                    %context,
                    n = partition.len(),
                    required = self.config.min_samples_per_context,
                    "not enough pairs for a context model"
                );
                continue;
            }
            let report = self.train_context(context, self.config.model_kind, partition)?;
            models.insert(context, report.model.clone());
            contexts.insert(context, report);
        }

        if models.is_empty() {
            info!(n = pairs.len(), "no context met the sample minimum, training a global model");
            let all: Vec<&PairedRecord> = pairs.iter().collect();
            // Global fallback is always piecewise; it drops to isotonic below three knots
            let report = self.train_context(Context::Global, ModelKind::PiecewiseMonotone, &all)?;
            models.insert(Context::Global, report.model.clone());
            contexts.insert(Context::Global, report);
        }

        let model_set = ModelSet::new(models);
        let inputs: Vec<(f64, u32)> = pairs.iter().map(|p| (p.scan_bpm, p.sleep_status)).collect();
        let predictions = model_set.apply(&inputs)?;

        let records: Vec<CalibratedRecord> = pairs
            .iter()
            .zip(predictions)
            .map(|(pair, (predicted, context))| CalibratedRecord::from_pair(pair, predicted, context))
            .collect();

        let overall = OverallReport {
            metrics: MetricsCalculator::evaluate(records.iter().map(|r| Residual {
                scan_bpm: r.scan_bpm,
                reference_bpm: r.reference_bpm,
                predicted_bpm: r.predicted_bpm,
            })),
            n: records.len(),
        };

        info!(
            models = ?model_set.models().keys().collect::<Vec<_>>(),
            n = records.len(),
            "calibration run complete"
        );

        Ok(CalibrationRun {
            records,
            summary: CalibrationSummary {
                chosen_models: model_set.models().clone(),
                contexts,
                overall,
            },
        })
    }

    /// Fit one context's model and score it on its own partition
    fn train_context(
        &self,
        context: Context,
        kind: ModelKind,
        partition: &[&PairedRecord],
    ) -> Result<ContextReport, CalibrationError> {
        let x: Vec<f64> = partition.iter().map(|p| p.scan_bpm).collect();
        let y: Vec<f64> = partition.iter().map(|p| p.reference_bpm).collect();

        let model = self.fitter.fit(kind, &x, &y, context)?;
        let predicted = ModelPredictor::predict(&model, &x)?;

        let metrics = MetricsCalculator::evaluate(
            partition
                .iter()
                .zip(predicted.iter())
                .map(|(p, &predicted_bpm)| Residual {
                    scan_bpm: p.scan_bpm,
                    reference_bpm: p.reference_bpm,
                    predicted_bpm,
                }),
        );

        info!(
            %context,
            kind = %model.kind,
            n = partition.len(),
            knots = model.x_knots.len(),
            "trained context model"
        );

        Ok(ContextReport {
            metrics,
            n: partition.len(),
            model,
        })
    }
}
