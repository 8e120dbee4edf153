//! Monotone model fitting
//!
//! Two curve families share one knot-table representation:
//! - isotonic: weighted pool-adjacent-violators over the raw pairs
//! - piecewise monotone: binned-median knots for shape-preserving cubic
//!   interpolation, falling back to isotonic when fewer than three knots exist

use crate::binned::{linspace_edges, BinnedMedianFitter};
use crate::config::{DEFAULT_CLIP_RANGE, DEFAULT_NUM_BINS};
use crate::error::CalibrationError;
use crate::types::{CalibrationModel, Context, ModelKind};
use tracing::{debug, info};

/// Fewest knots that support shape-preserving cubic interpolation
pub const MIN_POINTS_FOR_PIECEWISE: usize = 3;

/// Factory for calibration models
#[derive(Debug, Clone)]
pub struct ModelFitter {
    clip_range: (f64, f64),
    num_bins: usize,
}

impl Default for ModelFitter {
    fn default() -> Self {
        Self {
            clip_range: DEFAULT_CLIP_RANGE,
            num_bins: DEFAULT_NUM_BINS,
        }
    }
}

impl ModelFitter {
    pub fn new(clip_range: (f64, f64), num_bins: usize) -> Self {
        Self {
            clip_range,
            num_bins: num_bins.max(1),
        }
    }

    /// Fit a model of the requested kind
    pub fn fit(
        &self,
        kind: ModelKind,
        x: &[f64],
        y: &[f64],
        context: Context,
    ) -> Result<CalibrationModel, CalibrationError> {
        match kind {
            ModelKind::Isotonic => self.fit_isotonic(x, y, context),
            ModelKind::PiecewiseMonotone => self.fit_piecewise_from_binned(x, y, context),
        }
    }

    /// Fit a non-decreasing isotonic regression and keep one knot per unique x
    pub fn fit_isotonic(
        &self,
        x: &[f64],
        y: &[f64],
        context: Context,
    ) -> Result<CalibrationModel, CalibrationError> {
        let mut points = finite_pairs(x, y, context)?;
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Equal x collapse into one observation weighted by multiplicity
        let mut unique: Vec<(f64, f64, f64)> = Vec::new(); // (x, sum_y, weight)
        for (xi, yi) in points {
            match unique.last_mut() {
                Some(last) if last.0 == xi => {
                    last.1 += yi;
                    last.2 += 1.0;
                }
                _ => unique.push((xi, yi, 1.0)),
            }
        }

        let x_knots: Vec<f64> = unique.iter().map(|u| u.0).collect();
        let means: Vec<f64> = unique.iter().map(|u| u.1 / u.2).collect();
        let weights: Vec<f64> = unique.iter().map(|u| u.2).collect();
        let y_knots = pool_adjacent_violators(&means, &weights);

        debug!(%context, knots = x_knots.len(), "fitted isotonic model");
        self.finish(ModelKind::Isotonic, context, x_knots, y_knots)
    }

    /// Fit piecewise-monotone knots from binned medians over `[min(x), max(x)]`
    pub fn fit_piecewise_from_binned(
        &self,
        x: &[f64],
        y: &[f64],
        context: Context,
    ) -> Result<CalibrationModel, CalibrationError> {
        let points = finite_pairs(x, y, context)?;
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();

        let x_min = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let edges = linspace_edges(x_min, x_max, self.num_bins);

        let (binned_x, binned_y) = BinnedMedianFitter::fit(&xs, &ys, &edges);

        // Medians of adjacent bins can coincide; keep the first
        let mut x_knots: Vec<f64> = Vec::with_capacity(binned_x.len());
        let mut y_knots: Vec<f64> = Vec::with_capacity(binned_y.len());
        let mut order: Vec<usize> = (0..binned_x.len()).collect();
        order.sort_by(|&a, &b| binned_x[a].total_cmp(&binned_x[b]));
        for i in order {
            if x_knots.last().is_some_and(|last| *last == binned_x[i]) {
                continue;
            }
            x_knots.push(binned_x[i]);
            y_knots.push(binned_y[i]);
        }

        if x_knots.len() < MIN_POINTS_FOR_PIECEWISE {
            info!(
                %context,
                knots = x_knots.len(),
                "too few binned knots for piecewise model, falling back to isotonic"
            );
            return self.fit_isotonic(&xs, &ys, context);
        }

        debug!(%context, knots = x_knots.len(), "fitted piecewise-monotone model");
        self.finish(ModelKind::PiecewiseMonotone, context, x_knots, y_knots)
    }

    fn finish(
        &self,
        kind: ModelKind,
        context: Context,
        x_knots: Vec<f64>,
        y_knots: Vec<f64>,
    ) -> Result<CalibrationModel, CalibrationError> {
        let model = CalibrationModel {
            kind,
            context,
            x_knots,
            y_knots,
            clip_lo: self.clip_range.0,
            clip_hi: self.clip_range.1,
        };
        model.validate()?;
        Ok(model)
    }
}

/// Zip `x` and `y`, dropping non-finite pairs; fail when nothing is left
fn finite_pairs(
    x: &[f64],
    y: &[f64],
    context: Context,
) -> Result<Vec<(f64, f64)>, CalibrationError> {
    if x.len() != y.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "{context} fit got {} x values and {} y values",
            x.len(),
            y.len()
        )));
    }

    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();

    if points.is_empty() {
        return Err(CalibrationError::InsufficientData(format!(
            "{context} fit needs at least one finite (x, y) pair"
        )));
    }
    Ok(points)
}

/// Weighted pool-adjacent-violators for a non-decreasing fit.
///
/// `values` must already be ordered by x. Returns one fitted value per input.
pub fn pool_adjacent_violators(values: &[f64], weights: &[f64]) -> Vec<f64> {
    // Each block: (weighted mean, total weight, number of inputs pooled)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());

    for (&value, &weight) in values.iter().zip(weights.iter()) {
        blocks.push((value, weight, 1));
        while blocks.len() > 1 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.0 <= last.0 {
                break;
            }
            let total = prev.1 + last.1;
            let merged = (
                (prev.0 * prev.1 + last.0 * last.1) / total,
                total,
                prev.2 + last.2,
            );
            blocks.pop();
            if let Some(top) = blocks.last_mut() {
                *top = merged;
            }
        }
    }

    blocks
        .into_iter()
        .flat_map(|(mean, _, count)| std::iter::repeat(mean).take(count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pava_already_monotone() {
        let fitted = pool_adjacent_violators(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0]);
        assert_eq!(fitted, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_pava_pools_violators() {
        let fitted = pool_adjacent_violators(&[1.0, 3.0, 2.0, 4.0], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(fitted, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_pava_cascading_merge() {
        let fitted = pool_adjacent_violators(&[5.0, 4.0, 3.0], &[1.0, 1.0, 1.0]);
        assert_eq!(fitted, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_pava_respects_weights() {
        let fitted = pool_adjacent_violators(&[4.0, 1.0], &[3.0, 1.0]);
        assert_eq!(fitted, vec![3.25, 3.25]);
    }

    #[test]
    fn test_isotonic_dedups_x() {
        let fitter = ModelFitter::default();
        let model = fitter
            .fit_isotonic(&[60.0, 50.0, 60.0, 70.0], &[62.0, 49.0, 58.0, 71.0], Context::Rest)
            .unwrap();

        assert_eq!(model.kind, ModelKind::Isotonic);
        assert_eq!(model.x_knots, vec![50.0, 60.0, 70.0]);
        assert_eq!(model.y_knots, vec![49.0, 60.0, 71.0]);
        assert_eq!((model.clip_lo, model.clip_hi), (35.0, 220.0));
    }

    #[test]
    fn test_isotonic_is_non_decreasing() {
        let x = [70.0, 130.0, 71.0, 90.0, 110.0, 100.0];
        let y = [72.0, 128.0, 69.0, 95.0, 100.0, 104.0];
        let model = ModelFitter::default()
            .fit_isotonic(&x, &y, Context::Active)
            .unwrap();

        assert!(model.y_knots.windows(2).all(|w| w[0] <= w[1]));
        assert!(model.x_knots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_piecewise_keeps_linear_knots() {
        let model = ModelFitter::default()
            .fit_piecewise_from_binned(
                &[40.0, 60.0, 80.0, 100.0],
                &[45.0, 65.0, 85.0, 105.0],
                Context::Global,
            )
            .unwrap();

        assert_eq!(model.kind, ModelKind::PiecewiseMonotone);
        assert_eq!(model.x_knots, vec![40.0, 60.0, 80.0, 100.0]);
        assert_eq!(model.y_knots, vec![45.0, 65.0, 85.0, 105.0]);
    }

    #[test]
    fn test_piecewise_falls_back_with_two_knots() {
        let model = ModelFitter::default()
            .fit_piecewise_from_binned(&[50.0, 50.0, 90.0], &[52.0, 54.0, 88.0], Context::Rest)
            .unwrap();

        assert_eq!(model.kind, ModelKind::Isotonic);
        assert_eq!(model.x_knots, vec![50.0, 90.0]);
        assert_eq!(model.y_knots, vec![53.0, 88.0]);
    }

    #[test]
    fn test_piecewise_constant_x_falls_back() {
        let model = ModelFitter::default()
            .fit_piecewise_from_binned(&[75.0; 5], &[70.0, 71.0, 72.0, 73.0, 74.0], Context::Rest)
            .unwrap();

        assert_eq!(model.kind, ModelKind::Isotonic);
        assert_eq!(model.x_knots, vec![75.0]);
        assert_eq!(model.y_knots, vec![72.0]);
    }

    #[test]
    fn test_fit_dispatches_on_kind() {
        let x: Vec<f64> = (0..40).map(|i| 50.0 + i as f64 * 2.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v * 0.9 + 8.0).collect();
        let fitter = ModelFitter::new((40.0, 200.0), 10);

        let piecewise = fitter.fit(ModelKind::PiecewiseMonotone, &x, &y, Context::Active).unwrap();
        assert_eq!(piecewise.kind, ModelKind::PiecewiseMonotone);
        assert_eq!(piecewise.x_knots.len(), 10);
        assert_eq!((piecewise.clip_lo, piecewise.clip_hi), (40.0, 200.0));

        let isotonic = fitter.fit(ModelKind::Isotonic, &x, &y, Context::Active).unwrap();
        assert_eq!(isotonic.x_knots.len(), 40);
    }

    #[test]
    fn test_insufficient_data() {
        let fitter = ModelFitter::default();
        assert!(matches!(
            fitter.fit_isotonic(&[], &[], Context::Rest),
            Err(CalibrationError::InsufficientData(_))
        ));
        assert!(matches!(
            fitter.fit_piecewise_from_binned(&[f64::NAN], &[60.0], Context::Rest),
            Err(CalibrationError::InsufficientData(_))
        ));
        assert!(matches!(
            fitter.fit_isotonic(&[60.0], &[], Context::Rest),
            Err(CalibrationError::InvalidInput(_))
        ));
    }
}
