//! Model application
//!
//! Inputs are clipped to the knot domain before evaluation, so a model never
//! extrapolates past the bpm range it was calibrated on. Isotonic models use
//! linear interpolation between knots; piecewise-monotone models use PCHIP
//! (Fritsch-Carlson) cubic Hermite interpolation and clip their output to the
//! model's physiological bounds.

use crate::error::CalibrationError;
use crate::types::{CalibrationModel, ModelKind};

/// Stateless model evaluator
pub struct ModelPredictor;

impl ModelPredictor {
    /// Apply `model` to every value in `x`
    pub fn predict(model: &CalibrationModel, x: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        model.validate()?;

        match model.kind {
            ModelKind::Isotonic => Ok(x
                .iter()
                .map(|&v| linear_interp(&model.x_knots, &model.y_knots, clip_to_domain(model, v)))
                .collect()),
            ModelKind::PiecewiseMonotone => {
                let slopes = pchip_slopes(&model.x_knots, &model.y_knots);
                Ok(x.iter()
                    .map(|&v| {
                        let y = hermite_eval(
                            &model.x_knots,
                            &model.y_knots,
                            &slopes,
                            clip_to_domain(model, v),
                        );
                        y.clamp(model.clip_lo, model.clip_hi)
                    })
                    .collect())
            }
        }
    }

    /// Apply `model` to a single value
    pub fn predict_one(model: &CalibrationModel, x: f64) -> Result<f64, CalibrationError> {
        let predicted = Self::predict(model, &[x])?;
        predicted.into_iter().next().ok_or_else(|| {
            CalibrationError::InvalidModel(format!("{} model produced no output", model.context))
        })
    }
}

fn clip_to_domain(model: &CalibrationModel, x: f64) -> f64 {
    let lo = model.x_knots[0];
    let hi = model.x_knots[model.x_knots.len() - 1];
    x.clamp(lo, hi)
}

/// Index `i` such that `xs[i] <= x <= xs[i + 1]`; requires `xs.len() >= 2`
fn segment_index(xs: &[f64], x: f64) -> usize {
    let upper = xs.partition_point(|&k| k <= x);
    upper.saturating_sub(1).min(xs.len() - 2)
}

fn linear_interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.len() == 1 {
        return ys[0];
    }
    let i = segment_index(xs, x);
    let t = (x - xs[i]) / (xs[i + 1] - xs[i]);
    ys[i] + t * (ys[i + 1] - ys[i])
}

/// Derivatives at each knot for a shape-preserving cubic Hermite curve.
///
/// Interior knots use the weighted harmonic mean of the neighbouring secant
/// slopes (zero at local extrema); end knots use the one-sided three-point
/// estimate, limited so the curve cannot overshoot.
pub fn pchip_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();

    if n == 2 {
        return vec![delta[0], delta[0]];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        let (m0, m1) = (delta[k - 1], delta[k]);
        if m0 == 0.0 || m1 == 0.0 || m0.signum() != m1.signum() {
            d[k] = 0.0;
        } else {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / m0 + w2 / m1);
        }
    }

    d[0] = edge_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = edge_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// One-sided three-point end derivative with shape limiting
fn edge_slope(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if d.signum() != m0.signum() || m0 == 0.0 {
        0.0
    } else if m0.signum() != m1.signum() && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

/// Evaluate the cubic Hermite curve through the knots at `x` (inside the domain)
fn hermite_eval(xs: &[f64], ys: &[f64], slopes: &[f64], x: f64) -> f64 {
    if xs.len() == 1 {
        return ys[0];
    }
    let i = segment_index(xs, x);
    let h = xs[i + 1] - xs[i];
    let t = (x - xs[i]) / h;
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    h00 * ys[i] + h10 * h * slopes[i] + h01 * ys[i + 1] + h11 * h * slopes[i + 1]
}
