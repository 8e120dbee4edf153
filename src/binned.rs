//! Binned median reduction
//!
//! Reduces a scatter of (x, y) pairs to one (median x, median y) knot per
//! non-empty x bin. Medians keep single outlier minutes from dragging a knot.

/// Fitter producing binned-median knots
pub struct BinnedMedianFitter;

impl BinnedMedianFitter {
    /// Group `x`/`y` into the bins delimited by `edges` and return the median
    /// of each non-empty bin, in bin order.
    ///
    /// Bins are `[edges[i], edges[i + 1])`, except the last which also
    /// includes its right edge. Points outside the edges or with non-finite
    /// coordinates are ignored.
    pub fn fit(x: &[f64], y: &[f64], edges: &[f64]) -> (Vec<f64>, Vec<f64>) {
        if edges.len() < 2 {
            return (Vec::new(), Vec::new());
        }
        let bin_count = edges.len() - 1;
        let mut groups: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); bin_count];

        for (&xi, &yi) in x.iter().zip(y.iter()) {
            if !xi.is_finite() || !yi.is_finite() {
                continue;
            }
            if let Some(bin) = bin_index(xi, edges) {
                groups[bin].0.push(xi);
                groups[bin].1.push(yi);
            }
        }

        groups
            .into_iter()
            .filter(|(xs, _)| !xs.is_empty())
            .map(|(mut xs, mut ys)| (median(&mut xs), median(&mut ys)))
            .unzip()
    }
}

/// `count + 1` equally spaced edges spanning `[lo, hi]`
pub fn linspace_edges(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    let count = count.max(1);
    let width = (hi - lo) / count as f64;
    (0..=count)
        .map(|i| if i == count { hi } else { lo + width * i as f64 })
        .collect()
}

fn bin_index(value: f64, edges: &[f64]) -> Option<usize> {
    let last = edges.len() - 1;
    if value < edges[0] || value > edges[last] {
        return None;
    }
    if value == edges[last] {
        return Some(last - 1);
    }
    // First edge strictly greater than value closes the bin
    let upper = edges.partition_point(|&edge| edge <= value);
    Some(upper.saturating_sub(1).min(last - 1))
}

/// Median of a non-empty slice (mean of the middle two for even lengths)
pub(crate) fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
