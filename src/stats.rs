//! Pure summary statistics over sorted, non-missing column values.

use serde::Serialize;

pub const HISTOGRAM_BINS: usize = 10;

const WHISKER_IQR_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxPlot {
    pub whisker_min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub whisker_max: f64,
}

/// Largest magnitude in `values`, used to keep sums of extreme values finite.
fn magnitude(values: &[f64]) -> f64 {
    let largest = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if largest > 0.0 && largest.is_finite() {
        largest
    } else {
        1.0
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let scale = magnitude(values);
    values.iter().map(|v| v / scale).sum::<f64>() / values.len() as f64 * scale
}

/// Population standard deviation; 0 with fewer than two values.
///
/// Welford's update over values scaled into `[-1, 1]`.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let scale = magnitude(values);
    let mut running_mean = 0.0;
    let mut squares = 0.0;
    for (index, value) in values.iter().enumerate() {
        let x = value / scale;
        let delta = x - running_mean;
        running_mean += delta / (index + 1) as f64;
        squares += delta * (x - running_mean);
    }
    (squares / values.len() as f64).max(0.0).sqrt() * scale
}

/// Linear-interpolation quantile of `sorted` at `p` in `[0, 1]`.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            let (low, high) = (sorted[lower], sorted[upper]);
            if fraction == 0.0 {
                return low;
            }
            let spread = high - low;
            if spread.is_finite() {
                low + spread * fraction
            } else {
                low * (1.0 - fraction) + high * fraction
            }
        }
    }
}

/// Equal-width histogram spanning `[min, max]` with the last bin closed.
///
/// A constant column collapses to a single bin holding every value.
pub fn histogram(sorted: &[f64], bins: usize) -> Histogram {
    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => {
            return Histogram {
                edges: Vec::new(),
                counts: Vec::new(),
            }
        }
    };

    if min == max || bins <= 1 {
        return Histogram {
            edges: vec![min, max],
            counts: vec![sorted.len() as u64],
        };
    }

    // Divided before subtracting so `max - min` cannot overflow.
    let width = max / bins as f64 - min / bins as f64;
    if width <= 0.0 || !width.is_finite() {
        return Histogram {
            edges: vec![min, max],
            counts: vec![sorted.len() as u64],
        };
    }
    let mut edges: Vec<f64> = (0..bins).map(|i| min + width * i as f64).collect();
    edges.push(max);

    // Halving is exact, so this is `(value - min) / width` without the overflow.
    let half_width = width / 2.0;
    let mut counts = vec![0u64; bins];
    for value in sorted {
        let position = (value / 2.0 - min / 2.0) / half_width;
        let bin = (position.floor() as usize).min(bins - 1);
        counts[bin] += 1;
    }

    Histogram { edges, counts }
}

pub fn boxplot(sorted: &[f64]) -> BoxPlot {
    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => {
            return BoxPlot {
                whisker_min: 0.0,
                q1: 0.0,
                median: 0.0,
                q3: 0.0,
                whisker_max: 0.0,
            }
        }
    };

    let q1 = quantile(sorted, 0.25);
    let median = quantile(sorted, 0.5);
    let q3 = quantile(sorted, 0.75);
    let iqr = q3 - q1;

    BoxPlot {
        whisker_min: (q1 - WHISKER_IQR_FACTOR * iqr).max(min),
        q1,
        median,
        q3,
        whisker_max: (q3 + WHISKER_IQR_FACTOR * iqr).min(max),
    }
}

/// Values strictly outside the whiskers: the column's outlier candidates.
pub fn outlier_count(sorted: &[f64], boxplot: &BoxPlot) -> u64 {
    sorted
        .iter()
        .filter(|v| **v < boxplot.whisker_min || **v > boxplot.whisker_max)
        .count() as u64
}
