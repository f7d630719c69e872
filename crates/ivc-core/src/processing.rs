//! Curve post-processing: interpolation, smoothing and periodic resampling.

use crate::curve::IvCurve;
use crate::error::{IvcError, Result};

/// Linearly interpolate a curve to `num_points` samples spanning the same
/// first-to-last sample range.
pub fn interpolate_curve(curve: &IvCurve, num_points: usize) -> IvCurve {
    let voltages = interpolate_linear(curve.voltages(), num_points);
    let currents = interpolate_linear(curve.currents(), num_points);
    from_equal_parts(voltages, currents)
}

/// Resample a curve that spans exactly one probe period to `num_points`
/// samples, treating the sequence as periodic (sample `len` wraps to 0).
///
/// Curves of different length sampled from the same periodic signal land on
/// the same phase grid, which is what makes them comparable point by point.
pub fn resample_periodic(curve: &IvCurve, num_points: usize) -> IvCurve {
    let voltages = interpolate_periodic(curve.voltages(), num_points);
    let currents = interpolate_periodic(curve.currents(), num_points);
    from_equal_parts(voltages, currents)
}

/// Moving-average smoothing with wrap-around at the ends.
///
/// `kernel_size` must be odd so the window is centred on each sample.
pub fn smooth_curve(curve: &IvCurve, kernel_size: usize) -> Result<IvCurve> {
    if kernel_size % 2 == 0 {
        return Err(IvcError::InvalidSettings(format!(
            "smoothing kernel size must be odd, got {kernel_size}"
        )));
    }
    let voltages = moving_average_circular(curve.voltages(), kernel_size);
    let currents = moving_average_circular(curve.currents(), kernel_size);
    Ok(from_equal_parts(voltages, currents))
}

// Both inputs are derived from one curve with the same transform, so the
// lengths always agree.
fn from_equal_parts(voltages: Vec<f64>, currents: Vec<f64>) -> IvCurve {
    IvCurve::new(voltages, currents).unwrap_or_default()
}

fn interpolate_linear(samples: &[f64], num_points: usize) -> Vec<f64> {
    match (samples.len(), num_points) {
        (0, _) | (_, 0) => Vec::new(),
        (1, n) => vec![samples[0]; n],
        (_, 1) => vec![samples[0]],
        (len, n) => {
            let step = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|k| {
                    let position = k as f64 * step;
                    let lower = (position.floor() as usize).min(len - 1);
                    let upper = (lower + 1).min(len - 1);
                    let t = position - lower as f64;
                    samples[lower] + t * (samples[upper] - samples[lower])
                })
                .collect()
        }
    }
}

fn interpolate_periodic(samples: &[f64], num_points: usize) -> Vec<f64> {
    let len = samples.len();
    if len == 0 || num_points == 0 {
        return Vec::new();
    }
    let step = len as f64 / num_points as f64;
    (0..num_points)
        .map(|k| {
            let position = k as f64 * step;
            let lower = (position.floor() as usize) % len;
            let upper = (lower + 1) % len;
            let t = position - position.floor();
            samples[lower] + t * (samples[upper] - samples[lower])
        })
        .collect()
}

fn moving_average_circular(samples: &[f64], kernel_size: usize) -> Vec<f64> {
    let len = samples.len();
    if len == 0 {
        return Vec::new();
    }
    let half = (kernel_size / 2) as isize;
    let n = len as isize;
    (0..n)
        .map(|i| {
            let sum: f64 = (-half..=half)
                .map(|offset| samples[(i + offset).rem_euclid(n) as usize])
                .sum();
            sum / kernel_size as f64
        })
        .collect()
}
