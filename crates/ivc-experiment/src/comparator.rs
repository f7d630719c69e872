//! Curve comparator.
//!
//! Scores how different two IV curves are, from 0 (identical) to 1
//! (unrelated). Both curves are resampled onto a common periodic grid first,
//! so curves of different length taken from the same probe period compare
//! point by point and the score is symmetric.
//!
//! Each axis is normalised by the larger of the two curves' peak amplitude
//! and a configured noise floor, so differences well below the floor do not
//! register as signal.

use ivc_core::curve::IvCurve;
use ivc_core::processing::resample_periodic;

/// Number of points both curves are resampled to before comparison.
pub const COMPARISON_POINTS: usize = 100;

/// Voltage noise floor used by [`IvcComparator::default`], in volts.
pub const DEFAULT_MIN_VOLTAGE: f64 = 0.6;
/// Current noise floor used by [`IvcComparator::default`], in amperes.
pub const DEFAULT_MIN_CURRENT: f64 = 0.0002;

/// Normalised dissimilarity score between IV curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvcComparator {
    min_voltage: f64,
    min_current: f64,
}

impl IvcComparator {
    /// Comparator with the given noise floors.
    pub fn new(min_voltage: f64, min_current: f64) -> Self {
        Self {
            min_voltage: min_voltage.max(0.0),
            min_current: min_current.max(0.0),
        }
    }

    /// Reconfigure the noise floors.
    pub fn set_min_ivc(&mut self, min_voltage: f64, min_current: f64) {
        self.min_voltage = min_voltage.max(0.0);
        self.min_current = min_current.max(0.0);
    }

    /// Current `(min_voltage, min_current)` floors.
    pub fn min_ivc(&self) -> (f64, f64) {
        (self.min_voltage, self.min_current)
    }

    /// Dissimilarity of `a` and `b` in `[0, 1]`.
    ///
    /// Two empty curves score 0; an empty curve against a non-empty one
    /// scores 1.
    pub fn compare_ivc(&self, a: &IvCurve, b: &IvCurve) -> f64 {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return 0.0,
            (true, false) | (false, true) => return 1.0,
            (false, false) => {}
        }

        let a = resample_periodic(a, COMPARISON_POINTS);
        let b = resample_periodic(b, COMPARISON_POINTS);

        let v_scale = a.peak_voltage().max(b.peak_voltage()).max(self.min_voltage);
        let i_scale = a.peak_current().max(b.peak_current()).max(self.min_current);

        let sum: f64 = a
            .iter()
            .zip(b.iter())
            .map(|((va, ia), (vb, ib))| {
                let dv = normalized_difference(va, vb, v_scale);
                let di = normalized_difference(ia, ib, i_scale);
                dv * dv + di * di
            })
            .sum();

        (sum / COMPARISON_POINTS as f64).sqrt().min(1.0)
    }
}

impl Default for IvcComparator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VOLTAGE, DEFAULT_MIN_CURRENT)
    }
}

// An axis with zero scale carries no signal on either curve.
fn normalized_difference(x: f64, y: f64, scale: f64) -> f64 {
    if scale > 0.0 {
        (x - y) / scale
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const V_AMPLITUDE: f64 = 12.0;
    const I_AMPLITUDE: f64 = 12.0 / 475.0;

    fn sine_curve(n: usize, v_gain: f64, i_gain: f64, i_phase: f64) -> IvCurve {
        let phase = |k: usize| 2.0 * PI * k as f64 / n as f64;
        let v = (0..n).map(|k| v_gain * V_AMPLITUDE * phase(k).sin()).collect();
        let i = (0..n)
            .map(|k| i_gain * I_AMPLITUDE * (phase(k) + i_phase).sin())
            .collect();
        IvCurve::new(v, i).unwrap()
    }

    #[test]
    fn test_identity_is_near_zero() {
        let cmp = IvcComparator::default();
        let curve = sine_curve(10, 0.5, 0.5, 0.0);
        assert!(cmp.compare_ivc(&curve, &curve) < 0.01);
    }

    #[test]
    fn test_open_vs_short_is_maximal() {
        let cmp = IvcComparator::new(0.0, 0.0);
        let open = sine_curve(10, 1.0, 0.0, 0.0);
        let short = sine_curve(10, 0.0, 1.0, 0.0);
        let score = cmp.compare_ivc(&open, &short);
        assert!((score - 1.0).abs() < 0.01, "score {}", score);
    }

    #[test]
    fn test_close_resistors_score_low() {
        let cmp = IvcComparator::new(0.0, 0.0);
        let r1 = sine_curve(10, 0.5, 0.5, 0.0);
        let r2 = sine_curve(10, 0.47, 0.63, 0.0);
        let score = cmp.compare_ivc(&r1, &r2);
        assert!(score > 0.05 && score < 0.3, "score {}", score);
    }

    #[test]
    fn test_resistor_vs_capacitor_is_high() {
        let cmp = IvcComparator::new(0.0, 0.0);
        let resistor = sine_curve(10, 0.5, 0.5, 0.0);
        let capacitor = sine_curve(10, 1.0, 1.0, PI / 2.0);
        assert!(cmp.compare_ivc(&resistor, &capacitor) > 0.5);
    }

    #[test]
    fn test_symmetric_across_lengths() {
        let cmp = IvcComparator::default();
        let short = sine_curve(20, 0.8, 0.3, 0.4);
        let long = sine_curve(100, 0.8, 0.3, 0.0);
        let ab = cmp.compare_ivc(&short, &long);
        let ba = cmp.compare_ivc(&long, &short);
        assert!((ab - ba).abs() < 0.01, "{} vs {}", ab, ba);
    }

    #[test]
    fn test_noise_below_floor_is_ignored() {
        let cmp = IvcComparator::new(1.0, 1.0);
        let a = IvCurve::new(vec![0.001, -0.001], vec![0.0, 0.0]).unwrap();
        let b = IvCurve::new(vec![-0.001, 0.001], vec![0.0, 0.0]).unwrap();
        assert!(cmp.compare_ivc(&a, &b) < 0.01);
    }

    #[test]
    fn test_empty_curves() {
        let cmp = IvcComparator::default();
        let curve = sine_curve(10, 1.0, 1.0, 0.0);
        assert_eq!(cmp.compare_ivc(&IvCurve::empty(), &IvCurve::empty()), 0.0);
        assert_eq!(cmp.compare_ivc(&IvCurve::empty(), &curve), 1.0);
        assert_eq!(cmp.compare_ivc(&curve, &IvCurve::empty()), 1.0);
    }

    #[test]
    fn test_set_min_ivc() {
        let mut cmp = IvcComparator::default();
        cmp.set_min_ivc(0.1, -1.0);
        assert_eq!(cmp.min_ivc(), (0.1, 0.0));
    }
}
