//! IV curves, measurement settings and measurement records.
//!
//! An [`IvCurve`] is the unit every instrument produces: paired voltage and
//! current samples, where index `i` of both sequences is one simultaneous
//! sample. A [`Measurement`] couples a curve with the [`MeasurementSettings`]
//! that produced it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IvcError, Result};

/// Floating tolerance used when comparing resistance and voltage settings.
pub const SETTINGS_TOLERANCE: f64 = 0.01;

// =============================================================================
// IvCurve
// =============================================================================

/// One sample of a curve, as stored in the board document `iv_array`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvPoint {
    /// Current in amperes.
    pub current: f64,
    /// Voltage in volts.
    pub voltage: f64,
}

/// Paired voltage/current samples.
///
/// The two sequences always have the same length; construction with
/// mismatched lengths fails with [`IvcError::LengthMismatch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<IvPoint>", into = "Vec<IvPoint>")]
pub struct IvCurve {
    voltages: Vec<f64>,
    currents: Vec<f64>,
}

impl IvCurve {
    /// Build a curve from voltage and current samples.
    pub fn new(voltages: Vec<f64>, currents: Vec<f64>) -> Result<Self> {
        if voltages.len() != currents.len() {
            return Err(IvcError::LengthMismatch {
                voltages: voltages.len(),
                currents: currents.len(),
            });
        }
        Ok(Self { voltages, currents })
    }

    /// Curve with no samples.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Voltage samples in volts.
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    /// Current samples in amperes.
    pub fn currents(&self) -> &[f64] {
        &self.currents
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    /// True when the curve holds no samples.
    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    /// Iterate over `(voltage, current)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.voltages
            .iter()
            .copied()
            .zip(self.currents.iter().copied())
    }

    /// Split the curve back into its voltage and current sequences.
    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.voltages, self.currents)
    }

    /// Largest absolute voltage sample, 0 for an empty curve.
    pub fn peak_voltage(&self) -> f64 {
        self.voltages.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Largest absolute current sample, 0 for an empty curve.
    pub fn peak_current(&self) -> f64 {
        self.currents.iter().fold(0.0, |acc, c| acc.max(c.abs()))
    }

    /// Mean absolute voltage, 0 for an empty curve.
    pub fn mean_abs_voltage(&self) -> f64 {
        mean_abs(&self.voltages)
    }

    /// Mean absolute current, 0 for an empty curve.
    pub fn mean_abs_current(&self) -> f64 {
        mean_abs(&self.currents)
    }

    /// Area enclosed by the V/I loop (shoelace formula over the closed polygon).
    pub fn loop_area(&self) -> f64 {
        let n = self.len();
        if n < 3 {
            return 0.0;
        }
        let twice_area: f64 = (0..n)
            .map(|k| {
                let next = (k + 1) % n;
                self.voltages[k] * self.currents[next] - self.voltages[next] * self.currents[k]
            })
            .sum();
        twice_area.abs() / 2.0
    }
}

fn mean_abs(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
}

impl From<IvCurve> for Vec<IvPoint> {
    fn from(curve: IvCurve) -> Self {
        curve
            .iter()
            .map(|(voltage, current)| IvPoint { current, voltage })
            .collect()
    }
}

impl TryFrom<Vec<IvPoint>> for IvCurve {
    type Error = IvcError;

    fn try_from(points: Vec<IvPoint>) -> Result<Self> {
        let (voltages, currents) = points.iter().map(|p| (p.voltage, p.current)).unzip();
        IvCurve::new(voltages, currents)
    }
}

// =============================================================================
// MeasurementSettings
// =============================================================================

/// Instrument configuration that produced (or will produce) a curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSettings {
    /// ADC sampling rate in Hz.
    pub sampling_rate: f64,
    /// Internal (current-sense) resistance in ohms.
    pub internal_resistance: f64,
    /// Probe signal amplitude in volts.
    pub max_voltage: f64,
    /// Probe signal frequency in Hz.
    pub probe_signal_frequency: f64,
    /// Delay before the probe signal starts, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precharge_delay: Option<f64>,
}

impl MeasurementSettings {
    /// Settings without a precharge delay.
    pub fn new(
        sampling_rate: f64,
        internal_resistance: f64,
        max_voltage: f64,
        probe_signal_frequency: f64,
    ) -> Self {
        Self {
            sampling_rate,
            internal_resistance,
            max_voltage,
            probe_signal_frequency,
            precharge_delay: None,
        }
    }

    /// Compare settings the way the measurement system does.
    ///
    /// Sampling rate and probe frequency must match exactly; resistance,
    /// voltage and precharge delay match within [`SETTINGS_TOLERANCE`].
    pub fn approx_eq(&self, other: &Self) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= SETTINGS_TOLERANCE;
        let precharge = match (self.precharge_delay, other.precharge_delay) {
            (None, None) => true,
            (Some(a), Some(b)) => close(a, b),
            _ => false,
        };
        self.sampling_rate == other.sampling_rate
            && self.probe_signal_frequency == other.probe_signal_frequency
            && close(self.internal_resistance, other.internal_resistance)
            && close(self.max_voltage, other.max_voltage)
            && precharge
    }

    /// Current through the sense resistor at full probe amplitude.
    pub fn max_current(&self) -> f64 {
        if self.internal_resistance > 0.0 {
            self.max_voltage / self.internal_resistance
        } else {
            0.0
        }
    }
}

// =============================================================================
// Measurement
// =============================================================================

/// A curve plus the settings that produced it, tagged reference or test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Settings active during the acquisition.
    #[serde(rename = "measurement_settings")]
    pub settings: MeasurementSettings,
    /// The acquired curve.
    #[serde(rename = "iv_array")]
    pub ivc: IvCurve,
    /// Free-form operator comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// True for a reference (known-good) curve.
    #[serde(default)]
    pub is_reference: bool,
    /// Marks curves recorded in continuous mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dynamic: Option<bool>,
    /// Keys this crate does not interpret, kept for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Measurement {
    /// New measurement record.
    pub fn new(settings: MeasurementSettings, ivc: IvCurve, is_reference: bool) -> Self {
        Self {
            settings,
            ivc,
            comment: None,
            is_reference,
            is_dynamic: None,
            extra: Map::new(),
        }
    }
}
