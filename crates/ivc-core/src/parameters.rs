//! Product parameter table.
//!
//! A product exposes a small set of abstract parameters (probe frequency,
//! voltage, sensitivity) and, for each, the discrete options the attached
//! measurer class supports. The table is configuration data: it is loaded
//! with the rest of the configuration and consumed by the parameter
//! searcher, which steps through option indices instead of searching free
//! numeric ranges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Abstract parameter exposed to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterName {
    /// Probe signal frequency (paired with its sampling rate).
    Frequency,
    /// Probe signal amplitude.
    Voltage,
    /// Current-sense range, expressed as internal resistance.
    Sensitivity,
}

/// A probe frequency together with the sampling rate used for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyOption {
    /// Probe signal frequency in Hz.
    pub probe_signal_frequency: f64,
    /// Sampling rate in Hz.
    pub sampling_rate: f64,
}

impl FrequencyOption {
    /// New frequency/sampling-rate pair.
    pub fn new(probe_signal_frequency: f64, sampling_rate: f64) -> Self {
        Self {
            probe_signal_frequency,
            sampling_rate,
        }
    }
}

/// Device value of one option.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Frequency options carry their sampling rate.
    Frequency(FrequencyOption),
    /// Voltage (V) or internal resistance (Ω).
    Scalar(f64),
}

/// One selectable option of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOption {
    /// Stable option identifier.
    pub name: String,
    /// Value pushed to the device.
    pub value: OptionValue,
    /// Display labels keyed by language code.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ParameterOption {
    fn scalar(name: &str, value: f64, label: &str) -> Self {
        Self {
            name: name.to_string(),
            value: OptionValue::Scalar(value),
            labels: BTreeMap::from([("en".to_string(), label.to_string())]),
        }
    }

    fn frequency(name: &str, frequency: f64, sampling_rate: f64, label: &str) -> Self {
        Self {
            name: name.to_string(),
            value: OptionValue::Frequency(FrequencyOption::new(frequency, sampling_rate)),
            labels: BTreeMap::from([("en".to_string(), label.to_string())]),
        }
    }
}

/// A parameter and all of its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementParameter {
    /// Which parameter this is.
    pub name: ParameterName,
    /// Options in display order.
    pub options: Vec<ParameterOption>,
}

/// All parameters of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    /// Parameters of the product.
    pub parameters: Vec<MeasurementParameter>,
}

impl ParameterTable {
    /// Look up a parameter.
    pub fn get(&self, name: ParameterName) -> Option<&MeasurementParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Frequency options of the `Frequency` parameter.
    pub fn frequencies(&self) -> Vec<FrequencyOption> {
        self.values(ParameterName::Frequency)
            .filter_map(|v| match v {
                OptionValue::Frequency(f) => Some(f),
                OptionValue::Scalar(_) => None,
            })
            .collect()
    }

    /// Scalar option values of a `Voltage` or `Sensitivity` parameter.
    pub fn scalars(&self, name: ParameterName) -> Vec<f64> {
        self.values(name)
            .filter_map(|v| match v {
                OptionValue::Scalar(x) => Some(x),
                OptionValue::Frequency(_) => None,
            })
            .collect()
    }

    fn values(&self, name: ParameterName) -> impl Iterator<Item = OptionValue> + '_ {
        self.get(name)
            .into_iter()
            .flat_map(|p| p.options.iter().map(|o| o.value))
    }
}

impl Default for ParameterTable {
    /// Option set of a typical bench IV measurer.
    fn default() -> Self {
        Self {
            parameters: vec![
                MeasurementParameter {
                    name: ParameterName::Frequency,
                    options: vec![
                        ParameterOption::frequency("1hz", 1.0, 100.0, "1 Hz"),
                        ParameterOption::frequency("10hz", 10.0, 1_000.0, "10 Hz"),
                        ParameterOption::frequency("100hz", 100.0, 10_000.0, "100 Hz"),
                        ParameterOption::frequency("1khz", 1_000.0, 100_000.0, "1 kHz"),
                        ParameterOption::frequency("10khz", 10_000.0, 1_000_000.0, "10 kHz"),
                        ParameterOption::frequency("100khz", 100_000.0, 2_000_000.0, "100 kHz"),
                    ],
                },
                MeasurementParameter {
                    name: ParameterName::Voltage,
                    options: vec![
                        ParameterOption::scalar("1.2v", 1.2, "1.2 V"),
                        ParameterOption::scalar("3.3v", 3.3, "3.3 V"),
                        ParameterOption::scalar("5v", 5.0, "5 V"),
                        ParameterOption::scalar("12v", 12.0, "12 V"),
                    ],
                },
                MeasurementParameter {
                    name: ParameterName::Sensitivity,
                    options: vec![
                        ParameterOption::scalar("low", 475.0, "Low"),
                        ParameterOption::scalar("middle", 4_750.0, "Middle"),
                        ParameterOption::scalar("high", 47_500.0, "High"),
                    ],
                },
            ],
        }
    }
}
