//! Board / Element / Pin tree and its JSON document form.
//!
//! ```text
//! Board
//!   └─ Element (component)
//!        └─ Pin (test point)
//!             ├─ reference Measurement (at most one)
//!             └─ test Measurements (chronological)
//! ```
//!
//! Lower levels never reference upper levels. Every level keeps JSON keys it
//! does not understand in a flattened `extra` map, so loading and saving a
//! document leaves foreign fields untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::curve::Measurement;
use crate::error::{IvcError, Result};

/// Lowest channel number inside one multiplexer module.
pub const MIN_CHANNEL_NUMBER: usize = 1;
/// Highest channel number inside one multiplexer module.
pub const MAX_CHANNEL_NUMBER: usize = 64;

/// Multiplexer address of a pin: 1-based module and channel numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiplexerOutput {
    /// Module position in the chain, starting at 1.
    pub module_number: usize,
    /// Channel inside the module, `1..=64`.
    pub channel_number: usize,
}

impl MultiplexerOutput {
    /// New address.
    pub fn new(module_number: usize, channel_number: usize) -> Self {
        Self {
            module_number,
            channel_number,
        }
    }
}

impl std::fmt::Display for MultiplexerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module_number, self.channel_number)
    }
}

// =============================================================================
// Pin
// =============================================================================

/// One electrical test point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PinRecord", into = "PinRecord")]
pub struct Pin {
    /// Horizontal position on the board image.
    pub x: f64,
    /// Vertical position on the board image.
    pub y: f64,
    /// Operator comment.
    pub comment: Option<String>,
    /// Address used to route this pin through a multiplexer.
    pub multiplexer_output: Option<MultiplexerOutput>,
    reference: Option<Measurement>,
    tests: Vec<Measurement>,
    /// Keys this crate does not interpret.
    pub extra: Map<String, Value>,
}

impl Pin {
    /// Pin at the given position with no measurements.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            comment: None,
            multiplexer_output: None,
            reference: None,
            tests: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Builder-style multiplexer address.
    pub fn with_multiplexer_output(mut self, output: MultiplexerOutput) -> Self {
        self.multiplexer_output = Some(output);
        self
    }

    /// The reference measurement, if one was recorded.
    pub fn reference(&self) -> Option<&Measurement> {
        self.reference.as_ref()
    }

    /// Test measurements in chronological order.
    pub fn tests(&self) -> &[Measurement] {
        &self.tests
    }

    /// Most recent test measurement.
    pub fn last_test(&self) -> Option<&Measurement> {
        self.tests.last()
    }

    /// All measurements: the reference first, then the tests.
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.reference.iter().chain(self.tests.iter())
    }

    /// Replace the reference measurement.
    pub fn set_reference(&mut self, mut measurement: Measurement) {
        measurement.is_reference = true;
        self.reference = Some(measurement);
    }

    /// Append a test measurement.
    pub fn add_test(&mut self, mut measurement: Measurement) {
        measurement.is_reference = false;
        self.tests.push(measurement);
    }

    /// Drop every measurement attached to the pin.
    pub fn clear_measurements(&mut self) {
        self.reference = None;
        self.tests.clear();
    }
}

/// Document form of a pin: measurements as one `iv_curves` list.
#[derive(Serialize, Deserialize)]
struct PinRecord {
    x: f64,
    y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multiplexer_output: Option<MultiplexerOutput>,
    #[serde(default)]
    iv_curves: Vec<Measurement>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<PinRecord> for Pin {
    type Error = IvcError;

    fn try_from(record: PinRecord) -> Result<Self> {
        let (references, tests): (Vec<_>, Vec<_>) =
            record.iv_curves.into_iter().partition(|m| m.is_reference);
        if references.len() > 1 {
            return Err(IvcError::InvalidBoard(format!(
                "pin at ({}, {}) has {} reference measurements",
                record.x,
                record.y,
                references.len()
            )));
        }
        Ok(Pin {
            x: record.x,
            y: record.y,
            comment: record.comment,
            multiplexer_output: record.multiplexer_output,
            reference: references.into_iter().next(),
            tests,
            extra: record.extra,
        })
    }
}

impl From<Pin> for PinRecord {
    fn from(pin: Pin) -> Self {
        let iv_curves = pin.reference.into_iter().chain(pin.tests).collect();
        PinRecord {
            x: pin.x,
            y: pin.y,
            comment: pin.comment,
            multiplexer_output: pin.multiplexer_output,
            iv_curves,
            extra: pin.extra,
        }
    }
}

// =============================================================================
// Element / Board
// =============================================================================

/// A component: a named group of pins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Reference designator or part name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Pins of the component.
    #[serde(default)]
    pub pins: Vec<Pin>,
    /// Keys this crate does not interpret (center, bounding zone, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    /// Unnamed element holding the given pins.
    pub fn with_pins(pins: Vec<Pin>) -> Self {
        Self {
            pins,
            ..Default::default()
        }
    }
}

/// PCB-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PcbInfo {
    /// Board name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_name: Option<String>,
    /// Image resolution, pixels per centimetre.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_resolution_ppcm: Option<f64>,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Root aggregate of a board document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    /// Components in document order.
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Document format version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Path of the board image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// PCB metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb: Option<PcbInfo>,
    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Board {
    /// Board holding the given elements.
    pub fn with_elements(elements: Vec<Element>) -> Self {
        Self {
            elements,
            ..Default::default()
        }
    }

    /// All pins across elements, in traversal order.
    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.elements.iter().flat_map(|e| e.pins.iter())
    }

    /// Parse a board document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to a pretty-printed board document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a board document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Write the board document to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{IvCurve, MeasurementSettings};

    fn measurement(is_reference: bool) -> Measurement {
        let curve = IvCurve::new(vec![0.0, 1.0], vec![0.0, 0.001]).unwrap();
        Measurement::new(
            MeasurementSettings::new(10_000.0, 475.0, 5.0, 100.0),
            curve,
            is_reference,
        )
    }

    #[test]
    fn test_reference_replaced_tests_appended() {
        let mut pin = Pin::new(1.0, 2.0);
        pin.set_reference(measurement(false));
        pin.set_reference(measurement(false));
        pin.add_test(measurement(true));
        pin.add_test(measurement(false));

        assert!(pin.reference().unwrap().is_reference);
        assert_eq!(pin.tests().len(), 2);
        assert!(pin.tests().iter().all(|m| !m.is_reference));
        assert_eq!(pin.measurements().count(), 3);
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let json = r#"{
            "version": "1.1.0",
            "format": "ufiv",
            "elements": [{
                "name": "R1",
                "rotation": 90.0,
                "pins": [{
                    "x": 1.0, "y": 2.0,
                    "comment": "gnd",
                    "multiplexer_output": {"module_number": 1, "channel_number": 5},
                    "cluster_id": 7,
                    "iv_curves": [{
                        "measurement_settings": {
                            "sampling_rate": 10000.0, "internal_resistance": 475.0,
                            "max_voltage": 5.0, "probe_signal_frequency": 100.0
                        },
                        "iv_array": [{"voltage": 1.0, "current": 0.002}],
                        "is_reference": true,
                        "scale": 3
                    }]
                }]
            }]
        }"#;

        let board = Board::from_json(json).unwrap();
        let pin = &board.elements[0].pins[0];
        assert_eq!(pin.multiplexer_output, Some(MultiplexerOutput::new(1, 5)));
        assert!(pin.reference().is_some());

        let out: Value = serde_json::from_str(&board.to_json().unwrap()).unwrap();
        assert_eq!(out["format"], "ufiv");
        assert_eq!(out["elements"][0]["rotation"], 90.0);
        assert_eq!(out["elements"][0]["pins"][0]["cluster_id"], 7);
        assert_eq!(out["elements"][0]["pins"][0]["iv_curves"][0]["scale"], 3);
    }

    #[test]
    fn test_two_references_rejected() {
        let mut record = serde_json::to_value(Pin::new(0.0, 0.0)).unwrap();
        let m = serde_json::to_value(measurement(true)).unwrap();
        record["iv_curves"] = Value::Array(vec![m.clone(), m]);

        let err = serde_json::from_value::<Pin>(record).unwrap_err();
        assert!(err.to_string().contains("reference"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");

        let mut pin = Pin::new(3.0, 4.0);
        pin.add_test(measurement(false));
        let board = Board::with_elements(vec![Element::with_pins(vec![pin])]);
        board.save(&path).unwrap();

        let loaded = Board::load(&path).unwrap();
        assert_eq!(loaded, board);
        assert_eq!(loaded.pins().count(), 1);
    }
}
