//! Measurement plan: a cursor over every pin of a board.
//!
//! The plan flattens the board's element/pin tree into one pin arena in
//! traversal order (elements in document order, pins in element order).
//! Each element records how many consecutive arena slots it owns, so the
//! tree and the flat index are two views of a single store and cannot drift
//! apart.
//!
//! ```text
//! pins:     [p0 p1 p2 | p3 | p4 p5]
//! elements:  U1 (3)    R1 (1) C1 (2)
//! cursor:          ^ Some(1)
//! ```
//!
//! The cursor is `None` exactly when the plan has no pins. Relative moves
//! wrap around; absolute jumps and indexed edits are bounds-checked.

use ivc_core::board::{Board, Element, MultiplexerOutput, PcbInfo, Pin};
use ivc_core::capabilities::{output_fits_chain, Measurer, Multiplexer};
use ivc_core::curve::Measurement;
use ivc_core::error::{IvcError, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Board-level fields carried through the plan untouched.
#[derive(Debug, Clone, Default, PartialEq)]
struct BoardHeader {
    version: Option<String>,
    image: Option<String>,
    pcb: Option<PcbInfo>,
    extra: Map<String, Value>,
}

/// Element metadata plus the number of arena pins it owns.
#[derive(Debug, Clone, Default, PartialEq)]
struct ElementSlot {
    element: Element,
    pin_count: usize,
}

/// Read-only view of one element and its pins.
#[derive(Debug, Clone, Copy)]
pub struct ElementView<'a> {
    /// Reference designator or part name.
    pub name: Option<&'a str>,
    /// Package name.
    pub package: Option<&'a str>,
    /// Pins of the element, in order.
    pub pins: &'a [Pin],
}

/// Pin-traversal state machine bound to a live measurer.
pub struct MeasurementPlan {
    header: BoardHeader,
    elements: Vec<ElementSlot>,
    pins: Vec<Pin>,
    original: Board,
    current: Option<usize>,
    measurer: Arc<dyn Measurer>,
    multiplexer: Option<Arc<dyn Multiplexer>>,
}

impl std::fmt::Debug for MeasurementPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementPlan")
            .field("elements", &self.elements.len())
            .field("pins", &self.pins.len())
            .field("current", &self.current)
            .field("multiplexer", &self.multiplexer.is_some())
            .finish()
    }
}

impl MeasurementPlan {
    /// Plan over `board`; the board is also kept as the rollback snapshot.
    pub fn new(
        board: Board,
        measurer: Arc<dyn Measurer>,
        multiplexer: Option<Arc<dyn Multiplexer>>,
    ) -> Self {
        let original = board.clone();
        let (header, elements, pins) = split_board(board);
        let current = if pins.is_empty() { None } else { Some(0) };
        Self {
            header,
            elements,
            pins,
            original,
            current,
            measurer,
            multiplexer,
        }
    }

    /// Replace the attached measurer.
    pub fn assign_measurer(&mut self, measurer: Arc<dyn Measurer>) {
        self.measurer = measurer;
    }

    /// Attached measurer.
    pub fn measurer(&self) -> &Arc<dyn Measurer> {
        &self.measurer
    }

    /// Attached multiplexer, if any.
    pub fn multiplexer(&self) -> Option<&Arc<dyn Multiplexer>> {
        self.multiplexer.as_ref()
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Number of pins across all elements.
    pub fn pins_number(&self) -> usize {
        self.pins.len()
    }

    /// All pins in traversal order.
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Index of the current pin; `None` for an empty plan.
    pub fn get_current_index(&self) -> Option<usize> {
        self.current
    }

    /// The current pin; `None` for an empty plan.
    pub fn get_current_pin(&self) -> Option<&Pin> {
        self.current.and_then(|i| self.pins.get(i))
    }

    /// Pin at `index`, if it exists.
    pub fn get_pin_with_index(&self, index: usize) -> Option<&Pin> {
        self.pins.get(index)
    }

    /// Elements with their pins, in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementView<'_>> + '_ {
        let mut start = 0;
        self.elements.iter().map(move |slot| {
            let pins = &self.pins[start..start + slot.pin_count];
            start += slot.pin_count;
            ElementView {
                name: slot.element.name.as_deref(),
                package: slot.element.package.as_deref(),
                pins,
            }
        })
    }

    /// Export the live state as a board document.
    pub fn to_board(&self) -> Board {
        let mut pins = self.pins.iter().cloned();
        let elements = self
            .elements
            .iter()
            .map(|slot| Element {
                pins: pins.by_ref().take(slot.pin_count).collect(),
                ..slot.element.clone()
            })
            .collect();
        Board {
            elements,
            version: self.header.version.clone(),
            image: self.header.image.clone(),
            pcb: self.header.pcb.clone(),
            extra: self.header.extra.clone(),
        }
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Move to the next pin, wrapping past the last one.
    pub fn go_next_pin(&mut self) {
        let len = self.pins.len();
        self.current = self.current.map(|i| (i + 1) % len);
        debug!(current = ?self.current, "Next pin");
    }

    /// Move to the previous pin, wrapping before the first one.
    pub fn go_prev_pin(&mut self) {
        let len = self.pins.len();
        self.current = self.current.map(|i| (i + len - 1) % len);
        debug!(current = ?self.current, "Previous pin");
    }

    /// Jump to `index`.
    ///
    /// # Errors
    /// [`IvcError::OutOfRange`] when `index >= pins_number()`.
    pub fn go_pin(&mut self, index: usize) -> Result<()> {
        if index >= self.pins.len() {
            return Err(IvcError::OutOfRange {
                index,
                len: self.pins.len(),
            });
        }
        self.current = Some(index);
        Ok(())
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    /// Append `pin` to the last element (creating one if needed) and make it current.
    pub fn append_pin(&mut self, pin: Pin) {
        if self.elements.is_empty() {
            self.elements.push(ElementSlot::default());
        }
        if let Some(last) = self.elements.last_mut() {
            last.pin_count += 1;
        }
        self.pins.push(pin);
        self.current = Some(self.pins.len() - 1);
        debug!(index = self.pins.len() - 1, "Pin appended");
    }

    /// Remove the current pin; the cursor moves to the previous pin.
    ///
    /// Returns the removed pin, or `None` for an empty plan.
    pub fn remove_current_pin(&mut self) -> Option<Pin> {
        let index = self.current?;
        let slot = self.element_of(index)?;
        self.elements[slot].pin_count -= 1;
        let removed = self.pins.remove(index);
        self.current = if self.pins.is_empty() {
            None
        } else {
            Some(index.saturating_sub(1))
        };
        debug!(index, remaining = self.pins.len(), "Pin removed");
        Some(removed)
    }

    /// Set the comment of the pin at `index`.
    ///
    /// # Errors
    /// [`IvcError::IndexOutOfRange`] when `index >= pins_number()`.
    pub fn save_comment_to_pin_with_index(&mut self, index: usize, comment: impl Into<String>) -> Result<()> {
        let len = self.pins.len();
        let pin = self
            .pins
            .get_mut(index)
            .ok_or(IvcError::IndexOutOfRange { index, len })?;
        pin.comment = Some(comment.into());
        Ok(())
    }

    /// Discard every edit since construction.
    pub fn restore_original_board(&mut self) {
        let (header, elements, pins) = split_board(self.original.clone());
        self.header = header;
        self.elements = elements;
        self.pins = pins;
        self.current = match (self.pins.len(), self.current) {
            (0, _) => None,
            (len, current) => Some(current.unwrap_or(0).min(len - 1)),
        };
        info!(pins = self.pins.len(), "Original board restored");
    }

    fn element_of(&self, index: usize) -> Option<usize> {
        let mut end = 0;
        self.elements.iter().position(|slot| {
            end += slot.pin_count;
            index < end
        })
    }

    fn current_pin_mut(&mut self) -> Result<&mut Pin> {
        let index = self.current.ok_or(IvcError::EmptyPlan)?;
        self.pins.get_mut(index).ok_or(IvcError::EmptyPlan)
    }

    // =========================================================================
    // Measurements
    // =========================================================================

    /// Store the measurer's last curve as the current pin's reference.
    ///
    /// # Errors
    /// - [`IvcError::EmptyPlan`] when there is no current pin
    /// - Any measurer error, including [`IvcError::NotReady`]
    pub async fn save_last_measurement_as_reference(&mut self) -> Result<()> {
        let measurement = self.last_measurement(true).await?;
        self.current_pin_mut()?.set_reference(measurement);
        Ok(())
    }

    /// Append the measurer's last curve to the current pin's tests.
    ///
    /// # Errors
    /// Same as [`MeasurementPlan::save_last_measurement_as_reference`].
    pub async fn save_last_measurement_as_test(&mut self) -> Result<()> {
        let measurement = self.last_measurement(false).await?;
        self.current_pin_mut()?.add_test(measurement);
        Ok(())
    }

    async fn last_measurement(&mut self, is_reference: bool) -> Result<Measurement> {
        self.current_pin_mut()?;
        let curve = self.measurer.get_last_cached_iv_curve().await?;
        let settings = self.measurer.get_settings().await?;
        Ok(Measurement::new(settings, curve, is_reference))
    }

    // =========================================================================
    // Multiplexer routing
    // =========================================================================

    /// Indices of pins that cannot be routed automatically.
    ///
    /// A pin qualifies when it has no multiplexer address or, with a
    /// multiplexer attached, when its address does not fit the chain.
    pub async fn get_pins_without_multiplexer_outputs(&self) -> Result<Vec<usize>> {
        let chain = match &self.multiplexer {
            Some(mux) => Some(mux.get_chain_info().await?),
            None => None,
        };
        Ok(self
            .pins
            .iter()
            .enumerate()
            .filter(|(_, pin)| match (pin.multiplexer_output, &chain) {
                (None, _) => true,
                (Some(output), Some(chain)) => !output_fits_chain(chain, output),
                (Some(_), None) => false,
            })
            .map(|(index, _)| index)
            .collect())
    }

    /// Route the current pin through the attached multiplexer.
    ///
    /// Connects the pin's address when it is routable; otherwise clears any
    /// active route so a stale channel is never measured. Returns the
    /// connected output.
    ///
    /// # Errors
    /// - [`IvcError::EmptyPlan`] when there is no current pin
    /// - Any multiplexer error
    pub async fn route_current_pin(&self) -> Result<Option<MultiplexerOutput>> {
        let pin = self.get_current_pin().ok_or(IvcError::EmptyPlan)?;
        let Some(mux) = &self.multiplexer else {
            return Ok(None);
        };
        match pin.multiplexer_output {
            Some(output) if mux.is_correct_output(output).await? => {
                mux.connect_channel(output).await?;
                Ok(Some(output))
            }
            _ => {
                mux.disconnect_all_channels().await?;
                Ok(None)
            }
        }
    }
}

fn split_board(board: Board) -> (BoardHeader, Vec<ElementSlot>, Vec<Pin>) {
    let header = BoardHeader {
        version: board.version,
        image: board.image,
        pcb: board.pcb,
        extra: board.extra,
    };
    let mut pins = Vec::new();
    let elements = board
        .elements
        .into_iter()
        .map(|mut element| {
            let pin_count = element.pins.len();
            pins.append(&mut element.pins);
            ElementSlot { element, pin_count }
        })
        .collect();
    (header, elements, pins)
}
