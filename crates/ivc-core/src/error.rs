//! Error types for IV-curve instruments and measurement coordination.
//!
//! `IvcError` is the single error type shared by the drivers and the
//! coordination layer. Every kind in the taxonomy is a distinct variant so a
//! caller (GUI, CLI, test harness) can branch on it instead of matching on
//! message text.
//!
//! ## Error Categories
//!
//! 1. **Transport errors** - [`IvcError::Transport`]
//!    - I/O or protocol failures talking to a measurer or multiplexer
//!    - The device is force-closed before the error reaches the caller
//!    - Recovery: call `reconnect()` on the device
//!
//! 2. **Validation errors** - `InvalidSettings`, `InvalidOutput`, `OutOfRange`,
//!    `IndexOutOfRange`, `LengthMismatch`
//!    - Raised synchronously at the violating call, never clamped
//!    - Recovery: fix the input
//!
//! 3. **Consistency errors** - `InconsistentSettings`, `NoMeasurers`
//!    - Raised by the measurement system; no best-effort answer is returned
//!
//! 4. **Not-ready errors** - [`IvcError::NotReady`]
//!    - No acquisition has completed yet
//!    - Recovery: wait and retry, do not reconnect

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Operating-system level I/O failure (port vanished, write failed).
    Io,
    /// The device answered with something the driver could not interpret.
    Protocol,
    /// The device handle is closed.
    Closed,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Io => "io",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Closed => "closed",
        };
        write!(f, "{}", label)
    }
}

/// Structured transport failure reported by a device backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct TransportError {
    /// Device that failed (friendly name or URL).
    pub device: String,
    /// Failure category.
    pub kind: TransportErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(device: impl Into<String>, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using [`IvcError`].
pub type Result<T> = std::result::Result<T, IvcError>;

// =============================================================================
// IvcError
// =============================================================================

/// Primary error type for instruments, boards and measurement coordination.
#[derive(Error, Debug)]
pub enum IvcError {
    /// A curve was built from voltage and current sequences of different length.
    #[error("Curve length mismatch: {voltages} voltages vs {currents} currents")]
    LengthMismatch {
        /// Number of voltage samples.
        voltages: usize,
        /// Number of current samples.
        currents: usize,
    },

    /// Settings fall outside the envelope the device supports.
    ///
    /// **Error Type**: Permanent for the given settings.
    ///
    /// **Recovery Strategy**: Pick another option from the product parameter
    /// table. The device keeps its previous settings.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// No acquisition has completed since the device was opened.
    ///
    /// **Error Type**: Transient.
    ///
    /// **Recovery Strategy**: Wait for `measurement_is_ready()` and retry.
    /// Reconnecting does not help.
    #[error("Measurement is not ready")]
    NotReady,

    /// I/O or protocol failure on a device.
    ///
    /// **Error Type**: Transient or permanent, depending on the hardware.
    ///
    /// **Recovery Strategy**: The device has already been closed when this
    /// error is observed; call `reconnect()` before the next operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Multiplexer address does not exist in the current chain.
    #[error(
        "Invalid multiplexer output: module {module_number}, channel {channel_number} \
         (chain has {chain_length} modules)"
    )]
    InvalidOutput {
        /// Requested module number (1-based).
        module_number: usize,
        /// Requested channel number (1-based).
        channel_number: usize,
        /// Number of modules discovered in the chain.
        chain_length: usize,
    },

    /// Absolute pin jump outside `[0, pins_number)`.
    #[error("Pin {index} is out of range for a plan with {len} pins")]
    OutOfRange {
        /// Requested pin index.
        index: usize,
        /// Number of pins in the plan.
        len: usize,
    },

    /// Indexed pin mutation outside `[0, pins_number)`.
    #[error("Pin index {index} is out of range (plan has {len} pins)")]
    IndexOutOfRange {
        /// Requested pin index.
        index: usize,
        /// Number of pins in the plan.
        len: usize,
    },

    /// An operation needs a current pin but the plan has none.
    #[error("Measurement plan has no pins")]
    EmptyPlan,

    /// Measurers in a measurement system report different settings.
    ///
    /// **Error Type**: Permanent until settings are re-broadcast.
    ///
    /// **Recovery Strategy**: Call `set_settings()` on the measurement system.
    #[error("Inconsistent settings across measurers: {0}")]
    InconsistentSettings(String),

    /// Settings were requested from a measurement system without measurers.
    #[error("Measurement system has no measurers")]
    NoMeasurers,

    /// A board document is structurally invalid.
    #[error("Invalid board document: {0}")]
    InvalidBoard(String),

    /// Reading or writing a board document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A board document is not valid JSON for the board schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IvcError {
    /// Shorthand for a transport error on a closed device.
    pub fn closed(device: impl Into<String>) -> Self {
        IvcError::Transport(TransportError::new(
            device,
            TransportErrorKind::Closed,
            "Device is not opened",
        ))
    }

    /// True for errors that originate from the device transport.
    ///
    /// These are the errors that force-close a device handle.
    pub fn is_transport(&self) -> bool {
        matches!(self, IvcError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = IvcError::Transport(TransportError::new(
            "ivm-1",
            TransportErrorKind::Protocol,
            "bad frame",
        ));
        assert_eq!(err.to_string(), "Device 'ivm-1' protocol error: bad frame");
        assert!(err.is_transport());
    }

    #[test]
    fn test_closed_is_transport() {
        let err = IvcError::closed("mux");
        match &err {
            IvcError::Transport(inner) => assert_eq!(inner.kind, TransportErrorKind::Closed),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transport());
    }

    #[test]
    fn test_validation_errors_are_not_transport() {
        assert!(!IvcError::NotReady.is_transport());
        assert!(!IvcError::InvalidSettings("voltage".into()).is_transport());
        assert!(!IvcError::OutOfRange { index: 3, len: 2 }.is_transport());
    }
}
