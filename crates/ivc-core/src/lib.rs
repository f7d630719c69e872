//! `ivc-core`
//!
//! Core types and capability traits for IV-curve test instruments.
//!
//! This crate provides the building blocks shared by every backend and by the
//! coordination layer: the curve and measurement data model, the board
//! document tree, the error taxonomy and the device capability traits.
//!
//! ## Key Types
//!
//! - [`IvCurve`]: paired voltage/current samples
//! - [`MeasurementSettings`] and [`Measurement`]: how a curve was produced
//! - [`Board`], [`Element`], [`Pin`]: the board document tree
//! - [`Measurer`] and [`Multiplexer`]: capabilities implemented by backends
//! - [`IvcError`]: error type with one variant per failure kind
//!
//! ## Example
//!
//! ```rust
//! use ivc_core::{IvCurve, IvcError};
//!
//! let curve = IvCurve::new(vec![0.0, 1.0], vec![0.0, 0.002]).unwrap();
//! assert_eq!(curve.len(), 2);
//!
//! let err = IvCurve::new(vec![0.0], vec![]).unwrap_err();
//! assert!(matches!(err, IvcError::LengthMismatch { .. }));
//! ```

pub mod board;
pub mod capabilities;
pub mod curve;
pub mod error;
pub mod parameters;
pub mod processing;

pub use board::{Board, Element, MultiplexerOutput, PcbInfo, Pin};
pub use capabilities::{
    close_on_error, CurveCache, DeviceHandle, Measurer, MeasurerIdentity, ModuleType,
    Multiplexer, MultiplexerIdentity, POLL_INTERVAL,
};
pub use curve::{IvCurve, IvPoint, Measurement, MeasurementSettings};
pub use error::{IvcError, Result, TransportError, TransportErrorKind};
pub use parameters::{FrequencyOption, ParameterName, ParameterTable};
