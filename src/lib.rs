//! # IVC DAQ
//!
//! Facade over the IV-curve workspace crates plus the pieces the `ivc`
//! binary needs: configuration loading, tracing setup and building a
//! measurement system from configuration.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based [`config::IvcConfig`] (TOML file plus
//!   `IVC_` environment overrides) with validation.
//! - **`logging`**: `tracing-subscriber` initialisation driven by the
//!   configured log level.
//! - **`setup`**: turns configuration into virtual devices, a
//!   [`MeasurementSystem`], a comparator and a searcher.
//!
//! The data model and capability traits live in [`ivc_core`], the virtual
//! backends in [`ivc_driver_mock`] and the coordination layer in
//! [`ivc_experiment`]; the most used items are re-exported here.

pub mod config;
pub mod logging;
pub mod setup;

pub use ivc_core::{
    Board, IvCurve, IvcError, Measurement, MeasurementSettings, Measurer, Multiplexer,
    MultiplexerOutput, Pin,
};
pub use ivc_experiment::{IvcComparator, MeasurementPlan, MeasurementSystem, ParameterSearcher};
