//! Virtual hardware backends for IV-curve instruments
//!
//! This crate provides simulated devices for running and testing the
//! measurement layer without physical hardware. All waiting is async-safe
//! (`tokio::time`, never `std::thread::sleep`).
//!
//! # Available Backends
//!
//! - [`VirtualMeasurer`] - Simulated IV measurer with a resistor or capacitor under test
//! - [`VirtualMultiplexer`] - Simulated multiplexer chain with a single active route
//! - [`FaultyMeasurer`] / [`FaultyMultiplexer`] - Decorators injecting transport failures
//!
//! # Timing Characteristics
//!
//! - VirtualMeasurer: ready two probe periods after trigger (20 ms at 100 Hz)
//! - VirtualMeasurer: 100-point curves, 5-point smoothing
//! - VirtualMultiplexer: routes switch instantly
//!
//! # Fault Injection
//!
//! ```rust,ignore
//! use ivc_driver_mock::{FaultConfig, FaultyMeasurer, VirtualMeasurer};
//!
//! let flaky = FaultyMeasurer::new(
//!     Arc::new(VirtualMeasurer::resistor(1000.0)),
//!     FaultConfig::random_failures_seeded(0.2, Some(42)),
//! );
//! ```

pub mod common;
mod faulty;
mod virtual_measurer;
mod virtual_multiplexer;

// Re-export common types
pub use common::{FaultConfig, FaultScenario, MockRng};

// Re-export backend types
pub use faulty::{FaultyMeasurer, FaultyMultiplexer};
pub use virtual_measurer::{
    default_settings, ComponentModel, VirtualMeasurer, VirtualMeasurerBuilder, OUTPUT_POINTS,
    SMOOTHING_KERNEL,
};
pub use virtual_multiplexer::{VirtualMultiplexer, DEFAULT_CHAIN_LENGTH};
