//! `ivc-experiment`
//!
//! Coordination layer on top of the `ivc-core` capability traits.
//!
//! - [`MeasurementSystem`]: fans calls out to several measurers and
//!   multiplexers at once
//! - [`MeasurementPlan`]: cursor over every pin of a board, with reference
//!   and test capture from a live measurer
//! - [`ParameterSearcher`]: picks measurement settings for an unknown
//!   component
//! - [`IvcComparator`]: dissimilarity score between two curves
//!
//! None of these types know which backend they drive; anything implementing
//! [`ivc_core::Measurer`] or [`ivc_core::Multiplexer`] works.

pub mod comparator;
pub mod measurement_plan;
pub mod measurement_system;
pub mod searcher;

pub use comparator::{IvcComparator, COMPARISON_POINTS, DEFAULT_MIN_CURRENT, DEFAULT_MIN_VOLTAGE};
pub use measurement_plan::{ElementView, MeasurementPlan};
pub use measurement_system::MeasurementSystem;
pub use searcher::{ParameterSearcher, SearchMode, SearchSpace, DEFAULT_ITERATIONS};
