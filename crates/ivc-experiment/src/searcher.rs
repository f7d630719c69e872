//! Automatic measurement-settings search.
//!
//! Steps through the discrete options a measurer supports (probe frequency,
//! internal resistance, voltage) to find settings under which an unknown
//! component produces an informative curve. Every iteration applies one
//! option triple, takes one measurement and adjusts each axis independently:
//!
//! - **Resistance**: too little current for the sense range steps to a more
//!   sensitive (higher) resistance; too little voltage across the component
//!   steps to a lower one.
//! - **Voltage**: the smallest option above the observed peak voltage,
//!   capped at the caller's ceiling.
//! - **Frequency**: driven by the normalised loop integral (area of the V/I
//!   loop over the ellipse area `π·V·V/R`).
//!
//! The measurer's settings are restored on every exit path, including
//! failures inside an iteration.

use ivc_core::capabilities::Measurer;
use ivc_core::curve::{IvCurve, MeasurementSettings};
use ivc_core::error::{IvcError, Result};
use ivc_core::parameters::{FrequencyOption, ParameterName, ParameterTable};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Iterations performed when none are configured.
pub const DEFAULT_ITERATIONS: usize = 2;
/// Frequency option tried first (clamped to the table).
pub const INITIAL_FREQUENCY_INDEX: usize = 4;
/// Resistance option tried first (clamped to the table).
pub const INITIAL_RESISTANCE_INDEX: usize = 1;

const UTILIZATION_THRESHOLD: f64 = 0.15;
const FLAT_LOOP_INTEGRAL: f64 = 0.003;
const THRESHOLD_MODE_INTEGRAL: f64 = 0.005;
const RISING_INTEGRAL_RATIO: f64 = 1.2;
// Loop areas at or below this are rounding noise of a straight line.
const ZERO_INTEGRAL: f64 = 1e-12;

/// How the frequency axis reacts to the loop integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Follow the loop-integral history towards the largest loop.
    #[default]
    MaximizeSquare,
    /// Step down while the loop integral stays below a fixed threshold.
    Threshold,
}

// =============================================================================
// SearchSpace
// =============================================================================

/// Discrete options the searcher may choose from, each sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    frequencies: Vec<FrequencyOption>,
    resistances: Vec<f64>,
    voltages: Vec<f64>,
}

impl SearchSpace {
    /// Build from explicit option lists.
    ///
    /// # Errors
    /// [`IvcError::InvalidSettings`] when any list is empty.
    pub fn new(
        mut frequencies: Vec<FrequencyOption>,
        mut resistances: Vec<f64>,
        mut voltages: Vec<f64>,
    ) -> Result<Self> {
        if frequencies.is_empty() || resistances.is_empty() || voltages.is_empty() {
            return Err(IvcError::InvalidSettings(
                "search space needs at least one frequency, resistance and voltage option".into(),
            ));
        }
        frequencies.sort_by(|a, b| a.probe_signal_frequency.total_cmp(&b.probe_signal_frequency));
        resistances.sort_by(f64::total_cmp);
        voltages.sort_by(f64::total_cmp);
        Ok(Self {
            frequencies,
            resistances,
            voltages,
        })
    }

    /// Build from a product parameter table.
    pub fn from_parameters(table: &ParameterTable) -> Result<Self> {
        Self::new(
            table.frequencies(),
            table.scalars(ParameterName::Sensitivity),
            table.scalars(ParameterName::Voltage),
        )
    }

    /// Frequency options, lowest first.
    pub fn frequencies(&self) -> &[FrequencyOption] {
        &self.frequencies
    }

    /// Resistance options, lowest first.
    pub fn resistances(&self) -> &[f64] {
        &self.resistances
    }

    /// Voltage options, lowest first.
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }
}

// =============================================================================
// Search state
// =============================================================================

#[derive(Debug, Clone)]
struct SearchState {
    frequency: usize,
    resistance: usize,
    voltage: usize,
    voltage_limit: usize,
    integrals: Vec<f64>,
}

impl SearchState {
    fn settings(&self, space: &SearchSpace, precharge_delay: Option<f64>) -> MeasurementSettings {
        let freq = space.frequencies[self.frequency];
        MeasurementSettings {
            sampling_rate: freq.sampling_rate,
            internal_resistance: space.resistances[self.resistance],
            max_voltage: space.voltages[self.voltage],
            probe_signal_frequency: freq.probe_signal_frequency,
            precharge_delay,
        }
    }

    fn update_resistance(&mut self, curve: &IvCurve, settings: &MeasurementSettings, max_index: usize) {
        let max_current = settings.max_current();
        let current_utilization = if max_current > 0.0 {
            curve.mean_abs_current() / max_current
        } else {
            0.0
        };
        let voltage_utilization = curve.mean_abs_voltage() / settings.max_voltage;

        if current_utilization < UTILIZATION_THRESHOLD {
            self.resistance = (self.resistance + 1).min(max_index);
        } else if voltage_utilization < UTILIZATION_THRESHOLD {
            self.resistance = self.resistance.saturating_sub(1);
        }
    }

    fn update_voltage(&mut self, curve: &IvCurve, voltages: &[f64]) {
        let peak = curve.peak_voltage();
        if let Some(index) = voltages[..=self.voltage_limit].iter().position(|v| *v > peak) {
            self.voltage = index;
        }
    }

    fn update_frequency(&mut self, integral: f64, mode: SearchMode, max_index: usize) {
        match mode {
            SearchMode::MaximizeSquare => {
                match self.integrals.last().copied() {
                    None if integral < FLAT_LOOP_INTEGRAL => self.step_frequency_down(2),
                    None => {}
                    // No ratio against a zero-area previous sample.
                    Some(previous) if previous <= ZERO_INTEGRAL => {}
                    Some(previous) => {
                        let ratio = integral / previous;
                        if ratio > RISING_INTEGRAL_RATIO {
                            self.step_frequency_down(1);
                        } else if ratio < 1.0 {
                            self.frequency = (self.frequency + 2).min(max_index);
                        }
                    }
                }
                self.integrals.push(integral);
            }
            SearchMode::Threshold => {
                if integral < THRESHOLD_MODE_INTEGRAL {
                    self.step_frequency_down(1);
                }
            }
        }
    }

    fn step_frequency_down(&mut self, steps: usize) {
        self.frequency = self.frequency.saturating_sub(steps);
    }
}

/// Loop area relative to the ellipse a pure capacitor would draw.
fn normalized_loop_integral(curve: &IvCurve, settings: &MeasurementSettings) -> f64 {
    let ideal = PI * settings.max_voltage * settings.max_current();
    if ideal > 0.0 {
        curve.loop_area() / ideal
    } else {
        0.0
    }
}

// =============================================================================
// ParameterSearcher
// =============================================================================

/// Iterative search over a [`SearchSpace`].
#[derive(Debug, Clone)]
pub struct ParameterSearcher {
    space: SearchSpace,
    voltage_ceiling: f64,
    mode: SearchMode,
    iterations: usize,
}

impl ParameterSearcher {
    /// Searcher over `space` that never applies more than `voltage_ceiling` volts.
    pub fn new(space: SearchSpace, voltage_ceiling: f64) -> Self {
        Self {
            space,
            voltage_ceiling,
            mode: SearchMode::default(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Set search mode
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set iteration count
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// The options searched.
    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Find settings suited to the component attached to `measurer`.
    ///
    /// The measurer is left with the settings it had before the call, on
    /// success and on failure. The proposed settings are returned, not
    /// applied.
    ///
    /// When no voltage option fits under the ceiling the measurer's current
    /// settings are returned unchanged.
    ///
    /// # Errors
    /// - Any error raised by the measurer during an iteration
    /// - The restore error, if restoring fails after a successful search
    pub async fn search_optimal_settings(&self, measurer: &dyn Measurer) -> Result<MeasurementSettings> {
        let original = measurer.get_settings().await?;

        let Some(voltage_limit) = self
            .space
            .voltages
            .iter()
            .rposition(|v| *v <= self.voltage_ceiling)
        else {
            info!(
                ceiling = self.voltage_ceiling,
                "No voltage option under the ceiling, keeping current settings"
            );
            return Ok(original);
        };

        let state = SearchState {
            frequency: INITIAL_FREQUENCY_INDEX.min(self.space.frequencies.len() - 1),
            resistance: INITIAL_RESISTANCE_INDEX.min(self.space.resistances.len() - 1),
            voltage: voltage_limit,
            voltage_limit,
            integrals: Vec::with_capacity(self.iterations),
        };

        info!(
            device = measurer.name().unwrap_or("<unnamed>"),
            iterations = self.iterations,
            mode = ?self.mode,
            "Starting settings search"
        );
        let outcome = self.iterate(measurer, state, original.precharge_delay).await;
        let restored = measurer.set_settings(&original).await;

        match (outcome, restored) {
            (Ok(found), Ok(())) => {
                info!(
                    frequency = found.probe_signal_frequency,
                    resistance = found.internal_resistance,
                    voltage = found.max_voltage,
                    "Settings search finished"
                );
                Ok(found)
            }
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!(error = %restore_err, "Restoring settings after failed search failed");
                Err(err)
            }
        }
    }

    async fn iterate(
        &self,
        measurer: &dyn Measurer,
        mut state: SearchState,
        precharge_delay: Option<f64>,
    ) -> Result<MeasurementSettings> {
        for iteration in 0..self.iterations {
            let settings = state.settings(&self.space, precharge_delay);
            measurer.set_settings(&settings).await?;
            let curve = measurer.measure_iv_curve().await?;
            let integral = normalized_loop_integral(&curve, &settings);

            state.update_resistance(&curve, &settings, self.space.resistances.len() - 1);
            state.update_voltage(&curve, &self.space.voltages);
            state.update_frequency(integral, self.mode, self.space.frequencies.len() - 1);

            debug!(
                iteration,
                frequency = settings.probe_signal_frequency,
                resistance = settings.internal_resistance,
                voltage = settings.max_voltage,
                peak_voltage = curve.peak_voltage(),
                integral,
                "Search iteration"
            );
        }
        Ok(state.settings(&self.space, precharge_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new(
            vec![
                FrequencyOption::new(1000.0, 100_000.0),
                FrequencyOption::new(10.0, 1_000.0),
                FrequencyOption::new(100.0, 10_000.0),
            ],
            vec![47_500.0, 475.0, 4750.0],
            vec![5.0, 1.2],
        )
        .unwrap()
    }

    fn state() -> SearchState {
        SearchState {
            frequency: 2,
            resistance: 1,
            voltage: 1,
            voltage_limit: 1,
            integrals: Vec::new(),
        }
    }

    #[test]
    fn test_space_sorted_and_non_empty() {
        let s = space();
        assert_eq!(s.frequencies()[0].probe_signal_frequency, 10.0);
        assert_eq!(s.resistances(), &[475.0, 4750.0, 47_500.0]);
        assert_eq!(s.voltages(), &[1.2, 5.0]);
        assert!(SearchSpace::new(vec![], vec![1.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_space_from_default_table() {
        let s = SearchSpace::from_parameters(&ParameterTable::default()).unwrap();
        assert_eq!(s.frequencies()[INITIAL_FREQUENCY_INDEX].probe_signal_frequency, 10_000.0);
        assert_eq!(s.resistances()[INITIAL_RESISTANCE_INDEX], 4750.0);
    }

    #[test]
    fn test_frequency_first_sample_coarse_jump() {
        let mut st = state();
        st.update_frequency(0.001, SearchMode::MaximizeSquare, 2);
        assert_eq!(st.frequency, 0);

        let mut st = state();
        st.update_frequency(0.1, SearchMode::MaximizeSquare, 2);
        assert_eq!(st.frequency, 2);
    }

    #[test]
    fn test_frequency_follows_ratio() {
        let mut st = state();
        st.frequency = 1;
        st.integrals.push(0.1);
        st.update_frequency(0.2, SearchMode::MaximizeSquare, 2);
        assert_eq!(st.frequency, 0, "rising integral steps down");

        st.update_frequency(0.1, SearchMode::MaximizeSquare, 2);
        assert_eq!(st.frequency, 2, "falling integral steps up two (capped)");

        st.update_frequency(0.11, SearchMode::MaximizeSquare, 2);
        assert_eq!(st.frequency, 2, "small change holds");
    }

    #[test]
    fn test_frequency_ratio_against_small_previous_loop() {
        let mut st = state();
        st.frequency = 3;
        st.integrals.push(0.001);
        st.update_frequency(0.0025, SearchMode::MaximizeSquare, 4);
        assert_eq!(st.frequency, 2, "ratio 2.5 steps down even below the flat-loop level");

        let mut st = state();
        st.frequency = 3;
        st.integrals.push(0.002);
        st.update_frequency(0.001, SearchMode::MaximizeSquare, 4);
        assert_eq!(st.frequency, 4, "ratio 0.5 steps up");
    }

    #[test]
    fn test_frequency_holds_after_zero_area_sample() {
        let mut st = state();
        st.frequency = 3;
        st.integrals.push(0.0);
        st.update_frequency(0.0025, SearchMode::MaximizeSquare, 4);
        assert_eq!(st.frequency, 3);
        assert_eq!(st.integrals, vec![0.0, 0.0025]);
    }

    #[test]
    fn test_frequency_threshold_mode() {
        let mut st = state();
        st.update_frequency(0.004, SearchMode::Threshold, 2);
        assert_eq!(st.frequency, 1);
        st.update_frequency(0.5, SearchMode::Threshold, 2);
        assert_eq!(st.frequency, 1);
    }

    #[test]
    fn test_voltage_picks_smallest_above_peak() {
        let voltages = [1.2, 3.3, 5.0, 12.0];
        let mut st = SearchState {
            voltage: 3,
            voltage_limit: 2,
            ..state()
        };
        let curve = IvCurve::new(vec![2.0, -2.1], vec![0.0, 0.0]).unwrap();
        st.update_voltage(&curve, &voltages);
        assert_eq!(st.voltage, 1);

        let loud = IvCurve::new(vec![6.0], vec![0.0]).unwrap();
        st.update_voltage(&loud, &voltages);
        assert_eq!(st.voltage, 1, "holds when nothing under the ceiling exceeds the peak");
    }

    #[test]
    fn test_resistance_steps() {
        let settings = MeasurementSettings::new(10_000.0, 4750.0, 5.0, 100.0);

        // Almost no current through the sense resistor: go more sensitive
        let mut st = state();
        let open = IvCurve::new(vec![4.0, -4.0], vec![1e-6, -1e-6]).unwrap();
        st.update_resistance(&open, &settings, 2);
        assert_eq!(st.resistance, 2);

        // Plenty of current but no voltage: go less sensitive
        let mut st = state();
        let short = IvCurve::new(vec![0.01, -0.01], vec![0.001, -0.001]).unwrap();
        st.update_resistance(&short, &settings, 2);
        assert_eq!(st.resistance, 0);
    }
}
