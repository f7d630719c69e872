//! Virtual IV measurer.
//!
//! Produces curves analytically from a component model instead of talking to
//! hardware:
//! - Resistor: divider between the internal sense resistor and the modelled
//!   resistance, driven by a sine
//! - Capacitor: RC charging relation integrated sample by sample, after a
//!   few warm-up periods so the loop is in steady state
//! - Additive uniform noise scaled by `noise_factor`
//!
//! An acquisition becomes ready two probe periods (plus any precharge delay)
//! after the trigger and stays ready until the next trigger.
//!
//! # Example
//!
//! ```rust,ignore
//! use ivc_driver_mock::{ComponentModel, VirtualMeasurer};
//!
//! let measurer = VirtualMeasurer::builder()
//!     .name("virtual-1")
//!     .model(ComponentModel::Resistor)
//!     .nominal(1000.0)
//!     .noise_factor(0.0)
//!     .build();
//! let curve = measurer.measure_iv_curve().await?;
//! ```

use async_trait::async_trait;
use ivc_core::capabilities::{close_on_error, CurveCache, DeviceHandle, Measurer, MeasurerIdentity};
use ivc_core::curve::{IvCurve, MeasurementSettings};
use ivc_core::error::{IvcError, Result};
use ivc_core::processing::{interpolate_curve, smooth_curve};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tokio::time::{Duration, Instant};

use crate::common::MockRng;

/// Number of points in a curve returned by the virtual measurer.
pub const OUTPUT_POINTS: usize = 100;
/// Moving-average kernel applied to returned curves.
pub const SMOOTHING_KERNEL: usize = 5;
const CAPACITOR_WARMUP_PERIODS: usize = 3;
const NOISE_RESISTANCE_OFFSET: f64 = 100.0;

/// Component connected to the virtual probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentModel {
    /// Resistor; nominal in ohms
    #[default]
    Resistor,
    /// Capacitor; nominal in farads
    Capacitor,
}

impl ComponentModel {
    /// Nominal value used when none is configured.
    pub fn default_nominal(&self) -> f64 {
        match self {
            ComponentModel::Resistor => 100.0,
            ComponentModel::Capacitor => 1.0e-7,
        }
    }
}

/// Settings a freshly constructed virtual measurer starts with.
pub fn default_settings() -> MeasurementSettings {
    MeasurementSettings::new(10_000.0, 4750.0, 5.0, 100.0)
}

// =============================================================================
// VirtualMeasurer
// =============================================================================

#[derive(Debug)]
struct Acquisition {
    curve: IvCurve,
    ready_at: Instant,
}

#[derive(Debug)]
struct DeviceState {
    open: bool,
    settings: MeasurementSettings,
    pending: Option<Acquisition>,
    completed: Option<IvCurve>,
}

impl DeviceState {
    // Move a finished acquisition into `completed`; true while one is available.
    fn promote(&mut self, now: Instant) -> bool {
        match self.pending.take() {
            Some(acq) if acq.ready_at <= now => self.completed = Some(acq.curve),
            Some(acq) => {
                self.pending = Some(acq);
                return false;
            }
            None => {}
        }
        self.completed.is_some()
    }
}

/// Simulated measurer with a resistor or capacitor under test.
pub struct VirtualMeasurer {
    name: Option<String>,
    model: ComponentModel,
    nominal: f64,
    noise_factor: f64,
    rng: MockRng,
    cache: CurveCache,
    state: Mutex<DeviceState>,
}

impl VirtualMeasurer {
    /// Open measurer with a resistor of `nominal` ohms and default noise.
    pub fn resistor(nominal: f64) -> Self {
        Self::builder().model(ComponentModel::Resistor).nominal(nominal).build()
    }

    /// Open measurer with a capacitor of `nominal` farads and default noise.
    pub fn capacitor(nominal: f64) -> Self {
        Self::builder().model(ComponentModel::Capacitor).nominal(nominal).build()
    }

    /// Builder for advanced configuration
    pub fn builder() -> VirtualMeasurerBuilder {
        VirtualMeasurerBuilder::default()
    }

    /// Component model under test.
    pub fn model(&self) -> ComponentModel {
        self.model
    }

    /// Nominal value of the component under test.
    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("virtual-measurer")
    }

    fn ensure_open(&self, state: &DeviceState) -> Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(IvcError::closed(self.label()))
        }
    }

    fn simulate(&self, settings: &MeasurementSettings) -> Result<IvCurve> {
        let n = (settings.sampling_rate / settings.probe_signal_frequency).round() as usize;
        let n = n.max(2);
        let drive: Vec<f64> = (0..n)
            .map(|k| settings.max_voltage * (2.0 * PI * k as f64 / n as f64).sin())
            .collect();

        let (mut voltages, mut currents) = match self.model {
            ComponentModel::Resistor => resistor_response(&drive, settings, self.nominal),
            ComponentModel::Capacitor => capacitor_response(&drive, settings, self.nominal),
        };

        let v_noise = settings.max_voltage * self.noise_factor;
        let i_noise = settings.max_voltage / (settings.internal_resistance + NOISE_RESISTANCE_OFFSET)
            * self.noise_factor;
        for (v, dv) in voltages.iter_mut().zip(self.rng.uniform_vec(v_noise, n)) {
            *v += dv;
        }
        for (i, di) in currents.iter_mut().zip(self.rng.uniform_vec(i_noise, n)) {
            *i += di;
        }

        let raw = IvCurve::new(voltages, currents)?;
        smooth_curve(&interpolate_curve(&raw, OUTPUT_POINTS), SMOOTHING_KERNEL)
    }
}

fn resistor_response(
    drive: &[f64],
    settings: &MeasurementSettings,
    resistance: f64,
) -> (Vec<f64>, Vec<f64>) {
    let total = resistance + settings.internal_resistance;
    let currents: Vec<f64> = drive.iter().map(|v_in| v_in / total).collect();
    let voltages = currents.iter().map(|i| i * resistance).collect();
    (voltages, currents)
}

fn capacitor_response(
    drive: &[f64],
    settings: &MeasurementSettings,
    capacitance: f64,
) -> (Vec<f64>, Vec<f64>) {
    let dt = 1.0 / settings.sampling_rate;
    let r = settings.internal_resistance;
    let decay = (-dt / (r * capacitance)).exp();

    let mut v_c = 0.0;
    for _ in 0..CAPACITOR_WARMUP_PERIODS {
        for &v_in in drive {
            v_c = v_in + (v_c - v_in) * decay;
        }
    }

    let mut voltages = Vec::with_capacity(drive.len());
    let mut currents = Vec::with_capacity(drive.len());
    for &v_in in drive {
        voltages.push(v_c);
        currents.push((v_in - v_c) / r);
        v_c = v_in + (v_c - v_in) * decay;
    }
    (voltages, currents)
}

fn validate_settings(settings: &MeasurementSettings) -> Result<()> {
    let freq = settings.probe_signal_frequency;
    if !(freq > 0.0) {
        return Err(IvcError::InvalidSettings(format!(
            "probe signal frequency must be positive, got {}",
            freq
        )));
    }
    if !(settings.sampling_rate >= 2.0 * freq) {
        return Err(IvcError::InvalidSettings(format!(
            "sampling rate {} Hz is below twice the probe frequency {} Hz",
            settings.sampling_rate, freq
        )));
    }
    if !(settings.internal_resistance > 0.0) {
        return Err(IvcError::InvalidSettings(format!(
            "internal resistance must be positive, got {}",
            settings.internal_resistance
        )));
    }
    if !(settings.max_voltage > 0.0) {
        return Err(IvcError::InvalidSettings(format!(
            "max voltage must be positive, got {}",
            settings.max_voltage
        )));
    }
    if let Some(delay) = settings.precharge_delay {
        if !(delay >= 0.0) {
            return Err(IvcError::InvalidSettings(format!(
                "precharge delay must not be negative, got {}",
                delay
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DeviceHandle for VirtualMeasurer {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn open_device(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            state.pending = None;
            state.completed = None;
            tracing::debug!("VirtualMeasurer: Opened '{}'", self.label());
        }
        Ok(())
    }

    async fn close_device(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.pending = None;
            tracing::debug!("VirtualMeasurer: Closed '{}'", self.label());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[async_trait]
impl Measurer for VirtualMeasurer {
    fn cache(&self) -> &CurveCache {
        &self.cache
    }

    async fn set_settings(&self, settings: &MeasurementSettings) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            self.ensure_open(&state)
                .and_then(|()| validate_settings(settings))
                .map(|()| {
                    state.settings = *settings;
                })
        };
        if result.is_ok() {
            tracing::debug!(
                "VirtualMeasurer: '{}' settings {} Hz / {} Ohm / {} V",
                self.label(),
                settings.probe_signal_frequency,
                settings.internal_resistance,
                settings.max_voltage
            );
        }
        close_on_error(self, result).await
    }

    async fn get_settings(&self) -> Result<MeasurementSettings> {
        let result = {
            let state = self.state.lock();
            self.ensure_open(&state).map(|()| state.settings)
        };
        close_on_error(self, result).await
    }

    async fn get_identity_information(&self) -> Result<MeasurerIdentity> {
        let result = {
            let state = self.state.lock();
            self.ensure_open(&state).map(|()| MeasurerIdentity {
                manufacturer: "Virtual".to_string(),
                device_class: "virtual".to_string(),
                device_name: format!("Virtual {:?} measurer", self.model),
                hardware_version: (0, 0, 0),
                firmware_version: (0, 0, 0),
                name: self.name.clone(),
                rank: 0,
            })
        };
        close_on_error(self, result).await
    }

    async fn trigger_measurement(&self) -> Result<()> {
        if self.cache.is_frozen() {
            let result = {
                let state = self.state.lock();
                self.ensure_open(&state)
            };
            return close_on_error(self, result).await;
        }
        let settings = {
            let state = self.state.lock();
            self.ensure_open(&state).map(|()| state.settings)
        };
        let result = match settings {
            Ok(settings) => self.simulate(&settings).map(|curve| {
                let delay = settings.precharge_delay.unwrap_or(0.0)
                    + 2.0 / settings.probe_signal_frequency;
                let ready_at = Instant::now() + Duration::from_secs_f64(delay);
                let mut state = self.state.lock();
                state.completed = None;
                state.pending = Some(Acquisition { curve, ready_at });
                tracing::debug!("VirtualMeasurer: '{}' triggered", self.label());
            }),
            Err(err) => Err(err),
        };
        close_on_error(self, result).await
    }

    async fn measurement_is_ready(&self) -> Result<bool> {
        let result = {
            let mut state = self.state.lock();
            self.ensure_open(&state)
                .map(|()| !self.cache.is_frozen() && state.promote(Instant::now()))
        };
        close_on_error(self, result).await
    }

    async fn read_iv_curve(&self) -> Result<IvCurve> {
        let result = {
            let mut state = self.state.lock();
            self.ensure_open(&state).and_then(|()| {
                state.promote(Instant::now());
                state.completed.clone().ok_or(IvcError::NotReady)
            })
        };
        close_on_error(self, result).await
    }

    async fn calibrate(&self) -> Result<()> {
        let result = {
            let state = self.state.lock();
            self.ensure_open(&state)
        };
        if result.is_ok() {
            tracing::debug!("VirtualMeasurer: '{}' calibrated", self.label());
        }
        close_on_error(self, result).await
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`VirtualMeasurer`]
#[derive(Debug, Clone)]
pub struct VirtualMeasurerBuilder {
    name: Option<String>,
    model: ComponentModel,
    nominal: Option<f64>,
    noise_factor: f64,
    settings: MeasurementSettings,
    rng_seed: Option<u64>,
    open: bool,
}

impl Default for VirtualMeasurerBuilder {
    fn default() -> Self {
        Self {
            name: None,
            model: ComponentModel::Resistor,
            nominal: None,
            noise_factor: 0.05,
            settings: default_settings(),
            rng_seed: None,
            open: true,
        }
    }
}

impl VirtualMeasurerBuilder {
    /// Set friendly name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set component model
    pub fn model(mut self, model: ComponentModel) -> Self {
        self.model = model;
        self
    }

    /// Set nominal value (ohms for a resistor, farads for a capacitor)
    pub fn nominal(mut self, nominal: f64) -> Self {
        self.nominal = Some(nominal);
        self
    }

    /// Set noise factor (0 disables noise)
    pub fn noise_factor(mut self, factor: f64) -> Self {
        self.noise_factor = factor.max(0.0);
        self
    }

    /// Set initial settings
    pub fn settings(mut self, settings: MeasurementSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set RNG seed for deterministic noise
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Leave the device closed until `open_device` is called
    pub fn defer_open(mut self) -> Self {
        self.open = false;
        self
    }

    /// Build the VirtualMeasurer
    pub fn build(self) -> VirtualMeasurer {
        VirtualMeasurer {
            name: self.name,
            model: self.model,
            nominal: self.nominal.unwrap_or_else(|| self.model.default_nominal()),
            noise_factor: self.noise_factor,
            rng: MockRng::new(self.rng_seed),
            cache: CurveCache::new(),
            state: Mutex::new(DeviceState {
                open: self.open,
                settings: self.settings,
                pending: None,
                completed: None,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
