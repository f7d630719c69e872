//! Fault-injecting decorators.
//!
//! [`FaultyMeasurer`] and [`FaultyMultiplexer`] wrap any backend and run every
//! call through a [`FaultConfig`] gate first. An injected failure is a
//! transport error, so the wrapped device is closed exactly as a real
//! transport failure would close it. `reconnect` clears the gate's counters
//! before reopening.
//!
//! ```rust,ignore
//! let inner: Arc<dyn Measurer> = Arc::new(VirtualMeasurer::resistor(100.0));
//! let flaky = FaultyMeasurer::new(inner, FaultConfig::random_failures(0.1));
//! ```

use async_trait::async_trait;
use ivc_core::board::MultiplexerOutput;
use ivc_core::capabilities::{
    close_on_error, CurveCache, DeviceHandle, Measurer, MeasurerIdentity, ModuleType, Multiplexer,
    MultiplexerIdentity,
};
use ivc_core::curve::{IvCurve, MeasurementSettings};
use ivc_core::error::Result;
use std::future::Future;
use std::sync::Arc;

use crate::common::FaultConfig;

async fn gated<D, T, F>(device: &D, faults: &FaultConfig, operation: &'static str, call: F) -> Result<T>
where
    D: DeviceHandle + ?Sized,
    F: Future<Output = Result<T>> + Send,
{
    let label = device.name().unwrap_or("<unnamed>");
    let result = match faults.check_operation(label, operation) {
        Ok(()) => call.await,
        Err(err) => {
            tracing::debug!("FaultyDevice: Injected failure on '{}' ({})", label, operation);
            Err(err.into())
        }
    };
    close_on_error(device, result).await
}

async fn reset_and_reopen<D>(device: &D, faults: &FaultConfig) -> bool
where
    D: DeviceHandle + ?Sized,
{
    faults.reset();
    let label = device.name().unwrap_or("<unnamed>");
    if let Err(err) = device.close_device().await {
        tracing::debug!("FaultyDevice: Close before reconnect of '{}' failed: {}", label, err);
    }
    match gated(device, faults, "open_device", device.open_device()).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("FaultyDevice: Reconnect of '{}' failed: {}", label, err);
            false
        }
    }
}

// =============================================================================
// FaultyMeasurer
// =============================================================================

/// Measurer decorator that injects transport failures.
pub struct FaultyMeasurer {
    inner: Arc<dyn Measurer>,
    faults: FaultConfig,
}

impl FaultyMeasurer {
    /// Wrap `inner` behind the `faults` gate.
    pub fn new(inner: Arc<dyn Measurer>, faults: FaultConfig) -> Self {
        Self { inner, faults }
    }

    /// The fault gate, for tests that reset or inspect it.
    pub fn faults(&self) -> &FaultConfig {
        &self.faults
    }
}

#[async_trait]
impl DeviceHandle for FaultyMeasurer {
    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    async fn open_device(&self) -> Result<()> {
        gated(self.inner.as_ref(), &self.faults, "open_device", self.inner.open_device()).await
    }

    async fn close_device(&self) -> Result<()> {
        self.inner.close_device().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn reconnect(&self) -> bool {
        reset_and_reopen(self.inner.as_ref(), &self.faults).await
    }
}

#[async_trait]
impl Measurer for FaultyMeasurer {
    fn cache(&self) -> &CurveCache {
        self.inner.cache()
    }

    async fn set_settings(&self, settings: &MeasurementSettings) -> Result<()> {
        gated(self.inner.as_ref(), &self.faults, "set_settings", self.inner.set_settings(settings)).await
    }

    async fn get_settings(&self) -> Result<MeasurementSettings> {
        gated(self.inner.as_ref(), &self.faults, "get_settings", self.inner.get_settings()).await
    }

    async fn get_identity_information(&self) -> Result<MeasurerIdentity> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "get_identity_information",
            self.inner.get_identity_information(),
        )
        .await
    }

    async fn trigger_measurement(&self) -> Result<()> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "trigger_measurement",
            self.inner.trigger_measurement(),
        )
        .await
    }

    async fn measurement_is_ready(&self) -> Result<bool> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "measurement_is_ready",
            self.inner.measurement_is_ready(),
        )
        .await
    }

    async fn read_iv_curve(&self) -> Result<IvCurve> {
        gated(self.inner.as_ref(), &self.faults, "read_iv_curve", self.inner.read_iv_curve()).await
    }

    async fn calibrate(&self) -> Result<()> {
        gated(self.inner.as_ref(), &self.faults, "calibrate", self.inner.calibrate()).await
    }
}

// =============================================================================
// FaultyMultiplexer
// =============================================================================

/// Multiplexer decorator that injects transport failures.
pub struct FaultyMultiplexer {
    inner: Arc<dyn Multiplexer>,
    faults: FaultConfig,
}

impl FaultyMultiplexer {
    /// Wrap `inner` behind the `faults` gate.
    pub fn new(inner: Arc<dyn Multiplexer>, faults: FaultConfig) -> Self {
        Self { inner, faults }
    }

    /// The fault gate, for tests that reset or inspect it.
    pub fn faults(&self) -> &FaultConfig {
        &self.faults
    }
}

#[async_trait]
impl DeviceHandle for FaultyMultiplexer {
    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    async fn open_device(&self) -> Result<()> {
        gated(self.inner.as_ref(), &self.faults, "open_device", self.inner.open_device()).await
    }

    async fn close_device(&self) -> Result<()> {
        self.inner.close_device().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn reconnect(&self) -> bool {
        reset_and_reopen(self.inner.as_ref(), &self.faults).await
    }
}

#[async_trait]
impl Multiplexer for FaultyMultiplexer {
    async fn get_identity_information(&self) -> Result<MultiplexerIdentity> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "get_identity_information",
            self.inner.get_identity_information(),
        )
        .await
    }

    async fn get_chain_info(&self) -> Result<Vec<ModuleType>> {
        gated(self.inner.as_ref(), &self.faults, "get_chain_info", self.inner.get_chain_info()).await
    }

    async fn connect_channel(&self, output: MultiplexerOutput) -> Result<()> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "connect_channel",
            self.inner.connect_channel(output),
        )
        .await
    }

    async fn disconnect_all_channels(&self) -> Result<()> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "disconnect_all_channels",
            self.inner.disconnect_all_channels(),
        )
        .await
    }

    async fn get_connected_channel(&self) -> Result<Option<MultiplexerOutput>> {
        gated(
            self.inner.as_ref(),
            &self.faults,
            "get_connected_channel",
            self.inner.get_connected_channel(),
        )
        .await
    }
}
