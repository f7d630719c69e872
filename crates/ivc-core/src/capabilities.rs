//! Device capabilities: IV measurers and analog multiplexers.
//!
//! Every backend (hardware, simulated, fault-injecting) implements the same
//! small set of raw operations; the composite behaviour that callers rely on
//! (caching the last curve, freezing, blocking measurement) is provided by
//! the traits themselves so backends cannot diverge on it.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; backends keep state behind interior mutability
//! - Returns [`crate::error::Result`]
//!
//! # Close-on-error
//!
//! A transport error leaves a device in an unknown state. Backends route
//! every transport-touching result through [`close_on_error`], which closes
//! the handle before handing the error back, so a later `reconnect()` always
//! starts from a closed device.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn measure_once(measurer: &dyn Measurer) -> Result<IvCurve> {
//!     measurer.set_settings(&MeasurementSettings::new(10_000.0, 475.0, 5.0, 100.0)).await?;
//!     measurer.measure_iv_curve().await
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::board::{MultiplexerOutput, MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};
use crate::curve::{IvCurve, MeasurementSettings};
use crate::error::{IvcError, Result};

/// Interval between readiness polls while waiting for an acquisition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Device lifecycle
// =============================================================================

/// Lifecycle shared by measurers and multiplexers.
///
/// # Contract
/// - `open_device` and `close_device` are idempotent
/// - Operations on a closed device fail with a `Closed` transport error
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Friendly name, if the device was given one.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Open the transport.
    async fn open_device(&self) -> Result<()>;

    /// Close the transport.
    async fn close_device(&self) -> Result<()>;

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Close, then reopen the device.
    ///
    /// # Returns
    /// - `true` when the device is open afterwards
    /// - `false` when opening failed (the failure is logged)
    async fn reconnect(&self) -> bool {
        let label = self.name().unwrap_or("<unnamed>");
        if let Err(err) = self.close_device().await {
            debug!(device = label, error = %err, "Close before reconnect failed");
        }
        match self.open_device().await {
            Ok(()) => {
                debug!(device = label, "Device reconnected");
                true
            }
            Err(err) => {
                warn!(device = label, error = %err, "Reconnect failed");
                false
            }
        }
    }
}

/// Close `device` if `result` is a transport error, then return `result`.
///
/// Non-transport errors (validation, not-ready) leave the device open.
pub async fn close_on_error<T, D>(device: &D, result: Result<T>) -> Result<T>
where
    D: DeviceHandle + ?Sized,
{
    if let Err(err) = &result {
        if err.is_transport() {
            let label = device.name().unwrap_or("<unnamed>");
            warn!(device = label, error = %err, "Transport error, closing device");
            if let Err(close_err) = device.close_device().await {
                debug!(device = label, error = %close_err, "Close after transport error failed");
            }
        }
    }
    result
}

// =============================================================================
// Measurer
// =============================================================================

/// Identification reported by a measurer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurerIdentity {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Device class (model family).
    pub device_class: String,
    /// Device name.
    pub device_name: String,
    /// Hardware version (major, minor, bugfix).
    pub hardware_version: (u32, u32, u32),
    /// Firmware version (major, minor, bugfix).
    pub firmware_version: (u32, u32, u32),
    /// Friendly name assigned by configuration.
    pub name: Option<String>,
    /// Ordering hint when several measurers are attached.
    pub rank: u32,
}

/// Per-measurer cache of the last curve plus the frozen flag.
///
/// Freezing never discards the cached curve.
#[derive(Debug, Default)]
pub struct CurveCache {
    last: Mutex<Option<IvCurve>>,
    frozen: AtomicBool,
}

impl CurveCache {
    /// Empty, unfrozen cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `curve` as the most recent acquisition.
    pub fn store(&self, curve: IvCurve) {
        *self.last.lock() = Some(curve);
    }

    /// Copy of the most recent acquisition.
    pub fn last(&self) -> Option<IvCurve> {
        self.last.lock().clone()
    }

    /// Forget the cached curve.
    pub fn clear(&self) {
        *self.last.lock() = None;
    }

    /// Set the frozen flag.
    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    /// Read the frozen flag.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}

/// Capability: IV-curve acquisition.
///
/// Backends implement the raw operations; `get_last_iv_curve`,
/// `get_last_cached_iv_curve`, `measure_iv_curve` and freezing are provided.
///
/// # Contract
/// - `trigger_measurement` starts one acquisition and returns immediately
/// - `measurement_is_ready` never blocks
/// - While frozen, a backend ignores triggers and reports not ready
/// - `read_iv_curve` fails with [`IvcError::NotReady`] until the first
///   acquisition since open has completed
/// - Every transport-touching method goes through [`close_on_error`]
#[async_trait]
pub trait Measurer: DeviceHandle {
    /// Shared cache of the last curve and the frozen flag.
    fn cache(&self) -> &CurveCache;

    /// Push settings to the device.
    ///
    /// # Returns
    /// - Err([`IvcError::InvalidSettings`]) when outside the supported envelope;
    ///   previous settings stay active
    async fn set_settings(&self, settings: &MeasurementSettings) -> Result<()>;

    /// Read the active settings.
    async fn get_settings(&self) -> Result<MeasurementSettings>;

    /// Side-effect-free identification.
    async fn get_identity_information(&self) -> Result<MeasurerIdentity>;

    /// Start one acquisition.
    async fn trigger_measurement(&self) -> Result<()>;

    /// Whether the last triggered acquisition has completed.
    async fn measurement_is_ready(&self) -> Result<bool>;

    /// Read the most recently completed acquisition from the device.
    async fn read_iv_curve(&self) -> Result<IvCurve>;

    /// Run the device's self-calibration.
    async fn calibrate(&self) -> Result<()>;

    /// Read the most recent acquisition and remember it in the cache.
    async fn get_last_iv_curve(&self) -> Result<IvCurve> {
        let curve = self.read_iv_curve().await?;
        self.cache().store(curve.clone());
        Ok(curve)
    }

    /// Fresh curve if one is ready, otherwise the cached one.
    ///
    /// # Returns
    /// - Err([`IvcError::NotReady`]) when nothing was acquired yet
    async fn get_last_cached_iv_curve(&self) -> Result<IvCurve> {
        if !self.is_frozen() && self.measurement_is_ready().await? {
            return self.get_last_iv_curve().await;
        }
        self.cache().last().ok_or(IvcError::NotReady)
    }

    /// Trigger, wait until ready, then read.
    ///
    /// Polls every [`POLL_INTERVAL`] with no timeout; wrap the call in
    /// `tokio::time::timeout` to bound it. A frozen measurer returns its
    /// cached curve without triggering.
    async fn measure_iv_curve(&self) -> Result<IvCurve> {
        if self.is_frozen() {
            return self.cache().last().ok_or(IvcError::NotReady);
        }
        self.trigger_measurement().await?;
        while !self.measurement_is_ready().await? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.get_last_iv_curve().await
    }

    /// Hold the last curve; triggers and readiness are suspended.
    fn freeze(&self) {
        self.cache().set_frozen(true);
    }

    /// Resume normal acquisition.
    fn unfreeze(&self) {
        self.cache().set_frozen(false);
    }

    /// Whether the measurer is frozen.
    fn is_frozen(&self) -> bool {
        self.cache().is_frozen()
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

/// Kind of module occupying one slot of a multiplexer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    /// Slot reported but no module answered.
    Absent,
    /// Single-line module.
    TypeA,
    /// Dual-line module.
    TypeAB,
}

/// Identification reported by a multiplexer controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiplexerIdentity {
    /// Controller name.
    pub controller_name: String,
    /// Firmware version (major, minor, bugfix).
    pub firmware_version: (u32, u32, u32),
    /// Hardware version (major, minor, bugfix).
    pub hardware_version: (u32, u32, u32),
    /// Manufacturer name.
    pub manufacturer: String,
    /// Product name.
    pub product_name: String,
    /// Controller serial number.
    pub serial_number: u32,
}

/// Capability: channel routing.
///
/// # Contract
/// - At most one channel is connected at a time; connecting replaces the
///   previous route
/// - Chain topology is discovered when the device opens
#[async_trait]
pub trait Multiplexer: DeviceHandle {
    /// Controller identification.
    async fn get_identity_information(&self) -> Result<MultiplexerIdentity>;

    /// Module types in chain order (module 1 first).
    async fn get_chain_info(&self) -> Result<Vec<ModuleType>>;

    /// Route `output` to the measurement line.
    ///
    /// # Returns
    /// - Err([`IvcError::InvalidOutput`]) when the module or channel does not exist
    async fn connect_channel(&self, output: MultiplexerOutput) -> Result<()>;

    /// Clear the active route.
    async fn disconnect_all_channels(&self) -> Result<()>;

    /// Currently connected output, if any.
    async fn get_connected_channel(&self) -> Result<Option<MultiplexerOutput>>;

    /// Whether `output` addresses a present module and a valid channel.
    async fn is_correct_output(&self, output: MultiplexerOutput) -> Result<bool> {
        let chain = self.get_chain_info().await?;
        Ok(output_fits_chain(&chain, output))
    }
}

/// Validate `output` against a chain topology without touching a device.
pub fn output_fits_chain(chain: &[ModuleType], output: MultiplexerOutput) -> bool {
    let channel_ok = (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&output.channel_number);
    let module_ok = output
        .module_number
        .checked_sub(1)
        .and_then(|slot| chain.get(slot))
        .is_some_and(|module| *module != ModuleType::Absent);
    channel_ok && module_ok
}
