//! Measurement system: drives several measurers and multiplexers together.
//!
//! Calls fan out to every device concurrently with no shared lock; each
//! backend owns its own device handle. Frozen measurers are held on purpose
//! and never block the group's readiness.

use futures::future::{join_all, try_join_all};
use ivc_core::board::MultiplexerOutput;
use ivc_core::capabilities::{Measurer, Multiplexer, POLL_INTERVAL};
use ivc_core::curve::{IvCurve, MeasurementSettings};
use ivc_core::error::{IvcError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinator for N measurers and M multiplexers.
#[derive(Clone, Default)]
pub struct MeasurementSystem {
    measurers: Vec<Arc<dyn Measurer>>,
    measurers_map: HashMap<String, Arc<dyn Measurer>>,
    multiplexers: Vec<Arc<dyn Multiplexer>>,
}

impl std::fmt::Debug for MeasurementSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementSystem")
            .field("measurers", &self.measurers.len())
            .field("named", &self.measurers_map.keys().collect::<Vec<_>>())
            .field("multiplexers", &self.multiplexers.len())
            .finish()
    }
}

impl MeasurementSystem {
    /// Build a system; named measurers become reachable through [`MeasurementSystem::measurer`].
    pub fn new(measurers: Vec<Arc<dyn Measurer>>, multiplexers: Vec<Arc<dyn Multiplexer>>) -> Self {
        let measurers_map = measurers
            .iter()
            .filter_map(|m| m.name().map(|name| (name.to_string(), Arc::clone(m))))
            .collect();
        Self {
            measurers,
            measurers_map,
            multiplexers,
        }
    }

    /// Measurers in list order.
    pub fn measurers(&self) -> &[Arc<dyn Measurer>] {
        &self.measurers
    }

    /// Multiplexers in list order.
    pub fn multiplexers(&self) -> &[Arc<dyn Multiplexer>] {
        &self.multiplexers
    }

    /// Measurer registered under `name`.
    pub fn measurer(&self, name: &str) -> Option<&Arc<dyn Measurer>> {
        self.measurers_map.get(name)
    }

    /// True when at least one multiplexer is attached.
    pub fn has_active_analog_multiplexers(&self) -> bool {
        !self.multiplexers.is_empty()
    }

    /// Settings shared by every measurer.
    ///
    /// # Errors
    /// - [`IvcError::NoMeasurers`] for an empty system
    /// - [`IvcError::InconsistentSettings`] when any measurer disagrees
    pub async fn get_settings(&self) -> Result<MeasurementSettings> {
        let all = try_join_all(self.measurers.iter().map(|m| m.get_settings())).await?;
        let (first, rest) = all.split_first().ok_or(IvcError::NoMeasurers)?;
        if let Some(position) = rest.iter().position(|s| !s.approx_eq(first)) {
            return Err(IvcError::InconsistentSettings(format!(
                "measurer {} reports {:?}, measurer 0 reports {:?}",
                position + 1,
                rest[position],
                first
            )));
        }
        Ok(*first)
    }

    /// Apply `settings` to every measurer.
    pub async fn set_settings(&self, settings: &MeasurementSettings) -> Result<()> {
        try_join_all(self.measurers.iter().map(|m| m.set_settings(settings))).await?;
        debug!(count = self.measurers.len(), "Settings broadcast");
        Ok(())
    }

    /// Trigger every measurer.
    pub async fn trigger_measurements(&self) -> Result<()> {
        try_join_all(self.measurers.iter().map(|m| m.trigger_measurement())).await?;
        Ok(())
    }

    /// True when every non-frozen measurer has finished its acquisition.
    pub async fn measurements_are_ready(&self) -> Result<bool> {
        let active = self.measurers.iter().filter(|m| !m.is_frozen());
        let ready = try_join_all(active.map(|m| m.measurement_is_ready())).await?;
        Ok(ready.into_iter().all(|r| r))
    }

    /// Trigger all, wait until ready, then read every measurer's last curve
    /// in list order.
    ///
    /// Polls every [`POLL_INTERVAL`] with no timeout.
    pub async fn measure_iv_curves(&self) -> Result<Vec<IvCurve>> {
        self.trigger_measurements().await?;
        while !self.measurements_are_ready().await? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        try_join_all(self.measurers.iter().map(|m| m.get_last_cached_iv_curve())).await
    }

    /// Route `output` on every multiplexer.
    pub async fn set_multiplexer_output(&self, output: MultiplexerOutput) -> Result<()> {
        try_join_all(self.multiplexers.iter().map(|mux| mux.connect_channel(output))).await?;
        debug!(%output, count = self.multiplexers.len(), "Multiplexer output set");
        Ok(())
    }

    /// Clear the active route on every multiplexer.
    pub async fn disconnect_multiplexers(&self) -> Result<()> {
        try_join_all(self.multiplexers.iter().map(|mux| mux.disconnect_all_channels())).await?;
        Ok(())
    }

    /// Reconnect every device; true only if all of them came back.
    pub async fn reconnect(&self) -> bool {
        let measurers = join_all(self.measurers.iter().map(|m| m.reconnect()));
        let multiplexers = join_all(self.multiplexers.iter().map(|mux| mux.reconnect()));
        let (measurers, multiplexers) = futures::join!(measurers, multiplexers);

        let ok = measurers.iter().chain(multiplexers.iter()).all(|r| *r);
        if ok {
            info!("All devices reconnected");
        } else {
            warn!(
                measurers_failed = measurers.iter().filter(|r| !**r).count(),
                multiplexers_failed = multiplexers.iter().filter(|r| !**r).count(),
                "Reconnect failed for some devices"
            );
        }
        ok
    }
}
