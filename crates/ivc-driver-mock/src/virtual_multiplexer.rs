//! Virtual analog multiplexer.
//!
//! Simulates a chain of switch modules with a single active route. The chain
//! topology is fixed at construction and reported once the device is open.

use async_trait::async_trait;
use ivc_core::board::MultiplexerOutput;
use ivc_core::capabilities::{
    close_on_error, output_fits_chain, DeviceHandle, ModuleType, Multiplexer, MultiplexerIdentity,
};
use ivc_core::error::{IvcError, Result};
use parking_lot::Mutex;

/// Number of modules in a default virtual chain.
pub const DEFAULT_CHAIN_LENGTH: usize = 3;

#[derive(Debug)]
struct RouteState {
    open: bool,
    connected: Option<MultiplexerOutput>,
}

/// Simulated multiplexer chain.
#[derive(Debug)]
pub struct VirtualMultiplexer {
    name: Option<String>,
    chain: Vec<ModuleType>,
    state: Mutex<RouteState>,
}

impl VirtualMultiplexer {
    /// Open multiplexer with `modules` type-A modules.
    pub fn new(modules: usize) -> Self {
        Self::with_chain(vec![ModuleType::TypeA; modules])
    }

    /// Open multiplexer with an explicit chain topology.
    pub fn with_chain(chain: Vec<ModuleType>) -> Self {
        Self {
            name: None,
            chain,
            state: Mutex::new(RouteState {
                open: true,
                connected: None,
            }),
        }
    }

    /// Attach a friendly name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("virtual-multiplexer")
    }

    fn with_open_state<T>(&self, f: impl FnOnce(&mut RouteState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(IvcError::closed(self.label()));
        }
        f(&mut state)
    }
}

impl Default for VirtualMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN_LENGTH)
    }
}

#[async_trait]
impl DeviceHandle for VirtualMultiplexer {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn open_device(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            state.connected = None;
            tracing::debug!("VirtualMultiplexer: Opened '{}'", self.label());
        }
        Ok(())
    }

    async fn close_device(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.connected = None;
            tracing::debug!("VirtualMultiplexer: Closed '{}'", self.label());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[async_trait]
impl Multiplexer for VirtualMultiplexer {
    async fn get_identity_information(&self) -> Result<MultiplexerIdentity> {
        let result = self.with_open_state(|_| {
            Ok(MultiplexerIdentity {
                controller_name: self.label().to_string(),
                firmware_version: (0, 0, 0),
                hardware_version: (0, 0, 0),
                manufacturer: "Virtual".to_string(),
                product_name: "Virtual multiplexer".to_string(),
                serial_number: 0,
            })
        });
        close_on_error(self, result).await
    }

    async fn get_chain_info(&self) -> Result<Vec<ModuleType>> {
        let result = self.with_open_state(|_| Ok(self.chain.clone()));
        close_on_error(self, result).await
    }

    async fn connect_channel(&self, output: MultiplexerOutput) -> Result<()> {
        let result = self.with_open_state(|state| {
            if !output_fits_chain(&self.chain, output) {
                return Err(IvcError::InvalidOutput {
                    module_number: output.module_number,
                    channel_number: output.channel_number,
                    chain_length: self.chain.len(),
                });
            }
            state.connected = Some(output);
            tracing::debug!("VirtualMultiplexer: '{}' connected {}", self.label(), output);
            Ok(())
        });
        close_on_error(self, result).await
    }

    async fn disconnect_all_channels(&self) -> Result<()> {
        let result = self.with_open_state(|state| {
            state.connected = None;
            Ok(())
        });
        close_on_error(self, result).await
    }

    async fn get_connected_channel(&self) -> Result<Option<MultiplexerOutput>> {
        let result = self.with_open_state(|state| Ok(state.connected));
        close_on_error(self, result).await
    }
}
