//! Configuration loaded with Figment.
//!
//! Configuration is merged from:
//! 1. a TOML file (`config/ivc.toml` by default)
//! 2. environment variables prefixed with `IVC_`, nested keys split on `__`
//!
//! Every field has a default, so an empty or missing file yields a usable
//! single-measurer setup.
//!
//! # Example
//! ```no_run
//! use ivc_daq::config::IvcConfig;
//!
//! let config = IvcConfig::load()?;
//! config.validate().map_err(|e| anyhow::anyhow!(e))?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Override a nested value from the shell:
//! ```bash
//! IVC_APPLICATION__LOG_LEVEL=debug ivc search
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use crate::logging::OutputFormat;
use ivc_core::ParameterTable;
use ivc_driver_mock::{ComponentModel, DEFAULT_CHAIN_LENGTH};
use ivc_experiment::{SearchMode, SearchSpace, DEFAULT_ITERATIONS, DEFAULT_MIN_CURRENT, DEFAULT_MIN_VOLTAGE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/ivc.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvcConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Curve comparator noise floors
    #[serde(default)]
    pub comparator: ComparatorConfig,
    /// Parameter search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Options the product's measurers support
    #[serde(default)]
    pub product: ParameterTable,
    /// Measurer definitions
    #[serde(default = "default_measurers")]
    pub measurers: Vec<MeasurerDefinition>,
    /// Multiplexer definitions
    #[serde(default)]
    pub multiplexers: Vec<MultiplexerDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line layout (compact, pretty)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Comparator noise floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparatorConfig {
    /// Voltage floor in volts
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    /// Current floor in amperes
    #[serde(default = "default_min_current")]
    pub min_current: f64,
}

/// Parameter search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Measurement iterations per search
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Frequency adjustment strategy
    #[serde(default)]
    pub mode: SearchMode,
    /// Highest voltage the search may pick
    #[serde(default = "default_voltage_ceiling")]
    pub voltage_ceiling: f64,
}

/// A virtual measurer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurerDefinition {
    /// Unique measurer name
    pub name: String,
    /// Simulated component
    #[serde(default)]
    pub model: ComponentModel,
    /// Component value (ohms or farads); model default when absent
    #[serde(default)]
    pub nominal: Option<f64>,
    /// Relative noise amplitude
    #[serde(default = "default_noise_factor")]
    pub noise_factor: f64,
    /// Probability of an injected transport failure per call
    #[serde(default)]
    pub fail_chance: Option<f64>,
    /// Seed for noise and fault injection
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A virtual multiplexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplexerDefinition {
    /// Number of type-A modules in the chain
    #[serde(default = "default_modules")]
    pub modules: usize,
    /// Probability of an injected transport failure per call
    #[serde(default)]
    pub fail_chance: Option<f64>,
}

// Default value functions
fn default_name() -> String {
    "IVC DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_voltage() -> f64 {
    DEFAULT_MIN_VOLTAGE
}

fn default_min_current() -> f64 {
    DEFAULT_MIN_CURRENT
}

fn default_iterations() -> usize {
    DEFAULT_ITERATIONS
}

fn default_voltage_ceiling() -> f64 {
    12.0
}

fn default_noise_factor() -> f64 {
    0.05
}

fn default_modules() -> usize {
    DEFAULT_CHAIN_LENGTH
}

fn default_measurers() -> Vec<MeasurerDefinition> {
    vec![MeasurerDefinition {
        name: "virtual".to_string(),
        model: ComponentModel::Resistor,
        nominal: None,
        noise_factor: default_noise_factor(),
        fail_chance: None,
        seed: None,
    }]
}

impl Default for IvcConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            comparator: ComparatorConfig::default(),
            search: SearchConfig::default(),
            product: ParameterTable::default(),
            measurers: default_measurers(),
            multiplexers: Vec::new(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            min_voltage: default_min_voltage(),
            min_current: default_min_current(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            mode: SearchMode::default(),
            voltage_ceiling: default_voltage_ceiling(),
        }
    }
}

impl IvcConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; environment variables and defaults
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IVC_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.application.log_level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if !(self.comparator.min_voltage > 0.0) || !(self.comparator.min_current > 0.0) {
            return Err(format!(
                "Comparator floors must be positive, got {} V / {} A",
                self.comparator.min_voltage, self.comparator.min_current
            ));
        }

        if self.search.iterations == 0 {
            return Err("search.iterations must be at least 1".to_string());
        }
        if !(self.search.voltage_ceiling > 0.0) {
            return Err(format!(
                "search.voltage_ceiling must be positive, got {}",
                self.search.voltage_ceiling
            ));
        }

        SearchSpace::from_parameters(&self.product).map_err(|e| format!("Invalid product table: {}", e))?;

        let mut names = HashSet::new();
        for measurer in &self.measurers {
            if !names.insert(&measurer.name) {
                return Err(format!("Duplicate measurer name: {}", measurer.name));
            }
            if let Some(nominal) = measurer.nominal {
                if !(nominal > 0.0) {
                    return Err(format!(
                        "Measurer '{}': nominal must be positive, got {}",
                        measurer.name, nominal
                    ));
                }
            }
            if !(measurer.noise_factor >= 0.0) {
                return Err(format!(
                    "Measurer '{}': noise_factor must not be negative",
                    measurer.name
                ));
            }
            check_probability(&measurer.name, measurer.fail_chance)?;
        }

        for (index, mux) in self.multiplexers.iter().enumerate() {
            if mux.modules == 0 {
                return Err(format!("Multiplexer {}: chain needs at least one module", index));
            }
            check_probability(&format!("multiplexer {}", index), mux.fail_chance)?;
        }

        Ok(())
    }
}

fn check_probability(owner: &str, chance: Option<f64>) -> Result<(), String> {
    match chance {
        Some(p) if !(0.0..=1.0).contains(&p) => Err(format!(
            "{}: fail_chance {} is outside [0, 1]",
            owner, p
        )),
        _ => Ok(()),
    }
}
