//! Building live devices from configuration.

use crate::config::{IvcConfig, MeasurerDefinition, MultiplexerDefinition};
use ivc_core::{Measurer, Multiplexer};
use ivc_driver_mock::{
    FaultConfig, FaultyMeasurer, FaultyMultiplexer, VirtualMeasurer, VirtualMultiplexer,
};
use ivc_experiment::{IvcComparator, MeasurementSystem, ParameterSearcher, SearchSpace};
use std::sync::Arc;
use tracing::info;

/// Instantiate one configured measurer, wrapped in a fault gate if requested.
pub fn build_measurer(definition: &MeasurerDefinition) -> Arc<dyn Measurer> {
    let mut builder = VirtualMeasurer::builder()
        .name(definition.name.clone())
        .model(definition.model)
        .noise_factor(definition.noise_factor);
    if let Some(nominal) = definition.nominal {
        builder = builder.nominal(nominal);
    }
    if let Some(seed) = definition.seed {
        builder = builder.rng_seed(seed);
    }
    let measurer: Arc<dyn Measurer> = Arc::new(builder.build());

    match definition.fail_chance {
        Some(rate) => Arc::new(FaultyMeasurer::new(
            measurer,
            FaultConfig::random_failures_seeded(rate, definition.seed),
        )),
        None => measurer,
    }
}

/// Instantiate one configured multiplexer, wrapped in a fault gate if requested.
pub fn build_multiplexer(definition: &MultiplexerDefinition) -> Arc<dyn Multiplexer> {
    let mux: Arc<dyn Multiplexer> = Arc::new(VirtualMultiplexer::new(definition.modules));
    match definition.fail_chance {
        Some(rate) => Arc::new(FaultyMultiplexer::new(mux, FaultConfig::random_failures(rate))),
        None => mux,
    }
}

/// Measurement system holding every configured device.
pub fn build_system(config: &IvcConfig) -> MeasurementSystem {
    let measurers = config.measurers.iter().map(build_measurer).collect();
    let multiplexers = config.multiplexers.iter().map(build_multiplexer).collect();
    let system = MeasurementSystem::new(measurers, multiplexers);
    info!(
        measurers = config.measurers.len(),
        multiplexers = config.multiplexers.len(),
        "Measurement system ready"
    );
    system
}

/// Comparator with the configured noise floors.
pub fn build_comparator(config: &IvcConfig) -> IvcComparator {
    IvcComparator::new(config.comparator.min_voltage, config.comparator.min_current)
}

/// Searcher over the product table, capped at `ceiling` or the configured ceiling.
pub fn build_searcher(config: &IvcConfig, ceiling: Option<f64>) -> ivc_core::Result<ParameterSearcher> {
    let space = SearchSpace::from_parameters(&config.product)?;
    Ok(
        ParameterSearcher::new(space, ceiling.unwrap_or(config.search.voltage_ceiling))
            .with_mode(config.search.mode)
            .with_iterations(config.search.iterations),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivc_driver_mock::ComponentModel;

    fn definition(name: &str) -> MeasurerDefinition {
        MeasurerDefinition {
            name: name.to_string(),
            model: ComponentModel::Resistor,
            nominal: Some(220.0),
            noise_factor: 0.0,
            fail_chance: None,
            seed: Some(1),
        }
    }

    #[test]
    fn test_system_from_config() {
        let mut config = IvcConfig::default();
        config.measurers = vec![definition("a"), definition("b")];
        config.multiplexers = vec![MultiplexerDefinition {
            modules: 2,
            fail_chance: Some(0.0),
        }];

        let system = build_system(&config);
        assert_eq!(system.measurers().len(), 2);
        assert!(system.measurer("b").is_some());
        assert!(system.has_active_analog_multiplexers());
    }

    #[tokio::test]
    async fn test_certain_failure_gate() {
        let mut def = definition("flaky");
        def.fail_chance = Some(1.0);
        let measurer = build_measurer(&def);
        assert!(measurer.get_settings().await.unwrap_err().is_transport());
        assert!(!measurer.is_open());
    }

    #[test]
    fn test_searcher_ceiling_override() {
        let config = IvcConfig::default();
        assert!(build_searcher(&config, Some(5.0)).is_ok());
        assert_eq!(build_comparator(&config).min_ivc(), (0.6, 0.0002));
    }
}
