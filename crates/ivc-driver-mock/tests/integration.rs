//! Integration tests for the virtual driver set
//!
//! These tests drive the virtual devices only through the `ivc-core`
//! capability traits, the way coordination code sees them.

use ivc_core::{Measurer, MeasurementSettings, ModuleType, Multiplexer, MultiplexerOutput};
use ivc_driver_mock::*;
use std::sync::Arc;

/// Every device kind can be constructed and used as a trait object
#[test]
fn test_all_devices_instantiate() {
    let measurers: Vec<Arc<dyn Measurer>> = vec![
        Arc::new(VirtualMeasurer::resistor(100.0)),
        Arc::new(VirtualMeasurer::capacitor(1.0e-6)),
        Arc::new(FaultyMeasurer::new(
            Arc::new(VirtualMeasurer::resistor(10.0)),
            FaultConfig::none(),
        )),
    ];
    let multiplexers: Vec<Arc<dyn Multiplexer>> = vec![
        Arc::new(VirtualMultiplexer::default()),
        Arc::new(FaultyMultiplexer::new(
            Arc::new(VirtualMultiplexer::new(1)),
            FaultConfig::none(),
        )),
    ];

    assert!(measurers.iter().all(|m| m.is_open()));
    assert!(multiplexers.iter().all(|m| m.is_open()));
}

/// Fault configurations
#[test]
fn test_fault_scenarios() {
    assert_eq!(FaultConfig::none().failure_rate(), 0.0);
    assert_eq!(FaultConfig::random_failures(0.25).failure_rate(), 0.25);

    let fail_after = FaultConfig::fail_after(3);
    for _ in 0..3 {
        assert!(fail_after.check_operation("dev", "read").is_ok());
    }
    assert!(fail_after.check_operation("dev", "read").is_err());
}

/// Same seed, same failure pattern
#[test]
fn test_seeded_faults_are_reproducible() {
    let a = FaultConfig::random_failures_seeded(0.5, Some(42));
    let b = FaultConfig::random_failures_seeded(0.5, Some(42));
    let pattern = |cfg: &FaultConfig| -> Vec<bool> {
        (0..32).map(|_| cfg.check_operation("dev", "op").is_err()).collect()
    };
    assert_eq!(pattern(&a), pattern(&b));
}

/// Capacitor curves open a loop, resistor curves stay on a line
#[tokio::test]
async fn test_capacitor_draws_a_loop() {
    let settings = MeasurementSettings::new(100_000.0, 475.0, 5.0, 1_000.0);

    let resistor = VirtualMeasurer::builder().nominal(475.0).noise_factor(0.0).build();
    resistor.set_settings(&settings).await.unwrap();
    let line = resistor.measure_iv_curve().await.unwrap();

    let capacitor = VirtualMeasurer::builder()
        .model(ComponentModel::Capacitor)
        .nominal(3.3e-7)
        .noise_factor(0.0)
        .build();
    capacitor.set_settings(&settings).await.unwrap();
    let ellipse = capacitor.measure_iv_curve().await.unwrap();

    assert_eq!(line.len(), OUTPUT_POINTS);
    assert_eq!(ellipse.len(), OUTPUT_POINTS);
    assert!(ellipse.loop_area() > 10.0 * line.loop_area().max(1e-9));
}

/// Chain with an absent slot
#[tokio::test]
async fn test_chain_with_absent_module() {
    let mux = VirtualMultiplexer::with_chain(vec![ModuleType::TypeA, ModuleType::Absent, ModuleType::TypeAB]);
    assert!(mux.connect_channel(MultiplexerOutput::new(1, 64)).await.is_ok());
    assert!(mux.connect_channel(MultiplexerOutput::new(2, 1)).await.is_err());
    assert!(mux.connect_channel(MultiplexerOutput::new(3, 1)).await.is_ok());
    assert_eq!(
        mux.get_connected_channel().await.unwrap(),
        Some(MultiplexerOutput::new(3, 1))
    );
}
