//! Measurement plan and measurement system driven by virtual devices.

use ivc_core::{
    Board, Element, IvcError, Measurer, MeasurementSettings, Multiplexer, MultiplexerOutput, Pin,
};
use ivc_driver_mock::{FaultConfig, FaultyMeasurer, VirtualMeasurer, VirtualMultiplexer};
use ivc_experiment::{IvcComparator, MeasurementPlan, MeasurementSystem};
use std::sync::Arc;

fn quiet_resistor(nominal: f64) -> Arc<VirtualMeasurer> {
    Arc::new(
        VirtualMeasurer::builder()
            .nominal(nominal)
            .noise_factor(0.0)
            .build(),
    )
}

fn board_of(pins: Vec<Pin>) -> Board {
    Board::with_elements(vec![Element::with_pins(pins)])
}

// =============================================================================
// MeasurementPlan
// =============================================================================

#[tokio::test]
async fn test_unroutable_pins_with_multiplexer() {
    let board = board_of(vec![
        Pin::new(0.0, 0.0),
        Pin::new(1.0, 0.0).with_multiplexer_output(MultiplexerOutput::new(2, 3)),
        Pin::new(2.0, 0.0).with_multiplexer_output(MultiplexerOutput::new(5, 6)),
    ]);
    let mux = Arc::new(VirtualMultiplexer::default());
    let plan = MeasurementPlan::new(board.clone(), quiet_resistor(100.0), Some(mux));
    assert_eq!(plan.get_pins_without_multiplexer_outputs().await.unwrap(), vec![0, 2]);

    let plan = MeasurementPlan::new(board, quiet_resistor(100.0), None);
    assert_eq!(plan.get_pins_without_multiplexer_outputs().await.unwrap(), vec![0]);
}

#[tokio::test]
async fn test_route_current_pin() {
    let board = board_of(vec![
        Pin::new(0.0, 0.0).with_multiplexer_output(MultiplexerOutput::new(2, 3)),
        Pin::new(1.0, 0.0).with_multiplexer_output(MultiplexerOutput::new(5, 6)),
    ]);
    let mux = Arc::new(VirtualMultiplexer::default());
    let mut plan = MeasurementPlan::new(board, quiet_resistor(100.0), Some(mux.clone()));

    let routed = plan.route_current_pin().await.unwrap();
    assert_eq!(routed, Some(MultiplexerOutput::new(2, 3)));
    assert_eq!(mux.get_connected_channel().await.unwrap(), routed);

    plan.go_next_pin();
    assert_eq!(plan.route_current_pin().await.unwrap(), None);
    assert_eq!(mux.get_connected_channel().await.unwrap(), None);
}

#[tokio::test]
async fn test_cursor_navigation() {
    let board = board_of(vec![Pin::new(0.0, 0.0), Pin::new(1.0, 0.0), Pin::new(2.0, 0.0)]);
    let mut plan = MeasurementPlan::new(board, quiet_resistor(100.0), None);

    plan.go_prev_pin();
    assert_eq!(plan.get_current_index(), Some(2));
    plan.go_next_pin();
    assert_eq!(plan.get_current_index(), Some(0));

    assert!(matches!(
        plan.go_pin(5),
        Err(IvcError::OutOfRange { index: 5, len: 3 })
    ));
    assert_eq!(plan.get_current_index(), Some(0));
    assert!(plan.get_pin_with_index(3).is_none());

    plan.go_pin(1).unwrap();
    assert_eq!(plan.get_current_pin().unwrap().x, 1.0);
}

#[tokio::test]
async fn test_full_lap_returns_to_start() {
    let pins: Vec<Pin> = (0..5).map(|k| Pin::new(k as f64, 0.0)).collect();
    let mut plan = MeasurementPlan::new(board_of(pins), quiet_resistor(100.0), None);
    plan.go_pin(3).unwrap();

    let mut visited = Vec::new();
    for _ in 0..plan.pins_number() {
        plan.go_next_pin();
        visited.push(plan.get_current_index().unwrap());
    }
    assert_eq!(visited, vec![4, 0, 1, 2, 3]);

    for _ in 0..plan.pins_number() {
        plan.go_prev_pin();
    }
    assert_eq!(plan.get_current_index(), Some(3));
}

#[tokio::test]
async fn test_append_then_drain() {
    let mut plan = MeasurementPlan::new(Board::default(), quiet_resistor(100.0), None);
    for i in 0..5 {
        plan.append_pin(Pin::new(i as f64, 0.0));
        assert_eq!(plan.get_current_index(), Some(i));
    }
    assert_eq!(plan.pins_number(), 5);

    plan.go_pin(2).unwrap();
    let expected = [Some(1), Some(0), Some(0), Some(0), None];
    for want in expected {
        assert!(plan.remove_current_pin().is_some());
        assert_eq!(plan.get_current_index(), want);
    }
    assert_eq!(plan.pins_number(), 0);
    assert!(plan.remove_current_pin().is_none());
}

#[tokio::test]
async fn test_comment_out_of_range() {
    let mut plan = MeasurementPlan::new(board_of(vec![Pin::new(0.0, 0.0)]), quiet_resistor(100.0), None);
    plan.save_comment_to_pin_with_index(0, "pin 1 of U4").unwrap();
    assert_eq!(plan.get_pin_with_index(0).unwrap().comment.as_deref(), Some("pin 1 of U4"));
    assert!(matches!(
        plan.save_comment_to_pin_with_index(1, "nope"),
        Err(IvcError::IndexOutOfRange { index: 1, len: 1 })
    ));
}

#[tokio::test]
async fn test_save_reference_and_tests() {
    let measurer = quiet_resistor(100.0);
    let board = board_of(vec![Pin::new(0.0, 0.0), Pin::new(1.0, 1.0)]);
    let mut plan = MeasurementPlan::new(board, measurer.clone(), None);

    let curve = measurer.measure_iv_curve().await.unwrap();
    plan.save_last_measurement_as_reference().await.unwrap();
    plan.save_last_measurement_as_test().await.unwrap();

    let pin = plan.get_current_pin().unwrap();
    let reference = pin.reference().unwrap();
    assert!(reference.is_reference);
    assert_eq!(reference.ivc, curve);
    assert_eq!(reference.settings, measurer.get_settings().await.unwrap());
    assert_eq!(pin.tests().len(), 1);
    assert!(!pin.tests()[0].is_reference);
    assert!(plan.get_pin_with_index(1).unwrap().reference().is_none());

    let exported = plan.to_board();
    assert_eq!(exported.pins().filter(|p| p.reference().is_some()).count(), 1);

    plan.restore_original_board();
    assert!(plan.get_current_pin().unwrap().reference().is_none());
}

#[tokio::test]
async fn test_save_on_empty_plan() {
    let measurer = quiet_resistor(100.0);
    measurer.measure_iv_curve().await.unwrap();
    let mut plan = MeasurementPlan::new(Board::default(), measurer, None);
    assert!(matches!(
        plan.save_last_measurement_as_test().await,
        Err(IvcError::EmptyPlan)
    ));
}

#[tokio::test]
async fn test_save_before_any_measurement() {
    let mut plan = MeasurementPlan::new(board_of(vec![Pin::new(0.0, 0.0)]), quiet_resistor(100.0), None);
    assert!(matches!(
        plan.save_last_measurement_as_reference().await,
        Err(IvcError::NotReady)
    ));
}

// =============================================================================
// MeasurementSystem
// =============================================================================

fn system_of(measurers: &[Arc<VirtualMeasurer>]) -> MeasurementSystem {
    let measurers = measurers
        .iter()
        .map(|m| Arc::clone(m) as Arc<dyn Measurer>)
        .collect();
    MeasurementSystem::new(measurers, vec![])
}

#[tokio::test]
async fn test_system_settings_agreement() {
    let measurers = [quiet_resistor(100.0), quiet_resistor(200.0), quiet_resistor(300.0)];
    let system = system_of(&measurers);

    let settings = MeasurementSettings::new(100_000.0, 475.0, 3.3, 1_000.0);
    system.set_settings(&settings).await.unwrap();
    assert_eq!(system.get_settings().await.unwrap(), settings);

    let other = MeasurementSettings::new(100_000.0, 4750.0, 3.3, 1_000.0);
    measurers[2].set_settings(&other).await.unwrap();
    assert!(matches!(
        system.get_settings().await,
        Err(IvcError::InconsistentSettings(_))
    ));
}

#[tokio::test]
async fn test_frozen_measurer_keeps_its_curve() {
    let measurers = [quiet_resistor(100.0), quiet_resistor(1000.0)];
    let system = system_of(&measurers);
    let first = system.measure_iv_curves().await.unwrap();
    assert_eq!(first.len(), 2);

    measurers[1].freeze();
    let settings = MeasurementSettings::new(100_000.0, 475.0, 1.2, 1_000.0);
    system.set_settings(&settings).await.unwrap();
    let second = system.measure_iv_curves().await.unwrap();

    assert_eq!(second.len(), 2);
    assert_eq!(second[1], first[1]);
    assert_ne!(second[0], first[0]);
}

#[tokio::test]
async fn test_readiness_ignores_frozen_measurer() {
    let measurers = [quiet_resistor(100.0), quiet_resistor(1000.0)];
    let system = system_of(&measurers);

    // Never measured, so it never reports ready on its own.
    measurers[1].freeze();
    assert!(!measurers[1].measurement_is_ready().await.unwrap());

    system.trigger_measurements().await.unwrap();
    assert!(!system.measurements_are_ready().await.unwrap());

    // Default settings: 100 Hz signal, ready two periods after the trigger.
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(system.measurements_are_ready().await.unwrap());
    assert!(!measurers[1].measurement_is_ready().await.unwrap());
}

#[tokio::test]
async fn test_system_reconnect_recovers_injected_failure() {
    let flaky: Arc<dyn Measurer> = Arc::new(FaultyMeasurer::new(
        quiet_resistor(100.0),
        FaultConfig::fail_after(1),
    ));
    let system = MeasurementSystem::new(vec![flaky.clone()], vec![Arc::new(VirtualMultiplexer::new(1))]);

    system.get_settings().await.unwrap();
    assert!(system.get_settings().await.unwrap_err().is_transport());
    assert!(!flaky.is_open());

    assert!(system.reconnect().await);
    assert!(flaky.is_open());
}

#[tokio::test]
async fn test_different_components_compare_apart() {
    let measurers = [quiet_resistor(100.0), quiet_resistor(100.0)];
    let system = system_of(&measurers);
    let same = system.measure_iv_curves().await.unwrap();

    let open = quiet_resistor(1.0e7);
    let open_curve = open.measure_iv_curve().await.unwrap();

    let comparator = IvcComparator::default();
    assert!(comparator.compare_ivc(&same[0], &same[1]) < 0.01);
    let score = comparator.compare_ivc(&same[0], &open_curve);
    assert!((score - comparator.compare_ivc(&open_curve, &same[0])).abs() < 1e-9);
    assert!(score > 0.3, "score {}", score);
}
