//! Settings search against virtual measurers.

use ivc_core::{FrequencyOption, IvcError, Measurer, MeasurementSettings};
use ivc_driver_mock::VirtualMeasurer;
use ivc_experiment::{ParameterSearcher, SearchSpace};

fn kilo_ohm_resistor() -> VirtualMeasurer {
    VirtualMeasurer::builder()
        .name("probe")
        .nominal(1000.0)
        .noise_factor(0.0)
        .build()
}

fn space() -> SearchSpace {
    SearchSpace::new(
        vec![
            FrequencyOption::new(10.0, 1_000.0),
            FrequencyOption::new(100.0, 10_000.0),
            FrequencyOption::new(1_000.0, 100_000.0),
            FrequencyOption::new(10_000.0, 1_000_000.0),
            FrequencyOption::new(100_000.0, 2_000_000.0),
        ],
        vec![475.0, 4750.0, 47_500.0],
        vec![1.2, 3.3, 5.0, 12.0],
    )
    .unwrap()
}

#[tokio::test]
async fn test_resistor_search_finds_settings_and_restores() {
    let measurer = kilo_ohm_resistor();
    let mut before = measurer.get_settings().await.unwrap();
    before.precharge_delay = Some(0.0);
    measurer.set_settings(&before).await.unwrap();

    let searcher = ParameterSearcher::new(space(), 12.0);
    let found = searcher.search_optimal_settings(&measurer).await.unwrap();

    assert_eq!(found.probe_signal_frequency, 1_000.0);
    assert_eq!(found.sampling_rate, 100_000.0);
    assert_eq!(found.internal_resistance, 475.0);
    assert_eq!(found.max_voltage, 3.3);
    assert_eq!(found.precharge_delay, Some(0.0));

    let after = measurer.get_settings().await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_ceiling_caps_voltage() {
    let measurer = kilo_ohm_resistor();
    let searcher = ParameterSearcher::new(space(), 5.0);
    let found = searcher.search_optimal_settings(&measurer).await.unwrap();
    assert!(found.max_voltage <= 5.0);
}

#[tokio::test]
async fn test_ceiling_below_every_option_keeps_settings() {
    let measurer = kilo_ohm_resistor();
    let before = measurer.get_settings().await.unwrap();
    let searcher = ParameterSearcher::new(space(), 1.0);
    let found = searcher.search_optimal_settings(&measurer).await.unwrap();
    assert_eq!(found, before);
}

#[tokio::test]
async fn test_failed_iteration_restores_settings() {
    let measurer = kilo_ohm_resistor();
    let before = MeasurementSettings::new(20_000.0, 4750.0, 5.0, 200.0);
    measurer.set_settings(&before).await.unwrap();

    // Sampling rate below twice the probe frequency is rejected by the device.
    let space = SearchSpace::new(
        vec![FrequencyOption::new(100.0, 150.0)],
        vec![475.0],
        vec![5.0],
    )
    .unwrap();
    let err = ParameterSearcher::new(space, 12.0)
        .search_optimal_settings(&measurer)
        .await
        .unwrap_err();

    assert!(matches!(err, IvcError::InvalidSettings(_)));
    assert_eq!(measurer.get_settings().await.unwrap(), before);
}
