use cache_occupancy_rs::config::{CalibratorConfig, SamplerConfig};
use cache_occupancy_rs::{Calibrator, Sampler};
use std::time::Duration;

#[test]
fn one_mib_probe_yields_ten_windows() {
    let sampler = Sampler::new(
        SamplerConfig::default()
            .with_line_size(64)
            .with_buffer_size(1024 * 1024)
            .with_duration(Duration::from_millis(100))
            .with_window(Duration::from_millis(10)),
    );
    let trace = sampler.run().unwrap();
    assert_eq!(trace.len(), 10);
    assert!(trace.counts.iter().all(|&c| c >= 1));
}

#[test]
#[ignore = "timing-sensitive; run with --ignored on an idle machine"]
fn uncontended_windows_have_no_gross_outliers() {
    let sampler = Sampler::new(
        SamplerConfig::default()
            .with_buffer_size(1024 * 1024)
            .with_duration(Duration::from_millis(100))
            .with_window(Duration::from_millis(10)),
    );
    let stats = sampler.run().unwrap().stats().unwrap();
    assert!(stats.max < stats.min * 10, "{:?}", stats);
}

#[test]
fn larger_working_sets_cost_more() {
    let calibration = Calibrator::new(
        CalibratorConfig::default()
            .with_line_size(64)
            .with_sizes([1, 10, 100, 1000])
            .with_repetitions(10),
    )
    .run()
    .unwrap();

    assert_eq!(calibration.len(), 4);
    let smallest = calibration.samples.first().unwrap().latency;
    let largest = calibration.samples.last().unwrap().latency;
    assert!(largest > smallest, "{:?} <= {:?}", largest, smallest);
}

#[test]
#[ignore = "timing-sensitive; run with --ignored on an idle machine"]
fn median_latency_is_stable_across_runs() {
    let calibrator = Calibrator::new(
        CalibratorConfig::default()
            .with_sizes([4096])
            .with_repetitions(10),
    );
    let medians: Vec<f64> = (0..5)
        .map(|_| calibrator.run().unwrap().samples[0].latency_ms())
        .collect();

    let min = medians.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = medians.iter().cloned().fold(0.0, f64::max);
    assert!(max <= min * 1.2, "medians spread too far: {:?}", medians);
}
