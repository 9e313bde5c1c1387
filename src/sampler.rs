//! # Occupancy Sampler
//!
//! Sweeps a probe buffer sized to the monitored cache level back to back and
//! counts how many full sweeps complete inside each fixed window. A concurrent
//! workload that evicts probe lines slows the sweeps down, so a lower count in a
//! window means more contention for that cache during that interval.
//!
//! The clock is only read after a complete sweep. Reading it per touch would
//! make the clock itself the dominant cost being measured.
use crate::config::SamplerConfig;
use crate::error::Result;
use crate::format_size;
use crate::probe::ProbeBuffer;
use crate::timing::{clock_resolution, serialize_millis};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Per-window sweep counts of one sampling run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyTrace {
    /// Length of every window
    #[serde(serialize_with = "serialize_millis")]
    pub window: Duration,
    /// Completed sweeps, indexed by window
    pub counts: Vec<u64>,
}

/// Summary of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceStats {
    pub min: u64,
    pub max: u64,
    pub range: u64,
    pub samples: usize,
}

impl OccupancyTrace {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(window_index, sweep_count)` pairs in window order
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().copied().enumerate()
    }

    pub fn total_sweeps(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn stats(&self) -> Option<TraceStats> {
        let min = *self.counts.iter().min()?;
        let max = *self.counts.iter().max()?;
        Some(TraceStats { min, max, range: max - min, samples: self.counts.len() })
    }
}

/// Prime+Probe style occupancy sampler
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Sampler { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Run for the full configured duration and return one count per window.
    ///
    /// Misconfiguration is rejected before allocating, and failure to allocate
    /// the probe buffer is returned as a hard error.
    pub fn run(&self) -> Result<OccupancyTrace> {
        self.config.validate()?;

        let SamplerConfig { line_size, buffer_size, window, .. } = self.config;
        let windows = self.config.windows();

        let resolution = clock_resolution();
        if resolution >= window {
            warn!(
                "Clock resolution ({:?}) is not finer than the {:?} window, counts will be meaningless",
                resolution, window
            );
        }

        let buffer = ProbeBuffer::new(buffer_size, line_size)?;
        info!(
            "Sampling {} probe buffer ({} lines) for {} windows of {:?}",
            format_size(buffer_size as f32),
            buffer.lines(),
            windows,
            window
        );

        let started = Instant::now();
        let counts = sample_windows(&buffer, windows, window, || {});
        let trace = OccupancyTrace { window, counts };

        if let Some(stats) = trace.stats() {
            info!(
                "Sampling finished in {:?}: sweeps/window min {} max {} over {} windows",
                started.elapsed(),
                stats.min,
                stats.max,
                stats.samples
            );
        }
        Ok(trace)
    }
}

/// Count completed sweeps in each of `windows` back-to-back windows.
///
/// Every window counts at least one sweep since the clock is checked only
/// after a sweep completes. `between_sweeps` runs after each sweep, inside
/// the timed window.
fn sample_windows(
    buffer: &ProbeBuffer,
    windows: usize,
    window: Duration,
    mut between_sweeps: impl FnMut(),
) -> Vec<u64> {
    let mut counts = Vec::with_capacity(windows);
    let mut sink = 0u8;

    for index in 0..windows {
        let start = Instant::now();
        let mut count = 0u64;
        loop {
            sink ^= buffer.sweep();
            count += 1;
            between_sweeps();
            if start.elapsed() >= window {
                break;
            }
        }
        trace!("window {}: {} sweeps", index, count);
        counts.push(count);
    }

    black_box(sink);
    debug!("Collected {} windows", counts.len());
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn small_sampler(duration_ms: u64, window_ms: u64) -> Sampler {
        Sampler::new(
            SamplerConfig::default()
                .with_buffer_size(64 * 1024)
                .with_duration(Duration::from_millis(duration_ms))
                .with_window(Duration::from_millis(window_ms)),
        )
    }

    #[test]
    fn trace_length_is_floor_of_duration_over_window() {
        assert_eq!(small_sampler(50, 10).run().unwrap().len(), 5);
        assert_eq!(small_sampler(25, 10).run().unwrap().len(), 2);
    }

    #[test]
    fn window_equal_to_duration_yields_one_window() {
        let trace = small_sampler(10, 10).run().unwrap();
        assert_eq!(trace.len(), 1);
        assert!(trace.counts[0] >= 1);
    }

    #[test]
    fn window_longer_than_duration_is_rejected() {
        assert!(matches!(small_sampler(10, 20).run(), Err(Error::Misconfiguration(_))));
    }

    #[test]
    fn every_window_counts_at_least_one_sweep() {
        let trace = small_sampler(30, 5).run().unwrap();
        assert_eq!(trace.len(), 6);
        assert!(trace.counts.iter().all(|&c| c >= 1));
        assert_eq!(trace.window, Duration::from_millis(5));
    }

    #[test]
    fn unallocatable_buffer_is_fatal() {
        let sampler = Sampler::new(
            SamplerConfig::default()
                .with_buffer_size(usize::MAX / 2)
                .with_duration(Duration::from_millis(10)),
        );
        assert!(sampler.run().unwrap_err().is_resource_exhaustion());
    }

    const PROBE_SIZE: usize = 64 * 1024;
    const WINDOW: Duration = Duration::from_millis(10);

    #[test]
    fn evicting_competitor_lowers_counts() {
        let probe = ProbeBuffer::new(PROBE_SIZE, 64).unwrap();
        // large enough to flush the probe out of the private caches every time it is swept
        let competitor = ProbeBuffer::new(64 * PROBE_SIZE, 64).unwrap();

        let quiet = sample_windows(&probe, 4, WINDOW, || {});
        let contended = sample_windows(&probe, 4, WINDOW, || {
            black_box(competitor.sweep());
        });

        assert_eq!(quiet.len(), contended.len());
        for (window, (&q, &c)) in quiet.iter().zip(&contended).enumerate() {
            assert!(c <= q, "window {}: contended {} > quiet {}", window, c, q);
        }
    }

    #[test]
    fn stall_between_sweeps_caps_counts() {
        let probe = ProbeBuffer::new(PROBE_SIZE, 64).unwrap();
        let counts = sample_windows(&probe, 3, WINDOW, || {
            let start = Instant::now();
            while start.elapsed() < Duration::from_micros(200) {
                std::hint::spin_loop();
            }
        });

        // 200 us per sweep allows at most 50 sweeps in a 10 ms window
        assert!(counts.iter().all(|&c| (1..=50).contains(&c)), "{:?}", counts);
    }

    #[test]
    fn stats_summarize_counts() {
        let trace = OccupancyTrace { window: Duration::from_millis(10), counts: vec![7, 3, 9, 4] };
        assert_eq!(
            trace.stats(),
            Some(TraceStats { min: 3, max: 9, range: 6, samples: 4 })
        );
        assert_eq!(trace.total_sweeps(), 23);
        let pairs: Vec<_> = trace.iter().collect();
        assert_eq!(pairs, [(0, 7), (1, 3), (2, 9), (3, 4)]);

        let empty = OccupancyTrace { window: Duration::from_millis(10), counts: vec![] };
        assert_eq!(empty.stats(), None);
    }
}
