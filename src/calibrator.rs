//! # Calibrator
//!
//! Measures the cost of touching every line of working sets of increasing size,
//! producing a size→latency curve. Latency jumps along the curve mark the points
//! where the working set spills out of a cache level.
//!
//! Sizes are scanned smallest first, each with a freshly allocated buffer, and
//! every size is timed `repetitions` times with the median kept, which filters
//! out preemption and interrupt outliers. A size whose buffer cannot be
//! allocated ends the scan; everything measured before it is still returned.
use crate::config::CalibratorConfig;
use crate::error::{Error, Result};
use crate::format_size;
use crate::probe::ProbeBuffer;
use crate::timing::{median, serialize_millis};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Ratio between successive per-line latencies treated as a cache-level transition
pub const DEFAULT_JUMP_RATIO: f64 = 1.5;

/// Median latency of one working-set size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationSample {
    /// Working-set size in cache lines
    pub lines: usize,
    /// Median time of one full pass over the working set
    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
}

impl CalibrationSample {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_nanos() as f64 / 1e6
    }

    /// Average cost of touching one line, in nanoseconds
    pub fn per_line_ns(&self) -> f64 {
        self.latency.as_nanos() as f64 / self.lines as f64
    }
}

/// Samples in the order their sizes were tested
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Calibration {
    pub samples: Vec<CalibrationSample>,
}

impl Calibration {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationSample> {
        self.samples.iter()
    }

    /// Median latency measured for `lines`, if that size was tested
    pub fn latency_of(&self, lines: usize) -> Option<Duration> {
        self.samples.iter().find(|s| s.lines == lines).map(|s| s.latency)
    }

    /// Samples whose per-line cost exceeds the previous sample's by more than `ratio`
    pub fn jumps(&self, ratio: f64) -> Vec<CalibrationSample> {
        self.samples
            .windows(2)
            .filter(|w| w[0].per_line_ns() > 0.0 && w[1].per_line_ns() > w[0].per_line_ns() * ratio)
            .map(|w| w[1])
            .collect()
    }
}

impl<'a> IntoIterator for &'a Calibration {
    type Item = &'a CalibrationSample;
    type IntoIter = std::slice::Iter<'a, CalibrationSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Working-set size scanner
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    config: CalibratorConfig,
}

impl Calibrator {
    pub fn new(config: CalibratorConfig) -> Self {
        Calibrator { config }
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    /// Scan every configured size.
    ///
    /// Returns [`Error::Misconfiguration`] before measuring anything if the
    /// configuration is invalid. Allocation failure for a size truncates the
    /// result instead of failing the run.
    pub fn run(&self) -> Result<Calibration> {
        self.config.validate()?;

        let CalibratorConfig { line_size, ref sizes, repetitions } = self.config;
        info!(
            "Calibrating {} working-set sizes ({} repetitions, {} B lines)",
            sizes.len(),
            repetitions,
            line_size
        );

        let started = Instant::now();
        let mut calibration = Calibration { samples: Vec::with_capacity(sizes.len()) };
        let mut trials = vec![Duration::ZERO; repetitions];

        for &lines in sizes {
            let latency = match measure_size(lines, line_size, &mut trials) {
                Ok(latency) => latency,
                Err(err @ Error::ResourceExhaustion { .. }) => {
                    warn!("Stopping calibration at {} lines: {}", lines, err);
                    break;
                }
                Err(err) => return Err(err),
            };

            debug!(
                "{:>10} lines ({}): median {:?}",
                lines,
                format_size((lines * line_size) as f32),
                latency
            );
            calibration.samples.push(CalibrationSample { lines, latency });
        }

        info!(
            "Calibration measured {}/{} sizes in {:?}",
            calibration.len(),
            sizes.len(),
            started.elapsed()
        );
        Ok(calibration)
    }
}

/// Median time of `trials.len()` full passes over a fresh buffer of `lines` lines
fn measure_size(lines: usize, line_size: usize, trials: &mut [Duration]) -> Result<Duration> {
    let buffer = ProbeBuffer::with_lines(lines, line_size)?;
    for trial in trials.iter_mut() {
        *trial = buffer.time_sweep();
    }
    median(trials).ok_or_else(|| Error::misconfigured("repetition count must be non-zero"))
}
