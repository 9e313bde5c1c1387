//! Caller-supplied configuration for the calibrator and the occupancy sampler.
//!
//! Defaults match a typical desktop part: 64 byte lines and an 8 MiB last
//! level cache. Use [`detect_line_size`] and [`detect_llc_size`] to ask the
//! CPU instead.
use crate::error::{Error, Result};
use std::time::Duration;

/// Default cache line stride in bytes
pub const DEFAULT_LINE_SIZE: usize = 64;
/// Default sampler probe buffer size (8 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;
/// Default total observation duration of one sampler run
pub const DEFAULT_DURATION: Duration = Duration::from_millis(10_000);
/// Default sampler window
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(10);
/// Default timed trials per calibration size
pub const DEFAULT_REPETITIONS: usize = 10;
/// Default calibration working-set sizes, in cache lines
pub const DEFAULT_SIZES: [usize; 8] = [1, 10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000];

/// Cache line size reported by the CPU, falling back to [`DEFAULT_LINE_SIZE`]
pub fn detect_line_size() -> usize {
    cache_size::l1_cache_line_size()
        .filter(|&size| size > 0)
        .unwrap_or(DEFAULT_LINE_SIZE)
}

/// Size of the last level cache reported by the CPU, falling back to
/// [`DEFAULT_BUFFER_SIZE`]
pub fn detect_llc_size() -> usize {
    cache_size::l3_cache_size()
        .or_else(cache_size::l2_cache_size)
        .filter(|&size| size > 0)
        .unwrap_or(DEFAULT_BUFFER_SIZE)
}

/// Parameters of one calibration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibratorConfig {
    /// Bytes between consecutive touches
    pub line_size: usize,
    /// Working-set sizes in cache lines, strictly increasing
    pub sizes: Vec<usize>,
    /// Timed trials per size
    pub repetitions: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        CalibratorConfig {
            line_size: DEFAULT_LINE_SIZE,
            sizes: DEFAULT_SIZES.to_vec(),
            repetitions: DEFAULT_REPETITIONS,
        }
    }
}

impl CalibratorConfig {
    pub fn with_line_size(mut self, line_size: usize) -> Self {
        self.line_size = line_size;
        self
    }

    pub fn with_sizes(mut self, sizes: impl Into<Vec<usize>>) -> Self {
        self.sizes = sizes.into();
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Reject configurations that cannot produce a meaningful curve
    pub fn validate(&self) -> Result<()> {
        if self.line_size == 0 {
            return Err(Error::misconfigured("cache line stride must be non-zero"));
        }
        if self.repetitions == 0 {
            return Err(Error::misconfigured("repetition count must be non-zero"));
        }
        if self.sizes.is_empty() {
            return Err(Error::misconfigured("no working-set sizes given"));
        }
        if self.sizes.contains(&0) {
            return Err(Error::misconfigured("working-set sizes must be non-zero"));
        }
        if let Some(pair) = self.sizes.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::misconfigured(format!(
                "working-set sizes must be strictly increasing ({} then {})",
                pair[0], pair[1]
            )));
        }
        Ok(())
    }
}

/// Parameters of one occupancy sampling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Bytes between consecutive touches
    pub line_size: usize,
    /// Probe buffer size in bytes, ideally the size of the monitored cache
    pub buffer_size: usize,
    /// Total observation duration
    pub duration: Duration,
    /// Length of one counting window
    pub window: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            line_size: DEFAULT_LINE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            duration: DEFAULT_DURATION,
            window: DEFAULT_WINDOW,
        }
    }
}

impl SamplerConfig {
    pub fn with_line_size(mut self, line_size: usize) -> Self {
        self.line_size = line_size;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Number of windows in a full run, ⌊duration / window⌋.
    ///
    /// Zero when the window is zero or the count does not fit in `usize`;
    /// [`SamplerConfig::validate`] rejects both.
    pub fn windows(&self) -> usize {
        self.window_count().unwrap_or(0)
    }

    fn window_count(&self) -> Option<usize> {
        let ratio = self.duration.as_nanos().checked_div(self.window.as_nanos())?;
        usize::try_from(ratio).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.line_size == 0 {
            return Err(Error::misconfigured("cache line stride must be non-zero"));
        }
        if self.buffer_size < self.line_size {
            return Err(Error::misconfigured(format!(
                "probe buffer ({} B) is smaller than one cache line ({} B)",
                self.buffer_size, self.line_size
            )));
        }
        if self.duration.is_zero() || self.window.is_zero() {
            return Err(Error::misconfigured("durations must be non-zero"));
        }
        if self.window > self.duration {
            return Err(Error::misconfigured(format!(
                "window ({:?}) exceeds total duration ({:?})",
                self.window, self.duration
            )));
        }
        if self.window_count().is_none() {
            return Err(Error::misconfigured(format!(
                "{:?} / {:?} windows do not fit in usize",
                self.duration, self.window
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(CalibratorConfig::default().validate().is_ok());
        let sampler = SamplerConfig::default();
        assert!(sampler.validate().is_ok());
        assert_eq!(sampler.windows(), 1000);
    }

    #[test]
    fn calibrator_rejects_bad_sizes() {
        let base = CalibratorConfig::default();
        for sizes in [vec![], vec![0, 10], vec![10, 10], vec![100, 10]] {
            let err = base.clone().with_sizes(sizes).validate().unwrap_err();
            assert!(matches!(err, Error::Misconfiguration(_)));
        }
        assert!(base.clone().with_repetitions(0).validate().is_err());
        assert!(base.with_line_size(0).validate().is_err());
    }

    #[test]
    fn window_longer_than_duration_is_rejected() {
        let cfg = SamplerConfig::default()
            .with_duration(Duration::from_millis(10))
            .with_window(Duration::from_millis(11));
        assert!(matches!(cfg.validate(), Err(Error::Misconfiguration(_))));

        let cfg = cfg.with_window(Duration::from_millis(10));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.windows(), 1);
    }

    #[test]
    fn sampler_rejects_degenerate_values() {
        let base = SamplerConfig::default();
        assert!(base.clone().with_window(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_duration(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_buffer_size(32).validate().is_err());
        assert!(base.with_line_size(0).validate().is_err());
    }

    #[test]
    fn window_count_rounds_down() {
        let cfg = SamplerConfig::default()
            .with_duration(Duration::from_millis(25))
            .with_window(Duration::from_millis(10));
        assert_eq!(cfg.windows(), 2);
    }

    #[test]
    fn unrepresentable_window_count_is_rejected() {
        let cfg = SamplerConfig::default()
            .with_duration(Duration::from_secs(u64::MAX))
            .with_window(Duration::from_nanos(1));
        assert!(matches!(cfg.validate(), Err(Error::Misconfiguration(_))));
        assert_eq!(cfg.windows(), 0);
    }

    #[test]
    fn detected_geometry_is_usable() {
        assert!(detect_line_size().is_power_of_two());
        assert!(detect_llc_size() >= detect_line_size());
    }
}
