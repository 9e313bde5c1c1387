//! Cache-occupancy side-channel sampling.
//!
//! [`calibrator::Calibrator`] scans working sets of increasing size to locate
//! cache boundaries, and [`sampler::Sampler`] counts probe-buffer sweeps per
//! time window to produce an occupancy trace. Both can run inline or inside a
//! dedicated worker thread from [`node`].
pub mod calibrator;
pub mod config;
pub mod error;
pub mod node;
pub mod probe;
pub mod sampler;
pub mod timing;

pub use calibrator::{Calibration, CalibrationSample, Calibrator};
pub use config::{CalibratorConfig, SamplerConfig};
pub use error::{Error, Result};
pub use sampler::{OccupancyTrace, Sampler, TraceStats};

/// Convert number of bytes to formatted string
pub fn format_size(bytes: f32) -> String {
    const GB: f32 = 1024.0 * 1024.0 * 1024.0;
    const MB: f32 = 1024.0 * 1024.0;
    const KB: f32 = 1024.0;

    if bytes >= GB {
        format!("{:.2} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes / KB)
    } else {
        format!("{:.2} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:>4} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}
