//! Timing primitives shared by both measurement engines.
//!
//! Every probe access goes through [`sweep`], which performs volatile loads so
//! the optimizer can neither drop nor merge them. All waiting is done by
//! re-reading the monotonic clock, never by sleeping.
use serde::Serializer;
use std::hint::black_box;
use std::ptr;
use std::time::{Duration, Instant};

/// Touch one byte per `stride` bytes of `buf`, in a single linear pass.
///
/// Returns the XOR of every byte read, which callers should feed to
/// [`black_box`] or otherwise keep observable.
#[inline(never)]
pub fn sweep(buf: &[u8], stride: usize) -> u8 {
    let mut sink = 0u8;
    for byte in buf.iter().step_by(stride) {
        // SAFETY: `byte` is a valid, aligned reference into `buf`
        sink ^= unsafe { ptr::read_volatile(byte) };
    }
    sink
}

/// Time a single [`sweep`] of `buf`
#[inline]
pub fn time_sweep(buf: &[u8], stride: usize) -> Duration {
    let start = Instant::now();
    black_box(sweep(buf, stride));
    start.elapsed()
}

/// Median of `samples`, sorting them in place. For an even count the upper
/// median (`sorted[len / 2]`) is returned.
pub fn median<T: Ord + Copy>(samples: &mut [T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    Some(samples[samples.len() / 2])
}

/// Estimate the smallest observable step of the monotonic clock
pub fn clock_resolution() -> Duration {
    const PROBES: usize = 16;

    let mut best = Duration::MAX;
    for _ in 0..PROBES {
        let start = Instant::now();
        let mut now = Instant::now();
        while now == start {
            now = Instant::now();
        }
        best = best.min(now - start);
    }
    best
}

/// Serialize a [`Duration`] as fractional milliseconds
pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1e6)
}
