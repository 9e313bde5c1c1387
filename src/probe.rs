//! Probe buffer owned by a single measurement call.
use crate::error::{Error, Result};
use crate::format_size;
use crate::timing;
use log::trace;

/// Value written on first touch. Non-zero so the kernel cannot back the pages
/// with the shared zero page.
const FILL_BYTE: u8 = 0x5A;

/// A contiguous, pre-faulted byte region swept at cache-line stride
pub struct ProbeBuffer {
    bytes: Vec<u8>,
    stride: usize,
}

impl ProbeBuffer {
    /// Allocate `size` bytes and write every byte so that first-touch page
    /// faults happen here rather than inside a timed region.
    ///
    /// Only allocation failure is reported, as [`Error::ResourceExhaustion`].
    pub fn new(size: usize, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(Error::misconfigured("cache line stride must be non-zero"));
        }
        if size == 0 {
            return Err(Error::misconfigured("probe buffer size must be non-zero"));
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| Error::ResourceExhaustion { bytes: size })?;
        bytes.resize(size, FILL_BYTE);

        trace!("Allocated {} probe buffer (stride {} B)", format_size(size as f32), stride);
        Ok(ProbeBuffer { bytes, stride })
    }

    /// Allocate a buffer spanning `lines` cache lines of `stride` bytes each
    pub fn with_lines(lines: usize, stride: usize) -> Result<Self> {
        let size = lines
            .checked_mul(stride)
            .ok_or(Error::ResourceExhaustion { bytes: usize::MAX })?;
        Self::new(size, stride)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of stride-aligned offsets touched per sweep
    pub fn lines(&self) -> usize {
        self.bytes.len().div_ceil(self.stride)
    }

    /// One linear pass over every stride-aligned offset
    #[inline]
    pub fn sweep(&self) -> u8 {
        timing::sweep(&self.bytes, self.stride)
    }

    /// Time one linear pass over every stride-aligned offset
    #[inline]
    pub fn time_sweep(&self) -> std::time::Duration {
        timing::time_sweep(&self.bytes, self.stride)
    }
}
