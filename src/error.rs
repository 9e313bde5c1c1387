//! Error kinds shared by the calibrator and the occupancy sampler.
use thiserror::Error;

/// Failures surfaced by the measurement engines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The probe buffer could not be allocated (or its size overflowed `usize`)
    #[error("unable to allocate a {bytes} byte probe buffer")]
    ResourceExhaustion { bytes: usize },

    /// Caller-side precondition violation, rejected before any measurement starts
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
}

impl Error {
    pub(crate) fn misconfigured(msg: impl Into<String>) -> Self {
        Error::Misconfiguration(msg.into())
    }

    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Error::ResourceExhaustion { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
