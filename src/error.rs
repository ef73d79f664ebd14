//! Error types for ring operations

use crate::flash::FlashError;
use thiserror::Error;

/// Ring operation errors
///
/// None of these are retried internally. Retry policy for a failing medium
/// belongs to the host, which knows the device.
#[derive(Error, Debug)]
pub enum RingFsError {
    /// Geometry or configuration can never work (fatal at construction)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The flash capability failed to erase, program or read
    #[error("Flash medium error: {0}")]
    Medium(#[from] FlashError),

    /// On-flash state is not a ring this instance can recover
    #[error("Corrupted ring: {0}")]
    Corruption(String),

    /// Append rejected: ring is full and overwrite is disabled
    #[error("Ring is full")]
    Full,

    /// Nothing left to fetch or discard
    #[error("Ring is empty")]
    Empty,

    /// Object length outside `1..=object_size`
    #[error("Invalid object size: {size} bytes (must be 1..={max})")]
    InvalidObjectSize { size: usize, max: usize },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RingFsError {
    /// True for errors a caller can recover from without reformatting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RingFsError::Full | RingFsError::Empty | RingFsError::InvalidObjectSize { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RingFsError>;
