//! Partition geometry and ring configuration
//!
//! Both halves can be built in code or loaded from a TOML file:
//!
//! ```toml
//! [partition]
//! sector_size = 4096
//! sector_offset = 0
//! sector_count = 8
//!
//! [ring]
//! version = 0x42
//! object_size = 16
//! reject_write_when_full = false
//! ```

use crate::error::{Result, RingFsError};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// The slice of a flash device owned by one ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Bytes per erase unit
    pub sector_size: usize,

    /// First device sector used by the ring
    #[serde(default)]
    pub sector_offset: usize,

    /// Number of sectors in the ring
    pub sector_count: usize,
}

impl Partition {
    pub fn new(sector_size: usize, sector_offset: usize, sector_count: usize) -> Self {
        Partition {
            sector_size,
            sector_offset,
            sector_count,
        }
    }

    /// Check that a ring can live on this partition
    ///
    /// One sector is always kept erased ahead of the write head, so at
    /// least two are needed for any data to fit.
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 {
            return Err(RingFsError::Configuration(
                "sector_size must be non-zero".to_string(),
            ));
        }

        if self.sector_count < 2 {
            return Err(RingFsError::Configuration(format!(
                "sector_count must be at least 2, got {}",
                self.sector_count
            )));
        }

        if self.sector_offset.checked_add(self.sector_count).is_none() {
            return Err(RingFsError::Configuration(format!(
                "sector range {}+{} overflows",
                self.sector_offset, self.sector_count
            )));
        }

        Ok(())
    }

    /// Absolute device sectors owned by the ring
    pub fn sectors(&self) -> Range<usize> {
        self.sector_offset..self.sector_offset + self.sector_count
    }

    pub fn contains(&self, sector: usize) -> bool {
        self.sectors().contains(&sector)
    }

    /// Total partition size in bytes
    pub fn size_bytes(&self) -> usize {
        self.sector_size * self.sector_count
    }
}

/// Behaviour of one ring instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Schema tag stamped into every sector header. Bump it whenever the
    /// object layout changes incompatibly; sectors with another tag are
    /// treated as foreign.
    pub version: u32,

    /// Maximum object size in bytes
    pub object_size: usize,

    /// Fail appends with [`RingFsError::Full`] instead of dropping the
    /// oldest sector of entries
    #[serde(default)]
    pub reject_write_when_full: bool,
}

impl RingConfig {
    pub fn new(version: u32, object_size: usize) -> Self {
        RingConfig {
            version,
            object_size,
            reject_write_when_full: false,
        }
    }

    pub fn with_reject_write_when_full(mut self, reject: bool) -> Self {
        self.reject_write_when_full = reject;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.object_size == 0 {
            return Err(RingFsError::Configuration(
                "object_size must be non-zero".to_string(),
            ));
        }

        // Stored lengths are u16 on flash
        if self.object_size > u16::MAX as usize {
            return Err(RingFsError::Configuration(format!(
                "object_size {} exceeds maximum of {}",
                self.object_size,
                u16::MAX
            )));
        }

        Ok(())
    }
}

/// Partition plus ring settings, as loaded from a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingFsConfig {
    pub partition: Partition,
    pub ring: RingConfig,
}

impl RingFsConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: RingFsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.partition.validate()?;
        self.ring.validate()
    }
}
