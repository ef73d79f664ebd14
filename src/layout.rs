//! Slot geometry within a sector

use crate::error::{Result, RingFsError};
use crate::header::{SECTOR_HEADER_SIZE, SLOT_HEADER_SIZE};

/// Byte layout of a sector: one header followed by fixed-size slots
///
/// ```text
/// [sector header][slot 0 hdr|payload][slot 1 hdr|payload]...[unused tail]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    sector_size: usize,
    object_size: usize,
    slot_size: usize,
    slots_per_sector: usize,
}

impl Layout {
    /// Compute the geometry, failing if not even one slot fits
    pub fn new(sector_size: usize, object_size: usize) -> Result<Self> {
        let slot_size = SLOT_HEADER_SIZE + object_size;
        let slots_per_sector = sector_size
            .checked_sub(SECTOR_HEADER_SIZE)
            .map(|usable| usable / slot_size)
            .unwrap_or(0);

        if slots_per_sector == 0 {
            return Err(RingFsError::Configuration(format!(
                "object of {} bytes does not fit a {} byte sector ({} bytes of headers)",
                object_size,
                sector_size,
                SECTOR_HEADER_SIZE + SLOT_HEADER_SIZE
            )));
        }

        Ok(Layout {
            sector_size,
            object_size,
            slot_size,
            slots_per_sector,
        })
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Slot header plus payload capacity
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slots_per_sector(&self) -> usize {
        self.slots_per_sector
    }

    /// Byte offset of a slot header within its sector
    pub fn slot_offset(&self, slot: usize) -> usize {
        SECTOR_HEADER_SIZE + slot * self.slot_size
    }

    /// Byte offset of a slot payload within its sector
    pub fn payload_offset(&self, slot: usize) -> usize {
        self.slot_offset(slot) + SLOT_HEADER_SIZE
    }

    /// Bytes of each sector actually covered by headers and slots
    pub fn used_bytes(&self) -> usize {
        SECTOR_HEADER_SIZE + self.slots_per_sector * self.slot_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_per_sector() {
        let layout = Layout::new(65536, 4).unwrap();
        assert_eq!(layout.slot_size(), 16);
        assert_eq!(layout.slots_per_sector(), (65536 - 16) / 16);
    }

    #[test]
    fn test_geometry_fits_sector() {
        for (sector, object) in [(256, 4), (256, 100), (4096, 17), (1000, 333)] {
            let layout = Layout::new(sector, object).unwrap();
            assert!(layout.used_bytes() <= layout.sector_size());
            let last = layout.slots_per_sector() - 1;
            assert!(layout.payload_offset(last) + object <= sector);
        }
    }

    #[test]
    fn test_offsets() {
        let layout = Layout::new(256, 4).unwrap();
        assert_eq!(layout.slot_offset(0), 16);
        assert_eq!(layout.payload_offset(0), 28);
        assert_eq!(layout.slot_offset(2), 48);
    }

    #[test]
    fn test_object_too_large() {
        let err = Layout::new(256, 256).unwrap_err();
        assert!(matches!(err, RingFsError::Configuration(_)));
    }

    #[test]
    fn test_sector_smaller_than_header() {
        assert!(Layout::new(8, 1).is_err());
    }

    #[test]
    fn test_exact_fit() {
        // 16 header + 2 * (12 + 10) = 60
        let layout = Layout::new(60, 10).unwrap();
        assert_eq!(layout.slots_per_sector(), 2);
        assert_eq!(layout.used_bytes(), 60);
    }
}
