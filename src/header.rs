//! On-flash sector and slot headers
//!
//! Every status word is a `u32` whose successive states only clear bits, so
//! each transition can be programmed in place without an erase.
//!
//! ```text
//! Sector header (16 bytes, start of every sector)
//!   0  magic    u32  "RNFR"
//!   4  version  u32  caller schema tag
//!   8  epoch    u32  blank until the sector takes data
//!  12  status   u32  ERASED → FREE → IN_USE → ERASING → FORMATTING
//!
//! Slot header (12 bytes, followed by object_size payload bytes)
//!   0  status   u32  ERASED → RESERVED → VALID → GARBAGE
//!   4  length   u16  payload bytes stored
//!   6  reserved u16  left blank
//!   8  crc32    u32  over the stored payload
//! ```
//!
//! All integers are little-endian.

use crate::flash::is_erased;

pub const MAGIC: u32 = u32::from_le_bytes(*b"RNFR");
pub const SECTOR_HEADER_SIZE: usize = 16;
pub const SLOT_HEADER_SIZE: usize = 12;

/// Epoch field of a sector that never took data
pub const EPOCH_BLANK: u32 = u32::MAX;

pub(crate) const SECTOR_EPOCH_OFFSET: usize = 8;
pub(crate) const SECTOR_STATUS_OFFSET: usize = 12;
pub(crate) const SLOT_COMMIT_OFFSET: usize = 4;

/// Lifecycle of a sector
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    /// Default state after erase
    Erased = 0xFFFF_FFFF,
    /// Header written, ready to take data
    Free = 0xFFFF_FF00,
    /// Holds slots
    InUse = 0xFFFF_0000,
    /// Scheduled for erase
    Erasing = 0xFF00_0000,
    /// The whole partition is being formatted
    Formatting = 0x0000_0000,
}

impl SectorStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0xFFFF_FFFF => Some(Self::Erased),
            0xFFFF_FF00 => Some(Self::Free),
            0xFFFF_0000 => Some(Self::InUse),
            0xFF00_0000 => Some(Self::Erasing),
            0x0000_0000 => Some(Self::Formatting),
            _ => None,
        }
    }
}

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Never written
    Erased,
    /// Write started but not committed
    Reserved,
    /// Committed, holds an object
    Valid,
    /// Discarded
    Garbage,
    /// Bit pattern matching no known state
    Unknown(u32),
}

impl SlotStatus {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0xFFFF_FFFF => Self::Erased,
            0xFFFF_FF00 => Self::Reserved,
            0xFFFF_0000 => Self::Valid,
            0xFF00_0000 => Self::Garbage,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Erased => 0xFFFF_FFFF,
            Self::Reserved => 0xFFFF_FF00,
            Self::Valid => 0xFFFF_0000,
            Self::Garbage => 0xFF00_0000,
            Self::Unknown(raw) => raw,
        }
    }

    /// A write can land here (after a payload check for `Reserved`)
    pub fn is_uncommitted(self) -> bool {
        matches!(self, Self::Erased | Self::Reserved)
    }

    /// One-character form used by the dump
    pub fn symbol(self) -> char {
        match self {
            Self::Erased => '_',
            Self::Reserved => '?',
            Self::Valid => '.',
            Self::Garbage => 'x',
            Self::Unknown(_) => '!',
        }
    }
}

/// What scan makes of a sector header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorState {
    /// Fully erased header
    Blank,
    /// Left mid-format
    Formatting,
    /// Mid-erase, or a header half written after an erase
    Stale,
    /// Someone else's data (wrong magic, version or status)
    Foreign,
    /// Ours, ready to take data
    Free,
    /// Ours, holding slots
    InUse { epoch: u32 },
}

impl SectorState {
    /// Carries this ring's magic and version
    pub fn is_recognized(&self) -> bool {
        matches!(self, SectorState::Free | SectorState::InUse { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SectorState::Blank => "BLANK",
            SectorState::Formatting => "FORMATTING",
            SectorState::Stale => "STALE",
            SectorState::Foreign => "FOREIGN",
            SectorState::Free => "FREE",
            SectorState::InUse { .. } => "IN_USE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    pub magic: u32,
    pub version: u32,
    pub epoch: u32,
    pub status: u32,
}

impl SectorHeader {
    /// Header written right after an erase: epoch and status left blank
    pub fn fresh(version: u32) -> Self {
        SectorHeader {
            magic: MAGIC,
            version,
            epoch: EPOCH_BLANK,
            status: SectorStatus::Erased as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; SECTOR_HEADER_SIZE] {
        let mut bytes = [0u8; SECTOR_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.epoch.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.status.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SECTOR_HEADER_SIZE]) -> Self {
        SectorHeader {
            magic: read_u32(bytes, 0),
            version: read_u32(bytes, 4),
            epoch: read_u32(bytes, 8),
            status: read_u32(bytes, 12),
        }
    }

    /// Classify against the version this ring expects
    pub fn classify(&self, version: u32, raw: &[u8; SECTOR_HEADER_SIZE]) -> SectorState {
        match SectorStatus::from_u32(self.status) {
            Some(SectorStatus::Formatting) => SectorState::Formatting,
            Some(SectorStatus::Erasing) => SectorState::Stale,
            Some(SectorStatus::Erased) if is_erased(raw) => SectorState::Blank,
            Some(SectorStatus::Erased) => SectorState::Stale,
            Some(status) if self.magic == MAGIC && self.version == version => match status {
                // A free sector with an epoch was caught mid-transition
                SectorStatus::Free if self.epoch != EPOCH_BLANK => SectorState::Stale,
                SectorStatus::Free => SectorState::Free,
                _ => SectorState::InUse { epoch: self.epoch },
            },
            _ => SectorState::Foreign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub status: SlotStatus,
    pub length: u16,
    pub crc: u32,
}

impl SlotHeader {
    pub fn from_bytes(bytes: &[u8; SLOT_HEADER_SIZE]) -> Self {
        SlotHeader {
            status: SlotStatus::from_u32(read_u32(bytes, 0)),
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
            crc: read_u32(bytes, 8),
        }
    }

    /// Length and checksum, programmed after the payload
    pub fn commit_bytes(length: u16, crc: u32) -> [u8; SLOT_HEADER_SIZE - SLOT_COMMIT_OFFSET] {
        let mut bytes = [0xFFu8; SLOT_HEADER_SIZE - SLOT_COMMIT_OFFSET];
        bytes[0..2].copy_from_slice(&length.to_le_bytes());
        bytes[4..8].copy_from_slice(&crc.to_le_bytes());
        bytes
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Wraparound-aware epoch ordering
///
/// Epochs are fixed-width counters, so `a` is newer than `b` when the
/// signed distance from `b` to `a` is positive. Valid for any two epochs
/// less than 2^31 apart.
pub fn epoch_cmp(a: u32, b: u32) -> std::cmp::Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    const VERSION: u32 = 0x42;

    fn classify(header: SectorHeader) -> SectorState {
        header.classify(VERSION, &header.to_bytes())
    }

    #[test]
    fn test_sector_header_serialization() {
        let header = SectorHeader {
            magic: MAGIC,
            version: VERSION,
            epoch: 7,
            status: SectorStatus::InUse as u32,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"RNFR");
        assert_eq!(SectorHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_status_transitions_only_clear_bits() {
        let sectors = [
            SectorStatus::Erased as u32,
            SectorStatus::Free as u32,
            SectorStatus::InUse as u32,
            SectorStatus::Erasing as u32,
            SectorStatus::Formatting as u32,
        ];
        for pair in sectors.windows(2) {
            assert_eq!(pair[0] & pair[1], pair[1]);
        }

        let slots = [
            SlotStatus::Erased,
            SlotStatus::Reserved,
            SlotStatus::Valid,
            SlotStatus::Garbage,
        ];
        for pair in slots.windows(2) {
            assert_eq!(pair[0].to_u32() & pair[1].to_u32(), pair[1].to_u32());
        }
    }

    #[test]
    fn test_classify_blank() {
        let bytes = [0xFFu8; SECTOR_HEADER_SIZE];
        let header = SectorHeader::from_bytes(&bytes);
        assert_eq!(header.classify(VERSION, &bytes), SectorState::Blank);
    }

    #[test]
    fn test_classify_half_written_header_is_stale() {
        // Magic and version landed, status did not
        assert_eq!(classify(SectorHeader::fresh(VERSION)), SectorState::Stale);
    }

    #[test]
    fn test_classify_free_and_in_use() {
        let mut header = SectorHeader::fresh(VERSION);
        header.status = SectorStatus::Free as u32;
        assert_eq!(classify(header), SectorState::Free);

        header.epoch = 3;
        assert_eq!(classify(header), SectorState::Stale);

        header.status = SectorStatus::InUse as u32;
        assert_eq!(classify(header), SectorState::InUse { epoch: 3 });
    }

    #[test]
    fn test_classify_foreign() {
        let mut header = SectorHeader::fresh(VERSION + 1);
        header.status = SectorStatus::Free as u32;
        assert_eq!(classify(header), SectorState::Foreign);

        let mut header = SectorHeader::fresh(VERSION);
        header.magic = 0xDEAD_BEEF;
        header.status = SectorStatus::InUse as u32;
        assert_eq!(classify(header), SectorState::Foreign);

        let mut header = SectorHeader::fresh(VERSION);
        header.status = 0x1234_5678;
        assert_eq!(classify(header), SectorState::Foreign);
    }

    #[test]
    fn test_classify_formatting_ignores_magic() {
        let mut header = SectorHeader::fresh(VERSION + 9);
        header.status = SectorStatus::Formatting as u32;
        assert_eq!(classify(header), SectorState::Formatting);
    }

    #[test]
    fn test_slot_header_parse() {
        let mut bytes = [0xFFu8; SLOT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&SlotStatus::Valid.to_u32().to_le_bytes());
        bytes[4..12].copy_from_slice(&SlotHeader::commit_bytes(5, 0xCAFE_F00D));

        let header = SlotHeader::from_bytes(&bytes);
        assert_eq!(header.status, SlotStatus::Valid);
        assert_eq!(header.length, 5);
        assert_eq!(header.crc, 0xCAFE_F00D);
        // reserved half-word stays blank
        assert_eq!(&bytes[6..8], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_unknown_slot_status() {
        let status = SlotStatus::from_u32(0x00FF_00FF);
        assert_eq!(status, SlotStatus::Unknown(0x00FF_00FF));
        assert!(!status.is_uncommitted());
        assert_eq!(status.symbol(), '!');
    }

    #[test]
    fn test_epoch_cmp_plain() {
        assert_eq!(epoch_cmp(5, 3), Ordering::Greater);
        assert_eq!(epoch_cmp(3, 5), Ordering::Less);
        assert_eq!(epoch_cmp(4, 4), Ordering::Equal);
    }

    #[test]
    fn test_epoch_cmp_across_wrap() {
        assert_eq!(epoch_cmp(0, u32::MAX), Ordering::Greater);
        assert_eq!(epoch_cmp(2, u32::MAX - 1), Ordering::Greater);
        assert_eq!(epoch_cmp(u32::MAX, 1), Ordering::Less);
        // EPOCH_BLANK is an ordinary value once a sector is in use
        assert_eq!(epoch_cmp(EPOCH_BLANK, EPOCH_BLANK - 1), Ordering::Greater);
    }
}
