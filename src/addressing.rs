//! Sector/slot locations and ring arithmetic

use crate::config::Partition;
use std::fmt;
use std::ops::Range;

/// A slot position on the partition, using absolute device sector numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub sector: usize,
    pub slot: usize,
}

impl Location {
    pub const fn new(sector: usize, slot: usize) -> Self {
        Location { sector, slot }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.sector, self.slot)
    }
}

/// Forward movement around the ring
///
/// Raw sector numbers wrap, so positions are only ever compared through
/// forward distances, never with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    sector_offset: usize,
    sector_count: usize,
    slots_per_sector: usize,
}

impl Addressing {
    pub fn new(partition: &Partition, slots_per_sector: usize) -> Self {
        Addressing {
            sector_offset: partition.sector_offset,
            sector_count: partition.sector_count,
            slots_per_sector,
        }
    }

    /// Slot 0 of the first sector
    pub fn first(&self) -> Location {
        Location::new(self.sector_offset, 0)
    }

    pub fn sectors(&self) -> Range<usize> {
        self.sector_offset..self.sector_offset + self.sector_count
    }

    pub fn total_slots(&self) -> usize {
        self.sector_count * self.slots_per_sector
    }

    pub fn contains(&self, loc: Location) -> bool {
        self.sectors().contains(&loc.sector) && loc.slot < self.slots_per_sector
    }

    pub fn next_sector(&self, sector: usize) -> usize {
        if sector + 1 == self.sector_offset + self.sector_count {
            self.sector_offset
        } else {
            sector + 1
        }
    }

    /// Next slot, spilling into slot 0 of the next sector
    pub fn advance(&self, loc: Location) -> Location {
        if loc.slot + 1 < self.slots_per_sector {
            Location::new(loc.sector, loc.slot + 1)
        } else {
            self.start_of_next_sector(loc)
        }
    }

    pub fn start_of_next_sector(&self, loc: Location) -> Location {
        Location::new(self.next_sector(loc.sector), 0)
    }

    /// Sectors crossed going forward from `from` to `to`
    pub fn sector_distance(&self, from: usize, to: usize) -> usize {
        (to + self.sector_count - from) % self.sector_count
    }

    /// Slots crossed going forward from `from` to `to`
    pub fn slot_distance(&self, from: Location, to: Location) -> usize {
        let total = self.total_slots();
        let ahead = self.sector_distance(from.sector, to.sector) * self.slots_per_sector + to.slot;
        (ahead + total - from.slot) % total
    }
}
