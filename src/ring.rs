//! The ring: format, recovery scan and FIFO operations
//!
//! Three locations drive everything:
//!
//! - `write`: next slot to program
//! - `read`: oldest committed, undiscarded slot
//! - `cursor`: next slot [`RingFs::fetch`] returns; runs ahead of `read`
//!   until [`RingFs::discard`] or [`RingFs::rewind`]
//!
//! The sector after the write sector is always kept FREE, which is why one
//! sector never counts towards [`RingFs::capacity`].
//!
//! Appends program a slot in four steps (status RESERVED, payload, length
//! and checksum, status VALID), so power loss at any point leaves at most
//! one slot that scan recognises as uncommitted.
//!
//! Scan cannot see how far a consumer had fetched, so after a restart the
//! cursor starts again at `read` and unacknowledged objects are delivered
//! a second time.

use crate::addressing::{Addressing, Location};
use crate::config::{Partition, RingConfig, RingFsConfig};
use crate::error::{Result, RingFsError};
use crate::flash::{is_erased, Flash, FlashError, ERASED_BYTE};
use crate::header::{
    epoch_cmp, SectorHeader, SectorState, SectorStatus, SlotHeader, SlotStatus, SECTOR_EPOCH_OFFSET, SECTOR_HEADER_SIZE, SECTOR_STATUS_OFFSET, SLOT_COMMIT_OFFSET,
    SLOT_HEADER_SIZE,
};
use crate::layout::Layout;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// A ring-structured object log on a flash partition
///
/// `F` is usually `&mut Chip` so the host keeps ownership of the device;
/// any [`Flash`] works. Every operation takes `&mut self`; share an
/// instance between threads only behind a lock.
pub struct RingFs<F: Flash> {
    flash: F,
    partition: Partition,
    config: RingConfig,
    layout: Layout,
    addr: Addressing,
    read: Location,
    write: Location,
    cursor: Location,
    next_epoch: u32,
}

impl<F: Flash> RingFs<F> {
    /// Bind a ring to a partition. Nothing is read or written until
    /// [`format`](Self::format) or [`scan`](Self::scan).
    pub fn new(flash: F, partition: Partition, config: RingConfig) -> Result<Self> {
        partition.validate()?;
        config.validate()?;

        let layout = Layout::new(partition.sector_size, config.object_size)?;
        let addr = Addressing::new(&partition, layout.slots_per_sector());
        let start = addr.first();

        debug!(
            sector_size = partition.sector_size,
            sector_offset = partition.sector_offset,
            sector_count = partition.sector_count,
            object_size = config.object_size,
            slots_per_sector = layout.slots_per_sector(),
            "ring initialized"
        );

        Ok(RingFs {
            flash,
            partition,
            config,
            layout,
            addr,
            read: start,
            write: start,
            cursor: start,
            next_epoch: 0,
        })
    }

    pub fn from_config(flash: F, config: &RingFsConfig) -> Result<Self> {
        Self::new(flash, config.partition, config.ring)
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn version(&self) -> u32 {
        self.config.version
    }

    pub fn object_size(&self) -> usize {
        self.config.object_size
    }

    pub fn slots_per_sector(&self) -> usize {
        self.layout.slots_per_sector()
    }

    /// Switch the full-ring policy at runtime
    pub fn set_reject_write_when_full(&mut self, reject: bool) {
        self.config.reject_write_when_full = reject;
    }

    pub fn read_location(&self) -> Location {
        self.read
    }

    pub fn write_location(&self) -> Location {
        self.write
    }

    pub fn cursor_location(&self) -> Location {
        self.cursor
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Erase the whole partition and start an empty ring at its first sector
    ///
    /// Every sector is first marked FORMATTING so that a format cut short
    /// by power loss makes the next [`scan`](Self::scan) fail instead of
    /// resurrecting half-erased data. On error the ring is indeterminate
    /// and format must be retried.
    pub fn format(&mut self) -> Result<()> {
        self.format_from_epoch(0)
    }

    fn format_from_epoch(&mut self, epoch: u32) -> Result<()> {
        info!(
            sectors = ?self.addr.sectors(),
            version = self.config.version,
            "formatting ring"
        );

        for sector in self.addr.sectors() {
            self.set_sector_status(sector, SectorStatus::Formatting)?;
        }

        for sector in self.addr.sectors() {
            self.free_sector(sector)?;
        }

        let start = self.addr.first();
        self.next_epoch = epoch;
        self.mark_in_use(start.sector)?;

        self.read = start;
        self.write = start;
        self.cursor = start;

        Ok(())
    }

    /// Rebuild `read`, `write` and `cursor` from the headers on flash
    ///
    /// Never writes. The newest in-use sector (by epoch) holds the write
    /// head, the oldest holds the read head, and the cursor restarts at
    /// `read`.
    pub fn scan(&mut self) -> Result<()> {
        let mut recognized = false;
        let mut oldest: Option<(usize, u32)> = None;

        for sector in self.addr.sectors() {
            let state = self.sector_state(sector)?;
            match state {
                SectorState::Formatting => {
                    return Err(RingFsError::Corruption(format!(
                        "sector {} was left mid-format",
                        sector
                    )));
                }
                SectorState::InUse { epoch } => {
                    let older = match oldest {
                        Some((_, best)) => epoch_cmp(epoch, best) == Ordering::Less,
                        None => true,
                    };
                    if older {
                        oldest = Some((sector, epoch));
                    }
                }
                SectorState::Foreign => debug!(sector, "foreign sector header"),
                _ => {}
            }
            recognized |= state.is_recognized();
        }

        if !recognized {
            return Err(RingFsError::Corruption(format!(
                "no sector carries version {:#010x}",
                self.config.version
            )));
        }

        let Some((oldest_sector, oldest_epoch)) = oldest else {
            let start = self.addr.first();
            self.read = start;
            self.write = start;
            self.cursor = start;
            self.next_epoch = 0;
            info!(location = %start, "scan found no sectors in use, ring is empty");
            return Ok(());
        };

        // Equal epochs only happen on damaged flash; prefer the sector
        // furthest from the oldest one.
        let mut newest = (oldest_sector, oldest_epoch);
        for sector in self.addr.sectors() {
            if let SectorState::InUse { epoch } = self.sector_state(sector)? {
                let newer = match epoch_cmp(epoch, newest.1) {
                    Ordering::Greater => true,
                    Ordering::Equal => {
                        self.addr.sector_distance(oldest_sector, sector)
                            > self.addr.sector_distance(oldest_sector, newest.0)
                    }
                    Ordering::Less => false,
                };
                if newer {
                    newest = (sector, epoch);
                }
            }
        }

        let span = self.addr.sector_distance(oldest_sector, newest.0);
        if newest.1.wrapping_sub(oldest_epoch) as usize != span {
            warn!(
                oldest_sector,
                newest_sector = newest.0,
                oldest_epoch,
                newest_epoch = newest.1,
                "sector epochs disagree with ring distance"
            );
        }

        let mut write = self.addr.start_of_next_sector(Location::new(newest.0, 0));
        for slot in 0..self.layout.slots_per_sector() {
            let loc = Location::new(newest.0, slot);
            if self.slot_status(loc)?.is_uncommitted() {
                write = loc;
                break;
            }
        }

        let mut read = Location::new(oldest_sector, 0);
        while read != write && self.slot_status(read)? != SlotStatus::Valid {
            read = self.addr.advance(read);
        }

        self.write = write;
        self.read = read;
        self.cursor = read;
        self.next_epoch = newest.1.wrapping_add(1);

        info!(
            read = %self.read,
            write = %self.write,
            next_epoch = self.next_epoch,
            "scan complete"
        );

        Ok(())
    }

    /// Maximum number of objects the ring can hold
    pub fn capacity(&self) -> usize {
        (self.partition.sector_count - 1) * self.layout.slots_per_sector()
    }

    /// O(1) object count from the read and write positions alone
    ///
    /// Counts every slot between `read` and `write`, so objects discarded
    /// out of order or torn slots still inflate it.
    pub fn count_estimate(&self) -> usize {
        let sectors = self.addr.sector_distance(self.read.sector, self.write.sector);
        (sectors * self.layout.slots_per_sector() + self.write.slot).saturating_sub(self.read.slot)
    }

    /// Walk from `read` to `write` and count committed slots
    pub fn count_exact(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut loc = self.read;

        while loc != self.write {
            if self.slot_status(loc)? == SlotStatus::Valid {
                count += 1;
            }
            loc = self.addr.advance(loc);
        }

        Ok(count)
    }

    /// True when nothing between `read` and `write` is committed
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.count_exact()? == 0)
    }

    /// Append an object of `1..=object_size` bytes
    ///
    /// When the ring is full the oldest sector of entries is dropped to make
    /// room, unless `reject_write_when_full` is set, in which case
    /// [`RingFsError::Full`] is returned and nothing changes.
    pub fn append(&mut self, object: &[u8]) -> Result<()> {
        let max = self.config.object_size;
        if object.is_empty() || object.len() > max {
            return Err(RingFsError::InvalidObjectSize {
                size: object.len(),
                max,
            });
        }

        loop {
            self.prepare_write_sector()?;

            let loc = self.write;
            match self.slot_status(loc)? {
                SlotStatus::Erased => break,
                SlotStatus::Reserved if self.slot_is_reusable(loc)? => {
                    debug!(location = %loc, "reusing slot reserved before restart");
                    break;
                }
                status => {
                    warn!(location = %loc, ?status, "skipping unusable slot at write head");
                    if status != SlotStatus::Garbage {
                        self.set_slot_status(loc, SlotStatus::Garbage)?;
                    }
                    self.write = self.addr.advance(loc);
                }
            }
        }

        let loc = self.write;
        let crc = crc32fast::hash(object);

        self.set_slot_status(loc, SlotStatus::Reserved)?;
        self.program(loc.sector, self.layout.payload_offset(loc.slot), object)?;
        self.program(
            loc.sector,
            self.layout.slot_offset(loc.slot) + SLOT_COMMIT_OFFSET,
            &SlotHeader::commit_bytes(object.len() as u16, crc),
        )?;
        self.set_slot_status(loc, SlotStatus::Valid)?;

        self.write = self.addr.advance(loc);
        debug!(location = %loc, len = object.len(), "appended object");

        Ok(())
    }

    /// Return the object at the cursor and move the cursor past it
    ///
    /// `read` does not move and flash is not touched, so a
    /// [`rewind`](Self::rewind) replays everything fetched since the last
    /// discard. Uncommitted slots and slots failing their checksum are
    /// skipped.
    pub fn fetch(&mut self) -> Result<Vec<u8>> {
        while self.cursor != self.write {
            let loc = self.cursor;
            let header = self.slot_header(loc)?;

            let payload = if header.status == SlotStatus::Valid {
                self.read_payload(loc, &header)?
            } else {
                None
            };

            self.cursor = self.addr.advance(loc);
            if let Some(payload) = payload {
                return Ok(payload);
            }
        }

        Err(RingFsError::Empty)
    }

    /// Fetch into a caller buffer, copying at most `buf.len()` bytes of the
    /// object. Returns the number of bytes copied.
    pub fn fetch_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let object = self.fetch()?;
        let n = object.len().min(buf.len());
        buf[..n].copy_from_slice(&object[..n]);
        Ok(n)
    }

    /// Consume the oldest object
    ///
    /// Marks it discarded and moves `read` past it; the cursor follows if it
    /// had not got that far. A sector is erased as soon as `read` leaves it.
    pub fn discard(&mut self) -> Result<()> {
        if self.read == self.write {
            return Err(RingFsError::Empty);
        }

        let cursor_lead = self.addr.slot_distance(self.read, self.cursor);
        let mut moved = 0;
        let mut discarded = false;

        while self.read != self.write && !discarded {
            let loc = self.read;
            if self.slot_status(loc)? == SlotStatus::Valid {
                self.set_slot_status(loc, SlotStatus::Garbage)?;
                discarded = true;
            }
            if moved >= cursor_lead {
                self.cursor = self.addr.advance(loc);
            }
            self.advance_read()?;
            moved += 1;
        }

        if !discarded {
            return Err(RingFsError::Empty);
        }

        debug!(read = %self.read, cursor = %self.cursor, "discarded object");
        Ok(())
    }

    /// Consume everything already fetched: `read` catches up with `cursor`
    pub fn discard_fetched(&mut self) -> Result<()> {
        while self.read != self.cursor {
            let loc = self.read;
            if self.slot_status(loc)? == SlotStatus::Valid {
                self.set_slot_status(loc, SlotStatus::Garbage)?;
            }
            self.advance_read()?;
        }

        debug!(read = %self.read, "discarded fetched objects");
        Ok(())
    }

    /// Move the cursor back to the oldest undiscarded object
    pub fn rewind(&mut self) -> Result<()> {
        self.cursor = self.read;
        Ok(())
    }

    /// Human-readable view of the locations and every sector on flash
    ///
    /// Slot symbols: `_` erased, `?` reserved, `.` valid, `x` discarded,
    /// `!` unrecognised.
    pub fn dump(&mut self) -> Result<String> {
        let mut out = format!(
            "RingFS read: {} cursor: {} write: {} next_epoch: {}\n",
            self.read, self.cursor, self.write, self.next_epoch
        );
        out.push_str(&format!(
            "geometry: sector_size={} sectors={:?} object_size={} slot_size={} slots_per_sector={}\n",
            self.partition.sector_size,
            self.addr.sectors(),
            self.config.object_size,
            self.layout.slot_size(),
            self.layout.slots_per_sector()
        ));

        for sector in self.addr.sectors() {
            let (header, state) = self.sector_header(sector)?;
            let epoch = match state {
                SectorState::InUse { epoch } => epoch.to_string(),
                _ => "-".to_string(),
            };
            out.push_str(&format!(
                "[{:04}] [v={:#010x}] [e={:>10}] [{:<10}] ",
                sector,
                header.version,
                epoch,
                state.label()
            ));

            for slot in 0..self.layout.slots_per_sector() {
                let loc = Location::new(sector, slot);
                let status = self.slot_status(loc)?;
                out.push(status.symbol());
            }
            out.push('\n');
        }

        Ok(out)
    }

    /// Make sure the write sector can take a slot and the one after it is
    /// FREE, dropping or refusing when that sector still holds `read`
    fn prepare_write_sector(&mut self) -> Result<()> {
        let next = self.addr.next_sector(self.write.sector);

        if self.sector_state(next)? != SectorState::Free {
            let beyond = self.addr.start_of_next_sector(Location::new(next, 0));

            if self.read.sector == next {
                if self.config.reject_write_when_full {
                    return Err(RingFsError::Full);
                }
                warn!(sector = next, read = %beyond, "ring full, dropping oldest sector");
                self.read = beyond;
            }

            if self.cursor.sector == next {
                self.cursor = beyond;
            }

            self.free_sector(next)?;
        }

        match self.sector_state(self.write.sector)? {
            SectorState::InUse { .. } => Ok(()),
            SectorState::Free => self.mark_in_use(self.write.sector),
            state if self.write.slot == 0 => {
                warn!(sector = self.write.sector, state = state.label(), "reclaiming sector at write head");
                self.free_sector(self.write.sector)?;
                self.mark_in_use(self.write.sector)
            }
            state => Err(RingFsError::Corruption(format!(
                "write sector {} is {} mid-sector",
                self.write.sector,
                state.label()
            ))),
        }
    }

    fn advance_read(&mut self) -> Result<()> {
        let vacated = self.read.sector;
        self.read = self.addr.advance(self.read);

        if self.read.sector != vacated {
            self.free_sector(vacated)?;
        }

        Ok(())
    }

    /// Erase a sector and give it a FREE header
    fn free_sector(&mut self, sector: usize) -> Result<()> {
        self.set_sector_status(sector, SectorStatus::Erasing)?;
        self.flash.erase(sector)?;

        let header = SectorHeader::fresh(self.config.version).to_bytes();
        self.program(sector, 0, &header[..SECTOR_EPOCH_OFFSET])?;
        self.set_sector_status(sector, SectorStatus::Free)?;

        debug!(sector, "sector freed");
        Ok(())
    }

    /// Stamp the next epoch and flip a FREE sector to IN_USE in one program
    fn mark_in_use(&mut self, sector: usize) -> Result<()> {
        let epoch = self.next_epoch;
        let mut bytes = [0u8; SECTOR_HEADER_SIZE - SECTOR_EPOCH_OFFSET];
        bytes[..4].copy_from_slice(&epoch.to_le_bytes());
        bytes[4..].copy_from_slice(&(SectorStatus::InUse as u32).to_le_bytes());

        self.program(sector, SECTOR_EPOCH_OFFSET, &bytes)?;
        self.next_epoch = epoch.wrapping_add(1);

        debug!(sector, epoch, "sector in use");
        Ok(())
    }

    fn sector_header(&mut self, sector: usize) -> Result<(SectorHeader, SectorState)> {
        let mut raw = [0u8; SECTOR_HEADER_SIZE];
        self.flash.read(sector, 0, &mut raw)?;
        let header = SectorHeader::from_bytes(&raw);
        let state = header.classify(self.config.version, &raw);
        Ok((header, state))
    }

    fn sector_state(&mut self, sector: usize) -> Result<SectorState> {
        Ok(self.sector_header(sector)?.1)
    }

    fn set_sector_status(&mut self, sector: usize, status: SectorStatus) -> Result<()> {
        self.program(sector, SECTOR_STATUS_OFFSET, &(status as u32).to_le_bytes())
    }

    fn slot_header(&mut self, loc: Location) -> Result<SlotHeader> {
        let mut raw = [0u8; SLOT_HEADER_SIZE];
        self.flash
            .read(loc.sector, self.layout.slot_offset(loc.slot), &mut raw)?;
        Ok(SlotHeader::from_bytes(&raw))
    }

    fn slot_status(&mut self, loc: Location) -> Result<SlotStatus> {
        let mut raw = [0u8; 4];
        self.flash
            .read(loc.sector, self.layout.slot_offset(loc.slot), &mut raw)?;
        Ok(SlotStatus::from_u32(u32::from_le_bytes(raw)))
    }

    fn set_slot_status(&mut self, loc: Location, status: SlotStatus) -> Result<()> {
        self.program(
            loc.sector,
            self.layout.slot_offset(loc.slot),
            &status.to_u32().to_le_bytes(),
        )
    }

    /// A RESERVED slot whose commit fields and payload never got written
    /// can be programmed again as is
    fn slot_is_reusable(&mut self, loc: Location) -> Result<bool> {
        let mut rest = vec![ERASED_BYTE; SLOT_HEADER_SIZE - SLOT_COMMIT_OFFSET + self.config.object_size];
        self.flash.read(
            loc.sector,
            self.layout.slot_offset(loc.slot) + SLOT_COMMIT_OFFSET,
            &mut rest,
        )?;
        Ok(is_erased(&rest))
    }

    fn read_payload(&mut self, loc: Location, header: &SlotHeader) -> Result<Option<Vec<u8>>> {
        let len = header.length as usize;
        if len == 0 || len > self.config.object_size {
            warn!(location = %loc, len, "committed slot with impossible length");
            return Ok(None);
        }

        let mut payload = vec![0u8; len];
        self.flash
            .read(loc.sector, self.layout.payload_offset(loc.slot), &mut payload)?;

        if crc32fast::hash(&payload) != header.crc {
            warn!(location = %loc, "slot checksum mismatch, skipping");
            return Ok(None);
        }

        Ok(Some(payload))
    }

    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<()> {
        let written = self.flash.program(sector, offset, data)?;
        if written != data.len() {
            return Err(FlashError::ShortWrite {
                sector,
                offset,
                written,
                expected: data.len(),
            }
            .into());
        }
        Ok(())
    }
}

impl<F: Flash> std::fmt::Debug for RingFs<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingFs")
            .field("partition", &self.partition)
            .field("config", &self.config)
            .field("slots_per_sector", &self.layout.slots_per_sector())
            .field("read", &self.read)
            .field("write", &self.write)
            .field("cursor", &self.cursor)
            .field("next_epoch", &self.next_epoch)
            .finish()
    }
}
