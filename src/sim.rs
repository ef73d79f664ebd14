//! Flash simulators
//!
//! [`SimFlash`] keeps the whole device in memory and can inject failures
//! after a chosen number of operations, which is how the tests model power
//! loss at an exact point inside an append. [`FileFlash`] keeps the device
//! in a memory-mapped image file so a ring survives process restarts.
//!
//! Both follow NOR rules: erase sets every byte to `0xFF` and program can
//! only clear bits (`cell &= data`).

use crate::flash::{Flash, FlashError, ERASED_BYTE};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    pub erases: usize,
    pub programs: usize,
    pub reads: usize,
}

fn check_bounds(
    sector_size: usize,
    sector_count: usize,
    sector: usize,
    offset: usize,
    len: usize,
) -> Result<usize, FlashError> {
    let in_bounds = sector < sector_count
        && offset
            .checked_add(len)
            .map_or(false, |end| end <= sector_size);

    if !in_bounds {
        return Err(FlashError::OutOfBounds { sector, offset, len });
    }

    Ok(sector * sector_size + offset)
}

fn nor_program(cells: &mut [u8], data: &[u8]) {
    for (cell, byte) in cells.iter_mut().zip(data) {
        *cell &= *byte;
    }
}

/// In-memory NOR flash with fault injection
#[derive(Debug, Clone)]
pub struct SimFlash {
    sector_size: usize,
    sector_count: usize,
    data: Vec<u8>,
    stats: FlashStats,
    programs_left: Option<usize>,
    erases_left: Option<usize>,
    reads_left: Option<usize>,
}

impl SimFlash {
    /// A blank device of `sector_count` sectors
    pub fn new(sector_size: usize, sector_count: usize) -> Self {
        SimFlash {
            sector_size,
            sector_count,
            data: vec![ERASED_BYTE; sector_size * sector_count],
            stats: FlashStats::default(),
            programs_left: None,
            erases_left: None,
            reads_left: None,
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn sector_count(&self) -> usize {
        self.sector_count
    }

    /// Raw contents of one sector
    pub fn sector(&self, sector: usize) -> &[u8] {
        let start = sector * self.sector_size;
        &self.data[start..start + self.sector_size]
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    /// Let `n` more program calls succeed, then fail every one after
    pub fn fail_after_programs(&mut self, n: usize) {
        self.programs_left = Some(n);
    }

    /// Let `n` more erase calls succeed, then fail every one after
    pub fn fail_after_erases(&mut self, n: usize) {
        self.erases_left = Some(n);
    }

    /// Let `n` more read calls succeed, then fail every one after
    pub fn fail_after_reads(&mut self, n: usize) {
        self.reads_left = Some(n);
    }

    /// Power back on: clear all injected faults
    pub fn clear_faults(&mut self) {
        self.programs_left = None;
        self.erases_left = None;
        self.reads_left = None;
    }

    /// Overwrite bytes directly, bypassing NOR rules (bit rot, stray writes)
    pub fn corrupt(&mut self, sector: usize, offset: usize, bytes: &[u8]) {
        let start = sector * self.sector_size + offset;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn take(budget: &mut Option<usize>) -> bool {
        match budget {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }
}

impl Flash for SimFlash {
    fn erase(&mut self, sector: usize) -> Result<(), FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, 0, self.sector_size)?;
        if !Self::take(&mut self.erases_left) {
            return Err(FlashError::Erase { sector });
        }

        self.stats.erases += 1;
        self.data[start..start + self.sector_size].fill(ERASED_BYTE);
        Ok(())
    }

    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, offset, data.len())?;
        if !Self::take(&mut self.programs_left) {
            return Err(FlashError::Program { sector, offset });
        }

        self.stats.programs += 1;
        nor_program(&mut self.data[start..start + data.len()], data);
        Ok(data.len())
    }

    fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, offset, buf.len())?;
        if !Self::take(&mut self.reads_left) {
            return Err(FlashError::Read { sector, offset });
        }

        self.stats.reads += 1;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

/// NOR flash image backed by a memory-mapped file
pub struct FileFlash {
    map: MmapMut,
    sector_size: usize,
    sector_count: usize,
    path: PathBuf,
    _file: File,
}

impl FileFlash {
    /// Create (or truncate) an image of `sector_count` blank sectors
    pub fn create<P: AsRef<Path>>(
        path: P,
        sector_size: usize,
        sector_count: usize,
    ) -> Result<Self, FlashError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((sector_size * sector_count) as u64)?;

        let mut flash = Self::map(file, path.as_ref(), sector_size, sector_count)?;
        flash.map.fill(ERASED_BYTE);
        flash.map.flush()?;
        Ok(flash)
    }

    /// Open an existing image; its length must be a whole number of sectors
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> Result<Self, FlashError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;

        if sector_size == 0 || len % sector_size != 0 {
            return Err(FlashError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("image of {} bytes is not a multiple of {} byte sectors", len, sector_size),
            )));
        }

        Self::map(file, path.as_ref(), sector_size, len / sector_size)
    }

    fn map(
        file: File,
        path: &Path,
        sector_size: usize,
        sector_count: usize,
    ) -> Result<Self, FlashError> {
        // SAFETY: the image is only mutated through this mapping while the
        // FileFlash is alive; callers must not resize the file underneath it.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(FileFlash {
            map,
            sector_size,
            sector_count,
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sector_count(&self) -> usize {
        self.sector_count
    }

    /// Flush outstanding writes to the image file
    pub fn sync(&self) -> Result<(), FlashError> {
        self.map.flush()?;
        Ok(())
    }
}

impl Flash for FileFlash {
    fn erase(&mut self, sector: usize) -> Result<(), FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, 0, self.sector_size)?;
        self.map[start..start + self.sector_size].fill(ERASED_BYTE);
        self.map.flush_range(start, self.sector_size)?;
        Ok(())
    }

    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, offset, data.len())?;
        nor_program(&mut self.map[start..start + data.len()], data);
        self.map.flush_range(start, data.len())?;
        Ok(data.len())
    }

    fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = check_bounds(self.sector_size, self.sector_count, sector, offset, buf.len())?;
        buf.copy_from_slice(&self.map[start..start + buf.len()]);
        Ok(())
    }
}
