//! Flash capability consumed by the ring
//!
//! The ring never touches a physical medium directly. The host supplies an
//! implementation of [`Flash`] for its chip (or a simulator, see
//! [`crate::sim`]) and the ring drives it through three calls.

use thiserror::Error;

/// Value of every byte in a freshly erased sector
pub const ERASED_BYTE: u8 = 0xFF;

/// Flash capability errors
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Erase failed for sector {sector}")]
    Erase { sector: usize },

    #[error("Program failed at sector {sector}, offset {offset}")]
    Program { sector: usize, offset: usize },

    #[error("Read failed at sector {sector}, offset {offset}")]
    Read { sector: usize, offset: usize },

    #[error("Short program at sector {sector}, offset {offset}: wrote {written} of {expected} bytes")]
    ShortWrite {
        sector: usize,
        offset: usize,
        written: usize,
        expected: usize,
    },

    #[error("Access out of bounds: sector {sector}, offset {offset}, length {len}")]
    OutOfBounds {
        sector: usize,
        offset: usize,
        len: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Erase/program/read over a device of uniform sectors
///
/// Sector indices are absolute device sector numbers; offsets are byte
/// offsets within the sector. Programming follows NOR semantics: it can
/// only clear bits, so a region must be erased before it is written with
/// arbitrary data.
///
/// ```rust
/// use ringfs_rs::flash::{Flash, FlashError};
///
/// struct Chip {
///     /* driver handle */
/// }
///
/// impl Flash for Chip {
///     fn erase(&mut self, sector: usize) -> Result<(), FlashError> {
///         unimplemented!()
///     }
///
///     fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError> {
///         unimplemented!()
///     }
///
///     fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
///         unimplemented!()
///     }
/// }
/// ```
pub trait Flash {
    /// Erase one sector back to [`ERASED_BYTE`]. Must be idempotent.
    fn erase(&mut self, sector: usize) -> Result<(), FlashError>;

    /// Program `data` at `offset` within `sector`, returning the number of
    /// bytes written.
    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError>;

    /// Fill `buf` with the bytes at `offset` within `sector`.
    fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn erase(&mut self, sector: usize) -> Result<(), FlashError> {
        (**self).erase(sector)
    }

    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError> {
        (**self).program(sector, offset, data)
    }

    fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(sector, offset, buf)
    }
}

impl<F: Flash + ?Sized> Flash for Box<F> {
    fn erase(&mut self, sector: usize) -> Result<(), FlashError> {
        (**self).erase(sector)
    }

    fn program(&mut self, sector: usize, offset: usize, data: &[u8]) -> Result<usize, FlashError> {
        (**self).program(sector, offset, data)
    }

    fn read(&mut self, sector: usize, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(sector, offset, buf)
    }
}

/// True if every byte is still in the erased state
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED_BYTE)
}
