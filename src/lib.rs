//! # RingFS - Crash-Safe Object Ring for Flash
//!
//! `ringfs-rs` stores fixed-maximum-size objects in a circular log spread
//! over a contiguous range of flash sectors. It is built for NOR-style
//! devices where erase works on whole sectors and programming can only
//! clear bits:
//!
//! - **FIFO semantics**: append at the head, fetch and discard at the tail
//! - **Crash safety**: every state change is a single bit-clearing program,
//!   and [`RingFs::scan`] rebuilds the ring after power loss
//! - **Replay**: fetched objects stay on flash until discarded, and
//!   [`RingFs::rewind`] hands them out again
//! - **Bounded wear**: sectors are erased one at a time as the ring turns
//! - **Pluggable storage**: anything implementing [`Flash`]
//!
//! ## Architecture
//!
//! ```text
//!   RingFs<F: Flash>     append / fetch / discard / rewind / scan
//!        │
//!        ├── Layout       slots per sector, byte offsets
//!        ├── Addressing   wrap-around sector and slot arithmetic
//!        ├── header       sector and slot status words, epochs
//!        │
//!   Flash trait          erase / program / read
//!        ├── SimFlash     in-memory NOR with fault injection
//!        └── FileFlash    memory-mapped image file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ringfs_rs::{Partition, RingConfig, RingFs, Result, SimFlash};
//!
//! # fn main() -> Result<()> {
//! let mut flash = SimFlash::new(4096, 8);
//! let mut ring = RingFs::new(&mut flash, Partition::new(4096, 0, 8), RingConfig::new(1, 32))?;
//!
//! // First boot: recover if possible, otherwise start fresh
//! if ring.scan().is_err() {
//!     ring.format()?;
//! }
//!
//! ring.append(b"temperature=21.5")?;
//!
//! let object = ring.fetch()?;
//! assert_eq!(object, b"temperature=21.5");
//!
//! // Acknowledge once the object is safely handed off
//! ring.discard()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Files
//!
//! ```rust,no_run
//! use ringfs_rs::{FileFlash, RingFs, RingFsConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let config = RingFsConfig::load("ring.toml")?;
//! let flash = FileFlash::open("ring.img", config.partition.sector_size)?;
//! let mut ring = RingFs::from_config(flash, &config)?;
//! ring.scan()?;
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod config;
pub mod error;
pub mod flash;
pub mod header;
pub mod layout;
pub mod ring;
pub mod sim;

pub use addressing::Location;
pub use config::{Partition, RingConfig, RingFsConfig};
pub use error::{Result, RingFsError};
pub use flash::{Flash, FlashError};
pub use header::MAGIC;
pub use layout::Layout;
pub use ring::RingFs;
pub use sim::{FileFlash, FlashStats, SimFlash};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
