//! Double-mapped circular byte buffer with a buffered byte-source reader
//!
//! The core trick: one block of anonymous shared memory is mapped twice
//! into adjacent virtual address ranges, so a logical ring never
//! special-cases its wrap boundary. Any read or write of up to the
//! ring's capacity is a single contiguous memory access, even when it
//! straddles the physical end.
//!
//! [`DoubleMappedRing`] owns the mapping; [`BufferedReader`] sits on top
//! of it and a [`ByteSource`] (a serial port, a pipe, a replayed
//! capture), pulling large chunks into the ring and serving fixed-size
//! contiguous reads out of it.
//!
//! ```
//! use mirror_ring::{BufferedReader, ReadSource, DEFAULT_CAPACITY};
//!
//! # fn main() -> mirror_ring::Result<()> {
//! let capture = ReadSource::new(std::io::Cursor::new(vec![0x42u8; 4096]));
//! let mut reader = BufferedReader::new(capture, DEFAULT_CAPACITY)?;
//!
//! let frame = reader.read(1024)?;
//! assert_eq!(frame.len(), 1024);
//! assert!(frame.iter().all(|&b| b == 0x42));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod platform;
pub mod reader;
pub mod ring;
pub mod source;

pub use error::*;
pub use reader::*;
pub use ring::*;
pub use source::*;

/// Default ring capacity (64 KiB)
///
/// A multiple of the allocation granularity on every supported platform,
/// including the 64 KiB Windows requirement.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;
