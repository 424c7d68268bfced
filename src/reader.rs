//! Buffered reading on top of the double-mapped ring
//!
//! The reader pulls bytes from a [`ByteSource`] into the ring's tail and
//! serves fixed-size reads from its head, amortizing many small
//! transport reads into fewer large ones. Thanks to the doubled mapping
//! the fill and consume paths are plain contiguous ranges; the one place
//! that knows about wrapping is the head correction after a consume.

use std::slice;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::ring::DoubleMappedRing;
use crate::source::ByteSource;
use crate::{Result, RingError};

/// Polling behavior of the fill loop
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Timeout applied to the source once at construction
    pub poll_timeout: Duration,
    /// Consecutive empty polls tolerated within one read before the
    /// shortfall surfaces as [`RingError::SourceTimeout`]
    pub max_idle_polls: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            max_idle_polls: 8,
        }
    }
}

/// Buffered reader over a byte source
///
/// Single-threaded by construction: there is no internal locking, and
/// exactly one owner advances `head` and `resident`. A blocked read can
/// only be abandoned by invalidating the source out-of-band (see
/// [`source_mut`](Self::source_mut)), which makes the pending source
/// read return short.
pub struct BufferedReader<S> {
    source: S,
    ring: DoubleMappedRing,
    /// Offset of the first unconsumed byte, `0 <= head < capacity`
    head: usize,
    /// Valid unread bytes starting at `head`, `resident <= capacity`
    resident: usize,
    config: ReaderConfig,
}

impl<S: ByteSource> BufferedReader<S> {
    /// Create a reader with the default polling configuration
    ///
    /// `capacity` must be a positive multiple of the platform allocation
    /// granularity, same as [`DoubleMappedRing::create`].
    pub fn new(source: S, capacity: usize) -> Result<Self> {
        Self::with_config(source, capacity, ReaderConfig::default())
    }

    /// Create a reader with an explicit polling configuration
    pub fn with_config(mut source: S, capacity: usize, config: ReaderConfig) -> Result<Self> {
        let ring = DoubleMappedRing::create(capacity)?;
        source.set_timeout(config.poll_timeout)?;

        debug!(capacity, "buffered reader ready");
        Ok(Self {
            source,
            ring,
            head: 0,
            resident: 0,
            config,
        })
    }

    /// Physical capacity of the ring in bytes
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes currently buffered but not yet consumed
    pub fn resident(&self) -> usize {
        self.resident
    }

    /// The underlying source
    ///
    /// Closing or otherwise invalidating it here is the only way to
    /// abandon a blocked read.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consume the reader, returning the source
    pub fn into_source(self) -> S {
        self.source
    }

    /// Read exactly `len` bytes as one contiguous view
    ///
    /// Blocks, subject to the source's timeout, until `len` bytes are
    /// resident, then consumes them. `len` must be between 1 and the
    /// ring capacity; anything else is a caller bug and fails fast with
    /// [`RingError::InvalidReadLength`]. If the source goes idle first,
    /// [`RingError::SourceTimeout`] reports how much is buffered; those
    /// bytes stay resident for a later attempt.
    #[instrument(skip(self), fields(resident = self.resident))]
    pub fn read(&mut self, len: usize) -> Result<&[u8]> {
        let capacity = self.ring.capacity();
        if len == 0 || len > capacity {
            return Err(RingError::InvalidReadLength {
                requested: len,
                capacity,
            });
        }

        self.fill(len)?;

        // The doubled mapping makes head + len valid even past the
        // physical end, so the view is always one slice.
        let view = unsafe { slice::from_raw_parts(self.ring.as_ptr().add(self.head), len) };
        self.resident -= len;
        self.head += len;
        if self.head >= capacity {
            self.head -= capacity;
        }

        Ok(view)
    }

    /// Read exactly `dst.len()` bytes, copying them out
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        let view = self.read(dst.len())?;
        dst.copy_from_slice(view);
        Ok(())
    }

    /// Read exactly `len` bytes into an owned buffer
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.read(len)?))
    }

    /// Pull from the source until at least `needed` bytes are resident
    ///
    /// Each iteration asks for all the free space behind the resident
    /// bytes; the tail position `head + resident` needs no modulo
    /// because the doubled mapping already aliases the wrap.
    fn fill(&mut self, needed: usize) -> Result<()> {
        let capacity = self.ring.capacity();
        let mut idle_polls = 0;

        while self.resident < needed {
            let tail = unsafe {
                slice::from_raw_parts_mut(
                    self.ring.as_mut_ptr().add(self.head + self.resident),
                    capacity - self.resident,
                )
            };
            let got = self.source.read(tail)?;

            if got == 0 {
                idle_polls += 1;
                if idle_polls >= self.config.max_idle_polls {
                    return Err(RingError::SourceTimeout {
                        requested: needed,
                        resident: self.resident,
                    });
                }
                continue;
            }

            idle_polls = 0;
            self.resident += got;
            trace!(got, resident = self.resident, "fill");
        }

        Ok(())
    }
}
