//! Ring and reader error types

use thiserror::Error;

/// Errors produced by ring construction and buffered reads
#[derive(Error, Debug)]
pub enum RingError {
    /// No contiguous virtual address window large enough for both views
    #[error("no contiguous virtual address window of {len} bytes available")]
    AllocationFailed { len: usize },

    /// The anonymous shared-memory object could not be created or sized
    #[error("backing memory object failed: {0}")]
    BackingObjectFailed(String),

    /// Both fixed mappings could not be established
    #[error("double mapping failed after {attempts} attempts")]
    MappingFailed { attempts: u32 },

    /// Capacity is zero or not a multiple of the allocation granularity
    #[error("capacity {capacity} is not a positive multiple of the allocation granularity {granularity}")]
    UnalignedCapacity { capacity: usize, granularity: usize },

    /// A read was requested for zero bytes or more than the ring holds
    #[error("invalid read length {requested}, must be between 1 and {capacity}")]
    InvalidReadLength { requested: usize, capacity: usize },

    /// The source went idle before enough bytes were buffered
    #[error("source idle with {resident} of {requested} bytes buffered")]
    SourceTimeout { requested: usize, resident: usize },

    /// Error surfaced by the underlying byte source
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, RingError>;

impl RingError {
    /// Check if the error is recoverable
    ///
    /// A timed-out read leaves the buffered bytes in place, so a later
    /// read may still succeed. Construction failures are fatal to the
    /// ring instance.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RingError::SourceTimeout { .. } => true,
            RingError::Io(err) => {
                matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                )
            }
            _ => false,
        }
    }
}
