//! Fixed-capacity ring mapped twice into contiguous virtual memory
//!
//! One block of anonymous shared memory backs two adjacent read-write
//! views, so `base[i]` and `base[i + capacity]` always alias the same
//! physical byte. Reads and writes of up to `capacity` bytes never need
//! wrap handling: the seam between the views is covered by the aliasing.

use std::fmt;
use std::ptr;
use std::slice;

use tracing::{debug, instrument, warn};

use crate::platform;
use crate::{Result, RingError};

/// Reserve-then-map attempts before construction gives up
///
/// The discovered address window can be raced by another allocation
/// between releasing the reservation and pinning the fixed views.
const MAP_ATTEMPTS: u32 = 4;

/// A circular byte buffer whose wrap boundary is invisible
///
/// The buffer owns `capacity` bytes of physical memory exposed through a
/// doubled virtual window of `2 * capacity` bytes. The physical memory is
/// zero-filled at creation, never resized, and reclaimed exactly once, on
/// [`release`](Self::release) or drop. The mapping is process-local and
/// must not be handed to another process.
pub struct DoubleMappedRing {
    /// Start of the doubled window; null once released
    base: *mut u8,
    /// Physical size in bytes, a multiple of the allocation granularity
    capacity: usize,
    /// Owner of the physical pages behind both views
    backing: Option<platform::Backing>,
}

// The ring exclusively owns its mapping and backing object. It is
// deliberately !Sync: callers serialize access.
unsafe impl Send for DoubleMappedRing {}

impl DoubleMappedRing {
    /// Map `capacity` bytes of zero-filled anonymous memory twice, contiguously
    ///
    /// `capacity` must be a positive multiple of
    /// [`platform::allocation_granularity`]; use
    /// [`platform::align_to_granularity`] to round a requested size up.
    /// Every failure path releases whatever was acquired before it.
    #[instrument]
    pub fn create(capacity: usize) -> Result<Self> {
        let granularity = platform::allocation_granularity();
        if capacity == 0 || capacity % granularity != 0 {
            return Err(RingError::UnalignedCapacity {
                capacity,
                granularity,
            });
        }

        let backing = platform::create_backing(capacity)?;

        for attempt in 1..=MAP_ATTEMPTS {
            let base = platform::reserve_window(2 * capacity)?;

            if let Err(e) = platform::map_fixed(&backing, base, capacity) {
                warn!(attempt, error = %e, "first view failed, re-reserving");
                continue;
            }
            if let Err(e) =
                platform::map_fixed(&backing, unsafe { base.add(capacity) }, capacity)
            {
                platform::unmap_view(base, capacity);
                warn!(attempt, error = %e, "second view failed, re-reserving");
                continue;
            }

            if !views_alias(base, capacity) {
                platform::unmap_view(base, capacity);
                platform::unmap_view(unsafe { base.add(capacity) }, capacity);
                warn!(attempt, "mapped views do not alias, re-reserving");
                continue;
            }

            debug!(base = ?base, capacity, "double mapping established");
            return Ok(Self {
                base,
                capacity,
                backing: Some(backing),
            });
        }

        Err(RingError::MappingFailed {
            attempts: MAP_ATTEMPTS,
        })
    }

    /// Physical size of the ring in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start of the doubled window
    ///
    /// `base[0 .. 2 * capacity)` is valid to dereference while the ring
    /// is alive.
    pub fn as_ptr(&self) -> *const u8 {
        assert!(!self.base.is_null(), "ring already released");
        self.base
    }

    /// Mutable start of the doubled window
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        assert!(!self.base.is_null(), "ring already released");
        self.base
    }

    /// The full doubled window as a slice of `2 * capacity` bytes
    pub fn as_slice(&self) -> &[u8] {
        assert!(!self.base.is_null(), "ring already released");
        unsafe { slice::from_raw_parts(self.base, 2 * self.capacity) }
    }

    /// The full doubled window as a mutable slice of `2 * capacity` bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(!self.base.is_null(), "ring already released");
        unsafe { slice::from_raw_parts_mut(self.base, 2 * self.capacity) }
    }

    /// Unmap both views and release the backing object
    ///
    /// Safe to call more than once: later calls observe the released
    /// state and do nothing. Accessors must not be used afterwards.
    pub fn release(&mut self) {
        if self.base.is_null() {
            return;
        }

        platform::unmap_view(self.base, self.capacity);
        platform::unmap_view(unsafe { self.base.add(self.capacity) }, self.capacity);
        self.base = ptr::null_mut();
        self.backing = None;

        debug!(capacity = self.capacity, "ring released");
    }
}

impl Drop for DoubleMappedRing {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DoubleMappedRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoubleMappedRing")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("released", &self.base.is_null())
            .finish()
    }
}

/// Check that a write through the first view is visible through the second
///
/// The marker is written over known-zero memory and zeroed again, so the
/// all-zero guarantee of a fresh ring still holds afterwards.
fn views_alias(base: *mut u8, capacity: usize) -> bool {
    unsafe {
        base.write_volatile(0xA5);
        let seen = base.add(capacity).read_volatile();
        base.write_volatile(0);
        seen == 0xA5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CAPACITY;

    #[test]
    fn fresh_ring_reads_all_zero() {
        let ring = DoubleMappedRing::create(DEFAULT_CAPACITY).unwrap();

        assert_eq!(ring.capacity(), DEFAULT_CAPACITY);
        assert_eq!(ring.as_slice().len(), 2 * DEFAULT_CAPACITY);
        assert!(ring.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn aliasing_works_in_both_directions() {
        let mut ring = DoubleMappedRing::create(DEFAULT_CAPACITY).unwrap();
        let capacity = ring.capacity();
        let window = ring.as_mut_slice();

        window[17] = 0x5A;
        assert_eq!(window[capacity + 17], 0x5A);

        window[capacity + 400] = 0xC3;
        assert_eq!(window[400], 0xC3);
    }

    #[test]
    fn writes_across_the_seam_land_on_both_sides() {
        let mut ring = DoubleMappedRing::create(DEFAULT_CAPACITY).unwrap();
        let capacity = ring.capacity();
        let window = ring.as_mut_slice();

        window[capacity - 4..capacity + 4].copy_from_slice(b"12345678");

        assert_eq!(&window[capacity - 4..capacity], b"1234");
        assert_eq!(&window[capacity..capacity + 4], b"5678");
        assert_eq!(&window[0..4], b"5678");
        assert_eq!(&window[2 * capacity - 4..], b"1234");
    }

    #[test]
    fn rejects_zero_and_unaligned_capacity() {
        let granularity = platform::allocation_granularity();

        assert!(matches!(
            DoubleMappedRing::create(0),
            Err(RingError::UnalignedCapacity { .. })
        ));
        assert!(matches!(
            DoubleMappedRing::create(granularity + 1),
            Err(RingError::UnalignedCapacity { .. })
        ));
    }

    #[test]
    fn release_twice_is_a_noop() {
        let mut ring = DoubleMappedRing::create(DEFAULT_CAPACITY).unwrap();

        ring.release();
        ring.release();
        // Drop performs a third, equally harmless release.
    }

    #[test]
    fn single_granularity_capacity_works() {
        let capacity = platform::allocation_granularity();
        let mut ring = DoubleMappedRing::create(capacity).unwrap();

        let window = ring.as_mut_slice();
        window[capacity - 1] = 0xEE;
        assert_eq!(window[2 * capacity - 1], 0xEE);
    }
}
