//! Platform primitives behind the double mapping
//!
//! Everything OS-specific lives here: creating the anonymous backing
//! object, discovering a free address window, pinning views at fixed
//! addresses and tearing them down again. The ring itself runs one
//! platform-neutral algorithm on top of these five primitives.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Granularity the mapped capacity must be a multiple of
        ///
        /// POSIX fixed mappings work at page granularity.
        pub fn allocation_granularity() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
    } else if #[cfg(windows)] {
        /// Granularity the mapped capacity must be a multiple of
        ///
        /// Windows file views must start on an allocation-granularity
        /// boundary (64 KiB), not just a page boundary.
        pub fn allocation_granularity() -> usize {
            use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

            let mut sys_info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
            unsafe { GetSystemInfo(&mut sys_info) };
            sys_info.dwAllocationGranularity as usize
        }
    } else {
        compile_error!("no mapping primitives for this platform");
    }
}

/// Round `len` up to the next allocation-granularity boundary
pub fn align_to_granularity(len: usize) -> usize {
    let granularity = allocation_granularity();
    (len + granularity - 1) & !(granularity - 1)
}

#[cfg(unix)]
mod unix_impl {
    use std::io;
    use std::num::NonZeroUsize;
    use std::os::fd::OwnedFd;
    use std::ptr::NonNull;

    use nix::fcntl::OFlag;
    use nix::sys::mman::{mmap, mmap_anonymous, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
    use nix::sys::stat::Mode;
    use nix::unistd::ftruncate;

    use crate::{Result, RingError};

    /// Owner of the physical pages
    ///
    /// The object is unlinked right after creation, so the descriptor is
    /// the only reference keeping it alive; dropping it releases the
    /// pages once both views are unmapped.
    #[derive(Debug)]
    pub struct Backing {
        fd: OwnedFd,
    }

    /// Create an anonymous shared-memory object of exactly `len` zero-filled bytes
    pub fn create_backing(len: usize) -> Result<Backing> {
        let name = format!(
            "/mring-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        );

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| RingError::BackingObjectFailed(format!("shm_open failed: {e}")))?;

        // The name was only needed to obtain the descriptor.
        let _ = shm_unlink(name.as_str());

        ftruncate(&fd, len as i64)
            .map_err(|e| RingError::BackingObjectFailed(format!("ftruncate failed: {e}")))?;

        Ok(Backing { fd })
    }

    /// Discover a free address window of `total` contiguous bytes
    ///
    /// The inaccessible reservation is released immediately; only the
    /// address survives. Another allocation may grab the window before
    /// the fixed mappings land, which is what the caller's retry loop
    /// is for.
    pub fn reserve_window(total: usize) -> Result<*mut u8> {
        let len = NonZeroUsize::new(total).ok_or(RingError::AllocationFailed { len: total })?;

        let addr = unsafe { mmap_anonymous(None, len, ProtFlags::PROT_NONE, MapFlags::MAP_PRIVATE) }
            .map_err(|_| RingError::AllocationFailed { len: total })?;
        unsafe {
            munmap(addr, total).map_err(|_| RingError::AllocationFailed { len: total })?;
        }

        Ok(addr.as_ptr() as *mut u8)
    }

    /// Map the backing object read-write at exactly `addr`
    pub fn map_fixed(backing: &Backing, addr: *mut u8, len: usize) -> io::Result<()> {
        let length =
            NonZeroUsize::new(len).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let at = NonZeroUsize::new(addr as usize)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;

        unsafe {
            mmap(
                Some(at),
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &backing.fd,
                0,
            )
        }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        Ok(())
    }

    /// Tear down one previously established view
    pub fn unmap_view(addr: *mut u8, len: usize) {
        if let Some(ptr) = NonNull::new(addr as *mut libc::c_void) {
            let _ = unsafe { munmap(ptr, len) };
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use std::io;
    use std::ptr;

    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::memoryapi::{
        MapViewOfFileEx, UnmapViewOfFile, VirtualAlloc, VirtualFree, FILE_MAP_READ, FILE_MAP_WRITE,
    };
    use winapi::um::winbase::CreateFileMappingA;
    use winapi::um::winnt::{HANDLE, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

    use crate::{Result, RingError};

    /// Owner of the physical pages
    #[derive(Debug)]
    pub struct Backing {
        handle: HANDLE,
    }

    // The mapping handle has no thread affinity.
    unsafe impl Send for Backing {}

    impl Drop for Backing {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }

    /// Create an anonymous pagefile-backed section of exactly `len` zero-filled bytes
    pub fn create_backing(len: usize) -> Result<Backing> {
        let handle = unsafe {
            CreateFileMappingA(
                INVALID_HANDLE_VALUE,
                ptr::null_mut(),
                PAGE_READWRITE,
                ((len as u64) >> 32) as u32,
                ((len as u64) & 0xffff_ffff) as u32,
                ptr::null(),
            )
        };
        if handle.is_null() {
            return Err(RingError::BackingObjectFailed(format!(
                "CreateFileMapping failed: {}",
                io::Error::last_os_error()
            )));
        }

        Ok(Backing { handle })
    }

    /// Discover a free address window of `total` contiguous bytes
    ///
    /// The reservation must be released before `MapViewOfFileEx` can
    /// reuse the window, so the address can be raced by another
    /// allocation; the caller's retry loop covers that.
    pub fn reserve_window(total: usize) -> Result<*mut u8> {
        let addr = unsafe { VirtualAlloc(ptr::null_mut(), total, MEM_RESERVE, PAGE_NOACCESS) };
        if addr.is_null() {
            return Err(RingError::AllocationFailed { len: total });
        }
        unsafe {
            VirtualFree(addr, 0, MEM_RELEASE);
        }

        Ok(addr as *mut u8)
    }

    /// Map the backing section read-write at exactly `addr`
    pub fn map_fixed(backing: &Backing, addr: *mut u8, len: usize) -> io::Result<()> {
        let view = unsafe {
            MapViewOfFileEx(
                backing.handle,
                FILE_MAP_READ | FILE_MAP_WRITE,
                0,
                0,
                len,
                addr as *mut _,
            )
        };
        if view.is_null() {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Tear down one previously established view
    pub fn unmap_view(addr: *mut u8, _len: usize) {
        if !addr.is_null() {
            unsafe {
                UnmapViewOfFile(addr as *mut _);
            }
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{create_backing, map_fixed, reserve_window, unmap_view, Backing};
#[cfg(windows)]
pub use windows_impl::{create_backing, map_fixed, reserve_window, unmap_view, Backing};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_is_positive_power_of_two() {
        let granularity = allocation_granularity();
        assert!(granularity > 0);
        assert!(granularity.is_power_of_two());
    }

    #[test]
    fn align_rounds_up_to_boundary() {
        let granularity = allocation_granularity();

        assert_eq!(align_to_granularity(1) % granularity, 0);
        assert!(align_to_granularity(1) >= 1);
        assert_eq!(align_to_granularity(granularity), granularity);
        assert_eq!(align_to_granularity(granularity + 1), 2 * granularity);
    }

    #[test]
    fn backing_creation_succeeds() {
        let granularity = allocation_granularity();
        let backing = create_backing(granularity).unwrap();
        drop(backing);
    }
}
