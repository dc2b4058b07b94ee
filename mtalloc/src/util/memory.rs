use super::Address;
use crate::util::constants::CPU_PAGE_BYTES;

#[derive(Debug)]
pub struct MemoryMapError;

pub struct RawMemory {
    _private: (),
}

impl RawMemory {
    /// Reserve an inaccessible fixed range. `shared` backs the reservation
    /// with a shared object so super-pages can later be aliased with mremap.
    pub fn reserve_fixed(start: Address, size: usize, shared: bool) -> Result<(), MemoryMapError> {
        debug_assert!((size & (CPU_PAGE_BYTES - 1)) == 0);
        let visibility = if shared {
            libc::MAP_SHARED
        } else {
            libc::MAP_PRIVATE
        };
        let ptr = unsafe {
            libc::mmap(
                start.as_mut_ptr(),
                size,
                libc::PROT_NONE,
                libc::MAP_FIXED | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | visibility,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED || ptr != start.as_mut_ptr() {
            Err(MemoryMapError)
        } else {
            Ok(())
        }
    }

    /// Activate a fixed range read-write. `prot_extra` carries backend flags
    /// such as PROT_MTE.
    pub fn map_fixed(
        start: Address,
        size: usize,
        prot_extra: libc::c_int,
        shared: bool,
    ) -> Result<Address, MemoryMapError> {
        debug_assert!((size & (CPU_PAGE_BYTES - 1)) == 0);
        let visibility = if shared {
            libc::MAP_SHARED
        } else {
            libc::MAP_PRIVATE
        };
        let ptr = unsafe {
            libc::mmap(
                start.as_mut_ptr(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | prot_extra,
                libc::MAP_FIXED | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | visibility,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED || ptr != start.as_mut_ptr() {
            Err(MemoryMapError)
        } else {
            Ok(ptr.into())
        }
    }

    /// Shadow arrays: fixed, private, read-write, lazily committed.
    pub fn map_shadow(start: Address, size: usize) -> Result<Address, MemoryMapError> {
        Self::map_fixed(start, size, 0, false)
    }

    pub fn map_anonymous(size: usize) -> Result<Address, MemoryMapError> {
        debug_assert!((size & (CPU_PAGE_BYTES - 1)) == 0);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            Err(MemoryMapError)
        } else {
            Ok(ptr.into())
        }
    }

    /// Remap `src` into an additional window at `dst`. Requires a shared
    /// mapping; the kernel keeps both windows pointing at the same pages.
    pub fn remap_alias(src: Address, dst: Address, size: usize) -> Result<(), MemoryMapError> {
        let ptr = unsafe {
            libc::mremap(
                src.as_mut_ptr(),
                0,
                size,
                libc::MREMAP_MAYMOVE | libc::MREMAP_FIXED,
                dst.as_mut_ptr::<libc::c_void>(),
            )
        };
        if ptr == libc::MAP_FAILED || ptr != dst.as_mut_ptr() {
            Err(MemoryMapError)
        } else {
            Ok(())
        }
    }

    /// Hand the physical backing of a range back to the OS. The virtual
    /// mapping stays; the next touch sees zero pages.
    pub fn release_pages(start: Address, size: usize) {
        unsafe {
            libc::madvise(start.as_mut_ptr(), size, libc::MADV_DONTNEED);
        }
    }

    /// Electric-fence a range: every later access faults, the virtual range
    /// is never reused.
    pub fn protect_fixed(start: Address, size: usize) -> Result<(), MemoryMapError> {
        let ptr = unsafe {
            libc::mmap(
                start.as_mut_ptr(),
                size,
                libc::PROT_NONE,
                libc::MAP_FIXED | libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED || ptr != start.as_mut_ptr() {
            Err(MemoryMapError)
        } else {
            Ok(())
        }
    }

    pub fn unmap(start: Address, size: usize) {
        unsafe {
            libc::munmap(start.as_mut_ptr(), size);
        }
    }
}
