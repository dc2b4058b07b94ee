//! The allocator ABI: dispatch between the small and large allocators,
//! libc-contract entry points, and the instrumentation hooks. The
//! process-wide `malloc`/`free` symbol family is exported only with the
//! `malloc` feature so ordinary builds keep their system allocator.

use crate::alloc::{Allocator, ThreadLocalAllocator};
use crate::config::MallocConfig;
use crate::size_class::{SizeClassTable, MAX_SMALL_SIZE};
use crate::space::class_of;
use crate::space::large::LargeAllocator;
use crate::stat;
use crate::tags;
use crate::util::constants::CPU_PAGE_BYTES;
use crate::util::{round_up, Address};

pub static LARGE: LargeAllocator = LargeAllocator;

pub struct MallocApi;

pub static MALLOC_IMPL: MallocApi = MallocApi;

impl MallocApi {
    pub const MIN_ALIGNMENT: usize = 16;

    fn set_error(e: i32) {
        errno::set_errno(errno::Errno(e));
    }

    pub fn malloc(&self, size: usize) -> *mut u8 {
        let size = if size < 8 { 1 } else { size };
        if size > MAX_SMALL_SIZE {
            stat::LARGE_ALLOCATIONS.inc(1);
            return LARGE.allocate(size).as_mut_ptr();
        }
        Allocator::get().allocate(size).as_mut_ptr()
    }

    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let heap = Allocator::get();
        let addr = Address::from(ptr);
        let config = MallocConfig::get();
        if heap.is_mine(addr) {
            if config.quarantine_mb == 0 {
                heap.deallocate(addr);
            } else {
                heap.quarantine_and_maybe_scan(addr, (config.quarantine_mb as usize) << 20);
            }
        } else {
            LARGE.deallocate(addr, config.large_alloc_fence);
        }
    }

    pub fn calloc(&self, nmemb: usize, size: usize) -> *mut u8 {
        let total = match nmemb.checked_mul(size) {
            Some(total) => total,
            None => {
                Self::set_error(libc::ENOMEM);
                return std::ptr::null_mut();
            }
        };
        let ptr = self.malloc(total);
        unsafe { std::ptr::write_bytes(ptr, 0, total) };
        ptr
    }

    pub fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(size);
        }
        let heap = Allocator::get();
        let addr = Address::from(ptr);
        let old_size = if heap.is_mine(addr) {
            heap.chunk_size_of(addr)
        } else {
            LARGE.chunk_size(addr)
        };
        let new_ptr = self.malloc(size);
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, new_ptr, size.min(old_size));
        }
        self.free(ptr);
        new_ptr
    }

    /// `align <= 16` is plain malloc. Up to a page, the request is rounded
    /// up to the first size class whose chunk size is a multiple of the
    /// alignment (chunks sit at `idx * chunk_size` inside a 512 KiB-aligned
    /// page, so that multiple is what makes the result aligned). Larger
    /// alignments are unsupported.
    pub fn posix_memalign(&self, out: *mut *mut u8, align: usize, size: usize) -> libc::c_int {
        if align <= Self::MIN_ALIGNMENT {
            unsafe { *out = self.malloc(size) };
            return 0;
        }
        if !align.is_power_of_two() {
            return libc::EINVAL;
        }
        if align <= CPU_PAGE_BYTES {
            let table = SizeClassTable::get();
            let mut pick = round_up(size.max(1), align);
            loop {
                if pick > MAX_SMALL_SIZE {
                    crate::fatal!("posix_memalign: no class fits align {} size {}", align, size);
                }
                let (_, descr) = table.size_to_class(pick);
                if descr.chunk_size() % align == 0 {
                    unsafe { *out = self.malloc(descr.chunk_size()) };
                    return 0;
                }
                pick = descr.chunk_size() + 16;
            }
        }
        crate::fatal!("posix_memalign: alignment {} unsupported", align);
    }

    pub fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        let heap = Allocator::get();
        let addr = Address::from(ptr);
        if heap.is_mine(addr) {
            heap.chunk_size_of(addr)
        } else {
            LARGE.chunk_size(addr)
        }
    }

    /// Instrumented load/store check: count the access, and with both alias
    /// and shadow tagging live, trap when the pointer's address tag no
    /// longer matches the memory tag of its chunk.
    pub fn access(&self, ptr: *mut u8) {
        let heap = Allocator::get();
        let addr = Address::from(ptr);
        if !heap.is_mine(addr) {
            stat::ACCESSES_OUTSIDE_HEAP.inc(1);
            return;
        }
        let untagged = tags::apply_address_tag(addr, 0);
        let tls = ThreadLocalAllocator::current();
        tls.stats.accesses_per_class[class_of(untagged).as_usize()] += 1;
        let address_tag = tags::address_tag(addr) & 15;
        let memory_tag = tags::memory_tag(untagged) & 15;
        if address_tag != memory_tag {
            crate::fatal!(
                "ERROR: address-memory-tag-mismatch {:?} {:x} {:x}",
                ptr,
                address_tag,
                memory_tag
            );
        }
    }

    pub fn data_only_scope(&self, level: i32) {
        Allocator::get().data_only_scope(level);
    }
}

#[cfg(feature = "malloc")]
#[cfg(not(test))]
pub mod abi {
    use super::*;

    #[ctor::ctor]
    fn process_start() {
        Allocator::get();
        unsafe {
            libc::atexit(process_exit);
        }
    }

    extern "C" fn process_exit() {
        if MallocConfig::get().print_stats {
            Allocator::get().print_all();
        }
    }

    #[no_mangle]
    pub extern "C" fn malloc(size: usize) -> *mut u8 {
        MALLOC_IMPL.malloc(size)
    }

    #[no_mangle]
    pub extern "C" fn free(ptr: *mut u8) {
        MALLOC_IMPL.free(ptr)
    }

    #[no_mangle]
    pub extern "C" fn cfree(ptr: *mut u8) {
        MALLOC_IMPL.free(ptr)
    }

    #[no_mangle]
    pub extern "C" fn calloc(nmemb: usize, size: usize) -> *mut u8 {
        MALLOC_IMPL.calloc(nmemb, size)
    }

    #[no_mangle]
    pub extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
        MALLOC_IMPL.realloc(ptr, size)
    }

    #[no_mangle]
    pub extern "C" fn posix_memalign(
        out: *mut *mut u8,
        alignment: usize,
        size: usize,
    ) -> libc::c_int {
        MALLOC_IMPL.posix_memalign(out, alignment, size)
    }

    #[no_mangle]
    pub extern "C" fn malloc_usable_size(ptr: *mut u8) -> usize {
        MALLOC_IMPL.usable_size(ptr)
    }

    #[no_mangle]
    pub extern "C" fn memalign(_alignment: usize, _size: usize) -> *mut u8 {
        crate::fatal!("memalign is unsupported");
    }

    #[no_mangle]
    pub extern "C" fn valloc(_size: usize) -> *mut u8 {
        crate::fatal!("valloc is unsupported");
    }

    #[no_mangle]
    pub extern "C" fn pvalloc(_size: usize) -> *mut u8 {
        crate::fatal!("pvalloc is unsupported");
    }

    // C++ operator new/delete.
    #[no_mangle]
    pub extern "C" fn _Znwm(size: usize) -> *mut u8 {
        MALLOC_IMPL.malloc(size)
    }

    #[no_mangle]
    pub extern "C" fn _Znam(size: usize) -> *mut u8 {
        MALLOC_IMPL.malloc(size)
    }

    #[no_mangle]
    pub extern "C" fn _ZdlPv(ptr: *mut u8) {
        MALLOC_IMPL.free(ptr)
    }

    #[no_mangle]
    pub extern "C" fn _ZdaPv(ptr: *mut u8) {
        MALLOC_IMPL.free(ptr)
    }

    #[no_mangle]
    pub extern "C" fn __bsa_dataonly_scope(level: libc::c_int) {
        MALLOC_IMPL.data_only_scope(level)
    }

    // Thread-sanitizer-shaped instrumentation: sized reads and writes feed
    // the tag check; the rest are accepted and ignored.
    #[no_mangle]
    pub extern "C" fn __mtm_access(ptr: *mut u8) {
        MALLOC_IMPL.access(ptr)
    }

    macro_rules! tsan_access_shims {
        ($($name: ident),* $(,)?) => {
            $(
                #[no_mangle]
                pub extern "C" fn $name(ptr: *mut u8) {
                    MALLOC_IMPL.access(ptr)
                }
            )*
        };
    }

    macro_rules! tsan_noop_shims {
        ($($name: ident),* $(,)?) => {
            $(
                #[no_mangle]
                pub extern "C" fn $name() {}
            )*
        };
    }

    tsan_access_shims![
        __tsan_read1,
        __tsan_read2,
        __tsan_read4,
        __tsan_read8,
        __tsan_write1,
        __tsan_write2,
        __tsan_write4,
        __tsan_write8,
    ];

    tsan_noop_shims![
        __tsan_init,
        __tsan_func_entry,
        __tsan_func_exit,
        __tsan_read16,
        __tsan_write16,
        __tsan_unaligned_read2,
        __tsan_unaligned_read4,
        __tsan_unaligned_read8,
        __tsan_unaligned_read16,
        __tsan_unaligned_write2,
        __tsan_unaligned_write4,
        __tsan_unaligned_write8,
        __tsan_unaligned_write16,
        __tsan_vptr_read,
        __tsan_vptr_update,
        __tsan_read_range,
        __tsan_write_range,
    ];
}
