//! Page-granular allocator for requests above the largest small class.
//! Each allocation is its own mapping with a 4 KiB header page carrying
//! magic sentinels and the mapped size; no tagging, no quarantine.

use crate::config::MallocConfig;
use crate::util::constants::CPU_PAGE_BYTES;
use crate::util::memory::RawMemory;
use crate::util::{round_up, Address};

const LEFT_HEADER_MAGIC: usize = 0x039C_8235_25B0_237E;
const RIGHT_HEADER_MAGIC: usize = 0x1C2C_5300_098D_85AD;

pub struct LargeAllocator;

impl LargeAllocator {
    pub fn allocate(&self, size: usize) -> Address {
        let rounded = round_up(size, CPU_PAGE_BYTES);
        let size_with_header = rounded + CPU_PAGE_BYTES;
        let header = match RawMemory::map_anonymous(size_with_header) {
            Ok(addr) => addr,
            Err(_) => crate::fatal!("large allocation of {} bytes failed", size),
        };
        if MallocConfig::get().large_alloc_verbose {
            crate::println!("LargeAllocator::allocate:   {:?} {}", header, size_with_header);
        }
        unsafe {
            header.store::<usize>(LEFT_HEADER_MAGIC);
            (header + 8).store::<usize>(size_with_header);
            (header + 16).store::<usize>(RIGHT_HEADER_MAGIC);
        }
        header + CPU_PAGE_BYTES
    }

    pub fn chunk_size(&self, ptr: Address) -> usize {
        let header = Self::header(ptr);
        unsafe { (header + 8).load::<usize>() - CPU_PAGE_BYTES }
    }

    /// `protect=false` recycles the mapping; `protect=true` turns it into a
    /// permanent PROT_NONE fence so every stale access faults.
    pub fn deallocate(&self, ptr: Address, protect: bool) {
        let header = Self::header(ptr);
        let mmap_size = unsafe { (header + 8).load::<usize>() };
        if MallocConfig::get().large_alloc_verbose {
            crate::println!(
                "LargeAllocator::deallocate: {:?} {} {}",
                header,
                mmap_size,
                if protect { "protect" } else { "recycle" }
            );
        }
        if protect {
            if RawMemory::protect_fixed(header, mmap_size).is_err() {
                crate::fatal!("cannot fence large allocation {:?}", header);
            }
        } else {
            RawMemory::unmap(header, mmap_size);
        }
    }

    fn header(ptr: Address) -> Address {
        let header = ptr - CPU_PAGE_BYTES;
        let left = unsafe { header.load::<usize>() };
        let right = unsafe { (header + 16).load::<usize>() };
        if left != LEFT_HEADER_MAGIC || right != RIGHT_HEADER_MAGIC {
            crate::fatal!("bad large-allocation header for {:?}", ptr);
        }
        header
    }
}
