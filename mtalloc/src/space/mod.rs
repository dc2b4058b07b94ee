//! The reserved heap region and its per-super-page bookkeeping.
//!
//! Each half of the 1 TiB region holds one size-class range. A byte per
//! super-page slot in the class-index map records which class occupies the
//! slot; range-1 state bytes live in their own shadow so the scanner never
//! does interior pointer arithmetic for them.

pub mod large;
pub mod super_page;

use crate::size_class::SizeClass;
use crate::tags::shadow::FixedShadow;
use crate::util::constants::*;
use crate::util::Address;

/// Size-class index of the super-page occupying each slot.
pub type ClassIndexMap =
    FixedShadow<CLASS_MAP_BASE, REGION_BASE, REGION_BYTES, SUPER_PAGE_BYTES>;

/// Chunk state bytes for range-1 super-pages, one byte per 1024 bytes of
/// heap, i.e. 512 per super-page slot.
pub type RangeOneStateMap = FixedShadow<
    RANGE_ONE_STATE_BASE,
    { REGION_BASE + HALF_REGION_BYTES },
    HALF_REGION_BYTES,
    RANGE_ONE_ALIGNMENT,
>;

pub fn init_shadows() {
    ClassIndexMap::init();
    RangeOneStateMap::init();
}

/// Does `addr` (address-tag already stripped) fall inside the heap region?
pub fn region_contains(addr: Address) -> bool {
    addr.as_usize() >= REGION_BASE && addr.as_usize() < REGION_BASE + REGION_BYTES
}

pub fn super_page_base(range: usize, idx: usize) -> Address {
    let addr = RANGE_BASE[range] + idx * SUPER_PAGE_BYTES;
    if addr >= REGION_BASE + REGION_BYTES {
        crate::fatal!("heap range {} exhausted at super-page {}", range, idx);
    }
    Address::from_usize(addr)
}

pub fn class_of(addr: Address) -> SizeClass {
    if !ClassIndexMap::is_mine(addr) {
        crate::fatal!("class lookup outside the heap: {:?}", addr);
    }
    SizeClass(ClassIndexMap::get(addr))
}

pub fn set_class(addr: Address, sc: SizeClass) {
    if !ClassIndexMap::is_mine(addr) {
        crate::fatal!("class store outside the heap: {:?}", addr);
    }
    ClassIndexMap::set(addr, sc.0);
}
