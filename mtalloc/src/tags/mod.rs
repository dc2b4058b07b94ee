//! Address- and memory-tag engine. Three backends, selectable at runtime
//! and composable:
//!
//! * hardware MTE on aarch64 (`MTM_USE_MTE`): tags live in the top pointer
//!   byte and in the hardware tag store, one tag per 16-byte granule;
//! * software shadow (`MTM_USE_SHADOW`): two byte-array shadows hold one
//!   4-bit tag per granule (16 bytes for range 0, 1024 for range 1);
//! * 16-way page aliasing (`MTM_USE_ALIASES`): address-tag bits select which
//!   alias window of a super-page is dereferenced, so the TLB itself
//!   enforces tag matching.

pub mod mte;
pub mod shadow;

use crate::config::MallocConfig;
use crate::util::constants::*;
use crate::util::Address;
use shadow::FixedShadow;

/// 4-bit tags per 16-byte granule over the range-0 half.
pub type SmallTagShadow =
    FixedShadow<SMALL_TAG_SHADOW_BASE, REGION_BASE, HALF_REGION_BYTES, 16>;

/// Coarse tags over the range-1 half; chunks there are 1024-aligned.
pub type LargeTagShadow = FixedShadow<
    LARGE_TAG_SHADOW_BASE,
    { REGION_BASE + HALF_REGION_BYTES },
    HALF_REGION_BYTES,
    RANGE_ONE_ALIGNMENT,
>;

/// Bit position of the 4-bit software address tag. It must equal the
/// region's log-size: the tag bits double as the alias-window index.
#[cfg(not(target_arch = "aarch64"))]
pub const ADDRESS_TAG_SHIFT: usize = LOG_REGION_BYTES;
#[cfg(target_arch = "aarch64")]
pub const ADDRESS_TAG_SHIFT: usize = 56;

pub fn init() {
    let config = MallocConfig::get();
    if config.use_shadow {
        SmallTagShadow::init();
        LargeTagShadow::init();
    } else if config.use_mte {
        mte::enable_sync_mode();
    }
}

/// Extra mmap protection flags super-pages need for the active backend.
pub fn prot_flags() -> libc::c_int {
    if MallocConfig::get().use_mte {
        mte::PROT_MTE
    } else {
        0
    }
}

/// Write `tag` over every granule of `[addr, addr + size)`.
pub fn set_memory_tag(addr: Address, size: usize, tag: u8) {
    let config = MallocConfig::get();
    if config.use_mte {
        let tagged = apply_address_tag(addr, tag & 15);
        unsafe { mte::set_tag_region(tagged.as_usize(), size) };
        return;
    }
    if !config.use_shadow {
        return;
    }
    if SmallTagShadow::is_mine(addr) {
        SmallTagShadow::set_range(addr, size, tag);
    } else if LargeTagShadow::is_mine(addr) {
        LargeTagShadow::set_range(addr, size, tag);
    } else {
        crate::fatal!("tag store outside the heap: {:?}", addr);
    }
}

/// Tag of the granule containing `addr`. Zero when no backend is active.
pub fn memory_tag(addr: Address) -> u8 {
    let config = MallocConfig::get();
    if config.use_mte {
        return unsafe { mte::load_tag(addr.as_usize()) };
    }
    if !config.use_shadow {
        return 0;
    }
    if SmallTagShadow::is_mine(addr) {
        SmallTagShadow::get(addr)
    } else if LargeTagShadow::is_mine(addr) {
        LargeTagShadow::get(addr)
    } else {
        crate::fatal!("tag load outside the heap: {:?}", addr);
    }
}

/// Rewrite the address-tag field of `addr`. Observationally the same
/// pointer, dereferenced through the window `tag` selects.
#[cfg(target_arch = "aarch64")]
pub fn apply_address_tag(addr: Address, tag: u8) -> Address {
    let mask = 0xffusize << ADDRESS_TAG_SHIFT;
    Address::from_usize((addr.as_usize() & !mask) | ((tag as usize) << ADDRESS_TAG_SHIFT))
}

#[cfg(not(target_arch = "aarch64"))]
pub fn apply_address_tag(addr: Address, tag: u8) -> Address {
    if !MallocConfig::get().use_aliases {
        return addr;
    }
    let mask = 0xfusize << ADDRESS_TAG_SHIFT;
    Address::from_usize((addr.as_usize() & !mask) | (((tag & 15) as usize) << ADDRESS_TAG_SHIFT))
}

#[cfg(target_arch = "aarch64")]
pub fn address_tag(addr: Address) -> u8 {
    (addr.as_usize() >> ADDRESS_TAG_SHIFT) as u8
}

#[cfg(not(target_arch = "aarch64"))]
pub fn address_tag(addr: Address) -> u8 {
    ((addr.as_usize() >> ADDRESS_TAG_SHIFT) & 15) as u8
}
