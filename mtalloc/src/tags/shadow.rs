use crate::util::memory::RawMemory;
use crate::util::Address;

/// Fixed linear projection of `[BASE, BASE + SIZE)` onto a byte array at
/// `SHADOW_BASE`, one byte per `GRANULARITY` bytes of covered space. All
/// projections the allocator needs are instantiations of this.
pub struct FixedShadow<
    const SHADOW_BASE: usize,
    const BASE: usize,
    const SIZE: usize,
    const GRANULARITY: usize,
>;

impl<const SHADOW_BASE: usize, const BASE: usize, const SIZE: usize, const GRANULARITY: usize>
    FixedShadow<SHADOW_BASE, BASE, SIZE, GRANULARITY>
{
    pub const SHADOW_BYTES: usize = SIZE / GRANULARITY;

    pub fn init() {
        let size = crate::util::round_up(Self::SHADOW_BYTES, crate::util::constants::CPU_PAGE_BYTES);
        if RawMemory::map_shadow(Address::from_usize(SHADOW_BASE), size).is_err() {
            crate::fatal!("cannot map shadow at {:#x}", SHADOW_BASE);
        }
    }

    pub fn is_mine(addr: Address) -> bool {
        addr.as_usize() >= BASE && addr.as_usize() < BASE + SIZE
    }

    pub fn shadow_ptr(addr: Address) -> Address {
        debug_assert!(Self::is_mine(addr));
        Address::from_usize(SHADOW_BASE + (addr.as_usize() - BASE) / GRANULARITY)
    }

    pub fn get(addr: Address) -> u8 {
        unsafe { Self::shadow_ptr(addr).load::<u8>() }
    }

    pub fn set(addr: Address, value: u8) {
        Self::check(addr);
        unsafe { Self::shadow_ptr(addr).store::<u8>(value) }
    }

    pub fn set_range(start: Address, size: usize, value: u8) {
        Self::check(start);
        if size % GRANULARITY != 0 {
            crate::fatal!("shadow range not {}-aligned: {:#x}", GRANULARITY, size);
        }
        let mut pos = Self::shadow_ptr(start);
        let end = pos + size / GRANULARITY;
        while pos < end {
            unsafe { pos.store::<u8>(value) };
            pos += 1;
        }
    }

    fn check(addr: Address) {
        if !Self::is_mine(addr) {
            crate::fatal!("shadow access outside {:#x}..{:#x}: {:?}", BASE, BASE + SIZE, addr);
        }
        if addr.as_usize() % GRANULARITY != 0 {
            crate::fatal!(
                "shadow access not {}-aligned: {:?}",
                GRANULARITY,
                addr
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A private throwaway projection: 1 MiB covered at 16-byte granules.
    const TEST_BASE: usize = 0x2000_0000_0000;
    const TEST_SHADOW: usize = 0x2100_0000_0000;
    type TestShadow = FixedShadow<TEST_SHADOW, TEST_BASE, { 1 << 20 }, 16>;

    #[test]
    fn projects_and_round_trips() {
        TestShadow::init();
        let a = Address::from_usize(TEST_BASE + 32);
        assert!(TestShadow::is_mine(a));
        assert!(!TestShadow::is_mine(Address::from_usize(TEST_BASE + (1 << 20))));
        TestShadow::set(a, 0xab);
        assert_eq!(TestShadow::get(a), 0xab);
        // Same granule, different offset.
        assert_eq!(TestShadow::get(Address::from_usize(TEST_BASE + 33)), 0xab);
        TestShadow::set_range(a, 64, 0x7);
        for i in 0..4 {
            assert_eq!(TestShadow::get(a + i * 16), 0x7);
        }
        assert_eq!(TestShadow::get(a + 64), 0);
    }
}
