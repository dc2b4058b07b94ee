//! A super-page: 512 KiB, 512 KiB-aligned, holding chunks of exactly one
//! size class plus one state byte per chunk. Range-0 pages keep the state
//! array at their own tail; range-1 pages keep it in an external shadow.
//!
//! Every state transition is a single relaxed atomic byte access.
//! Allocation is the only CAS; free and quarantine use load+store, which
//! makes double-free detection best-effort under a concurrent race on the
//! same chunk (an xchg would close that window at a cost).

use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;

use atomic::Atomic;

use crate::config::MallocConfig;
use crate::size_class::{
    div_by_size, size_of_inline_meta, SizeClass, SizeClassDescr, SizeClassTable,
};
use crate::space::{class_of, RangeOneStateMap};
use crate::tags;
use crate::util::bits::find_zero_byte;
use crate::util::constants::*;
use crate::util::Address;

/// Chunk lifecycle. AVAILABLE must be zero for the word scan; the in-use
/// and pending states are odd so a group of them never masquerades as zero.
pub mod state {
    pub const AVAILABLE: u8 = 0;
    pub const USED_MIXED: u8 = 1;
    pub const USED_DATA: u8 = 3;
    pub const QUARANTINED: u8 = 5;
    pub const MARKED: u8 = 7;
    pub const RELEASING: u8 = 255;
}

use state::*;

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SuperPage(NonZeroUsize);

impl SuperPage {
    pub const LOG_BYTES: usize = LOG_SUPER_PAGE_BYTES;
    pub const BYTES: usize = SUPER_PAGE_BYTES;
    pub const MASK: usize = Self::BYTES - 1;

    pub fn new(addr: Address) -> Self {
        debug_assert!(!addr.is_zero());
        debug_assert!(Self::is_aligned(addr));
        Self(unsafe { NonZeroUsize::new_unchecked(addr.as_usize()) })
    }

    pub fn containing(addr: Address) -> Self {
        Self::new(addr.align_down(Self::BYTES))
    }

    pub const fn is_aligned(addr: Address) -> bool {
        addr.as_usize() & Self::MASK == 0
    }

    pub fn start(self) -> Address {
        Address::from_usize(self.0.get())
    }

    pub fn end(self) -> Address {
        self.start() + Self::BYTES
    }

    pub fn class(self) -> SizeClass {
        class_of(self.start())
    }

    pub fn descr(self) -> SizeClassDescr {
        SizeClassTable::get().descr(self.class())
    }

    fn state_base(self, descr: SizeClassDescr) -> Address {
        if descr.range() == 1 {
            RangeOneStateMap::shadow_ptr(self.start())
        } else {
            self.end() - size_of_inline_meta(descr.num_chunks(), 0)
        }
    }

    fn state_at(self, states: Address, idx: usize) -> &'static Atomic<u8> {
        unsafe { (states + idx).atomic::<u8>() }
    }

    fn chunk_address(self, idx: usize, descr: SizeClassDescr) -> Address {
        self.start() + idx * descr.chunk_size()
    }

    /// Claim an AVAILABLE chunk via CAS, rotating from `hint` so reuse stays
    /// near the last allocation. Returns the chunk with the current memory
    /// tag applied to its address, or None when the page is full or every
    /// candidate was lost to a racing thread.
    pub fn try_allocate(
        self,
        data_only: bool,
        descr: SizeClassDescr,
        hint: &mut usize,
    ) -> Option<Address> {
        let num_chunks = descr.num_chunks();
        let states = self.state_base(descr);
        let new_state = if data_only { USED_DATA } else { USED_MIXED };

        let pos = find_zero_byte(states, num_chunks, *hint, |pos| {
            self.state_at(states, pos)
                .compare_exchange(AVAILABLE, new_state, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        })?;
        *hint = pos + 1;
        let chunk = self.chunk_address(pos, descr);
        Some(tags::apply_address_tag(chunk, tags::memory_tag(chunk)))
    }

    /// State byte of the chunk containing `ptr`, by reciprocal division of
    /// the in-page offset. Traps on a pointer that is not a chunk start.
    fn state_ptr(self, ptr: Address, descr: SizeClassDescr) -> Address {
        let offset = ptr.as_usize() & Self::MASK;
        let idx = div_by_size(offset, descr.recip);
        if idx * descr.chunk_size() != offset {
            crate::fatal!("misaligned chunk pointer {:?}", ptr);
        }
        if idx >= descr.num_chunks() {
            crate::fatal!("chunk index {} out of range for {:?}", idx, ptr);
        }
        self.state_base(descr) + idx
    }

    /// Bump the chunk's memory tag so stale pointers stop matching.
    fn update_tag_on_free(ptr: Address, size: usize) -> u8 {
        let new_tag = tags::memory_tag(ptr).wrapping_add(1);
        tags::set_memory_tag(ptr, size, new_tag);
        new_tag
    }

    fn exchange_and_check_double_free(self, ptr: Address, state: Address, new_value: u8) {
        let cell = unsafe { state.atomic::<u8>() };
        let old_value = cell.load(Ordering::Relaxed);
        cell.store(new_value, Ordering::Relaxed);
        if old_value != USED_MIXED && old_value != USED_DATA {
            crate::fatal!("DoubleFree on {:?}", ptr);
        }
    }

    pub fn deallocate(self, ptr: Address) {
        let descr = self.descr();
        let state = self.state_ptr(ptr, descr);
        Self::update_tag_on_free(ptr, descr.chunk_size());
        self.exchange_and_check_double_free(ptr, state, AVAILABLE);
    }

    /// Move a chunk to QUARANTINED and return its size, except when the
    /// freshly bumped tag alone already detects use-after-free (tag
    /// shortcut); then the chunk goes straight back to AVAILABLE and the
    /// returned size is 0.
    pub fn quarantine(self, ptr: Address) -> usize {
        let descr = self.descr();
        let state = self.state_ptr(ptr, descr);
        let new_tag = Self::update_tag_on_free(ptr, descr.chunk_size());
        let config = MallocConfig::get();
        let mut new_value = QUARANTINED;
        if config.use_tag == 1 && new_tag & 15 != 0 {
            new_value = AVAILABLE;
        }
        if config.use_tag == 2 && new_tag != 0 {
            new_value = AVAILABLE;
        }
        self.exchange_and_check_double_free(ptr, state, new_value);
        if new_value == AVAILABLE {
            0
        } else {
            descr.chunk_size()
        }
    }

    /// Scanner entry: `value` is any word that points into this super-page.
    /// A hit on a QUARANTINED chunk pins it as MARKED.
    pub fn mark(self, value: usize) {
        let descr = self.descr();
        let offset = value & Self::MASK;
        let idx = div_by_size(offset, descr.recip);
        if idx >= descr.num_chunks() {
            return;
        }
        let states = self.state_base(descr);
        let cell = self.state_at(states, idx);
        if cell.load(Ordering::Relaxed) == QUARANTINED {
            cell.store(MARKED, Ordering::Relaxed);
        }
    }

    /// Conservatively mark everything this page's live chunks point at.
    /// Only USED_MIXED chunks are read; USED_DATA chunks are guaranteed
    /// pointer-free and skipped wholesale.
    pub fn mark_all_live_pointers(self, num_super_pages: [usize; NUM_RANGES]) {
        let descr = self.descr();
        let chunk_size = descr.chunk_size();
        let span = [
            num_super_pages[0] * Self::BYTES,
            num_super_pages[1] * Self::BYTES,
        ];
        let states = self.state_base(descr);
        for idx in 0..descr.num_chunks() {
            if self.state_at(states, idx).load(Ordering::Relaxed) != USED_MIXED {
                continue;
            }
            let chunk = self.chunk_address(idx, descr);
            let mut word = chunk;
            let end = chunk + chunk_size;
            while word < end {
                // The hottest load of the scan.
                let value = unsafe { word.load::<usize>() };
                if value.wrapping_sub(RANGE_BASE[0]) < span[0]
                    || value.wrapping_sub(RANGE_BASE[1]) < span[1]
                {
                    SuperPage::containing(Address::from_usize(value)).mark(value);
                }
                word += std::mem::size_of::<usize>();
            }
        }
    }

    /// Post-scan transition: an unmarked quarantined chunk was proven
    /// unreferenced and becomes free; a marked one goes back to plain
    /// quarantine for the next round.
    pub fn move_from_quarantine_to_available(self) {
        self.for_each_state(|cell| {
            match cell.load(Ordering::Relaxed) {
                QUARANTINED => cell.store(AVAILABLE, Ordering::Relaxed),
                MARKED => cell.store(QUARANTINED, Ordering::Relaxed),
                _ => {}
            }
        });
    }

    /// If every chunk is AVAILABLE, pin them all as RELEASING, hand the
    /// physical pages back to the OS, and reopen the page. Loses the race
    /// gracefully: any chunk claimed mid-flight reverts the whole attempt.
    pub fn maybe_release_to_os(self) {
        let descr = self.descr();
        let num_chunks = descr.num_chunks();
        if self.count_state(AVAILABLE) != num_chunks {
            return;
        }
        let mut ready = 0;
        self.for_each_state(|cell| {
            if cell
                .compare_exchange(AVAILABLE, RELEASING, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                ready += 1;
            }
        });
        if ready == num_chunks {
            crate::util::memory::RawMemory::release_pages(self.start(), Self::BYTES);
            if descr.range() == 1 {
                // Range-1 state lives outside the released pages.
                self.for_each_state(|cell| cell.store(AVAILABLE, Ordering::Relaxed));
            }
        } else {
            self.for_each_state(|cell| {
                if cell.load(Ordering::Relaxed) == RELEASING {
                    cell.store(AVAILABLE, Ordering::Relaxed);
                }
            });
        }
    }

    fn for_each_state(self, mut f: impl FnMut(&Atomic<u8>)) {
        let descr = self.descr();
        let states = self.state_base(descr);
        for idx in 0..descr.num_chunks() {
            f(self.state_at(states, idx));
        }
    }

    pub fn count_state(self, wanted: u8) -> usize {
        let mut count = 0;
        self.for_each_state(|cell| {
            if cell.load(Ordering::Relaxed) == wanted {
                count += 1;
            }
        });
        count
    }

    pub fn print_summary(self) {
        let descr = self.descr();
        let range = descr.range();
        let available = self.count_state(AVAILABLE);
        let quarantined = self.count_state(QUARANTINED);
        let marked = self.count_state(MARKED);
        let utilization = (descr.num_chunks() - available - quarantined) * descr.chunk_size()
            * 100
            / Self::BYTES;
        crate::println!(
            "SP r {} {} {:?} sc {} size {} num {} ava {} qua {} mar {} uti {} {}",
            range,
            (self.start().as_usize() - RANGE_BASE[range]) / Self::BYTES,
            self.start(),
            self.class().as_usize(),
            descr.chunk_size(),
            descr.num_chunks(),
            available,
            quarantined,
            marked,
            utilization,
            if available + quarantined == descr.num_chunks() {
                "unused"
            } else {
                ""
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;

    // 230400-byte chunks: two per super-page, and no other test touches
    // this class, so the page drains completely.
    const SIZE: usize = 230400;

    #[test]
    fn release_returns_every_chunk_to_available() {
        let heap = Allocator::get();
        let a = heap.allocate(SIZE);
        let b = heap.allocate(SIZE);
        let sp = SuperPage::containing(tags::apply_address_tag(a, 0));
        assert_eq!(sp, SuperPage::containing(tags::apply_address_tag(b, 0)));
        assert_eq!(sp.descr().num_chunks(), 2);

        unsafe {
            a.store::<u64>(0x42);
            b.store::<u64>(0x42);
        }
        heap.deallocate(a);
        sp.maybe_release_to_os(); // one chunk still in use: must not release
        assert_eq!(sp.count_state(state::AVAILABLE), 1);

        heap.deallocate(b);
        sp.maybe_release_to_os();
        assert_eq!(sp.count_state(state::AVAILABLE), 2);

        // The page is still usable afterwards.
        let c = heap.allocate(SIZE);
        assert_eq!(sp, SuperPage::containing(tags::apply_address_tag(c, 0)));
        heap.deallocate(c);
    }
}
