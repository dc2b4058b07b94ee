//! The small-object allocator core: owns the reserved region, tracks
//! super-pages per size-class range, and orchestrates allocation,
//! quarantine accounting and scan triggering. One instance per process,
//! built on first use.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::MallocConfig;
use crate::size_class::{
    size_of_inline_meta, SizeClass, SizeClassDescr, SizeClassTable, NUM_SIZE_CLASSES,
};
use crate::space::super_page::SuperPage;
use crate::space::{self, region_contains, super_page_base, ClassIndexMap};
use crate::stat::{self, LocalStats};
use crate::tags;
use crate::util::constants::*;
use crate::util::memory::RawMemory;
use crate::util::{sys, Address, Lazy};

#[derive(Clone, Copy)]
struct PerSizeClass {
    /// The currently preferred super-page for this class.
    sp: Option<SuperPage>,
    /// Rotation start for the next state-byte scan; drives reuse toward the
    /// most recently touched part of the page.
    hint: usize,
}

pub struct ThreadLocalAllocator {
    rand: u32,
    local_quarantine: usize,
    per_sc: [PerSizeClass; NUM_SIZE_CLASSES],
    pub stats: LocalStats,
}

thread_local! {
    static TLS: UnsafeCell<ThreadLocalAllocator> =
        const { UnsafeCell::new(ThreadLocalAllocator::NEW) };
}

impl ThreadLocalAllocator {
    const NEW: Self = Self {
        rand: 0,
        local_quarantine: 0,
        per_sc: [PerSizeClass { sp: None, hint: 0 }; NUM_SIZE_CLASSES],
        stats: LocalStats::NEW,
    };

    pub(crate) fn current() -> &'static mut Self {
        TLS.with(|tls| unsafe { &mut *tls.get() })
    }

    fn ensure_seeded(&mut self) {
        if self.rand == 0 {
            self.rand = sys::gettid() as u32 | 1;
        }
    }
}

/// ANSI C linear congruential PRNG.
fn rand_r(state: &mut u32) -> u32 {
    let new_state = state.wrapping_mul(1103515245).wrapping_add(12345);
    *state = new_state;
    new_state >> 16
}

pub struct Allocator {
    /// Serialises super-page creation and scans.
    pub(crate) lock: Mutex<()>,
    num_super_pages: [AtomicUsize; NUM_RANGES],
    pub(crate) bytes_in_quarantine: AtomicUsize,
    pub(crate) last_quarantine_size: AtomicUsize,
    pub(crate) num_scans: AtomicUsize,
    pub(crate) scan_pos: [AtomicUsize; NUM_RANGES],
    pub(crate) scan_arrivals: AtomicUsize,
    data_only_scope: AtomicUsize,
}

static ALLOCATOR: Lazy<Allocator> = Lazy::new(Allocator::boot);

impl Allocator {
    pub fn get() -> &'static Allocator {
        &ALLOCATOR
    }

    /// # Safety
    /// Only valid once `get` ran at least once; used by the scan signal
    /// handler, which must not block on initialisation.
    pub(crate) unsafe fn get_initialized() -> &'static Allocator {
        ALLOCATOR.as_initialized()
    }

    fn boot() -> Self {
        let config = MallocConfig::get();
        SizeClassTable::get();
        if RawMemory::reserve_fixed(
            Address::from_usize(REGION_BASE),
            REGION_BYTES,
            config.use_aliases,
        )
        .is_err()
        {
            crate::fatal!("cannot reserve the heap region at {:#x}", REGION_BASE);
        }
        space::init_shadows();
        tags::init();
        if config.handle_sigusr2 {
            crate::scan::install_scan_signal_handler();
        }
        if config.handle_sigsegv {
            crate::scan::install_segv_handler();
        }
        if config.release_freq_ms > 0 {
            crate::release::spawn_release_daemon();
        }
        Self {
            lock: Mutex::new(()),
            num_super_pages: [AtomicUsize::new(0), AtomicUsize::new(0)],
            bytes_in_quarantine: AtomicUsize::new(0),
            last_quarantine_size: AtomicUsize::new(0),
            num_scans: AtomicUsize::new(0),
            scan_pos: [AtomicUsize::new(0), AtomicUsize::new(0)],
            scan_arrivals: AtomicUsize::new(0),
            data_only_scope: AtomicUsize::new(0),
        }
    }

    pub fn super_pages_in_range(&self, range: usize) -> usize {
        self.num_super_pages[range].load(Ordering::Acquire)
    }

    pub fn bytes_in_quarantine(&self) -> usize {
        self.bytes_in_quarantine.load(Ordering::Relaxed)
    }

    pub fn num_scans(&self) -> usize {
        self.num_scans.load(Ordering::Relaxed)
    }

    pub fn local_quarantine_bytes(&self) -> usize {
        ThreadLocalAllocator::current().local_quarantine
    }

    /// Does `ptr` (possibly address-tagged) belong to the small allocator?
    pub fn is_mine(&self, ptr: Address) -> bool {
        region_contains(tags::apply_address_tag(ptr, 0))
    }

    pub fn allocate(&self, size: usize) -> Address {
        let tls = ThreadLocalAllocator::current();
        let (sc, descr) = SizeClassTable::get().size_to_class(size);
        tls.stats.allocs_per_class[sc.as_usize()] += 1;
        let data_only = self.data_only_scope.load(Ordering::Relaxed) > 0;
        let slot = &mut tls.per_sc[sc.as_usize()];
        if let Some(sp) = slot.sp {
            if let Some(res) = sp.try_allocate(data_only, descr, &mut slot.hint) {
                return res;
            }
        }
        self.allocate_slow(sc, descr, data_only)
    }

    #[cold]
    fn allocate_slow(&self, sc: SizeClass, descr: SizeClassDescr, data_only: bool) -> Address {
        let tls = ThreadLocalAllocator::current();
        tls.ensure_seeded();
        let range = descr.range();
        loop {
            // Randomised probe over every super-page of the class before
            // paying for a new one.
            let n = self.super_pages_in_range(range);
            let offset = if n > 0 {
                rand_r(&mut tls.rand) as usize % n
            } else {
                0
            };
            for i in 0..n {
                let mut idx = i + offset;
                if idx >= n {
                    idx -= n;
                }
                let base = super_page_base(range, idx);
                if ClassIndexMap::get(base) != sc.0 {
                    continue;
                }
                let sp = SuperPage::new(base);
                let slot = &mut tls.per_sc[sc.as_usize()];
                slot.sp = Some(sp);
                if let Some(res) = sp.try_allocate(data_only, descr, &mut slot.hint) {
                    return res;
                }
            }
            self.allocate_super_page(sc, descr);
            tls.per_sc[sc.as_usize()].hint = 0;
        }
    }

    fn allocate_super_page(&self, sc: SizeClass, descr: SizeClassDescr) {
        let _guard = self.lock.lock();
        let config = MallocConfig::get();
        let tls = ThreadLocalAllocator::current();
        let range = descr.range();
        let idx = self.num_super_pages[range].load(Ordering::Acquire);
        let start = super_page_base(range, idx);
        if RawMemory::map_fixed(
            start,
            SUPER_PAGE_BYTES,
            tags::prot_flags(),
            config.use_aliases,
        )
        .is_err()
        {
            crate::fatal!("cannot map super-page at {:?}", start);
        }
        if config.use_aliases {
            // One extra window per non-zero tag, spaced a region apart, all
            // sharing this page's physical backing.
            for tag in 1usize..16 {
                let window = Address::from_usize(start.as_usize() + tag * REGION_BYTES);
                if RawMemory::remap_alias(start, window, SUPER_PAGE_BYTES).is_err() {
                    crate::fatal!("cannot alias super-page {:?} to {:?}", start, window);
                }
            }
        }
        space::set_class(start, sc);
        let sp = SuperPage::new(start);
        if config.print_sp_alloc {
            crate::println!("Allocated SP: {}", sc.as_usize());
            sp.print_summary();
        }
        // Seed every chunk with a random memory tag.
        let chunk_size = descr.chunk_size();
        let mut pos = start;
        let end = start + chunk_size * descr.num_chunks();
        while pos < end {
            tags::set_memory_tag(pos, chunk_size, rand_r(&mut tls.rand) as u8);
            pos += chunk_size;
        }
        stat::SUPER_PAGES_CREATED.inc(1);
        self.num_super_pages[range].fetch_add(1, Ordering::Release);
    }

    /// Strip the address tag; with shadow+alias tagging active, a stale tag
    /// is a freed-pointer reuse and fatal.
    fn strip_tag_and_check_double_free(&self, ptr: Address) -> Address {
        let config = MallocConfig::get();
        let address_tag = tags::address_tag(ptr) & 15;
        let untagged = tags::apply_address_tag(ptr, 0);
        if config.use_shadow && config.use_aliases {
            let memory_tag = tags::memory_tag(untagged) & 15;
            if address_tag != memory_tag {
                crate::fatal!("ERROR: double-free {:?}", untagged);
            }
        }
        untagged
    }

    fn owning_super_page(&self, ptr: Address) -> SuperPage {
        if !region_contains(ptr) {
            crate::fatal!("pointer outside the heap: {:?}", ptr);
        }
        SuperPage::containing(ptr)
    }

    pub fn deallocate(&self, ptr: Address) {
        let ptr = self.strip_tag_and_check_double_free(ptr);
        self.owning_super_page(ptr).deallocate(ptr);
    }

    pub fn quarantine(&self, ptr: Address) {
        let ptr = self.strip_tag_and_check_double_free(ptr);
        let quarantined = self.owning_super_page(ptr).quarantine(ptr);
        ThreadLocalAllocator::current().local_quarantine += quarantined;
    }

    /// Quarantine `ptr`; once the thread-local counter spills into the
    /// global one and the global total exceeds `max_quarantine_bytes` above
    /// the previous scan's leftovers, stop the world and scan.
    pub fn quarantine_and_maybe_scan(&self, ptr: Address, max_quarantine_bytes: usize) {
        self.quarantine(ptr);
        let tls = ThreadLocalAllocator::current();
        if tls.local_quarantine < LOCAL_QUARANTINE_BYTES {
            return;
        }
        let total = self
            .bytes_in_quarantine
            .fetch_add(tls.local_quarantine, Ordering::Relaxed)
            + tls.local_quarantine;
        tls.local_quarantine = 0;
        let limit = max_quarantine_bytes + self.last_quarantine_size.load(Ordering::Relaxed);
        if total > limit {
            let _guard = self.lock.lock();
            if self.bytes_in_quarantine.load(Ordering::Relaxed) < limit {
                // Someone else scanned while we waited for the lock.
                return;
            }
            self.scan_locked();
        }
    }

    /// Stop the world and recycle unreferenced quarantined chunks.
    pub fn scan(&self) {
        let _guard = self.lock.lock();
        self.scan_locked();
    }

    /// Chunk size backing `ptr`; upper bound for realloc copies.
    pub fn chunk_size_of(&self, ptr: Address) -> usize {
        let ptr = tags::apply_address_tag(ptr, 0);
        self.owning_super_page(ptr).descr().chunk_size()
    }

    /// While the level is positive, new chunks are tagged pointer-free and
    /// the scanner skips their contents entirely.
    pub fn data_only_scope(&self, level: i32) {
        match level {
            1 => {
                self.data_only_scope.fetch_add(1, Ordering::Relaxed);
            }
            -1 => {
                let previous = self.data_only_scope.fetch_sub(1, Ordering::Relaxed);
                if previous == 0 {
                    crate::fatal!("unbalanced data-only scope");
                }
            }
            _ => crate::fatal!("data-only scope level must be +1 or -1"),
        }
    }

    pub fn print_all(&self) {
        crate::println!(
            "RSS: {}M SPs: {{{} {}}}",
            sys::rss_bytes() >> 20,
            self.super_pages_in_range(0),
            self.super_pages_in_range(1)
        );
        let table = SizeClassTable::get();
        for i in 0..NUM_SIZE_CLASSES {
            let d = table.descr(SizeClass(i as u8));
            let meta = size_of_inline_meta(d.num_chunks(), d.range());
            crate::println!(
                "sc {} r {} sz {} chunks {} meta {} slack {}",
                i,
                d.range(),
                d.chunk_size(),
                d.num_chunks(),
                meta,
                SUPER_PAGE_BYTES - d.chunk_size() * d.num_chunks() - meta
            );
        }
        ThreadLocalAllocator::current().stats.merge_into_global();
        stat::report();
    }
}
