//! Allocation statistics. Hot paths count into a per-thread block; the
//! block drains into the global relaxed counters when its thread exits, and
//! everything is printed at process exit under `MTM_PRINT_STATS=1`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use array_const_fn_init::array_const_fn_init;
use crossbeam::queue::SegQueue;

use crate::size_class::{SizeClass, SizeClassTable, NUM_SIZE_CLASSES};

/// Counters register themselves here on first use; the exit report drains
/// the queue so only touched counters print.
static COUNTERS: SegQueue<&'static Counter> = SegQueue::new();

pub static LARGE_ALLOCATIONS: Counter = Counter::new("large-allocations");
pub static ACCESSES_OUTSIDE_HEAP: Counter = Counter::new("accesses-outside-heap");
pub static SUPER_PAGES_CREATED: Counter = Counter::new("super-pages-created");
pub static QUARANTINE_SCANS: Counter = Counter::new("quarantine-scans");

const fn zero_counter(_: usize) -> AtomicU64 {
    AtomicU64::new(0)
}

static ALLOCS_PER_CLASS: [AtomicU64; NUM_SIZE_CLASSES] = array_const_fn_init![zero_counter; 72];
static ACCESSES_PER_CLASS: [AtomicU64; NUM_SIZE_CLASSES] = array_const_fn_init![zero_counter; 72];

pub struct Counter {
    name: &'static str,
    value: AtomicU64,
    registered: AtomicBool,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
            registered: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn inc(&'static self, delta: u64) {
        if !self.registered.swap(true, Ordering::Relaxed) {
            COUNTERS.push(self);
        }
        self.value.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Per-thread counter block; lives in the thread-local allocator state.
pub struct LocalStats {
    pub allocs_per_class: [u64; NUM_SIZE_CLASSES],
    pub accesses_per_class: [u64; NUM_SIZE_CLASSES],
}

impl LocalStats {
    pub const NEW: Self = Self {
        allocs_per_class: [0; NUM_SIZE_CLASSES],
        accesses_per_class: [0; NUM_SIZE_CLASSES],
    };

    pub fn merge_into_global(&mut self) {
        for i in 0..NUM_SIZE_CLASSES {
            if self.allocs_per_class[i] != 0 {
                ALLOCS_PER_CLASS[i].fetch_add(self.allocs_per_class[i], Ordering::Relaxed);
                self.allocs_per_class[i] = 0;
            }
            if self.accesses_per_class[i] != 0 {
                ACCESSES_PER_CLASS[i].fetch_add(self.accesses_per_class[i], Ordering::Relaxed);
                self.accesses_per_class[i] = 0;
            }
        }
    }
}

impl Drop for LocalStats {
    fn drop(&mut self) {
        self.merge_into_global();
    }
}

pub fn report() {
    let table = SizeClassTable::get();
    for i in 0..NUM_SIZE_CLASSES {
        let allocs = ALLOCS_PER_CLASS[i].load(Ordering::Relaxed);
        if allocs != 0 {
            crate::println!(
                "stat.allocs sc {}\tsize\t{}\tcount {}",
                i,
                table.class_size(SizeClass(i as u8)),
                allocs
            );
        }
    }
    for i in 0..NUM_SIZE_CLASSES {
        let accesses = ACCESSES_PER_CLASS[i].load(Ordering::Relaxed);
        if accesses != 0 {
            crate::println!(
                "stat.accesses sc {}\tsize\t{}\tcount {}",
                i,
                table.class_size(SizeClass(i as u8)),
                accesses
            );
        }
    }
    while let Some(c) = COUNTERS.pop() {
        if c.get() != 0 {
            crate::println!("stat.{} {}", c.name, c.get());
        }
    }
}
