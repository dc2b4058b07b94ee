//! Address-space geometry. Everything the allocator owns lives at fixed
//! virtual addresses so shadow projections are plain offset arithmetic.

/// log2 of a super-page: 512 KiB, 512 KiB-aligned.
pub const LOG_SUPER_PAGE_BYTES: usize = 19;
pub const SUPER_PAGE_BYTES: usize = 1 << LOG_SUPER_PAGE_BYTES;

/// The reserved heap region: 1 TiB at a fixed base, split into two
/// half-region size-class ranges.
pub const LOG_REGION_BYTES: usize = 40;
pub const REGION_BASE: usize = 0x6000_0000_0000;
pub const REGION_BYTES: usize = 1 << LOG_REGION_BYTES;
pub const HALF_REGION_BYTES: usize = REGION_BYTES / 2;

pub const NUM_RANGES: usize = 2;

/// First super-page address of each size-class range.
pub const RANGE_BASE: [usize; NUM_RANGES] = [REGION_BASE, REGION_BASE + HALF_REGION_BYTES];

/// Chunk sizes that are a multiple of this live in range 1, with their state
/// bytes in an external shadow instead of the super-page tail.
pub const RANGE_ONE_ALIGNMENT: usize = 1024;

/// One class-index byte per super-page slot.
pub const CLASS_MAP_BASE: usize = 0x7000_0000_0000;

/// Range-1 state bytes: one byte per `RANGE_ONE_ALIGNMENT` of heap.
pub const RANGE_ONE_STATE_BASE: usize = 0x7100_0000_0000;

/// Memory-tag shadows for the software-shadow backend.
pub const SMALL_TAG_SHADOW_BASE: usize = 0x3000_0000_0000;
pub const LARGE_TAG_SHADOW_BASE: usize = 0x4000_0000_0000;

/// Inline state arrays (range 0) are padded to this alignment so the word
/// scan can read whole groups.
pub const STATE_ARRAY_ALIGNMENT: usize = 32;

pub const MAX_SUPER_PAGES_PER_RANGE: usize = HALF_REGION_BYTES / SUPER_PAGE_BYTES;

/// A thread flushes its private quarantine counter into the global one every
/// time it crosses this many bytes.
pub const LOCAL_QUARANTINE_BYTES: usize = 1 << 20;

pub const MAX_THREADS: usize = 1 << 12;

pub const CPU_PAGE_BYTES: usize = 1 << 12;
