//! The size-class table. Chunk sizes are fixed at build time; the per-class
//! descriptors (chunk count per super-page, range, division reciprocal) are
//! computed once at startup and read-only afterwards.

use crate::util::constants::*;
use crate::util::{round_up, Lazy};

/// All chunk sizes are 0 mod 16. Contains every multiple of 16 up to 256.
/// Every entry admits an exact `(x * recip) >> 35` reciprocal; the build
/// step verifies this and bumps any entry that does not (none do).
pub const SC_SIZES: [usize; NUM_SIZE_CLASSES] = [
    16, 32, 48, 64, 80, 96, 112, 128, //
    144, 160, 176, 192, 208, 224, 240, 256, //
    272, 288, 336, 368, 448, 480, 512, 576, //
    640, 704, 768, 896, 1024, 1152, 1280, 1408, //
    1536, 1792, 2048, 2304, 2688, 2816, 3200, 3456, //
    3584, 4096, 4736, 5376, 6144, 6528, 7168, 8192, //
    9216, 10240, 12288, 14336, 16384, 20480, 24576, 28672, //
    32768, 40960, 49152, 57344, 65536, 73728, 81920, 98304, //
    106496, 131072, 147456, 164864, 183296, 207872, 230400, 262144,
];

pub const NUM_SIZE_CLASSES: usize = 72;
pub const MAX_SMALL_SIZE: usize = SC_SIZES[NUM_SIZE_CLASSES - 1];

/// Replacing `offset / chunk_size` with `(offset * recip) >> 35` holds for
/// every offset in a super-page for every table entry; see the build check.
pub const DIV_SHIFT: u32 = 35;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass(pub u8);

impl SizeClass {
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SizeClassDescr {
    pub range: u8,
    pub num_chunks: u16,
    pub chunk_size: u32,
    pub recip: u32,
}

impl SizeClassDescr {
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub const fn num_chunks(&self) -> usize {
        self.num_chunks as usize
    }

    pub const fn range(&self) -> usize {
        self.range as usize
    }
}

#[inline(always)]
pub fn div_by_size(offset: usize, recip: u32) -> usize {
    debug_assert!(offset < SUPER_PAGE_BYTES);
    ((offset as u64 * recip as u64) >> DIV_SHIFT) as usize
}

pub fn compute_recip(div: u32) -> u32 {
    let mut recip = ((1u64 << DIV_SHIFT) / div as u64) as u32;
    if div & (div - 1) != 0 {
        recip += 1;
    }
    recip
}

pub fn recip_is_exact(div: u32, recip: u32, max_offset: u32) -> bool {
    for offset in 1..=max_offset as u64 {
        if offset / div as u64 != (offset * recip as u64) >> DIV_SHIFT {
            return false;
        }
    }
    true
}

/// Bytes reserved at the super-page tail for the inline state array.
pub const fn size_of_inline_meta(num_chunks: usize, range: usize) -> usize {
    if range == 1 {
        return 0;
    }
    round_up(num_chunks, STATE_ARRAY_ALIGNMENT)
}

fn compute_num_chunks(chunk_size: usize, range: usize) -> usize {
    let approx = SUPER_PAGE_BYTES / chunk_size;
    let mut num_chunks = approx;
    while num_chunks > 0 {
        if size_of_inline_meta(num_chunks, range) + num_chunks * chunk_size <= SUPER_PAGE_BYTES {
            return num_chunks;
        }
        num_chunks -= 1;
    }
    crate::fatal!("no chunks fit for size {}", chunk_size);
}

pub struct SizeClassTable {
    descr: [SizeClassDescr; NUM_SIZE_CLASSES],
}

static TABLE: Lazy<SizeClassTable> = Lazy::new(SizeClassTable::build);

impl SizeClassTable {
    pub fn get() -> &'static SizeClassTable {
        &TABLE
    }

    fn build() -> Self {
        let mut descr = [SizeClassDescr {
            range: 0,
            num_chunks: 0,
            chunk_size: 0,
            recip: 0,
        }; NUM_SIZE_CLASSES];
        for (i, slot) in descr.iter_mut().enumerate() {
            let mut chunk_size = SC_SIZES[i];
            while !recip_is_exact(
                chunk_size as u32,
                compute_recip(chunk_size as u32),
                SUPER_PAGE_BYTES as u32,
            ) {
                chunk_size += RANGE_ONE_ALIGNMENT;
            }
            if chunk_size != SC_SIZES[i] {
                crate::println!("fixed up size class: {} => {}", SC_SIZES[i], chunk_size);
            }
            debug_assert!(chunk_size % 16 == 0);
            let range = (chunk_size % RANGE_ONE_ALIGNMENT == 0) as usize;
            let num_chunks = compute_num_chunks(chunk_size, range);
            *slot = SizeClassDescr {
                range: range as u8,
                num_chunks: num_chunks as u16,
                chunk_size: chunk_size as u32,
                recip: compute_recip(chunk_size as u32),
            };
        }
        Self { descr }
    }

    pub fn descr(&self, sc: SizeClass) -> SizeClassDescr {
        self.descr[sc.as_usize()]
    }

    pub fn class_size(&self, sc: SizeClass) -> usize {
        self.descr(sc).chunk_size()
    }

    pub fn size_to_class(&self, size: usize) -> (SizeClass, SizeClassDescr) {
        if size <= 256 {
            let sc = SizeClass(((size.max(1) + 15) / 16 - 1) as u8);
            return (sc, self.descr(sc));
        }
        for idx in 0..NUM_SIZE_CLASSES {
            if size <= self.descr[idx].chunk_size() {
                return (SizeClass(idx as u8), self.descr[idx]);
            }
        }
        crate::fatal!("size {} beyond the largest small class", size);
    }
}
