//! Layout predictability on a pristine heap: the first super-page of a
//! class sits at its half-region base and fills front to back. Keep this
//! file to a single test; it assumes nothing else has touched the heap.

use mtalloc::util::constants::{RANGE_BASE, SUPER_PAGE_BYTES};
use mtalloc::Allocator;

#[test]
fn first_allocations_are_consecutive_at_the_range_base() {
    let heap = Allocator::get();
    let size = 1 << 15; // range-1 class, 16 chunks per super-page

    for i in 0..16 {
        let p = heap.allocate(size);
        assert_eq!(p.as_usize(), RANGE_BASE[1] + i * size);
    }
    // The page is full; the next batch fills the second super-page.
    for i in 0..16 {
        let p = heap.allocate(size);
        assert_eq!(p.as_usize(), RANGE_BASE[1] + SUPER_PAGE_BYTES + i * size);
    }

    let small = heap.allocate(16);
    assert_eq!(small.as_usize(), RANGE_BASE[0]);
}
