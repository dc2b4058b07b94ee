//! Software tagging round-trip: with shadow + alias tagging enabled, a
//! fresh allocation's address tag matches the memory tag of its chunk, and
//! the tagged pointer dereferences normally through its alias window.
//!
//! Single test: the configuration is per-process and must be set before
//! the allocator boots.

use mtalloc::{tags, Allocator};

#[test]
fn address_tag_matches_memory_tag_on_fresh_chunks() {
    std::env::set_var("MTM_USE_ALIASES", "1");
    std::env::set_var("MTM_USE_SHADOW", "1");

    let heap = Allocator::get();
    for size in [16usize, 100, 1000, 4096, 100_000] {
        let p = heap.allocate(size);
        // The tagged pointer is the live one: writes go through its window.
        unsafe { p.store::<u64>(0x4242_4242_4242_4242) };
        let untagged = tags::apply_address_tag(p, 0);
        assert_eq!(
            tags::address_tag(p) & 0xf,
            tags::memory_tag(untagged) & 0xf,
            "size {}",
            size
        );
        assert_eq!(unsafe { untagged.load::<u64>() }, 0x4242_4242_4242_4242);
        heap.deallocate(p);
    }
}
