//! Freed chunks come back: allocate a spread of sizes, free everything,
//! then greedily re-allocate until every original address has been returned
//! again. The rotation hint makes reuse lag a full trip around each
//! super-page, so the probe loop leaks non-matching chunks the way a real
//! workload would churn them.

use std::collections::{BTreeSet, HashSet};

use mtalloc::util::Address;
use mtalloc::Allocator;

#[test]
fn freed_addresses_are_eventually_reobserved() {
    let heap = Allocator::get();
    let n = 10_000usize;

    let mut originals = HashSet::new();
    let mut sizes = BTreeSet::new();
    for i in 0..n {
        let size = i + 8;
        let p = heap.allocate(size);
        unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 42, size) };
        assert!(originals.insert(p.as_usize()));
        sizes.insert(size);
    }
    for &p in &originals {
        heap.deallocate(Address::from_usize(p));
    }

    let mut matched = HashSet::new();
    let mut probes = 0usize;
    while matched.len() < originals.len() {
        let mut hit = None;
        for &size in &sizes {
            probes += 1;
            assert!(probes < 50_000_000, "reuse did not converge");
            let p = heap.allocate(size).as_usize();
            if originals.contains(&p) {
                hit = Some((size, p));
                break;
            }
            // Non-matching probes stay allocated; the rotation moves on.
        }
        if let Some((size, p)) = hit {
            sizes.remove(&size);
            assert!(matched.insert(p));
        }
    }
}
