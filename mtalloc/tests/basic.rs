//! ABI-level behaviour: alignment, distinctness, calloc/realloc/memalign
//! contracts. Runs against the process-wide allocator singleton with the
//! default configuration (no tagging, no quarantine).

use std::collections::HashSet;

use mtalloc::util::Address;
use mtalloc::{Allocator, MALLOC_IMPL};

#[test]
fn small_pointers_are_distinct_and_aligned() {
    let heap = Allocator::get();
    let mut seen = HashSet::new();
    for i in 0..10_000usize {
        let size = 8 + i;
        let p = heap.allocate(size);
        assert_eq!(p.as_usize() % 16, 0);
        assert!(seen.insert(p.as_usize()), "duplicate pointer {:?}", p);
        unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 42, size) };
    }
    for &p in &seen {
        heap.deallocate(Address::from_usize(p));
    }
}

#[test]
fn tiny_requests_get_a_valid_chunk() {
    for size in 0..8 {
        let p = MALLOC_IMPL.malloc(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        assert_eq!(MALLOC_IMPL.usable_size(p), 16);
        MALLOC_IMPL.free(p);
    }
}

#[test]
fn usable_size_covers_the_request() {
    for size in [8, 100, 256, 257, 3000, 262144, 300_000, 5 << 20] {
        let p = MALLOC_IMPL.malloc(size);
        assert!(!p.is_null());
        assert!(MALLOC_IMPL.usable_size(p) >= size);
        MALLOC_IMPL.free(p);
    }
}

#[test]
fn calloc_zeroes_and_detects_overflow() {
    let p = MALLOC_IMPL.calloc(100, 7);
    assert!(!p.is_null());
    for i in 0..700 {
        assert_eq!(unsafe { *p.add(i) }, 0);
    }
    MALLOC_IMPL.free(p);

    assert!(MALLOC_IMPL.calloc(usize::MAX, 2).is_null());
    assert!(MALLOC_IMPL.calloc(usize::MAX / 2, 3).is_null());
}

#[test]
fn realloc_preserves_contents() {
    let p = MALLOC_IMPL.malloc(100);
    for i in 0..100u8 {
        unsafe { *p.add(i as usize) = i };
    }
    let q = MALLOC_IMPL.realloc(p, 5000);
    for i in 0..100u8 {
        assert_eq!(unsafe { *q.add(i as usize) }, i);
    }
    let r = MALLOC_IMPL.realloc(q, 24);
    for i in 0..24u8 {
        assert_eq!(unsafe { *r.add(i as usize) }, i);
    }
    MALLOC_IMPL.free(r);

    let s = MALLOC_IMPL.realloc(std::ptr::null_mut(), 64);
    assert!(!s.is_null());
    MALLOC_IMPL.free(s);
}

#[test]
fn posix_memalign_honors_the_alignment() {
    for align in [16usize, 32, 64, 128, 256, 512, 1024, 2048, 4096] {
        for size in [1usize, align / 2, align, align + 1, 3000, 10_000] {
            let mut out: *mut u8 = std::ptr::null_mut();
            let rc = MALLOC_IMPL.posix_memalign(&mut out, align, size);
            assert_eq!(rc, 0, "align {} size {}", align, size);
            assert!(!out.is_null());
            assert_eq!(out as usize % align, 0, "align {} size {}", align, size);
            assert!(MALLOC_IMPL.usable_size(out) >= size);
            MALLOC_IMPL.free(out);
        }
    }
    let mut out: *mut u8 = std::ptr::null_mut();
    assert_eq!(MALLOC_IMPL.posix_memalign(&mut out, 48, 100), libc::EINVAL);
}

#[test]
fn large_requests_leave_the_small_heap() {
    let heap = Allocator::get();
    let p = MALLOC_IMPL.malloc(300_000);
    assert!(!p.is_null());
    assert!(!heap.is_mine(Address::from(p)));
    unsafe { std::ptr::write_bytes(p, 0x5a, 300_000) };
    MALLOC_IMPL.free(p);

    let q = MALLOC_IMPL.malloc(262_144);
    assert!(heap.is_mine(Address::from(q)));
    MALLOC_IMPL.free(q);
}

#[test]
fn size_classes_fill_without_interference() {
    let heap = Allocator::get();
    for _ in 0..10 {
        for size in [10usize, 100, 2000, 65536, 16384] {
            let mut chunk_set = HashSet::new();
            let num = (1 << 20) / size;
            for _ in 0..num {
                let p = heap.allocate(size);
                unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 0x42, size) };
                chunk_set.insert(p.as_usize());
            }
            assert_eq!(chunk_set.len(), num);
            for &p in &chunk_set {
                heap.deallocate(Address::from_usize(p));
            }
        }
    }
}
