//! Large-object allocator behaviour that doesn't involve trapping; the
//! trap cases live in the death tests.

use mtalloc::api::LARGE;

#[test]
fn sizes_round_to_pages_and_mappings_recycle() {
    let size1 = 1usize << 20;
    let size2 = 2usize << 20;
    let p1 = LARGE.allocate(size1);
    let p2 = LARGE.allocate(size2);
    assert_ne!(p1, p2);
    unsafe {
        std::ptr::write_bytes(p1.as_mut_ptr::<u8>(), 1, size1);
        std::ptr::write_bytes(p2.as_mut_ptr::<u8>(), 2, size2);
    }
    assert_eq!(LARGE.chunk_size(p1), size1);
    assert_eq!(LARGE.chunk_size(p2), size2);
    LARGE.deallocate(p2, false);
    LARGE.deallocate(p1, false);

    let odd = LARGE.allocate(size1 + 5);
    assert_eq!(LARGE.chunk_size(odd), size1 + 4096);
    LARGE.deallocate(odd, false);
}

#[test]
fn protected_mappings_are_never_reissued() {
    let size = 1usize << 20;
    let p = LARGE.allocate(size);
    LARGE.deallocate(p, true);
    // The fenced range keeps its virtual addresses forever.
    let q = LARGE.allocate(size);
    assert_ne!(p, q);
    LARGE.deallocate(q, false);
}

#[test]
fn header_page_is_invisible_to_the_caller() {
    let p = LARGE.allocate(4096);
    assert_eq!(p.as_usize() % 4096, 0);
    // The user range is fully writable.
    unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 0xee, 4096) };
    assert_eq!(unsafe { p.load::<u8>() }, 0xee);
    LARGE.deallocate(p, false);
}
