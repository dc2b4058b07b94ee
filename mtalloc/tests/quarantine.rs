//! Quarantine accounting and conservative reachability. This file owns the
//! global quarantine counters for its process, so it holds exactly one
//! test.

use mtalloc::size_class::SizeClassTable;
use mtalloc::Allocator;

#[test]
fn scan_recycles_unreferenced_chunks_only() {
    let heap = Allocator::get();
    let table = SizeClassTable::get();
    let n = 5000usize;

    // Quarantine a spread of chunks; the thread-local counter sees the
    // rounded (class) sizes.
    let mut held = Vec::new();
    let mut total_rounded = 0usize;
    for i in 0..n {
        let size = i + 8;
        let p = heap.allocate(size);
        unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 42, size) };
        held.push(p);
        total_rounded += table.size_to_class(size).1.chunk_size();
    }
    for &p in &held {
        heap.quarantine(p);
    }
    assert_eq!(heap.local_quarantine_bytes(), total_rounded);

    // Nothing references them: the scan must recycle everything.
    heap.scan();
    assert_eq!(heap.bytes_in_quarantine(), 0);

    // Now keep one dangling reference alive in a live chunk.
    let mut held = Vec::new();
    for i in 0..n {
        let size = i + 8;
        let p = heap.allocate(size);
        unsafe { std::ptr::write_bytes(p.as_mut_ptr::<u8>(), 42, size) };
        held.push(p);
    }
    let p1 = heap.allocate(100);
    let p2 = heap.allocate(1000);
    unsafe { p1.store::<usize>(p2.as_usize()) };

    for &p in &held {
        heap.quarantine(p);
    }
    heap.quarantine(p2);
    heap.scan();
    // Only p2 survives: its class size is 1024.
    assert_eq!(heap.bytes_in_quarantine(), 1024);

    // Drop the reference; the next round frees it.
    unsafe { p1.store::<usize>(0xDEADBEEF) };
    heap.scan();
    assert_eq!(heap.bytes_in_quarantine(), 0);

    heap.deallocate(p1);
}
