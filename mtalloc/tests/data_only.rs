//! The data-only scope: chunks allocated inside it are promised
//! pointer-free, so the scanner never reads them and anything they happen
//! to reference stays collectable. One test; this file owns the process's
//! quarantine counters.

use mtalloc::Allocator;

#[test]
fn data_only_chunks_do_not_retain_their_targets() {
    let heap = Allocator::get();

    // A pointer stored in a data-only chunk must not pin its target.
    heap.data_only_scope(1);
    let data_holder = heap.allocate(64);
    heap.data_only_scope(-1);
    let target = heap.allocate(1000);
    unsafe { data_holder.store::<usize>(target.as_usize()) };
    heap.quarantine(target);
    heap.scan();
    assert_eq!(heap.bytes_in_quarantine(), 0);

    // The same store from an ordinary chunk pins it.
    let mixed_holder = heap.allocate(64);
    let target = heap.allocate(1000);
    unsafe { mixed_holder.store::<usize>(target.as_usize()) };
    heap.quarantine(target);
    heap.scan();
    assert_eq!(heap.bytes_in_quarantine(), 1024);

    unsafe { mixed_holder.store::<usize>(0) };
    heap.scan();
    assert_eq!(heap.bytes_in_quarantine(), 0);

    heap.deallocate(mixed_holder);
    heap.deallocate(data_holder);
}
