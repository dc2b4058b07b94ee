//! Trap behaviour. Each case re-executes this test binary filtered down to
//! itself with a marker in the environment; the child performs the fatal
//! action and the parent asserts it died to a signal rather than exiting.

use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use mtalloc::api::LARGE;
use mtalloc::{Allocator, MALLOC_IMPL};

fn death_case() -> Option<String> {
    std::env::var("MTALLOC_DEATH_CASE").ok()
}

fn dies_by_signal(case: &str, extra_env: &[(&str, &str)]) -> bool {
    let exe = std::env::current_exe().unwrap();
    let mut cmd = Command::new(exe);
    cmd.arg(case)
        .arg("--exact")
        .arg("--test-threads=1")
        .env("MTALLOC_DEATH_CASE", case);
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    let status = cmd.status().unwrap();
    status.signal().is_some()
}

#[test]
fn double_free_traps() {
    if death_case().as_deref() == Some("double_free_traps") {
        let heap = Allocator::get();
        let p = heap.allocate(42);
        heap.deallocate(p);
        heap.deallocate(p); // aborts
        return;
    }
    assert!(dies_by_signal("double_free_traps", &[]));
}

#[test]
fn double_quarantine_traps() {
    if death_case().as_deref() == Some("double_quarantine_traps") {
        let heap = Allocator::get();
        let p = heap.allocate(66);
        heap.quarantine(p);
        heap.quarantine(p); // aborts
        return;
    }
    assert!(dies_by_signal("double_quarantine_traps", &[]));
}

#[test]
fn free_then_quarantine_traps() {
    if death_case().as_deref() == Some("free_then_quarantine_traps") {
        let heap = Allocator::get();
        let p = heap.allocate(128);
        heap.deallocate(p);
        heap.quarantine(p); // aborts
        return;
    }
    assert!(dies_by_signal("free_then_quarantine_traps", &[]));
}

#[test]
fn interior_large_free_traps() {
    if death_case().as_deref() == Some("interior_large_free_traps") {
        let p = LARGE.allocate(1 << 20);
        LARGE.deallocate(p + 4096, false); // header check fails
        return;
    }
    assert!(dies_by_signal("interior_large_free_traps", &[]));
}

#[test]
fn large_double_free_dies() {
    if death_case().as_deref() == Some("large_double_free_dies") {
        let p = LARGE.allocate(2 << 20);
        LARGE.deallocate(p, false);
        LARGE.deallocate(p, false); // header is unmapped or recycled
        return;
    }
    assert!(dies_by_signal("large_double_free_dies", &[]));
}

#[test]
fn access_after_protected_free_faults() {
    if death_case().as_deref() == Some("access_after_protected_free_faults") {
        let p = LARGE.allocate(1 << 20);
        LARGE.deallocate(p, true);
        let _ = unsafe { std::ptr::read_volatile(p.as_ptr::<u8>()) }; // SIGSEGV
        return;
    }
    assert!(dies_by_signal("access_after_protected_free_faults", &[]));
}

#[test]
fn tag_mismatch_traps_on_instrumented_access() {
    if death_case().as_deref() == Some("tag_mismatch_traps_on_instrumented_access") {
        let p = MALLOC_IMPL.malloc(64);
        MALLOC_IMPL.free(p); // bumps the memory tag
        MALLOC_IMPL.access(p); // stale address tag: traps
        return;
    }
    assert!(dies_by_signal(
        "tag_mismatch_traps_on_instrumented_access",
        &[("MTM_USE_ALIASES", "1"), ("MTM_USE_SHADOW", "1")],
    ));
}

#[test]
fn stale_tagged_pointer_free_traps() {
    if death_case().as_deref() == Some("stale_tagged_pointer_free_traps") {
        let heap = Allocator::get();
        let p = heap.allocate(64);
        heap.deallocate(p);
        heap.deallocate(p); // tag check fires before the state check
        return;
    }
    assert!(dies_by_signal(
        "stale_tagged_pointer_free_traps",
        &[("MTM_USE_ALIASES", "1"), ("MTM_USE_SHADOW", "1")],
    ));
}

#[test]
fn unbalanced_data_only_scope_traps() {
    if death_case().as_deref() == Some("unbalanced_data_only_scope_traps") {
        Allocator::get().data_only_scope(-1); // nothing to leave
        return;
    }
    assert!(dies_by_signal("unbalanced_data_only_scope_traps", &[]));
}
