//! Background release-to-OS daemon: a single detached thread walking the
//! super-pages round-robin, returning fully-unused ones to the kernel.
//! Started at boot when `MTM_RELEASE_FREQ` is non-zero.

use crate::alloc::Allocator;
use crate::config::MallocConfig;
use crate::space::super_page::SuperPage;
use crate::space::super_page_base;
use crate::util::constants::NUM_RANGES;

extern "C" fn run(_arg: *mut libc::c_void) -> *mut libc::c_void {
    let heap = Allocator::get();
    let sleep_usec = MallocConfig::get().release_freq_ms as u32 * 1000;
    let mut iter = 0usize;
    loop {
        let range = iter % NUM_RANGES;
        let n = heap.super_pages_in_range(range);
        if n != 0 {
            let idx = iter % n;
            SuperPage::new(super_page_base(range, idx)).maybe_release_to_os();
        }
        unsafe {
            libc::usleep(sleep_usec);
        }
        iter = iter.wrapping_add(1);
    }
}

pub(crate) fn spawn_release_daemon() {
    let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::pthread_create(&mut thread, std::ptr::null(), run, std::ptr::null_mut())
    };
    if rc != 0 {
        crate::fatal!("cannot start the release daemon");
    }
}
