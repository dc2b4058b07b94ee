//! Stop-the-world conservative scan of the quarantine.
//!
//! The thread that crossed the quarantine threshold (under the allocator
//! lock) signals every sibling thread with SIGUSR2. Each handler runs the
//! same batch loop over all super-pages, so the freeze and the parallel
//! mark are the same mechanism: user code does not resume until the
//! handler returns, and the handler returns only when every batch has been
//! claimed. The orchestrator waits for all arrivals before flipping
//! quarantine states and republishing the counters.

use std::sync::atomic::Ordering;

use crate::alloc::Allocator;
use crate::config::MallocConfig;
use crate::space::super_page::{state, SuperPage};
use crate::space::super_page_base;
use crate::stat;
use crate::util::constants::*;
use crate::util::sys;

/// Super-pages claimed per fetch_add on the shared cursor.
const POS_INCREMENT: usize = 1024;

/// How long the orchestrator waits for signalled threads before giving up
/// on stragglers (a thread can exit with the signal still pending).
const BARRIER_TIMEOUT_USEC: usize = 30_000_000;

impl Allocator {
    /// Caller holds the allocator lock.
    pub(crate) fn scan_locked(&self) {
        for range in 0..NUM_RANGES {
            self.scan_pos[range].store(0, Ordering::Relaxed);
        }
        self.scan_arrivals.store(0, Ordering::Release);
        let signalled = self.signal_all_other_threads();
        self.num_scans.fetch_add(1, Ordering::Relaxed);
        stat::QUARANTINE_SCANS.inc(1);
        let time1 = sys::usec();
        let verbose = MallocConfig::get().print_scan;
        if verbose {
            crate::println!(
                "scan start: {:#x} {:#x} {} {}",
                RANGE_BASE[0],
                RANGE_BASE[1],
                self.super_pages_in_range(0),
                self.super_pages_in_range(1)
            );
        }

        let done_here = self.scan_loop();
        self.wait_for_arrivals(signalled);
        let new_bytes = self.post_scan(verbose);
        let time2 = sys::usec();

        crate::println!(
            "Scan {}: tid {} BytesInQuarantine {}M => {}M; SuperPages {} / {} Allocated {}M RSS {}M time {} threads {}",
            self.num_scans.load(Ordering::Relaxed),
            sys::gettid(),
            self.bytes_in_quarantine.load(Ordering::Relaxed) >> 20,
            new_bytes >> 20,
            self.super_pages_in_range(0) + self.super_pages_in_range(1),
            done_here,
            ((self.super_pages_in_range(0) + self.super_pages_in_range(1)) * SUPER_PAGE_BYTES)
                >> 20,
            sys::rss_bytes() >> 20,
            time2 - time1,
            signalled + 1,
        );
        self.bytes_in_quarantine.store(new_bytes, Ordering::Relaxed);
        self.last_quarantine_size.store(new_bytes, Ordering::Relaxed);
    }

    /// The parallel mark loop: claim batches of super-pages off the shared
    /// cursor until both ranges run dry. Runs on the orchestrator and in
    /// every signal handler.
    pub(crate) fn scan_loop(&self) -> usize {
        let num_super_pages = [self.super_pages_in_range(0), self.super_pages_in_range(1)];
        let mut num_done = 0;
        for range in 0..NUM_RANGES {
            let n = num_super_pages[range];
            loop {
                let pos = self.scan_pos[range].fetch_add(POS_INCREMENT, Ordering::Relaxed);
                if pos >= n {
                    break;
                }
                let end = n.min(pos + POS_INCREMENT);
                num_done += end - pos;
                for idx in pos..end {
                    SuperPage::new(super_page_base(range, idx))
                        .mark_all_live_pointers(num_super_pages);
                }
            }
        }
        num_done
    }

    fn wait_for_arrivals(&self, signalled: usize) {
        let deadline = sys::usec() + BARRIER_TIMEOUT_USEC;
        let mut spins = 0u32;
        while self.scan_arrivals.load(Ordering::Acquire) < signalled {
            std::hint::spin_loop();
            spins = spins.wrapping_add(1);
            if spins % 1024 == 0 {
                unsafe { libc::sched_yield() };
                if sys::usec() > deadline {
                    crate::println!(
                        "scan: {} of {} threads never reached the mark loop",
                        signalled - self.scan_arrivals.load(Ordering::Acquire),
                        signalled
                    );
                    break;
                }
            }
        }
    }

    /// Orchestrator-only: recycle unmarked quarantined chunks and count
    /// what stays behind for the next round.
    fn post_scan(&self, verbose: bool) -> usize {
        let mut new_bytes_in_quarantine = 0;
        for range in 0..NUM_RANGES {
            for idx in 0..self.super_pages_in_range(range) {
                let sp = SuperPage::new(super_page_base(range, idx));
                let descr = sp.descr();
                let was_quarantined = if verbose {
                    sp.count_state(state::QUARANTINED)
                } else {
                    0
                };
                sp.move_from_quarantine_to_available();
                let now_quarantined = sp.count_state(state::QUARANTINED);
                new_bytes_in_quarantine += descr.chunk_size() * now_quarantined;
                if verbose {
                    crate::println!(
                        "--- {:?} sc {} quarantined {}=>{} available {} nchunks {} bytesInQ {}",
                        sp.start(),
                        sp.class().as_usize(),
                        was_quarantined,
                        now_quarantined,
                        sp.count_state(state::AVAILABLE),
                        descr.num_chunks(),
                        descr.chunk_size() * now_quarantined
                    );
                }
            }
        }
        new_bytes_in_quarantine
    }

    /// Signal every other thread in the process, re-reading the thread list
    /// until it stabilises. Returns how many signals were delivered.
    fn signal_all_other_threads(&self) -> usize {
        let my_tid = sys::gettid();
        let my_pid = unsafe { libc::getpid() };
        let mut seen = [0 as libc::pid_t; MAX_THREADS];
        let mut num_seen = 1;
        seen[0] = my_tid;
        let mut signalled = 0;
        let mut changed = true;
        while changed {
            changed = false;
            sys::iterate_tids(|tid| {
                if seen[..num_seen].contains(&tid) {
                    return;
                }
                if num_seen >= MAX_THREADS {
                    crate::fatal!("too many threads to scan");
                }
                seen[num_seen] = tid;
                num_seen += 1;
                if sys::tgkill(my_pid, tid, libc::SIGUSR2) == 0 {
                    signalled += 1;
                }
                changed = true;
            });
        }
        signalled
    }
}

extern "C" fn scan_signal_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    // Scans never start before the allocator finished booting.
    let heap = unsafe { Allocator::get_initialized() };
    heap.scan_loop();
    heap.scan_arrivals.fetch_add(1, Ordering::Release);
}

extern "C" fn segv_handler(
    _sig: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    let addr = unsafe { (*info).si_addr() };
    crate::fatal!("SEGV si_addr: {:?}", addr);
}

type HandlerFn = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

fn install(sig: libc::c_int, handler: HandlerFn) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_flags = libc::SA_SIGINFO;
        action.sa_sigaction = handler as usize;
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            crate::fatal!("cannot install handler for signal {}", sig);
        }
    }
}

pub(crate) fn install_scan_signal_handler() {
    install(libc::SIGUSR2, scan_signal_handler);
}

pub(crate) fn install_segv_handler() {
    install(libc::SIGSEGV, segv_handler);
}
