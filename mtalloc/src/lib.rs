//! mtalloc — a heap allocator for memory-tagging architectures.
//!
//! Allocation happens from 512 KiB super-pages of a single size class each;
//! the per-chunk metadata is one state byte, and every lifecycle transition
//! (available => used => quarantined => marked => {quarantined, available})
//! is one relaxed atomic byte access. Freed chunks can be quarantined and
//! are recycled by a stop-the-world conservative scan that proves no live
//! chunk still points at them. Address/memory tags (hardware MTE, software
//! shadow, or 16-way page aliasing) catch use-after-free on access.

pub mod alloc;
pub mod api;
pub mod config;
pub mod log;
pub mod release;
pub mod scan;
pub mod size_class;
pub mod space;
pub mod stat;
pub mod tags;
pub mod util;

pub use alloc::Allocator;
pub use api::{MallocApi, MALLOC_IMPL};
pub use config::MallocConfig;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("32-bit targets are not supported");

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
compile_error!("only Linux x86_64 and Linux aarch64 are supported");
