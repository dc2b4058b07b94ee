use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::*;

const UNINITIALIZED: u8 = 2;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 0;

/// Spin-initialised lazy static. First `deref` on any thread runs the
/// initialiser; racing threads spin until the value is published.
pub struct Lazy<T, F = fn() -> T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    init: Cell<Option<F>>,
}

impl<T, F: FnOnce() -> T> Lazy<T, F> {
    pub const fn new(f: F) -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            init: Cell::new(Some(f)),
        }
    }

    fn force_initialize(&self) {
        let f: F = self.init.replace(None).unwrap();
        let v: T = f();
        unsafe { (*self.value.get()).write(v) };
        fence(Ordering::SeqCst);
        self.state.store(INITIALIZED, Ordering::SeqCst);
    }

    #[cold]
    fn force_slow(lazy: &Self) {
        let result =
            lazy.state
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| match state {
                    UNINITIALIZED => Some(INITIALIZING),
                    _ => None,
                });
        match result {
            Ok(UNINITIALIZED) => lazy.force_initialize(),
            Err(INITIALIZING) => loop {
                std::hint::spin_loop();
                if INITIALIZED == lazy.state.load(Ordering::SeqCst) {
                    break;
                }
            },
            Err(INITIALIZED) => {}
            s => unreachable!("broken lazy state {:?}", s),
        }
    }

    pub fn force(lazy: &Self) {
        if INITIALIZED == lazy.state.load(Ordering::Relaxed) {
            return;
        }
        Self::force_slow(lazy);
    }

    /// Load the value and assume it has been initialized.
    ///
    /// # Safety
    ///
    /// The caller must know initialization already happened; used from the
    /// scan signal handler, which cannot block on the initialiser.
    pub unsafe fn as_initialized(&self) -> &T {
        &*(*self.value.get()).as_ptr()
    }
}

impl<T, F: FnOnce() -> T> Deref for Lazy<T, F> {
    type Target = T;
    fn deref(&self) -> &T {
        Lazy::force(self);
        unsafe { self.as_initialized() }
    }
}

unsafe impl<T, F: FnOnce() -> T> Send for Lazy<T, F> {}
unsafe impl<T, F: FnOnce() -> T> Sync for Lazy<T, F> {}
