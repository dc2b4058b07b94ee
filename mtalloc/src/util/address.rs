use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Deref, Sub, SubAssign};

use atomic::Atomic;

#[repr(transparent)]
pub struct Address(pub(crate) usize);

impl Address {
    pub const ZERO: Self = Self(0);

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn align_up(&self, align: usize) -> Address {
        debug_assert!(align.is_power_of_two());
        let mask = align - 1;
        Self((self.0 + mask) & !mask)
    }

    pub const fn align_down(&self, align: usize) -> Address {
        debug_assert!(align.is_power_of_two());
        let mask = align - 1;
        Self(self.0 & !mask)
    }

    pub const fn is_aligned_to(&self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        (self.0 & (align - 1)) == 0
    }

    pub const fn from_usize(v: usize) -> Self {
        Self(v)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    pub const fn as_ptr<T>(&self) -> *const T {
        self.0 as _
    }

    pub const fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as _
    }

    pub unsafe fn load<T: 'static + Copy>(&self) -> T {
        debug_assert!(!self.is_zero());
        *self.as_ptr()
    }

    pub unsafe fn store<T: 'static + Copy>(&self, value: T) {
        debug_assert!(!self.is_zero());
        *self.as_mut_ptr() = value
    }

    pub unsafe fn atomic<T: 'static>(&self) -> &'static Atomic<T> {
        debug_assert!(!self.is_zero());
        &*self.as_ptr()
    }
}

unsafe impl Send for Address {}
unsafe impl Sync for Address {}

impl Clone for Address {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for Address {}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl<T> From<*const T> for Address {
    fn from(value: *const T) -> Self {
        Self(value as usize)
    }
}

impl<T> From<*mut T> for Address {
    fn from(value: *mut T) -> Self {
        Self(value as usize)
    }
}

impl From<Address> for usize {
    fn from(value: Address) -> usize {
        value.0
    }
}

impl<T> From<Address> for *const T {
    fn from(value: Address) -> *const T {
        value.0 as _
    }
}

impl<T> From<Address> for *mut T {
    fn from(value: Address) -> *mut T {
        value.0 as _
    }
}

impl Deref for Address {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Address {}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<usize> for Address {
    type Output = Self;

    fn add(self, other: usize) -> Self::Output {
        Self(self.0 + other)
    }
}

impl AddAssign<usize> for Address {
    fn add_assign(&mut self, other: usize) {
        *self = *self + other
    }
}

impl Sub<Self> for Address {
    type Output = usize;

    fn sub(self, other: Self) -> Self::Output {
        debug_assert!(self.0 >= other.0);
        self.0 - other.0
    }
}

impl Sub<usize> for Address {
    type Output = Self;

    fn sub(self, other: usize) -> Self::Output {
        Self(self.0 - other)
    }
}

impl SubAssign<usize> for Address {
    fn sub_assign(&mut self, other: usize) {
        *self = *self - other
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_ptr::<u8>())
    }
}
