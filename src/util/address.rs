use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

use crate::util::conversions;

/// Size of a memory range in bytes.
pub type ByteSize = usize;

/// A location inside (or at the edge of) an allocator arena.
///
/// Plain `usize` arithmetic, so page and alignment computations stay readable. Reading and
/// writing through an address is always `unsafe` and up to the owner of the memory.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Distance between two addresses. The left one must not be lower.
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "{} lies below {}, no extent between them",
            self,
            other
        );
        self.0 - other.0
    }
}

impl Address {
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// # Safety
    /// Nothing backs the resulting address. Only for arithmetic in tests.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// # Safety
    /// The address must be valid for reads and aligned for `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *const T)
    }

    /// Write `value` without dropping what was there.
    /// # Safety
    /// The address must be valid for writes and aligned for `T`.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    pub const fn align_up(self, align: ByteSize) -> Address {
        Address(conversions::raw_align_up(self.0, align))
    }

    pub const fn align_down(self, align: ByteSize) -> Address {
        Address(conversions::raw_align_down(self.0, align))
    }

    pub const fn is_aligned_to(self, align: usize) -> bool {
        conversions::raw_is_aligned(self.0, align)
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// # Safety
    /// `[self, self + len)` must be valid for writes.
    pub unsafe fn zero_bytes(self, len: ByteSize) {
        std::ptr::write_bytes(self.to_mut_ptr::<u8>(), 0, len);
    }

    /// Does `[self, self + size)` lie inside `range`?
    pub fn fits_in(self, size: ByteSize, range: &Range<Address>) -> bool {
        range.start <= self && self.0 + size <= range.end.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
