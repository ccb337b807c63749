//! Zero-initialised raw blocks with a caller-chosen alignment.
//!
//! The allocator arena and the packed dispatch tables are both plain blocks of zeroed memory
//! that need a stronger alignment than their element type, and that must be freed with
//! exactly the layout they were allocated with. [`ZeroedBlock`] keeps that layout next to the
//! pointer, so dropping it always frees the right thing.
//!
//! `alloc_zeroed` gets pre-zeroed pages from the system for large requests, which is much
//! cheaper than writing zeroes ourselves when the arena is hundreds of megabytes.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::util::Address;

/// An owned, zero-initialised, aligned block of memory.
pub struct ZeroedBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The block is just bytes. Whoever hands out references into it synchronises access.
unsafe impl Send for ZeroedBlock {}
unsafe impl Sync for ZeroedBlock {}

impl ZeroedBlock {
    /// Allocate `size` zeroed bytes aligned to `align`.
    ///
    /// Returns `None` if the layout is invalid, the size is zero, or the system is out of
    /// memory.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        // Safety: the layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(ZeroedBlock { ptr, layout })
    }

    /// Allocate `len` zeroed elements of `T`, with at least `align` alignment.
    ///
    /// # Safety
    /// An all-zero bit pattern must be a valid `T` for the returned block to be read as `T`s.
    pub unsafe fn new_array<T>(len: usize, align: usize) -> Option<Self> {
        let size = std::mem::size_of::<T>().checked_mul(len)?;
        Self::new(size, align.max(std::mem::align_of::<T>()))
    }

    pub fn start(&self) -> Address {
        Address::from_mut_ptr(self.ptr.as_ptr())
    }

    pub fn end(&self) -> Address {
        self.start() + self.layout.size()
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.ptr.as_ptr() as *mut T
    }
}

impl Drop for ZeroedBlock {
    fn drop(&mut self) {
        // Safety: allocated in `new` with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
