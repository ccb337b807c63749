use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::util::constants::CACHE_LINE_SIZE;
use crate::util::rust_util::zeroed_alloc::ZeroedBlock;

/// A fixed-length array that starts on a cache line.
///
/// The block remembers the layout it was allocated with, so it is always freed with the
/// matching layout.
pub struct CacheAligned<T: Copy> {
    block: ZeroedBlock,
    len: usize,
    _marker: PhantomData<T>,
}

unsafe impl<T: Copy + Send> Send for CacheAligned<T> {}
unsafe impl<T: Copy + Sync> Sync for CacheAligned<T> {}

impl<T: Copy> CacheAligned<T> {
    /// `len` copies of `fill`. Panics if the memory cannot be allocated.
    pub fn new(len: usize, fill: T) -> Self {
        let size = std::mem::size_of::<T>()
            .checked_mul(len.max(1))
            .and_then(|size| size.checked_next_multiple_of(CACHE_LINE_SIZE));
        let block = size
            .and_then(|size| ZeroedBlock::new(size, CACHE_LINE_SIZE.max(std::mem::align_of::<T>())))
            .unwrap_or_else(|| panic!("cannot allocate {} cache aligned elements", len));
        let ptr = block.as_mut_ptr::<T>();
        for i in 0..len {
            // Safety: in bounds of the block, and properly aligned.
            unsafe { ptr.add(i).write(fill) };
        }
        CacheAligned {
            block,
            len,
            _marker: PhantomData,
        }
    }
}

impl<T: Copy> Deref for CacheAligned<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // Safety: `len` initialised elements.
        unsafe { std::slice::from_raw_parts(self.block.as_mut_ptr::<T>(), self.len) }
    }
}

impl<T: Copy> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // Safety: as above, and `&mut self` is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.block.as_mut_ptr::<T>(), self.len) }
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
