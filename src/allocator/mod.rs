//! A page-based arena allocator.
//!
//! One [`Allocator`] owns a single zero-initialised block of memory, cut into pages of a
//! power-of-two size. The first pages hold the allocator's own bookkeeping: a header, the
//! page bitset, and a pool of fixed-size union objects that describe pages and managers.
//!
//! Memory is handed out through owners:
//!
//! * [`PageManager`]: bump allocation inside pages the manager owns; all of its pages go back
//!   at once. Allocations can also be addressed by [`MovableMemory`] offsets, which a moved
//!   page manager can redirect to other pages (for example after copying pages in from
//!   another process).
//! * [`ObjectManager`]: a free list of equally sized objects.
//!
//! Only page and union-object acquisition take the caller-supplied [`AllocatorGuard`]. The
//! arena itself never grows.

mod guard;
mod object;
mod object_manager;
mod page;
mod page_manager;
mod stats;

pub use self::guard::{AllocatorGuard, NullGuard, SpinGuard};
pub use self::object::union_size;
pub use self::object_manager::ObjectManager;
pub use self::page_manager::{MovableMemory, PageInfo, PageManager};
pub use self::stats::{AllocatorStats, PageManagerStats};

use std::ptr::NonNull;
use std::sync::Arc;

use probe::probe;
use static_assertions::const_assert;

use self::object::{UnionObject, UNION_SIZE};
use self::page::{Geometry, Page};
use crate::util::bitset::{self, Bitset};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::rust_util::zeroed_alloc::ZeroedBlock;
use crate::util::Address;

/// Round `size` up to the alignment of every allocation.
pub fn roundup_to_alignment(size: usize) -> usize {
    conversions::roundup_to_alignment(size)
}

/// The mutable part of the allocator. It sits in the first union-object slot of the arena and
/// is only touched while holding the guard.
#[repr(C)]
struct AllocatorState {
    free_objects: Option<NonNull<UnionObject>>,
    n_pages_allocated: u32,
    n_pages_high_watermark: u32,
    n_pages_maintenance: u32,
}

const_assert!(std::mem::size_of::<AllocatorState>() <= UNION_SIZE);

pub struct Allocator<G: AllocatorGuard = NullGuard> {
    /// The raw block. `geometry.base` is its first page-aligned address.
    block: ZeroedBlock,
    geometry: Geometry,
    n_pages_bits: u32,
    n_pages_capacity: u32,
    state: NonNull<AllocatorState>,
    guard: G,
}

// The state behind the raw pointers is only accessed under the guard, or by the single owner
// of a page. Sharing the allocator is as safe as sharing its guard.
unsafe impl<G: AllocatorGuard + Send> Send for Allocator<G> {}
unsafe impl<G: AllocatorGuard + Sync> Sync for Allocator<G> {}

impl<G: AllocatorGuard> Allocator<G> {
    /// Create an allocator over `total_memory` bytes, cut into pages of `page_size` bytes
    /// (rounded up to a power of two).
    ///
    /// Returns `None` if the geometry is unusable: no memory, pages smaller than the
    /// allocation alignment or too small for 8 union objects, fewer than two pages, or so many
    /// pages that the bookkeeping would not leave at least one page free.
    pub fn new(total_memory: u32, page_size: u32, guard: G) -> Option<Arc<Self>> {
        let page_size = conversions::next_power_of_two(page_size);
        debug!("create allocator: total_memory={} page_size={}", total_memory, page_size);
        if total_memory <= page_size
            || total_memory == 0
            || page_size == 0
            || (page_size as usize) < ALLOCATOR_ALIGNMENT
        {
            debug!("invalid allocator geometry");
            return None;
        }
        if page_size as usize / union_size() < MIN_NUMBER_OF_OBJECTS_PER_PAGE {
            debug!(
                "page size {} holds fewer than {} union objects",
                page_size, MIN_NUMBER_OF_OBJECTS_PER_PAGE
            );
            return None;
        }

        let page_shift = conversions::log2(page_size);
        let n_pages = total_memory / page_size;
        // Truncate to a multiple of the page size.
        let total_memory = (n_pages as usize) << page_shift;
        let n_pages_bits = conversions::bits_needed(n_pages);

        let maintenance_bytes = conversions::raw_align_up(
            union_size() + bitset::bitset_size(n_pages),
            MAINTENANCE_ALIGNMENT,
        );
        if total_memory <= maintenance_bytes {
            debug!(
                "{} bytes cannot hold {} bytes of bookkeeping",
                total_memory, maintenance_bytes
            );
            return None;
        }

        let mut maintenance_pages =
            conversions::bytes_to_pages_up(maintenance_bytes, page_shift) as u32;
        let mut free_in_last_page =
            conversions::pages_to_bytes(maintenance_pages as usize, page_shift) - maintenance_bytes;
        // Pre-seed union objects for at least 0.5% of the pages.
        while free_in_last_page / union_size() < n_pages as usize / UNION_OBJECT_RESERVE_DIVISOR {
            maintenance_pages += 1;
            free_in_last_page += page_size as usize;
        }
        // One page may be lost to alignment.
        if maintenance_pages >= n_pages - 1 {
            debug!(
                "{} maintenance pages leave no room in {} pages",
                maintenance_pages, n_pages
            );
            return None;
        }

        let block = ZeroedBlock::new(total_memory, page_size as usize)?;
        let base = block.start().align_up(page_size as usize);
        let mut n_pages_capacity = n_pages;
        if base != block.start() {
            n_pages_capacity -= 1;
        }

        let state = NonNull::new(base.to_mut_ptr::<AllocatorState>())?;
        // Safety: the slot is inside the block, aligned, and nobody else sees it yet.
        unsafe {
            base.store(AllocatorState {
                free_objects: None,
                n_pages_allocated: 0,
                n_pages_high_watermark: 0,
                n_pages_maintenance: maintenance_pages,
            });
        }

        let allocator = Allocator {
            block,
            geometry: Geometry { base, page_shift },
            n_pages_bits,
            n_pages_capacity,
            state,
            guard,
        };

        allocator.with_lock(|locked| {
            locked.bitset.mark_invalid();
            locked.set_range(0, maintenance_pages);
            locked.fill_with_union_objects(base + maintenance_bytes, free_in_last_page);
        });
        debug!(
            "allocator at {}: {} pages of {} bytes, {} maintenance pages",
            base, n_pages_capacity, page_size, maintenance_pages
        );
        Some(Arc::new(allocator))
    }

    /// Usable memory in bytes, after truncation and alignment.
    pub fn total_memory(&self) -> usize {
        (self.n_pages_capacity as usize) << self.geometry.page_shift
    }

    /// The page size, rounded up to a power of two.
    pub fn page_size(&self) -> usize {
        self.geometry.page_size()
    }

    pub fn max_number_of_pages(&self) -> u32 {
        self.n_pages_capacity
    }

    /// Bits of a movable memory offset that address bytes within a page.
    pub fn page_offset_bit_width(&self) -> u32 {
        self.geometry.page_shift
    }

    /// Bits needed to address every page.
    pub fn n_pages_bit_width(&self) -> u32 {
        self.n_pages_bits
    }

    /// First page-aligned address of the arena. Movable memory offsets are relative to it.
    pub fn base(&self) -> Address {
        self.geometry.base
    }

    pub(crate) fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn stats(&self) -> AllocatorStats {
        self.with_lock(|locked| {
            let page_size = self.page_size();
            let pages = PageManagerStats {
                pages_allocated: locked.state.n_pages_high_watermark as usize,
                pages_used: locked.state.n_pages_allocated as usize,
                ..Default::default()
            };
            let mut maintenance = PageManagerStats {
                pages_allocated: locked.state.n_pages_maintenance as usize,
                pages_used: locked.state.n_pages_maintenance as usize,
                memory_allocated: locked.state.n_pages_maintenance as usize * page_size,
                memory_alignment_loss: self.geometry.base - self.block.start(),
                ..Default::default()
            };
            maintenance.memory_available = locked.free_union_objects() * union_size();
            maintenance.memory_used = maintenance.memory_allocated - maintenance.memory_available;
            AllocatorStats { pages, maintenance }
        })
    }

    /// Run `f` on the shared state while holding the guard.
    fn with_lock<R>(&self, f: impl FnOnce(&mut Locked<'_>) -> R) -> R {
        self.guard.guard(|| {
            // Safety: the guard serialises all access to the header and the bitset, which do
            // not overlap each other.
            let state = unsafe { &mut *self.state.as_ptr() };
            let bitset = unsafe {
                Bitset::from_raw(
                    (self.geometry.base + union_size()).to_mut_ptr::<u64>(),
                    self.n_pages_capacity,
                )
            };
            let mut locked = Locked {
                state,
                bitset,
                geometry: &self.geometry,
            };
            let result = f(&mut locked);
            #[cfg(feature = "extreme_assertions")]
            locked.check_consistency();
            result
        })
    }

    /// Take a union object for one of its roles. The caller initialises it before use.
    /// Returns `None` when the pool and the pages are exhausted.
    pub(crate) fn alloc_union_object<T>(&self) -> Option<NonNull<T>> {
        self.with_lock(|locked| locked.get_union_object())
            .map(|object| object.cast::<T>())
    }

    /// Return a union object to the pool.
    ///
    /// # Safety
    /// `object` must have come from [`Self::alloc_union_object`] of this allocator and must
    /// not be used afterwards.
    pub(crate) unsafe fn free_union_object<T>(&self, object: NonNull<T>) {
        self.with_lock(|locked| locked.put_union_object(object.cast()));
    }

    /// A fresh page (with its descriptor) of at least `min_size` bytes.
    pub(crate) fn get_page(&self, min_size: usize) -> Option<NonNull<Page>> {
        let order = self.geometry.order(min_size);
        self.with_lock(|locked| locked.get_page(order))
    }

    /// Release every page of the list starting at `head`.
    ///
    /// # Safety
    /// The pages must belong to this allocator and must not be used afterwards.
    pub(crate) unsafe fn put_pages(&self, head: Option<NonNull<Page>>) {
        self.with_lock(|locked| {
            let mut next = head;
            while let Some(page) = next {
                // Read the link before the descriptor is recycled.
                next = page.as_ref().next;
                locked.put_page(page);
            }
        })
    }

    /// Release a single page.
    ///
    /// # Safety
    /// As for [`Self::put_pages`].
    pub(crate) unsafe fn put_page(&self, page: NonNull<Page>) {
        self.with_lock(|locked| locked.put_page(page))
    }
}

/// The shared allocator state, borrowed while holding the guard.
struct Locked<'a> {
    state: &'a mut AllocatorState,
    bitset: Bitset<'a>,
    geometry: &'a Geometry,
}

impl Locked<'_> {
    fn update_high_watermark(&mut self) {
        if self.state.n_pages_allocated > self.state.n_pages_high_watermark {
            self.state.n_pages_high_watermark = self.state.n_pages_allocated;
        }
    }

    fn set_range(&mut self, offset: u32, length: u32) {
        self.bitset.set_range(offset, length);
        self.state.n_pages_allocated += length;
        self.update_high_watermark();
    }

    fn find_and_set(&mut self, order: u32) -> Option<u32> {
        let page_id = if order == 1 {
            self.bitset.find_and_set()
        } else {
            self.bitset.find_and_set_range(order)
        }?;
        self.state.n_pages_allocated += order;
        self.update_high_watermark();
        Some(page_id)
    }

    fn clear_range(&mut self, offset: u32, length: u32) {
        if length == 1 {
            self.bitset.clear(offset);
        } else {
            self.bitset.clear_range(offset, length);
        }
        self.state.n_pages_allocated -= length;
    }

    fn fill_with_union_objects(&mut self, mut start: Address, mut free: usize) {
        while free > union_size() {
            // Safety: `start` is a union-object slot inside a maintenance page.
            let object = unsafe { NonNull::new_unchecked(start.to_mut_ptr::<UnionObject>()) };
            self.put_union_object(object);
            start += union_size();
            free -= union_size();
        }
    }

    fn get_union_object(&mut self) -> Option<NonNull<UnionObject>> {
        if self.state.free_objects.is_none() {
            // Out of union objects: turn one more page into maintenance memory.
            let Some(page_id) = self.find_and_set(1) else {
                debug!("out of memory: no free page for union objects");
                return None;
            };
            let start = self.geometry.page_address(page_id);
            self.fill_with_union_objects(start, self.geometry.page_size());
            self.state.n_pages_maintenance += 1;
            trace!("allocated maintenance page {}", page_id);
        }
        let mut object = self.state.free_objects?;
        // Safety: free objects are valid union-object slots.
        unsafe {
            self.state.free_objects = object.as_ref().next;
            object.as_mut().next = None;
        }
        Some(object)
    }

    fn put_union_object(&mut self, mut object: NonNull<UnionObject>) {
        // Safety: the caller gives up the object, so we may overwrite it with the link.
        unsafe {
            object.as_mut().next = self.state.free_objects;
        }
        self.state.free_objects = Some(object);
    }

    fn free_union_objects(&self) -> usize {
        let mut count = 0;
        let mut next = self.state.free_objects;
        while let Some(object) = next {
            count += 1;
            // Safety: free objects are valid union-object slots.
            next = unsafe { object.as_ref().next };
        }
        count
    }

    fn get_page(&mut self, order: u32) -> Option<NonNull<Page>> {
        let Some(object) = self.get_union_object() else {
            debug!("out of memory: no free union object, order={}", order);
            return None;
        };
        let Some(page_id) = self.find_and_set(order) else {
            self.put_union_object(object);
            debug!("out of memory: no free pages, order={}", order);
            return None;
        };
        let page = object.cast::<Page>();
        // Safety: the union object is ours, and a page is one of its roles.
        unsafe { page.as_ptr().write(Page::new(self.geometry, page_id, order)) };
        probe!(scorep, get_page, page_id, order);
        trace!(
            "new page {} order {} at {}",
            page_id,
            order,
            unsafe { page.as_ref() }.start
        );
        Some(page)
    }

    fn put_page(&mut self, page: NonNull<Page>) {
        // Safety: the caller hands us a live descriptor it no longer uses.
        let (page_id, order) = unsafe {
            let page = page.as_ref();
            (page.id(self.geometry), page.order(self.geometry))
        };
        trace!("release page {} order {}", page_id, order);
        probe!(scorep, put_page, page_id, order);
        self.clear_range(page_id, order);
        self.put_union_object(page.cast());
    }

    #[cfg(feature = "extreme_assertions")]
    fn check_consistency(&self) {
        assert_eq!(
            self.bitset.count_used(),
            self.state.n_pages_allocated,
            "page bitset and page counter disagree"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(total: u32, page: u32) -> Option<Arc<Allocator>> {
        Allocator::new(total, page, NullGuard::new())
    }

    #[test]
    fn invalid_geometries() {
        // page size larger than total memory
        assert!(allocator(1024, 2048).is_none());
        // page size equal to total memory
        assert!(allocator(1024, 1024).is_none());
        // no memory
        assert!(allocator(0, 0).is_none());
        // no page size
        assert!(allocator(42, 0).is_none());
        // page size below the allocation alignment
        assert!(allocator(4096, 32).is_none());
        // 256 byte pages cannot hold 8 union objects
        assert!(allocator(u32::MAX, 256).is_none());
    }

    #[test]
    fn many_pages() {
        let a = allocator(1024 * 1024, 512).unwrap();
        assert_eq!(a.page_size(), 512);
        assert_eq!(a.max_number_of_pages(), 2048);
        assert_eq!(a.total_memory(), 1024 * 1024);
        assert_eq!(a.page_offset_bit_width(), 9);
        assert_eq!(a.n_pages_bit_width(), 12);
    }

    #[test]
    fn unaligned_page_size_is_rounded_up() {
        let a = allocator(1024 * 1024, 511).unwrap();
        assert_eq!(a.page_size(), 512);
        assert_eq!(a.max_number_of_pages(), 2048);
    }

    #[test]
    fn total_memory_is_truncated() {
        let a = allocator(4608 + 100, 512).unwrap();
        assert_eq!(a.total_memory(), 4608);
        assert_eq!(a.max_number_of_pages(), 9);
    }

    #[test]
    fn arena_is_page_aligned() {
        let a = allocator(4096, 1024).unwrap();
        assert!(a.base().is_aligned_to(1024));
        assert_eq!(a.max_number_of_pages(), 4);
        assert_eq!(a.stats().maintenance.memory_alignment_loss, 0);
    }

    #[test]
    fn initial_stats() {
        // 9 pages: header (64) + bitset (8) rounded to 128 bytes, one maintenance page,
        // (512 - 128) bytes give 5 union objects.
        let a = allocator(4608, 512).unwrap();
        let stats = a.stats();
        assert_eq!(stats.pages.pages_used, 1);
        assert_eq!(stats.pages.pages_allocated, 1);
        assert_eq!(stats.maintenance.pages_allocated, 1);
        assert_eq!(stats.maintenance.memory_allocated, 512);
        assert_eq!(stats.maintenance.memory_available, 5 * union_size());
        assert_eq!(stats.maintenance.memory_used, 512 - 5 * union_size());
    }

    #[test]
    fn maintenance_pages_grow_with_the_page_count() {
        // 65536 pages: 64 + 8192 bytes of header and bitset fill 16 pages and 64 bytes.
        // 327 union objects are wanted, so 40 more pages are added, leaving 20928 free bytes
        // which yield 326 objects (the last slot is never split off).
        let a = allocator(1 << 25, 512).unwrap();
        let stats = a.stats();
        assert_eq!(stats.maintenance.pages_allocated, 57);
        assert_eq!(stats.maintenance.memory_available, 326 * union_size());
    }

    #[test]
    fn union_objects_come_from_new_pages_when_exhausted() {
        let a = allocator(4608, 512).unwrap();
        let objects: Vec<NonNull<UnionObject>> = (0..5)
            .map(|_| a.alloc_union_object::<UnionObject>().unwrap())
            .collect();
        assert_eq!(a.stats().maintenance.pages_allocated, 1);
        let extra = a.alloc_union_object::<UnionObject>().unwrap();
        let stats = a.stats();
        assert_eq!(stats.maintenance.pages_allocated, 2);
        assert_eq!(stats.pages.pages_used, 2);
        // a full page of 512 bytes gives 7 objects, one of which is in use
        assert_eq!(stats.maintenance.memory_available, 6 * union_size());
        unsafe {
            a.free_union_object(extra);
            for o in objects {
                a.free_union_object(o);
            }
        }
        assert_eq!(a.stats().maintenance.memory_available, 12 * union_size());
    }

    #[test]
    fn pages_are_counted_only_on_success() {
        let a = allocator(2048, 512).unwrap();
        let p1 = a.get_page(512).unwrap();
        let p2 = a.get_page(512).unwrap();
        // pages 1 and 3 are free, but not adjacent
        unsafe { a.put_page(p1) };
        assert!(a.get_page(1024).is_none());
        let stats = a.stats();
        assert_eq!(stats.pages.pages_used, 2);
        assert_eq!(stats.pages.pages_allocated, 3);
        unsafe { a.put_page(p2) };
        assert_eq!(a.stats().pages.pages_used, 1);
    }
}
