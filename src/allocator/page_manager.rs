use std::fmt;
use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocator::object::PageManagerObject;
use crate::allocator::page::{self, Page};
use crate::allocator::{Allocator, AllocatorGuard, PageManagerStats};
use crate::util::constants::*;
use crate::util::rust_util::unlikely;
use crate::util::Address;

/// A relocatable reference to page manager memory: the byte offset from the allocator base.
///
/// Offsets are never 0, because page 0 always holds the allocator header.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MovableMemory(NonZeroU32);

impl MovableMemory {
    pub fn new(offset: u32) -> Option<Self> {
        NonZeroU32::new(offset).map(MovableMemory)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for MovableMemory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One page of a page manager, as reported by [`PageManager::page_infos`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    /// Never 0.
    pub page_id: u32,
    pub usage: u32,
    pub start: Address,
}

/// An owner of pages that bump-allocates inside them.
///
/// Allocation only takes the allocator guard when a new page is needed. All pages go back to
/// the allocator at once, by [`PageManager::free`] or when the manager is dropped.
///
/// A *moved* page manager (see [`PageManager::new_moved`]) does not allocate. It receives pages
/// by [`PageManager::alloc_moved_page`] and redirects movable memory offsets from the page ids
/// they were created with to the page ids they occupy now.
pub struct PageManager<G: AllocatorGuard> {
    allocator: Arc<Allocator<G>>,
    descriptor: NonNull<PageManagerObject>,
}

// A page manager is used by one owner at a time; the pages it owns are not shared.
unsafe impl<G: AllocatorGuard + Send + Sync> Send for PageManager<G> {}

impl<G: AllocatorGuard> PageManager<G> {
    fn create(allocator: &Arc<Allocator<G>>) -> Option<Self> {
        let descriptor = allocator.alloc_union_object::<PageManagerObject>()?;
        // Safety: a fresh union object, ours to initialise.
        unsafe {
            descriptor.as_ptr().write(PageManagerObject {
                pages_in_use: None,
                moved_page_id_mapping_page: None,
                last_allocation: 0,
            });
        }
        Some(PageManager {
            allocator: allocator.clone(),
            descriptor,
        })
    }

    /// Create a page manager and try to give it one page right away. Failing to get that page
    /// is not an error: pages may be free again by the time the manager needs one.
    pub fn new(allocator: &Arc<Allocator<G>>) -> Option<Self> {
        let mut page_manager = Self::create(allocator)?;
        let _ = page_manager.get_new_page(allocator.page_size());
        trace!("created page manager {:?}", page_manager.descriptor);
        Some(page_manager)
    }

    /// Create a moved page manager, with a zeroed mapping slot for every page of the
    /// allocator.
    pub fn new_moved(allocator: &Arc<Allocator<G>>) -> Option<Self> {
        let mut page_manager = Self::create(allocator)?;
        let mapping_size = BYTES_IN_PAGE_ID * allocator.max_number_of_pages() as usize;
        // Dropping the half-built manager gives the descriptor back.
        let mut mapping_page = allocator.get_page(mapping_size)?;
        // Safety: a fresh page, owned by this manager from now on.
        let mapping = unsafe {
            page_manager.descriptor_mut().moved_page_id_mapping_page = Some(mapping_page);
            mapping_page.as_mut().grab(mapping_size, ALLOCATOR_ALIGNMENT)
        }?;
        // Pages are recycled, so zero the slots explicitly.
        unsafe { mapping.zero_bytes(mapping_size) };
        trace!(
            "created moved page manager {:?} with {} mapping slots",
            page_manager.descriptor,
            allocator.max_number_of_pages()
        );
        Some(page_manager)
    }

    pub fn allocator(&self) -> &Arc<Allocator<G>> {
        &self.allocator
    }

    fn descriptor(&self) -> &PageManagerObject {
        // Safety: the descriptor lives as long as the manager and is only reached through it.
        unsafe { self.descriptor.as_ref() }
    }

    fn descriptor_mut(&mut self) -> &mut PageManagerObject {
        // Safety: as above, and `&mut self` makes the access exclusive.
        unsafe { self.descriptor.as_mut() }
    }

    pub fn is_moved(&self) -> bool {
        self.descriptor().moved_page_id_mapping_page.is_some()
    }

    fn pages(&self) -> impl Iterator<Item = &Page> + '_ {
        // Safety: the pages on our list are live and owned by us.
        page::pages(self.descriptor().pages_in_use).map(|p| unsafe { &*p.as_ptr() })
    }

    /// Get a page of at least `min_size` bytes and put it at the head of the list.
    fn get_new_page(&mut self, min_size: usize) -> Option<NonNull<Page>> {
        let Some(mut page) = self.allocator.get_page(min_size) else {
            debug!("out of memory: no page of {} bytes", min_size);
            return None;
        };
        let descriptor = self.descriptor_mut();
        // Safety: the page is fresh and now ours.
        unsafe { page.as_mut().next = descriptor.pages_in_use };
        descriptor.pages_in_use = Some(page);
        Some(page)
    }

    fn alloc_internal(&mut self, size: usize, alignment: usize) -> Option<Address> {
        assert!(!self.is_moved(), "cannot allocate from a moved page manager");
        assert!(size > 0);
        assert!(alignment <= self.allocator.page_size());

        if unlikely(size > self.allocator.total_memory()) {
            debug!("out of memory: {} bytes requested", size);
            return None;
        }

        let mut next = self.descriptor().pages_in_use;
        while let Some(mut page) = next {
            // Safety: our own page.
            let page = unsafe { page.as_mut() };
            if let Some(memory) = page.grab(size, alignment) {
                return Some(memory);
            }
            next = page.next;
        }

        trace!("requesting new page for {} bytes", size);
        let mut page = self.get_new_page(size)?;
        // Safety: our own page. It is page aligned and large enough, so this only fails if
        // `alignment` was bogus.
        unsafe { page.as_mut() }.grab(size, alignment)
    }

    /// Allocate `size` bytes aligned to the allocator alignment.
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        self.alloc_internal(size, ALLOCATOR_ALIGNMENT)
    }

    /// Allocate `size` bytes aligned to `alignment`, a power of two between the allocator
    /// alignment and the page size.
    pub fn aligned_alloc(&mut self, alignment: usize, size: usize) -> Option<Address> {
        assert!(alignment >= ALLOCATOR_ALIGNMENT);
        assert!(alignment.is_power_of_two());
        self.alloc_internal(size, alignment)
    }

    /// Return all pages to the allocator. The manager stays usable. A moved page manager
    /// keeps its mapping page, with every slot cleared.
    pub fn free(&mut self) {
        let head = self.descriptor_mut().pages_in_use.take();
        // Safety: the pages were ours and nothing refers to them through us any more.
        unsafe { self.allocator.put_pages(head) };
        if let Some(mapping_page) = self.descriptor().moved_page_id_mapping_page {
            // Safety: the mapping page is ours.
            unsafe {
                let mapping_page = mapping_page.as_ref();
                mapping_page.start.zero_bytes(mapping_page.usage());
            }
        }
        self.descriptor_mut().last_allocation = 0;
    }

    /// Allocate `size` bytes and return them as an offset from the allocator base.
    pub fn alloc_movable(&mut self, size: usize) -> Option<MovableMemory> {
        let memory = self.alloc(size)?;
        let offset = (memory - self.allocator.base()) as u32;
        self.descriptor_mut().last_allocation = offset;
        MovableMemory::new(offset)
    }

    /// Undo the most recent [`PageManager::alloc_movable`]. Padding inserted before it for
    /// alignment stays lost.
    pub fn rollback_alloc_movable(&mut self, memory: MovableMemory) {
        assert!(!self.is_moved(), "cannot roll back on a moved page manager");
        assert!(memory.get() as usize >= self.allocator.page_size());
        assert_eq!(
            self.descriptor().last_allocation,
            memory.get(),
            "only the last movable allocation can be rolled back"
        );
        let addr = self.get_address_from_movable_memory(memory);

        let mut next = self.descriptor().pages_in_use;
        while let Some(mut page) = next {
            // Safety: our own page.
            let page = unsafe { page.as_mut() };
            if page.contains_allocated(addr) {
                page.current = addr;
                self.descriptor_mut().last_allocation = 0;
                return;
            }
            next = page.next;
        }
        panic!("movable memory {} is not on any page of this manager", memory);
    }

    /// Resolve a movable memory offset, through the page id mapping if this is a moved page
    /// manager.
    pub fn get_address_from_movable_memory(&self, memory: MovableMemory) -> Address {
        let geometry = self.allocator.geometry();
        let mut offset = memory.get() as usize;
        assert!(offset >= geometry.page_size());
        assert!(offset < self.allocator.total_memory());

        if let Some(mapping_page) = self.descriptor().moved_page_id_mapping_page {
            // Safety: the mapping page holds one u32 slot per allocator page.
            let mapping = unsafe { mapping_page.as_ref() }.start.to_ptr::<u32>();
            let page_id = offset >> geometry.page_shift;
            let page_offset = offset & (geometry.page_size() - 1);
            let mapped = unsafe { *mapping.add(page_id) };
            assert!(mapped != 0, "page {} was never moved in", page_id);
            offset = ((mapped as usize) << geometry.page_shift) | page_offset;
        }
        self.allocator.base() + offset
    }

    /// Give a moved page manager a new page that stands in for the `order` pages starting at
    /// `moved_page_id`, with `page_usage` bytes already in use. Returns the page start, where
    /// the caller copies the page contents to.
    pub fn alloc_moved_page(&mut self, moved_page_id: u32, page_usage: u32) -> Option<Address> {
        let capacity = self.allocator.max_number_of_pages();
        let Some(mapping_page) = self.descriptor().moved_page_id_mapping_page else {
            panic!("alloc_moved_page needs a moved page manager");
        };
        assert!(moved_page_id != 0);
        assert!(moved_page_id < capacity);
        // Safety: the mapping page holds one u32 slot per allocator page.
        let mapping = unsafe { mapping_page.as_ref() }.start.to_mut_ptr::<u32>();
        assert_eq!(
            unsafe { *mapping.add(moved_page_id as usize) },
            0,
            "page {} was already moved in",
            moved_page_id
        );

        let mut page = self.get_new_page(page_usage as usize)?;
        let geometry = *self.allocator.geometry();
        // Safety: our own, fresh page.
        let page = unsafe { page.as_mut() };
        let local_page_id = page.id(&geometry);
        let order = page.order(&geometry);
        assert!(moved_page_id + order <= capacity);
        for i in 0..order {
            // Safety: bounds checked above.
            unsafe { *mapping.add((moved_page_id + i) as usize) = local_page_id + i };
        }
        page.set_usage(page_usage as usize);
        Some(page.start)
    }

    /// Pages that hold at least one allocation.
    pub fn number_of_used_pages(&self) -> u32 {
        self.pages().filter(|p| p.usage() > 0).count() as u32
    }

    /// Id, usage and start of every page that holds at least one allocation, newest first.
    pub fn page_infos(&self) -> Vec<PageInfo> {
        let geometry = self.allocator.geometry();
        self.pages()
            .filter(|p| p.usage() > 0)
            .map(|p| PageInfo {
                page_id: p.id(geometry),
                usage: p.usage() as u32,
                start: p.start,
            })
            .collect()
    }

    pub fn stats(&self) -> PageManagerStats {
        let geometry = self.allocator.geometry();
        let mut stats = PageManagerStats::default();
        let mut update = |page: &Page| {
            let pages = geometry.order(page.length()) as usize;
            stats.pages_allocated += pages;
            stats.memory_allocated += page.length();
            stats.memory_used += page.usage();
            stats.memory_available += page.avail();
            stats.memory_alignment_loss += page.alignment_loss;
            if page.usage() > 0 {
                stats.pages_used += pages;
            }
        };
        self.pages().for_each(&mut update);
        if let Some(mapping_page) = self.descriptor().moved_page_id_mapping_page {
            // Safety: the mapping page is ours.
            update(unsafe { mapping_page.as_ref() });
        }
        stats
    }
}

impl<G: AllocatorGuard> Drop for PageManager<G> {
    fn drop(&mut self) {
        let descriptor = *self.descriptor();
        // Safety: everything below belongs to this manager, which is going away.
        unsafe {
            self.allocator.put_pages(descriptor.pages_in_use);
            if let Some(mapping_page) = descriptor.moved_page_id_mapping_page {
                self.allocator.put_page(mapping_page);
            }
            self.allocator.free_union_object(self.descriptor);
        }
    }
}

impl<G: AllocatorGuard> fmt::Debug for PageManager<G> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PageManager")
            .field("descriptor", &self.descriptor)
            .field("moved", &self.is_moved())
            .field("pages", &self.pages().count())
            .finish()
    }
}

impl<G: AllocatorGuard> Allocator<G> {
    /// Create a [`PageManager`] on this allocator.
    pub fn create_page_manager(self: &Arc<Self>) -> Option<PageManager<G>> {
        PageManager::new(self)
    }

    /// Create a moved [`PageManager`] on this allocator.
    pub fn create_moved_page_manager(self: &Arc<Self>) -> Option<PageManager<G>> {
        PageManager::new_moved(self)
    }
}
