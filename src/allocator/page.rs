//! Page descriptors.
//!
//! A page is a run of `order` consecutive allocator pages handed to one owner. Its
//! descriptor lives in a union object inside the maintenance pages, never in the page itself.

use std::ptr::NonNull;

use crate::util::Address;

/// Where a page lives in the arena, derived from `base` and the page shift.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Geometry {
    pub base: Address,
    pub page_shift: u32,
}

impl Geometry {
    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    pub fn page_address(&self, page_id: u32) -> Address {
        self.base + ((page_id as usize) << self.page_shift)
    }

    pub fn page_id(&self, addr: Address) -> u32 {
        ((addr - self.base) >> self.page_shift) as u32
    }

    /// Number of pages needed for `size` bytes, at least one.
    pub fn order(&self, size: usize) -> u32 {
        let pages = (size + self.page_size() - 1) >> self.page_shift;
        pages.max(1) as u32
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct Page {
    /// Next page of the owner's list. Shares its offset with the free-list link of the union
    /// object, so it is garbage once the page went back to the allocator.
    pub next: Option<NonNull<Page>>,
    pub start: Address,
    pub end: Address,
    /// Bump cursor.
    pub current: Address,
    /// Bytes skipped so far to satisfy alignment requests.
    pub alignment_loss: usize,
}

impl Page {
    pub fn new(geometry: &Geometry, page_id: u32, order: u32) -> Self {
        let start = geometry.page_address(page_id);
        Page {
            next: None,
            start,
            end: start + ((order as usize) << geometry.page_shift),
            current: start,
            alignment_loss: 0,
        }
    }

    pub fn id(&self, geometry: &Geometry) -> u32 {
        geometry.page_id(self.start)
    }

    pub fn order(&self, geometry: &Geometry) -> u32 {
        (self.length() >> geometry.page_shift) as u32
    }

    pub fn length(&self) -> usize {
        self.end - self.start
    }

    pub fn usage(&self) -> usize {
        self.current - self.start
    }

    pub fn avail(&self) -> usize {
        self.end - self.current
    }

    pub fn set_usage(&mut self, usage: usize) {
        debug_assert!(usage <= self.length());
        self.current = self.start + usage;
    }

    /// Carve `size` bytes aligned to `align` off the page.
    pub fn grab(&mut self, size: usize, align: usize) -> Option<Address> {
        let start = self.current.align_up(align);
        if !start.fits_in(size, &(self.start..self.end)) {
            return None;
        }
        self.alignment_loss += start - self.current;
        self.current = start + size;
        Some(start)
    }

    /// Does `addr` point into the part of the page that has been handed out?
    pub fn contains_allocated(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.current
    }
}

/// Walk a page list. The caller must not release a page while the iterator still has to read
/// its `next` link.
pub(crate) fn pages(head: Option<NonNull<Page>>) -> impl Iterator<Item = NonNull<Page>> {
    // Safety: every page on an owner's list is a live descriptor.
    std::iter::successors(head, |page| unsafe { page.as_ref().next })
}
