use std::fmt;
use std::ops::AddAssign;

/// Page and byte counters of one page manager, or of the allocator's maintenance pages.
///
/// Page counts are in units of the allocator page size: a page of order 3 counts three times.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageManagerStats {
    pub pages_allocated: usize,
    pub pages_used: usize,
    pub memory_allocated: usize,
    pub memory_used: usize,
    pub memory_available: usize,
    pub memory_alignment_loss: usize,
}

impl AddAssign for PageManagerStats {
    fn add_assign(&mut self, other: Self) {
        self.pages_allocated += other.pages_allocated;
        self.pages_used += other.pages_used;
        self.memory_allocated += other.memory_allocated;
        self.memory_used += other.memory_used;
        self.memory_available += other.memory_available;
        self.memory_alignment_loss += other.memory_alignment_loss;
    }
}

impl fmt::Display for PageManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "pages {}/{} (used/allocated), bytes {}/{} (used/allocated), {} available, {} lost to alignment",
            self.pages_used,
            self.pages_allocated,
            self.memory_used,
            self.memory_allocated,
            self.memory_available,
            self.memory_alignment_loss
        )
    }
}

/// Allocator-wide statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// `pages_allocated` is the high watermark of allocated pages, `pages_used` the number of
    /// pages allocated right now. Both include the maintenance pages.
    pub pages: PageManagerStats,
    /// The maintenance pages: header, page bitset and the union-object pool.
    pub maintenance: PageManagerStats,
}
