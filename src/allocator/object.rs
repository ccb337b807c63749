//! Union objects: the fixed-size records the allocator keeps its own metadata in.
//!
//! Every page descriptor, page manager descriptor and object manager descriptor occupies one
//! union object. Free union objects form a LIFO list threaded through their first word.

use std::ptr::NonNull;

use crate::allocator::page::Page;
use crate::util::conversions;

/// Descriptor of a page manager.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct PageManagerObject {
    pub pages_in_use: Option<NonNull<Page>>,
    /// Only set for moved page managers: the page holding the `u32` page id redirections.
    pub moved_page_id_mapping_page: Option<NonNull<Page>>,
    /// Offset of the last movable allocation, 0 if there is none to roll back.
    pub last_allocation: u32,
}

/// A free object of an object manager. The link lives in the object itself.
#[repr(C)]
pub(crate) struct FreeObject {
    pub next: Option<NonNull<FreeObject>>,
}

/// Descriptor of an object manager.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct ObjectManagerObject {
    pub pages_in_use: Option<NonNull<Page>>,
    pub free_objects: Option<NonNull<FreeObject>>,
    pub object_size: usize,
    pub objects_in_use: usize,
}

#[repr(C)]
pub(crate) union UnionObject {
    pub next: Option<NonNull<UnionObject>>,
    pub page: Page,
    pub page_manager: PageManagerObject,
    pub object_manager: ObjectManagerObject,
}

/// Size of one union object slot: the union rounded up to a power of two.
pub const UNION_SIZE: usize =
    conversions::next_power_of_two(std::mem::size_of::<UnionObject>() as u32) as usize;

pub const fn union_size() -> usize {
    UNION_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_size_is_a_power_of_two() {
        assert!(union_size().is_power_of_two());
        assert!(union_size() >= std::mem::size_of::<UnionObject>());
        // the smallest page that still holds 8 union objects is 512 bytes
        assert_eq!(union_size(), 64);
    }
}
