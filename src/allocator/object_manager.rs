use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocator::object::{FreeObject, ObjectManagerObject};
use crate::allocator::{Allocator, AllocatorGuard};
use crate::util::conversions;
use crate::util::Address;

/// A pool of equally sized objects carved out of allocator pages.
///
/// Returned objects are reused last-in first-out. Objects are never handed back to the
/// allocator individually; all pages go back when the manager is dropped.
pub struct ObjectManager<G: AllocatorGuard> {
    allocator: Arc<Allocator<G>>,
    descriptor: NonNull<ObjectManagerObject>,
}

unsafe impl<G: AllocatorGuard + Send + Sync> Send for ObjectManager<G> {}

impl<G: AllocatorGuard> ObjectManager<G> {
    /// Create a manager for objects of `object_size` bytes, rounded up to the allocator
    /// alignment.
    pub fn new(allocator: &Arc<Allocator<G>>, object_size: usize) -> Option<Self> {
        assert!(object_size > 0);
        let object_size = conversions::roundup_to_alignment(object_size);
        if object_size > allocator.total_memory() {
            return None;
        }
        let descriptor = allocator.alloc_union_object::<ObjectManagerObject>()?;
        // Safety: a fresh union object, ours to initialise.
        unsafe {
            descriptor.as_ptr().write(ObjectManagerObject {
                pages_in_use: None,
                free_objects: None,
                object_size,
                objects_in_use: 0,
            });
        }
        Some(ObjectManager {
            allocator: allocator.clone(),
            descriptor,
        })
    }

    fn descriptor(&self) -> &ObjectManagerObject {
        // Safety: the descriptor lives as long as the manager.
        unsafe { self.descriptor.as_ref() }
    }

    fn descriptor_mut(&mut self) -> &mut ObjectManagerObject {
        // Safety: as above, exclusive through `&mut self`.
        unsafe { self.descriptor.as_mut() }
    }

    pub fn object_size(&self) -> usize {
        self.descriptor().object_size
    }

    pub fn objects_in_use(&self) -> usize {
        self.descriptor().objects_in_use
    }

    /// Carve a new page into objects and put them on the free list.
    fn refill(&mut self) -> Option<()> {
        let object_size = self.object_size();
        let mut page = self.allocator.get_page(object_size)?;
        let descriptor = self.descriptor_mut();
        // Safety: a fresh page, now ours.
        let page = unsafe { page.as_mut() };
        page.next = descriptor.pages_in_use;
        descriptor.pages_in_use = Some(NonNull::from(&mut *page));

        // Push in reverse address order, so objects come out in ascending order.
        let count = page.length() / object_size;
        for i in (0..count).rev() {
            let object = page.start + i * object_size;
            // Safety: inside our page, aligned, and at least one word large.
            let mut object = unsafe { NonNull::new_unchecked(object.to_mut_ptr::<FreeObject>()) };
            unsafe { object.as_mut().next = descriptor.free_objects };
            descriptor.free_objects = Some(object);
        }
        page.set_usage(count * object_size);
        trace!("object manager {:?}: {} new objects", self.descriptor, count);
        Some(())
    }

    /// Take an object. Its contents are unspecified.
    pub fn get_object(&mut self) -> Option<Address> {
        if self.descriptor().free_objects.is_none() {
            self.refill()?;
        }
        let descriptor = self.descriptor_mut();
        let object = descriptor.free_objects?;
        // Safety: free objects are ours and hold the link.
        descriptor.free_objects = unsafe { object.as_ref().next };
        descriptor.objects_in_use += 1;
        Some(Address::from_mut_ptr(object.as_ptr()))
    }

    /// Give an object back.
    ///
    /// # Safety
    /// `object` must have come from [`ObjectManager::get_object`] of this manager and must not
    /// be used afterwards.
    pub unsafe fn put_object(&mut self, object: Address) {
        let descriptor = self.descriptor_mut();
        debug_assert!(descriptor.objects_in_use > 0);
        let mut object = NonNull::new_unchecked(object.to_mut_ptr::<FreeObject>());
        object.as_mut().next = descriptor.free_objects;
        descriptor.free_objects = Some(object);
        descriptor.objects_in_use -= 1;
    }
}

impl<G: AllocatorGuard> Drop for ObjectManager<G> {
    fn drop(&mut self) {
        let pages = self.descriptor().pages_in_use;
        // Safety: the pages and the descriptor belong to this manager, which is going away.
        unsafe {
            self.allocator.put_pages(pages);
            self.allocator.free_union_object(self.descriptor);
        }
    }
}

impl<G: AllocatorGuard> fmt::Debug for ObjectManager<G> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectManager")
            .field("object_size", &self.object_size())
            .field("objects_in_use", &self.objects_in_use())
            .finish()
    }
}

impl<G: AllocatorGuard> Allocator<G> {
    /// Create an [`ObjectManager`] for objects of `object_size` bytes.
    pub fn create_object_manager(self: &Arc<Self>, object_size: usize) -> Option<ObjectManager<G>> {
        ObjectManager::new(self, object_size)
    }
}
