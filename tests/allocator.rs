use rand::Rng;
use scorep_core::allocator::{Allocator, NullGuard, PageManager};
use scorep_core::util::constants::ALLOCATOR_ALIGNMENT;
use std::sync::Arc;

fn allocator(total: u32, page: u32) -> Option<Arc<Allocator>> {
    Allocator::new(total, page, NullGuard::new())
}

#[test]
fn creation_edge_cases() {
    assert!(allocator(1024, 2048).is_none());
    assert!(allocator(1024, 1024).is_none());
    assert!(allocator(0, 0).is_none());
    assert!(allocator(42, 0).is_none());
    assert!(allocator(1 << 20, 512).is_some());
    let a = allocator(1 << 20, 511).unwrap();
    assert_eq!(a.page_size(), 512);
}

#[test]
fn usable_memory_is_a_multiple_of_the_page_size() {
    for (total, page) in [(1 << 20, 4096), (100_000, 1000), (3 << 16, 8192), (65_537, 512)] {
        let a = allocator(total, page).unwrap();
        assert_eq!(a.total_memory() % a.page_size(), 0);
        assert!(a.total_memory() <= total as usize);
    }
}

#[test]
fn example_scenario() {
    let a = allocator(1 << 20, 4096).unwrap();
    assert_eq!(a.total_memory() % 4096, 0);
    assert!(a.total_memory() <= 1 << 20);

    let mut pm = a.create_page_manager().unwrap();
    let first = pm.alloc(100).unwrap();
    let second = pm.alloc(100).unwrap();
    assert_eq!(second - first, 128);
    assert_eq!(pm.number_of_used_pages(), 1);
    let page = pm.page_infos()[0];
    assert_eq!(page.page_id as usize, (first - a.base()) / 4096);

    let used = a.stats().pages.pages_used;
    assert!(pm.alloc(2 * a.total_memory()).is_none());
    assert_eq!(a.stats().pages.pages_used, used);
}

#[test]
fn random_allocations_do_not_overlap() {
    let a = allocator(1 << 24, 4096).unwrap();
    let mut pm = a.create_page_manager().unwrap();
    let mut rng = rand::rng();
    let mut blocks = vec![];
    for _ in 0..1000 {
        let size = rng.random_range(1..3000);
        let block = if rng.random_bool(0.2) {
            let alignment = ALLOCATOR_ALIGNMENT << rng.random_range(0..4);
            let block = pm.aligned_alloc(alignment, size).unwrap();
            assert!(block.is_aligned_to(alignment));
            block
        } else {
            pm.alloc(size).unwrap()
        };
        assert!(block.is_aligned_to(ALLOCATOR_ALIGNMENT));
        assert!(block >= a.base());
        assert!(block + size <= a.base() + a.total_memory());
        blocks.push((block, size));
    }
    blocks.sort();
    for pair in blocks.windows(2) {
        let ((start, size), (next, _)) = (pair[0], pair[1]);
        assert!(start + size <= next);
    }
}

#[test]
fn movable_and_plain_allocations_agree() {
    let a = allocator(1 << 20, 4096).unwrap();
    let mut plain = a.create_page_manager().unwrap();
    let mut movable = a.create_page_manager().unwrap();
    let address = plain.alloc(300).unwrap();
    let memory = movable.alloc_movable(300).unwrap();
    let resolved = movable.get_address_from_movable_memory(memory);
    // Same offset into each manager's first page.
    assert_eq!(
        (address - a.base()) % a.page_size(),
        (resolved - a.base()) % a.page_size()
    );

    movable.rollback_alloc_movable(memory);
    let again = movable.alloc(300).unwrap();
    assert_eq!(again, resolved);
}

#[test]
fn exhaustion_and_recovery() {
    let a = allocator(64 * 1024, 1024).unwrap();
    let mut first = a.create_page_manager().unwrap();
    let mut second = a.create_page_manager().unwrap();
    while first.alloc(1000).is_some() {}
    assert!(first.number_of_used_pages() > 0);
    // The second manager can only use the page it got on creation.
    while second.alloc(1000).is_some() {}
    assert!(second.alloc(1000).is_none());

    drop(first);
    assert!(second.alloc(1000).is_some());
    let stats = a.stats();
    assert_eq!(
        stats.pages.pages_used,
        stats.maintenance.pages_used + second.stats().pages_allocated
    );
}

#[test]
fn moved_page_manager_redirects() {
    let a = allocator(1 << 20, 4096).unwrap();
    let mut source = a.create_page_manager().unwrap();
    let memory = source.alloc_movable(64).unwrap();
    unsafe {
        source
            .get_address_from_movable_memory(memory)
            .store(0x1234_5678_u64)
    };
    let page = source.page_infos()[0];

    let mut moved: PageManager<NullGuard> = a.create_moved_page_manager().unwrap();
    let target = moved.alloc_moved_page(page.page_id, page.usage).unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping(
            page.start.to_ptr::<u8>(),
            target.to_mut_ptr::<u8>(),
            page.usage as usize,
        );
    }
    let resolved = moved.get_address_from_movable_memory(memory);
    assert_ne!(resolved, source.get_address_from_movable_memory(memory));
    assert_eq!(unsafe { resolved.load::<u64>() }, 0x1234_5678);
}

#[test]
fn object_managers_recycle() {
    let a = allocator(1 << 20, 4096).unwrap();
    let mut objects = a.create_object_manager(48).unwrap();
    let first = objects.get_object().unwrap();
    let second = objects.get_object().unwrap();
    assert_ne!(first, second);
    unsafe {
        objects.put_object(first);
        objects.put_object(second);
    }
    assert_eq!(objects.get_object(), Some(second));
    assert_eq!(objects.get_object(), Some(first));
}
