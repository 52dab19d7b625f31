//! Integration test: debug descriptor pool manager
//!
//! Uses a counting backend to verify pool reuse, growth past the chunk
//! size, immediate destruction of emptied pools and failure cleanup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkguard_gpuav::{DescriptorBackend, DescriptorSetManager, PoolError};

#[derive(Default)]
struct CountingBackend {
    next: AtomicU64,
    created: Mutex<Vec<(vk::DescriptorPool, u32)>>,
    destroyed: Mutex<Vec<vk::DescriptorPool>>,
    freed: AtomicU64,
    fail_allocations: bool,
}

impl CountingBackend {
    fn handle(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 0x1000
    }
}

impl DescriptorBackend for CountingBackend {
    fn create_pool(&self, max_sets: u32) -> Result<vk::DescriptorPool, vk::Result> {
        let pool = vk::DescriptorPool::from_raw(self.handle());
        self.created.lock().push((pool, max_sets));
        Ok(pool)
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.destroyed.lock().push(pool);
    }

    fn allocate_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        if self.fail_allocations {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        Ok((0..count)
            .map(|_| vk::DescriptorSet::from_raw(self.handle()))
            .collect())
    }

    fn free_sets(&self, _pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) {
        self.freed.fetch_add(sets.len() as u64, Ordering::Relaxed);
    }
}

fn make_manager(chunk: u32) -> (DescriptorSetManager, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());
    (DescriptorSetManager::new(backend.clone(), chunk), backend)
}

fn layout() -> vk::DescriptorSetLayout {
    vk::DescriptorSetLayout::from_raw(0xabc)
}

#[test]
fn test_two_requests_share_one_pool() {
    let (manager, backend) = make_manager(8);

    let (pool_a, sets_a) = match manager.allocate(layout(), 4) {
        Ok(r) => r,
        Err(e) => panic!("allocation failed: {e}"),
    };
    let (pool_b, sets_b) = match manager.allocate(layout(), 4) {
        Ok(r) => r,
        Err(e) => panic!("allocation failed: {e}"),
    };

    assert_eq!(pool_a, pool_b);
    assert_eq!(sets_a.len() + sets_b.len(), 8);
    assert_eq!(backend.created.lock().len(), 1);
    assert_eq!(manager.sets_in_use(), 8);

    // Full pool: the next request needs a second one.
    let (pool_c, _) = match manager.allocate(layout(), 1) {
        Ok(r) => r,
        Err(e) => panic!("allocation failed: {e}"),
    };
    assert_ne!(pool_c, pool_a);
    assert_eq!(manager.pool_count(), 2);
}

#[test]
fn test_emptied_pool_is_destroyed_before_next_request() {
    let (manager, backend) = make_manager(16);

    let (pool, sets) = match manager.allocate(layout(), 3) {
        Ok(r) => r,
        Err(e) => panic!("allocation failed: {e}"),
    };
    let (first, rest) = sets.split_at(1);

    assert!(manager.release(pool, first).is_ok());
    assert_eq!(manager.pool_count(), 1, "pool still has live sets");

    assert!(manager.release(pool, rest).is_ok());
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(*backend.destroyed.lock(), vec![pool]);
    assert_eq!(backend.freed.load(Ordering::Relaxed), 3);

    let (next, _) = match manager.allocate(layout(), 1) {
        Ok(r) => r,
        Err(e) => panic!("allocation failed: {e}"),
    };
    assert_ne!(next, pool);
    assert_eq!(backend.created.lock().len(), 2);
}

#[test]
fn test_large_request_sizes_pool_to_fit() {
    let (manager, backend) = make_manager(4);
    assert!(manager.allocate(layout(), 10).is_ok());
    let created = backend.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1, 10);
}

#[test]
fn test_release_to_unknown_pool() {
    let (manager, _backend) = make_manager(4);
    match manager.release(vk::DescriptorPool::from_raw(0xdead), &[]) {
        Err(PoolError::UnknownPool(pool)) => assert_eq!(pool.as_raw(), 0xdead),
        other => panic!("expected UnknownPool, got {:?}", other),
    }
}

#[test]
fn test_failed_allocation_does_not_leak_pool() {
    let backend = Arc::new(CountingBackend {
        fail_allocations: true,
        ..CountingBackend::default()
    });
    let manager = DescriptorSetManager::new(backend.clone(), 4);

    match manager.allocate(layout(), 2) {
        Err(PoolError::AllocateSets(vk::Result::ERROR_OUT_OF_POOL_MEMORY)) => {}
        other => panic!("expected AllocateSets, got {:?}", other),
    }
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(backend.created.lock().len(), backend.destroyed.lock().len());
}

#[test]
fn test_destroy_all_releases_every_pool() {
    let (manager, backend) = make_manager(2);
    for _ in 0..3 {
        assert!(manager.allocate(layout(), 2).is_ok());
    }
    assert_eq!(manager.pool_count(), 3);
    manager.destroy_all();
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(backend.destroyed.lock().len(), 3);
}
