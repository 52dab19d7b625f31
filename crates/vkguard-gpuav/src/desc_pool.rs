//! Descriptor pools for the debug output sets.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::PoolError;

/// Default capacity of one managed pool, in sets.
pub const DEFAULT_CHUNK_SIZE: u32 = 512;

/// Driver primitives the manager needs. Implemented over the device
/// dispatch table by the layer and by counting fakes in tests.
pub trait DescriptorBackend: Send + Sync {
    /// Create a pool with room for `max_sets` debug sets that allows
    /// freeing individual sets.
    fn create_pool(&self, max_sets: u32) -> Result<vk::DescriptorPool, vk::Result>;

    fn destroy_pool(&self, pool: vk::DescriptorPool);

    fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result>;

    fn free_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]);
}

#[derive(Debug)]
struct ManagedPool {
    pool: vk::DescriptorPool,
    capacity: u32,
    used: u32,
}

impl ManagedPool {
    fn free(&self) -> u32 {
        self.capacity - self.used
    }
}

/// Hands out debug descriptor sets from a growing list of fixed-size pools.
///
/// A single mutex guards all pools: pool churn is rare next to set traffic.
pub struct DescriptorSetManager {
    backend: Arc<dyn DescriptorBackend>,
    chunk_size: u32,
    pools: Mutex<Vec<ManagedPool>>,
}

impl DescriptorSetManager {
    pub fn new(backend: Arc<dyn DescriptorBackend>, chunk_size: u32) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Allocate `count` sets of `layout` from one pool.
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>), PoolError> {
        if count == 0 {
            return Err(PoolError::EmptyRequest);
        }
        let mut pools = self.pools.lock();

        let slot = match pools.iter().position(|p| p.free() >= count) {
            Some(slot) => slot,
            None => {
                let capacity = self.chunk_size.max(count);
                let pool = self
                    .backend
                    .create_pool(capacity)
                    .map_err(PoolError::CreatePool)?;
                debug!(?pool, capacity, "created debug descriptor pool");
                pools.push(ManagedPool {
                    pool,
                    capacity,
                    used: 0,
                });
                pools.len() - 1
            }
        };

        let managed = &mut pools[slot];
        match self.backend.allocate_sets(managed.pool, layout, count) {
            Ok(sets) => {
                managed.used += count;
                Ok((managed.pool, sets))
            }
            Err(result) => {
                if managed.used == 0 {
                    let empty = pools.remove(slot);
                    self.backend.destroy_pool(empty.pool);
                }
                Err(PoolError::AllocateSets(result))
            }
        }
    }

    /// Return sets to their pool; an emptied pool is destroyed right away.
    pub fn release(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> Result<(), PoolError> {
        let mut pools = self.pools.lock();
        let slot = pools
            .iter()
            .position(|p| p.pool == pool)
            .ok_or(PoolError::UnknownPool(pool))?;

        self.backend.free_sets(pool, sets);
        let managed = &mut pools[slot];
        let count = sets.len() as u32;
        if count > managed.used {
            warn!(?pool, count, used = managed.used, "releasing more sets than allocated");
        }
        managed.used = managed.used.saturating_sub(count);
        if managed.used == 0 {
            let empty = pools.remove(slot);
            self.backend.destroy_pool(empty.pool);
            debug!(?pool, "destroyed empty debug descriptor pool");
        }
        Ok(())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn sets_in_use(&self) -> u32 {
        self.pools.lock().iter().map(|p| p.used).sum()
    }

    /// Device teardown.
    pub fn destroy_all(&self) {
        for managed in self.pools.lock().drain(..) {
            self.backend.destroy_pool(managed.pool);
        }
    }
}
