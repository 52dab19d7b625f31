use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use crate::base::{as_parent, clear_if, StateNode, StateObject, TypedHandle};
use crate::pipeline::DescriptorSetLayoutState;

#[derive(Debug)]
pub struct DescriptorPoolState {
    pub handle: vk::DescriptorPool,
    pub flags: vk::DescriptorPoolCreateFlags,
    pub max_sets: u32,
    allocated: AtomicU32,
    node: StateNode,
}

impl DescriptorPoolState {
    pub fn new(handle: vk::DescriptorPool, flags: vk::DescriptorPoolCreateFlags, max_sets: u32) -> Self {
        Self {
            handle,
            flags,
            max_sets,
            allocated: AtomicU32::new(0),
            node: StateNode::new(),
        }
    }

    pub fn allocated(&self) -> u32 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> u32 {
        self.max_sets.saturating_sub(self.allocated())
    }

    pub fn can_free_individual_sets(&self) -> bool {
        self.flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }

    pub(crate) fn on_allocate(&self, count: u32) {
        self.allocated.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn on_free(&self, count: u32) {
        let _ = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
    }

    pub(crate) fn on_reset(&self) {
        self.allocated.store(0, Ordering::Relaxed);
    }
}

impl StateObject for DescriptorPoolState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

#[derive(Debug)]
pub struct DescriptorSetState {
    pub handle: vk::DescriptorSet,
    pub layout: Option<Arc<DescriptorSetLayoutState>>,
    pool: RwLock<Option<Arc<DescriptorPoolState>>>,
    node: StateNode,
}

impl DescriptorSetState {
    pub fn new(
        handle: vk::DescriptorSet,
        pool: Arc<DescriptorPoolState>,
        layout: Option<Arc<DescriptorSetLayoutState>>,
    ) -> Self {
        Self {
            handle,
            layout,
            pool: RwLock::new(Some(pool)),
            node: StateNode::new(),
        }
    }

    pub fn pool(&self) -> Option<Arc<DescriptorPoolState>> {
        self.pool.read().clone()
    }
}

impl StateObject for DescriptorSetState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        as_parent(&self.pool.read()).into_iter().collect()
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        clear_if(&mut self.pool.write(), parent);
    }

    fn release_parents(&self) {
        *self.pool.write() = None;
    }
}
