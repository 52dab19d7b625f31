use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::base::{as_parent, clear_if, link, StateNode, StateObject, TypedHandle};
use crate::pipeline::PipelineState;

#[derive(Debug)]
pub struct QueueState {
    pub handle: vk::Queue,
    pub family_index: u32,
    pub queue_index: u32,
    /// Number of `vkQueueSubmit` calls that reached the driver.
    pub submissions: AtomicU64,
    node: StateNode,
}

impl QueueState {
    pub fn new(handle: vk::Queue, family_index: u32, queue_index: u32) -> Self {
        Self {
            handle,
            family_index,
            queue_index,
            submissions: AtomicU64::new(0),
            node: StateNode::new(),
        }
    }
}

impl StateObject for QueueState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

#[derive(Debug)]
pub struct CommandPoolState {
    pub handle: vk::CommandPool,
    pub flags: vk::CommandPoolCreateFlags,
    pub queue_family_index: u32,
    node: StateNode,
}

impl CommandPoolState {
    pub fn new(handle: vk::CommandPool, flags: vk::CommandPoolCreateFlags, queue_family_index: u32) -> Self {
        Self {
            handle,
            flags,
            queue_family_index,
            node: StateNode::new(),
        }
    }

    pub fn can_reset_individual_buffers(&self) -> bool {
        self.flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }
}

impl StateObject for CommandPoolState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

/// Command buffer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Initial,
    Recording,
    Executable,
    Pending,
    /// A resource referenced by recorded commands was destroyed.
    Invalid,
}

#[derive(Debug)]
pub struct CommandBufferState {
    pub handle: vk::CommandBuffer,
    pub level: vk::CommandBufferLevel,
    pool: RwLock<Option<Arc<CommandPoolState>>>,
    state: Mutex<RecordState>,
    /// Objects referenced by the commands recorded since the last begin.
    referenced: Mutex<Vec<Arc<dyn StateObject>>>,
    pipelines: Mutex<Vec<Arc<PipelineState>>>,
    node: StateNode,
}

impl CommandBufferState {
    pub fn new(handle: vk::CommandBuffer, level: vk::CommandBufferLevel, pool: Option<Arc<CommandPoolState>>) -> Self {
        Self {
            handle,
            level,
            pool: RwLock::new(pool),
            state: Mutex::new(RecordState::Initial),
            referenced: Mutex::new(Vec::new()),
            pipelines: Mutex::new(Vec::new()),
            node: StateNode::new(),
        }
    }

    pub fn pool(&self) -> Option<Arc<CommandPoolState>> {
        self.pool.read().clone()
    }

    pub fn record_state(&self) -> RecordState {
        *self.state.lock()
    }

    /// `vkBeginCommandBuffer` implicitly resets the buffer.
    pub fn begin(&self) {
        self.unlink_referenced();
        *self.state.lock() = RecordState::Recording;
    }

    pub fn end(&self) {
        let mut state = self.state.lock();
        if *state == RecordState::Recording {
            *state = RecordState::Executable;
        }
    }

    pub fn reset(&self) {
        self.unlink_referenced();
        *self.state.lock() = RecordState::Initial;
    }

    pub fn submit(&self) {
        let mut state = self.state.lock();
        if *state == RecordState::Executable {
            *state = RecordState::Pending;
        }
    }

    /// Queue idle: pending work completed.
    pub fn retire(&self) {
        let mut state = self.state.lock();
        if *state == RecordState::Pending {
            *state = RecordState::Executable;
        }
    }

    /// Note that a recorded command refers to `obj`.
    pub fn reference<T: StateObject + 'static>(self: &Arc<Self>, obj: Arc<T>) {
        let handle = obj.handle();
        let mut referenced = self.referenced.lock();
        if referenced.iter().any(|o| o.handle() == handle) {
            return;
        }
        link(obj.as_ref(), self);
        referenced.push(obj);
    }

    pub fn bind_pipeline(self: &Arc<Self>, pipeline: Arc<PipelineState>) {
        self.reference(pipeline.clone());
        let mut pipelines = self.pipelines.lock();
        pipelines.retain(|p| p.bind_point != pipeline.bind_point);
        pipelines.push(pipeline);
    }

    pub fn bound_pipeline(&self, bind_point: vk::PipelineBindPoint) -> Option<Arc<PipelineState>> {
        self.pipelines
            .lock()
            .iter()
            .find(|p| p.bind_point == bind_point)
            .cloned()
    }

    pub fn referenced(&self) -> Vec<TypedHandle> {
        self.referenced.lock().iter().map(|o| o.handle()).collect()
    }

    fn unlink_referenced(&self) {
        let me = self.handle();
        let referenced = std::mem::take(&mut *self.referenced.lock());
        for obj in referenced {
            obj.node().remove_child(me);
        }
        self.pipelines.lock().clear();
    }
}

impl StateObject for CommandBufferState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        let mut parents: Vec<Arc<dyn StateObject>> = as_parent(&self.pool.read()).into_iter().collect();
        parents.extend(self.referenced.lock().iter().cloned());
        parents
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        if clear_if(&mut self.pool.write(), parent) {
            return;
        }
        let removed = {
            let mut referenced = self.referenced.lock();
            let before = referenced.len();
            referenced.retain(|o| o.handle() != parent);
            before != referenced.len()
        };
        if removed {
            self.pipelines.lock().retain(|p| p.handle() != parent);
            let mut state = self.state.lock();
            if matches!(*state, RecordState::Recording | RecordState::Executable) {
                *state = RecordState::Invalid;
            }
        }
    }

    fn release_parents(&self) {
        *self.pool.write() = None;
        self.referenced.lock().clear();
        self.pipelines.lock().clear();
    }
}
