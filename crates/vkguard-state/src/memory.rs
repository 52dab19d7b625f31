use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::base::{StateNode, StateObject, TypedHandle};

#[derive(Debug)]
pub struct DeviceMemoryState {
    pub handle: vk::DeviceMemory,
    pub allocation_size: u64,
    pub memory_type_index: u32,
    /// (offset, size) of the current mapping
    pub mapped: Mutex<Option<(u64, u64)>>,
    /// Resources currently bound, for leak and aliasing reports
    pub bind_count: AtomicU32,
    node: StateNode,
}

impl DeviceMemoryState {
    pub fn new(handle: vk::DeviceMemory, allocation_size: u64, memory_type_index: u32) -> Self {
        Self {
            handle,
            allocation_size,
            memory_type_index,
            mapped: Mutex::new(None),
            bind_count: AtomicU32::new(0),
            node: StateNode::new(),
        }
    }

    pub fn bound_resources(&self) -> u32 {
        self.bind_count.load(Ordering::Relaxed)
    }
}

impl StateObject for DeviceMemoryState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

/// Where a non-sparse resource's backing store comes from.
#[derive(Debug, Clone, Default)]
pub enum MemoryBinding {
    #[default]
    Unbound,
    Bound {
        memory: Arc<DeviceMemoryState>,
        offset: u64,
    },
    /// The memory was freed while the resource was still bound to it.
    MemoryFreed { memory: vk::DeviceMemory, offset: u64 },
}

impl MemoryBinding {
    pub fn is_unbound(&self) -> bool {
        matches!(self, MemoryBinding::Unbound)
    }

    pub fn memory(&self) -> Option<&Arc<DeviceMemoryState>> {
        match self {
            MemoryBinding::Bound { memory, .. } => Some(memory),
            _ => None,
        }
    }

    /// Same live allocation, same offset.
    pub fn same_range(&self, other: &MemoryBinding) -> bool {
        match (self, other) {
            (
                MemoryBinding::Bound { memory: a, offset: oa },
                MemoryBinding::Bound { memory: b, offset: ob },
            ) => Arc::ptr_eq(a, b) && oa == ob,
            _ => false,
        }
    }

    pub(crate) fn invalidate(&mut self, parent: TypedHandle) -> bool {
        let freed = match self {
            MemoryBinding::Bound { memory, offset } if memory.handle() == parent => {
                memory.bind_count.fetch_sub(1, Ordering::Relaxed);
                Some((memory.handle, *offset))
            }
            _ => None,
        };
        match freed {
            Some((memory, offset)) => {
                *self = MemoryBinding::MemoryFreed { memory, offset };
                true
            }
            None => false,
        }
    }

    pub(crate) fn release(&mut self) {
        if let MemoryBinding::Bound { memory, .. } = self {
            memory.bind_count.fetch_sub(1, Ordering::Relaxed);
        }
        *self = MemoryBinding::Unbound;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub flags: vk::BufferCreateFlags,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

impl BufferDesc {
    pub fn from_create_info(ci: &vk::BufferCreateInfo<'_>) -> Self {
        Self {
            flags: ci.flags,
            size: ci.size,
            usage: ci.usage,
            sharing_mode: ci.sharing_mode,
        }
    }
}

#[derive(Debug)]
pub struct BufferState {
    pub handle: vk::Buffer,
    pub desc: BufferDesc,
    pub binding: RwLock<MemoryBinding>,
    node: StateNode,
}

impl BufferState {
    pub fn new(handle: vk::Buffer, desc: BufferDesc) -> Self {
        Self {
            handle,
            desc,
            binding: RwLock::new(MemoryBinding::Unbound),
            node: StateNode::new(),
        }
    }

    pub fn bind_memory(&self, memory: Arc<DeviceMemoryState>, offset: u64) {
        memory.bind_count.fetch_add(1, Ordering::Relaxed);
        let mut binding = self.binding.write();
        binding.release();
        *binding = MemoryBinding::Bound { memory, offset };
    }

    pub fn is_bound(&self) -> bool {
        !self.binding.read().is_unbound()
    }
}

impl StateObject for BufferState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        self.binding
            .read()
            .memory()
            .map(|m| m.clone() as Arc<dyn StateObject>)
            .into_iter()
            .collect()
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        self.binding.write().invalidate(parent);
    }

    fn release_parents(&self) {
        self.binding.write().release();
    }
}
