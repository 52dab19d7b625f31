use std::sync::atomic::Ordering;
use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use crate::base::{as_parent, clear_if, StateNode, StateObject, TypedHandle};
use crate::memory::{DeviceMemoryState, MemoryBinding};
use crate::swapchain::SwapchainState;

/// Immutable creation parameters of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub initial_layout: vk::ImageLayout,
}

impl ImageDesc {
    pub fn from_create_info(ci: &vk::ImageCreateInfo<'_>) -> Self {
        Self {
            flags: ci.flags,
            image_type: ci.image_type,
            format: ci.format,
            extent: ci.extent,
            mip_levels: ci.mip_levels,
            array_layers: ci.array_layers,
            samples: ci.samples,
            tiling: ci.tiling,
            usage: ci.usage,
            sharing_mode: ci.sharing_mode,
            initial_layout: ci.initial_layout,
        }
    }

    /// Parameters of the images a swapchain hands out.
    pub fn for_swapchain(format: vk::Format, extent: vk::Extent2D, layers: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: layers,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

/// Presentable image slot an image is tied to.
#[derive(Debug, Clone)]
pub struct SwapchainSlot {
    pub swapchain: Arc<SwapchainState>,
    pub index: u32,
}

#[derive(Debug)]
pub struct ImageState {
    pub handle: vk::Image,
    pub desc: ImageDesc,
    pub binding: RwLock<MemoryBinding>,
    pub swapchain: RwLock<Option<SwapchainSlot>>,
    /// Image was handed out by the swapchain itself rather than created by
    /// the application.
    pub owned_by_swapchain: bool,
    node: StateNode,
}

impl ImageState {
    pub fn new(handle: vk::Image, desc: ImageDesc) -> Self {
        Self {
            handle,
            desc,
            binding: RwLock::new(MemoryBinding::Unbound),
            swapchain: RwLock::new(None),
            owned_by_swapchain: false,
            node: StateNode::new(),
        }
    }

    pub fn new_presentable(handle: vk::Image, desc: ImageDesc, slot: SwapchainSlot) -> Self {
        Self {
            handle,
            desc,
            binding: RwLock::new(MemoryBinding::Unbound),
            swapchain: RwLock::new(Some(slot)),
            owned_by_swapchain: true,
            node: StateNode::new(),
        }
    }

    pub fn bind_memory(&self, memory: Arc<DeviceMemoryState>, offset: u64) {
        memory.bind_count.fetch_add(1, Ordering::Relaxed);
        let mut binding = self.binding.write();
        binding.release();
        *binding = MemoryBinding::Bound { memory, offset };
    }

    pub fn bind_swapchain(&self, slot: SwapchainSlot) {
        *self.swapchain.write() = Some(slot);
    }

    pub fn is_bound(&self) -> bool {
        !self.binding.read().is_unbound() || self.swapchain.read().is_some()
    }

    /// Whether `self` and `other` share backing store. Computed on demand
    /// from the current bindings.
    pub fn aliases(&self, other: &ImageState) -> bool {
        if self.handle == other.handle {
            return false;
        }
        // Snapshot one lock at a time; never hold both objects' locks.
        let mine = self.swapchain.read().clone();
        let theirs = other.swapchain.read().clone();
        if let (Some(a), Some(b)) = (mine, theirs) {
            if Arc::ptr_eq(&a.swapchain, &b.swapchain) && a.index == b.index {
                return true;
            }
        }
        if self.desc != other.desc {
            return false;
        }
        let mine = self.binding.read().clone();
        let theirs = other.binding.read().clone();
        mine.same_range(&theirs)
    }
}

impl StateObject for ImageState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        let mut parents = Vec::new();
        if let Some(memory) = self.binding.read().memory() {
            parents.push(memory.clone() as Arc<dyn StateObject>);
        }
        if let Some(slot) = &*self.swapchain.read() {
            parents.push(slot.swapchain.clone() as Arc<dyn StateObject>);
        }
        parents
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        if self.binding.write().invalidate(parent) {
            return;
        }
        let mut swapchain = self.swapchain.write();
        if swapchain
            .as_ref()
            .is_some_and(|slot| slot.swapchain.handle() == parent)
        {
            *swapchain = None;
        }
    }

    fn release_parents(&self) {
        self.binding.write().release();
        *self.swapchain.write() = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub subresource_range: vk::ImageSubresourceRange,
}

// `vk::ImageSubresourceRange` has no `PartialEq`.
impl PartialEq for ImageViewDesc {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.subresource_range, &other.subresource_range);
        self.view_type == other.view_type
            && self.format == other.format
            && a.aspect_mask == b.aspect_mask
            && a.base_mip_level == b.base_mip_level
            && a.level_count == b.level_count
            && a.base_array_layer == b.base_array_layer
            && a.layer_count == b.layer_count
    }
}

impl Eq for ImageViewDesc {}

impl ImageViewDesc {
    pub fn from_create_info(ci: &vk::ImageViewCreateInfo<'_>) -> Self {
        Self {
            view_type: ci.view_type,
            format: ci.format,
            subresource_range: ci.subresource_range,
        }
    }
}

#[derive(Debug)]
pub struct ImageViewState {
    pub handle: vk::ImageView,
    pub desc: ImageViewDesc,
    image: RwLock<Option<Arc<ImageState>>>,
    node: StateNode,
}

impl ImageViewState {
    pub fn new(handle: vk::ImageView, desc: ImageViewDesc, image: Option<Arc<ImageState>>) -> Self {
        Self {
            handle,
            desc,
            image: RwLock::new(image),
            node: StateNode::new(),
        }
    }

    /// The viewed image, or `None` once it was destroyed.
    pub fn image(&self) -> Option<Arc<ImageState>> {
        self.image.read().clone()
    }
}

impl StateObject for ImageViewState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        as_parent(&self.image.read()).into_iter().collect()
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        clear_if(&mut self.image.write(), parent);
    }

    fn release_parents(&self) {
        *self.image.write() = None;
    }
}
