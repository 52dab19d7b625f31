use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::base::{as_parent, clear_if, StateNode, StateObject, TypedHandle};

#[derive(Debug)]
pub struct SurfaceState {
    pub handle: vk::SurfaceKHR,
    node: StateNode,
}

impl SurfaceState {
    pub fn new(handle: vk::SurfaceKHR) -> Self {
        Self {
            handle,
            node: StateNode::new(),
        }
    }
}

impl StateObject for SurfaceState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub image_format: vk::Format,
    pub image_extent: vk::Extent2D,
    pub image_array_layers: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

impl SwapchainDesc {
    pub fn from_create_info(ci: &vk::SwapchainCreateInfoKHR<'_>) -> Self {
        Self {
            surface: ci.surface,
            min_image_count: ci.min_image_count,
            image_format: ci.image_format,
            image_extent: ci.image_extent,
            image_array_layers: ci.image_array_layers,
            image_usage: ci.image_usage,
            present_mode: ci.present_mode,
            old_swapchain: ci.old_swapchain,
        }
    }
}

#[derive(Debug)]
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub desc: SwapchainDesc,
    surface: RwLock<Option<Arc<SurfaceState>>>,
    /// Images handed out by the driver, in slot order. Raw values only; the
    /// images point back at the swapchain, not the other way around.
    images: Mutex<Vec<vk::Image>>,
    acquired: Mutex<Vec<bool>>,
    /// Set when this swapchain was passed as `oldSwapchain`.
    retired: AtomicBool,
    node: StateNode,
}

impl SwapchainState {
    pub fn new(handle: vk::SwapchainKHR, desc: SwapchainDesc, surface: Option<Arc<SurfaceState>>) -> Self {
        Self {
            handle,
            desc,
            surface: RwLock::new(surface),
            images: Mutex::new(Vec::new()),
            acquired: Mutex::new(Vec::new()),
            retired: AtomicBool::new(false),
            node: StateNode::new(),
        }
    }

    pub fn surface(&self) -> Option<Arc<SurfaceState>> {
        self.surface.read().clone()
    }

    /// Record the driver's image list; returns the slots that are new.
    pub fn set_images(&self, images: &[vk::Image]) -> Vec<(u32, vk::Image)> {
        let mut known = self.images.lock();
        let mut added = Vec::new();
        for (i, image) in images.iter().enumerate() {
            if known.get(i) != Some(image) {
                added.push((i as u32, *image));
            }
        }
        *known = images.to_vec();
        self.acquired.lock().resize(images.len(), false);
        added
    }

    pub fn images(&self) -> Vec<vk::Image> {
        self.images.lock().clone()
    }

    pub fn image_count(&self) -> u32 {
        self.images.lock().len() as u32
    }

    pub fn acquire(&self, index: u32) {
        let mut acquired = self.acquired.lock();
        if let Some(slot) = acquired.get_mut(index as usize) {
            *slot = true;
        }
    }

    pub fn is_acquired(&self, index: u32) -> bool {
        self.acquired
            .lock()
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn acquired_count(&self) -> u32 {
        self.acquired.lock().iter().filter(|a| **a).count() as u32
    }

    pub fn present(&self, index: u32) {
        if let Some(slot) = self.acquired.lock().get_mut(index as usize) {
            *slot = false;
        }
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl StateObject for SwapchainState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }

    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        as_parent(&self.surface.read()).into_iter().collect()
    }

    fn notify_invalidate(&self, parent: TypedHandle) {
        clear_if(&mut self.surface.write(), parent);
    }

    fn release_parents(&self) {
        *self.surface.write() = None;
    }
}
