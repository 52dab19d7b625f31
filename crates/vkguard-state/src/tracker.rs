//! Per-instance and per-device registries of tracked objects.
//!
//! Create calls insert state after the driver reported success; destroy and
//! free calls remove and tear down state before the call is forwarded.

use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use tracing::{debug, trace};
use vkguard_core::StateMap;

use crate::base::{destroy_object, link, StateObject, TypedHandle};
use crate::command::{CommandBufferState, CommandPoolState, QueueState};
use crate::descriptor::{DescriptorPoolState, DescriptorSetState};
use crate::image::{ImageDesc, ImageState, ImageViewDesc, ImageViewState, SwapchainSlot};
use crate::memory::{BufferDesc, BufferState, DeviceMemoryState};
use crate::pipeline::{
    DescriptorSetLayoutState, LayoutBinding, PipelineLayoutState, PipelineState, ShaderModuleState,
    ShaderObjectState, StageState,
};
use crate::swapchain::{SurfaceState, SwapchainDesc, SwapchainState};

/// Remove `raw` from `map` and run invalidation on it.
fn take_and_destroy<T: StateObject>(map: &StateMap<T>, raw: u64) -> Option<Arc<T>> {
    let state = map.remove(raw)?;
    destroy_object(state.as_ref());
    Some(state)
}

fn destroy_all_in<T: StateObject>(map: &StateMap<T>) -> Vec<TypedHandle> {
    map.drain_where(|_| true)
        .into_iter()
        .map(|(_, state)| {
            destroy_object(state.as_ref());
            state.handle()
        })
        .collect()
}

pub struct InstanceState {
    pub handle: vk::Instance,
    pub api_version: u32,
    physical_devices: Mutex<Vec<vk::PhysicalDevice>>,
    pub surfaces: StateMap<SurfaceState>,
}

impl InstanceState {
    pub fn new(handle: vk::Instance, api_version: u32) -> Self {
        Self {
            handle,
            api_version,
            physical_devices: Mutex::new(Vec::new()),
            surfaces: StateMap::new("VkSurfaceKHR"),
        }
    }

    pub fn record_physical_devices(&self, devices: &[vk::PhysicalDevice]) {
        let mut known = self.physical_devices.lock();
        for device in devices {
            if !known.contains(device) {
                known.push(*device);
            }
        }
    }

    pub fn physical_devices(&self) -> Vec<vk::PhysicalDevice> {
        self.physical_devices.lock().clone()
    }

    /// Surfaces come from platform-specific create calls; track them on
    /// first sight.
    pub fn surface_or_insert(&self, surface: vk::SurfaceKHR) -> Arc<SurfaceState> {
        if let Some(state) = self.surfaces.get(surface.as_raw()) {
            return state;
        }
        let state = Arc::new(SurfaceState::new(surface));
        self.surfaces.insert(surface.as_raw(), state.clone());
        state
    }

    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) -> Option<Arc<SurfaceState>> {
        take_and_destroy(&self.surfaces, surface.as_raw())
    }

    pub fn live_objects(&self) -> Vec<TypedHandle> {
        self.surfaces
            .snapshot()
            .into_iter()
            .map(|(_, s)| s.handle())
            .collect()
    }

    pub fn destroy_all(&self) -> Vec<TypedHandle> {
        destroy_all_in(&self.surfaces)
    }
}

pub struct DeviceState {
    pub handle: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    instance: Option<Arc<InstanceState>>,
    pub queues: StateMap<QueueState>,
    pub memories: StateMap<DeviceMemoryState>,
    pub buffers: StateMap<BufferState>,
    pub images: StateMap<ImageState>,
    pub image_views: StateMap<ImageViewState>,
    pub swapchains: StateMap<SwapchainState>,
    pub shader_modules: StateMap<ShaderModuleState>,
    pub set_layouts: StateMap<DescriptorSetLayoutState>,
    pub pipeline_layouts: StateMap<PipelineLayoutState>,
    pub pipelines: StateMap<PipelineState>,
    pub shader_objects: StateMap<ShaderObjectState>,
    pub descriptor_pools: StateMap<DescriptorPoolState>,
    pub descriptor_sets: StateMap<DescriptorSetState>,
    pub command_pools: StateMap<CommandPoolState>,
    pub command_buffers: StateMap<CommandBufferState>,
}

impl DeviceState {
    pub fn new(handle: vk::Device, physical_device: vk::PhysicalDevice, instance: Option<Arc<InstanceState>>) -> Self {
        Self {
            handle,
            physical_device,
            instance,
            queues: StateMap::new("VkQueue"),
            memories: StateMap::new("VkDeviceMemory"),
            buffers: StateMap::new("VkBuffer"),
            images: StateMap::new("VkImage"),
            image_views: StateMap::new("VkImageView"),
            swapchains: StateMap::new("VkSwapchainKHR"),
            shader_modules: StateMap::new("VkShaderModule"),
            set_layouts: StateMap::new("VkDescriptorSetLayout"),
            pipeline_layouts: StateMap::new("VkPipelineLayout"),
            pipelines: StateMap::new("VkPipeline"),
            shader_objects: StateMap::new("VkShaderEXT"),
            descriptor_pools: StateMap::new("VkDescriptorPool"),
            descriptor_sets: StateMap::new("VkDescriptorSet"),
            command_pools: StateMap::new("VkCommandPool"),
            command_buffers: StateMap::new("VkCommandBuffer"),
        }
    }

    // ── Queues ──────────────────────────────────────────────────────────

    pub fn add_queue(&self, queue: vk::Queue, family_index: u32, queue_index: u32) -> Arc<QueueState> {
        if let Some(state) = self.queues.get(queue.as_raw()) {
            return state;
        }
        let state = Arc::new(QueueState::new(queue, family_index, queue_index));
        self.queues.insert(queue.as_raw(), state.clone());
        state
    }

    // ── Memory, buffers, images ─────────────────────────────────────────

    pub fn add_memory(&self, memory: vk::DeviceMemory, size: u64, type_index: u32) -> Arc<DeviceMemoryState> {
        let state = Arc::new(DeviceMemoryState::new(memory, size, type_index));
        self.memories.insert(memory.as_raw(), state.clone());
        state
    }

    pub fn free_memory(&self, memory: vk::DeviceMemory) -> Option<Arc<DeviceMemoryState>> {
        take_and_destroy(&self.memories, memory.as_raw())
    }

    pub fn add_buffer(&self, buffer: vk::Buffer, desc: BufferDesc) -> Arc<BufferState> {
        let state = Arc::new(BufferState::new(buffer, desc));
        self.buffers.insert(buffer.as_raw(), state.clone());
        state
    }

    pub fn destroy_buffer(&self, buffer: vk::Buffer) -> Option<Arc<BufferState>> {
        take_and_destroy(&self.buffers, buffer.as_raw())
    }

    /// Returns false when either handle is unknown.
    pub fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> bool {
        let (Some(buffer), Some(memory)) = (self.buffers.get(buffer.as_raw()), self.memories.get(memory.as_raw()))
        else {
            return false;
        };
        link(memory.as_ref(), &buffer);
        buffer.bind_memory(memory, offset);
        true
    }

    pub fn add_image(&self, image: vk::Image, desc: ImageDesc) -> Arc<ImageState> {
        let state = Arc::new(ImageState::new(image, desc));
        self.images.insert(image.as_raw(), state.clone());
        state
    }

    pub fn destroy_image(&self, image: vk::Image) -> Option<Arc<ImageState>> {
        take_and_destroy(&self.images, image.as_raw())
    }

    pub fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: u64) -> bool {
        let (Some(image), Some(memory)) = (self.images.get(image.as_raw()), self.memories.get(memory.as_raw()))
        else {
            return false;
        };
        link(memory.as_ref(), &image);
        image.bind_memory(memory, offset);
        true
    }

    /// `VkBindImageMemorySwapchainInfoKHR`: the image shares the backing
    /// store of a swapchain slot.
    pub fn bind_image_swapchain(&self, image: vk::Image, swapchain: vk::SwapchainKHR, index: u32) -> bool {
        let (Some(image), Some(swapchain)) =
            (self.images.get(image.as_raw()), self.swapchains.get(swapchain.as_raw()))
        else {
            return false;
        };
        link(swapchain.as_ref(), &image);
        image.bind_swapchain(SwapchainSlot { swapchain, index });
        true
    }

    /// Every other live image sharing backing store with `image`.
    pub fn aliases_of(&self, image: vk::Image) -> Vec<Arc<ImageState>> {
        let Some(target) = self.images.get(image.as_raw()) else {
            return Vec::new();
        };
        self.images
            .snapshot()
            .into_iter()
            .map(|(_, other)| other)
            .filter(|other| target.aliases(other))
            .collect()
    }

    pub fn add_image_view(&self, view: vk::ImageView, desc: ImageViewDesc, image: vk::Image) -> Arc<ImageViewState> {
        let image = self.images.get(image.as_raw());
        let state = Arc::new(ImageViewState::new(view, desc, image.clone()));
        if let Some(image) = image {
            link(image.as_ref(), &state);
        }
        self.image_views.insert(view.as_raw(), state.clone());
        state
    }

    pub fn destroy_image_view(&self, view: vk::ImageView) -> Option<Arc<ImageViewState>> {
        take_and_destroy(&self.image_views, view.as_raw())
    }

    // ── Swapchains ──────────────────────────────────────────────────────

    pub fn add_swapchain(&self, swapchain: vk::SwapchainKHR, desc: SwapchainDesc) -> Arc<SwapchainState> {
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            if let Some(old) = self.swapchains.get(desc.old_swapchain.as_raw()) {
                old.retire();
            }
        }
        let surface = self
            .instance
            .as_ref()
            .map(|instance| instance.surface_or_insert(desc.surface));
        let state = Arc::new(SwapchainState::new(swapchain, desc, surface.clone()));
        if let Some(surface) = surface {
            link(surface.as_ref(), &state);
        }
        self.swapchains.insert(swapchain.as_raw(), state.clone());
        state
    }

    /// Track the images returned by `vkGetSwapchainImagesKHR`.
    pub fn register_swapchain_images(&self, swapchain: vk::SwapchainKHR, images: &[vk::Image]) -> Vec<Arc<ImageState>> {
        let Some(chain) = self.swapchains.get(swapchain.as_raw()) else {
            return Vec::new();
        };
        let desc = ImageDesc::for_swapchain(
            chain.desc.image_format,
            chain.desc.image_extent,
            chain.desc.image_array_layers,
            chain.desc.image_usage,
        );
        let mut added = Vec::new();
        for (index, image) in chain.set_images(images) {
            let slot = SwapchainSlot {
                swapchain: chain.clone(),
                index,
            };
            let state = Arc::new(ImageState::new_presentable(image, desc, slot));
            link(chain.as_ref(), &state);
            self.images.insert(image.as_raw(), state.clone());
            added.push(state);
        }
        trace!(swapchain = swapchain.as_raw(), count = added.len(), "registered swapchain images");
        added
    }

    /// Destroying a swapchain destroys the images it owns. Images still
    /// referenced elsewhere stay alive with an empty swapchain slot.
    pub fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) -> Option<Arc<SwapchainState>> {
        let chain = self.swapchains.remove(swapchain.as_raw())?;
        let owned: Vec<Arc<ImageState>> = chain
            .images()
            .into_iter()
            .filter_map(|image| {
                let state = self.images.get(image.as_raw())?;
                if state.owned_by_swapchain {
                    self.images.remove(image.as_raw())
                } else {
                    None
                }
            })
            .collect();
        destroy_object(chain.as_ref());
        for image in owned {
            destroy_object(image.as_ref());
        }
        Some(chain)
    }

    // ── Shaders and pipelines ───────────────────────────────────────────

    pub fn add_shader_module(
        &self,
        module: vk::ShaderModule,
        spirv: Arc<[u32]>,
        instrumented_id: Option<u32>,
    ) -> Arc<ShaderModuleState> {
        let state = Arc::new(ShaderModuleState::new(module, spirv, instrumented_id));
        self.shader_modules.insert(module.as_raw(), state.clone());
        state
    }

    pub fn destroy_shader_module(&self, module: vk::ShaderModule) -> Option<Arc<ShaderModuleState>> {
        take_and_destroy(&self.shader_modules, module.as_raw())
    }

    pub fn add_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
        flags: vk::DescriptorSetLayoutCreateFlags,
        bindings: Vec<LayoutBinding>,
    ) -> Arc<DescriptorSetLayoutState> {
        let state = Arc::new(DescriptorSetLayoutState::new(layout, flags, bindings));
        self.set_layouts.insert(layout.as_raw(), state.clone());
        state
    }

    pub fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) -> Option<Arc<DescriptorSetLayoutState>> {
        take_and_destroy(&self.set_layouts, layout.as_raw())
    }

    fn resolve_set_layouts(&self, layouts: &[vk::DescriptorSetLayout]) -> Vec<Option<Arc<DescriptorSetLayoutState>>> {
        layouts
            .iter()
            .map(|layout| self.set_layouts.get(layout.as_raw()))
            .collect()
    }

    pub fn add_pipeline_layout(
        &self,
        layout: vk::PipelineLayout,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_range_count: u32,
        instrumented: bool,
    ) -> Arc<PipelineLayoutState> {
        let state = Arc::new(PipelineLayoutState::new(
            layout,
            self.resolve_set_layouts(set_layouts),
            push_constant_range_count,
            instrumented,
        ));
        self.pipeline_layouts.insert(layout.as_raw(), state.clone());
        state
    }

    pub fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) -> Option<Arc<PipelineLayoutState>> {
        take_and_destroy(&self.pipeline_layouts, layout.as_raw())
    }

    /// Modules and layouts may be destroyed right after pipeline creation,
    /// so the pipeline holds them without registering as their child.
    pub fn add_pipeline(
        &self,
        pipeline: vk::Pipeline,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        stages: &[(vk::ShaderStageFlags, vk::ShaderModule, String)],
        instrumented: bool,
    ) -> Arc<PipelineState> {
        let stages = stages
            .iter()
            .map(|(stage, module, entry_point)| StageState {
                stage: *stage,
                module: self.shader_modules.get(module.as_raw()),
                entry_point: entry_point.clone(),
            })
            .collect();
        let state = Arc::new(PipelineState::new(
            pipeline,
            bind_point,
            self.pipeline_layouts.get(layout.as_raw()),
            stages,
            instrumented,
        ));
        self.pipelines.insert(pipeline.as_raw(), state.clone());
        state
    }

    pub fn destroy_pipeline(&self, pipeline: vk::Pipeline) -> Option<Arc<PipelineState>> {
        take_and_destroy(&self.pipelines, pipeline.as_raw())
    }

    pub fn add_shader_object(
        &self,
        shader: vk::ShaderEXT,
        stage: vk::ShaderStageFlags,
        set_layouts: &[vk::DescriptorSetLayout],
        instrumented_id: Option<u32>,
    ) -> Arc<ShaderObjectState> {
        let state = Arc::new(ShaderObjectState::new(
            shader,
            stage,
            self.resolve_set_layouts(set_layouts),
            instrumented_id,
        ));
        self.shader_objects.insert(shader.as_raw(), state.clone());
        state
    }

    pub fn destroy_shader_object(&self, shader: vk::ShaderEXT) -> Option<Arc<ShaderObjectState>> {
        take_and_destroy(&self.shader_objects, shader.as_raw())
    }

    // ── Descriptors ─────────────────────────────────────────────────────

    pub fn add_descriptor_pool(
        &self,
        pool: vk::DescriptorPool,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
    ) -> Arc<DescriptorPoolState> {
        let state = Arc::new(DescriptorPoolState::new(pool, flags, max_sets));
        self.descriptor_pools.insert(pool.as_raw(), state.clone());
        state
    }

    fn drain_pool_sets(&self, pool: vk::DescriptorPool) -> Vec<Arc<DescriptorSetState>> {
        let sets: Vec<Arc<DescriptorSetState>> = self
            .descriptor_sets
            .drain_where(|set| set.pool().is_some_and(|p| p.handle == pool))
            .into_iter()
            .map(|(_, set)| set)
            .collect();
        for set in &sets {
            destroy_object(set.as_ref());
        }
        sets
    }

    /// Destroys the pool and every set allocated from it.
    pub fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) -> Vec<Arc<DescriptorSetState>> {
        let sets = self.drain_pool_sets(pool);
        take_and_destroy(&self.descriptor_pools, pool.as_raw());
        sets
    }

    pub fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Vec<Arc<DescriptorSetState>> {
        let sets = self.drain_pool_sets(pool);
        if let Some(state) = self.descriptor_pools.get(pool.as_raw()) {
            state.on_reset();
        }
        sets
    }

    pub fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
        sets: &[vk::DescriptorSet],
    ) -> Vec<Arc<DescriptorSetState>> {
        let Some(pool_state) = self.descriptor_pools.get(pool.as_raw()) else {
            debug!(pool = pool.as_raw(), "descriptor sets allocated from untracked pool");
            return Vec::new();
        };
        let created: Vec<Arc<DescriptorSetState>> = sets
            .iter()
            .enumerate()
            .map(|(i, set)| {
                let layout = layouts
                    .get(i)
                    .and_then(|layout| self.set_layouts.get(layout.as_raw()));
                let state = Arc::new(DescriptorSetState::new(*set, pool_state.clone(), layout));
                link(pool_state.as_ref(), &state);
                self.descriptor_sets.insert(set.as_raw(), state.clone());
                state
            })
            .collect();
        pool_state.on_allocate(created.len() as u32);
        created
    }

    pub fn free_descriptor_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> usize {
        let freed = sets
            .iter()
            .filter(|set| **set != vk::DescriptorSet::null())
            .filter_map(|set| take_and_destroy(&self.descriptor_sets, set.as_raw()))
            .count();
        if let Some(state) = self.descriptor_pools.get(pool.as_raw()) {
            state.on_free(freed as u32);
        }
        freed
    }

    // ── Command pools and buffers ───────────────────────────────────────

    pub fn add_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolCreateFlags,
        queue_family_index: u32,
    ) -> Arc<CommandPoolState> {
        let state = Arc::new(CommandPoolState::new(pool, flags, queue_family_index));
        self.command_pools.insert(pool.as_raw(), state.clone());
        state
    }

    fn pool_buffers(&self, pool: vk::CommandPool) -> Vec<Arc<CommandBufferState>> {
        self.command_buffers
            .snapshot()
            .into_iter()
            .map(|(_, cb)| cb)
            .filter(|cb| cb.pool().is_some_and(|p| p.handle == pool))
            .collect()
    }

    /// Destroys the pool and frees every command buffer allocated from it.
    pub fn destroy_command_pool(&self, pool: vk::CommandPool) -> Vec<Arc<CommandBufferState>> {
        let buffers = self.pool_buffers(pool);
        for cb in &buffers {
            take_and_destroy(&self.command_buffers, cb.handle.as_raw());
        }
        take_and_destroy(&self.command_pools, pool.as_raw());
        buffers
    }

    pub fn reset_command_pool(&self, pool: vk::CommandPool) -> Vec<Arc<CommandBufferState>> {
        let buffers = self.pool_buffers(pool);
        for cb in &buffers {
            cb.reset();
        }
        buffers
    }

    pub fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        buffers: &[vk::CommandBuffer],
    ) -> Vec<Arc<CommandBufferState>> {
        let pool_state = self.command_pools.get(pool.as_raw());
        buffers
            .iter()
            .map(|cb| {
                let state = Arc::new(CommandBufferState::new(*cb, level, pool_state.clone()));
                if let Some(pool_state) = &pool_state {
                    link(pool_state.as_ref(), &state);
                }
                self.command_buffers.insert(cb.as_raw(), state.clone());
                state
            })
            .collect()
    }

    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) -> Vec<Arc<CommandBufferState>> {
        buffers
            .iter()
            .filter(|cb| **cb != vk::CommandBuffer::null())
            .filter_map(|cb| take_and_destroy(&self.command_buffers, cb.as_raw()))
            .collect()
    }

    // ── Whole-device queries ────────────────────────────────────────────

    /// Application-owned objects still alive. Queues and swapchain images
    /// are owned by the device and swapchain respectively.
    pub fn live_objects(&self) -> Vec<TypedHandle> {
        fn handles<T: StateObject>(map: &StateMap<T>, out: &mut Vec<TypedHandle>) {
            out.extend(map.snapshot().into_iter().map(|(_, s)| s.handle()));
        }
        let mut out = Vec::new();
        handles(&self.command_buffers, &mut out);
        handles(&self.command_pools, &mut out);
        handles(&self.descriptor_sets, &mut out);
        handles(&self.descriptor_pools, &mut out);
        handles(&self.pipelines, &mut out);
        handles(&self.shader_objects, &mut out);
        handles(&self.pipeline_layouts, &mut out);
        handles(&self.set_layouts, &mut out);
        handles(&self.shader_modules, &mut out);
        handles(&self.swapchains, &mut out);
        handles(&self.image_views, &mut out);
        out.extend(
            self.images
                .snapshot()
                .into_iter()
                .filter(|(_, image)| !image.owned_by_swapchain)
                .map(|(_, image)| image.handle()),
        );
        handles(&self.buffers, &mut out);
        handles(&self.memories, &mut out);
        out
    }

    /// Device teardown: destroy every node, dependents first.
    pub fn destroy_all(&self) -> Vec<TypedHandle> {
        let mut destroyed = Vec::new();
        destroyed.extend(destroy_all_in(&self.command_buffers));
        destroyed.extend(destroy_all_in(&self.command_pools));
        destroyed.extend(destroy_all_in(&self.descriptor_sets));
        destroyed.extend(destroy_all_in(&self.descriptor_pools));
        destroyed.extend(destroy_all_in(&self.pipelines));
        destroyed.extend(destroy_all_in(&self.shader_objects));
        destroyed.extend(destroy_all_in(&self.pipeline_layouts));
        destroyed.extend(destroy_all_in(&self.set_layouts));
        destroyed.extend(destroy_all_in(&self.shader_modules));
        destroyed.extend(destroy_all_in(&self.image_views));
        destroyed.extend(destroy_all_in(&self.swapchains));
        destroyed.extend(destroy_all_in(&self.images));
        destroyed.extend(destroy_all_in(&self.buffers));
        destroyed.extend(destroy_all_in(&self.memories));
        destroyed.extend(destroy_all_in(&self.queues));
        debug!(count = destroyed.len(), "device state torn down");
        destroyed
    }
}
