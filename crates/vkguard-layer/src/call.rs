//! Owned snapshots of intercepted calls.
//!
//! Entry points copy the caller's arguments into a [`Call`] before the
//! chain runs. Record-before units edit this copy, never the caller's
//! structures, and the dispatch closure rebuilds whatever it forwards from
//! it. Output handles are written back into the snapshot by the dispatch
//! closure so record-after units can see them.

use std::sync::Arc;

use ash::vk;
use vkguard_state::image::{ImageDesc, ImageViewDesc};
use vkguard_state::memory::BufferDesc;
use vkguard_state::pipeline::LayoutBinding;
use vkguard_state::swapchain::SwapchainDesc;

#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
    /// Module the driver receives instead of `module`.
    pub module_override: Option<vk::ShaderModule>,
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub layout: vk::PipelineLayout,
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stage: vk::ShaderStageFlags,
    /// SPIR-V words; `None` for binary shader code.
    pub spirv: Option<Arc<[u32]>>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub code_override: Option<Arc<[u32]>>,
    pub set_layouts_override: Option<Vec<vk::DescriptorSetLayout>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageBind {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    /// Set for `VkBindImageMemorySwapchainInfoKHR` binds.
    pub swapchain: Option<(vk::SwapchainKHR, u32)>,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Debug, Clone)]
pub enum Call {
    // ── Instance ────────────────────────────────────────────
    CreateInstance {
        api_version: u32,
        layers: Vec<String>,
        extensions: Vec<String>,
        instance: vk::Instance,
    },
    DestroyInstance {
        instance: vk::Instance,
        /// Devices the application never destroyed.
        live_devices: Vec<vk::Device>,
    },
    EnumeratePhysicalDevices {
        instance: vk::Instance,
        devices: Vec<vk::PhysicalDevice>,
    },
    GetPhysicalDeviceProperties {
        physical_device: vk::PhysicalDevice,
        properties: vk::PhysicalDeviceProperties,
    },
    CreateDevice {
        physical_device: vk::PhysicalDevice,
        /// `(family index, queue count)` per queue create info.
        queue_families: Vec<(u32, u32)>,
        extensions: Vec<String>,
        features: Option<vk::PhysicalDeviceFeatures>,
        /// What the physical device can enable.
        supported_features: vk::PhysicalDeviceFeatures,
        /// Features are passed through `VkPhysicalDeviceFeatures2` in the
        /// pNext chain and cannot be edited.
        features_in_chain: bool,
        device: vk::Device,
    },
    DestroySurface {
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
    },
    // ── Device and queues ───────────────────────────────────
    DestroyDevice {
        device: vk::Device,
    },
    GetDeviceQueue {
        family_index: u32,
        queue_index: u32,
        queue: vk::Queue,
    },
    QueueSubmit {
        queue: vk::Queue,
        batches: Vec<Vec<vk::CommandBuffer>>,
        fence: vk::Fence,
    },
    QueueWaitIdle {
        queue: vk::Queue,
    },
    DeviceWaitIdle {
        device: vk::Device,
    },
    // ── Memory ──────────────────────────────────────────────
    AllocateMemory {
        size: u64,
        type_index: u32,
        memory: vk::DeviceMemory,
    },
    FreeMemory {
        memory: vk::DeviceMemory,
    },
    MapMemory {
        memory: vk::DeviceMemory,
        offset: u64,
        size: u64,
    },
    UnmapMemory {
        memory: vk::DeviceMemory,
    },
    BindBufferMemory {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    },
    BindImageMemory {
        binds: Vec<ImageBind>,
    },
    // ── Buffers and images ──────────────────────────────────
    CreateBuffer {
        desc: BufferDesc,
        buffer: vk::Buffer,
    },
    DestroyBuffer {
        buffer: vk::Buffer,
    },
    CreateImage {
        desc: ImageDesc,
        image: vk::Image,
    },
    DestroyImage {
        image: vk::Image,
    },
    CreateImageView {
        image: vk::Image,
        desc: ImageViewDesc,
        view: vk::ImageView,
    },
    DestroyImageView {
        view: vk::ImageView,
    },
    // ── Swapchain ───────────────────────────────────────────
    CreateSwapchain {
        desc: SwapchainDesc,
        swapchain: vk::SwapchainKHR,
    },
    DestroySwapchain {
        swapchain: vk::SwapchainKHR,
    },
    GetSwapchainImages {
        swapchain: vk::SwapchainKHR,
        /// Empty for count-only queries.
        images: Vec<vk::Image>,
    },
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    QueuePresent {
        queue: vk::Queue,
        presents: Vec<(vk::SwapchainKHR, u32)>,
        /// Per-swapchain results, when the application asked for them.
        results: Vec<vk::Result>,
    },
    // ── Shaders and pipelines ───────────────────────────────
    CreateShaderModule {
        /// `codeSize` in bytes as passed by the application.
        code_size: usize,
        code: Arc<[u32]>,
        code_override: Option<Arc<[u32]>>,
        module: vk::ShaderModule,
    },
    DestroyShaderModule {
        module: vk::ShaderModule,
    },
    CreateSetLayout {
        flags: vk::DescriptorSetLayoutCreateFlags,
        bindings: Vec<LayoutBinding>,
        layout: vk::DescriptorSetLayout,
    },
    DestroySetLayout {
        layout: vk::DescriptorSetLayout,
    },
    CreatePipelineLayout {
        set_layouts: Vec<vk::DescriptorSetLayout>,
        /// Length of `set_layouts` as passed by the application.
        app_set_count: u32,
        push_constant_ranges: u32,
        layout: vk::PipelineLayout,
    },
    DestroyPipelineLayout {
        layout: vk::PipelineLayout,
    },
    CreatePipelines {
        bind_point: vk::PipelineBindPoint,
        pipelines: Vec<PipelineDesc>,
        created: Vec<vk::Pipeline>,
    },
    DestroyPipeline {
        pipeline: vk::Pipeline,
    },
    CreateShaders {
        shaders: Vec<ShaderDesc>,
        created: Vec<vk::ShaderEXT>,
    },
    DestroyShader {
        shader: vk::ShaderEXT,
    },
    // ── Descriptors ─────────────────────────────────────────
    CreateDescriptorPool {
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool: vk::DescriptorPool,
    },
    DestroyDescriptorPool {
        pool: vk::DescriptorPool,
    },
    ResetDescriptorPool {
        pool: vk::DescriptorPool,
    },
    AllocateDescriptorSets {
        pool: vk::DescriptorPool,
        layouts: Vec<vk::DescriptorSetLayout>,
        sets: Vec<vk::DescriptorSet>,
    },
    FreeDescriptorSets {
        pool: vk::DescriptorPool,
        sets: Vec<vk::DescriptorSet>,
    },
    // ── Command pools and buffers ───────────────────────────
    CreateCommandPool {
        flags: vk::CommandPoolCreateFlags,
        queue_family_index: u32,
        pool: vk::CommandPool,
    },
    DestroyCommandPool {
        pool: vk::CommandPool,
    },
    ResetCommandPool {
        pool: vk::CommandPool,
    },
    AllocateCommandBuffers {
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
        buffers: Vec<vk::CommandBuffer>,
    },
    FreeCommandBuffers {
        pool: vk::CommandPool,
        buffers: Vec<vk::CommandBuffer>,
    },
    BeginCommandBuffer {
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    ResetCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    // ── Recorded commands ───────────────────────────────────
    CmdBindPipeline {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    CmdBindDescriptorSets {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    CmdBindShaders {
        command_buffer: vk::CommandBuffer,
        stages: Vec<vk::ShaderStageFlags>,
        shaders: Vec<vk::ShaderEXT>,
    },
    CmdDraw {
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    },
    CmdDispatch {
        command_buffer: vk::CommandBuffer,
        group_count: [u32; 3],
    },
    CmdCopyBuffer {
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CmdFillBuffer {
        command_buffer: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: u64,
        size: u64,
    },
    CmdPipelineBarrier {
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: u32,
        buffer_barriers: Vec<BufferBarrier>,
    },
}

impl Call {
    /// The command buffer a recording call operates on.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        match self {
            Call::BeginCommandBuffer { command_buffer, .. }
            | Call::EndCommandBuffer { command_buffer }
            | Call::ResetCommandBuffer { command_buffer }
            | Call::CmdBindPipeline { command_buffer, .. }
            | Call::CmdBindDescriptorSets { command_buffer, .. }
            | Call::CmdBindShaders { command_buffer, .. }
            | Call::CmdDraw { command_buffer, .. }
            | Call::CmdDispatch { command_buffer, .. }
            | Call::CmdCopyBuffer { command_buffer, .. }
            | Call::CmdFillBuffer { command_buffer, .. }
            | Call::CmdPipelineBarrier { command_buffer, .. } => Some(*command_buffer),
            _ => None,
        }
    }

    /// True for `vkCmd*` calls.
    pub fn is_recorded_command(&self) -> bool {
        !matches!(
            self,
            Call::BeginCommandBuffer { .. } | Call::EndCommandBuffer { .. } | Call::ResetCommandBuffer { .. }
        ) && self.command_buffer().is_some()
    }
}

/// Per-call data handed from a unit's record-before to the same call's
/// record-after, without any shared state.
#[derive(Debug, Default)]
pub struct CallScratch {
    /// `CreateShaderModule`: shader id of the instrumented bytecode.
    pub instrumented_id: Option<u32>,
    /// `CreateShaderModule`: the bytecode holds an instrumentation cache
    /// entry, even one without checks.
    pub cached_module: bool,
    /// `CreatePipelineLayout`: the driver receives the padded layout.
    pub layout_instrumented: bool,
    /// `CreatePipelines`: per pipeline, whether it runs instrumented code.
    pub pipeline_instrumented: Vec<bool>,
    /// `CreateShaders`: per shader, its instrumented shader id.
    pub shader_ids: Vec<Option<u32>>,
    /// `CreateShaders`: per shader, whether it holds a cache entry.
    pub cached_shaders: Vec<bool>,
    /// Modules created only to be consumed by this call.
    pub replacement_modules: Vec<vk::ShaderModule>,
    /// Externally synchronized objects claimed by this call's thread.
    pub claimed: Vec<u64>,
}
