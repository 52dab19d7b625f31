use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use crate::base::{StateNode, StateObject, TypedHandle};

#[derive(Debug)]
pub struct ShaderModuleState {
    pub handle: vk::ShaderModule,
    /// The application's bytecode, before any instrumentation.
    pub spirv: Arc<[u32]>,
    /// Set when the driver received an instrumented copy.
    pub instrumented_id: Option<u32>,
    node: StateNode,
}

impl ShaderModuleState {
    pub fn new(handle: vk::ShaderModule, spirv: Arc<[u32]>, instrumented_id: Option<u32>) -> Self {
        Self {
            handle,
            spirv,
            instrumented_id,
            node: StateNode::new(),
        }
    }
}

impl StateObject for ShaderModuleState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn from_raw(b: &vk::DescriptorSetLayoutBinding<'_>) -> Self {
        Self {
            binding: b.binding,
            descriptor_type: b.descriptor_type,
            descriptor_count: b.descriptor_count,
            stage_flags: b.stage_flags,
        }
    }
}

#[derive(Debug)]
pub struct DescriptorSetLayoutState {
    pub handle: vk::DescriptorSetLayout,
    pub flags: vk::DescriptorSetLayoutCreateFlags,
    pub bindings: Vec<LayoutBinding>,
    node: StateNode,
}

impl DescriptorSetLayoutState {
    pub fn new(
        handle: vk::DescriptorSetLayout,
        flags: vk::DescriptorSetLayoutCreateFlags,
        bindings: Vec<LayoutBinding>,
    ) -> Self {
        Self {
            handle,
            flags,
            bindings,
            node: StateNode::new(),
        }
    }

    pub fn total_descriptors(&self) -> u32 {
        self.bindings.iter().map(|b| b.descriptor_count).sum()
    }
}

impl StateObject for DescriptorSetLayoutState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

/// A pipeline layout keeps its set layouts alive without registering as
/// their child: Vulkan allows destroying a set layout while layouts built
/// from it stay valid.
#[derive(Debug)]
pub struct PipelineLayoutState {
    pub handle: vk::PipelineLayout,
    pub set_layouts: Vec<Option<Arc<DescriptorSetLayoutState>>>,
    pub push_constant_range_count: u32,
    /// Number of sets the application declared, before any padding.
    pub app_set_count: u32,
    /// The driver received a layout extended with the debug slot.
    pub instrumented: bool,
    node: StateNode,
}

impl PipelineLayoutState {
    pub fn new(
        handle: vk::PipelineLayout,
        set_layouts: Vec<Option<Arc<DescriptorSetLayoutState>>>,
        push_constant_range_count: u32,
        instrumented: bool,
    ) -> Self {
        let app_set_count = set_layouts.len() as u32;
        Self {
            handle,
            set_layouts,
            push_constant_range_count,
            app_set_count,
            instrumented,
            node: StateNode::new(),
        }
    }
}

impl StateObject for PipelineLayoutState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

#[derive(Debug, Clone)]
pub struct StageState {
    pub stage: vk::ShaderStageFlags,
    pub module: Option<Arc<ShaderModuleState>>,
    pub entry_point: String,
}

#[derive(Debug)]
pub struct PipelineState {
    pub handle: vk::Pipeline,
    pub bind_point: vk::PipelineBindPoint,
    pub layout: Option<Arc<PipelineLayoutState>>,
    pub stages: Vec<StageState>,
    /// Whether the pipeline runs instrumented shader code.
    pub instrumented: bool,
    node: StateNode,
}

impl PipelineState {
    pub fn new(
        handle: vk::Pipeline,
        bind_point: vk::PipelineBindPoint,
        layout: Option<Arc<PipelineLayoutState>>,
        stages: Vec<StageState>,
        instrumented: bool,
    ) -> Self {
        Self {
            handle,
            bind_point,
            layout,
            stages,
            instrumented,
            node: StateNode::new(),
        }
    }
}

impl StateObject for PipelineState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}

/// `VK_EXT_shader_object` shader.
#[derive(Debug)]
pub struct ShaderObjectState {
    pub handle: vk::ShaderEXT,
    pub stage: vk::ShaderStageFlags,
    pub set_layouts: Vec<Option<Arc<DescriptorSetLayoutState>>>,
    pub instrumented_id: RwLock<Option<u32>>,
    node: StateNode,
}

impl ShaderObjectState {
    pub fn new(
        handle: vk::ShaderEXT,
        stage: vk::ShaderStageFlags,
        set_layouts: Vec<Option<Arc<DescriptorSetLayoutState>>>,
        instrumented_id: Option<u32>,
    ) -> Self {
        Self {
            handle,
            stage,
            set_layouts,
            instrumented_id: RwLock::new(instrumented_id),
            node: StateNode::new(),
        }
    }
}

impl StateObject for ShaderObjectState {
    fn handle(&self) -> TypedHandle {
        TypedHandle::from_handle(self.handle)
    }

    fn node(&self) -> &StateNode {
        &self.node
    }
}
