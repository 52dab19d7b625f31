//! The GPU-assisted unit's view of the driver: plain forwarding calls into
//! the device dispatch table, bypassing every validation unit.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use ash::vk;
use vkguard_gpuav::budget::DEBUG_OUTPUT_BINDING;
use vkguard_gpuav::{DescriptorBackend, GpuAllocator, OutputBuffer};

use super::gpu_assisted::GpuAvDriver;
use crate::dispatch::DeviceDispatch;

pub struct DeviceTrampolines {
    device: vk::Device,
    dispatch: Arc<DeviceDispatch>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceTrampolines {
    pub fn new(
        device: vk::Device,
        dispatch: Arc<DeviceDispatch>,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
    ) -> Self {
        Self {
            device,
            dispatch,
            memory_properties,
        }
    }

    fn v1_0(&self) -> &ash::DeviceFnV1_0 {
        &self.dispatch.v1_0
    }
}

// SAFETY (all blocks below): `device` is the live device the dispatch table
// was loaded for, every create-info lives on the stack for the duration of
// the call, and the layer owns every handle it destroys.

impl GpuAllocator for DeviceTrampolines {
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<vk::Buffer, vk::Result> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let mut buffer = vk::Buffer::null();
        unsafe { (self.v1_0().create_buffer)(self.device, &info, ptr::null(), &mut buffer) }.result_with_success(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { (self.v1_0().destroy_buffer)(self.device, buffer, ptr::null()) }
    }

    fn buffer_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let mut reqs = vk::MemoryRequirements::default();
        unsafe { (self.v1_0().get_buffer_memory_requirements)(self.device, buffer, &mut reqs) };
        reqs
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count).find(|&i| {
            type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
        })
    }

    fn allocate_memory(&self, size: u64, type_index: u32) -> Result<vk::DeviceMemory, vk::Result> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(type_index);
        let mut memory = vk::DeviceMemory::null();
        unsafe { (self.v1_0().allocate_memory)(self.device, &info, ptr::null(), &mut memory) }
            .result_with_success(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { (self.v1_0().free_memory)(self.device, memory, ptr::null()) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> Result<(), vk::Result> {
        unsafe { (self.v1_0().bind_buffer_memory)(self.device, buffer, memory, offset) }.result()
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut c_void, vk::Result> {
        let mut data = ptr::null_mut();
        unsafe {
            (self.v1_0().map_memory)(
                self.device,
                memory,
                offset,
                size,
                vk::MemoryMapFlags::empty(),
                &mut data,
            )
        }
        .result_with_success(data)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { (self.v1_0().unmap_memory)(self.device, memory) }
    }
}

impl DescriptorBackend for DeviceTrampolines {
    fn create_pool(&self, max_sets: u32) -> Result<vk::DescriptorPool, vk::Result> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: max_sets,
        }];
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let mut pool = vk::DescriptorPool::null();
        unsafe { (self.v1_0().create_descriptor_pool)(self.device, &info, ptr::null(), &mut pool) }
            .result_with_success(pool)
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe { (self.v1_0().destroy_descriptor_pool)(self.device, pool, ptr::null()) }
    }

    fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let mut sets = vec![vk::DescriptorSet::null(); count as usize];
        unsafe { (self.v1_0().allocate_descriptor_sets)(self.device, &info, sets.as_mut_ptr()) }
            .result_with_success(sets)
    }

    fn free_sets(&self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        let _ = unsafe {
            (self.v1_0().free_descriptor_sets)(self.device, pool, sets.len() as u32, sets.as_ptr())
        };
    }
}

impl GpuAvDriver for DeviceTrampolines {
    fn create_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let mut layout = vk::DescriptorSetLayout::null();
        unsafe { (self.v1_0().create_descriptor_set_layout)(self.device, &info, ptr::null(), &mut layout) }
            .result_with_success(layout)
    }

    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { (self.v1_0().destroy_descriptor_set_layout)(self.device, layout, ptr::null()) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout, vk::Result> {
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let mut layout = vk::PipelineLayout::null();
        unsafe { (self.v1_0().create_pipeline_layout)(self.device, &info, ptr::null(), &mut layout) }
            .result_with_success(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { (self.v1_0().destroy_pipeline_layout)(self.device, layout, ptr::null()) }
    }

    fn create_shader_module(&self, words: &[u32]) -> Result<vk::ShaderModule, vk::Result> {
        let info = vk::ShaderModuleCreateInfo::default().code(words);
        let mut module = vk::ShaderModule::null();
        unsafe { (self.v1_0().create_shader_module)(self.device, &info, ptr::null(), &mut module) }
            .result_with_success(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { (self.v1_0().destroy_shader_module)(self.device, module, ptr::null()) }
    }

    fn write_output_descriptor(&self, set: vk::DescriptorSet, output: &OutputBuffer) {
        let info = vk::DescriptorBufferInfo {
            buffer: output.buffer,
            offset: 0,
            range: output.size,
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(DEBUG_OUTPUT_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(std::slice::from_ref(&info));
        unsafe { (self.v1_0().update_descriptor_sets)(self.device, 1, &write, 0, ptr::null()) }
    }

    fn cmd_bind_debug_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            (self.v1_0().cmd_bind_descriptor_sets)(
                command_buffer,
                bind_point,
                layout,
                set_index,
                1,
                &set,
                0,
                ptr::null(),
            )
        }
    }
}
