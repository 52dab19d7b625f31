//! Keeps the state object graph in step with the driver.
//!
//! Creation is recorded after a successful dispatch, destruction before
//! the destroy is forwarded. Every unit after this one in the chain reads
//! the graph it maintains.

use std::sync::{Arc, OnceLock};

use ash::vk::Handle;
use tracing::trace;
use vkguard_core::RecordObject;
use vkguard_state::{DeviceState, InstanceState};

use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

enum Tracked {
    Instance(Arc<OnceLock<Arc<InstanceState>>>),
    Device(Arc<DeviceState>),
}

pub struct StateTracker {
    tracked: Tracked,
}

impl StateTracker {
    /// `slot` receives the instance state once `vkCreateInstance` succeeded.
    pub fn for_instance(slot: Arc<OnceLock<Arc<InstanceState>>>) -> Self {
        Self {
            tracked: Tracked::Instance(slot),
        }
    }

    pub fn for_device(state: Arc<DeviceState>) -> Self {
        Self {
            tracked: Tracked::Device(state),
        }
    }

    fn instance_intercepts(command: Command) -> Phases {
        match command {
            Command::CreateInstance | Command::EnumeratePhysicalDevices => Phases::RECORD_AFTER,
            Command::DestroySurfaceKHR | Command::DestroyInstance => Phases::RECORD_BEFORE,
            _ => Phases::empty(),
        }
    }

    fn device_intercepts(command: Command) -> Phases {
        match command {
            // Destruction, before the driver forgets the handle.
            Command::FreeMemory
            | Command::DestroyBuffer
            | Command::DestroyImage
            | Command::DestroyImageView
            | Command::DestroySwapchainKHR
            | Command::DestroyShaderModule
            | Command::DestroyDescriptorSetLayout
            | Command::DestroyPipelineLayout
            | Command::DestroyPipeline
            | Command::DestroyShaderEXT
            | Command::DestroyDescriptorPool
            | Command::ResetDescriptorPool
            | Command::FreeDescriptorSets
            | Command::DestroyCommandPool
            | Command::ResetCommandPool
            | Command::FreeCommandBuffers
            | Command::DestroyDevice => Phases::RECORD_BEFORE,
            // Everything else is recorded once the driver agreed.
            Command::GetDeviceQueue
            | Command::QueueSubmit
            | Command::QueueWaitIdle
            | Command::DeviceWaitIdle
            | Command::AllocateMemory
            | Command::MapMemory
            | Command::UnmapMemory
            | Command::BindBufferMemory
            | Command::BindImageMemory
            | Command::BindImageMemory2
            | Command::CreateBuffer
            | Command::CreateImage
            | Command::CreateImageView
            | Command::CreateSwapchainKHR
            | Command::GetSwapchainImagesKHR
            | Command::AcquireNextImageKHR
            | Command::QueuePresentKHR
            | Command::CreateShaderModule
            | Command::CreateDescriptorSetLayout
            | Command::CreatePipelineLayout
            | Command::CreateGraphicsPipelines
            | Command::CreateComputePipelines
            | Command::CreateShadersEXT
            | Command::CreateDescriptorPool
            | Command::AllocateDescriptorSets
            | Command::CreateCommandPool
            | Command::AllocateCommandBuffers
            | Command::BeginCommandBuffer
            | Command::EndCommandBuffer
            | Command::ResetCommandBuffer
            | Command::CmdBindPipeline
            | Command::CmdBindDescriptorSets
            | Command::CmdCopyBuffer
            | Command::CmdFillBuffer => Phases::RECORD_AFTER,
            _ => Phases::empty(),
        }
    }

    fn record_instance(slot: &OnceLock<Arc<InstanceState>>, call: &Call, record: &RecordObject, before: bool) {
        match call {
            Call::CreateInstance {
                api_version, instance, ..
            } if record.succeeded() => {
                let _ = slot.set(Arc::new(InstanceState::new(*instance, *api_version)));
            }
            Call::EnumeratePhysicalDevices { devices, .. } if record.succeeded() => {
                if let Some(state) = slot.get() {
                    state.record_physical_devices(devices);
                }
            }
            Call::DestroySurface { surface, .. } if before => {
                if let Some(state) = slot.get() {
                    state.destroy_surface(*surface);
                }
            }
            Call::DestroyInstance { .. } if before => {
                if let Some(state) = slot.get() {
                    let destroyed = state.destroy_all();
                    trace!(count = destroyed.len(), "released instance-level state");
                }
            }
            _ => {}
        }
    }

    fn record_destroy(state: &DeviceState, call: &Call) {
        match call {
            Call::FreeMemory { memory } => {
                state.free_memory(*memory);
            }
            Call::DestroyBuffer { buffer } => {
                state.destroy_buffer(*buffer);
            }
            Call::DestroyImage { image } => {
                state.destroy_image(*image);
            }
            Call::DestroyImageView { view } => {
                state.destroy_image_view(*view);
            }
            Call::DestroySwapchain { swapchain } => {
                state.destroy_swapchain(*swapchain);
            }
            Call::DestroyShaderModule { module } => {
                state.destroy_shader_module(*module);
            }
            Call::DestroySetLayout { layout } => {
                state.destroy_set_layout(*layout);
            }
            Call::DestroyPipelineLayout { layout } => {
                state.destroy_pipeline_layout(*layout);
            }
            Call::DestroyPipeline { pipeline } => {
                state.destroy_pipeline(*pipeline);
            }
            Call::DestroyShader { shader } => {
                state.destroy_shader_object(*shader);
            }
            Call::DestroyDescriptorPool { pool } => {
                state.destroy_descriptor_pool(*pool);
            }
            Call::ResetDescriptorPool { pool } => {
                state.reset_descriptor_pool(*pool);
            }
            Call::FreeDescriptorSets { pool, sets } => {
                state.free_descriptor_sets(*pool, sets);
            }
            Call::DestroyCommandPool { pool } => {
                state.destroy_command_pool(*pool);
            }
            Call::ResetCommandPool { pool } => {
                state.reset_command_pool(*pool);
            }
            Call::FreeCommandBuffers { buffers, .. } => {
                state.free_command_buffers(buffers);
            }
            Call::DestroyDevice { .. } => {
                let destroyed = state.destroy_all();
                trace!(count = destroyed.len(), "released device-level state");
            }
            _ => {}
        }
    }

    fn record_create(state: &DeviceState, call: &Call, record: &RecordObject, scratch: &CallScratch) {
        let ok = record.succeeded();
        match call {
            Call::GetDeviceQueue {
                family_index,
                queue_index,
                queue,
            } if !queue.is_null() => {
                state.add_queue(*queue, *family_index, *queue_index);
            }
            Call::QueueSubmit { queue, batches, .. } if ok => {
                if let Some(q) = state.queues.get(queue.as_raw()) {
                    q.submissions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                for cb in batches.iter().flatten() {
                    if let Some(cb) = state.command_buffers.get(cb.as_raw()) {
                        cb.submit();
                    }
                }
            }
            Call::QueueWaitIdle { .. } | Call::DeviceWaitIdle { .. } if ok => {
                // Queue-level completion is not tracked per queue; an idle
                // wait retires everything in flight.
                for (_, cb) in state.command_buffers.snapshot() {
                    cb.retire();
                }
            }
            Call::AllocateMemory {
                size,
                type_index,
                memory,
            } if ok => {
                state.add_memory(*memory, *size, *type_index);
            }
            Call::MapMemory { memory, offset, size } if ok => {
                if let Some(mem) = state.memories.get(memory.as_raw()) {
                    *mem.mapped.lock() = Some((*offset, *size));
                }
            }
            Call::UnmapMemory { memory } => {
                if let Some(mem) = state.memories.get(memory.as_raw()) {
                    *mem.mapped.lock() = None;
                }
            }
            Call::BindBufferMemory { buffer, memory, offset } if ok => {
                state.bind_buffer_memory(*buffer, *memory, *offset);
            }
            Call::BindImageMemory { binds } if ok => {
                for bind in binds {
                    match bind.swapchain {
                        Some((swapchain, index)) => {
                            state.bind_image_swapchain(bind.image, swapchain, index);
                        }
                        None => {
                            state.bind_image_memory(bind.image, bind.memory, bind.offset);
                        }
                    }
                }
            }
            Call::CreateBuffer { desc, buffer } if ok => {
                state.add_buffer(*buffer, *desc);
            }
            Call::CreateImage { desc, image } if ok => {
                state.add_image(*image, *desc);
            }
            Call::CreateImageView { image, desc, view } if ok => {
                state.add_image_view(*view, *desc, *image);
            }
            Call::CreateSwapchain { desc, swapchain } if ok => {
                state.add_swapchain(*swapchain, *desc);
            }
            Call::GetSwapchainImages { swapchain, images } if ok && !images.is_empty() => {
                state.register_swapchain_images(*swapchain, images);
            }
            Call::AcquireNextImage { swapchain, image_index } if ok => {
                if let Some(chain) = state.swapchains.get(swapchain.as_raw()) {
                    chain.acquire(*image_index);
                }
            }
            Call::QueuePresent { presents, .. } => {
                // The image is released even when presenting reported an
                // error other than device loss.
                if !record.device_lost() {
                    for (swapchain, index) in presents {
                        if let Some(chain) = state.swapchains.get(swapchain.as_raw()) {
                            chain.present(*index);
                        }
                    }
                }
            }
            Call::CreateShaderModule { code, module, .. } if ok => {
                state.add_shader_module(*module, code.clone(), scratch.instrumented_id);
            }
            Call::CreateSetLayout { flags, bindings, layout } if ok => {
                state.add_set_layout(*layout, *flags, bindings.clone());
            }
            Call::CreatePipelineLayout {
                set_layouts,
                app_set_count,
                push_constant_ranges,
                layout,
            } if ok => {
                let app = &set_layouts[..(*app_set_count as usize).min(set_layouts.len())];
                state.add_pipeline_layout(*layout, app, *push_constant_ranges, scratch.layout_instrumented);
            }
            Call::CreatePipelines {
                bind_point,
                pipelines,
                created,
            } => {
                // Batched creation can partially succeed: record every
                // non-null handle.
                for (index, (desc, pipeline)) in pipelines.iter().zip(created).enumerate() {
                    if pipeline.is_null() {
                        continue;
                    }
                    let stages: Vec<_> = desc
                        .stages
                        .iter()
                        .map(|s| (s.stage, s.module, s.entry_point.clone()))
                        .collect();
                    let instrumented = scratch.pipeline_instrumented.get(index).copied().unwrap_or(false);
                    state.add_pipeline(*pipeline, *bind_point, desc.layout, &stages, instrumented);
                }
            }
            Call::CreateShaders { shaders, created } => {
                for (index, (desc, shader)) in shaders.iter().zip(created).enumerate() {
                    if shader.is_null() {
                        continue;
                    }
                    let id = scratch.shader_ids.get(index).copied().flatten();
                    state.add_shader_object(*shader, desc.stage, &desc.set_layouts, id);
                }
            }
            Call::CreateDescriptorPool { flags, max_sets, pool } if ok => {
                state.add_descriptor_pool(*pool, *flags, *max_sets);
            }
            Call::AllocateDescriptorSets { pool, layouts, sets } if ok => {
                state.allocate_descriptor_sets(*pool, layouts, sets);
            }
            Call::CreateCommandPool {
                flags,
                queue_family_index,
                pool,
            } if ok => {
                state.add_command_pool(*pool, *flags, *queue_family_index);
            }
            Call::AllocateCommandBuffers {
                pool, level, buffers, ..
            } if ok => {
                state.allocate_command_buffers(*pool, *level, buffers);
            }
            Call::BeginCommandBuffer { command_buffer, .. } if ok => {
                if let Some(cb) = state.command_buffers.get(command_buffer.as_raw()) {
                    cb.begin();
                }
            }
            Call::EndCommandBuffer { command_buffer } if ok => {
                if let Some(cb) = state.command_buffers.get(command_buffer.as_raw()) {
                    cb.end();
                }
            }
            Call::ResetCommandBuffer { command_buffer } if ok => {
                if let Some(cb) = state.command_buffers.get(command_buffer.as_raw()) {
                    cb.reset();
                }
            }
            Call::CmdBindPipeline {
                command_buffer,
                pipeline,
                ..
            } => {
                if let (Some(cb), Some(p)) = (
                    state.command_buffers.get(command_buffer.as_raw()),
                    state.pipelines.get(pipeline.as_raw()),
                ) {
                    cb.bind_pipeline(p);
                }
            }
            Call::CmdBindDescriptorSets {
                command_buffer, sets, ..
            } => {
                if let Some(cb) = state.command_buffers.get(command_buffer.as_raw()) {
                    for set in sets {
                        if let Some(set) = state.descriptor_sets.get(set.as_raw()) {
                            cb.reference(set);
                        }
                    }
                }
            }
            Call::CmdCopyBuffer {
                command_buffer,
                src,
                dst,
                ..
            } => {
                if let Some(cb) = state.command_buffers.get(command_buffer.as_raw()) {
                    for buffer in [src, dst] {
                        if let Some(buffer) = state.buffers.get(buffer.as_raw()) {
                            cb.reference(buffer);
                        }
                    }
                }
            }
            Call::CmdFillBuffer { command_buffer, dst, .. } => {
                if let (Some(cb), Some(buffer)) = (
                    state.command_buffers.get(command_buffer.as_raw()),
                    state.buffers.get(dst.as_raw()),
                ) {
                    cb.reference(buffer);
                }
            }
            _ => {}
        }
    }
}

impl ValidationObject for StateTracker {
    fn kind(&self) -> UnitKind {
        UnitKind::StateTracker
    }

    fn intercepts(&self, command: Command) -> Phases {
        match self.tracked {
            Tracked::Instance(_) => Self::instance_intercepts(command),
            Tracked::Device(_) => Self::device_intercepts(command),
        }
    }

    fn pre_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        match &self.tracked {
            Tracked::Instance(slot) => Self::record_instance(slot, call, record, true),
            Tracked::Device(state) => Self::record_destroy(state, call),
        }
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        match &self.tracked {
            Tracked::Instance(slot) => Self::record_instance(slot, call, record, false),
            Tracked::Device(state) => Self::record_create(state, call, record, scratch),
        }
    }
}
