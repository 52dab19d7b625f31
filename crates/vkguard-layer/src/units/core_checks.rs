//! Rules that depend on tracked object state: command buffer lifecycle,
//! memory binding and mapping, descriptor pool capacity, swapchain image
//! ownership.

use std::collections::HashSet;
use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_core::{ErrorObject, RecordObject, Reporter};
use vkguard_state::command::RecordState;
use vkguard_state::{DeviceState, TypedHandle};

use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_QUEUE_SUBMIT_NOT_EXECUTABLE: &str = "VUID-vkQueueSubmit-pCommandBuffers-00070";
pub const VUID_QUEUE_SUBMIT_PENDING: &str = "VUID-vkQueueSubmit-pCommandBuffers-00071";
pub const VUID_POOL_EXHAUSTED: &str = "VKGUARD-AllocateDescriptorSets-pool-exhausted";

pub struct CoreChecks {
    state: Arc<DeviceState>,
    reporter: Arc<Reporter>,
    /// Command buffers begun with `SIMULTANEOUS_USE`.
    simultaneous: HashSet<u64>,
    /// Command buffers with shader objects bound since their last begin.
    shaders_bound: HashSet<u64>,
}

impl CoreChecks {
    pub fn new(state: Arc<DeviceState>, reporter: Arc<Reporter>) -> Self {
        Self {
            state,
            reporter,
            simultaneous: HashSet::new(),
            shaders_bound: HashSet::new(),
        }
    }

    fn record_state(&self, command_buffer: vk::CommandBuffer) -> Option<RecordState> {
        self.state
            .command_buffers
            .get(command_buffer.as_raw())
            .map(|cb| cb.record_state())
    }

    fn check_memory(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        let mut skip = false;
        match call {
            Call::BindBufferMemory { buffer, memory, offset } => {
                if let Some(state) = self.state.buffers.get(buffer.as_raw()) {
                    if state.is_bound() {
                        skip |= self.reporter.log_error(
                            "VUID-vkBindBufferMemory-buffer-07459",
                            &[buffer.as_raw()],
                            &location.dot("buffer"),
                            "is already bound to memory",
                        );
                    }
                }
                if let Some(mem) = self.state.memories.get(memory.as_raw()) {
                    if *offset >= mem.allocation_size {
                        skip |= self.reporter.log_error(
                            "VUID-vkBindBufferMemory-memoryOffset-01031",
                            &[memory.as_raw()],
                            &location.dot("memoryOffset"),
                            format_args!("({offset}) must be less than the allocation size ({})", mem.allocation_size),
                        );
                    }
                }
            }
            Call::BindImageMemory { binds } => {
                for (i, bind) in binds.iter().enumerate() {
                    let info = location.index("pBindInfos", i as u32);
                    if let Some(image) = self.state.images.get(bind.image.as_raw()) {
                        if image.is_bound() {
                            skip |= self.reporter.log_error(
                                "VUID-VkBindImageMemoryInfo-image-07460",
                                &[bind.image.as_raw()],
                                &info.dot("image"),
                                "is already bound to memory",
                            );
                        }
                    }
                    if bind.swapchain.is_some() {
                        continue;
                    }
                    if let Some(mem) = self.state.memories.get(bind.memory.as_raw()) {
                        if bind.offset >= mem.allocation_size {
                            skip |= self.reporter.log_error(
                                "VUID-VkBindImageMemoryInfo-memoryOffset-01046",
                                &[bind.memory.as_raw()],
                                &info.dot("memoryOffset"),
                                format_args!(
                                    "({}) must be less than the allocation size ({})",
                                    bind.offset, mem.allocation_size
                                ),
                            );
                        }
                    }
                }
            }
            Call::MapMemory { memory, offset, .. } => {
                if let Some(mem) = self.state.memories.get(memory.as_raw()) {
                    if mem.mapped.lock().is_some() {
                        skip |= self.reporter.log_error(
                            "VUID-vkMapMemory-memory-00678",
                            &[memory.as_raw()],
                            &location.dot("memory"),
                            "is already mapped",
                        );
                    }
                    if *offset >= mem.allocation_size {
                        skip |= self.reporter.log_error(
                            "VUID-vkMapMemory-offset-00679",
                            &[memory.as_raw()],
                            &location.dot("offset"),
                            format_args!("({offset}) must be less than the allocation size ({})", mem.allocation_size),
                        );
                    }
                }
            }
            Call::UnmapMemory { memory } => {
                if let Some(mem) = self.state.memories.get(memory.as_raw()) {
                    if mem.mapped.lock().is_none() {
                        skip |= self.reporter.log_error(
                            "VUID-vkUnmapMemory-memory-00689",
                            &[memory.as_raw()],
                            &location.dot("memory"),
                            "is not mapped",
                        );
                    }
                }
            }
            _ => {}
        }
        skip
    }

    fn check_resources(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        match call {
            Call::CreateImageView { image, .. } => match self.state.images.get(image.as_raw()) {
                Some(state) if !state.is_bound() => self.reporter.log_error(
                    "VUID-VkImageViewCreateInfo-image-01020",
                    &[image.as_raw()],
                    &location.dot("pCreateInfo").dot("image"),
                    "is not bound to memory",
                ),
                _ => false,
            },
            Call::DestroyImage { image } => match self.state.images.get(image.as_raw()) {
                Some(state) if state.owned_by_swapchain => self.reporter.log_error(
                    "VUID-vkDestroyImage-image-04882",
                    &[image.as_raw()],
                    &location.dot("image"),
                    "is owned by a swapchain and must not be destroyed",
                ),
                _ => false,
            },
            Call::DestroyBuffer { buffer } if !buffer.is_null() => {
                let handle = TypedHandle::from_handle(*buffer);
                let in_flight = self
                    .state
                    .command_buffers
                    .snapshot()
                    .into_iter()
                    .map(|(_, cb)| cb)
                    .find(|cb| cb.record_state() == RecordState::Pending && cb.referenced().contains(&handle));
                match in_flight {
                    Some(cb) => self.reporter.log_error(
                        "VUID-vkDestroyBuffer-buffer-00922",
                        &[buffer.as_raw(), cb.handle.as_raw()],
                        &location.dot("buffer"),
                        format_args!(
                            "is used by command buffer 0x{:x}, which has not completed execution",
                            cb.handle.as_raw()
                        ),
                    ),
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn check_swapchain(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        let mut skip = false;
        match call {
            Call::AcquireNextImage { swapchain, .. } => {
                if let Some(chain) = self.state.swapchains.get(swapchain.as_raw()) {
                    if chain.is_retired() {
                        skip |= self.reporter.log_error(
                            "VUID-vkAcquireNextImageKHR-swapchain-01675",
                            &[swapchain.as_raw()],
                            &location.dot("swapchain"),
                            "has been retired",
                        );
                    }
                }
            }
            Call::QueuePresent { presents, .. } => {
                let info = location.dot("pPresentInfo");
                for (i, (swapchain, index)) in presents.iter().enumerate() {
                    let Some(chain) = self.state.swapchains.get(swapchain.as_raw()) else {
                        continue;
                    };
                    if !chain.is_acquired(*index) {
                        skip |= self.reporter.log_error(
                            "VUID-VkPresentInfoKHR-pImageIndices-01430",
                            &[swapchain.as_raw()],
                            &info.index("pImageIndices", i as u32),
                            format_args!("image {index} was not acquired by the application"),
                        );
                    }
                }
            }
            _ => {}
        }
        skip
    }

    fn check_descriptors(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        match call {
            Call::FreeDescriptorSets { pool, .. } => match self.state.descriptor_pools.get(pool.as_raw()) {
                Some(state) if !state.can_free_individual_sets() => self.reporter.log_error(
                    "VUID-vkFreeDescriptorSets-descriptorPool-00312",
                    &[pool.as_raw()],
                    &location.dot("descriptorPool"),
                    "was not created with VK_DESCRIPTOR_POOL_CREATE_FREE_DESCRIPTOR_SET_BIT",
                ),
                _ => false,
            },
            Call::AllocateDescriptorSets { pool, layouts, .. } => {
                if let Some(state) = self.state.descriptor_pools.get(pool.as_raw()) {
                    let wanted = layouts.len() as u32;
                    if wanted > state.available() {
                        // The driver reports VK_ERROR_OUT_OF_POOL_MEMORY.
                        self.reporter.log_warning(
                            VUID_POOL_EXHAUSTED,
                            &[pool.as_raw()],
                            &location.dot("pAllocateInfo").dot("descriptorSetCount"),
                            format_args!(
                                "requests {wanted} set(s) but only {} of {} remain",
                                state.available(),
                                state.max_sets
                            ),
                        );
                    }
                }
                false
            }
            Call::CmdBindDescriptorSets {
                layout, first_set, sets, ..
            } => match self.state.pipeline_layouts.get(layout.as_raw()) {
                Some(state) if first_set + sets.len() as u32 > state.app_set_count => self.reporter.log_error(
                    "VUID-vkCmdBindDescriptorSets-firstSet-00360",
                    &[layout.as_raw()],
                    &location.dot("firstSet"),
                    format_args!(
                        "({first_set}) + descriptorSetCount ({}) exceeds the {} set(s) of the layout",
                        sets.len(),
                        state.app_set_count
                    ),
                ),
                _ => false,
            },
            _ => false,
        }
    }

    fn check_lifecycle(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        let mut skip = false;
        match call {
            Call::BeginCommandBuffer { command_buffer, .. } => {
                let Some(cb) = self.state.command_buffers.get(command_buffer.as_raw()) else {
                    return false;
                };
                let state = cb.record_state();
                if state == RecordState::Recording {
                    skip |= self.reporter.log_error(
                        "VUID-vkBeginCommandBuffer-commandBuffer-00049",
                        &[command_buffer.as_raw()],
                        &location.dot("commandBuffer"),
                        "is already in the recording state",
                    );
                } else if state != RecordState::Initial
                    && cb.pool().is_some_and(|pool| !pool.can_reset_individual_buffers())
                {
                    skip |= self.reporter.log_error(
                        "VUID-vkBeginCommandBuffer-commandBuffer-00050",
                        &[command_buffer.as_raw()],
                        &location.dot("commandBuffer"),
                        "was not reset and its pool lacks VK_COMMAND_POOL_CREATE_RESET_COMMAND_BUFFER_BIT",
                    );
                }
            }
            Call::EndCommandBuffer { command_buffer } => {
                if self.record_state(*command_buffer).is_some_and(|s| s != RecordState::Recording) {
                    skip |= self.reporter.log_error(
                        "VUID-vkEndCommandBuffer-commandBuffer-00059",
                        &[command_buffer.as_raw()],
                        &location.dot("commandBuffer"),
                        "is not in the recording state",
                    );
                }
            }
            Call::ResetCommandBuffer { command_buffer } => {
                let Some(cb) = self.state.command_buffers.get(command_buffer.as_raw()) else {
                    return false;
                };
                if cb.record_state() == RecordState::Pending {
                    skip |= self.reporter.log_error(
                        "VUID-vkResetCommandBuffer-commandBuffer-00045",
                        &[command_buffer.as_raw()],
                        &location.dot("commandBuffer"),
                        "is in the pending state",
                    );
                }
                if cb.pool().is_some_and(|pool| !pool.can_reset_individual_buffers()) {
                    skip |= self.reporter.log_error(
                        "VUID-vkResetCommandBuffer-commandBuffer-00046",
                        &[command_buffer.as_raw()],
                        &location.dot("commandBuffer"),
                        "was allocated from a pool without VK_COMMAND_POOL_CREATE_RESET_COMMAND_BUFFER_BIT",
                    );
                }
            }
            Call::QueueSubmit { batches, .. } => {
                for (b, batch) in batches.iter().enumerate() {
                    let submit = location.index("pSubmits", b as u32);
                    for (i, cb) in batch.iter().enumerate() {
                        let Some(state) = self.record_state(*cb) else {
                            continue;
                        };
                        let field = submit.index("pCommandBuffers", i as u32);
                        match state {
                            RecordState::Executable => {}
                            RecordState::Pending if self.simultaneous.contains(&cb.as_raw()) => {}
                            RecordState::Pending => {
                                skip |= self.reporter.log_error(
                                    VUID_QUEUE_SUBMIT_PENDING,
                                    &[cb.as_raw()],
                                    &field,
                                    "is already pending and was not begun with SIMULTANEOUS_USE",
                                );
                            }
                            other => {
                                skip |= self.reporter.log_error(
                                    VUID_QUEUE_SUBMIT_NOT_EXECUTABLE,
                                    &[cb.as_raw()],
                                    &field,
                                    format_args!("is in the {other:?} state, not executable"),
                                );
                            }
                        }
                    }
                }
            }
            _ if call.is_recorded_command() => {
                let Some(cb) = call.command_buffer() else {
                    return false;
                };
                if self.record_state(cb).is_some_and(|s| s != RecordState::Recording) {
                    skip |= self.reporter.log_error(
                        &format!("VUID-{}-commandBuffer-recording", location.function),
                        &[cb.as_raw()],
                        &location.dot("commandBuffer"),
                        "is not in the recording state",
                    );
                }
                skip |= self.check_bound_pipeline(call, cb, error);
            }
            _ => {}
        }
        skip
    }

    fn check_bound_pipeline(&self, call: &Call, command_buffer: vk::CommandBuffer, error: &ErrorObject) -> bool {
        let bind_point = match call {
            Call::CmdDraw { .. } => vk::PipelineBindPoint::GRAPHICS,
            Call::CmdDispatch { .. } => vk::PipelineBindPoint::COMPUTE,
            _ => return false,
        };
        if self.shaders_bound.contains(&command_buffer.as_raw()) {
            return false;
        }
        let Some(cb) = self.state.command_buffers.get(command_buffer.as_raw()) else {
            return false;
        };
        if cb.bound_pipeline(bind_point).is_some() {
            return false;
        }
        self.reporter.log_error(
            &format!("VUID-{}-None-08606", error.location.function),
            &[command_buffer.as_raw()],
            &error.location,
            format_args!("no {bind_point:?} pipeline or shader object is bound"),
        )
    }
}

impl ValidationObject for CoreChecks {
    fn kind(&self) -> UnitKind {
        UnitKind::CoreChecks
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::BeginCommandBuffer | Command::ResetCommandBuffer | Command::CmdBindShadersEXT => {
                Phases::VALIDATE | Phases::RECORD_AFTER
            }
            Command::FreeCommandBuffers | Command::DestroyCommandPool => Phases::RECORD_BEFORE,
            Command::BindBufferMemory
            | Command::BindImageMemory
            | Command::BindImageMemory2
            | Command::MapMemory
            | Command::UnmapMemory
            | Command::CreateImageView
            | Command::DestroyImage
            | Command::DestroyBuffer
            | Command::AcquireNextImageKHR
            | Command::QueuePresentKHR
            | Command::FreeDescriptorSets
            | Command::AllocateDescriptorSets
            | Command::EndCommandBuffer
            | Command::QueueSubmit
            | Command::CmdBindPipeline
            | Command::CmdBindDescriptorSets
            | Command::CmdDraw
            | Command::CmdDispatch
            | Command::CmdCopyBuffer
            | Command::CmdFillBuffer
            | Command::CmdPipelineBarrier => Phases::VALIDATE,
            _ => Phases::empty(),
        }
    }

    fn pre_call_validate(&self, call: &Call, error: &ErrorObject) -> bool {
        let mut skip = self.check_memory(call, error);
        skip |= self.check_resources(call, error);
        skip |= self.check_swapchain(call, error);
        skip |= self.check_descriptors(call, error);
        skip |= self.check_lifecycle(call, error);
        skip
    }

    fn pre_call_record(&mut self, call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {
        match call {
            Call::FreeCommandBuffers { buffers, .. } => {
                for cb in buffers.iter() {
                    self.simultaneous.remove(&cb.as_raw());
                    self.shaders_bound.remove(&cb.as_raw());
                }
            }
            Call::DestroyCommandPool { .. } => {
                // The state tracker already dropped the pool's buffers.
                let buffers = &self.state.command_buffers;
                self.simultaneous.retain(|raw| buffers.contains(*raw));
                self.shaders_bound.retain(|raw| buffers.contains(*raw));
            }
            _ => {}
        }
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        match call {
            Call::BeginCommandBuffer { command_buffer, flags } if record.succeeded() => {
                let raw = command_buffer.as_raw();
                self.shaders_bound.remove(&raw);
                if flags.contains(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE) {
                    self.simultaneous.insert(raw);
                } else {
                    self.simultaneous.remove(&raw);
                }
            }
            Call::ResetCommandBuffer { command_buffer } if record.succeeded() => {
                self.shaders_bound.remove(&command_buffer.as_raw());
            }
            Call::CmdBindShaders {
                command_buffer, shaders, ..
            } => {
                if shaders.iter().any(|s| !s.is_null()) {
                    self.shaders_bound.insert(command_buffer.as_raw());
                }
            }
            _ => {}
        }
    }

    fn teardown(&mut self) {
        self.simultaneous.clear();
        self.shaders_bound.clear();
    }
}
