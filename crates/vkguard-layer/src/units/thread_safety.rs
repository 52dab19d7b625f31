//! Detects two threads using the same externally synchronized object at
//! once.
//!
//! An object is claimed in record-before and released in record-after, so
//! the claim spans the driver call. A second thread claiming an object that
//! is still held by another thread is reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use ash::vk::{self, Handle};
use tracing::trace;
use vkguard_core::{RecordObject, Reporter};
use vkguard_state::DeviceState;

use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_MULTIPLE_THREADS_WRITE: &str = "UNASSIGNED-Threading-MultipleThreads-Write";

pub struct ThreadSafety {
    state: Arc<DeviceState>,
    reporter: Arc<Reporter>,
    /// Threads currently inside a call that holds the object, one entry per
    /// nested claim.
    in_use: HashMap<u64, Vec<ThreadId>>,
}

impl ThreadSafety {
    pub fn new(state: Arc<DeviceState>, reporter: Arc<Reporter>) -> Self {
        Self {
            state,
            reporter,
            in_use: HashMap::new(),
        }
    }

    fn pool_of(&self, command_buffer: vk::CommandBuffer) -> Option<u64> {
        self.state
            .command_buffers
            .get(command_buffer.as_raw())
            .and_then(|cb| cb.pool())
            .map(|pool| pool.handle.as_raw())
    }

    /// A command buffer is synchronized together with its pool.
    fn with_pool(&self, command_buffer: vk::CommandBuffer, out: &mut Vec<u64>) {
        out.push(command_buffer.as_raw());
        out.extend(self.pool_of(command_buffer));
    }

    fn synchronized_objects(&self, call: &Call) -> Vec<u64> {
        let mut objects = Vec::new();
        match call {
            Call::BeginCommandBuffer { command_buffer, .. }
            | Call::EndCommandBuffer { command_buffer }
            | Call::ResetCommandBuffer { command_buffer } => self.with_pool(*command_buffer, &mut objects),
            _ if call.is_recorded_command() => {
                if let Some(cb) = call.command_buffer() {
                    self.with_pool(cb, &mut objects);
                }
            }
            Call::AllocateCommandBuffers { pool, .. }
            | Call::ResetCommandPool { pool }
            | Call::DestroyCommandPool { pool } => objects.push(pool.as_raw()),
            Call::FreeCommandBuffers { pool, buffers } => {
                objects.push(pool.as_raw());
                objects.extend(buffers.iter().filter(|cb| !cb.is_null()).map(|cb| cb.as_raw()));
            }
            Call::AllocateDescriptorSets { pool, .. }
            | Call::ResetDescriptorPool { pool }
            | Call::DestroyDescriptorPool { pool } => objects.push(pool.as_raw()),
            Call::FreeDescriptorSets { pool, sets } => {
                objects.push(pool.as_raw());
                objects.extend(sets.iter().filter(|s| !s.is_null()).map(|s| s.as_raw()));
            }
            Call::QueueSubmit { queue, fence, .. } => {
                objects.push(queue.as_raw());
                if !fence.is_null() {
                    objects.push(fence.as_raw());
                }
            }
            Call::QueueWaitIdle { queue } => objects.push(queue.as_raw()),
            Call::QueuePresent { queue, presents, .. } => {
                objects.push(queue.as_raw());
                objects.extend(presents.iter().map(|(swapchain, _)| swapchain.as_raw()));
            }
            Call::AcquireNextImage { swapchain, .. } => objects.push(swapchain.as_raw()),
            Call::MapMemory { memory, .. } | Call::UnmapMemory { memory } | Call::FreeMemory { memory } => {
                objects.push(memory.as_raw())
            }
            Call::DestroyBuffer { buffer } => objects.push(buffer.as_raw()),
            Call::DestroyImage { image } => objects.push(image.as_raw()),
            Call::DestroyImageView { view } => objects.push(view.as_raw()),
            Call::DestroySwapchain { swapchain } => objects.push(swapchain.as_raw()),
            Call::DestroyShaderModule { module } => objects.push(module.as_raw()),
            Call::DestroySetLayout { layout } => objects.push(layout.as_raw()),
            Call::DestroyPipelineLayout { layout } => objects.push(layout.as_raw()),
            Call::DestroyPipeline { pipeline } => objects.push(pipeline.as_raw()),
            Call::DestroyShader { shader } => objects.push(shader.as_raw()),
            _ => {}
        }
        objects.retain(|raw| *raw != 0);
        objects
    }

    fn claim(&mut self, raw: u64, location: &RecordObject) {
        let current = thread::current().id();
        let users = self.in_use.entry(raw).or_default();
        if let Some(other) = users.iter().find(|t| **t != current) {
            let other = *other;
            self.reporter.log_error(
                VUID_MULTIPLE_THREADS_WRITE,
                &[raw],
                &location.location,
                format_args!(
                    "object 0x{raw:x} is used by {current:?} while {other:?} is still using it; \
                     access to it must be externally synchronized"
                ),
            );
        }
        users.push(current);
    }

    fn release(&mut self, raw: u64) {
        let current = thread::current().id();
        let Some(users) = self.in_use.get_mut(&raw) else {
            trace!(raw, "released an object that was never claimed");
            return;
        };
        if let Some(pos) = users.iter().position(|t| *t == current) {
            users.swap_remove(pos);
        }
        if users.is_empty() {
            self.in_use.remove(&raw);
        }
    }

    pub fn claimed_count(&self) -> usize {
        self.in_use.len()
    }
}

impl ValidationObject for ThreadSafety {
    fn kind(&self) -> UnitKind {
        UnitKind::ThreadSafety
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::CreateInstance
            | Command::DestroyInstance
            | Command::EnumeratePhysicalDevices
            | Command::GetPhysicalDeviceProperties
            | Command::GetPhysicalDeviceProperties2
            | Command::CreateDevice
            | Command::DestroySurfaceKHR
            | Command::DestroyDevice
            | Command::GetDeviceQueue
            | Command::DeviceWaitIdle
            | Command::AllocateMemory
            | Command::BindBufferMemory
            | Command::BindImageMemory
            | Command::BindImageMemory2
            | Command::CreateBuffer
            | Command::CreateImage
            | Command::CreateImageView
            | Command::CreateSwapchainKHR
            | Command::GetSwapchainImagesKHR
            | Command::CreateShaderModule
            | Command::CreateDescriptorSetLayout
            | Command::CreatePipelineLayout
            | Command::CreateGraphicsPipelines
            | Command::CreateComputePipelines
            | Command::CreateShadersEXT
            | Command::CreateDescriptorPool
            | Command::CreateCommandPool => Phases::empty(),
            _ => Phases::RECORD,
        }
    }

    fn pre_call_record(&mut self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        let objects = self.synchronized_objects(call);
        for raw in &objects {
            self.claim(*raw, record);
        }
        scratch.claimed = objects;
    }

    fn post_call_record(&mut self, _call: &mut Call, _record: &RecordObject, scratch: &mut CallScratch) {
        for raw in std::mem::take(&mut scratch.claimed) {
            self.release(raw);
        }
    }

    fn teardown(&mut self) {
        self.in_use.clear();
    }
}
