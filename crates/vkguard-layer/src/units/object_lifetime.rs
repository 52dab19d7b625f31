//! Handle validity: every non-dispatchable handle passed to a call must be
//! one this unit saw created and not yet destroyed, and every object still
//! alive when its device or instance goes away is reported as leaked.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_core::{ErrorObject, RecordObject, Reporter};
use vkguard_state::TypedHandle;

use super::Scope;
use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_DEVICE_LEAK: &str = "VUID-vkDestroyDevice-device-05137";
pub const VUID_INSTANCE_LEAK: &str = "VUID-vkDestroyInstance-instance-00629";
pub const VUID_FREE_COMMAND_BUFFERS_PARENT: &str = "VUID-vkFreeCommandBuffers-pCommandBuffers-parent";
pub const VUID_FREE_DESCRIPTOR_SETS_PARENT: &str = "VUID-vkFreeDescriptorSets-pDescriptorSets-parent";

#[derive(Debug, Clone, Copy)]
struct Tracked {
    ty: vk::ObjectType,
    /// Pool or swapchain the object was allocated from.
    parent: Option<u64>,
}

/// One handle argument to check.
struct Param {
    /// Structure the member lives in; `None` for direct call parameters.
    scope: Option<&'static str>,
    name: &'static str,
    handle: TypedHandle,
    nullable: bool,
}

impl Param {
    fn new<H: Handle>(name: &'static str, handle: H) -> Self {
        Self {
            scope: None,
            name,
            handle: TypedHandle::from_handle(handle),
            nullable: false,
        }
    }

    fn nullable<H: Handle>(name: &'static str, handle: H) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, handle)
        }
    }

    fn member<H: Handle>(scope: &'static str, name: &'static str, handle: H) -> Self {
        Self {
            scope: Some(scope),
            ..Self::new(name, handle)
        }
    }

    fn vuid(&self, function: &str) -> String {
        format!("VUID-{}-{}-parameter", self.scope.unwrap_or(function), self.name)
    }
}

pub struct ObjectLifetime {
    scope: Scope,
    reporter: Arc<Reporter>,
    objects: HashMap<u64, Tracked>,
}

impl ObjectLifetime {
    pub fn new(scope: Scope, reporter: Arc<Reporter>) -> Self {
        Self {
            scope,
            reporter,
            objects: HashMap::new(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.objects.len()
    }

    fn add<H: Handle + Copy>(&mut self, handle: H, parent: Option<u64>) {
        if handle.is_null() {
            return;
        }
        self.objects.insert(
            handle.as_raw(),
            Tracked {
                ty: H::TYPE,
                parent,
            },
        );
    }

    fn remove<H: Handle + Copy>(&mut self, handle: H) {
        self.objects.remove(&handle.as_raw());
    }

    fn remove_children(&mut self, parent: u64) {
        self.objects.retain(|_, tracked| tracked.parent != Some(parent));
    }

    fn params(call: &Call) -> Vec<Param> {
        let mut params = Vec::new();
        match call {
            Call::GetPhysicalDeviceProperties { physical_device, .. }
            | Call::CreateDevice { physical_device, .. } => params.push(Param::new("physicalDevice", *physical_device)),
            Call::FreeMemory { memory } => params.push(Param::nullable("memory", *memory)),
            Call::MapMemory { memory, .. } | Call::UnmapMemory { memory } => {
                params.push(Param::new("memory", *memory))
            }
            Call::BindBufferMemory { buffer, memory, .. } => {
                params.push(Param::new("buffer", *buffer));
                params.push(Param::new("memory", *memory));
            }
            Call::BindImageMemory { binds } => {
                for bind in binds {
                    params.push(Param::member("VkBindImageMemoryInfo", "image", bind.image));
                    if bind.swapchain.is_none() {
                        params.push(Param::member("VkBindImageMemoryInfo", "memory", bind.memory));
                    }
                }
            }
            Call::DestroyBuffer { buffer } => params.push(Param::nullable("buffer", *buffer)),
            Call::DestroyImage { image } => params.push(Param::nullable("image", *image)),
            Call::CreateImageView { image, .. } => {
                params.push(Param::member("VkImageViewCreateInfo", "image", *image))
            }
            Call::DestroyImageView { view } => params.push(Param::nullable("imageView", *view)),
            Call::CreateSwapchain { desc, .. } => {
                if !desc.old_swapchain.is_null() {
                    params.push(Param::member("VkSwapchainCreateInfoKHR", "oldSwapchain", desc.old_swapchain));
                }
            }
            Call::DestroySwapchain { swapchain } => params.push(Param::nullable("swapchain", *swapchain)),
            Call::GetSwapchainImages { swapchain, .. } | Call::AcquireNextImage { swapchain, .. } => {
                params.push(Param::new("swapchain", *swapchain))
            }
            Call::QueuePresent { presents, .. } => {
                for (swapchain, _) in presents {
                    params.push(Param::member("VkPresentInfoKHR", "pSwapchains", *swapchain));
                }
            }
            Call::DestroyShaderModule { module } => params.push(Param::nullable("shaderModule", *module)),
            Call::DestroySetLayout { layout } => params.push(Param::nullable("descriptorSetLayout", *layout)),
            Call::CreatePipelineLayout { set_layouts, .. } => {
                for layout in set_layouts {
                    // Graphics pipeline libraries allow null entries.
                    params.push(Param {
                        nullable: true,
                        ..Param::member("VkPipelineLayoutCreateInfo", "pSetLayouts", *layout)
                    });
                }
            }
            Call::DestroyPipelineLayout { layout } => params.push(Param::nullable("pipelineLayout", *layout)),
            Call::CreatePipelines {
                bind_point, pipelines, ..
            } => {
                let scope = if *bind_point == vk::PipelineBindPoint::COMPUTE {
                    "VkComputePipelineCreateInfo"
                } else {
                    "VkGraphicsPipelineCreateInfo"
                };
                for desc in pipelines {
                    if !desc.layout.is_null() {
                        params.push(Param::member(scope, "layout", desc.layout));
                    }
                    for stage in &desc.stages {
                        params.push(Param {
                            nullable: true,
                            ..Param::member("VkPipelineShaderStageCreateInfo", "module", stage.module)
                        });
                    }
                }
            }
            Call::DestroyPipeline { pipeline } => params.push(Param::nullable("pipeline", *pipeline)),
            Call::CreateShaders { shaders, .. } => {
                for shader in shaders {
                    for layout in &shader.set_layouts {
                        params.push(Param::member("VkShaderCreateInfoEXT", "pSetLayouts", *layout));
                    }
                }
            }
            Call::DestroyShader { shader } => params.push(Param::nullable("shader", *shader)),
            Call::DestroyDescriptorPool { pool } => params.push(Param::nullable("descriptorPool", *pool)),
            Call::ResetDescriptorPool { pool } => params.push(Param::new("descriptorPool", *pool)),
            Call::AllocateDescriptorSets { pool, layouts, .. } => {
                params.push(Param::member("VkDescriptorSetAllocateInfo", "descriptorPool", *pool));
                for layout in layouts {
                    params.push(Param::member("VkDescriptorSetAllocateInfo", "pSetLayouts", *layout));
                }
            }
            Call::FreeDescriptorSets { pool, sets } => {
                params.push(Param::new("descriptorPool", *pool));
                for set in sets {
                    params.push(Param::nullable("pDescriptorSets", *set));
                }
            }
            Call::DestroyCommandPool { pool } => params.push(Param::nullable("commandPool", *pool)),
            Call::ResetCommandPool { pool } => params.push(Param::new("commandPool", *pool)),
            Call::AllocateCommandBuffers { pool, .. } => {
                params.push(Param::member("VkCommandBufferAllocateInfo", "commandPool", *pool))
            }
            Call::FreeCommandBuffers { pool, buffers } => {
                params.push(Param::new("commandPool", *pool));
                for cb in buffers {
                    params.push(Param::nullable("pCommandBuffers", *cb));
                }
            }
            Call::QueueSubmit { batches, fence, .. } => {
                for cb in batches.iter().flatten() {
                    params.push(Param::member("VkSubmitInfo", "pCommandBuffers", *cb));
                }
                params.push(Param::nullable("fence", *fence));
            }
            Call::CmdBindPipeline { pipeline, .. } => params.push(Param::new("pipeline", *pipeline)),
            Call::CmdBindDescriptorSets { layout, sets, .. } => {
                params.push(Param::new("layout", *layout));
                for set in sets {
                    params.push(Param::nullable("pDescriptorSets", *set));
                }
            }
            Call::CmdBindShaders { shaders, .. } => {
                for shader in shaders {
                    params.push(Param::nullable("pShaders", *shader));
                }
            }
            Call::CmdCopyBuffer { src, dst, .. } => {
                params.push(Param::new("srcBuffer", *src));
                params.push(Param::new("dstBuffer", *dst));
            }
            Call::CmdFillBuffer { dst, .. } => params.push(Param::new("dstBuffer", *dst)),
            Call::CmdPipelineBarrier { buffer_barriers, .. } => {
                for barrier in buffer_barriers {
                    params.push(Param::member("VkBufferMemoryBarrier", "buffer", barrier.buffer));
                }
            }
            _ => {}
        }
        // Recording calls also name the command buffer itself.
        if let Some(cb) = call.command_buffer() {
            params.push(Param::new("commandBuffer", cb));
        }
        params
    }

    fn check_params(&self, call: &Call, error: &ErrorObject) -> bool {
        let mut skip = false;
        for param in Self::params(call) {
            let raw = param.handle.raw;
            if raw == 0 {
                if !param.nullable {
                    skip |= self.reporter.log_error(
                        &param.vuid(error.location.function),
                        &[],
                        &error.location.dot(param.name),
                        "handle must not be VK_NULL_HANDLE",
                    );
                }
                continue;
            }
            if !self.objects.contains_key(&raw) {
                skip |= self.reporter.log_error(
                    &param.vuid(error.location.function),
                    &[raw],
                    &error.location.dot(param.name),
                    format_args!("invalid {:?} object 0x{raw:x}", param.handle.ty),
                );
            }
        }
        skip
    }

    fn check_parent<H: Handle + Copy>(
        &self,
        children: &[H],
        parent: u64,
        vuid: &str,
        field: &'static str,
        error: &ErrorObject,
    ) -> bool {
        let mut skip = false;
        for child in children {
            let raw = child.as_raw();
            let Some(tracked) = self.objects.get(&raw) else {
                continue;
            };
            if tracked.parent.is_some_and(|p| p != parent) {
                skip |= self.reporter.log_error(
                    vuid,
                    &[raw, parent],
                    &error.location.dot(field),
                    format_args!("0x{raw:x} was not allocated from 0x{parent:x}"),
                );
            }
        }
        skip
    }

    /// Top-level objects still alive. Pool-allocated objects and swapchain
    /// images go away with their parent.
    fn leaked(&self) -> Vec<(u64, vk::ObjectType)> {
        let mut leaked: Vec<(u64, vk::ObjectType)> = self
            .objects
            .iter()
            .filter(|(_, t)| t.parent.is_none())
            .filter(|(_, t)| !matches!(t.ty, vk::ObjectType::QUEUE | vk::ObjectType::PHYSICAL_DEVICE))
            .map(|(raw, t)| (*raw, t.ty))
            .collect();
        leaked.sort_unstable_by_key(|(raw, _)| *raw);
        leaked
    }

    fn report_leaks(&self, call: &Call, error: &ErrorObject) -> bool {
        match call {
            Call::DestroyDevice { device } => {
                for (raw, ty) in self.leaked() {
                    self.reporter.log_error(
                        VUID_DEVICE_LEAK,
                        &[device.as_raw(), raw],
                        &error.location,
                        format_args!("{ty:?} 0x{raw:x} has not been destroyed"),
                    );
                }
            }
            Call::DestroyInstance { instance, live_devices } => {
                for device in live_devices {
                    self.reporter.log_error(
                        VUID_INSTANCE_LEAK,
                        &[instance.as_raw(), device.as_raw()],
                        &error.location,
                        format_args!("VkDevice 0x{:x} has not been destroyed", device.as_raw()),
                    );
                }
            }
            _ => {}
        }
        // Leaks never stop a teardown call.
        false
    }

    fn record_destroy(&mut self, call: &Call) {
        match call {
            Call::FreeMemory { memory } => self.remove(*memory),
            Call::DestroyBuffer { buffer } => self.remove(*buffer),
            Call::DestroyImage { image } => self.remove(*image),
            Call::DestroyImageView { view } => self.remove(*view),
            Call::DestroySwapchain { swapchain } => {
                self.remove_children(swapchain.as_raw());
                self.remove(*swapchain);
            }
            Call::DestroyShaderModule { module } => self.remove(*module),
            Call::DestroySetLayout { layout } => self.remove(*layout),
            Call::DestroyPipelineLayout { layout } => self.remove(*layout),
            Call::DestroyPipeline { pipeline } => self.remove(*pipeline),
            Call::DestroyShader { shader } => self.remove(*shader),
            Call::DestroyDescriptorPool { pool } => {
                self.remove_children(pool.as_raw());
                self.remove(*pool);
            }
            Call::ResetDescriptorPool { pool } => self.remove_children(pool.as_raw()),
            Call::FreeDescriptorSets { sets, .. } => {
                for set in sets {
                    self.remove(*set);
                }
            }
            Call::DestroyCommandPool { pool } => {
                self.remove_children(pool.as_raw());
                self.remove(*pool);
            }
            Call::FreeCommandBuffers { buffers, .. } => {
                for cb in buffers {
                    self.remove(*cb);
                }
            }
            Call::DestroyDevice { .. } | Call::DestroyInstance { .. } => self.objects.clear(),
            _ => {}
        }
    }

    fn record_create(&mut self, call: &Call, record: &RecordObject) {
        let ok = record.succeeded();
        match call {
            Call::EnumeratePhysicalDevices { devices, .. } if ok => {
                for device in devices {
                    self.add(*device, None);
                }
            }
            Call::GetDeviceQueue { queue, .. } => self.add(*queue, None),
            Call::AllocateMemory { memory, .. } if ok => self.add(*memory, None),
            Call::CreateBuffer { buffer, .. } if ok => self.add(*buffer, None),
            Call::CreateImage { image, .. } if ok => self.add(*image, None),
            Call::CreateImageView { view, .. } if ok => self.add(*view, None),
            Call::CreateSwapchain { swapchain, .. } if ok => self.add(*swapchain, None),
            Call::GetSwapchainImages { swapchain, images } if ok => {
                for image in images {
                    self.add(*image, Some(swapchain.as_raw()));
                }
            }
            Call::CreateShaderModule { module, .. } if ok => self.add(*module, None),
            Call::CreateSetLayout { layout, .. } if ok => self.add(*layout, None),
            Call::CreatePipelineLayout { layout, .. } if ok => self.add(*layout, None),
            Call::CreatePipelines { created, .. } => {
                for pipeline in created {
                    self.add(*pipeline, None);
                }
            }
            Call::CreateShaders { created, .. } => {
                for shader in created {
                    self.add(*shader, None);
                }
            }
            Call::CreateDescriptorPool { pool, .. } if ok => self.add(*pool, None),
            Call::AllocateDescriptorSets { pool, sets, .. } if ok => {
                for set in sets {
                    self.add(*set, Some(pool.as_raw()));
                }
            }
            Call::CreateCommandPool { pool, .. } if ok => self.add(*pool, None),
            Call::AllocateCommandBuffers { pool, buffers, .. } if ok => {
                for cb in buffers {
                    self.add(*cb, Some(pool.as_raw()));
                }
            }
            _ => {}
        }
    }
}

impl ValidationObject for ObjectLifetime {
    fn kind(&self) -> UnitKind {
        UnitKind::ObjectLifetime
    }

    fn intercepts(&self, command: Command) -> Phases {
        match (self.scope, command) {
            (Scope::Instance, Command::GetPhysicalDeviceProperties)
            | (Scope::Instance, Command::GetPhysicalDeviceProperties2)
            | (Scope::Instance, Command::CreateDevice) => Phases::VALIDATE,
            (Scope::Instance, Command::EnumeratePhysicalDevices) => Phases::RECORD_AFTER,
            (Scope::Instance, Command::DestroyInstance) => Phases::VALIDATE | Phases::RECORD_BEFORE,
            (Scope::Instance, _) => Phases::empty(),
            // Instance-level calls never reach a device chain.
            (
                Scope::Device,
                Command::CreateInstance
                | Command::DestroyInstance
                | Command::EnumeratePhysicalDevices
                | Command::GetPhysicalDeviceProperties
                | Command::GetPhysicalDeviceProperties2
                | Command::CreateDevice
                | Command::DestroySurfaceKHR,
            ) => Phases::empty(),
            (Scope::Device, Command::DeviceWaitIdle | Command::QueueWaitIdle) => Phases::empty(),
            (Scope::Device, _) => Phases::all(),
        }
    }

    fn pre_call_validate(&self, call: &Call, error: &ErrorObject) -> bool {
        let mut skip = self.check_params(call, error);
        match call {
            Call::FreeCommandBuffers { pool, buffers } => {
                skip |= self.check_parent(
                    buffers,
                    pool.as_raw(),
                    VUID_FREE_COMMAND_BUFFERS_PARENT,
                    "pCommandBuffers",
                    error,
                );
            }
            Call::FreeDescriptorSets { pool, sets } => {
                skip |= self.check_parent(
                    sets,
                    pool.as_raw(),
                    VUID_FREE_DESCRIPTOR_SETS_PARENT,
                    "pDescriptorSets",
                    error,
                );
            }
            Call::DestroyDevice { .. } | Call::DestroyInstance { .. } => {
                skip |= self.report_leaks(call, error);
            }
            _ => {}
        }
        skip
    }

    fn pre_call_record(&mut self, call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {
        self.record_destroy(call);
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        self.record_create(call, record);
    }

    fn teardown(&mut self) {
        self.objects.clear();
    }
}
