//! Parameter checks that need nothing but the call itself and the device
//! limits.

use std::collections::HashSet;
use std::sync::Arc;

use ash::vk;
use vkguard_core::{ErrorObject, Reporter};
use vkguard_gpuav::spirv::MAGIC;

use crate::call::Call;
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_EXTENSION_DUPLICATE: &str = "VKGUARD-extension-duplicate";
pub const VUID_EXTENSION_WRONG_LEVEL: &str = "VKGUARD-extension-wrong-level";

/// Extensions that only exist at instance level.
const INSTANCE_ONLY_EXTENSIONS: &[&str] = &[
    "VK_KHR_surface",
    "VK_KHR_win32_surface",
    "VK_KHR_xlib_surface",
    "VK_KHR_xcb_surface",
    "VK_KHR_wayland_surface",
    "VK_KHR_android_surface",
    "VK_EXT_metal_surface",
    "VK_KHR_get_physical_device_properties2",
    "VK_KHR_get_surface_capabilities2",
    "VK_EXT_debug_utils",
    "VK_EXT_debug_report",
    "VK_EXT_validation_features",
    "VK_EXT_layer_settings",
    "VK_KHR_portability_enumeration",
];

/// Extensions that only exist at device level.
const DEVICE_ONLY_EXTENSIONS: &[&str] = &[
    "VK_KHR_swapchain",
    "VK_EXT_shader_object",
    "VK_KHR_dynamic_rendering",
    "VK_KHR_synchronization2",
    "VK_KHR_maintenance1",
    "VK_KHR_bind_memory2",
    "VK_EXT_descriptor_indexing",
];

pub struct Stateless {
    reporter: Arc<Reporter>,
    /// `None` on the instance chain.
    limits: Option<vk::PhysicalDeviceLimits>,
}

impl Stateless {
    pub fn for_instance(reporter: Arc<Reporter>) -> Self {
        Self { reporter, limits: None }
    }

    pub fn for_device(reporter: Arc<Reporter>, limits: vk::PhysicalDeviceLimits) -> Self {
        Self {
            reporter,
            limits: Some(limits),
        }
    }

    /// Unknown or misplaced extension names are warnings only.
    fn check_extensions(&self, extensions: &[String], wrong_level: &[&str], error: &ErrorObject) {
        let mut seen = HashSet::new();
        for name in extensions {
            if !seen.insert(name.as_str()) {
                self.reporter.log_warning(
                    VUID_EXTENSION_DUPLICATE,
                    &[],
                    &error.location.dot("ppEnabledExtensionNames"),
                    format_args!("{name} is enabled more than once"),
                );
            }
            if wrong_level.contains(&name.as_str()) {
                self.reporter.log_warning(
                    VUID_EXTENSION_WRONG_LEVEL,
                    &[],
                    &error.location.dot("ppEnabledExtensionNames"),
                    format_args!("{name} is not an extension of this level and is ignored by the driver"),
                );
            }
        }
    }

    fn check_buffer(&self, call: &Call, error: &ErrorObject) -> bool {
        let Call::CreateBuffer { desc, .. } = call else {
            return false;
        };
        let info = error.location.dot("pCreateInfo");
        let mut skip = false;
        if desc.size == 0 {
            skip |= self.reporter.log_error(
                "VUID-VkBufferCreateInfo-size-00912",
                &[],
                &info.dot("size"),
                "is zero",
            );
        }
        if desc.usage.is_empty() {
            skip |= self.reporter.log_error(
                "VUID-VkBufferCreateInfo-usage-requiredbitmask",
                &[],
                &info.dot("usage"),
                "is zero",
            );
        }
        skip
    }

    fn check_image(&self, call: &Call, error: &ErrorObject) -> bool {
        let Call::CreateImage { desc, .. } = call else {
            return false;
        };
        let info = error.location.dot("pCreateInfo");
        let mut skip = false;
        let extent = desc.extent;
        for (vuid, field, value) in [
            ("VUID-VkImageCreateInfo-extent-00944", "extent.width", extent.width),
            ("VUID-VkImageCreateInfo-extent-00945", "extent.height", extent.height),
            ("VUID-VkImageCreateInfo-extent-00946", "extent.depth", extent.depth),
        ] {
            if value == 0 {
                skip |= self.reporter.log_error(vuid, &[], &info.dot(field), "is zero");
            }
        }
        if desc.mip_levels == 0 {
            skip |= self.reporter.log_error(
                "VUID-VkImageCreateInfo-mipLevels-00947",
                &[],
                &info.dot("mipLevels"),
                "is zero",
            );
        }
        if desc.array_layers == 0 {
            skip |= self.reporter.log_error(
                "VUID-VkImageCreateInfo-arrayLayers-00948",
                &[],
                &info.dot("arrayLayers"),
                "is zero",
            );
        }
        skip
    }

    fn check_shader_code(&self, code_size: usize, code: &[u32], error: &ErrorObject) -> bool {
        let info = error.location.dot("pCreateInfo");
        let mut skip = false;
        if code_size == 0 || code_size % 4 != 0 {
            skip |= self.reporter.log_error(
                "VUID-VkShaderModuleCreateInfo-codeSize-08735",
                &[],
                &info.dot("codeSize"),
                format_args!("({code_size}) must be a non-zero multiple of 4"),
            );
        }
        if code.first().is_some_and(|w| *w != MAGIC) {
            skip |= self.reporter.log_error(
                "VUID-VkShaderModuleCreateInfo-pCode-08738",
                &[],
                &info.dot("pCode"),
                format_args!("does not start with the SPIR-V magic number 0x{MAGIC:08x}"),
            );
        }
        skip
    }

    fn check_device_call(&self, call: &Call, limits: &vk::PhysicalDeviceLimits, error: &ErrorObject) -> bool {
        let location = &error.location;
        match call {
            Call::CreateBuffer { .. } => self.check_buffer(call, error),
            Call::CreateImage { .. } => self.check_image(call, error),
            Call::AllocateMemory { size, .. } if *size == 0 => self.reporter.log_error(
                "VUID-VkMemoryAllocateInfo-allocationSize-07897",
                &[],
                &location.dot("pAllocateInfo").dot("allocationSize"),
                "is zero",
            ),
            Call::CreateShaderModule { code_size, code, .. } => self.check_shader_code(*code_size, code, error),
            Call::CreateDescriptorPool { max_sets, .. } if *max_sets == 0 => self.reporter.log_error(
                "VUID-VkDescriptorPoolCreateInfo-maxSets-00301",
                &[],
                &location.dot("pCreateInfo").dot("maxSets"),
                "is zero",
            ),
            Call::CreatePipelineLayout { app_set_count, .. }
                if *app_set_count > limits.max_bound_descriptor_sets =>
            {
                self.reporter.log_error(
                    "VUID-VkPipelineLayoutCreateInfo-setLayoutCount-00286",
                    &[],
                    &location.dot("pCreateInfo").dot("setLayoutCount"),
                    format_args!(
                        "({app_set_count}) exceeds maxBoundDescriptorSets ({})",
                        limits.max_bound_descriptor_sets
                    ),
                )
            }
            Call::CreateSwapchain { desc, .. } if desc.image_array_layers == 0 => self.reporter.log_error(
                "VUID-VkSwapchainCreateInfoKHR-imageArrayLayers-01275",
                &[],
                &location.dot("pCreateInfo").dot("imageArrayLayers"),
                "is zero",
            ),
            Call::AllocateCommandBuffers { count, .. } if *count == 0 => self.reporter.log_error(
                "VUID-VkCommandBufferAllocateInfo-commandBufferCount-arraylength",
                &[],
                &location.dot("pAllocateInfo").dot("commandBufferCount"),
                "is zero",
            ),
            Call::CmdFillBuffer { offset, size, .. } => {
                let mut skip = false;
                if offset % 4 != 0 {
                    skip |= self.reporter.log_error(
                        "VUID-vkCmdFillBuffer-dstOffset-00025",
                        &[],
                        &location.dot("dstOffset"),
                        format_args!("({offset}) is not a multiple of 4"),
                    );
                }
                if *size != vk::WHOLE_SIZE && (*size == 0 || size % 4 != 0) {
                    skip |= self.reporter.log_error(
                        "VUID-vkCmdFillBuffer-size-00026",
                        &[],
                        &location.dot("size"),
                        format_args!("({size}) must be VK_WHOLE_SIZE or a non-zero multiple of 4"),
                    );
                }
                skip
            }
            Call::CmdCopyBuffer { regions, .. } => {
                let mut skip = false;
                if regions.is_empty() {
                    skip |= self.reporter.log_error(
                        "VUID-vkCmdCopyBuffer-regionCount-arraylength",
                        &[],
                        &location.dot("regionCount"),
                        "is zero",
                    );
                }
                for (i, region) in regions.iter().enumerate() {
                    if region.size == 0 {
                        skip |= self.reporter.log_error(
                            "VUID-VkBufferCopy-size-01988",
                            &[],
                            &location.index("pRegions", i as u32).dot("size"),
                            "is zero",
                        );
                    }
                }
                skip
            }
            Call::CmdDispatch { group_count, .. } => {
                let mut skip = false;
                let max = limits.max_compute_work_group_count;
                for (axis, (count, max)) in group_count.iter().zip(max).enumerate() {
                    if *count > max {
                        let vuid = match axis {
                            0 => "VUID-vkCmdDispatch-groupCountX-00386",
                            1 => "VUID-vkCmdDispatch-groupCountY-00387",
                            _ => "VUID-vkCmdDispatch-groupCountZ-00388",
                        };
                        skip |= self.reporter.log_error(
                            vuid,
                            &[],
                            location,
                            format_args!("group count {count} exceeds maxComputeWorkGroupCount[{axis}] ({max})"),
                        );
                    }
                }
                skip
            }
            _ => false,
        }
    }
}

impl ValidationObject for Stateless {
    fn kind(&self) -> UnitKind {
        UnitKind::Stateless
    }

    fn intercepts(&self, command: Command) -> Phases {
        let instance_level = matches!(command, Command::CreateInstance | Command::CreateDevice);
        let device_level = matches!(
            command,
            Command::CreateBuffer
                | Command::CreateImage
                | Command::AllocateMemory
                | Command::CreateShaderModule
                | Command::CreateDescriptorPool
                | Command::CreatePipelineLayout
                | Command::CreateSwapchainKHR
                | Command::AllocateCommandBuffers
                | Command::CmdFillBuffer
                | Command::CmdCopyBuffer
                | Command::CmdDispatch
        );
        let wanted = match self.limits {
            None => instance_level,
            Some(_) => device_level,
        };
        if wanted {
            Phases::VALIDATE
        } else {
            Phases::empty()
        }
    }

    fn pre_call_validate(&self, call: &Call, error: &ErrorObject) -> bool {
        match (call, &self.limits) {
            (Call::CreateInstance { extensions, .. }, None) => {
                self.check_extensions(extensions, DEVICE_ONLY_EXTENSIONS, error);
                false
            }
            (Call::CreateDevice { extensions, .. }, None) => {
                self.check_extensions(extensions, INSTANCE_ONLY_EXTENSIONS, error);
                false
            }
            (_, Some(limits)) => self.check_device_call(call, limits, error),
            _ => false,
        }
    }
}
