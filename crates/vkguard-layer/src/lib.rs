//! vkguard Vulkan validation layer
//!
//! This cdylib sits between the application and the driver in the Vulkan
//! loader chain. Every intercepted call runs through the validation units
//! attached to its instance or device before being forwarded to the next
//! layer down.
#![allow(non_snake_case)]

use std::ffi::{c_char, c_void, CStr};

use ash::vk;

/// Context of the device behind a dispatchable handle, or early return.
macro_rules! device_context {
    ($handle:expr, $fail:expr) => {
        // SAFETY: the loader only passes live dispatchable handles.
        match unsafe { $crate::context::device_for($handle) } {
            Some(ctx) => ctx,
            None => {
                tracing::error!(handle = ?$handle, "call on a device the layer never saw");
                return $fail;
            }
        }
    };
}

/// Instance-level counterpart of `device_context!`.
macro_rules! instance_context {
    ($handle:expr, $fail:expr) => {
        // SAFETY: see device_context!.
        match unsafe { $crate::context::instance_for($handle) } {
            Some(ctx) => ctx,
            None => {
                tracing::error!(handle = ?$handle, "call on an instance the layer never saw");
                return $fail;
            }
        }
    };
}

pub mod call;
pub mod chassis;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod swapchain;
pub mod sync;
pub mod units;

/// Name the layer is registered under.
pub const LAYER_NAME: &str = "VK_LAYER_VKGUARD_validation";
pub const LAYER_DESCRIPTION: &str = "vkguard validation layer";
/// Loader-layer interface version implemented here.
pub const LOADER_INTERFACE_VERSION: u32 = 2;
/// Instance extension the layer implements itself.
pub const VALIDATION_FEATURES_EXTENSION: &str = "VK_EXT_validation_features";
pub const VALIDATION_FEATURES_SPEC_VERSION: u32 = 6;

pub type VoidFunction = unsafe extern "system" fn();

/// How the device-level resolver answers a name.
#[derive(Debug, Clone, Copy)]
pub enum DeviceResolution {
    /// The layer intercepts the call.
    Layer(VoidFunction),
    /// Not intercepted: ask the next layer.
    Forward,
    /// An instance-level call asked for at device level.
    Rejected,
}

impl DeviceResolution {
    pub fn is_rejected(&self) -> bool {
        matches!(self, DeviceResolution::Rejected)
    }

    pub fn is_layer(&self) -> bool {
        matches!(self, DeviceResolution::Layer(_))
    }
}

/// Instance-extension commands that dispatch on a device handle and may be
/// resolved through `vkGetDeviceProcAddr`.
pub const DEVICE_ALLOWLIST: &[&str] = &[
    "vkSetDebugUtilsObjectNameEXT",
    "vkSetDebugUtilsObjectTagEXT",
    "vkQueueBeginDebugUtilsLabelEXT",
    "vkQueueEndDebugUtilsLabelEXT",
    "vkQueueInsertDebugUtilsLabelEXT",
    "vkCmdBeginDebugUtilsLabelEXT",
    "vkCmdEndDebugUtilsLabelEXT",
    "vkCmdInsertDebugUtilsLabelEXT",
];

/// Instance-level and global command names.
const INSTANCE_LEVEL: &[&str] = &[
    "vkCreateInstance",
    "vkDestroyInstance",
    "vkEnumeratePhysicalDevices",
    "vkEnumeratePhysicalDeviceGroups",
    "vkEnumeratePhysicalDeviceGroupsKHR",
    "vkGetInstanceProcAddr",
    "vkEnumerateInstanceVersion",
    "vkEnumerateInstanceLayerProperties",
    "vkEnumerateInstanceExtensionProperties",
    "vkEnumerateDeviceLayerProperties",
    "vkEnumerateDeviceExtensionProperties",
    "vkCreateDevice",
    "vkDestroySurfaceKHR",
    "vkCreateDebugUtilsMessengerEXT",
    "vkDestroyDebugUtilsMessengerEXT",
    "vkSubmitDebugUtilsMessageEXT",
    "vkCreateDebugReportCallbackEXT",
    "vkDestroyDebugReportCallbackEXT",
    "vkDebugReportMessageEXT",
    "vkSetDebugUtilsObjectNameEXT",
    "vkSetDebugUtilsObjectTagEXT",
    "vkQueueBeginDebugUtilsLabelEXT",
    "vkQueueEndDebugUtilsLabelEXT",
    "vkQueueInsertDebugUtilsLabelEXT",
    "vkCmdBeginDebugUtilsLabelEXT",
    "vkCmdEndDebugUtilsLabelEXT",
    "vkCmdInsertDebugUtilsLabelEXT",
];

/// True for instance-level and global commands, including every
/// `vkGetPhysicalDevice*` query and surface creation.
pub fn is_instance_level(name: &str) -> bool {
    INSTANCE_LEVEL.contains(&name)
        || name.starts_with("vkGetPhysicalDevice")
        || (name.starts_with("vkCreate") && name.ends_with("SurfaceKHR"))
}

macro_rules! proc_table {
    ($name:expr, { $($sym:literal => $f:path),* $(,)? }) => {
        match $name {
            $(
                // SAFETY: every entry is an `extern "system"` fn; the loader
                // casts it back to the matching PFN type.
                $sym => Some(unsafe { std::mem::transmute::<*const (), VoidFunction>($f as *const ()) }),
            )*
            _ => None,
        }
    };
}

/// Loader-interface and global entry points.
fn global_proc(name: &str) -> Option<VoidFunction> {
    proc_table!(name, {
        "vkGetInstanceProcAddr" => vkGetInstanceProcAddr,
        "vkGetDeviceProcAddr" => vkGetDeviceProcAddr,
        "vk_layerGetPhysicalDeviceProcAddr" => vk_layerGetPhysicalDeviceProcAddr,
        "vkNegotiateLoaderLayerInterfaceVersion" => vkNegotiateLoaderLayerInterfaceVersion,
        // ── Instance ────────────────────────────────────────
        "vkCreateInstance" => instance::vkCreateInstance,
        "vkDestroyInstance" => instance::vkDestroyInstance,
        "vkEnumeratePhysicalDevices" => instance::vkEnumeratePhysicalDevices,
        "vkDestroySurfaceKHR" => instance::vkDestroySurfaceKHR,
        "vkEnumerateInstanceLayerProperties" => instance::vkEnumerateInstanceLayerProperties,
        "vkEnumerateInstanceExtensionProperties" => instance::vkEnumerateInstanceExtensionProperties,
        "vkEnumerateDeviceLayerProperties" => instance::vkEnumerateDeviceLayerProperties,
        "vkEnumerateDeviceExtensionProperties" => instance::vkEnumerateDeviceExtensionProperties,
        "vkCreateDevice" => device::vkCreateDevice,
    })
}

/// Intercepted commands that dispatch on a physical device.
pub fn physical_device_proc(name: &str) -> Option<VoidFunction> {
    proc_table!(name, {
        "vkGetPhysicalDeviceProperties" => physical_device::vkGetPhysicalDeviceProperties,
        "vkGetPhysicalDeviceProperties2" => physical_device::vkGetPhysicalDeviceProperties2,
        "vkGetPhysicalDeviceProperties2KHR" => physical_device::vkGetPhysicalDeviceProperties2,
        "vkGetPhysicalDeviceToolProperties" => physical_device::vkGetPhysicalDeviceToolProperties,
        "vkGetPhysicalDeviceToolPropertiesEXT" => physical_device::vkGetPhysicalDeviceToolProperties,
    })
}

/// Intercepted device-level commands.
pub fn device_proc(name: &str) -> Option<VoidFunction> {
    proc_table!(name, {
        "vkGetDeviceProcAddr" => vkGetDeviceProcAddr,
        // ── Device and queues ───────────────────────────────
        "vkDestroyDevice" => device::vkDestroyDevice,
        "vkGetDeviceQueue" => device::vkGetDeviceQueue,
        "vkQueueSubmit" => sync::vkQueueSubmit,
        "vkQueueWaitIdle" => sync::vkQueueWaitIdle,
        "vkDeviceWaitIdle" => sync::vkDeviceWaitIdle,
        // ── Memory ──────────────────────────────────────────
        "vkAllocateMemory" => memory::vkAllocateMemory,
        "vkFreeMemory" => memory::vkFreeMemory,
        "vkMapMemory" => memory::vkMapMemory,
        "vkUnmapMemory" => memory::vkUnmapMemory,
        "vkBindBufferMemory" => memory::vkBindBufferMemory,
        "vkCreateBuffer" => memory::vkCreateBuffer,
        "vkDestroyBuffer" => memory::vkDestroyBuffer,
        // ── Images ──────────────────────────────────────────
        "vkCreateImage" => image::vkCreateImage,
        "vkDestroyImage" => image::vkDestroyImage,
        "vkBindImageMemory" => image::vkBindImageMemory,
        "vkBindImageMemory2" => image::vkBindImageMemory2,
        "vkBindImageMemory2KHR" => image::vkBindImageMemory2,
        "vkCreateImageView" => image::vkCreateImageView,
        "vkDestroyImageView" => image::vkDestroyImageView,
        // ── Swapchain ───────────────────────────────────────
        "vkCreateSwapchainKHR" => swapchain::vkCreateSwapchainKHR,
        "vkDestroySwapchainKHR" => swapchain::vkDestroySwapchainKHR,
        "vkGetSwapchainImagesKHR" => swapchain::vkGetSwapchainImagesKHR,
        "vkAcquireNextImageKHR" => swapchain::vkAcquireNextImageKHR,
        "vkQueuePresentKHR" => swapchain::vkQueuePresentKHR,
        // ── Shaders and pipelines ───────────────────────────
        "vkCreateShaderModule" => pipeline::vkCreateShaderModule,
        "vkDestroyShaderModule" => pipeline::vkDestroyShaderModule,
        "vkCreatePipelineLayout" => pipeline::vkCreatePipelineLayout,
        "vkDestroyPipelineLayout" => pipeline::vkDestroyPipelineLayout,
        "vkCreateGraphicsPipelines" => pipeline::vkCreateGraphicsPipelines,
        "vkCreateComputePipelines" => pipeline::vkCreateComputePipelines,
        "vkDestroyPipeline" => pipeline::vkDestroyPipeline,
        "vkCreateShadersEXT" => pipeline::vkCreateShadersEXT,
        "vkDestroyShaderEXT" => pipeline::vkDestroyShaderEXT,
        "vkCmdBindShadersEXT" => pipeline::vkCmdBindShadersEXT,
        // ── Descriptors ─────────────────────────────────────
        "vkCreateDescriptorSetLayout" => descriptor::vkCreateDescriptorSetLayout,
        "vkDestroyDescriptorSetLayout" => descriptor::vkDestroyDescriptorSetLayout,
        "vkCreateDescriptorPool" => descriptor::vkCreateDescriptorPool,
        "vkDestroyDescriptorPool" => descriptor::vkDestroyDescriptorPool,
        "vkResetDescriptorPool" => descriptor::vkResetDescriptorPool,
        "vkAllocateDescriptorSets" => descriptor::vkAllocateDescriptorSets,
        "vkFreeDescriptorSets" => descriptor::vkFreeDescriptorSets,
        // ── Command pools and buffers ───────────────────────
        "vkCreateCommandPool" => command::vkCreateCommandPool,
        "vkDestroyCommandPool" => command::vkDestroyCommandPool,
        "vkResetCommandPool" => command::vkResetCommandPool,
        "vkAllocateCommandBuffers" => command::vkAllocateCommandBuffers,
        "vkFreeCommandBuffers" => command::vkFreeCommandBuffers,
        "vkBeginCommandBuffer" => command::vkBeginCommandBuffer,
        "vkEndCommandBuffer" => command::vkEndCommandBuffer,
        "vkResetCommandBuffer" => command::vkResetCommandBuffer,
        // ── Recorded commands ───────────────────────────────
        "vkCmdBindPipeline" => command::vkCmdBindPipeline,
        "vkCmdBindDescriptorSets" => command::vkCmdBindDescriptorSets,
        "vkCmdDraw" => command::vkCmdDraw,
        "vkCmdDispatch" => command::vkCmdDispatch,
        "vkCmdCopyBuffer" => command::vkCmdCopyBuffer,
        "vkCmdFillBuffer" => command::vkCmdFillBuffer,
        "vkCmdPipelineBarrier" => command::vkCmdPipelineBarrier,
    })
}

/// The instance resolver: global, instance, physical-device and device
/// commands alike.
pub fn resolve_instance_proc(name: &str) -> Option<VoidFunction> {
    global_proc(name)
        .or_else(|| physical_device_proc(name))
        .or_else(|| device_proc(name))
}

/// The device resolver rejects instance-level names outside
/// [`DEVICE_ALLOWLIST`].
pub fn resolve_device_proc(name: &str) -> DeviceResolution {
    if let Some(f) = device_proc(name) {
        return DeviceResolution::Layer(f);
    }
    if is_instance_level(name) && !DEVICE_ALLOWLIST.contains(&name) {
        return DeviceResolution::Rejected;
    }
    DeviceResolution::Forward
}

/// The physical-device resolver only knows physical-device commands.
pub fn resolve_physical_device_proc(name: &str) -> Option<VoidFunction> {
    physical_device_proc(name)
}

/// # Safety
/// `p_name` must be null or a NUL-terminated string.
unsafe fn read_name<'a>(p_name: *const c_char) -> Option<&'a str> {
    if p_name.is_null() {
        return None;
    }
    // SAFETY: checked for null; the loader passes C strings.
    unsafe { CStr::from_ptr(p_name) }.to_str().ok()
}

/// View a `(pointer, count)` pair from a create info as a slice.
///
/// # Safety
/// When `count` is non-zero, `ptr` must point at `count` initialized values
/// that outlive `'a`.
pub(crate) unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        return &[];
    }
    // SAFETY: upheld by the caller.
    unsafe { std::slice::from_raw_parts(ptr, count as usize) }
}

/// Copy an array of C strings (extension or layer names).
///
/// # Safety
/// See [`raw_slice`]; every element must be a NUL-terminated string.
pub(crate) unsafe fn read_string_array(ptr: *const *const c_char, count: u32) -> Vec<String> {
    // SAFETY: upheld by the caller.
    unsafe { raw_slice(ptr, count) }
        .iter()
        .filter(|p| !p.is_null())
        // SAFETY: checked for null above.
        .map(|p| unsafe { CStr::from_ptr(*p) }.to_string_lossy().into_owned())
        .collect()
}

/// First structure of type `s_type` in a pNext chain, or null.
///
/// # Safety
/// `p_next` must be null or the head of a well-formed pNext chain.
pub(crate) unsafe fn find_in_chain(p_next: *const c_void, s_type: vk::StructureType) -> *const c_void {
    let mut next = p_next as *const vk::BaseInStructure<'_>;
    // SAFETY: every structure in a pNext chain starts with sType/pNext.
    unsafe {
        while !next.is_null() {
            if (*next).s_type == s_type {
                return next as *const c_void;
            }
            next = (*next).p_next;
        }
    }
    std::ptr::null()
}

/// Two-call enumeration: report the count when `p_out` is null, otherwise
/// copy as many items as fit.
///
/// # Safety
/// `p_count` must be valid; `p_out`, when non-null, must have room for
/// `*p_count` items.
pub unsafe fn fill_enumeration<T: Copy>(items: &[T], p_count: *mut u32, p_out: *mut T) -> vk::Result {
    if p_count.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    // SAFETY: upheld by the caller.
    unsafe {
        if p_out.is_null() {
            *p_count = items.len() as u32;
            return vk::Result::SUCCESS;
        }
        let written = (*p_count as usize).min(items.len());
        std::ptr::copy_nonoverlapping(items.as_ptr(), p_out, written);
        *p_count = written as u32;
        if written < items.len() {
            vk::Result::INCOMPLETE
        } else {
            vk::Result::SUCCESS
        }
    }
}

/// Copy `text` into a fixed-size, NUL-terminated C string field.
pub(crate) fn write_c_str(dst: &mut [c_char], text: &str) {
    let len = text.len().min(dst.len().saturating_sub(1));
    for (d, b) in dst.iter_mut().zip(&text.as_bytes()[..len]) {
        *d = *b as c_char;
    }
    if let Some(end) = dst.get_mut(len) {
        *end = 0;
    }
}

// ── Loader interface ────────────────────────────────────────

/// Negotiate the loader-layer interface version.
#[no_mangle]
pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
    p_version_struct: *mut dispatch::VkNegotiateLayerInterface,
) -> vk::Result {
    if p_version_struct.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    vkguard_common::init_logging();
    // SAFETY: checked for null; the loader owns the struct for this call.
    let negotiate = unsafe { &mut *p_version_struct };
    if negotiate.loader_layer_interface_version < LOADER_INTERFACE_VERSION {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    negotiate.loader_layer_interface_version = LOADER_INTERFACE_VERSION;
    negotiate.pfn_get_instance_proc_addr = Some(vkGetInstanceProcAddr);
    negotiate.pfn_get_device_proc_addr = Some(vkGetDeviceProcAddr);
    negotiate.pfn_get_physical_device_proc_addr = Some(vk_layerGetPhysicalDeviceProcAddr);
    vk::Result::SUCCESS
}

#[no_mangle]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    // SAFETY: the loader passes a C string.
    let name = unsafe { read_name(p_name) }?;
    if let Some(f) = resolve_instance_proc(name) {
        return Some(f);
    }
    if instance == vk::Instance::null() {
        return None;
    }
    let ctx = instance_context!(instance, None);
    // SAFETY: forwarding the same arguments to the next layer.
    unsafe { (ctx.dispatch.gipa)(instance, p_name) }
}

#[no_mangle]
pub unsafe extern "system" fn vkGetDeviceProcAddr(device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    // SAFETY: the loader passes a C string.
    let name = unsafe { read_name(p_name) }?;
    match resolve_device_proc(name) {
        DeviceResolution::Layer(f) => Some(f),
        DeviceResolution::Rejected => None,
        DeviceResolution::Forward => {
            let ctx = device_context!(device, None);
            // SAFETY: forwarding the same arguments to the next layer.
            unsafe { (ctx.dispatch.gdpa)(device, p_name) }
        }
    }
}

#[no_mangle]
pub unsafe extern "system" fn vk_layerGetPhysicalDeviceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    // SAFETY: the loader passes a C string.
    let name = unsafe { read_name(p_name) }?;
    if let Some(f) = resolve_physical_device_proc(name) {
        return Some(f);
    }
    let ctx = instance_context!(instance, None);
    let next = ctx.dispatch.gpdpa?;
    // SAFETY: forwarding the same arguments to the next layer.
    unsafe { next(instance, p_name) }
}
