//! Loader chain plumbing and the forwarding tables of the next layer down.
//!
//! The Vulkan loader writes its dispatch table pointer into the first
//! pointer-sized slot of every dispatchable handle. That pointer is shared
//! by an instance and its physical devices, and by a device and its queues
//! and command buffers, so it is the key contexts are stored under.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use ash::vk::{self, Handle};

use crate::error::LayerError;

/// `VK_STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO`
pub const LOADER_INSTANCE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(47);
/// `VK_STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO`
pub const LOADER_DEVICE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(48);
/// `VK_LAYER_LINK_INFO`
pub const LAYER_LINK_INFO: i32 = 0;

/// `PFN_GetPhysicalDeviceProcAddr` as used by the loader.
pub type PfnGetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(vk::Instance, *const c_char) -> vk::PFN_vkVoidFunction;

#[repr(C)]
pub struct VkLayerInstanceLink {
    pub p_next: *mut VkLayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
}

#[repr(C)]
pub union VkLayerInstanceUnion {
    pub p_layer_info: *mut VkLayerInstanceLink,
    pub pfn_set_instance_loader_data: *const c_void,
}

#[repr(C)]
pub struct VkLayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: i32,
    pub u: VkLayerInstanceUnion,
}

#[repr(C)]
pub struct VkLayerDeviceLink {
    pub p_next: *mut VkLayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
pub union VkLayerDeviceUnion {
    pub p_layer_info: *mut VkLayerDeviceLink,
    pub pfn_set_device_loader_data: *const c_void,
}

#[repr(C)]
pub struct VkLayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: i32,
    pub u: VkLayerDeviceUnion,
}

/// `VkNegotiateLayerInterface`
#[repr(C)]
pub struct VkNegotiateLayerInterface {
    pub s_type: i32,
    pub p_next: *mut c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PfnGetPhysicalDeviceProcAddr>,
}

/// Key of the loader dispatch table behind a dispatchable handle.
///
/// # Safety
/// `handle` must be a live dispatchable handle created by the loader.
pub unsafe fn dispatch_key<H: Handle>(handle: H) -> usize {
    let raw = handle.as_raw() as usize as *const usize;
    if raw.is_null() {
        return 0;
    }
    // SAFETY: the loader guarantees the first word of a dispatchable
    // handle holds its dispatch table pointer.
    unsafe { *raw }
}

/// The next layer's `vkGetInstanceProcAddr` and `GetPhysicalDeviceProcAddr`.
#[derive(Clone, Copy)]
pub struct InstanceLink {
    pub gipa: vk::PFN_vkGetInstanceProcAddr,
    pub gpdpa: Option<PfnGetPhysicalDeviceProcAddr>,
}

/// Find our link in the instance create chain and advance it for the
/// next layer.
///
/// # Safety
/// `create_info` must be the loader-provided create info.
pub unsafe fn take_instance_link(create_info: &vk::InstanceCreateInfo<'_>) -> Result<InstanceLink, LayerError> {
    let mut next = create_info.p_next as *mut VkLayerInstanceCreateInfo;
    // SAFETY: every structure in a pNext chain starts with sType/pNext.
    unsafe {
        while !next.is_null() {
            let info = &mut *next;
            if info.s_type == LOADER_INSTANCE_CREATE_INFO && info.function == LAYER_LINK_INFO {
                let link = info.u.p_layer_info;
                if link.is_null() {
                    return Err(LayerError::MissingLink("instance"));
                }
                let found = InstanceLink {
                    gipa: (*link).pfn_next_get_instance_proc_addr,
                    gpdpa: (*link).pfn_next_get_physical_device_proc_addr,
                };
                info.u.p_layer_info = (*link).p_next;
                return Ok(found);
            }
            next = info.p_next as *mut VkLayerInstanceCreateInfo;
        }
    }
    Err(LayerError::MissingLink("instance"))
}

#[derive(Clone, Copy)]
pub struct DeviceLink {
    pub gipa: vk::PFN_vkGetInstanceProcAddr,
    pub gdpa: vk::PFN_vkGetDeviceProcAddr,
}

/// Device counterpart of [`take_instance_link`].
///
/// # Safety
/// `create_info` must be the loader-provided create info.
pub unsafe fn take_device_link(create_info: &vk::DeviceCreateInfo<'_>) -> Result<DeviceLink, LayerError> {
    let mut next = create_info.p_next as *mut VkLayerDeviceCreateInfo;
    // SAFETY: see take_instance_link.
    unsafe {
        while !next.is_null() {
            let info = &mut *next;
            if info.s_type == LOADER_DEVICE_CREATE_INFO && info.function == LAYER_LINK_INFO {
                let link = info.u.p_layer_info;
                if link.is_null() {
                    return Err(LayerError::MissingLink("device"));
                }
                let found = DeviceLink {
                    gipa: (*link).pfn_next_get_instance_proc_addr,
                    gdpa: (*link).pfn_next_get_device_proc_addr,
                };
                info.u.p_layer_info = (*link).p_next;
                return Ok(found);
            }
            next = info.p_next as *mut VkLayerDeviceCreateInfo;
        }
    }
    Err(LayerError::MissingLink("device"))
}

fn void_ptr(f: vk::PFN_vkVoidFunction) -> *const c_void {
    match f {
        Some(f) => f as *const c_void,
        None => ptr::null(),
    }
}

/// Functions of the next layer reachable through an instance.
pub struct InstanceDispatch {
    pub handle: vk::Instance,
    pub gipa: vk::PFN_vkGetInstanceProcAddr,
    pub gpdpa: Option<PfnGetPhysicalDeviceProcAddr>,
    pub v1_0: ash::InstanceFnV1_0,
    pub v1_1: ash::InstanceFnV1_1,
    pub v1_3: ash::InstanceFnV1_3,
    pub surface: ash::khr::surface::InstanceFn,
    pub tooling_info: ash::ext::tooling_info::InstanceFn,
}

impl InstanceDispatch {
    /// # Safety
    /// `link.gipa` must be a valid `vkGetInstanceProcAddr` for `instance`.
    pub unsafe fn load(instance: vk::Instance, link: InstanceLink) -> Self {
        let gipa = link.gipa;
        // SAFETY: resolving names through the next layer has no side effects.
        let load = |name: &CStr| void_ptr(unsafe { gipa(instance, name.as_ptr()) });
        Self {
            handle: instance,
            gipa,
            gpdpa: link.gpdpa,
            v1_0: ash::InstanceFnV1_0::load(load),
            v1_1: ash::InstanceFnV1_1::load(load),
            v1_3: ash::InstanceFnV1_3::load(load),
            surface: ash::khr::surface::InstanceFn::load(load),
            tooling_info: ash::ext::tooling_info::InstanceFn::load(load),
        }
    }

    /// Whether the next layer resolves `name` at all.
    pub fn provides(&self, name: &CStr) -> bool {
        // SAFETY: see load.
        unsafe { (self.gipa)(self.handle, name.as_ptr()).is_some() }
    }
}

/// Functions of the next layer reachable through a device.
pub struct DeviceDispatch {
    pub handle: vk::Device,
    pub gdpa: vk::PFN_vkGetDeviceProcAddr,
    pub v1_0: ash::DeviceFnV1_0,
    pub v1_1: ash::DeviceFnV1_1,
    pub swapchain: ash::khr::swapchain::DeviceFn,
    pub shader_object: ash::ext::shader_object::DeviceFn,
}

impl DeviceDispatch {
    /// # Safety
    /// `gdpa` must be a valid `vkGetDeviceProcAddr` for `device`.
    pub unsafe fn load(device: vk::Device, gdpa: vk::PFN_vkGetDeviceProcAddr) -> Self {
        // SAFETY: resolving names through the next layer has no side effects.
        let load = |name: &CStr| void_ptr(unsafe { gdpa(device, name.as_ptr()) });
        Self {
            handle: device,
            gdpa,
            v1_0: ash::DeviceFnV1_0::load(load),
            v1_1: ash::DeviceFnV1_1::load(load),
            swapchain: ash::khr::swapchain::DeviceFn::load(load),
            shader_object: ash::ext::shader_object::DeviceFn::load(load),
        }
    }

    pub fn provides(&self, name: &CStr) -> bool {
        // SAFETY: see load.
        unsafe { (self.gdpa)(self.handle, name.as_ptr()).is_some() }
    }
}
