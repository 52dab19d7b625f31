//! Physical-device queries the layer adjusts: the properties (so the
//! GPU-assisted unit can hide its reserved descriptor-set slot) and the
//! tool list (so the layer shows up in it).

use std::ptr;

use ash::vk::{self, Handle};

use crate::call::Call;
use crate::chassis::Command;
use crate::context::InstanceContext;
use crate::{write_c_str, LAYER_DESCRIPTION, LAYER_NAME};

pub const TOOL_NAME: &str = "vkguard";

pub unsafe extern "system" fn vkGetPhysicalDeviceProperties(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    let ctx = instance_context!(physical_device, ());
    if p_properties.is_null() {
        return;
    }
    let mut call = Call::GetPhysicalDeviceProperties {
        physical_device,
        properties: vk::PhysicalDeviceProperties::default(),
    };
    let result = ctx.chain.run(
        Command::GetPhysicalDeviceProperties,
        physical_device.as_raw(),
        &mut call,
        |call| {
            if let Call::GetPhysicalDeviceProperties { properties, .. } = call {
                // SAFETY: forwarding to the next layer with a local output.
                unsafe { (ctx.dispatch.v1_0.get_physical_device_properties)(physical_device, properties) };
            }
            vk::Result::SUCCESS
        },
    );
    if let (vk::Result::SUCCESS, Call::GetPhysicalDeviceProperties { properties, .. }) = (result, call) {
        // SAFETY: checked for null above.
        unsafe { *p_properties = properties };
    }
}

/// `vkGetPhysicalDeviceProperties2`, or its KHR alias on 1.0 instances.
fn properties2_fn(ctx: &InstanceContext) -> Option<vk::PFN_vkGetPhysicalDeviceProperties2> {
    if ctx.dispatch.provides(c"vkGetPhysicalDeviceProperties2") {
        return Some(ctx.dispatch.v1_1.get_physical_device_properties2);
    }
    // SAFETY: resolving a name through the next layer has no side effects.
    let f = unsafe { (ctx.dispatch.gipa)(ctx.handle, c"vkGetPhysicalDeviceProperties2KHR".as_ptr()) }?;
    // SAFETY: the KHR alias has the core signature.
    Some(unsafe { std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkGetPhysicalDeviceProperties2>(f) })
}

pub unsafe extern "system" fn vkGetPhysicalDeviceProperties2(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties2<'_>,
) {
    let ctx = instance_context!(physical_device, ());
    if p_properties.is_null() {
        return;
    }
    let Some(next) = properties2_fn(&ctx) else {
        tracing::error!("next layer provides no vkGetPhysicalDeviceProperties2");
        return;
    };
    let mut call = Call::GetPhysicalDeviceProperties {
        physical_device,
        properties: vk::PhysicalDeviceProperties::default(),
    };
    let result = ctx.chain.run(
        Command::GetPhysicalDeviceProperties2,
        physical_device.as_raw(),
        &mut call,
        |call| {
            // SAFETY: the application's struct and its pNext chain go down
            // unchanged; the core properties are copied out afterwards.
            unsafe { next(physical_device, p_properties) };
            if let Call::GetPhysicalDeviceProperties { properties, .. } = call {
                // SAFETY: checked for null above.
                *properties = unsafe { (*p_properties).properties };
            }
            vk::Result::SUCCESS
        },
    );
    if let (vk::Result::SUCCESS, Call::GetPhysicalDeviceProperties { properties, .. }) = (result, call) {
        // SAFETY: checked for null above.
        unsafe { (*p_properties).properties = properties };
    }
}

/// The tool record describing this layer.
pub fn tool_properties<'a>() -> vk::PhysicalDeviceToolProperties<'a> {
    let mut props = vk::PhysicalDeviceToolProperties::default()
        .purposes(vk::ToolPurposeFlags::VALIDATION | vk::ToolPurposeFlags::DEBUG_REPORTING_EXT);
    write_c_str(&mut props.name, TOOL_NAME);
    write_c_str(&mut props.version, env!("CARGO_PKG_VERSION"));
    write_c_str(&mut props.description, LAYER_DESCRIPTION);
    write_c_str(&mut props.layer, LAYER_NAME);
    props
}

/// Put this layer's tool record first, then let `next` fill the rest.
///
/// A count-only query reports one more than `next` does. With room for `n`
/// records, our record takes slot 0 and `next` gets the remaining `n - 1`.
///
/// # Safety
/// `p_count` must be valid; `p_properties`, when non-null, must have room
/// for `*p_count` records.
pub unsafe fn prepend_tool_record<'a>(
    p_count: *mut u32,
    p_properties: *mut vk::PhysicalDeviceToolProperties<'a>,
    next: impl FnOnce(*mut u32, *mut vk::PhysicalDeviceToolProperties<'a>) -> vk::Result,
) -> vk::Result {
    if p_count.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    // SAFETY: upheld by the caller.
    unsafe {
        if p_properties.is_null() {
            let result = next(p_count, ptr::null_mut());
            if result.as_raw() >= 0 {
                *p_count += 1;
            }
            return result;
        }
        let capacity = *p_count;
        if capacity == 0 {
            return vk::Result::INCOMPLETE;
        }
        let p_next = (*p_properties).p_next;
        *p_properties = tool_properties();
        (*p_properties).p_next = p_next;
        let mut rest = capacity - 1;
        let result = next(&mut rest, p_properties.add(1));
        *p_count = rest + 1;
        result
    }
}

pub unsafe extern "system" fn vkGetPhysicalDeviceToolProperties(
    physical_device: vk::PhysicalDevice,
    p_tool_count: *mut u32,
    p_tool_properties: *mut vk::PhysicalDeviceToolProperties<'_>,
) -> vk::Result {
    let ctx = instance_context!(physical_device, vk::Result::ERROR_INITIALIZATION_FAILED);
    let core = ctx.dispatch.provides(c"vkGetPhysicalDeviceToolProperties");
    let ext = ctx.dispatch.provides(c"vkGetPhysicalDeviceToolPropertiesEXT");
    // SAFETY: application pointers, forwarded to the next layer.
    unsafe {
        prepend_tool_record(p_tool_count, p_tool_properties, |count, props| {
            if core {
                (ctx.dispatch.v1_3.get_physical_device_tool_properties)(physical_device, count, props)
            } else if ext {
                (ctx.dispatch.tooling_info.get_physical_device_tool_properties_ext)(physical_device, count, props)
            } else {
                *count = 0;
                vk::Result::SUCCESS
            }
        })
    }
}
