//! Device creation and teardown, and queue retrieval.

use std::sync::Arc;

use ash::vk::{self, Handle};
use tracing::{error, info};
use vkguard_state::DeviceState;

use crate::call::Call;
use crate::chassis::{Command, ValidationChain};
use crate::context::{self, DeviceContext};
use crate::dispatch::{dispatch_key, take_device_link, DeviceDispatch};
use crate::error::LayerError;
use crate::units::{device_units, DeviceSetup, DeviceTrampolines};
use crate::{find_in_chain, raw_slice, read_string_array};

pub unsafe extern "system" fn vkCreateDevice(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    if p_create_info.is_null() || p_device.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let inst = instance_context!(physical_device, vk::Result::ERROR_INITIALIZATION_FAILED);
    // SAFETY: checked for null; the loader owns the create info.
    let create_info = unsafe { &*p_create_info };
    let link = match unsafe { take_device_link(create_info) } {
        Ok(link) => link,
        Err(err) => {
            error!(%err, "vkCreateDevice without a loader link");
            return err.to_vk_result();
        }
    };
    // SAFETY: resolving through the next layer's instance-level lookup.
    let next_create = match unsafe { (link.gipa)(inst.handle, c"vkCreateDevice".as_ptr()) } {
        // SAFETY: the loader hands back the function under the name asked for.
        Some(f) => unsafe { std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkCreateDevice>(f) },
        None => return LayerError::MissingEntryPoint("vkCreateDevice").to_vk_result(),
    };

    let mut supported_features = vk::PhysicalDeviceFeatures::default();
    // SAFETY: plain query on a live physical device.
    unsafe { (inst.dispatch.v1_0.get_physical_device_features)(physical_device, &mut supported_features) };
    // SAFETY: application pointers, valid for the duration of the call.
    let mut call = unsafe {
        Call::CreateDevice {
            physical_device,
            queue_families: raw_slice(create_info.p_queue_create_infos, create_info.queue_create_info_count)
                .iter()
                .map(|q| (q.queue_family_index, q.queue_count))
                .collect(),
            extensions: read_string_array(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
            ),
            features: create_info.p_enabled_features.as_ref().copied(),
            supported_features,
            features_in_chain: !find_in_chain(create_info.p_next, vk::StructureType::PHYSICAL_DEVICE_FEATURES_2)
                .is_null(),
            device: vk::Device::null(),
        }
    };

    let mut created = vk::Device::null();
    let result = inst
        .chain
        .run(Command::CreateDevice, physical_device.as_raw(), &mut call, |call| {
            let features = match call {
                Call::CreateDevice { features, .. } => *features,
                _ => None,
            };
            let mut forwarded = *create_info;
            forwarded.p_enabled_features = features.as_ref().map_or(std::ptr::null(), |f| f as *const _);
            // SAFETY: the application's create info with only the feature
            // pointer replaced by a local that outlives the call.
            let result = unsafe { next_create(physical_device, &forwarded, p_allocator, &mut created) };
            if let Call::CreateDevice { device, .. } = call {
                *device = created;
            }
            result
        });
    if result != vk::Result::SUCCESS {
        return result;
    }
    // SAFETY: checked for null above.
    unsafe { *p_device = created };

    // SAFETY: `link.gdpa` belongs to the chain that created `created`.
    let dispatch = Arc::new(unsafe { DeviceDispatch::load(created, link.gdpa) });
    let mut properties = vk::PhysicalDeviceProperties::default();
    let mut memory_properties = vk::PhysicalDeviceMemoryProperties::default();
    // SAFETY: plain queries on a live physical device, bypassing the units
    // so the real limits are seen.
    unsafe {
        (inst.dispatch.v1_0.get_physical_device_properties)(physical_device, &mut properties);
        (inst.dispatch.v1_0.get_physical_device_memory_properties)(physical_device, &mut memory_properties);
    }
    let state = Arc::new(DeviceState::new(created, physical_device, inst.instance_state()));
    let setup = DeviceSetup {
        device: created,
        physical_device,
        settings: inst.settings.clone(),
        selection: inst.selection,
        reporter: inst.reporter.clone(),
        state: state.clone(),
        properties,
    };
    let driver = inst
        .selection
        .gpu_assisted
        .then(|| Arc::new(DeviceTrampolines::new(created, dispatch.clone(), memory_properties)));
    let chain = ValidationChain::new(device_units(&setup, driver), inst.settings.locking, inst.reporter.clone());
    chain.setup("vkCreateDevice");
    info!(
        device = format_args!("0x{:x}", created.as_raw()),
        units = ?chain.active_kinds(),
        aborted = ?chain.aborted_kinds(),
        "device created"
    );
    let ctx = DeviceContext {
        handle: created,
        physical_device,
        dispatch,
        instance: inst,
        chain,
        state,
    };
    // SAFETY: `created` is live and carries the loader's dispatch pointer.
    context::store_device(unsafe { dispatch_key(created) }, Arc::new(ctx));
    vk::Result::SUCCESS
}

pub unsafe extern "system" fn vkDestroyDevice(device: vk::Device, p_allocator: *const vk::AllocationCallbacks<'_>) {
    if device == vk::Device::null() {
        return;
    }
    // SAFETY: the application passes a live device.
    let key = unsafe { dispatch_key(device) };
    let Some(ctx) = context::get_device(key) else {
        error!(key, "vkDestroyDevice on a device the layer never saw");
        return;
    };
    let mut call = Call::DestroyDevice { device };
    ctx.chain.run(Command::DestroyDevice, device.as_raw(), &mut call, |_| {
        // Units release their driver objects while the device still exists.
        ctx.chain.teardown();
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_device)(device, p_allocator) };
        vk::Result::SUCCESS
    });
    context::remove_device(key);
    info!(device = format_args!("0x{:x}", device.as_raw()), "device destroyed");
}

pub unsafe extern "system" fn vkGetDeviceQueue(
    device: vk::Device,
    queue_family_index: u32,
    queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    let ctx = device_context!(device, ());
    if p_queue.is_null() {
        return;
    }
    let mut call = Call::GetDeviceQueue {
        family_index: queue_family_index,
        queue_index,
        queue: vk::Queue::null(),
    };
    let result = ctx.chain.run(Command::GetDeviceQueue, device.as_raw(), &mut call, |call| {
        if let Call::GetDeviceQueue { queue, .. } = call {
            // SAFETY: forwarding with a local output.
            unsafe { (ctx.dispatch.v1_0.get_device_queue)(device, queue_family_index, queue_index, queue) };
        }
        vk::Result::SUCCESS
    });
    if let (vk::Result::SUCCESS, Call::GetDeviceQueue { queue, .. }) = (result, call) {
        // SAFETY: checked for null above.
        unsafe { *p_queue = queue };
    }
}
