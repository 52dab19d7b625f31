//! Instance creation and teardown, physical-device enumeration and the
//! layer/extension queries the loader makes of the layer itself.

use std::ffi::{c_char, CStr};
use std::sync::{Arc, OnceLock};

use ash::vk::{self, Handle};
use tracing::{debug, error, info};
use vkguard_core::config::{DisableFlag, EnableFlag, LayerSettings};
use vkguard_core::{Reporter, TracingSink};

use crate::call::Call;
use crate::chassis::{Command, ValidationChain};
use crate::context::{self, InstanceContext};
use crate::dispatch::{dispatch_key, take_instance_link, InstanceDispatch};
use crate::error::LayerError;
use crate::units::{instance_units, InstanceSetup};
use crate::{
    fill_enumeration, raw_slice, read_string_array, write_c_str, LAYER_DESCRIPTION, LAYER_NAME,
    VALIDATION_FEATURES_EXTENSION, VALIDATION_FEATURES_SPEC_VERSION,
};

/// Unit enable requested through `VkValidationFeaturesEXT`.
pub fn enable_flag(feature: vk::ValidationFeatureEnableEXT) -> Option<EnableFlag> {
    match feature {
        vk::ValidationFeatureEnableEXT::GPU_ASSISTED
        | vk::ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT => Some(EnableFlag::GpuAssisted),
        vk::ValidationFeatureEnableEXT::BEST_PRACTICES => Some(EnableFlag::BestPractices),
        vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION => Some(EnableFlag::SyncHazard),
        vk::ValidationFeatureEnableEXT::DEBUG_PRINTF => Some(EnableFlag::DebugPrintf),
        _ => None,
    }
}

/// Unit disable requested through `VkValidationFeaturesEXT`.
pub fn disable_flag(feature: vk::ValidationFeatureDisableEXT) -> Option<DisableFlag> {
    match feature {
        vk::ValidationFeatureDisableEXT::ALL => Some(DisableFlag::All),
        vk::ValidationFeatureDisableEXT::THREAD_SAFETY => Some(DisableFlag::ThreadSafety),
        vk::ValidationFeatureDisableEXT::API_PARAMETERS => Some(DisableFlag::Stateless),
        vk::ValidationFeatureDisableEXT::OBJECT_LIFETIMES => Some(DisableFlag::ObjectLifetime),
        vk::ValidationFeatureDisableEXT::CORE_CHECKS => Some(DisableFlag::CoreChecks),
        _ => None,
    }
}

/// Enables and disables from every `VkValidationFeaturesEXT` in the chain.
///
/// # Safety
/// `create_info` must carry a well-formed pNext chain.
pub unsafe fn validation_features(create_info: &vk::InstanceCreateInfo<'_>) -> (Vec<EnableFlag>, Vec<DisableFlag>) {
    let mut enables = Vec::new();
    let mut disables = Vec::new();
    let mut next = create_info.p_next as *const vk::BaseInStructure<'_>;
    // SAFETY: every structure in a pNext chain starts with sType/pNext.
    unsafe {
        while !next.is_null() {
            let header = &*next;
            if header.s_type == vk::StructureType::VALIDATION_FEATURES_EXT {
                let features = &*(next as *const vk::ValidationFeaturesEXT<'_>);
                enables.extend(
                    raw_slice(
                        features.p_enabled_validation_features,
                        features.enabled_validation_feature_count,
                    )
                    .iter()
                    .filter_map(|f| enable_flag(*f)),
                );
                disables.extend(
                    raw_slice(
                        features.p_disabled_validation_features,
                        features.disabled_validation_feature_count,
                    )
                    .iter()
                    .filter_map(|f| disable_flag(*f)),
                );
            }
            next = header.p_next;
        }
    }
    (enables, disables)
}

pub unsafe extern "system" fn vkCreateInstance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    if p_create_info.is_null() || p_instance.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    vkguard_common::init_logging();
    context::register_exit_hook();
    // SAFETY: checked for null; the loader owns the create info.
    let create_info = unsafe { &*p_create_info };
    let link = match unsafe { take_instance_link(create_info) } {
        Ok(link) => link,
        Err(err) => {
            error!(%err, "vkCreateInstance without a loader link");
            return err.to_vk_result();
        }
    };
    // SAFETY: global commands resolve with a null instance.
    let next_create = match unsafe { (link.gipa)(vk::Instance::null(), c"vkCreateInstance".as_ptr()) } {
        // SAFETY: the loader hands back the function under the name asked for.
        Some(f) => unsafe { std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkCreateInstance>(f) },
        None => return LayerError::MissingEntryPoint("vkCreateInstance").to_vk_result(),
    };

    let settings = LayerSettings::from_environment();
    // SAFETY: the create info is the application's, valid for this call.
    let (enables, disables) = unsafe { validation_features(create_info) };
    let selection = settings.resolve_units(&enables, &disables);
    let reporter = Arc::new(Reporter::new(Arc::new(TracingSink), &settings.messages));
    let state = Arc::new(OnceLock::new());
    let setup = InstanceSetup {
        settings: settings.clone(),
        selection,
        reporter: reporter.clone(),
        state: state.clone(),
    };
    let chain = ValidationChain::new(instance_units(&setup), settings.locking, reporter.clone());

    // SAFETY: application pointers, valid for the duration of the call.
    let (api_version, layers, extensions) = unsafe {
        let api_version = create_info
            .p_application_info
            .as_ref()
            .map(|app| app.api_version)
            .filter(|v| *v != 0)
            .unwrap_or(vk::API_VERSION_1_0);
        (
            api_version,
            read_string_array(create_info.pp_enabled_layer_names, create_info.enabled_layer_count),
            read_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count),
        )
    };
    let mut call = Call::CreateInstance {
        api_version,
        layers,
        extensions,
        instance: vk::Instance::null(),
    };
    let mut created = vk::Instance::null();
    let result = chain.run(Command::CreateInstance, 0, &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { next_create(p_create_info, p_allocator, &mut created) };
        if let Call::CreateInstance { instance, .. } = call {
            *instance = created;
        }
        result
    });
    if result != vk::Result::SUCCESS {
        return result;
    }

    // SAFETY: checked for null above.
    unsafe { *p_instance = created };
    chain.setup("vkCreateInstance");
    // SAFETY: `link.gipa` belongs to the chain that created `created`.
    let dispatch = Arc::new(unsafe { InstanceDispatch::load(created, link) });
    info!(
        instance = format_args!("0x{:x}", created.as_raw()),
        api_version = format_args!(
            "{}.{}",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version)
        ),
        units = ?chain.active_kinds(),
        "instance created"
    );
    let ctx = InstanceContext {
        handle: created,
        api_version,
        dispatch,
        chain,
        settings,
        selection,
        reporter,
        state,
    };
    // SAFETY: `created` is live and carries the loader's dispatch pointer.
    context::store_instance(unsafe { dispatch_key(created) }, Arc::new(ctx));
    vk::Result::SUCCESS
}

pub unsafe extern "system" fn vkDestroyInstance(instance: vk::Instance, p_allocator: *const vk::AllocationCallbacks<'_>) {
    if instance == vk::Instance::null() {
        return;
    }
    // SAFETY: the application passes a live instance.
    let key = unsafe { dispatch_key(instance) };
    let Some(ctx) = context::get_instance(key) else {
        error!(key, "vkDestroyInstance on an instance the layer never saw");
        return;
    };
    let mut call = Call::DestroyInstance {
        instance,
        live_devices: context::devices_of(instance),
    };
    ctx.chain.run(Command::DestroyInstance, instance.as_raw(), &mut call, |_| {
        // Leaked devices lose their units before the driver frees them.
        for device in context::remove_devices_of(instance) {
            debug!(device = format_args!("0x{:x}", device.handle.as_raw()), "tearing down leaked device");
            device.chain.shutdown();
        }
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_instance)(instance, p_allocator) };
        vk::Result::SUCCESS
    });
    ctx.chain.teardown();
    context::remove_instance(key);
    info!(instance = format_args!("0x{:x}", instance.as_raw()), "instance destroyed");
}

pub unsafe extern "system" fn vkEnumeratePhysicalDevices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let ctx = instance_context!(instance, vk::Result::ERROR_INITIALIZATION_FAILED);
    let mut call = Call::EnumeratePhysicalDevices {
        instance,
        devices: Vec::new(),
    };
    ctx.chain
        .run(Command::EnumeratePhysicalDevices, instance.as_raw(), &mut call, |call| {
            // SAFETY: forwarding the application's arguments unchanged.
            let result = unsafe { (ctx.dispatch.v1_0.enumerate_physical_devices)(instance, p_count, p_devices) };
            if result.as_raw() >= 0 && !p_devices.is_null() && !p_count.is_null() {
                if let Call::EnumeratePhysicalDevices { devices, .. } = call {
                    // SAFETY: the driver wrote `*p_count` handles.
                    *devices = unsafe { raw_slice(p_devices, *p_count) }.to_vec();
                }
            }
            result
        })
}

pub unsafe extern "system" fn vkDestroySurfaceKHR(
    instance: vk::Instance,
    surface: vk::SurfaceKHR,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = instance_context!(instance, ());
    let mut call = Call::DestroySurface { instance, surface };
    ctx.chain.run(Command::DestroySurfaceKHR, instance.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.surface.destroy_surface_khr)(instance, surface, p_allocator) };
        vk::Result::SUCCESS
    });
}

// ── Layer queries ───────────────────────────────────────────

/// The properties the layer reports for itself.
pub fn layer_properties() -> vk::LayerProperties {
    let mut props = vk::LayerProperties {
        spec_version: vk::HEADER_VERSION_COMPLETE,
        implementation_version: 1,
        ..Default::default()
    };
    write_c_str(&mut props.layer_name, LAYER_NAME);
    write_c_str(&mut props.description, LAYER_DESCRIPTION);
    props
}

/// Instance extensions implemented by the layer.
pub fn instance_extensions() -> Vec<vk::ExtensionProperties> {
    let mut ext = vk::ExtensionProperties {
        spec_version: VALIDATION_FEATURES_SPEC_VERSION,
        ..Default::default()
    };
    write_c_str(&mut ext.extension_name, VALIDATION_FEATURES_EXTENSION);
    vec![ext]
}

/// # Safety
/// `p_layer_name` must be null or a NUL-terminated string.
unsafe fn names_this_layer(p_layer_name: *const c_char) -> bool {
    // SAFETY: upheld by the caller.
    !p_layer_name.is_null() && unsafe { CStr::from_ptr(p_layer_name) }.to_bytes() == LAYER_NAME.as_bytes()
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateInstanceLayerProperties(
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    // SAFETY: application pointers.
    unsafe { fill_enumeration(&[layer_properties()], p_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateInstanceExtensionProperties(
    p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    // SAFETY: the loader passes a C string or null.
    if !unsafe { names_this_layer(p_layer_name) } {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    // SAFETY: application pointers.
    unsafe { fill_enumeration(&instance_extensions(), p_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateDeviceLayerProperties(
    _physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    // SAFETY: application pointers.
    unsafe { fill_enumeration(&[layer_properties()], p_count, p_properties) }
}

#[no_mangle]
pub unsafe extern "system" fn vkEnumerateDeviceExtensionProperties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    // SAFETY: the loader passes a C string or null.
    if unsafe { names_this_layer(p_layer_name) } {
        // SAFETY: application pointers.
        return unsafe { fill_enumeration::<vk::ExtensionProperties>(&[], p_count, p_properties) };
    }
    if physical_device == vk::PhysicalDevice::null() {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    let ctx = instance_context!(physical_device, vk::Result::ERROR_INITIALIZATION_FAILED);
    // SAFETY: forwarding the application's arguments unchanged.
    unsafe {
        (ctx.dispatch.v1_0.enumerate_device_extension_properties)(physical_device, p_layer_name, p_count, p_properties)
    }
}
