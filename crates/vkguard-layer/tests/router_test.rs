//! Integration test: entry-point routing and loader queries
//!
//! Name resolution at instance, device and physical-device level, the
//! two-call enumeration helpers, tool records, loader negotiation and the
//! `VkValidationFeaturesEXT` mapping.

use std::ffi::c_void;
use std::ptr;

use ash::vk;
use vkguard_core::config::{DisableFlag, EnableFlag, LayerSettings};
use vkguard_layer::dispatch::VkNegotiateLayerInterface;
use vkguard_layer::instance::{
    disable_flag, enable_flag, instance_extensions, layer_properties, validation_features,
    vkEnumerateInstanceExtensionProperties, vkEnumerateInstanceLayerProperties,
};
use vkguard_layer::physical_device::{prepend_tool_record, TOOL_NAME};
use vkguard_layer::{
    fill_enumeration, is_instance_level, resolve_device_proc, resolve_instance_proc, resolve_physical_device_proc,
    vkGetDeviceProcAddr, vkGetInstanceProcAddr, vkNegotiateLoaderLayerInterfaceVersion, DeviceResolution,
    DEVICE_ALLOWLIST, LAYER_NAME, LOADER_INTERFACE_VERSION, VALIDATION_FEATURES_EXTENSION,
};

#[test]
fn test_instance_resolver_covers_every_level() {
    for name in [
        "vkCreateInstance",
        "vkGetPhysicalDeviceProperties",
        "vkCreateBuffer",
        "vkGetDeviceProcAddr",
        "vkCmdDraw",
    ] {
        assert!(resolve_instance_proc(name).is_some(), "{name} not resolved");
    }
    assert!(resolve_instance_proc("vkCmdDrawIndexed").is_none());
}

#[test]
fn test_device_resolver_rejects_instance_commands() {
    for name in [
        "vkCreateInstance",
        "vkCreateDevice",
        "vkEnumeratePhysicalDevices",
        "vkGetPhysicalDeviceProperties",
        "vkGetPhysicalDeviceMemoryProperties",
        "vkCreateXlibSurfaceKHR",
        "vkDestroySurfaceKHR",
    ] {
        match resolve_device_proc(name) {
            DeviceResolution::Rejected => {}
            other => panic!("{name} resolved as {other:?}"),
        }
    }
}

#[test]
fn test_device_resolver_forwards_allowlisted_and_unknown() {
    for name in DEVICE_ALLOWLIST {
        assert!(is_instance_level(name));
        match resolve_device_proc(name) {
            DeviceResolution::Forward => {}
            other => panic!("{name} resolved as {other:?}"),
        }
    }
    assert!(matches!(resolve_device_proc("vkCmdDrawIndexed"), DeviceResolution::Forward));
    assert!(resolve_device_proc("vkCreateBuffer").is_layer());
    assert!(resolve_device_proc("vkQueuePresentKHR").is_layer());
}

#[test]
fn test_physical_device_resolver() {
    assert!(resolve_physical_device_proc("vkGetPhysicalDeviceProperties2KHR").is_some());
    assert!(resolve_physical_device_proc("vkGetPhysicalDeviceToolPropertiesEXT").is_some());
    assert!(resolve_physical_device_proc("vkCreateBuffer").is_none());
}

#[test]
fn test_proc_addr_without_handles() {
    unsafe {
        assert!(vkGetInstanceProcAddr(vk::Instance::null(), c"vkCreateInstance".as_ptr()).is_some());
        assert!(vkGetInstanceProcAddr(vk::Instance::null(), c"vkCmdDrawIndexed".as_ptr()).is_none());
        assert!(vkGetDeviceProcAddr(vk::Device::null(), c"vkCreateBuffer".as_ptr()).is_some());
        assert!(vkGetDeviceProcAddr(vk::Device::null(), c"vkCreateInstance".as_ptr()).is_none());
        assert!(vkGetDeviceProcAddr(vk::Device::null(), ptr::null()).is_none());
    }
}

#[test]
fn test_fill_enumeration_two_call_idiom() {
    let items = [10u32, 20, 30];
    let mut count = 0;
    assert_eq!(
        unsafe { fill_enumeration(&items, &mut count, ptr::null_mut()) },
        vk::Result::SUCCESS
    );
    assert_eq!(count, 3);

    let mut out = [0u32; 3];
    assert_eq!(
        unsafe { fill_enumeration(&items, &mut count, out.as_mut_ptr()) },
        vk::Result::SUCCESS
    );
    assert_eq!(out, items);

    let mut short = [0u32; 2];
    let mut count = 2;
    assert_eq!(
        unsafe { fill_enumeration(&items, &mut count, short.as_mut_ptr()) },
        vk::Result::INCOMPLETE
    );
    assert_eq!(count, 2);
    assert_eq!(short, [10, 20]);

    assert_eq!(
        unsafe { fill_enumeration(&items, ptr::null_mut(), ptr::null_mut()) },
        vk::Result::ERROR_INITIALIZATION_FAILED
    );
}

#[test]
fn test_layer_reports_itself() {
    let props = layer_properties();
    match props.layer_name_as_c_str() {
        Ok(name) => assert_eq!(name.to_bytes(), LAYER_NAME.as_bytes()),
        Err(e) => panic!("layer name not terminated: {e}"),
    }

    let mut count = 0;
    let result = unsafe { vkEnumerateInstanceLayerProperties(&mut count, ptr::null_mut()) };
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(count, 1);

    let extensions = instance_extensions();
    assert_eq!(extensions.len(), 1);
    match extensions[0].extension_name_as_c_str() {
        Ok(name) => assert_eq!(name.to_bytes(), VALIDATION_FEATURES_EXTENSION.as_bytes()),
        Err(e) => panic!("extension name not terminated: {e}"),
    }
}

#[test]
fn test_extension_query_only_answers_for_this_layer() {
    let mut count = 0;
    let name = match std::ffi::CString::new(LAYER_NAME) {
        Ok(n) => n,
        Err(e) => panic!("layer name: {e}"),
    };
    let result = unsafe { vkEnumerateInstanceExtensionProperties(name.as_ptr(), &mut count, ptr::null_mut()) };
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(count, 1);

    let result = unsafe { vkEnumerateInstanceExtensionProperties(ptr::null(), &mut count, ptr::null_mut()) };
    assert_eq!(result, vk::Result::ERROR_LAYER_NOT_PRESENT);
    let result = unsafe {
        vkEnumerateInstanceExtensionProperties(c"VK_LAYER_other".as_ptr(), &mut count, ptr::null_mut())
    };
    assert_eq!(result, vk::Result::ERROR_LAYER_NOT_PRESENT);
}

#[test]
fn test_loader_negotiation() {
    let mut negotiate = VkNegotiateLayerInterface {
        s_type: 1,
        p_next: ptr::null_mut::<c_void>(),
        loader_layer_interface_version: 5,
        pfn_get_instance_proc_addr: None,
        pfn_get_device_proc_addr: None,
        pfn_get_physical_device_proc_addr: None,
    };
    let result = unsafe { vkNegotiateLoaderLayerInterfaceVersion(&mut negotiate) };
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(negotiate.loader_layer_interface_version, LOADER_INTERFACE_VERSION);
    assert!(negotiate.pfn_get_instance_proc_addr.is_some());
    assert!(negotiate.pfn_get_device_proc_addr.is_some());
    assert!(negotiate.pfn_get_physical_device_proc_addr.is_some());

    let mut old = VkNegotiateLayerInterface {
        loader_layer_interface_version: 1,
        ..negotiate
    };
    assert_eq!(
        unsafe { vkNegotiateLoaderLayerInterfaceVersion(&mut old) },
        vk::Result::ERROR_INITIALIZATION_FAILED
    );
}

fn tool_name(props: &vk::PhysicalDeviceToolProperties<'_>) -> String {
    match props.name_as_c_str() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => panic!("tool name not terminated: {e}"),
    }
}

fn make_driver_tool<'a>() -> vk::PhysicalDeviceToolProperties<'a> {
    let mut props = vk::PhysicalDeviceToolProperties::default();
    for (d, s) in props.name.iter_mut().zip(b"driver-tool\0") {
        *d = *s as std::ffi::c_char;
    }
    props
}

#[test]
fn test_tool_record_prepended() {
    // Count-only query: one more than the driver reports.
    let mut count = 0;
    let result = unsafe {
        prepend_tool_record(&mut count, ptr::null_mut(), |count, _| {
            *count = 1;
            vk::Result::SUCCESS
        })
    };
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(count, 2);

    let mut records = [vk::PhysicalDeviceToolProperties::default(); 2];
    let mut count = 2;
    let result = unsafe {
        prepend_tool_record(&mut count, records.as_mut_ptr(), |count, props| {
            assert_eq!(*count, 1);
            *props = make_driver_tool();
            *count = 1;
            vk::Result::SUCCESS
        })
    };
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(count, 2);
    assert_eq!(tool_name(&records[0]), TOOL_NAME);
    assert!(records[0].purposes.contains(vk::ToolPurposeFlags::VALIDATION));
    assert_eq!(tool_name(&records[1]), "driver-tool");
}

#[test]
fn test_tool_record_without_room() {
    let mut records = [vk::PhysicalDeviceToolProperties::default(); 1];
    let mut count = 0;
    let result = unsafe { prepend_tool_record(&mut count, records.as_mut_ptr(), |_, _| panic!("driver asked")) };
    assert_eq!(result, vk::Result::INCOMPLETE);

    // Room for ours only: the driver sees zero capacity.
    let mut count = 1;
    let result = unsafe {
        prepend_tool_record(&mut count, records.as_mut_ptr(), |count, _| {
            assert_eq!(*count, 0);
            vk::Result::INCOMPLETE
        })
    };
    assert_eq!(result, vk::Result::INCOMPLETE);
    assert_eq!(count, 1);
    assert_eq!(tool_name(&records[0]), TOOL_NAME);
}

#[test]
fn test_validation_features_map_to_units() {
    assert_eq!(
        enable_flag(vk::ValidationFeatureEnableEXT::GPU_ASSISTED),
        Some(EnableFlag::GpuAssisted)
    );
    assert_eq!(
        enable_flag(vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION),
        Some(EnableFlag::SyncHazard)
    );
    assert_eq!(
        disable_flag(vk::ValidationFeatureDisableEXT::API_PARAMETERS),
        Some(DisableFlag::Stateless)
    );
    assert_eq!(disable_flag(vk::ValidationFeatureDisableEXT::SHADERS), None);

    let enables = [
        vk::ValidationFeatureEnableEXT::GPU_ASSISTED,
        vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
    ];
    let disables = [vk::ValidationFeatureDisableEXT::THREAD_SAFETY];
    let mut features = vk::ValidationFeaturesEXT::default()
        .enabled_validation_features(&enables)
        .disabled_validation_features(&disables);
    let create_info = vk::InstanceCreateInfo::default().push_next(&mut features);

    let (enables, disables) = unsafe { validation_features(&create_info) };
    assert_eq!(enables, vec![EnableFlag::GpuAssisted, EnableFlag::BestPractices]);
    assert_eq!(disables, vec![DisableFlag::ThreadSafety]);

    let selection = LayerSettings::default().resolve_units(&enables, &disables);
    assert!(selection.gpu_assisted);
    assert!(selection.best_practices);
    assert!(!selection.thread_safety);
    assert!(selection.core_checks);
}
