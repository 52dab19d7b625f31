//! Handle contexts: the per-instance and per-device bookkeeping, kept in
//! process-wide maps keyed by the loader dispatch key.
//!
//! The maps are only written by the create/destroy entry points; every
//! other call just looks its context up.

use std::sync::{Arc, Once, OnceLock};

use ash::vk::{self, Handle};
use dashmap::DashMap;
use tracing::{debug, info};
use vkguard_core::config::{LayerSettings, UnitSelection};
use vkguard_core::Reporter;
use vkguard_state::{DeviceState, InstanceState};

use crate::chassis::ValidationChain;
use crate::dispatch::{dispatch_key, DeviceDispatch, InstanceDispatch};

pub struct InstanceContext {
    pub handle: vk::Instance,
    pub api_version: u32,
    pub dispatch: Arc<InstanceDispatch>,
    pub chain: ValidationChain,
    pub settings: LayerSettings,
    pub selection: UnitSelection,
    pub reporter: Arc<Reporter>,
    /// Filled in by the state tracker once the instance exists.
    pub state: Arc<OnceLock<Arc<InstanceState>>>,
}

impl InstanceContext {
    pub fn instance_state(&self) -> Option<Arc<InstanceState>> {
        self.state.get().cloned()
    }
}

pub struct DeviceContext {
    pub handle: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    pub dispatch: Arc<DeviceDispatch>,
    pub instance: Arc<InstanceContext>,
    pub chain: ValidationChain,
    pub state: Arc<DeviceState>,
}

macro_rules! context_map {
    ($map_name:ident, $ty:ty, $fn_map:ident, $fn_store:ident, $fn_get:ident, $fn_remove:ident) => {
        static $map_name: OnceLock<DashMap<usize, Arc<$ty>>> = OnceLock::new();

        fn $fn_map() -> &'static DashMap<usize, Arc<$ty>> {
            $map_name.get_or_init(DashMap::new)
        }

        pub fn $fn_store(key: usize, context: Arc<$ty>) {
            if $fn_map().insert(key, context).is_some() {
                debug!(key, "replaced a stale {} context", stringify!($ty));
            }
        }

        pub fn $fn_get(key: usize) -> Option<Arc<$ty>> {
            $fn_map().get(&key).map(|v| Arc::clone(v.value()))
        }

        pub fn $fn_remove(key: usize) -> Option<Arc<$ty>> {
            $fn_map().remove(&key).map(|(_, v)| v)
        }
    };
}

context_map!(INSTANCE_MAP, InstanceContext, instance_map, store_instance, get_instance, remove_instance);
context_map!(DEVICE_MAP, DeviceContext, device_map, store_device, get_device, remove_device);

/// Context of the instance a dispatchable instance-level handle belongs to.
///
/// # Safety
/// `handle` must be a live `VkInstance` or `VkPhysicalDevice`.
pub unsafe fn instance_for<H: Handle>(handle: H) -> Option<Arc<InstanceContext>> {
    get_instance(unsafe { dispatch_key(handle) })
}

/// Context of the device a dispatchable device-level handle belongs to.
///
/// # Safety
/// `handle` must be a live `VkDevice`, `VkQueue` or `VkCommandBuffer`.
pub unsafe fn device_for<H: Handle>(handle: H) -> Option<Arc<DeviceContext>> {
    get_device(unsafe { dispatch_key(handle) })
}

/// Devices still registered under `instance`.
pub fn devices_of(instance: vk::Instance) -> Vec<vk::Device> {
    device_map()
        .iter()
        .filter(|entry| entry.value().instance.handle == instance)
        .map(|entry| entry.value().handle)
        .collect()
}

/// Unregister every device still alive under `instance`.
pub fn remove_devices_of(instance: vk::Instance) -> Vec<Arc<DeviceContext>> {
    let keys: Vec<usize> = device_map()
        .iter()
        .filter(|entry| entry.value().instance.handle == instance)
        .map(|entry| *entry.key())
        .collect();
    keys.into_iter().filter_map(remove_device).collect()
}

pub fn live_context_counts() -> (usize, usize) {
    (instance_map().len(), device_map().len())
}

static EXIT_HOOK: Once = Once::new();

/// Register the process-exit cleanup. Safe to call repeatedly.
pub fn register_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: `on_process_exit` is a plain extern "C" fn with no
        // captured state.
        let rc = unsafe { libc::atexit(on_process_exit) };
        if rc != 0 {
            debug!(rc, "atexit registration failed; no exit-time cleanup");
        }
    });
}

/// Tear down the units of every context still alive and leave the
/// contexts in pass-through mode. Dispatch tables stay valid, so an exit
/// handler that still calls the API is forwarded untouched.
extern "C" fn on_process_exit() {
    let devices: Vec<Arc<DeviceContext>> = device_map().iter().map(|e| Arc::clone(e.value())).collect();
    let instances: Vec<Arc<InstanceContext>> = instance_map().iter().map(|e| Arc::clone(e.value())).collect();
    if devices.is_empty() && instances.is_empty() {
        return;
    }
    info!(
        devices = devices.len(),
        instances = instances.len(),
        "process exit with live contexts; shutting validation down"
    );
    for device in devices {
        device.chain.shutdown();
    }
    for instance in instances {
        instance.chain.shutdown();
    }
}
