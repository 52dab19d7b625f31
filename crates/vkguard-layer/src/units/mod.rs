//! The concrete validation units and the builders that attach them to a
//! context, in registration order.

use std::sync::{Arc, OnceLock};

use ash::vk;
use vkguard_core::config::{LayerSettings, UnitSelection};
use vkguard_core::Reporter;
use vkguard_state::{DeviceState, InstanceState};

use crate::chassis::ValidationObject;

pub mod best_practices;
pub mod core_checks;
pub mod gpu_assisted;
pub mod object_lifetime;
pub mod state_tracker;
pub mod stateless;
pub mod sync_hazard;
pub mod thread_safety;
pub mod trampoline;

pub use best_practices::BestPractices;
pub use core_checks::CoreChecks;
pub use gpu_assisted::{GpuAssisted, GpuAvDriver, GpuAvInstance};
pub use object_lifetime::ObjectLifetime;
pub use state_tracker::StateTracker;
pub use stateless::Stateless;
pub use sync_hazard::SyncHazard;
pub use thread_safety::ThreadSafety;
pub use trampoline::DeviceTrampolines;

/// Which context a unit instance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Instance,
    Device,
}

/// Everything an instance-level unit may capture at construction.
pub struct InstanceSetup {
    pub settings: LayerSettings,
    pub selection: UnitSelection,
    pub reporter: Arc<Reporter>,
    pub state: Arc<OnceLock<Arc<InstanceState>>>,
}

/// Everything a device-level unit may capture at construction. Built after
/// the driver created the device.
pub struct DeviceSetup {
    pub device: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    pub settings: LayerSettings,
    pub selection: UnitSelection,
    pub reporter: Arc<Reporter>,
    pub state: Arc<DeviceState>,
    /// Real driver properties, never the adjusted ones the application sees.
    pub properties: vk::PhysicalDeviceProperties,
}

pub fn instance_units(setup: &InstanceSetup) -> Vec<Box<dyn ValidationObject>> {
    let selection = &setup.selection;
    let mut units: Vec<Box<dyn ValidationObject>> = Vec::new();
    if selection.object_lifetime {
        units.push(Box::new(ObjectLifetime::new(Scope::Instance, setup.reporter.clone())));
    }
    if selection.stateless {
        units.push(Box::new(Stateless::for_instance(setup.reporter.clone())));
    }
    units.push(Box::new(StateTracker::for_instance(setup.state.clone())));
    if selection.gpu_assisted {
        units.push(Box::new(GpuAvInstance::new(
            &setup.settings.gpu_assisted,
            setup.reporter.clone(),
        )));
    }
    units
}

/// Device units for `setup`. `driver` backs the GPU-assisted unit and is
/// only consulted when that unit is selected.
pub fn device_units<D: GpuAvDriver>(setup: &DeviceSetup, driver: Option<Arc<D>>) -> Vec<Box<dyn ValidationObject>> {
    let selection = &setup.selection;
    let reporter = &setup.reporter;
    let mut units: Vec<Box<dyn ValidationObject>> = Vec::new();
    if selection.thread_safety {
        units.push(Box::new(ThreadSafety::new(setup.state.clone(), reporter.clone())));
    }
    if selection.object_lifetime {
        units.push(Box::new(ObjectLifetime::new(Scope::Device, reporter.clone())));
    }
    if selection.stateless {
        units.push(Box::new(Stateless::for_device(reporter.clone(), setup.properties.limits)));
    }
    units.push(Box::new(StateTracker::for_device(setup.state.clone())));
    if selection.core_checks {
        units.push(Box::new(CoreChecks::new(setup.state.clone(), reporter.clone())));
    }
    if selection.best_practices {
        units.push(Box::new(BestPractices::new(setup.state.clone(), reporter.clone())));
    }
    if selection.gpu_assisted {
        if let Some(driver) = driver {
            units.push(Box::new(GpuAssisted::new(driver, setup)));
        }
    }
    if selection.sync_hazard {
        units.push(Box::new(SyncHazard::new(reporter.clone())));
    }
    units
}
