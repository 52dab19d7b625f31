use ash::vk;

use crate::error::SetupError;

/// Upper bound on the number of descriptor set slots the layer reasons
/// about, whatever the driver reports.
pub const MAX_RESERVED_SLOTS: u32 = 33;

/// Descriptor set slots available to instrumented pipelines on one device.
///
/// The last reserved slot belongs to the debug output binding; the
/// application sees one slot fewer than the device actually has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingBudget {
    reserved: u32,
}

/// How a pipeline layout is presented to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutPlan<T> {
    /// Application slots, empty padding, then the debug layout at the last
    /// reserved slot.
    Padded(Vec<T>),
    /// No room for the debug slot. Shaders using this layout must run
    /// uninstrumented.
    NoRoom { app_slots: u32, reserved: u32 },
}

impl<T> LayoutPlan<T> {
    pub fn is_padded(&self) -> bool {
        matches!(self, LayoutPlan::Padded(_))
    }
}

impl BindingBudget {
    /// `driver_limit` is `maxBoundDescriptorSets`; `cap` the configured
    /// ceiling, itself clamped to [`MAX_RESERVED_SLOTS`].
    pub fn reserve(driver_limit: u32, cap: u32) -> Result<Self, SetupError> {
        let reserved = driver_limit.min(cap.min(MAX_RESERVED_SLOTS));
        if reserved <= 1 {
            return Err(SetupError::BindingSlotsExhausted { limit: driver_limit });
        }
        Ok(Self { reserved })
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Set index of the debug output binding.
    pub fn debug_set_index(&self) -> u32 {
        self.reserved - 1
    }

    /// `maxBoundDescriptorSets` as reported to the application.
    pub fn reported_limit(&self) -> u32 {
        self.reserved - 1
    }

    pub fn fits(&self, app_slots: u32) -> bool {
        app_slots < self.reserved
    }

    /// Extend the application's set layouts with `empty` padding and `debug`
    /// at the reserved slot.
    pub fn pad_layouts<T: Clone>(&self, app: &[T], empty: &T, debug: &T) -> LayoutPlan<T> {
        let app_slots = app.len() as u32;
        if !self.fits(app_slots) {
            return LayoutPlan::NoRoom {
                app_slots,
                reserved: self.reserved,
            };
        }
        let mut padded = Vec::with_capacity(self.reserved as usize);
        padded.extend_from_slice(app);
        padded.resize(self.debug_set_index() as usize, empty.clone());
        padded.push(debug.clone());
        LayoutPlan::Padded(padded)
    }
}

/// Binding of the debug output storage buffer inside the debug set layout.
pub const DEBUG_OUTPUT_BINDING: u32 = 0;

/// Layout binding of the debug set: one storage buffer visible to every
/// stage.
pub fn debug_layout_binding() -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(DEBUG_OUTPUT_BINDING)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::ALL)
}
