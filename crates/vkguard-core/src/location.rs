//! Short-lived records threaded through one intercepted call.
//!
//! None of these are stored past the call that created them.

use std::fmt;

use ash::vk;

/// Which call, and which argument of it, a diagnostic is about.
///
/// Locations form a chain through `prev` so nested fields can be described
/// without allocating, e.g. `vkCreateImage(): pCreateInfo.extent.width`.
#[derive(Debug, Clone, Copy)]
pub struct Location<'a> {
    pub function: &'static str,
    pub field: Option<&'static str>,
    pub index: Option<u32>,
    pub prev: Option<&'a Location<'a>>,
}

impl Location<'static> {
    pub const fn new(function: &'static str) -> Self {
        Self {
            function,
            field: None,
            index: None,
            prev: None,
        }
    }
}

impl<'a> Location<'a> {
    /// Descend into a named member.
    pub fn dot(&'a self, field: &'static str) -> Location<'a> {
        Location {
            function: self.function,
            field: Some(field),
            index: None,
            prev: Some(self),
        }
    }

    /// Descend into one element of an array member.
    pub fn index(&'a self, field: &'static str, index: u32) -> Location<'a> {
        Location {
            function: self.function,
            field: Some(field),
            index: Some(index),
            prev: Some(self),
        }
    }

    fn write_fields(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(field) = self.field else {
            return Ok(());
        };
        if let Some(prev) = self.prev {
            prev.write_fields(f)?;
            if prev.field.is_some() {
                f.write_str(".")?;
            }
        }
        f.write_str(field)?;
        if let Some(i) = self.index {
            write!(f, "[{}]", i)?;
        }
        Ok(())
    }
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}():", self.function)?;
        if self.field.is_some() {
            f.write_str(" ")?;
            self.write_fields(f)?;
        }
        Ok(())
    }
}

/// Read-only view handed to the validate phase.
#[derive(Debug, Clone, Copy)]
pub struct ErrorObject {
    pub location: Location<'static>,
    /// Raw value of the dispatchable handle the call came through.
    pub handle: u64,
}

impl ErrorObject {
    pub fn new(function: &'static str, handle: u64) -> Self {
        Self {
            location: Location::new(function),
            handle,
        }
    }
}

/// Carries the driver's result into the record-after phase.
#[derive(Debug, Clone, Copy)]
pub struct RecordObject {
    pub location: Location<'static>,
    pub result: vk::Result,
}

impl RecordObject {
    pub fn new(function: &'static str) -> Self {
        Self {
            location: Location::new(function),
            result: vk::Result::SUCCESS,
        }
    }

    /// True for `SUCCESS` and every other non-negative status code.
    pub fn succeeded(&self) -> bool {
        self.result.as_raw() >= 0
    }

    pub fn device_lost(&self) -> bool {
        self.result == vk::Result::ERROR_DEVICE_LOST
    }
}
