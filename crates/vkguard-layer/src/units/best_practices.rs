//! Performance warnings. Nothing here ever blocks a call.

use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_core::{ErrorObject, RecordObject, Reporter};
use vkguard_state::DeviceState;

use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_SMALL_ALLOCATION: &str = "BestPractices-vkAllocateMemory-small-allocation";
pub const VUID_TOO_MANY_ALLOCATIONS: &str = "BestPractices-vkAllocateMemory-too-many-objects";
pub const VUID_ALIAS_WITHOUT_FLAG: &str = "BestPractices-vkBindImageMemory-non-alias-bit";
pub const VUID_ZERO_DRAW: &str = "BestPractices-vkCmdDraw-zero-count";

/// Allocations below this size should be sub-allocated from a larger block.
pub const SMALL_ALLOCATION_SIZE: u64 = 256 * 1024;
/// Live allocation count above which a warning is issued.
pub const ALLOCATION_WARN_COUNT: usize = 1024;

pub struct BestPractices {
    state: Arc<DeviceState>,
    reporter: Arc<Reporter>,
}

impl BestPractices {
    pub fn new(state: Arc<DeviceState>, reporter: Arc<Reporter>) -> Self {
        Self { state, reporter }
    }

    fn check_aliasing(&self, image: vk::Image, record: &RecordObject) {
        let Some(state) = self.state.images.get(image.as_raw()) else {
            return;
        };
        if state.desc.flags.contains(vk::ImageCreateFlags::ALIAS) {
            return;
        }
        for other in self.state.aliases_of(image) {
            self.reporter.log_performance(
                VUID_ALIAS_WITHOUT_FLAG,
                &[image.as_raw(), other.handle.as_raw()],
                &record.location,
                format_args!(
                    "image 0x{:x} shares memory with image 0x{:x} but was created without VK_IMAGE_CREATE_ALIAS_BIT",
                    image.as_raw(),
                    other.handle.as_raw()
                ),
            );
        }
    }
}

impl ValidationObject for BestPractices {
    fn kind(&self) -> UnitKind {
        UnitKind::BestPractices
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::AllocateMemory | Command::CmdDraw => Phases::VALIDATE,
            Command::BindImageMemory | Command::BindImageMemory2 => Phases::RECORD_AFTER,
            _ => Phases::empty(),
        }
    }

    fn pre_call_validate(&self, call: &Call, error: &ErrorObject) -> bool {
        let location = &error.location;
        match call {
            Call::AllocateMemory { size, .. } => {
                if *size < SMALL_ALLOCATION_SIZE {
                    self.reporter.log_performance(
                        VUID_SMALL_ALLOCATION,
                        &[],
                        &location.dot("pAllocateInfo").dot("allocationSize"),
                        format_args!(
                            "({size}) is below {SMALL_ALLOCATION_SIZE} bytes; sub-allocate small resources from larger blocks"
                        ),
                    );
                }
                let live = self.state.memories.len();
                if live >= ALLOCATION_WARN_COUNT {
                    self.reporter.log_performance(
                        VUID_TOO_MANY_ALLOCATIONS,
                        &[],
                        location,
                        format_args!("{live} device memory objects are already allocated"),
                    );
                }
            }
            Call::CmdDraw {
                command_buffer,
                vertex_count,
                instance_count,
            } if *vertex_count == 0 || *instance_count == 0 => {
                self.reporter.log_performance(
                    VUID_ZERO_DRAW,
                    &[command_buffer.as_raw()],
                    location,
                    format_args!(
                        "draw with vertexCount {vertex_count} and instanceCount {instance_count} records no work"
                    ),
                );
            }
            _ => {}
        }
        false
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        if let Call::BindImageMemory { binds } = call {
            if !record.succeeded() {
                return;
            }
            for bind in binds.iter() {
                self.check_aliasing(bind.image, record);
            }
        }
    }
}
