//! Buffer hazards between transfer commands recorded into one command
//! buffer without a pipeline barrier in between.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_core::{ErrorObject, RecordObject, Reporter};

use crate::call::{BufferBarrier, Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_READ_AFTER_WRITE: &str = "SYNC-HAZARD-READ-AFTER-WRITE";
pub const VUID_WRITE_AFTER_WRITE: &str = "SYNC-HAZARD-WRITE-AFTER-WRITE";
pub const VUID_WRITE_AFTER_READ: &str = "SYNC-HAZARD-WRITE-AFTER-READ";

/// One buffer range touched by a recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Access {
    buffer: u64,
    offset: u64,
    /// `vk::WHOLE_SIZE` runs to the end of the buffer.
    size: u64,
    write: bool,
}

impl Access {
    fn end(&self) -> u64 {
        if self.size == vk::WHOLE_SIZE {
            u64::MAX
        } else {
            self.offset.saturating_add(self.size)
        }
    }

    fn overlaps(&self, other: &Access) -> bool {
        self.buffer == other.buffer && self.offset < other.end() && other.offset < self.end()
    }

    fn covered_by(&self, barrier: &BufferBarrier) -> bool {
        let range = Access {
            buffer: barrier.buffer.as_raw(),
            offset: barrier.offset,
            size: barrier.size,
            write: false,
        };
        self.overlaps(&range)
    }
}

fn accesses_of(call: &Call) -> Vec<Access> {
    match call {
        Call::CmdCopyBuffer { src, dst, regions, .. } => regions
            .iter()
            .flat_map(|region| {
                [
                    Access {
                        buffer: src.as_raw(),
                        offset: region.src_offset,
                        size: region.size,
                        write: false,
                    },
                    Access {
                        buffer: dst.as_raw(),
                        offset: region.dst_offset,
                        size: region.size,
                        write: true,
                    },
                ]
            })
            .collect(),
        Call::CmdFillBuffer { dst, offset, size, .. } => vec![Access {
            buffer: dst.as_raw(),
            offset: *offset,
            size: *size,
            write: true,
        }],
        _ => Vec::new(),
    }
}

pub struct SyncHazard {
    reporter: Arc<Reporter>,
    /// Accesses recorded since the last barrier, per command buffer.
    accesses: HashMap<u64, Vec<Access>>,
    pool_of: HashMap<u64, u64>,
}

impl SyncHazard {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self {
            reporter,
            accesses: HashMap::new(),
            pool_of: HashMap::new(),
        }
    }

    fn hazard(prior: &Access, next: &Access) -> Option<&'static str> {
        if !prior.overlaps(next) {
            return None;
        }
        match (prior.write, next.write) {
            (true, false) => Some(VUID_READ_AFTER_WRITE),
            (true, true) => Some(VUID_WRITE_AFTER_WRITE),
            (false, true) => Some(VUID_WRITE_AFTER_READ),
            (false, false) => None,
        }
    }

    fn barrier(&mut self, command_buffer: u64, memory_barriers: u32, buffer_barriers: &[BufferBarrier]) {
        let Some(recorded) = self.accesses.get_mut(&command_buffer) else {
            return;
        };
        if memory_barriers > 0 {
            recorded.clear();
        } else {
            recorded.retain(|access| !buffer_barriers.iter().any(|b| access.covered_by(b)));
        }
    }
}

impl ValidationObject for SyncHazard {
    fn kind(&self) -> UnitKind {
        UnitKind::SyncHazard
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::CmdCopyBuffer | Command::CmdFillBuffer => Phases::VALIDATE | Phases::RECORD_BEFORE,
            Command::AllocateCommandBuffers => Phases::RECORD_AFTER,
            Command::CmdPipelineBarrier
            | Command::BeginCommandBuffer
            | Command::ResetCommandBuffer
            | Command::FreeCommandBuffers
            | Command::ResetCommandPool
            | Command::DestroyCommandPool => Phases::RECORD_BEFORE,
            _ => Phases::empty(),
        }
    }

    fn pre_call_validate(&self, call: &Call, error: &ErrorObject) -> bool {
        let Some(cb) = call.command_buffer() else {
            return false;
        };
        let Some(recorded) = self.accesses.get(&cb.as_raw()) else {
            return false;
        };
        let mut skip = false;
        for next in accesses_of(call) {
            let Some((prior, vuid)) = recorded
                .iter()
                .find_map(|prior| Self::hazard(prior, &next).map(|vuid| (prior, vuid)))
            else {
                continue;
            };
            skip |= self.reporter.log_error(
                vuid,
                &[cb.as_raw(), next.buffer],
                &error.location,
                format_args!(
                    "{} of buffer 0x{:x} [{}, +{}) conflicts with an earlier {} [{}, +{}) in the same command buffer \
                     with no barrier in between",
                    if next.write { "write" } else { "read" },
                    next.buffer,
                    next.offset,
                    next.size,
                    if prior.write { "write" } else { "read" },
                    prior.offset,
                    prior.size,
                ),
            );
        }
        skip
    }

    fn pre_call_record(&mut self, call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {
        match &*call {
            Call::CmdCopyBuffer { command_buffer, .. } | Call::CmdFillBuffer { command_buffer, .. } => {
                let accesses = accesses_of(call);
                self.accesses.entry(command_buffer.as_raw()).or_default().extend(accesses);
            }
            Call::CmdPipelineBarrier {
                command_buffer,
                memory_barriers,
                buffer_barriers,
                ..
            } => self.barrier(command_buffer.as_raw(), *memory_barriers, buffer_barriers),
            Call::BeginCommandBuffer { command_buffer, .. } | Call::ResetCommandBuffer { command_buffer } => {
                self.accesses.remove(&command_buffer.as_raw());
            }
            Call::FreeCommandBuffers { buffers, .. } => {
                for cb in buffers {
                    self.accesses.remove(&cb.as_raw());
                    self.pool_of.remove(&cb.as_raw());
                }
            }
            Call::ResetCommandPool { pool } | Call::DestroyCommandPool { pool } => {
                let pool = pool.as_raw();
                let members: Vec<u64> = self
                    .pool_of
                    .iter()
                    .filter(|(_, p)| **p == pool)
                    .map(|(cb, _)| *cb)
                    .collect();
                for cb in members {
                    self.accesses.remove(&cb);
                    if matches!(&*call, Call::DestroyCommandPool { .. }) {
                        self.pool_of.remove(&cb);
                    }
                }
            }
            _ => {}
        }
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        if let Call::AllocateCommandBuffers { pool, buffers, .. } = call {
            if record.succeeded() {
                for cb in buffers.iter() {
                    self.pool_of.insert(cb.as_raw(), pool.as_raw());
                }
            }
        }
    }

    fn teardown(&mut self) {
        self.accesses.clear();
        self.pool_of.clear();
    }
}
