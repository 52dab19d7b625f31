//! Integration test: opt-in units
//!
//! Synchronization hazards between transfer commands, and best-practice
//! warnings that never block a call.

use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_core::config::{LockingMode, MessageSettings};
use vkguard_core::{MemorySink, Reporter};
use vkguard_layer::call::{BufferBarrier, Call};
use vkguard_layer::chassis::{Command, ValidationChain, ValidationObject, SKIPPED_RESULT};
use vkguard_layer::units::best_practices::{VUID_SMALL_ALLOCATION, VUID_ZERO_DRAW};
use vkguard_layer::units::sync_hazard::{VUID_READ_AFTER_WRITE, VUID_WRITE_AFTER_READ, VUID_WRITE_AFTER_WRITE};
use vkguard_layer::units::{BestPractices, SyncHazard};
use vkguard_state::{DeviceState, InstanceState};

const CB: u64 = 0x10;
const SRC: u64 = 0x100;
const DST: u64 = 0x200;

fn make_reporter() -> (Arc<Reporter>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Arc::new(Reporter::new(sink.clone(), &MessageSettings::default())), sink)
}

fn make_chain(unit: Box<dyn ValidationObject>, reporter: Arc<Reporter>) -> ValidationChain {
    ValidationChain::new(vec![unit], LockingMode::Fine, reporter)
}

fn make_hazard_chain() -> (ValidationChain, Arc<MemorySink>) {
    let (reporter, sink) = make_reporter();
    (make_chain(Box::new(SyncHazard::new(reporter.clone())), reporter), sink)
}

fn copy(chain: &ValidationChain, src_offset: u64, dst_offset: u64, size: u64) -> vk::Result {
    let mut call = Call::CmdCopyBuffer {
        command_buffer: vk::CommandBuffer::from_raw(CB),
        src: vk::Buffer::from_raw(SRC),
        dst: vk::Buffer::from_raw(DST),
        regions: vec![vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        }],
    };
    chain.run(Command::CmdCopyBuffer, CB, &mut call, |_| vk::Result::SUCCESS)
}

fn fill(chain: &ValidationChain, buffer: u64, offset: u64, size: u64) -> vk::Result {
    let mut call = Call::CmdFillBuffer {
        command_buffer: vk::CommandBuffer::from_raw(CB),
        dst: vk::Buffer::from_raw(buffer),
        offset,
        size,
    };
    chain.run(Command::CmdFillBuffer, CB, &mut call, |_| vk::Result::SUCCESS)
}

fn barrier(chain: &ValidationChain, memory_barriers: u32, buffer_barriers: Vec<BufferBarrier>) {
    let mut call = Call::CmdPipelineBarrier {
        command_buffer: vk::CommandBuffer::from_raw(CB),
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        memory_barriers,
        buffer_barriers,
    };
    chain.run(Command::CmdPipelineBarrier, CB, &mut call, |_| vk::Result::SUCCESS);
}

#[test]
fn test_write_then_write_without_barrier() {
    let (chain, sink) = make_hazard_chain();
    assert_eq!(copy(&chain, 0, 0, 64), vk::Result::SUCCESS);

    assert_eq!(fill(&chain, DST, 32, 64), SKIPPED_RESULT);
    assert_eq!(sink.count(VUID_WRITE_AFTER_WRITE), 1);
}

#[test]
fn test_read_after_write_and_write_after_read() {
    let (chain, sink) = make_hazard_chain();
    // Writes SRC, then the copy reads it.
    assert_eq!(fill(&chain, SRC, 0, 128), vk::Result::SUCCESS);
    assert_eq!(copy(&chain, 0, 0, 64), SKIPPED_RESULT);
    assert!(sink.has(VUID_READ_AFTER_WRITE));

    let (chain, sink) = make_hazard_chain();
    // Reads SRC, then a fill overwrites it.
    assert_eq!(copy(&chain, 0, 0, 64), vk::Result::SUCCESS);
    assert_eq!(fill(&chain, SRC, 0, vk::WHOLE_SIZE), SKIPPED_RESULT);
    assert!(sink.has(VUID_WRITE_AFTER_READ));
}

#[test]
fn test_disjoint_ranges_do_not_conflict() {
    let (chain, sink) = make_hazard_chain();
    assert_eq!(copy(&chain, 0, 0, 64), vk::Result::SUCCESS);
    assert_eq!(fill(&chain, DST, 64, 64), vk::Result::SUCCESS);
    assert!(sink.messages().is_empty(), "{:?}", sink.messages());
}

#[test]
fn test_memory_barrier_clears_hazards() {
    let (chain, sink) = make_hazard_chain();
    copy(&chain, 0, 0, 64);
    barrier(&chain, 1, Vec::new());

    assert_eq!(fill(&chain, DST, 0, 64), vk::Result::SUCCESS);
    assert!(sink.messages().is_empty());
}

#[test]
fn test_buffer_barrier_clears_only_its_range() {
    let (chain, sink) = make_hazard_chain();
    copy(&chain, 0, 0, 64);
    barrier(
        &chain,
        0,
        vec![BufferBarrier {
            buffer: vk::Buffer::from_raw(DST),
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        }],
    );

    assert_eq!(fill(&chain, DST, 0, 64), vk::Result::SUCCESS);
    // The read of SRC was not covered.
    assert_eq!(fill(&chain, SRC, 0, 64), SKIPPED_RESULT);
    assert_eq!(sink.count(VUID_WRITE_AFTER_READ), 1);
}

#[test]
fn test_begin_resets_recorded_accesses() {
    let (chain, sink) = make_hazard_chain();
    copy(&chain, 0, 0, 64);
    let mut begin = Call::BeginCommandBuffer {
        command_buffer: vk::CommandBuffer::from_raw(CB),
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
    };
    chain.run(Command::BeginCommandBuffer, CB, &mut begin, |_| vk::Result::SUCCESS);

    assert_eq!(fill(&chain, DST, 0, 64), vk::Result::SUCCESS);
    assert!(sink.messages().is_empty());
}

fn make_best_practices() -> (ValidationChain, Arc<MemorySink>) {
    let (reporter, sink) = make_reporter();
    let instance = Arc::new(InstanceState::new(vk::Instance::from_raw(0x1), vk::API_VERSION_1_3));
    let state = Arc::new(DeviceState::new(
        vk::Device::from_raw(0x2),
        vk::PhysicalDevice::from_raw(0x3),
        Some(instance),
    ));
    (make_chain(Box::new(BestPractices::new(state, reporter.clone())), reporter), sink)
}

#[test]
fn test_best_practices_warn_without_skipping() {
    let (chain, sink) = make_best_practices();

    let mut alloc = Call::AllocateMemory {
        size: 4096,
        type_index: 0,
        memory: vk::DeviceMemory::null(),
    };
    assert_eq!(
        chain.run(Command::AllocateMemory, 0x2, &mut alloc, |_| vk::Result::SUCCESS),
        vk::Result::SUCCESS
    );

    let mut draw = Call::CmdDraw {
        command_buffer: vk::CommandBuffer::from_raw(CB),
        vertex_count: 0,
        instance_count: 1,
    };
    assert_eq!(
        chain.run(Command::CmdDraw, CB, &mut draw, |_| vk::Result::SUCCESS),
        vk::Result::SUCCESS
    );

    assert_eq!(sink.count(VUID_SMALL_ALLOCATION), 1);
    assert_eq!(sink.count(VUID_ZERO_DRAW), 1);
}

#[test]
fn test_performance_messages_can_be_switched_off() {
    let sink = Arc::new(MemorySink::new());
    let settings = MessageSettings {
        report_performance: false,
        ..MessageSettings::default()
    };
    let reporter = Arc::new(Reporter::new(sink.clone(), &settings));
    let instance = Arc::new(InstanceState::new(vk::Instance::from_raw(0x1), vk::API_VERSION_1_3));
    let state = Arc::new(DeviceState::new(
        vk::Device::from_raw(0x2),
        vk::PhysicalDevice::from_raw(0x3),
        Some(instance),
    ));
    let chain = make_chain(Box::new(BestPractices::new(state, reporter.clone())), reporter);

    let mut alloc = Call::AllocateMemory {
        size: 16,
        type_index: 0,
        memory: vk::DeviceMemory::null(),
    };
    chain.run(Command::AllocateMemory, 0x2, &mut alloc, |_| vk::Result::SUCCESS);
    assert!(sink.messages().is_empty());
}
