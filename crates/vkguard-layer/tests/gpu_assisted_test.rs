//! Integration test: GPU-assisted validation unit
//!
//! A host-memory fake stands in for the device's driver. Covers setup on
//! devices with and without room for the debug set, pipeline layout
//! padding, shader instrumentation and module substitution, output
//! readback across re-recording and resets, and teardown.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkguard_core::config::{GpuAvSettings, LayerSettings, LockingMode, MessageSettings, UnitSelection};
use vkguard_core::{MemorySink, RecordObject, Reporter};
use vkguard_gpuav::instrument::site_tag;
use vkguard_gpuav::output::VUID_DESCRIPTOR_INDEX_OOB;
use vkguard_gpuav::spirv::{decoration, encode_string, op, storage_class, MAGIC};
use vkguard_gpuav::{BindingBudget, DescriptorBackend, GpuAllocator, OutputBuffer};
use vkguard_layer::call::{Call, CallScratch, PipelineDesc, PipelineStage};
use vkguard_layer::chassis::{Command, UnitKind, ValidationChain, ValidationObject};
use vkguard_layer::units::{device_units, DeviceSetup, GpuAssisted, GpuAvDriver, GpuAvInstance};
use vkguard_state::{DeviceState, InstanceState};

const DEVICE: u64 = 0x2;

#[derive(Default)]
struct FakeDriver {
    next: AtomicU64,
    set_layouts: Mutex<Vec<(vk::DescriptorSetLayout, usize)>>,
    pipeline_layouts: Mutex<Vec<vk::PipelineLayout>>,
    modules: Mutex<Vec<vk::ShaderModule>>,
    buffers: Mutex<Vec<vk::Buffer>>,
    memory: Mutex<HashMap<u64, Box<[u32]>>>,
    pools: Mutex<Vec<vk::DescriptorPool>>,
    written: Mutex<Vec<(vk::DescriptorSet, vk::Buffer)>>,
    calls: AtomicU64,
}

impl FakeDriver {
    fn handle(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.next.fetch_add(1, Ordering::Relaxed) + 0x9000
    }

    fn debug_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts
            .lock()
            .iter()
            .find(|(_, bindings)| *bindings == 1)
            .map(|(layout, _)| *layout)
    }

    /// Simulate an instrumented shader reporting into every output buffer.
    fn report_oob(&self, shader_id: u16, site: u32) {
        for backing in self.memory.lock().values_mut() {
            backing[0] = 1;
            backing[1] = site_tag(shader_id, site);
        }
    }

    fn live_objects(&self) -> usize {
        self.set_layouts.lock().len()
            + self.pipeline_layouts.lock().len()
            + self.buffers.lock().len()
            + self.memory.lock().len()
            + self.pools.lock().len()
    }
}

impl GpuAllocator for FakeDriver {
    fn create_buffer(&self, _size: u64, _usage: vk::BufferUsageFlags) -> Result<vk::Buffer, vk::Result> {
        let buffer = vk::Buffer::from_raw(self.handle());
        self.buffers.lock().push(buffer);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.buffers.lock().retain(|b| *b != buffer);
    }

    fn buffer_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 1024,
            alignment: 16,
            memory_type_bits: 0b1,
        }
    }

    fn find_memory_type(&self, type_bits: u32, _flags: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..32).find(|i| type_bits & (1 << i) != 0)
    }

    fn allocate_memory(&self, size: u64, _type_index: u32) -> Result<vk::DeviceMemory, vk::Result> {
        let raw = self.handle();
        self.memory
            .lock()
            .insert(raw, vec![0; (size / 4) as usize].into_boxed_slice());
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.memory.lock().remove(&memory.as_raw());
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory, _offset: u64) -> Result<(), vk::Result> {
        Ok(())
    }

    fn map_memory(&self, memory: vk::DeviceMemory, _offset: u64, _size: u64) -> Result<*mut c_void, vk::Result> {
        match self.memory.lock().get_mut(&memory.as_raw()) {
            Some(backing) => Ok(backing.as_mut_ptr() as *mut c_void),
            None => Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        }
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}
}

impl DescriptorBackend for FakeDriver {
    fn create_pool(&self, _max_sets: u32) -> Result<vk::DescriptorPool, vk::Result> {
        let pool = vk::DescriptorPool::from_raw(self.handle());
        self.pools.lock().push(pool);
        Ok(pool)
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.pools.lock().retain(|p| *p != pool);
    }

    fn allocate_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        Ok((0..count).map(|_| vk::DescriptorSet::from_raw(self.handle())).collect())
    }

    fn free_sets(&self, _pool: vk::DescriptorPool, _sets: &[vk::DescriptorSet]) {}
}

impl GpuAvDriver for FakeDriver {
    fn create_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        let layout = vk::DescriptorSetLayout::from_raw(self.handle());
        self.set_layouts.lock().push((layout, bindings.len()));
        Ok(layout)
    }

    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.set_layouts.lock().retain(|(l, _)| *l != layout);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout, vk::Result> {
        let layout = vk::PipelineLayout::from_raw(self.handle());
        self.pipeline_layouts.lock().push(layout);
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.pipeline_layouts.lock().retain(|l| *l != layout);
    }

    fn create_shader_module(&self, _words: &[u32]) -> Result<vk::ShaderModule, vk::Result> {
        let module = vk::ShaderModule::from_raw(self.handle());
        self.modules.lock().push(module);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.modules.lock().retain(|m| *m != module);
    }

    fn write_output_descriptor(&self, set: vk::DescriptorSet, output: &OutputBuffer) {
        self.written.lock().push((set, output.buffer));
    }

    fn cmd_bind_debug_set(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _set_index: u32,
        _set: vk::DescriptorSet,
    ) {
    }
}

fn make_setup(limit: u32) -> (DeviceSetup, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(Reporter::new(sink.clone(), &MessageSettings::default()));
    let instance = Arc::new(InstanceState::new(vk::Instance::from_raw(0x1), vk::API_VERSION_1_3));
    let state = Arc::new(DeviceState::new(
        vk::Device::from_raw(DEVICE),
        vk::PhysicalDevice::from_raw(0x3),
        Some(instance),
    ));
    let mut properties = vk::PhysicalDeviceProperties::default();
    properties.limits.max_bound_descriptor_sets = limit;

    let selection = UnitSelection {
        thread_safety: false,
        object_lifetime: false,
        stateless: false,
        core_checks: true,
        best_practices: false,
        gpu_assisted: true,
        sync_hazard: false,
    };
    let setup = DeviceSetup {
        device: vk::Device::from_raw(DEVICE),
        physical_device: vk::PhysicalDevice::from_raw(0x3),
        settings: LayerSettings::default(),
        selection,
        reporter: reporter.clone(),
        state,
        properties,
    };
    (setup, sink)
}

fn make_chain(limit: u32) -> (ValidationChain, Arc<MemorySink>, Arc<FakeDriver>) {
    let (setup, sink) = make_setup(limit);
    let reporter = setup.reporter.clone();
    let driver = Arc::new(FakeDriver::default());
    let units = device_units(&setup, Some(driver.clone()));
    let chain = ValidationChain::new(units, LockingMode::Fine, reporter);
    chain.setup("vkCreateDevice");
    (chain, sink, driver)
}

/// Forwarded set layouts of a two-slot application pipeline layout.
fn create_pipeline_layout(chain: &ValidationChain) -> Vec<vk::DescriptorSetLayout> {
    let mut call = Call::CreatePipelineLayout {
        set_layouts: vec![vk::DescriptorSetLayout::from_raw(0xa1), vk::DescriptorSetLayout::from_raw(0xa2)],
        app_set_count: 2,
        push_constant_ranges: 0,
        layout: vk::PipelineLayout::null(),
    };
    let mut forwarded = Vec::new();
    chain.run(Command::CreatePipelineLayout, DEVICE, &mut call, |call| {
        if let Call::CreatePipelineLayout { set_layouts, layout, .. } = call {
            forwarded = set_layouts.clone();
            *layout = vk::PipelineLayout::from_raw(0xb0);
        }
        vk::Result::SUCCESS
    });
    forwarded
}

fn word(opcode: u16, operands: &[u32]) -> Vec<u32> {
    let mut out = vec![(((operands.len() + 1) as u32) << 16) | opcode as u32];
    out.extend_from_slice(operands);
    out
}

/// Compute shader indexing into a 4-element sampler array.
fn make_compute_module() -> Vec<u32> {
    let mut words = vec![MAGIC, 0x0001_0000, 0, 15, 0];
    words.extend(word(op::CAPABILITY, &[1]));
    words.extend(word(op::MEMORY_MODEL, &[0, 1]));
    let mut ep = vec![5, 11];
    ep.extend(encode_string("main"));
    words.extend(word(op::ENTRY_POINT, &ep));
    words.extend(word(op::EXECUTION_MODE, &[11, 17, 1, 1, 1]));
    words.extend(word(op::DECORATE, &[9, decoration::DESCRIPTOR_SET, 0]));
    words.extend(word(op::DECORATE, &[9, decoration::BINDING, 0]));
    words.extend(word(op::TYPE_VOID, &[1]));
    words.extend(word(op::TYPE_FUNCTION, &[2, 1]));
    words.extend(word(op::TYPE_INT, &[3, 32, 0]));
    words.extend(word(op::CONSTANT, &[3, 4, 4]));
    words.extend(word(26, &[5]));
    words.extend(word(op::TYPE_ARRAY, &[6, 5, 4]));
    words.extend(word(op::TYPE_POINTER, &[7, storage_class::UNIFORM_CONSTANT, 6]));
    words.extend(word(op::TYPE_POINTER, &[8, storage_class::UNIFORM_CONSTANT, 5]));
    words.extend(word(op::VARIABLE, &[7, 9, storage_class::UNIFORM_CONSTANT]));
    words.extend(word(op::CONSTANT, &[3, 10, 2]));
    words.extend(word(op::FUNCTION, &[1, 11, 0, 2]));
    words.extend(word(op::LABEL, &[12]));
    words.extend(word(op::ACCESS_CHAIN, &[8, 13, 9, 10]));
    words.extend(word(op::LOAD, &[5, 14, 13]));
    words.extend(word(253, &[]));
    words.extend(word(op::FUNCTION_END, &[]));
    words
}

/// Shader with an entry point and no descriptor indexing.
fn make_plain_module() -> Vec<u32> {
    let mut words = vec![MAGIC, 0x0001_0000, 0, 4, 0];
    words.extend(word(op::CAPABILITY, &[1]));
    words.extend(word(op::MEMORY_MODEL, &[0, 1]));
    let mut ep = vec![5, 3];
    ep.extend(encode_string("main"));
    words.extend(word(op::ENTRY_POINT, &ep));
    words.extend(word(op::TYPE_VOID, &[1]));
    words.extend(word(op::TYPE_FUNCTION, &[2, 1]));
    words.extend(word(op::FUNCTION, &[1, 3, 0, 2]));
    words.extend(word(op::FUNCTION_END, &[]));
    words
}

/// Create a module through the chain. Returns whether the driver received
/// instrumented code.
fn create_module(chain: &ValidationChain, words: &[u32], raw: u64) -> bool {
    let mut call = Call::CreateShaderModule {
        code_size: words.len() * 4,
        code: Arc::from(words.to_vec()),
        code_override: None,
        module: vk::ShaderModule::null(),
    };
    let mut instrumented = false;
    chain.run(Command::CreateShaderModule, DEVICE, &mut call, |call| {
        if let Call::CreateShaderModule {
            code_override, module, ..
        } = call
        {
            instrumented = code_override.is_some();
            *module = vk::ShaderModule::from_raw(raw);
        }
        vk::Result::SUCCESS
    });
    instrumented
}

fn run_simple(chain: &ValidationChain, command: Command, handle: u64, mut call: Call) {
    let result = chain.run(command, handle, &mut call, |_| vk::Result::SUCCESS);
    assert_eq!(result, vk::Result::SUCCESS, "{command:?} was skipped");
}

/// Begin, end and submit `command_buffer` on queue 0x500.
fn record_and_submit(chain: &ValidationChain, command_buffer: vk::CommandBuffer) {
    let raw = command_buffer.as_raw();
    run_simple(
        chain,
        Command::BeginCommandBuffer,
        raw,
        Call::BeginCommandBuffer {
            command_buffer,
            flags: vk::CommandBufferUsageFlags::empty(),
        },
    );
    run_simple(chain, Command::EndCommandBuffer, raw, Call::EndCommandBuffer { command_buffer });
    run_simple(
        chain,
        Command::QueueSubmit,
        0x500,
        Call::QueueSubmit {
            queue: vk::Queue::from_raw(0x500),
            batches: vec![vec![command_buffer]],
            fence: vk::Fence::from_raw(0x600),
        },
    );
}

#[test]
fn test_single_slot_device_aborts_unit_only() {
    let (chain, sink, driver) = make_chain(1);

    assert_eq!(chain.aborted_kinds(), vec![UnitKind::GpuAssisted]);
    assert!(chain.is_active(UnitKind::CoreChecks));
    assert!(chain.is_active(UnitKind::StateTracker));
    assert!(sink.has("VKGUARD-unit-setup-failed"));
    // The budget is checked before any driver object exists.
    assert_eq!(driver.calls.load(Ordering::Relaxed), 0);

    let forwarded = create_pipeline_layout(&chain);
    assert_eq!(
        forwarded,
        vec![vk::DescriptorSetLayout::from_raw(0xa1), vk::DescriptorSetLayout::from_raw(0xa2)]
    );

    // Teardown of an aborted unit must tolerate objects it never created.
    chain.teardown();
    assert_eq!(driver.live_objects(), 0);
}

#[test]
fn test_pipeline_layout_padded_to_debug_slot() {
    let (chain, sink, driver) = make_chain(8);
    assert!(chain.aborted_kinds().is_empty(), "{:?}", sink.messages());

    let forwarded = create_pipeline_layout(&chain);
    let budget = match BindingBudget::reserve(8, GpuAvSettings::default().max_binding_slots) {
        Ok(b) => b,
        Err(e) => panic!("budget: {e}"),
    };
    println!("forwarded layouts: {forwarded:?}");
    assert_eq!(forwarded.len(), budget.reserved() as usize);
    assert_eq!(forwarded[0].as_raw(), 0xa1);
    assert_eq!(forwarded[1].as_raw(), 0xa2);
    assert_eq!(forwarded.last().copied(), driver.debug_layout());
}

#[test]
fn test_layout_without_room_is_forwarded_unchanged() {
    let (chain, sink, _) = make_chain(2);
    let forwarded = create_pipeline_layout(&chain);

    assert_eq!(forwarded.len(), 2);
    assert!(sink.has("GPUAV-pipeline-layout-no-room"));
}

#[test]
fn test_shader_module_receives_instrumented_code() {
    let (chain, _, _) = make_chain(8);
    let words = make_compute_module();
    let mut call = Call::CreateShaderModule {
        code_size: words.len() * 4,
        code: Arc::from(words.clone()),
        code_override: None,
        module: vk::ShaderModule::null(),
    };

    let mut forwarded_len = 0;
    let result = chain.run(Command::CreateShaderModule, DEVICE, &mut call, |call| {
        match call {
            Call::CreateShaderModule {
                code_override: Some(code),
                module,
                ..
            } => {
                forwarded_len = code.len();
                *module = vk::ShaderModule::from_raw(0xc0);
            }
            other => panic!("module was not instrumented: {other:?}"),
        }
        vk::Result::SUCCESS
    });

    assert_eq!(result, vk::Result::SUCCESS);
    assert!(forwarded_len > words.len());
    // The application's copy is untouched.
    match &call {
        Call::CreateShaderModule { code, .. } => assert_eq!(&code[..], &words[..]),
        other => panic!("unexpected call {other:?}"),
    }
}

#[test]
fn test_output_read_back_after_queue_idle() {
    let (chain, sink, driver) = make_chain(8);
    let command_buffer = vk::CommandBuffer::from_raw(0x400);
    let queue = vk::Queue::from_raw(0x500);

    let mut begin = Call::BeginCommandBuffer {
        command_buffer,
        flags: vk::CommandBufferUsageFlags::empty(),
    };
    chain.run(Command::BeginCommandBuffer, 0x400, &mut begin, |_| vk::Result::SUCCESS);
    assert_eq!(driver.written.lock().len(), 1);

    let mut end = Call::EndCommandBuffer { command_buffer };
    chain.run(Command::EndCommandBuffer, 0x400, &mut end, |_| vk::Result::SUCCESS);

    let mut submit = Call::QueueSubmit {
        queue,
        batches: vec![vec![command_buffer]],
        fence: vk::Fence::null(),
    };
    assert_eq!(
        chain.run(Command::QueueSubmit, 0x500, &mut submit, |_| vk::Result::SUCCESS),
        vk::Result::SUCCESS
    );

    driver.report_oob(0xbeef, 3);
    let mut wait = Call::QueueWaitIdle { queue };
    chain.run(Command::QueueWaitIdle, 0x500, &mut wait, |_| vk::Result::SUCCESS);

    let messages = sink.messages();
    println!("messages: {messages:?}");
    assert_eq!(sink.count(VUID_DESCRIPTOR_INDEX_OOB), 1);
    match messages.iter().find(|m| m.vuid == VUID_DESCRIPTOR_INDEX_OOB) {
        Some(message) => assert_eq!(message.objects, vec![0x500, 0x400]),
        None => panic!("no out-of-bounds report"),
    }

    // Readback zeroes the buffer, so a second wait reports nothing new.
    chain.run(Command::QueueWaitIdle, 0x500, &mut wait, |_| vk::Result::SUCCESS);
    assert_eq!(sink.count(VUID_DESCRIPTOR_INDEX_OOB), 1);
}

#[test]
fn test_output_reported_when_command_buffer_is_recorded_again() {
    let (chain, sink, driver) = make_chain(8);
    let command_buffer = vk::CommandBuffer::from_raw(0x400);
    record_and_submit(&chain, command_buffer);

    // The fence signalled; the application re-records without an idle wait.
    driver.report_oob(0xbeef, 3);
    run_simple(
        &chain,
        Command::BeginCommandBuffer,
        0x400,
        Call::BeginCommandBuffer {
            command_buffer,
            flags: vk::CommandBufferUsageFlags::empty(),
        },
    );
    assert_eq!(sink.count(VUID_DESCRIPTOR_INDEX_OOB), 1);

    run_simple(
        &chain,
        Command::QueueWaitIdle,
        0x500,
        Call::QueueWaitIdle {
            queue: vk::Queue::from_raw(0x500),
        },
    );
    println!("messages: {:?}", sink.messages());
    assert_eq!(sink.count(VUID_DESCRIPTOR_INDEX_OOB), 1);
    // The recycled output buffer is kept.
    assert_eq!(driver.written.lock().len(), 1);
}

#[test]
fn test_reset_command_buffer_reports_and_releases_output() {
    let (chain, sink, driver) = make_chain(8);
    let command_buffer = vk::CommandBuffer::from_raw(0x400);
    record_and_submit(&chain, command_buffer);
    assert_eq!(driver.buffers.lock().len(), 1);

    driver.report_oob(0xbeef, 5);
    run_simple(
        &chain,
        Command::ResetCommandBuffer,
        0x400,
        Call::ResetCommandBuffer { command_buffer },
    );

    assert_eq!(sink.count(VUID_DESCRIPTOR_INDEX_OOB), 1);
    assert!(driver.buffers.lock().is_empty());
    assert!(driver.memory.lock().is_empty());
}

#[test]
fn test_reset_command_pool_releases_output_of_its_buffers() {
    let (chain, _, driver) = make_chain(8);
    let pool = vk::CommandPool::from_raw(0x700);
    let mut create = Call::CreateCommandPool {
        flags: vk::CommandPoolCreateFlags::empty(),
        queue_family_index: 0,
        pool: vk::CommandPool::null(),
    };
    chain.run(Command::CreateCommandPool, DEVICE, &mut create, |call| {
        if let Call::CreateCommandPool { pool: out, .. } = call {
            *out = pool;
        }
        vk::Result::SUCCESS
    });
    let command_buffer = vk::CommandBuffer::from_raw(0x410);
    let mut allocate = Call::AllocateCommandBuffers {
        pool,
        level: vk::CommandBufferLevel::PRIMARY,
        count: 1,
        buffers: Vec::new(),
    };
    chain.run(Command::AllocateCommandBuffers, DEVICE, &mut allocate, |call| {
        if let Call::AllocateCommandBuffers { buffers, .. } = call {
            *buffers = vec![command_buffer];
        }
        vk::Result::SUCCESS
    });

    run_simple(
        &chain,
        Command::BeginCommandBuffer,
        0x410,
        Call::BeginCommandBuffer {
            command_buffer,
            flags: vk::CommandBufferUsageFlags::empty(),
        },
    );
    assert_eq!(driver.buffers.lock().len(), 1);

    run_simple(&chain, Command::ResetCommandPool, DEVICE, Call::ResetCommandPool { pool });
    assert!(driver.buffers.lock().is_empty());

    // Recording again allocates a fresh output buffer.
    run_simple(
        &chain,
        Command::BeginCommandBuffer,
        0x410,
        Call::BeginCommandBuffer {
            command_buffer,
            flags: vk::CommandBufferUsageFlags::empty(),
        },
    );
    assert_eq!(driver.buffers.lock().len(), 1);
    assert_eq!(driver.written.lock().len(), 2);
}

#[test]
fn test_pipeline_on_full_layout_gets_original_module() {
    let (chain, sink, driver) = make_chain(8);

    let mut layout_call = Call::CreatePipelineLayout {
        set_layouts: (0..8).map(|i| vk::DescriptorSetLayout::from_raw(0xa0 + i)).collect(),
        app_set_count: 8,
        push_constant_ranges: 0,
        layout: vk::PipelineLayout::null(),
    };
    chain.run(Command::CreatePipelineLayout, DEVICE, &mut layout_call, |call| {
        if let Call::CreatePipelineLayout { layout, .. } = call {
            *layout = vk::PipelineLayout::from_raw(0xb1);
        }
        vk::Result::SUCCESS
    });
    assert!(sink.has("GPUAV-pipeline-layout-no-room"));
    assert!(create_module(&chain, &make_compute_module(), 0xc0));

    let mut call = Call::CreatePipelines {
        bind_point: vk::PipelineBindPoint::COMPUTE,
        pipelines: vec![PipelineDesc {
            layout: vk::PipelineLayout::from_raw(0xb1),
            stages: vec![PipelineStage {
                stage: vk::ShaderStageFlags::COMPUTE,
                module: vk::ShaderModule::from_raw(0xc0),
                entry_point: "main".to_string(),
                module_override: None,
            }],
        }],
        created: Vec::new(),
    };
    let mut forwarded = None;
    let mut live_during_call = 0;
    let result = chain.run(Command::CreateComputePipelines, DEVICE, &mut call, |call| {
        if let Call::CreatePipelines { pipelines, created, .. } = call {
            forwarded = pipelines
                .first()
                .and_then(|p| p.stages.first())
                .and_then(|stage| stage.module_override);
            live_during_call = driver.modules.lock().len();
            *created = vec![vk::Pipeline::from_raw(0xd0)];
        }
        vk::Result::SUCCESS
    });

    assert_eq!(result, vk::Result::SUCCESS);
    match forwarded {
        Some(module) => assert_ne!(module.as_raw(), 0xc0),
        None => panic!("pipeline kept the instrumented module"),
    }
    assert_eq!(live_during_call, 1);
    // The replacement only lives for the duration of the call.
    assert!(driver.modules.lock().is_empty());
}

#[test]
fn test_plain_bytecode_is_instrumented_once() {
    let (setup, _) = make_setup(8);
    let driver = Arc::new(FakeDriver::default());
    let mut unit = GpuAssisted::new(driver, &setup);
    if let Err(e) = unit.setup() {
        panic!("setup failed: {e}");
    }

    let words = make_plain_module();
    let record = RecordObject::new("vkCreateShaderModule");
    for raw in [0xc1, 0xc2, 0xc3] {
        let mut call = Call::CreateShaderModule {
            code_size: words.len() * 4,
            code: Arc::from(words.clone()),
            code_override: None,
            module: vk::ShaderModule::null(),
        };
        let mut scratch = CallScratch::default();
        unit.pre_call_record(&mut call, &record, &mut scratch);
        if let Call::CreateShaderModule { module, .. } = &mut call {
            *module = vk::ShaderModule::from_raw(raw);
        }
        unit.post_call_record(&mut call, &record, &mut scratch);
        match call {
            Call::CreateShaderModule { code_override: None, .. } => {}
            other => panic!("plain module was rewritten: {other:?}"),
        }
        assert_eq!(scratch.instrumented_id, None);
    }
    assert_eq!(unit.cache().runs(), 1);
    assert_eq!(unit.cache().len(), 1);

    let record = RecordObject::new("vkDestroyShaderModule");
    for raw in [0xc1, 0xc2, 0xc3] {
        let mut call = Call::DestroyShaderModule {
            module: vk::ShaderModule::from_raw(raw),
        };
        unit.pre_call_record(&mut call, &record, &mut CallScratch::default());
    }
    assert!(unit.cache().is_empty());
}

#[test]
fn test_device_lost_aborts_unit() {
    let (chain, _, _) = make_chain(8);
    let mut wait = Call::QueueWaitIdle {
        queue: vk::Queue::from_raw(0x500),
    };
    let result = chain.run(Command::QueueWaitIdle, 0x500, &mut wait, |_| vk::Result::ERROR_DEVICE_LOST);

    assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
    assert_eq!(chain.aborted_kinds(), vec![UnitKind::GpuAssisted]);
}

#[test]
fn test_teardown_releases_every_driver_object() {
    let (chain, _, driver) = make_chain(8);
    let mut begin = Call::BeginCommandBuffer {
        command_buffer: vk::CommandBuffer::from_raw(0x400),
        flags: vk::CommandBufferUsageFlags::empty(),
    };
    chain.run(Command::BeginCommandBuffer, 0x400, &mut begin, |_| vk::Result::SUCCESS);
    assert!(driver.live_objects() > 0);

    chain.teardown();
    assert_eq!(driver.live_objects(), 0);
}

fn reported_limit(settings: &GpuAvSettings, driver_limit: u32) -> u32 {
    let mut unit = GpuAvInstance::new(settings, Arc::new(Reporter::tracing()));
    let mut call = Call::GetPhysicalDeviceProperties {
        physical_device: vk::PhysicalDevice::from_raw(0x3),
        properties: vk::PhysicalDeviceProperties::default(),
    };
    if let Call::GetPhysicalDeviceProperties { properties, .. } = &mut call {
        properties.limits.max_bound_descriptor_sets = driver_limit;
    }
    let record = RecordObject::new("vkGetPhysicalDeviceProperties");
    unit.post_call_record(&mut call, &record, &mut Default::default());
    match call {
        Call::GetPhysicalDeviceProperties { properties, .. } => properties.limits.max_bound_descriptor_sets,
        other => panic!("unexpected call {other:?}"),
    }
}

#[test]
fn test_application_sees_one_slot_fewer() {
    let settings = GpuAvSettings::default();
    assert_eq!(reported_limit(&settings, 8), 7);
    assert_eq!(reported_limit(&settings, 64), 32);
    // Devices that cannot host the debug slot keep their real limit.
    assert_eq!(reported_limit(&settings, 1), 1);
}

#[test]
fn test_features_injected_when_supported() {
    let settings = GpuAvSettings::default();
    let chain = ValidationChain::new(
        vec![Box::new(GpuAvInstance::new(&settings, Arc::new(Reporter::tracing())))],
        LockingMode::Fine,
        Arc::new(Reporter::tracing()),
    );
    let supported = vk::PhysicalDeviceFeatures {
        fragment_stores_and_atomics: vk::TRUE,
        vertex_pipeline_stores_and_atomics: vk::FALSE,
        ..Default::default()
    };
    let mut call = Call::CreateDevice {
        physical_device: vk::PhysicalDevice::from_raw(0x3),
        queue_families: vec![(0, 1)],
        extensions: Vec::new(),
        features: None,
        supported_features: supported,
        features_in_chain: false,
        device: vk::Device::null(),
    };
    let mut forwarded = None;
    chain.run(Command::CreateDevice, 0x3, &mut call, |call| {
        if let Call::CreateDevice { features, .. } = call {
            forwarded = *features;
        }
        vk::Result::SUCCESS
    });

    match forwarded {
        Some(features) => {
            assert_eq!(features.fragment_stores_and_atomics, vk::TRUE);
            assert_eq!(features.vertex_pipeline_stores_and_atomics, vk::FALSE);
        }
        None => panic!("no features forwarded"),
    }
}
