//! GPU-assisted validation: shaders are rewritten to bounds-check
//! descriptor array indexing and report violations into a per-command
//! buffer output buffer bound at a hidden descriptor set slot.
//!
//! The instance-level half adjusts what the application sees of the device
//! (one fewer descriptor set slot, required features enabled). The
//! device-level half owns every driver object the instrumentation needs.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk::{self, Handle};
use tracing::{debug, trace, warn};
use vkguard_core::config::GpuAvSettings;
use vkguard_core::{RecordObject, Reporter};
use vkguard_gpuav::budget::{debug_layout_binding, DEBUG_OUTPUT_BINDING};
use vkguard_gpuav::output::VUID_DESCRIPTOR_INDEX_OOB;
use vkguard_gpuav::{
    instrument, BindingBudget, CachedShader, ContentHash, DescriptorBackend, DescriptorSetManager, GpuAllocator,
    InstrumentOptions, InstrumentationCache, LayoutPlan, OutputBuffer, OutputRecord, SetupError,
};
use vkguard_state::DeviceState;

use super::DeviceSetup;
use crate::call::{Call, CallScratch};
use crate::chassis::{Command, Phases, UnitKind, ValidationObject};

pub const VUID_LAYOUT_NO_ROOM: &str = "GPUAV-pipeline-layout-no-room";
pub const VUID_INSTRUMENTATION_FAILED: &str = "GPUAV-instrumentation-failed";
pub const VUID_RESOURCE_ALLOCATION_FAILED: &str = "GPUAV-resource-allocation-failed";
pub const VUID_FEATURES_NOT_INJECTED: &str = "GPUAV-features-not-injected";

/// Driver primitives beyond allocation and descriptor pools that the
/// device-level unit needs. Implemented by [`super::DeviceTrampolines`].
pub trait GpuAvDriver: GpuAllocator + DescriptorBackend + 'static {
    fn create_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout, vk::Result>;

    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout, vk::Result>;

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_shader_module(&self, words: &[u32]) -> Result<vk::ShaderModule, vk::Result>;

    fn destroy_shader_module(&self, module: vk::ShaderModule);

    /// Point the debug binding of `set` at `output`.
    fn write_output_descriptor(&self, set: vk::DescriptorSet, output: &OutputBuffer);

    fn cmd_bind_debug_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
}

// ── Instance level ──────────────────────────────────────────

pub struct GpuAvInstance {
    settings: GpuAvSettings,
    reporter: Arc<Reporter>,
}

impl GpuAvInstance {
    pub fn new(settings: &GpuAvSettings, reporter: Arc<Reporter>) -> Self {
        Self {
            settings: settings.clone(),
            reporter,
        }
    }

    fn inject_features(&self, call: &mut Call, record: &RecordObject) {
        let Call::CreateDevice {
            features,
            supported_features,
            features_in_chain,
            ..
        } = call
        else {
            return;
        };
        if *features_in_chain {
            self.reporter.log_info(
                VUID_FEATURES_NOT_INJECTED,
                &[],
                &record.location.dot("pCreateInfo").dot("pNext"),
                "features are enabled through VkPhysicalDeviceFeatures2; enable fragmentStoresAndAtomics and \
                 vertexPipelineStoresAndAtomics there for instrumented graphics shaders to report errors",
            );
            return;
        }
        let enabled = features.get_or_insert_with(vk::PhysicalDeviceFeatures::default);
        for (name, want, supported) in [
            (
                "fragmentStoresAndAtomics",
                &mut enabled.fragment_stores_and_atomics,
                supported_features.fragment_stores_and_atomics,
            ),
            (
                "vertexPipelineStoresAndAtomics",
                &mut enabled.vertex_pipeline_stores_and_atomics,
                supported_features.vertex_pipeline_stores_and_atomics,
            ),
        ] {
            if *want == vk::TRUE {
                continue;
            }
            if supported == vk::TRUE {
                debug!(feature = name, "enabling device feature for instrumented shaders");
                *want = vk::TRUE;
            } else {
                self.reporter.log_info(
                    VUID_FEATURES_NOT_INJECTED,
                    &[],
                    &record.location,
                    format_args!("{name} is not supported; shaders in those stages cannot report errors"),
                );
            }
        }
    }
}

impl ValidationObject for GpuAvInstance {
    fn kind(&self) -> UnitKind {
        UnitKind::GpuAssisted
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::GetPhysicalDeviceProperties | Command::GetPhysicalDeviceProperties2
                if self.settings.reserve_binding_slot =>
            {
                Phases::RECORD_AFTER
            }
            Command::CreateDevice => Phases::RECORD_BEFORE,
            _ => Phases::empty(),
        }
    }

    fn pre_call_record(&mut self, call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        self.inject_features(call, record);
    }

    fn post_call_record(&mut self, call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {
        let Call::GetPhysicalDeviceProperties { properties, .. } = call else {
            return;
        };
        let limit = &mut properties.limits.max_bound_descriptor_sets;
        // A device that cannot host the debug slot keeps its real limit;
        // the device-level unit aborts on it instead.
        if let Ok(budget) = BindingBudget::reserve(*limit, self.settings.max_binding_slots) {
            *limit = (*limit).min(budget.reported_limit());
        }
    }
}

// ── Device level ────────────────────────────────────────────

/// Debug resources owned by one application command buffer.
#[derive(Debug, Clone, Copy)]
struct CommandBufferResources {
    output: OutputBuffer,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    command_pool: Option<vk::CommandPool>,
}

pub struct GpuAssisted<D: GpuAvDriver> {
    driver: Arc<D>,
    reporter: Arc<Reporter>,
    state: Arc<DeviceState>,
    settings: GpuAvSettings,
    /// The driver's real `maxBoundDescriptorSets`.
    driver_limit: u32,
    budget: Option<BindingBudget>,
    cache: InstrumentationCache,
    pools: Option<DescriptorSetManager>,
    debug_layout: vk::DescriptorSetLayout,
    empty_layout: vk::DescriptorSetLayout,
    /// Layout used to bind the debug set for shader objects, which have no
    /// pipeline layout of their own.
    debug_pipeline_layout: vk::PipelineLayout,
    module_hashes: HashMap<u64, ContentHash>,
    shader_hashes: HashMap<u64, ContentHash>,
    command_buffers: HashMap<u64, CommandBufferResources>,
    /// `(queue, command buffer)` pairs submitted since the last idle wait.
    submitted: Vec<(u64, u64)>,
    aborted: bool,
}

impl<D: GpuAvDriver> GpuAssisted<D> {
    pub fn new(driver: Arc<D>, setup: &DeviceSetup) -> Self {
        Self {
            driver,
            reporter: setup.reporter.clone(),
            state: setup.state.clone(),
            settings: setup.settings.gpu_assisted.clone(),
            driver_limit: setup.properties.limits.max_bound_descriptor_sets,
            budget: None,
            cache: InstrumentationCache::new(),
            pools: None,
            debug_layout: vk::DescriptorSetLayout::null(),
            empty_layout: vk::DescriptorSetLayout::null(),
            debug_pipeline_layout: vk::PipelineLayout::null(),
            module_hashes: HashMap::new(),
            shader_hashes: HashMap::new(),
            command_buffers: HashMap::new(),
            submitted: Vec::new(),
            aborted: false,
        }
    }

    pub fn budget(&self) -> Option<BindingBudget> {
        self.budget
    }

    pub fn cache(&self) -> &InstrumentationCache {
        &self.cache
    }

    fn allocator(&self) -> &dyn GpuAllocator {
        &*self.driver
    }

    /// Instrument `words` and take one user of the cache entry. Bytecode
    /// without checks keeps its entry too, so the pass is not run again
    /// for the next copy.
    fn instrument_code(&self, words: &[u32], budget: BindingBudget, record: &RecordObject) -> Option<CachedShader> {
        let safe_mode = self.settings.safe_mode;
        let acquired = self.cache.acquire(words, |words, shader_id| {
            let options = InstrumentOptions {
                desc_set: budget.debug_set_index(),
                binding: DEBUG_OUTPUT_BINDING,
                shader_id,
                safe_mode,
            };
            instrument(words, &options).map(|out| (out.words, out.sites))
        });
        match acquired {
            Ok(shader) => Some(shader),
            Err(err) => {
                self.reporter.log_warning(
                    VUID_INSTRUMENTATION_FAILED,
                    &[],
                    &record.location.dot("pCode"),
                    format_args!("shader left uninstrumented: {err}"),
                );
                None
            }
        }
    }

    fn instrument_module(&self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        let (Some(budget), Call::CreateShaderModule { code, code_override, .. }) = (self.budget, call) else {
            return;
        };
        let Some(shader) = self.instrument_code(code, budget, record) else {
            return;
        };
        scratch.cached_module = true;
        if shader.sites > 0 {
            *code_override = Some(shader.words);
            scratch.instrumented_id = Some(u32::from(shader.shader_id));
        }
    }

    fn pad_pipeline_layout(&self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        let (Some(budget), Call::CreatePipelineLayout { set_layouts, .. }) = (self.budget, call) else {
            return;
        };
        match budget.pad_layouts(set_layouts, &self.empty_layout, &self.debug_layout) {
            LayoutPlan::Padded(padded) => {
                *set_layouts = padded;
                scratch.layout_instrumented = true;
            }
            LayoutPlan::NoRoom { app_slots, reserved } => {
                self.reporter.log_warning(
                    VUID_LAYOUT_NO_ROOM,
                    &[],
                    &record.location.dot("pCreateInfo").dot("setLayoutCount"),
                    format_args!(
                        "({app_slots}) leaves no room for the debug descriptor set ({reserved} slots reserved); \
                         pipelines using this layout run uninstrumented shaders"
                    ),
                );
            }
        }
    }

    /// Pipelines whose layout could not be padded get the original
    /// bytecode of every instrumented stage.
    fn substitute_pipeline_modules(&self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        let Call::CreatePipelines { pipelines, .. } = call else {
            return;
        };
        for desc in pipelines.iter_mut() {
            let instrumented_layout = self
                .state
                .pipeline_layouts
                .get(desc.layout.as_raw())
                .is_some_and(|layout| layout.instrumented);
            scratch.pipeline_instrumented.push(instrumented_layout);
            if instrumented_layout {
                continue;
            }
            for stage in desc.stages.iter_mut() {
                let Some(module) = self.state.shader_modules.get(stage.module.as_raw()) else {
                    continue;
                };
                if module.instrumented_id.is_none() {
                    continue;
                }
                match self.driver.create_shader_module(&module.spirv) {
                    Ok(replacement) => {
                        trace!(module = stage.module.as_raw(), "substituting uninstrumented module");
                        stage.module_override = Some(replacement);
                        scratch.replacement_modules.push(replacement);
                    }
                    Err(result) => {
                        self.reporter.log_warning(
                            VUID_RESOURCE_ALLOCATION_FAILED,
                            &[stage.module.as_raw()],
                            &record.location,
                            format_args!("could not create an uninstrumented copy of the module: {result:?}"),
                        );
                    }
                }
            }
        }
    }

    fn instrument_shaders(&self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        let (Some(budget), Call::CreateShaders { shaders, .. }) = (self.budget, call) else {
            return;
        };
        for desc in shaders.iter_mut() {
            let mut id = None;
            let mut cached = false;
            if let Some(spirv) = desc.spirv.clone() {
                match budget.pad_layouts(&desc.set_layouts, &self.empty_layout, &self.debug_layout) {
                    LayoutPlan::Padded(padded) => {
                        if let Some(shader) = self.instrument_code(&spirv, budget, record) {
                            cached = true;
                            if shader.sites > 0 {
                                desc.code_override = Some(shader.words);
                                desc.set_layouts_override = Some(padded);
                                id = Some(u32::from(shader.shader_id));
                            }
                        }
                    }
                    LayoutPlan::NoRoom { app_slots, reserved } => {
                        self.reporter.log_warning(
                            VUID_LAYOUT_NO_ROOM,
                            &[],
                            &record.location.dot("pCreateInfos").dot("setLayoutCount"),
                            format_args!(
                                "({app_slots}) leaves no room for the debug descriptor set ({reserved} slots \
                                 reserved); the shader runs uninstrumented"
                            ),
                        );
                    }
                }
            }
            scratch.shader_ids.push(id);
            scratch.cached_shaders.push(cached);
        }
    }

    fn record_shaders(&mut self, call: &Call, scratch: &CallScratch) {
        let Call::CreateShaders { shaders, created } = call else {
            return;
        };
        for (index, desc) in shaders.iter().enumerate() {
            if !scratch.cached_shaders.get(index).copied().unwrap_or(false) {
                continue;
            }
            let Some(spirv) = &desc.spirv else {
                continue;
            };
            let hash = ContentHash::of_words(spirv);
            match created.get(index) {
                Some(shader) if !shader.is_null() => {
                    self.shader_hashes.insert(shader.as_raw(), hash);
                }
                _ => {
                    self.cache.release(hash);
                }
            }
        }
    }

    /// Create or recycle the output buffer and debug set of a command
    /// buffer that just began recording.
    fn prepare_command_buffer(&mut self, command_buffer: vk::CommandBuffer, record: &RecordObject) {
        let key = command_buffer.as_raw();
        if self.command_buffers.contains_key(&key) {
            // A command buffer may be re-recorded once its submission has
            // completed, without any idle wait in between.
            self.flush_pending(key, record);
            if let Some(existing) = self.command_buffers.get(&key) {
                if let Err(err) = existing.output.clear(self.allocator()) {
                    warn!(%err, "failed to reset debug output buffer");
                }
            }
            return;
        }
        let Some(pools) = &self.pools else {
            return;
        };
        let output = match OutputBuffer::create(self.allocator(), self.settings.output_buffer_size) {
            Ok(output) => output,
            Err(err) => {
                self.reporter.log_warning(
                    VUID_RESOURCE_ALLOCATION_FAILED,
                    &[key],
                    &record.location,
                    format_args!("no debug output buffer for this command buffer: {err}"),
                );
                return;
            }
        };
        let (pool, set) = match pools.allocate(self.debug_layout, 1) {
            Ok((pool, sets)) => match sets.first() {
                Some(set) => (pool, *set),
                None => {
                    output.destroy(self.allocator());
                    return;
                }
            },
            Err(err) => {
                output.destroy(self.allocator());
                self.reporter.log_warning(
                    VUID_RESOURCE_ALLOCATION_FAILED,
                    &[key],
                    &record.location,
                    format_args!("no debug descriptor set for this command buffer: {err}"),
                );
                return;
            }
        };
        self.driver.write_output_descriptor(set, &output);
        let command_pool = self
            .state
            .command_buffers
            .get(key)
            .and_then(|cb| cb.pool())
            .map(|pool| pool.handle);
        self.command_buffers.insert(
            key,
            CommandBufferResources {
                output,
                pool,
                set,
                command_pool,
            },
        );
    }

    /// Report the output of a submission of `key` not yet read back.
    fn flush_pending(&mut self, key: u64, record: &RecordObject) {
        let mut pending = Vec::new();
        self.submitted.retain(|&(queue, cb)| {
            if cb == key {
                pending.push(queue);
            }
            cb != key
        });
        // Every submission wrote into the same buffer; report it once.
        if let Some(queue) = pending.last() {
            self.report_output(*queue, key, record);
        }
    }

    /// Report pending output, then release the resources of `key`.
    fn retire_command_buffer(&mut self, key: u64, record: &RecordObject) {
        self.flush_pending(key, record);
        self.release_command_buffer(key);
    }

    fn retire_command_pool(&mut self, pool: vk::CommandPool, record: &RecordObject) {
        let owned: Vec<u64> = self
            .command_buffers
            .iter()
            .filter(|(_, r)| r.command_pool == Some(pool))
            .map(|(cb, _)| *cb)
            .collect();
        for cb in owned {
            self.retire_command_buffer(cb, record);
        }
    }

    fn release_command_buffer(&mut self, key: u64) {
        let Some(resources) = self.command_buffers.remove(&key) else {
            return;
        };
        resources.output.destroy(self.allocator());
        if let Some(pools) = &self.pools {
            if let Err(err) = pools.release(resources.pool, &[resources.set]) {
                warn!(%err, "failed to release a debug descriptor set");
            }
        }
        self.submitted.retain(|(_, cb)| *cb != key);
    }

    fn bind_for_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        let (Some(budget), Some(resources)) = (self.budget, self.command_buffers.get(&command_buffer.as_raw())) else {
            return;
        };
        let Some(pipeline) = self.state.pipelines.get(pipeline.as_raw()) else {
            return;
        };
        if !pipeline.instrumented {
            return;
        }
        let Some(layout) = &pipeline.layout else {
            return;
        };
        self.driver.cmd_bind_debug_set(
            command_buffer,
            bind_point,
            layout.handle,
            budget.debug_set_index(),
            resources.set,
        );
    }

    fn bind_for_shaders(&self, command_buffer: vk::CommandBuffer, stages: &[vk::ShaderStageFlags], shaders: &[vk::ShaderEXT]) {
        let (Some(budget), Some(resources)) = (self.budget, self.command_buffers.get(&command_buffer.as_raw())) else {
            return;
        };
        let instrumented = shaders.iter().any(|shader| {
            self.state
                .shader_objects
                .get(shader.as_raw())
                .is_some_and(|s| s.instrumented_id.read().is_some())
        });
        if !instrumented {
            return;
        }
        let bind_point = if stages.iter().any(|s| s.contains(vk::ShaderStageFlags::COMPUTE)) {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        };
        self.driver.cmd_bind_debug_set(
            command_buffer,
            bind_point,
            self.debug_pipeline_layout,
            budget.debug_set_index(),
            resources.set,
        );
    }

    /// Read back and report the output of finished submissions. `queue`
    /// limits the drain to one queue.
    fn drain_submissions(&mut self, queue: Option<u64>, record: &RecordObject) {
        let (finished, pending): (Vec<_>, Vec<_>) = self
            .submitted
            .drain(..)
            .partition(|(q, _)| queue.map_or(true, |wanted| *q == wanted));
        self.submitted = pending;
        for (queue, cb) in finished {
            self.report_output(queue, cb, record);
        }
    }

    fn report_output(&self, queue: u64, cb: u64, record: &RecordObject) {
        let Some(resources) = self.command_buffers.get(&cb) else {
            return;
        };
        let Some(words) = resources.output.drain(self.allocator()) else {
            return;
        };
        if let Some(found) = OutputRecord::decode(&words) {
            self.reporter
                .log_error(VUID_DESCRIPTOR_INDEX_OOB, &[queue, cb], &record.location, found);
        }
    }

    fn setup_objects(&mut self) -> Result<(), SetupError> {
        let budget = BindingBudget::reserve(self.driver_limit, self.settings.max_binding_slots)?;
        self.budget = Some(budget);

        self.debug_layout = self
            .driver
            .create_set_layout(&[debug_layout_binding()])
            .map_err(|result| SetupError::ObjectCreation {
                what: "debug descriptor set layout",
                result,
            })?;
        self.empty_layout = self
            .driver
            .create_set_layout(&[])
            .map_err(|result| SetupError::ObjectCreation {
                what: "empty descriptor set layout",
                result,
            })?;

        let mut slots = vec![self.empty_layout; budget.debug_set_index() as usize];
        slots.push(self.debug_layout);
        self.debug_pipeline_layout =
            self.driver
                .create_pipeline_layout(&slots)
                .map_err(|result| SetupError::ObjectCreation {
                    what: "debug pipeline layout",
                    result,
                })?;

        let backend: Arc<dyn DescriptorBackend> = self.driver.clone();
        self.pools = Some(DescriptorSetManager::new(backend, self.settings.descriptor_chunk_size));
        debug!(
            reserved = budget.reserved(),
            debug_set = budget.debug_set_index(),
            "gpu-assisted validation ready"
        );
        Ok(())
    }
}

impl<D: GpuAvDriver> ValidationObject for GpuAssisted<D> {
    fn kind(&self) -> UnitKind {
        UnitKind::GpuAssisted
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::CreateShaderModule
            | Command::CreateGraphicsPipelines
            | Command::CreateComputePipelines
            | Command::CreateShadersEXT => Phases::RECORD,
            Command::CreatePipelineLayout
            | Command::DestroyShaderModule
            | Command::DestroyShaderEXT
            | Command::FreeCommandBuffers
            | Command::ResetCommandBuffer
            | Command::ResetCommandPool
            | Command::DestroyCommandPool => Phases::RECORD_BEFORE,
            Command::BeginCommandBuffer
            | Command::CmdBindPipeline
            | Command::CmdBindShadersEXT
            | Command::QueueSubmit
            | Command::QueueWaitIdle
            | Command::DeviceWaitIdle => Phases::RECORD_AFTER,
            _ => Phases::empty(),
        }
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        let result = self.setup_objects();
        if let Err(err) = &result {
            warn!(%err, limit = self.driver_limit, "gpu-assisted validation unavailable on this device");
        }
        result
    }

    fn pre_call_record(&mut self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        match &*call {
            Call::CreateShaderModule { .. } => self.instrument_module(call, record, scratch),
            Call::CreatePipelineLayout { .. } => self.pad_pipeline_layout(call, record, scratch),
            Call::CreatePipelines { .. } => self.substitute_pipeline_modules(call, record, scratch),
            Call::CreateShaders { .. } => self.instrument_shaders(call, record, scratch),
            Call::DestroyShaderModule { module } => {
                if let Some(hash) = self.module_hashes.remove(&module.as_raw()) {
                    self.cache.release(hash);
                }
            }
            Call::DestroyShader { shader } => {
                if let Some(hash) = self.shader_hashes.remove(&shader.as_raw()) {
                    self.cache.release(hash);
                }
            }
            Call::FreeCommandBuffers { buffers, .. } => {
                for cb in buffers.clone() {
                    self.retire_command_buffer(cb.as_raw(), record);
                }
            }
            Call::ResetCommandBuffer { command_buffer } => {
                let key = command_buffer.as_raw();
                self.retire_command_buffer(key, record);
            }
            Call::ResetCommandPool { pool } | Call::DestroyCommandPool { pool } => {
                let pool = *pool;
                self.retire_command_pool(pool, record);
            }
            _ => {}
        }
    }

    fn post_call_record(&mut self, call: &mut Call, record: &RecordObject, scratch: &mut CallScratch) {
        if record.device_lost() {
            warn!(function = record.location.function, "device lost; gpu-assisted validation stops");
            self.aborted = true;
            return;
        }
        let ok = record.succeeded();
        match &*call {
            Call::CreateShaderModule { code, module, .. } => {
                if !scratch.cached_module {
                    return;
                }
                let hash = ContentHash::of_words(code);
                if ok && !module.is_null() {
                    self.module_hashes.insert(module.as_raw(), hash);
                } else {
                    self.cache.release(hash);
                }
            }
            Call::CreatePipelines { .. } => {
                // The substituted modules are never seen by the application.
                for module in scratch.replacement_modules.drain(..) {
                    self.driver.destroy_shader_module(module);
                }
            }
            Call::CreateShaders { .. } => self.record_shaders(call, scratch),
            Call::BeginCommandBuffer { command_buffer, .. } if ok => {
                self.prepare_command_buffer(*command_buffer, record);
            }
            Call::CmdBindPipeline {
                command_buffer,
                bind_point,
                pipeline,
            } => self.bind_for_pipeline(*command_buffer, *bind_point, *pipeline),
            Call::CmdBindShaders {
                command_buffer,
                stages,
                shaders,
            } => self.bind_for_shaders(*command_buffer, stages, shaders),
            Call::QueueSubmit { queue, batches, .. } if ok => {
                for cb in batches.iter().flatten() {
                    if self.command_buffers.contains_key(&cb.as_raw()) {
                        self.submitted.push((queue.as_raw(), cb.as_raw()));
                    }
                }
            }
            Call::QueueWaitIdle { queue } if ok => self.drain_submissions(Some(queue.as_raw()), record),
            Call::DeviceWaitIdle { .. } if ok => self.drain_submissions(None, record),
            _ => {}
        }
    }

    fn aborted(&self) -> bool {
        self.aborted
    }

    fn teardown(&mut self) {
        let keys: Vec<u64> = self.command_buffers.keys().copied().collect();
        for key in keys {
            self.release_command_buffer(key);
        }
        if let Some(pools) = self.pools.take() {
            pools.destroy_all();
        }
        if !self.debug_pipeline_layout.is_null() {
            self.driver.destroy_pipeline_layout(self.debug_pipeline_layout);
            self.debug_pipeline_layout = vk::PipelineLayout::null();
        }
        for layout in [&mut self.debug_layout, &mut self.empty_layout] {
            if !layout.is_null() {
                self.driver.destroy_set_layout(*layout);
                *layout = vk::DescriptorSetLayout::null();
            }
        }
        self.module_hashes.clear();
        self.shader_hashes.clear();
        self.submitted.clear();
        self.cache.clear();
    }
}
