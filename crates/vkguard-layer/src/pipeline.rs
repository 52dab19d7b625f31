//! Shader modules, pipeline layouts, pipelines and shader objects.
//!
//! These are the calls the GPU-assisted unit rewrites, so the dispatch
//! closures rebuild the create infos from the call snapshot: instrumented
//! bytecode, padded set-layout lists and substituted stage modules reach
//! the driver, the application's structures stay untouched.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_gpuav::spirv;

use crate::call::{Call, PipelineDesc, PipelineStage, ShaderDesc};
use crate::chassis::Command;
use crate::raw_slice;

pub unsafe extern "system" fn vkCreateShaderModule(
    device: vk::Device,
    p_create_info: *const vk::ShaderModuleCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_module: *mut vk::ShaderModule,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    // SAFETY: `pCode` holds `codeSize` bytes.
    let code: Arc<[u32]> = unsafe { raw_slice(info.p_code, (info.code_size / 4) as u32) }.into();
    let mut call = Call::CreateShaderModule {
        code_size: info.code_size,
        code,
        code_override: None,
        module: vk::ShaderModule::null(),
    };
    ctx.chain.run(Command::CreateShaderModule, device.as_raw(), &mut call, |call| {
        let Call::CreateShaderModule {
            code_override, module, ..
        } = call
        else {
            return vk::Result::ERROR_UNKNOWN;
        };
        let mut forwarded = *info;
        if let Some(words) = code_override {
            forwarded.code_size = words.len() * 4;
            forwarded.p_code = words.as_ptr();
        }
        // SAFETY: the application's create info, with `pCode` possibly
        // pointing at the instrumented copy owned by the call.
        let result = unsafe { (ctx.dispatch.v1_0.create_shader_module)(device, &forwarded, p_allocator, module) };
        if result == vk::Result::SUCCESS && !p_module.is_null() {
            // SAFETY: checked for null.
            unsafe { *p_module = *module };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyShaderModule(
    device: vk::Device,
    module: vk::ShaderModule,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyShaderModule { module };
    ctx.chain.run(Command::DestroyShaderModule, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_shader_module)(device, module, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCreatePipelineLayout(
    device: vk::Device,
    p_create_info: *const vk::PipelineLayoutCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_layout: *mut vk::PipelineLayout,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreatePipelineLayout {
        // SAFETY: application array, valid for the duration of the call.
        set_layouts: unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) }.to_vec(),
        app_set_count: info.set_layout_count,
        push_constant_ranges: info.push_constant_range_count,
        layout: vk::PipelineLayout::null(),
    };
    ctx.chain.run(Command::CreatePipelineLayout, device.as_raw(), &mut call, |call| {
        let Call::CreatePipelineLayout {
            set_layouts, layout, ..
        } = call
        else {
            return vk::Result::ERROR_UNKNOWN;
        };
        let mut forwarded = *info;
        forwarded.set_layout_count = set_layouts.len() as u32;
        forwarded.p_set_layouts = set_layouts.as_ptr();
        // SAFETY: the application's create info with the (possibly padded)
        // set-layout list owned by the call.
        let result = unsafe { (ctx.dispatch.v1_0.create_pipeline_layout)(device, &forwarded, p_allocator, layout) };
        if result == vk::Result::SUCCESS && !p_layout.is_null() {
            // SAFETY: checked for null.
            unsafe { *p_layout = *layout };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyPipelineLayout(
    device: vk::Device,
    layout: vk::PipelineLayout,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyPipelineLayout { layout };
    ctx.chain.run(Command::DestroyPipelineLayout, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_pipeline_layout)(device, layout, p_allocator) };
        vk::Result::SUCCESS
    });
}

/// # Safety
/// `stage.p_name` must be null or a NUL-terminated string.
unsafe fn stage_of(stage: &vk::PipelineShaderStageCreateInfo<'_>) -> PipelineStage {
    let entry_point = if stage.p_name.is_null() {
        String::new()
    } else {
        // SAFETY: upheld by the caller.
        unsafe { CStr::from_ptr(stage.p_name) }.to_string_lossy().into_owned()
    };
    PipelineStage {
        stage: stage.stage,
        module: stage.module,
        entry_point,
        module_override: None,
    }
}

/// Copy `stages` with every overridden module swapped in, or `None` when
/// nothing was overridden.
fn patched_stages<'a>(
    stages: &[vk::PipelineShaderStageCreateInfo<'a>],
    desc: &PipelineDesc,
) -> Option<Vec<vk::PipelineShaderStageCreateInfo<'a>>> {
    if desc.stages.iter().all(|s| s.module_override.is_none()) {
        return None;
    }
    Some(
        stages
            .iter()
            .zip(&desc.stages)
            .map(|(stage, snapshot)| {
                let mut stage = *stage;
                if let Some(module) = snapshot.module_override {
                    stage.module = module;
                }
                stage
            })
            .collect(),
    )
}

/// Write the created pipelines into the call and the application's array.
///
/// # Safety
/// `p_pipelines` must have room for `created.len()` handles.
unsafe fn publish_pipelines(call: &mut Call, created: Vec<vk::Pipeline>, p_pipelines: *mut vk::Pipeline) {
    if !p_pipelines.is_null() {
        // SAFETY: upheld by the caller.
        unsafe { std::ptr::copy_nonoverlapping(created.as_ptr(), p_pipelines, created.len()) };
    }
    if let Call::CreatePipelines { created: out, .. } = call {
        *out = created;
    }
}

pub unsafe extern "system" fn vkCreateGraphicsPipelines(
    device: vk::Device,
    pipeline_cache: vk::PipelineCache,
    create_info_count: u32,
    p_create_infos: *const vk::GraphicsPipelineCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: application array, valid for the duration of the call.
    let infos = unsafe { raw_slice(p_create_infos, create_info_count) };
    let pipelines = infos
        .iter()
        .map(|info| PipelineDesc {
            layout: info.layout,
            // SAFETY: stage arrays of a valid create info.
            stages: unsafe { raw_slice(info.p_stages, info.stage_count) }
                .iter()
                .map(|stage| unsafe { stage_of(stage) })
                .collect(),
        })
        .collect();
    let mut call = Call::CreatePipelines {
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        pipelines,
        created: Vec::new(),
    };
    ctx.chain.run(Command::CreateGraphicsPipelines, device.as_raw(), &mut call, |call| {
        let Call::CreatePipelines { pipelines, .. } = &*call else {
            return vk::Result::ERROR_UNKNOWN;
        };
        let stage_copies: Vec<Option<Vec<vk::PipelineShaderStageCreateInfo<'_>>>> = infos
            .iter()
            .zip(pipelines)
            // SAFETY: stage arrays of a valid create info.
            .map(|(info, desc)| patched_stages(unsafe { raw_slice(info.p_stages, info.stage_count) }, desc))
            .collect();
        let forwarded: Vec<vk::GraphicsPipelineCreateInfo<'_>> = infos
            .iter()
            .zip(&stage_copies)
            .map(|(info, stages)| {
                let mut info = *info;
                if let Some(stages) = stages {
                    info.p_stages = stages.as_ptr();
                }
                info
            })
            .collect();
        let mut created = vec![vk::Pipeline::null(); infos.len()];
        // SAFETY: the application's create infos with only stage modules
        // replaced; every copy outlives the call.
        let result = unsafe {
            (ctx.dispatch.v1_0.create_graphics_pipelines)(
                device,
                pipeline_cache,
                create_info_count,
                forwarded.as_ptr(),
                p_allocator,
                created.as_mut_ptr(),
            )
        };
        // SAFETY: the application's output array has one slot per info.
        unsafe { publish_pipelines(call, created, p_pipelines) };
        result
    })
}

pub unsafe extern "system" fn vkCreateComputePipelines(
    device: vk::Device,
    pipeline_cache: vk::PipelineCache,
    create_info_count: u32,
    p_create_infos: *const vk::ComputePipelineCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: application array, valid for the duration of the call.
    let infos = unsafe { raw_slice(p_create_infos, create_info_count) };
    let pipelines = infos
        .iter()
        .map(|info| PipelineDesc {
            layout: info.layout,
            // SAFETY: the entry point name of a valid create info.
            stages: vec![unsafe { stage_of(&info.stage) }],
        })
        .collect();
    let mut call = Call::CreatePipelines {
        bind_point: vk::PipelineBindPoint::COMPUTE,
        pipelines,
        created: Vec::new(),
    };
    ctx.chain.run(Command::CreateComputePipelines, device.as_raw(), &mut call, |call| {
        let Call::CreatePipelines { pipelines, .. } = &*call else {
            return vk::Result::ERROR_UNKNOWN;
        };
        let forwarded: Vec<vk::ComputePipelineCreateInfo<'_>> = infos
            .iter()
            .zip(pipelines)
            .map(|(info, desc)| {
                let mut info = *info;
                if let Some(module) = desc.stages.first().and_then(|s| s.module_override) {
                    info.stage.module = module;
                }
                info
            })
            .collect();
        let mut created = vec![vk::Pipeline::null(); infos.len()];
        // SAFETY: the application's create infos with only the stage
        // module replaced.
        let result = unsafe {
            (ctx.dispatch.v1_0.create_compute_pipelines)(
                device,
                pipeline_cache,
                create_info_count,
                forwarded.as_ptr(),
                p_allocator,
                created.as_mut_ptr(),
            )
        };
        // SAFETY: the application's output array has one slot per info.
        unsafe { publish_pipelines(call, created, p_pipelines) };
        result
    })
}

pub unsafe extern "system" fn vkDestroyPipeline(
    device: vk::Device,
    pipeline: vk::Pipeline,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyPipeline { pipeline };
    ctx.chain.run(Command::DestroyPipeline, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_pipeline)(device, pipeline, p_allocator) };
        vk::Result::SUCCESS
    });
}

/// # Safety
/// `info` must be a valid `VkShaderCreateInfoEXT`.
unsafe fn shader_of(info: &vk::ShaderCreateInfoEXT<'_>) -> ShaderDesc {
    let spirv = if info.code_type == vk::ShaderCodeTypeEXT::SPIRV && !info.p_code.is_null() {
        // SAFETY: `pCode` holds `codeSize` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(info.p_code as *const u8, info.code_size) };
        spirv::words_from_bytes(bytes).ok().map(Arc::from)
    } else {
        None
    };
    ShaderDesc {
        stage: info.stage,
        spirv,
        // SAFETY: application array of a valid create info.
        set_layouts: unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) }.to_vec(),
        code_override: None,
        set_layouts_override: None,
    }
}

pub unsafe extern "system" fn vkCreateShadersEXT(
    device: vk::Device,
    create_info_count: u32,
    p_create_infos: *const vk::ShaderCreateInfoEXT<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_shaders: *mut vk::ShaderEXT,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: application array, valid for the duration of the call.
    let infos = unsafe { raw_slice(p_create_infos, create_info_count) };
    let mut call = Call::CreateShaders {
        // SAFETY: as above.
        shaders: infos.iter().map(|info| unsafe { shader_of(info) }).collect(),
        created: Vec::new(),
    };
    ctx.chain.run(Command::CreateShadersEXT, device.as_raw(), &mut call, |call| {
        let Call::CreateShaders { shaders, created } = call else {
            return vk::Result::ERROR_UNKNOWN;
        };
        let forwarded: Vec<vk::ShaderCreateInfoEXT<'_>> = infos
            .iter()
            .zip(shaders.iter())
            .map(|(info, desc)| {
                let mut info = *info;
                if let Some(words) = &desc.code_override {
                    info.code_size = words.len() * 4;
                    info.p_code = words.as_ptr().cast();
                }
                if let Some(layouts) = &desc.set_layouts_override {
                    info.set_layout_count = layouts.len() as u32;
                    info.p_set_layouts = layouts.as_ptr();
                }
                info
            })
            .collect();
        let mut out = vec![vk::ShaderEXT::null(); infos.len()];
        // SAFETY: the application's create infos with code and layouts
        // possibly replaced by copies owned by the call.
        let result = unsafe {
            (ctx.dispatch.shader_object.create_shaders_ext)(
                device,
                create_info_count,
                forwarded.as_ptr(),
                p_allocator,
                out.as_mut_ptr(),
            )
        };
        if !p_shaders.is_null() {
            // SAFETY: the application's output array has one slot per info.
            unsafe { std::ptr::copy_nonoverlapping(out.as_ptr(), p_shaders, out.len()) };
        }
        *created = out;
        result
    })
}

pub unsafe extern "system" fn vkDestroyShaderEXT(
    device: vk::Device,
    shader: vk::ShaderEXT,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyShader { shader };
    ctx.chain.run(Command::DestroyShaderEXT, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.shader_object.destroy_shader_ext)(device, shader, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCmdBindShadersEXT(
    command_buffer: vk::CommandBuffer,
    stage_count: u32,
    p_stages: *const vk::ShaderStageFlags,
    p_shaders: *const vk::ShaderEXT,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdBindShaders {
        command_buffer,
        // SAFETY: application arrays, valid for the duration of the call.
        stages: unsafe { raw_slice(p_stages, stage_count) }.to_vec(),
        shaders: unsafe { raw_slice(p_shaders, stage_count) }.to_vec(),
    };
    ctx.chain.run(Command::CmdBindShadersEXT, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.shader_object.cmd_bind_shaders_ext)(command_buffer, stage_count, p_stages, p_shaders) };
        vk::Result::SUCCESS
    });
}
