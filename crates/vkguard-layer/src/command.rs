//! Command pools, command buffers and the recorded commands the units
//! look at.

use ash::vk::{self, Handle};

use crate::call::{BufferBarrier, Call};
use crate::chassis::Command;
use crate::raw_slice;

pub unsafe extern "system" fn vkCreateCommandPool(
    device: vk::Device,
    p_create_info: *const vk::CommandPoolCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pool: *mut vk::CommandPool,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateCommandPool {
        flags: info.flags,
        queue_family_index: info.queue_family_index,
        pool: vk::CommandPool::null(),
    };
    ctx.chain.run(Command::CreateCommandPool, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.create_command_pool)(device, p_create_info, p_allocator, p_pool) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateCommandPool { pool, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *pool = unsafe { *p_pool };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyCommandPool(
    device: vk::Device,
    pool: vk::CommandPool,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyCommandPool { pool };
    ctx.chain.run(Command::DestroyCommandPool, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_command_pool)(device, pool, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkResetCommandPool(
    device: vk::Device,
    pool: vk::CommandPool,
    flags: vk::CommandPoolResetFlags,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::ResetCommandPool { pool };
    ctx.chain.run(Command::ResetCommandPool, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.reset_command_pool)(device, pool, flags) }
    })
}

pub unsafe extern "system" fn vkAllocateCommandBuffers(
    device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid allocate info.
    let Some(info) = (unsafe { p_allocate_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::AllocateCommandBuffers {
        pool: info.command_pool,
        level: info.level,
        count: info.command_buffer_count,
        buffers: Vec::new(),
    };
    ctx.chain.run(Command::AllocateCommandBuffers, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.allocate_command_buffers)(device, p_allocate_info, p_buffers) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::AllocateCommandBuffers { buffers, count, .. } = call {
            // SAFETY: the driver wrote `count` handles.
            *buffers = unsafe { raw_slice(p_buffers, *count) }.to_vec();
        }
        result
    })
}

pub unsafe extern "system" fn vkFreeCommandBuffers(
    device: vk::Device,
    pool: vk::CommandPool,
    count: u32,
    p_buffers: *const vk::CommandBuffer,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::FreeCommandBuffers {
        pool,
        // SAFETY: application array, valid for the duration of the call.
        buffers: unsafe { raw_slice(p_buffers, count) }.to_vec(),
    };
    ctx.chain.run(Command::FreeCommandBuffers, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.free_command_buffers)(device, pool, count, p_buffers) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkBeginCommandBuffer(
    command_buffer: vk::CommandBuffer,
    p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
) -> vk::Result {
    let ctx = device_context!(command_buffer, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid begin info.
    let Some(info) = (unsafe { p_begin_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::BeginCommandBuffer {
        command_buffer,
        flags: info.flags,
    };
    ctx.chain.run(Command::BeginCommandBuffer, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.begin_command_buffer)(command_buffer, p_begin_info) }
    })
}

pub unsafe extern "system" fn vkEndCommandBuffer(command_buffer: vk::CommandBuffer) -> vk::Result {
    let ctx = device_context!(command_buffer, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::EndCommandBuffer { command_buffer };
    ctx.chain.run(Command::EndCommandBuffer, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.end_command_buffer)(command_buffer) }
    })
}

pub unsafe extern "system" fn vkResetCommandBuffer(
    command_buffer: vk::CommandBuffer,
    flags: vk::CommandBufferResetFlags,
) -> vk::Result {
    let ctx = device_context!(command_buffer, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::ResetCommandBuffer { command_buffer };
    ctx.chain.run(Command::ResetCommandBuffer, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.reset_command_buffer)(command_buffer, flags) }
    })
}

// ── Recorded commands ───────────────────────────────────────

pub unsafe extern "system" fn vkCmdBindPipeline(
    command_buffer: vk::CommandBuffer,
    bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdBindPipeline {
        command_buffer,
        bind_point,
        pipeline,
    };
    ctx.chain.run(Command::CmdBindPipeline, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.cmd_bind_pipeline)(command_buffer, bind_point, pipeline) };
        vk::Result::SUCCESS
    });
}

#[allow(clippy::too_many_arguments)]
pub unsafe extern "system" fn vkCmdBindDescriptorSets(
    command_buffer: vk::CommandBuffer,
    bind_point: vk::PipelineBindPoint,
    layout: vk::PipelineLayout,
    first_set: u32,
    set_count: u32,
    p_sets: *const vk::DescriptorSet,
    dynamic_offset_count: u32,
    p_dynamic_offsets: *const u32,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdBindDescriptorSets {
        command_buffer,
        bind_point,
        layout,
        first_set,
        // SAFETY: application array, valid for the duration of the call.
        sets: unsafe { raw_slice(p_sets, set_count) }.to_vec(),
    };
    ctx.chain.run(Command::CmdBindDescriptorSets, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe {
            (ctx.dispatch.v1_0.cmd_bind_descriptor_sets)(
                command_buffer,
                bind_point,
                layout,
                first_set,
                set_count,
                p_sets,
                dynamic_offset_count,
                p_dynamic_offsets,
            )
        };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCmdDraw(
    command_buffer: vk::CommandBuffer,
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdDraw {
        command_buffer,
        vertex_count,
        instance_count,
    };
    ctx.chain.run(Command::CmdDraw, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe {
            (ctx.dispatch.v1_0.cmd_draw)(command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCmdDispatch(command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdDispatch {
        command_buffer,
        group_count: [x, y, z],
    };
    ctx.chain.run(Command::CmdDispatch, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.cmd_dispatch)(command_buffer, x, y, z) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCmdCopyBuffer(
    command_buffer: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    region_count: u32,
    p_regions: *const vk::BufferCopy,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdCopyBuffer {
        command_buffer,
        src,
        dst,
        // SAFETY: application array, valid for the duration of the call.
        regions: unsafe { raw_slice(p_regions, region_count) }.to_vec(),
    };
    ctx.chain.run(Command::CmdCopyBuffer, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.cmd_copy_buffer)(command_buffer, src, dst, region_count, p_regions) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCmdFillBuffer(
    command_buffer: vk::CommandBuffer,
    dst: vk::Buffer,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    data: u32,
) {
    let ctx = device_context!(command_buffer, ());
    let mut call = Call::CmdFillBuffer {
        command_buffer,
        dst,
        offset,
        size,
    };
    ctx.chain.run(Command::CmdFillBuffer, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.cmd_fill_buffer)(command_buffer, dst, offset, size, data) };
        vk::Result::SUCCESS
    });
}

#[allow(clippy::too_many_arguments)]
pub unsafe extern "system" fn vkCmdPipelineBarrier(
    command_buffer: vk::CommandBuffer,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    dependency_flags: vk::DependencyFlags,
    memory_barrier_count: u32,
    p_memory_barriers: *const vk::MemoryBarrier<'_>,
    buffer_barrier_count: u32,
    p_buffer_barriers: *const vk::BufferMemoryBarrier<'_>,
    image_barrier_count: u32,
    p_image_barriers: *const vk::ImageMemoryBarrier<'_>,
) {
    let ctx = device_context!(command_buffer, ());
    // SAFETY: application array, valid for the duration of the call.
    let buffer_barriers = unsafe { raw_slice(p_buffer_barriers, buffer_barrier_count) }
        .iter()
        .map(|b| BufferBarrier {
            buffer: b.buffer,
            offset: b.offset,
            size: b.size,
            src_access: b.src_access_mask,
            dst_access: b.dst_access_mask,
        })
        .collect();
    let mut call = Call::CmdPipelineBarrier {
        command_buffer,
        src_stage,
        dst_stage,
        memory_barriers: memory_barrier_count,
        buffer_barriers,
    };
    ctx.chain.run(Command::CmdPipelineBarrier, command_buffer.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe {
            (ctx.dispatch.v1_0.cmd_pipeline_barrier)(
                command_buffer,
                src_stage,
                dst_stage,
                dependency_flags,
                memory_barrier_count,
                p_memory_barriers,
                buffer_barrier_count,
                p_buffer_barriers,
                image_barrier_count,
                p_image_barriers,
            )
        };
        vk::Result::SUCCESS
    });
}
