//! Device memory and buffers.

use std::ffi::c_void;

use ash::vk::{self, Handle};
use vkguard_state::memory::BufferDesc;

use crate::call::Call;
use crate::chassis::Command;

pub unsafe extern "system" fn vkAllocateMemory(
    device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid allocate info.
    let Some(info) = (unsafe { p_allocate_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::AllocateMemory {
        size: info.allocation_size,
        type_index: info.memory_type_index,
        memory: vk::DeviceMemory::null(),
    };
    ctx.chain.run(Command::AllocateMemory, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.allocate_memory)(device, p_allocate_info, p_allocator, p_memory) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::AllocateMemory { memory, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *memory = unsafe { *p_memory };
        }
        result
    })
}

pub unsafe extern "system" fn vkFreeMemory(
    device: vk::Device,
    memory: vk::DeviceMemory,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::FreeMemory { memory };
    ctx.chain.run(Command::FreeMemory, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.free_memory)(device, memory, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkMapMemory(
    device: vk::Device,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    flags: vk::MemoryMapFlags,
    pp_data: *mut *mut c_void,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::MapMemory { memory, offset, size };
    ctx.chain.run(Command::MapMemory, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.map_memory)(device, memory, offset, size, flags, pp_data) }
    })
}

pub unsafe extern "system" fn vkUnmapMemory(device: vk::Device, memory: vk::DeviceMemory) {
    let ctx = device_context!(device, ());
    let mut call = Call::UnmapMemory { memory };
    ctx.chain.run(Command::UnmapMemory, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.unmap_memory)(device, memory) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkBindBufferMemory(
    device: vk::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::BindBufferMemory { buffer, memory, offset };
    ctx.chain.run(Command::BindBufferMemory, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.bind_buffer_memory)(device, buffer, memory, offset) }
    })
}

pub unsafe extern "system" fn vkCreateBuffer(
    device: vk::Device,
    p_create_info: *const vk::BufferCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_buffer: *mut vk::Buffer,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateBuffer {
        desc: BufferDesc::from_create_info(info),
        buffer: vk::Buffer::null(),
    };
    ctx.chain.run(Command::CreateBuffer, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.create_buffer)(device, p_create_info, p_allocator, p_buffer) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateBuffer { buffer, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *buffer = unsafe { *p_buffer };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyBuffer(
    device: vk::Device,
    buffer: vk::Buffer,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyBuffer { buffer };
    ctx.chain.run(Command::DestroyBuffer, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_buffer)(device, buffer, p_allocator) };
        vk::Result::SUCCESS
    });
}
