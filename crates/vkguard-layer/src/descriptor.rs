//! Descriptor set layouts, pools and sets.

use ash::vk::{self, Handle};
use vkguard_state::pipeline::LayoutBinding;

use crate::call::Call;
use crate::chassis::Command;
use crate::raw_slice;

pub unsafe extern "system" fn vkCreateDescriptorSetLayout(
    device: vk::Device,
    p_create_info: *const vk::DescriptorSetLayoutCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_layout: *mut vk::DescriptorSetLayout,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateSetLayout {
        flags: info.flags,
        // SAFETY: application array, valid for the duration of the call.
        bindings: unsafe { raw_slice(info.p_bindings, info.binding_count) }
            .iter()
            .map(LayoutBinding::from_raw)
            .collect(),
        layout: vk::DescriptorSetLayout::null(),
    };
    ctx.chain.run(Command::CreateDescriptorSetLayout, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result =
            unsafe { (ctx.dispatch.v1_0.create_descriptor_set_layout)(device, p_create_info, p_allocator, p_layout) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateSetLayout { layout, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *layout = unsafe { *p_layout };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyDescriptorSetLayout(
    device: vk::Device,
    layout: vk::DescriptorSetLayout,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroySetLayout { layout };
    ctx.chain.run(Command::DestroyDescriptorSetLayout, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_descriptor_set_layout)(device, layout, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkCreateDescriptorPool(
    device: vk::Device,
    p_create_info: *const vk::DescriptorPoolCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pool: *mut vk::DescriptorPool,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateDescriptorPool {
        flags: info.flags,
        max_sets: info.max_sets,
        pool: vk::DescriptorPool::null(),
    };
    ctx.chain.run(Command::CreateDescriptorPool, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.create_descriptor_pool)(device, p_create_info, p_allocator, p_pool) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateDescriptorPool { pool, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *pool = unsafe { *p_pool };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyDescriptorPool(
    device: vk::Device,
    pool: vk::DescriptorPool,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyDescriptorPool { pool };
    ctx.chain.run(Command::DestroyDescriptorPool, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_descriptor_pool)(device, pool, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkResetDescriptorPool(
    device: vk::Device,
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolResetFlags,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::ResetDescriptorPool { pool };
    ctx.chain.run(Command::ResetDescriptorPool, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.reset_descriptor_pool)(device, pool, flags) }
    })
}

pub unsafe extern "system" fn vkAllocateDescriptorSets(
    device: vk::Device,
    p_allocate_info: *const vk::DescriptorSetAllocateInfo<'_>,
    p_sets: *mut vk::DescriptorSet,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid allocate info.
    let Some(info) = (unsafe { p_allocate_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::AllocateDescriptorSets {
        pool: info.descriptor_pool,
        // SAFETY: application array, valid for the duration of the call.
        layouts: unsafe { raw_slice(info.p_set_layouts, info.descriptor_set_count) }.to_vec(),
        sets: Vec::new(),
    };
    ctx.chain.run(Command::AllocateDescriptorSets, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.allocate_descriptor_sets)(device, p_allocate_info, p_sets) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::AllocateDescriptorSets { sets, .. } = call {
            // SAFETY: the driver wrote one handle per layout.
            *sets = unsafe { raw_slice(p_sets, info.descriptor_set_count) }.to_vec();
        }
        result
    })
}

pub unsafe extern "system" fn vkFreeDescriptorSets(
    device: vk::Device,
    pool: vk::DescriptorPool,
    count: u32,
    p_sets: *const vk::DescriptorSet,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::FreeDescriptorSets {
        pool,
        // SAFETY: application array, valid for the duration of the call.
        sets: unsafe { raw_slice(p_sets, count) }.to_vec(),
    };
    ctx.chain.run(Command::FreeDescriptorSets, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.free_descriptor_sets)(device, pool, count, p_sets) }
    })
}
