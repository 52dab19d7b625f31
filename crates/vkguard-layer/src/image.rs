//! Images, image views and image memory binding.

use ash::vk::{self, Handle};
use vkguard_state::image::{ImageDesc, ImageViewDesc};

use crate::call::{Call, ImageBind};
use crate::chassis::Command;
use crate::context::DeviceContext;
use crate::{find_in_chain, raw_slice};

pub unsafe extern "system" fn vkCreateImage(
    device: vk::Device,
    p_create_info: *const vk::ImageCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_image: *mut vk::Image,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateImage {
        desc: ImageDesc::from_create_info(info),
        image: vk::Image::null(),
    };
    ctx.chain.run(Command::CreateImage, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.create_image)(device, p_create_info, p_allocator, p_image) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateImage { image, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *image = unsafe { *p_image };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyImage(
    device: vk::Device,
    image: vk::Image,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyImage { image };
    ctx.chain.run(Command::DestroyImage, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_image)(device, image, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkBindImageMemory(
    device: vk::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::BindImageMemory {
        binds: vec![ImageBind {
            image,
            memory,
            offset,
            swapchain: None,
        }],
    };
    ctx.chain.run(Command::BindImageMemory, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.bind_image_memory)(device, image, memory, offset) }
    })
}

/// Snapshot of one `VkBindImageMemoryInfo`, including a swapchain bind.
///
/// # Safety
/// `info` must carry a well-formed pNext chain.
pub unsafe fn image_bind(info: &vk::BindImageMemoryInfo<'_>) -> ImageBind {
    // SAFETY: upheld by the caller.
    let swapchain = unsafe {
        let found = find_in_chain(info.p_next, vk::StructureType::BIND_IMAGE_MEMORY_SWAPCHAIN_INFO_KHR)
            as *const vk::BindImageMemorySwapchainInfoKHR<'_>;
        found.as_ref().map(|s| (s.swapchain, s.image_index))
    };
    ImageBind {
        image: info.image,
        memory: info.memory,
        offset: info.memory_offset,
        swapchain,
    }
}

fn bind_image_memory2_fn(ctx: &DeviceContext) -> Option<vk::PFN_vkBindImageMemory2> {
    if ctx.dispatch.provides(c"vkBindImageMemory2") {
        return Some(ctx.dispatch.v1_1.bind_image_memory2);
    }
    // SAFETY: resolving a name through the next layer has no side effects.
    let f = unsafe { (ctx.dispatch.gdpa)(ctx.handle, c"vkBindImageMemory2KHR".as_ptr()) }?;
    // SAFETY: the KHR alias has the core signature.
    Some(unsafe { std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkBindImageMemory2>(f) })
}

pub unsafe extern "system" fn vkBindImageMemory2(
    device: vk::Device,
    bind_info_count: u32,
    p_bind_infos: *const vk::BindImageMemoryInfo<'_>,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let Some(next) = bind_image_memory2_fn(&ctx) else {
        return vk::Result::ERROR_EXTENSION_NOT_PRESENT;
    };
    // SAFETY: application pointers, valid for the duration of the call.
    let binds = unsafe { raw_slice(p_bind_infos, bind_info_count) }
        .iter()
        // SAFETY: as above.
        .map(|info| unsafe { image_bind(info) })
        .collect();
    let mut call = Call::BindImageMemory { binds };
    ctx.chain.run(Command::BindImageMemory2, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { next(device, bind_info_count, p_bind_infos) }
    })
}

pub unsafe extern "system" fn vkCreateImageView(
    device: vk::Device,
    p_create_info: *const vk::ImageViewCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_view: *mut vk::ImageView,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateImageView {
        image: info.image,
        desc: ImageViewDesc::from_create_info(info),
        view: vk::ImageView::null(),
    };
    ctx.chain.run(Command::CreateImageView, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.v1_0.create_image_view)(device, p_create_info, p_allocator, p_view) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateImageView { view, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *view = unsafe { *p_view };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroyImageView(
    device: vk::Device,
    view: vk::ImageView,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroyImageView { view };
    ctx.chain.run(Command::DestroyImageView, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.destroy_image_view)(device, view, p_allocator) };
        vk::Result::SUCCESS
    });
}
