//! `VK_KHR_swapchain`.

use ash::vk::{self, Handle};
use vkguard_state::swapchain::SwapchainDesc;

use crate::call::Call;
use crate::chassis::Command;
use crate::raw_slice;

pub unsafe extern "system" fn vkCreateSwapchainKHR(
    device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid create info.
    let Some(info) = (unsafe { p_create_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let mut call = Call::CreateSwapchain {
        desc: SwapchainDesc::from_create_info(info),
        swapchain: vk::SwapchainKHR::null(),
    };
    ctx.chain.run(Command::CreateSwapchainKHR, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result =
            unsafe { (ctx.dispatch.swapchain.create_swapchain_khr)(device, p_create_info, p_allocator, p_swapchain) };
        if result != vk::Result::SUCCESS {
            return result;
        }
        if let Call::CreateSwapchain { swapchain, .. } = call {
            // SAFETY: the driver wrote the new handle.
            *swapchain = unsafe { *p_swapchain };
        }
        result
    })
}

pub unsafe extern "system" fn vkDestroySwapchainKHR(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let ctx = device_context!(device, ());
    let mut call = Call::DestroySwapchain { swapchain };
    ctx.chain.run(Command::DestroySwapchainKHR, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.swapchain.destroy_swapchain_khr)(device, swapchain, p_allocator) };
        vk::Result::SUCCESS
    });
}

pub unsafe extern "system" fn vkGetSwapchainImagesKHR(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_count: *mut u32,
    p_images: *mut vk::Image,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::GetSwapchainImages {
        swapchain,
        images: Vec::new(),
    };
    ctx.chain.run(Command::GetSwapchainImagesKHR, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.swapchain.get_swapchain_images_khr)(device, swapchain, p_count, p_images) };
        if result.as_raw() >= 0 && !p_images.is_null() && !p_count.is_null() {
            if let Call::GetSwapchainImages { images, .. } = call {
                // SAFETY: the driver wrote `*p_count` handles.
                *images = unsafe { raw_slice(p_images, *p_count) }.to_vec();
            }
        }
        result
    })
}

pub unsafe extern "system" fn vkAcquireNextImageKHR(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    timeout: u64,
    semaphore: vk::Semaphore,
    fence: vk::Fence,
    p_image_index: *mut u32,
) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::AcquireNextImage {
        swapchain,
        image_index: u32::MAX,
    };
    ctx.chain.run(Command::AcquireNextImageKHR, device.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe {
            (ctx.dispatch.swapchain.acquire_next_image_khr)(device, swapchain, timeout, semaphore, fence, p_image_index)
        };
        // SUBOPTIMAL still hands out an image.
        if result.as_raw() >= 0 && !p_image_index.is_null() {
            if let Call::AcquireNextImage { image_index, .. } = call {
                // SAFETY: the driver wrote the index.
                *image_index = unsafe { *p_image_index };
            }
        }
        result
    })
}

pub unsafe extern "system" fn vkQueuePresentKHR(queue: vk::Queue, p_present_info: *const vk::PresentInfoKHR<'_>) -> vk::Result {
    let ctx = device_context!(queue, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: the application passes a valid present info.
    let Some(info) = (unsafe { p_present_info.as_ref() }) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    // SAFETY: application pointers, valid for the duration of the call.
    let presents = unsafe {
        raw_slice(info.p_swapchains, info.swapchain_count)
            .iter()
            .copied()
            .zip(raw_slice(info.p_image_indices, info.swapchain_count).iter().copied())
            .collect()
    };
    let mut call = Call::QueuePresent {
        queue,
        presents,
        results: Vec::new(),
    };
    ctx.chain.run(Command::QueuePresentKHR, queue.as_raw(), &mut call, |call| {
        // SAFETY: forwarding the application's arguments unchanged.
        let result = unsafe { (ctx.dispatch.swapchain.queue_present_khr)(queue, p_present_info) };
        if let Call::QueuePresent { results, .. } = call {
            // SAFETY: when requested, the driver wrote one result per swapchain.
            *results = unsafe { raw_slice(info.p_results, info.swapchain_count) }.to_vec();
        }
        result
    })
}
