//! Queue submission and idle waits.

use ash::vk::{self, Handle};

use crate::call::Call;
use crate::chassis::Command;
use crate::raw_slice;

pub unsafe extern "system" fn vkQueueSubmit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    let ctx = device_context!(queue, vk::Result::ERROR_DEVICE_LOST);
    // SAFETY: application pointers, valid for the duration of the call.
    let batches = unsafe {
        raw_slice(p_submits, submit_count)
            .iter()
            .map(|submit| raw_slice(submit.p_command_buffers, submit.command_buffer_count).to_vec())
            .collect()
    };
    let mut call = Call::QueueSubmit { queue, batches, fence };
    ctx.chain.run(Command::QueueSubmit, queue.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.queue_submit)(queue, submit_count, p_submits, fence) }
    })
}

pub unsafe extern "system" fn vkQueueWaitIdle(queue: vk::Queue) -> vk::Result {
    let ctx = device_context!(queue, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::QueueWaitIdle { queue };
    ctx.chain.run(Command::QueueWaitIdle, queue.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.queue_wait_idle)(queue) }
    })
}

pub unsafe extern "system" fn vkDeviceWaitIdle(device: vk::Device) -> vk::Result {
    let ctx = device_context!(device, vk::Result::ERROR_DEVICE_LOST);
    let mut call = Call::DeviceWaitIdle { device };
    ctx.chain.run(Command::DeviceWaitIdle, device.as_raw(), &mut call, |_| {
        // SAFETY: forwarding the application's arguments unchanged.
        unsafe { (ctx.dispatch.v1_0.device_wait_idle)(device) }
    })
}
