//! Integration test: state object graph
//!
//! Covers invalidation broadcast, alias detection, double destruction,
//! swapchain teardown with in-flight images, and pool-owned children.

use std::sync::Arc;

use ash::vk::{self, Handle};
use vkguard_state::command::RecordState;
use vkguard_state::image::{ImageDesc, ImageViewDesc};
use vkguard_state::memory::{BufferDesc, MemoryBinding};
use vkguard_state::swapchain::SwapchainDesc;
use vkguard_state::{destroy_object, DeviceState, InstanceState, StateObject};

fn make_device() -> DeviceState {
    let instance = Arc::new(InstanceState::new(vk::Instance::from_raw(0x1), vk::API_VERSION_1_3));
    DeviceState::new(
        vk::Device::from_raw(0x2),
        vk::PhysicalDevice::from_raw(0x3),
        Some(instance),
    )
}

fn make_image_desc(width: u32) -> ImageDesc {
    ImageDesc {
        flags: vk::ImageCreateFlags::empty(),
        image_type: vk::ImageType::TYPE_2D,
        format: vk::Format::R8G8B8A8_UNORM,
        extent: vk::Extent3D {
            width,
            height: 64,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::SAMPLED,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
    }
}

fn make_view_desc() -> ImageViewDesc {
    ImageViewDesc {
        view_type: vk::ImageViewType::TYPE_2D,
        format: vk::Format::R8G8B8A8_UNORM,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
    }
}

fn make_swapchain_desc() -> SwapchainDesc {
    SwapchainDesc {
        surface: vk::SurfaceKHR::from_raw(0x500),
        min_image_count: 2,
        image_format: vk::Format::B8G8R8A8_SRGB,
        image_extent: vk::Extent2D {
            width: 800,
            height: 600,
        },
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        present_mode: vk::PresentModeKHR::FIFO,
        old_swapchain: vk::SwapchainKHR::null(),
    }
}

#[test]
fn test_destroying_parent_clears_child_reference() {
    let device = make_device();
    let image = vk::Image::from_raw(0x10);
    let view = vk::ImageView::from_raw(0x11);

    device.add_image(image, make_image_desc(64));
    let view_state = device.add_image_view(view, make_view_desc(), image);
    assert!(view_state.image().is_some());

    let destroyed = match device.destroy_image(image) {
        Some(state) => state,
        other => panic!("expected image state, got {:?}", other),
    };
    assert!(destroyed.is_destroyed());

    // The view outlives its image with an empty reference.
    assert!(view_state.image().is_none());
    assert!(!view_state.is_destroyed());
    assert!(device.image_views.contains(view.as_raw()));

    // Destroying the view afterwards is safe, and so is doing it twice.
    let removed = device.destroy_image_view(view);
    assert!(removed.is_some());
    if let Some(state) = removed {
        destroy_object(state.as_ref());
        assert!(state.is_destroyed());
    }
    assert!(device.destroy_image_view(view).is_none());
    println!("image view survived its image and was destroyed cleanly");
}

#[test]
fn test_freeing_memory_leaves_bound_buffer_alive() {
    let device = make_device();
    let memory = vk::DeviceMemory::from_raw(0x20);
    let buffer = vk::Buffer::from_raw(0x21);

    device.add_memory(memory, 4096, 0);
    let buffer_state = device.add_buffer(
        buffer,
        BufferDesc {
            flags: vk::BufferCreateFlags::empty(),
            size: 1024,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
        },
    );
    assert!(device.bind_buffer_memory(buffer, memory, 0));
    let memory_state = match device.memories.get(memory.as_raw()) {
        Some(m) => m,
        None => panic!("memory not tracked"),
    };
    assert_eq!(memory_state.bound_resources(), 1);
    assert_eq!(memory_state.node().child_count(), 1);

    device.free_memory(memory);

    match &*buffer_state.binding.read() {
        MemoryBinding::MemoryFreed { memory: freed, offset } => {
            assert_eq!(*freed, memory);
            assert_eq!(*offset, 0);
        }
        other => panic!("expected MemoryFreed, got {:?}", other),
    }
    assert!(!buffer_state.is_destroyed());
    assert_eq!(memory_state.bound_resources(), 0);

    assert!(device.destroy_buffer(buffer).is_some());
}

#[test]
fn test_alias_detection_follows_binding_and_parameters() {
    let device = make_device();
    let memory = vk::DeviceMemory::from_raw(0x30);
    let other_memory = vk::DeviceMemory::from_raw(0x31);
    let a = vk::Image::from_raw(0x32);
    let b = vk::Image::from_raw(0x33);
    let c = vk::Image::from_raw(0x34);

    device.add_memory(memory, 1 << 20, 0);
    device.add_memory(other_memory, 1 << 20, 0);
    device.add_image(a, make_image_desc(64));
    device.add_image(b, make_image_desc(64));
    device.add_image(c, make_image_desc(128));

    assert!(device.bind_image_memory(a, memory, 0));
    assert!(device.bind_image_memory(b, memory, 0));
    assert!(device.bind_image_memory(c, memory, 0));

    let aliases: Vec<vk::Image> = device.aliases_of(a).iter().map(|s| s.handle).collect();
    assert_eq!(aliases, vec![b], "only the identically created image aliases");

    // Rebinding to another allocation breaks the relation.
    assert!(device.bind_image_memory(b, other_memory, 0));
    assert!(device.aliases_of(a).is_empty());

    // Same allocation, different offset: no alias either.
    assert!(device.bind_image_memory(b, memory, 256));
    assert!(device.aliases_of(a).is_empty());

    let memory_state = match device.memories.get(memory.as_raw()) {
        Some(m) => m,
        None => panic!("memory not tracked"),
    };
    assert_eq!(memory_state.bound_resources(), 3);
}

#[test]
fn test_images_bound_to_same_swapchain_slot_alias() {
    let device = make_device();
    let swapchain = vk::SwapchainKHR::from_raw(0x40);
    let presentable = [vk::Image::from_raw(0x41), vk::Image::from_raw(0x42)];
    let app_image = vk::Image::from_raw(0x43);

    device.add_swapchain(swapchain, make_swapchain_desc());
    let added = device.register_swapchain_images(swapchain, &presentable);
    assert_eq!(added.len(), 2);

    // A second query returns the same images and registers nothing new.
    assert!(device.register_swapchain_images(swapchain, &presentable).is_empty());

    device.add_image(app_image, make_image_desc(800));
    assert!(device.bind_image_swapchain(app_image, swapchain, 1));

    let aliases: Vec<vk::Image> = device.aliases_of(app_image).iter().map(|s| s.handle).collect();
    assert_eq!(aliases, vec![presentable[1]]);
}

#[test]
fn test_swapchain_destroy_with_image_in_flight() {
    let device = make_device();
    let swapchain = vk::SwapchainKHR::from_raw(0x50);
    let images = [vk::Image::from_raw(0x51), vk::Image::from_raw(0x52)];
    let view = vk::ImageView::from_raw(0x53);

    let chain = device.add_swapchain(swapchain, make_swapchain_desc());
    device.register_swapchain_images(swapchain, &images);
    chain.acquire(0);
    assert!(chain.is_acquired(0));

    // Keep the acquired image reachable through a view.
    let view_state = device.add_image_view(view, make_view_desc(), images[0]);

    assert!(device.destroy_swapchain(swapchain).is_some());
    assert!(chain.is_destroyed());
    assert!(!device.images.contains(images[0].as_raw()));
    assert!(!device.images.contains(images[1].as_raw()));

    match view_state.image() {
        // the image itself was destroyed with its swapchain
        None => {}
        Some(image) => panic!("view still points at {:?}", image.handle),
    }
    device.destroy_image_view(view);
}

#[test]
fn test_retired_swapchain_and_surface_destroy() {
    let instance = Arc::new(InstanceState::new(vk::Instance::from_raw(0x60), vk::API_VERSION_1_2));
    let device = DeviceState::new(
        vk::Device::from_raw(0x61),
        vk::PhysicalDevice::from_raw(0x62),
        Some(instance.clone()),
    );
    let first = vk::SwapchainKHR::from_raw(0x63);
    let second = vk::SwapchainKHR::from_raw(0x64);

    let old = device.add_swapchain(first, make_swapchain_desc());
    let new = device.add_swapchain(
        second,
        SwapchainDesc {
            old_swapchain: first,
            ..make_swapchain_desc()
        },
    );
    assert!(old.is_retired());
    assert!(!new.is_retired());
    assert!(new.surface().is_some());

    let surface = make_swapchain_desc().surface;
    assert!(instance.destroy_surface(surface).is_some());
    assert!(old.surface().is_none());
    assert!(new.surface().is_none());
    assert!(!new.is_destroyed());
}

#[test]
fn test_descriptor_pool_destroy_frees_sets() {
    let device = make_device();
    let pool = vk::DescriptorPool::from_raw(0x70);
    let layout = vk::DescriptorSetLayout::from_raw(0x71);
    let sets = [vk::DescriptorSet::from_raw(0x72), vk::DescriptorSet::from_raw(0x73)];

    device.add_set_layout(layout, vk::DescriptorSetLayoutCreateFlags::empty(), Vec::new());
    let pool_state = device.add_descriptor_pool(pool, vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET, 8);
    let created = device.allocate_descriptor_sets(pool, &[layout, layout], &sets);
    assert_eq!(created.len(), 2);
    assert_eq!(pool_state.allocated(), 2);
    assert!(created[0].layout.is_some());

    assert_eq!(device.free_descriptor_sets(pool, &sets[..1]), 1);
    assert_eq!(pool_state.allocated(), 1);

    let freed = device.destroy_descriptor_pool(pool);
    assert_eq!(freed.len(), 1);
    assert!(freed[0].is_destroyed());
    assert!(device.descriptor_sets.is_empty());
    assert!(pool_state.is_destroyed());
}

#[test]
fn test_destroyed_pipeline_invalidates_command_buffer() {
    let device = make_device();
    let pool = vk::CommandPool::from_raw(0x80);
    let cb = vk::CommandBuffer::from_raw(0x81);
    let pipeline = vk::Pipeline::from_raw(0x82);

    device.add_command_pool(pool, vk::CommandPoolCreateFlags::empty(), 0);
    let buffers = device.allocate_command_buffers(pool, vk::CommandBufferLevel::PRIMARY, &[cb]);
    let cb_state = buffers[0].clone();
    let pipeline_state = device.add_pipeline(
        pipeline,
        vk::PipelineBindPoint::COMPUTE,
        vk::PipelineLayout::null(),
        &[],
        false,
    );

    cb_state.begin();
    cb_state.bind_pipeline(pipeline_state);
    cb_state.end();
    assert_eq!(cb_state.record_state(), RecordState::Executable);
    assert!(cb_state.bound_pipeline(vk::PipelineBindPoint::COMPUTE).is_some());

    device.destroy_pipeline(pipeline);
    assert_eq!(cb_state.record_state(), RecordState::Invalid);
    assert!(cb_state.bound_pipeline(vk::PipelineBindPoint::COMPUTE).is_none());

    // Re-recording clears the invalid state.
    cb_state.begin();
    assert_eq!(cb_state.record_state(), RecordState::Recording);

    let freed = device.destroy_command_pool(pool);
    assert_eq!(freed.len(), 1);
    assert!(cb_state.is_destroyed());
    assert!(device.command_buffers.is_empty());
}

#[test]
fn test_live_objects_and_teardown() {
    let device = make_device();
    device.add_memory(vk::DeviceMemory::from_raw(0x90), 64, 0);
    device.add_image(vk::Image::from_raw(0x91), make_image_desc(16));
    device.add_queue(vk::Queue::from_raw(0x92), 0, 0);

    let live = device.live_objects();
    assert_eq!(live.len(), 2, "queues are not application-owned");

    let destroyed = device.destroy_all();
    assert_eq!(destroyed.len(), 3);
    assert!(device.live_objects().is_empty());
}

#[test]
fn test_view_descs_compare_by_subresource_range() {
    let view = make_view_desc();
    assert_eq!(view, make_view_desc());

    let mut other_layer = make_view_desc();
    other_layer.subresource_range.base_array_layer = 1;
    assert_ne!(view, other_layer);

    let mut depth = make_view_desc();
    depth.subresource_range.aspect_mask = vk::ImageAspectFlags::DEPTH;
    assert_ne!(view, depth);
}
