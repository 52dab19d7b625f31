//! Integration test: debug output buffers
//!
//! Drives `OutputBuffer` through a host-memory fake of the allocator
//! collaborator and decodes what a shader would have written.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkguard_gpuav::instrument::site_tag;
use vkguard_gpuav::{AllocError, GpuAllocator, OutputBuffer, OutputRecord};

#[derive(Default)]
struct HostAllocator {
    next: AtomicU64,
    buffers: Mutex<Vec<vk::Buffer>>,
    memory: Mutex<HashMap<u64, Box<[u32]>>>,
    no_host_visible: bool,
}

impl HostAllocator {
    fn write(&self, memory: vk::DeviceMemory, words: &[u32]) {
        if let Some(backing) = self.memory.lock().get_mut(&memory.as_raw()) {
            backing[..words.len()].copy_from_slice(words);
        }
    }

    fn live(&self) -> (usize, usize) {
        (self.buffers.lock().len(), self.memory.lock().len())
    }
}

impl GpuAllocator for HostAllocator {
    fn create_buffer(&self, _size: u64, _usage: vk::BufferUsageFlags) -> Result<vk::Buffer, vk::Result> {
        let buffer = vk::Buffer::from_raw(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.buffers.lock().push(buffer);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.buffers.lock().retain(|b| *b != buffer);
    }

    fn buffer_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 64,
            alignment: 16,
            memory_type_bits: 0b11,
        }
    }

    fn find_memory_type(&self, type_bits: u32, _flags: vk::MemoryPropertyFlags) -> Option<u32> {
        if self.no_host_visible {
            None
        } else {
            (0..32).find(|i| type_bits & (1 << i) != 0)
        }
    }

    fn allocate_memory(&self, size: u64, _type_index: u32) -> Result<vk::DeviceMemory, vk::Result> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 0x100;
        self.memory
            .lock()
            .insert(raw, vec![0xffff_ffff; (size / 4) as usize].into_boxed_slice());
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

#[test]
fn test_new_buffer_reads_back_zeroed() {
    let alloc = HostAllocator::default();
    let output = match OutputBuffer::create(&alloc, 64) {
        Ok(o) => o,
        Err(e) => panic!("create failed: {e}"),
    };
    let words = match output.read(&alloc) {
        Ok(w) => w,
        Err(e) => panic!("read failed: {e}"),
    };
    assert_eq!(words.len(), 16);
    assert!(words.iter().all(|w| *w == 0));
    assert_eq!(OutputRecord::decode(&words), None);

    output.destroy(&alloc);
    assert_eq!(alloc.live(), (0, 0));
}

#[test]
fn test_drain_decodes_and_resets() {
    let alloc = HostAllocator::default();
    let output = match OutputBuffer::create(&alloc, 64) {
        Ok(o) => o,
        Err(e) => panic!("create failed: {e}"),
    };
    alloc.write(output.memory, &[3, site_tag(0xbeef, 4)]);

    let words = output.drain(&alloc).unwrap_or_default();
    match OutputRecord::decode(&words) {
        Some(record) => {
            assert_eq!(record.count, 3);
            assert_eq!(record.shader_id, 0xbeef);
            assert_eq!(record.site, 4);
            println!("decoded: {record}");
        }
        None => panic!("expected an output record"),
    }

    let after = output.read(&alloc).unwrap_or_default();
    assert_eq!(OutputRecord::decode(&after), None);
    output.destroy(&alloc);
}

#[test]
fn test_missing_memory_type_cleans_up() {
    let alloc = HostAllocator {
        no_host_visible: true,
        ..HostAllocator::default()
    };
    match OutputBuffer::create(&alloc, 64) {
        Err(AllocError::NoMemoryType) => {}
        other => panic!("expected NoMemoryType, got {:?}", other),
    }
    assert_eq!(alloc.live(), (0, 0));
}
