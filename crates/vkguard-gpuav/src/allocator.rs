//! GPU memory for debug output buffers.
//!
//! The allocator collaborator is a set of trampolines into the device
//! dispatch table; nothing in this crate calls the driver directly.

use std::ffi::c_void;

use ash::vk;
use tracing::warn;

use crate::error::AllocError;
use crate::instrument::OUTPUT_HEADER_WORDS;

pub trait GpuAllocator: Send + Sync {
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<vk::Buffer, vk::Result>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn buffer_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    /// Index of a memory type allowed by `type_bits` that has `flags`.
    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32>;

    fn allocate_memory(&self, size: u64, type_index: u32) -> Result<vk::DeviceMemory, vk::Result>;

    fn free_memory(&self, memory: vk::DeviceMemory);

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> Result<(), vk::Result>;

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut c_void, vk::Result>;

    fn unmap_memory(&self, memory: vk::DeviceMemory);
}

/// Host-visible storage buffer the instrumented shaders write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

impl OutputBuffer {
    /// Create, bind and zero a buffer of at least `size` bytes.
    pub fn create(alloc: &dyn GpuAllocator, size: u64) -> Result<Self, AllocError> {
        let size = size.max((OUTPUT_HEADER_WORDS * 4) as u64);
        let buffer = alloc
            .create_buffer(size, vk::BufferUsageFlags::STORAGE_BUFFER)
            .map_err(AllocError::CreateBuffer)?;

        let reqs = alloc.buffer_requirements(buffer);
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let Some(type_index) = alloc.find_memory_type(reqs.memory_type_bits, flags) else {
            alloc.destroy_buffer(buffer);
            return Err(AllocError::NoMemoryType);
        };

        let memory = match alloc.allocate_memory(reqs.size.max(size), type_index) {
            Ok(memory) => memory,
            Err(result) => {
                alloc.destroy_buffer(buffer);
                return Err(AllocError::AllocateMemory(result));
            }
        };
        if let Err(result) = alloc.bind_buffer_memory(buffer, memory, 0) {
            alloc.destroy_buffer(buffer);
            alloc.free_memory(memory);
            return Err(AllocError::Bind(result));
        }

        let output = Self { buffer, memory, size };
        if let Err(err) = output.clear(alloc) {
            output.destroy(alloc);
            return Err(err);
        }
        Ok(output)
    }

    fn word_count(&self) -> usize {
        (self.size / 4) as usize
    }

    /// Copy the buffer contents out.
    pub fn read(&self, alloc: &dyn GpuAllocator) -> Result<Vec<u32>, AllocError> {
        let ptr = alloc
            .map_memory(self.memory, 0, self.size)
            .map_err(AllocError::Map)?;
        // SAFETY: the mapping covers `size` bytes of host-coherent memory,
        // and vkMapMemory results are aligned to minMemoryMapAlignment.
        let words = unsafe { std::slice::from_raw_parts(ptr as *const u32, self.word_count()) }.to_vec();
        alloc.unmap_memory(self.memory);
        Ok(words)
    }

    pub fn clear(&self, alloc: &dyn GpuAllocator) -> Result<(), AllocError> {
        let ptr = alloc
            .map_memory(self.memory, 0, self.size)
            .map_err(AllocError::Map)?;
        // SAFETY: see `read`; the mapping is writable.
        unsafe { std::ptr::write_bytes(ptr as *mut u8, 0, self.size as usize) };
        alloc.unmap_memory(self.memory);
        Ok(())
    }

    pub fn destroy(&self, alloc: &dyn GpuAllocator) {
        alloc.destroy_buffer(self.buffer);
        alloc.free_memory(self.memory);
    }

    /// Read back and zero in one step. Errors are logged, not returned: a
    /// lost readback only means lost diagnostics.
    pub fn drain(&self, alloc: &dyn GpuAllocator) -> Option<Vec<u32>> {
        match self.read(alloc) {
            Ok(words) => {
                if let Err(err) = self.clear(alloc) {
                    warn!(%err, "failed to reset debug output buffer");
                }
                Some(words)
            }
            Err(err) => {
                warn!(%err, "failed to read debug output buffer");
                None
            }
        }
    }
}
