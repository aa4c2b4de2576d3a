use std::ffi::c_void;
use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

pub fn storage_buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::TRANSFER_DST
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
}

pub fn index_buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
}

pub fn uniform_buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::UNIFORM_BUFFER
}

pub fn source_buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
}

pub fn indirect_buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum BufferUsage {
    #[default]
    None,
    GraphicsShaderRead,
    GraphicsShaderReadWrite,
    ComputeShaderRead,
    ComputeShaderReadWrite,
    TransferDst,
    TransferSrc,
    IndexBuffer,
    VertexBuffer,
    DrawCommands,
    HostWrite,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferAccess {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

pub fn buffer_access(usage: BufferUsage) -> BufferAccess {
    match usage {
        BufferUsage::None => BufferAccess {
            stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            access: vk::AccessFlags2::empty(),
        },
        BufferUsage::GraphicsShaderRead => BufferAccess {
            stage: vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
        },
        BufferUsage::GraphicsShaderReadWrite => BufferAccess {
            stage: vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            access: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        },
        BufferUsage::ComputeShaderRead => BufferAccess {
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
        },
        BufferUsage::ComputeShaderReadWrite => BufferAccess {
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        },
        BufferUsage::TransferDst => BufferAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_WRITE,
        },
        BufferUsage::TransferSrc => BufferAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_READ,
        },
        BufferUsage::IndexBuffer => BufferAccess {
            stage: vk::PipelineStageFlags2::VERTEX_INPUT,
            access: vk::AccessFlags2::INDEX_READ,
        },
        BufferUsage::VertexBuffer => BufferAccess {
            stage: vk::PipelineStageFlags2::VERTEX_INPUT,
            access: vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        },
        BufferUsage::DrawCommands => BufferAccess {
            stage: vk::PipelineStageFlags2::DRAW_INDIRECT,
            access: vk::AccessFlags2::INDIRECT_COMMAND_READ,
        },
        BufferUsage::HostWrite => BufferAccess {
            stage: vk::PipelineStageFlags2::HOST,
            access: vk::AccessFlags2::HOST_WRITE,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescription {
    pub name: String,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}

impl Default for BufferDescription {
    fn default() -> Self {
        Self {
            name: String::from("No name"),
            size: 1,
            usage: storage_buffer_usage(),
            memory_location: MemoryLocation::GpuOnly,
        }
    }
}

#[derive(Debug)]
pub struct Buffer {
    pub desc: BufferDescription,
    pub vkhandle: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub usage: BufferUsage,
    /// Persistent mapping, present for host-visible memory locations.
    pub mapped_ptr: Option<NonNull<c_void>>,
    pub gpu_address: u64,
    pub storage_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_buffer_access() {
        let access = buffer_access(BufferUsage::IndexBuffer);
        assert_eq!(access.stage, vk::PipelineStageFlags2::VERTEX_INPUT);
        assert_eq!(access.access, vk::AccessFlags2::INDEX_READ);
    }

    #[test]
    fn test_none_has_no_access() {
        assert!(buffer_access(BufferUsage::None).access.is_empty());
    }

    #[test]
    fn test_storage_usage_flags_carry_device_address() {
        assert!(storage_buffer_usage().contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }
}
