use std::path::PathBuf;

use ash::vk;
use karst_containers::ContainerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RhiError {
    #[error("No suitable physical device has been found")]
    NoPhysicalDevice,

    #[error("It is impossible to create the requested queue")]
    ImpossibleQueue,

    #[error("No supported surface format was found")]
    NoSurfaceFormat,

    #[error("Out of device memory")]
    OutOfDeviceMemory,

    #[error("Out of host memory")]
    OutOfHostMemory,

    #[error("The swapchain no longer matches the surface and must be recreated")]
    SwapchainOutOfDate,

    #[error("The device has been lost")]
    DeviceLost,

    #[error("Failed to load shader bytecode from {path}")]
    ShaderLoadFailed { path: PathBuf },

    #[error("Failed to compile a pipeline for program {name}")]
    PipelineCompileFailed { name: String },

    #[error("A bindless index was referenced but no resource is bound there")]
    ResourceBindingMismatch,

    #[error("The bindless descriptor array is exhausted")]
    BindlessArrayFull,

    #[error("Vulkan resource does not have a mapped pointer")]
    NoMappedPointer,

    #[error(transparent)]
    InvalidHandle(#[from] ContainerError),

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Vulkan call failed: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => RhiError::OutOfDeviceMemory,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => RhiError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
                RhiError::SwapchainOutOfDate
            }
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            other => RhiError::Vulkan(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_taxonomy() {
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RhiError::OutOfDeviceMemory
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR),
            RhiError::SwapchainOutOfDate
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_DEVICE_LOST),
            RhiError::DeviceLost
        ));
        assert!(matches!(
            RhiError::from(vk::Result::TIMEOUT),
            RhiError::Vulkan(vk::Result::TIMEOUT)
        ));
    }
}
