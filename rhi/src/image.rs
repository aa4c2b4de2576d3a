use ash::vk;
use glam::IVec3;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

pub fn sampled_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
}

pub fn storage_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED
}

pub fn color_attachment_usage() -> vk::ImageUsageFlags {
    storage_image_usage()
        | sampled_image_usage()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT
}

pub fn depth_attachment_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32
    )
}

/// The one current usage of an image. Barrier source and destination are both
/// derived from it.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ImageUsage {
    #[default]
    None,
    GraphicsShaderRead,
    GraphicsShaderReadWrite,
    ComputeShaderRead,
    ComputeShaderReadWrite,
    TransferDst,
    TransferSrc,
    ColorAttachment,
    DepthAttachment,
    Present,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageAccess {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

pub fn image_access(usage: ImageUsage) -> ImageAccess {
    match usage {
        ImageUsage::None => ImageAccess {
            stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            access: vk::AccessFlags2::empty(),
            layout: vk::ImageLayout::UNDEFINED,
        },
        ImageUsage::GraphicsShaderRead => ImageAccess {
            stage: vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        ImageUsage::GraphicsShaderReadWrite => ImageAccess {
            stage: vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            access: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            layout: vk::ImageLayout::GENERAL,
        },
        ImageUsage::ComputeShaderRead => ImageAccess {
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        ImageUsage::ComputeShaderReadWrite => ImageAccess {
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            layout: vk::ImageLayout::GENERAL,
        },
        ImageUsage::TransferDst => ImageAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_WRITE,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
        ImageUsage::TransferSrc => ImageAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_READ,
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
        ImageUsage::ColorAttachment => ImageAccess {
            stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        ImageUsage::DepthAttachment => ImageAccess {
            stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        ImageUsage::Present => ImageAccess {
            stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access: vk::AccessFlags2::empty(),
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
    }
}

/// Both sides of a full WRITE to WRITE barrier: every stage, write access
/// only, layout kept as-is.
pub fn absolute_access(layout: vk::ImageLayout) -> ImageAccess {
    ImageAccess {
        stage: vk::PipelineStageFlags2::ALL_COMMANDS,
        access: vk::AccessFlags2::MEMORY_WRITE,
        layout,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescription {
    pub name: String,
    pub size: IVec3,
    pub mip_levels: u32,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usages: vk::ImageUsageFlags,
    pub memory_location: MemoryLocation,
}

impl Default for ImageDescription {
    fn default() -> Self {
        Self {
            name: String::from("No name"),
            size: IVec3::new(1, 1, 1),
            mip_levels: 1,
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            usages: sampled_image_usage(),
            memory_location: MemoryLocation::GpuOnly,
        }
    }
}

#[derive(Debug)]
pub struct Image {
    pub desc: ImageDescription,
    pub vkhandle: vk::Image,
    pub allocation: Option<Allocation>,
    pub usage: ImageUsage,
    /// Swapchain images are owned by the swapchain, never by the allocator.
    pub is_proxy: bool,
    pub full_view: vk::ImageView,
    pub sampled_index: Option<u32>,
    pub storage_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_layouts() {
        assert_eq!(
            image_access(ImageUsage::ColorAttachment).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            image_access(ImageUsage::DepthAttachment).layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            image_access(ImageUsage::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_fresh_image_has_undefined_layout() {
        let access = image_access(ImageUsage::None);
        assert_eq!(access.layout, vk::ImageLayout::UNDEFINED);
        assert!(access.access.is_empty());
    }

    #[test]
    fn test_writes_carry_write_access() {
        for usage in [
            ImageUsage::GraphicsShaderReadWrite,
            ImageUsage::ComputeShaderReadWrite,
            ImageUsage::TransferDst,
            ImageUsage::ColorAttachment,
            ImageUsage::DepthAttachment,
        ] {
            let access = image_access(usage);
            assert!(
                access.access.intersects(
                    vk::AccessFlags2::SHADER_WRITE
                        | vk::AccessFlags2::TRANSFER_WRITE
                        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                ),
                "{usage:?} must include a write access"
            );
        }
    }

    #[test]
    fn test_absolute_access_is_write_to_write() {
        let access = absolute_access(vk::ImageLayout::GENERAL);
        assert_eq!(access.stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(access.access, vk::AccessFlags2::MEMORY_WRITE);
        // The layout is untouched, an absolute barrier never transitions.
        assert_eq!(access.layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_depth_format_classification() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }
}
