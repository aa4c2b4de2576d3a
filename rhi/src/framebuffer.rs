use ash::vk;
use glam::IVec3;
use karst_containers::Handle;

use crate::image::Image;

pub const MAX_ATTACHMENTS: usize = 4;

/// Load-op kind, the part of a [`LoadOp`] that selects a render pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LoadKind {
    Load,
    Clear,
    Ignore,
}

/// Attachment load operation with its clear value.
#[derive(Copy, Clone)]
pub struct LoadOp {
    pub kind: LoadKind,
    pub clear_value: vk::ClearValue,
}

impl LoadOp {
    pub fn load() -> Self {
        Self {
            kind: LoadKind::Load,
            clear_value: vk::ClearValue::default(),
        }
    }

    pub fn ignore() -> Self {
        Self {
            kind: LoadKind::Ignore,
            clear_value: vk::ClearValue::default(),
        }
    }

    pub fn clear(clear_value: vk::ClearValue) -> Self {
        Self {
            kind: LoadKind::Clear,
            clear_value,
        }
    }

    pub fn clear_black() -> Self {
        Self::clear(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        })
    }

    pub fn clear_depth(depth: f32) -> Self {
        Self::clear(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        })
    }

    pub fn to_vk(&self) -> vk::AttachmentLoadOp {
        match self.kind {
            LoadKind::Load => vk::AttachmentLoadOp::LOAD,
            LoadKind::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadKind::Ignore => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl std::fmt::Debug for LoadOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOp").field("kind", &self.kind).finish()
    }
}

/// Attachment formats of a framebuffer or graphics pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttachmentsFormat {
    pub attachment_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferFormat {
    pub size: IVec3,
    pub format: AttachmentsFormat,
}

impl Default for FramebufferFormat {
    fn default() -> Self {
        Self {
            size: IVec3::new(1, 1, 1),
            format: AttachmentsFormat::default(),
        }
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    pub vkhandle: vk::Framebuffer,
    pub format: FramebufferFormat,
    pub color_attachments: Vec<Handle<Image>>,
    pub depth_attachment: Option<Handle<Image>>,
}
