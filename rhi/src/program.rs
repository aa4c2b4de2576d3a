use std::path::PathBuf;

use ash::vk;
use karst_containers::Handle;

use crate::framebuffer::AttachmentsFormat;

/// Opaque SPIR-V bytecode and its Vulkan module.
#[derive(Debug)]
pub struct Shader {
    pub path: PathBuf,
    pub bytecode: Vec<u32>,
    pub vkhandle: vk::ShaderModule,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct RasterizationState {
    pub culling: bool,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: Option<vk::CompareOp>,
    pub enable_write: bool,
}

/// One compiled pipeline variant of a program is keyed by this state.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub rasterization: RasterizationState,
    pub depth: DepthState,
    pub alpha_blending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsState {
    pub vertex_shader: Handle<Shader>,
    pub fragment_shader: Handle<Shader>,
    pub attachments_format: AttachmentsFormat,
}

/// A graphics program owns one pipeline per compiled [`RenderState`].
#[derive(Debug)]
pub struct GraphicsProgram {
    pub name: String,
    pub graphics_state: GraphicsState,
    pub render_states: Vec<RenderState>,
    pub pipelines: Vec<vk::Pipeline>,
}

#[derive(Debug, Clone, Default)]
pub struct ComputeState {
    pub shader: Handle<Shader>,
}

#[derive(Debug)]
pub struct ComputeProgram {
    pub name: String,
    pub state: ComputeState,
    pub pipeline: vk::Pipeline,
}

/// Push constants shared by every program.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PushConstants {
    pub draw_id: u32,
    pub gui_texture_id: u32,
}

impl Default for PushConstants {
    fn default() -> Self {
        Self {
            draw_id: u32::MAX,
            gui_texture_id: u32::MAX,
        }
    }
}
