pub mod registry;

use anyhow::Result;
use glam::IVec2;
use karst_containers::Handle;
use karst_rhi::device::Device;
use karst_rhi::framebuffer::LoadOp;
use karst_rhi::image::ImageUsage;
use karst_rhi::ring_buffer::RingBuffer;
use karst_rhi::vk;
use karst_rhi::work::{Work, WorkPool};

pub use registry::{GraphDevice, ResourceRegistry, TextureDesc, TextureSize};

/// Everything a pass callback may touch: the device and the frame's transient
/// ring buffers.
pub struct PassApi<'a> {
    pub device: &'a mut Device,
    pub uniform_buffer: &'a mut RingBuffer,
    pub dynamic_vertex_buffer: &'a mut RingBuffer,
    pub dynamic_index_buffer: &'a mut RingBuffer,
    pub upload_buffer: &'a mut RingBuffer,
}

pub type PassCallback =
    Box<dyn FnOnce(&mut RenderGraph, &mut PassApi<'_>, &mut Work) -> Result<()>>;

enum Pass {
    Graphic {
        color_attachment: Handle<TextureDesc>,
        depth_attachment: Option<Handle<TextureDesc>>,
        execute: PassCallback,
    },
    Raw {
        execute: PassCallback,
    },
}

/// Single-frame render graph: an ordered pass list over logical textures.
///
/// Passes execute in submission order; there is no reordering. Graphic passes
/// get their attachments resolved, barriered and bound; raw passes record
/// whatever they want and own their barriers.
pub struct RenderGraph {
    pub resources: ResourceRegistry,
    passes: Vec<Pass>,
    pub i_frame: u64,
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            resources: ResourceRegistry::default(),
            passes: Vec::new(),
            i_frame: 0,
        }
    }

    /// Declare a logical texture for this frame. The handle dies with the
    /// frame.
    pub fn output(&mut self, desc: TextureDesc) -> Handle<TextureDesc> {
        self.resources.texture_descs.add(desc)
    }

    pub fn image_size(&self, desc_handle: Handle<TextureDesc>) -> IVec2 {
        self.resources.texture_desc_size(desc_handle)
    }

    pub fn graphic_pass(
        &mut self,
        color_attachment: Handle<TextureDesc>,
        depth_attachment: Option<Handle<TextureDesc>>,
        execute: impl FnOnce(&mut RenderGraph, &mut PassApi<'_>, &mut Work) -> Result<()> + 'static,
    ) {
        self.passes.push(Pass::Graphic {
            color_attachment,
            depth_attachment,
            execute: Box::new(execute),
        });
    }

    pub fn raw_pass(
        &mut self,
        execute: impl FnOnce(&mut RenderGraph, &mut PassApi<'_>, &mut Work) -> Result<()> + 'static,
    ) {
        self.passes.push(Pass::Raw {
            execute: Box::new(execute),
        });
    }

    /// Drop the frame's passes and descs without recording anything, the
    /// abandon path when the swapchain cannot be acquired.
    pub fn reset_frame(&mut self) {
        self.passes.clear();
        self.resources.end_frame();
    }

    /// Record the whole frame into one command buffer, in submission order.
    pub fn execute(&mut self, api: &mut PassApi<'_>, work_pool: &mut WorkPool) -> Result<Work> {
        self.resources.begin_frame(api.device, self.i_frame);

        let mut work = work_pool.acquire(&api.device.context)?;
        work.begin()?;
        work.bind_globals(api.device);

        let passes = std::mem::take(&mut self.passes);
        for pass in passes {
            match pass {
                Pass::Graphic {
                    color_attachment,
                    depth_attachment,
                    execute,
                } => {
                    let (color_image, color_reused) =
                        self.resources.resolve_image(api.device, color_attachment)?;
                    let output_size = self.resources.texture_desc_size(color_attachment);

                    let mut load_ops = vec![if color_reused {
                        LoadOp::load()
                    } else {
                        LoadOp::clear_black()
                    }];
                    let depth_image = match depth_attachment {
                        Some(depth_desc) => {
                            let (depth_image, depth_reused) =
                                self.resources.resolve_image(api.device, depth_desc)?;
                            load_ops.push(if depth_reused {
                                LoadOp::load()
                            } else {
                                LoadOp::clear_depth(0.0)
                            });
                            Some(depth_image)
                        }
                        None => None,
                    };

                    let framebuffer = self.resources.resolve_framebuffer(
                        api.device,
                        std::slice::from_ref(&color_attachment),
                        depth_attachment,
                    )?;

                    work.barrier(api.device, color_image, ImageUsage::ColorAttachment)?;
                    if let Some(depth_image) = depth_image {
                        work.barrier(api.device, depth_image, ImageUsage::DepthAttachment)?;
                    }

                    work.begin_pass(api.device, framebuffer, &load_ops)?;
                    work.set_viewport(vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: output_size.x as f32,
                        height: output_size.y as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    });
                    work.set_scissor(vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent: vk::Extent2D {
                            width: output_size.x as u32,
                            height: output_size.y as u32,
                        },
                    });

                    execute(self, api, &mut work)?;

                    work.end_pass();
                }
                Pass::Raw { execute } => {
                    execute(self, api, &mut work)?;
                }
            }
        }

        work.end()?;
        self.resources.end_frame();
        self.i_frame += 1;
        Ok(work)
    }
}
