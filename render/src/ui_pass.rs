use std::path::Path;

use anyhow::Result;
use glam::IVec2;
use karst_containers::Handle;
use karst_painter::{GlyphEvent, Painter, PrimitiveIndex, TexturedRect};
use karst_rhi::buffer::BufferUsage;
use karst_rhi::device::Device;
use karst_rhi::framebuffer::AttachmentsFormat;
use karst_rhi::image::{sampled_image_usage, Image, ImageDescription, ImageUsage};
use karst_rhi::program::{GraphicsProgram, GraphicsState, RenderState};
use karst_rhi::vk;
use karst_rhi::work::DrawIndexedOptions;

use crate::graph::{RenderGraph, TextureDesc};

/// Per-draw options block for the UI shader, bump-allocated from the uniform
/// ring buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PainterOptions {
    scale: [f32; 2],
    translation: [f32; 2],
    vertices_descriptor_index: u32,
    primitive_byte_offset: u32,
}

/// Draws the painter's primitives: one raw pass staging fresh glyphs into the
/// atlas, one graphic pass with a single bindless indexed draw.
pub struct UiRenderer {
    pub program: Handle<GraphicsProgram>,
    pub pipeline_index: usize,
    pub glyph_atlas: Handle<Image>,
}

impl UiRenderer {
    pub fn new(
        device: &mut Device,
        shader_dir: &Path,
        atlas_resolution: IVec2,
    ) -> Result<Self> {
        let vertex_shader = device.create_shader(&shader_dir.join("ui.vert.spv"))?;
        let fragment_shader = device.create_shader(&shader_dir.join("ui.frag.spv"))?;
        let program = device.create_program(
            "ui",
            GraphicsState {
                vertex_shader,
                fragment_shader,
                attachments_format: AttachmentsFormat {
                    attachment_formats: vec![vk::Format::R8G8B8A8_UNORM],
                    depth_format: None,
                },
            },
        )?;
        let pipeline_index = device.compile_graphics_state(
            program,
            RenderState {
                alpha_blending: true,
                ..Default::default()
            },
        )?;

        let glyph_atlas = device.create_image(ImageDescription {
            name: String::from("Glyph atlas"),
            size: atlas_resolution.extend(1),
            format: vk::Format::R8_UNORM,
            usages: sampled_image_usage(),
            ..Default::default()
        })?;
        device.update_globals();

        Ok(Self {
            program,
            pipeline_index,
            glyph_atlas,
        })
    }

    /// Register the glyph upload and UI draw passes for this frame, taking
    /// the painter's primitive buffers.
    pub fn register_graph(
        &self,
        graph: &mut RenderGraph,
        painter: &mut Painter,
        output: Handle<TextureDesc>,
    ) {
        // Upload freshly rasterized glyphs through the staging ring, and get
        // the atlas and the dynamic rings into their read states for the
        // draw that follows.
        let events = painter.glyph_cache.drain_events();
        let glyph_atlas = self.glyph_atlas;
        graph.raw_pass(move |_graph, api, work| {
            work.begin_debug_label("Glyph upload");
            let mut copies = Vec::with_capacity(events.len());
            for event in &events {
                let GlyphEvent::New { pos, image, .. } = event;
                let Some((staging, offset)) = api.upload_buffer.allocate(image.data.len(), 256)
                else {
                    continue;
                };
                staging.copy_from_slice(&image.data);
                copies.push(
                    vk::BufferImageCopy::default()
                        .buffer_offset(offset as u64)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_offset(vk::Offset3D {
                            x: pos.x,
                            y: pos.y,
                            z: 0,
                        })
                        .image_extent(vk::Extent3D {
                            width: image.size.x as u32,
                            height: image.size.y as u32,
                            depth: 1,
                        }),
                );
            }
            if !copies.is_empty() {
                work.buffer_barrier(api.device, api.upload_buffer.buffer, BufferUsage::TransferSrc)?;
                work.barrier(api.device, glyph_atlas, ImageUsage::TransferDst)?;
                work.copy_buffer_to_image(
                    api.device,
                    api.upload_buffer.buffer,
                    glyph_atlas,
                    &copies,
                )?;
            }
            work.barrier(api.device, glyph_atlas, ImageUsage::GraphicsShaderRead)?;
            work.end_debug_label();

            // Barriers are not allowed inside the render pass, so the rings
            // transition here.
            work.barriers(
                api.device,
                &[],
                &[
                    (
                        api.dynamic_vertex_buffer.buffer,
                        BufferUsage::GraphicsShaderRead,
                    ),
                    (api.dynamic_index_buffer.buffer, BufferUsage::IndexBuffer),
                ],
            )?;
            Ok(())
        });

        // Draw every primitive with a single indexed draw, vertices pulled
        // from the bindless storage array.
        let frame = painter.take_frame();
        let program = self.program;
        let pipeline_index = self.pipeline_index;
        graph.graphic_pass(output, None, move |graph, api, work| {
            if frame.indices.is_empty() {
                return Ok(());
            }

            // The offset has to be a multiple of every record stride so the
            // shader's per-stride indexing stays valid.
            let vertex_align = lcm(
                std::mem::size_of::<TexturedRect>(),
                std::mem::size_of::<karst_painter::ColorRect>(),
            );
            let Some((vertex_slice, vertex_offset)) = api
                .dynamic_vertex_buffer
                .allocate(frame.vertices.len(), vertex_align)
            else {
                return Ok(());
            };
            vertex_slice.copy_from_slice(&frame.vertices);

            let index_bytes: &[u8] = bytemuck::cast_slice(&frame.indices);
            let Some((index_slice, index_offset)) = api
                .dynamic_index_buffer
                .allocate(index_bytes.len(), std::mem::size_of::<PrimitiveIndex>())
            else {
                return Ok(());
            };
            index_slice.copy_from_slice(index_bytes);

            let output_size = graph.image_size(output);
            let options = PainterOptions {
                scale: [2.0 / output_size.x as f32, 2.0 / output_size.y as f32],
                translation: [-1.0, -1.0],
                vertices_descriptor_index: api
                    .device
                    .get_buffer_storage_index(api.dynamic_vertex_buffer.buffer),
                primitive_byte_offset: vertex_offset,
            };
            let Some((options_slice, options_offset)) = api.uniform_buffer.allocate(
                std::mem::size_of::<PainterOptions>(),
                karst_rhi::device::OPTIONS_BLOCK_SIZE as usize,
            ) else {
                return Ok(());
            };
            options_slice.copy_from_slice(bytemuck::bytes_of(&options));

            work.begin_debug_label("UI");
            work.bind_uniform_offset(api.device, options_offset);
            work.bind_graphics_pipeline(api.device, program, pipeline_index)?;
            work.bind_index_buffer(
                api.device,
                api.dynamic_index_buffer.buffer,
                vk::IndexType::UINT32,
                index_offset as u64,
            )?;
            work.draw_indexed(DrawIndexedOptions {
                vertex_count: frame.indices.len() as u32,
                ..Default::default()
            });
            work.end_debug_label();
            Ok(())
        });
    }
}

fn lcm(a: usize, b: usize) -> usize {
    fn gcd(mut a: usize, mut b: usize) -> usize {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_alignment_covers_both_strides() {
        let align = lcm(
            std::mem::size_of::<TexturedRect>(),
            std::mem::size_of::<karst_painter::ColorRect>(),
        );
        assert_eq!(align % std::mem::size_of::<TexturedRect>(), 0);
        assert_eq!(align % std::mem::size_of::<karst_painter::ColorRect>(), 0);
        assert_eq!(align, 96);
    }

    #[test]
    fn test_painter_options_layout() {
        assert_eq!(std::mem::size_of::<PainterOptions>(), 24);
    }
}
