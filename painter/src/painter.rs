use glam::{IVec2, Vec2};

use crate::color::ColorU32;
use crate::font::{Font, ShapeContext};
use crate::glyph_cache::GlyphCache;
use crate::primitive::{
    ColorRect, PrimitiveIndex, RectType, SdfRect, TexturedRect, CORNERS_PER_RECT,
};
use crate::rect::Rect;

/// One frame of primitives, ready to be copied into GPU-visible memory.
#[derive(Debug, Default)]
pub struct FramePrimitives {
    pub vertices: Vec<u8>,
    pub indices: Vec<PrimitiveIndex>,
}

/// Writes packed primitive records into a byte buffer.
///
/// Records of different strides share the buffer: emission pads the write
/// offset up to the record's own stride, and the primitive index stores the
/// offset in stride units. The shader recovers the record through the
/// storage-buffer descriptor and the index.
fn push_record<T: bytemuck::Pod>(
    vertices: &mut Vec<u8>,
    indices: &mut Vec<PrimitiveIndex>,
    record: &T,
    rect_type: RectType,
) -> u32 {
    let stride = std::mem::size_of::<T>();
    let misalignment = vertices.len() % stride;
    if misalignment != 0 {
        vertices.resize(vertices.len() + stride - misalignment, 0);
    }
    let i_rect = (vertices.len() / stride) as u32;
    vertices.extend_from_slice(bytemuck::bytes_of(record));

    // 0 - 3
    // |   |
    // 1 - 2
    for corner in CORNERS_PER_RECT {
        indices.push(PrimitiveIndex::new(i_rect, corner, rect_type));
    }
    i_rect
}

pub struct Painter {
    pub glyph_cache: GlyphCache,
    pub shaper: ShapeContext,
    vertices: Vec<u8>,
    indices: Vec<PrimitiveIndex>,
    /// Bindless sampled index of the glyph atlas image.
    pub glyph_atlas_gpu_idx: u32,
}

impl Painter {
    pub fn new(glyph_cache_size: IVec2) -> Self {
        Self {
            glyph_cache: GlyphCache::new(glyph_cache_size),
            shaper: ShapeContext::default(),
            vertices: Vec::new(),
            indices: Vec::new(),
            glyph_atlas_gpu_idx: u32::MAX,
        }
    }

    /// Drop the current frame's primitives, keeping caches warm.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    /// Move the frame's primitives out for upload.
    pub fn take_frame(&mut self) -> FramePrimitives {
        FramePrimitives {
            vertices: std::mem::take(&mut self.vertices),
            indices: std::mem::take(&mut self.indices),
        }
    }

    pub fn vertex_bytes_offset(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_offset(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertices(&self) -> &[u8] {
        &self.vertices
    }

    pub fn indices(&self) -> &[PrimitiveIndex] {
        &self.indices
    }

    pub fn draw_color_rect(&mut self, rect: Rect, i_clip_rect: u32, color: ColorU32) {
        // Fully transparent rects would only cost blending.
        if color.is_transparent() {
            return;
        }
        push_record(
            &mut self.vertices,
            &mut self.indices,
            &ColorRect {
                rect,
                color: color.raw(),
                i_clip_rect,
                padding: [0; 2],
            },
            RectType::Color,
        );
    }

    pub fn draw_textured_rect(&mut self, rect: Rect, i_clip_rect: u32, uv: Rect, texture: u32) {
        push_record(
            &mut self.vertices,
            &mut self.indices,
            &TexturedRect {
                rect,
                uv,
                texture_descriptor: texture,
                i_clip_rect,
                padding: [0; 2],
            },
            RectType::Textured,
        );
    }

    pub fn draw_color_round_rect(
        &mut self,
        rect: Rect,
        i_clip_rect: u32,
        color: ColorU32,
        border_color: ColorU32,
        border_thickness: u32,
    ) {
        self.draw_sdf_rect(
            rect,
            i_clip_rect,
            color,
            border_color,
            border_thickness,
            RectType::SdfRoundRectangle,
        );
    }

    pub fn draw_color_circle(
        &mut self,
        rect: Rect,
        i_clip_rect: u32,
        color: ColorU32,
        border_color: ColorU32,
        border_thickness: u32,
    ) {
        self.draw_sdf_rect(
            rect,
            i_clip_rect,
            color,
            border_color,
            border_thickness,
            RectType::SdfCircle,
        );
    }

    fn draw_sdf_rect(
        &mut self,
        rect: Rect,
        i_clip_rect: u32,
        color: ColorU32,
        border_color: ColorU32,
        border_thickness: u32,
        rect_type: RectType,
    ) {
        if color.is_transparent() && border_color.is_transparent() {
            return;
        }
        push_record(
            &mut self.vertices,
            &mut self.indices,
            &SdfRect {
                rect,
                color: color.raw(),
                i_clip_rect,
                border_color: border_color.raw(),
                border_thickness,
            },
            rect_type,
        );
    }

    /// Emit a clip rectangle and return its index, in base rect strides, for
    /// subsequent primitives' `i_clip_rect` field.
    pub fn register_clip_rect(&mut self, clip_rect: Rect) -> u32 {
        self.draw_color_rect(clip_rect, u32::MAX, ColorU32::from_raw(0x88FF0000));

        // The rect was emitted as a color rect, retag its six indices.
        let index_count = self.indices.len();
        for index in &mut self.indices[index_count - 6..] {
            index.set_type(RectType::Clip);
        }

        let record_offset = self.vertices.len() - std::mem::size_of::<ColorRect>();
        debug_assert!(record_offset % std::mem::size_of::<Rect>() == 0);
        (record_offset / std::mem::size_of::<Rect>()) as u32
    }

    pub fn measure_label(&mut self, font: &Font, text: &str) -> IVec2 {
        let metrics = font.metrics();
        let run = self.shaper.get_run(font, text);
        let width: i32 = run.glyphs.iter().map(|glyph| glyph.x_advance).sum();
        IVec2::new(width, metrics.ascender - metrics.descender)
    }

    pub fn draw_label(&mut self, view_rect: Rect, i_clip_rect: u32, font: &mut Font, text: &str) {
        let metrics = font.metrics();
        let atlas_size = self.glyph_cache.atlas_size().as_vec2();

        let Painter {
            glyph_cache,
            shaper,
            vertices,
            indices,
            glyph_atlas_gpu_idx,
        } = self;
        let run = shaper.get_run(font, text);

        let mut cursor_x = view_rect.pos.x as i32;
        let mut cursor_y = view_rect.pos.y as i32 + metrics.ascender;
        for glyph in &run.glyphs {
            if let Some(entry) = glyph_cache.get_or_insert(font, glyph.glyph_index) {
                let rect = Rect {
                    pos: Vec2::new(
                        (cursor_x + glyph.x_offset + entry.top_left.x) as f32,
                        (cursor_y + glyph.y_offset - entry.top_left.y) as f32,
                    ),
                    size: entry.size.as_vec2(),
                };
                let uv = Rect {
                    pos: entry.atlas_pos.as_vec2() / atlas_size,
                    size: entry.size.as_vec2() / atlas_size,
                };
                push_record(
                    vertices,
                    indices,
                    &TexturedRect {
                        rect,
                        uv,
                        texture_descriptor: *glyph_atlas_gpu_idx,
                        i_clip_rect,
                        padding: [0; 2],
                    },
                    RectType::Textured,
                );
            }

            cursor_x += glyph.x_advance;
            cursor_y += glyph.y_advance;

            if text.as_bytes().get(glyph.cluster as usize) == Some(&b'\n') {
                cursor_x = view_rect.pos.x as i32;
                cursor_y += metrics.height;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::NO_CLIP_RECT;

    fn painter() -> Painter {
        Painter::new(IVec2::new(64, 64))
    }

    fn rect(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::new(Vec2::new(x, y), Vec2::new(w, h))
    }

    #[test]
    fn test_color_then_textured_offsets() {
        let mut painter = painter();

        painter.draw_color_rect(rect(0.0, 0.0, 10.0, 10.0), 0, ColorU32::from_raw(0xFF0000FF));
        assert_eq!(painter.vertex_bytes_offset(), 32);
        assert_eq!(painter.index_offset(), 6);

        painter.draw_textured_rect(
            rect(0.0, 0.0, 4.0, 4.0),
            0,
            rect(0.0, 0.0, 1.0, 1.0),
            7,
        );
        // 32 is padded up to the textured stride before the record lands.
        assert_eq!(painter.vertex_bytes_offset(), 96);
        assert_eq!(painter.index_offset(), 12);
    }

    #[test]
    fn test_index_count_is_six_per_rect() {
        let mut painter = painter();
        for i in 0..5 {
            painter.draw_color_rect(
                rect(i as f32, 0.0, 1.0, 1.0),
                NO_CLIP_RECT,
                ColorU32::from_greyscale(0x80),
            );
        }
        assert_eq!(painter.index_offset(), 30);
    }

    #[test]
    fn test_indices_reference_padded_records() {
        let mut painter = painter();
        painter.draw_color_rect(rect(0.0, 0.0, 1.0, 1.0), 0, ColorU32::from_greyscale(1));
        painter.draw_textured_rect(rect(0.0, 0.0, 1.0, 1.0), 0, rect(0.0, 0.0, 1.0, 1.0), 0);

        let indices = painter.indices();
        // Color rect record 0, textured rect record at 48 bytes = stride 1.
        assert_eq!(indices[0].index(), 0);
        assert_eq!(indices[0].type_bits(), RectType::Color as u32);
        assert_eq!(indices[6].index(), 1);
        assert_eq!(indices[6].type_bits(), RectType::Textured as u32);

        let record_offset = indices[6].index() as usize * std::mem::size_of::<TexturedRect>();
        assert_eq!(record_offset, 48);
    }

    #[test]
    fn test_triangle_corner_order() {
        let mut painter = painter();
        painter.draw_color_rect(rect(0.0, 0.0, 1.0, 1.0), 0, ColorU32::from_greyscale(1));
        let corners: Vec<u32> = painter.indices().iter().map(|i| i.corner()).collect();
        assert_eq!(corners, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn test_transparent_color_rect_is_dropped() {
        let mut painter = painter();
        painter.draw_color_rect(rect(0.0, 0.0, 10.0, 10.0), 0, ColorU32::from_raw(0x00FF00FF));
        assert_eq!(painter.vertex_bytes_offset(), 0);
        assert_eq!(painter.index_offset(), 0);
    }

    #[test]
    fn test_register_clip_rect_retags_indices() {
        let mut painter = painter();
        painter.draw_color_rect(rect(0.0, 0.0, 1.0, 1.0), 0, ColorU32::from_greyscale(1));
        let i_clip = painter.register_clip_rect(rect(0.0, 0.0, 100.0, 100.0));

        // Second color-rect record, counted in 16-byte base rect units.
        assert_eq!(i_clip, 2);
        let indices = painter.indices();
        for index in &indices[6..12] {
            assert_eq!(index.type_bits(), RectType::Clip as u32);
        }
    }

    #[test]
    fn test_sdf_rect_emission() {
        let mut painter = painter();
        painter.draw_color_round_rect(
            rect(0.0, 0.0, 20.0, 20.0),
            NO_CLIP_RECT,
            ColorU32::from_greyscale(0x40),
            ColorU32::from_greyscale(0xFF),
            2,
        );
        painter.draw_color_circle(
            rect(0.0, 0.0, 20.0, 20.0),
            NO_CLIP_RECT,
            ColorU32::from_greyscale(0x40),
            ColorU32::from_greyscale(0xFF),
            2,
        );
        assert_eq!(painter.vertex_bytes_offset(), 64);
        let indices = painter.indices();
        assert_eq!(indices[0].type_bits(), RectType::SdfRoundRectangle as u32);
        assert_eq!(indices[6].type_bits(), RectType::SdfCircle as u32);
        // Both records share the 32-byte stride, so they are records 0 and 1.
        assert_eq!(indices[6].index(), 1);
    }

    #[test]
    fn test_take_frame_resets_offsets() {
        let mut painter = painter();
        painter.draw_color_rect(rect(0.0, 0.0, 1.0, 1.0), 0, ColorU32::from_greyscale(1));
        let frame = painter.take_frame();
        assert_eq!(frame.vertices.len(), 32);
        assert_eq!(frame.indices.len(), 6);
        assert_eq!(painter.vertex_bytes_offset(), 0);
        assert_eq!(painter.index_offset(), 0);
    }
}
