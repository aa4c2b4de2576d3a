use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use freetype as ft;
use glam::IVec2;
use harfbuzz_rs as hb;

use crate::glyph_cache::{GlyphImage, GlyphRasterizer};

/// Font metrics in pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FontMetrics {
    pub height: i32,
    pub ascender: i32,
    pub descender: i32,
}

/// Owns the freetype library and hands out font ids.
pub struct FontLibrary {
    library: ft::Library,
    next_font_id: u32,
}

impl FontLibrary {
    pub fn new() -> Result<Self> {
        let library = ft::Library::init().context("failed to initialize freetype")?;
        Ok(Self {
            library,
            next_font_id: 0,
        })
    }

    pub fn load_font(&mut self, path: &Path, size_pt: u32, face_index: u32) -> Result<Font> {
        let ft_face = self
            .library
            .new_face(path, face_index as isize)
            .with_context(|| format!("failed to load font face from {}", path.display()))?;
        ft_face
            .set_char_size(0, size_pt as isize * 64, 0, 96)
            .context("failed to set font char size")?;

        let hb_face = hb::Face::from_file(path, face_index)
            .with_context(|| format!("failed to load font face from {}", path.display()))?;
        let mut hb_font = hb::Font::new(hb_face);
        // 26.6 positions, shifted down to pixels after shaping.
        let scale = (size_pt * 64) as i32;
        hb_font.set_scale(scale, scale);

        let metrics = match ft_face.size_metrics() {
            Some(size_metrics) => FontMetrics {
                height: (size_metrics.height >> 6) as i32,
                ascender: (size_metrics.ascender >> 6) as i32,
                descender: (size_metrics.descender >> 6) as i32,
            },
            None => FontMetrics::default(),
        };

        let id = self.next_font_id;
        self.next_font_id += 1;

        Ok(Font {
            id,
            ft_face,
            hb_font,
            metrics,
        })
    }
}

pub struct Font {
    id: u32,
    ft_face: ft::Face,
    hb_font: hb::Owned<hb::Font<'static>>,
    metrics: FontMetrics,
}

/// One shaped glyph, offsets and advances in pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub glyph_index: u32,
    /// Byte offset of the source character in the run.
    pub cluster: u32,
    pub x_advance: i32,
    pub y_advance: i32,
    pub x_offset: i32,
    pub y_offset: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
}

impl Font {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    pub fn shape(&self, text: &str) -> ShapedRun {
        let buffer = hb::UnicodeBuffer::new()
            .add_str(text)
            .set_direction(hb::Direction::Ltr)
            .set_script(hb::Tag::new('L', 'a', 't', 'n'));
        let output = hb::shape(&self.hb_font, buffer, &[]);

        let infos = output.get_glyph_infos();
        let positions = output.get_glyph_positions();
        let glyphs = infos
            .iter()
            .zip(positions)
            .map(|(info, position)| ShapedGlyph {
                glyph_index: info.codepoint,
                cluster: info.cluster,
                x_advance: position.x_advance >> 6,
                y_advance: position.y_advance >> 6,
                x_offset: position.x_offset >> 6,
                y_offset: position.y_offset >> 6,
            })
            .collect();
        ShapedRun { glyphs }
    }
}

impl GlyphRasterizer for Font {
    fn font_id(&self) -> u32 {
        self.id
    }

    fn rasterize(&mut self, glyph_index: u32) -> Option<GlyphImage> {
        self.ft_face
            .load_glyph(glyph_index, ft::face::LoadFlag::DEFAULT)
            .ok()?;
        let slot = self.ft_face.glyph();
        slot.render_glyph(ft::render_mode::RenderMode::Normal).ok()?;

        let bitmap = slot.bitmap();
        let width = bitmap.width();
        let rows = bitmap.rows();
        if width <= 0 || rows <= 0 {
            return None;
        }

        // Repack rows, the freetype pitch can be wider than the bitmap.
        let pitch = bitmap.pitch() as usize;
        let source = bitmap.buffer();
        let mut data = Vec::with_capacity((width * rows) as usize);
        for row in 0..rows as usize {
            let start = row * pitch;
            data.extend_from_slice(&source[start..start + width as usize]);
        }

        Some(GlyphImage {
            data,
            size: IVec2::new(width, rows),
            top_left: IVec2::new(slot.bitmap_left(), slot.bitmap_top()),
        })
    }
}

/// Caches shaped runs so repeated labels skip the shaper.
#[derive(Default)]
pub struct ShapeContext {
    runs: HashMap<(u32, String), ShapedRun>,
}

impl ShapeContext {
    pub fn get_run(&mut self, font: &Font, text: &str) -> &ShapedRun {
        let key = (font.id(), text.to_owned());
        self.runs.entry(key).or_insert_with(|| font.shape(text))
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }
}
