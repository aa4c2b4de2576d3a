pub mod color;
pub mod font;
pub mod glyph_cache;
pub mod painter;
pub mod primitive;
pub mod rect;
pub mod shelf;

pub use color::ColorU32;
pub use font::{Font, FontMetrics, ShapeContext, ShapedGlyph, ShapedRun};
pub use glyph_cache::{GlyphCache, GlyphEvent, GlyphImage, GlyphKey, GlyphRasterizer};
pub use font::FontLibrary;
pub use painter::{FramePrimitives, Painter};
pub use primitive::{ColorRect, PrimitiveIndex, RectType, SdfRect, TexturedRect, NO_CLIP_RECT};
pub use rect::{Rect, RectSplit, SplitDirection};
pub use shelf::{ShelfAllocation, ShelfAllocator};
