use std::collections::HashMap;

use glam::IVec2;
use tracing::warn;

use crate::shelf::ShelfAllocator;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GlyphKey {
    pub font_id: u32,
    pub glyph_index: u32,
}

/// Rasterized glyph bitmap, one byte per pixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlyphImage {
    pub data: Vec<u8>,
    pub size: IVec2,
    /// Bearing from the pen position to the bitmap's top-left corner.
    pub top_left: IVec2,
}

/// Source of glyph bitmaps, implemented by [`Font`](crate::Font).
pub trait GlyphRasterizer {
    fn font_id(&self) -> u32;
    /// `None` for glyphs without an outline (spaces, control characters).
    fn rasterize(&mut self, glyph_index: u32) -> Option<GlyphImage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphEntry {
    pub atlas_pos: IVec2,
    pub size: IVec2,
    pub top_left: IVec2,
    pub uploaded: bool,
}

#[derive(Debug)]
pub enum GlyphEvent {
    New {
        key: GlyphKey,
        pos: IVec2,
        image: GlyphImage,
    },
}

/// Shelf-packed font atlas.
///
/// Entries are keyed by `(font_id, glyph_index)` and live until the atlas is
/// explicitly evicted, which the painter never does: a full atlas makes new
/// glyphs invisible for the frame instead.
pub struct GlyphCache {
    atlas: ShelfAllocator,
    entries: HashMap<GlyphKey, GlyphEntry>,
    events: Vec<GlyphEvent>,
}

impl GlyphCache {
    pub fn new(atlas_size: IVec2) -> Self {
        Self {
            atlas: ShelfAllocator::new(atlas_size),
            entries: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn atlas_size(&self) -> IVec2 {
        self.atlas.size()
    }

    /// Resolve a glyph, rasterizing and packing it on first sight.
    ///
    /// Returns `None` when the glyph has no bitmap or the atlas is full.
    pub fn get_or_insert(
        &mut self,
        font: &mut dyn GlyphRasterizer,
        glyph_index: u32,
    ) -> Option<&GlyphEntry> {
        let key = GlyphKey {
            font_id: font.font_id(),
            glyph_index,
        };

        if !self.entries.contains_key(&key) {
            let image = font.rasterize(glyph_index)?;
            if image.size.x == 0 || image.size.y == 0 {
                return None;
            }
            let Some(alloc_id) = self.atlas.alloc(image.size) else {
                warn!(
                    font_id = key.font_id,
                    glyph_index, "glyph atlas is full, glyph will not be drawn this frame"
                );
                return None;
            };
            let pos = self.atlas.get(alloc_id).pos;
            self.entries.insert(
                key,
                GlyphEntry {
                    atlas_pos: pos,
                    size: image.size,
                    top_left: image.top_left,
                    uploaded: false,
                },
            );
            self.events.push(GlyphEvent::New { key, pos, image });
        }

        self.entries.get(&key)
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Take the pending upload events, marking their entries uploaded.
    ///
    /// The caller records the copies; a glyph whose staging upload is skipped
    /// stays blank until the entry is touched again.
    pub fn drain_events(&mut self) -> Vec<GlyphEvent> {
        for event in &self.events {
            let GlyphEvent::New { key, .. } = event;
            if let Some(entry) = self.entries.get_mut(key) {
                entry.uploaded = true;
            }
        }
        std::mem::take(&mut self.events)
    }

    pub fn entry(&self, key: &GlyphKey) -> Option<&GlyphEntry> {
        self.entries.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFont {
        id: u32,
        rasterized: Vec<u32>,
    }

    impl FakeFont {
        fn new(id: u32) -> Self {
            Self {
                id,
                rasterized: Vec::new(),
            }
        }
    }

    impl GlyphRasterizer for FakeFont {
        fn font_id(&self) -> u32 {
            self.id
        }

        fn rasterize(&mut self, glyph_index: u32) -> Option<GlyphImage> {
            self.rasterized.push(glyph_index);
            if glyph_index == 0 {
                // Treat glyph 0 as a space.
                return None;
            }
            let size = IVec2::new(8, 10);
            Some(GlyphImage {
                data: vec![0xFF; (size.x * size.y) as usize],
                size,
                top_left: IVec2::new(1, 9),
            })
        }
    }

    #[test]
    fn test_first_lookup_rasterizes_and_queues_event() {
        let mut cache = GlyphCache::new(IVec2::new(64, 64));
        let mut font = FakeFont::new(1);

        let entry = cache.get_or_insert(&mut font, 42).unwrap().clone();
        assert!(!entry.uploaded);
        assert_eq!(entry.size, IVec2::new(8, 10));
        assert_eq!(entry.top_left, IVec2::new(1, 9));
        assert!(cache.has_events());
    }

    #[test]
    fn test_second_lookup_hits_cache() {
        let mut cache = GlyphCache::new(IVec2::new(64, 64));
        let mut font = FakeFont::new(1);

        let _ = cache.get_or_insert(&mut font, 42);
        let _ = cache.get_or_insert(&mut font, 42);
        assert_eq!(font.rasterized, vec![42]);
        assert_eq!(cache.drain_events().len(), 1);
    }

    #[test]
    fn test_drain_marks_uploaded() {
        let mut cache = GlyphCache::new(IVec2::new(64, 64));
        let mut font = FakeFont::new(1);

        let _ = cache.get_or_insert(&mut font, 42);
        let events = cache.drain_events();
        assert_eq!(events.len(), 1);
        assert!(!cache.has_events());

        let entry = cache.get_or_insert(&mut font, 42).unwrap();
        assert!(entry.uploaded);
    }

    #[test]
    fn test_fonts_do_not_alias() {
        let mut cache = GlyphCache::new(IVec2::new(64, 64));
        let mut font_a = FakeFont::new(1);
        let mut font_b = FakeFont::new(2);

        let a = cache.get_or_insert(&mut font_a, 7).unwrap().atlas_pos;
        let b = cache.get_or_insert(&mut font_b, 7).unwrap().atlas_pos;
        assert_ne!(a, b);
        assert_eq!(font_a.rasterized, vec![7]);
        assert_eq!(font_b.rasterized, vec![7]);
    }

    #[test]
    fn test_glyph_without_bitmap_is_skipped() {
        let mut cache = GlyphCache::new(IVec2::new(64, 64));
        let mut font = FakeFont::new(1);

        assert!(cache.get_or_insert(&mut font, 0).is_none());
        assert!(!cache.has_events());
    }

    #[test]
    fn test_full_atlas_drops_glyph() {
        let mut cache = GlyphCache::new(IVec2::new(8, 10));
        let mut font = FakeFont::new(1);

        assert!(cache.get_or_insert(&mut font, 1).is_some());
        assert!(cache.get_or_insert(&mut font, 2).is_none());
        // The first glyph is still resolvable.
        assert!(cache.get_or_insert(&mut font, 1).is_some());
    }
}
