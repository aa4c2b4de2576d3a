use crate::rect::Rect;

/// Primitive tags stored in the 6 high bits of a [`PrimitiveIndex`]. Bit 5 set
/// means the fragment shader evaluates a signed-distance field.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RectType {
    Color = 0,
    Textured = 1,
    Clip = 2,
    SdfRoundRectangle = 0b100000,
    SdfCircle = 0b100001,
}

/// 32-bit packed index: `{index: 24, corner: 2, type: 6}`.
///
/// Corner numbering: 0 = top-left, 1 = bottom-left, 2 = bottom-right,
/// 3 = top-right. A rect expands to two triangles `(0,1,2)(2,3,0)`.
#[repr(transparent)]
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct PrimitiveIndex(u32);

impl PrimitiveIndex {
    pub fn new(index: u32, corner: u32, rect_type: RectType) -> Self {
        debug_assert!(index < (1 << 24));
        debug_assert!(corner < 4);
        Self(index & 0x00FF_FFFF | (corner & 0b11) << 24 | (rect_type as u32) << 26)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn corner(&self) -> u32 {
        (self.0 >> 24) & 0b11
    }

    pub fn type_bits(&self) -> u32 {
        self.0 >> 26
    }

    /// Rewrite the type bits in place, keeping index and corner.
    pub fn set_type(&mut self, rect_type: RectType) {
        self.0 = self.0 & 0x03FF_FFFF | (rect_type as u32) << 26;
    }
}

pub const CORNERS_PER_RECT: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// No clip rect: primitives with this index are never clipped.
pub const NO_CLIP_RECT: u32 = u32::MAX;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorRect {
    pub rect: Rect,
    pub color: u32,
    pub i_clip_rect: u32,
    pub padding: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SdfRect {
    pub rect: Rect,
    pub color: u32,
    pub i_clip_rect: u32,
    pub border_color: u32,
    pub border_thickness: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TexturedRect {
    pub rect: Rect,
    pub uv: Rect,
    pub texture_descriptor: u32,
    pub i_clip_rect: u32,
    pub padding: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_strides() {
        assert_eq!(std::mem::size_of::<ColorRect>(), 32);
        assert_eq!(std::mem::size_of::<SdfRect>(), 32);
        assert_eq!(std::mem::size_of::<TexturedRect>(), 48);
        assert_eq!(std::mem::size_of::<PrimitiveIndex>(), 4);
    }

    #[test]
    fn test_index_packing() {
        let index = PrimitiveIndex::new(0x123456, 3, RectType::Textured);
        assert_eq!(index.index(), 0x123456);
        assert_eq!(index.corner(), 3);
        assert_eq!(index.type_bits(), RectType::Textured as u32);
        assert_eq!(index.raw(), 0x123456 | 3 << 24 | 1 << 26);
    }

    #[test]
    fn test_sdf_types_have_bit_five() {
        assert_ne!(RectType::SdfRoundRectangle as u32 & 32, 0);
        assert_ne!(RectType::SdfCircle as u32 & 32, 0);
        assert_eq!(RectType::Color as u32 & 32, 0);
        assert_eq!(RectType::Clip as u32 & 32, 0);
    }

    #[test]
    fn test_set_type_keeps_index_and_corner() {
        let mut index = PrimitiveIndex::new(42, 2, RectType::Color);
        index.set_type(RectType::Clip);
        assert_eq!(index.index(), 42);
        assert_eq!(index.corner(), 2);
        assert_eq!(index.type_bits(), RectType::Clip as u32);
    }
}
