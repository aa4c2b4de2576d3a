/// Color packed as `0xAABBGGRR`, the layout the rect shaders consume.
#[repr(transparent)]
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct ColorU32(pub u32);

impl ColorU32 {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn from_uints(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self((a as u32) << 24 | (b as u32) << 16 | (g as u32) << 8 | r as u32)
    }

    pub fn from_floats(r: f32, g: f32, b: f32, a: f32) -> Self {
        let quantize = |value: f32| (value.clamp(0.0, 1.0) * 255.0) as u8;
        Self::from_uints(quantize(r), quantize(g), quantize(b), quantize(a))
    }

    pub fn from_greyscale(value: u8) -> Self {
        Self::from_uints(value, value, value, 0xFF)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn alpha(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_is_abgr() {
        let color = ColorU32::from_uints(0x11, 0x22, 0x33, 0x44);
        assert_eq!(color.raw(), 0x44332211);
    }

    #[test]
    fn test_greyscale_is_opaque() {
        let color = ColorU32::from_greyscale(0x2A);
        assert_eq!(color.raw(), 0xFF2A2A2A);
        assert!(!color.is_transparent());
    }

    #[test]
    fn test_floats_quantize() {
        let color = ColorU32::from_floats(1.0, 0.0, 0.0, 1.0);
        assert_eq!(color.raw(), 0xFF0000FF);
        assert!(ColorU32::from_floats(0.5, 0.5, 0.5, 0.0).is_transparent());
    }
}
