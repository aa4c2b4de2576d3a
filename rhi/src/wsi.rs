use glam::UVec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Window seam: the rhi never owns a window, it only needs raw handles and a
/// framebuffer size to build a surface.
pub trait RhiWindow: HasDisplayHandle + HasWindowHandle {
    fn size(&self) -> UVec2;
}

#[cfg(feature = "winit")]
impl RhiWindow for winit::window::Window {
    fn size(&self) -> UVec2 {
        let size = self.inner_size();
        UVec2::new(size.width, size.height)
    }
}
