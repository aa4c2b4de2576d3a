pub mod bindless;
pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod image;
pub mod program;
pub mod ring_buffer;
pub mod surface;
pub mod sync;
pub mod work;
pub mod wsi;

pub use error::RhiError;

/// How many frames the CPU may run ahead of the GPU. Ring-buffer reclamation
/// and deletion queues are sized from this.
pub const FRAME_QUEUE_LENGTH: usize = 2;

pub type Result<T, E = RhiError> = std::result::Result<T, E>;

// Re-exports
pub use ash;
pub use ash::vk;
pub use gpu_allocator;
pub use raw_window_handle;
