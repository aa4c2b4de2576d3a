pub mod graph;
pub mod simple_renderer;
pub mod ui_pass;

pub use graph::{PassApi, RenderGraph, ResourceRegistry, TextureDesc, TextureSize};
pub use simple_renderer::{RendererOptions, SimpleRenderer};
pub use ui_pass::UiRenderer;

pub use karst_rhi::FRAME_QUEUE_LENGTH;
