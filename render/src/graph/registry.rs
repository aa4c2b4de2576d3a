use std::collections::HashMap;

use anyhow::Result;
use glam::{IVec2, IVec3, Vec2};
use karst_containers::{Handle, Pool};
use karst_rhi::device::Device;
use karst_rhi::framebuffer::Framebuffer;
use karst_rhi::image::{
    color_attachment_usage, depth_attachment_usage, is_depth_format, Image, ImageDescription,
};
use karst_rhi::vk;
use tracing::trace;

/// Logical texture size: either absolute pixels or a fraction of the screen.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TextureSize {
    Absolute(IVec3),
    ScreenRelative(Vec2),
}

/// Per-frame request for an image. Resolved to a concrete image handle by the
/// registry, possibly reusing an image from an earlier frame.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub name: String,
    pub size: TextureSize,
    pub format: vk::Format,
    pub image_type: vk::ImageType,
    pub resolved_image: Option<Handle<Image>>,
}

impl TextureDesc {
    pub fn new(name: &str, size: TextureSize, format: vk::Format) -> Self {
        Self {
            name: name.to_owned(),
            size,
            format,
            image_type: vk::ImageType::TYPE_2D,
            resolved_image: None,
        }
    }
}

/// The device surface the registry needs: image and framebuffer ownership.
/// Keeps the reuse and eviction policies testable away from Vulkan.
pub trait GraphDevice {
    fn create_image(&mut self, desc: ImageDescription) -> Result<Handle<Image>>;
    fn destroy_image(&mut self, image_handle: Handle<Image>);
    fn unbind_image(&mut self, image_handle: Handle<Image>);
    fn image_description(&self, image_handle: Handle<Image>) -> Option<&ImageDescription>;
    fn create_framebuffer(
        &mut self,
        size: IVec3,
        color_attachments: &[Handle<Image>],
        depth_attachment: Option<Handle<Image>>,
    ) -> Result<Handle<Framebuffer>>;
    fn destroy_framebuffer(&mut self, framebuffer_handle: Handle<Framebuffer>);
    fn framebuffer_matches(
        &self,
        framebuffer_handle: Handle<Framebuffer>,
        color_attachments: &[Handle<Image>],
        depth_attachment: Option<Handle<Image>>,
        size: IVec3,
    ) -> bool;
    fn update_globals(&mut self);
}

impl GraphDevice for Device {
    fn create_image(&mut self, desc: ImageDescription) -> Result<Handle<Image>> {
        Ok(Device::create_image(self, desc)?)
    }

    fn destroy_image(&mut self, image_handle: Handle<Image>) {
        Device::destroy_image(self, image_handle);
    }

    fn unbind_image(&mut self, image_handle: Handle<Image>) {
        Device::unbind_image(self, image_handle);
    }

    fn image_description(&self, image_handle: Handle<Image>) -> Option<&ImageDescription> {
        self.images.get(image_handle).ok().map(|image| &image.desc)
    }

    fn create_framebuffer(
        &mut self,
        size: IVec3,
        color_attachments: &[Handle<Image>],
        depth_attachment: Option<Handle<Image>>,
    ) -> Result<Handle<Framebuffer>> {
        Ok(Device::create_framebuffer(
            self,
            size,
            color_attachments,
            depth_attachment,
        )?)
    }

    fn destroy_framebuffer(&mut self, framebuffer_handle: Handle<Framebuffer>) {
        Device::destroy_framebuffer(self, framebuffer_handle);
    }

    fn framebuffer_matches(
        &self,
        framebuffer_handle: Handle<Framebuffer>,
        color_attachments: &[Handle<Image>],
        depth_attachment: Option<Handle<Image>>,
        size: IVec3,
    ) -> bool {
        let Ok(framebuffer) = self.framebuffers.get(framebuffer_handle) else {
            return false;
        };
        framebuffer.color_attachments == color_attachments
            && framebuffer.depth_attachment == depth_attachment
            && framebuffer.format.size == size
    }

    fn update_globals(&mut self) {
        Device::update_globals(self);
    }
}

#[derive(Debug, Clone)]
struct ImageMetadata {
    resolved_desc: Option<Handle<TextureDesc>>,
    last_frame_used: u64,
}

#[derive(Debug, Clone)]
struct FramebufferMetadata {
    last_frame_used: u64,
}

/// Images unused for this many frames lose their bindless slots; one frame
/// later they are destroyed.
const IMAGE_UNBIND_WINDOW: u64 = 18;
const IMAGE_DESTROY_WINDOW: u64 = 19;
const FRAMEBUFFER_DESTROY_WINDOW: u64 = 3;

/// Resolves texture descs to physical images and caches framebuffers, with
/// idle-window eviction so attachments are recycled across frames without a
/// garbage-collection pass.
pub struct ResourceRegistry {
    pub texture_descs: Pool<TextureDesc>,
    image_metadata: HashMap<Handle<Image>, ImageMetadata>,
    framebuffer_metadata: HashMap<Handle<Framebuffer>, FramebufferMetadata>,
    framebuffers: Vec<Handle<Framebuffer>>,
    pub screen_size: IVec2,
    i_frame: u64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self {
            texture_descs: Pool::default(),
            image_metadata: HashMap::new(),
            framebuffer_metadata: HashMap::new(),
            framebuffers: Vec::new(),
            screen_size: IVec2::new(1, 1),
            i_frame: 0,
        }
    }
}

impl ResourceRegistry {
    /// Run the eviction policy for the new frame.
    pub fn begin_frame(&mut self, device: &mut impl GraphDevice, i_frame: u64) {
        self.i_frame = i_frame;

        let mut images_to_remove = Vec::new();
        for (image_handle, metadata) in &self.image_metadata {
            if metadata.last_frame_used + IMAGE_UNBIND_WINDOW < self.i_frame {
                device.unbind_image(*image_handle);
            }
            if metadata.last_frame_used + IMAGE_DESTROY_WINDOW < self.i_frame {
                images_to_remove.push(*image_handle);
            }
        }

        let mut framebuffers_to_remove = Vec::new();
        for (framebuffer_handle, metadata) in &self.framebuffer_metadata {
            if metadata.last_frame_used + FRAMEBUFFER_DESTROY_WINDOW < self.i_frame {
                framebuffers_to_remove.push(*framebuffer_handle);
            }
        }

        for framebuffer_handle in framebuffers_to_remove {
            trace!("graph: evicting framebuffer {framebuffer_handle:?}");
            device.destroy_framebuffer(framebuffer_handle);
            self.framebuffer_metadata.remove(&framebuffer_handle);
            self.framebuffers
                .retain(|handle| *handle != framebuffer_handle);
        }

        for image_handle in images_to_remove {
            trace!("graph: evicting image {image_handle:?}");
            device.destroy_image(image_handle);
            self.image_metadata.remove(&image_handle);
        }
    }

    /// Texture descs only live for one frame; images are released back to the
    /// reuse pool by invalidating their resolved desc.
    pub fn end_frame(&mut self) {
        self.texture_descs.clear();
        for metadata in self.image_metadata.values_mut() {
            metadata.resolved_desc = None;
        }
    }

    fn touch_image(&mut self, image_handle: Handle<Image>, desc_handle: Handle<TextureDesc>) {
        let i_frame = self.i_frame;
        self.image_metadata
            .entry(image_handle)
            .and_modify(|metadata| {
                metadata.resolved_desc = Some(desc_handle);
                metadata.last_frame_used = i_frame;
            })
            .or_insert(ImageMetadata {
                resolved_desc: Some(desc_handle),
                last_frame_used: i_frame,
            });
    }

    /// Adopt an externally owned image (the swapchain) as the backing of a
    /// desc, and track the screen size for screen-relative descs.
    pub fn set_image(
        &mut self,
        device: &impl GraphDevice,
        desc_handle: Handle<TextureDesc>,
        image_handle: Handle<Image>,
    ) {
        if let Ok(desc) = self.texture_descs.get_mut(desc_handle) {
            desc.resolved_image = Some(image_handle);
        }
        if let Some(image_desc) = device.image_description(image_handle) {
            self.screen_size = IVec2::new(image_desc.size.x, image_desc.size.y);
        }
        self.touch_image(image_handle, desc_handle);
    }

    /// Forget an image that was destroyed outside the registry.
    pub fn drop_image(&mut self, image_handle: Handle<Image>) {
        for desc_handle in self.texture_descs.handles() {
            if let Ok(desc) = self.texture_descs.get_mut(desc_handle) {
                if desc.resolved_image == Some(image_handle) {
                    desc.resolved_image = None;
                }
            }
        }
        self.image_metadata.remove(&image_handle);
    }

    pub fn texture_desc_size(&self, desc_handle: Handle<TextureDesc>) -> IVec2 {
        match self.texture_descs.get(desc_handle) {
            Ok(desc) => match desc.size {
                TextureSize::Absolute(size) => IVec2::new(size.x, size.y),
                TextureSize::ScreenRelative(relative) => {
                    (self.screen_size.as_vec2() * relative).as_ivec2()
                }
            },
            Err(_) => IVec2::new(1, 1),
        }
    }

    /// Resolve a desc to an image handle. Returns the handle and whether the
    /// desc was already bound this frame (a reused attachment loads instead
    /// of clearing).
    pub fn resolve_image(
        &mut self,
        device: &mut impl GraphDevice,
        desc_handle: Handle<TextureDesc>,
    ) -> Result<(Handle<Image>, bool)> {
        let desc = self.texture_descs.get(desc_handle)?;
        if let Some(image_handle) = desc.resolved_image {
            self.touch_image(image_handle, desc_handle);
            return Ok((image_handle, true));
        }

        let size = self.texture_desc_size(desc_handle);
        let desc = self.texture_descs.get(desc_handle)?;
        let usages = if is_depth_format(desc.format) {
            depth_attachment_usage() | vk::ImageUsageFlags::TRANSFER_DST
        } else {
            color_attachment_usage()
        };
        let desc_spec = ImageDescription {
            name: desc.name.clone(),
            size: IVec3::new(size.x, size.y, 1),
            image_type: desc.image_type,
            format: desc.format,
            usages,
            ..Default::default()
        };

        // Any live image matching the spec that was released at the previous
        // end_frame can back this desc.
        let mut resolved_image = None;
        for (image_handle, metadata) in &self.image_metadata {
            if metadata.resolved_desc.is_none()
                && device.image_description(*image_handle) == Some(&desc_spec)
            {
                resolved_image = Some(*image_handle);
                break;
            }
        }

        let image_handle = match resolved_image {
            Some(image_handle) => image_handle,
            None => {
                let image_handle = device.create_image(desc_spec)?;
                device.update_globals();
                image_handle
            }
        };

        self.texture_descs.get_mut(desc_handle)?.resolved_image = Some(image_handle);
        self.touch_image(image_handle, desc_handle);
        Ok((image_handle, false))
    }

    /// Find or create the framebuffer for the given attachments.
    pub fn resolve_framebuffer(
        &mut self,
        device: &mut impl GraphDevice,
        color_attachments: &[Handle<TextureDesc>],
        depth_attachment: Option<Handle<TextureDesc>>,
    ) -> Result<Handle<Framebuffer>> {
        let mut color_images = Vec::with_capacity(color_attachments.len());
        for desc_handle in color_attachments {
            let desc = self.texture_descs.get(*desc_handle)?;
            color_images.push(desc.resolved_image.ok_or_else(|| {
                anyhow::anyhow!("color attachment desc was not resolved before the framebuffer")
            })?);
        }
        let depth_image = match depth_attachment {
            Some(desc_handle) => Some(self.resolve_image(device, desc_handle)?.0),
            None => None,
        };

        let size = {
            let reference_image = color_images.first().copied().or(depth_image);
            let reference_image =
                reference_image.ok_or_else(|| anyhow::anyhow!("framebuffer has no attachment"))?;
            device
                .image_description(reference_image)
                .map(|image_desc| image_desc.size)
                .ok_or_else(|| anyhow::anyhow!("framebuffer attachment image is gone"))?
        };

        for framebuffer_handle in &self.framebuffers {
            if device.framebuffer_matches(*framebuffer_handle, &color_images, depth_image, size) {
                let i_frame = self.i_frame;
                if let Some(metadata) = self.framebuffer_metadata.get_mut(framebuffer_handle) {
                    metadata.last_frame_used = i_frame;
                }
                return Ok(*framebuffer_handle);
            }
        }

        let framebuffer_handle = device.create_framebuffer(size, &color_images, depth_image)?;
        self.framebuffer_metadata.insert(
            framebuffer_handle,
            FramebufferMetadata {
                last_frame_used: self.i_frame,
            },
        );
        self.framebuffers.push(framebuffer_handle);
        Ok(framebuffer_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_rhi::image::ImageUsage;

    #[derive(Default)]
    struct FakeDevice {
        images: Pool<Image>,
        framebuffers: Pool<Framebuffer>,
        unbound: Vec<Handle<Image>>,
        destroyed_images: Vec<Handle<Image>>,
        destroyed_framebuffers: Vec<Handle<Framebuffer>>,
        created_images: usize,
    }

    impl GraphDevice for FakeDevice {
        fn create_image(&mut self, desc: ImageDescription) -> Result<Handle<Image>> {
            self.created_images += 1;
            Ok(self.images.add(Image {
                desc,
                vkhandle: vk::Image::null(),
                allocation: None,
                usage: ImageUsage::None,
                is_proxy: false,
                full_view: vk::ImageView::null(),
                sampled_index: Some(0),
                storage_index: None,
            }))
        }

        fn destroy_image(&mut self, image_handle: Handle<Image>) {
            let _ = self.images.remove(image_handle);
            self.destroyed_images.push(image_handle);
        }

        fn unbind_image(&mut self, image_handle: Handle<Image>) {
            if !self.unbound.contains(&image_handle) {
                self.unbound.push(image_handle);
            }
        }

        fn image_description(&self, image_handle: Handle<Image>) -> Option<&ImageDescription> {
            self.images.get(image_handle).ok().map(|image| &image.desc)
        }

        fn create_framebuffer(
            &mut self,
            size: IVec3,
            color_attachments: &[Handle<Image>],
            depth_attachment: Option<Handle<Image>>,
        ) -> Result<Handle<Framebuffer>> {
            Ok(self.framebuffers.add(Framebuffer {
                vkhandle: vk::Framebuffer::null(),
                format: karst_rhi::framebuffer::FramebufferFormat {
                    size,
                    format: Default::default(),
                },
                color_attachments: color_attachments.to_vec(),
                depth_attachment,
            }))
        }

        fn destroy_framebuffer(&mut self, framebuffer_handle: Handle<Framebuffer>) {
            let _ = self.framebuffers.remove(framebuffer_handle);
            self.destroyed_framebuffers.push(framebuffer_handle);
        }

        fn framebuffer_matches(
            &self,
            framebuffer_handle: Handle<Framebuffer>,
            color_attachments: &[Handle<Image>],
            depth_attachment: Option<Handle<Image>>,
            size: IVec3,
        ) -> bool {
            let Ok(framebuffer) = self.framebuffers.get(framebuffer_handle) else {
                return false;
            };
            framebuffer.color_attachments == color_attachments
                && framebuffer.depth_attachment == depth_attachment
                && framebuffer.format.size == size
        }

        fn update_globals(&mut self) {}
    }

    fn relative_desc(name: &str) -> TextureDesc {
        TextureDesc::new(
            name,
            TextureSize::ScreenRelative(Vec2::splat(1.0)),
            vk::Format::R8G8B8A8_UNORM,
        )
    }

    fn run_frame(
        registry: &mut ResourceRegistry,
        device: &mut FakeDevice,
        i_frame: u64,
        desc: TextureDesc,
    ) -> Handle<Image> {
        registry.begin_frame(device, i_frame);
        let desc_handle = registry.texture_descs.add(desc);
        let (image_handle, _) = registry.resolve_image(device, desc_handle).unwrap();
        registry.end_frame();
        image_handle
    }

    #[test]
    fn test_identical_descs_reuse_the_image() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(800, 600);

        let first = run_frame(&mut registry, &mut device, 0, relative_desc("rt"));
        let second = run_frame(&mut registry, &mut device, 1, relative_desc("rt"));
        assert_eq!(first, second);
        assert_eq!(device.created_images, 1);
    }

    #[test]
    fn test_screen_resize_allocates_a_new_image() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(800, 600);

        let first = run_frame(&mut registry, &mut device, 0, relative_desc("rt"));
        registry.screen_size = IVec2::new(400, 300);
        let second = run_frame(&mut registry, &mut device, 1, relative_desc("rt"));
        assert_ne!(first, second);
        assert_eq!(device.created_images, 2);
    }

    #[test]
    fn test_different_names_do_not_alias() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(64, 64);

        registry.begin_frame(&mut device, 0);
        let a = registry.texture_descs.add(relative_desc("a"));
        let b = registry.texture_descs.add(relative_desc("b"));
        let (image_a, _) = registry.resolve_image(&mut device, a).unwrap();
        let (image_b, _) = registry.resolve_image(&mut device, b).unwrap();
        assert_ne!(image_a, image_b);
        registry.end_frame();
    }

    #[test]
    fn test_second_resolve_same_frame_reports_reuse() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(64, 64);

        registry.begin_frame(&mut device, 0);
        let desc_handle = registry.texture_descs.add(relative_desc("rt"));
        let (image, fresh_reused) = registry.resolve_image(&mut device, desc_handle).unwrap();
        assert!(!fresh_reused);
        let (again, reused) = registry.resolve_image(&mut device, desc_handle).unwrap();
        assert_eq!(image, again);
        assert!(reused);
        registry.end_frame();
    }

    #[test]
    fn test_idle_image_unbinds_then_dies() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(64, 64);

        let image = run_frame(&mut registry, &mut device, 0, relative_desc("rt"));

        // Idle frames without the desc: nothing happens through frame 18.
        for i_frame in 1..=18 {
            registry.begin_frame(&mut device, i_frame);
            registry.end_frame();
            assert!(device.unbound.is_empty());
            assert!(device.destroyed_images.is_empty());
        }

        // last_used + 18 < 19: bindless slots released.
        registry.begin_frame(&mut device, 19);
        registry.end_frame();
        assert_eq!(device.unbound, vec![image]);
        assert!(device.destroyed_images.is_empty());

        // last_used + 19 < 20: the image is destroyed.
        registry.begin_frame(&mut device, 20);
        registry.end_frame();
        assert_eq!(device.destroyed_images, vec![image]);
        assert!(!device.images.contains(image));
    }

    #[test]
    fn test_used_image_is_kept_alive() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(64, 64);

        let mut last = None;
        for i_frame in 0..64 {
            let image = run_frame(&mut registry, &mut device, i_frame, relative_desc("rt"));
            if let Some(last) = last {
                assert_eq!(last, image);
            }
            last = Some(image);
        }
        assert!(device.destroyed_images.is_empty());
    }

    #[test]
    fn test_framebuffer_cache_hit_and_eviction() {
        let mut registry = ResourceRegistry::default();
        let mut device = FakeDevice::default();
        registry.screen_size = IVec2::new(64, 64);

        registry.begin_frame(&mut device, 0);
        let desc_handle = registry.texture_descs.add(relative_desc("rt"));
        let _ = registry.resolve_image(&mut device, desc_handle).unwrap();
        let framebuffer = registry
            .resolve_framebuffer(&mut device, &[desc_handle], None)
            .unwrap();
        registry.end_frame();

        // Same attachments next frame: cache hit.
        registry.begin_frame(&mut device, 1);
        let desc_handle = registry.texture_descs.add(relative_desc("rt"));
        let _ = registry.resolve_image(&mut device, desc_handle).unwrap();
        let framebuffer_again = registry
            .resolve_framebuffer(&mut device, &[desc_handle], None)
            .unwrap();
        assert_eq!(framebuffer, framebuffer_again);
        registry.end_frame();

        // Unused framebuffers die after their idle window, the image
        // survives longer.
        for i_frame in 2..=5 {
            registry.begin_frame(&mut device, i_frame);
            registry.end_frame();
        }
        assert_eq!(device.destroyed_framebuffers, vec![framebuffer]);
        assert!(device.destroyed_images.is_empty());
    }
}
