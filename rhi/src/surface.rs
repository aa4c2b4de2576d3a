use ash::vk;
use glam::{IVec2, IVec3};
use karst_containers::Handle;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::device::Device;
use crate::image::{Image, ImageDescription};
use crate::sync::create_semaphore;
use crate::wsi::RhiWindow;
use crate::Result;
use crate::RhiError;

pub const MAX_SWAPCHAIN_IMAGES: usize = 6;

/// Window-backed swapchain with per-image acquire/present semaphores.
///
/// `acquire`/`present` live on [`Device`]; both report `is_outdated` and the
/// caller reacts with [`recreate_swapchain`](Surface::recreate_swapchain).
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub size: IVec2,
    pub images: Vec<Handle<Image>>,
    pub image_acquired_semaphores: Vec<vk::Semaphore>,
    pub can_present_semaphores: Vec<vk::Semaphore>,
    pub current_image: u32,
    pub previous_image: u32,
}

impl Surface {
    pub fn new(device: &mut Device, window: &impl RhiWindow) -> Result<Self> {
        let context = &device.context;
        let surface = unsafe {
            ash_window::create_surface(
                context.entry(),
                &context.instance,
                window
                    .display_handle()
                    .map_err(|_| RhiError::NoSurfaceFormat)?
                    .as_raw(),
                window
                    .window_handle()
                    .map_err(|_| RhiError::NoSurfaceFormat)?
                    .as_raw(),
                None,
            )?
        };

        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, surface)?
        };
        let format = formats
            .iter()
            .copied()
            .find(|format| {
                format.format == vk::Format::B8G8R8A8_UNORM
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first().copied())
            .ok_or(RhiError::NoSurfaceFormat)?;

        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, surface)?
        };
        let present_mode = [
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO);

        let supported = unsafe {
            context.surface_loader.get_physical_device_surface_support(
                context.physical_device,
                context.graphics_family_index,
                surface,
            )?
        };
        if !supported {
            return Err(RhiError::ImpossibleQueue);
        }

        let mut this = Self {
            surface,
            swapchain: vk::SwapchainKHR::null(),
            format,
            present_mode,
            size: IVec2::new(window.size().x as i32, window.size().y as i32),
            images: Vec::new(),
            image_acquired_semaphores: Vec::new(),
            can_present_semaphores: Vec::new(),
            current_image: 0,
            previous_image: 0,
        };
        this.recreate_swapchain(device)?;
        Ok(this)
    }

    /// Safe to call repeatedly; also the recovery path after `is_outdated`.
    pub fn recreate_swapchain(&mut self, device: &mut Device) -> Result<()> {
        device.wait_idle()?;
        self.destroy_swapchain_resources(device);

        let context = &device.context;
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, self.surface)?
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: (self.size.x as u32).clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: (self.size.y as u32).clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        self.size = IVec2::new(extent.width as i32, extent.height as i32);

        let mut image_count = capabilities.min_image_count + 2;
        if capabilities.max_image_count != 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }
        image_count = image_count.min(MAX_SWAPCHAIN_IMAGES as u32);

        let image_usages = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let old_swapchain = self.swapchain;
        let swapchain_ci = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usages)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        self.swapchain = unsafe {
            context
                .swapchain_loader
                .create_swapchain(&swapchain_ci, None)?
        };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                context
                    .swapchain_loader
                    .destroy_swapchain(old_swapchain, None)
            };
        }

        let vk_images = unsafe {
            context
                .swapchain_loader
                .get_swapchain_images(self.swapchain)?
        };
        info!(
            width = extent.width,
            height = extent.height,
            images = vk_images.len(),
            present_mode = ?self.present_mode,
            "created swapchain"
        );

        for (i_image, vk_image) in vk_images.iter().enumerate() {
            let desc = ImageDescription {
                name: format!("Swapchain image #{i_image}"),
                size: IVec3::new(self.size.x, self.size.y, 1),
                format: self.format.format,
                usages: image_usages,
                ..Default::default()
            };
            let handle = device.adopt_swapchain_image(desc, *vk_image)?;
            self.images.push(handle);
        }

        for _ in 0..self.images.len() {
            self.image_acquired_semaphores
                .push(create_semaphore(&device.context)?);
            self.can_present_semaphores
                .push(create_semaphore(&device.context)?);
        }

        self.current_image = 0;
        self.previous_image = 0;
        Ok(())
    }

    fn destroy_swapchain_resources(&mut self, device: &mut Device) {
        for image_handle in self.images.drain(..) {
            device.destroy_proxy_image(image_handle);
        }
        for semaphore in self
            .image_acquired_semaphores
            .drain(..)
            .chain(self.can_present_semaphores.drain(..))
        {
            unsafe { device.context.device.destroy_semaphore(semaphore, None) };
        }
    }

    pub fn destroy(&mut self, device: &mut Device) {
        let _ = device.wait_idle();
        self.destroy_swapchain_resources(device);
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                device
                    .context
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            device
                .context
                .surface_loader
                .destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
        }
    }

    pub fn current_image_handle(&self) -> Handle<Image> {
        self.images[self.current_image as usize]
    }
}
