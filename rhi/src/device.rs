use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use ash::vk;
use glam::IVec3;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use karst_containers::{Handle, Pool};
use tracing::{info, warn};
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::bindless::BindlessSet;
use crate::buffer::{Buffer, BufferDescription, BufferUsage};
use crate::context::Context;
use crate::framebuffer::{
    AttachmentsFormat, Framebuffer, FramebufferFormat, LoadKind, LoadOp, MAX_ATTACHMENTS,
};
use crate::image::{is_depth_format, Image, ImageDescription, ImageUsage};
use crate::program::{
    ComputeProgram, ComputeState, GraphicsProgram, GraphicsState, PushConstants, RenderState,
    Shader,
};
use crate::surface::Surface;
use crate::sync::Fence;
use crate::work::Work;
use crate::Result;
use crate::RhiError;
use crate::FRAME_QUEUE_LENGTH;

/// Size and alignment of one per-draw options block in the uniform ring.
pub const OPTIONS_BLOCK_SIZE: u64 = 256;

#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub frame_queue_length: usize,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            frame_queue_length: FRAME_QUEUE_LENGTH,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct RenderPassKey {
    attachment_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
    load_kinds: Vec<LoadKind>,
}

enum PendingDelete {
    Image {
        vkhandle: vk::Image,
        view: vk::ImageView,
        allocation: Option<gpu_allocator::vulkan::Allocation>,
        is_proxy: bool,
    },
    Buffer {
        vkhandle: vk::Buffer,
        allocation: Option<gpu_allocator::vulkan::Allocation>,
    },
    Framebuffer {
        vkhandle: vk::Framebuffer,
    },
    Shader {
        vkhandle: vk::ShaderModule,
    },
    Pipeline {
        vkhandle: vk::Pipeline,
    },
}

/// Owns every GPU resource through generational pools, the bindless set, and
/// queue submission state.
///
/// Destruction is deferred by one full frame queue: `destroy_*` queues the
/// Vulkan handles on the current frame's deletion list, which is only flushed
/// once the frame-queue slot comes around again, after the renderer has waited
/// on that frame's fence.
pub struct Device {
    pub images: Pool<Image>,
    pub buffers: Pool<Buffer>,
    pub shaders: Pool<Shader>,
    pub graphics_programs: Pool<GraphicsProgram>,
    pub compute_programs: Pool<ComputeProgram>,
    pub framebuffers: Pool<Framebuffer>,
    pub(crate) bindless: BindlessSet,
    pipeline_layout: vk::PipelineLayout,
    render_pass_cache: HashMap<RenderPassKey, vk::RenderPass>,
    default_sampler: vk::Sampler,
    allocator: Option<Allocator>,
    deletion_queues: Vec<Vec<PendingDelete>>,
    frame_count: u64,
    pub context: Context,
}

impl Device {
    pub fn new(context: Context, desc: &DeviceDescription) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        let mut bindless = BindlessSet::new(&context)?;

        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(vk::LOD_CLAMP_NONE);
        let default_sampler = unsafe { context.device.create_sampler(&sampler_ci, None)? };
        // The default sampler sits at slot 0 of the sampler array.
        bindless.bind_sampler(default_sampler)?;
        bindless.flush(&context);

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32)];
        let layouts = bindless.layouts();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = unsafe { context.device.create_pipeline_layout(&layout_ci, None)? };

        info!(
            frame_queue_length = desc.frame_queue_length,
            "created bindless device"
        );

        Ok(Self {
            images: Pool::default(),
            buffers: Pool::default(),
            shaders: Pool::default(),
            graphics_programs: Pool::default(),
            compute_programs: Pool::default(),
            framebuffers: Pool::default(),
            bindless,
            pipeline_layout,
            render_pass_cache: HashMap::new(),
            default_sampler,
            allocator: Some(allocator),
            deletion_queues: (0..desc.frame_queue_length.max(1))
                .map(|_| Vec::new())
                .collect(),
            frame_count: 0,
            context,
        })
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.context.device.device_wait_idle()? };
        Ok(())
    }

    /// Rotate the deletion queues. Call once per frame, after the
    /// frame-queue-length-old fence has been waited on.
    pub fn begin_frame(&mut self) {
        self.frame_count += 1;
        let slot = self.frame_count as usize % self.deletion_queues.len();
        let pending = std::mem::take(&mut self.deletion_queues[slot]);
        for delete in pending {
            self.destroy_now(delete);
        }
    }

    fn queue_delete(&mut self, delete: PendingDelete) {
        let slot = self.frame_count as usize % self.deletion_queues.len();
        self.deletion_queues[slot].push(delete);
    }

    fn destroy_now(&mut self, delete: PendingDelete) {
        let device = &self.context.device;
        unsafe {
            match delete {
                PendingDelete::Image {
                    vkhandle,
                    view,
                    allocation,
                    is_proxy,
                } => {
                    device.destroy_image_view(view, None);
                    if !is_proxy {
                        device.destroy_image(vkhandle, None);
                    }
                    if let (Some(allocation), Some(allocator)) =
                        (allocation, self.allocator.as_mut())
                    {
                        let _ = allocator.free(allocation);
                    }
                }
                PendingDelete::Buffer {
                    vkhandle,
                    allocation,
                } => {
                    device.destroy_buffer(vkhandle, None);
                    if let (Some(allocation), Some(allocator)) =
                        (allocation, self.allocator.as_mut())
                    {
                        let _ = allocator.free(allocation);
                    }
                }
                PendingDelete::Framebuffer { vkhandle } => {
                    device.destroy_framebuffer(vkhandle, None);
                }
                PendingDelete::Shader { vkhandle } => {
                    device.destroy_shader_module(vkhandle, None);
                }
                PendingDelete::Pipeline { vkhandle } => {
                    device.destroy_pipeline(vkhandle, None);
                }
            }
        }
    }

    // -- Images

    pub fn create_image(&mut self, desc: ImageDescription) -> Result<Handle<Image>> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.size.x.max(1) as u32,
                height: desc.size.y.max(1) as u32,
                depth: desc.size.z.max(1) as u32,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usages)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let vkhandle = unsafe { self.context.device.create_image(&image_ci, None)? };

        let requirements = unsafe { self.context.device.get_image_memory_requirements(vkhandle) };
        let allocator = self.allocator.as_mut().expect("allocator is alive");
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: desc.memory_location,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe {
            self.context
                .device
                .bind_image_memory(vkhandle, allocation.memory(), allocation.offset())?
        };

        let full_view = self.create_full_view(&desc, vkhandle)?;
        self.context.set_vk_name(vkhandle, &desc.name);

        let sampled_index = if desc.usages.contains(vk::ImageUsageFlags::SAMPLED) {
            Some(self.bindless.bind_sampled_image(
                full_view,
                self.default_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?)
        } else {
            None
        };
        let storage_index = if desc.usages.contains(vk::ImageUsageFlags::STORAGE) {
            Some(self.bindless.bind_storage_image(full_view)?)
        } else {
            None
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkImage {:?}", vkhandle);

        Ok(self.images.add(Image {
            desc,
            vkhandle,
            allocation: Some(allocation),
            usage: ImageUsage::None,
            is_proxy: false,
            full_view,
            sampled_index,
            storage_index,
        }))
    }

    /// Wrap a swapchain image the device does not own memory for.
    pub fn adopt_swapchain_image(
        &mut self,
        desc: ImageDescription,
        vkhandle: vk::Image,
    ) -> Result<Handle<Image>> {
        let full_view = self.create_full_view(&desc, vkhandle)?;
        self.context.set_vk_name(vkhandle, &desc.name);
        Ok(self.images.add(Image {
            desc,
            vkhandle,
            allocation: None,
            usage: ImageUsage::None,
            is_proxy: true,
            full_view,
            sampled_index: None,
            storage_index: None,
        }))
    }

    fn create_full_view(
        &self,
        desc: &ImageDescription,
        vkhandle: vk::Image,
    ) -> Result<vk::ImageView> {
        let aspect_mask = if is_depth_format(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_type = match desc.image_type {
            vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
            vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
            _ => vk::ImageViewType::TYPE_2D,
        };
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(vkhandle)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        Ok(unsafe { self.context.device.create_image_view(&view_ci, None)? })
    }

    /// Release the image's bindless slots without destroying it.
    pub fn unbind_image(&mut self, image_handle: Handle<Image>) {
        let Ok(image) = self.images.get_mut(image_handle) else {
            return;
        };
        if let Some(index) = image.sampled_index.take() {
            self.bindless.unbind_sampled_image(index);
        }
        if let Some(index) = image.storage_index.take() {
            self.bindless.unbind_storage_image(index);
        }
    }

    pub fn destroy_image(&mut self, image_handle: Handle<Image>) {
        self.unbind_image(image_handle);
        let Ok(mut image) = self.images.remove(image_handle) else {
            return;
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkImage {:?}", image.vkhandle);

        self.queue_delete(PendingDelete::Image {
            vkhandle: image.vkhandle,
            view: image.full_view,
            allocation: image.allocation.take(),
            is_proxy: image.is_proxy,
        });
    }

    /// Immediate destruction for swapchain proxies; the caller guarantees the
    /// device is idle.
    pub fn destroy_proxy_image(&mut self, image_handle: Handle<Image>) {
        let Ok(image) = self.images.remove(image_handle) else {
            return;
        };
        debug_assert!(image.is_proxy);
        unsafe {
            self.context
                .device
                .destroy_image_view(image.full_view, None)
        };
    }

    pub fn get_image_sampled_index(&self, image_handle: Handle<Image>) -> u32 {
        let index = self
            .images
            .get(image_handle)
            .ok()
            .and_then(|image| image.sampled_index);
        debug_assert!(index.is_some(), "image has no sampled bindless slot");
        index.unwrap_or(u32::MAX)
    }

    pub fn get_image_storage_index(&self, image_handle: Handle<Image>) -> u32 {
        let index = self
            .images
            .get(image_handle)
            .ok()
            .and_then(|image| image.storage_index);
        debug_assert!(index.is_some(), "image has no storage bindless slot");
        index.unwrap_or(u32::MAX)
    }

    // -- Buffers

    pub fn create_buffer(&mut self, desc: BufferDescription) -> Result<Handle<Buffer>> {
        // Every buffer is addressable from shaders, both by device address
        // and through the bindless storage array.
        let usage = desc.usage
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let vkhandle = unsafe { self.context.device.create_buffer(&buffer_ci, None)? };

        let requirements = unsafe { self.context.device.get_buffer_memory_requirements(vkhandle) };
        let allocator = self.allocator.as_mut().expect("allocator is alive");
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: desc.memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe {
            self.context
                .device
                .bind_buffer_memory(vkhandle, allocation.memory(), allocation.offset())?
        };

        let gpu_address = unsafe {
            self.context.device.get_buffer_device_address(
                &vk::BufferDeviceAddressInfo::default().buffer(vkhandle),
            )
        };
        let mapped_ptr = allocation.mapped_ptr();
        let storage_index = Some(self.bindless.bind_storage_buffer(vkhandle, desc.size)?);
        self.context.set_vk_name(vkhandle, &desc.name);

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkBuffer {:?}", vkhandle);

        Ok(self.buffers.add(Buffer {
            desc,
            vkhandle,
            allocation: Some(allocation),
            usage: BufferUsage::None,
            mapped_ptr,
            gpu_address,
            storage_index,
        }))
    }

    pub fn destroy_buffer(&mut self, buffer_handle: Handle<Buffer>) {
        let Ok(mut buffer) = self.buffers.remove(buffer_handle) else {
            return;
        };
        if let Some(index) = buffer.storage_index.take() {
            self.bindless.unbind_storage_buffer(index);
        }

        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkBuffer {:?}", buffer.vkhandle);

        self.queue_delete(PendingDelete::Buffer {
            vkhandle: buffer.vkhandle,
            allocation: buffer.allocation.take(),
        });
    }

    pub fn get_buffer_storage_index(&self, buffer_handle: Handle<Buffer>) -> u32 {
        let index = self
            .buffers
            .get(buffer_handle)
            .ok()
            .and_then(|buffer| buffer.storage_index);
        debug_assert!(index.is_some(), "buffer has no storage bindless slot");
        index.unwrap_or(u32::MAX)
    }

    // -- Shaders and programs

    pub fn create_shader(&mut self, path: &Path) -> Result<Handle<Shader>> {
        let bytes = std::fs::read(path).map_err(|error| {
            warn!(path = %path.display(), %error, "failed to read shader bytecode");
            RhiError::ShaderLoadFailed {
                path: path.to_path_buf(),
            }
        })?;
        let bytecode = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|error| {
            warn!(path = %path.display(), %error, "invalid SPIR-V bytecode");
            RhiError::ShaderLoadFailed {
                path: path.to_path_buf(),
            }
        })?;
        let module_ci = vk::ShaderModuleCreateInfo::default().code(&bytecode);
        let vkhandle = unsafe { self.context.device.create_shader_module(&module_ci, None)? };
        Ok(self.shaders.add(Shader {
            path: path.to_path_buf(),
            bytecode,
            vkhandle,
        }))
    }

    pub fn destroy_shader(&mut self, shader_handle: Handle<Shader>) {
        let Ok(shader) = self.shaders.remove(shader_handle) else {
            return;
        };
        self.queue_delete(PendingDelete::Shader {
            vkhandle: shader.vkhandle,
        });
    }

    pub fn create_program(
        &mut self,
        name: &str,
        graphics_state: GraphicsState,
    ) -> Result<Handle<GraphicsProgram>> {
        Ok(self.graphics_programs.add(GraphicsProgram {
            name: name.to_owned(),
            graphics_state,
            render_states: Vec::new(),
            pipelines: Vec::new(),
        }))
    }

    pub fn destroy_program(&mut self, program_handle: Handle<GraphicsProgram>) {
        let Ok(program) = self.graphics_programs.remove(program_handle) else {
            return;
        };
        for pipeline in program.pipelines {
            self.queue_delete(PendingDelete::Pipeline { vkhandle: pipeline });
        }
    }

    /// Compile one pipeline variant. Identical `(program, render_state)`
    /// pairs return the cached variant index instead of recompiling.
    pub fn compile_graphics_state(
        &mut self,
        program_handle: Handle<GraphicsProgram>,
        render_state: RenderState,
    ) -> Result<usize> {
        let program = self.graphics_programs.get(program_handle)?;
        if let Some(index) = program
            .render_states
            .iter()
            .position(|cached| *cached == render_state)
        {
            return Ok(index);
        }

        let name = program.name.clone();
        let graphics_state = program.graphics_state.clone();
        let vertex_module = self.shaders.get(graphics_state.vertex_shader)?.vkhandle;
        let fragment_module = self.shaders.get(graphics_state.fragment_shader)?.vkhandle;

        let load_kinds = vec![LoadKind::Load; graphics_state.attachments_format.attachment_formats.len()];
        let render_pass =
            self.get_or_create_render_pass_for_format(&graphics_state.attachments_format, &load_kinds)?;

        let entry_point = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(entry_point),
        ];

        // Vertex pulling through the bindless buffer array, no input bindings.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(if render_state.rasterization.culling {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            })
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(render_state.depth.test.is_some())
            .depth_write_enable(render_state.depth.enable_write)
            .depth_compare_op(render_state.depth.test.unwrap_or(vk::CompareOp::ALWAYS));

        let mut blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if render_state.alpha_blending {
            blend_attachment = blend_attachment
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD);
        }
        let blend_attachments =
            vec![blend_attachment; graphics_state.attachments_format.attachment_formats.len()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.context
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_ci], None)
                .map_err(|(_, error)| {
                    warn!(program = %name, ?error, "graphics pipeline compilation failed");
                    RhiError::PipelineCompileFailed { name: name.clone() }
                })?
        };

        let program = self.graphics_programs.get_mut(program_handle)?;
        program.render_states.push(render_state);
        program.pipelines.push(pipelines[0]);
        Ok(program.pipelines.len() - 1)
    }

    pub fn create_compute_program(
        &mut self,
        name: &str,
        state: ComputeState,
    ) -> Result<Handle<ComputeProgram>> {
        let module = self.shaders.get(state.shader)?.vkhandle;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let pipeline_ci = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.pipeline_layout);
        let pipelines = unsafe {
            self.context
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_ci], None)
                .map_err(|(_, error)| {
                    warn!(program = %name, ?error, "compute pipeline compilation failed");
                    RhiError::PipelineCompileFailed {
                        name: name.to_owned(),
                    }
                })?
        };
        Ok(self.compute_programs.add(ComputeProgram {
            name: name.to_owned(),
            state,
            pipeline: pipelines[0],
        }))
    }

    pub fn destroy_compute_program(&mut self, program_handle: Handle<ComputeProgram>) {
        let Ok(program) = self.compute_programs.remove(program_handle) else {
            return;
        };
        self.queue_delete(PendingDelete::Pipeline {
            vkhandle: program.pipeline,
        });
    }

    // -- Render passes and framebuffers

    fn get_or_create_render_pass_for_format(
        &mut self,
        format: &AttachmentsFormat,
        load_kinds: &[LoadKind],
    ) -> Result<vk::RenderPass> {
        let key = RenderPassKey {
            attachment_formats: format.attachment_formats.clone(),
            depth_format: format.depth_format,
            load_kinds: load_kinds.to_vec(),
        };
        if let Some(render_pass) = self.render_pass_cache.get(&key) {
            return Ok(*render_pass);
        }

        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        for (i_color, color_format) in format.attachment_formats.iter().enumerate() {
            let load_kind = load_kinds.get(i_color).copied().unwrap_or(LoadKind::Ignore);
            let initial_layout = match load_kind {
                LoadKind::Load => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                _ => vk::ImageLayout::UNDEFINED,
            };
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(*color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(match load_kind {
                        LoadKind::Load => vk::AttachmentLoadOp::LOAD,
                        LoadKind::Clear => vk::AttachmentLoadOp::CLEAR,
                        LoadKind::Ignore => vk::AttachmentLoadOp::DONT_CARE,
                    })
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(initial_layout)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(i_color as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }

        let mut depth_ref = vk::AttachmentReference::default();
        if let Some(depth_format) = format.depth_format {
            let load_kind = load_kinds
                .get(format.attachment_formats.len())
                .copied()
                .unwrap_or(LoadKind::Ignore);
            let initial_layout = match load_kind {
                LoadKind::Load => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                _ => vk::ImageLayout::UNDEFINED,
            };
            depth_ref = vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(match load_kind {
                        LoadKind::Load => vk::AttachmentLoadOp::LOAD,
                        LoadKind::Clear => vk::AttachmentLoadOp::CLEAR,
                        LoadKind::Ignore => vk::AttachmentLoadOp::DONT_CARE,
                    })
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(initial_layout)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if format.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass = unsafe {
            self.context
                .device
                .create_render_pass(&render_pass_ci, None)?
        };
        self.render_pass_cache.insert(key, render_pass);
        Ok(render_pass)
    }

    pub(crate) fn get_or_create_render_pass(
        &mut self,
        framebuffer_handle: Handle<Framebuffer>,
        load_ops: &[LoadOp],
    ) -> Result<vk::RenderPass> {
        let format = self.framebuffers.get(framebuffer_handle)?.format.format.clone();
        let load_kinds: Vec<LoadKind> = load_ops.iter().map(|load_op| load_op.kind).collect();
        self.get_or_create_render_pass_for_format(&format, &load_kinds)
    }

    pub fn create_framebuffer(
        &mut self,
        size: IVec3,
        color_attachments: &[Handle<Image>],
        depth_attachment: Option<Handle<Image>>,
    ) -> Result<Handle<Framebuffer>> {
        debug_assert!(color_attachments.len() <= MAX_ATTACHMENTS);

        let mut attachment_formats = Vec::with_capacity(color_attachments.len());
        let mut views = Vec::with_capacity(color_attachments.len() + 1);
        for image_handle in color_attachments {
            let image = self.images.get(*image_handle)?;
            attachment_formats.push(image.desc.format);
            views.push(image.full_view);
        }
        let mut depth_format = None;
        if let Some(depth_handle) = depth_attachment {
            let image = self.images.get(depth_handle)?;
            depth_format = Some(image.desc.format);
            views.push(image.full_view);
        }

        let format = AttachmentsFormat {
            attachment_formats,
            depth_format,
        };
        let load_kinds = vec![LoadKind::Load; views.len()];
        let render_pass = self.get_or_create_render_pass_for_format(&format, &load_kinds)?;

        let framebuffer_ci = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(size.x.max(1) as u32)
            .height(size.y.max(1) as u32)
            .layers(1);
        let vkhandle = unsafe { self.context.device.create_framebuffer(&framebuffer_ci, None)? };

        Ok(self.framebuffers.add(Framebuffer {
            vkhandle,
            format: FramebufferFormat { size, format },
            color_attachments: color_attachments.to_vec(),
            depth_attachment,
        }))
    }

    pub fn destroy_framebuffer(&mut self, framebuffer_handle: Handle<Framebuffer>) {
        let Ok(framebuffer) = self.framebuffers.remove(framebuffer_handle) else {
            return;
        };
        self.queue_delete(PendingDelete::Framebuffer {
            vkhandle: framebuffer.vkhandle,
        });
    }

    // -- Globals

    /// Flush pending bindless writes. Must be called before submitting work
    /// that references newly bound resources.
    pub fn update_globals(&mut self) {
        self.bindless.flush(&self.context);
    }

    /// Point the global dynamic uniform binding at the options ring buffer.
    /// The binding window is one options block; callers rebind with a dynamic
    /// offset per draw.
    pub fn set_options_buffer(&mut self, buffer_handle: Handle<Buffer>) -> Result<()> {
        let buffer = self.buffers.get(buffer_handle)?;
        let range = OPTIONS_BLOCK_SIZE.min(buffer.desc.size);
        self.bindless
            .set_uniform_buffer(&self.context, buffer.vkhandle, range);
        Ok(())
    }

    // -- Submission and presentation

    /// Acquire the next swapchain image, tagging `surface.current_image`.
    /// Returns true when the swapchain is outdated and must be recreated.
    pub fn acquire_next_swapchain(&mut self, surface: &mut Surface) -> Result<bool> {
        surface.previous_image = surface.current_image;
        let semaphore = surface.image_acquired_semaphores[surface.current_image as usize];
        let result = unsafe {
            self.context.swapchain_loader.acquire_next_image(
                surface.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => {
                surface.current_image = image_index;
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(error) => Err(error.into()),
        }
    }

    pub fn submit(&mut self, work: &Work, fence: &Fence) -> Result<()> {
        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(work.command_buffer)];

        let mut wait_semaphore_infos = Vec::new();
        if let (Some(semaphore), Some(stage)) =
            (work.image_acquired_semaphore, work.image_acquired_stage)
        {
            wait_semaphore_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage),
            );
        }

        let mut signal_semaphore_infos = Vec::new();
        if let Some(semaphore) = work.signal_present_semaphore {
            signal_semaphore_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&wait_semaphore_infos)
            .signal_semaphore_infos(&signal_semaphore_infos);
        unsafe {
            self.context.device.queue_submit2(
                self.context.graphics_queue,
                &[submit_info],
                fence.handle(),
            )?
        };
        Ok(())
    }

    /// Present the current swapchain image. Returns true when the swapchain
    /// is outdated and must be recreated.
    pub fn present(&mut self, surface: &Surface) -> Result<bool> {
        let wait_semaphores = [surface.can_present_semaphores[surface.current_image as usize]];
        let swapchains = [surface.swapchain];
        let image_indices = [surface.current_image];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe {
            self.context
                .swapchain_loader
                .queue_present(self.context.graphics_queue, &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.wait_idle();

        for slot in 0..self.deletion_queues.len() {
            let pending = std::mem::take(&mut self.deletion_queues[slot]);
            for delete in pending {
                self.destroy_now(delete);
            }
        }

        for image_handle in self.images.handles() {
            self.destroy_image(image_handle);
        }
        for buffer_handle in self.buffers.handles() {
            self.destroy_buffer(buffer_handle);
        }
        for shader_handle in self.shaders.handles() {
            self.destroy_shader(shader_handle);
        }
        for program_handle in self.graphics_programs.handles() {
            self.destroy_program(program_handle);
        }
        for program_handle in self.compute_programs.handles() {
            self.destroy_compute_program(program_handle);
        }
        for framebuffer_handle in self.framebuffers.handles() {
            self.destroy_framebuffer(framebuffer_handle);
        }
        for slot in 0..self.deletion_queues.len() {
            let pending = std::mem::take(&mut self.deletion_queues[slot]);
            for delete in pending {
                self.destroy_now(delete);
            }
        }

        unsafe {
            for render_pass in self.render_pass_cache.values() {
                self.context.device.destroy_render_pass(*render_pass, None);
            }
            self.context
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.context.device.destroy_sampler(self.default_sampler, None);
        }
        self.bindless.destroy(&self.context);

        // The allocator has to release its memory blocks before the device
        // goes away with the context.
        self.allocator = None;
    }
}
