use ash::vk;
use glam::UVec3;
use karst_containers::Handle;

use crate::buffer::{buffer_access, Buffer, BufferUsage};
use crate::context::Context;
use crate::device::Device;
use crate::framebuffer::{Framebuffer, LoadOp};
use crate::image::{absolute_access, image_access, is_depth_format, Image, ImageAccess, ImageUsage};
use crate::program::{ComputeProgram, GraphicsProgram, PushConstants};
use crate::surface::Surface;
use crate::Result;

#[derive(Debug, Copy, Clone)]
pub struct QueryPool {
    pub vkhandle: vk::QueryPool,
    pub capacity: u32,
}

impl QueryPool {
    pub fn new_timestamp(context: &Context, capacity: u32) -> Result<Self> {
        let pool_ci = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(capacity);
        let vkhandle = unsafe { context.device.create_query_pool(&pool_ci, None)? };
        Ok(Self { vkhandle, capacity })
    }

    /// Read back `count` 64-bit results. Fails when the queries have not
    /// completed yet.
    pub fn results(&self, context: &Context, first_query: u32, count: u32) -> Result<Vec<u64>> {
        debug_assert!(first_query + count <= self.capacity);
        let mut results = vec![0u64; count as usize];
        unsafe {
            context.device.get_query_pool_results(
                self.vkhandle,
                first_query,
                &mut results,
                vk::QueryResultFlags::TYPE_64,
            )?
        };
        Ok(results)
    }

    pub fn destroy(&mut self, context: &Context) {
        unsafe { context.device.destroy_query_pool(self.vkhandle, None) };
        self.vkhandle = vk::QueryPool::null();
    }
}

/// Recycles command buffers for one frame-queue slot. Reset wholesale at the
/// start of the slot's next frame.
pub struct WorkPool {
    command_pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    used: Vec<vk::CommandBuffer>,
}

impl WorkPool {
    pub fn new(context: &Context) -> Result<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.graphics_family_index);
        let command_pool = unsafe { context.device.create_command_pool(&pool_ci, None)? };
        Ok(Self {
            command_pool,
            free: Vec::new(),
            used: Vec::new(),
        })
    }

    pub fn reset(&mut self, context: &Context) -> Result<()> {
        unsafe {
            context
                .device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?
        };
        self.free.append(&mut self.used);
        Ok(())
    }

    pub fn acquire(&mut self, context: &Context) -> Result<Work> {
        let command_buffer = match self.free.pop() {
            Some(command_buffer) => command_buffer,
            None => {
                let allocate_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                unsafe { context.device.allocate_command_buffers(&allocate_info)?[0] }
            }
        };
        self.used.push(command_buffer);
        Ok(Work::new(context, command_buffer))
    }

    pub fn destroy(&mut self, context: &Context) {
        unsafe { context.device.destroy_command_pool(self.command_pool, None) };
        self.command_pool = vk::CommandPool::null();
        self.free.clear();
        self.used.clear();
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct DrawIndexedOptions {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub index_offset: u32,
    pub vertex_offset: i32,
    pub instance_offset: u32,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct DrawOptions {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub vertex_offset: i32,
    pub instance_offset: u32,
}

/// State-tracked command buffer.
///
/// The recorder owns every usage transition of the images and buffers it
/// touches: `barrier` derives source stage/access/layout from the resource's
/// current usage, records the pipeline barrier and writes the new usage back.
pub struct Work {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    pub command_buffer: vk::CommandBuffer,
    pub(crate) image_acquired_semaphore: Option<vk::Semaphore>,
    pub(crate) image_acquired_stage: Option<vk::PipelineStageFlags2>,
    pub(crate) signal_present_semaphore: Option<vk::Semaphore>,
}

fn vk_image_barrier(
    image: &Image,
    src: ImageAccess,
    dst: ImageAccess,
) -> vk::ImageMemoryBarrier2<'static> {
    let aspect_mask = if is_depth_format(image.desc.format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .old_layout(src.layout)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.vkhandle)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
}

fn vk_buffer_barrier(
    buffer: &Buffer,
    src_usage: BufferUsage,
    dst_usage: BufferUsage,
) -> vk::BufferMemoryBarrier2<'static> {
    let src = buffer_access(src_usage);
    let dst = buffer_access(dst_usage);
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer.vkhandle)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

impl Work {
    fn new(context: &Context, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device: context.device.clone(),
            debug_utils: context.debug_utils.clone(),
            command_buffer,
            image_acquired_semaphore: None,
            image_acquired_stage: None,
            signal_present_semaphore: None,
        }
    }

    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)?
        };
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer)? };
        Ok(())
    }

    /// Bind the global descriptor sets for both bind points.
    pub fn bind_globals(&self, device: &Device) {
        self.bind_uniform_offset(device, 0);
    }

    /// Rebind set 0 with a new dynamic offset into the options buffer.
    pub fn bind_uniform_offset(&self, device: &Device, offset: u32) {
        let sets = device.bindless.sets();
        let dynamic_offsets = [offset];
        unsafe {
            for bind_point in [
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineBindPoint::COMPUTE,
            ] {
                self.device.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    bind_point,
                    device.pipeline_layout(),
                    0,
                    &sets,
                    &dynamic_offsets,
                );
            }
        }
    }

    // -- Swapchain hooks

    /// Register the acquire semaphore to be waited at submission.
    pub fn wait_for_acquired(&mut self, surface: &Surface, stage: vk::PipelineStageFlags2) {
        self.image_acquired_semaphore =
            Some(surface.image_acquired_semaphores[surface.previous_image as usize]);
        self.image_acquired_stage = Some(stage);
    }

    /// Register the present-ready semaphore to be signaled at submission.
    pub fn prepare_present(&mut self, surface: &Surface) {
        self.signal_present_semaphore =
            Some(surface.can_present_semaphores[surface.current_image as usize]);
    }

    // -- Barriers

    pub fn barrier(
        &self,
        device: &mut Device,
        image_handle: Handle<Image>,
        usage_destination: ImageUsage,
    ) -> Result<()> {
        let image = device.images.get_mut(image_handle)?;
        let barrier =
            vk_image_barrier(image, image_access(image.usage), image_access(usage_destination));
        image.usage = usage_destination;
        self.pipeline_barrier(&[barrier], &[]);
        Ok(())
    }

    /// Transition from an undefined layout regardless of the tracked usage,
    /// discarding the image's contents. For freshly allocated images and for
    /// images that are fully overwritten, like the swapchain image under the
    /// present blit.
    pub fn clear_barrier(
        &self,
        device: &mut Device,
        image_handle: Handle<Image>,
        usage_destination: ImageUsage,
    ) -> Result<()> {
        let image = device.images.get_mut(image_handle)?;
        let barrier = vk_image_barrier(
            image,
            image_access(ImageUsage::None),
            image_access(usage_destination),
        );
        image.usage = usage_destination;
        self.pipeline_barrier(&[barrier], &[]);
        Ok(())
    }

    /// Full WRITE to WRITE barrier regardless of tracked state.
    pub fn absolute_barrier(&self, device: &Device, image_handle: Handle<Image>) -> Result<()> {
        let image = device.images.get(image_handle)?;
        let layout = image_access(image.usage).layout;
        let everything = absolute_access(layout);
        let barrier = vk_image_barrier(image, everything, everything);
        self.pipeline_barrier(&[barrier], &[]);
        Ok(())
    }

    pub fn buffer_barrier(
        &self,
        device: &mut Device,
        buffer_handle: Handle<Buffer>,
        usage_destination: BufferUsage,
    ) -> Result<()> {
        let buffer = device.buffers.get_mut(buffer_handle)?;
        let barrier = vk_buffer_barrier(buffer, buffer.usage, usage_destination);
        buffer.usage = usage_destination;
        self.pipeline_barrier(&[], &[barrier]);
        Ok(())
    }

    /// Coalesce several transitions into a single pipeline barrier.
    pub fn barriers(
        &self,
        device: &mut Device,
        images: &[(Handle<Image>, ImageUsage)],
        buffers: &[(Handle<Buffer>, BufferUsage)],
    ) -> Result<()> {
        let mut image_barriers = Vec::with_capacity(images.len());
        for (image_handle, usage_destination) in images {
            let image = device.images.get_mut(*image_handle)?;
            image_barriers.push(vk_image_barrier(
                image,
                image_access(image.usage),
                image_access(*usage_destination),
            ));
            image.usage = *usage_destination;
        }
        let mut buffer_barriers = Vec::with_capacity(buffers.len());
        for (buffer_handle, usage_destination) in buffers {
            let buffer = device.buffers.get_mut(*buffer_handle)?;
            buffer_barriers.push(vk_buffer_barrier(buffer, buffer.usage, *usage_destination));
            buffer.usage = *usage_destination;
        }
        self.pipeline_barrier(&image_barriers, &buffer_barriers);
        Ok(())
    }

    fn pipeline_barrier(
        &self,
        image_barriers: &[vk::ImageMemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
    ) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe {
            self.device
                .cmd_pipeline_barrier2(self.command_buffer, &dependency_info)
        };
    }

    // -- Transfer

    pub fn copy_buffer(
        &self,
        device: &Device,
        src: Handle<Buffer>,
        dst: Handle<Buffer>,
        regions: &[vk::BufferCopy],
    ) -> Result<()> {
        let src_buffer = device.buffers.get(src)?;
        let dst_buffer = device.buffers.get(dst)?;
        let full_copy = [vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: src_buffer.desc.size.min(dst_buffer.desc.size),
        }];
        let regions = if regions.is_empty() { &full_copy } else { regions };
        unsafe {
            self.device.cmd_copy_buffer(
                self.command_buffer,
                src_buffer.vkhandle,
                dst_buffer.vkhandle,
                regions,
            )
        };
        Ok(())
    }

    pub fn copy_buffer_to_image(
        &self,
        device: &Device,
        src: Handle<Buffer>,
        dst: Handle<Image>,
        regions: &[vk::BufferImageCopy],
    ) -> Result<()> {
        let src_buffer = device.buffers.get(src)?;
        let dst_image = device.images.get(dst)?;
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src_buffer.vkhandle,
                dst_image.vkhandle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            )
        };
        Ok(())
    }

    pub fn fill_buffer(&self, device: &Device, buffer_handle: Handle<Buffer>, data: u32) -> Result<()> {
        let buffer = device.buffers.get(buffer_handle)?;
        unsafe {
            self.device.cmd_fill_buffer(
                self.command_buffer,
                buffer.vkhandle,
                0,
                vk::WHOLE_SIZE,
                data,
            )
        };
        Ok(())
    }

    /// Full-extent blit from `src` to `dst`.
    pub fn blit_image(&self, device: &Device, src: Handle<Image>, dst: Handle<Image>) -> Result<()> {
        let src_image = device.images.get(src)?;
        let dst_image = device.images.get(dst)?;

        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let regions = [vk::ImageBlit {
            src_subresource: subresource,
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_image.desc.size.x,
                    y: src_image.desc.size.y,
                    z: src_image.desc.size.z,
                },
            ],
            dst_subresource: subresource,
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_image.desc.size.x,
                    y: dst_image.desc.size.y,
                    z: dst_image.desc.size.z,
                },
            ],
        }];
        unsafe {
            self.device.cmd_blit_image(
                self.command_buffer,
                src_image.vkhandle,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image.vkhandle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
                vk::Filter::LINEAR,
            )
        };
        Ok(())
    }

    pub fn clear_image(
        &self,
        device: &Device,
        image_handle: Handle<Image>,
        clear_color: vk::ClearColorValue,
    ) -> Result<()> {
        let image = device.images.get(image_handle)?;
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        unsafe {
            self.device.cmd_clear_color_image(
                self.command_buffer,
                image.vkhandle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_color,
                &[range],
            )
        };
        Ok(())
    }

    // -- Compute

    pub fn bind_compute_pipeline(
        &self,
        device: &Device,
        program_handle: Handle<ComputeProgram>,
    ) -> Result<()> {
        let program = device.compute_programs.get(program_handle)?;
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                program.pipeline,
            )
        };
        Ok(())
    }

    pub fn dispatch(&self, workgroups: UVec3) {
        unsafe {
            self.device.cmd_dispatch(
                self.command_buffer,
                workgroups.x,
                workgroups.y,
                workgroups.z,
            )
        };
    }

    pub fn push_constants(&self, device: &Device, constants: &PushConstants) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                device.pipeline_layout(),
                vk::ShaderStageFlags::ALL,
                0,
                bytemuck::bytes_of(constants),
            )
        };
    }

    // -- Graphics

    pub fn begin_pass(
        &self,
        device: &mut Device,
        framebuffer_handle: Handle<Framebuffer>,
        load_ops: &[LoadOp],
    ) -> Result<()> {
        let render_pass = device.get_or_create_render_pass(framebuffer_handle, load_ops)?;
        let framebuffer: &Framebuffer = device.framebuffers.get(framebuffer_handle)?;

        let clear_values: Vec<vk::ClearValue> =
            load_ops.iter().map(|load_op| load_op.clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer.vkhandle)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: framebuffer.format.size.x as u32,
                    height: framebuffer.format.size.y as u32,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            )
        };
        Ok(())
    }

    pub fn end_pass(&self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    pub fn bind_graphics_pipeline(
        &self,
        device: &Device,
        program_handle: Handle<GraphicsProgram>,
        pipeline_index: usize,
    ) -> Result<()> {
        let program = device.graphics_programs.get(program_handle)?;
        let pipeline = program.pipelines[pipeline_index];
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            )
        };
        Ok(())
    }

    pub fn bind_index_buffer(
        &self,
        device: &Device,
        buffer_handle: Handle<Buffer>,
        index_type: vk::IndexType,
        offset: u64,
    ) -> Result<()> {
        let buffer = device.buffers.get(buffer_handle)?;
        unsafe {
            self.device.cmd_bind_index_buffer(
                self.command_buffer,
                buffer.vkhandle,
                offset,
                index_type,
            )
        };
        Ok(())
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .cmd_set_viewport(self.command_buffer, 0, &[viewport])
        };
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .cmd_set_scissor(self.command_buffer, 0, &[scissor])
        };
    }

    pub fn draw_indexed(&self, options: DrawIndexedOptions) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                options.vertex_count,
                options.instance_count.max(1),
                options.index_offset,
                options.vertex_offset,
                options.instance_offset,
            )
        };
    }

    pub fn draw(&self, options: DrawOptions) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                options.vertex_count,
                options.instance_count.max(1),
                options.vertex_offset as u32,
                options.instance_offset,
            )
        };
    }

    // -- Debug utils

    pub fn begin_debug_label(&self, label: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(label) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label) };
    }

    pub fn end_debug_label(&self) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
    }

    // -- Queries

    pub fn reset_query_pool(&self, query_pool: &QueryPool, first_query: u32, count: u32) {
        unsafe {
            self.device
                .cmd_reset_query_pool(self.command_buffer, query_pool.vkhandle, first_query, count)
        };
    }

    pub fn timestamp_query(&self, query_pool: &QueryPool, index: u32) {
        unsafe {
            self.device.cmd_write_timestamp2(
                self.command_buffer,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                query_pool.vkhandle,
                index,
            )
        };
    }
}
