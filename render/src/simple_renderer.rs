use std::path::PathBuf;

use anyhow::Result;
use glam::IVec3;
use karst_containers::Handle;
use karst_rhi::buffer::{index_buffer_usage, source_buffer_usage, storage_buffer_usage, uniform_buffer_usage};
use karst_rhi::context::{Context, ContextDescription};
use karst_rhi::device::{Device, DeviceDescription};
use karst_rhi::image::ImageUsage;
use karst_rhi::ring_buffer::{RingBuffer, RingBufferDescription};
use karst_rhi::surface::Surface;
use karst_rhi::sync::Fence;
use karst_rhi::vk;
use karst_rhi::work::{QueryPool, WorkPool};
use karst_rhi::wsi::RhiWindow;
use karst_rhi::FRAME_QUEUE_LENGTH;
use karst_rhi::raw_window_handle::HasDisplayHandle;
use tracing::warn;

use crate::graph::{PassApi, RenderGraph, TextureDesc, TextureSize};

#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub app_name: String,
    pub enable_validation: bool,
    pub shader_dir: PathBuf,
    pub uniform_buffer_size: usize,
    pub dynamic_vertex_buffer_size: usize,
    pub dynamic_index_buffer_size: usize,
    pub upload_buffer_size: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            app_name: String::from("karst"),
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            uniform_buffer_size: 1 << 20,
            dynamic_vertex_buffer_size: 8 << 20,
            dynamic_index_buffer_size: 8 << 20,
            upload_buffer_size: 32 << 20,
        }
    }
}

/// Frame driver: device, surface, per-frame work pools and fences, the four
/// transient ring buffers and the render graph.
///
/// A frame is `start_frame`, client passes on `render_graph`, then `render`,
/// which appends the present pass, records, submits and presents.
pub struct SimpleRenderer {
    pub device: Device,
    pub surface: Surface,
    work_pools: Vec<WorkPool>,
    fences: Vec<Fence>,
    fence_submitted: Vec<bool>,
    pub uniform_buffer: RingBuffer,
    pub dynamic_vertex_buffer: RingBuffer,
    pub dynamic_index_buffer: RingBuffer,
    pub upload_buffer: RingBuffer,
    pub render_graph: RenderGraph,
    pub shader_dir: PathBuf,
    timestamp_pool: QueryPool,
    timestamp_period_ns: f32,
    last_gpu_frame_ms: Option<f32>,
    frame_count: u64,
    time: f32,
}

/// Frame-begin and frame-end timestamp queries of a frame-queue slot.
fn timestamp_query_range(slot: usize) -> (u32, u32) {
    ((2 * slot) as u32, (2 * slot + 1) as u32)
}

fn timestamps_to_ms(begin_ticks: u64, end_ticks: u64, period_ns: f32) -> f32 {
    end_ticks.saturating_sub(begin_ticks) as f32 * period_ns / 1_000_000.0
}

impl SimpleRenderer {
    pub fn new(window: &impl RhiWindow, options: &RendererOptions) -> Result<Self> {
        let context = Context::new(&ContextDescription {
            app_name: options.app_name.clone(),
            enable_validation: options.enable_validation,
            display_handle: Some(window.display_handle()?.as_raw()),
        })?;
        let mut device = Device::new(context, &DeviceDescription::default())?;
        let surface = Surface::new(&mut device, window)?;

        let uniform_buffer = RingBuffer::new(
            &mut device,
            RingBufferDescription {
                name: String::from("Uniforms"),
                size: options.uniform_buffer_size,
                usage: uniform_buffer_usage(),
                frame_queue_length: FRAME_QUEUE_LENGTH,
            },
        )?;
        let dynamic_vertex_buffer = RingBuffer::new(
            &mut device,
            RingBufferDescription {
                name: String::from("Dynamic vertices"),
                size: options.dynamic_vertex_buffer_size,
                usage: storage_buffer_usage(),
                frame_queue_length: FRAME_QUEUE_LENGTH,
            },
        )?;
        let dynamic_index_buffer = RingBuffer::new(
            &mut device,
            RingBufferDescription {
                name: String::from("Dynamic indices"),
                size: options.dynamic_index_buffer_size,
                usage: index_buffer_usage(),
                frame_queue_length: FRAME_QUEUE_LENGTH,
            },
        )?;
        let upload_buffer = RingBuffer::new(
            &mut device,
            RingBufferDescription {
                name: String::from("Uploads"),
                size: options.upload_buffer_size,
                usage: source_buffer_usage(),
                frame_queue_length: FRAME_QUEUE_LENGTH,
            },
        )?;

        device.set_options_buffer(uniform_buffer.buffer)?;
        device.update_globals();

        let mut work_pools = Vec::with_capacity(FRAME_QUEUE_LENGTH);
        let mut fences = Vec::with_capacity(FRAME_QUEUE_LENGTH);
        for _ in 0..FRAME_QUEUE_LENGTH {
            work_pools.push(WorkPool::new(&device.context)?);
            fences.push(Fence::new(&device.context, vk::FenceCreateFlags::empty())?);
        }

        // Two timestamps per in-flight frame bracket the GPU work.
        let timestamp_pool =
            QueryPool::new_timestamp(&device.context, (2 * FRAME_QUEUE_LENGTH) as u32)?;
        let timestamp_period_ns = device
            .context
            .physical_device_properties
            .limits
            .timestamp_period;

        Ok(Self {
            device,
            surface,
            work_pools,
            fences,
            fence_submitted: vec![false; FRAME_QUEUE_LENGTH],
            uniform_buffer,
            dynamic_vertex_buffer,
            dynamic_index_buffer,
            upload_buffer,
            render_graph: RenderGraph::new(),
            shader_dir: options.shader_dir.clone(),
            timestamp_pool,
            timestamp_period_ns,
            last_gpu_frame_ms: None,
            frame_count: 0,
            time: 0.0,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// GPU time of the most recently completed frame, when its timestamps
    /// have been read back.
    pub fn gpu_frame_time_ms(&self) -> Option<f32> {
        self.last_gpu_frame_ms
    }

    fn frame_slot(&self) -> usize {
        (self.frame_count % FRAME_QUEUE_LENGTH as u64) as usize
    }

    /// Wait for the frame-queue-length-old frame, then recycle its work pool
    /// and advance the ring buffers.
    pub fn start_frame(&mut self) -> Result<()> {
        let slot = self.frame_slot();
        if self.fence_submitted[slot] {
            self.fences[slot].wait(&self.device.context, u64::MAX)?;
            self.fences[slot].reset(&self.device.context)?;
            self.fence_submitted[slot] = false;

            // The slot's frame has fully completed, its timestamps are ready.
            let (begin_query, _) = timestamp_query_range(slot);
            if let Ok(ticks) = self
                .timestamp_pool
                .results(&self.device.context, begin_query, 2)
            {
                self.last_gpu_frame_ms =
                    Some(timestamps_to_ms(ticks[0], ticks[1], self.timestamp_period_ns));
            }
        }

        self.device.begin_frame();
        self.work_pools[slot].reset(&self.device.context)?;

        self.uniform_buffer.start_frame();
        self.dynamic_vertex_buffer.start_frame();
        self.dynamic_index_buffer.start_frame();
        self.upload_buffer.start_frame();

        // Frame-begin timestamp, recorded ahead of every client pass.
        let timestamp_pool = self.timestamp_pool;
        let (begin_query, _) = timestamp_query_range(slot);
        self.render_graph.raw_pass(move |_graph, _api, work| {
            work.reset_query_pool(&timestamp_pool, begin_query, 2);
            work.timestamp_query(&timestamp_pool, begin_query);
            Ok(())
        });
        Ok(())
    }

    /// Record and submit the frame, blitting `output` to the swapchain.
    pub fn render(&mut self, output: Handle<TextureDesc>, dt: f32) -> Result<()> {
        // Acquire the swapchain image, recreating on out-of-date.
        let mut attempts = 0;
        loop {
            let is_outdated = self.device.acquire_next_swapchain(&mut self.surface)?;
            if !is_outdated {
                break;
            }
            self.surface.recreate_swapchain(&mut self.device)?;
            attempts += 1;
            if attempts > 2 {
                warn!("swapchain still out of date after recreation, dropping frame");
                self.render_graph.reset_frame();
                return Ok(());
            }
        }

        let slot = self.frame_slot();

        // Present pass: blit the client's output into the swapchain image.
        let swapchain_desc = self.render_graph.output(TextureDesc::new(
            "Swapchain",
            TextureSize::Absolute(IVec3::new(self.surface.size.x, self.surface.size.y, 1)),
            self.surface.format.format,
        ));
        self.render_graph.resources.set_image(
            &self.device,
            swapchain_desc,
            self.surface.current_image_handle(),
        );
        let timestamp_pool = self.timestamp_pool;
        let (_, end_query) = timestamp_query_range(slot);
        self.render_graph.raw_pass(move |graph, api, work| {
            work.begin_debug_label("Present blit");
            let (output_image, _) = graph.resources.resolve_image(api.device, output)?;
            let (swapchain_image, _) = graph.resources.resolve_image(api.device, swapchain_desc)?;
            // Raw passes may have written the output outside the tracked
            // usage states.
            work.absolute_barrier(api.device, output_image)?;
            work.barrier(api.device, output_image, ImageUsage::TransferSrc)?;
            // The blit overwrites the whole image, whatever the presentation
            // engine left there can be discarded.
            work.clear_barrier(api.device, swapchain_image, ImageUsage::TransferDst)?;
            work.blit_image(api.device, output_image, swapchain_image)?;
            work.barrier(api.device, swapchain_image, ImageUsage::Present)?;
            work.timestamp_query(&timestamp_pool, end_query);
            work.end_debug_label();
            Ok(())
        });
        let mut api = PassApi {
            device: &mut self.device,
            uniform_buffer: &mut self.uniform_buffer,
            dynamic_vertex_buffer: &mut self.dynamic_vertex_buffer,
            dynamic_index_buffer: &mut self.dynamic_index_buffer,
            upload_buffer: &mut self.upload_buffer,
        };
        let mut work = self
            .render_graph
            .execute(&mut api, &mut self.work_pools[slot])?;
        drop(api);

        // The first use of the acquired image is the present blit.
        work.wait_for_acquired(&self.surface, vk::PipelineStageFlags2::TRANSFER);
        work.prepare_present(&self.surface);

        self.device.submit(&work, &self.fences[slot])?;
        self.fence_submitted[slot] = true;

        let is_outdated = self.device.present(&self.surface)?;
        if is_outdated {
            self.surface.recreate_swapchain(&mut self.device)?;
        }

        self.frame_count += 1;
        self.time += dt;
        Ok(())
    }
}

impl Drop for SimpleRenderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        for work_pool in &mut self.work_pools {
            work_pool.destroy(&self.device.context);
        }
        for fence in &mut self.fences {
            fence.destroy(&self.device.context);
        }
        self.timestamp_pool.destroy(&self.device.context);
        self.surface.destroy(&mut self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_queries_per_slot_are_disjoint() {
        let mut seen = Vec::new();
        for slot in 0..FRAME_QUEUE_LENGTH {
            let (begin_query, end_query) = timestamp_query_range(slot);
            assert_eq!(end_query, begin_query + 1);
            assert!(!seen.contains(&begin_query));
            assert!(!seen.contains(&end_query));
            seen.push(begin_query);
            seen.push(end_query);
        }
        // Everything fits the pool created for the frame queue.
        assert!(seen.iter().all(|query| *query < (2 * FRAME_QUEUE_LENGTH) as u32));
    }

    #[test]
    fn test_timestamps_to_ms() {
        // 1000 ticks at 1000 ns per tick is a millisecond.
        assert!((timestamps_to_ms(500, 1500, 1000.0) - 1.0).abs() < 1e-6);
        assert!((timestamps_to_ms(0, 0, 1000.0)).abs() < 1e-6);
        // An unwritten or wrapped pair never goes negative.
        assert_eq!(timestamps_to_ms(100, 0, 1000.0), 0.0);
    }
}
