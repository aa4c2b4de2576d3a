use ash::vk;

use crate::context::Context;
use crate::Result;
use crate::RhiError;

pub const MAX_SAMPLED_IMAGES: u32 = 1024;
pub const MAX_STORAGE_IMAGES: u32 = 1024;
pub const MAX_SAMPLERS: u32 = 64;
pub const MAX_STORAGE_BUFFERS: u32 = 4096;

/// Set indices shared with every shader.
pub const GLOBAL_UNIFORM_SET: u32 = 0;
pub const GLOBAL_SAMPLER_SET: u32 = 1;
pub const GLOBAL_IMAGE_SET: u32 = 2;
pub const GLOBAL_BUFFER_SET: u32 = 3;

/// Free-list of bindless array slots.
#[derive(Debug, Default)]
pub struct FreeIndices {
    next: u32,
    capacity: u32,
    free: Vec<u32>,
}

impl FreeIndices {
    pub fn new(capacity: u32) -> Self {
        Self {
            next: 0,
            capacity,
            free: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(index) = self.free.pop() {
            return Some(index);
        }
        if self.next >= self.capacity {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.next);
        self.free.push(index);
    }
}

#[derive(Debug)]
enum PendingWrite {
    SampledImage {
        index: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    Sampler {
        index: u32,
        sampler: vk::Sampler,
    },
    StorageImage {
        index: u32,
        view: vk::ImageView,
    },
    StorageBuffer {
        index: u32,
        buffer: vk::Buffer,
        range: u64,
    },
}

/// The global descriptor sets every pipeline binds: one dynamic uniform block
/// and the bindless arrays for sampled images, samplers, storage images and
/// storage buffers.
///
/// Binds are queued and written in bulk by [`flush`](BindlessSet::flush),
/// which backs `Device::update_globals`.
pub struct BindlessSet {
    pool: vk::DescriptorPool,
    pub uniform_layout: vk::DescriptorSetLayout,
    pub sampler_layout: vk::DescriptorSetLayout,
    pub image_layout: vk::DescriptorSetLayout,
    pub buffer_layout: vk::DescriptorSetLayout,
    pub uniform_set: vk::DescriptorSet,
    pub sampler_set: vk::DescriptorSet,
    pub image_set: vk::DescriptorSet,
    pub buffer_set: vk::DescriptorSet,
    sampled_image_indices: FreeIndices,
    sampler_indices: FreeIndices,
    storage_image_indices: FreeIndices,
    storage_buffer_indices: FreeIndices,
    pending_writes: Vec<PendingWrite>,
}

fn bindless_flags() -> vk::DescriptorBindingFlags {
    vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
}

fn create_array_layout(
    context: &Context,
    descriptor_type: vk::DescriptorType,
    count: u32,
) -> Result<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(descriptor_type)
        .descriptor_count(count)
        .stage_flags(vk::ShaderStageFlags::ALL)];
    let binding_flags = [bindless_flags()];
    let mut flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
        .binding_flags(&binding_flags);
    let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&bindings)
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .push_next(&mut flags_ci);
    Ok(unsafe {
        context
            .device
            .create_descriptor_set_layout(&layout_ci, None)?
    })
}

impl BindlessSet {
    pub fn new(context: &Context) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_SAMPLED_IMAGES),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(MAX_SAMPLERS),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(MAX_STORAGE_IMAGES),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(MAX_STORAGE_BUFFERS),
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(4)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { context.device.create_descriptor_pool(&pool_ci, None)? };

        let uniform_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL)];
        let uniform_layout_ci =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&uniform_bindings);
        let uniform_layout = unsafe {
            context
                .device
                .create_descriptor_set_layout(&uniform_layout_ci, None)?
        };

        // Set 1 carries both the combined image array and the raw samplers.
        let sampler_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_SAMPLED_IMAGES)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(MAX_SAMPLERS)
                .stage_flags(vk::ShaderStageFlags::ALL),
        ];
        let sampler_binding_flags = [bindless_flags(), bindless_flags()];
        let mut sampler_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&sampler_binding_flags);
        let sampler_layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&sampler_bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut sampler_flags_ci);
        let sampler_layout = unsafe {
            context
                .device
                .create_descriptor_set_layout(&sampler_layout_ci, None)?
        };

        let image_layout =
            create_array_layout(context, vk::DescriptorType::STORAGE_IMAGE, MAX_STORAGE_IMAGES)?;
        let buffer_layout = create_array_layout(
            context,
            vk::DescriptorType::STORAGE_BUFFER,
            MAX_STORAGE_BUFFERS,
        )?;

        let layouts = [uniform_layout, sampler_layout, image_layout, buffer_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { context.device.allocate_descriptor_sets(&allocate_info)? };

        Ok(Self {
            pool,
            uniform_layout,
            sampler_layout,
            image_layout,
            buffer_layout,
            uniform_set: sets[0],
            sampler_set: sets[1],
            image_set: sets[2],
            buffer_set: sets[3],
            sampled_image_indices: FreeIndices::new(MAX_SAMPLED_IMAGES),
            sampler_indices: FreeIndices::new(MAX_SAMPLERS),
            storage_image_indices: FreeIndices::new(MAX_STORAGE_IMAGES),
            storage_buffer_indices: FreeIndices::new(MAX_STORAGE_BUFFERS),
            pending_writes: Vec::new(),
        })
    }

    pub fn layouts(&self) -> [vk::DescriptorSetLayout; 4] {
        [
            self.uniform_layout,
            self.sampler_layout,
            self.image_layout,
            self.buffer_layout,
        ]
    }

    pub fn sets(&self) -> [vk::DescriptorSet; 4] {
        [
            self.uniform_set,
            self.sampler_set,
            self.image_set,
            self.buffer_set,
        ]
    }

    /// Point the dynamic uniform binding at the per-frame options buffer.
    /// Written immediately, the buffer outlives every frame.
    pub fn set_uniform_buffer(&self, context: &Context, buffer: vk::Buffer, range: u64) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.uniform_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&buffer_info);
        unsafe { context.device.update_descriptor_sets(&[write], &[]) };
    }

    pub fn bind_sampled_image(
        &mut self,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Result<u32> {
        let index = self
            .sampled_image_indices
            .allocate()
            .ok_or(RhiError::BindlessArrayFull)?;
        self.pending_writes.push(PendingWrite::SampledImage {
            index,
            view,
            sampler,
            layout,
        });
        Ok(index)
    }

    pub fn bind_sampler(&mut self, sampler: vk::Sampler) -> Result<u32> {
        let index = self
            .sampler_indices
            .allocate()
            .ok_or(RhiError::BindlessArrayFull)?;
        self.pending_writes
            .push(PendingWrite::Sampler { index, sampler });
        Ok(index)
    }

    pub fn bind_storage_image(&mut self, view: vk::ImageView) -> Result<u32> {
        let index = self
            .storage_image_indices
            .allocate()
            .ok_or(RhiError::BindlessArrayFull)?;
        self.pending_writes
            .push(PendingWrite::StorageImage { index, view });
        Ok(index)
    }

    pub fn bind_storage_buffer(&mut self, buffer: vk::Buffer, range: u64) -> Result<u32> {
        let index = self
            .storage_buffer_indices
            .allocate()
            .ok_or(RhiError::BindlessArrayFull)?;
        self.pending_writes.push(PendingWrite::StorageBuffer {
            index,
            buffer,
            range,
        });
        Ok(index)
    }

    pub fn unbind_sampled_image(&mut self, index: u32) {
        self.pending_writes.retain(|write| {
            !matches!(write, PendingWrite::SampledImage { index: pending, .. } if *pending == index)
        });
        self.sampled_image_indices.release(index);
    }

    pub fn unbind_storage_image(&mut self, index: u32) {
        self.pending_writes.retain(|write| {
            !matches!(write, PendingWrite::StorageImage { index: pending, .. } if *pending == index)
        });
        self.storage_image_indices.release(index);
    }

    pub fn unbind_storage_buffer(&mut self, index: u32) {
        self.pending_writes.retain(|write| {
            !matches!(write, PendingWrite::StorageBuffer { index: pending, .. } if *pending == index)
        });
        self.storage_buffer_indices.release(index);
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_writes.is_empty()
    }

    /// Flush queued binds into the descriptor arrays.
    pub fn flush(&mut self, context: &Context) {
        if self.pending_writes.is_empty() {
            return;
        }

        let mut image_infos = Vec::new();
        let mut buffer_infos = Vec::new();
        for write in &self.pending_writes {
            match write {
                PendingWrite::SampledImage {
                    view,
                    sampler,
                    layout,
                    ..
                } => image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .sampler(*sampler)
                        .image_view(*view)
                        .image_layout(*layout),
                ),
                PendingWrite::Sampler { sampler, .. } => {
                    image_infos.push(vk::DescriptorImageInfo::default().sampler(*sampler))
                }
                PendingWrite::StorageImage { view, .. } => image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .image_layout(vk::ImageLayout::GENERAL),
                ),
                PendingWrite::StorageBuffer { buffer, range, .. } => buffer_infos.push(
                    vk::DescriptorBufferInfo::default()
                        .buffer(*buffer)
                        .offset(0)
                        .range(*range),
                ),
            }
        }

        let mut writes = Vec::with_capacity(self.pending_writes.len());
        let mut i_image = 0;
        let mut i_buffer = 0;
        for write in &self.pending_writes {
            match write {
                PendingWrite::SampledImage { index, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(self.sampler_set)
                            .dst_binding(0)
                            .dst_array_element(*index)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(std::slice::from_ref(&image_infos[i_image])),
                    );
                    i_image += 1;
                }
                PendingWrite::Sampler { index, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(self.sampler_set)
                            .dst_binding(1)
                            .dst_array_element(*index)
                            .descriptor_type(vk::DescriptorType::SAMPLER)
                            .image_info(std::slice::from_ref(&image_infos[i_image])),
                    );
                    i_image += 1;
                }
                PendingWrite::StorageImage { index, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(self.image_set)
                            .dst_binding(0)
                            .dst_array_element(*index)
                            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                            .image_info(std::slice::from_ref(&image_infos[i_image])),
                    );
                    i_image += 1;
                }
                PendingWrite::StorageBuffer { index, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::default()
                            .dst_set(self.buffer_set)
                            .dst_binding(0)
                            .dst_array_element(*index)
                            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[i_buffer])),
                    );
                    i_buffer += 1;
                }
            }
        }

        unsafe { context.device.update_descriptor_sets(&writes, &[]) };
        self.pending_writes.clear();
    }

    pub fn destroy(&mut self, context: &Context) {
        unsafe {
            context.device.destroy_descriptor_pool(self.pool, None);
            context
                .device
                .destroy_descriptor_set_layout(self.uniform_layout, None);
            context
                .device
                .destroy_descriptor_set_layout(self.sampler_layout, None);
            context
                .device
                .destroy_descriptor_set_layout(self.image_layout, None);
            context
                .device
                .destroy_descriptor_set_layout(self.buffer_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_sequential() {
        let mut indices = FreeIndices::new(4);
        assert_eq!(indices.allocate(), Some(0));
        assert_eq!(indices.allocate(), Some(1));
        assert_eq!(indices.allocate(), Some(2));
    }

    #[test]
    fn test_released_index_is_reused() {
        let mut indices = FreeIndices::new(4);
        let first = indices.allocate().unwrap();
        let _second = indices.allocate().unwrap();
        indices.release(first);
        assert_eq!(indices.allocate(), Some(first));
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut indices = FreeIndices::new(2);
        assert!(indices.allocate().is_some());
        assert!(indices.allocate().is_some());
        assert!(indices.allocate().is_none());

        indices.release(1);
        assert_eq!(indices.allocate(), Some(1));
    }
}
