use std::ptr::NonNull;

use gpu_allocator::MemoryLocation;
use karst_containers::Handle;
use tracing::warn;

use ash::vk;

use crate::buffer::{Buffer, BufferDescription};
use crate::device::Device;
use crate::Result;
use crate::RhiError;

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Frame-queued ring arithmetic, separated from the GPU buffer so the
/// reclamation policy is plain state.
///
/// `head` and the per-frame starts are monotonic byte counters; the actual
/// byte offset is `head % capacity`. A request fails soft (`None`) when it
/// would reach into bytes still owned by a frame that may be in flight.
#[derive(Debug)]
pub struct RingAllocator {
    capacity: usize,
    head: usize,
    frame_starts: Vec<usize>,
    i_frame: u64,
}

impl RingAllocator {
    pub fn new(capacity: usize, frame_queue_length: usize) -> Self {
        debug_assert!(frame_queue_length >= 1);
        Self {
            capacity,
            head: 0,
            frame_starts: vec![0; frame_queue_length],
            i_frame: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame(&self) -> u64 {
        self.i_frame
    }

    /// Enter the next frame: the window that was recorded
    /// `frame_queue_length` frames ago becomes reclaimable.
    pub fn start_frame(&mut self) {
        self.i_frame += 1;
        let slot = self.i_frame as usize % self.frame_starts.len();
        self.frame_starts[slot] = self.head;
    }

    /// Byte offset for `size` bytes, or `None` when the request would
    /// overlap a window still referenced by an in-flight frame.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<usize> {
        if size == 0 || size > self.capacity {
            return None;
        }

        let mut head = align_up(self.head, alignment);
        // Never hand out a slice that straddles the wrap point.
        if head % self.capacity + size > self.capacity {
            head += self.capacity - head % self.capacity;
        }

        let oldest_live_start =
            self.frame_starts[(self.i_frame as usize + 1) % self.frame_starts.len()];
        if head + size > oldest_live_start + self.capacity {
            return None;
        }

        self.head = head + size;
        Some(head % self.capacity)
    }
}

#[derive(Debug, Clone)]
pub struct RingBufferDescription {
    pub name: String,
    pub size: usize,
    pub usage: vk::BufferUsageFlags,
    pub frame_queue_length: usize,
}

/// Host-visible GPU ring buffer for per-frame transient data: uniforms,
/// dynamic geometry and staging uploads.
pub struct RingBuffer {
    pub name: String,
    pub buffer: Handle<Buffer>,
    mapped_ptr: NonNull<u8>,
    allocator: RingAllocator,
}

impl RingBuffer {
    pub fn new(device: &mut Device, desc: RingBufferDescription) -> Result<Self> {
        let buffer = device.create_buffer(BufferDescription {
            name: desc.name.clone(),
            size: desc.size as u64,
            usage: desc.usage,
            memory_location: MemoryLocation::CpuToGpu,
        })?;
        let mapped_ptr = device
            .buffers
            .get(buffer)?
            .mapped_ptr
            .ok_or(RhiError::NoMappedPointer)?;

        Ok(Self {
            name: desc.name,
            buffer,
            mapped_ptr: mapped_ptr.cast(),
            allocator: RingAllocator::new(desc.size, desc.frame_queue_length),
        })
    }

    pub fn start_frame(&mut self) {
        self.allocator.start_frame();
    }

    /// A mapped slice and its byte offset in the buffer. An empty result
    /// means the caller should skip this upload for the frame.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<(&mut [u8], u32)> {
        match self.allocator.allocate(size, alignment) {
            Some(offset) => {
                let slice = unsafe {
                    std::slice::from_raw_parts_mut(self.mapped_ptr.as_ptr().add(offset), size)
                };
                Some((slice, offset as u32))
            }
            None => {
                warn!(
                    ring = %self.name,
                    size, "ring buffer overflow, skipping upload this frame"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: usize = 1024;

    #[test]
    fn test_fill_then_soft_fail_then_recycle() {
        let mut ring = RingAllocator::new(128 * KIB, 2);

        assert_eq!(ring.allocate(64 * KIB, 1), Some(0));
        assert_eq!(ring.allocate(64 * KIB, 1), Some(64 * KIB));
        // The buffer is full of frame-0 data.
        assert_eq!(ring.allocate(KIB, 1), None);

        ring.start_frame();
        ring.start_frame();
        // Frame 0 is now reclaimable, the ring wraps back to the start.
        assert_eq!(ring.allocate(KIB, 1), Some(0));
    }

    #[test]
    fn test_consecutive_frames_never_alias() {
        let mut ring = RingAllocator::new(64 * KIB, 2);
        let mut previous_frame: Vec<(usize, usize)> = Vec::new();

        for _ in 0..16 {
            let mut current_frame = Vec::new();
            for _ in 0..3 {
                if let Some(offset) = ring.allocate(4 * KIB, 64) {
                    current_frame.push((offset, 4 * KIB));
                }
            }
            for (offset_a, size_a) in &current_frame {
                for (offset_b, size_b) in &previous_frame {
                    let disjoint =
                        offset_a + size_a <= *offset_b || offset_b + size_b <= *offset_a;
                    assert!(disjoint, "frames k and k+1 share bytes");
                }
            }
            previous_frame = current_frame;
            ring.start_frame();
        }
    }

    #[test]
    fn test_alignment() {
        let mut ring = RingAllocator::new(64 * KIB, 2);
        assert_eq!(ring.allocate(10, 1), Some(0));
        assert_eq!(ring.allocate(16, 256), Some(256));
        // Head sits at 272, the next 64-aligned offset is 320.
        assert_eq!(ring.allocate(16, 64), Some(320));
    }

    #[test]
    fn test_never_straddles_wrap() {
        let mut ring = RingAllocator::new(16 * KIB, 2);
        assert_eq!(ring.allocate(12 * KIB, 1), Some(0));
        ring.start_frame();
        ring.start_frame();
        // 8 KiB does not fit in the 4 KiB tail, it wraps to offset 0.
        let offset = ring.allocate(8 * KIB, 1).unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_oversized_request_fails_soft() {
        let mut ring = RingAllocator::new(4 * KIB, 2);
        assert_eq!(ring.allocate(8 * KIB, 1), None);
        assert_eq!(ring.allocate(0, 1), None);
        // The failed requests did not consume space.
        assert_eq!(ring.allocate(KIB, 1), Some(0));
    }

    #[test]
    fn test_longer_frame_queue_delays_reuse() {
        let mut ring = RingAllocator::new(8 * KIB, 3);
        assert_eq!(ring.allocate(8 * KIB, 1), Some(0));

        ring.start_frame();
        ring.start_frame();
        // Frame 0 may still be in flight with a queue length of 3.
        assert_eq!(ring.allocate(KIB, 1), None);

        ring.start_frame();
        assert_eq!(ring.allocate(KIB, 1), Some(0));
    }
}
