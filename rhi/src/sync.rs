use ash::vk;
#[cfg(feature = "log-lifetimes")]
use tracing::trace;

use crate::context::Context;
use crate::Result;

/// Binary fence used to gate CPU frame pacing on GPU completion.
#[derive(Debug)]
pub struct Fence {
    handle: vk::Fence,
}

impl Fence {
    pub fn new(context: &Context, flags: vk::FenceCreateFlags) -> Result<Self> {
        let handle = unsafe {
            context
                .device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkFence {:?}", handle);

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn wait(&self, context: &Context, timeout: u64) -> Result<()> {
        unsafe {
            context
                .device
                .wait_for_fences(&[self.handle], true, timeout)?
        };
        Ok(())
    }

    pub fn reset(&self, context: &Context) -> Result<()> {
        unsafe { context.device.reset_fences(&[self.handle])? };
        Ok(())
    }

    pub fn destroy(&mut self, context: &Context) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkFence {:?}", self.handle);

        unsafe { context.device.destroy_fence(self.handle, None) };
        self.handle = vk::Fence::null();
    }
}

pub fn create_semaphore(context: &Context) -> Result<vk::Semaphore> {
    let handle = unsafe {
        context
            .device
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
    };
    Ok(handle)
}
