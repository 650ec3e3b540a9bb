// Fence-guarded submission
//
// One batch, one fence, one blocking wait with a timeout. The fence is
// destroyed on every path out of `submit_and_wait` except a timeout, where
// the GPU may still signal it and it is leaked instead.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::time::{Duration, Instant};
use super::VulkanDevice;

/// How a fence wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
    Failed(vk::Result),
}

impl FenceWait {
    pub fn from_result(result: VkResult<()>) -> Self {
        match result {
            Ok(()) => FenceWait::Signaled,
            Err(vk::Result::TIMEOUT) => FenceWait::TimedOut,
            Err(e) => FenceWait::Failed(e),
        }
    }

    /// Whether the GPU is done with the fence and it can be destroyed
    pub fn fence_released(&self) -> bool {
        !matches!(self, FenceWait::TimedOut)
    }
}

/// Submit `cmd` to the compute queue and block until it completes.
///
/// Returns how long the wait took.
pub fn submit_and_wait(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    timeout_ns: u64,
) -> Result<Duration> {
    let fence_info = vk::FenceCreateInfo::builder(); // unsignaled
    let fence = unsafe {
        device.device.create_fence(&fence_info, None)
            .context("Failed to create fence")?
    };

    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::builder()
        .command_buffers(&command_buffers);

    let start = Instant::now();
    let submitted = unsafe {
        device.device.queue_submit(device.compute_queue, &[submit_info.build()], fence)
    };
    if let Err(e) = submitted {
        unsafe { device.device.destroy_fence(fence, None) };
        return Err(e).context("Failed to submit command buffer");
    }

    log::info!("Waiting for fence...");
    let waited = FenceWait::from_result(unsafe {
        device.device.wait_for_fences(&[fence], true, timeout_ns)
    });
    let elapsed = start.elapsed();

    if waited.fence_released() {
        unsafe { device.device.destroy_fence(fence, None) };
    } else {
        log::warn!("Leaking fence still owned by the pending dispatch");
    }

    match waited {
        FenceWait::Signaled => {
            log::info!("Done waiting for fence ({:?})", elapsed);
            Ok(elapsed)
        }
        FenceWait::TimedOut => anyhow::bail!(
            "Timed out after {:?} waiting for the compute fence",
            Duration::from_nanos(timeout_ns)
        ),
        FenceWait::Failed(e) => Err(e).context("Failed to wait for fence"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_keeps_fence_alive() {
        let waited = FenceWait::from_result(Err(vk::Result::TIMEOUT));
        assert_eq!(waited, FenceWait::TimedOut);
        assert!(!waited.fence_released());
    }

    #[test]
    fn signaled_and_failed_release_fence() {
        assert!(FenceWait::from_result(Ok(())).fence_released());

        let lost = FenceWait::from_result(Err(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(lost, FenceWait::Failed(vk::Result::ERROR_DEVICE_LOST));
        assert!(lost.fence_released());
    }
}
