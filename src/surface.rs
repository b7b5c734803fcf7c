//! Surface adapter (C10): swapchain image acquire/present wrapped as
//! ordinary [`Job`]s so swapchain synchronization composes with everything
//! else `submit` already knows how to wait on.
//!
//! Grounded on `surface.cpp`'s `surface::acquire_next_swapchain_image`/
//! `surface::present`: acquire wraps `vkAcquireNextImageKHR`'s signal
//! semaphore in a job with no command buffer and no submission (nothing
//! was actually submitted to a queue), and present waits on the render
//! job's finished-semaphore before calling `vkQueuePresentKHR`. Window and
//! instance/surface creation are out of scope here, same as in the source
//! (`io_context` wraps GLFW directly and is not part of this crate).

use ash::vk;

use crate::device::GpuDevice;
use crate::error::abort_on_err;
use crate::graph::Graph;
use crate::sync_pool::Job;

/// A swapchain plus the handful of properties the graph core needs to
/// know about it.
pub struct Surface {
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    image_count: u32,
}

impl Surface {
    pub fn new(swapchain: vk::SwapchainKHR, format: vk::Format, extent: vk::Extent2D, image_count: u32) -> Surface {
        Surface {
            swapchain,
            format,
            extent,
            image_count,
        }
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Acquires the next swapchain image index, returning it alongside a
    /// job whose finished-semaphore signals once the acquire completes —
    /// pass that job as a dependency to whichever `submit` call renders
    /// into the image.
    pub fn acquire_next_image<D: GpuDevice>(&self, graph: &mut Graph<D>) -> (Job, u32) {
        let job = graph.new_acquire_job();
        let index = abort_on_err(
            "acquire_next_image",
            graph.device().acquire_next_image(self.swapchain, job.finished_semaphore),
        );
        (job, index)
    }

    /// Presents `image_index`, waiting on `render_job`'s finished-semaphore.
    /// The caller is responsible for having recorded an
    /// [`crate::graph::Graph::add_present_ready`] transfer op on that image
    /// before submitting `render_job` — presenting an image still in a
    /// shader-read or attachment layout is a validation error the device
    /// layer will catch, not something this adapter guards against.
    pub fn present<D: GpuDevice>(&self, graph: &Graph<D>, render_job: &Job, image_index: u32) {
        abort_on_err(
            "present",
            graph.device().present(self.swapchain, image_index, render_job.finished_semaphore),
        );
    }
}
