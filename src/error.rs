//! Error taxonomy for the device seam.
//!
//! Only the [`GpuDevice`](crate::device::GpuDevice) boundary returns a
//! `Result`. Everything above it (the graph, passes, resources) aborts on
//! failure: a broken device or a full handle arena leaves the graph in no
//! state worth recovering from, so we don't pretend otherwise with `?`
//! chains that bottom out in a panic anyway.

use std::path::PathBuf;

use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no memory type satisfies the requested property flags")]
    NoSuitableMemoryType,

    #[error("vulkan call failed: {0:?}")]
    Vulkan(#[from] vk::Result),

    #[error("shader source not found: {0}")]
    ShaderSourceNotFound(PathBuf),
}

/// Unwraps a device `Result`, aborting with the call site and the error on
/// failure. Used at every device call inside the graph so the "why" shows up
/// without every call site hand-rolling its own panic message.
pub(crate) fn abort_on_err<T>(call_site: &str, result: Result<T, DeviceError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("{}: {}", call_site, e),
    }
}
