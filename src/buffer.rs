//! GPU buffer (C3): lazily-allocated device memory + descriptor sets.
//!
//! Grounded on `gpu_buffer.cpp`/`gpu_buffer.hpp`: `configure` accumulates
//! usage flags additively and never allocates; `alloc` is the idempotent
//! commit step; `map` implicitly commits an unconfigured-for-host buffer as
//! host-visible before returning its view.

use ash::vk;

use crate::binding::{BindingKind, UsageNode};
use crate::descriptor_cache::DescriptorLayoutCache;
use crate::device::GpuDevice;
use crate::error::abort_on_err;

#[derive(Copy, Clone, Debug, Default)]
pub struct BufferInfo {
    pub kind: Option<BindingKind>,
    pub size: vk::DeviceSize,
    pub host_visible: bool,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) enum Action {
    ToCreate,
    None,
}

struct Committed {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

pub struct GpuBuffer {
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    host_visible: bool,
    committed: Option<Committed>,
    storage_set: Option<vk::DescriptorSet>,
    uniform_set: Option<vk::DescriptorSet>,
    pub(crate) current_access: vk::AccessFlags,
    pub(crate) last_stage: vk::PipelineStageFlags,
    pub(crate) head: UsageNode,
    pub(crate) tail: UsageNode,
    pub(crate) was_used_this_job: bool,
    pub(crate) action: Action,
}

impl GpuBuffer {
    pub fn new() -> GpuBuffer {
        GpuBuffer {
            size: 0,
            usage: vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            host_visible: false,
            committed: None,
            storage_set: None,
            uniform_set: None,
            current_access: vk::AccessFlags::empty(),
            last_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            head: UsageNode::INVALID,
            tail: UsageNode::INVALID,
            was_used_this_job: false,
            action: Action::None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    pub(crate) fn raw(&self) -> vk::Buffer {
        self.committed.as_ref().expect("buffer not yet committed").buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Additive: accumulates usage flags, records size if non-zero (shrink
    /// is not supported), sticky-sets `host_visible`. Never allocates.
    pub fn configure(&mut self, info: &BufferInfo) {
        if let Some(kind) = info.kind {
            self.usage |= usage_for_kind(kind);
        }
        if info.size != 0 {
            assert!(
                self.committed.is_none() || info.size <= self.size,
                "GpuBuffer::configure: shrinking a committed buffer is not supported"
            );
            self.size = self.size.max(info.size);
        }
        self.host_visible |= info.host_visible;
    }

    /// Called during prepare for every binding that targets this buffer:
    /// marks it `to_create` if not yet committed, and folds in the usage
    /// flags implied by `kind`.
    pub(crate) fn update_action(&mut self, kind: BindingKind) {
        self.action = if self.committed.is_none() {
            Action::ToCreate
        } else {
            Action::None
        };
        self.usage |= usage_for_kind(kind);
    }

    /// Idempotent: no-op if already committed.
    pub fn alloc<D: GpuDevice>(&mut self, device: &D) {
        if self.committed.is_some() {
            return;
        }
        assert!(self.size > 0, "size=0");
        let (buffer, memory) = abort_on_err(
            "create_buffer",
            device.create_buffer(self.size, self.usage, self.host_visible),
        );
        info!("created buffer ({} bytes, usage={:?})", self.size, self.usage);
        self.committed = Some(Committed { buffer, memory });
    }

    /// Ensures a descriptor set exists for every accumulated buffer
    /// descriptor kind (storage/uniform), writing it to point at the
    /// committed buffer.
    pub(crate) fn apply_action<D: GpuDevice>(&mut self, device: &D, cache: &mut DescriptorLayoutCache) {
        if self.action == Action::ToCreate {
            self.alloc(device);
        }
        self.create_descriptors(device, cache);
    }

    fn create_descriptors<D: GpuDevice>(&mut self, device: &D, cache: &mut DescriptorLayoutCache) {
        let buffer = self.raw();
        if self.usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) && self.storage_set.is_none() {
            self.storage_set = Some(self.create_descriptor_set(
                device,
                cache,
                vk::DescriptorType::STORAGE_BUFFER,
                buffer,
            ));
        }
        if self.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) && self.uniform_set.is_none() {
            self.uniform_set = Some(self.create_descriptor_set(
                device,
                cache,
                vk::DescriptorType::UNIFORM_BUFFER,
                buffer,
            ));
        }
    }

    fn create_descriptor_set<D: GpuDevice>(
        &self,
        device: &D,
        cache: &mut DescriptorLayoutCache,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
    ) -> vk::DescriptorSet {
        let layout = cache.get_or_create(device, ty, 1);
        let set = abort_on_err("allocate_descriptor_set", device.allocate_descriptor_set(layout));
        device.write_buffer_descriptor(set, ty, buffer, self.size);
        set
    }

    pub(crate) fn descriptor_set(&self, kind: BindingKind) -> vk::DescriptorSet {
        match kind {
            BindingKind::StorageBuffer => self.storage_set,
            BindingKind::UniformBuffer => self.uniform_set,
            _ => panic!("{:?} does not go through a buffer descriptor set", kind),
        }
        .expect("descriptor set requested before it was created")
    }

    /// Commits the buffer as host-visible if it wasn't already, then returns
    /// a scoped view of its whole extent. The view unmaps on drop.
    pub fn map<'a, D: GpuDevice>(&mut self, device: &'a D) -> BufferView<'a, D> {
        if self.committed.is_none() {
            self.host_visible = true;
            self.action = Action::ToCreate;
            self.alloc(device);
        }
        let memory = self.committed.as_ref().unwrap().memory;
        let ptr = abort_on_err("map_memory", device.map_memory(memory, self.size));
        BufferView {
            device,
            memory,
            ptr,
            size: self.size as usize,
        }
    }
}

/// A scoped host-memory view of a buffer's device memory, returned by
/// [`GpuBuffer::map`]. Unmaps automatically when dropped.
pub struct BufferView<'a, D: GpuDevice> {
    device: &'a D,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    size: usize,
}

impl<'a, D: GpuDevice> BufferView<'a, D> {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }
}

impl<'a, D: GpuDevice> Drop for BufferView<'a, D> {
    fn drop(&mut self) {
        self.device.unmap_memory(self.memory);
    }
}

impl Default for GpuBuffer {
    fn default() -> GpuBuffer {
        GpuBuffer::new()
    }
}

fn usage_for_kind(kind: BindingKind) -> vk::BufferUsageFlags {
    match kind {
        BindingKind::StorageBuffer => vk::BufferUsageFlags::STORAGE_BUFFER,
        BindingKind::UniformBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BindingKind::BufferTransferDst => vk::BufferUsageFlags::TRANSFER_DST,
        BindingKind::BufferTransferSrc => vk::BufferUsageFlags::TRANSFER_SRC,
        BindingKind::VertexBuffer => vk::BufferUsageFlags::VERTEX_BUFFER,
        _ => vk::BufferUsageFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    #[test]
    #[should_panic(expected = "size=0")]
    fn alloc_without_size_panics() {
        let device = MockDevice::new();
        let mut buf = GpuBuffer::new();
        buf.alloc(&device);
    }

    #[test]
    fn map_commits_unconfigured_buffer_as_host_visible() {
        let device = MockDevice::new();
        let mut buf = GpuBuffer::new();
        buf.configure(&BufferInfo {
            kind: None,
            size: 64,
            host_visible: false,
        });
        assert!(!buf.host_visible);
        let _ = buf.map(&device);
        assert!(buf.is_committed());
        assert!(buf.host_visible);
    }

    #[test]
    fn configure_is_additive_and_never_allocates() {
        let mut buf = GpuBuffer::new();
        buf.configure(&BufferInfo {
            kind: Some(BindingKind::StorageBuffer),
            size: 16,
            host_visible: false,
        });
        buf.configure(&BufferInfo {
            kind: Some(BindingKind::UniformBuffer),
            size: 0,
            host_visible: true,
        });
        assert!(buf.usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(buf.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert_eq!(buf.size, 16);
        assert!(buf.host_visible);
        assert!(!buf.is_committed());
    }
}
