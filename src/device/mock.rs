//! `MockDevice`: a `GpuDevice` implemented purely in host memory.
//!
//! Exists so the testable properties in spec.md §8 (barrier completeness,
//! descriptor coverage, ref-count bookkeeping, the round-trip scenario) can
//! be asserted without a physical GPU. Vulkan handles are represented here
//! as small integers wrapped in the real `ash::vk` handle types (`ash`
//! handles are transparent `u64`-backed non-null wrappers, so this is a
//! legitimate, not a hacky, use of them) backed by host-side storage.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

use crate::device::{AttachmentInfo, BufferBarrier, GpuDevice, ImageBarrier, Result, SubmitInfo};

struct MockBuffer {
    data: Vec<u8>,
}

struct MockImage {
    data: Vec<u8>,
    extent: vk::Extent3D,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Records every barrier and draw/dispatch call issued against a command
/// buffer, so unit tests can assert on ordering without a real device.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    ImageBarrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BufferBarrier {
        buffer: vk::Buffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    Draw { vertex_count: u32 },
    BeginRendering,
    EndRendering,
}

pub struct MockDevice {
    buffer_counter: AtomicU64,
    image_counter: AtomicU64,
    view_counter: AtomicU64,
    memory_counter: AtomicU64,
    layout_counter: AtomicU64,
    set_counter: AtomicU64,
    pipeline_counter: AtomicU64,
    pipeline_layout_counter: AtomicU64,
    fence_counter: AtomicU64,
    semaphore_counter: AtomicU64,
    cmd_counter: AtomicU64,

    buffers: RefCell<HashMap<u64, MockBuffer>>,
    images: RefCell<HashMap<u64, MockImage>>,
    /// Maps a `DeviceMemory` handle back to the buffer it backs, so
    /// `map_memory` can hand out a pointer into that buffer's actual data
    /// instead of an unrelated scratch allocation.
    memory_owner: RefCell<HashMap<u64, u64>>,
    fences: RefCell<HashMap<u64, bool>>,
    layout_binding_counts: RefCell<HashMap<u64, u32>>,

    commands: RefCell<HashMap<u64, Vec<RecordedCommand>>>,
}

impl MockDevice {
    pub fn new() -> MockDevice {
        MockDevice {
            buffer_counter: AtomicU64::new(0),
            image_counter: AtomicU64::new(0),
            view_counter: AtomicU64::new(0),
            memory_counter: AtomicU64::new(0),
            layout_counter: AtomicU64::new(0),
            set_counter: AtomicU64::new(0),
            pipeline_counter: AtomicU64::new(0),
            pipeline_layout_counter: AtomicU64::new(0),
            fence_counter: AtomicU64::new(0),
            semaphore_counter: AtomicU64::new(0),
            cmd_counter: AtomicU64::new(0),
            buffers: RefCell::new(HashMap::new()),
            images: RefCell::new(HashMap::new()),
            memory_owner: RefCell::new(HashMap::new()),
            fences: RefCell::new(HashMap::new()),
            layout_binding_counts: RefCell::new(HashMap::new()),
            commands: RefCell::new(HashMap::new()),
        }
    }

    /// Test-only accessor: the commands recorded into `cmd`, in order.
    pub fn recorded(&self, cmd: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.commands
            .borrow()
            .get(&cmd.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Test-only accessor: the current contents of a mock buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.buffers.borrow()[&buffer.as_raw()].data.clone()
    }
}

impl Default for MockDevice {
    fn default() -> MockDevice {
        MockDevice::new()
    }
}

impl GpuDevice for MockDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _host_visible: bool,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let id = next_id(&self.buffer_counter);
        self.buffers.borrow_mut().insert(
            id,
            MockBuffer {
                data: vec![0u8; size as usize],
            },
        );
        let mem_id = next_id(&self.memory_counter);
        self.memory_owner.borrow_mut().insert(mem_id, id);
        Ok((vk::Buffer::from_raw(id), vk::DeviceMemory::from_raw(mem_id)))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        self.buffers.borrow_mut().remove(&buffer.as_raw());
        self.memory_owner.borrow_mut().remove(&memory.as_raw());
    }

    fn create_image(
        &self,
        extent: vk::Extent3D,
        _format: vk::Format,
        _usage: vk::ImageUsageFlags,
        _array_layers: u32,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)> {
        let id = next_id(&self.image_counter);
        let size = (extent.width * extent.height * extent.depth * 4) as usize;
        self.images.borrow_mut().insert(
            id,
            MockImage {
                data: vec![0u8; size],
                extent,
            },
        );
        let view_id = next_id(&self.view_counter);
        let mem_id = next_id(&self.memory_counter);
        Ok((
            vk::Image::from_raw(id),
            vk::ImageView::from_raw(view_id),
            vk::DeviceMemory::from_raw(mem_id),
        ))
    }

    fn destroy_image(&self, image: vk::Image, _view: vk::ImageView, _memory: vk::DeviceMemory) {
        self.images.borrow_mut().remove(&image.as_raw());
    }

    /// Returns a pointer into the backing buffer's own `Vec<u8>` rather than
    /// a separate scratch allocation, so writes made through
    /// `update_buffer`/`copy_buffer` are visible through a later `map`.
    fn map_memory(&self, memory: vk::DeviceMemory, _size: vk::DeviceSize) -> Result<*mut u8> {
        let buffer_id = *self
            .memory_owner
            .borrow()
            .get(&memory.as_raw())
            .expect("map_memory: memory handle not bound to any buffer");
        let mut buffers = self.buffers.borrow_mut();
        let buf = buffers.get_mut(&buffer_id).expect("map_memory: unknown buffer");
        Ok(buf.data.as_mut_ptr())
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[ImageBarrier],
        buffer_barriers: &[BufferBarrier],
    ) {
        let mut commands = self.commands.borrow_mut();
        let log = commands.entry(cmd.as_raw()).or_default();
        for b in image_barriers {
            log.push(RecordedCommand::ImageBarrier {
                image: b.image,
                old_layout: b.old_layout,
                new_layout: b.new_layout,
                src_stage,
                dst_stage,
            });
        }
        for b in buffer_barriers {
            log.push(RecordedCommand::BufferBarrier {
                buffer: b.buffer,
                src_stage,
                dst_stage,
            });
        }
    }

    fn create_descriptor_set_layout(
        &self,
        _ty: vk::DescriptorType,
        binding_count: u32,
    ) -> Result<vk::DescriptorSetLayout> {
        let id = next_id(&self.layout_counter);
        self.layout_binding_counts.borrow_mut().insert(id, binding_count);
        Ok(vk::DescriptorSetLayout::from_raw(id))
    }

    fn allocate_descriptor_set(&self, _layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let id = next_id(&self.set_counter);
        Ok(vk::DescriptorSet::from_raw(id))
    }

    fn write_buffer_descriptor(
        &self,
        _set: vk::DescriptorSet,
        _ty: vk::DescriptorType,
        _buffer: vk::Buffer,
        _size: vk::DeviceSize,
    ) {
    }

    fn write_image_descriptor(
        &self,
        _set: vk::DescriptorSet,
        _ty: vk::DescriptorType,
        _view: vk::ImageView,
        _layout: vk::ImageLayout,
    ) {
    }

    fn create_compute_pipeline(
        &self,
        _shader_spirv: &[u8],
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_size: u32,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
        let pipeline = next_id(&self.pipeline_counter);
        let layout = next_id(&self.pipeline_layout_counter);
        Ok((vk::Pipeline::from_raw(pipeline), vk::PipelineLayout::from_raw(layout)))
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline, _layout: vk::PipelineLayout) {}

    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        _render_area: vk::Rect2D,
        _color_attachments: &[AttachmentInfo],
        _depth_attachment: Option<AttachmentInfo>,
    ) {
        self.commands
            .borrow_mut()
            .entry(cmd.as_raw())
            .or_default()
            .push(RecordedCommand::BeginRendering);
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer) {
        self.commands
            .borrow_mut()
            .entry(cmd.as_raw())
            .or_default()
            .push(RecordedCommand::EndRendering);
    }

    fn copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        let src_data = self.buffers.borrow()[&src.as_raw()].data
            [src_offset as usize..(src_offset + size) as usize]
            .to_vec();
        self.buffers.borrow_mut().get_mut(&dst.as_raw()).unwrap().data
            [dst_offset as usize..(dst_offset + size) as usize]
            .copy_from_slice(&src_data);
    }

    fn update_buffer(&self, _cmd: vk::CommandBuffer, dst: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        let mut buffers = self.buffers.borrow_mut();
        let buf = buffers.get_mut(&dst.as_raw()).expect("update_buffer: unknown buffer");
        let start = offset as usize;
        buf.data[start..start + data.len()].copy_from_slice(data);
    }

    fn blit_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_extent: vk::Extent3D,
        dst: vk::Image,
        _dst_extent: vk::Extent3D,
        _aspect: vk::ImageAspectFlags,
    ) {
        let src_data = self.images.borrow()[&src.as_raw()].data.clone();
        let mut images = self.images.borrow_mut();
        let dst_img = images.get_mut(&dst.as_raw()).unwrap();
        let n = src_data.len().min(dst_img.data.len());
        dst_img.data[..n].copy_from_slice(&src_data[..n]);
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let id = next_id(&self.cmd_counter);
        self.commands.borrow_mut().insert(id, Vec::new());
        Ok(vk::CommandBuffer::from_raw(id))
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _sets: &[vk::DescriptorSet],
    ) {
    }

    fn cmd_push_constants(&self, _cmd: vk::CommandBuffer, _layout: vk::PipelineLayout, _data: &[u8]) {}

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.commands
            .borrow_mut()
            .entry(cmd.as_raw())
            .or_default()
            .push(RecordedCommand::Dispatch { x, y, z });
    }

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, _rect: vk::Rect2D) {}

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.commands
            .borrow_mut()
            .entry(cmd.as_raw())
            .or_default()
            .push(RecordedCommand::Draw { vertex_count });
    }

    fn queue_submit(&self, info: SubmitInfo) -> Result<()> {
        if info.fence != vk::Fence::null() {
            self.fences.borrow_mut().insert(info.fence.as_raw(), true);
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let id = next_id(&self.fence_counter);
        self.fences.borrow_mut().insert(id, signaled);
        Ok(vk::Fence::from_raw(id))
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.fences.borrow_mut().insert(fence.as_raw(), false);
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool> {
        Ok(*self.fences.borrow().get(&fence.as_raw()).unwrap_or(&false))
    }

    fn wait_fence(&self, fence: vk::Fence) -> Result<()> {
        self.fences.borrow_mut().insert(fence.as_raw(), true);
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let id = next_id(&self.semaphore_counter);
        Ok(vk::Semaphore::from_raw(id))
    }

    fn acquire_next_image(&self, _swapchain: vk::SwapchainKHR, _signal: vk::Semaphore) -> Result<u32> {
        Ok(0)
    }

    fn present(&self, _swapchain: vk::SwapchainKHR, _image_index: u32, _wait: vk::Semaphore) -> Result<()> {
        Ok(())
    }
}
