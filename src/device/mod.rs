//! The "opaque GPU device" the core is generic over (§6).
//!
//! `GpuDevice` is the one seam in this crate where failure is represented
//! as a `Result` rather than a panic: it lets [`crate::device::mock::MockDevice`]
//! stand in for a real device in tests, and it's the boundary the graph
//! unwraps with [`crate::error::abort_on_err`] immediately after every call.
//! Device, instance, and surface *creation* are not part of this trait —
//! those stay the caller's responsibility per the scope in SPEC_FULL.md.

pub mod mock;
pub mod vulkan;

use ash::vk;

use crate::error::DeviceError;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// A region of a buffer or the whole of an image, barriered from one
/// (stage, layout, access) to another.
#[derive(Copy, Clone, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Copy, Clone, Debug)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// A single color or depth attachment for `begin_rendering`.
#[derive(Copy, Clone, Debug)]
pub struct AttachmentInfo {
    pub image_view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearValue,
}

#[derive(Copy, Clone, Debug)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_dst_stage_masks: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// The device primitives the graph core is generic over, one method per
/// bullet in SPEC_FULL.md §4.13 / spec.md §6. Object-safe so a `&dyn
/// GpuDevice` can back the graph without monomorphizing it per backend.
pub trait GpuDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory);

    fn create_image(
        &self,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        array_layers: u32,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)>;
    fn destroy_image(&self, image: vk::Image, view: vk::ImageView, memory: vk::DeviceMemory);

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    fn pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[ImageBarrier],
        buffer_barriers: &[BufferBarrier],
    );

    fn create_descriptor_set_layout(
        &self,
        ty: vk::DescriptorType,
        binding_count: u32,
    ) -> Result<vk::DescriptorSetLayout>;

    fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet>;
    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    );
    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    );

    fn create_compute_pipeline(
        &self,
        shader_spirv: &[u8],
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout)>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline, layout: vk::PipelineLayout);

    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color_attachments: &[AttachmentInfo],
        depth_attachment: Option<AttachmentInfo>,
    );
    fn end_rendering(&self, cmd: vk::CommandBuffer);

    fn copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    );
    fn update_buffer(&self, cmd: vk::CommandBuffer, dst: vk::Buffer, offset: vk::DeviceSize, data: &[u8]);
    fn blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_extent: vk::Extent3D,
        dst: vk::Image,
        dst_extent: vk::Extent3D,
        aspect: vk::ImageAspectFlags,
    );

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(&self, cmd: vk::CommandBuffer, layout: vk::PipelineLayout, data: &[u8]);
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, rect: vk::Rect2D);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn queue_submit(&self, info: SubmitInfo) -> Result<()>;

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn fence_status(&self, fence: vk::Fence) -> Result<bool>;
    fn wait_fence(&self, fence: vk::Fence) -> Result<()>;

    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<u32>;
    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> Result<()>;
}
