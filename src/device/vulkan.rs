//! `AshDevice`: the real `GpuDevice` backed by `ash`.
//!
//! Grounded on `examples/ennis-autograph-ng/src/renderer/backend/vk/mod.rs`
//! for the "bundle of device + queues + pools" shape, and on
//! `examples/original_source/nezha/gpu.h`'s `nz_gpu` struct for which
//! fields that bundle needs (device, queue, command pool, descriptor pool,
//! memory properties). Device/instance/surface bring-up happens outside
//! this crate; `AshDevice::new` takes the already-created handles.

use ash::vk;

use crate::device::{AttachmentInfo, BufferBarrier, GpuDevice, ImageBarrier, Result, SubmitInfo};
use crate::error::DeviceError;

/// Handles assembled by the caller during device bring-up (out of scope for
/// this crate) and handed to `AshDevice::new`.
pub struct AshDeviceParams {
    pub device: ash::Device,
    pub physical_device_memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub command_pool: vk::CommandPool,
    pub descriptor_pool: vk::DescriptorPool,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
}

pub struct AshDevice {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    swapchain_loader: ash::extensions::khr::Swapchain,
}

impl AshDevice {
    pub fn new(params: AshDeviceParams) -> AshDevice {
        AshDevice {
            device: params.device,
            memory_properties: params.physical_device_memory_properties,
            queue: params.queue,
            command_pool: params.command_pool,
            descriptor_pool: params.descriptor_pool,
            swapchain_loader: params.swapchain_loader,
        }
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            let suitable = (type_bits & (1 << i)) != 0;
            let has_flags = self.memory_properties.memory_types[i as usize]
                .property_flags
                .contains(flags);
            if suitable && has_flags {
                return Ok(i);
            }
        }
        Err(DeviceError::NoSuitableMemoryType)
    }
}

impl GpuDevice for AshDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let reqs = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let flags = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let mem_type = self.find_memory_type(reqs.memory_type_bits, flags)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(mem_type);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0)? };
        Ok((buffer, memory))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        unsafe {
            self.device.destroy_buffer(buffer, None);
            self.device.free_memory(memory, None);
        }
    }

    fn create_image(
        &self,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        array_layers: u32,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)> {
        let image_type = if extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };
        let info = vk::ImageCreateInfo::builder()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&info, None)? };
        let reqs = unsafe { self.device.get_image_memory_requirements(image) };
        let mem_type =
            self.find_memory_type(reqs.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(mem_type);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
        unsafe { self.device.bind_image_memory(image, memory, 0)? };

        let aspect = if is_depth_format(format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_type = if extent.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: array_layers,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None)? };
        Ok((image, view, memory))
    }

    fn destroy_image(&self, image: vk::Image, view: vk::ImageView, memory: vk::DeviceMemory) {
        unsafe {
            self.device.destroy_image_view(view, None);
            self.device.destroy_image(image, None);
            self.device.free_memory(memory, None);
        }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
        };
        Ok(ptr as *mut u8)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[ImageBarrier],
        buffer_barriers: &[BufferBarrier],
    ) {
        let img: Vec<vk::ImageMemoryBarrier> = image_barriers
            .iter()
            .map(|b| {
                vk::ImageMemoryBarrier::builder()
                    .image(b.image)
                    .old_layout(b.old_layout)
                    .new_layout(b.new_layout)
                    .src_access_mask(b.src_access)
                    .dst_access_mask(b.dst_access)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: b.aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .build()
            })
            .collect();
        let buf: Vec<vk::BufferMemoryBarrier> = buffer_barriers
            .iter()
            .map(|b| {
                vk::BufferMemoryBarrier::builder()
                    .buffer(b.buffer)
                    .offset(b.offset)
                    .size(b.size)
                    .src_access_mask(b.src_access)
                    .dst_access_mask(b.dst_access)
                    .build()
            })
            .collect();
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buf,
                &img,
            );
        }
    }

    fn create_descriptor_set_layout(
        &self,
        ty: vk::DescriptorType,
        binding_count: u32,
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..binding_count)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(i)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None)? };
        self.layout_binding_counts
            .borrow_mut()
            .insert(layout, binding_count);
        Ok(layout)
    }

    fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info)? };
        Ok(sets[0])
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(size)
            .build()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(ty)
            .buffer_info(&buffer_info);
        unsafe { self.device.update_descriptor_sets(&[write.build()], &[]) };
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) {
        let image_info = [vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(layout)
            .build()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(ty)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write.build()], &[]) };
    }

    fn create_compute_pipeline(
        &self,
        shader_spirv: &[u8],
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
        assert_eq!(shader_spirv.len() % 4, 0, "SPIR-V payload not word-aligned");
        let words: Vec<u32> = shader_spirv
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { self.device.create_shader_module(&module_info, None)? };

        let push_constant_ranges = if push_constant_size > 0 {
            vec![vk::PushConstantRange::builder()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(push_constant_size)
                .build()]
        } else {
            vec![]
        };
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None)? };

        let entry_point = std::ffi::CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(layout);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, e)| e)?
        };
        unsafe { self.device.destroy_shader_module(module, None) };
        Ok((pipelines[0], layout))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline, layout: vk::PipelineLayout) {
        unsafe {
            self.device.destroy_pipeline(pipeline, None);
            self.device.destroy_pipeline_layout(layout, None);
        }
    }

    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color_attachments: &[AttachmentInfo],
        depth_attachment: Option<AttachmentInfo>,
    ) {
        let color: Vec<vk::RenderingAttachmentInfo> = color_attachments
            .iter()
            .map(|a| to_rendering_attachment(a))
            .collect();
        let depth = depth_attachment.map(|a| to_rendering_attachment(&a));
        let mut info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color);
        if let Some(ref d) = depth {
            info = info.depth_attachment(d);
        }
        unsafe { self.device.cmd_begin_rendering(cmd, &info) };
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) };
    }

    fn copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn update_buffer(&self, cmd: vk::CommandBuffer, dst: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe { self.device.cmd_update_buffer(cmd, dst, offset, data) };
    }

    fn blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_extent: vk::Extent3D,
        dst: vk::Image,
        dst_extent: vk::Extent3D,
        aspect: vk::ImageAspectFlags,
    ) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit {
            src_subresource: subresource,
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: src_extent.depth as i32,
                },
            ],
            dst_subresource: subresource,
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: dst_extent.depth as i32,
                },
            ],
        };
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            )
        };
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let bufs = unsafe { self.device.allocate_command_buffers(&info)? };
        Ok(bufs[0])
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline)
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                sets,
                &[],
            )
        };
    }

    fn cmd_push_constants(&self, cmd: vk::CommandBuffer, layout: vk::PipelineLayout, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, vk::ShaderStageFlags::COMPUTE, 0, data)
        };
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
    }

    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, rect: vk::Rect2D) {
        let viewport = vk::Viewport {
            x: rect.offset.x as f32,
            y: rect.offset.y as f32,
            width: rect.extent.width as f32,
            height: rect.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[rect]);
        }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    fn queue_submit(&self, info: SubmitInfo) -> Result<()> {
        let submit = vk::SubmitInfo::builder()
            .command_buffers(info.command_buffers)
            .wait_semaphores(info.wait_semaphores)
            .wait_dst_stage_mask(info.wait_dst_stage_masks)
            .signal_semaphores(info.signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit.build()], info.fence)?
        };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None)? })
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn wait_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&info, None)? })
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())?
        };
        Ok(index)
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> Result<()> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let waits = [wait];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.swapchain_loader.queue_present(self.queue, &info)? };
        Ok(())
    }
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn to_rendering_attachment(a: &AttachmentInfo) -> vk::RenderingAttachmentInfo {
    vk::RenderingAttachmentInfo::builder()
        .image_view(a.image_view)
        .image_layout(a.layout)
        .load_op(a.load_op)
        .store_op(a.store_op)
        .clear_value(a.clear_value)
        .build()
}
