//! The graph (C8): records passes and transfer ops into a job, lazily
//! instantiates the resources they touch, and lays down the barriers that
//! keep the whole thing correct on the device timeline.
//!
//! Grounded on `graph.cpp` end to end: `begin`/`end` here are a direct
//! translation of `render_graph::begin`/`render_graph::end`'s two-pass
//! prepare/instantiate/execute structure, and `submit` reproduces
//! `render_graph::submit` with dependency elision per the decision recorded
//! in DESIGN.md (the original's literal behavior does not elide; the
//! specification this crate follows does).

use std::rc::Rc;

use ash::vk;

use crate::binding::{mark_buffer_used, mark_image_used, ResourceRef};
use crate::buffer::{BufferInfo, GpuBuffer};
use crate::bump::BumpArena;
use crate::compute_pass::{ComputePass, Kernel, KernelRegistry};
use crate::config::GraphConfig;
use crate::descriptor_cache::DescriptorLayoutCache;
use crate::device::GpuDevice;
use crate::error::abort_on_err;
use crate::handle::{Handle, Store};
use crate::image::{GpuImage, ImageInfo};
use crate::render_pass::RenderPass;
use crate::sync_pool::{Job, PendingWorkload, SyncPool};
use crate::transfer::{BufferRange, TransferOp};

enum Stage {
    Compute(usize),
    Render(usize),
    Transfer(usize),
}

/// The builder: owns every resource, pass slot, and the device that
/// eventually executes them. One instance per independent command stream;
/// nothing here is `Send`/`Sync` (§5: single-threaded cooperative use).
pub struct Graph<D: GpuDevice> {
    device: D,
    config: GraphConfig,

    buffers: Store<GpuBuffer>,
    images: Store<GpuImage>,
    kernels: KernelRegistry,
    descriptor_cache: DescriptorLayoutCache,
    bump: BumpArena,
    sync_pool: Rc<SyncPool>,

    compute_slots: Vec<ComputePass>,
    render_slots: Vec<RenderPass>,
    transfer_slots: Vec<TransferOp>,
    compute_count: usize,
    render_count: usize,
    transfer_count: usize,

    stage_order: Vec<Stage>,
    used_resources: Vec<ResourceRef>,
}

impl<D: GpuDevice> Graph<D> {
    pub fn new(device: D, config: GraphConfig) -> Graph<D> {
        Graph {
            device,
            config,
            buffers: Store::with_capacity(config.max_resources),
            images: Store::with_capacity(config.max_resources),
            kernels: KernelRegistry::new(),
            descriptor_cache: DescriptorLayoutCache::new(),
            bump: BumpArena::new(config.bump_arena_size),
            sync_pool: SyncPool::new(),
            compute_slots: Vec::new(),
            render_slots: Vec::new(),
            transfer_slots: Vec::new(),
            compute_count: 0,
            render_count: 0,
            transfer_count: 0,
            stage_order: Vec::new(),
            used_resources: Vec::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> GraphConfig {
        self.config
    }

    // ---- register ----------------------------------------------------

    pub fn register_buffer(&mut self, info: &BufferInfo) -> Handle<GpuBuffer> {
        let mut buf = GpuBuffer::new();
        buf.configure(info);
        self.buffers.add(buf)
    }

    pub fn register_image(&mut self, info: &ImageInfo) -> Handle<GpuImage> {
        let mut img = GpuImage::new();
        img.configure(info);
        self.images.add(img)
    }

    /// Wraps each externally-owned swapchain image/view as an
    /// already-committed [`GpuImage`], per §4.4's swapchain-aliasing path.
    pub fn register_swapchain(
        &mut self,
        images_views: &[(vk::Image, vk::ImageView)],
        extent: vk::Extent3D,
        format: vk::Format,
    ) -> Vec<Handle<GpuImage>> {
        images_views
            .iter()
            .map(|&(image, view)| self.images.add(GpuImage::from_swapchain_image(image, view, extent, format)))
            .collect()
    }

    pub fn register_kernel(&mut self, spirv: &'static [u8]) -> Kernel {
        self.kernels.register(spirv)
    }

    pub fn get_buffer(&self, handle: Handle<GpuBuffer>) -> &GpuBuffer {
        self.buffers.get(handle)
    }

    pub fn get_buffer_mut(&mut self, handle: Handle<GpuBuffer>) -> &mut GpuBuffer {
        self.buffers.get_mut(handle)
    }

    pub fn get_image(&self, handle: Handle<GpuImage>) -> &GpuImage {
        self.images.get(handle)
    }

    /// Maps `handle`'s device memory for host access; the returned view
    /// unmaps when dropped. Committing a buffer that wasn't previously
    /// configured host-visible happens implicitly here, same as
    /// `GpuBuffer::map`.
    pub fn map_buffer(&mut self, handle: Handle<GpuBuffer>) -> crate::buffer::BufferView<'_, D> {
        self.buffers.get_mut(handle).map(&self.device)
    }

    // ---- add_* ---------------------------------------------------------

    pub fn add_compute_pass(&mut self) -> &mut ComputePass {
        let idx = self.compute_count;
        self.compute_count += 1;
        if idx == self.compute_slots.len() {
            self.compute_slots.push(ComputePass::new(self.stage_order.len() as u32));
        } else {
            self.compute_slots[idx].reset();
            self.compute_slots[idx].stage = self.stage_order.len() as u32;
        }
        self.stage_order.push(Stage::Compute(idx));
        &mut self.compute_slots[idx]
    }

    pub fn add_render_pass(&mut self) -> &mut RenderPass {
        let idx = self.render_count;
        self.render_count += 1;
        if idx == self.render_slots.len() {
            self.render_slots.push(RenderPass::new(self.stage_order.len() as u32));
        } else {
            self.render_slots[idx].reset();
            self.render_slots[idx].stage = self.stage_order.len() as u32;
        }
        self.stage_order.push(Stage::Render(idx));
        &mut self.render_slots[idx]
    }

    fn next_transfer_slot(&mut self) -> &mut TransferOp {
        let idx = self.transfer_count;
        self.transfer_count += 1;
        if idx == self.transfer_slots.len() {
            self.transfer_slots.push(TransferOp::new());
        } else {
            self.transfer_slots[idx].reset();
        }
        self.stage_order.push(Stage::Transfer(idx));
        &mut self.transfer_slots[idx]
    }

    pub fn add_buffer_update(&mut self, buffer: Handle<GpuBuffer>, data: &[u8], offset: vk::DeviceSize) {
        self.next_transfer_slot().init_as_buffer_update(buffer, data, offset);
    }

    pub fn add_buffer_copy_to_host(
        &mut self,
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    ) {
        self.next_transfer_slot()
            .init_as_buffer_copy_to_host(dst, src, dst_offset, src_range);
    }

    pub fn add_buffer_copy(
        &mut self,
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    ) {
        self.next_transfer_slot().init_as_buffer_copy(dst, src, dst_offset, src_range);
    }

    pub fn add_image_blit(&mut self, src: Handle<GpuImage>, dst: Handle<GpuImage>) {
        self.next_transfer_slot().init_as_image_blit(src, dst);
    }

    pub fn add_present_ready(&mut self, image: Handle<GpuImage>) {
        self.next_transfer_slot().init_as_present_ready(image);
    }

    // ---- begin / end -----------------------------------------------------

    /// Rewinds per-job scratch state: the bump arena, every resource's
    /// usage linked list, and the recorded stage stream.
    pub fn begin(&mut self) {
        self.bump.clear();

        for rref in self.used_resources.drain(..) {
            match rref {
                ResourceRef::Buffer(h) => {
                    let buf = self.buffers.get_mut(h);
                    buf.was_used_this_job = false;
                    buf.head = crate::binding::UsageNode::INVALID;
                    buf.tail = crate::binding::UsageNode::INVALID;
                }
                ResourceRef::Image(h) => {
                    let img = self.images.get_mut(h);
                    img.was_used_this_job = false;
                    img.head = crate::binding::UsageNode::INVALID;
                    img.tail = crate::binding::UsageNode::INVALID;
                }
            }
        }

        self.stage_order.clear();
        self.compute_count = 0;
        self.render_count = 0;
        self.transfer_count = 0;
    }

    /// Compiles the recorded stage stream into a command buffer: prepare
    /// (decide what to allocate), instantiate (allocate it), execute (emit
    /// barriers and record commands), in that order.
    pub fn end(&mut self) -> Job {
        let cmd = self.sync_pool.get_command_buffer(&self.device);
        abort_on_err("begin_command_buffer", self.device.begin_command_buffer(cmd));

        // Prepare pass: decide per-resource action, build the used list.
        for stage in &self.stage_order {
            match *stage {
                Stage::Compute(i) => {
                    let bindings = crate::bump::copy_from_slice(&self.bump, self.compute_slots[i].bindings());
                    for binding in bindings {
                        match binding.resource {
                            ResourceRef::Buffer(h) => {
                                self.buffers.get_mut(h).update_action(binding.kind);
                                mark_buffer_used(&mut self.used_resources, &mut self.buffers, h);
                            }
                            ResourceRef::Image(h) => {
                                self.images.get_mut(h).update_action(binding.kind);
                                mark_image_used(&mut self.used_resources, &mut self.images, h);
                            }
                        }
                    }
                }
                Stage::Render(i) => {
                    let bindings = crate::bump::copy_from_slice(&self.bump, self.render_slots[i].bindings());
                    for binding in bindings {
                        match binding.resource {
                            ResourceRef::Image(h) => {
                                self.images.get_mut(h).update_action(binding.kind);
                                mark_image_used(&mut self.used_resources, &mut self.images, h);
                            }
                            ResourceRef::Buffer(_) => unreachable!("render pass binding is always an image"),
                        }
                    }
                }
                Stage::Transfer(i) => {
                    self.transfer_slots[i].prepare(&mut self.buffers, &mut self.images, &mut self.used_resources);
                }
            }
        }

        // Instantiate: allocate anything marked to-create, then ensure
        // descriptor sets exist for the accumulated usage.
        for &rref in &self.used_resources {
            match rref {
                ResourceRef::Buffer(h) => {
                    self.buffers.get_mut(h).apply_action(&self.device, &mut self.descriptor_cache);
                }
                ResourceRef::Image(h) => {
                    self.images.get_mut(h).apply_action(&self.device, &mut self.descriptor_cache);
                }
            }
        }

        // Execute: emit barriers and record commands, in recorded order.
        let mut last_stage = vk::PipelineStageFlags::empty();
        for stage in &self.stage_order {
            match *stage {
                Stage::Compute(i) => {
                    last_stage = vk::PipelineStageFlags::COMPUTE_SHADER;
                    self.compute_slots[i].issue_commands(
                        &self.device,
                        cmd,
                        &mut self.kernels,
                        &mut self.descriptor_cache,
                        &mut self.buffers,
                        &mut self.images,
                        &self.bump,
                    );
                }
                Stage::Render(i) => {
                    last_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
                    self.render_slots[i].issue_commands(&self.device, cmd, &mut self.images, &self.bump);
                }
                Stage::Transfer(i) => {
                    last_stage = vk::PipelineStageFlags::TRANSFER;
                    self.transfer_slots[i].issue_commands(&self.device, cmd, &mut self.buffers, &mut self.images);
                }
            }
        }

        abort_on_err("end_command_buffer", self.device.end_command_buffer(cmd));

        let finished_semaphore = self.sync_pool.get_semaphore(&self.device);
        Job::new(self.sync_pool.clone(), cmd, finished_semaphore, last_stage)
    }

    /// A job with an empty command buffer but a real semaphore and a
    /// pre-signaled fence, for use as a "nothing happened yet" dependency
    /// sentinel in multi-frame-in-flight scheduling.
    pub fn placeholder_job(&mut self) -> Job {
        let fence = self.sync_pool.get_fence(&self.device);
        let finished_semaphore = self.sync_pool.get_semaphore(&self.device);
        let submission_idx = self
            .sync_pool
            .add_submission(fence, 1, vec![finished_semaphore], Vec::new());
        let mut job = Job::new(self.sync_pool.clone(), vk::CommandBuffer::null(), finished_semaphore, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        job.set_submission(submission_idx, fence);
        job
    }

    /// A job carrying a fresh semaphore but no command buffer and no
    /// submission — used by the surface adapter to wrap
    /// `vkAcquireNextImageKHR`'s signal semaphore as an ordinary
    /// dependency job, the way `surface::acquire_next_swapchain_image`
    /// wraps it in the source.
    pub(crate) fn new_acquire_job(&mut self) -> Job {
        let semaphore = self.sync_pool.get_semaphore(&self.device);
        Job::new(self.sync_pool.clone(), vk::CommandBuffer::null(), semaphore, vk::PipelineStageFlags::TOP_OF_PIPE)
    }

    pub fn placeholder_workload(&mut self) -> PendingWorkload {
        let fence = self.sync_pool.get_fence(&self.device);
        let submission_idx = self.sync_pool.add_submission(fence, 1, Vec::new(), Vec::new());
        PendingWorkload::new(self.sync_pool.clone(), fence, submission_idx)
    }

    /// Submits `jobs`, waiting on `dependencies`' finished-semaphores at
    /// their recorded end-stage — unless a dependency's fence has already
    /// signaled, in which case its wait is elided and its ref count is
    /// dropped immediately instead.
    pub fn submit(&mut self, jobs: &mut [Job], dependencies: &[Job]) -> PendingWorkload {
        let cmdbufs: Vec<vk::CommandBuffer> = jobs.iter().map(|j| j.cmdbuf).collect();
        let signal_semaphores: Vec<vk::Semaphore> = jobs.iter().map(|j| j.finished_semaphore).collect();

        let mut wait_semaphores = Vec::new();
        let mut wait_stages = Vec::new();
        for dep in dependencies {
            if let Some(idx) = dep.submission_idx() {
                let fence = self.sync_pool.fence_of(idx);
                if abort_on_err("fence_status", self.device.fence_status(fence)) {
                    self.sync_pool.decref(idx);
                } else {
                    wait_semaphores.push(dep.finished_semaphore);
                    wait_stages.push(dep.end_stage);
                }
            }
        }

        let fence = self.sync_pool.get_fence(&self.device);
        abort_on_err("reset_fence", self.device.reset_fence(fence));
        abort_on_err(
            "queue_submit",
            self.device.queue_submit(crate::device::SubmitInfo {
                command_buffers: &cmdbufs,
                wait_semaphores: &wait_semaphores,
                wait_dst_stage_masks: &wait_stages,
                signal_semaphores: &signal_semaphores,
                fence,
            }),
        );

        let submission_idx = self
            .sync_pool
            .add_submission(fence, jobs.len() as u32 + 1, signal_semaphores, cmdbufs);

        for job in jobs.iter_mut() {
            job.set_submission(submission_idx, fence);
        }

        PendingWorkload::new(self.sync_pool.clone(), fence, submission_idx)
    }
}
