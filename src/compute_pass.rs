//! Compute pass (C5): bindings + push constants + dispatch for one compute
//! shader invocation within a job.
//!
//! Grounded on `compute_pass.cpp`/`compute_pass.hpp`: `reset_` clears the
//! binding vector but keeps its capacity, `send_data` mallocs the push
//! constant storage once and overwrites it on every later call, and
//! `issue_commands_` emits one barrier per binding before binding the
//! pipeline, pushing constants, and dispatching.

use std::collections::HashMap;

use ash::vk;

use crate::binding::{Binding, BindingKind, ResourceRef, StageIndex};
use crate::buffer::GpuBuffer;
use crate::bump::{BumpArena, BumpVec};
use crate::device::{BufferBarrier, GpuDevice, ImageBarrier};
use crate::error::abort_on_err;
use crate::handle::{Handle, Store};
use crate::image::GpuImage;

/// Opaque reference to a registered kernel, returned by
/// [`KernelRegistry::register`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Kernel(u32);

struct KernelEntry {
    spirv: &'static [u8],
    pipeline: Option<(vk::Pipeline, vk::PipelineLayout)>,
}

/// Holds compute shader SPIR-V blobs and lazily builds/caches the pipeline
/// + layout for each on first use, keyed by `(kernel, set layout shape)`
/// since the layout depends on which bindings a given pass attaches.
///
/// Grounded on `compute_kernel_state`: the original caches one pipeline per
/// kernel id. This crate additionally keys on the binding-count +
/// push-constant-size pair, since a kernel could in principle be reused
/// across passes with different binding shapes; in practice every pass
/// built against a kernel uses the same shape, so the cache still holds a
/// single entry per kernel in steady state.
pub struct KernelRegistry {
    entries: Vec<KernelEntry>,
    pipelines: HashMap<(u32, usize, u32), (vk::Pipeline, vk::PipelineLayout)>,
}

impl KernelRegistry {
    pub fn new() -> KernelRegistry {
        KernelRegistry {
            entries: Vec::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn register(&mut self, spirv: &'static [u8]) -> Kernel {
        let id = self.entries.len() as u32;
        self.entries.push(KernelEntry { spirv, pipeline: None });
        Kernel(id)
    }

    fn get_or_create_pipeline<D: GpuDevice>(
        &mut self,
        device: &D,
        kernel: Kernel,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> (vk::Pipeline, vk::PipelineLayout) {
        let key = (kernel.0, set_layouts.len(), push_constant_size);
        if let Some(&p) = self.pipelines.get(&key) {
            return p;
        }
        let spirv = self.entries[kernel.0 as usize].spirv;
        let pipeline = abort_on_err(
            "create_compute_pipeline",
            device.create_compute_pipeline(spirv, set_layouts, push_constant_size),
        );
        self.pipelines.insert(key, pipeline);
        pipeline
    }
}

impl Default for KernelRegistry {
    fn default() -> KernelRegistry {
        KernelRegistry::new()
    }
}

#[derive(Copy, Clone, Debug)]
enum DispatchParams {
    Count { x: u32, y: u32, z: u32 },
    Waves { x: u32, y: u32, z: u32, extent_of: ResourceRef },
}

/// A compute pass under construction within one job. Reset (not
/// reallocated) at the start of every stage slot so its binding vector's
/// capacity survives across jobs.
pub struct ComputePass {
    pub(crate) stage: StageIndex,
    kernel: Option<Kernel>,
    bindings: Vec<Binding>,
    push_constant: Vec<u8>,
    dispatch: Option<DispatchParams>,
}

impl ComputePass {
    pub(crate) fn new(stage: StageIndex) -> ComputePass {
        ComputePass {
            stage,
            kernel: None,
            bindings: Vec::new(),
            push_constant: Vec::new(),
            dispatch: None,
        }
    }

    /// Clears the binding list and dispatch/push-constant state but keeps
    /// the `Vec`'s allocated capacity, so a pass reused across jobs doesn't
    /// reallocate once its binding count stabilizes.
    pub(crate) fn reset(&mut self) {
        self.bindings.clear();
        self.push_constant.clear();
        self.kernel = None;
        self.dispatch = None;
    }

    pub fn set_kernel(&mut self, kernel: Kernel) -> &mut ComputePass {
        self.kernel = Some(kernel);
        self
    }

    pub fn add_sampled_image(&mut self, image: Handle<GpuImage>) -> &mut ComputePass {
        self.push_binding(BindingKind::SampledImage, ResourceRef::Image(image))
    }

    pub fn add_storage_image(&mut self, image: Handle<GpuImage>) -> &mut ComputePass {
        self.push_binding(BindingKind::StorageImage, ResourceRef::Image(image))
    }

    pub fn add_storage_buffer(&mut self, buffer: Handle<GpuBuffer>) -> &mut ComputePass {
        self.push_binding(BindingKind::StorageBuffer, ResourceRef::Buffer(buffer))
    }

    pub fn add_uniform_buffer(&mut self, buffer: Handle<GpuBuffer>) -> &mut ComputePass {
        self.push_binding(BindingKind::UniformBuffer, ResourceRef::Buffer(buffer))
    }

    fn push_binding(&mut self, kind: BindingKind, resource: ResourceRef) -> &mut ComputePass {
        let index = self.bindings.len() as u32;
        self.bindings.push(Binding::new(index, kind, resource));
        self
    }

    pub(crate) fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Overwrites the push constant payload. Matches `send_data`'s
    /// malloc-once-then-memcpy behavior: storage only grows, a smaller
    /// payload just leaves the tail unused until resized by a bigger one.
    pub fn send_data<T: Copy>(&mut self, data: &T) -> &mut ComputePass {
        let bytes =
            unsafe { std::slice::from_raw_parts(data as *const T as *const u8, std::mem::size_of::<T>()) };
        if self.push_constant.len() < bytes.len() {
            self.push_constant.resize(bytes.len(), 0);
        }
        self.push_constant[..bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn dispatch(&mut self, count_x: u32, count_y: u32, count_z: u32) -> &mut ComputePass {
        self.dispatch = Some(DispatchParams::Count {
            x: count_x,
            y: count_y,
            z: count_z,
        });
        self
    }

    /// Dispatches enough groups to cover `extent_of`'s extent given a group
    /// size of `(wave_x, wave_y, wave_z)`, rounding up.
    pub fn dispatch_waves(&mut self, wave_x: u32, wave_y: u32, wave_z: u32, extent_of: Handle<GpuImage>) -> &mut ComputePass {
        self.dispatch = Some(DispatchParams::Waves {
            x: wave_x,
            y: wave_y,
            z: wave_z,
            extent_of: ResourceRef::Image(extent_of),
        });
        self
    }

    /// Emits a barrier per binding, binds the pipeline + descriptor sets,
    /// pushes constants if any, and dispatches. Barriers transition each
    /// resource from its last recorded (stage, layout/access) straight to
    /// this binding's required state.
    pub(crate) fn issue_commands<D: GpuDevice>(
        &self,
        device: &D,
        cmd: vk::CommandBuffer,
        registry: &mut KernelRegistry,
        cache: &mut crate::descriptor_cache::DescriptorLayoutCache,
        buffers: &mut Store<GpuBuffer>,
        images: &mut Store<GpuImage>,
        bump: &BumpArena,
    ) {
        let kernel = self.kernel.expect("compute pass issued without a kernel");

        let cap = self.bindings.len();
        let mut set_layouts: BumpVec<vk::DescriptorSetLayout> = BumpVec::with_capacity(bump, cap);
        let mut descriptor_sets: BumpVec<vk::DescriptorSet> = BumpVec::with_capacity(bump, cap);
        let mut image_barriers: BumpVec<ImageBarrier> = BumpVec::with_capacity(bump, cap);
        let mut buffer_barriers: BumpVec<BufferBarrier> = BumpVec::with_capacity(bump, cap);

        for binding in &self.bindings {
            let dst_stage = match binding.kind {
                BindingKind::StorageBuffer | BindingKind::UniformBuffer => vk::PipelineStageFlags::COMPUTE_SHADER,
                _ => binding.kind.pipeline_stage(),
            };
            match binding.resource {
                ResourceRef::Image(h) => {
                    let img = images.get_mut(h);
                    let new_layout = binding.kind.image_layout().expect("image binding with no layout");
                    image_barriers.push(ImageBarrier {
                        image: img.raw(),
                        aspect: img.aspect(),
                        old_layout: img.current_layout,
                        new_layout,
                        src_access: img.current_access,
                        dst_access: binding.kind.access_mask(),
                    });
                    device.pipeline_barrier(cmd, img.last_stage, dst_stage, image_barriers.last_one(), &[]);
                    img.current_layout = new_layout;
                    img.current_access = binding.kind.access_mask();
                    img.last_stage = dst_stage;
                    descriptor_sets.push(img.descriptor_set(binding.kind));
                    set_layouts.push(cache.get_or_create(device, binding.kind.descriptor_type().unwrap(), 1));
                }
                ResourceRef::Buffer(h) => {
                    let buf = buffers.get_mut(h);
                    buffer_barriers.push(BufferBarrier {
                        buffer: buf.raw(),
                        offset: 0,
                        size: buf.size(),
                        src_access: buf.current_access,
                        dst_access: binding.kind.access_mask(),
                    });
                    device.pipeline_barrier(cmd, buf.last_stage, dst_stage, &[], buffer_barriers.last_one());
                    buf.current_access = binding.kind.access_mask();
                    buf.last_stage = dst_stage;
                    descriptor_sets.push(buf.descriptor_set(binding.kind));
                    set_layouts.push(cache.get_or_create(device, binding.kind.descriptor_type().unwrap(), 1));
                }
            }
        }

        let (pipeline, layout) =
            registry.get_or_create_pipeline(device, kernel, set_layouts.as_slice(), self.push_constant.len() as u32);

        device.cmd_bind_pipeline(cmd, pipeline);
        device.cmd_bind_descriptor_sets(cmd, layout, descriptor_sets.as_slice());
        if !self.push_constant.is_empty() {
            device.cmd_push_constants(cmd, layout, &self.push_constant);
        }

        let (gx, gy, gz) = match self.dispatch.expect("compute pass issued without a dispatch") {
            DispatchParams::Count { x, y, z } => (x, y, z),
            DispatchParams::Waves { x, y, z, extent_of } => {
                let extent = match extent_of {
                    ResourceRef::Image(h) => images.get(h).extent(),
                    ResourceRef::Buffer(_) => panic!("dispatch_waves requires an image to read its extent from"),
                };
                (
                    ceil_div(extent.width, x),
                    ceil_div(extent.height, y),
                    ceil_div(extent.depth, z),
                )
            }
        };
        device.cmd_dispatch(cmd, gx, gy, gz);
    }
}

fn ceil_div(total: u32, group: u32) -> u32 {
    (total + group - 1) / group
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_data_overwrites_in_place() {
        let mut pass = ComputePass::new(0);
        pass.send_data(&[1u32, 2, 3]);
        assert_eq!(pass.push_constant.len(), 12);
        pass.send_data(&7u8);
        assert_eq!(pass.push_constant.len(), 12);
        assert_eq!(pass.push_constant[0], 7);
    }

    #[test]
    fn reset_keeps_binding_capacity() {
        let mut pass = ComputePass::new(0);
        let h: Handle<GpuBuffer> = Store::with_capacity(1).add(GpuBuffer::new());
        pass.add_storage_buffer(h);
        let cap = pass.bindings.capacity();
        pass.reset();
        assert!(pass.bindings.is_empty());
        assert_eq!(pass.bindings.capacity(), cap);
    }

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(17, 8), 3);
        assert_eq!(ceil_div(16, 8), 2);
    }
}
