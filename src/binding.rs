//! Binding descriptor (C2): tagged record of "resource used in this stage as
//! kind K", plus the pure total translation from K to device state.
//!
//! Grounded on `binding.hpp`'s `binding::type` enum and its
//! `get_descriptor_type`/`get_image_layout`/`get_buffer_access`/
//! `get_image_access` match tables.

use ash::vk;

use crate::handle::{Handle, Store};
use crate::{buffer::GpuBuffer, image::GpuImage};

/// Closed enum of ways a resource can be bound to a stage. Every variant has
/// a deterministic (descriptor type, image layout, access mask, pipeline
/// stage) per the table below; an out-of-range kind cannot be constructed
/// in safe Rust, so the "abort on unknown kind" failure mode from the spec
/// collapses to a match that the compiler proves exhaustive.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingKind {
    SampledImage,
    StorageImage,
    ColorAttachment,
    DepthAttachment,
    ImageTransferSrc,
    ImageTransferDst,
    PresentReady,
    StorageBuffer,
    UniformBuffer,
    BufferTransferSrc,
    BufferTransferDst,
    VertexBuffer,
}

impl BindingKind {
    pub fn is_image(self) -> bool {
        use BindingKind::*;
        matches!(
            self,
            SampledImage
                | StorageImage
                | ColorAttachment
                | DepthAttachment
                | ImageTransferSrc
                | ImageTransferDst
                | PresentReady
        )
    }

    pub fn is_buffer(self) -> bool {
        !self.is_image()
    }

    /// Descriptor type this kind binds as, or `None` for kinds that never
    /// go through a descriptor set (attachments, transfer endpoints,
    /// present-ready, vertex buffers).
    pub fn descriptor_type(self) -> Option<vk::DescriptorType> {
        use BindingKind::*;
        match self {
            SampledImage => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            StorageImage => Some(vk::DescriptorType::STORAGE_IMAGE),
            StorageBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
            UniformBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
            ColorAttachment | DepthAttachment | ImageTransferSrc | ImageTransferDst
            | PresentReady | BufferTransferSrc | BufferTransferDst | VertexBuffer => None,
        }
    }

    /// Required image layout, or `None` for buffer kinds.
    pub fn image_layout(self) -> Option<vk::ImageLayout> {
        use BindingKind::*;
        match self {
            SampledImage => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            StorageImage => Some(vk::ImageLayout::GENERAL),
            ColorAttachment => Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            DepthAttachment => Some(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            ImageTransferSrc => Some(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            ImageTransferDst => Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            PresentReady => Some(vk::ImageLayout::PRESENT_SRC_KHR),
            StorageBuffer | UniformBuffer | BufferTransferSrc | BufferTransferDst
            | VertexBuffer => None,
        }
    }

    /// Access mask implied by this kind, for whichever side (image or
    /// buffer) the kind applies to.
    pub fn access_mask(self) -> vk::AccessFlags {
        use BindingKind::*;
        match self {
            SampledImage => vk::AccessFlags::SHADER_READ,
            StorageImage => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            ColorAttachment => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            DepthAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ImageTransferSrc | BufferTransferSrc => vk::AccessFlags::TRANSFER_READ,
            ImageTransferDst | BufferTransferDst => vk::AccessFlags::TRANSFER_WRITE,
            PresentReady => vk::AccessFlags::empty(),
            StorageBuffer => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            UniformBuffer => vk::AccessFlags::MEMORY_READ,
            VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        }
    }

    /// Pipeline stage this kind is used at, for kinds whose stage does not
    /// depend on which pass is recording them. `storage_buffer` and
    /// `uniform_buffer` have no fixed stage here — the pass recording the
    /// binding substitutes its own stage instead (see the compute pass's
    /// `issue_commands`, the only place that binds either kind today).
    pub fn pipeline_stage(self) -> vk::PipelineStageFlags {
        use BindingKind::*;
        match self {
            SampledImage => vk::PipelineStageFlags::COMPUTE_SHADER,
            StorageImage => vk::PipelineStageFlags::COMPUTE_SHADER,
            ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            DepthAttachment => vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ImageTransferSrc | ImageTransferDst | BufferTransferSrc | BufferTransferDst => {
                vk::PipelineStageFlags::TRANSFER
            }
            PresentReady => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            StorageBuffer | UniformBuffer => vk::PipelineStageFlags::empty(),
            VertexBuffer => vk::PipelineStageFlags::VERTEX_INPUT,
        }
    }
}

/// Opaque reference to either flavor of resource, the only thing a binding
/// is allowed to carry — bindings never own a resource.
#[derive(Copy, Clone, Debug)]
pub enum ResourceRef {
    Buffer(Handle<GpuBuffer>),
    Image(Handle<GpuImage>),
}

/// Index of a binding within one stage's binding list.
pub type BindingIndex = u32;

/// Index of a stage within one job's stage stream.
pub type StageIndex = u32;

/// `{stage-index, binding-index}`, or invalid. Purely analytical data
/// threaded through a resource's usage linked list; reset every `begin`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UsageNode {
    pub stage: StageIndex,
    pub binding: BindingIndex,
}

impl UsageNode {
    pub const INVALID: UsageNode = UsageNode {
        stage: u32::MAX,
        binding: u32::MAX,
    };

    pub fn is_invalid(self) -> bool {
        self == UsageNode::INVALID
    }
}

impl Default for UsageNode {
    fn default() -> UsageNode {
        UsageNode::INVALID
    }
}

/// Clear value for a render attachment. `r < 0.0` is the sentinel for
/// "load existing contents" rather than clear.
#[derive(Copy, Clone, Debug)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const LOAD: ClearColor = ClearColor {
        r: -1.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn is_load(self) -> bool {
        self.r < 0.0
    }
}

/// `{index-within-stage, kind, resource-handle, optional clear-color, next-usage}`.
#[derive(Copy, Clone, Debug)]
pub struct Binding {
    pub index: BindingIndex,
    pub kind: BindingKind,
    pub resource: ResourceRef,
    pub clear: Option<ClearColor>,
    pub next: UsageNode,
}

impl Binding {
    pub fn new(index: BindingIndex, kind: BindingKind, resource: ResourceRef) -> Binding {
        Binding {
            index,
            kind,
            resource,
            clear: None,
            next: UsageNode::INVALID,
        }
    }
}

/// Marks a buffer used in the current job and appends it to the used list
/// the first time — idempotent per job via `was_used_this_job`. Shared by
/// every prepare-pass caller (compute, render, transfer) so "mark used"
/// logic lives in exactly one place.
pub(crate) fn mark_buffer_used(used: &mut Vec<ResourceRef>, buffers: &mut Store<GpuBuffer>, h: Handle<GpuBuffer>) {
    let buf = buffers.get_mut(h);
    if !buf.was_used_this_job {
        buf.was_used_this_job = true;
        used.push(ResourceRef::Buffer(h));
    }
}

pub(crate) fn mark_image_used(used: &mut Vec<ResourceRef>, images: &mut Store<GpuImage>, h: Handle<GpuImage>) {
    let img = images.get_mut(h);
    if !img.was_used_this_job {
        img.was_used_this_job = true;
        used.push(ResourceRef::Image(h));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_ready_has_no_descriptor_type() {
        assert_eq!(BindingKind::PresentReady.descriptor_type(), None);
        assert_eq!(
            BindingKind::PresentReady.image_layout(),
            Some(vk::ImageLayout::PRESENT_SRC_KHR)
        );
        assert_eq!(BindingKind::PresentReady.access_mask(), vk::AccessFlags::empty());
    }

    #[test]
    fn vertex_buffer_is_buffer_kind() {
        assert!(BindingKind::VertexBuffer.is_buffer());
        assert!(!BindingKind::VertexBuffer.is_image());
        assert_eq!(BindingKind::VertexBuffer.image_layout(), None);
    }

    #[test]
    fn clear_color_load_sentinel() {
        assert!(ClearColor::LOAD.is_load());
        assert!(!ClearColor {
            r: 0.0,
            g: 0.0,
            b: 0.0,
            a: 1.0
        }
        .is_load());
    }
}
