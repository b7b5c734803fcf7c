//! GPU image (C4): lazily-allocated image + view + memory + descriptor sets.
//!
//! Grounded on `gpu_image.cpp`: `configure` is first-commit-wins (unlike
//! the buffer's additive `configure`), `alloc` picks 2D vs 3D from
//! `extent.depth`, and swapchain-backed images bypass `alloc` entirely by
//! having their externally-owned image/view written straight into the
//! record and marked already committed.

use ash::vk;

use crate::binding::{BindingKind, UsageNode};
use crate::descriptor_cache::DescriptorLayoutCache;
use crate::device::GpuDevice;
use crate::error::abort_on_err;

#[derive(Copy, Clone, Debug, Default)]
pub struct ImageInfo {
    pub kind: Option<BindingKind>,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub is_depth: bool,
    pub array_layers: u32,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) enum Action {
    ToCreate,
    None,
}

struct Committed {
    image: vk::Image,
    view: vk::ImageView,
    memory: Option<vk::DeviceMemory>,
    externally_owned: bool,
}

pub struct GpuImage {
    extent: vk::Extent3D,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    array_layers: u32,
    usage: vk::ImageUsageFlags,
    configured: bool,
    committed: Option<Committed>,
    sampled_set: Option<vk::DescriptorSet>,
    storage_set: Option<vk::DescriptorSet>,
    pub(crate) current_layout: vk::ImageLayout,
    pub(crate) current_access: vk::AccessFlags,
    pub(crate) last_stage: vk::PipelineStageFlags,
    pub(crate) head: UsageNode,
    pub(crate) tail: UsageNode,
    pub(crate) was_used_this_job: bool,
    pub(crate) action: Action,
}

impl GpuImage {
    pub fn new() -> GpuImage {
        GpuImage {
            extent: vk::Extent3D::default(),
            format: vk::Format::UNDEFINED,
            aspect: vk::ImageAspectFlags::COLOR,
            array_layers: 1,
            usage: vk::ImageUsageFlags::empty(),
            configured: false,
            committed: None,
            sampled_set: None,
            storage_set: None,
            current_layout: vk::ImageLayout::UNDEFINED,
            current_access: vk::AccessFlags::empty(),
            last_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            head: UsageNode::INVALID,
            tail: UsageNode::INVALID,
            was_used_this_job: false,
            action: Action::None,
        }
    }

    /// Wraps an externally-owned (swapchain) image/view. Marked already
    /// committed; destroying it is the surface adapter's responsibility,
    /// never this crate's.
    pub fn from_swapchain_image(image: vk::Image, view: vk::ImageView, extent: vk::Extent3D, format: vk::Format) -> GpuImage {
        let mut img = GpuImage::new();
        img.extent = extent;
        img.format = format;
        img.configured = true;
        img.committed = Some(Committed {
            image,
            view,
            memory: None,
            externally_owned: true,
        });
        img
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub(crate) fn raw(&self) -> vk::Image {
        self.committed.as_ref().expect("image not yet committed").image
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.committed.as_ref().expect("image not yet committed").view
    }

    /// First-commit-wins: once the image is committed, further `configure`
    /// calls are silently ignored (matching `gpu_image::configure`).
    pub fn configure(&mut self, info: &ImageInfo) {
        if self.committed.is_some() {
            return;
        }
        if let Some(kind) = info.kind {
            self.usage |= usage_for_kind(kind);
        }
        if !self.configured {
            self.extent = info.extent;
            self.format = if info.format == vk::Format::UNDEFINED && info.is_depth {
                vk::Format::D32_SFLOAT
            } else {
                info.format
            };
            self.aspect = if info.is_depth {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };
            self.array_layers = info.array_layers.max(1);
            self.configured = true;
        }
    }

    pub(crate) fn update_action(&mut self, kind: BindingKind) {
        self.action = if self.committed.is_none() {
            Action::ToCreate
        } else {
            Action::None
        };
        self.usage |= usage_for_kind(kind);
    }

    /// Creates a 2D image if `extent.depth == 1`, else 3D; mip=1,
    /// sample-count=1, tiling=optimal, sharing=exclusive, initial
    /// layout=undefined, plus a matching view. No-op if already committed
    /// (including swapchain-aliased images, which arrive pre-committed).
    pub fn alloc<D: GpuDevice>(&mut self, device: &D) {
        if self.committed.is_some() {
            return;
        }
        let (image, view, memory) = abort_on_err(
            "create_image",
            device.create_image(self.extent, self.format, self.usage, self.array_layers),
        );
        info!(
            "created image {:?} ({}x{}x{}, format={:?})",
            image, self.extent.width, self.extent.height, self.extent.depth, self.format
        );
        self.committed = Some(Committed {
            image,
            view,
            memory: Some(memory),
            externally_owned: false,
        });
    }

    pub(crate) fn apply_action<D: GpuDevice>(&mut self, device: &D, cache: &mut DescriptorLayoutCache) {
        if self.action == Action::ToCreate {
            self.alloc(device);
        }
        self.create_descriptors(device, cache);
    }

    fn create_descriptors<D: GpuDevice>(&mut self, device: &D, cache: &mut DescriptorLayoutCache) {
        let view = self.view();
        if self.usage.contains(vk::ImageUsageFlags::SAMPLED) && self.sampled_set.is_none() {
            self.sampled_set = Some(self.create_descriptor_set(
                device,
                cache,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ));
        }
        if self.usage.contains(vk::ImageUsageFlags::STORAGE) && self.storage_set.is_none() {
            self.storage_set = Some(self.create_descriptor_set(
                device,
                cache,
                vk::DescriptorType::STORAGE_IMAGE,
                view,
                vk::ImageLayout::GENERAL,
            ));
        }
    }

    fn create_descriptor_set<D: GpuDevice>(
        &self,
        device: &D,
        cache: &mut DescriptorLayoutCache,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> vk::DescriptorSet {
        let desc_layout = cache.get_or_create(device, ty, 1);
        let set = abort_on_err("allocate_descriptor_set", device.allocate_descriptor_set(desc_layout));
        device.write_image_descriptor(set, ty, view, layout);
        set
    }

    /// Returns the descriptor set for `kind`. Only `SampledImage` and
    /// `StorageImage` go through an image descriptor set; anything else
    /// (attachments, transfer endpoints, present-ready) is a programmer
    /// error to ask for here.
    pub(crate) fn descriptor_set(&self, kind: BindingKind) -> vk::DescriptorSet {
        match kind {
            BindingKind::SampledImage => self.sampled_set,
            BindingKind::StorageImage => self.storage_set,
            _ => panic!("{:?} does not go through an image descriptor set", kind),
        }
        .expect("descriptor set requested before it was created")
    }
}

impl Default for GpuImage {
    fn default() -> GpuImage {
        GpuImage::new()
    }
}

fn usage_for_kind(kind: BindingKind) -> vk::ImageUsageFlags {
    match kind {
        BindingKind::SampledImage => vk::ImageUsageFlags::SAMPLED,
        BindingKind::StorageImage => vk::ImageUsageFlags::STORAGE,
        BindingKind::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        BindingKind::DepthAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        BindingKind::ImageTransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
        BindingKind::ImageTransferDst => vk::ImageUsageFlags::TRANSFER_DST,
        _ => vk::ImageUsageFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_is_first_commit_wins() {
        let mut img = GpuImage::new();
        img.configure(&ImageInfo {
            kind: None,
            extent: vk::Extent3D {
                width: 64,
                height: 64,
                depth: 1,
            },
            format: vk::Format::R8G8B8A8_UNORM,
            is_depth: false,
            array_layers: 1,
        });
        img.configure(&ImageInfo {
            kind: None,
            extent: vk::Extent3D {
                width: 128,
                height: 128,
                depth: 1,
            },
            format: vk::Format::R32G32B32A32_SFLOAT,
            is_depth: false,
            array_layers: 1,
        });
        assert_eq!(img.extent.width, 64);
        assert_eq!(img.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn depth_image_defaults_format() {
        let mut img = GpuImage::new();
        img.configure(&ImageInfo {
            kind: None,
            extent: vk::Extent3D {
                width: 64,
                height: 64,
                depth: 1,
            },
            format: vk::Format::UNDEFINED,
            is_depth: true,
            array_layers: 1,
        });
        assert_eq!(img.format, vk::Format::D32_SFLOAT);
        assert_eq!(img.aspect, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn swapchain_image_is_already_committed() {
        let img = GpuImage::from_swapchain_image(
            vk::Image::from_raw(1),
            vk::ImageView::from_raw(1),
            vk::Extent3D {
                width: 800,
                height: 600,
                depth: 1,
            },
            vk::Format::B8G8R8A8_UNORM,
        );
        assert!(img.is_committed());
        assert!(img.committed.as_ref().unwrap().externally_owned);
    }
}
