//! Render pass (C6): color/depth attachments + a user-supplied draw
//! callback, compiled to one `vkCmdBeginRenderingKHR`/`...EndRenderingKHR`
//! span.
//!
//! Grounded on `render_pass.cpp`/`render_pass.hpp`. The original's
//! function-pointer-plus-`void*` callback pair (`prepare_commands_proc`,
//! `draw_commands_proc`) becomes a pair of boxed closures over `&dyn
//! GpuDevice`, since the device trait is already object-safe and a closure
//! is the idiomatic replacement for "function pointer plus untyped aux
//! pointer" in Rust.

use ash::vk;

use crate::binding::{Binding, BindingKind, ClearColor, ResourceRef, StageIndex};
use crate::bump::{BumpArena, BumpVec};
use crate::device::{AttachmentInfo, GpuDevice, ImageBarrier};
use crate::handle::{Handle, Store};
use crate::image::GpuImage;

type PrepareFn = Box<dyn FnMut(&dyn GpuDevice, vk::CommandBuffer)>;
type DrawFn = Box<dyn FnMut(&dyn GpuDevice, vk::CommandBuffer, vk::Rect2D)>;

/// A render pass under construction within one job.
pub struct RenderPass {
    pub(crate) stage: StageIndex,
    bindings: Vec<Binding>,
    depth_index: Option<usize>,
    render_area: vk::Rect2D,
    prepare: Option<PrepareFn>,
    draw: Option<DrawFn>,
}

impl RenderPass {
    pub(crate) fn new(stage: StageIndex) -> RenderPass {
        RenderPass {
            stage,
            bindings: Vec::new(),
            depth_index: None,
            render_area: vk::Rect2D::default(),
            prepare: None,
            draw: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.bindings.clear();
        self.depth_index = None;
        self.render_area = vk::Rect2D::default();
        self.prepare = None;
        self.draw = None;
    }

    /// `color = ClearColor::LOAD` keeps existing contents instead of
    /// clearing, matching the default in `render_pass.hpp`.
    pub fn add_color_attachment(&mut self, image: Handle<GpuImage>, color: ClearColor) -> &mut RenderPass {
        self.push_binding(BindingKind::ColorAttachment, image, color);
        self
    }

    pub fn add_depth_attachment(&mut self, image: Handle<GpuImage>, color: ClearColor) -> &mut RenderPass {
        self.depth_index = Some(self.bindings.len());
        self.push_binding(BindingKind::DepthAttachment, image, color);
        self
    }

    fn push_binding(&mut self, kind: BindingKind, image: Handle<GpuImage>, color: ClearColor) {
        let index = self.bindings.len() as u32;
        let mut b = Binding::new(index, kind, ResourceRef::Image(image));
        b.clear = Some(color);
        self.bindings.push(b);
    }

    pub(crate) fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// If never set, the render area inherits the extent of the first
    /// attachment — see `issue_commands`.
    pub fn set_render_area(&mut self, rect: vk::Rect2D) -> &mut RenderPass {
        self.render_area = rect;
        self
    }

    pub fn prepare_commands<F>(&mut self, f: F) -> &mut RenderPass
    where
        F: FnMut(&dyn GpuDevice, vk::CommandBuffer) + 'static,
    {
        self.prepare = Some(Box::new(f));
        self
    }

    pub fn draw_commands<F>(&mut self, f: F) -> &mut RenderPass
    where
        F: FnMut(&dyn GpuDevice, vk::CommandBuffer, vk::Rect2D) + 'static,
    {
        self.draw = Some(Box::new(f));
        self
    }

    pub(crate) fn issue_commands(
        &mut self,
        device: &dyn GpuDevice,
        cmd: vk::CommandBuffer,
        images: &mut Store<GpuImage>,
        bump: &BumpArena,
    ) {
        if let Some(prepare) = self.prepare.as_mut() {
            prepare(device, cmd);
        }

        let mut color_attachments: BumpVec<AttachmentInfo> = BumpVec::with_capacity(bump, self.bindings.len());
        let mut depth_attachment = None;

        for (b_idx, binding) in self.bindings.iter().enumerate() {
            let image_handle = match binding.resource {
                ResourceRef::Image(h) => h,
                ResourceRef::Buffer(_) => unreachable!("render pass binding is always an image"),
            };
            let img = images.get_mut(image_handle);
            let new_layout = binding.kind.image_layout().unwrap();
            let dst_access = binding.kind.access_mask();
            let dst_stage = binding.kind.pipeline_stage();
            let clear = binding.clear.unwrap_or(ClearColor::LOAD);

            device.pipeline_barrier(
                cmd,
                img.last_stage,
                dst_stage,
                &[ImageBarrier {
                    image: img.raw(),
                    aspect: img.aspect(),
                    old_layout: img.current_layout,
                    new_layout,
                    src_access: img.current_access,
                    dst_access,
                }],
                &[],
            );
            img.current_layout = new_layout;
            img.current_access = dst_access;
            img.last_stage = dst_stage;

            let load_op = if clear.is_load() {
                vk::AttachmentLoadOp::LOAD
            } else {
                vk::AttachmentLoadOp::CLEAR
            };
            let attachment = AttachmentInfo {
                image_view: img.view(),
                layout: new_layout,
                load_op,
                store_op: vk::AttachmentStoreOp::STORE,
                clear_value: if Some(b_idx) == self.depth_index {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: clear.r,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [clear.r, clear.g, clear.b, clear.a],
                        },
                    }
                },
            };

            if Some(b_idx) == self.depth_index {
                depth_attachment = Some(attachment);
            } else {
                color_attachments.push(attachment);
            }
        }

        if self.render_area.extent.width == 0 {
            let first = match self.bindings[0].resource {
                ResourceRef::Image(h) => h,
                ResourceRef::Buffer(_) => unreachable!(),
            };
            let extent = images.get(first).extent();
            self.render_area = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: extent.width,
                    height: extent.height,
                },
            };
        }

        device.begin_rendering(cmd, self.render_area, color_attachments.as_slice(), depth_attachment);
        device.cmd_set_viewport_scissor(cmd, self.render_area);

        let draw = self.draw.as_mut().expect("render pass issued without draw_commands");
        draw(device, cmd, self.render_area);

        device.end_rendering(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_attachment_tracks_its_own_binding_index() {
        let mut pass = RenderPass::new(0);
        let mut store: Store<GpuImage> = Store::with_capacity(2);
        let color = store.add(GpuImage::new());
        let depth = store.add(GpuImage::new());
        pass.add_color_attachment(color, ClearColor::LOAD);
        pass.add_depth_attachment(depth, ClearColor::LOAD);
        assert_eq!(pass.depth_index, Some(1));
    }

    #[test]
    fn reset_clears_depth_index_and_render_area() {
        let mut pass = RenderPass::new(0);
        let mut store: Store<GpuImage> = Store::with_capacity(1);
        let depth = store.add(GpuImage::new());
        pass.add_depth_attachment(depth, ClearColor::LOAD);
        pass.set_render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D { width: 10, height: 10 },
        });
        pass.reset();
        assert_eq!(pass.depth_index, None);
        assert_eq!(pass.render_area.extent.width, 0);
        assert!(pass.bindings.is_empty());
    }
}
