//! Transfer operations (C7): buffer update, buffer-to-buffer copy (device or
//! host destination), image blit, and the present-ready layout transition.
//!
//! Grounded on `graph.cpp`'s `prepare_transfer_graph_stage_`/
//! `execute_transfer_graph_stage_`: each variant here is one `switch` arm
//! there, with the binding pair it operates on folded into the enum instead
//! of being indexed out of a shared binding vector by position.

use ash::vk;

use crate::binding::{mark_buffer_used, mark_image_used, BindingKind, ResourceRef};
use crate::buffer::{BufferInfo, GpuBuffer};
use crate::device::{BufferBarrier, GpuDevice, ImageBarrier};
use crate::handle::{Handle, Store};
use crate::image::GpuImage;

#[derive(Copy, Clone, Debug)]
pub struct BufferRange {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

enum Kind {
    BufferUpdate {
        buffer: Handle<GpuBuffer>,
        data: Vec<u8>,
        offset: vk::DeviceSize,
    },
    /// Same GPU-side copy as `BufferCopy`; kept as a distinct variant
    /// because its destination buffer is expected to be host-visible so the
    /// caller can map and read it back once the job's fence signals.
    BufferCopyToHost {
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    },
    BufferCopy {
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    },
    ImageBlit {
        src: Handle<GpuImage>,
        dst: Handle<GpuImage>,
    },
    PresentReady {
        image: Handle<GpuImage>,
    },
}

/// One transfer-type stage within a job.
pub struct TransferOp {
    kind: Option<Kind>,
}

impl TransferOp {
    pub(crate) fn new() -> TransferOp {
        TransferOp { kind: None }
    }

    pub(crate) fn reset(&mut self) {
        self.kind = None;
    }

    pub fn init_as_buffer_update(&mut self, buffer: Handle<GpuBuffer>, data: &[u8], offset: vk::DeviceSize) {
        self.kind = Some(Kind::BufferUpdate {
            buffer,
            data: data.to_vec(),
            offset,
        });
    }

    pub fn init_as_buffer_copy_to_host(
        &mut self,
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    ) {
        self.kind = Some(Kind::BufferCopyToHost {
            dst,
            src,
            dst_offset,
            src_range,
        });
    }

    pub fn init_as_buffer_copy(
        &mut self,
        dst: Handle<GpuBuffer>,
        src: Handle<GpuBuffer>,
        dst_offset: vk::DeviceSize,
        src_range: BufferRange,
    ) {
        self.kind = Some(Kind::BufferCopy {
            dst,
            src,
            dst_offset,
            src_range,
        });
    }

    pub fn init_as_image_blit(&mut self, src: Handle<GpuImage>, dst: Handle<GpuImage>) {
        self.kind = Some(Kind::ImageBlit { src, dst });
    }

    pub fn init_as_present_ready(&mut self, image: Handle<GpuImage>) {
        self.kind = Some(Kind::PresentReady { image });
    }

    /// Runs `update_action`/marks-used for every resource this op touches.
    /// Called during the prepare pass, before any GPU object exists yet.
    pub(crate) fn prepare(&self, buffers: &mut Store<GpuBuffer>, images: &mut Store<GpuImage>, used: &mut Vec<ResourceRef>) {
        match self.kind.as_ref().expect("transfer op issued without being initialized") {
            Kind::BufferUpdate { buffer, .. } => {
                buffers.get_mut(*buffer).update_action(BindingKind::BufferTransferDst);
                mark_buffer_used(used, buffers, *buffer);
            }
            Kind::BufferCopyToHost { dst, src, .. } => {
                buffers.get_mut(*dst).configure(&BufferInfo {
                    host_visible: true,
                    ..Default::default()
                });
                buffers.get_mut(*dst).update_action(BindingKind::BufferTransferDst);
                mark_buffer_used(used, buffers, *dst);
                buffers.get_mut(*src).update_action(BindingKind::BufferTransferSrc);
                mark_buffer_used(used, buffers, *src);
            }
            Kind::BufferCopy { dst, src, .. } => {
                buffers.get_mut(*dst).update_action(BindingKind::BufferTransferDst);
                mark_buffer_used(used, buffers, *dst);
                buffers.get_mut(*src).update_action(BindingKind::BufferTransferSrc);
                mark_buffer_used(used, buffers, *src);
            }
            Kind::ImageBlit { src, dst } => {
                images.get_mut(*src).update_action(BindingKind::ImageTransferSrc);
                mark_image_used(used, images, *src);
                images.get_mut(*dst).update_action(BindingKind::ImageTransferDst);
                mark_image_used(used, images, *dst);
            }
            Kind::PresentReady { image } => {
                images.get_mut(*image).update_action(BindingKind::PresentReady);
                mark_image_used(used, images, *image);
            }
        }
    }

    pub(crate) fn issue_commands<D: GpuDevice>(
        &self,
        device: &D,
        cmd: vk::CommandBuffer,
        buffers: &mut Store<GpuBuffer>,
        images: &mut Store<GpuImage>,
    ) {
        match self.kind.as_ref().expect("transfer op issued without being initialized") {
            Kind::BufferUpdate { buffer, data, offset } => {
                let buf = buffers.get_mut(*buffer);
                device.pipeline_barrier(
                    cmd,
                    buf.last_stage,
                    vk::PipelineStageFlags::TRANSFER,
                    &[],
                    &[BufferBarrier {
                        buffer: buf.raw(),
                        offset: *offset,
                        size: data.len() as vk::DeviceSize,
                        src_access: buf.current_access,
                        dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    }],
                );
                device.update_buffer(cmd, buf.raw(), *offset, data);
                buf.current_access = vk::AccessFlags::TRANSFER_WRITE;
                buf.last_stage = vk::PipelineStageFlags::TRANSFER;
            }
            Kind::BufferCopyToHost { dst, src, dst_offset, src_range }
            | Kind::BufferCopy { dst, src, dst_offset, src_range } => {
                {
                    let d = buffers.get_mut(*dst);
                    device.pipeline_barrier(
                        cmd,
                        d.last_stage,
                        vk::PipelineStageFlags::TRANSFER,
                        &[],
                        &[BufferBarrier {
                            buffer: d.raw(),
                            offset: *dst_offset,
                            size: src_range.size,
                            src_access: d.current_access,
                            dst_access: vk::AccessFlags::TRANSFER_WRITE,
                        }],
                    );
                    d.current_access = vk::AccessFlags::TRANSFER_WRITE;
                    d.last_stage = vk::PipelineStageFlags::TRANSFER;
                }
                {
                    let s = buffers.get_mut(*src);
                    device.pipeline_barrier(
                        cmd,
                        s.last_stage,
                        vk::PipelineStageFlags::TRANSFER,
                        &[],
                        &[BufferBarrier {
                            buffer: s.raw(),
                            offset: src_range.offset,
                            size: src_range.size,
                            src_access: s.current_access,
                            dst_access: vk::AccessFlags::TRANSFER_READ,
                        }],
                    );
                    s.current_access = vk::AccessFlags::TRANSFER_READ;
                    s.last_stage = vk::PipelineStageFlags::TRANSFER;
                }
                device.copy_buffer(
                    cmd,
                    buffers.get(*src).raw(),
                    buffers.get(*dst).raw(),
                    src_range.offset,
                    *dst_offset,
                    src_range.size,
                );
            }
            Kind::ImageBlit { src, dst } => {
                let src_layout = BindingKind::ImageTransferSrc.image_layout().unwrap();
                let dst_layout = BindingKind::ImageTransferDst.image_layout().unwrap();
                {
                    let s = images.get_mut(*src);
                    device.pipeline_barrier(
                        cmd,
                        s.last_stage,
                        vk::PipelineStageFlags::TRANSFER,
                        &[ImageBarrier {
                            image: s.raw(),
                            aspect: vk::ImageAspectFlags::COLOR,
                            old_layout: s.current_layout,
                            new_layout: src_layout,
                            src_access: s.current_access,
                            dst_access: vk::AccessFlags::TRANSFER_READ,
                        }],
                        &[],
                    );
                    s.current_layout = src_layout;
                    s.current_access = vk::AccessFlags::TRANSFER_READ;
                    s.last_stage = vk::PipelineStageFlags::TRANSFER;
                }
                {
                    let d = images.get_mut(*dst);
                    device.pipeline_barrier(
                        cmd,
                        d.last_stage,
                        vk::PipelineStageFlags::TRANSFER,
                        &[ImageBarrier {
                            image: d.raw(),
                            aspect: vk::ImageAspectFlags::COLOR,
                            old_layout: d.current_layout,
                            new_layout: dst_layout,
                            src_access: d.current_access,
                            dst_access: vk::AccessFlags::TRANSFER_WRITE,
                        }],
                        &[],
                    );
                    d.current_layout = dst_layout;
                    d.current_access = vk::AccessFlags::TRANSFER_WRITE;
                    d.last_stage = vk::PipelineStageFlags::TRANSFER;
                }
                let s = images.get(*src);
                let d = images.get(*dst);
                device.blit_image(cmd, s.raw(), s.extent(), d.raw(), d.extent(), vk::ImageAspectFlags::COLOR);
            }
            Kind::PresentReady { image } => {
                let img = images.get_mut(*image);
                device.pipeline_barrier(
                    cmd,
                    img.last_stage,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    &[ImageBarrier {
                        image: img.raw(),
                        aspect: vk::ImageAspectFlags::COLOR,
                        old_layout: img.current_layout,
                        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                        src_access: img.current_access,
                        dst_access: vk::AccessFlags::empty(),
                    }],
                    &[],
                );
                img.current_layout = vk::ImageLayout::PRESENT_SRC_KHR;
                img.current_access = vk::AccessFlags::empty();
                img.last_stage = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
            }
        }
    }
}

impl Default for TransferOp {
    fn default() -> TransferOp {
        TransferOp::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_kind() {
        let mut store: Store<GpuBuffer> = Store::with_capacity(1);
        let h = store.add(GpuBuffer::new());
        let mut op = TransferOp::new();
        op.init_as_buffer_update(h, &[1, 2, 3], 0);
        assert!(op.kind.is_some());
        op.reset();
        assert!(op.kind.is_none());
    }
}
