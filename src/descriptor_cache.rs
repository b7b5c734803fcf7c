//! Descriptor-set-layout cache (C12), two-dimensional: one layout per
//! (descriptor type, binding count), created lazily and reused forever.
//!
//! Grounded on `descriptor_helper.cpp`'s `descriptor_set_layout_category`,
//! generalized from its fixed-size `layouts_[count-1]` array to a hash map
//! keyed on the pair, since this crate doesn't fix a compile-time max
//! binding count the way the C++ source's stack-allocated array does.

use fxhash::FxHashMap;

use ash::vk;

use crate::device::GpuDevice;
use crate::error::abort_on_err;

#[derive(Default)]
pub struct DescriptorLayoutCache {
    layouts: FxHashMap<(vk::DescriptorType, u32), vk::DescriptorSetLayout>,
}

impl DescriptorLayoutCache {
    pub fn new() -> DescriptorLayoutCache {
        DescriptorLayoutCache::default()
    }

    /// Returns the cached layout for `(ty, count)`, creating it on first
    /// request. Every binding in the layout shares `ty` and is visible to
    /// all shader stages, matching the source's `VK_SHADER_STAGE_ALL`.
    pub fn get_or_create<D: GpuDevice>(
        &mut self,
        device: &D,
        ty: vk::DescriptorType,
        count: u32,
    ) -> vk::DescriptorSetLayout {
        *self.layouts.entry((ty, count)).or_insert_with(|| {
            info!("creating descriptor set layout for {:?} x{}", ty, count);
            abort_on_err(
                "create_descriptor_set_layout",
                device.create_descriptor_set_layout(ty, count),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    #[test]
    fn same_key_returns_same_layout() {
        let device = MockDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let a = cache.get_or_create(&device, vk::DescriptorType::STORAGE_BUFFER, 1);
        let b = cache.get_or_create(&device, vk::DescriptorType::STORAGE_BUFFER, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_counts_get_distinct_layouts() {
        let device = MockDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let a = cache.get_or_create(&device, vk::DescriptorType::STORAGE_BUFFER, 1);
        let b = cache.get_or_create(&device, vk::DescriptorType::STORAGE_BUFFER, 2);
        assert_ne!(a, b);
    }
}
