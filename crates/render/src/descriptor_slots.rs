//! Descriptor-set allocation and update at Global and PerSlice rates.
//!
//! Every render stage binds its resources through a
//! [`DescriptorSlotProvider`]. The provider decouples how often data changes
//! from the mechanics of descriptor updates: a Global layout gets one set
//! shared by every frame slice, a PerSlice layout gets one set per slice.
//! Anything written every frame must be PerSlice, which is what keeps a
//! per-frame uniform from being overwritten while the GPU still reads the
//! previous frame's copy.
//!
//! Writes are staged by `push_global`/`push_slice` and applied by a single
//! batched native update in [`DescriptorSlotProvider::flush`].

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use hybrid_rhi::descriptor::{update_descriptor_sets, DescriptorPool};
use hybrid_rhi::device::DeviceContext;
use hybrid_rhi::RhiError;

use crate::error::{RenderError, RenderResult};

/// How often the data behind a descriptor set changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRate {
    /// One set, shared across all frame slices.
    Global,
    /// One set per frame slice.
    PerSlice,
}

/// One staged resource binding.
#[derive(Clone, Copy, Debug)]
pub enum DescriptorWrite {
    /// Uniform buffer range.
    UniformBuffer {
        /// Buffer handle (not owned).
        buffer: vk::Buffer,
        /// Byte offset into the buffer.
        offset: vk::DeviceSize,
        /// Bound range, or `vk::WHOLE_SIZE`.
        range: vk::DeviceSize,
    },
    /// Storage buffer range.
    StorageBuffer {
        /// Buffer handle (not owned).
        buffer: vk::Buffer,
        /// Byte offset into the buffer.
        offset: vk::DeviceSize,
        /// Bound range, or `vk::WHOLE_SIZE`.
        range: vk::DeviceSize,
    },
    /// Sampled image with its sampler.
    CombinedImageSampler {
        /// Sampler handle (not owned).
        sampler: vk::Sampler,
        /// Image view handle (not owned).
        view: vk::ImageView,
        /// Layout the image will be in when read.
        layout: vk::ImageLayout,
    },
    /// Storage image.
    StorageImage {
        /// Image view handle (not owned).
        view: vk::ImageView,
        /// Layout the image will be in when accessed.
        layout: vk::ImageLayout,
    },
}

impl DescriptorWrite {
    /// Returns the descriptor type this write targets.
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorWrite::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorWrite::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorWrite::CombinedImageSampler { .. } => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
            DescriptorWrite::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

/// Sets allocated for one declared layout.
struct SetAllocation {
    /// Rate fixed at allocation time.
    rate: SlotRate,
    /// One set (Global) or `slice_count` sets (PerSlice).
    sets: Vec<vk::DescriptorSet>,
}

/// A staged write waiting for the next flush.
struct StagedWrite {
    set: vk::DescriptorSet,
    binding: u32,
    write: DescriptorWrite,
}

/// Allocates and updates descriptor sets for one stage.
pub struct DescriptorSlotProvider {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Per-layout allocations, in declaration order.
    allocations: Vec<SetAllocation>,
    /// Bind list per slice index: `slices[i][set_index]`.
    slices: Vec<Vec<vk::DescriptorSet>>,
    /// Writes staged since the last flush.
    staged: Vec<StagedWrite>,
}

impl DescriptorSlotProvider {
    /// Creates an empty provider.
    pub fn new(device: Arc<DeviceContext>) -> Self {
        Self {
            device,
            allocations: Vec::new(),
            slices: Vec::new(),
            staged: Vec::new(),
        }
    }

    /// Allocates descriptor sets for the declared layouts.
    ///
    /// Global layouts get one set shared across every slice; PerSlice
    /// layouts get `slice_count` distinct sets. Any sets from a previous
    /// allocation are freed first, so re-allocating on resize is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if freeing or allocation fails, or if `slice_count`
    /// is zero.
    pub fn allocate(
        &mut self,
        pool: &DescriptorPool,
        layouts: &[(vk::DescriptorSetLayout, SlotRate)],
        slice_count: u32,
    ) -> RenderResult<()> {
        if slice_count == 0 {
            return Err(RenderError::Rhi(RhiError::DescriptorError(
                "Slice count must be greater than 0".to_string(),
            )));
        }

        self.free(pool)?;

        let mut allocations = Vec::with_capacity(layouts.len());

        for &(layout, rate) in layouts {
            let count = match rate {
                SlotRate::Global => 1,
                SlotRate::PerSlice => slice_count,
            };

            let handles = vec![layout; count as usize];
            let sets = pool.allocate(&handles).map_err(RenderError::Rhi)?;

            allocations.push(SetAllocation { rate, sets });
        }

        self.slices = build_slices(&allocations, slice_count);
        self.allocations = allocations;

        debug!(
            "Allocated descriptor slots: {} layout(s), {} slice(s)",
            layouts.len(),
            slice_count
        );

        Ok(())
    }

    /// Frees every allocated set back to the pool and clears the slices.
    ///
    /// The caller must ensure the GPU no longer reads the sets, or route
    /// the call through deferred destruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the native free fails.
    pub fn free(&mut self, pool: &DescriptorPool) -> RenderResult<()> {
        let sets: Vec<vk::DescriptorSet> = self
            .allocations
            .iter()
            .flat_map(|allocation| allocation.sets.iter().copied())
            .collect();

        pool.free(&sets).map_err(RenderError::Rhi)?;

        self.allocations.clear();
        self.slices.clear();
        self.staged.clear();

        Ok(())
    }

    /// Stages a write to a Global set.
    ///
    /// # Errors
    ///
    /// Returns an error if `set_index` is out of range or the layout is not
    /// Global-rate.
    pub fn push_global(
        &mut self,
        set_index: usize,
        binding: u32,
        write: DescriptorWrite,
    ) -> RenderResult<()> {
        let allocation = self.allocation(set_index)?;

        if allocation.rate != SlotRate::Global {
            return Err(descriptor_error(format!(
                "Set {} is PerSlice-rate; use push_slice",
                set_index
            )));
        }

        let set = allocation.sets[0];
        self.staged.push(StagedWrite {
            set,
            binding,
            write,
        });

        Ok(())
    }

    /// Stages a write to one slice of a PerSlice set.
    ///
    /// # Errors
    ///
    /// Returns an error if `set_index` or `slice` is out of range or the
    /// layout is not PerSlice-rate.
    pub fn push_slice(
        &mut self,
        set_index: usize,
        slice: u32,
        binding: u32,
        write: DescriptorWrite,
    ) -> RenderResult<()> {
        let allocation = self.allocation(set_index)?;

        if allocation.rate != SlotRate::PerSlice {
            return Err(descriptor_error(format!(
                "Set {} is Global-rate; use push_global",
                set_index
            )));
        }

        let set = *allocation.sets.get(slice as usize).ok_or_else(|| {
            descriptor_error(format!(
                "Slice {} out of range for set {} ({} slices)",
                slice,
                set_index,
                allocation.sets.len()
            ))
        })?;

        self.staged.push(StagedWrite {
            set,
            binding,
            write,
        });

        Ok(())
    }

    /// Applies every staged write in one batched native update.
    pub fn flush(&mut self) {
        if self.staged.is_empty() {
            return;
        }

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();

        enum InfoSlot {
            Buffer(usize),
            Image(usize),
        }

        let mut slots = Vec::with_capacity(self.staged.len());

        for staged in &self.staged {
            match staged.write {
                DescriptorWrite::UniformBuffer {
                    buffer,
                    offset,
                    range,
                }
                | DescriptorWrite::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(buffer)
                            .offset(offset)
                            .range(range),
                    );
                    slots.push(InfoSlot::Buffer(buffer_infos.len() - 1));
                }
                DescriptorWrite::CombinedImageSampler {
                    sampler,
                    view,
                    layout,
                } => {
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .sampler(sampler)
                            .image_view(view)
                            .image_layout(layout),
                    );
                    slots.push(InfoSlot::Image(image_infos.len() - 1));
                }
                DescriptorWrite::StorageImage { view, layout } => {
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .image_layout(layout),
                    );
                    slots.push(InfoSlot::Image(image_infos.len() - 1));
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = self
            .staged
            .iter()
            .zip(&slots)
            .map(|(staged, slot)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(staged.set)
                    .dst_binding(staged.binding)
                    .dst_array_element(0)
                    .descriptor_type(staged.write.descriptor_type());

                match *slot {
                    InfoSlot::Buffer(i) => {
                        write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    InfoSlot::Image(i) => write.image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect();

        update_descriptor_sets(&self.device, &writes);

        debug!("Flushed {} staged descriptor write(s)", self.staged.len());

        self.staged.clear();
    }

    /// Returns the sets to bind for frame slice `slice_index`.
    ///
    /// Length and order are stable for the lifetime of one allocation.
    ///
    /// # Panics
    ///
    /// Panics if `slice_index` is out of range.
    #[inline]
    pub fn descriptor_slice(&self, slice_index: u32) -> &[vk::DescriptorSet] {
        &self.slices[slice_index as usize]
    }

    /// Returns the number of slices.
    #[inline]
    pub fn slice_count(&self) -> u32 {
        self.slices.len() as u32
    }

    /// Returns the number of sets per slice.
    #[inline]
    pub fn set_count(&self) -> u32 {
        self.allocations.len() as u32
    }

    /// Returns the number of writes staged for the next flush.
    #[inline]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn allocation(&self, set_index: usize) -> RenderResult<&SetAllocation> {
        self.allocations.get(set_index).ok_or_else(|| {
            descriptor_error(format!(
                "Set index {} out of range ({} sets allocated)",
                set_index,
                self.allocations.len()
            ))
        })
    }
}

fn descriptor_error(message: String) -> RenderError {
    RenderError::Rhi(RhiError::DescriptorError(message))
}

/// Builds the per-slice bind lists from per-layout allocations.
///
/// Global allocations repeat their single set into every slice; PerSlice
/// allocations contribute their slice-indexed set.
fn build_slices(allocations: &[SetAllocation], slice_count: u32) -> Vec<Vec<vk::DescriptorSet>> {
    (0..slice_count as usize)
        .map(|slice| {
            allocations
                .iter()
                .map(|allocation| match allocation.rate {
                    SlotRate::Global => allocation.sets[0],
                    SlotRate::PerSlice => allocation.sets[slice],
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use ash::vk::Handle;

    fn fake_set(raw: u64) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(raw)
    }

    fn fake_allocations() -> Vec<SetAllocation> {
        vec![
            SetAllocation {
                rate: SlotRate::Global,
                sets: vec![fake_set(1)],
            },
            SetAllocation {
                rate: SlotRate::PerSlice,
                sets: vec![fake_set(10), fake_set(11), fake_set(12)],
            },
        ]
    }

    #[test]
    fn test_global_set_identical_across_slices() {
        let slices = build_slices(&fake_allocations(), 3);

        for slice in &slices {
            assert_eq!(slice[0], fake_set(1));
        }
    }

    #[test]
    fn test_per_slice_sets_distinct_per_slice() {
        let slices = build_slices(&fake_allocations(), 3);

        let per_slice: Vec<vk::DescriptorSet> = slices.iter().map(|s| s[1]).collect();
        assert_eq!(per_slice, vec![fake_set(10), fake_set(11), fake_set(12)]);

        for i in 0..per_slice.len() {
            for j in (i + 1)..per_slice.len() {
                assert_ne!(per_slice[i], per_slice[j]);
            }
        }
    }

    #[test]
    fn test_slice_length_and_order_stable() {
        let slices = build_slices(&fake_allocations(), 3);

        assert_eq!(slices.len(), 3);
        for slice in &slices {
            assert_eq!(slice.len(), 2);
        }
    }

    #[test]
    fn test_reallocation_produces_equivalent_structure() {
        // Handles differ between allocations, but counts and rate behavior
        // must match.
        let first = build_slices(&fake_allocations(), 3);

        let second_allocations = vec![
            SetAllocation {
                rate: SlotRate::Global,
                sets: vec![fake_set(2)],
            },
            SetAllocation {
                rate: SlotRate::PerSlice,
                sets: vec![fake_set(20), fake_set(21), fake_set(22)],
            },
        ];
        let second = build_slices(&second_allocations, 3);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.len(), b.len());
        }

        // Global column constant, per-slice column distinct, both times.
        assert!(second.iter().all(|s| s[0] == fake_set(2)));
        assert_ne!(second[0][1], second[1][1]);
    }

    #[test]
    fn test_descriptor_write_types() {
        let uniform = DescriptorWrite::UniformBuffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        assert_eq!(uniform.descriptor_type(), vk::DescriptorType::UNIFORM_BUFFER);

        let image = DescriptorWrite::StorageImage {
            view: vk::ImageView::null(),
            layout: vk::ImageLayout::GENERAL,
        };
        assert_eq!(image.descriptor_type(), vk::DescriptorType::STORAGE_IMAGE);
    }
}
