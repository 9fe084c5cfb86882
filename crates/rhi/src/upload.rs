//! Batched CPU-to-GPU uploads through a growable staging buffer.
//!
//! All pending uploads for a batch are recorded first, then applied by a
//! single blocking flush. The staging buffer is single-writer-per-batch: one
//! flush fully completes (submit + wait) before the next batch starts
//! writing, so growing the buffer never races in-flight transfers.
//!
//! Capacity exhaustion is handled locally: the staging buffer is destroyed
//! and recreated at a larger size and the flush proceeds with the same
//! pending data. Callers never observe the growth.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::barrier::{PipelineBarrier, SyncScope};
use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandBuffer;
use crate::device::DeviceContext;
use crate::error::RhiResult;

/// Copy regions are packed at this alignment inside the staging buffer.
const STAGING_ALIGNMENT: usize = 4;

/// One buffered upload waiting for the next flush.
struct PendingCopy {
    /// Destination buffer handle (not owned).
    dst: vk::Buffer,
    /// Byte offset into the destination buffer.
    dst_offset: vk::DeviceSize,
    /// Byte offset into the staging buffer.
    src_offset: vk::DeviceSize,
    /// Copy size in bytes.
    size: vk::DeviceSize,
    /// Scope that must wait for the transfer write.
    blocked: SyncScope,
}

/// Staged upload batch with a growable staging buffer.
pub struct UploadBatch {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// CPU-visible transfer source.
    staging: Buffer,
    /// CPU-side bytes staged for the current batch.
    scratch: Vec<u8>,
    /// Copies recorded for the current batch.
    copies: Vec<PendingCopy>,
}

impl UploadBatch {
    /// Creates an upload batch with the given initial staging capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging buffer cannot be created.
    pub fn new(device: Arc<DeviceContext>, capacity: vk::DeviceSize) -> RhiResult<Self> {
        let staging = Buffer::new(device.clone(), BufferUsage::Staging, capacity)?;

        Ok(Self {
            device,
            staging,
            scratch: Vec::with_capacity(capacity as usize),
            copies: Vec::new(),
        })
    }

    /// Records an upload into `dst` at `dst_offset`.
    ///
    /// The data is buffered CPU-side; nothing reaches the GPU until
    /// [`UploadBatch::flush`]. `blocked` names the scope that reads the
    /// destination, so the flush can insert the matching transfer barrier.
    pub fn stage_buffer(
        &mut self,
        data: &[u8],
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        blocked: SyncScope,
    ) {
        if data.is_empty() {
            return;
        }

        let src_offset = align_up(self.scratch.len(), STAGING_ALIGNMENT);
        self.scratch.resize(src_offset, 0);
        self.scratch.extend_from_slice(data);

        self.copies.push(PendingCopy {
            dst,
            dst_offset,
            src_offset: src_offset as vk::DeviceSize,
            size: data.len() as vk::DeviceSize,
            blocked,
        });
    }

    /// Applies every staged upload in one blocking submission.
    ///
    /// If the staged data exceeds the staging capacity, the buffer is
    /// destroyed and recreated at a larger size first; the previous flush
    /// has already completed, so the old buffer cannot be in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if staging growth or submission fails. Capacity
    /// exhaustion itself is never an error.
    pub fn flush(&mut self) -> RhiResult<()> {
        if self.copies.is_empty() {
            return Ok(());
        }

        let required = self.scratch.len() as vk::DeviceSize;
        if required > self.staging.size() {
            let capacity = grown_capacity(self.staging.size(), required);
            debug!(
                "Growing staging buffer: {} -> {} bytes",
                self.staging.size(),
                capacity
            );
            self.staging = Buffer::new(self.device.clone(), BufferUsage::Staging, capacity)?;
        }

        self.staging.write_data(0, &self.scratch)?;

        let staging = self.staging.handle();
        let copies = std::mem::take(&mut self.copies);

        self.device.execute_one_time(|cmd: &CommandBuffer| {
            for copy in &copies {
                let region = vk::BufferCopy::default()
                    .src_offset(copy.src_offset)
                    .dst_offset(copy.dst_offset)
                    .size(copy.size);

                cmd.copy_buffer(staging, copy.dst, &[region]);
                cmd.buffer_barrier(
                    copy.dst,
                    PipelineBarrier::new(SyncScope::TRANSFER_WRITE, copy.blocked),
                );
            }
            Ok(())
        })?;

        self.scratch.clear();

        Ok(())
    }

    /// Returns the current staging capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> vk::DeviceSize {
        self.staging.size()
    }

    /// Returns the number of uploads staged for the next flush.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.copies.len()
    }

    /// Returns the number of bytes staged for the next flush.
    #[inline]
    pub fn staged_bytes(&self) -> vk::DeviceSize {
        self.scratch.len() as vk::DeviceSize
    }
}

/// Rounds `value` up to the next multiple of `alignment`.
fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Computes the grown staging capacity: doubles until `required` fits.
fn grown_capacity(current: vk::DeviceSize, required: vk::DeviceSize) -> vk::DeviceSize {
    let mut capacity = current.max(1);
    while capacity < required {
        capacity *= 2;
    }
    capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 4), 8);
    }

    #[test]
    fn test_grown_capacity_doubles_until_fit() {
        assert_eq!(grown_capacity(64, 65), 128);
        assert_eq!(grown_capacity(64, 256), 256);
        assert_eq!(grown_capacity(64, 257), 512);
    }

    #[test]
    fn test_grown_capacity_keeps_current_when_sufficient() {
        assert_eq!(grown_capacity(128, 100), 128);
        assert_eq!(grown_capacity(128, 128), 128);
    }

    #[test]
    fn test_grown_capacity_handles_zero_current() {
        assert_eq!(grown_capacity(0, 10), 16);
    }
}
