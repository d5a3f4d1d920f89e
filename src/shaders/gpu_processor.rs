// SPDX-License-Identifier: GPL-3.0-only

//! Shared dispatch and readback helpers
//!
//! - Work-group grid sizing for one-dimensional kernels
//! - Async buffer readback (map, poll, read, unmap)

use crate::errors::{EqualizeError, EqualizeResult};
use crate::gpu::wgpu;

/// Work-group grid covering a one-dimensional extent
///
/// Kernels index linearly; when the group count exceeds the per-dimension
/// limit the grid folds into y and the kernel linearises
/// `(y * groups_x + x) * group_size + lane`. Lanes past `extent` are
/// bounds-guarded in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub groups_x: u32,
    pub groups_y: u32,
    pub group_size: u32,
}

impl DispatchGrid {
    /// Grid for `extent` work items
    ///
    /// Always dispatches at least one group so zero-sized extents stay valid.
    pub fn for_extent(extent: u32, group_size: u32, max_per_dimension: u32) -> EqualizeResult<Self> {
        let groups = compute_dispatch_size(extent, group_size).max(1);
        let groups_x = groups.min(max_per_dimension.max(1));
        let groups_y = groups.div_ceil(groups_x);

        if groups_y > max_per_dimension {
            return Err(EqualizeError::Dispatch(format!(
                "{} work items need {} groups of {}, beyond the {}x{} grid limit",
                extent, groups, group_size, max_per_dimension, max_per_dimension
            )));
        }

        // global_index() is a u32 on the device; more lanes would wrap
        let grid = Self {
            groups_x,
            groups_y,
            group_size,
        };
        if grid.lanes() > u32::MAX as u64 + 1 {
            return Err(EqualizeError::Dispatch(format!(
                "{} work items fold into {}x{} groups of {}, past the 32-bit lane index",
                extent, groups_x, groups_y, group_size
            )));
        }

        Ok(grid)
    }

    /// Lanes launched, including bounds-guarded ones
    pub fn lanes(&self) -> u64 {
        self.groups_x as u64 * self.groups_y as u64 * self.group_size as u64
    }
}

/// Work-groups needed to cover `dimension`
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

/// Read a MAP_READ buffer back to host memory
///
/// Blocks on the device until the mapping completes, so the returned bytes are
/// a consistent snapshot of everything submitted before the call.
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> EqualizeResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| EqualizeError::Dispatch(format!("Device poll failed: {}", e)))?;

    receiver
        .await
        .map_err(|_| EqualizeError::Dispatch("Buffer mapping was dropped".to_string()))?
        .map_err(|e| EqualizeError::Dispatch(format!("Failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}
