// SPDX-License-Identifier: GPL-3.0-only

//! Device buffer arena
//!
//! The session owns every wgpu buffer. Callers hold `DeviceBuffer` handles,
//! which are plain copyable ids; resolving a handle borrows the arena for the
//! duration of one call.

use crate::errors::{EqualizeError, EqualizeResult};
use crate::gpu::wgpu;

/// How kernels access a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(&self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// Handle to a buffer owned by a `DeviceSession`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub(crate) id: usize,
    pub(crate) generation: u32,
    size: u64,
    mode: AccessMode,
}

impl DeviceBuffer {
    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

struct Slot {
    generation: u32,
    buffer: Option<wgpu::Buffer>,
}

/// Owned storage behind the handles
#[derive(Default)]
pub(crate) struct BufferArena {
    slots: Vec<Slot>,
}

impl BufferArena {
    /// Store `buffer`, reusing a released slot when one exists
    pub fn insert(&mut self, buffer: wgpu::Buffer, mode: AccessMode) -> DeviceBuffer {
        let size = buffer.size();

        if let Some((id, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.buffer.is_none())
        {
            slot.generation += 1;
            slot.buffer = Some(buffer);
            return DeviceBuffer {
                id,
                generation: slot.generation,
                size,
                mode,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            buffer: Some(buffer),
        });
        DeviceBuffer {
            id: self.slots.len() - 1,
            generation: 0,
            size,
            mode,
        }
    }

    pub fn get(&self, handle: &DeviceBuffer) -> EqualizeResult<&wgpu::Buffer> {
        self.slots
            .get(handle.id)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.buffer.as_ref())
            .ok_or_else(|| {
                EqualizeError::Dispatch(format!("buffer {} was released", handle.id))
            })
    }

    pub fn remove(&mut self, handle: &DeviceBuffer) -> EqualizeResult<wgpu::Buffer> {
        self.slots
            .get_mut(handle.id)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.buffer.take())
            .ok_or_else(|| {
                EqualizeError::Dispatch(format!("buffer {} was already released", handle.id))
            })
    }

    /// Buffers currently alive
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.take() {
                buffer.destroy();
            }
        }
    }
}
