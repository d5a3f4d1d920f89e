// SPDX-License-Identifier: GPL-3.0-only

//! Accelerator session: device, queue, compiled kernels and buffer arena
//!
//! Every device-side resource of a run lives here. Stages receive
//! `&mut DeviceSession` plus buffer handles for the duration of one call and
//! never hold wgpu objects themselves.
//!
//! Dispatches are enqueued without waiting. `synchronize()` is the only
//! barrier: a stage that consumes another stage's output must be preceded by
//! one.

mod buffers;

pub use buffers::{AccessMode, DeviceBuffer};

use crate::constants::{bindings, workgroup};
use crate::errors::{EqualizeError, EqualizeResult};
use crate::gpu::{self, DeviceSelection, GpuDeviceInfo, wgpu};
use crate::media::BitDepth;
use crate::shaders::{self, DispatchGrid, Kernel, Params};
use buffers::BufferArena;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

/// Session construction options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub selection: DeviceSelection,
    /// Requested lanes per work-group; capped by the device and `workgroup::MAX_SIZE`
    pub group_size: Option<u32>,
    /// Replacement kernel body (WGSL); the built-in module when unset
    pub kernel_source: Option<String>,
}

/// Effective device limits for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub group_size: u32,
    pub max_groups_per_dimension: u32,
    pub max_buffer_bytes: u64,
    /// Largest one-dimensional extent a single kernel can address
    pub max_span: u32,
}

impl SessionLimits {
    /// Derive session limits from device limits and a requested group size
    pub fn from_device(limits: &wgpu::Limits, requested_group: Option<u32>) -> Self {
        let group_size = requested_group
            .unwrap_or(workgroup::DEFAULT_SIZE)
            .clamp(1, workgroup::MAX_SIZE)
            .min(limits.max_compute_invocations_per_workgroup)
            .min(limits.max_compute_workgroup_size_x)
            .max(1);

        let max_groups = limits.max_compute_workgroups_per_dimension.max(1);
        let max_buffer_bytes = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);

        let grid_span = max_groups as u64 * max_groups as u64 * group_size as u64;
        let storage_span = max_buffer_bytes / 4;
        let max_span = grid_span.min(storage_span).min(u32::MAX as u64) as u32;

        Self {
            group_size,
            max_groups_per_dimension: max_groups,
            max_buffer_bytes,
            max_span,
        }
    }
}

/// Binding slots kernels write to
fn slot_is_written(binding: u32) -> bool {
    matches!(
        binding,
        bindings::HIST_ACCUM
            | bindings::SCAN_OUT
            | bindings::DOUBLING_DST
            | bindings::LUT_OUT
            | bindings::OUTPUT
    )
}

/// Owned accelerator resources for one run
pub struct DeviceSession {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GpuDeviceInfo,
    limits: SessionLimits,
    depth: BitDepth,
    pipelines: HashMap<Kernel, wgpu::ComputePipeline>,
    arena: BufferArena,
}

impl DeviceSession {
    /// Open a device and compile the kernel module for `depth`
    pub async fn open(depth: BitDepth, options: &SessionOptions) -> EqualizeResult<Self> {
        info!(bits = depth.bits(), "Initializing equalization session");

        let (device, queue, device_limits, gpu_info) =
            gpu::create_compute_device(&options.selection, "histeq_session").await?;

        let limits = SessionLimits::from_device(&device_limits, options.group_size);
        if let Some(requested) = options.group_size
            && requested != limits.group_size
        {
            warn!(
                requested,
                effective = limits.group_size,
                "Work-group size capped by device"
            );
        }

        let body = options
            .kernel_source
            .as_deref()
            .unwrap_or(shaders::EQUALIZE_KERNELS);
        let source = match depth {
            BitDepth::Eight => shaders::assemble_module::<u8>(limits.group_size, body),
            BitDepth::Sixteen => shaders::assemble_module::<u16>(limits.group_size, body),
        };
        let pipelines = Self::build_pipelines(&device, &source, depth).await?;

        info!(
            adapter_name = %gpu_info.adapter_name,
            adapter_backend = ?gpu_info.backend,
            group_size = limits.group_size,
            max_span = limits.max_span,
            "Equalization session ready"
        );

        Ok(Self {
            device,
            queue,
            info: gpu_info,
            limits,
            depth,
            pipelines,
            arena: BufferArena::default(),
        })
    }

    /// Blocking variant of [`DeviceSession::open`]
    pub fn open_blocking(depth: BitDepth, options: &SessionOptions) -> EqualizeResult<Self> {
        pollster::block_on(Self::open(depth, options))
    }

    /// Compile the module and create one pipeline per entry point.
    ///
    /// Compiler messages and validation errors are collected into a single
    /// `Build` error.
    async fn build_pipelines(
        device: &wgpu::Device,
        source: &str,
        depth: BitDepth,
    ) -> EqualizeResult<HashMap<Kernel, wgpu::ComputePipeline>> {
        let missing = shaders::missing_entry_points(source);
        if !missing.is_empty() {
            return Err(EqualizeError::Build(format!(
                "kernel module does not define: {}",
                missing.join(", ")
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("equalize_u{}", depth.bits())),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut diagnostics: Vec<String> = module
            .get_compilation_info()
            .await
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| match &m.location {
                Some(loc) => format!(
                    "{}:{}: {}",
                    loc.line_number, loc.line_position, m.message
                ),
                None => m.message.clone(),
            })
            .collect();

        let pipelines: HashMap<Kernel, wgpu::ComputePipeline> = Kernel::ALL
            .iter()
            .map(|kernel| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.entry_point()),
                    layout: None,
                    module: &module,
                    entry_point: Some(kernel.entry_point()),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (*kernel, pipeline)
            })
            .collect();

        if let Some(error) = device.pop_error_scope().await {
            diagnostics.push(error.to_string());
        }

        if !diagnostics.is_empty() {
            return Err(EqualizeError::Build(diagnostics.join("\n")));
        }

        debug!(kernels = pipelines.len(), "Kernel module compiled");
        Ok(pipelines)
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    /// Buffers currently allocated
    pub fn live_buffers(&self) -> usize {
        self.arena.live()
    }

    /// Allocate a device buffer of at least `size` bytes
    ///
    /// Sizes round up to whole 32-bit words; zero-sized requests get one word.
    pub fn allocate(&mut self, size: u64, mode: AccessMode, label: &str) -> EqualizeResult<DeviceBuffer> {
        let size = size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.limits.max_buffer_bytes {
            return Err(EqualizeError::Configuration(format!(
                "{} needs {} bytes, device allows {}",
                label, size, self.limits.max_buffer_bytes
            )));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let handle = self.arena.insert(buffer, mode);
        debug!(label, size, id = handle.id, "Allocated device buffer");
        Ok(handle)
    }

    /// Return a buffer to the arena
    pub fn release(&mut self, buffer: DeviceBuffer) -> EqualizeResult<()> {
        self.arena.remove(&buffer)?.destroy();
        Ok(())
    }

    /// Upload host data; returns once the device copy is complete
    pub async fn write<T: bytemuck::Pod>(&mut self, buffer: &DeviceBuffer, data: &[T]) -> EqualizeResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 > buffer.size() {
            return Err(EqualizeError::Dispatch(format!(
                "write of {} bytes into {} byte buffer",
                bytes.len(),
                buffer.size()
            )));
        }
        if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(EqualizeError::Dispatch(format!(
                "write of {} bytes is not word aligned",
                bytes.len()
            )));
        }

        let target = self.arena.get(buffer)?;
        self.queue.write_buffer(target, 0, bytes);
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        self.synchronize()
    }

    /// Download a buffer as 32-bit words; returns once the host copy is complete
    pub async fn read(&mut self, buffer: &DeviceBuffer) -> EqualizeResult<Vec<u32>> {
        let source = self.arena.get(buffer)?;
        let size = buffer.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("histeq_readback_staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("histeq_readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = shaders::read_buffer_async(&self.device, &staging).await?;

        Ok(bytes
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    /// Enqueue a device-side clear to zero
    pub fn zero(&mut self, buffer: &DeviceBuffer) -> EqualizeResult<()> {
        let target = self.arena.get(buffer)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("histeq_clear"),
            });
        encoder.clear_buffer(target, 0, None);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Enqueue a device-side copy of `bytes` bytes
    pub fn copy(&mut self, src: &DeviceBuffer, dst: &DeviceBuffer, bytes: u64) -> EqualizeResult<()> {
        if bytes > src.size() || bytes > dst.size() {
            return Err(EqualizeError::Dispatch(format!(
                "copy of {} bytes exceeds buffer size",
                bytes
            )));
        }
        let source = self.arena.get(src)?;
        let target = self.arena.get(dst)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("histeq_copy"),
            });
        encoder.copy_buffer_to_buffer(source, 0, target, 0, bytes.next_multiple_of(4));
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Enqueue `kernel` over `global_extent` work items.
    ///
    /// `args` are the kernel's buffer arguments in contract order (see
    /// [`Kernel::bindings`]); scalars travel in `params`. The group extent is
    /// the session's compiled work-group size. Returns after the enqueue, not
    /// after execution.
    pub async fn dispatch(
        &mut self,
        kernel: Kernel,
        args: &[DeviceBuffer],
        params: Params,
        global_extent: u32,
    ) -> EqualizeResult<()> {
        let slots = kernel.bindings();
        if args.len() != slots.len() {
            return Err(EqualizeError::Dispatch(format!(
                "{} takes {} buffers, got {}",
                kernel.entry_point(),
                slots.len(),
                args.len()
            )));
        }

        for (slot, arg) in slots.iter().zip(args) {
            let allowed = if slot_is_written(*slot) {
                arg.mode().writable()
            } else {
                arg.mode().readable()
            };
            if !allowed {
                return Err(EqualizeError::Dispatch(format!(
                    "{}: buffer {} is {:?} but binding {} needs {}",
                    kernel.entry_point(),
                    arg.id,
                    arg.mode(),
                    slot,
                    if slot_is_written(*slot) { "write" } else { "read" }
                )));
            }
        }

        let pipeline = self.pipelines.get(&kernel).ok_or_else(|| {
            EqualizeError::Dispatch(format!("{} was not compiled", kernel.entry_point()))
        })?;
        let grid = DispatchGrid::for_extent(
            global_extent,
            self.limits.group_size,
            self.limits.max_groups_per_dimension,
        )?;

        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("histeq_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: bindings::PARAMS,
            resource: uniform.as_entire_binding(),
        }];
        for (slot, arg) in slots.iter().zip(args) {
            entries.push(wgpu::BindGroupEntry {
                binding: *slot,
                resource: self.arena.get(arg)?.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.entry_point()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = self.device.pop_error_scope().await {
            return Err(EqualizeError::Dispatch(format!(
                "{} failed: {}",
                kernel.entry_point(),
                error
            )));
        }

        Ok(())
    }

    /// Block until every enqueued operation has completed
    pub fn synchronize(&mut self) -> EqualizeResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| EqualizeError::Dispatch(format!("Device poll failed: {}", e)))?;
        Ok(())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_cap_group_size() {
        let limits = wgpu::Limits::default();
        let session = SessionLimits::from_device(&limits, None);
        assert_eq!(session.group_size, workgroup::DEFAULT_SIZE);

        let session = SessionLimits::from_device(&limits, Some(1024));
        assert_eq!(session.group_size, 256);

        let small = wgpu::Limits {
            max_compute_invocations_per_workgroup: 128,
            ..wgpu::Limits::default()
        };
        assert_eq!(SessionLimits::from_device(&small, Some(256)).group_size, 128);
    }

    #[test]
    fn test_span_bounded_by_storage_binding() {
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1024,
            ..wgpu::Limits::default()
        };
        let session = SessionLimits::from_device(&limits, None);
        assert_eq!(session.max_span, 256);
        assert_eq!(session.max_buffer_bytes, 1024);
    }

    #[test]
    fn test_written_slots() {
        assert!(slot_is_written(bindings::HIST_ACCUM));
        assert!(slot_is_written(bindings::OUTPUT));
        assert!(!slot_is_written(bindings::PIXELS));
        assert!(!slot_is_written(bindings::LUT_IN));
    }
}
