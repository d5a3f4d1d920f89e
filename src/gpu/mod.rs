// SPDX-License-Identifier: GPL-3.0-only

//! Accelerator discovery and device creation
//!
//! wgpu has no OpenCL-style platform objects, so a "platform" here is one
//! backend (Vulkan, Metal, DX12, GL) that exposes at least one adapter, in a
//! fixed order. Device indices count adapters within a platform after the
//! device-class filter is applied.

use crate::errors::{EqualizeError, EqualizeResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Re-export the compute wgpu under its usual name
pub use wgpu_compute as wgpu;

/// Backends in platform-index order
pub const PLATFORM_ORDER: [wgpu::Backend; 4] = [
    wgpu::Backend::Vulkan,
    wgpu::Backend::Metal,
    wgpu::Backend::Dx12,
    wgpu::Backend::Gl,
];

/// Device-class preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Any adapter
    #[default]
    Any,
    /// Discrete or integrated GPU
    Gpu,
    DiscreteGpu,
    IntegratedGpu,
    /// Software rasterizers (llvmpipe, WARP, SwiftShader)
    Cpu,
    Virtual,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 6] = [
        DeviceClass::Any,
        DeviceClass::Gpu,
        DeviceClass::DiscreteGpu,
        DeviceClass::IntegratedGpu,
        DeviceClass::Cpu,
        DeviceClass::Virtual,
    ];

    /// Whether an adapter of `device_type` satisfies this preference
    pub fn accepts(&self, device_type: wgpu::DeviceType) -> bool {
        use wgpu::DeviceType;
        match self {
            DeviceClass::Any => true,
            DeviceClass::Gpu => matches!(
                device_type,
                DeviceType::DiscreteGpu | DeviceType::IntegratedGpu
            ),
            DeviceClass::DiscreteGpu => device_type == DeviceType::DiscreteGpu,
            DeviceClass::IntegratedGpu => device_type == DeviceType::IntegratedGpu,
            DeviceClass::Cpu => device_type == DeviceType::Cpu,
            DeviceClass::Virtual => device_type == DeviceType::VirtualGpu,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceClass::Any => "any",
            DeviceClass::Gpu => "gpu",
            DeviceClass::DiscreteGpu => "discrete",
            DeviceClass::IntegratedGpu => "integrated",
            DeviceClass::Cpu => "cpu",
            DeviceClass::Virtual => "virtual",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.display_name().eq_ignore_ascii_case(name))
    }
}

/// Which accelerator to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelection {
    /// Platform index; first platform when unset
    pub platform: Option<usize>,
    /// Device index within the (class-filtered) platform; first when unset
    pub device: Option<usize>,
    pub class: DeviceClass,
}

/// Outcome of adapter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedAdapter {
    pub platform: usize,
    /// Index into the platform's unfiltered adapter list
    pub adapter: usize,
    /// Set when the requested class was absent and any device was used instead
    pub substituted: bool,
}

/// Adapters of the requested class within one platform
fn adapters_of_class(
    device_types: &[wgpu::DeviceType],
    class: DeviceClass,
) -> EqualizeResult<Vec<usize>> {
    let matching: Vec<usize> = device_types
        .iter()
        .enumerate()
        .filter(|(_, ty)| class.accepts(**ty))
        .map(|(i, _)| i)
        .collect();

    if matching.is_empty() {
        return Err(EqualizeError::DeviceUnavailable(format!(
            "no {} device on this platform",
            class.display_name()
        )));
    }
    Ok(matching)
}

/// Pick an adapter from per-platform device types.
///
/// Out-of-range platform or device indices are configuration errors. A missing
/// device class falls back to every device on the platform and is logged.
pub fn select_adapter(
    platforms: &[Vec<wgpu::DeviceType>],
    selection: &DeviceSelection,
) -> EqualizeResult<SelectedAdapter> {
    if platforms.is_empty() {
        return Err(EqualizeError::DeviceUnavailable(
            "no compute adapters found".to_string(),
        ));
    }

    let platform = selection.platform.unwrap_or(0);
    let device_types = platforms.get(platform).ok_or_else(|| {
        EqualizeError::Configuration(format!(
            "platform index {} out of range ({} available)",
            platform,
            platforms.len()
        ))
    })?;

    let (candidates, substituted) = match adapters_of_class(device_types, selection.class) {
        Ok(candidates) => (candidates, false),
        Err(e) => {
            warn!(
                error = %e,
                requested = selection.class.display_name(),
                "Falling back to any available device"
            );
            ((0..device_types.len()).collect(), true)
        }
    };

    let device = selection.device.unwrap_or(0);
    let adapter = *candidates.get(device).ok_or_else(|| {
        EqualizeError::Configuration(format!(
            "device index {} out of range ({} available on platform {})",
            device,
            candidates.len(),
            platform
        ))
    })?;

    Ok(SelectedAdapter {
        platform,
        adapter,
        substituted,
    })
}

/// Information about the opened device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub adapter_name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub driver: String,
    pub platform: usize,
    pub device: usize,
    pub substituted: bool,
}

/// One listed adapter
#[derive(Debug, Clone)]
pub struct AdapterListing {
    pub platform: usize,
    pub device: usize,
    pub backend: wgpu::Backend,
    pub info: wgpu::AdapterInfo,
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Adapters grouped by platform, in `PLATFORM_ORDER`, empty platforms dropped
fn adapters_by_platform(instance: &wgpu::Instance) -> Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> {
    let mut all = instance.enumerate_adapters(wgpu::Backends::all());

    PLATFORM_ORDER
        .iter()
        .filter_map(|backend| {
            let (ours, rest): (Vec<_>, Vec<_>) = all
                .drain(..)
                .partition(|adapter| adapter.get_info().backend == *backend);
            all = rest;
            if ours.is_empty() {
                None
            } else {
                Some((*backend, ours))
            }
        })
        .collect()
}

/// List every adapter with its platform/device index
pub fn enumerate_adapters() -> Vec<AdapterListing> {
    let instance = create_instance();
    adapters_by_platform(&instance)
        .into_iter()
        .enumerate()
        .flat_map(|(platform, (backend, adapters))| {
            adapters
                .into_iter()
                .enumerate()
                .map(move |(device, adapter)| AdapterListing {
                    platform,
                    device,
                    backend,
                    info: adapter.get_info(),
                })
        })
        .collect()
}

/// Open a compute device and queue for `selection`
pub async fn create_compute_device(
    selection: &DeviceSelection,
    label: &str,
) -> EqualizeResult<(wgpu::Device, wgpu::Queue, wgpu::Limits, GpuDeviceInfo)> {
    info!(label = label, "Creating GPU device for compute");

    let instance = create_instance();
    let mut platforms = adapters_by_platform(&instance);

    let device_types: Vec<Vec<wgpu::DeviceType>> = platforms
        .iter()
        .map(|(_, adapters)| adapters.iter().map(|a| a.get_info().device_type).collect())
        .collect();
    let selected = select_adapter(&device_types, selection)?;

    let (backend, adapters) = platforms.swap_remove(selected.platform);
    let adapter = adapters
        .into_iter()
        .nth(selected.adapter)
        .ok_or_else(|| EqualizeError::DeviceUnavailable("adapter disappeared".to_string()))?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?backend,
        device_type = ?adapter_info.device_type,
        substituted = selected.substituted,
        "GPU adapter selected for compute"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| EqualizeError::DeviceUnavailable(format!("Failed to create GPU device: {}", e)))?;

    debug!(
        max_workgroups = adapter_limits.max_compute_workgroups_per_dimension,
        max_invocations = adapter_limits.max_compute_invocations_per_workgroup,
        max_storage_binding = adapter_limits.max_storage_buffer_binding_size,
        "Device limits"
    );

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend,
        device_type: adapter_info.device_type,
        driver: adapter_info.driver.clone(),
        platform: selected.platform,
        device: selected.adapter,
        substituted: selected.substituted,
    };

    Ok((device, queue, adapter_limits, info))
}
