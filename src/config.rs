// SPDX-License-Identifier: GPL-3.0-only

//! Run configuration
//!
//! `RunConfig` is the external configuration surface (JSON file plus command
//! line overrides). It is turned into an immutable `PipelineConfig` for the
//! engine and `SessionOptions` for the device.

use crate::constants::app_info;
use crate::errors::{EqualizeError, EqualizeResult};
use crate::gpu::DeviceSelection;
use crate::media::{BinMapping, BitDepth};
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which scan variants run per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanMode {
    /// Work-efficient scan only
    WorkEfficient,
    /// Both variants, cross-checked element-wise
    #[default]
    Both,
}

/// Immutable parameters of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    bit_depth: BitDepth,
    num_bins: u32,
    max_value: u32,
    channel_count: usize,
    scan_mode: ScanMode,
}

impl PipelineConfig {
    /// One bin per representable value
    pub fn new(bit_depth: BitDepth, channel_count: usize) -> EqualizeResult<Self> {
        let max_value = bit_depth.max_value();
        Self::with_bins(bit_depth, channel_count, max_value + 1)
    }

    /// Down-sampled or full bin count; `num_bins` must be in `1..=max_value + 1`
    pub fn with_bins(bit_depth: BitDepth, channel_count: usize, num_bins: u32) -> EqualizeResult<Self> {
        let max_value = bit_depth.max_value();
        if num_bins == 0 || num_bins > max_value + 1 {
            return Err(EqualizeError::Configuration(format!(
                "bin count {} must be between 1 and {} for {}-bit images",
                num_bins,
                max_value + 1,
                bit_depth.bits()
            )));
        }
        if channel_count == 0 {
            return Err(EqualizeError::Configuration(
                "channel count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            bit_depth,
            num_bins,
            max_value,
            channel_count,
            scan_mode: ScanMode::default(),
        })
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn num_bins(&self) -> u32 {
        self.num_bins
    }

    pub fn max_value(&self) -> u32 {
        self.max_value
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn mapping(&self) -> BinMapping {
        BinMapping::new(self.num_bins, self.max_value)
    }
}

/// User-facing configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Platform / device / device-class choice
    pub device: DeviceSelection,
    /// Bin count override; one bin per value when unset
    pub bins: Option<u32>,
    /// Equalize every color channel instead of converting to luma
    pub color: bool,
    /// Process at 16 bits per sample
    pub high_precision: bool,
    /// Work-group size request
    pub group_size: Option<u32>,
    pub scan_mode: ScanMode,
    /// External WGSL kernel body replacing the built-in one
    pub kernel_path: Option<PathBuf>,
}

impl RunConfig {
    /// Default config file location (`<config dir>/histeq/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(app_info::CONFIG_DIR_NAME)
                .join(app_info::CONFIG_FILE_NAME)
        })
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> EqualizeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EqualizeError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: RunConfig = serde_json::from_str(&text).map_err(|e| {
            EqualizeError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `path`, or the default location when it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> EqualizeResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn bit_depth(&self) -> BitDepth {
        if self.high_precision {
            BitDepth::Sixteen
        } else {
            BitDepth::Eight
        }
    }

    /// Engine parameters for an image with `channel_count` channels
    pub fn pipeline_config(&self, channel_count: usize) -> EqualizeResult<PipelineConfig> {
        let depth = self.bit_depth();
        let config = match self.bins {
            Some(bins) => PipelineConfig::with_bins(depth, channel_count, bins)?,
            None => PipelineConfig::new(depth, channel_count)?,
        };
        Ok(config.with_scan_mode(self.scan_mode))
    }

    /// Device options, reading the kernel override if one is configured
    pub fn session_options(&self) -> EqualizeResult<SessionOptions> {
        let kernel_source = match &self.kernel_path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                EqualizeError::Build(format!("cannot read kernel {}: {}", path.display(), e))
            })?),
            None => None,
        };
        Ok(SessionOptions {
            selection: self.device,
            group_size: self.group_size,
            kernel_source,
        })
    }
}
