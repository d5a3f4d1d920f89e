// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the equalization engine

use std::fmt;

/// Result type alias using EqualizeError
pub type EqualizeResult<T> = Result<T, EqualizeError>;

/// Main error type
#[derive(Debug, Clone, PartialEq)]
pub enum EqualizeError {
    /// Invalid run parameters (platform/device index, bin count, image shape)
    Configuration(String),
    /// No device of the requested class was found
    DeviceUnavailable(String),
    /// Kernel module failed to compile; carries the compiler diagnostics
    Build(String),
    /// Kernel launch, transfer or execution failure
    Dispatch(String),
    /// A stage produced data that violates its invariant
    DataIntegrity(String),
    /// Bin count exceeds the span the scan can address on this device
    ScanOverflow { num_bins: u32, max_span: u32 },
    /// Image decode/encode failure (front end only)
    Image(String),
    /// A channel aborted; keeps the failing stage
    Channel(Box<ChannelError>),
}

/// Pipeline stage, used to tag channel failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Histogram,
    Scan,
    Normalize,
    Apply,
    Readback,
}

impl Stage {
    /// Stage name as it appears in error messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Histogram => "histogram",
            Stage::Scan => "scan",
            Stage::Normalize => "normalize",
            Stage::Apply => "apply",
            Stage::Readback => "readback",
        }
    }
}

/// Failure of a single channel's pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelError {
    pub channel: usize,
    pub stage: Stage,
    pub source: EqualizeError,
}

impl ChannelError {
    pub fn new(channel: usize, stage: Stage, source: EqualizeError) -> Self {
        Self {
            channel,
            stage,
            source,
        }
    }
}

impl fmt::Display for EqualizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EqualizeError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            EqualizeError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            EqualizeError::Build(diag) => write!(f, "Kernel build failed:\n{}", diag),
            EqualizeError::Dispatch(msg) => write!(f, "Dispatch error: {}", msg),
            EqualizeError::DataIntegrity(msg) => write!(f, "Data integrity error: {}", msg),
            EqualizeError::ScanOverflow { num_bins, max_span } => write!(
                f,
                "Scan overflow: {} bins exceed the device scan span of {}",
                num_bins, max_span
            ),
            EqualizeError::Image(msg) => write!(f, "Image error: {}", msg),
            EqualizeError::Channel(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} failed in {} stage: {}",
            self.channel, self.stage, self.source
        )
    }
}

impl std::error::Error for EqualizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EqualizeError::Channel(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<ChannelError> for EqualizeError {
    fn from(err: ChannelError) -> Self {
        EqualizeError::Channel(Box::new(err))
    }
}

impl From<image::ImageError> for EqualizeError {
    fn from(err: image::ImageError) -> Self {
        EqualizeError::Image(err.to_string())
    }
}

impl From<std::io::Error> for EqualizeError {
    fn from(err: std::io::Error) -> Self {
        EqualizeError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for EqualizeError {
    fn from(err: serde_json::Error) -> Self {
        EqualizeError::Configuration(err.to_string())
    }
}
