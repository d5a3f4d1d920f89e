// SPDX-License-Identifier: GPL-3.0-only

//! histeq - GPU histogram equalization
//!
//! Equalizes 8- or 16-bit images channel by channel on a wgpu compute device.
//! Each channel goes through four kernels (histogram, prefix sum, lookup-table
//! normalization, lookup-table application) with a device barrier between
//! them. Two prefix-sum algorithms are available and can be cross-checked on
//! every channel.
//!
//! # Architecture
//!
//! - [`session`]: device, queue, compiled kernels and buffer arena
//! - [`pipelines`]: the four stages, the per-channel state machine and the
//!   whole-image [`Controller`]
//! - [`shaders`]: the WGSL kernel module and its binding contract
//! - [`gpu`]: adapter discovery and selection
//! - [`media`]: planar images and the pixel-width trait
//! - [`reference`]: serial host implementation used as an oracle
//! - [`config`]: run configuration
//!
//! # Example
//!
//! ```no_run
//! use histeq::{Controller, Image, PipelineConfig, BitDepth, SessionOptions};
//!
//! let image = Image::<u8>::from_planes(4, 4, vec![vec![0u8; 16]])?;
//! let config = PipelineConfig::new(BitDepth::Eight, 1)?;
//! let mut controller = Controller::new_blocking(config, &SessionOptions::default())?;
//! let equalized = controller.equalize_blocking(&image)?;
//! assert_eq!(equalized.channel_count(), 1);
//! # Ok::<(), histeq::EqualizeError>(())
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod reference;
pub mod session;
pub mod shaders;

// Re-export commonly used types
pub use config::{PipelineConfig, RunConfig, ScanMode};
pub use errors::{ChannelError, EqualizeError, EqualizeResult, Stage};
pub use gpu::{DeviceClass, DeviceSelection};
pub use media::{BinMapping, BitDepth, EqualizedImage, Image, Pixel};
pub use pipelines::{ChannelOutput, Controller};
pub use session::{DeviceSession, SessionOptions};
