// SPDX-License-Identifier: GPL-3.0-only

//! Equalization stages and their orchestration
//!
//! ```text
//! pixels ─▶ HistogramStage ─▶ ScanStage ─▶ NormalizationStage ─▶ ApplicationStage ─▶ pixels
//!             histogram        cumulative        lookup table
//! ```
//!
//! Stages only enqueue work on a borrowed `DeviceSession`. `ChannelPipeline`
//! places the barriers between them and `Controller` walks the channels.

pub mod apply;
pub mod channel;
pub mod controller;
pub mod histogram;
pub mod normalize;
pub mod scan;

pub use apply::ApplicationStage;
pub use channel::{ChannelBuffers, ChannelOutput, ChannelPipeline, ChannelState, StageTimings};
pub use controller::Controller;
pub use histogram::HistogramStage;
pub use normalize::NormalizationStage;
pub use scan::{ScanBuffers, ScanStage, StepDoublingPlan, WorkEfficientPlan};
