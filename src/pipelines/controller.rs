// SPDX-License-Identifier: GPL-3.0-only

//! Whole-image driver
//!
//! Validates an image against the run configuration, then pushes its channels
//! through one `ChannelPipeline` in order. Channels share the session's
//! buffer set; a failed channel does not affect the ones after it.

use super::channel::{ChannelOutput, ChannelPipeline};
use crate::config::PipelineConfig;
use crate::errors::{ChannelError, EqualizeError, EqualizeResult};
use crate::media::{EqualizedImage, Image, Pixel};
use crate::session::{DeviceSession, SessionOptions};
use tracing::{info, warn};

pub struct Controller {
    session: DeviceSession,
    pipeline: ChannelPipeline,
}

impl Controller {
    /// Open a device session for `config` and plan the stages on it
    pub async fn new(config: PipelineConfig, options: &SessionOptions) -> EqualizeResult<Self> {
        let session = DeviceSession::open(config.bit_depth(), options).await?;
        Self::with_session(session, config)
    }

    /// Blocking variant of [`Controller::new`]
    pub fn new_blocking(config: PipelineConfig, options: &SessionOptions) -> EqualizeResult<Self> {
        pollster::block_on(Self::new(config, options))
    }

    /// Drive an already opened session
    pub fn with_session(session: DeviceSession, config: PipelineConfig) -> EqualizeResult<Self> {
        if session.depth() != config.bit_depth() {
            return Err(EqualizeError::Configuration(format!(
                "session compiled for {}-bit samples, config wants {}-bit",
                session.depth().bits(),
                config.bit_depth().bits()
            )));
        }
        let pipeline = ChannelPipeline::new(config, session.limits().max_span)?;
        Ok(Self { session, pipeline })
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Check depth, channel count and value range before touching the device
    pub fn validate<P: Pixel>(&self, image: &Image<P>) -> EqualizeResult<()> {
        let config = self.pipeline.config();
        if P::DEPTH != config.bit_depth() {
            return Err(EqualizeError::Configuration(format!(
                "{}-bit image given to a {}-bit pipeline",
                P::DEPTH.bits(),
                config.bit_depth().bits()
            )));
        }
        if image.channel_count() != config.channel_count() {
            return Err(EqualizeError::Configuration(format!(
                "image has {} channels, configured for {}",
                image.channel_count(),
                config.channel_count()
            )));
        }
        let max_sample = image.max_sample();
        if max_sample > config.max_value() {
            return Err(EqualizeError::Configuration(format!(
                "sample value {} exceeds maximum {}",
                max_sample,
                config.max_value()
            )));
        }
        Ok(())
    }

    /// Equalize every channel, collecting each channel's outcome
    ///
    /// Only validation failures are returned as `Err`; a channel that fails
    /// shows up as its own `Err` entry and processing continues.
    pub async fn equalize_channels<P: Pixel>(
        &mut self,
        image: &Image<P>,
    ) -> EqualizeResult<Vec<Result<ChannelOutput<P>, ChannelError>>> {
        self.validate(image)?;
        info!(
            width = image.width(),
            height = image.height(),
            channels = image.channel_count(),
            bins = self.pipeline.config().num_bins(),
            "Equalizing image"
        );

        let mut results = Vec::with_capacity(image.channel_count());
        for (index, samples) in image.channels().enumerate() {
            let result = self.pipeline.run(&mut self.session, index, samples).await;
            if let Err(err) = &result {
                warn!(channel = index, stage = %err.stage, "Channel failed");
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Equalize every channel, stopping at the first failure
    pub async fn equalize<P: Pixel>(&mut self, image: &Image<P>) -> EqualizeResult<EqualizedImage<P>> {
        let (equalized, _) = self.equalize_with_outputs(image).await?;
        Ok(equalized)
    }

    /// Like [`Controller::equalize`], also returning per-channel intermediates
    pub async fn equalize_with_outputs<P: Pixel>(
        &mut self,
        image: &Image<P>,
    ) -> EqualizeResult<(EqualizedImage<P>, Vec<ChannelOutput<P>>)> {
        self.validate(image)?;

        let mut outputs = Vec::with_capacity(image.channel_count());
        for (index, samples) in image.channels().enumerate() {
            outputs.push(self.pipeline.run(&mut self.session, index, samples).await?);
        }

        let equalized = EqualizedImage {
            width: image.width(),
            height: image.height(),
            channels: outputs.iter().map(|o| o.pixels.clone()).collect(),
        };
        Ok((equalized, outputs))
    }

    /// Blocking variant of [`Controller::equalize`]
    pub fn equalize_blocking<P: Pixel>(&mut self, image: &Image<P>) -> EqualizeResult<EqualizedImage<P>> {
        pollster::block_on(self.equalize(image))
    }

    /// Free the channel buffers; the session and kernels stay
    pub fn release_buffers(&mut self) -> EqualizeResult<()> {
        self.pipeline.release(&mut self.session)
    }

    /// Release the channel buffers and hand back the compiled session, for
    /// reuse under another configuration of the same bit depth
    pub fn into_session(mut self) -> EqualizeResult<DeviceSession> {
        self.release_buffers()?;
        Ok(self.session)
    }
}
