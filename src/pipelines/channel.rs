// SPDX-License-Identifier: GPL-3.0-only

//! One channel through the four stages
//!
//! ```text
//! upload → histogram → scan → normalize → apply → readback
//!   Idle → HistogramReady → ScanReady → LutReady → Done
//! ```
//!
//! Every arrow is preceded by `synchronize()`. Intermediates are read back at
//! each step so invariant violations are reported against the stage that
//! produced them.

use super::apply::ApplicationStage;
use super::histogram::HistogramStage;
use super::normalize::NormalizationStage;
use super::scan::{ScanBuffers, ScanStage};
use crate::config::{PipelineConfig, ScanMode};
use crate::errors::{ChannelError, EqualizeError, EqualizeResult, Stage};
use crate::media::Pixel;
use crate::session::{AccessMode, DeviceBuffer, DeviceSession};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Progress of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    HistogramReady,
    ScanReady,
    LutReady,
    Done,
}

impl ChannelState {
    /// The only state reachable from `self`
    pub fn successor(&self) -> Option<ChannelState> {
        match self {
            ChannelState::Idle => Some(ChannelState::HistogramReady),
            ChannelState::HistogramReady => Some(ChannelState::ScanReady),
            ChannelState::ScanReady => Some(ChannelState::LutReady),
            ChannelState::LutReady => Some(ChannelState::Done),
            ChannelState::Done => None,
        }
    }

    /// Move to `next`, refusing skipped or repeated transitions
    pub fn advance(&mut self, next: ChannelState) -> EqualizeResult<()> {
        if self.successor() != Some(next) {
            return Err(EqualizeError::Dispatch(format!(
                "invalid channel transition {:?} -> {:?}",
                self, next
            )));
        }
        debug!(from = ?self, to = ?next, "Channel state");
        *self = next;
        Ok(())
    }
}

/// Wall-clock time spent per stage, barriers included
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub upload: Duration,
    pub histogram: Duration,
    pub scan: Duration,
    pub normalize: Duration,
    pub apply: Duration,
    pub readback: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.upload + self.histogram + self.scan + self.normalize + self.apply + self.readback
    }
}

/// Everything read back for one channel
#[derive(Debug, Clone)]
pub struct ChannelOutput<P: Pixel> {
    pub pixels: Vec<P>,
    pub histogram: Vec<u32>,
    /// Work-efficient scan result
    pub cumulative: Vec<u32>,
    /// Step-doubling scan result, when it ran
    pub step_doubling: Option<Vec<u32>>,
    pub lut: Vec<u32>,
    pub timings: StageTimings,
}

/// Device buffers for one channel, reused while the pixel count is unchanged
#[derive(Debug, Clone, Copy)]
pub struct ChannelBuffers {
    pub pixels: DeviceBuffer,
    pub histogram: DeviceBuffer,
    pub cumulative: DeviceBuffer,
    pub doubling: DeviceBuffer,
    pub scratch: DeviceBuffer,
    pub lut: DeviceBuffer,
    pub output: DeviceBuffer,
    total_pixels: u32,
}

impl ChannelBuffers {
    /// Allocate a full set for `total_pixels` samples of `P`
    pub fn allocate<P: Pixel>(
        session: &mut DeviceSession,
        total_pixels: u32,
        num_bins: u32,
        padded_len: u32,
    ) -> EqualizeResult<Self> {
        let pixel_bytes = P::word_count(total_pixels as usize) as u64 * 4;
        let bin_bytes = num_bins as u64 * 4;

        let buffers = Self {
            pixels: session.allocate(pixel_bytes, AccessMode::ReadOnly, "histeq_pixels")?,
            histogram: session.allocate(bin_bytes, AccessMode::ReadWrite, "histeq_histogram")?,
            cumulative: session.allocate(
                padded_len as u64 * 4,
                AccessMode::ReadWrite,
                "histeq_cumulative",
            )?,
            doubling: session.allocate(bin_bytes, AccessMode::ReadWrite, "histeq_doubling")?,
            scratch: session.allocate(bin_bytes, AccessMode::ReadWrite, "histeq_scratch")?,
            lut: session.allocate(bin_bytes, AccessMode::ReadWrite, "histeq_lut")?,
            output: session.allocate(pixel_bytes, AccessMode::WriteOnly, "histeq_output")?,
            total_pixels,
        };
        debug!(total_pixels, num_bins, padded_len, "Allocated channel buffers");
        Ok(buffers)
    }

    pub fn needs_update(&self, total_pixels: u32) -> bool {
        self.total_pixels != total_pixels
    }

    pub fn scan_buffers(&self) -> ScanBuffers {
        ScanBuffers {
            histogram: self.histogram,
            cumulative: self.cumulative,
            doubling: self.doubling,
            scratch: self.scratch,
        }
    }

    pub fn release(self, session: &mut DeviceSession) -> EqualizeResult<()> {
        for buffer in [
            self.pixels,
            self.histogram,
            self.cumulative,
            self.doubling,
            self.scratch,
            self.lut,
            self.output,
        ] {
            session.release(buffer)?;
        }
        Ok(())
    }
}

/// Sequences the four stages for one channel at a time
pub struct ChannelPipeline {
    config: PipelineConfig,
    histogram: HistogramStage,
    scan: ScanStage,
    normalize: NormalizationStage,
    apply: ApplicationStage,
    buffers: Option<ChannelBuffers>,
}

impl ChannelPipeline {
    /// Plan the stages for `config` on a device addressing `max_span` items
    pub fn new(config: PipelineConfig, max_span: u32) -> EqualizeResult<Self> {
        let mapping = config.mapping();
        Ok(Self {
            config,
            histogram: HistogramStage::new(mapping),
            scan: ScanStage::new(config.num_bins(), max_span)?,
            normalize: NormalizationStage::new(mapping),
            apply: ApplicationStage::new(mapping),
            buffers: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Buffers for `total_pixels`, allocating or replacing the cached set
    fn ensure_buffers<P: Pixel>(
        &mut self,
        session: &mut DeviceSession,
        total_pixels: u32,
    ) -> EqualizeResult<ChannelBuffers> {
        if let Some(buffers) = self.buffers
            && !buffers.needs_update(total_pixels)
        {
            return Ok(buffers);
        }
        if let Some(stale) = self.buffers.take() {
            stale.release(session)?;
        }
        let buffers = ChannelBuffers::allocate::<P>(
            session,
            total_pixels,
            self.config.num_bins(),
            self.scan.work_efficient_plan().padded_len,
        )?;
        self.buffers = Some(buffers);
        Ok(buffers)
    }

    /// Equalize channel `channel` (used only for error tagging and logs).
    ///
    /// A failure aborts this channel only: in-flight work is drained and the
    /// buffers stay valid for the next channel, which re-initializes every one
    /// of them before reading.
    pub async fn run<P: Pixel>(
        &mut self,
        session: &mut DeviceSession,
        channel: usize,
        samples: &[P],
    ) -> Result<ChannelOutput<P>, ChannelError> {
        let result = self.run_stages(session, channel, samples).await;
        if let Err(err) = &result {
            warn!(channel, stage = %err.stage, error = %err.source, "Channel aborted");
            if let Err(e) = session.synchronize() {
                warn!(channel, error = %e, "Failed to drain device after abort");
            }
        }
        result
    }

    async fn run_stages<P: Pixel>(
        &mut self,
        session: &mut DeviceSession,
        channel: usize,
        samples: &[P],
    ) -> Result<ChannelOutput<P>, ChannelError> {
        let tag = move |stage: Stage| move |e: EqualizeError| ChannelError::new(channel, stage, e);

        let total_pixels = u32::try_from(samples.len())
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                tag(Stage::Upload)(EqualizeError::Configuration(format!(
                    "channel has {} samples, expected 1..={}",
                    samples.len(),
                    u32::MAX
                )))
            })?;

        let mut state = ChannelState::Idle;
        let mut timings = StageTimings::default();
        let num_bins = self.config.num_bins() as usize;

        // Upload
        let start = Instant::now();
        let buffers = self
            .ensure_buffers::<P>(session, total_pixels)
            .map_err(tag(Stage::Upload))?;
        session
            .write(&buffers.pixels, &P::pack_words(samples))
            .await
            .map_err(tag(Stage::Upload))?;
        timings.upload = start.elapsed();

        // Histogram
        let start = Instant::now();
        self.histogram
            .run(session, &buffers.pixels, &buffers.histogram, total_pixels)
            .await
            .map_err(tag(Stage::Histogram))?;
        session.synchronize().map_err(tag(Stage::Histogram))?;
        let mut histogram = session
            .read(&buffers.histogram)
            .await
            .map_err(tag(Stage::Histogram))?;
        histogram.truncate(num_bins);
        self.histogram
            .verify(&histogram, total_pixels)
            .map_err(tag(Stage::Histogram))?;
        state.advance(ChannelState::HistogramReady).map_err(tag(Stage::Histogram))?;
        timings.histogram = start.elapsed();

        // Scan
        let start = Instant::now();
        let scan_buffers = buffers.scan_buffers();
        self.scan
            .run_work_efficient(session, &scan_buffers)
            .await
            .map_err(tag(Stage::Scan))?;
        session.synchronize().map_err(tag(Stage::Scan))?;

        let step_doubling = match self.config.scan_mode() {
            ScanMode::WorkEfficient => None,
            ScanMode::Both => {
                self.scan
                    .run_step_doubling(session, &scan_buffers)
                    .await
                    .map_err(tag(Stage::Scan))?;
                session.synchronize().map_err(tag(Stage::Scan))?;
                let mut result = session
                    .read(&buffers.doubling)
                    .await
                    .map_err(tag(Stage::Scan))?;
                result.truncate(num_bins);
                Some(result)
            }
        };

        let mut cumulative = session
            .read(&buffers.cumulative)
            .await
            .map_err(tag(Stage::Scan))?;
        cumulative.truncate(num_bins);
        verify_cumulative(&cumulative, step_doubling.as_deref(), total_pixels)
            .map_err(tag(Stage::Scan))?;
        state.advance(ChannelState::ScanReady).map_err(tag(Stage::Scan))?;
        timings.scan = start.elapsed();

        // Normalize
        let start = Instant::now();
        self.normalize
            .run(session, &buffers.cumulative, &buffers.lut, total_pixels)
            .await
            .map_err(tag(Stage::Normalize))?;
        session.synchronize().map_err(tag(Stage::Normalize))?;
        let mut lut = session
            .read(&buffers.lut)
            .await
            .map_err(tag(Stage::Normalize))?;
        lut.truncate(num_bins);
        self.normalize.verify(&lut).map_err(tag(Stage::Normalize))?;
        state.advance(ChannelState::LutReady).map_err(tag(Stage::Normalize))?;
        timings.normalize = start.elapsed();

        // Apply
        let start = Instant::now();
        self.apply
            .run(
                session,
                &buffers.pixels,
                &buffers.lut,
                &buffers.output,
                total_pixels,
            )
            .await
            .map_err(tag(Stage::Apply))?;
        session.synchronize().map_err(tag(Stage::Apply))?;
        timings.apply = start.elapsed();

        // Readback
        let start = Instant::now();
        let words = session
            .read(&buffers.output)
            .await
            .map_err(tag(Stage::Readback))?;
        let pixels = P::unpack_words(&words, samples.len());
        state.advance(ChannelState::Done).map_err(tag(Stage::Readback))?;
        timings.readback = start.elapsed();

        debug!(
            channel,
            total_pixels,
            upload_us = timings.upload.as_micros() as u64,
            histogram_us = timings.histogram.as_micros() as u64,
            scan_us = timings.scan.as_micros() as u64,
            normalize_us = timings.normalize.as_micros() as u64,
            apply_us = timings.apply.as_micros() as u64,
            readback_us = timings.readback.as_micros() as u64,
            "Channel equalized"
        );

        Ok(ChannelOutput {
            pixels,
            histogram,
            cumulative,
            step_doubling,
            lut,
            timings,
        })
    }

    /// Free the cached buffer set
    pub fn release(&mut self, session: &mut DeviceSession) -> EqualizeResult<()> {
        match self.buffers.take() {
            Some(buffers) => buffers.release(session),
            None => Ok(()),
        }
    }
}

/// Monotonic, ends at `total_pixels`, and matches the step-doubling result
/// element-wise when one is given
fn verify_cumulative(
    cumulative: &[u32],
    step_doubling: Option<&[u32]>,
    total_pixels: u32,
) -> EqualizeResult<()> {
    if let Some(other) = step_doubling
        && let Some(i) = cumulative.iter().zip(other).position(|(a, b)| a != b)
    {
        return Err(EqualizeError::DataIntegrity(format!(
            "scans disagree at bin {}: work-efficient {}, step-doubling {}",
            i, cumulative[i], other[i]
        )));
    }
    if let Some(i) = cumulative.windows(2).position(|w| w[0] > w[1]) {
        return Err(EqualizeError::DataIntegrity(format!(
            "cumulative histogram decreases at bin {}",
            i + 1
        )));
    }
    match cumulative.last() {
        Some(&last) if last == total_pixels => Ok(()),
        Some(&last) => Err(EqualizeError::DataIntegrity(format!(
            "cumulative histogram ends at {}, image has {} pixels",
            last, total_pixels
        ))),
        None => Err(EqualizeError::DataIntegrity(
            "cumulative histogram is empty".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_cannot_be_skipped() {
        let mut state = ChannelState::Idle;
        assert!(state.advance(ChannelState::ScanReady).is_err());
        assert_eq!(state, ChannelState::Idle);

        for next in [
            ChannelState::HistogramReady,
            ChannelState::ScanReady,
            ChannelState::LutReady,
            ChannelState::Done,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state, ChannelState::Done);
        assert!(state.advance(ChannelState::Idle).is_err());
        assert!(state.successor().is_none());
    }

    #[test]
    fn test_verify_cumulative() {
        assert!(verify_cumulative(&[2, 5, 9, 16], Some(&[2, 5, 9, 16]), 16).is_ok());
        assert!(verify_cumulative(&[2, 5, 9, 16], None, 16).is_ok());
        // scan disagreement
        assert!(verify_cumulative(&[2, 5, 9, 16], Some(&[2, 5, 8, 16]), 16).is_err());
        // not monotonic
        assert!(verify_cumulative(&[2, 5, 4, 16], None, 16).is_err());
        // wrong total
        assert!(verify_cumulative(&[2, 5, 9, 15], None, 16).is_err());
    }

    #[test]
    fn test_timings_total() {
        let timings = StageTimings {
            histogram: Duration::from_millis(2),
            scan: Duration::from_millis(3),
            ..Default::default()
        };
        assert_eq!(timings.total(), Duration::from_millis(5));
    }
}
