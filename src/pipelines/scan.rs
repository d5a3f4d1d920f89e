// SPDX-License-Identifier: GPL-3.0-only

//! Inclusive prefix sum of the histogram, two parallel algorithms
//!
//! Both run in global device memory as one dispatch per tree level or
//! doubling step, with a barrier between dispatches. The schedule of each
//! algorithm is a plain value (`WorkEfficientPlan`, `StepDoublingPlan`) that
//! drives the device and the host emulation alike, so the schedules can be
//! checked against a serial cumulative sum without a device.
//!
//! Work-efficient (up-sweep / down-sweep over a power-of-two buffer):
//!
//! ```text
//! load        x[i] = hist[i] (i < n), 0 (n <= i < p)
//! up-sweep    for s = 1, 2, .., p/2:  x[k*2s + 2s-1] += x[k*2s + s-1]
//! clear-root  x[p-1] = 0
//! down-sweep  for s = p/2, .., 1:     swap-and-add the same pairs
//! inclusive   x[i] += hist[i]         (i < n)
//! ```
//!
//! Step-doubling: for s = 1, 2, 4, .. < n: `y[i] = x[i] + x[i-s]` (`x[i-s]`
//! is zero for `i < s`).

use crate::constants::scan_phase;
use crate::errors::{EqualizeError, EqualizeResult};
use crate::session::{DeviceBuffer, DeviceSession};
use crate::shaders::{Kernel, Params};
use tracing::debug;

/// One dispatch of the work-efficient scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStep {
    Load,
    UpSweep { stride: u32 },
    ClearRoot,
    DownSweep { stride: u32 },
    Inclusive,
}

/// Dispatch schedule of the work-efficient scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkEfficientPlan {
    pub num_bins: u32,
    /// Next power of two >= num_bins
    pub padded_len: u32,
    pub steps: Vec<SweepStep>,
}

impl WorkEfficientPlan {
    pub fn new(num_bins: u32) -> Self {
        let padded_len = num_bins.max(1).next_power_of_two();

        let strides: Vec<u32> = std::iter::successors(Some(1u32), |s| s.checked_mul(2))
            .take_while(|s| *s < padded_len)
            .collect();

        let mut steps = Vec::with_capacity(strides.len() * 2 + 3);
        steps.push(SweepStep::Load);
        steps.extend(strides.iter().map(|&stride| SweepStep::UpSweep { stride }));
        steps.push(SweepStep::ClearRoot);
        steps.extend(strides.iter().rev().map(|&stride| SweepStep::DownSweep { stride }));
        steps.push(SweepStep::Inclusive);

        Self {
            num_bins,
            padded_len,
            steps,
        }
    }

    /// Kernel parameters for `step`
    pub fn params(&self, step: SweepStep) -> Params {
        let (phase, stride) = match step {
            SweepStep::Load => (scan_phase::LOAD, 0),
            SweepStep::UpSweep { stride } => (scan_phase::UP_SWEEP, stride),
            SweepStep::ClearRoot => (scan_phase::CLEAR_ROOT, 0),
            SweepStep::DownSweep { stride } => (scan_phase::DOWN_SWEEP, stride),
            SweepStep::Inclusive => (scan_phase::INCLUSIVE, 0),
        };
        Params {
            num_bins: self.num_bins,
            padded_len: self.padded_len,
            stride,
            phase,
            ..Default::default()
        }
    }

    /// Work items `step` needs
    pub fn extent(&self, step: SweepStep) -> u32 {
        match step {
            SweepStep::Load => self.padded_len,
            SweepStep::UpSweep { stride } | SweepStep::DownSweep { stride } => {
                self.padded_len / (stride * 2)
            }
            SweepStep::ClearRoot => 1,
            SweepStep::Inclusive => self.num_bins,
        }
    }

    /// Lane-by-lane host execution of the plan, mirroring `scan_workEfficient`
    pub fn emulate(&self, hist: &[u32]) -> Vec<u32> {
        let mut x = vec![0u32; self.padded_len as usize];

        for &step in &self.steps {
            let params = self.params(step);
            for i in 0..self.extent(step) {
                work_efficient_lane(&params, hist, &mut x, i);
            }
        }

        x.truncate(self.num_bins as usize);
        x
    }
}

/// Body of one `scan_workEfficient` lane
fn work_efficient_lane(params: &Params, hist: &[u32], x: &mut [u32], i: u32) {
    let idx = i as usize;
    match params.phase {
        scan_phase::LOAD => {
            if i < params.padded_len {
                x[idx] = if i < params.num_bins { hist[idx] } else { 0 };
            }
        }
        scan_phase::UP_SWEEP => {
            let span = params.stride * 2;
            if i < params.padded_len / span {
                let right = ((i + 1) * span - 1) as usize;
                let left = right - params.stride as usize;
                x[right] = x[right].wrapping_add(x[left]);
            }
        }
        scan_phase::CLEAR_ROOT => {
            if i == 0 {
                x[params.padded_len as usize - 1] = 0;
            }
        }
        scan_phase::DOWN_SWEEP => {
            let span = params.stride * 2;
            if i < params.padded_len / span {
                let right = ((i + 1) * span - 1) as usize;
                let left = right - params.stride as usize;
                let carried = x[left];
                x[left] = x[right];
                x[right] = x[right].wrapping_add(carried);
            }
        }
        scan_phase::INCLUSIVE => {
            if i < params.num_bins {
                x[idx] = x[idx].wrapping_add(hist[idx]);
            }
        }
        _ => {}
    }
}

/// Buffer roles in the step-doubling ping-pong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingPong {
    /// The histogram
    Input,
    /// The step-doubling result buffer
    Result,
    Scratch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoublingStep {
    pub stride: u32,
    pub src: PingPong,
    pub dst: PingPong,
}

/// Dispatch schedule of the step-doubling scan
///
/// Destinations alternate so the final step always lands in `Result`. With a
/// single bin there are no steps and the input is copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDoublingPlan {
    pub num_bins: u32,
    pub steps: Vec<DoublingStep>,
}

impl StepDoublingPlan {
    pub fn new(num_bins: u32) -> Self {
        let strides: Vec<u32> = std::iter::successors(Some(1u32), |s| s.checked_mul(2))
            .take_while(|s| *s < num_bins)
            .collect();
        let count = strides.len();

        let mut src = PingPong::Input;
        let steps = strides
            .into_iter()
            .enumerate()
            .map(|(k, stride)| {
                let dst = if (count - 1 - k) % 2 == 0 {
                    PingPong::Result
                } else {
                    PingPong::Scratch
                };
                let step = DoublingStep { stride, src, dst };
                src = dst;
                step
            })
            .collect();

        Self { num_bins, steps }
    }

    pub fn params(&self, step: &DoublingStep) -> Params {
        Params {
            num_bins: self.num_bins,
            stride: step.stride,
            ..Default::default()
        }
    }

    /// Lane-by-lane host execution of the plan, mirroring `scan_stepDoubling`
    pub fn emulate(&self, hist: &[u32]) -> Vec<u32> {
        let n = self.num_bins as usize;
        let mut result = vec![0u32; n];
        let mut scratch = vec![0u32; n];

        if self.steps.is_empty() {
            result.copy_from_slice(&hist[..n]);
            return result;
        }

        for step in &self.steps {
            let src: Vec<u32> = match step.src {
                PingPong::Input => hist[..n].to_vec(),
                PingPong::Result => result.clone(),
                PingPong::Scratch => scratch.clone(),
            };
            let dst = match step.dst {
                PingPong::Result => &mut result,
                PingPong::Scratch => &mut scratch,
                PingPong::Input => unreachable!("the histogram is never a destination"),
            };
            let stride = step.stride as usize;
            for i in 0..n {
                dst[i] = if i >= stride {
                    src[i].wrapping_add(src[i - stride])
                } else {
                    src[i]
                };
            }
        }

        result
    }
}

/// Device buffers the scan stage reads and writes
#[derive(Debug, Clone, Copy)]
pub struct ScanBuffers {
    pub histogram: DeviceBuffer,
    /// At least `padded_len` words
    pub cumulative: DeviceBuffer,
    pub doubling: DeviceBuffer,
    pub scratch: DeviceBuffer,
}

/// Scan stage driver
pub struct ScanStage {
    work_efficient: WorkEfficientPlan,
    step_doubling: StepDoublingPlan,
}

impl ScanStage {
    /// Plan both variants, rejecting bin counts the device cannot address
    pub fn new(num_bins: u32, max_span: u32) -> EqualizeResult<Self> {
        let work_efficient = WorkEfficientPlan::new(num_bins);
        if work_efficient.padded_len > max_span {
            return Err(EqualizeError::ScanOverflow { num_bins, max_span });
        }
        Ok(Self {
            work_efficient,
            step_doubling: StepDoublingPlan::new(num_bins),
        })
    }

    pub fn work_efficient_plan(&self) -> &WorkEfficientPlan {
        &self.work_efficient
    }

    /// Work-efficient scan of `histogram` into `cumulative`.
    ///
    /// Synchronizes between levels; the last step is left in flight for the
    /// caller's stage barrier.
    pub async fn run_work_efficient(
        &self,
        session: &mut DeviceSession,
        buffers: &ScanBuffers,
    ) -> EqualizeResult<()> {
        let plan = &self.work_efficient;
        debug!(
            num_bins = plan.num_bins,
            padded_len = plan.padded_len,
            dispatches = plan.steps.len(),
            "Work-efficient scan"
        );

        for (n, &step) in plan.steps.iter().enumerate() {
            if n > 0 {
                session.synchronize()?;
            }
            session
                .dispatch(
                    Kernel::ScanWorkEfficient,
                    &[buffers.histogram, buffers.cumulative],
                    plan.params(step),
                    plan.extent(step),
                )
                .await?;
        }
        Ok(())
    }

    /// Step-doubling scan of `histogram` into `doubling`
    pub async fn run_step_doubling(
        &self,
        session: &mut DeviceSession,
        buffers: &ScanBuffers,
    ) -> EqualizeResult<()> {
        let plan = &self.step_doubling;
        debug!(
            num_bins = plan.num_bins,
            dispatches = plan.steps.len(),
            "Step-doubling scan"
        );

        if plan.steps.is_empty() {
            return session.copy(&buffers.histogram, &buffers.doubling, plan.num_bins as u64 * 4);
        }

        let resolve = |role: PingPong| match role {
            PingPong::Input => buffers.histogram,
            PingPong::Result => buffers.doubling,
            PingPong::Scratch => buffers.scratch,
        };

        for (n, step) in plan.steps.iter().enumerate() {
            if n > 0 {
                session.synchronize()?;
            }
            session
                .dispatch(
                    Kernel::ScanStepDoubling,
                    &[resolve(step.src), resolve(step.dst)],
                    plan.params(step),
                    plan.num_bins,
                )
                .await?;
        }
        Ok(())
    }
}
