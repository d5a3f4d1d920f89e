// SPDX-License-Identifier: GPL-3.0-only

//! Per-bin frequency counting

use crate::errors::{EqualizeError, EqualizeResult};
use crate::media::BinMapping;
use crate::session::{DeviceBuffer, DeviceSession};
use crate::shaders::{Kernel, Params};

/// Counts one channel's samples into `num_bins` bins
#[derive(Debug, Clone, Copy)]
pub struct HistogramStage {
    mapping: BinMapping,
}

impl HistogramStage {
    pub fn new(mapping: BinMapping) -> Self {
        Self { mapping }
    }

    /// Zero `histogram`, then accumulate every sample of `pixels` into it.
    ///
    /// The clear is fenced before the accumulation; the accumulation itself is
    /// left in flight.
    pub async fn run(
        &self,
        session: &mut DeviceSession,
        pixels: &DeviceBuffer,
        histogram: &DeviceBuffer,
        total_pixels: u32,
    ) -> EqualizeResult<()> {
        session.zero(histogram)?;
        session.synchronize()?;

        let params = Params {
            total_pixels,
            num_bins: self.mapping.num_bins,
            max_value: self.mapping.max_value,
            ..Default::default()
        };
        session
            .dispatch(
                Kernel::CalculateHistogram,
                &[*pixels, *histogram],
                params,
                total_pixels,
            )
            .await
    }

    /// Host-side check of a read-back histogram
    pub fn verify(&self, histogram: &[u32], total_pixels: u32) -> EqualizeResult<()> {
        if histogram.len() != self.mapping.num_bins as usize {
            return Err(EqualizeError::DataIntegrity(format!(
                "histogram has {} bins, expected {}",
                histogram.len(),
                self.mapping.num_bins
            )));
        }
        let sum: u64 = histogram.iter().map(|&c| c as u64).sum();
        if sum != total_pixels as u64 {
            return Err(EqualizeError::DataIntegrity(format!(
                "histogram sums to {}, image has {} pixels",
                sum, total_pixels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_sum() {
        let stage = HistogramStage::new(BinMapping::new(4, 255));
        assert!(stage.verify(&[1, 0, 2, 3], 6).is_ok());
        assert!(matches!(
            stage.verify(&[1, 0, 2, 3], 7),
            Err(EqualizeError::DataIntegrity(_))
        ));
        assert!(stage.verify(&[6, 0, 0], 6).is_err());
    }
}
