// SPDX-License-Identifier: GPL-3.0-only

//! Cumulative histogram to lookup table

use crate::errors::{EqualizeError, EqualizeResult};
use crate::media::BinMapping;
use crate::session::{DeviceBuffer, DeviceSession};
use crate::shaders::{Kernel, Params};

/// `lut[i] = round(cumulative[i] * max_value / total_pixels)`
#[derive(Debug, Clone, Copy)]
pub struct NormalizationStage {
    mapping: BinMapping,
}

impl NormalizationStage {
    pub fn new(mapping: BinMapping) -> Self {
        Self { mapping }
    }

    /// Enqueue the normalization; `total_pixels` must be non-zero
    pub async fn run(
        &self,
        session: &mut DeviceSession,
        cumulative: &DeviceBuffer,
        lut: &DeviceBuffer,
        total_pixels: u32,
    ) -> EqualizeResult<()> {
        if total_pixels == 0 {
            return Err(EqualizeError::Configuration(
                "cannot normalize an empty channel".to_string(),
            ));
        }
        let params = Params {
            total_pixels,
            num_bins: self.mapping.num_bins,
            max_value: self.mapping.max_value,
            ..Default::default()
        };
        session
            .dispatch(
                Kernel::NormalizeLut,
                &[*cumulative, *lut],
                params,
                self.mapping.num_bins,
            )
            .await
    }

    /// The table is non-decreasing and within `[0, max_value]`
    pub fn verify(&self, lut: &[u32]) -> EqualizeResult<()> {
        if let Some(i) = lut.windows(2).position(|w| w[0] > w[1]) {
            return Err(EqualizeError::DataIntegrity(format!(
                "lookup table decreases at bin {}: {} > {}",
                i + 1,
                lut[i],
                lut[i + 1]
            )));
        }
        if let Some(&top) = lut.last()
            && top > self.mapping.max_value
        {
            return Err(EqualizeError::DataIntegrity(format!(
                "lookup table value {} exceeds {}",
                top, self.mapping.max_value
            )));
        }
        Ok(())
    }
}
