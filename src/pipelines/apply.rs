// SPDX-License-Identifier: GPL-3.0-only

//! Remap samples through the lookup table

use crate::errors::EqualizeResult;
use crate::media::BinMapping;
use crate::session::{DeviceBuffer, DeviceSession};
use crate::shaders::{Kernel, Params};

#[derive(Debug, Clone, Copy)]
pub struct ApplicationStage {
    mapping: BinMapping,
}

impl ApplicationStage {
    pub fn new(mapping: BinMapping) -> Self {
        Self { mapping }
    }

    /// Write `lut[bin(pixel)]` for every pixel into `output`.
    ///
    /// Output words are OR-ed together by neighbouring lanes, so `output` is
    /// cleared and fenced first.
    pub async fn run(
        &self,
        session: &mut DeviceSession,
        pixels: &DeviceBuffer,
        lut: &DeviceBuffer,
        output: &DeviceBuffer,
        total_pixels: u32,
    ) -> EqualizeResult<()> {
        session.zero(output)?;
        session.synchronize()?;

        let params = Params {
            total_pixels,
            num_bins: self.mapping.num_bins,
            max_value: self.mapping.max_value,
            ..Default::default()
        };
        session
            .dispatch(
                Kernel::ApplyLut,
                &[*pixels, *lut, *output],
                params,
                total_pixels,
            )
            .await
    }
}
