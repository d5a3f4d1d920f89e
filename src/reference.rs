// SPDX-License-Identifier: GPL-3.0-only

//! Serial host implementation of the equalization stages
//!
//! Plain left-to-right loops over one channel. This is the oracle the device
//! results are checked against, and it uses exactly the binning and rounding
//! rules of the kernels.

use crate::errors::{EqualizeError, EqualizeResult};
use crate::media::{BinMapping, Pixel};

/// Count samples into `mapping.num_bins` bins
pub fn histogram<P: Pixel>(samples: &[P], mapping: &BinMapping) -> Vec<u32> {
    let mut hist = vec![0u32; mapping.num_bins as usize];
    for sample in samples {
        hist[mapping.bin(sample.to_u32()) as usize] += 1;
    }
    hist
}

/// Serial inclusive prefix sum
pub fn cumulative(hist: &[u32]) -> Vec<u32> {
    hist.iter()
        .scan(0u32, |acc, &count| {
            *acc = acc.wrapping_add(count);
            Some(*acc)
        })
        .collect()
}

/// `round(count * max_value / total)`, halves rounded up
///
/// `total` must be non-zero.
#[inline]
pub fn scale_round(count: u32, max_value: u32, total: u32) -> u32 {
    let product = count as u64 * max_value as u64;
    let total = total as u64;
    let quotient = product / total;
    let remainder = product % total;
    let rounded = if remainder * 2 >= total {
        quotient + 1
    } else {
        quotient
    };
    rounded as u32
}

/// Lookup table from a cumulative histogram
pub fn lookup_table(cumulative: &[u32], total_pixels: u32, max_value: u32) -> Vec<u32> {
    cumulative
        .iter()
        .map(|&c| scale_round(c, max_value, total_pixels))
        .collect()
}

/// Remap samples through `lut`
pub fn apply<P: Pixel>(samples: &[P], lut: &[u32], mapping: &BinMapping) -> Vec<P> {
    samples
        .iter()
        .map(|s| P::from_u32(lut[mapping.bin(s.to_u32()) as usize]))
        .collect()
}

/// Every intermediate of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceChannel<P: Pixel> {
    pub histogram: Vec<u32>,
    pub cumulative: Vec<u32>,
    pub lut: Vec<u32>,
    pub pixels: Vec<P>,
}

/// Equalize one channel on the host
///
/// Fails on an empty channel and on channels whose pixel count does not fit
/// in 32 bits, the same bounds the device pipeline enforces.
pub fn equalize_channel<P: Pixel>(
    samples: &[P],
    mapping: &BinMapping,
) -> EqualizeResult<ReferenceChannel<P>> {
    let total = u32::try_from(samples.len())
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            EqualizeError::Configuration(format!(
                "channel of {} samples cannot be equalized",
                samples.len()
            ))
        })?;

    let histogram = histogram(samples, mapping);
    let cumulative = cumulative(&histogram);
    let lut = lookup_table(&cumulative, total, mapping.max_value);
    let pixels = apply(samples, &lut, mapping);
    Ok(ReferenceChannel {
        histogram,
        cumulative,
        lut,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a() -> Vec<u8> {
        let mut px = vec![0u8; 2];
        px.extend([85; 3]);
        px.extend([170; 4]);
        px.extend([255; 7]);
        px
    }

    #[test]
    fn test_scenario_a() {
        let mapping = BinMapping::new(256, 255);
        let out = equalize_channel(&scenario_a(), &mapping).unwrap();

        assert_eq!(out.histogram[0], 2);
        assert_eq!(out.histogram[85], 3);
        assert_eq!(out.histogram[170], 4);
        assert_eq!(out.histogram[255], 7);
        assert_eq!(out.histogram.iter().sum::<u32>(), 16);
        assert_eq!(
            out.histogram.iter().filter(|&&c| c != 0).count(),
            4,
            "all other bins are empty"
        );
        assert_eq!(out.cumulative[255], 16);
        assert_eq!(out.lut[255], 255);
        // 2/16*255 = 31.875, 5/16*255 = 79.6875, 9/16*255 = 143.4375
        assert_eq!(out.lut[0], 32);
        assert_eq!(out.lut[85], 80);
        assert_eq!(out.lut[170], 143);
        assert_eq!(&out.pixels[..3], &[32, 32, 80]);
    }

    #[test]
    fn test_scenario_b_saturates() {
        let mapping = BinMapping::new(256, 255);
        let px = vec![128u8; 37];
        let out = equalize_channel(&px, &mapping).unwrap();

        assert_eq!(out.histogram[128], 37);
        for (i, &v) in out.lut.iter().enumerate() {
            let expected = if i < 128 { 0 } else { 255 };
            assert_eq!(v, expected, "lut[{}]", i);
        }
        assert!(out.pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn test_flat_histogram_is_nearly_identity() {
        let mapping = BinMapping::new(256, 255);
        let px: Vec<u8> = (0..=255u8).cycle().take(256 * 4).collect();
        let out = equalize_channel(&px, &mapping).unwrap();
        for (a, b) in px.iter().zip(&out.pixels) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} -> {}", a, b);
        }
    }

    #[test]
    fn test_lut_monotonic_and_bounded_16_bit() {
        let mapping = BinMapping::new(1024, 65535);
        let px: Vec<u16> = (0..5000u32).map(|i| ((i * 7919) % 65536) as u16).collect();
        let out = equalize_channel(&px, &mapping).unwrap();

        assert_eq!(out.histogram.iter().sum::<u32>(), 5000);
        assert_eq!(*out.cumulative.last().unwrap(), 5000);
        assert!(out.lut.windows(2).all(|w| w[0] <= w[1]));
        assert!(out.lut.iter().all(|&v| v <= 65535));
        assert_eq!(*out.lut.last().unwrap(), 65535);
    }

    #[test]
    fn test_empty_channel_rejected() {
        let mapping = BinMapping::new(256, 255);
        let err = equalize_channel::<u8>(&[], &mapping).unwrap_err();
        assert!(matches!(err, EqualizeError::Configuration(_)));
    }

    #[test]
    fn test_scale_round_half_up() {
        assert_eq!(scale_round(1, 1, 2), 1);
        assert_eq!(scale_round(1, 3, 4), 1);
        assert_eq!(scale_round(u32::MAX, 65535, u32::MAX), 65535);
        assert_eq!(scale_round(u32::MAX / 2, 65535, u32::MAX), 32767);
        assert_eq!(scale_round(0, 255, 9), 0);
    }
}
