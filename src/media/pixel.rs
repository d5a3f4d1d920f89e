// SPDX-License-Identifier: GPL-3.0-only

//! Pixel storage widths and the bin mapping shared by every stage
//!
//! The device sees pixels packed into 32-bit words. `Pixel` describes how a
//! storage width packs, which kernel prelude reads it, and its value range.
//! `BinMapping` is the single binning rule used by the histogram and the
//! application stage, on the device and on the host.

use serde::{Deserialize, Serialize};

/// Supported pixel bit depths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Number of bits per sample
    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    /// Largest representable sample value
    pub fn max_value(&self) -> u32 {
        (1u32 << self.bits()) - 1
    }

    /// Parse from a bit count
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(BitDepth::Eight),
            16 => Some(BitDepth::Sixteen),
            _ => None,
        }
    }
}

/// A pixel storage width the pipeline can run on
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + std::fmt::Debug + 'static {
    const DEPTH: BitDepth;
    /// Samples packed into one 32-bit device word
    const PER_WORD: usize;
    /// WGSL prelude providing `load_pixel` / `store_pixel` for this width
    const KERNEL_PRELUDE: &'static str;

    fn to_u32(self) -> u32;

    /// Truncating conversion back from a device value
    fn from_u32(value: u32) -> Self;

    /// Pack samples little-end-first into device words, zero-padding the tail
    fn pack_words(samples: &[Self]) -> Vec<u32> {
        let bits = Self::DEPTH.bits();
        samples
            .chunks(Self::PER_WORD)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u32, |word, (lane, s)| word | (s.to_u32() << (lane as u32 * bits)))
            })
            .collect()
    }

    /// Unpack `count` samples from device words
    fn unpack_words(words: &[u32], count: usize) -> Vec<Self> {
        let bits = Self::DEPTH.bits();
        let mask = Self::DEPTH.max_value();
        (0..count)
            .map(|i| {
                let word = words[i / Self::PER_WORD];
                let shift = (i % Self::PER_WORD) as u32 * bits;
                Self::from_u32((word >> shift) & mask)
            })
            .collect()
    }

    /// Number of device words needed for `count` samples
    fn word_count(count: usize) -> usize {
        count.div_ceil(Self::PER_WORD)
    }
}

impl Pixel for u8 {
    const DEPTH: BitDepth = BitDepth::Eight;
    const PER_WORD: usize = 4;
    const KERNEL_PRELUDE: &'static str = include_str!("../shaders/pixels_u8.wgsl");

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    fn from_u32(value: u32) -> Self {
        value as u8
    }
}

impl Pixel for u16 {
    const DEPTH: BitDepth = BitDepth::Sixteen;
    const PER_WORD: usize = 2;
    const KERNEL_PRELUDE: &'static str = include_str!("../shaders/pixels_u16.wgsl");

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    fn from_u32(value: u32) -> Self {
        value as u16
    }
}

/// Pixel value to bin index
///
/// Identity when every value has its own bin, otherwise
/// `floor(value * num_bins / (max_value + 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinMapping {
    pub num_bins: u32,
    pub max_value: u32,
}

impl BinMapping {
    pub fn new(num_bins: u32, max_value: u32) -> Self {
        Self {
            num_bins,
            max_value,
        }
    }

    /// True when bins are down-sampled
    pub fn is_reduced(&self) -> bool {
        self.num_bins != self.max_value + 1
    }

    #[inline]
    pub fn bin(&self, value: u32) -> u32 {
        if self.is_reduced() {
            // value <= 65535 and num_bins <= 65536, so the product fits in u32
            (value * self.num_bins) / (self.max_value + 1)
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_binning() {
        let map = BinMapping::new(256, 255);
        assert!(!map.is_reduced());
        assert_eq!(map.bin(0), 0);
        assert_eq!(map.bin(200), 200);
        assert_eq!(map.bin(255), 255);
    }

    #[test]
    fn test_reduced_binning_stays_in_range() {
        let map = BinMapping::new(200, 255);
        assert!(map.is_reduced());
        assert_eq!(map.bin(0), 0);
        assert_eq!(map.bin(255), 199);
        for v in 0..=255 {
            assert!(map.bin(v) < 200);
        }

        let wide = BinMapping::new(65536 / 2, 65535);
        assert_eq!(wide.bin(65535), 32767);
        assert_eq!(wide.bin(3), 1);
    }

    #[test]
    fn test_reduced_binning_is_monotonic() {
        let map = BinMapping::new(7, 255);
        let mut prev = 0;
        for v in 0..=255 {
            let b = map.bin(v);
            assert!(b >= prev);
            prev = b;
        }
        assert_eq!(prev, 6);
    }

    #[test]
    fn test_pack_u8_pads_tail() {
        let samples: Vec<u8> = vec![1, 2, 3, 4, 5];
        let words = u8::pack_words(&samples);
        assert_eq!(words, vec![0x0403_0201, 0x0000_0005]);
        assert_eq!(u8::unpack_words(&words, 5), samples);
    }

    #[test]
    fn test_pack_u16() {
        let samples: Vec<u16> = vec![0xABCD, 0x0102, 0xFFFF];
        let words = u16::pack_words(&samples);
        assert_eq!(words, vec![0x0102_ABCD, 0x0000_FFFF]);
        assert_eq!(u16::word_count(3), 2);
        assert_eq!(u16::unpack_words(&words, 3), samples);
    }

    #[test]
    fn test_bit_depth() {
        assert_eq!(BitDepth::Eight.max_value(), 255);
        assert_eq!(BitDepth::Sixteen.max_value(), 65535);
        assert_eq!(BitDepth::from_bits(16), Some(BitDepth::Sixteen));
        assert_eq!(BitDepth::from_bits(12), None);
    }
}
