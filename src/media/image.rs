// SPDX-License-Identifier: GPL-3.0-only

//! Planar host images

use crate::errors::{EqualizeError, EqualizeResult};
use crate::media::pixel::Pixel;

/// Host-resident source image, one pixel array per channel
#[derive(Debug, Clone, PartialEq)]
pub struct Image<P: Pixel> {
    width: u32,
    height: u32,
    channels: Vec<Vec<P>>,
}

impl<P: Pixel> Image<P> {
    /// Build an image from planar channels.
    ///
    /// Every channel must hold exactly `width * height` samples and the image
    /// must be non-empty.
    pub fn from_planes(width: u32, height: u32, channels: Vec<Vec<P>>) -> EqualizeResult<Self> {
        if width == 0 || height == 0 {
            return Err(EqualizeError::Configuration(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }
        if channels.is_empty() {
            return Err(EqualizeError::Configuration(
                "image has no channels".to_string(),
            ));
        }

        let pixels = width as u64 * height as u64;
        if pixels > u32::MAX as u64 {
            return Err(EqualizeError::Configuration(format!(
                "{}x{} exceeds the {} pixel limit per channel",
                width,
                height,
                u32::MAX
            )));
        }

        for (index, channel) in channels.iter().enumerate() {
            if channel.len() as u64 != pixels {
                return Err(EqualizeError::Configuration(format!(
                    "channel {} has {} samples, expected {}",
                    index,
                    channel.len(),
                    pixels
                )));
            }
        }

        Ok(Self {
            width,
            height,
            channels,
        })
    }

    /// Build an image from interleaved samples (RGBRGB...)
    pub fn from_interleaved(
        width: u32,
        height: u32,
        channel_count: usize,
        samples: &[P],
    ) -> EqualizeResult<Self> {
        if channel_count == 0 {
            return Err(EqualizeError::Configuration(
                "image has no channels".to_string(),
            ));
        }
        let planes = (0..channel_count)
            .map(|c| samples.iter().skip(c).step_by(channel_count).copied().collect())
            .collect();
        Self::from_planes(width, height, planes)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[P]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = &[P]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Largest sample in any channel
    pub fn max_sample(&self) -> u32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|p| p.to_u32())
            .max()
            .unwrap_or(0)
    }
}

/// Equalized output, same shape as the source
#[derive(Debug, Clone, PartialEq)]
pub struct EqualizedImage<P: Pixel> {
    pub width: u32,
    pub height: u32,
    pub channels: Vec<Vec<P>>,
}

impl<P: Pixel> EqualizedImage<P> {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Re-interleave planar channels
    pub fn to_interleaved(&self) -> Vec<P> {
        let count = self.channels.len();
        let pixels = (self.width * self.height) as usize;
        let mut out = Vec::with_capacity(pixels * count);
        for i in 0..pixels {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_image() {
        let err = Image::<u8>::from_planes(0, 4, vec![vec![]]).unwrap_err();
        assert!(matches!(err, EqualizeError::Configuration(_)));
    }

    #[test]
    fn test_rejects_mismatched_channel() {
        let err = Image::<u8>::from_planes(2, 2, vec![vec![0; 4], vec![0; 3]]).unwrap_err();
        assert!(err.to_string().contains("channel 1"));
    }

    #[test]
    fn test_interleave_round_trip() {
        let samples: Vec<u16> = vec![1, 10, 2, 20, 3, 30];
        let image = Image::from_interleaved(3, 1, 2, &samples).unwrap();
        assert_eq!(image.channel(0).unwrap(), &[1, 2, 3]);
        assert_eq!(image.channel(1).unwrap(), &[10, 20, 30]);
        assert_eq!(image.max_sample(), 30);

        let out = EqualizedImage {
            width: 3,
            height: 1,
            channels: image.channels().map(|c| c.to_vec()).collect(),
        };
        assert_eq!(out.to_interleaved(), samples);
    }
}
