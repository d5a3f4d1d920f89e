// SPDX-License-Identifier: GPL-3.0-only

//! Pixel formats and host image containers

pub mod image;
pub mod pixel;

pub use self::image::{EqualizedImage, Image};
pub use pixel::{BinMapping, BitDepth, Pixel};
