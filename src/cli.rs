// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing compute adapters
//! - Equalizing an image file, with an optional JSON report

use histeq::gpu;
use histeq::reference;
use histeq::{
    ChannelOutput, Controller, EqualizeError, EqualizedImage, Image, Pixel, RunConfig,
};
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// List every adapter wgpu can see
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let adapters = gpu::enumerate_adapters();

    if adapters.is_empty() {
        println!("No compute adapters found.");
        return Ok(());
    }

    println!("Available adapters:");
    println!();
    let mut current_platform = None;
    for adapter in &adapters {
        if current_platform != Some(adapter.platform) {
            println!("  Platform {} ({:?})", adapter.platform, adapter.backend);
            current_platform = Some(adapter.platform);
        }
        println!(
            "    [{}] {} ({:?})",
            adapter.device, adapter.info.name, adapter.info.device_type
        );
        if !adapter.info.driver.is_empty() {
            println!(
                "        Driver: {} {}",
                adapter.info.driver, adapter.info.driver_info
            );
        }
    }
    println!();

    Ok(())
}

/// Conversions between `image` buffers and planar samples
trait ImageSample: Pixel {
    /// Interleaved samples of `image` with `channels` channels per pixel
    fn samples(image: &DynamicImage, channels: usize) -> Vec<Self>;

    fn to_dynamic(width: u32, height: u32, channels: usize, data: Vec<Self>) -> Option<DynamicImage>;
}

impl ImageSample for u8 {
    fn samples(image: &DynamicImage, channels: usize) -> Vec<Self> {
        match channels {
            1 => image.to_luma8().into_raw(),
            2 => image.to_luma_alpha8().into_raw(),
            3 => image.to_rgb8().into_raw(),
            _ => image.to_rgba8().into_raw(),
        }
    }

    fn to_dynamic(width: u32, height: u32, channels: usize, data: Vec<Self>) -> Option<DynamicImage> {
        match channels {
            1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
            2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, data)
                .map(DynamicImage::ImageLumaA8),
            3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
            4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
            _ => None,
        }
    }
}

impl ImageSample for u16 {
    fn samples(image: &DynamicImage, channels: usize) -> Vec<Self> {
        match channels {
            1 => image.to_luma16().into_raw(),
            2 => image.to_luma_alpha16().into_raw(),
            3 => image.to_rgb16().into_raw(),
            _ => image.to_rgba16().into_raw(),
        }
    }

    fn to_dynamic(width: u32, height: u32, channels: usize, data: Vec<Self>) -> Option<DynamicImage> {
        match channels {
            1 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, data)
                .map(DynamicImage::ImageLuma16),
            2 => ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, data)
                .map(DynamicImage::ImageLumaA16),
            3 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, data)
                .map(DynamicImage::ImageRgb16),
            4 => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, data)
                .map(DynamicImage::ImageRgba16),
            _ => None,
        }
    }
}

/// Channels to process: grayscale unless color is requested, alpha kept
///
/// With `color`, gray sources keep their own layout (luma or luma + alpha).
fn channel_count(image: &DynamicImage, color: bool) -> usize {
    let kind = image.color();
    match (color, kind.has_color(), kind.has_alpha()) {
        (false, _, _) => 1,
        (true, false, false) => 1,
        (true, false, true) => 2,
        (true, true, false) => 3,
        (true, true, true) => 4,
    }
}

#[derive(Serialize)]
struct StageMicros {
    upload: u64,
    histogram: u64,
    scan: u64,
    normalize: u64,
    apply: u64,
    readback: u64,
}

#[derive(Serialize)]
struct ChannelReport {
    index: usize,
    histogram: Vec<u32>,
    cumulative: Vec<u32>,
    step_doubling: Option<Vec<u32>>,
    lut: Vec<u32>,
    timings_us: StageMicros,
}

#[derive(Serialize)]
struct Report {
    version: &'static str,
    input: String,
    output: String,
    adapter: String,
    backend: String,
    width: u32,
    height: u32,
    bit_depth: u32,
    num_bins: u32,
    verified: bool,
    channels: Vec<ChannelReport>,
}

impl<P: Pixel> From<(usize, &ChannelOutput<P>)> for ChannelReport {
    fn from((index, output): (usize, &ChannelOutput<P>)) -> Self {
        let t = &output.timings;
        Self {
            index,
            histogram: output.histogram.clone(),
            cumulative: output.cumulative.clone(),
            step_doubling: output.step_doubling.clone(),
            lut: output.lut.clone(),
            timings_us: StageMicros {
                upload: t.upload.as_micros() as u64,
                histogram: t.histogram.as_micros() as u64,
                scan: t.scan.as_micros() as u64,
                normalize: t.normalize.as_micros() as u64,
                apply: t.apply.as_micros() as u64,
                readback: t.readback.as_micros() as u64,
            },
        }
    }
}

/// Compare one channel with the serial host implementation
fn verify_channel<P: Pixel>(
    index: usize,
    samples: &[P],
    output: &ChannelOutput<P>,
    mapping: &histeq::BinMapping,
) -> Result<(), EqualizeError> {
    let expected = reference::equalize_channel(samples, mapping)?;
    let checks = [
        ("histogram", expected.histogram == output.histogram),
        ("cumulative histogram", expected.cumulative == output.cumulative),
        ("lookup table", expected.lut == output.lut),
        ("pixels", expected.pixels == output.pixels),
    ];
    match checks.iter().find(|(_, ok)| !ok) {
        Some((what, _)) => Err(EqualizeError::DataIntegrity(format!(
            "channel {}: device {} differs from host reference",
            index, what
        ))),
        None => Ok(()),
    }
}

/// Equalize `input` into `output`
pub fn equalize_image(
    input: &Path,
    output: &Path,
    config: &RunConfig,
    report: Option<&Path>,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.high_precision {
        run::<u16>(input, output, config, report, verify)
    } else {
        run::<u8>(input, output, config, report, verify)
    }
}

fn run<P: ImageSample>(
    input: &Path,
    output: &Path,
    config: &RunConfig,
    report: Option<&Path>,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = image::open(input).map_err(EqualizeError::from)?;
    let channels = channel_count(&source, config.color);
    let (width, height) = (source.width(), source.height());
    let image = Image::<P>::from_interleaved(width, height, channels, &P::samples(&source, channels))?;
    drop(source);

    println!(
        "Input: {} ({}x{}, {} channel{}, {}-bit)",
        input.display(),
        width,
        height,
        channels,
        if channels == 1 { "" } else { "s" },
        P::DEPTH.bits()
    );

    let pipeline_config = config.pipeline_config(channels)?;
    let mut controller = Controller::new_blocking(pipeline_config, &config.session_options()?)?;
    let device = controller.session().info().clone();
    println!(
        "Device: {} ({:?}, platform {} device {})",
        device.adapter_name, device.backend, device.platform, device.device
    );

    let start = Instant::now();
    let results = pollster::block_on(controller.equalize_channels(&image))?;
    let elapsed = start.elapsed();

    let mut outputs = Vec::with_capacity(results.len());
    for result in results {
        outputs.push(result.map_err(EqualizeError::from)?);
    }

    if verify {
        let mapping = pipeline_config.mapping();
        for (index, (samples, out)) in image.channels().zip(&outputs).enumerate() {
            verify_channel(index, samples, out, &mapping)?;
        }
        println!("Verified against host reference");
    }

    let equalized = EqualizedImage {
        width,
        height,
        channels: outputs.iter().map(|o| o.pixels.clone()).collect(),
    };
    let encoded = P::to_dynamic(width, height, channels, equalized.to_interleaved())
        .ok_or_else(|| EqualizeError::Image(format!("cannot encode {} channels", channels)))?;
    encoded.save(output).map_err(EqualizeError::from)?;

    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        output = %output.display(),
        "Image equalized"
    );
    println!("Output: {} ({:.1} ms)", output.display(), elapsed.as_secs_f64() * 1000.0);

    if let Some(path) = report {
        let report = Report {
            version: histeq::constants::app_info::version(),
            input: input.display().to_string(),
            output: output.display().to_string(),
            adapter: device.adapter_name.clone(),
            backend: format!("{:?}", device.backend),
            width,
            height,
            bit_depth: P::DEPTH.bits(),
            num_bins: pipeline_config.num_bins(),
            verified: verify,
            channels: outputs.iter().enumerate().map(ChannelReport::from).collect(),
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
        println!("Report: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count_follows_color_flag() {
        let rgba = DynamicImage::new_rgba8(2, 2);
        let rgb = DynamicImage::new_rgb8(2, 2);
        assert_eq!(channel_count(&rgba, false), 1);
        assert_eq!(channel_count(&rgba, true), 4);
        assert_eq!(channel_count(&rgb, true), 3);
    }

    #[test]
    fn test_gray_alpha_keeps_two_channels() {
        let gray_alpha = DynamicImage::new_luma_a8(2, 2);
        assert_eq!(channel_count(&gray_alpha, true), 2);
        assert_eq!(channel_count(&gray_alpha, false), 1);
        assert_eq!(channel_count(&DynamicImage::new_luma16(2, 2), true), 1);

        let samples = u8::samples(&gray_alpha, 2);
        assert_eq!(samples.len(), 2 * 2 * 2);
        let image = u8::to_dynamic(2, 2, 2, samples).unwrap();
        assert!(matches!(image, DynamicImage::ImageLumaA8(_)));
    }

    #[test]
    fn test_u16_buffer_shape() {
        let data = vec![0u16; 2 * 3 * 3];
        let image = u16::to_dynamic(2, 3, 3, data).unwrap();
        assert_eq!((image.width(), image.height()), (2, 3));
        assert!(u16::to_dynamic(2, 3, 3, vec![0u16; 5]).is_none());
    }
}
