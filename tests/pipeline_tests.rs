// SPDX-License-Identifier: GPL-3.0-only

//! Device integration tests for the equalization pipeline
//!
//! Each test opens its own session and returns early when no compute adapter
//! is available.

use histeq::config::ScanMode;
use histeq::reference;
use histeq::shaders::EQUALIZE_KERNELS;
use histeq::{
    BitDepth, Controller, EqualizeError, Image, PipelineConfig, SessionOptions, Stage,
};

async fn controller(config: PipelineConfig) -> Option<Controller> {
    match Controller::new(config, &SessionOptions::default()).await {
        Ok(controller) => Some(controller),
        Err(EqualizeError::DeviceUnavailable(msg)) => {
            eprintln!("Skipping: {}", msg);
            None
        }
        Err(e) => panic!("failed to open device: {}", e),
    }
}

fn scenario_a() -> Vec<u8> {
    vec![0, 0, 85, 85, 85, 170, 170, 170, 170, 255, 255, 255, 255, 255, 255, 255]
}

#[tokio::test]
async fn test_scenario_a() {
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let image = Image::from_planes(4, 4, vec![scenario_a()]).unwrap();
    let (equalized, outputs) = controller.equalize_with_outputs(&image).await.unwrap();
    let out = &outputs[0];

    assert_eq!(out.histogram[0], 2);
    assert_eq!(out.histogram[85], 3);
    assert_eq!(out.histogram[170], 4);
    assert_eq!(out.histogram[255], 7);
    assert_eq!(out.histogram.iter().filter(|&&c| c != 0).count(), 4);
    assert_eq!(out.cumulative[255], 16);
    assert_eq!(out.lut[255], 255);

    let expected = reference::equalize_channel(&scenario_a(), &config.mapping()).unwrap();
    assert_eq!(out.lut, expected.lut);
    assert_eq!(equalized.channels[0], expected.pixels);
}

#[tokio::test]
async fn test_scenario_b_uniform_image() {
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let image = Image::from_planes(37, 3, vec![vec![128u8; 37 * 3]]).unwrap();
    let (equalized, outputs) = controller.equalize_with_outputs(&image).await.unwrap();

    assert_eq!(outputs[0].histogram[128], 111);
    for (i, &v) in outputs[0].lut.iter().enumerate() {
        assert_eq!(v, if i < 128 { 0 } else { 255 }, "lut[{}]", i);
    }
    assert!(equalized.channels[0].iter().all(|&p| p == 255));
}

#[tokio::test]
async fn test_scenario_c_two_hundred_bins() {
    let config = PipelineConfig::with_bins(BitDepth::Eight, 1, 200).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let samples: Vec<u8> = (0..97 * 53u32).map(|i| ((i * 31 + i / 7) % 256) as u8).collect();
    let image = Image::from_planes(97, 53, vec![samples.clone()]).unwrap();
    let (_, outputs) = controller.equalize_with_outputs(&image).await.unwrap();
    let out = &outputs[0];

    let expected = reference::equalize_channel(&samples, &config.mapping()).unwrap();
    assert_eq!(out.histogram.len(), 200);
    assert_eq!(out.cumulative, expected.cumulative);
    assert_eq!(out.step_doubling.as_ref(), Some(&expected.cumulative));
    assert_eq!(out.pixels, expected.pixels);
}

#[tokio::test]
async fn test_dimensions_not_divisible_by_group() {
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    // 1x1, one partial word, odd sizes around the 64-lane group
    for (width, height) in [(1u32, 1u32), (3, 1), (7, 9), (65, 1), (127, 3)] {
        let n = (width * height) as usize;
        let samples: Vec<u8> = (0..n).map(|i| (i * 97 % 251) as u8).collect();
        let image = Image::from_planes(width, height, vec![samples.clone()]).unwrap();
        let (equalized, outputs) = controller.equalize_with_outputs(&image).await.unwrap();

        assert_eq!(
            outputs[0].histogram.iter().sum::<u32>(),
            width * height,
            "{}x{}",
            width,
            height
        );
        let expected = reference::equalize_channel(&samples, &config.mapping()).unwrap();
        assert_eq!(equalized.channels[0], expected.pixels, "{}x{}", width, height);
    }
}

#[tokio::test]
async fn test_color_channels_are_independent() {
    let config = PipelineConfig::new(BitDepth::Eight, 3).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let n = 40 * 30;
    let red: Vec<u8> = (0..n).map(|i| (i % 256) as u8).collect();
    let green = vec![200u8; n];
    let blue: Vec<u8> = (0..n).map(|i| (i % 17) as u8).collect();
    let image = Image::from_planes(40, 30, vec![red, green, blue]).unwrap();

    let results = controller.equalize_channels(&image).await.unwrap();
    assert_eq!(results.len(), 3);
    for (samples, result) in image.channels().zip(&results) {
        let out = result.as_ref().unwrap();
        let expected = reference::equalize_channel(samples, &config.mapping()).unwrap();
        assert_eq!(out.pixels, expected.pixels);
        assert!(out.lut.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[tokio::test]
async fn test_sixteen_bit_full_range() {
    let config = PipelineConfig::new(BitDepth::Sixteen, 1).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let samples: Vec<u16> = (0..301 * 17u32).map(|i| (i.wrapping_mul(2654435761) >> 16) as u16).collect();
    let image = Image::from_planes(301, 17, vec![samples.clone()]).unwrap();
    let (equalized, outputs) = controller.equalize_with_outputs(&image).await.unwrap();
    let out = &outputs[0];

    let expected = reference::equalize_channel(&samples, &config.mapping()).unwrap();
    assert_eq!(out.histogram.len(), 65536);
    assert_eq!(*out.cumulative.last().unwrap(), 301 * 17);
    assert_eq!(out.step_doubling.as_ref(), Some(&out.cumulative));
    assert_eq!(out.lut, expected.lut);
    assert_eq!(equalized.channels[0], expected.pixels);
}

#[tokio::test]
async fn test_work_efficient_only_skips_step_doubling() {
    let config = PipelineConfig::new(BitDepth::Eight, 1)
        .unwrap()
        .with_scan_mode(ScanMode::WorkEfficient);
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let image = Image::from_planes(4, 4, vec![scenario_a()]).unwrap();
    let (_, outputs) = controller.equalize_with_outputs(&image).await.unwrap();
    assert!(outputs[0].step_doubling.is_none());
    assert_eq!(outputs[0].cumulative[255], 16);
}

#[tokio::test]
async fn test_buffers_reused_across_images() {
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let small = Image::from_planes(4, 4, vec![scenario_a()]).unwrap();
    controller.equalize(&small).await.unwrap();
    let live = controller.session().live_buffers();
    controller.equalize(&small).await.unwrap();
    assert_eq!(controller.session().live_buffers(), live);

    // new dimensions replace the set rather than growing the arena
    let large = Image::from_planes(33, 5, vec![vec![9u8; 165]]).unwrap();
    controller.equalize(&large).await.unwrap();
    assert_eq!(controller.session().live_buffers(), live);

    controller.release_buffers().unwrap();
    assert_eq!(controller.session().live_buffers(), 0);
}

#[tokio::test]
async fn test_validation_rejects_mismatched_image() {
    let config = PipelineConfig::new(BitDepth::Eight, 3).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };

    let gray = Image::from_planes(2, 2, vec![vec![1u8; 4]]).unwrap();
    assert!(matches!(
        controller.equalize(&gray).await,
        Err(EqualizeError::Configuration(_))
    ));

    let deep = Image::from_planes(2, 2, vec![vec![1u16; 4]; 3]).unwrap();
    assert!(matches!(
        controller.equalize(&deep).await,
        Err(EqualizeError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_reduced_bin_count() {
    let config = PipelineConfig::with_bins(BitDepth::Eight, 1, 64).unwrap();
    let Some(mut controller) = controller(config).await else {
        return;
    };
    // 64 bins: each bin spans four values
    let samples: Vec<u8> = (0..=255u8).collect();
    let image = Image::from_planes(16, 16, vec![samples.clone()]).unwrap();
    let (_, outputs) = controller.equalize_with_outputs(&image).await.unwrap();
    assert!(outputs[0].histogram.iter().all(|&c| c == 4));

    let expected = reference::equalize_channel(&samples, &config.mapping()).unwrap();
    assert_eq!(outputs[0].pixels, expected.pixels);
}

#[tokio::test]
async fn test_broken_kernel_is_build_error() {
    let options = SessionOptions {
        kernel_source: Some("fn calculateHistogram( {".to_string()),
        ..Default::default()
    };
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    match Controller::new(config, &options).await {
        Err(EqualizeError::Build(diagnostics)) => assert!(!diagnostics.is_empty()),
        Err(EqualizeError::DeviceUnavailable(msg)) => eprintln!("Skipping: {}", msg),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("broken kernel compiled"),
    }
}

#[tokio::test]
async fn test_compiler_diagnostics_in_build_error() {
    // every entry point present, so the module reaches the shader compiler
    let options = SessionOptions {
        kernel_source: Some(format!(
            "{}\nfn broken() -> u32 {{ return 1.5; }}\n",
            EQUALIZE_KERNELS
        )),
        ..Default::default()
    };
    let config = PipelineConfig::new(BitDepth::Eight, 1).unwrap();
    match Controller::new(config, &options).await {
        Err(EqualizeError::Build(diagnostics)) => {
            assert!(diagnostics.contains("AbstractFloat"), "{}", diagnostics)
        }
        Err(EqualizeError::DeviceUnavailable(msg)) => eprintln!("Skipping: {}", msg),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("mistyped kernel compiled"),
    }
}

/// Kernels whose step-doubling pass copies instead of adding
fn kernels_without_doubling_add() -> String {
    let add = "value = value + doubling_src[i - params.stride];";
    assert!(EQUALIZE_KERNELS.contains(add));
    EQUALIZE_KERNELS.replace(add, "value = value + 0u;")
}

#[tokio::test]
async fn test_failed_channel_is_isolated() {
    let options = SessionOptions {
        kernel_source: Some(kernels_without_doubling_add()),
        ..Default::default()
    };
    let config = PipelineConfig::new(BitDepth::Eight, 3).unwrap();
    let mut controller = match Controller::new(config, &options).await {
        Ok(controller) => controller,
        Err(EqualizeError::DeviceUnavailable(msg)) => {
            eprintln!("Skipping: {}", msg);
            return;
        }
        Err(e) => panic!("failed to open device: {}", e),
    };

    // all mass in the last bin: the copied histogram equals its prefix sum,
    // so the middle channel passes the cross-check
    let ramp: Vec<u8> = (0..16u8).map(|i| i * 16).collect();
    let image = Image::from_planes(4, 4, vec![scenario_a(), vec![255u8; 16], ramp]).unwrap();

    let results = controller.equalize_channels(&image).await.unwrap();
    assert_eq!(results.len(), 3);
    for index in [0, 2] {
        let err = results[index].as_ref().unwrap_err();
        assert_eq!(err.channel, index);
        assert_eq!(err.stage, Stage::Scan);
        assert!(
            matches!(err.source, EqualizeError::DataIntegrity(_)),
            "{}",
            err
        );
    }
    let white = results[1].as_ref().unwrap();
    let expected = reference::equalize_channel(&[255u8; 16], &config.mapping()).unwrap();
    assert_eq!(white.lut, expected.lut);
    assert_eq!(white.pixels, expected.pixels);

    match controller.equalize(&image).await {
        Err(EqualizeError::Channel(err)) => {
            assert_eq!((err.channel, err.stage), (0, Stage::Scan))
        }
        other => panic!("expected a scan failure, got {:?}", other.map(|_| ())),
    }

    // same session, work-efficient scan only: every channel recovers
    let session = controller.into_session().unwrap();
    assert_eq!(session.live_buffers(), 0);
    let mut controller =
        Controller::with_session(session, config.with_scan_mode(ScanMode::WorkEfficient)).unwrap();
    let equalized = controller.equalize(&image).await.unwrap();
    for (samples, pixels) in image.channels().zip(&equalized.channels) {
        let expected = reference::equalize_channel(samples, &config.mapping()).unwrap();
        assert_eq!(pixels, &expected.pixels);
    }
}

#[test]
fn test_stage_names_in_channel_errors() {
    let err = histeq::ChannelError::new(1, Stage::Normalize, EqualizeError::Dispatch("lost".into()));
    assert!(err.to_string().contains("normalize"));
}
