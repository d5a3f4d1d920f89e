// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use histeq::{BitDepth, DeviceClass, EqualizeError, RunConfig, ScanMode};

#[test]
fn test_config_default() {
    let config = RunConfig::default();

    assert_eq!(config.bit_depth(), BitDepth::Eight);
    assert_eq!(config.scan_mode, ScanMode::Both, "Scans cross-check by default");
    assert_eq!(config.device.class, DeviceClass::Any);
    assert!(config.kernel_path.is_none());
}

#[test]
fn test_config_default_path() {
    if let Some(path) = RunConfig::default_path() {
        assert!(path.ends_with("histeq/config.json"));
    }
}

#[test]
fn test_config_load_from_file() {
    let path = std::env::temp_dir().join(format!("histeq_config_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "high_precision": true, "bins": 4096, "device": { "class": "DiscreteGpu" } }"#,
    )
    .unwrap();

    let config = RunConfig::load_or_default(Some(&path)).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.bit_depth(), BitDepth::Sixteen);
    assert_eq!(config.device.class, DeviceClass::DiscreteGpu);
    let pipeline = config.pipeline_config(3).unwrap();
    assert_eq!(pipeline.num_bins(), 4096);
    assert_eq!(pipeline.max_value(), 65535);
    assert_eq!(pipeline.channel_count(), 3);
}

#[test]
fn test_config_invalid_file() {
    let path = std::env::temp_dir().join(format!("histeq_bad_{}.json", std::process::id()));
    std::fs::write(&path, "{ bins: ").unwrap();
    let result = RunConfig::load(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(EqualizeError::Configuration(_))));
}

#[test]
fn test_config_bins_out_of_range() {
    let config = RunConfig {
        bins: Some(300),
        ..Default::default()
    };
    assert!(config.pipeline_config(1).is_err());
}
