// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

/// Work-group sizing
pub mod workgroup {
    /// Default lanes per work-group
    pub const DEFAULT_SIZE: u32 = 64;
    /// Upper bound regardless of what the device reports
    pub const MAX_SIZE: u32 = 256;
}

/// Kernel entry point names (the kernel module contract)
pub mod entry_points {
    pub const CALCULATE_HISTOGRAM: &str = "calculateHistogram";
    pub const SCAN_WORK_EFFICIENT: &str = "scan_workEfficient";
    pub const SCAN_STEP_DOUBLING: &str = "scan_stepDoubling";
    pub const NORMALIZE_LUT: &str = "normalizeLUT";
    pub const APPLY_LUT: &str = "applyLUT";

    /// Every entry point a kernel module must export
    pub const ALL: [&str; 5] = [
        CALCULATE_HISTOGRAM,
        SCAN_WORK_EFFICIENT,
        SCAN_STEP_DOUBLING,
        NORMALIZE_LUT,
        APPLY_LUT,
    ];
}

/// Binding slots in bind group 0
pub mod bindings {
    pub const PARAMS: u32 = 0;
    pub const PIXELS: u32 = 1;
    pub const HIST_ACCUM: u32 = 2;
    pub const HIST_IN: u32 = 3;
    pub const SCAN_OUT: u32 = 4;
    pub const DOUBLING_SRC: u32 = 5;
    pub const DOUBLING_DST: u32 = 6;
    pub const CUM_IN: u32 = 7;
    pub const LUT_OUT: u32 = 8;
    pub const LUT_IN: u32 = 9;
    pub const OUTPUT: u32 = 10;
}

/// Work-efficient scan phases, passed in `Params::phase`
pub mod scan_phase {
    pub const LOAD: u32 = 0;
    pub const UP_SWEEP: u32 = 1;
    pub const CLEAR_ROOT: u32 = 2;
    pub const DOWN_SWEEP: u32 = 3;
    pub const INCLUSIVE: u32 = 4;
}

/// Application metadata
pub mod app_info {
    /// Version string embedded by build.rs
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Directory name under the user config dir
    pub const CONFIG_DIR_NAME: &str = "histeq";
    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.json";
}
