// SPDX-License-Identifier: GPL-3.0-only
//! Equalization kernel module and its binding contract
//!
//! A kernel module is assembled from three parts:
//! - a `WORKGROUP_SIZE` constant chosen for the device
//! - the bit-depth prelude (`load_pixel`, `store_pixel`)
//! - the kernel body exporting the five entry points
//!
//! The body can be replaced with external WGSL as long as it keeps the entry
//! points and binding slots listed in [`Kernel::bindings`].

mod gpu_processor;

pub use gpu_processor::{DispatchGrid, read_buffer_async};

use crate::constants::{bindings, entry_points};
use crate::media::Pixel;

/// Default kernel body shared by every bit depth
pub const EQUALIZE_KERNELS: &str = include_str!("equalize.wgsl");

/// Scalar kernel arguments, bound as a uniform at binding 0
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Params {
    pub total_pixels: u32,
    pub num_bins: u32,
    pub max_value: u32,
    /// Power-of-two length of the work-efficient scan buffer
    pub padded_len: u32,
    /// Scan level distance / doubling offset
    pub stride: u32,
    /// Work-efficient scan phase, see `constants::scan_phase`
    pub phase: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

/// The five entry points of the kernel module contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    CalculateHistogram,
    ScanWorkEfficient,
    ScanStepDoubling,
    NormalizeLut,
    ApplyLut,
}

impl Kernel {
    pub const ALL: [Kernel; 5] = [
        Kernel::CalculateHistogram,
        Kernel::ScanWorkEfficient,
        Kernel::ScanStepDoubling,
        Kernel::NormalizeLut,
        Kernel::ApplyLut,
    ];

    pub fn entry_point(&self) -> &'static str {
        match self {
            Kernel::CalculateHistogram => entry_points::CALCULATE_HISTOGRAM,
            Kernel::ScanWorkEfficient => entry_points::SCAN_WORK_EFFICIENT,
            Kernel::ScanStepDoubling => entry_points::SCAN_STEP_DOUBLING,
            Kernel::NormalizeLut => entry_points::NORMALIZE_LUT,
            Kernel::ApplyLut => entry_points::APPLY_LUT,
        }
    }

    /// Binding slots for the kernel's buffer arguments, in argument order
    ///
    /// - calculateHistogram(input, hist)
    /// - scan_workEfficient(hist, cumHist)
    /// - scan_stepDoubling(src, dst)
    /// - normalizeLUT(cumHist, lut)
    /// - applyLUT(input, lut, output)
    pub fn bindings(&self) -> &'static [u32] {
        match self {
            Kernel::CalculateHistogram => &[bindings::PIXELS, bindings::HIST_ACCUM],
            Kernel::ScanWorkEfficient => &[bindings::HIST_IN, bindings::SCAN_OUT],
            Kernel::ScanStepDoubling => &[bindings::DOUBLING_SRC, bindings::DOUBLING_DST],
            Kernel::NormalizeLut => &[bindings::CUM_IN, bindings::LUT_OUT],
            Kernel::ApplyLut => &[bindings::PIXELS, bindings::LUT_IN, bindings::OUTPUT],
        }
    }
}

/// Assemble the WGSL module for pixel width `P`
pub fn assemble_module<P: Pixel>(workgroup_size: u32, body: &str) -> String {
    format!(
        "const WORKGROUP_SIZE: u32 = {}u;\n\n{}\n{}",
        workgroup_size,
        P::KERNEL_PRELUDE,
        body
    )
}

/// Entry points the contract requires but `source` does not declare
///
/// A textual check that runs before handing the module to the device compiler,
/// so a missing entry point fails early with a readable message.
pub fn missing_entry_points(source: &str) -> Vec<&'static str> {
    Kernel::ALL
        .iter()
        .map(Kernel::entry_point)
        .filter(|name| {
            !source.split("fn ").skip(1).any(|rest| {
                rest.trim_start()
                    .strip_prefix(*name)
                    .is_some_and(|after| after.trim_start().starts_with('('))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(source: &str) -> naga::Module {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|e| panic!("{}", e.emit_to_string(source)));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap_or_else(|e| panic!("validation failed: {:?}", e));
        module
    }

    fn entry_names(module: &naga::Module) -> Vec<String> {
        module.entry_points.iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_u8_module_validates() {
        let module = validate(&assemble_module::<u8>(64, EQUALIZE_KERNELS));
        let names = entry_names(&module);
        for name in entry_points::ALL {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_u16_module_validates_at_max_group() {
        let module = validate(&assemble_module::<u16>(256, EQUALIZE_KERNELS));
        assert_eq!(entry_names(&module).len(), 5);
    }

    #[test]
    fn test_workgroup_size_is_applied() {
        let module = validate(&assemble_module::<u8>(128, EQUALIZE_KERNELS));
        for entry in &module.entry_points {
            assert_eq!(entry.workgroup_size, [128, 1, 1], "{}", entry.name);
        }
    }

    #[test]
    fn test_missing_entry_points() {
        assert!(missing_entry_points(EQUALIZE_KERNELS).is_empty());

        let partial = "fn calculateHistogram() {}\nfn applyLUT () {}";
        let missing = missing_entry_points(partial);
        assert_eq!(
            missing,
            vec!["scan_workEfficient", "scan_stepDoubling", "normalizeLUT"]
        );
    }

    #[test]
    fn test_params_layout() {
        // Uniform buffers need 16-byte multiples
        assert_eq!(std::mem::size_of::<Params>() % 16, 0);
        assert_eq!(std::mem::size_of::<Params>(), 32);
    }

    #[test]
    fn test_binding_slots_are_unique_per_kernel() {
        for kernel in Kernel::ALL {
            let slots = kernel.bindings();
            for (i, a) in slots.iter().enumerate() {
                assert_ne!(*a, bindings::PARAMS);
                assert!(!slots[i + 1..].contains(a), "{:?}", kernel);
            }
        }
    }
}
