//! Preprocessing transforms for the decode pipeline.
//!
//! Each transform is a pure function over a grayscale frame so the stages
//! are independently testable and the pipeline order stays data-driven.
//! Destructive transforms (thresholding, morphology) never feed later
//! stages; rotation and upscaling reach back to the equalized frame.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast::{adaptive_threshold, equalize_histogram};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;

/// Block radius for adaptive thresholding. Sized for barcode module widths
/// at typical kiosk camera resolutions.
const THRESHOLD_BLOCK_RADIUS: u32 = 12;

/// Human-readable stage names, indexed by `source_stage`.
pub const STAGE_NAMES: [&str; 6] = [
    "direct",
    "equalize",
    "threshold",
    "denoise",
    "rotate",
    "upscale",
];

/// Stage index reported for the rotation-correction probes.
pub const ROTATE_STAGE: usize = 4;

/// Contrast normalization via histogram equalization.
pub fn equalize(img: &GrayImage) -> GrayImage {
    equalize_histogram(img)
}

/// Adaptive (locally windowed) binarization.
pub fn threshold(img: &GrayImage) -> GrayImage {
    adaptive_threshold(img, THRESHOLD_BLOCK_RADIUS)
}

/// Morphological open pass to knock out speckle noise after binarization.
pub fn denoise(img: &GrayImage) -> GrayImage {
    open(img, Norm::LInf, 1)
}

/// The three axis-aligned rotation candidates, in fixed probe order.
pub fn rotations(img: &GrayImage) -> [GrayImage; 3] {
    [
        imageops::rotate90(img),
        imageops::rotate180(img),
        imageops::rotate270(img),
    ]
}

/// 2x nearest-neighbor upscale. Nearest keeps bar edges hard, which is what
/// the 1-D readers need.
pub fn upscale(img: &GrayImage) -> GrayImage {
    imageops::resize(img, img.width() * 2, img.height() * 2, FilterType::Nearest)
}
