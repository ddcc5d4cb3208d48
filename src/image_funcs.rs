// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::GrayImage;
use imageproc::contrast;

/// Pixel-wise `|a - b|`. Both images must have the same dimensions.
pub fn absolute_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    assert_eq!(a.dimensions(), b.dimensions());
    let (width, height) = a.dimensions();
    let pixels: Vec<u8> = a.as_raw().iter().zip(b.as_raw().iter())
        .map(|(&p, &q)| p.abs_diff(q))
        .collect();
    GrayImage::from_raw(width, height, pixels).unwrap()
}

/// Pixel-wise bitwise AND of `image` with a 0/255 `mask`.
pub fn apply_mask(image: &GrayImage, mask: &GrayImage) -> GrayImage {
    assert_eq!(image.dimensions(), mask.dimensions());
    let mut result = image.clone();
    for (pixel, &m) in result.iter_mut().zip(mask.as_raw().iter()) {
        *pixel &= m;
    }
    result
}

/// 255 where the pixel is at or above `level`, 0 elsewhere. A `level` above
/// 255 yields an all-zero image.
pub fn threshold_at(image: &GrayImage, level: u32) -> GrayImage {
    let mut result = image.clone();
    for pixel in result.iter_mut() {
        *pixel = if *pixel as u32 >= level { 255 } else { 0 };
    }
    result
}

/// Pixel-wise bitwise OR.
pub fn bitwise_or(a: &GrayImage, b: &GrayImage) -> GrayImage {
    assert_eq!(a.dimensions(), b.dimensions());
    let mut result = a.clone();
    for (pixel, &q) in result.iter_mut().zip(b.as_raw().iter()) {
        *pixel |= q;
    }
    result
}

/// Global histogram equalisation.
pub fn equalize(image: &GrayImage) -> GrayImage {
    contrast::equalize_histogram(image)
}

// mod tests.
