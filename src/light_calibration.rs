// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Illumination normalisation. A frame is remapped so that its most common
//! intensity inside a reference rectangle (`pf`) lands on the background's
//! most common intensity in the same rectangle (`pb`). Values below `pf` are
//! scaled towards `pb`; the headroom `255 - v` of values at or above `pf` is
//! scaled by `(255 - pb) / (255 - pf)`. Both methods are monotonic and map
//! 0 to 0 and 255 to 255.
//!
//! Both reference modes are clamped to `[1, 254]` before use. This keeps the
//! divisions defined and makes equal modes an exact identity, at the price of
//! treating a reference mode of 0 (or 255) as if it were 1 (or 254).

use std::fmt;

use image::GrayImage;

use crate::cache::FrameSeries;
use crate::error::{AnalysisError, Result};

pub const MIN_REFERENCE_MODE: u8 = 1;
pub const MAX_REFERENCE_MODE: u8 = 254;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalibrationMethod {
    /// Piecewise linear scaling through (0,0), (pf,pb) and (255,255),
    /// rounded to the nearest level.
    Plsm,
    /// The same knots in integer arithmetic, truncating.
    Lc,
}

impl CalibrationMethod {
    pub const ALL: [CalibrationMethod; 2] = [CalibrationMethod::Plsm, CalibrationMethod::Lc];

    /// Name used in cache file names.
    pub fn tag(&self) -> &'static str {
        match self {
            CalibrationMethod::Plsm => "PLSM",
            CalibrationMethod::Lc => "LC",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn clamp_mode(mode: u8) -> u8 {
    mode.clamp(MIN_REFERENCE_MODE, MAX_REFERENCE_MODE)
}

/// Remaps a single pixel value given the background reference mode `pb` and
/// the frame reference mode `pf`.
pub fn calibrate_value(method: CalibrationMethod, value: u8, pb: u8, pf: u8) -> u8 {
    let pb = clamp_mode(pb) as u32;
    let pf = clamp_mode(pf) as u32;
    let v = value as u32;
    match method {
        CalibrationMethod::Lc => {
            if v < pf {
                (v * pb / pf) as u8
            } else {
                (255 - (255 - v) * (255 - pb) / (255 - pf)) as u8
            }
        },
        CalibrationMethod::Plsm => {
            if v < pf {
                (v as f32 * pb as f32 / pf as f32).round() as u8
            } else {
                let headroom = (255 - v) as f32 * (255 - pb) as f32 / (255 - pf) as f32;
                (255.0 - headroom.round()) as u8
            }
        },
    }
}

/// Lookup table applying [calibrate_value()] to every level.
pub fn lookup_table(method: CalibrationMethod, pb: u8, pf: u8) -> [u8; 256] {
    let mut table = [0_u8; 256];
    for (level, entry) in table.iter_mut().enumerate() {
        *entry = calibrate_value(method, level as u8, pb, pf);
    }
    table
}

pub fn calibrate_image(method: CalibrationMethod, image: &GrayImage, pb: u8, pf: u8)
                       -> GrayImage {
    let table = lookup_table(method, pb, pf);
    let mut result = image.clone();
    for pixel in result.iter_mut() {
        *pixel = table[*pixel as usize];
    }
    result
}

/// Calibrates the frames of a run against a fixed reference rectangle: `pb`
/// is computed once from the background, `pf` is looked up per frame.
#[derive(Clone, Debug)]
pub struct LightCalibrator {
    method: CalibrationMethod,
    background_mode: u8,
    frame_modes: FrameSeries<u8>,
}

impl LightCalibrator {
    /// # Arguments
    ///   `background_mode` - Most common colour of the background inside the
    ///   reference rectangle.
    ///
    ///   `frame_modes` - Most common colour of each frame inside the same
    ///   rectangle.
    pub fn new(method: CalibrationMethod, background_mode: u8,
               frame_modes: FrameSeries<u8>) -> LightCalibrator {
        LightCalibrator{method, background_mode, frame_modes}
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }

    pub fn background_mode(&self) -> u8 {
        self.background_mode
    }

    pub fn frame_mode(&self, index: u32) -> Result<u8> {
        self.frame_modes.get(index).copied().ok_or_else(
            || AnalysisError::Configuration(format!(
                "no reference colour for frame {}", index)))
    }

    pub fn calibrate_frame(&self, index: u32, frame: &GrayImage) -> Result<GrayImage> {
        let pf = self.frame_mode(index)?;
        Ok(calibrate_image(self.method, frame, self.background_mode, pf))
    }
}

#[cfg(test)]
mod tests {
    use imageproc::gray_image;

    use super::*;

    #[test]
    fn test_identity_when_modes_are_equal() {
        for method in CalibrationMethod::ALL {
            for mode in [0_u8, 1, 2, 37, 128, 200, 254, 255] {
                for value in 0..=255_u8 {
                    assert_eq!(calibrate_value(method, value, mode, mode), value,
                               "{} mode {} value {}", method, mode, value);
                }
            }
        }
    }

    #[test]
    fn test_monotonic_with_fixed_endpoints() {
        for method in CalibrationMethod::ALL {
            for pb in [0_u8, 1, 60, 128, 254, 255] {
                for pf in [0_u8, 1, 60, 128, 254, 255] {
                    let table = lookup_table(method, pb, pf);
                    assert_eq!(table[0], 0);
                    assert_eq!(table[255], 255);
                    for level in 1..256 {
                        assert!(table[level] >= table[level - 1],
                                "{} pb {} pf {} level {}", method, pb, pf, level);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reference_mode_maps_to_background_mode() {
        for method in CalibrationMethod::ALL {
            assert_eq!(calibrate_value(method, 150, 100, 150), 100);
            assert_eq!(calibrate_value(method, 60, 90, 60), 90);
        }
    }

    #[test]
    fn test_methods_differ_in_rounding() {
        // 100 * 100 / 150 = 66.67
        assert_eq!(calibrate_value(CalibrationMethod::Lc, 100, 100, 150), 66);
        assert_eq!(calibrate_value(CalibrationMethod::Plsm, 100, 100, 150), 67);
        // 255 - 55 * 155 / 105 = 255 - 81.19
        assert_eq!(calibrate_value(CalibrationMethod::Lc, 200, 100, 150), 174);
        assert_eq!(calibrate_value(CalibrationMethod::Plsm, 200, 100, 150), 174);
    }

    #[test]
    fn test_calibrate_frame() {
        let frame = gray_image!(
            0,  75, 150;
            200, 255, 150);
        let calibrator = LightCalibrator::new(
            CalibrationMethod::Lc, 100, FrameSeries::from_values(vec![150, 100]));
        assert_eq!(calibrator.calibrate_frame(1, &frame).unwrap(), gray_image!(
            0,  50, 100;
            174, 255, 100));
        assert_eq!(calibrator.calibrate_frame(2, &frame).unwrap(), frame);
        assert!(matches!(calibrator.calibrate_frame(3, &frame),
                         Err(AnalysisError::Configuration(_))));
    }
}  // mod tests.
