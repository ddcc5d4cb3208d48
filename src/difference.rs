// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::GrayImage;

use crate::error::Result;
use crate::frame_store::FrameStore;
use crate::image_funcs::{absolute_difference, bitwise_or, equalize, threshold_at};
use crate::light_calibration::LightCalibrator;
use crate::parameters::Parameters;

/// How background and frames are transformed before being differenced.
#[derive(Clone, Copy, Debug)]
pub enum Preprocessing<'a> {
    Raw,
    /// Background and frame are equalised independently.
    HistogramEqualization,
    /// Each frame is calibrated against the background's reference colour.
    /// The background itself is left as is: calibrating it against its own
    /// reference colour is the identity.
    LightCalibrated(&'a LightCalibrator),
}

impl Preprocessing<'_> {
    pub fn apply_background(&self, background: &GrayImage) -> GrayImage {
        match self {
            Preprocessing::Raw => background.clone(),
            Preprocessing::HistogramEqualization => equalize(background),
            Preprocessing::LightCalibrated(_) => background.clone(),
        }
    }

    pub fn apply_frame(&self, index: u32, frame: GrayImage) -> Result<GrayImage> {
        match self {
            Preprocessing::Raw => Ok(frame),
            Preprocessing::HistogramEqualization => Ok(equalize(&frame)),
            Preprocessing::LightCalibrated(calibrator) =>
                calibrator.calibrate_frame(index, &frame),
        }
    }
}

/// Produces single frame difference images on demand, for display. The
/// per-frame feature pipeline does not go through here; it keeps its own
/// window of preprocessed frames.
pub struct DifferenceEngine<'a> {
    frame_store: &'a FrameStore,
    background: &'a GrayImage,
    delta_frame: u32,
    same_colour_level: u32,
}

impl<'a> DifferenceEngine<'a> {
    pub fn new(parameters: &'a Parameters, background: &'a GrayImage) -> DifferenceEngine<'a> {
        DifferenceEngine{frame_store: parameters.frame_store(),
                         background,
                         delta_frame: parameters.delta_frame(),
                         same_colour_level: parameters.same_colour_level()}
    }

    fn read_frame(&self, preprocessing: Preprocessing, index: u32) -> Result<GrayImage> {
        preprocessing.apply_frame(index, self.frame_store.read(index)?)
    }

    /// `|preprocess(background) - preprocess(frame[index])|`
    pub fn background_difference(&self, preprocessing: Preprocessing, index: u32)
                                 -> Result<GrayImage> {
        let background = preprocessing.apply_background(self.background);
        let frame = self.read_frame(preprocessing, index)?;
        Ok(absolute_difference(&background, &frame))
    }

    /// `|preprocess(frame[index - delta_frame]) - preprocess(frame[index])|`,
    /// or `None` when `index <= delta_frame`.
    pub fn temporal_difference(&self, preprocessing: Preprocessing, index: u32)
                               -> Result<Option<GrayImage>> {
        if index <= self.delta_frame {
            return Ok(None);
        }
        let previous = self.read_frame(preprocessing, index - self.delta_frame)?;
        let current = self.read_frame(preprocessing, index)?;
        Ok(Some(absolute_difference(&previous, &current)))
    }

    /// Union of the raw background and temporal differences, each binarised
    /// at the same colour level. Without enough history only the background
    /// term contributes.
    pub fn threshold_mask(&self, index: u32) -> Result<GrayImage> {
        let current = self.frame_store.read(index)?;
        let background_mask = threshold_at(
            &absolute_difference(self.background, &current), self.same_colour_level);
        if index <= self.delta_frame {
            return Ok(background_mask);
        }
        let previous = self.frame_store.read(index - self.delta_frame)?;
        let temporal_mask = threshold_at(
            &absolute_difference(&previous, &current), self.same_colour_level);
        Ok(bitwise_or(&background_mask, &temporal_mask))
    }
}

#[cfg(test)]
mod tests {
    use imageproc::gray_image;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::FrameSeries;
    use crate::light_calibration::CalibrationMethod;

    fn run_folder(frames: &[GrayImage], background: &GrayImage) -> (TempDir, Parameters) {
        let dir = TempDir::new().unwrap();
        background.save(dir.path().join("background.png")).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            frame.save(dir.path().join(format!("frames-{:04}.png", i + 1))).unwrap();
        }
        let parameters = Parameters::new(dir.path(), "png", None, 1, 1, 15).unwrap();
        (dir, parameters)
    }

    #[test]
    fn test_background_difference() {
        let background = gray_image!(100, 100; 100, 100);
        let frames = [gray_image!(150, 100; 90, 100)];
        let (_dir, parameters) = run_folder(&frames, &background);
        let engine = DifferenceEngine::new(&parameters, &background);
        assert_eq!(engine.background_difference(Preprocessing::Raw, 1).unwrap(),
                   gray_image!(50, 0; 10, 0));
    }

    #[test]
    fn test_temporal_difference() {
        let background = gray_image!(0, 0);
        let frames = [gray_image!(10, 20), gray_image!(15, 5), gray_image!(15, 5)];
        let (_dir, parameters) = run_folder(&frames, &background);
        let engine = DifferenceEngine::new(&parameters, &background);
        assert_eq!(engine.temporal_difference(Preprocessing::Raw, 1).unwrap(), None);
        assert_eq!(engine.temporal_difference(Preprocessing::Raw, 2).unwrap(),
                   Some(gray_image!(5, 15)));
        assert_eq!(engine.temporal_difference(Preprocessing::Raw, 3).unwrap(),
                   Some(gray_image!(0, 0)));
    }

    #[test]
    fn test_threshold_mask() {
        // Same colour level is 38.
        let background = gray_image!(100, 100, 100, 100);
        let frames = [gray_image!(100, 100, 100, 100),
                      gray_image!(100, 160, 100, 140)];
        let (_dir, parameters) = run_folder(&frames, &background);
        let engine = DifferenceEngine::new(&parameters, &background);
        assert_eq!(engine.threshold_mask(1).unwrap(), gray_image!(0, 0, 0, 0));
        assert_eq!(engine.threshold_mask(2).unwrap(), gray_image!(0, 255, 0, 255));
    }

    #[test]
    fn test_light_calibrated_difference() {
        // The frame is uniformly darker; calibration removes the change.
        let background = gray_image!(100, 100, 100);
        let frames = [gray_image!(80, 80, 80)];
        let (_dir, parameters) = run_folder(&frames, &background);
        let engine = DifferenceEngine::new(&parameters, &background);
        let calibrator = LightCalibrator::new(
            CalibrationMethod::Plsm, 100, FrameSeries::from_values(vec![80]));
        assert_eq!(engine.background_difference(Preprocessing::Raw, 1).unwrap(),
                   gray_image!(20, 20, 20));
        assert_eq!(engine.background_difference(
            Preprocessing::LightCalibrated(&calibrator), 1).unwrap(),
                   gray_image!(0, 0, 0));
    }

    #[test]
    fn test_missing_frame() {
        let background = gray_image!(0, 0);
        let frames = [gray_image!(10, 20)];
        let (_dir, parameters) = run_folder(&frames, &background);
        let engine = DifferenceEngine::new(&parameters, &background);
        assert!(engine.background_difference(Preprocessing::Raw, 2).is_err());
    }
}  // mod tests.
