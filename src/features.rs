// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Per-frame, per-ROI pixel count difference features.
//!
//! For every frame `i` and ROI `r`:
//!
//! * number of bees: count of pixels of `|background - frame[i]| & mask[r]`
//!   at or above the same colour level.
//! * bee speed: the same count over `|frame[i - delta_frame] - frame[i]| &
//!   mask[r]`, unavailable for the first `delta_frame` frames.
//!
//! Both images are first run through one of the four preprocessing variants
//! (raw, histogram equalisation, light calibration PLSM or LC). Each frame is
//! decoded and preprocessed exactly once per pass; the last `delta_frame`
//! preprocessed frames are kept in a sliding window.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Instant;

use image::GrayImage;
use log::info;

use crate::cache::{load_or_compute, parse_fields, FieldError, FrameSeries, Record};
use crate::difference::Preprocessing;
use crate::error::{AnalysisError, Result};
use crate::histogram::Histogram;
use crate::image_funcs::{absolute_difference, apply_mask};
use crate::light_calibration::LightCalibrator;
use crate::parameters::{AnalysisRect, Dataset, Parameters};

/// Value written in place of a bee speed that has no temporal history yet.
pub const SPEED_UNAVAILABLE: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiFeatures {
    pub number_bees: u32,
    /// `None` for frames `1..=delta_frame`.
    pub bee_speed: Option<u32>,
}

/// Features of all ROIs for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRow {
    rois: Vec<RoiFeatures>,
}

impl FeatureRow {
    pub fn new(rois: Vec<RoiFeatures>) -> FeatureRow {
        FeatureRow{rois}
    }

    pub fn rois(&self) -> &[RoiFeatures] {
        &self.rois
    }
}

/// Columns are `bees_r0,speed_r0,bees_r1,speed_r1,...`; an unavailable speed
/// is written as -1.
impl Record for FeatureRow {
    /// Number of ROIs.
    type Layout = u32;

    fn write_record(&self, out: &mut dyn Write) -> io::Result<()> {
        for (roi, features) in self.rois.iter().enumerate() {
            if roi > 0 {
                write!(out, ",")?;
            }
            let speed = match features.bee_speed {
                Some(speed) => speed as i64,
                None => SPEED_UNAVAILABLE,
            };
            write!(out, "{},{}", features.number_bees, speed)?;
        }
        Ok(())
    }

    fn parse_record(line: &str, number_rois: u32)
                    -> std::result::Result<FeatureRow, FieldError> {
        let values = parse_fields::<i64>(line, 2 * number_rois as usize)?;
        let count = |field_index: usize| -> std::result::Result<u32, FieldError> {
            u32::try_from(values[field_index]).map_err(|_| FieldError{
                field_index,
                reason: format!("{} is not a pixel count", values[field_index])})
        };
        let mut rois = Vec::with_capacity(number_rois as usize);
        for roi in 0..number_rois as usize {
            let number_bees = count(2 * roi)?;
            let bee_speed = if values[2 * roi + 1] == SPEED_UNAVAILABLE {
                None
            } else {
                Some(count(2 * roi + 1)?)
            };
            rois.push(RoiFeatures{number_bees, bee_speed});
        }
        Ok(FeatureRow{rois})
    }
}

/// Number of bees and bee speed of every ROI for every frame, for one
/// preprocessing variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelCountDifference {
    rows: FrameSeries<FeatureRow>,
}

impl PixelCountDifference {
    pub fn new(rows: FrameSeries<FeatureRow>) -> PixelCountDifference {
        PixelCountDifference{rows}
    }

    pub fn rows(&self) -> &FrameSeries<FeatureRow> {
        &self.rows
    }

    pub fn number_frames(&self) -> u32 {
        self.rows.len()
    }

    /// Features of ROI `roi` (0-based) at frame `index` (1-based).
    pub fn get(&self, index: u32, roi: u32) -> Option<RoiFeatures> {
        self.rows.get(index)?.rois.get(roi as usize).copied()
    }

    /// Number of bees series of ROI `roi`, frame 1 first.
    pub fn number_bees(&self, roi: u32) -> Vec<u32> {
        self.rows.values().iter()
            .filter_map(|row| row.rois.get(roi as usize))
            .map(|features| features.number_bees)
            .collect()
    }

    /// Bee speed series of ROI `roi`, frame 1 first.
    pub fn bee_speed(&self, roi: u32) -> Vec<Option<u32>> {
        self.rows.values().iter()
            .filter_map(|row| row.rois.get(roi as usize))
            .map(|features| features.bee_speed)
            .collect()
    }

    /// Writes one `index,bees_r0,speed_r0,...` line per frame, the rest of
    /// each line being the cache record of that frame.
    pub fn write_csv(&self, out: &mut dyn Write) -> io::Result<()> {
        for (index, row) in self.rows.iter() {
            write!(out, "{},", index)?;
            row.write_record(out)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Computes (or loads) the pixel count difference series of a run.
pub struct FeatureExtractor<'a> {
    parameters: &'a Parameters,
    background: &'a GrayImage,
    masks: &'a [GrayImage],
}

impl<'a> FeatureExtractor<'a> {
    /// `masks` holds one 0/255 mask per ROI, as returned by
    /// [crate::frame_store::FrameStore::read_mask()].
    pub fn new(parameters: &'a Parameters, background: &'a GrayImage,
               masks: &'a [GrayImage]) -> Result<FeatureExtractor<'a>> {
        if masks.len() != parameters.number_rois() as usize {
            return Err(AnalysisError::Configuration(format!(
                "{} masks given for {} regions of interest",
                masks.len(), parameters.number_rois())));
        }
        Ok(FeatureExtractor{parameters, background, masks})
    }

    pub fn raw(&self) -> Result<PixelCountDifference> {
        info!("Computing pixel count difference raw");
        self.compute(Preprocessing::Raw, Dataset::PixelCountDifferenceRaw)
    }

    pub fn histogram_equalization(&self) -> Result<PixelCountDifference> {
        info!("Computing pixel count difference on histogram equalised images");
        self.compute(Preprocessing::HistogramEqualization,
                     Dataset::PixelCountDifferenceHistogramEqualization)
    }

    /// `calibrator` must have been built from the reference rectangle `rect`.
    pub fn light_calibrated(&self, rect: &AnalysisRect, calibrator: &LightCalibrator)
                            -> Result<PixelCountDifference> {
        info!("Computing pixel count difference on light calibrated ({}) images",
              calibrator.method());
        self.compute(Preprocessing::LightCalibrated(calibrator),
                     Dataset::PixelCountDifferenceLightCalibrated(
                         *rect, calibrator.method()))
    }

    fn compute(&self, preprocessing: Preprocessing, dataset: Dataset)
               -> Result<PixelCountDifference> {
        let start = Instant::now();
        let store = self.parameters.frame_store();
        let level = self.parameters.same_colour_level();
        let delta_frame = self.parameters.delta_frame();
        info!("  same colour level {}, delta frame {}", level, delta_frame);
        let path = self.parameters.cache_filename(dataset);
        let background = preprocessing.apply_background(self.background);

        // Frames `index - delta_frame .. index - 1`, oldest first.
        let mut window: VecDeque<GrayImage> =
            VecDeque::with_capacity(delta_frame as usize + 1);
        let count = |difference: &GrayImage, mask: &GrayImage| {
            Histogram::compute(&apply_mask(difference, mask)).number_different_pixels(level)
        };
        let rows = load_or_compute(
            &path, self.parameters.number_frames(), self.parameters.number_rois(),
            |index| {
                let frame = preprocessing.apply_frame(index, store.read(index)?)?;
                let background_difference = absolute_difference(&background, &frame);
                let temporal_difference = if index > delta_frame {
                    window.front().map(|previous| absolute_difference(previous, &frame))
                } else {
                    None
                };
                window.push_back(frame);
                while window.len() > delta_frame as usize {
                    window.pop_front();
                }
                let rois = self.masks.iter().map(|mask| RoiFeatures{
                    number_bees: count(&background_difference, mask),
                    bee_speed: temporal_difference.as_ref().map(|d| count(d, mask)),
                }).collect();
                Ok(FeatureRow{rois})
            })?;
        info!("Pixel count difference ready in {:?}", start.elapsed());
        Ok(PixelCountDifference{rows})
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::Luma;
    use tempfile::TempDir;

    use super::*;
    use crate::light_calibration::CalibrationMethod;

    // 4x4 image of `base` with the top-left 2x2 block set to `block`.
    fn block_image(base: u8, block: u8) -> GrayImage {
        GrayImage::from_fn(4, 4, |x, y| {
            if x < 2 && y < 2 { Luma([block]) } else { Luma([base]) }
        })
    }

    struct Fixture {
        _dir: TempDir,
        parameters: Parameters,
        background: GrayImage,
        masks: Vec<GrayImage>,
    }

    fn fixture(frames: &[GrayImage], masks: &[GrayImage], delta_frame: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let background = block_image(100, 100);
        background.save(dir.path().join("background.png")).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            frame.save(dir.path().join(format!("frames-{:04}.png", i + 1))).unwrap();
        }
        for (i, mask) in masks.iter().enumerate() {
            mask.save(dir.path().join(format!("Mask-{}.png", i + 1))).unwrap();
        }
        let parameters = Parameters::new(dir.path(), "png", None, masks.len() as u32,
                                         delta_frame, 15).unwrap();
        let masks = (0..masks.len() as u32)
            .map(|roi| parameters.frame_store().read_mask(roi).unwrap())
            .collect();
        Fixture{_dir: dir, parameters, background, masks}
    }

    #[test]
    fn test_number_bees_counts_masked_pixels_only() {
        let top_left = block_image(0, 255);
        let bottom_right = GrayImage::from_fn(4, 4, |x, y| {
            if x >= 2 && y >= 2 { Luma([255]) } else { Luma([0]) }
        });
        let f = fixture(&[block_image(100, 150)], &[top_left, bottom_right], 2);
        assert_eq!(f.parameters.same_colour_level(), 38);
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        let features = extractor.raw().unwrap();
        assert_eq!(features.number_frames(), 1);
        assert_eq!(features.get(1, 0), Some(RoiFeatures{number_bees: 4, bee_speed: None}));
        assert_eq!(features.get(1, 1), Some(RoiFeatures{number_bees: 0, bee_speed: None}));
    }

    #[test]
    fn test_speed_sentinel_boundary() {
        let frames = [block_image(100, 100), block_image(100, 100),
                      block_image(100, 150), block_image(100, 150),
                      block_image(100, 150)];
        let f = fixture(&frames, &[block_image(255, 255)], 2);
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        let features = extractor.raw().unwrap();
        assert_eq!(features.number_bees(0), vec![0, 0, 4, 4, 4]);
        assert_eq!(features.bee_speed(0), vec![None, None, Some(4), Some(4), Some(0)]);

        let path = f.parameters.cache_filename(Dataset::PixelCountDifferenceRaw);
        assert_eq!(fs::read_to_string(path).unwrap(),
                   "0,-1\n0,-1\n4,4\n4,4\n4,0\n");
    }

    #[test]
    fn test_speed_with_unit_delta() {
        let frames = [block_image(100, 100), block_image(100, 150),
                      block_image(100, 100)];
        let f = fixture(&frames, &[block_image(255, 255)], 1);
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        let features = extractor.raw().unwrap();
        assert_eq!(features.bee_speed(0), vec![None, Some(4), Some(4)]);
    }

    #[test]
    fn test_served_from_cache_is_identical() {
        let frames = [block_image(100, 100), block_image(100, 150),
                      block_image(90, 150)];
        let f = fixture(&frames, &[block_image(255, 255), block_image(0, 255)], 1);
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        let computed = extractor.raw().unwrap();
        let path = f.parameters.cache_filename(Dataset::PixelCountDifferenceRaw);
        assert!(path.is_file());
        assert_eq!(extractor.raw().unwrap(), computed);
    }

    #[test]
    fn test_histogram_equalization() {
        // Equalised background is uniformly 255; equalised frame is 191
        // outside the block and 255 inside it.
        let f = fixture(&[block_image(100, 150)], &[block_image(255, 255)], 1);
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        let features = extractor.histogram_equalization().unwrap();
        assert_eq!(features.number_bees(0), vec![12]);
        assert!(f.parameters.cache_filename(
            Dataset::PixelCountDifferenceHistogramEqualization).is_file());
    }

    #[test]
    fn test_light_calibrated_removes_illumination_change() {
        // Frame is 20 levels darker everywhere except the block.
        let frames = [block_image(80, 150)];
        let f = fixture(&frames, &[block_image(255, 255)], 1);
        let rect = AnalysisRect::new(2, 2, 4, 4);
        let calibrator = LightCalibrator::new(
            CalibrationMethod::Plsm, 100, FrameSeries::from_values(vec![80]));
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        assert_eq!(extractor.raw().unwrap().number_bees(0), vec![4]);
        let features = extractor.light_calibrated(&rect, &calibrator).unwrap();
        assert_eq!(features.number_bees(0), vec![4]);
        assert!(f.parameters.cache_filename(
            Dataset::PixelCountDifferenceLightCalibrated(rect, CalibrationMethod::Plsm))
                .is_file());
    }

    #[test]
    fn test_missing_frame_leaves_no_cache() {
        let frames = [block_image(100, 100), block_image(100, 150)];
        let f = fixture(&frames, &[block_image(255, 255)], 1);
        fs::remove_file(f.parameters.frame_store().frame_path(2)).unwrap();
        let extractor = FeatureExtractor::new(&f.parameters, &f.background, &f.masks).unwrap();
        assert!(matches!(extractor.raw(), Err(AnalysisError::MissingFile{..})));
        assert!(!f.parameters.cache_filename(Dataset::PixelCountDifferenceRaw).exists());
    }

    #[test]
    fn test_feature_row_record() {
        let row = FeatureRow::new(vec![
            RoiFeatures{number_bees: 12, bee_speed: None},
            RoiFeatures{number_bees: 0, bee_speed: Some(7)}]);
        let mut out = Vec::<u8>::new();
        row.write_record(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line, "12,-1,0,7");
        assert_eq!(FeatureRow::parse_record(&line, 2).unwrap(), row);

        assert_eq!(FeatureRow::parse_record("12,-1,0", 2).unwrap_err().field_index, 3);
        assert_eq!(FeatureRow::parse_record("12,-2,0,7", 2).unwrap_err().field_index, 1);
        assert_eq!(FeatureRow::parse_record("-1,3,0,7", 2).unwrap_err().field_index, 0);
    }

    #[test]
    fn test_mask_count_must_match_rois() {
        let f = fixture(&[block_image(100, 150)], &[block_image(255, 255)], 1);
        let masks = vec![f.masks[0].clone(), f.masks[0].clone()];
        assert!(matches!(FeatureExtractor::new(&f.parameters, &f.background, &masks),
                         Err(AnalysisError::Configuration(_))));
        assert!(matches!(FeatureExtractor::new(&f.parameters, &f.background, &[]),
                         Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn test_write_csv() {
        let features = PixelCountDifference::new(FrameSeries::from_values(vec![
            FeatureRow::new(vec![RoiFeatures{number_bees: 3, bee_speed: None}]),
            FeatureRow::new(vec![RoiFeatures{number_bees: 5, bee_speed: Some(2)}])]));
        let mut out = Vec::<u8>::new();
        features.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1,3,-1\n2,5,2\n");
    }
}  // mod tests.
