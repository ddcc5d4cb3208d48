// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::path::PathBuf;

use log::info;

use crate::error::{AnalysisError, Result};
use crate::frame_store::FrameStore;
use crate::light_calibration::CalibrationMethod;

/// Number of distinct 8-bit intensity levels.
pub const NUMBER_COLOUR_LEVELS: usize = 256;

/// Rectangle of frame pixels `x1..x2` by `y1..y2` (upper bounds exclusive),
/// used as the light calibration reference area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnalysisRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl AnalysisRect {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> AnalysisRect {
        AnalysisRect{x1, y1, x2, y2}
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Checks `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height`.
    pub fn validate(&self, frame_size: (u32, u32)) -> Result<()> {
        let (width, height) = frame_size;
        if self.x1 >= self.x2 || self.x2 > width || self.y1 >= self.y2 || self.y2 > height {
            return Err(AnalysisError::Configuration(format!(
                "rectangle {} does not fit a {}x{} frame", self, width, height)));
        }
        Ok(())
    }

    // Fragment used in cache file names.
    fn file_tag(&self) -> String {
        format!("_RECT={}x{}-{}x{}", self.x1, self.y1, self.x2, self.y2)
    }
}

impl fmt::Display for AnalysisRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// The cached datasets of a run. Each one maps to a distinct file name that
/// encodes every parameter its content depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dataset {
    HistogramBackground,
    HistogramFramesAll,
    HistogramBackgroundRect(AnalysisRect),
    HistogramFramesRect(AnalysisRect),
    MostCommonColourRect(AnalysisRect),
    HistogramFramesLightCalibrated(AnalysisRect, CalibrationMethod),
    PixelCountDifferenceRaw,
    PixelCountDifferenceHistogramEqualization,
    PixelCountDifferenceLightCalibrated(AnalysisRect, CalibrationMethod),
}

/// Run parameters. Everything except the same colour threshold is fixed for
/// the lifetime of a run.
#[derive(Clone, Debug)]
pub struct Parameters {
    frame_store: FrameStore,
    number_rois: u32,
    delta_frame: u32,
    number_frames: u32,
    frame_size: (u32, u32),
    same_colour_threshold: u32,
    same_colour_level: u32,
}

impl Parameters {
    /// Validates the user supplied values and discovers the number of frames
    /// and the frame size from the run folder.
    ///
    /// # Arguments
    ///   `folder` - Directory holding frames, background, masks and caches.
    ///
    ///   `frame_file_type` - Extension of the frame and background files,
    ///   e.g. "jpg" or "png".
    ///
    ///   `mask_file_type` - Extension of the mask files; the frame extension
    ///   is used if `None`.
    ///
    ///   `number_rois` - Number of masks `Mask-1` .. `Mask-<number_rois>`.
    ///
    ///   `delta_frame` - Frame offset used for the bee speed signal. At least 1.
    ///
    ///   `same_colour_threshold` - Percentage (0-100) of the intensity range
    ///   below which a pixel difference is considered noise.
    pub fn new(folder: impl Into<PathBuf>, frame_file_type: &str,
               mask_file_type: Option<&str>, number_rois: u32,
               delta_frame: u32, same_colour_threshold: u32) -> Result<Parameters> {
        if number_rois == 0 {
            return Err(AnalysisError::Configuration(
                "at least one region of interest is required".to_string()));
        }
        if delta_frame == 0 {
            return Err(AnalysisError::Configuration(
                "delta frame must be at least 1".to_string()));
        }
        let same_colour_level = same_colour_level(same_colour_threshold)?;
        let store = FrameStore::new(folder, frame_file_type,
                                    mask_file_type.unwrap_or(frame_file_type));
        let number_frames = store.frame_count();
        if number_frames == 0 {
            return Err(AnalysisError::Configuration(format!(
                "no frame found at {:?}", store.frame_path(1))));
        }
        let background_path = store.background_path();
        if !background_path.is_file() {
            return Err(AnalysisError::MissingFile{path: background_path});
        }
        let frame_size = image::image_dimensions(&background_path).map_err(
            |source| AnalysisError::ImageDecode{path: background_path.clone(), source})?;
        info!("Run folder {:?}: {} frames of {}x{}",
              store.folder(), number_frames, frame_size.0, frame_size.1);
        Ok(Parameters{frame_store: store.with_frame_size(frame_size),
                      number_rois, delta_frame, number_frames, frame_size,
                      same_colour_threshold, same_colour_level})
    }

    pub fn frame_store(&self) -> &FrameStore {
        &self.frame_store
    }

    pub fn number_rois(&self) -> u32 {
        self.number_rois
    }

    pub fn delta_frame(&self) -> u32 {
        self.delta_frame
    }

    pub fn number_frames(&self) -> u32 {
        self.number_frames
    }

    /// (width, height) of the background and of every frame.
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn same_colour_threshold(&self) -> u32 {
        self.same_colour_threshold
    }

    /// Absolute intensity difference at or above which a pixel counts as
    /// different.
    pub fn same_colour_level(&self) -> u32 {
        self.same_colour_level
    }

    /// Returns a copy of these parameters with a different same colour
    /// threshold.
    pub fn with_same_colour_threshold(&self, same_colour_threshold: u32)
                                      -> Result<Parameters> {
        let same_colour_level = same_colour_level(same_colour_threshold)?;
        Ok(Parameters{same_colour_threshold, same_colour_level, ..self.clone()})
    }

    /// Name of the cache file of `dataset`. The frame extension is part of
    /// every name; feature names also carry the threshold, delta frame, ROI
    /// count and mask extension.
    pub fn cache_filename(&self, dataset: Dataset) -> PathBuf {
        let store = &self.frame_store;
        let frames = format!("FT={}", store.frame_file_type());
        let features = format!(
            "features-pixel-count-difference_SCT={}_DF={}_ROIS={}_{}_MT={}",
            self.same_colour_threshold, self.delta_frame, self.number_rois,
            frames, store.mask_file_type());
        let name = match dataset {
            Dataset::HistogramBackground =>
                format!("histogram-background_{}.csv", frames),
            Dataset::HistogramFramesAll =>
                format!("histogram-frames-all_{}.csv", frames),
            Dataset::HistogramBackgroundRect(rect) =>
                format!("histogram-background-rect{}_{}.csv", rect.file_tag(), frames),
            Dataset::HistogramFramesRect(rect) =>
                format!("histogram-frames-rect{}_{}.csv", rect.file_tag(), frames),
            Dataset::MostCommonColourRect(rect) =>
                format!("most-common-colour{}_{}.csv", rect.file_tag(), frames),
            Dataset::HistogramFramesLightCalibrated(rect, method) =>
                format!("histogram-frames_light-calibrated-most-common-colour{}_{}_{}.csv",
                        rect.file_tag(), method.tag(), frames),
            Dataset::PixelCountDifferenceRaw =>
                format!("{}_raw.csv", features),
            Dataset::PixelCountDifferenceHistogramEqualization =>
                format!("{}_histogram-equalization.csv", features),
            Dataset::PixelCountDifferenceLightCalibrated(rect, method) =>
                format!("{}_light-calibration-most-common-colour{}_{}.csv",
                        features, rect.file_tag(), method.tag()),
        };
        self.frame_store.folder().join(name)
    }
}

/// Converts a threshold percentage into an absolute intensity level,
/// `round(256 * threshold / 100)`.
pub fn same_colour_level(same_colour_threshold: u32) -> Result<u32> {
    if same_colour_threshold > 100 {
        return Err(AnalysisError::Configuration(format!(
            "same colour threshold {} is not a percentage", same_colour_threshold)));
    }
    Ok((NUMBER_COLOUR_LEVELS as u32 * same_colour_threshold + 50) / 100)
}

// mod tests.
