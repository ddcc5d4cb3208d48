// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::GrayImage;
use log::info;

use crate::cache::{load_or_compute, load_or_compute_single, FrameSeries};
use crate::error::{AnalysisError, Result};
use crate::histogram::Histogram;
use crate::light_calibration::LightCalibrator;
use crate::parameters::{AnalysisRect, Dataset, Parameters};

/// Loads or computes the histogram datasets of a run. Every dataset is
/// memoized in the run folder under [Parameters::cache_filename()].
pub struct HistogramCache<'a> {
    parameters: &'a Parameters,
}

impl<'a> HistogramCache<'a> {
    pub fn new(parameters: &'a Parameters) -> HistogramCache<'a> {
        HistogramCache{parameters}
    }

    pub fn background(&self, background: &GrayImage) -> Result<Histogram> {
        info!("Computing histogram of background image");
        let path = self.parameters.cache_filename(Dataset::HistogramBackground);
        load_or_compute_single(&path, (), || Ok(Histogram::compute(background)))
    }

    pub fn background_rect(&self, background: &GrayImage, rect: &AnalysisRect)
                           -> Result<Histogram> {
        info!("Computing histogram of rectangle {} in background image", rect);
        let path = self.parameters.cache_filename(Dataset::HistogramBackgroundRect(*rect));
        load_or_compute_single(&path, (), || Ok(Histogram::compute_rect(background, rect)))
    }

    pub fn frames_all(&self) -> Result<FrameSeries<Histogram>> {
        info!("Computing histogram of entire video frames");
        let store = self.parameters.frame_store();
        let path = self.parameters.cache_filename(Dataset::HistogramFramesAll);
        load_or_compute(&path, self.parameters.number_frames(), (),
                        |index| Ok(Histogram::compute(&store.read(index)?)))
    }

    pub fn frames_rect(&self, rect: &AnalysisRect) -> Result<FrameSeries<Histogram>> {
        info!("Computing histogram of rectangle {} in all video frames", rect);
        let store = self.parameters.frame_store();
        let path = self.parameters.cache_filename(Dataset::HistogramFramesRect(*rect));
        load_or_compute(&path, self.parameters.number_frames(), (),
                        |index| Ok(Histogram::compute_rect(&store.read(index)?, rect)))
    }

    /// The mode of each frame's rectangle histogram.
    pub fn most_common_colour_rect(&self, rect: &AnalysisRect,
                                   frames_rect: &FrameSeries<Histogram>)
                                   -> Result<FrameSeries<u8>> {
        info!("Computing most common colour of rectangle {} in all video frames", rect);
        let path = self.parameters.cache_filename(Dataset::MostCommonColourRect(*rect));
        load_or_compute(&path, self.parameters.number_frames(), (), |index| {
            match frames_rect.get(index) {
                Some(histogram) => Ok(histogram.mode()),
                None => Err(AnalysisError::Configuration(format!(
                    "no rectangle histogram for frame {}", index))),
            }
        })
    }

    /// Whole-frame histograms after light calibration.
    pub fn frames_light_calibrated(&self, rect: &AnalysisRect,
                                   calibrator: &LightCalibrator)
                                   -> Result<FrameSeries<Histogram>> {
        info!("Computing histogram of light calibrated ({}) video frames",
              calibrator.method());
        let store = self.parameters.frame_store();
        let path = self.parameters.cache_filename(
            Dataset::HistogramFramesLightCalibrated(*rect, calibrator.method()));
        load_or_compute(&path, self.parameters.number_frames(), (), |index| {
            let calibrated = calibrator.calibrate_frame(index, &store.read(index)?)?;
            Ok(Histogram::compute(&calibrated))
        })
    }
}

// mod tests.
