// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::time::Instant;

use image::GrayImage;
use log::info;

use crate::cache::FrameSeries;
use crate::difference::{DifferenceEngine, Preprocessing};
use crate::error::{AnalysisError, Result};
use crate::features::{FeatureExtractor, PixelCountDifference};
use crate::histogram::Histogram;
use crate::histogram_cache::HistogramCache;
use crate::light_calibration::{calibrate_image, CalibrationMethod, LightCalibrator};
use crate::parameters::{AnalysisRect, Parameters};

/// The four preprocessing variants features are computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureVariant {
    Raw,
    HistogramEqualization,
    LightCalibrated(CalibrationMethod),
}

impl FeatureVariant {
    pub const ALL: [FeatureVariant; 4] = [
        FeatureVariant::Raw,
        FeatureVariant::HistogramEqualization,
        FeatureVariant::LightCalibrated(CalibrationMethod::Plsm),
        FeatureVariant::LightCalibrated(CalibrationMethod::Lc),
    ];
}

impl fmt::Display for FeatureVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureVariant::Raw => f.write_str("raw"),
            FeatureVariant::HistogramEqualization => f.write_str("histogram-equalization"),
            FeatureVariant::LightCalibrated(method) =>
                write!(f, "light-calibrated-{}", method),
        }
    }
}

// Datasets of one calibration method.
#[derive(Debug)]
struct CalibratedData {
    calibrator: LightCalibrator,
    histogram_frames: FrameSeries<Histogram>,
    pixel_count_difference: PixelCountDifference,
}

// Everything that depends on the analysis rectangle.
#[derive(Debug)]
struct RectData {
    rect: AnalysisRect,
    histogram_background_rect: Histogram,
    histogram_frames_rect: FrameSeries<Histogram>,
    highest_colour_level_frames_rect: FrameSeries<u8>,
    // In the order of CalibrationMethod::ALL.
    calibrated: Vec<CalibratedData>,
}

impl RectData {
    fn calibrated(&self, method: CalibrationMethod) -> Option<&CalibratedData> {
        self.calibrated.iter().find(|data| data.calibrator.method() == method)
    }
}

/// An analysis session over one run folder. Owns the background, the ROI
/// masks and every cached dataset.
///
/// The whole-frame histograms and the raw features are computed (or loaded)
/// at construction. The rectangle-dependent datasets become available after
/// the first successful [Experiment::set_rect_data()] and stay available for
/// the rest of the session. Mutators compute every new dataset before
/// replacing any current one: on error the experiment is left exactly as it
/// was.
#[derive(Debug)]
pub struct Experiment {
    parameters: Parameters,
    background: GrayImage,
    masks: Vec<GrayImage>,
    histogram_background: Histogram,
    histogram_frames_all: FrameSeries<Histogram>,
    pixel_count_difference_raw: PixelCountDifference,
    pixel_count_difference_histogram_equalization: Option<PixelCountDifference>,
    rect_data: Option<RectData>,
}

impl Experiment {
    pub fn new(parameters: Parameters) -> Result<Experiment> {
        let start = Instant::now();
        info!("Initialising experiment data");
        let store = parameters.frame_store();
        info!("  reading experiment background");
        let background = store.read_background()?;
        info!("  reading experiment masks");
        let masks = (0..parameters.number_rois())
            .map(|roi| store.read_mask(roi))
            .collect::<Result<Vec<GrayImage>>>()?;

        let cache = HistogramCache::new(&parameters);
        let histogram_background = cache.background(&background)?;
        let histogram_frames_all = cache.frames_all()?;
        let pixel_count_difference_raw =
            FeatureExtractor::new(&parameters, &background, &masks)?.raw()?;
        info!("Experiment ready in {:?}", start.elapsed());
        Ok(Experiment{parameters, background, masks,
                      histogram_background, histogram_frames_all,
                      pixel_count_difference_raw,
                      pixel_count_difference_histogram_equalization: None,
                      rect_data: None})
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn background(&self) -> &GrayImage {
        &self.background
    }

    /// One 0/255 mask per ROI.
    pub fn masks(&self) -> &[GrayImage] {
        &self.masks
    }

    pub fn histogram_background(&self) -> &Histogram {
        &self.histogram_background
    }

    pub fn histogram_frames_all(&self) -> &FrameSeries<Histogram> {
        &self.histogram_frames_all
    }

    /// The current analysis rectangle; `None` until one has been set.
    pub fn rect(&self) -> Option<AnalysisRect> {
        self.rect_data.as_ref().map(|data| data.rect)
    }

    pub fn histogram_frames_rect(&self) -> Option<&FrameSeries<Histogram>> {
        self.rect_data.as_ref().map(|data| &data.histogram_frames_rect)
    }

    pub fn histogram_background_rect(&self) -> Option<&Histogram> {
        self.rect_data.as_ref().map(|data| &data.histogram_background_rect)
    }

    /// Most common colour of each frame inside the analysis rectangle.
    pub fn highest_colour_level_frames_rect(&self) -> Option<&FrameSeries<u8>> {
        self.rect_data.as_ref().map(|data| &data.highest_colour_level_frames_rect)
    }

    pub fn light_calibrator(&self, method: CalibrationMethod) -> Option<&LightCalibrator> {
        Some(&self.rect_data.as_ref()?.calibrated(method)?.calibrator)
    }

    pub fn histogram_frames_light_calibrated(&self, method: CalibrationMethod)
                                             -> Option<&FrameSeries<Histogram>> {
        Some(&self.rect_data.as_ref()?.calibrated(method)?.histogram_frames)
    }

    /// The features of `variant`, if they have been computed. The light
    /// calibrated variants require a rectangle; the histogram equalisation
    /// variant requires [Experiment::load_histogram_equalization()] or a
    /// threshold change.
    pub fn pixel_count_difference(&self, variant: FeatureVariant)
                                  -> Option<&PixelCountDifference> {
        match variant {
            FeatureVariant::Raw => Some(&self.pixel_count_difference_raw),
            FeatureVariant::HistogramEqualization =>
                self.pixel_count_difference_histogram_equalization.as_ref(),
            FeatureVariant::LightCalibrated(method) =>
                Some(&self.rect_data.as_ref()?.calibrated(method)?.pixel_count_difference),
        }
    }

    /// Computes or loads the histogram equalisation features for the current
    /// threshold.
    pub fn load_histogram_equalization(&mut self) -> Result<&PixelCountDifference> {
        let features = match self.pixel_count_difference_histogram_equalization.take() {
            Some(features) => features,
            None => self.feature_extractor(&self.parameters)?.histogram_equalization()?,
        };
        Ok(self.pixel_count_difference_histogram_equalization.insert(features))
    }

    fn feature_extractor<'a>(&'a self, parameters: &'a Parameters)
                             -> Result<FeatureExtractor<'a>> {
        FeatureExtractor::new(parameters, &self.background, &self.masks)
    }

    /// Sets the light calibration reference rectangle `(x1,y1)-(x2,y2)` and
    /// recomputes, in order: the rectangle histograms, the most common colour
    /// of each frame in the rectangle, the light calibrated histograms and
    /// the light calibrated features (both methods each).
    pub fn set_rect_data(&mut self, x1: u32, y1: u32, x2: u32, y2: u32) -> Result<()> {
        let rect = AnalysisRect::new(x1, y1, x2, y2);
        rect.validate(self.parameters.frame_size())?;
        let start = Instant::now();
        info!("Setting analysis rectangle {}", rect);
        let cache = HistogramCache::new(&self.parameters);
        let histogram_frames_rect = cache.frames_rect(&rect)?;
        let histogram_background_rect = cache.background_rect(&self.background, &rect)?;
        let highest_colour_level_frames_rect =
            cache.most_common_colour_rect(&rect, &histogram_frames_rect)?;

        let background_mode = histogram_background_rect.mode();
        let mut calibrated_histograms = Vec::new();
        for method in CalibrationMethod::ALL {
            let calibrator = LightCalibrator::new(
                method, background_mode, highest_colour_level_frames_rect.clone());
            let histogram_frames = cache.frames_light_calibrated(&rect, &calibrator)?;
            calibrated_histograms.push((calibrator, histogram_frames));
        }
        let extractor = self.feature_extractor(&self.parameters)?;
        let mut calibrated = Vec::new();
        for (calibrator, histogram_frames) in calibrated_histograms {
            let pixel_count_difference = extractor.light_calibrated(&rect, &calibrator)?;
            calibrated.push(CalibratedData{calibrator, histogram_frames,
                                           pixel_count_difference});
        }

        self.rect_data = Some(RectData{rect, histogram_background_rect,
                                       histogram_frames_rect,
                                       highest_colour_level_frames_rect,
                                       calibrated});
        info!("Rectangle data ready in {:?}", start.elapsed());
        Ok(())
    }

    /// Changes the same colour threshold (a percentage) and recomputes the
    /// raw and histogram equalisation features, plus the light calibrated
    /// features when a rectangle is set.
    pub fn set_same_colour_threshold(&mut self, same_colour_threshold: u32) -> Result<()> {
        let parameters = self.parameters.with_same_colour_threshold(same_colour_threshold)?;
        let start = Instant::now();
        info!("Setting same colour threshold {} (level {})",
              same_colour_threshold, parameters.same_colour_level());
        let extractor = self.feature_extractor(&parameters)?;
        let raw = extractor.raw()?;
        let histogram_equalization = extractor.histogram_equalization()?;
        let mut calibrated = Vec::new();
        if let Some(rect_data) = &self.rect_data {
            for data in &rect_data.calibrated {
                calibrated.push(extractor.light_calibrated(&rect_data.rect, &data.calibrator)?);
            }
        }

        self.parameters = parameters;
        self.pixel_count_difference_raw = raw;
        self.pixel_count_difference_histogram_equalization = Some(histogram_equalization);
        if let Some(rect_data) = &mut self.rect_data {
            for (data, features) in rect_data.calibrated.iter_mut().zip(calibrated) {
                data.pixel_count_difference = features;
            }
        }
        info!("Features ready in {:?}", start.elapsed());
        Ok(())
    }

    fn preprocessing(&self, variant: FeatureVariant) -> Result<Preprocessing<'_>> {
        match variant {
            FeatureVariant::Raw => Ok(Preprocessing::Raw),
            FeatureVariant::HistogramEqualization => Ok(Preprocessing::HistogramEqualization),
            FeatureVariant::LightCalibrated(method) => match self.light_calibrator(method) {
                Some(calibrator) => Ok(Preprocessing::LightCalibrated(calibrator)),
                None => Err(AnalysisError::Configuration(format!(
                    "{} requires an analysis rectangle", variant))),
            },
        }
    }

    fn difference_engine(&self) -> DifferenceEngine<'_> {
        DifferenceEngine::new(&self.parameters, &self.background)
    }

    /// Difference between the preprocessed background and frame `index`.
    pub fn background_difference(&self, variant: FeatureVariant, index: u32)
                                 -> Result<GrayImage> {
        self.difference_engine().background_difference(self.preprocessing(variant)?, index)
    }

    /// Difference between frames `index - delta_frame` and `index`, `None`
    /// for the first `delta_frame` frames.
    pub fn temporal_difference(&self, variant: FeatureVariant, index: u32)
                               -> Result<Option<GrayImage>> {
        self.difference_engine().temporal_difference(self.preprocessing(variant)?, index)
    }

    pub fn threshold_mask(&self, index: u32) -> Result<GrayImage> {
        self.difference_engine().threshold_mask(index)
    }

    /// Frame `index` after light calibration with `method`.
    pub fn calibrated_frame(&self, method: CalibrationMethod, index: u32)
                            -> Result<GrayImage> {
        let calibrator = match self.light_calibrator(method) {
            Some(calibrator) => calibrator,
            None => return Err(AnalysisError::Configuration(
                "light calibration requires an analysis rectangle".to_string())),
        };
        let frame = self.parameters.frame_store().read(index)?;
        let pf = calibrator.frame_mode(index)?;
        Ok(calibrate_image(method, &frame, calibrator.background_mode(), pf))
    }
}

// mod tests.
