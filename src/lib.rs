// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! BeeFeatures extracts per-frame activity features from a video of bees
//! walking in an arena. The video is given as a folder of numbered still
//! frames plus a background image (the empty arena) and one mask image per
//! region of interest (ROI).
//!
//! For every frame and every ROI two features are produced:
//!
//! * Number of bees: the count of masked pixels whose difference to the
//!   background reaches the same colour level.
//! * Bee speed: the count of masked pixels whose difference to the frame
//!   `delta_frame` positions earlier reaches the same colour level. Not
//!   available for the first `delta_frame` frames.
//!
//! Features are computed for four preprocessing variants: raw frames,
//! histogram equalised frames, and frames light calibrated with either of
//! two methods against a user chosen reference rectangle. See
//! [light_calibration] for the calibration model.
//!
//! # Caching
//!
//! Runs are long, so every derived dataset (histograms, most common colours,
//! features) is written next to the frames the first time it is computed and
//! loaded from there afterwards. A cache file is only ever complete: it is
//! written under a temporary name and renamed when the last record is in.
//! See [cache] for the file format.
//!
//! # Entry point
//!
//! [experiment::Experiment] owns a run. Construct [parameters::Parameters]
//! for the run folder, then call [experiment::Experiment::new()]; the raw
//! features are available immediately. The light calibrated variants become
//! available after [experiment::Experiment::set_rect_data()].

pub mod cache;
pub mod difference;
pub mod error;
pub mod experiment;
pub mod features;
pub mod frame_store;
pub mod histogram;
pub mod histogram_cache;
pub mod image_funcs;
pub mod light_calibration;
pub mod parameters;

pub use crate::error::{AnalysisError, Result};
pub use crate::experiment::{Experiment, FeatureVariant};
pub use crate::parameters::{AnalysisRect, Parameters};
