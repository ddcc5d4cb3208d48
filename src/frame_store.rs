// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageReader};
use log::debug;

use crate::error::{AnalysisError, Result};

/// Locates the frames, background and ROI masks of a run folder on disk and
/// decodes them as 8-bit grayscale images.
///
/// Frames are numbered from 1 and named `frames-NNNN.<ext>`; the background
/// is `background.<ext>`; the mask of ROI `r` (0-based) is
/// `Mask-<r+1>.<mask ext>`.
#[derive(Clone, Debug)]
pub struct FrameStore {
    folder: PathBuf,
    frame_file_type: String,
    mask_file_type: String,

    // When set, every decoded frame and mask must have these dimensions.
    frame_size: Option<(u32, u32)>,
}

impl FrameStore {
    pub fn new(folder: impl Into<PathBuf>, frame_file_type: &str,
               mask_file_type: &str) -> FrameStore {
        FrameStore{folder: folder.into(),
                   frame_file_type: frame_file_type.to_string(),
                   mask_file_type: mask_file_type.to_string(),
                   frame_size: None}
    }

    /// Returns a copy of this store that rejects frames and masks whose
    /// dimensions differ from `frame_size` (width, height).
    pub fn with_frame_size(&self, frame_size: (u32, u32)) -> FrameStore {
        FrameStore{frame_size: Some(frame_size), ..self.clone()}
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn frame_file_type(&self) -> &str {
        &self.frame_file_type
    }

    pub fn mask_file_type(&self) -> &str {
        &self.mask_file_type
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.folder.join(format!("frames-{:04}.{}", index, self.frame_file_type))
    }

    pub fn background_path(&self) -> PathBuf {
        self.folder.join(format!("background.{}", self.frame_file_type))
    }

    pub fn mask_path(&self, roi: u32) -> PathBuf {
        self.folder.join(format!("Mask-{}.{}", roi + 1, self.mask_file_type))
    }

    fn frame_exists(&self, index: u32) -> bool {
        self.frame_path(index).is_file()
    }

    /// Returns the number of frames in the contiguous run `1..=N` present on
    /// disk, or 0 if frame 1 is absent. Uses O(log N) existence checks: the
    /// candidate index is doubled until a missing frame is hit, then the
    /// boundary is located by binary search within that bracket.
    pub fn frame_count(&self) -> u32 {
        if !self.frame_exists(1) {
            return 0;
        }
        let mut present = 1_u32;
        let mut absent = 2_u32;
        while self.frame_exists(absent) {
            present = absent;
            absent = absent.saturating_mul(2);
        }
        // Invariant: `present` exists, `absent` does not.
        while absent - present > 1 {
            let mid = present + (absent - present) / 2;
            if self.frame_exists(mid) {
                present = mid;
            } else {
                absent = mid;
            }
        }
        debug!("Found {} frames in {:?}", present, self.folder);
        present
    }

    pub fn read(&self, index: u32) -> Result<GrayImage> {
        self.read_checked(&self.frame_path(index))
    }

    pub fn read_background(&self) -> Result<GrayImage> {
        self.read_checked(&self.background_path())
    }

    /// Reads the mask of ROI `roi` (0-based). Non-zero pixels become 255 so
    /// that a bitwise AND with a difference image keeps exactly the masked
    /// pixels.
    pub fn read_mask(&self, roi: u32) -> Result<GrayImage> {
        let mut mask = self.read_checked(&self.mask_path(roi))?;
        for pixel in mask.iter_mut() {
            if *pixel != 0 {
                *pixel = 255;
            }
        }
        Ok(mask)
    }

    fn read_checked(&self, path: &Path) -> Result<GrayImage> {
        let image = read_gray_image(path)?;
        if let Some(expected) = self.frame_size {
            if image.dimensions() != expected {
                return Err(AnalysisError::FrameSizeMismatch{
                    path: path.to_path_buf(), expected, actual: image.dimensions()});
            }
        }
        Ok(image)
    }
}

/// Decodes `path` as a single channel 8-bit image.
pub fn read_gray_image(path: &Path) -> Result<GrayImage> {
    if !path.is_file() {
        return Err(AnalysisError::MissingFile{path: path.to_path_buf()});
    }
    let reader = ImageReader::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let image = reader.decode().map_err(|source| AnalysisError::ImageDecode{
        path: path.to_path_buf(), source})?;
    Ok(image.into_luma8())
}

// mod tests.
