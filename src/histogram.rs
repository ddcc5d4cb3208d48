// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::{self, Write};

use image::{imageops, GrayImage};

use crate::cache::{parse_fields, FieldError, Record};
use crate::parameters::{AnalysisRect, NUMBER_COLOUR_LEVELS};

/// Count of pixels at each of the 256 intensity levels of an 8-bit image
/// region. The counts always sum to the pixel count of the region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    counts: [u32; NUMBER_COLOUR_LEVELS],
}

impl Default for Histogram {
    fn default() -> Self {
        Histogram{counts: [0; NUMBER_COLOUR_LEVELS]}
    }
}

impl Histogram {
    pub fn from_counts(counts: [u32; NUMBER_COLOUR_LEVELS]) -> Histogram {
        Histogram{counts}
    }

    pub fn compute(image: &GrayImage) -> Histogram {
        let mut counts = [0_u32; NUMBER_COLOUR_LEVELS];
        for &pixel in image.as_raw() {
            counts[pixel as usize] += 1;
        }
        Histogram{counts}
    }

    /// Histogram of the part of `image` inside `rect`. The rectangle is
    /// cropped out first; it is clipped to the image bounds.
    pub fn compute_rect(image: &GrayImage, rect: &AnalysisRect) -> Histogram {
        let cropped = imageops::crop_imm(
            image, rect.x1, rect.y1, rect.width(), rect.height()).to_image();
        Histogram::compute(&cropped)
    }

    pub fn counts(&self) -> &[u32; NUMBER_COLOUR_LEVELS] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// The most common intensity level. Ties go to the lowest level; an
    /// empty histogram has mode 0.
    pub fn mode(&self) -> u8 {
        let mut mode = 0;
        for level in 1..NUMBER_COLOUR_LEVELS {
            if self.counts[level] > self.counts[mode] {
                mode = level;
            }
        }
        mode as u8
    }

    /// Number of pixels at or above `same_colour_level`. Applied to the
    /// histogram of an absolute difference image, this counts the pixels
    /// whose intensity changed by at least that level.
    pub fn number_different_pixels(&self, same_colour_level: u32) -> u32 {
        let start = (same_colour_level as usize).min(NUMBER_COLOUR_LEVELS);
        self.counts[start..].iter().sum()
    }
}

impl Record for Histogram {
    type Layout = ();

    fn write_record(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", self.counts[0])?;
        for count in &self.counts[1..] {
            write!(out, ",{}", count)?;
        }
        Ok(())
    }

    fn parse_record(line: &str, _layout: ())
                    -> std::result::Result<Histogram, FieldError> {
        let values = parse_fields::<u32>(line, NUMBER_COLOUR_LEVELS)?;
        let mut counts = [0_u32; NUMBER_COLOUR_LEVELS];
        counts.copy_from_slice(&values);
        Ok(Histogram{counts})
    }
}

// mod tests.
