// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;
use env_logger;
use log::{error, info};

use bee_features::error::{AnalysisError, Result};
use bee_features::experiment::{Experiment, FeatureVariant};
use bee_features::parameters::Parameters;

/// Computes (or loads from the run folder's cache) the bee activity
/// features of a recorded run.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Folder holding the frames, the background and the ROI masks.
    #[arg(short, long)]
    folder: String,

    /// Extension of the frame and background images.
    #[arg(long, default_value_t = String::from("jpg"))]
    frame_file_type: String,

    /// Extension of the mask images. Defaults to the frame extension.
    #[arg(long)]
    mask_file_type: Option<String>,

    /// Number of regions of interest, each with a Mask-<n> image.
    #[arg(short, long, default_value_t = 3)]
    number_rois: u32,

    /// Frame distance used for the bee speed feature.
    #[arg(short, long, default_value_t = 2)]
    delta_frame: u32,

    /// Percentage of the intensity range at or above which two pixels
    /// differ.
    #[arg(short, long, default_value_t = 15)]
    same_colour_threshold: u32,

    /// Light calibration reference rectangle as x1,y1,x2,y2.
    #[arg(short, long, value_delimiter = ',')]
    rect: Vec<u32>,

    /// Same colour threshold to switch to once the initial features are
    /// ready.
    #[arg(long)]
    new_same_colour_threshold: Option<u32>,

    /// Print every available feature set as CSV on stdout.
    #[arg(short, long, default_value_t = false)]
    print: std::primitive::bool,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let start = Instant::now();
    let parameters = Parameters::new(&args.folder, &args.frame_file_type,
                                     args.mask_file_type.as_deref(),
                                     args.number_rois, args.delta_frame,
                                     args.same_colour_threshold)?;
    let mut experiment = Experiment::new(parameters)?;
    experiment.load_histogram_equalization()?;
    match args.rect.as_slice() {
        [] => (),
        &[x1, y1, x2, y2] => experiment.set_rect_data(x1, y1, x2, y2)?,
        other => return Err(AnalysisError::Configuration(format!(
            "--rect takes 4 values, got {}", other.len()))),
    }
    if let Some(threshold) = args.new_same_colour_threshold {
        experiment.set_same_colour_threshold(threshold)?;
    }
    info!("Features ready in {:?}", start.elapsed());

    if args.print {
        print_features(&experiment).map_err(
            |source| AnalysisError::Io{path: PathBuf::from("<stdout>"), source})?;
    }
    Ok(())
}

fn print_features(experiment: &Experiment) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for variant in FeatureVariant::ALL {
        if let Some(features) = experiment.pixel_count_difference(variant) {
            writeln!(out, "# {}", variant)?;
            features.write_csv(&mut out)?;
        }
    }
    out.flush()
}
