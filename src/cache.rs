// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Disk memoization of per-frame datasets.
//!
//! Every derived dataset is stored as a text file with one record per frame,
//! in increasing frame order; the frame index is implicit from the line
//! number. The file name encodes every parameter the dataset depends on, so a
//! file that exists is always valid for the current configuration and is
//! served as-is. Otherwise the dataset is computed frame by frame, each record
//! being appended to `<name>.partial` as soon as it is known; the partial file
//! is renamed to `<name>` only once every frame has been processed.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{AnalysisError, Result};

/// Values indexed by 1-based frame number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSeries<T> {
    values: Vec<T>,
}

impl<T> FrameSeries<T> {
    /// `values[0]` belongs to frame 1.
    pub fn from_values(values: Vec<T>) -> FrameSeries<T> {
        FrameSeries{values}
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value for frame `index` (1-based).
    pub fn get(&self, index: u32) -> Option<&T> {
        if index == 0 {
            return None;
        }
        self.values.get(index as usize - 1)
    }

    /// Yields `(frame index, value)` in increasing frame order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.values.iter().enumerate().map(|(i, v)| (i as u32 + 1, v))
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// The frame indices `1..=number_frames`, e.g. as the x axis of a plot.
pub fn frame_indices(number_frames: u32) -> RangeInclusive<u32> {
    1..=number_frames
}

/// Why a single record could not be parsed.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field_index: usize,
    pub reason: String,
}

/// A value that is stored as one line of comma separated fields.
pub trait Record: Sized {
    /// Context needed to parse a record, such as the number of ROIs.
    type Layout: Copy;

    /// Writes the record without its line terminator.
    fn write_record(&self, out: &mut dyn Write) -> io::Result<()>;

    fn parse_record(line: &str, layout: Self::Layout)
                    -> std::result::Result<Self, FieldError>;
}

/// Splits `line` into exactly `expected` comma separated values.
pub fn parse_fields<T: FromStr>(line: &str, expected: usize)
                                -> std::result::Result<Vec<T>, FieldError> {
    let mut values = Vec::with_capacity(expected);
    for (field_index, field) in line.split(',').enumerate() {
        if field_index >= expected {
            return Err(FieldError{
                field_index,
                reason: format!("more than {} fields", expected)});
        }
        match field.trim().parse::<T>() {
            Ok(value) => values.push(value),
            Err(_) => return Err(FieldError{
                field_index,
                reason: format!("cannot parse {:?}", field)}),
        }
    }
    if values.len() < expected {
        return Err(FieldError{
            field_index: values.len(),
            reason: format!("record has {} fields, expected {}",
                            values.len(), expected)});
    }
    Ok(values)
}

/// Scalar per-frame series such as the most common colour of each frame.
impl Record for u8 {
    type Layout = ();

    fn write_record(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", self)
    }

    fn parse_record(line: &str, _layout: ()) -> std::result::Result<u8, FieldError> {
        Ok(parse_fields::<u8>(line, 1)?[0])
    }
}

/// Returns the dataset stored at `path` if that file exists, otherwise calls
/// `compute` for every frame `1..=number_frames`, persists the records and
/// returns them.
///
/// A failure of `compute` aborts the whole computation; no file is left at
/// `path` and previously cached datasets are untouched. A short or malformed
/// file fails with [AnalysisError::Parse].
pub fn load_or_compute<R, F>(path: &Path, number_frames: u32, layout: R::Layout,
                             compute: F) -> Result<FrameSeries<R>>
where
    R: Record,
    F: FnMut(u32) -> Result<R>,
{
    if path.is_file() {
        info!("  reading data from file {:?}", path);
        return load(path, number_frames, layout);
    }
    info!("  computing {} frames into {:?}", number_frames, path);
    let start = Instant::now();
    let partial = partial_path(path);
    match compute_and_write(&partial, number_frames, compute) {
        Ok(values) => {
            fs::rename(&partial, path).map_err(|e| AnalysisError::io(path, e))?;
            info!("  done in {:?}", start.elapsed());
            Ok(FrameSeries::from_values(values))
        },
        Err(e) => {
            if partial.exists() {
                if let Err(remove_err) = fs::remove_file(&partial) {
                    warn!("Could not remove {:?}: {}", partial, remove_err);
                }
            }
            Err(e)
        },
    }
}

/// [load_or_compute()] for a dataset made of a single record.
pub fn load_or_compute_single<R, F>(path: &Path, layout: R::Layout, mut compute: F)
                                    -> Result<R>
where
    R: Record,
    F: FnMut() -> Result<R>,
{
    let series = load_or_compute(path, 1, layout, |_| compute())?;
    series.into_values().pop().ok_or_else(|| AnalysisError::Parse{
        path: path.to_path_buf(), frame_index: 1, field_index: 0,
        reason: "empty dataset".to_string()})
}

/// Reads exactly `number_frames` records from `path`.
pub fn load<R: Record>(path: &Path, number_frames: u32, layout: R::Layout)
                       -> Result<FrameSeries<R>> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();
    let mut values = Vec::with_capacity(number_frames as usize);
    for frame_index in 1..=number_frames {
        let line = match lines.next() {
            Some(line) => line.map_err(|e| AnalysisError::io(path, e))?,
            None => return Err(AnalysisError::Parse{
                path: path.to_path_buf(), frame_index, field_index: 0,
                reason: "file ends before this record".to_string()}),
        };
        let record = R::parse_record(line.trim_end(), layout).map_err(
            |e| AnalysisError::Parse{path: path.to_path_buf(), frame_index,
                                     field_index: e.field_index, reason: e.reason})?;
        values.push(record);
    }
    for line in lines {
        let line = line.map_err(|e| AnalysisError::io(path, e))?;
        if !line.trim().is_empty() {
            return Err(AnalysisError::Parse{
                path: path.to_path_buf(), frame_index: number_frames + 1,
                field_index: 0,
                reason: "record past the last frame".to_string()});
        }
    }
    Ok(FrameSeries::from_values(values))
}

fn compute_and_write<R, F>(partial: &Path, number_frames: u32, mut compute: F)
                           -> Result<Vec<R>>
where
    R: Record,
    F: FnMut(u32) -> Result<R>,
{
    let file = File::create(partial).map_err(|e| AnalysisError::io(partial, e))?;
    let mut out = BufWriter::new(file);
    let mut values = Vec::with_capacity(number_frames as usize);
    for frame_index in 1..=number_frames {
        let record = compute(frame_index)?;
        record.write_record(&mut out)
            .and_then(|_| writeln!(out))
            .map_err(|e| AnalysisError::io(partial, e))?;
        values.push(record);
        debug!("    frame {}", frame_index);
    }
    out.flush().map_err(|e| AnalysisError::io(partial, e))?;
    Ok(values)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_frame_series_is_one_based() {
        let series = FrameSeries::from_values(vec![10_u8, 20, 30]);
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0), None);
        assert_eq!(series.get(1), Some(&10));
        assert_eq!(series.get(3), Some(&30));
        assert_eq!(series.get(4), None);
        let pairs: Vec<(u32, u8)> = series.iter().map(|(i, v)| (i, *v)).collect();
        assert_eq!(pairs, vec![(1, 10), (2, 20), (3, 30)]);
        assert_eq!(frame_indices(3).collect::<Vec<u32>>(), vec![1, 2, 3]);
        assert_eq!(frame_indices(0).count(), 0);
    }

    #[test]
    fn test_parse_fields() {
        assert_eq!(parse_fields::<i64>("1,-1,3", 3), Ok(vec![1, -1, 3]));
        assert_eq!(parse_fields::<i64>("1,-1", 3).unwrap_err().field_index, 2);
        assert_eq!(parse_fields::<i64>("1,x,3", 3).unwrap_err().field_index, 1);
        assert_eq!(parse_fields::<i64>("1,2,3,4", 3).unwrap_err().field_index, 3);
        assert_eq!(parse_fields::<i64>("", 1).unwrap_err().field_index, 0);
    }

    #[test]
    fn test_load_or_compute_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levels.csv");
        let calls = Cell::new(0);
        let compute = |index: u32| {
            calls.set(calls.get() + 1);
            Ok(index as u8 * 3)
        };
        let computed = load_or_compute::<u8, _>(&path, 4, (), compute).unwrap();
        assert_eq!(calls.get(), 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "3\n6\n9\n12\n");

        let loaded = load_or_compute::<u8, _>(&path, 4, (), compute).unwrap();
        assert_eq!(calls.get(), 4);
        assert_eq!(computed, loaded);
    }

    #[test]
    fn test_failed_computation_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levels.csv");
        let result = load_or_compute::<u8, _>(&path, 5, (), |index| {
            if index == 3 {
                Err(AnalysisError::MissingFile{path: PathBuf::from("frames-0003.png")})
            } else {
                Ok(1)
            }
        });
        assert!(matches!(result, Err(AnalysisError::MissingFile{..})));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_load_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levels.csv");
        fs::write(&path, "1\n2\n").unwrap();
        match load::<u8>(&path, 3, ()) {
            Err(AnalysisError::Parse{path: p, frame_index, field_index, ..}) => {
                assert_eq!(p, path);
                assert_eq!(frame_index, 3);
                assert_eq!(field_index, 0);
            },
            other => panic!("Expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_load_malformed_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levels.csv");
        fs::write(&path, "1\n300\n3\n").unwrap();
        match load::<u8>(&path, 3, ()) {
            Err(AnalysisError::Parse{frame_index, field_index, ..}) => {
                assert_eq!(frame_index, 2);
                assert_eq!(field_index, 0);
            },
            other => panic!("Expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_extra_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levels.csv");
        fs::write(&path, "1\n2\n\n").unwrap();
        assert_eq!(load::<u8>(&path, 2, ()).unwrap().values(), &[1, 2]);
        fs::write(&path, "1\n2\n3\n").unwrap();
        assert!(matches!(load::<u8>(&path, 2, ()),
                         Err(AnalysisError::Parse{frame_index: 3, ..})));
    }

    #[test]
    fn test_load_or_compute_single() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.csv");
        assert_eq!(load_or_compute_single::<u8, _>(&path, (), || Ok(42)).unwrap(), 42);
        assert_eq!(load_or_compute_single::<u8, _>(&path, (), || Ok(0)).unwrap(), 42);
    }
}  // mod tests.
