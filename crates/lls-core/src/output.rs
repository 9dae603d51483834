//! Where and how results are written.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{FieldError, LatticeError};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFileType {
    /// One multi-page TIFF per slice.
    #[default]
    Tiff,
    /// One BigDataViewer HDF5 file plus its XML description.
    H5,
}

impl SaveFileType {
    /// File extension without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Tiff => "tif",
            Self::H5 => "h5",
        }
    }
}

impl fmt::Display for SaveFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tiff => "tiff",
            Self::H5 => "h5",
        })
    }
}

impl FromStr for SaveFileType {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiff" | "tif" => Ok(Self::Tiff),
            "h5" | "bdv" => Ok(Self::H5),
            other => Err(LatticeError::Configuration(format!(
                "unknown save type `{other}`, expected tiff or h5"
            ))),
        }
    }
}

/// A half-open index range where either bound may be left open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "(Option<usize>, Option<usize>)")]
pub struct RangeInput {
    /// First index; defaults to 0.
    pub start: Option<usize>,
    /// One past the last index; defaults to the axis length.
    pub stop: Option<usize>,
}

impl From<(Option<usize>, Option<usize>)> for RangeInput {
    fn from((start, stop): (Option<usize>, Option<usize>)) -> Self {
        Self { start, stop }
    }
}

impl From<Range<usize>> for RangeInput {
    fn from(range: Range<usize>) -> Self {
        Self {
            start: Some(range.start),
            stop: Some(range.end),
        }
    }
}

/// Fill open bounds from `len` and check the range fits inside `0..len`.
///
/// A range is accepted when it is non-empty and its stop does not exceed
/// the axis length; that single check covers both "is a subset of the
/// axis" and "is within bounds".
pub(crate) fn resolve_range(
    field: &str,
    input: Option<RangeInput>,
    len: usize,
    errors: &mut Vec<FieldError>,
) -> Range<usize> {
    let input = input.unwrap_or_default();
    let range = input.start.unwrap_or(0)..input.stop.unwrap_or(len);
    if range.end > len {
        errors.push(FieldError::new(
            field,
            format!(
                "range {}..{} exceeds the axis length {len}",
                range.start, range.end
            ),
        ));
    } else if range.start >= range.end {
        errors.push(FieldError::new(
            field,
            format!(
                "range {}..{} is empty or inverted",
                range.start, range.end
            ),
        ));
    }
    range
}

/// Resolved output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub(crate) save_dir: PathBuf,
    pub(crate) save_name: String,
    pub(crate) save_type: SaveFileType,
    pub(crate) time_range: Range<usize>,
    pub(crate) channel_range: Range<usize>,
}

impl OutputConfig {
    /// Name prefix used when nothing better is known.
    pub const DEFAULT_SAVE_NAME: &'static str = "deskewed";

    /// Directory results go into.
    #[must_use]
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// File name prefix.
    #[must_use]
    pub fn save_name(&self) -> &str {
        &self.save_name
    }

    /// File format.
    #[must_use]
    pub const fn save_type(&self) -> SaveFileType {
        self.save_type
    }

    /// Timepoints to export.
    #[must_use]
    pub fn time_range(&self) -> Range<usize> {
        self.time_range.clone()
    }

    /// Channels to export.
    #[must_use]
    pub fn channel_range(&self) -> Range<usize> {
        self.channel_range.clone()
    }
}

/// Reject a save directory that exists but is something else.
pub(crate) fn check_save_dir(dir: &Path, errors: &mut Vec<FieldError>) {
    if dir.exists() && !dir.is_dir() {
        errors.push(FieldError::new(
            "save_dir",
            format!("{} exists and is not a directory", dir.display()),
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unset_range_covers_the_axis() {
        let mut errors = Vec::new();
        assert_eq!(resolve_range("time_range", None, 5, &mut errors), 0..5);
        assert!(errors.is_empty());
    }

    #[test]
    fn open_bounds_are_filled() {
        let mut errors = Vec::new();
        let start_only = RangeInput::from((Some(2), None));
        let stop_only = RangeInput::from((None, Some(3)));
        assert_eq!(resolve_range("t", Some(start_only), 5, &mut errors), 2..5);
        assert_eq!(resolve_range("t", Some(stop_only), 5, &mut errors), 0..3);
        assert!(errors.is_empty());
    }

    #[test]
    fn full_extent_is_valid() {
        let mut errors = Vec::new();
        resolve_range("channel_range", Some((0..3).into()), 3, &mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn stop_past_axis_is_reported() {
        let mut errors = Vec::new();
        resolve_range("channel_range", Some((0..4).into()), 3, &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "channel_range");
    }

    #[test]
    fn inverted_range_is_reported_once() {
        let mut errors = Vec::new();
        resolve_range("time_range", Some((3..1).into()), 5, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("inverted"));
    }

    #[test]
    fn range_deserializes_from_nullable_pair() {
        let r: RangeInput = serde_json::from_str("[1, null]").unwrap();
        assert_eq!(r, RangeInput { start: Some(1), stop: None });
    }

    #[test]
    fn save_type_parsing() {
        assert_eq!("TIFF".parse::<SaveFileType>().unwrap(), SaveFileType::Tiff);
        assert_eq!("h5".parse::<SaveFileType>().unwrap(), SaveFileType::H5);
        assert!(matches!(
            "zarr".parse::<SaveFileType>(),
            Err(LatticeError::Configuration(_))
        ));
        let t: SaveFileType = serde_json::from_str(r#""h5""#).unwrap();
        assert_eq!(t, SaveFileType::H5);
    }

    #[test]
    fn file_as_save_dir_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut errors = Vec::new();
        check_save_dir(file.path(), &mut errors);
        assert_eq!(errors.len(), 1);
        check_save_dir(file.path().parent().unwrap(), &mut errors);
        assert_eq!(errors.len(), 1);
    }
}
