//! Output writers.
//!
//! [`ImageWriterKind`] picks the image writer for a [`SaveFileType`];
//! tabular workflow output always goes through [`table::TableWriter`].

pub mod bdv;
pub mod table;
pub mod tiff;

use std::path::PathBuf;

use ndarray::Array3;

use crate::error::LatticeError;
use crate::output::SaveFileType;
use crate::results::ProcessedSlice;

pub use self::bdv::BdvWriter;
pub use self::table::TableWriter;
pub use self::tiff::TiffWriter;

/// Where a writer puts its files and how it labels them.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterSettings {
    /// Output directory.
    pub save_dir: PathBuf,
    /// File name prefix.
    pub save_name: String,
    /// `(x, y, z)` voxel size of the written data in microns.
    pub voxel_size: [f64; 3],
}

/// Persists processed image slices.
pub trait ImageWriter {
    /// Write (or stage) one slice.
    ///
    /// # Errors
    ///
    /// Propagates encoder and filesystem failures.
    fn write_slice(&mut self, slice: &ProcessedSlice<Array3<f32>>) -> Result<(), LatticeError>;

    /// Flush anything staged and return every path written.
    ///
    /// # Errors
    ///
    /// Propagates encoder and filesystem failures.
    fn finish(&mut self) -> Result<Vec<PathBuf>, LatticeError>;
}

/// File name stem for one slice: `{name}[_ROI{r}]_C{c}T{t}`.
pub(crate) fn slice_stem<T>(save_name: &str, slice: &ProcessedSlice<T>) -> String {
    match slice.roi_index {
        Some(roi) => format!("{save_name}_ROI{roi}_C{}T{}", slice.channel, slice.time),
        None => format!("{save_name}_C{}T{}", slice.channel, slice.time),
    }
}

/// Selects which image writer to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageWriterKind {
    /// [`TiffWriter`].
    #[default]
    Tiff,
    /// [`BdvWriter`].
    Bdv,
}

impl From<SaveFileType> for ImageWriterKind {
    fn from(save_type: SaveFileType) -> Self {
        match save_type {
            SaveFileType::Tiff => Self::Tiff,
            SaveFileType::H5 => Self::Bdv,
        }
    }
}

impl ImageWriterKind {
    /// Create the output directory and the writer.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the writer is not
    /// available in this build.
    pub fn open(self, settings: WriterSettings) -> Result<Box<dyn ImageWriter>, LatticeError> {
        std::fs::create_dir_all(&settings.save_dir)?;
        Ok(match self {
            Self::Tiff => Box::new(TiffWriter::new(settings)),
            Self::Bdv => Box::new(BdvWriter::new(settings)?),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slice(roi_index: Option<usize>) -> ProcessedSlice<()> {
        ProcessedSlice {
            data: (),
            time_index: 0,
            time: 4,
            channel_index: 1,
            channel: 2,
            roi_index,
        }
    }

    #[test]
    fn stem_without_roi() {
        assert_eq!(slice_stem("cell", &slice(None)), "cell_C2T4");
    }

    #[test]
    fn stem_with_roi() {
        assert_eq!(slice_stem("cell", &slice(Some(3))), "cell_ROI3_C2T4");
    }

    #[test]
    fn kind_follows_save_type() {
        assert_eq!(ImageWriterKind::from(SaveFileType::Tiff), ImageWriterKind::Tiff);
        assert_eq!(ImageWriterKind::from(SaveFileType::H5), ImageWriterKind::Bdv);
    }

    #[test]
    fn open_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("nested").join("out");
        let writer = ImageWriterKind::Tiff.open(WriterSettings {
            save_dir: save_dir.clone(),
            save_name: "x".to_owned(),
            voxel_size: [1.0; 3],
        });
        assert!(writer.is_ok());
        assert!(save_dir.is_dir());
    }
}
