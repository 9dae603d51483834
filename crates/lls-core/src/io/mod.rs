//! Image readers.

pub mod npy;
pub mod tiff;

use std::path::Path;
use std::sync::Arc;

use crate::error::LatticeError;
use crate::image::{LabeledArray, LatticeImage};

pub use self::tiff::{HyperstackLayout, TiffStack};

/// Open an image file as a normalized [`LatticeImage`].
///
/// TIFF stacks are read lazily, one volume at a time; `.npy` arrays are
/// loaded up front and labeled with the trailing axes of `TCZYX`.
///
/// # Errors
///
/// Returns [`LatticeError::Configuration`] for unknown extensions or
/// arrays of the wrong rank, and propagates reader errors.
pub fn read_image(path: &Path) -> Result<LatticeImage, LatticeError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "tif" | "tiff" => Ok(LatticeImage::from_source(Arc::new(TiffStack::open(path)?))),
        "npy" => {
            let data = npy::read_npy_f32(path)?;
            LabeledArray::from_unlabeled(data)
                .and_then(LatticeImage::from_labeled)
                .map_err(LatticeError::Configuration)
        }
        other => Err(LatticeError::Configuration(format!(
            "unsupported image format `.{other}` for {}",
            path.display()
        ))),
    }
}
