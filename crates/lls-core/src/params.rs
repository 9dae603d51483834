//! The flat, unvalidated parameter mapping that [`LatticeData`] is built
//! from.
//!
//! Every field is optional or defaulted so that configuration files and
//! command-line flags only need to mention what they change. In-memory
//! values (arrays, ROIs, workflow graphs) enter through the `From`
//! conversions on [`ImageInput`] and [`WorkflowInput`].
//!
//! [`LatticeData`]: crate::lattice::LatticeData

use std::path::{Path, PathBuf};

use ndarray::{Array3, Array5};
use serde::Deserialize;

use crate::affine::AffineTransform3D;
use crate::crop::CropParams;
use crate::deconvolution::DeconvolutionParams;
use crate::deskew::{DeskewConfig, DeskewDirection};
use crate::error::LatticeError;
use crate::image::{LabeledArray, LatticeImage, Volume};
use crate::output::{RangeInput, SaveFileType};
use crate::pixel::PixelSizes;
use crate::workflow::Workflow;

/// An image given as a file, a labeled array, or an already normalized
/// image.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "PathBuf")]
pub enum ImageInput {
    /// File to read with [`read_image`](crate::io::read_image).
    Path(PathBuf),
    /// In-memory array with named axes.
    Array(LabeledArray),
    /// Normalized image.
    Image(LatticeImage),
}

impl ImageInput {
    /// Normalize into a [`LatticeImage`], reading the file if needed.
    ///
    /// # Errors
    ///
    /// Propagates reader errors; a labeled array without `X`, `Y` and `Z`
    /// axes is a [`LatticeError::Configuration`].
    pub fn load(&self) -> Result<LatticeImage, LatticeError> {
        match self {
            Self::Path(path) => crate::io::read_image(path),
            Self::Array(array) => {
                LatticeImage::from_labeled(array.clone()).map_err(LatticeError::Configuration)
            }
            Self::Image(image) => Ok(image.clone()),
        }
    }

    /// The file path, if the image was given as one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Array(_) | Self::Image(_) => None,
        }
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<LabeledArray> for ImageInput {
    fn from(array: LabeledArray) -> Self {
        Self::Array(array)
    }
}

impl From<LatticeImage> for ImageInput {
    fn from(image: LatticeImage) -> Self {
        Self::Image(image)
    }
}

impl From<Array3<f32>> for ImageInput {
    fn from(volume: Array3<f32>) -> Self {
        Self::Image(LatticeImage::from_volume(Volume::Realized(volume)))
    }
}

impl From<Array5<f32>> for ImageInput {
    fn from(data: Array5<f32>) -> Self {
        Self::Image(LatticeImage::from_array5(data))
    }
}

/// A workflow given as a definition file or a built graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "PathBuf")]
pub enum WorkflowInput {
    /// JSON or YAML definition, resolved against the built-in functions.
    Path(PathBuf),
    /// Ready-made graph.
    Graph(Workflow),
}

impl From<PathBuf> for WorkflowInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Workflow> for WorkflowInput {
    fn from(workflow: Workflow) -> Self {
        Self::Graph(workflow)
    }
}

/// Unvalidated pipeline parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatticeParams {
    /// Raw lattice data. Required.
    pub input_image: Option<ImageInput>,
    /// Skew axis.
    pub skew: DeskewDirection,
    /// Light-sheet angle in degrees, strictly between 0 and 90.
    pub angle: f64,
    /// Voxel sizes in microns; checked by `LatticeData::new`.
    pub physical_pixel_sizes: PixelSizes,
    /// Override for the derived deskewed shape; requires
    /// `deskew_affine_transform` too.
    pub deskew_vol_shape: Option<[usize; 3]>,
    /// Override for the derived transform; requires `deskew_vol_shape` too.
    pub deskew_affine_transform: Option<AffineTransform3D>,
    /// Enables the crop path.
    pub crop: Option<CropParams>,
    /// Enables deconvolution.
    pub deconvolution: Option<DeconvolutionParams>,
    /// Post-processing graph fed with the deskewed slices.
    pub workflow: Option<WorkflowInput>,
    /// Timepoints to process; defaults to all.
    pub time_range: Option<RangeInput>,
    /// Channels to process; defaults to all.
    pub channel_range: Option<RangeInput>,
    /// Output directory; defaults to the input file's directory.
    pub save_dir: Option<PathBuf>,
    /// Output name prefix; defaults to the input file's stem.
    pub save_name: Option<String>,
    /// Output format.
    pub save_type: SaveFileType,
}

impl Default for LatticeParams {
    fn default() -> Self {
        Self {
            input_image: None,
            skew: DeskewDirection::default(),
            angle: DeskewConfig::DEFAULT_ANGLE,
            physical_pixel_sizes: PixelSizes::default(),
            deskew_vol_shape: None,
            deskew_affine_transform: None,
            crop: None,
            deconvolution: None,
            workflow: None,
            time_range: None,
            channel_range: None,
            save_dir: None,
            save_name: None,
            save_type: SaveFileType::default(),
        }
    }
}

impl LatticeParams {
    /// Defaults with `input_image` set.
    pub fn new(input_image: impl Into<ImageInput>) -> Self {
        Self {
            input_image: Some(input_image.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crop::RoiInput;
    use crate::deconvolution::{Background, DeconvolutionChoice};

    #[test]
    fn defaults() {
        let params = LatticeParams::default();
        assert!(params.input_image.is_none());
        assert_eq!(params.skew, DeskewDirection::Y);
        assert!((params.angle - 30.0).abs() < f64::EPSILON);
        assert_eq!(params.physical_pixel_sizes, PixelSizes::default());
        assert_eq!(params.save_type, SaveFileType::Tiff);
    }

    #[test]
    fn parses_a_yaml_config() {
        let yaml = r"
input_image: /data/cell.tif
skew: X
angle: 31.8
physical_pixel_sizes: [0.104, 0.104, 0.4]
crop:
  roi_list: [[[0, 0], [0, 10], [10, 10], [10, 0]]]
  z_range: [2, null]
deconvolution:
  decon_processing: cuda_gpu
  psf: [/data/psf.tif]
  background: second_last
time_range: [0, 2]
save_type: h5
";
        let params: LatticeParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            params.input_image.as_ref().and_then(ImageInput::path),
            Some(Path::new("/data/cell.tif"))
        );
        assert_eq!(params.skew, DeskewDirection::X);
        assert!((params.physical_pixel_sizes.z - 0.4).abs() < f64::EPSILON);

        let crop = params.crop.unwrap();
        assert!(matches!(crop.roi_list[0], RoiInput::Vertices(ref v) if v.len() == 4));
        assert_eq!(crop.z_range, Some((Some(2), None)));

        let decon = params.deconvolution.unwrap();
        assert_eq!(decon.decon_processing, DeconvolutionChoice::CudaGpu);
        assert_eq!(decon.background, Background::SecondLast);
        assert_eq!(decon.psf_num_iter, 10);
        assert_eq!(
            params.time_range,
            Some(RangeInput {
                start: Some(0),
                stop: Some(2)
            })
        );
        assert_eq!(params.save_type, SaveFileType::H5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<LatticeParams, _> = serde_json::from_str(r#"{"angel": 30}"#);
        assert!(result.is_err());
    }

    #[test]
    fn pixel_sizes_parse_unchecked() {
        let params: LatticeParams =
            serde_json::from_str(r#"{"physical_pixel_sizes": [0.1, -0.1, 0.3]}"#).unwrap();
        assert!((params.physical_pixel_sizes.y + 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn arrays_convert_to_inputs() {
        let input = ImageInput::from(Array3::<f32>::zeros((2, 3, 4)));
        assert!(input.path().is_none());
        assert_eq!(input.load().unwrap().shape(), [1, 1, 2, 3, 4]);
    }
}
