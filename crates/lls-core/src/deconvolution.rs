//! Optional deconvolution step.

use std::fmt;
use std::str::FromStr;

use ndarray::Array3;
use serde::Deserialize;

use crate::error::{FieldError, LatticeError};
use crate::params::ImageInput;

/// Which deconvolution backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeconvolutionChoice {
    /// GPU Richardson-Lucy with background subtraction.
    CudaGpu,
    /// CPU Richardson-Lucy.
    #[default]
    Cpu,
}

impl fmt::Display for DeconvolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CudaGpu => "cuda_gpu",
            Self::Cpu => "cpu",
        })
    }
}

impl FromStr for DeconvolutionChoice {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cuda_gpu" => Ok(Self::CudaGpu),
            "cpu" => Ok(Self::Cpu),
            other => Err(LatticeError::Configuration(format!(
                "unknown deconvolution backend `{other}`, expected cuda_gpu or cpu"
            ))),
        }
    }
}

/// Background to subtract before GPU deconvolution.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "BackgroundRepr")]
pub enum Background {
    /// Let the backend estimate it.
    Auto,
    /// Use the second-to-last Z plane's median.
    SecondLast,
    /// Fixed value.
    Value(f64),
}

impl Default for Background {
    fn default() -> Self {
        Self::Value(0.0)
    }
}

impl FromStr for Background {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "second_last" => Ok(Self::SecondLast),
            other => other
                .parse::<f64>()
                .map(Self::Value)
                .map_err(|_| format!("background must be a number, `auto` or `second_last`, got `{other}`")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BackgroundRepr {
    Value(f64),
    Name(String),
}

impl TryFrom<BackgroundRepr> for Background {
    type Error = String;

    fn try_from(repr: BackgroundRepr) -> Result<Self, Self::Error> {
        match repr {
            BackgroundRepr::Value(v) => Ok(Self::Value(v)),
            BackgroundRepr::Name(name) => name.parse(),
        }
    }
}

/// Unvalidated deconvolution parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeconvolutionParams {
    /// Backend.
    pub decon_processing: DeconvolutionChoice,
    /// One PSF per channel.
    pub psf: Vec<ImageInput>,
    /// Richardson-Lucy iterations.
    pub psf_num_iter: u32,
    /// Background subtraction.
    pub background: Background,
}

impl Default for DeconvolutionParams {
    fn default() -> Self {
        Self {
            decon_processing: DeconvolutionChoice::default(),
            psf: Vec::new(),
            psf_num_iter: DeconvolutionConfig::DEFAULT_NUM_ITER,
            background: Background::default(),
        }
    }
}

/// Validated deconvolution configuration.
#[derive(Debug, Clone)]
pub struct DeconvolutionConfig {
    pub(crate) decon_processing: DeconvolutionChoice,
    pub(crate) psf: Vec<Array3<f32>>,
    pub(crate) psf_num_iter: u32,
    pub(crate) background: Background,
}

impl DeconvolutionConfig {
    /// Default iteration count.
    pub const DEFAULT_NUM_ITER: u32 = 10;

    /// Backend.
    #[must_use]
    pub const fn decon_processing(&self) -> DeconvolutionChoice {
        self.decon_processing
    }

    /// PSF volumes, indexed by channel.
    #[must_use]
    pub fn psf(&self) -> &[Array3<f32>] {
        &self.psf
    }

    /// Iteration count.
    #[must_use]
    pub const fn psf_num_iter(&self) -> u32 {
        self.psf_num_iter
    }

    /// Background subtraction.
    #[must_use]
    pub const fn background(&self) -> Background {
        self.background
    }
}

/// Load each PSF as a 3-D volume and check the standalone invariants.
pub(crate) fn resolve_deconvolution(
    params: &DeconvolutionParams,
    errors: &mut Vec<FieldError>,
) -> Option<DeconvolutionConfig> {
    let before = errors.len();
    if params.psf_num_iter == 0 {
        errors.push(FieldError::new(
            "deconvolution.psf_num_iter",
            "the number of iterations must be at least 1",
        ));
    }
    if let Background::Value(v) = params.background
        && !v.is_finite()
    {
        errors.push(FieldError::new(
            "deconvolution.background",
            "background must be finite",
        ));
    }

    let mut psf = Vec::with_capacity(params.psf.len());
    for (i, input) in params.psf.iter().enumerate() {
        match input.load().and_then(|image| {
            image
                .volume(0, 0)
                .map_err(LatticeError::Configuration)?
                .materialize()
        }) {
            Ok(volume) => psf.push(volume),
            Err(e) => errors.push(FieldError::new(
                "deconvolution.psf",
                format!("PSF {i} could not be loaded: {e}"),
            )),
        }
    }

    (errors.len() == before).then(|| DeconvolutionConfig {
        decon_processing: params.decon_processing,
        psf,
        psf_num_iter: params.psf_num_iter,
        background: params.background,
    })
}
