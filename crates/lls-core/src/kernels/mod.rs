//! Numerical collaborators: deskew, crop+deskew and deconvolution.
//!
//! The pipeline only talks to these through the [`DeskewKernel`] and
//! [`Deconvolver`] traits, so accelerated backends can be swapped in via
//! [`Backends`]. The reference implementations here run on the CPU.

pub mod deconvolution;
pub mod deskew;

use std::fmt;
use std::sync::Arc;

use ndarray::Array3;

use crate::affine::AffineTransform3D;
use crate::deconvolution::{Background, DeconvolutionChoice};
use crate::deskew::DeskewDirection;
use crate::error::{KernelError, LatticeError};
use crate::image::Volume;
use crate::pixel::PixelGeometry;
use crate::roi::Roi;

pub use self::deconvolution::RichardsonLucy;
pub use self::deskew::AffineDeskew;

/// Sampling used when resampling a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Trilinear.
    #[default]
    Linear,
    /// Nearest neighbour.
    Nearest,
}

/// Boundary handling for convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Repeat the edge voxel.
    #[default]
    Nearest,
    /// Treat outside voxels as zero.
    Zero,
}

/// Deconvolution settings forwarded to the combined crop kernel.
#[derive(Clone, Copy)]
pub struct CropDeconvolution<'a> {
    /// Backend that runs the deconvolution.
    pub deconvolver: &'a dyn Deconvolver,
    /// Which backend variant to call.
    pub processing: DeconvolutionChoice,
    /// PSF for the slice's channel.
    pub psf: &'a Array3<f32>,
    /// Iteration count.
    pub num_iter: u32,
    /// GPU background subtraction.
    pub background: Background,
}

impl fmt::Debug for CropDeconvolution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CropDeconvolution")
            .field("processing", &self.processing)
            .field("psf", &self.psf.dim())
            .field("num_iter", &self.num_iter)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

/// Inputs of the fused crop + deskew (+ deconvolution) operation.
#[derive(Debug)]
pub struct CropDeskewRequest<'a> {
    /// Raw slice; may still be pending.
    pub volume: Volume,
    /// Region to keep, in deskewed `(row, col)` coordinates.
    pub roi: &'a Roi,
    /// Precomputed `(Z, Y, X)` shape of the full deskewed volume.
    pub deskew_vol_shape: [usize; 3],
    /// Precomputed transform from raw to deskewed voxel coordinates.
    pub deskew_affine_transform: &'a AffineTransform3D,
    /// First deskewed Z plane to keep.
    pub z_start: usize,
    /// One past the last deskewed Z plane to keep.
    pub z_end: usize,
    /// Skew axis.
    pub skew: DeskewDirection,
    /// Skew angle in degrees.
    pub angle: f64,
    /// Voxel sizes.
    pub pixels: PixelGeometry,
    /// Sampling.
    pub interpolation: Interpolation,
    /// Optional deconvolution before deskewing.
    pub deconvolution: Option<CropDeconvolution<'a>>,
}

/// Deskews raw volumes.
pub trait DeskewKernel: Send + Sync {
    /// Deskew a volume sheared along Y.
    ///
    /// # Errors
    ///
    /// Backend specific.
    fn deskew_y(
        &self,
        volume: &Array3<f32>,
        angle: f64,
        interpolation: Interpolation,
        pixels: PixelGeometry,
    ) -> Result<Array3<f32>, KernelError>;

    /// Deskew a volume sheared along X.
    ///
    /// # Errors
    ///
    /// Backend specific.
    fn deskew_x(
        &self,
        volume: &Array3<f32>,
        angle: f64,
        interpolation: Interpolation,
        pixels: PixelGeometry,
    ) -> Result<Array3<f32>, KernelError>;

    /// Deskew, then crop to a ROI and Z range, optionally deconvolving
    /// first.
    ///
    /// # Errors
    ///
    /// Backend specific; [`LatticeError`] so that lazy reads can fail
    /// here too.
    fn crop_volume_deskew(&self, request: CropDeskewRequest<'_>) -> Result<Array3<f32>, LatticeError>;
}

/// GPU deconvolution inputs.
#[derive(Debug, Clone, Copy)]
pub struct GpuDeconRequest<'a> {
    /// Raw volume.
    pub image: &'a Array3<f32>,
    /// Point spread function.
    pub psf: &'a Array3<f32>,
    /// Background subtraction.
    pub background: Background,
    /// Z spacing of the data.
    pub dz: f64,
    /// XY spacing of the data.
    pub dx: f64,
    /// Iteration count.
    pub num_iter: u32,
}

/// CPU deconvolution inputs.
#[derive(Debug, Clone, Copy)]
pub struct CpuDeconRequest<'a> {
    /// Raw volume.
    pub image: &'a Array3<f32>,
    /// Point spread function.
    pub psf: &'a Array3<f32>,
    /// Iteration count.
    pub num_iter: u32,
    /// Clip the estimate to `[-1, 1]` after every iteration.
    pub clip: bool,
    /// Ratios whose denominator falls below this are set to zero.
    pub filter_epsilon: f32,
    /// How voxels outside the volume are treated.
    pub boundary: Boundary,
}

impl<'a> CpuDeconRequest<'a> {
    /// Request with the settings the pipeline always uses: no clipping,
    /// no filtering, nearest boundary.
    #[must_use]
    pub const fn pipeline(image: &'a Array3<f32>, psf: &'a Array3<f32>, num_iter: u32) -> Self {
        Self {
            image,
            psf,
            num_iter,
            clip: false,
            filter_epsilon: 0.0,
            boundary: Boundary::Nearest,
        }
    }
}

/// Deconvolves volumes against a PSF.
pub trait Deconvolver: Send + Sync {
    /// GPU Richardson-Lucy.
    ///
    /// # Errors
    ///
    /// [`KernelError::BackendUnavailable`] if there is no GPU.
    fn gpu(&self, request: GpuDeconRequest<'_>) -> Result<Array3<f32>, KernelError>;

    /// CPU Richardson-Lucy.
    ///
    /// # Errors
    ///
    /// Backend specific.
    fn cpu(&self, request: CpuDeconRequest<'_>) -> Result<Array3<f32>, KernelError>;
}

/// Run whichever deconvolution variant `processing` selects.
///
/// # Errors
///
/// Propagates the backend error.
pub fn deconvolve(
    deconvolver: &dyn Deconvolver,
    processing: DeconvolutionChoice,
    image: &Array3<f32>,
    psf: &Array3<f32>,
    num_iter: u32,
    background: Background,
    pixels: PixelGeometry,
) -> Result<Array3<f32>, KernelError> {
    match processing {
        DeconvolutionChoice::CudaGpu => deconvolver.gpu(GpuDeconRequest {
            image,
            psf,
            background,
            dz: pixels.z(),
            dx: pixels.x(),
            num_iter,
        }),
        DeconvolutionChoice::Cpu => deconvolver.cpu(CpuDeconRequest::pipeline(image, psf, num_iter)),
    }
}

/// The collaborators a pipeline run dispatches to.
#[derive(Clone)]
pub struct Backends {
    /// Deskew and crop+deskew.
    pub deskew: Arc<dyn DeskewKernel>,
    /// Deconvolution.
    pub deconvolution: Arc<dyn Deconvolver>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            deskew: Arc::new(AffineDeskew),
            deconvolution: Arc::new(RichardsonLucy),
        }
    }
}
