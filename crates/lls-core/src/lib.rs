//! lls-core: configuration model and slice orchestration for lattice
//! light-sheet processing.
//!
//! A raw lattice acquisition is a stack of sheared planes. This crate
//! validates everything needed to undo that shear (image, angle, voxel
//! sizes, optional crop regions, optional deconvolution, output settings)
//! into one [`LatticeData`], then walks the selected `(time, channel)`
//! slices and hands each to the numerical backends in [`kernels`]:
//!
//! 1. read the slice (lazily for TIFF input)
//! 2. optionally deconvolve it against the channel's PSF
//! 3. deskew it, or crop+deskew it per ROI
//! 4. write it, or feed it into an attached [`Workflow`]
//!
//! ```no_run
//! use lls_core::{Backends, LatticeData, LatticeParams};
//!
//! let params = LatticeParams::new(std::path::PathBuf::from("cell.tif"));
//! let lattice = LatticeData::new(params)?;
//! let written = lattice.save(&Backends::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod affine;
pub mod crop;
pub mod deconvolution;
pub mod deskew;
pub mod error;
pub mod image;
pub mod io;
pub mod kernels;
pub mod lattice;
pub mod output;
pub mod params;
pub mod pixel;
pub mod results;
pub mod roi;
pub mod workflow;
pub mod writers;

pub use affine::AffineTransform3D;
pub use crop::{CropConfig, CropParams, RoiInput};
pub use deconvolution::{Background, DeconvolutionChoice, DeconvolutionConfig, DeconvolutionParams};
pub use deskew::{DeskewConfig, DeskewDirection, DeskewGeometry, deskewed_geometry};
pub use error::{FieldError, KernelError, LatticeError, ValidationError, WorkflowError};
pub use image::{Axis, LabeledArray, LatticeImage, Volume, VolumeSource};
pub use kernels::{Backends, Deconvolver, DeskewKernel, Interpolation};
pub use lattice::{DESKEW_TASK, LatticeData};
pub use output::{OutputConfig, RangeInput, SaveFileType};
pub use params::{ImageInput, LatticeParams, WorkflowInput};
pub use pixel::{PixelGeometry, PixelSizes};
pub use results::{ImageSlices, ProcessedSlice, WorkflowOutput, WorkflowSlices};
pub use roi::Roi;
pub use workflow::{FunctionRegistry, Table, TaskArg, Workflow, WorkflowValue};
