//! The validated pipeline configuration and its slice orchestration.
//!
//! [`LatticeData::new`] turns a [`LatticeParams`] into a consistent
//! configuration by running a fixed sequence of passes, each of which may
//! rely on the fields resolved before it:
//!
//! 1. default `save_name`/`save_dir` from the input path
//! 2. normalize `input_image`
//! 3. load the workflow
//! 4. default `time_range`/`channel_range` from the image
//! 5. bounds-check both ranges
//! 6. resolve `crop.z_range` against the image's Z extent
//! 7. check there is one PSF per channel
//!
//! Every failing field is reported in one [`ValidationError`].
//!
//! Processing is lazy: [`LatticeData::process`] and
//! [`LatticeData::process_workflow`] return iterators that compute one
//! slice at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array3;

use crate::affine::AffineTransform3D;
use crate::crop::{
    CropConfig, CropParams, RoiInput, resolve_roi_list, resolve_roi_subset, resolve_z_range,
};
use crate::deconvolution::{DeconvolutionConfig, DeconvolutionParams, resolve_deconvolution};
use crate::deskew::{DeskewConfig, DeskewDirection, DeskewGeometry, deskewed_geometry};
use crate::error::{FieldError, LatticeError, ValidationError, WorkflowError};
use crate::image::{Axis, LatticeImage, Volume};
use crate::kernels::{Backends, CropDeconvolution, CropDeskewRequest, Interpolation, deconvolve};
use crate::output::{OutputConfig, check_save_dir, resolve_range};
use crate::params::{ImageInput, LatticeParams, WorkflowInput};
use crate::pixel::PixelGeometry;
use crate::results::{ImageSlices, ProcessedSlice, WorkflowOutput, WorkflowSlices};
use crate::roi::Roi;
use crate::workflow::{FunctionRegistry, TaskFn, Workflow, WorkflowValue};
use crate::writers::WriterSettings;

/// Name of the task grafted onto user workflows that yields the deskewed
/// slice.
pub const DESKEW_TASK: &str = "deskew_image";

type LeafResult = Result<ProcessedSlice<WorkflowOutput>, LatticeError>;

/// A fully validated pipeline configuration.
///
/// Never mutated after construction; [`copy_validate`](Self::copy_validate)
/// produces modified copies.
#[derive(Debug, Clone)]
pub struct LatticeData {
    deskew: DeskewConfig,
    output: OutputConfig,
    crop: Option<CropConfig>,
    deconvolution: Option<DeconvolutionConfig>,
    workflow: Option<Workflow>,
}

fn default_save_name(input: Option<&Path>) -> String {
    input
        .and_then(Path::file_stem)
        .map_or_else(
            || OutputConfig::DEFAULT_SAVE_NAME.to_owned(),
            |stem| stem.to_string_lossy().into_owned(),
        )
}

fn default_save_dir(input: Option<&Path>) -> PathBuf {
    input
        .and_then(Path::parent)
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn load_workflow(input: WorkflowInput, errors: &mut Vec<FieldError>) -> Option<Workflow> {
    match input {
        WorkflowInput::Graph(workflow) => Some(workflow),
        WorkflowInput::Path(path) => match Workflow::from_path(&path, &FunctionRegistry::builtin()) {
            Ok(workflow) => Some(workflow),
            Err(e) => {
                errors.push(FieldError::new("workflow", e.to_string()));
                None
            }
        },
    }
}

fn channel_psf(decon: &DeconvolutionConfig, channel: usize) -> Result<&Array3<f32>, LatticeError> {
    decon.psf.get(channel).ok_or_else(|| {
        LatticeError::Configuration(format!(
            "no PSF for channel {channel}; {} PSFs were given",
            decon.psf.len()
        ))
    })
}

fn check_angle(angle: f64, errors: &mut Vec<FieldError>) {
    if !(angle.is_finite() && angle > 0.0 && angle < 90.0) {
        errors.push(FieldError::new(
            "angle",
            format!("angle must be between 0 and 90 degrees, got {angle}"),
        ));
    }
}

impl LatticeData {
    /// Validate `params`.
    ///
    /// # Errors
    ///
    /// Returns every violated invariant at once.
    pub fn new(params: LatticeParams) -> Result<Self, ValidationError> {
        let LatticeParams {
            input_image,
            skew,
            angle,
            physical_pixel_sizes,
            deskew_vol_shape,
            deskew_affine_transform,
            crop,
            deconvolution,
            workflow,
            time_range,
            channel_range,
            save_dir,
            save_name,
            save_type,
        } = params;
        let mut errors = Vec::new();

        let input_path = input_image.as_ref().and_then(ImageInput::path);
        let save_name = save_name.unwrap_or_else(|| default_save_name(input_path));
        let save_dir = save_dir.unwrap_or_else(|| default_save_dir(input_path));
        check_save_dir(&save_dir, &mut errors);
        check_angle(angle, &mut errors);
        let pixels = match PixelGeometry::try_from(physical_pixel_sizes) {
            Ok(pixels) => Some(pixels),
            Err(e) => {
                errors.push(FieldError::new("physical_pixel_sizes", e));
                None
            }
        };

        let image = match input_image.as_ref().map(ImageInput::load) {
            None => {
                errors.push(FieldError::new("input_image", "an input image is required"));
                None
            }
            Some(Err(e)) => {
                errors.push(FieldError::new("input_image", e.to_string()));
                None
            }
            Some(Ok(image)) if image.shape().contains(&0) => {
                errors.push(FieldError::new(
                    "input_image",
                    format!("image shape {:?} has an empty axis", image.shape()),
                ));
                None
            }
            Some(Ok(image)) => Some(image),
        };

        let workflow = workflow.and_then(|w| load_workflow(w, &mut errors));

        let ranges = image.as_ref().map(|image| {
            (
                resolve_range("time_range", time_range, image.size(Axis::T), &mut errors),
                resolve_range("channel_range", channel_range, image.size(Axis::C), &mut errors),
            )
        });

        let crop = crop.map(|params| {
            let roi_list = resolve_roi_list(&params.roi_list, &mut errors);
            let roi_subset = resolve_roi_subset(params.roi_subset.as_deref(), roi_list.len(), &mut errors);
            let z_range = image.as_ref().map_or((0, 0), |image| {
                resolve_z_range(params.z_range, image.size(Axis::Z), &mut errors)
            });
            CropConfig {
                roi_list,
                roi_subset,
                z_range,
            }
        });

        let deconvolution = deconvolution.and_then(|params| {
            if let Some(image) = &image {
                let psfs = params.psf.len();
                let channels = image.size(Axis::C);
                if psfs != channels {
                    errors.push(FieldError::new(
                        "deconvolution.psf",
                        format!(
                            "There should be one PSF per channel, but there are {psfs} PSFs and {channels} channels."
                        ),
                    ));
                }
            }
            resolve_deconvolution(&params, &mut errors)
        });

        let geometry = match (deskew_vol_shape, deskew_affine_transform) {
            (Some(shape), Some(transform)) => {
                if shape.contains(&0) {
                    errors.push(FieldError::new(
                        "deskew_vol_shape",
                        format!("deskewed shape {shape:?} has an empty axis"),
                    ));
                }
                Some(DeskewGeometry { shape, transform })
            }
            (None, None) => None,
            (shape, _) => {
                let missing = if shape.is_some() {
                    "deskew_affine_transform"
                } else {
                    "deskew_vol_shape"
                };
                errors.push(FieldError::new(
                    missing,
                    "deskew_vol_shape and deskew_affine_transform must be given together",
                ));
                None
            }
        };

        let (Some(image), Some((time_range, channel_range)), Some(physical_pixel_sizes), true) =
            (image, ranges, pixels, errors.is_empty())
        else {
            return Err(ValidationError::new(errors));
        };

        let geometry = geometry.unwrap_or_else(|| {
            deskewed_geometry(image.volume_shape(), angle, physical_pixel_sizes, skew)
        });
        log::info!(
            "Channels: {}, Time: {}",
            image.size(Axis::C),
            image.size(Axis::T)
        );

        Ok(Self {
            deskew: DeskewConfig {
                input_image: image,
                skew,
                angle,
                physical_pixel_sizes,
                geometry,
            },
            output: OutputConfig {
                save_dir,
                save_name,
                save_type,
                time_range,
                channel_range,
            },
            crop,
            deconvolution,
            workflow,
        })
    }

    /// Deskew settings and the normalized image.
    #[must_use]
    pub const fn deskew(&self) -> &DeskewConfig {
        &self.deskew
    }

    /// Output settings.
    #[must_use]
    pub const fn output(&self) -> &OutputConfig {
        &self.output
    }

    /// Crop settings, if cropping is enabled.
    #[must_use]
    pub const fn crop(&self) -> Option<&CropConfig> {
        self.crop.as_ref()
    }

    /// Deconvolution settings, if deconvolution is enabled.
    #[must_use]
    pub const fn deconvolution(&self) -> Option<&DeconvolutionConfig> {
        self.deconvolution.as_ref()
    }

    /// Attached workflow.
    #[must_use]
    pub const fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    /// Returns `true` if a crop configuration is attached.
    #[must_use]
    pub const fn cropping_enabled(&self) -> bool {
        self.crop.is_some()
    }

    /// Returns `true` if a deconvolution configuration is attached.
    #[must_use]
    pub const fn deconv_enabled(&self) -> bool {
        self.deconvolution.is_some()
    }

    /// The normalized `TCZYX` image.
    #[must_use]
    pub const fn input_image(&self) -> &LatticeImage {
        self.deskew.input_image()
    }

    /// Skew axis.
    #[must_use]
    pub const fn skew(&self) -> DeskewDirection {
        self.deskew.skew()
    }

    /// Skew angle in degrees.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.deskew.angle()
    }

    /// Voxel sizes.
    #[must_use]
    pub const fn physical_pixel_sizes(&self) -> PixelGeometry {
        self.deskew.physical_pixel_sizes()
    }

    /// Pixel size along X.
    #[must_use]
    pub const fn dx(&self) -> f64 {
        self.deskew.dx()
    }

    /// Pixel size along Y.
    #[must_use]
    pub const fn dy(&self) -> f64 {
        self.deskew.dy()
    }

    /// Raw stage step.
    #[must_use]
    pub const fn dz(&self) -> f64 {
        self.deskew.dz()
    }

    /// Z spacing of the deskewed output.
    #[must_use]
    pub fn new_dz(&self) -> f64 {
        self.deskew.new_dz()
    }

    /// Number of channels in the input image.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.deskew.channels()
    }

    /// Number of timepoints in the input image.
    #[must_use]
    pub const fn time(&self) -> usize {
        self.deskew.time()
    }

    /// Axis names of the input image.
    #[must_use]
    pub const fn dims(&self) -> [Axis; 5] {
        self.deskew.dims()
    }

    /// `(Z, Y, X)` shape of one deskewed volume.
    #[must_use]
    pub const fn deskew_vol_shape(&self) -> [usize; 3] {
        self.deskew.deskew_vol_shape()
    }

    /// Raw-to-deskewed voxel transform.
    #[must_use]
    pub const fn deskew_affine_transform(&self) -> &AffineTransform3D {
        self.deskew.deskew_affine_transform()
    }

    /// First timepoint of the first channel.
    ///
    /// # Errors
    ///
    /// Cannot fail for a validated configuration.
    pub fn get_3d_slice(&self) -> Result<Volume, LatticeError> {
        self.deskew.get_3d_slice().map_err(LatticeError::Configuration)
    }

    /// Raw volume at `time`, `channel`; lazy images return a pending handle.
    ///
    /// # Errors
    ///
    /// Fails if either index is outside the image.
    pub fn slice_data(&self, time: usize, channel: usize) -> Result<Volume, LatticeError> {
        self.input_image()
            .volume(time, channel)
            .map_err(LatticeError::Configuration)
    }

    pub(crate) fn writer_settings(&self, save_name: &str) -> WriterSettings {
        WriterSettings {
            save_dir: self.output.save_dir.clone(),
            save_name: save_name.to_owned(),
            voxel_size: [self.dx(), self.dy(), self.new_dz()],
        }
    }

    /// Parameters that rebuild this configuration, including the derived
    /// deskew geometry.
    #[must_use]
    pub fn to_params(&self) -> LatticeParams {
        LatticeParams {
            input_image: Some(ImageInput::Image(self.deskew.input_image.clone())),
            skew: self.skew(),
            angle: self.angle(),
            physical_pixel_sizes: self.physical_pixel_sizes().into(),
            deskew_vol_shape: Some(self.deskew_vol_shape()),
            deskew_affine_transform: Some(*self.deskew_affine_transform()),
            crop: self.crop.as_ref().map(|crop| CropParams {
                roi_list: crop.roi_list.iter().cloned().map(RoiInput::from).collect(),
                roi_subset: Some(crop.roi_subset.clone()),
                z_range: Some((Some(crop.z_range.0), Some(crop.z_range.1))),
            }),
            deconvolution: self.deconvolution.as_ref().map(|decon| DeconvolutionParams {
                decon_processing: decon.decon_processing,
                psf: decon.psf.iter().cloned().map(ImageInput::from).collect(),
                psf_num_iter: decon.psf_num_iter,
                background: decon.background,
            }),
            workflow: self.workflow.clone().map(WorkflowInput::Graph),
            time_range: Some(self.output.time_range().into()),
            channel_range: Some(self.output.channel_range().into()),
            save_dir: Some(self.output.save_dir.clone()),
            save_name: Some(self.output.save_name.clone()),
            save_type: self.output.save_type,
        }
    }

    /// A new configuration with `update` applied, validated from scratch.
    ///
    /// The deskew geometry is carried over unless `update` clears
    /// `deskew_vol_shape` and `deskew_affine_transform`.
    ///
    /// # Errors
    ///
    /// Returns every invariant the updated parameters violate.
    pub fn copy_validate(&self, update: impl FnOnce(&mut LatticeParams)) -> Result<Self, ValidationError> {
        let mut params = self.to_params();
        update(&mut params);
        Self::new(params)
    }

    /// Raw slices for every `(time, channel)` pair in the selected ranges,
    /// time-major.
    ///
    /// Lazy images yield pending volumes; nothing is read here.
    pub fn iter_slices(&self) -> impl Iterator<Item = Result<ProcessedSlice<Volume>, LatticeError>> + '_ {
        let channel_range = self.output.channel_range();
        self.output
            .time_range()
            .enumerate()
            .flat_map(move |(time_index, time)| {
                channel_range
                    .clone()
                    .enumerate()
                    .map(move |(channel_index, channel)| -> Result<_, LatticeError> {
                        Ok(ProcessedSlice {
                            data: self.slice_data(time, channel)?,
                            time_index,
                            time,
                            channel_index,
                            channel,
                            roi_index: None,
                        })
                    })
            })
    }

    /// One single-slice copy of this configuration per slice.
    ///
    /// Each copy holds just that volume as its image, full (single
    /// element) time and channel ranges, and only that channel's PSF.
    /// `update` is applied last.
    pub fn iter_sublattices<'a>(
        &'a self,
        update: impl Fn(&mut LatticeParams) + 'a,
    ) -> impl Iterator<Item = Result<ProcessedSlice<Self>, LatticeError>> + 'a {
        self.iter_slices().map(move |slice| -> Result<_, LatticeError> {
            let slice = slice?;
            let channel = slice.channel;
            let volume = slice.data.clone();
            let lattice = self.copy_validate(|params| {
                params.input_image = Some(ImageInput::Image(LatticeImage::from_volume(volume)));
                params.time_range = None;
                params.channel_range = None;
                if let Some(decon) = params.deconvolution.as_mut() {
                    decon.psf = decon.psf.get(channel).cloned().into_iter().collect();
                }
                update(params);
            })?;
            Ok(slice.copy_with_data(lattice))
        })
    }

    /// One copy of the attached workflow per slice, wired to receive that
    /// slice's deskewed volume.
    ///
    /// Each copy gains a [`DESKEW_TASK`] task that processes the slice's
    /// sublattice on demand, and every task argument that named an
    /// undefined input is pointed at it. Yields nothing when no workflow
    /// is attached.
    pub fn generate_workflows<'a>(
        &'a self,
        backends: &Backends,
    ) -> impl Iterator<Item = Result<ProcessedSlice<Workflow>, LatticeError>> + 'a {
        let backends = backends.clone();
        self.workflow.iter().flat_map(move |template| {
            let backends = backends.clone();
            self.iter_sublattices(|params| params.workflow = None)
                .map(move |sublattice| -> Result<_, LatticeError> {
                    let sublattice = sublattice?;
                    let position = sublattice.copy_with_data(());
                    let lattice = sublattice.data;
                    let task_backends = backends.clone();
                    let func: TaskFn = Arc::new(move |_| {
                        lattice
                            .process_into_image(&task_backends)
                            .map(WorkflowValue::Image)
                            .map_err(|e| WorkflowError::Pipeline(e.to_string()))
                    });

                    let mut workflow = template.clone();
                    workflow.set(DESKEW_TASK, "process_into_image", func, Vec::new());
                    for (task, arg_index, _) in workflow.inputs() {
                        workflow.rewire(&task, arg_index, DESKEW_TASK)?;
                    }
                    Ok(position.copy_with_data(workflow))
                })
        })
    }

    fn process_full_slice(
        &self,
        backends: &Backends,
        slice: ProcessedSlice<Volume>,
    ) -> Result<ProcessedSlice<Array3<f32>>, LatticeError> {
        log::debug!("Processing time {} channel {}", slice.time, slice.channel);
        let position = slice.copy_with_data(());
        let mut data = slice.data.materialize()?;
        if let Some(decon) = &self.deconvolution {
            data = deconvolve(
                backends.deconvolution.as_ref(),
                decon.decon_processing,
                &data,
                channel_psf(decon, position.channel)?,
                decon.psf_num_iter,
                decon.background,
                self.physical_pixel_sizes(),
            )?;
        }
        let deskewed = match self.skew() {
            DeskewDirection::Y => backends.deskew.deskew_y(
                &data,
                self.angle(),
                Interpolation::Linear,
                self.physical_pixel_sizes(),
            )?,
            DeskewDirection::X => backends.deskew.deskew_x(
                &data,
                self.angle(),
                Interpolation::Linear,
                self.physical_pixel_sizes(),
            )?,
        };
        Ok(position.copy_with_data(deskewed))
    }

    fn process_cropped_slice(
        &self,
        backends: &Backends,
        crop: &CropConfig,
        roi: &Roi,
        roi_index: usize,
        slice: ProcessedSlice<Volume>,
    ) -> Result<ProcessedSlice<Array3<f32>>, LatticeError> {
        log::debug!(
            "Processing ROI {roi_index} time {} channel {}",
            slice.time,
            slice.channel
        );
        let mut position = slice.copy_with_data(());
        position.roi_index = Some(roi_index);
        let deconvolution = match &self.deconvolution {
            Some(decon) => Some(CropDeconvolution {
                deconvolver: backends.deconvolution.as_ref(),
                processing: decon.decon_processing,
                psf: channel_psf(decon, position.channel)?,
                num_iter: decon.psf_num_iter,
                background: decon.background,
            }),
            None => None,
        };
        let (z_start, z_end) = crop.z_range;
        let data = backends.deskew.crop_volume_deskew(CropDeskewRequest {
            volume: slice.data,
            roi,
            deskew_vol_shape: self.deskew_vol_shape(),
            deskew_affine_transform: self.deskew_affine_transform(),
            z_start,
            z_end,
            skew: self.skew(),
            angle: self.angle(),
            pixels: self.physical_pixel_sizes(),
            interpolation: Interpolation::Linear,
            deconvolution,
        })?;
        Ok(position.copy_with_data(data))
    }

    /// Deskew (and optionally crop and deconvolve) every selected slice.
    ///
    /// With cropping enabled, ROIs form the outer loop and slices the
    /// inner one; otherwise each slice is read, deconvolved if enabled,
    /// and deskewed along the configured axis. Nothing runs until the
    /// result is iterated.
    #[must_use]
    pub fn process(&self, backends: &Backends) -> ImageSlices<'_> {
        let backends = backends.clone();
        match &self.crop {
            Some(crop) => ImageSlices::new(
                self,
                Box::new(crop.selected_rois().enumerate().flat_map(move |(roi_index, roi)| {
                    log::info!("Processing ROI {roi_index}");
                    let backends = backends.clone();
                    self.iter_slices().map(move |slice| {
                        self.process_cropped_slice(&backends, crop, roi, roi_index, slice?)
                    })
                })),
            ),
            None => ImageSlices::new(
                self,
                Box::new(
                    self.iter_slices()
                        .map(move |slice| self.process_full_slice(&backends, slice?)),
                ),
            ),
        }
    }

    /// The first processed slice.
    ///
    /// # Errors
    ///
    /// Propagates processing failures.
    pub fn process_into_image(&self, backends: &Backends) -> Result<Array3<f32>, LatticeError> {
        let slice = self
            .process(backends)
            .next()
            .ok_or_else(|| LatticeError::Configuration("no slices were produced".to_owned()))??;
        Ok(slice.data)
    }

    /// Run the attached workflow on every slice and evaluate each leaf.
    ///
    /// Yields nothing when no workflow is attached.
    #[must_use]
    pub fn process_workflow(&self, backends: &Backends) -> WorkflowSlices<'_> {
        let slices = self.generate_workflows(backends).flat_map(|workflow| {
            let leaf_results: Box<dyn Iterator<Item = LeafResult>> = match workflow {
                Err(e) => Box::new(std::iter::once(Err(e))),
                Ok(workflow) => {
                    let leafs: Vec<String> = workflow.data.leafs().into_iter().map(str::to_owned).collect();
                    Box::new(leafs.into_iter().map(move |leaf| -> LeafResult {
                        let value = workflow.data.get(&leaf)?;
                        Ok(workflow.copy_with_data(WorkflowOutput { leaf, value }))
                    }))
                }
            };
            leaf_results
        });
        WorkflowSlices::new(self, Box::new(slices))
    }

    /// Process and write everything.
    ///
    /// Runs the workflow when one is attached, the plain pipeline
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Stops at the first processing or writing failure.
    pub fn save(&self, backends: &Backends) -> Result<Vec<PathBuf>, LatticeError> {
        if self.workflow.is_some() {
            self.process_workflow(backends).save()
        } else {
            self.process(backends).save_image()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| f32::from(u16::try_from(z + y + x).unwrap_or(0)))
    }

    fn lattice(params: LatticeParams) -> LatticeData {
        LatticeData::new(params).unwrap()
    }

    #[test]
    fn save_defaults_come_from_the_input_path() {
        assert_eq!(default_save_name(Some(Path::new("/data/cell.tif"))), "cell");
        assert_eq!(default_save_dir(Some(Path::new("/data/cell.tif"))), PathBuf::from("/data"));
        assert_eq!(default_save_name(None), "deskewed");
        assert_eq!(default_save_dir(Some(Path::new("cell.tif"))), PathBuf::from("."));
    }

    #[test]
    fn missing_image_is_reported() {
        let err = LatticeData::new(LatticeParams::default()).unwrap_err();
        assert!(err.has_field("input_image"));
    }

    #[test]
    fn angle_outside_range_is_reported() {
        let mut params = LatticeParams::new(ramp((4, 5, 6)));
        params.angle = 90.0;
        let err = LatticeData::new(params).unwrap_err();
        assert!(err.has_field("angle"));
    }

    #[test]
    fn geometry_overrides_come_in_pairs() {
        let mut params = LatticeParams::new(ramp((4, 5, 6)));
        params.deskew_vol_shape = Some([4, 5, 6]);
        let err = LatticeData::new(params).unwrap_err();
        assert!(err.has_field("deskew_affine_transform"));
    }

    #[test]
    fn errors_from_several_fields_are_collected() {
        let mut params = LatticeParams::new(ramp((4, 5, 6)));
        params.angle = -1.0;
        params.time_range = Some((0..3).into());
        let err = LatticeData::new(params).unwrap_err();
        assert!(err.has_field("angle"));
        assert!(err.has_field("time_range"));
    }

    #[test]
    fn bad_pixel_size_is_reported_with_the_other_fields() {
        let mut params = LatticeParams::new(ramp((4, 5, 6)));
        params.physical_pixel_sizes = crate::pixel::PixelSizes {
            x: 0.0,
            y: 0.1,
            z: 0.3,
        };
        params.angle = 95.0;
        let err = LatticeData::new(params).unwrap_err();
        assert!(err.has_field("physical_pixel_sizes"));
        assert!(err.has_field("angle"));
    }

    #[test]
    fn copy_validate_carries_geometry() {
        let data = lattice(LatticeParams::new(ramp((4, 5, 6))));
        let copy = data.copy_validate(|p| p.save_name = Some("copy".to_owned())).unwrap();
        assert_eq!(copy.deskew_vol_shape(), data.deskew_vol_shape());
        assert_eq!(copy.deskew_affine_transform(), data.deskew_affine_transform());
        assert_eq!(copy.output().save_name(), "copy");
    }

    #[test]
    fn sublattices_hold_one_slice_each() {
        let image = ndarray::Array5::<f32>::zeros((2, 3, 4, 5, 6));
        let data = lattice(LatticeParams::new(image));
        let subs: Vec<_> = data.iter_sublattices(|_| {}).map(Result::unwrap).collect();
        assert_eq!(subs.len(), 6);
        for sub in &subs {
            assert_eq!(sub.data.input_image().shape(), [1, 1, 4, 5, 6]);
            assert_eq!(sub.data.output().time_range(), 0..1);
            assert_eq!(sub.data.output().channel_range(), 0..1);
        }
        assert_eq!((subs[4].time, subs[4].channel), (1, 1));
    }

    #[test]
    fn process_into_image_has_the_deskewed_shape() {
        let data = lattice(LatticeParams::new(ramp((4, 5, 6))));
        let image = data.process_into_image(&Backends::default()).unwrap();
        let (z, y, x) = image.dim();
        assert_eq!([z, y, x], data.deskew_vol_shape());
    }

    #[test]
    fn crop_path_tags_roi_index() {
        let mut params = LatticeParams::new(ramp((4, 8, 8)));
        params.crop = Some(CropParams {
            roi_list: vec![
                RoiInput::Vertices(vec![[0.0, 0.0], [0.0, 3.0], [3.0, 3.0], [3.0, 0.0]]),
                RoiInput::Vertices(vec![[1.0, 1.0], [1.0, 4.0], [4.0, 4.0], [4.0, 1.0]]),
            ],
            roi_subset: Some(vec![1]),
            z_range: None,
        });
        let data = lattice(params);
        let slices: Vec<_> = data
            .process(&Backends::default())
            .map(Result::unwrap)
            .collect();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].roi_index, Some(0));
        assert_eq!(slices[0].data.dim().1, 3);
        assert_eq!(slices[0].data.dim().2, 3);
    }

    #[test]
    fn no_workflow_means_no_workflow_slices() {
        let data = lattice(LatticeParams::new(ramp((2, 3, 4))));
        assert_eq!(data.generate_workflows(&Backends::default()).count(), 0);
        assert_eq!(data.process_workflow(&Backends::default()).count(), 0);
    }
}
