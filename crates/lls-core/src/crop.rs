//! Optional cropping step: which ROIs to cut out and which Z planes to keep.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::FieldError;
use crate::roi::{Roi, read_imagej_roi};

/// One entry of a user-supplied ROI list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RoiInput {
    /// An ImageJ `.roi` file, or a directory of them.
    Path(PathBuf),
    /// Raw `(row, col)` vertices.
    Vertices(Vec<[f64; 2]>),
}

impl From<Roi> for RoiInput {
    fn from(roi: Roi) -> Self {
        Self::Vertices(roi.vertices().to_vec())
    }
}

impl From<PathBuf> for RoiInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Unvalidated crop parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CropParams {
    /// ROIs to crop to.
    pub roi_list: Vec<RoiInput>,
    /// Indices into `roi_list`; `None` means every ROI.
    pub roi_subset: Option<Vec<usize>>,
    /// Half-open Z plane range; either bound may be left open.
    pub z_range: Option<(Option<usize>, Option<usize>)>,
}

/// Validated crop configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CropConfig {
    pub(crate) roi_list: Vec<Roi>,
    pub(crate) roi_subset: Vec<usize>,
    pub(crate) z_range: (usize, usize),
}

impl CropConfig {
    /// Every ROI that was supplied.
    #[must_use]
    pub fn roi_list(&self) -> &[Roi] {
        &self.roi_list
    }

    /// Indices of the ROIs to process.
    #[must_use]
    pub fn roi_subset(&self) -> &[usize] {
        &self.roi_subset
    }

    /// Resolved `[start, end)` Z range.
    #[must_use]
    pub const fn z_range(&self) -> (usize, usize) {
        self.z_range
    }

    /// The ROIs to process, in `roi_subset` order.
    ///
    /// Each call starts a fresh pass.
    pub fn selected_rois(&self) -> impl Iterator<Item = &Roi> + '_ {
        self.roi_subset.iter().filter_map(|&i| self.roi_list.get(i))
    }
}

/// Coerce every ROI input into a [`Roi`], reading files as needed.
pub(crate) fn resolve_roi_list(inputs: &[RoiInput], errors: &mut Vec<FieldError>) -> Vec<Roi> {
    let mut rois = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        match input {
            RoiInput::Path(path) => match read_imagej_roi(path) {
                Ok(mut read) => rois.append(&mut read),
                Err(e) => errors.push(FieldError::new("crop.roi_list", e.to_string())),
            },
            RoiInput::Vertices(vertices) => match Roi::new(vertices.clone()) {
                Ok(roi) => rois.push(roi),
                Err(e) => errors.push(FieldError::new(
                    "crop.roi_list",
                    format!("entry {i} cannot be interpreted as an ROI: {e}"),
                )),
            },
        }
    }
    rois
}

/// Default `roi_subset` to every ROI and check that indices are in range.
pub(crate) fn resolve_roi_subset(
    subset: Option<&[usize]>,
    roi_count: usize,
    errors: &mut Vec<FieldError>,
) -> Vec<usize> {
    let Some(subset) = subset else {
        return (0..roi_count).collect();
    };
    for &index in subset {
        if index >= roi_count {
            errors.push(FieldError::new(
                "crop.roi_subset",
                format!("ROI index {index} is out of range for {roi_count} ROIs"),
            ));
        }
    }
    subset.to_vec()
}

/// Fill open Z bounds from the image's Z extent and check the result.
pub(crate) fn resolve_z_range(
    z_range: Option<(Option<usize>, Option<usize>)>,
    z_extent: usize,
    errors: &mut Vec<FieldError>,
) -> (usize, usize) {
    let (start, end) = z_range.unwrap_or((None, None));
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(z_extent);
    if start >= end {
        errors.push(FieldError::new(
            "crop.z_range",
            format!("z range start {start} must be less than end {end}"),
        ));
    }
    (start, end)
}
