//! Per-slice envelopes and the lazily evaluated result containers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use ndarray::Array3;

use crate::error::LatticeError;
use crate::lattice::LatticeData;
use crate::workflow::{Table, WorkflowValue};
use crate::writers::{ImageWriter, ImageWriterKind, TableWriter};

/// A payload tagged with its position in the `(time, channel)` grid.
///
/// `time_index`/`channel_index` count from the start of the selected
/// range; `time`/`channel` are the absolute positions in the input image.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSlice<T> {
    /// Payload.
    pub data: T,
    /// Position within `time_range`.
    pub time_index: usize,
    /// Timepoint in the input image.
    pub time: usize,
    /// Position within `channel_range`.
    pub channel_index: usize,
    /// Channel in the input image.
    pub channel: usize,
    /// Position in `roi_subset` on the crop path.
    pub roi_index: Option<usize>,
}

impl<T> ProcessedSlice<T> {
    /// Same position, different payload.
    pub fn copy_with_data<U>(&self, data: U) -> ProcessedSlice<U> {
        ProcessedSlice {
            data,
            time_index: self.time_index,
            time: self.time,
            channel_index: self.channel_index,
            channel: self.channel,
            roi_index: self.roi_index,
        }
    }

    /// Replace the payload, keeping the position.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProcessedSlice<U> {
        ProcessedSlice {
            data: f(self.data),
            time_index: self.time_index,
            time: self.time,
            channel_index: self.channel_index,
            channel: self.channel,
            roi_index: self.roi_index,
        }
    }
}

type SliceIter<'a, T> = Box<dyn Iterator<Item = Result<ProcessedSlice<T>, LatticeError>> + 'a>;

/// Lazily processed image slices of one pipeline run.
///
/// Nothing is computed until the iterator is advanced; each slice is
/// produced and handed out before the next one is started.
pub struct ImageSlices<'a> {
    lattice_data: &'a LatticeData,
    slices: SliceIter<'a, Array3<f32>>,
}

impl fmt::Debug for ImageSlices<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSlices")
            .field("lattice_data", &self.lattice_data)
            .finish_non_exhaustive()
    }
}

impl<'a> ImageSlices<'a> {
    pub(crate) fn new(lattice_data: &'a LatticeData, slices: SliceIter<'a, Array3<f32>>) -> Self {
        Self {
            lattice_data,
            slices,
        }
    }

    /// The configuration these slices were produced from.
    #[must_use]
    pub const fn lattice_data(&self) -> &'a LatticeData {
        self.lattice_data
    }

    /// Write every slice with the writer selected by `save_type`.
    ///
    /// # Errors
    ///
    /// Stops at the first processing or writing failure.
    pub fn save_image(self) -> Result<Vec<PathBuf>, LatticeError> {
        let output = self.lattice_data.output();
        let mut writer = ImageWriterKind::from(output.save_type())
            .open(self.lattice_data.writer_settings(output.save_name()))?;
        for slice in self.slices {
            writer.write_slice(&slice?)?;
        }
        writer.finish()
    }
}

impl Iterator for ImageSlices<'_> {
    type Item = Result<ProcessedSlice<Array3<f32>>, LatticeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.slices.next()
    }
}

/// Value of one workflow leaf for one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutput {
    /// Leaf task name.
    pub leaf: String,
    /// What the leaf evaluated to.
    pub value: WorkflowValue,
}

/// Lazily evaluated workflow results, one item per slice and leaf.
pub struct WorkflowSlices<'a> {
    lattice_data: &'a LatticeData,
    slices: SliceIter<'a, WorkflowOutput>,
}

impl fmt::Debug for WorkflowSlices<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowSlices")
            .field("lattice_data", &self.lattice_data)
            .finish_non_exhaustive()
    }
}

impl<'a> WorkflowSlices<'a> {
    pub(crate) fn new(lattice_data: &'a LatticeData, slices: SliceIter<'a, WorkflowOutput>) -> Self {
        Self {
            lattice_data,
            slices,
        }
    }

    /// The configuration these results were produced from.
    #[must_use]
    pub const fn lattice_data(&self) -> &'a LatticeData {
        self.lattice_data
    }

    /// Write every leaf result according to its type.
    ///
    /// Images go to `{save_name}_{leaf}` through the image writer selected
    /// by `save_type`; tables and numbers are appended to
    /// `{save_name}_{leaf}.csv`.
    ///
    /// # Errors
    ///
    /// Stops at the first evaluation or writing failure.
    pub fn save(self) -> Result<Vec<PathBuf>, LatticeError> {
        let output = self.lattice_data.output();
        let kind = ImageWriterKind::from(output.save_type());
        std::fs::create_dir_all(output.save_dir())?;
        let mut images: BTreeMap<String, Box<dyn ImageWriter>> = BTreeMap::new();
        let mut tables = TableWriter::new(output.save_dir().to_path_buf(), output.save_name());

        for slice in self.slices {
            let slice = slice?;
            let WorkflowOutput { leaf, value } = &slice.data;
            match value {
                WorkflowValue::Image(image) => {
                    if !images.contains_key(leaf) {
                        let name = format!("{}_{leaf}", output.save_name());
                        let writer = kind.open(self.lattice_data.writer_settings(&name))?;
                        images.insert(leaf.clone(), writer);
                    }
                    if let Some(writer) = images.get_mut(leaf) {
                        writer.write_slice(&slice.copy_with_data(image.clone()))?;
                    }
                }
                WorkflowValue::Table(table) => {
                    tables.write(leaf, &slice.copy_with_data(table.clone()))?;
                }
                WorkflowValue::Number(v) => {
                    let table = Table {
                        columns: vec!["value".to_owned()],
                        rows: vec![vec![*v]],
                    };
                    tables.write(leaf, &slice.copy_with_data(table))?;
                }
            }
        }

        let mut written = Vec::new();
        for writer in images.values_mut() {
            written.extend(writer.finish()?);
        }
        written.extend(tables.finish()?);
        Ok(written)
    }
}

impl Iterator for WorkflowSlices<'_> {
    type Item = Result<ProcessedSlice<WorkflowOutput>, LatticeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.slices.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_with_data_keeps_position() {
        let slice = ProcessedSlice {
            data: 1_u8,
            time_index: 1,
            time: 3,
            channel_index: 0,
            channel: 2,
            roi_index: Some(1),
        };
        let copy = slice.copy_with_data("payload");
        assert_eq!(copy.data, "payload");
        assert_eq!(
            (copy.time_index, copy.time, copy.channel_index, copy.channel, copy.roi_index),
            (1, 3, 0, 2, Some(1))
        );
        assert_eq!(slice.map(u32::from).data, 1_u32);
    }
}
