//! BigDataViewer output: one HDF5 file per ROI plus its XML description.
//!
//! Layout follows the BDV HDF5 convention: every channel is a view setup
//! `s{SS}` with a single resolution level, and every timepoint's data
//! lives at `t{TTTTT}/s{SS}/0/cells`.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ndarray::Array3;

use super::{ImageWriter, WriterSettings};
use crate::error::LatticeError;
use crate::results::ProcessedSlice;

/// What the XML needs to know about one written view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewInfo {
    /// `(Z, Y, X)` of the stored data.
    shape: [usize; 3],
}

/// Everything written into one `.h5` file so far.
#[derive(Debug, Default)]
struct BdvFile {
    timepoints: BTreeSet<usize>,
    setups: BTreeMap<usize, ViewInfo>,
    #[cfg(feature = "hdf5")]
    handle: Option<hdf5::File>,
}

/// Aggregates every slice of a ROI (or of the whole run) into one file.
#[derive(Debug)]
pub struct BdvWriter {
    settings: WriterSettings,
    files: BTreeMap<Option<usize>, BdvFile>,
}

/// `name` as XML element text. Ampersands go first so the other
/// entities are not escaped twice.
fn xml_text(name: &str) -> Cow<'_, str> {
    if name.contains(['&', '<', '>']) {
        Cow::Owned(
            name.replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
        )
    } else {
        Cow::Borrowed(name)
    }
}

fn file_stem(save_name: &str, roi: Option<usize>) -> String {
    roi.map_or_else(|| save_name.to_owned(), |r| format!("{save_name}_ROI{r}"))
}

/// Render the BDV `SpimData` XML.
///
/// `voxel_size` is `(x, y, z)` in microns.
#[must_use]
pub fn bdv_xml(
    h5_name: &str,
    timepoints: &BTreeSet<usize>,
    setups: &BTreeMap<usize, [usize; 3]>,
    voxel_size: [f64; 3],
) -> String {
    let [vx, vy, vz] = voxel_size;
    let mut xml = String::new();
    // writing to a String cannot fail
    let _ = writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(xml, r#"<SpimData version="0.2">"#);
    let _ = writeln!(xml, r#"  <BasePath type="relative">.</BasePath>"#);
    let _ = writeln!(xml, "  <SequenceDescription>");
    let _ = writeln!(xml, r#"    <ImageLoader format="bdv.hdf5">"#);
    let _ = writeln!(xml, r#"      <hdf5 type="relative">{}</hdf5>"#, xml_text(h5_name));
    let _ = writeln!(xml, "    </ImageLoader>");
    let _ = writeln!(xml, "    <ViewSetups>");
    for (setup, [z, y, x]) in setups {
        let _ = writeln!(xml, "      <ViewSetup>");
        let _ = writeln!(xml, "        <id>{setup}</id>");
        let _ = writeln!(xml, "        <name>channel {setup}</name>");
        let _ = writeln!(xml, "        <size>{x} {y} {z}</size>");
        let _ = writeln!(xml, "        <voxelSize>");
        let _ = writeln!(xml, "          <unit>micron</unit>");
        let _ = writeln!(xml, "          <size>{vx} {vy} {vz}</size>");
        let _ = writeln!(xml, "        </voxelSize>");
        let _ = writeln!(xml, "        <attributes>");
        let _ = writeln!(xml, "          <channel>{setup}</channel>");
        let _ = writeln!(xml, "        </attributes>");
        let _ = writeln!(xml, "      </ViewSetup>");
    }
    let _ = writeln!(xml, "    </ViewSetups>");
    let _ = writeln!(xml, r#"    <Timepoints type="list">"#);
    let list: Vec<String> = timepoints.iter().map(ToString::to_string).collect();
    let _ = writeln!(xml, "      <integerpattern>{}</integerpattern>", list.join(" "));
    let _ = writeln!(xml, "    </Timepoints>");
    let _ = writeln!(xml, "  </SequenceDescription>");
    let _ = writeln!(xml, "  <ViewRegistrations>");
    for t in timepoints {
        for setup in setups.keys() {
            let _ = writeln!(
                xml,
                r#"    <ViewRegistration timepoint="{t}" setup="{setup}">"#
            );
            let _ = writeln!(xml, r#"      <ViewTransform type="affine">"#);
            let _ = writeln!(xml, "        <Name>calibration</Name>");
            let _ = writeln!(
                xml,
                "        <affine>{vx} 0.0 0.0 0.0 0.0 {vy} 0.0 0.0 0.0 0.0 {vz} 0.0</affine>"
            );
            let _ = writeln!(xml, "      </ViewTransform>");
            let _ = writeln!(xml, "    </ViewRegistration>");
        }
    }
    let _ = writeln!(xml, "  </ViewRegistrations>");
    let _ = writeln!(xml, "</SpimData>");
    xml
}

impl BdvWriter {
    /// New writer.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::Configuration`] when this build has no
    /// HDF5 support.
    pub fn new(settings: WriterSettings) -> Result<Self, LatticeError> {
        if cfg!(not(feature = "hdf5")) {
            return Err(LatticeError::Configuration(
                "h5 output requires lls-core to be built with the `hdf5` feature".to_owned(),
            ));
        }
        Ok(Self {
            settings,
            files: BTreeMap::new(),
        })
    }

    fn h5_path(&self, roi: Option<usize>) -> PathBuf {
        self.settings
            .save_dir
            .join(format!("{}.h5", file_stem(&self.settings.save_name, roi)))
    }

    #[cfg(feature = "hdf5")]
    fn store(path: &Path, file: &mut BdvFile, slice: &ProcessedSlice<Array3<f32>>) -> Result<(), LatticeError> {
        if file.handle.is_none() {
            file.handle = Some(hdf5::File::create(path)?);
        }
        let Some(handle) = file.handle.as_ref() else {
            return Ok(());
        };
        let setup = format!("s{:02}", slice.channel);
        if !file.setups.contains_key(&slice.channel) {
            let group = handle.create_group(&setup)?;
            group
                .new_dataset_builder()
                .with_data(&ndarray::arr2(&[[1.0_f64, 1.0, 1.0]]))
                .create("resolutions")?;
            let (z, y, x) = slice.data.dim();
            let chunks = [x.min(64), y.min(64), z.min(64)].map(|c| i32::try_from(c).unwrap_or(64));
            group
                .new_dataset_builder()
                .with_data(&ndarray::arr2(&[chunks]))
                .create("subdivisions")?;
        }
        let time_group = format!("t{:05}", slice.time);
        let timepoint = if handle.link_exists(&time_group) {
            handle.group(&time_group)?
        } else {
            handle.create_group(&time_group)?
        };
        let level = timepoint.create_group(&setup)?.create_group("0")?;
        level.new_dataset_builder().with_data(&slice.data).create("cells")?;
        Ok(())
    }

    #[cfg(not(feature = "hdf5"))]
    fn store(_path: &Path, _file: &mut BdvFile, _slice: &ProcessedSlice<Array3<f32>>) -> Result<(), LatticeError> {
        Err(LatticeError::Configuration(
            "h5 output requires lls-core to be built with the `hdf5` feature".to_owned(),
        ))
    }
}

impl ImageWriter for BdvWriter {
    fn write_slice(&mut self, slice: &ProcessedSlice<Array3<f32>>) -> Result<(), LatticeError> {
        let path = self.h5_path(slice.roi_index);
        let file = self.files.entry(slice.roi_index).or_default();
        Self::store(&path, file, slice)?;
        let (z, y, x) = slice.data.dim();
        file.timepoints.insert(slice.time);
        file.setups.insert(slice.channel, ViewInfo { shape: [z, y, x] });
        log::debug!(
            "Stored time {} channel {} in {}",
            slice.time,
            slice.channel,
            path.display()
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>, LatticeError> {
        let mut written = Vec::new();
        for (roi, file) in std::mem::take(&mut self.files) {
            let h5 = self.h5_path(roi);
            let h5_name = h5
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let setups = file.setups.iter().map(|(k, v)| (*k, v.shape)).collect();
            let xml = bdv_xml(&h5_name, &file.timepoints, &setups, self.settings.voxel_size);
            let xml_path = h5.with_extension("xml");
            std::fs::write(&xml_path, xml)?;
            log::info!("Wrote {} and {}", h5.display(), xml_path.display());
            written.push(h5);
            written.push(xml_path);
        }
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn xml_lists_setups_and_timepoints() {
        let timepoints: BTreeSet<usize> = [0, 1].into_iter().collect();
        let setups: BTreeMap<usize, [usize; 3]> = [(0, [3, 14, 5]), (1, [3, 14, 5])].into_iter().collect();
        let xml = bdv_xml("cells.h5", &timepoints, &setups, [0.15, 0.15, 0.15]);
        assert!(xml.contains(r#"<hdf5 type="relative">cells.h5</hdf5>"#));
        assert!(xml.contains("<size>5 14 3</size>"));
        assert!(bdv_xml("a&b.h5", &timepoints, &setups, [1.0; 3]).contains("a&amp;b.h5"));
        assert!(xml.contains("<integerpattern>0 1</integerpattern>"));
        assert_eq!(xml.matches("<ViewRegistration ").count(), 4);
    }

    #[test]
    fn file_names_are_escaped_once() {
        assert!(matches!(xml_text("cells.h5"), Cow::Borrowed("cells.h5")));
        assert_eq!(xml_text("a<b>&c.h5"), "a&lt;b&gt;&amp;c.h5");
        assert_eq!(xml_text("&lt;.h5"), "&amp;lt;.h5");
    }

    #[test]
    fn roi_files_are_named_per_roi() {
        assert_eq!(file_stem("out", None), "out");
        assert_eq!(file_stem("out", Some(2)), "out_ROI2");
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn unavailable_without_hdf5() {
        let result = BdvWriter::new(WriterSettings {
            save_dir: PathBuf::from("."),
            save_name: "x".to_owned(),
            voxel_size: [1.0, 1.0, 1.0],
        });
        assert!(matches!(result, Err(LatticeError::Configuration(_))));
    }
}
