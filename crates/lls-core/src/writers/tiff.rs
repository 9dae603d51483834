//! One multi-page float32 TIFF per slice.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use ndarray::Array3;
use tiff::encoder::{Rational, TiffEncoder, colortype};
use tiff::tags::{ResolutionUnit, Tag};

use super::{ImageWriter, WriterSettings, slice_stem};
use crate::error::LatticeError;
use crate::results::ProcessedSlice;

/// Writes `{name}[_ROI{r}]_C{c}T{t}.tif` for every slice.
#[derive(Debug)]
pub struct TiffWriter {
    settings: WriterSettings,
    written: Vec<PathBuf>,
}

impl TiffWriter {
    /// New writer; the directory must already exist.
    #[must_use]
    pub const fn new(settings: WriterSettings) -> Self {
        Self {
            settings,
            written: Vec::new(),
        }
    }

    fn description(&self, planes: usize) -> String {
        format!(
            "ImageJ=1.11a\nimages={planes}\nslices={planes}\nunit=micron\nspacing={}\nloop=false\n",
            self.settings.voxel_size[2]
        )
    }
}

/// Pixels per micron as a TIFF rational.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn resolution(pixel_size: f64) -> Rational {
    const DENOMINATOR: u32 = 10_000;
    Rational {
        n: (f64::from(DENOMINATOR) / pixel_size).round() as u32,
        d: DENOMINATOR,
    }
}

/// Write `volume` as a Z series of float32 pages.
///
/// # Errors
///
/// Propagates I/O and encoder failures.
pub fn write_volume(
    path: &std::path::Path,
    volume: &Array3<f32>,
    description: &str,
    voxel_size: [f64; 3],
) -> Result<(), LatticeError> {
    let (_, height, width) = volume.dim();
    let height = u32::try_from(height)
        .map_err(|_| LatticeError::Configuration(format!("image height {height} is too large for TIFF")))?;
    let width = u32::try_from(width)
        .map_err(|_| LatticeError::Configuration(format!("image width {width} is too large for TIFF")))?;

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    for (z, plane) in volume.outer_iter().enumerate() {
        let mut image = encoder.new_image::<colortype::Gray32Float>(width, height)?;
        if z == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description)?;
        }
        image.resolution_unit(ResolutionUnit::None);
        image.x_resolution(resolution(voxel_size[0]));
        image.y_resolution(resolution(voxel_size[1]));
        let data: Vec<f32> = plane.iter().copied().collect();
        image.write_data(&data)?;
    }
    Ok(())
}

impl ImageWriter for TiffWriter {
    fn write_slice(&mut self, slice: &ProcessedSlice<Array3<f32>>) -> Result<(), LatticeError> {
        let path = self
            .settings
            .save_dir
            .join(format!("{}.tif", slice_stem(&self.settings.save_name, slice)));
        let description = self.description(slice.data.dim().0);
        write_volume(&path, &slice.data, &description, self.settings.voxel_size)?;
        log::info!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>, LatticeError> {
        Ok(std::mem::take(&mut self.written))
    }
}
