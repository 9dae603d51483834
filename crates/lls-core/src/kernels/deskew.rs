//! Reference deskew by inverse affine mapping.

use ndarray::Array3;

use super::{CropDeskewRequest, DeskewKernel, Interpolation, deconvolve};
use crate::deskew::{DeskewDirection, DeskewGeometry, deskewed_geometry};
use crate::error::{KernelError, LatticeError};
use crate::pixel::PixelGeometry;

/// CPU deskew: every output voxel is pulled back through the inverse of
/// the deskew transform and sampled from the raw volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineDeskew;

#[allow(clippy::cast_possible_truncation)]
fn sample(volume: &Array3<f32>, [x, y, z]: [f64; 3], interpolation: Interpolation) -> f32 {
    let (nz, ny, nx) = volume.dim();
    let at = |zi: i64, yi: i64, xi: i64| -> f32 {
        if zi < 0 || yi < 0 || xi < 0 {
            return 0.0;
        }
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let (zi, yi, xi) = (zi as usize, yi as usize, xi as usize);
        if zi >= nz || yi >= ny || xi >= nx {
            0.0
        } else {
            volume[[zi, yi, xi]]
        }
    };

    match interpolation {
        Interpolation::Nearest => at(z.round() as i64, y.round() as i64, x.round() as i64),
        Interpolation::Linear => {
            let (z0, y0, x0) = (z.floor(), y.floor(), x.floor());
            let (fz, fy, fx) = (z - z0, y - y0, x - x0);
            let (z0, y0, x0) = (z0 as i64, y0 as i64, x0 as i64);
            let mut acc = 0.0_f64;
            for (dz, wz) in [(0, 1.0 - fz), (1, fz)] {
                for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
                    for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
                        let w = wz * wy * wx;
                        if w > 0.0 {
                            acc += w * f64::from(at(z0 + dz, y0 + dy, x0 + dx));
                        }
                    }
                }
            }
            acc as f32
        }
    }
}

/// Resample `volume` into `geometry.shape`, starting at `offset` (Z, Y, X)
/// of the full output grid and covering `extent` voxels.
fn warp_region(
    volume: &Array3<f32>,
    geometry: &DeskewGeometry,
    offset: [usize; 3],
    extent: [usize; 3],
    interpolation: Interpolation,
) -> Result<Array3<f32>, KernelError> {
    let inverse = geometry
        .transform
        .inverse()
        .ok_or_else(|| KernelError::InvalidInput("deskew transform is singular".to_owned()))?;
    #[allow(clippy::cast_precision_loss)]
    let out = Array3::from_shape_fn((extent[0], extent[1], extent[2]), |(z, y, x)| {
        let point = [
            (x + offset[2]) as f64,
            (y + offset[1]) as f64,
            (z + offset[0]) as f64,
        ];
        sample(volume, inverse.apply(point), interpolation)
    });
    Ok(out)
}

/// Deskew `volume` into the full output grid described by `geometry`.
///
/// # Errors
///
/// Fails if the geometry's transform is singular.
pub fn warp(
    volume: &Array3<f32>,
    geometry: &DeskewGeometry,
    interpolation: Interpolation,
) -> Result<Array3<f32>, KernelError> {
    warp_region(volume, geometry, [0, 0, 0], geometry.shape, interpolation)
}

fn deskew(
    volume: &Array3<f32>,
    angle: f64,
    interpolation: Interpolation,
    pixels: PixelGeometry,
    skew: DeskewDirection,
) -> Result<Array3<f32>, KernelError> {
    if volume.is_empty() {
        return Err(KernelError::InvalidInput("cannot deskew an empty volume".to_owned()));
    }
    let (z, y, x) = volume.dim();
    let geometry = deskewed_geometry([z, y, x], angle, pixels, skew);
    warp(volume, &geometry, interpolation)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_index(value: f64, len: usize) -> usize {
    if value <= 0.0 {
        0
    } else {
        (value as usize).min(len)
    }
}

impl DeskewKernel for AffineDeskew {
    fn deskew_y(
        &self,
        volume: &Array3<f32>,
        angle: f64,
        interpolation: Interpolation,
        pixels: PixelGeometry,
    ) -> Result<Array3<f32>, KernelError> {
        deskew(volume, angle, interpolation, pixels, DeskewDirection::Y)
    }

    fn deskew_x(
        &self,
        volume: &Array3<f32>,
        angle: f64,
        interpolation: Interpolation,
        pixels: PixelGeometry,
    ) -> Result<Array3<f32>, KernelError> {
        deskew(volume, angle, interpolation, pixels, DeskewDirection::X)
    }

    fn crop_volume_deskew(&self, request: CropDeskewRequest<'_>) -> Result<Array3<f32>, LatticeError> {
        let mut raw = request.volume.materialize()?;
        if let Some(decon) = request.deconvolution {
            raw = deconvolve(
                decon.deconvolver,
                decon.processing,
                &raw,
                decon.psf,
                decon.num_iter,
                decon.background,
                request.pixels,
            )?;
        }

        let geometry = DeskewGeometry {
            shape: request.deskew_vol_shape,
            transform: *request.deskew_affine_transform,
        };

        let [depth, height, width] = geometry.shape;
        let bounds = request.roi.bounds();
        let z0 = request.z_start.min(depth);
        let z1 = request.z_end.min(depth);
        let r0 = clamp_index(bounds.min_row.floor(), height);
        let r1 = clamp_index(bounds.max_row.ceil(), height);
        let c0 = clamp_index(bounds.min_col.floor(), width);
        let c1 = clamp_index(bounds.max_col.ceil(), width);
        if z0 >= z1 || r0 >= r1 || c0 >= c1 {
            return Err(KernelError::InvalidInput(format!(
                "crop region z {z0}..{z1}, rows {r0}..{r1}, cols {c0}..{c1} is empty inside deskewed shape {:?}",
                geometry.shape
            ))
            .into());
        }

        Ok(warp_region(
            &raw,
            &geometry,
            [z0, r0, c0],
            [z1 - z0, r1 - r0, c1 - c0],
            request.interpolation,
        )?)
    }
}
