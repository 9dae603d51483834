//! Deskew parameters and the geometry of the deskewed volume.
//!
//! The raw lattice volume is sheared: each Z plane is offset along the
//! scan axis by `dz * cos(angle)`. Deskewing undoes the shear, rescales Z
//! to the true plane spacing and rotates the result onto the coverslip.
//! [`deskewed_geometry`] derives the affine transform for that and the
//! smallest output shape that holds the whole transformed volume.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::affine::AffineTransform3D;
use crate::error::LatticeError;
use crate::image::{Axis, LatticeImage, Volume};
use crate::pixel::PixelGeometry;

/// Axis along which the raw data is sheared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeskewDirection {
    /// Shear along X.
    X,
    /// Shear along Y (the usual stage-scan direction).
    #[default]
    Y,
}

impl fmt::Display for DeskewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X => "X",
            Self::Y => "Y",
        })
    }
}

impl FromStr for DeskewDirection {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X" | "x" => Ok(Self::X),
            "Y" | "y" => Ok(Self::Y),
            other => Err(LatticeError::Configuration(format!(
                "unknown deskew direction `{other}`, expected X or Y"
            ))),
        }
    }
}

/// Output shape and transform of a deskew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeskewGeometry {
    /// `(Z, Y, X)` shape of the deskewed volume.
    pub shape: [usize; 3],
    /// Maps raw voxel coordinates `(x, y, z)` to output voxel coordinates.
    pub transform: AffineTransform3D,
}

/// Derive the deskewed volume shape and transform.
///
/// Depends only on the raw volume shape and acquisition geometry, never on
/// pixel values.
#[must_use]
pub fn deskewed_geometry(
    volume_shape: [usize; 3],
    angle: f64,
    pixels: PixelGeometry,
    skew: DeskewDirection,
) -> DeskewGeometry {
    let (dx, dy, dz) = pixels.as_tuple();
    let (sin, cos) = angle.to_radians().sin_cos();
    let new_dz = sin * dz;

    let transform = match skew {
        DeskewDirection::Y => AffineTransform3D::identity()
            .shear_y_by_z(cos * dz / dy)
            .scale(1.0, 1.0, new_dz / dy)
            .rotate_about_x(-angle),
        DeskewDirection::X => AffineTransform3D::identity()
            .shear_x_by_z(cos * dz / dx)
            .scale(1.0, 1.0, new_dz / dx)
            .rotate_about_y(angle),
    };

    #[allow(clippy::cast_precision_loss)]
    let [depth, height, width] = volume_shape.map(|n| n as f64);
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for x in [0.0, width] {
        for y in [0.0, height] {
            for z in [0.0, depth] {
                let p = transform.apply([x, y, z]);
                for i in 0..3 {
                    min[i] = min[i].min(p[i]);
                    max[i] = max[i].max(p[i]);
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let extent = |i: usize| ((max[i] - min[i]).ceil() as usize).max(1);
    DeskewGeometry {
        shape: [extent(2), extent(1), extent(0)],
        transform: transform.translate(-min[0], -min[1], -min[2]),
    }
}

/// Validated deskew parameters, attached to a normalized image.
#[derive(Debug, Clone)]
pub struct DeskewConfig {
    pub(crate) input_image: LatticeImage,
    pub(crate) skew: DeskewDirection,
    pub(crate) angle: f64,
    pub(crate) physical_pixel_sizes: PixelGeometry,
    pub(crate) geometry: DeskewGeometry,
}

impl DeskewConfig {
    /// Default skew angle in degrees.
    pub const DEFAULT_ANGLE: f64 = 30.0;

    /// The normalized `TCZYX` image.
    #[must_use]
    pub const fn input_image(&self) -> &LatticeImage {
        &self.input_image
    }

    /// Skew axis.
    #[must_use]
    pub const fn skew(&self) -> DeskewDirection {
        self.skew
    }

    /// Skew angle in degrees.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.angle
    }

    /// Physical pixel sizes.
    #[must_use]
    pub const fn physical_pixel_sizes(&self) -> PixelGeometry {
        self.physical_pixel_sizes
    }

    /// `(Z, Y, X)` shape of the deskewed volume.
    #[must_use]
    pub const fn deskew_vol_shape(&self) -> [usize; 3] {
        self.geometry.shape
    }

    /// Raw-to-deskewed voxel transform.
    #[must_use]
    pub const fn deskew_affine_transform(&self) -> &AffineTransform3D {
        &self.geometry.transform
    }

    /// Pixel size along X.
    #[must_use]
    pub const fn dx(&self) -> f64 {
        self.physical_pixel_sizes.x()
    }

    /// Pixel size along Y.
    #[must_use]
    pub const fn dy(&self) -> f64 {
        self.physical_pixel_sizes.y()
    }

    /// Raw stage step.
    #[must_use]
    pub const fn dz(&self) -> f64 {
        self.physical_pixel_sizes.z()
    }

    /// Z spacing after deskewing: `sin(angle) * dz`.
    #[must_use]
    pub fn new_dz(&self) -> f64 {
        self.angle.to_radians().sin() * self.dz()
    }

    /// Number of timepoints.
    #[must_use]
    pub const fn time(&self) -> usize {
        self.input_image.size(Axis::T)
    }

    /// Number of channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.input_image.size(Axis::C)
    }

    /// Axis names (always `TCZYX`).
    #[must_use]
    pub const fn dims(&self) -> [Axis; 5] {
        self.input_image.dims()
    }

    /// The first timepoint of the first channel.
    ///
    /// # Errors
    ///
    /// Only fails for an empty image, which validation rules out.
    pub fn get_3d_slice(&self) -> Result<Volume, String> {
        self.input_image.volume(0, 0)
    }
}
