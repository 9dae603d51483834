//! Physical voxel geometry of the microscope.

use serde::{Deserialize, Serialize};

/// Physical pixel sizes in microns along X, Y and Z.
///
/// Every component is finite and strictly positive; the only way to get
/// one is through [`PixelGeometry::new`] or `TryFrom<PixelSizes>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGeometry {
    x: f64,
    y: f64,
    z: f64,
}

impl PixelGeometry {
    /// Default lateral pixel size of the Zeiss lattice light-sheet.
    pub const DEFAULT_XY: f64 = 0.149_921_927_280_838_6;

    /// Default stage step between raw Z planes.
    pub const DEFAULT_Z: f64 = 0.3;

    /// Build a geometry, rejecting non-finite or non-positive sizes.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first offending axis.
    pub fn new(x: f64, y: f64, z: f64) -> Result<Self, String> {
        for (axis, value) in [("X", x), ("Y", y), ("Z", z)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!(
                    "pixel size {axis} must be a finite positive number, got {value}"
                ));
            }
        }
        Ok(Self { x, y, z })
    }

    /// Pixel size along X.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.x
    }

    /// Pixel size along Y.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.y
    }

    /// Pixel size along Z (the raw stage step).
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.z
    }

    /// `(X, Y, Z)` tuple.
    #[must_use]
    pub const fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

impl Default for PixelGeometry {
    fn default() -> Self {
        Self {
            x: Self::DEFAULT_XY,
            y: Self::DEFAULT_XY,
            z: Self::DEFAULT_Z,
        }
    }
}

impl TryFrom<(f64, f64, f64)> for PixelGeometry {
    type Error = String;

    fn try_from((x, y, z): (f64, f64, f64)) -> Result<Self, Self::Error> {
        Self::new(x, y, z)
    }
}

/// Pixel sizes as written in a configuration, not yet checked.
///
/// Deserializes from either `[x, y, z]` or `{"X": .., "Y": .., "Z": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PixelSizesRepr", into = "PixelSizesRepr")]
pub struct PixelSizes {
    /// Size along X.
    pub x: f64,
    /// Size along Y.
    pub y: f64,
    /// Size along Z.
    pub z: f64,
}

impl Default for PixelSizes {
    fn default() -> Self {
        PixelGeometry::default().into()
    }
}

impl From<PixelGeometry> for PixelSizes {
    fn from(p: PixelGeometry) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

impl TryFrom<PixelSizes> for PixelGeometry {
    type Error = String;

    fn try_from(sizes: PixelSizes) -> Result<Self, Self::Error> {
        Self::new(sizes.x, sizes.y, sizes.z)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PixelSizesRepr {
    Tuple([f64; 3]),
    Named {
        #[serde(rename = "X")]
        x: f64,
        #[serde(rename = "Y")]
        y: f64,
        #[serde(rename = "Z")]
        z: f64,
    },
}

impl From<PixelSizesRepr> for PixelSizes {
    fn from(repr: PixelSizesRepr) -> Self {
        match repr {
            PixelSizesRepr::Tuple([x, y, z]) | PixelSizesRepr::Named { x, y, z } => {
                Self { x, y, z }
            }
        }
    }
}

impl From<PixelSizes> for PixelSizesRepr {
    fn from(p: PixelSizes) -> Self {
        Self::Named {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}
