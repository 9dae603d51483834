//! Polygonal regions of interest.
//!
//! Vertices are stored as `(row, col)` pairs in the coordinate frame of
//! the deskewed maximum projection, which is where users draw them.
//! ImageJ `.roi` files are the supported on-disk format.

use std::path::{Path, PathBuf};

use geo::{Area, BoundingRect, Coord, LineString, Polygon};

use crate::error::LatticeError;

/// A closed polygon with at least three vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    vertices: Vec<[f64; 2]>,
}

/// Axis-aligned extent of a ROI, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiBounds {
    /// Smallest row coordinate.
    pub min_row: f64,
    /// Largest row coordinate.
    pub max_row: f64,
    /// Smallest column coordinate.
    pub min_col: f64,
    /// Largest column coordinate.
    pub max_col: f64,
}

impl Roi {
    /// Build a ROI from `(row, col)` vertices.
    ///
    /// # Errors
    ///
    /// Fails with fewer than three vertices or any non-finite coordinate.
    pub fn new(vertices: Vec<[f64; 2]>) -> Result<Self, String> {
        if vertices.len() < 3 {
            return Err(format!(
                "a region of interest needs at least 3 vertices, got {}",
                vertices.len()
            ));
        }
        if vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err("region of interest has non-finite coordinates".to_owned());
        }
        Ok(Self { vertices })
    }

    /// Vertices as `(row, col)` pairs.
    #[must_use]
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Polygon in `(x = col, y = row)` coordinates.
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        let ring: Vec<Coord<f64>> = self
            .vertices
            .iter()
            .map(|&[row, col]| Coord { x: col, y: row })
            .collect();
        Polygon::new(LineString::from(ring), Vec::new())
    }

    /// Enclosed area in square pixels.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.to_polygon().unsigned_area()
    }

    /// Axis-aligned bounding box.
    #[must_use]
    pub fn bounds(&self) -> RoiBounds {
        match self.to_polygon().bounding_rect() {
            Some(rect) => RoiBounds {
                min_row: rect.min().y,
                max_row: rect.max().y,
                min_col: rect.min().x,
                max_col: rect.max().x,
            },
            // unreachable for a polygon with vertices
            None => RoiBounds {
                min_row: 0.0,
                max_row: 0.0,
                min_col: 0.0,
                max_col: 0.0,
            },
        }
    }
}

impl TryFrom<Vec<[f64; 2]>> for Roi {
    type Error = String;

    fn try_from(vertices: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        Self::new(vertices)
    }
}

// ImageJ ROI type codes.
const TYPE_POLYGON: u8 = 0;
const TYPE_RECT: u8 = 1;
const TYPE_OVAL: u8 = 2;
const TYPE_FREEHAND: u8 = 7;
const TYPE_TRACED: u8 = 8;
const TYPE_POLYLINE: u8 = 5;
const TYPE_FREELINE: u8 = 4;

const HEADER_SIZE: usize = 64;
const SUB_PIXEL_RESOLUTION: u16 = 128;

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, String> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("file truncated at byte {offset}"))
}

fn read_i16(bytes: &[u8], offset: usize) -> Result<i16, String> {
    read_u16(bytes, offset).map(|v| i16::from_be_bytes(v.to_be_bytes()))
}

fn read_f32(bytes: &[u8], offset: usize) -> Result<f32, String> {
    bytes
        .get(offset..offset + 4)
        .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("file truncated at byte {offset}"))
}

/// Parse a single ImageJ `.roi` file.
///
/// Polygon-like types keep their vertices; rectangles and ovals become
/// their four bounding-box corners.
///
/// # Errors
///
/// Fails on a bad magic number, an unsupported ROI type, or a truncated
/// file.
pub fn parse_imagej_roi(bytes: &[u8]) -> Result<Roi, String> {
    if bytes.get(0..4) != Some(b"Iout".as_slice()) {
        return Err("not an ImageJ ROI file (missing `Iout` magic)".to_owned());
    }
    let version = read_u16(bytes, 4)?;
    let roi_type = *bytes.get(6).ok_or("file truncated at byte 6")?;
    let top = f64::from(read_i16(bytes, 8)?);
    let left = f64::from(read_i16(bytes, 10)?);
    let bottom = f64::from(read_i16(bytes, 12)?);
    let right = f64::from(read_i16(bytes, 14)?);
    let n = usize::from(read_u16(bytes, 16)?);
    let options = read_u16(bytes, 50)?;

    match roi_type {
        TYPE_RECT | TYPE_OVAL => Roi::new(vec![
            [top, left],
            [top, right],
            [bottom, right],
            [bottom, left],
        ]),
        TYPE_POLYGON | TYPE_FREEHAND | TYPE_TRACED | TYPE_POLYLINE | TYPE_FREELINE => {
            let sub_pixel = version >= 222 && options & SUB_PIXEL_RESOLUTION != 0;
            let mut vertices = Vec::with_capacity(n);
            for i in 0..n {
                let vertex = if sub_pixel {
                    let base = HEADER_SIZE + 4 * n;
                    let x = read_f32(bytes, base + 4 * i)?;
                    let y = read_f32(bytes, base + 4 * (n + i))?;
                    [f64::from(y), f64::from(x)]
                } else {
                    let x = f64::from(read_i16(bytes, HEADER_SIZE + 2 * i)?);
                    let y = f64::from(read_i16(bytes, HEADER_SIZE + 2 * (n + i))?);
                    [top + y, left + x]
                };
                vertices.push(vertex);
            }
            Roi::new(vertices)
        }
        other => Err(format!("unsupported ImageJ ROI type {other}")),
    }
}

/// Read every ROI from a `.roi` file, or from each `.roi` file in a
/// directory (sorted by file name).
///
/// # Errors
///
/// Returns [`LatticeError::Io`] for unreadable paths and
/// [`LatticeError::Roi`] for files that fail to parse.
pub fn read_imagej_roi(path: &Path) -> Result<Vec<Roi>, LatticeError> {
    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("roi")))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    files
        .into_iter()
        .map(|file| {
            let bytes = std::fs::read(&file)?;
            parse_imagej_roi(&bytes).map_err(|message| LatticeError::Roi {
                path: file.clone(),
                message,
            })
        })
        .collect()
}
