//! Lazily read multi-page TIFF stacks.
//!
//! ImageJ hyperstacks carry their layout in the `ImageDescription` tag
//! (`images=`, `channels=`, `slices=`, `frames=`) and store pages with
//! channel varying fastest, then Z, then time. Stacks without that
//! metadata are treated as a single Z series.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::error::LatticeError;
use crate::image::VolumeSource;

/// Hyperstack layout parsed from an ImageJ description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperstackLayout {
    /// Number of timepoints.
    pub frames: usize,
    /// Number of channels.
    pub channels: usize,
    /// Number of Z planes.
    pub slices: usize,
}

impl HyperstackLayout {
    /// Parse `key=value` lines of an ImageJ description.
    ///
    /// Returns `None` if the text is not an ImageJ description.
    #[must_use]
    pub fn parse(description: &str, pages: usize) -> Option<Self> {
        if !description.starts_with("ImageJ=") {
            return None;
        }
        let value = |key: &str| {
            description.lines().find_map(|line| {
                line.strip_prefix(key)
                    .and_then(|rest| rest.strip_prefix('='))
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
        };
        let channels = value("channels").unwrap_or(1).max(1);
        let frames = value("frames").unwrap_or(1).max(1);
        let slices = value("slices").unwrap_or_else(|| (pages / (channels * frames)).max(1));
        Some(Self {
            frames,
            channels,
            slices,
        })
    }
}

/// A TIFF file exposed as a `TCZYX` [`VolumeSource`].
///
/// Every [`read_volume`](VolumeSource::read_volume) reopens the file, so
/// the source holds no open handles and can be shared across threads.
#[derive(Debug, Clone)]
pub struct TiffStack {
    path: PathBuf,
    layout: HyperstackLayout,
    pages: usize,
    height: usize,
    width: usize,
}

fn open(path: &Path) -> Result<Decoder<BufReader<File>>, LatticeError> {
    Ok(Decoder::new(BufReader::new(File::open(path)?))?)
}

#[allow(clippy::cast_precision_loss)]
fn to_f32(result: DecodingResult) -> Result<Vec<f32>, LatticeError> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::F32(v) => v,
        #[allow(clippy::cast_possible_truncation)]
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(LatticeError::Configuration(
                "unsupported TIFF sample format".to_owned(),
            ));
        }
    })
}

impl TiffStack {
    /// Read the page count and layout without decoding pixel data.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or is not a TIFF.
    pub fn open(path: &Path) -> Result<Self, LatticeError> {
        let mut decoder = open(path)?;
        let (width, height) = decoder.dimensions()?;
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            pages += 1;
        }
        let layout = description
            .as_deref()
            .and_then(|d| HyperstackLayout::parse(d, pages))
            .unwrap_or(HyperstackLayout {
                frames: 1,
                channels: 1,
                slices: pages,
            });
        log::info!(
            "Opened {} with {pages} pages as {} timepoints, {} channels, {} slices",
            path.display(),
            layout.frames,
            layout.channels,
            layout.slices
        );
        Ok(Self {
            path: path.to_path_buf(),
            layout,
            pages,
            height: height as usize,
            width: width as usize,
        })
    }

    /// Parsed layout.
    #[must_use]
    pub const fn layout(&self) -> HyperstackLayout {
        self.layout
    }

    const fn page_index(&self, time: usize, z: usize, channel: usize) -> usize {
        let HyperstackLayout {
            channels, slices, ..
        } = self.layout;
        (time * slices + z) * channels + channel
    }
}

impl VolumeSource for TiffStack {
    fn shape(&self) -> [usize; 5] {
        [
            self.layout.frames,
            self.layout.channels,
            self.layout.slices,
            self.height,
            self.width,
        ]
    }

    /// Planes past the end of a truncated file are left out, so the
    /// returned volume can be shorter along Z than declared.
    fn read_volume(&self, time: usize, channel: usize) -> Result<Array3<f32>, LatticeError> {
        let mut decoder = open(&self.path)?;
        let mut data = Vec::with_capacity(self.layout.slices * self.height * self.width);
        let mut planes = 0;
        for z in 0..self.layout.slices {
            let index = self.page_index(time, z, channel);
            if index >= self.pages {
                break;
            }
            decoder.seek_to_image(index)?;
            let plane = to_f32(decoder.read_image()?)?;
            if plane.len() != self.height * self.width {
                return Err(LatticeError::Configuration(format!(
                    "page {index} of {} has {} samples, expected {}",
                    self.path.display(),
                    plane.len(),
                    self.height * self.width
                )));
            }
            data.extend(plane);
            planes += 1;
        }
        Ok(Array3::from_shape_vec((planes, self.height, self.width), data)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_hyperstack_description() {
        let text = "ImageJ=1.53t\nimages=24\nchannels=2\nslices=4\nframes=3\nhyperstack=true\n";
        let layout = HyperstackLayout::parse(text, 24).unwrap();
        assert_eq!(
            layout,
            HyperstackLayout {
                frames: 3,
                channels: 2,
                slices: 4
            }
        );
    }

    #[test]
    fn missing_slices_is_inferred_from_pages() {
        let layout = HyperstackLayout::parse("ImageJ=1.53t\nchannels=2\n", 10).unwrap();
        assert_eq!(layout.slices, 5);
    }

    #[test]
    fn other_descriptions_are_ignored() {
        assert!(HyperstackLayout::parse("written by something else", 10).is_none());
    }

    #[test]
    fn page_order_is_channel_fastest() {
        let stack = TiffStack {
            path: PathBuf::new(),
            layout: HyperstackLayout {
                frames: 2,
                channels: 3,
                slices: 4,
            },
            pages: 24,
            height: 1,
            width: 1,
        };
        assert_eq!(stack.page_index(0, 0, 2), 2);
        assert_eq!(stack.page_index(0, 1, 0), 3);
        assert_eq!(stack.page_index(1, 0, 0), 12);
    }
}
