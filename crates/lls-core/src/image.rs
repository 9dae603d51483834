//! Canonical 5-D image model.
//!
//! Whatever the user hands in (a 3-D stack, a 4-D time series, a full
//! hyperstack, or a lazily read file) is normalized into a
//! [`LatticeImage`] whose axes are always `T, C, Z, Y, X`.
//!
//! Pixel data may live in memory or behind a [`VolumeSource`] that reads
//! one `(time, channel)` volume on demand. Slices of a lazy image are
//! [`Volume::Pending`] handles until [`Volume::materialize`] is called.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array3, Array5, ArrayD, Axis as NdAxis, Ix5, s};

use crate::error::LatticeError;

/// Named image axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    /// Time.
    T,
    /// Channel.
    C,
    /// Raw stage position.
    Z,
    /// Rows.
    Y,
    /// Columns.
    X,
}

impl Axis {
    /// Canonical axis order.
    pub const CANONICAL: [Self; 5] = [Self::T, Self::C, Self::Z, Self::Y, Self::X];

    /// Parse a single axis letter (case-insensitive).
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'T' => Some(Self::T),
            'C' => Some(Self::C),
            'Z' => Some(Self::Z),
            'Y' => Some(Self::Y),
            'X' => Some(Self::X),
            _ => None,
        }
    }

    const fn canonical_index(self) -> usize {
        match self {
            Self::T => 0,
            Self::C => 1,
            Self::Z => 2,
            Self::Y => 3,
            Self::X => 4,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::T => "T",
            Self::C => "C",
            Self::Z => "Z",
            Self::Y => "Y",
            Self::X => "X",
        };
        f.write_str(c)
    }
}

/// An in-memory array with one named axis per dimension.
#[derive(Debug, Clone)]
pub struct LabeledArray {
    data: ArrayD<f32>,
    dims: Vec<Axis>,
}

impl LabeledArray {
    /// Attach axis names to an array.
    ///
    /// # Errors
    ///
    /// Fails if the number of names differs from the array rank or a name
    /// is repeated.
    pub fn new(data: ArrayD<f32>, dims: Vec<Axis>) -> Result<Self, String> {
        if data.ndim() != dims.len() {
            return Err(format!(
                "array has {} dimensions but {} axis names were given",
                data.ndim(),
                dims.len()
            ));
        }
        for (i, axis) in dims.iter().enumerate() {
            if dims[..i].contains(axis) {
                return Err(format!("axis {axis} appears more than once"));
            }
        }
        Ok(Self { data, dims })
    }

    /// Label an unlabeled array with the trailing axes of `TCZYX`.
    ///
    /// A 3-D array becomes `ZYX`, 4-D becomes `CZYX`, 5-D `TCZYX`.
    ///
    /// # Errors
    ///
    /// Fails for arrays with fewer than 3 or more than 5 dimensions.
    pub fn from_unlabeled(data: ArrayD<f32>) -> Result<Self, String> {
        let ndim = data.ndim();
        if !(3..=5).contains(&ndim) {
            return Err(format!(
                "expected a 3-5 dimensional array, got {ndim} dimensions"
            ));
        }
        let dims = Axis::CANONICAL[5 - ndim..].to_vec();
        Self::new(data, dims)
    }

    /// Axis names in storage order.
    #[must_use]
    pub fn dims(&self) -> &[Axis] {
        &self.dims
    }

    /// Underlying array.
    #[must_use]
    pub const fn data(&self) -> &ArrayD<f32> {
        &self.data
    }
}

/// A source of pixel data that reads one 3-D volume at a time.
///
/// Implementations are shared read-only across every slice access, so
/// they must be safe to call from any thread.
pub trait VolumeSource: fmt::Debug + Send + Sync {
    /// Full `TCZYX` shape of the data.
    fn shape(&self) -> [usize; 5];

    /// Read the `(Z, Y, X)` volume at `time`, `channel`.
    ///
    /// The returned array may be smaller than the declared shape when the
    /// acquisition was cut short; callers pad it (see
    /// [`Volume::materialize`]).
    ///
    /// # Errors
    ///
    /// Propagates whatever the backing store reports.
    fn read_volume(&self, time: usize, channel: usize) -> Result<Array3<f32>, LatticeError>;
}

#[derive(Debug, Clone)]
enum Backing {
    Memory(Arc<Array5<f32>>),
    Lazy(Arc<dyn VolumeSource>),
}

/// Normalized 5-D image with axes `T, C, Z, Y, X`.
///
/// Cheap to clone: pixel storage is reference counted.
#[derive(Debug, Clone)]
pub struct LatticeImage {
    backing: Backing,
    shape: [usize; 5],
}

impl LatticeImage {
    /// Normalize a labeled array into canonical order.
    ///
    /// Missing `T` and `C` axes are inserted with length 1.
    ///
    /// # Errors
    ///
    /// Fails if any of `X`, `Y`, `Z` is missing.
    pub fn from_labeled(array: LabeledArray) -> Result<Self, String> {
        let LabeledArray { mut data, mut dims } = array;
        let missing: Vec<String> = [Axis::Z, Axis::Y, Axis::X]
            .into_iter()
            .filter(|a| !dims.contains(a))
            .map(|a| a.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "the input array must at least have XYZ axes, missing {}",
                missing.join(", ")
            ));
        }
        for axis in [Axis::C, Axis::T] {
            if !dims.contains(&axis) {
                data = data.insert_axis(NdAxis(0));
                dims.insert(0, axis);
            }
        }
        let order: Vec<usize> = Axis::CANONICAL
            .iter()
            .filter_map(|axis| dims.iter().position(|d| d == axis))
            .collect();
        let data = data
            .permuted_axes(order)
            .as_standard_layout()
            .into_owned()
            .into_dimensionality::<Ix5>()
            .map_err(|e| e.to_string())?;
        Ok(Self::from_array5(data))
    }

    /// Wrap an array that is already in `TCZYX` order.
    #[must_use]
    pub fn from_array5(data: Array5<f32>) -> Self {
        let (t, c, z, y, x) = data.dim();
        Self {
            backing: Backing::Memory(Arc::new(data)),
            shape: [t, c, z, y, x],
        }
    }

    /// Wrap a single 3-D volume as a one-timepoint, one-channel image.
    #[must_use]
    pub fn from_volume(volume: Volume) -> Self {
        match volume {
            Volume::Realized(data) => {
                Self::from_array5(data.insert_axis(NdAxis(0)).insert_axis(NdAxis(0)))
            }
            Volume::Pending(pending) => Self::from_source(Arc::new(pending)),
        }
    }

    /// Wrap a lazily read source.
    #[must_use]
    pub fn from_source(source: Arc<dyn VolumeSource>) -> Self {
        let shape = source.shape();
        Self {
            backing: Backing::Lazy(source),
            shape,
        }
    }

    /// `TCZYX` shape.
    #[must_use]
    pub const fn shape(&self) -> [usize; 5] {
        self.shape
    }

    /// Length of one axis.
    #[must_use]
    pub const fn size(&self, axis: Axis) -> usize {
        self.shape[axis.canonical_index()]
    }

    /// Axis names in storage order (always canonical).
    #[must_use]
    pub const fn dims(&self) -> [Axis; 5] {
        Axis::CANONICAL
    }

    /// `(Z, Y, X)` shape of one volume.
    #[must_use]
    pub const fn volume_shape(&self) -> [usize; 3] {
        [self.shape[2], self.shape[3], self.shape[4]]
    }

    /// Returns `true` when pixels are read on demand.
    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        matches!(self.backing, Backing::Lazy(_))
    }

    /// The 3-D volume at `time`, `channel`.
    ///
    /// In-memory images return [`Volume::Realized`]; lazy images return a
    /// [`Volume::Pending`] handle that has not touched the backing store.
    ///
    /// # Errors
    ///
    /// Fails if either index is out of range.
    pub fn volume(&self, time: usize, channel: usize) -> Result<Volume, String> {
        if time >= self.size(Axis::T) {
            return Err(format!(
                "time {time} is out of range for {} timepoints",
                self.size(Axis::T)
            ));
        }
        if channel >= self.size(Axis::C) {
            return Err(format!(
                "channel {channel} is out of range for {} channels",
                self.size(Axis::C)
            ));
        }
        Ok(match &self.backing {
            Backing::Memory(data) => {
                Volume::Realized(data.slice(s![time, channel, .., .., ..]).to_owned())
            }
            Backing::Lazy(source) => Volume::Pending(PendingVolume {
                source: Arc::clone(source),
                time,
                channel,
                expected: self.volume_shape(),
            }),
        })
    }
}

/// A volume that has not been read yet.
#[derive(Debug, Clone)]
pub struct PendingVolume {
    source: Arc<dyn VolumeSource>,
    time: usize,
    channel: usize,
    expected: [usize; 3],
}

impl PendingVolume {
    /// Timepoint this handle reads.
    #[must_use]
    pub const fn time(&self) -> usize {
        self.time
    }

    /// Channel this handle reads.
    #[must_use]
    pub const fn channel(&self) -> usize {
        self.channel
    }
}

impl VolumeSource for PendingVolume {
    fn shape(&self) -> [usize; 5] {
        let [z, y, x] = self.expected;
        [1, 1, z, y, x]
    }

    fn read_volume(&self, time: usize, channel: usize) -> Result<Array3<f32>, LatticeError> {
        if time != 0 || channel != 0 {
            return Err(LatticeError::Configuration(format!(
                "single-volume image has no time {time} / channel {channel}"
            )));
        }
        Volume::Pending(self.clone()).materialize()
    }
}

/// One `(Z, Y, X)` volume, either already in memory or still on disk.
#[derive(Debug, Clone)]
pub enum Volume {
    /// Pixels are in memory.
    Realized(Array3<f32>),
    /// Pixels will be read by [`materialize`](Self::materialize).
    Pending(PendingVolume),
}

impl Volume {
    /// Expected `(Z, Y, X)` shape.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        match self {
            Self::Realized(data) => {
                let (z, y, x) = data.dim();
                [z, y, x]
            }
            Self::Pending(p) => p.expected,
        }
    }

    /// Returns `true` if the pixels still need reading.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Force the pixels into memory.
    ///
    /// A pending volume whose file turns out shorter than declared (an
    /// acquisition that was stopped early) is zero-padded on the trailing
    /// edge of each short axis.
    ///
    /// # Errors
    ///
    /// Propagates read failures, and returns
    /// [`LatticeError::ShapeMismatch`] if the data read is larger than the
    /// declared shape along any axis.
    pub fn materialize(self) -> Result<Array3<f32>, LatticeError> {
        match self {
            Self::Realized(data) => Ok(data),
            Self::Pending(p) => {
                let raw = p.source.read_volume(p.time, p.channel)?;
                let (z, y, x) = raw.dim();
                if [z, y, x] == p.expected {
                    return Ok(raw);
                }
                log::warn!(
                    "Time {}, channel {} is incomplete. Expected shape {:?}, got {:?}",
                    p.time,
                    p.channel,
                    p.expected,
                    [z, y, x]
                );
                pad_to_shape(raw, p.expected)
            }
        }
    }
}

/// Zero-pad the trailing edge of each axis of `volume` up to `expected`.
///
/// # Errors
///
/// Returns [`LatticeError::ShapeMismatch`] if `volume` is larger than
/// `expected` along any axis.
pub fn pad_to_shape(volume: Array3<f32>, expected: [usize; 3]) -> Result<Array3<f32>, LatticeError> {
    let (z, y, x) = volume.dim();
    let actual = [z, y, x];
    if actual == expected {
        return Ok(volume);
    }
    if actual.iter().zip(expected).any(|(&a, e)| a > e) {
        return Err(LatticeError::ShapeMismatch { expected, actual });
    }
    let diff: Vec<usize> = expected.iter().zip(actual).map(|(&e, a)| e - a).collect();
    log::info!("Padding with {diff:?}");
    let mut padded = Array3::<f32>::zeros((expected[0], expected[1], expected[2]));
    padded.slice_mut(s![..z, ..y, ..x]).assign(&volume);
    Ok(padded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ndarray::IxDyn;

    use super::*;

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f32> = (0..n).map(|i| i as f32).collect();
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn three_four_and_five_dims_normalize_to_the_same_shape() {
        let three = LabeledArray::from_unlabeled(ramp(&[4, 5, 6])).unwrap();
        let four = LabeledArray::from_unlabeled(ramp(&[1, 4, 5, 6])).unwrap();
        let five = LabeledArray::from_unlabeled(ramp(&[1, 1, 4, 5, 6])).unwrap();

        let a = LatticeImage::from_labeled(three).unwrap();
        let b = LatticeImage::from_labeled(four).unwrap();
        let c = LatticeImage::from_labeled(five).unwrap();
        assert_eq!(a.shape(), [1, 1, 4, 5, 6]);
        assert_eq!(a.shape(), b.shape());
        assert_eq!(b.shape(), c.shape());
    }

    #[test]
    fn missing_time_axis_is_inserted() {
        let arr = LabeledArray::new(ramp(&[2, 3, 4, 5]), vec![Axis::C, Axis::Z, Axis::Y, Axis::X])
            .unwrap();
        let img = LatticeImage::from_labeled(arr).unwrap();
        assert_eq!(img.shape(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn axes_are_transposed_into_canonical_order() {
        // XYZ storage order
        let arr = LabeledArray::new(ramp(&[6, 5, 4]), vec![Axis::X, Axis::Y, Axis::Z]).unwrap();
        let original = arr.data().clone();
        let img = LatticeImage::from_labeled(arr).unwrap();
        assert_eq!(img.shape(), [1, 1, 4, 5, 6]);
        let Volume::Realized(vol) = img.volume(0, 0).unwrap() else {
            unreachable!("in-memory image yields realized volumes");
        };
        assert!((vol[[3, 2, 1]] - original[[1, 2, 3]]).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_spatial_axis_is_rejected() {
        let arr = LabeledArray::new(ramp(&[2, 3, 4]), vec![Axis::T, Axis::Y, Axis::X]).unwrap();
        let err = LatticeImage::from_labeled(arr).unwrap_err();
        assert!(err.contains("XYZ"));
        assert!(err.contains('Z'));
    }

    #[test]
    fn duplicate_axis_names_are_rejected() {
        assert!(LabeledArray::new(ramp(&[2, 3, 4]), vec![Axis::Z, Axis::Z, Axis::X]).is_err());
    }

    #[test]
    fn rank_outside_three_to_five_is_rejected() {
        assert!(LabeledArray::from_unlabeled(ramp(&[2, 3])).is_err());
        assert!(LabeledArray::from_unlabeled(ramp(&[1, 1, 1, 2, 3, 4])).is_err());
    }

    #[test]
    fn volume_out_of_range() {
        let img = LatticeImage::from_array5(Array5::zeros((2, 3, 1, 1, 1)));
        assert!(img.volume(2, 0).is_err());
        assert!(img.volume(0, 3).is_err());
        assert!(img.volume(1, 2).is_ok());
    }

    #[derive(Debug)]
    struct Truncated {
        declared: [usize; 5],
        actual: [usize; 3],
        reads: AtomicUsize,
    }

    impl VolumeSource for Truncated {
        fn shape(&self) -> [usize; 5] {
            self.declared
        }

        fn read_volume(&self, _time: usize, _channel: usize) -> Result<Array3<f32>, LatticeError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let [z, y, x] = self.actual;
            Ok(Array3::from_elem((z, y, x), 1.0))
        }
    }

    #[test]
    fn pending_volume_is_not_read_until_materialized() {
        let source = Arc::new(Truncated {
            declared: [1, 1, 2, 2, 2],
            actual: [2, 2, 2],
            reads: AtomicUsize::new(0),
        });
        let img = LatticeImage::from_source(source.clone());
        let vol = img.volume(0, 0).unwrap();
        assert!(vol.is_pending());
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
        let data = vol.materialize().unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(data.dim(), (2, 2, 2));
    }

    #[test]
    fn truncated_volume_is_padded_on_trailing_edge() {
        let source = Arc::new(Truncated {
            declared: [1, 1, 4, 3, 2],
            actual: [2, 3, 2],
            reads: AtomicUsize::new(0),
        });
        let img = LatticeImage::from_source(source);
        let data = img.volume(0, 0).unwrap().materialize().unwrap();
        assert_eq!(data.dim(), (4, 3, 2));
        assert!((data[[1, 2, 1]] - 1.0).abs() < f32::EPSILON);
        assert!(data[[2, 0, 0]].abs() < f32::EPSILON);
        assert!(data[[3, 2, 1]].abs() < f32::EPSILON);
    }

    #[test]
    fn oversized_volume_is_fatal() {
        let err = pad_to_shape(Array3::zeros((3, 2, 2)), [2, 2, 2]).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::ShapeMismatch {
                expected: [2, 2, 2],
                actual: [3, 2, 2]
            }
        ));
    }

    #[test]
    fn single_volume_image_stays_lazy() {
        let source = Arc::new(Truncated {
            declared: [3, 2, 2, 2, 2],
            actual: [2, 2, 2],
            reads: AtomicUsize::new(0),
        });
        let img = LatticeImage::from_source(source.clone());
        let single = LatticeImage::from_volume(img.volume(2, 1).unwrap());
        assert!(single.is_lazy());
        assert_eq!(single.shape(), [1, 1, 2, 2, 2]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
        let data = single.volume(0, 0).unwrap().materialize().unwrap();
        assert_eq!(data.dim(), (2, 2, 2));
    }
}
