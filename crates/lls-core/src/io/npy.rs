//! `.npy` arrays, read eagerly.

use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, read_npy};

use crate::error::LatticeError;

/// Read a float32 or uint16 `.npy` file as `f32`.
///
/// # Errors
///
/// Fails if the file cannot be read or holds another dtype.
pub fn read_npy_f32(path: &Path) -> Result<ArrayD<f32>, LatticeError> {
    match read_npy::<_, ArrayD<f32>>(path) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let array: ArrayD<u16> = read_npy(path)?;
            Ok(array.mapv(f32::from))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::{Array3, IxDyn};
    use ndarray_npy::write_npy;

    use super::*;

    #[test]
    fn reads_float_and_integer_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let floats = dir.path().join("f.npy");
        let ints = dir.path().join("u.npy");
        write_npy(&floats, &Array3::<f32>::from_elem((2, 3, 4), 1.5)).unwrap();
        write_npy(&ints, &Array3::<u16>::from_elem((2, 3, 4), 7)).unwrap();

        let a = read_npy_f32(&floats).unwrap();
        assert_eq!(a.shape(), &[2, 3, 4]);
        assert!((a[IxDyn(&[1, 2, 3])] - 1.5).abs() < f32::EPSILON);
        let b = read_npy_f32(&ints).unwrap();
        assert!((b[IxDyn(&[0, 0, 0])] - 7.0).abs() < f32::EPSILON);
    }

    #[test]
    fn other_dtypes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.npy");
        write_npy(&path, &Array3::<i64>::zeros((1, 1, 1))).unwrap();
        assert!(matches!(read_npy_f32(&path), Err(LatticeError::Npy(_))));
    }
}
