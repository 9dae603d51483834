//! Error types shared across the crate.
//!
//! Validation failures are collected into a single [`ValidationError`]
//! so the caller sees every offending field at once. Everything that can
//! go wrong after validation (kernels, file I/O, workflow execution) is a
//! [`LatticeError`].

use std::fmt;
use std::path::PathBuf;

/// One violated invariant, tagged with the field it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted field path, e.g. `crop.z_range`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl FieldError {
    /// Create a new field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Aggregate of every field that failed validation.
///
/// Never empty when returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    errors: Vec<FieldError>,
}

impl ValidationError {
    /// Wrap a list of field errors.
    #[must_use]
    pub const fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// All recorded field errors, in validation order.
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Returns `true` if any entry is tagged with `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Messages recorded for `field`.
    pub fn messages_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        write!(
            f,
            "{count} validation error{}",
            if count == 1 { "" } else { "s" }
        )?;
        for error in &self.errors {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Failures reported by the numerical collaborators.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The requested backend cannot run in this build or on this machine.
    #[error("{0} backend is not available")]
    BackendUnavailable(&'static str),

    /// The kernel was handed inputs it cannot work with.
    #[error("invalid kernel input: {0}")]
    InvalidInput(String),
}

/// Failures while building or executing a workflow graph.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A task or input name was requested that the graph does not define.
    #[error("workflow has no task named `{0}`")]
    UnknownTask(String),

    /// The task graph contains a cycle through the named task.
    #[error("workflow contains a cycle involving `{0}`")]
    Cycle(String),

    /// A workflow file referenced a function the registry does not know.
    #[error("unknown workflow function `{0}`")]
    UnknownFunction(String),

    /// A task function received arguments it cannot handle.
    #[error("task `{task}`: {message}")]
    BadArguments {
        /// Function name.
        task: String,
        /// What was wrong.
        message: String,
    },

    /// The workflow definition file is malformed.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    /// A task computing pipeline output failed.
    #[error("pipeline step failed: {0}")]
    Pipeline(String),
}

/// Errors that can occur while processing or saving a lattice.
#[derive(Debug, thiserror::Error)]
pub enum LatticeError {
    /// The configuration failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A truncated volume could not be padded back to its expected shape.
    #[error("volume shape {actual:?} cannot be padded to expected shape {expected:?}")]
    ShapeMismatch {
        /// Shape the volume should have had (Z, Y, X).
        expected: [usize; 3],
        /// Shape that was actually read (Z, Y, X).
        actual: [usize; 3],
    },

    /// An enum value or backend selection that this build does not support.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A numerical kernel failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// A workflow graph failed to evaluate.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// A region of interest file could not be parsed.
    #[error("failed to read ROI from {path}: {message}")]
    Roi {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding failure.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// `.npy` decoding failure.
    #[error("NPY error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    /// CSV encoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An array could not be reshaped or sliced as requested.
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// HDF5 failure while writing BDV output.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let err = ValidationError::new(vec![
            FieldError::new("time_range", "too long"),
            FieldError::new("deconvolution", "wrong psf count"),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 validation errors"));
        assert!(text.contains("time_range: too long"));
        assert!(text.contains("deconvolution: wrong psf count"));
    }

    #[test]
    fn validation_error_singular_wording() {
        let err = ValidationError::new(vec![FieldError::new("angle", "bad")]);
        assert!(err.to_string().starts_with("1 validation error\n"));
    }

    #[test]
    fn has_field_and_messages() {
        let err = ValidationError::new(vec![
            FieldError::new("a", "one"),
            FieldError::new("b", "two"),
            FieldError::new("a", "three"),
        ]);
        assert!(err.has_field("a"));
        assert!(!err.has_field("c"));
        let msgs: Vec<&str> = err.messages_for("a").collect();
        assert_eq!(msgs, vec!["one", "three"]);
    }

    #[test]
    fn shape_mismatch_display() {
        let err = LatticeError::ShapeMismatch {
            expected: [2, 3, 4],
            actual: [3, 3, 4],
        };
        assert_eq!(
            err.to_string(),
            "volume shape [3, 3, 4] cannot be padded to expected shape [2, 3, 4]",
        );
    }

    #[test]
    fn backend_unavailable_display() {
        let err = KernelError::BackendUnavailable("GPU deconvolution");
        assert_eq!(err.to_string(), "GPU deconvolution backend is not available");
    }
}
