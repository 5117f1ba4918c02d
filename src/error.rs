//! Crate-wide error type.

use thiserror::Error;

use crate::psf::PsfFitStatus;

/// Errors raised by the astrometry core.
#[derive(Debug, Error)]
pub enum Error {
    /// An interpolation, projection or image geometry of zero extent.
    #[error("empty domain: {0}")]
    EmptyDomain(String),

    /// A surface spline received fewer than the required number of distinct nodes.
    #[error("insufficient nodes: {found} distinct nodes, at least {required} required")]
    InsufficientNodes { found: usize, required: usize },

    /// Paired inputs disagree in length or are otherwise incompatible.
    #[error("incompatible inputs: {0}")]
    IncompatibleInputs(String),

    /// A coordinate or parameter lies outside its declared range.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: f64 },

    /// The symmetric indefinite factorization hit a zero pivot block.
    #[error("singular surface spline system: zero pivot block at index {pivot}")]
    SplineSingularMatrix { pivot: usize },

    /// Image to celestial to image round trip exceeded the tolerance.
    #[error(
        "inconsistent astrometric solution: round-trip error ({dx:.6}, {dy:.6}) px exceeds {tolerance} px"
    )]
    InconsistentSolution { dx: f64, dy: f64, tolerance: f64 },

    /// A method requiring a built model was called on an empty instance.
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),

    /// Image dimensions disagree with the astrometric solution.
    #[error("dimensions mismatch: solution is {expected:?} px, image is {actual:?} px")]
    DimensionsMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Malformed XML header, WCS keyword block or serialized text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed database signature, version or offsets.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Unrecognized compression codec name.
    #[error("unsupported compression codec '{0}'")]
    UnsupportedCompression(String),

    /// A PSF fit did not produce a usable solution.
    #[error("PSF fit failed: {0:?}")]
    PsfFitFailed(PsfFitStatus),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
