use fuse_blas::BlasError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dot dimension mismatch: [{m}x{k}] . [{k2}x{n}]")]
    DotMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("unsupported rank {rank} for {op}")]
    RankMismatch { op: &'static str, rank: usize },
    #[error("allocation of {bytes} bytes aligned to {align} failed")]
    AllocFailed { bytes: usize, align: usize },
    #[error("blas call failed: {0}")]
    Backend(#[from] BlasError),
    #[error("no blas backend configured for {0}")]
    BackendUnavailable(String),
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("unsupported dot: {0}")]
    UnsupportedDot(String),
    #[error("saver {saver} is not supported on the {path} path")]
    UnsupportedSaver {
        saver: &'static str,
        path: &'static str,
    },
    #[error("dot product must be the root of an assignment")]
    ComplexSubexpression,
    #[error("destination overlaps dot operand {0}")]
    AliasedOperands(&'static str),
    #[error("index {index} out of bounds for dimension {dim} of size {len}")]
    IndexOutOfBounds { index: usize, dim: usize, len: usize },
    #[error("tensor is not contiguous: stride {stride}, last dimension {cols}")]
    NotContiguous { stride: usize, cols: usize },
    #[error("tensor has no data")]
    NullData,
}

/// Broad failure class of a [`TensorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Shape,
    Alloc,
    Backend,
    Usage,
}

impl TensorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TensorError::ShapeMismatch { .. }
            | TensorError::DotMismatch { .. }
            | TensorError::RankMismatch { .. } => ErrorKind::Shape,
            TensorError::AllocFailed { .. } => ErrorKind::Alloc,
            TensorError::Backend(_) | TensorError::BackendUnavailable(_) => ErrorKind::Backend,
            _ => ErrorKind::Usage,
        }
    }

    /// Process exit status used when the error aborts the program.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Shape => 2,
            ErrorKind::Alloc => 3,
            ErrorKind::Backend => 4,
            ErrorKind::Usage => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;
