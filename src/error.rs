//! Central error handling for the rangecast pipeline.
//!
//! Every fallible operation in the crate returns [`RangeResult`], so callers
//! see one tagged error type whether a failure came from argument validation,
//! buffer indexing, or the GPU backend.

/// Unified error type for all rangecast operations.
#[derive(thiserror::Error, Debug)]
pub enum RangeError {
    /// A caller-supplied argument is malformed: wrong buffer shape or depth,
    /// a non-conformant terrain size, an out-of-range field of view.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A grid index fell outside the buffer bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// An intermediate buffer could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Accelerator build, dispatch, or copy failure. The message carries the
    /// backend's own error text (kernel build logs included).
    #[error("backend error: {0}")]
    Backend(String),

    /// The operation observed a tripped cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl RangeError {
    pub fn invalid_argument<T: ToString>(msg: T) -> Self {
        RangeError::InvalidArgument(msg.to_string())
    }

    pub fn out_of_range<T: ToString>(msg: T) -> Self {
        RangeError::OutOfRange(msg.to_string())
    }

    pub fn resource_exhausted<T: ToString>(msg: T) -> Self {
        RangeError::ResourceExhausted(msg.to_string())
    }

    pub fn backend<T: ToString>(msg: T) -> Self {
        RangeError::Backend(msg.to_string())
    }
}

/// Result type alias for rangecast operations.
pub type RangeResult<T> = Result<T, RangeError>;
