use thiserror::Error;

#[derive(Debug, Error)]
pub enum HicError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} already exists (set overwrite to replace it)")]
    AlreadyExists(String),

    #[error("Dimension mismatch: expected {expected} axes, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual:   usize,
    },

    #[error("Unsupported scalar type: {0}")]
    UnsupportedType(String),

    #[error("Malformed layout: {0}")]
    MalformedLayout(String),

    #[error("Buffer too small: need at least {expected} bytes, got {actual}")]
    TooShortBuffer {
        actual:   usize,
        expected: usize,
    },

    #[error(
        "Selection out of bounds on axis {axis}: offset {offset} + count {count} (stride {stride}) exceeds extent {extent}"
    )]
    SelectionOutOfBounds {
        axis:   usize,
        offset: u64,
        count:  u64,
        stride: u64,
        extent: u64,
    },

    #[error("Container I/O failure")]
    Io(#[from] std::io::Error),
}
