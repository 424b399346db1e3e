//! Error types for container reading and querying.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ObfError>;

/// Errors surfaced by the reader.
///
/// Cancellation is deliberately *not* represented here: a cancelled query is a
/// normal early-termination outcome that yields whatever has been published so
/// far, not a failure.
#[derive(Debug, Error)]
pub enum ObfError {
    /// The container header declares a format version this reader does not speak.
    #[error("unsupported container version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Truncated or corrupt region, inconsistent node bounds, or any other
    /// structural violation found while decoding.
    #[error("invalid container format: {0}")]
    InvalidFormat(String),

    /// Seek or read failure on an otherwise well-formed region.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Lookup of a tag-dictionary id that was never registered.
    #[error("tag id {id} out of range (dictionary holds {len} entries)")]
    TagIdOutOfRange { id: u32, len: usize },

    /// The container was closed before or during the operation.
    #[error("container is closed")]
    ContainerClosed,

    /// Rejected configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ObfError {
    /// Shorthand for a formatted [`ObfError::InvalidFormat`].
    pub fn format(msg: impl Into<String>) -> Self {
        ObfError::InvalidFormat(msg.into())
    }
}
