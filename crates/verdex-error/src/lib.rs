//! Error types for the Verdex file-version index.
//!
//! Two kinds of failure exist at this layer and they are deliberately kept
//! apart. Store I/O problems and undecodable persisted values surface as
//! [`VerdexError`] results. Integrity breaches (a version list referencing a
//! device record that does not exist, a key with the wrong type byte) are
//! bugs or on-disk corruption the index cannot recover from; those panic at
//! the point of detection rather than travel up the call stack.
//!
//! [`WrappedError`] is the user-surface side: an error annotated with a chain
//! of short descriptions, used by the folder marker and other filesystem
//! facing code.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Primary error type for index operations.
#[derive(Error, Debug)]
pub enum VerdexError {
    /// File I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key-value engine reported a failure on read or write.
    ///
    /// After a failed write the in-memory size counters are no longer
    /// trustworthy; callers rebuild them by full scan on next open.
    #[error("key-value store error: {detail}")]
    Store { detail: String },

    /// A persisted value failed to decode.
    #[error("corrupt {what} record: {detail}")]
    CorruptRecord {
        what: &'static str,
        detail: String,
    },

    /// An index-id dictionary lookup for an id that was never assigned.
    #[error("unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: u32 },
}

impl VerdexError {
    /// Create a store error.
    pub fn store(detail: impl Into<String>) -> Self {
        Self::Store {
            detail: detail.into(),
        }
    }

    /// Create a corrupt-record error.
    pub fn corrupt(what: &'static str, detail: impl Into<String>) -> Self {
        Self::CorruptRecord {
            what,
            detail: detail.into(),
        }
    }
}

/// Result type alias using [`VerdexError`].
pub type Result<T> = std::result::Result<T, VerdexError>;

/// An error with a short descriptive text added, such as an operation name.
///
/// Equivalent to formatting `"desc: {inner}"` except that the original error
/// is preserved for later inspection. Wrapping can nest; [`Display`] prints
/// the whole chain and [`WrappedError::original`] peels every layer.
///
/// [`Display`]: fmt::Display
#[derive(Debug)]
pub struct WrappedError {
    description: String,
    inner: Box<dyn StdError + Send + Sync>,
}

impl WrappedError {
    /// Wrap `inner` with a description.
    pub fn new(inner: impl Into<Box<dyn StdError + Send + Sync>>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            inner: inner.into(),
        }
    }

    /// The description added at this layer.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The original error prior to wrapping, unpacking all levels of
    /// wrapping that may have happened since.
    pub fn original(&self) -> &(dyn StdError + 'static) {
        let mut err: &(dyn StdError + 'static) = self.inner.as_ref();
        while let Some(wrapped) = err.downcast_ref::<WrappedError>() {
            err = wrapped.inner.as_ref();
        }
        err
    }
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.description, self.inner)
    }
}

impl StdError for WrappedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Deferred-wrapping combinator for fallible functions with many return
/// paths: `do_stuff().describe("doing stuff")?` annotates the error, while
/// an `Ok` passes through untouched.
pub trait ResultExt<T> {
    /// Wrap the error side with a description, if there is one.
    fn describe(self, description: impl Into<String>) -> std::result::Result<T, WrappedError>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn describe(self, description: impl Into<String>) -> std::result::Result<T, WrappedError> {
        self.map_err(|e| WrappedError::new(e, description))
    }
}
