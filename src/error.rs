use thiserror::Error;

/// Result type returned by iterator accessors.
pub type IterResult<T> = Result<T, IterError>;

/// Errors raised when reading the current element of an iterator.
///
/// Key absence is never an error; see [`SyncMap::get`](crate::SyncMap::get).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IterError {
    /// The iterator has been closed, or no positioning call has succeeded
    /// on it yet.
    #[error("iterator closed")]
    Closed,
}
