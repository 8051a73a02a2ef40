//! Domain error model.

use thiserror::Error;

/// Result type used by the normalizer.
pub type RecordResult<T> = Result<T, RecordError>;

/// Why a raw row could not become a [`Record`](crate::Record).
///
/// These are per-record failures: the row is counted as failed and the batch
/// carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No name key matched and the first field is blank or absent.
    #[error("record has no resolvable name")]
    MissingName,

    /// No address key matched and the second field is blank or absent.
    #[error("record has no resolvable delivery address")]
    MissingAddress,
}
