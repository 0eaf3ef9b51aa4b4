//! Error types for identifier decoding and status code conversion.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the identifier, partition and status helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The id is not a well-formed time-prefixed identifier.
    #[error("Invalid record id {id:?}: {source}")]
    InvalidId {
        id: String,
        #[source]
        source: ulid::DecodeError,
    },

    /// The id decoded, but its timestamp cannot be represented.
    #[error("Record id {id:?} encodes an out-of-range timestamp ({millis} ms)")]
    TimestampOutOfRange { id: String, millis: u64 },

    /// A record id cannot encode this due time.
    #[error("Due time {process_at} cannot be encoded in a record id")]
    ProcessAtOutOfRange { process_at: DateTime<Utc> },

    /// Unknown job state code read from storage.
    #[error("Unknown job state code: {0}")]
    UnknownState(i32),

    /// Unknown job sub state code read from storage.
    #[error("Unknown job sub state code: {0}")]
    UnknownSubState(i32),
}
