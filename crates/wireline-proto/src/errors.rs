//! Protocol error types.

/// Why a received line could not be decoded into a [`crate::ClientFrame`].
///
/// The two failure classes are deliberately separate: the relay replies
/// `invalid_json` to malformed input but `unknown_type` to well-formed JSON
/// that is not one of the enumerated frame kinds.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The line is not valid JSON, or a field has the wrong shape
    /// (e.g. a numeric `to`).
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Valid JSON, but not an object carrying a string `type` tag.
    #[error("frame has no type tag")]
    MissingType,

    /// Valid JSON object whose `type` tag is not a recognized frame kind.
    #[error("unrecognized frame type {0:?}")]
    UnknownType(String),
}

/// A frame failed to serialize.
///
/// Should never happen for the frame types in this crate; surfaced rather
/// than unwrapped so the relay can log it and keep the connection alive.
#[derive(Debug, thiserror::Error)]
#[error("frame encode failed: {0}")]
pub struct EncodeError(#[from] serde_json::Error);
