//! Server error types.

/// Errors that can occur in the server.
///
/// Protocol violations are not errors here: those are reply frames carrying
/// a [`wireline_proto::ErrorCode`]. This type covers runtime and internal
/// failures, which are fatal for one connection at most.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Transport/network error (bind failure, I/O error).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An event referenced a session the driver does not know.
    ///
    /// Should never happen in a correct runtime; indicates a bug.
    #[error("unknown session {0}")]
    SessionNotFound(u64),

    /// An outbound frame failed to serialize.
    #[error(transparent)]
    Encode(#[from] wireline_proto::EncodeError),
}
