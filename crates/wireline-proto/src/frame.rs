//! Frame types for both protocol directions.
//!
//! Frames are the only unit of communication: there is no larger session or
//! transaction object on the wire. Every frame is a JSON object with a
//! `type` tag; the remaining fields depend on the kind.
//!
//! Optional textual fields (`to`, `payload`, `id`) default to the empty
//! string on decode rather than failing. The relay treats an empty `to` or
//! `id` as a protocol error at dispatch time (`missing_to`,
//! `must_register_first`), which keeps "field absent" and "field empty"
//! indistinguishable, as the protocol requires.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, EncodeError};

/// Maximum length of a client identifier, in characters.
///
/// Longer identifiers are truncated on registration, not rejected.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Frames a client may send to the relay.
///
/// # Invariants
///
/// - The first frame on a connection must be [`ClientFrame::Register`];
///   everything else is rejected with `must_register_first` and the
///   connection is closed.
/// - Decoding validates only shape, never registry or session state.
///   Whether a `to` names a live registrant is the relay's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind this connection to an identifier. Must be the first frame.
    Register {
        /// Self-chosen identifier; truncated to [`MAX_IDENTIFIER_LEN`]
        /// characters by the relay.
        #[serde(default)]
        id: String,
    },

    /// Direct point-to-point message, independent of any chat session.
    Send {
        /// Target identifier.
        #[serde(default)]
        to: String,
        /// Opaque message body.
        #[serde(default)]
        payload: String,
    },

    /// Ask the relay to open a paired chat session with `to`.
    ChatRequest {
        /// Target identifier; must be non-empty and not the sender.
        #[serde(default)]
        to: String,
    },

    /// Accept the pending chat request addressed to this client.
    ChatAccept,

    /// Decline the pending chat request addressed to this client.
    ChatReject,

    /// Message inside an established chat session.
    ChatMessage {
        /// Chat peer; must match the established session.
        #[serde(default)]
        to: String,
        /// Opaque message body.
        #[serde(default)]
        payload: String,
    },

    /// Liveness probe; the relay answers with [`ServerFrame::Pong`].
    Ping,
}

impl ClientFrame {
    /// Decode one protocol line.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Malformed`] if the line is not valid JSON or a field
    ///   has the wrong shape.
    /// - [`DecodeError::MissingType`] if the line is valid JSON but not an
    ///   object with a string `type`.
    /// - [`DecodeError::UnknownType`] if the `type` tag is not one of the
    ///   enumerated frame kinds.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(DecodeError::Malformed)?;

        let Some(tag) = value.get("type").and_then(serde_json::Value::as_str).map(str::to_owned)
        else {
            return Err(DecodeError::MissingType);
        };

        match tag.as_str() {
            "register" | "send" | "chat_request" | "chat_accept" | "chat_reject"
            | "chat_message" | "ping" => {
                serde_json::from_value(value).map_err(DecodeError::Malformed)
            },
            _ => Err(DecodeError::UnknownType(tag)),
        }
    }

    /// Encode as one protocol line, without the trailing newline.
    pub fn encode(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges a successful registration, echoing the (possibly
    /// truncated) identifier the connection is now bound to.
    Registered {
        /// Identifier this connection holds.
        id: String,
    },

    /// A direct message routed from another registrant.
    Deliver {
        /// Sender's identifier.
        from: String,
        /// Opaque message body.
        payload: String,
    },

    /// Confirms a `send` reached its target's connection.
    Sent {
        /// Echoed target identifier.
        to: String,
    },

    /// The named target is not currently registered; the message was
    /// dropped, never queued.
    Nodeliver {
        /// Echoed target identifier.
        to: String,
    },

    /// A chat invitation forwarded to its target.
    ChatRequest {
        /// Requesting identifier.
        from: String,
    },

    /// Confirms an established chat session, sent to both parties.
    ChatAccept {
        /// The other party's identifier.
        from: String,
    },

    /// The pending chat request was declined.
    ChatReject {
        /// Identifier that declined.
        from: String,
    },

    /// Message routed inside an established chat session.
    ChatMessage {
        /// Chat peer's identifier.
        from: String,
        /// Opaque message body.
        payload: String,
    },

    /// Answer to [`ClientFrame::Ping`].
    Pong,

    /// Non-fatal notice: eviction, session teardown, rejection ack.
    Info {
        /// Human-readable notice.
        message: String,
    },

    /// Protocol-level error reply.
    Error {
        /// Which rule was violated.
        error: ErrorCode,
    },
}

impl ServerFrame {
    /// Encode as one protocol line, without the trailing newline.
    pub fn encode(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one protocol line. Used by clients and tests; the relay only
    /// encodes this direction.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(line).map_err(DecodeError::Malformed)
    }
}

/// Exhaustive protocol error taxonomy.
///
/// Only `invalid_json` and `must_register_first` are fatal to a connection,
/// and only before registration completes; every other code leaves the
/// connection open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The line was not a well-formed frame.
    InvalidJson,
    /// A frame other than `register` arrived on an unregistered connection,
    /// or the `register` frame carried no identifier.
    MustRegisterFirst,
    /// `send` without a target.
    MissingTo,
    /// `chat_request` targeting self or nobody.
    InvalidChatTarget,
    /// Either party of a `chat_request` is already in a session.
    AlreadyInChat,
    /// `chat_accept` with nothing pending.
    NoPendingChat,
    /// `chat_message` outside an established session.
    NotInChat,
    /// The `type` tag named no known frame kind.
    UnknownType,
    /// Unexpected internal failure; the connection proceeds to cleanup.
    ServerException,
}

impl ErrorCode {
    /// The wire representation of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MustRegisterFirst => "must_register_first",
            Self::MissingTo => "missing_to",
            Self::InvalidChatTarget => "invalid_chat_target",
            Self::AlreadyInChat => "already_in_chat",
            Self::NoPendingChat => "no_pending_chat",
            Self::NotInChat => "not_in_chat",
            Self::UnknownType => "unknown_type",
            Self::ServerException => "server_exception",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
