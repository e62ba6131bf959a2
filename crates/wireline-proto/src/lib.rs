//! Wire protocol for the wireline relay.
//!
//! The transport is newline-delimited UTF-8 JSON: each line is exactly one
//! frame, tagged by its `type` field. Several frame kinds carry different
//! fields depending on direction (a client's `chat_request` names a target
//! `to`; the server's forwarded copy names the originating `from`), so the
//! two directions are modeled as separate enums:
//!
//! - [`ClientFrame`]: client → server, decoded with [`ClientFrame::decode`]
//! - [`ServerFrame`]: server → client, encoded with [`ServerFrame::encode`]
//!
//! Decoding distinguishes malformed input ([`DecodeError::Malformed`]) from
//! well-formed JSON whose `type` tag is not one of the enumerated frame
//! kinds ([`DecodeError::UnknownType`]); the relay maps the two onto
//! different protocol error codes.

mod errors;
mod frame;

pub use errors::{DecodeError, EncodeError};
pub use frame::{ClientFrame, ErrorCode, MAX_IDENTIFIER_LEN, ServerFrame};
