//! Message routing.
//!
//! Direct sends and in-session chat messages, expressed over the registry
//! and the chat table. Routing never queues: an unreachable target surfaces
//! immediately as `nodeliver` or `not_in_chat` and the message is dropped.

use wireline_proto::{ErrorCode, ServerFrame};

use crate::{
    chat::ChatTable,
    driver::{LogLevel, ServerAction},
    registry::ClientRegistry,
};

/// Route a direct point-to-point message.
///
/// Delivery is independent of chat-session state: direct sends work whether
/// or not either party is chatting.
pub(crate) fn route_send(
    registry: &ClientRegistry,
    sender_session: u64,
    from: &str,
    to: &str,
    payload: String,
) -> Vec<ServerAction> {
    if to.is_empty() {
        return vec![ServerAction::SendToSession {
            session_id: sender_session,
            frame: ServerFrame::Error { error: ErrorCode::MissingTo },
        }];
    }

    match registry.lookup(to) {
        Some(target_session) => vec![
            ServerAction::SendToSession {
                session_id: target_session,
                frame: ServerFrame::Deliver { from: from.to_owned(), payload },
            },
            ServerAction::SendToSession {
                session_id: sender_session,
                frame: ServerFrame::Sent { to: to.to_owned() },
            },
        ],
        None => vec![ServerAction::SendToSession {
            session_id: sender_session,
            frame: ServerFrame::Nodeliver { to: to.to_owned() },
        }],
    }
}

/// Route a message inside an established chat session.
///
/// Succeeds only if the chat table records `from ↔ to` as a symmetric pair.
pub(crate) fn route_chat_message(
    registry: &ClientRegistry,
    chats: &ChatTable,
    sender_session: u64,
    from: &str,
    to: &str,
    payload: String,
) -> Vec<ServerAction> {
    if !chats.is_paired(from, to) {
        return vec![ServerAction::SendToSession {
            session_id: sender_session,
            frame: ServerFrame::Error { error: ErrorCode::NotInChat },
        }];
    }

    match registry.lookup(to) {
        Some(target_session) => vec![ServerAction::SendToSession {
            session_id: target_session,
            frame: ServerFrame::ChatMessage { from: from.to_owned(), payload },
        }],
        // A paired peer is normally registered; disconnect cleanup tears the
        // pair down atomically with unregistration. Drop silently if not.
        None => vec![ServerAction::Log {
            level: LogLevel::Warn,
            message: format!("chat peer {to:?} paired but unregistered"),
        }],
    }
}
