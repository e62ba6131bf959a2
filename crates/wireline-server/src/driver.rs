//! Relay driver.
//!
//! Sans-IO orchestrator for the relay: ties together the per-connection
//! registration state machine, the [`ClientRegistry`], the [`ChatTable`],
//! and message routing. The runtime feeds it [`ServerEvent`]s and executes
//! the [`ServerAction`]s it returns; no sockets are touched here, which is
//! what makes every protocol rule testable without I/O.
//!
//! All shared relay state lives in this one object. The runtime processes
//! each event to completion while holding a single lock on the driver, so
//! the map mutations for one frame are atomic with respect to every other
//! connection, mirroring the atomicity a single-threaded cooperative
//! scheduler would give for free.

use std::collections::HashMap;

use wireline_proto::{ClientFrame, DecodeError, ErrorCode, MAX_IDENTIFIER_LEN, ServerFrame};

use crate::{
    chat::{AcceptOutcome, ChatTable, RequestOutcome},
    error::ServerError,
    registry::ClientRegistry,
    router,
};

/// Events the relay driver processes.
///
/// Produced by the runtime, one stream per process. Raw lines are handed
/// over undecoded because the reply to a malformed line depends on the
/// connection's registration phase, which only the driver knows.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted.
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime.
        session_id: u64,
    },

    /// One line of input arrived on a connection.
    LineReceived {
        /// Connection that sent the line.
        session_id: u64,
        /// The raw line, without its trailing newline.
        line: String,
    },

    /// A connection was closed (by peer, error, or shutdown).
    ConnectionClosed {
        /// Connection that was closed.
        session_id: u64,
        /// Reason for closure.
        reason: String,
    },
}

/// Actions the relay driver produces for the runtime to execute.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send a frame to a specific session. Write failures are swallowed;
    /// the protocol never informs a sender beyond the specified replies.
    SendToSession {
        /// Target session ID.
        session_id: u64,
        /// Frame to send.
        frame: ServerFrame,
    },

    /// Close a connection. The closed session's own cleanup event follows
    /// from the runtime.
    CloseConnection {
        /// Session to close.
        session_id: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Log a message.
    Log {
        /// Log level.
        level: LogLevel,
        /// Message to log.
        message: String,
    },
}

/// Log levels for driver actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
}

/// Per-connection handler state.
///
/// A connection is either waiting for its first (register) frame or bound
/// to an identifier; there is nothing in between, and the closed state is
/// simply absence from the driver's connection map.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnState {
    /// No valid register frame seen yet.
    Unregistered,
    /// Registered and dispatching frames.
    Active {
        /// Identifier this connection holds (possibly already evicted by a
        /// newer registration; the registry decides at cleanup time).
        client_id: String,
    },
}

/// Sans-IO relay driver.
///
/// Owns the connection registry, the chat session state machine, and the
/// per-connection handler states.
#[derive(Debug, Default)]
pub struct RelayDriver {
    /// Per-connection handler state (session ID → state).
    connections: HashMap<u64, ConnState>,
    /// Identifier → session registry.
    registry: ClientRegistry,
    /// Pending negotiations and established chat pairs.
    chats: ChatTable,
}

impl RelayDriver {
    /// Create a new driver with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the registry, for inspection in tests and stats.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Read access to the chat table, for inspection in tests and stats.
    pub fn chats(&self) -> &ChatTable {
        &self.chats
    }

    /// Process one event and return the actions to execute.
    ///
    /// This is the only entry point; the runtime must execute the returned
    /// actions before processing the next event for the same session.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::LineReceived { session_id, line } => {
                self.handle_line_received(session_id, &line)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, &reason)
            },
        }
    }

    fn handle_connection_accepted(
        &mut self,
        session_id: u64,
    ) -> Result<Vec<ServerAction>, ServerError> {
        self.connections.insert(session_id, ConnState::Unregistered);

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
        }])
    }

    fn handle_line_received(
        &mut self,
        session_id: u64,
        line: &str,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let state = self
            .connections
            .get(&session_id)
            .cloned()
            .ok_or(ServerError::SessionNotFound(session_id))?;

        match state {
            ConnState::Unregistered => Ok(self.handle_registration(session_id, line)),
            ConnState::Active { client_id } => Ok(self.dispatch(session_id, &client_id, line)),
        }
    }

    /// First-frame handling: only a `register` with a non-empty id enters
    /// the active state. Everything else replies and closes.
    fn handle_registration(&mut self, session_id: u64, line: &str) -> Vec<ServerAction> {
        let failure = |code: ErrorCode, reason: &str| {
            vec![
                ServerAction::SendToSession {
                    session_id,
                    frame: ServerFrame::Error { error: code },
                },
                ServerAction::CloseConnection { session_id, reason: reason.to_owned() },
            ]
        };

        let frame = match ClientFrame::decode(line) {
            Ok(frame) => frame,
            Err(DecodeError::Malformed(_)) => {
                return failure(ErrorCode::InvalidJson, "invalid frame before registration");
            },
            Err(DecodeError::MissingType | DecodeError::UnknownType(_)) => {
                return failure(ErrorCode::MustRegisterFirst, "first frame was not register");
            },
        };

        let ClientFrame::Register { id } = frame else {
            return failure(ErrorCode::MustRegisterFirst, "first frame was not register");
        };
        if id.is_empty() {
            return failure(ErrorCode::MustRegisterFirst, "register without id");
        }

        let id: String = id.chars().take(MAX_IDENTIFIER_LEN).collect();
        let mut actions = Vec::new();

        if let Some(evicted) = self.registry.register(&id, session_id) {
            // Chat and pending entries are keyed by identifier and survive
            // the eviction; the replacement connection inherits them.
            actions.push(ServerAction::SendToSession {
                session_id: evicted,
                frame: ServerFrame::Info { message: "signed_in_elsewhere".to_owned() },
            });
            actions.push(ServerAction::CloseConnection {
                session_id: evicted,
                reason: "signed in elsewhere".to_owned(),
            });
        }

        self.connections.insert(session_id, ConnState::Active { client_id: id.clone() });

        actions.push(ServerAction::SendToSession {
            session_id,
            frame: ServerFrame::Registered { id: id.clone() },
        });
        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("client {id:?} registered on session {session_id}"),
        });
        actions
    }

    /// Active-phase dispatch. Malformed lines and unknown types reply with
    /// an error and leave the connection open.
    fn dispatch(&mut self, session_id: u64, client_id: &str, line: &str) -> Vec<ServerAction> {
        let reply = |code: ErrorCode| {
            vec![ServerAction::SendToSession {
                session_id,
                frame: ServerFrame::Error { error: code },
            }]
        };

        let frame = match ClientFrame::decode(line) {
            Ok(frame) => frame,
            Err(DecodeError::Malformed(_)) => return reply(ErrorCode::InvalidJson),
            Err(DecodeError::MissingType | DecodeError::UnknownType(_)) => {
                return reply(ErrorCode::UnknownType);
            },
        };

        match frame {
            ClientFrame::Send { to, payload } => {
                router::route_send(&self.registry, session_id, client_id, &to, payload)
            },
            ClientFrame::ChatRequest { to } => self.handle_chat_request(session_id, client_id, &to),
            ClientFrame::ChatAccept => self.handle_chat_accept(session_id, client_id),
            ClientFrame::ChatReject => self.handle_chat_reject(session_id, client_id),
            ClientFrame::ChatMessage { to, payload } => router::route_chat_message(
                &self.registry,
                &self.chats,
                session_id,
                client_id,
                &to,
                payload,
            ),
            ClientFrame::Ping => {
                vec![ServerAction::SendToSession { session_id, frame: ServerFrame::Pong }]
            },
            // Re-registering on a live connection is not part of the
            // protocol; it falls through like any unrecognized type.
            ClientFrame::Register { .. } => reply(ErrorCode::UnknownType),
        }
    }

    fn handle_chat_request(
        &mut self,
        session_id: u64,
        client_id: &str,
        target: &str,
    ) -> Vec<ServerAction> {
        match self.chats.request(client_id, target, &self.registry) {
            RequestOutcome::InvalidTarget => vec![ServerAction::SendToSession {
                session_id,
                frame: ServerFrame::Error { error: ErrorCode::InvalidChatTarget },
            }],
            RequestOutcome::Busy => vec![ServerAction::SendToSession {
                session_id,
                frame: ServerFrame::Error { error: ErrorCode::AlreadyInChat },
            }],
            RequestOutcome::TargetOffline => vec![ServerAction::SendToSession {
                session_id,
                frame: ServerFrame::Nodeliver { to: target.to_owned() },
            }],
            RequestOutcome::Requested { target_session } => vec![
                ServerAction::SendToSession {
                    session_id: target_session,
                    frame: ServerFrame::ChatRequest { from: client_id.to_owned() },
                },
                ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("chat requested: {client_id:?} -> {target:?}"),
                },
            ],
        }
    }

    fn handle_chat_accept(&mut self, session_id: u64, client_id: &str) -> Vec<ServerAction> {
        match self.chats.accept(client_id, &self.registry) {
            AcceptOutcome::NoPending => vec![ServerAction::SendToSession {
                session_id,
                frame: ServerFrame::Error { error: ErrorCode::NoPendingChat },
            }],
            // Requester vanished while pending: entry dropped, acceptor
            // deliberately receives no confirmation.
            AcceptOutcome::RequesterGone => vec![ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("chat accept by {client_id:?} found requester gone"),
            }],
            AcceptOutcome::Established { requester, requester_session } => vec![
                ServerAction::SendToSession {
                    session_id: requester_session,
                    frame: ServerFrame::ChatAccept { from: client_id.to_owned() },
                },
                ServerAction::SendToSession {
                    session_id,
                    frame: ServerFrame::ChatAccept { from: requester.clone() },
                },
                ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("chat established: {requester:?} <-> {client_id:?}"),
                },
            ],
        }
    }

    fn handle_chat_reject(&mut self, session_id: u64, client_id: &str) -> Vec<ServerAction> {
        let mut actions = Vec::new();

        if let Some(requester) = self.chats.reject(client_id) {
            // Best-effort: the requester may have disconnected meanwhile.
            if let Some(requester_session) = self.registry.lookup(&requester) {
                actions.push(ServerAction::SendToSession {
                    session_id: requester_session,
                    frame: ServerFrame::ChatReject { from: client_id.to_owned() },
                });
            }
        }

        // The acceptor is acknowledged whether or not anything was pending.
        actions.push(ServerAction::SendToSession {
            session_id,
            frame: ServerFrame::Info { message: "chat request rejected".to_owned() },
        });
        actions
    }

    fn handle_connection_closed(
        &mut self,
        session_id: u64,
        reason: &str,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let mut actions = vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection closed, session_id={session_id}: {reason}"),
        }];

        let Some(ConnState::Active { client_id }) = self.connections.remove(&session_id) else {
            return Ok(actions);
        };

        // Identifier-level cleanup belongs to whichever session currently
        // holds the identifier. An evicted connection skips it entirely.
        if !self.registry.unregister(&client_id, session_id) {
            return Ok(actions);
        }

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("client {client_id:?} disconnected"),
        });

        if let Some(peer) = self.chats.disconnect_cleanup(&client_id) {
            if let Some(peer_session) = self.registry.lookup(&peer) {
                actions.push(ServerAction::SendToSession {
                    session_id: peer_session,
                    frame: ServerFrame::Info {
                        message: format!("chat ended with {client_id}"),
                    },
                });
            }
        }

        Ok(actions)
    }
}
