//! Wireline relay server.
//!
//! A store-less message relay: clients register under a self-chosen
//! identifier over a persistent TCP connection, and the relay routes
//! point-to-point messages and negotiates paired chat sessions between two
//! identifiers. Undelivered messages are dropped, never queued.
//!
//! # Architecture
//!
//! This crate separates protocol logic from I/O. The [`RelayDriver`] is a
//! sans-IO state machine consuming [`ServerEvent`]s and producing
//! [`ServerAction`]s; [`Server`] is the Tokio runtime that accepts TCP
//! connections, reads newline-delimited JSON frames, and executes the
//! driver's actions.
//!
//! # Components
//!
//! - [`ClientRegistry`]: authoritative identifier → connection mapping
//! - [`ChatTable`]: pending negotiations and established chat pairs
//! - [`RelayDriver`]: sans-IO orchestrator (pure logic, no I/O)
//! - [`Server`]: production runtime executing driver actions
//!
//! # Concurrency
//!
//! One task per accepted connection. All relay state lives in the single
//! [`RelayDriver`] behind one async mutex; each event is processed to
//! completion under that lock, so the registry and both chat maps mutate
//! atomically with respect to every other connection. Outbound writes go
//! through per-session write halves and are best-effort: failures are
//! logged and swallowed.

mod chat;
mod driver;
mod error;
mod registry;
mod router;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use chat::{AcceptOutcome, ChatTable, RequestOutcome};
pub use driver::{LogLevel, RelayDriver, ServerAction, ServerEvent};
pub use error::ServerError;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, Notify, RwLock, watch},
    task::JoinSet,
};
pub use registry::ClientRegistry;
use wireline_proto::{ErrorCode, ServerFrame};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g. "0.0.0.0:4040").
    pub bind_address: String,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:4040".to_string() }
    }
}

/// A live connection's runtime handle: its outbound write half and the
/// notifier used to wake its task for a server-initiated close.
struct SessionHandle {
    /// Outbound half of the TCP stream; one writer at a time.
    writer: Mutex<OwnedWriteHalf>,
    /// Wakes the connection task out of its read loop on eviction or a
    /// fatal protocol error.
    close: Arc<Notify>,
}

/// Shared state for all connections.
///
/// Handles are stored behind `Arc` so a sender can clone one out and
/// release the map guard before awaiting the socket write; the map lock is
/// never held across I/O, so one non-reading peer cannot stall the rest of
/// the server.
struct SharedState {
    /// Session ID → runtime handle.
    sessions: RwLock<HashMap<u64, Arc<SessionHandle>>>,
    /// Monotonic session ID source.
    next_session_id: AtomicU64,
}

/// Handle used to request a graceful server shutdown.
///
/// Shutdown stops the accept loop and wakes every connection task so each
/// runs its full cleanup path before the server returns.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Production relay server.
///
/// Wraps [`RelayDriver`] with a TCP listener and the Tokio runtime.
pub struct Server {
    listener: TcpListener,
    driver: Arc<Mutex<RelayDriver>>,
    shared: Arc<SharedState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            driver: Arc::new(Mutex::new(RelayDriver::new())),
            shared: Arc::new(SharedState {
                sessions: RwLock::new(HashMap::new()),
                next_session_id: AtomicU64::new(1),
            }),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for requesting a graceful shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown_tx) }
    }

    /// Run the server, accepting connections and processing frames.
    ///
    /// Runs until [`ShutdownHandle::shutdown`] is called, then drains every
    /// connection task through its cleanup path before returning.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("relay listening on {}", self.listener.local_addr()?);

        let mut tasks = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("shutdown requested");
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let session_id =
                            self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("accepted {peer_addr} as session {session_id}");

                        let driver = Arc::clone(&self.driver);
                        let shared = Arc::clone(&self.shared);
                        let task_rx = self.shutdown_tx.subscribe();

                        tasks.spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, session_id, driver, shared, task_rx)
                                    .await
                            {
                                tracing::error!("session {session_id} error: {e}");
                            }
                        });
                    },
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                    },
                },
            }
        }

        // Every connection task holds a receiver subscribed before it was
        // spawned, so the broadcast above reaches all of them and each runs
        // its own cleanup path. Registry and chat entries never leak.
        while tasks.join_next().await.is_some() {}

        Ok(())
    }
}

/// Handle a single TCP connection from accept to cleanup.
///
/// Every exit path runs the `ConnectionClosed` event so the driver's
/// registry and session entries are torn down exactly once.
async fn handle_connection(
    stream: TcpStream,
    session_id: u64,
    driver: Arc<Mutex<RelayDriver>>,
    shared: Arc<SharedState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let (read_half, write_half) = stream.into_split();
    let notify = Arc::new(Notify::new());

    {
        let mut sessions = shared.sessions.write().await;
        sessions.insert(
            session_id,
            Arc::new(SessionHandle {
                writer: Mutex::new(write_half),
                close: Arc::clone(&notify),
            }),
        );
    }

    let accept_result = {
        let mut driver = driver.lock().await;
        driver.process_event(ServerEvent::ConnectionAccepted { session_id })
    };
    let reason = match accept_result {
        Ok(actions) => {
            execute_actions(actions, &shared).await;
            read_loop(read_half, &notify, &mut shutdown_rx, session_id, &driver, &shared).await
        },
        Err(e) => {
            tracing::error!("session {session_id} setup failed: {e}");
            "internal error"
        },
    };

    // Release the stream before driver cleanup so peer notifications never
    // try to write back to this half-dead connection's own socket. The map
    // guard is dropped before the writer awaits.
    let handle = shared.sessions.write().await.remove(&session_id);
    if let Some(handle) = handle {
        let mut writer = handle.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    let closed_result = {
        let mut driver = driver.lock().await;
        driver.process_event(ServerEvent::ConnectionClosed {
            session_id,
            reason: reason.to_string(),
        })
    };
    match closed_result {
        Ok(actions) => execute_actions(actions, &shared).await,
        Err(e) => tracing::error!("session {session_id} cleanup failed: {e}"),
    }

    Ok(())
}

/// Read lines until EOF, a server-initiated close, or a fatal error.
/// Returns the closure reason handed to the driver's cleanup event.
async fn read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    notify: &Notify,
    shutdown_rx: &mut watch::Receiver<bool>,
    session_id: u64,
    driver: &Mutex<RelayDriver>,
    shared: &SharedState,
) -> &'static str {
    // The broadcast may already have fired between accept and here.
    if *shutdown_rx.borrow() {
        return "server shutting down";
    }

    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                return "server shutting down";
            },
            () = notify.notified() => {
                return "connection shut down";
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let result = {
                        let mut driver = driver.lock().await;
                        driver.process_event(ServerEvent::LineReceived { session_id, line })
                    };
                    match result {
                        Ok(actions) => {
                            execute_actions(actions, shared).await;
                            // A CloseConnection for this session removes its
                            // handle; stop reading immediately.
                            if !session_exists(shared, session_id).await {
                                return "closed by server";
                            }
                        },
                        Err(e) => {
                            tracing::warn!("session {session_id} dispatch failed: {e}");
                            send_frame(
                                shared,
                                session_id,
                                &ServerFrame::Error { error: ErrorCode::ServerException },
                            )
                            .await;
                            return "internal error";
                        },
                    }
                },
                Ok(None) => return "connection closed",
                Err(e) => {
                    tracing::debug!("session {session_id} read error: {e}");
                    return "read error";
                },
            },
        }
    }
}

async fn session_exists(shared: &SharedState, session_id: u64) -> bool {
    shared.sessions.read().await.contains_key(&session_id)
}

/// Execute driver actions against the shared connection state.
async fn execute_actions(actions: Vec<ServerAction>, shared: &SharedState) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                send_frame(shared, session_id, &frame).await;
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::debug!("closing session {session_id}: {reason}");
                let handle = shared.sessions.write().await.remove(&session_id);
                if let Some(handle) = handle {
                    // Wake the task first so it exits its read loop and runs
                    // cleanup even if the peer never sends another byte.
                    handle.close.notify_one();
                    let mut writer = handle.writer.lock().await;
                    let _ = writer.shutdown().await;
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
            },
        }
    }
}

/// Write one frame to a session, best-effort. Failures are logged and
/// swallowed; the protocol never reports them to the sender.
async fn send_frame(shared: &SharedState, session_id: u64, frame: &ServerFrame) {
    let line = match frame.encode() {
        Ok(line) => line,
        Err(e) => {
            tracing::error!("failed to encode frame for session {session_id}: {e}");
            return;
        },
    };

    // Clone the handle out and drop the map guard before awaiting the
    // write: a peer that stops reading blocks only writes to itself, never
    // map access for other connections.
    let handle = shared.sessions.read().await.get(&session_id).map(Arc::clone);
    let Some(handle) = handle else {
        tracing::warn!("send to unknown session {session_id}");
        return;
    };

    let mut writer = handle.writer.lock().await;
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        tracing::warn!("write to session {session_id} failed: {e}");
        return;
    }
    if let Err(e) = writer.write_all(b"\n").await {
        tracing::warn!("write to session {session_id} failed: {e}");
    }
}
