//! Unix domain socket server for IPC
//!
//! Exposes the listener to local clients: listen requests wait for their
//! session to resolve, transcription messages are fed in by a bridge to the
//! transcription service, and subscribed clients receive listen events.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::events::ListenEvent;
use crate::session::{spawn_deadline, Listener, NoResultReason, SessionTimeouts};

use super::protocol::{DaemonStatus, Request, Response};

/// Largest frame accepted from a client
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// How long client handlers get to write their last replies on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a closing server waits for a request already on the wire
const REQUEST_LINGER: Duration = Duration::from_millis(50);

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    socket: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    drained: Notify,
}

/// Shared server state
struct ServerState {
    listener: Arc<Listener>,
    timeouts: SessionTimeouts,
    start_time: Instant,
    closing: AtomicBool,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        listener: Arc<Listener>,
        timeouts: SessionTimeouts,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let socket = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = watch::channel(false);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            socket: Some(socket),
            state: Arc::new(ServerState {
                listener,
                timeouts,
                start_time: Instant::now(),
                closing: AtomicBool::new(false),
            }),
            shutdown_tx,
            running: AtomicBool::new(false),
            drained: Notify::new(),
        })
    }

    /// Run the server, accepting connections until shutdown.
    ///
    /// Returns once every client handler has finished after
    /// [`shutdown`](Self::shutdown), or been aborted past the grace period.
    pub async fn run(&self) -> Result<()> {
        let socket = self.socket.as_ref().context("server not initialized")?;
        self.running.store(true, Ordering::SeqCst);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut shutdown_rx) => break,

                accepted = socket.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("client connected");
                        while clients.try_join_next().is_some() {}
                        self.spawn_client(&mut clients, stream);
                    }
                    Err(e) => {
                        error!(?e, "accept error");
                    }
                },
            }
        }

        // Connections still in the backlog may carry requests
        while let Ok(accepted) = time::timeout(REQUEST_LINGER, socket.accept()).await {
            match accepted {
                Ok((stream, _addr)) => self.spawn_client(&mut clients, stream),
                Err(e) => {
                    warn!(?e, "accept error during shutdown");
                    break;
                }
            }
        }

        let finished = time::timeout(SHUTDOWN_GRACE, async {
            while clients.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(remaining = clients.len(), "client handlers still busy, aborting");
            clients.shutdown().await;
        }

        debug!("all client handlers finished");
        self.drained.notify_one();
        Ok(())
    }

    fn spawn_client(&self, clients: &mut JoinSet<()>, stream: UnixStream) {
        let state = Arc::clone(&self.state);
        let shutdown_rx = self.shutdown_tx.subscribe();

        clients.spawn(async move {
            if let Err(e) = Self::handle_client(stream, state, shutdown_rx).await {
                warn!(?e, "client handler error");
            }
        });
    }

    /// Handle a single client connection.
    ///
    /// Once the server is closing, requests already on the wire are still
    /// answered before the connection is dropped.
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<ServerState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut closing = false;
        loop {
            closing |= state.closing.load(Ordering::SeqCst);
            let frame = if closing {
                match time::timeout(REQUEST_LINGER, read_frame(&mut stream)).await {
                    Ok(frame) => frame?,
                    Err(_) => {
                        debug!("client handler shutting down");
                        return Ok(());
                    }
                }
            } else {
                tokio::select! {
                    biased;

                    frame = read_frame(&mut stream) => frame?,
                    _ = stopped(&mut shutdown_rx) => {
                        closing = true;
                        continue;
                    }
                }
            };

            let Some(frame) = frame else {
                debug!("client disconnected");
                return Ok(());
            };

            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "unparseable request");
                    write_frame(&mut stream, &Response::error("bad_request", e)).await?;
                    continue;
                }
            };

            debug!(?request, "received request");

            if let Request::Subscribe = request {
                let events = state.listener.subscribe();
                write_frame(&mut stream, &Response::Subscribed).await?;
                debug!("client subscribed to listen events");
                return Self::stream_events(&mut stream, events, shutdown_rx).await;
            }

            let response = Self::process_request(request, &state).await;
            write_frame(&mut stream, &response).await?;
        }
    }

    /// Forward listen events to a subscribed client until it or the server
    /// goes away
    async fn stream_events(
        stream: &mut UnixStream,
        mut events: broadcast::Receiver<ListenEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let received = tokio::select! {
                biased;

                received = events.recv() => received,
                _ = stopped(&mut shutdown_rx) => return Ok(()),
            };

            match received {
                Ok(event) => write_frame(stream, &Response::Event { event }).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &ServerState) -> Response {
        let listener = &state.listener;
        match request {
            Request::Ping => Response::Pong,

            Request::Listen { phrases } => {
                if state.closing.load(Ordering::SeqCst) {
                    return Response::NoResult {
                        reason: NoResultReason::Cancelled,
                    };
                }

                let (handle, started) = listener.start_or_join(phrases);
                if state.closing.load(Ordering::SeqCst) {
                    // Shutdown raced the start; its cancel may have missed us.
                    listener.cancel();
                } else if started {
                    spawn_deadline(Arc::clone(listener), handle, state.timeouts);
                }
                listener.await_result(handle).await.into()
            }

            Request::Transcription { message } => match listener.handle_message(&message) {
                Ok(_) => Response::Ack,
                Err(e) => Response::error("match_failed", e),
            },

            Request::SessionEnded => {
                if let Some(handle) = listener.active_session() {
                    listener.end_session(handle);
                }
                Response::Ack
            }

            Request::Cancel => {
                if listener.cancel() {
                    info!("listening session cancelled via IPC");
                }
                Response::Ack
            }

            Request::GetUtterance => match listener.last_utterance() {
                Some(text) => Response::Utterance { text },
                None => Response::NoUtterance,
            },

            Request::Hears { phrase } => match listener.hears(&phrase) {
                Ok(matched) => Response::Heard { matched },
                Err(e) => Response::error("match_failed", e),
            },

            Request::GetStatus => Response::Status(DaemonStatus {
                listening: listener.is_listening(),
                sessions_started: listener.sessions_started(),
                last_utterance: listener.last_utterance(),
                uptime_secs: state.start_time.elapsed().as_secs(),
                ..DaemonStatus::default()
            }),

            Request::Subscribe => {
                Response::error("bad_request", "subscribe must be sent on its own")
            }
        }
    }

    /// Gracefully shutdown the server.
    ///
    /// Cancels the in-flight session so its waiters get their replies, waits
    /// for [`run`](Self::run) to drain the client handlers, then removes the
    /// socket file.
    pub async fn shutdown(&self) {
        self.state.closing.store(true, Ordering::SeqCst);
        if self.state.listener.cancel() {
            info!("listening session cancelled for shutdown");
        }
        self.shutdown_tx.send_replace(true);

        if self.running.load(Ordering::SeqCst) {
            let bound = SHUTDOWN_GRACE + SHUTDOWN_GRACE;
            if time::timeout(bound, self.drained.notified()).await.is_err() {
                warn!("timed out waiting for client handlers");
            }
        }

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Resolves once the server has been asked to shut down
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown_rx.borrow_and_update();
        if stop || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
pub async fn read_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<T: Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    stream.write_all(&msg_len).await?;
    stream.write_all(&msg_bytes).await?;

    Ok(())
}

/// Read and decode one JSON message
pub async fn read_message<T: DeserializeOwned>(stream: &mut UnixStream) -> Result<Option<T>> {
    match read_frame(stream).await? {
        Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
        None => Ok(None),
    }
}
