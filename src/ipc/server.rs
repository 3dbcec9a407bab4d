//! Unix domain socket server for IPC
//!
//! Provides request-response communication plus push notifications to
//! subscribed clients: turn events for UIs, engine commands for the
//! companion speech-engine process. Gestures and engine events are
//! forwarded into the controller's event queue; nothing is handled here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::TurnEvent;
use crate::speech::bridge::EngineCommand;
use crate::turn::{ControllerEvent, TurnStatus};

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Channels the server needs to serve one client.
#[derive(Clone)]
pub struct ClientContext {
    /// Forwarding path into the controller's event queue
    pub controller_tx: mpsc::Sender<ControllerEvent>,
    /// Live controller status for `get_status`
    pub status_rx: watch::Receiver<TurnStatus>,
    /// Turn events pushed to subscribed clients
    pub turn_events: broadcast::Sender<TurnEvent>,
    /// Engine commands pushed to subscribed clients
    pub engine_commands: broadcast::Sender<EngineCommand>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shutdown_tx: broadcast::Sender<()>,
    ctx: ClientContext,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, ctx: ClientContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shutdown_tx,
            ctx,
            start_time: Instant::now(),
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = self.ctx.clone();
                    let start_time = self.start_time;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, ctx, start_time) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        ctx: ClientContext,
        start_time: Instant,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut notifier: Option<JoinHandle<()>> = None;
        let mut len_buf = [0u8; 4];

        let result = loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_BYTES {
                warn!(len, "message too large, disconnecting");
                break Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                break Err(e.into());
            }

            // Parse request
            let request: Request = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => break Err(anyhow::Error::from(e).context("failed to parse request")),
            };

            debug!(?request, "received request");

            // Process request
            let (response, subscribe) = Self::process_request(request, &ctx, start_time).await;
            if subscribe && notifier.is_none() {
                debug!("client subscribed to notifications");
                notifier = Some(Self::spawn_notifier(
                    Arc::clone(&writer),
                    ctx.turn_events.subscribe(),
                    ctx.engine_commands.subscribe(),
                ));
            }

            // Send response
            if let Err(e) = Self::send_message(&writer, &response).await {
                break Err(e);
            }
        };

        if let Some(task) = notifier {
            task.abort();
        }
        result
    }

    /// Push turn events and engine commands to one subscribed client until
    /// the connection or the broadcast channels go away.
    fn spawn_notifier(
        writer: Arc<Mutex<OwnedWriteHalf>>,
        mut turn_rx: broadcast::Receiver<TurnEvent>,
        mut command_rx: broadcast::Receiver<EngineCommand>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    event = turn_rx.recv() => match event {
                        Ok(event) => Notification::TurnEvent { event },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "turn event receiver lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    command = command_rx.recv() => match command {
                        Ok(command) => Notification::EngineCommand { command },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "engine command receiver lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                if Self::send_message(&writer, &notification).await.is_err() {
                    debug!("notification push failed, client gone");
                    break;
                }
            }
        })
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(
        writer: &Mutex<OwnedWriteHalf>,
        msg: &T,
    ) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        let mut writer = writer.lock().await;
        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        ctx: &ClientContext,
        start_time: Instant,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let status = *ctx.status_rx.borrow();
                let status = DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    phase: status.phase.into(),
                    speaking: status.speaking,
                    speak_replies: status.speak_replies,
                    uptime_secs: start_time.elapsed().as_secs(),
                };
                (Response::Status(status), false)
            }

            Request::RequestStart => Self::forward(ctx, ControllerEvent::StartRequested).await,

            Request::RequestStop => Self::forward(ctx, ControllerEvent::StopRequested).await,

            Request::SetSpeakReplies { enabled } => {
                Self::forward(ctx, ControllerEvent::SetSpeakReplies { enabled }).await
            }

            Request::Subscribe => (Response::Subscribed, true),

            Request::EngineEvent { event } => Self::forward(ctx, event.into()).await,
        }
    }

    /// Enqueue an event for the controller
    async fn forward(ctx: &ClientContext, event: ControllerEvent) -> (Response, bool) {
        match ctx.controller_tx.send(event).await {
            Ok(()) => (Response::Ack, false),
            Err(_) => (
                Response::Error {
                    code: "controller_unavailable".to_string(),
                    message: "controller event queue is closed".to_string(),
                },
                false,
            ),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
