// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use crate::difficulty_adjuster::{
    DifficultyAdjusterTrait, DifficultyUpdateReceiver, start_difficulty_delivery,
};
use crate::error::Error;
use crate::message_handlers::{ConnectionState, StratumContext, handle_message};
use crate::messages::{Message, Response, ResponseError};
use crate::session_registry::SessionRegistry;
use crate::session_timeout::{SessionTimeouts, start_session_sweeper};
use crate::share_validator::ShareValidator;
use crate::utils::time_provider::{SystemTimeProvider, TimeProvider};
use crate::work::notify::JobBroadcaster;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, error, info, warn};

/// Default maximum line length, guards against unbounded lines
pub const MAX_LINE_LENGTH: usize = 8 * 1024;
/// Default deadline for writing one line to a miner
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_line_length: usize,
    pub write_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

// A struct to represent a Stratum server
// Holds the listening address and the services shared by all connections
pub struct StratumServer {
    pub hostname: String,
    pub port: u16,
    pub limits: ConnectionLimits,
    pub timeouts: SessionTimeouts,
    shutdown_rx: oneshot::Receiver<()>,
    difficulty_updates_rx: Option<DifficultyUpdateReceiver>,
    ctx: StratumContext,
}

/// Builder for StratumServer to avoid dependency on the config file
#[derive(Default)]
pub struct StratumServerBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    limits: Option<ConnectionLimits>,
    timeouts: Option<SessionTimeouts>,
    version_mask: Option<u32>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    registry: Option<Arc<SessionRegistry>>,
    broadcaster: Option<Arc<JobBroadcaster>>,
    validator: Option<Arc<ShareValidator>>,
    adjuster: Option<Arc<dyn DifficultyAdjusterTrait>>,
    difficulty_updates_rx: Option<DifficultyUpdateReceiver>,
}

impl StratumServerBuilder {
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = Some(hostname);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn version_mask(mut self, version_mask: Option<u32>) -> Self {
        self.version_mask = version_mask;
        self
    }

    pub fn shutdown_rx(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<JobBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn validator(mut self, validator: Arc<ShareValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn adjuster(mut self, adjuster: Arc<dyn DifficultyAdjusterTrait>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    pub fn difficulty_updates_rx(mut self, difficulty_updates_rx: DifficultyUpdateReceiver) -> Self {
        self.difficulty_updates_rx = Some(difficulty_updates_rx);
        self
    }

    pub async fn build(self) -> Result<StratumServer, Box<dyn std::error::Error + Send + Sync>> {
        Ok(StratumServer {
            hostname: self.hostname.ok_or("hostname is required")?,
            port: self.port.ok_or("port is required")?,
            limits: self.limits.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
            shutdown_rx: self.shutdown_rx.ok_or("shutdown_rx is required")?,
            difficulty_updates_rx: Some(
                self.difficulty_updates_rx
                    .ok_or("difficulty_updates_rx is required")?,
            ),
            ctx: StratumContext {
                registry: self.registry.ok_or("registry is required")?,
                broadcaster: self.broadcaster.ok_or("broadcaster is required")?,
                validator: self.validator.ok_or("validator is required")?,
                adjuster: self.adjuster.ok_or("adjuster is required")?,
                version_mask: self.version_mask,
            },
        })
    }
}

impl StratumServer {
    /// Bind the listener and serve connections until the shutdown signal.
    ///
    /// The bound address is sent on `ready_tx`, so port 0 can be used.
    pub async fn start(
        &mut self,
        ready_tx: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting Stratum server at {}:{}", self.hostname, self.port);

        let bind_address = format!("{}:{}", self.hostname, self.port);
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind to {}: {}", bind_address, e);
                return Err(Box::new(e));
            }
        };
        let local_addr = listener.local_addr()?;

        let sweeper = start_session_sweeper(
            self.ctx.registry.clone(),
            self.timeouts,
            SystemTimeProvider,
        );
        let delivery = self
            .difficulty_updates_rx
            .take()
            .map(|updates_rx| start_difficulty_delivery(updates_rx, self.ctx.registry.clone()));

        if let Some(ready_tx) = ready_tx {
            info!("Stratum server is ready to accept connections on {local_addr}");
            ready_tx.send(local_addr).ok();
        }
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }
                connection = listener.accept() => {
                    match connection {
                        Ok((stream, addr)) => {
                            info!("New connection from: {}", addr);
                            let (reader, writer) = stream.into_split();
                            let ctx = self.ctx.clone();
                            let limits = self.limits;
                            // Spawn a new task for each connection
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(reader, writer, addr, ctx, limits, &SystemTimeProvider).await {
                                    error!("Error occurred while handling connection {addr}: {e}. Closing connection.");
                                }
                            });
                        }
                        Err(e) => {
                            info!("Connection failed: {}", e);
                            continue;
                        }
                    }
                }
            }
        }

        sweeper.abort();
        if let Some(delivery) = delivery {
            delivery.abort();
        }
        Ok(())
    }
}

/// Resolve when the registry evicts the session. Never resolves before subscribe.
async fn evicted(shutdown_rx: &mut Option<oneshot::Receiver<()>>) {
    match shutdown_rx {
        // A dropped sender means the entry is gone as well
        Some(shutdown_rx) => {
            let _ = shutdown_rx.await;
        }
        None => std::future::pending().await,
    }
}

/// Next message queued for this session. Never resolves before subscribe.
async fn next_outbound(message_rx: &mut Option<mpsc::Receiver<Arc<String>>>) -> Option<Arc<String>> {
    match message_rx {
        Some(message_rx) => message_rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Write one line within the write deadline.
async fn write_line<W>(writer: &mut W, line: &str, write_timeout: Duration) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };
    match tokio::time::timeout(write_timeout, write).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::TimeoutError),
    }
}

/// Handles a single connection to the Stratum server.
///
/// Lines are handled strictly in order. Messages queued for the session by
/// the broadcaster or the difficulty delivery task are written between
/// lines. The session is removed from the registry when the connection ends.
pub(crate) async fn handle_connection<R, W, T>(
    reader: R,
    mut writer: W,
    addr: SocketAddr,
    ctx: StratumContext,
    limits: ConnectionLimits,
    time_provider: &T,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    T: TimeProvider,
{
    let mut framed = FramedRead::new(
        reader,
        AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            limits.max_line_length,
        ),
    );
    let mut state = ConnectionState::default();
    let mut message_rx: Option<mpsc::Receiver<Arc<String>>> = None;
    let mut shutdown_rx: Option<oneshot::Receiver<()>> = None;

    let result = loop {
        tokio::select! {
            _ = evicted(&mut shutdown_rx) => {
                info!("Session evicted, closing connection from {}", addr);
                break Ok(());
            }
            message = next_outbound(&mut message_rx) => {
                let Some(message) = message else {
                    message_rx = None;
                    continue;
                };
                debug!("Tx {addr} {message:?}");
                if let Err(e) = write_line(&mut writer, &message, limits.write_timeout).await {
                    break Err(e);
                }
            }
            line = framed.next() => {
                match line {
                    Some(Ok(frame)) => {
                        let line = match std::str::from_utf8(&frame) {
                            Ok(line) => line,
                            Err(e) => {
                                info!("Skipping line that is not UTF-8 from {}: {}", addr, e);
                                continue;
                            }
                        };
                        debug!("Rx {} {:?}", addr, line);
                        if line.trim().is_empty() {
                            continue;
                        }
                        let replies = process_incoming_message(line.trim(), &mut state, addr, &ctx, time_provider).await;
                        if let Some(channels) = state.channels.take() {
                            message_rx = Some(channels.message_rx);
                            shutdown_rx = Some(channels.shutdown_rx);
                        }
                        let mut written = Ok(());
                        for reply in replies {
                            debug!("Tx {addr} {reply:?}");
                            written = write_line(&mut writer, &reply, limits.write_timeout).await;
                            if written.is_err() {
                                break;
                            }
                        }
                        if let Err(e) = written {
                            break Err(e);
                        }
                    }
                    // Over-long lines and read failures end the connection,
                    // the framer can't resync after either
                    Some(Err(e)) => {
                        warn!("Error reading line from {}: {}", addr, e);
                        break Err(Error::MalformedMessage(e.to_string()));
                    }
                    None => {
                        info!("Connection closed by client: {}", addr);
                        break Ok(());
                    }
                }
            }
        }
    };

    if let Some(session_id) = state.session_id {
        if ctx.registry.remove(session_id) {
            debug!("Removed session {session_id} for {addr}");
        }
        ctx.adjuster.forget(session_id);
    }
    result
}

/// Parse one line and produce the serialized replies to send.
///
/// Unparseable lines are logged and skipped. Notifications and responses
/// from the miner need no reply.
async fn process_incoming_message<T: TimeProvider>(
    line: &str,
    state: &mut ConnectionState,
    addr: SocketAddr,
    ctx: &StratumContext,
    time_provider: &T,
) -> Vec<String> {
    let message = Message::parse(line);
    if message.is_ok() {
        if let Some(session_id) = state.session_id {
            ctx.registry.touch(session_id, time_provider.now());
        }
    }

    let replies = match message {
        Ok(Message::Request(request)) => handle_message(request, state, ctx).await,
        Ok(Message::Notification(notification)) => {
            debug!("Ignoring {} notification from {}", notification.method, addr);
            return Vec::new();
        }
        Ok(Message::Response(response)) => {
            debug!("Ignoring response {} from {}", response.id, addr);
            return Vec::new();
        }
        Err(Error::ProtocolViolation { id: Some(id), reason }) => {
            info!("Protocol violation from {}: {}", addr, reason);
            let error = ResponseError::new(crate::error::CODE_OTHER, reason);
            vec![Message::Response(Response::error(id, error))]
        }
        Err(e) => {
            info!("Failed to parse message from {}: {}", addr, e);
            return Vec::new();
        }
    };

    replies
        .iter()
        .filter_map(|reply| match reply.marshal() {
            Ok(line) => Some(line),
            Err(e) => {
                error!("Failed to serialize reply for {}: {}", addr, e);
                None
            }
        })
        .collect()
}
