//! One TCP session with a VBox.
//!
//! [`Connection::connect`] opens the socket and spawns a read task that
//! decodes frames, sends heartbeats and watches for silence. Frames come
//! out of the returned [`Frames`] stream; writes go through
//! [`Connection::send`], which serializes callers so frames never
//! interleave.
//!
//! A connection dies exactly once. Whatever kills it (read error, EOF,
//! write error, keep-alive expiry, [`Connection::close`]) is recorded as a
//! [`DisconnectReason`] and delivered as the final [`ConnectionEvent::Lost`].
//! Reconnecting is the caller's job.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::VboxCodec;
use crate::error::{ConnectError, FrameError, WriteError};
use crate::frame::{Frame, Response};
use crate::request::Request;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── ConnectionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// TCP handshake limit. Default: 3s.
    pub connect_timeout: Duration,
    /// Limit for a single frame write. Default: 5s.
    pub write_timeout: Duration,
    /// Heartbeat period. Default: 20s.
    pub keepalive_interval: Duration,
    /// Inbound silence after which the link is declared dead. Default: 45s.
    pub keepalive_timeout: Duration,
    /// Sent as `P:<password>` for every heartbeat.
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(45),
            password: "VITREA".to_owned(),
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Connection::close`] was called.
    Closed,
    /// The controller closed the socket.
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// Nothing arrived for this long.
    KeepAliveTimeout(Duration),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed locally"),
            Self::PeerClosed => f.write_str("closed by controller"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::KeepAliveTimeout(after) => {
                write!(f, "no traffic for {}s", after.as_secs())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Frame(Frame),
    /// The decoder skipped corrupt bytes; the stream continues.
    Corrupt(FrameError),
    /// Terminal. Nothing follows.
    Lost(DisconnectReason),
}

/// Inbound side of a [`Connection`]. Ends after [`ConnectionEvent::Lost`].
#[derive(Debug)]
pub struct Frames {
    rx: mpsc::Receiver<ConnectionEvent>,
}

impl Frames {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for Frames {
    type Item = ConnectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ── Connection ──────────────────────────────────────────────────────

/// Who put an authenticate line on the wire, in wire order. Lets the
/// read task swallow the acks that answer its own heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingOrigin {
    Heartbeat,
    Caller,
}

struct Shared {
    addr: String,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, VboxCodec>>,
    write_timeout: Duration,
    pings: Mutex<VecDeque<PingOrigin>>,
    reason: Mutex<Option<DisconnectReason>>,
    lost: CancellationToken,
}

/// Write handle to a live socket. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("lost", &self.is_lost())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens a socket to `addr` (`host:port`) and starts the read task.
    pub async fn connect(
        addr: &str,
        config: ConnectionConfig,
    ) -> Result<(Self, Frames), ConnectError> {
        tracing::debug!(addr, "Connecting to VBox");

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Io {
                    addr: addr.to_owned(),
                    source,
                });
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    addr: addr.to_owned(),
                    timeout: config.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle");
        }

        let (read, write) = stream.into_split();
        let connection = Self {
            inner: Arc::new(Shared {
                addr: addr.to_owned(),
                writer: tokio::sync::Mutex::new(FramedWrite::new(write, VboxCodec::new())),
                write_timeout: config.write_timeout,
                pings: Mutex::new(VecDeque::new()),
                reason: Mutex::new(None),
                lost: CancellationToken::new(),
            }),
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader = FramedRead::new(read, VboxCodec::new());
        tokio::spawn(read_loop(reader, connection.clone(), event_tx, config));

        tracing::info!(addr, "Connected to VBox");
        Ok((connection, Frames { rx: event_rx }))
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn is_lost(&self) -> bool {
        self.inner.lost.is_cancelled()
    }

    /// Resolves once the connection is dead, for whatever reason.
    pub async fn lost(&self) {
        self.inner.lost.cancelled().await;
    }

    /// Writes one request. Concurrent callers are queued, never interleaved.
    pub async fn send(&self, request: &Request) -> Result<(), WriteError> {
        self.send_as(request, PingOrigin::Caller).await
    }

    /// Tears the connection down. The read task emits `Lost(Closed)`.
    pub fn close(&self) {
        self.fail(DisconnectReason::Closed);
    }

    async fn send_as(&self, request: &Request, origin: PingOrigin) -> Result<(), WriteError> {
        request.validate()?;
        if self.is_lost() {
            return Err(WriteError::Closed);
        }

        let mut writer = self.inner.writer.lock().await;
        if self.is_lost() {
            return Err(WriteError::Closed);
        }
        if matches!(request, Request::Authenticate { .. }) {
            lock(&self.inner.pings).push_back(origin);
        }

        tracing::trace!(%request, "->");
        match tokio::time::timeout(self.inner.write_timeout, writer.send(request.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.fail(DisconnectReason::WriteFailed(e.to_string()));
                Err(WriteError::Io(e))
            }
            Err(_) => {
                self.fail(DisconnectReason::WriteFailed("write timed out".to_owned()));
                Err(WriteError::Timeout(self.inner.write_timeout))
            }
        }
    }

    /// Records the first cause of death and wakes everyone watching.
    fn fail(&self, reason: DisconnectReason) {
        {
            let mut slot = lock(&self.inner.reason);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.lost.cancel();
    }

    fn reason(&self) -> DisconnectReason {
        lock(&self.inner.reason)
            .clone()
            .unwrap_or(DisconnectReason::Closed)
    }

    /// `true` if `frame` acknowledges one of our own heartbeats.
    fn absorbs(&self, frame: &Frame) -> bool {
        if !matches!(frame, Frame::Response(Response::KeepAliveAck)) {
            return false;
        }
        lock(&self.inner.pings).pop_front() == Some(PingOrigin::Heartbeat)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Read task ───────────────────────────────────────────────────────

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, VboxCodec>,
    connection: Connection,
    events: mpsc::Sender<ConnectionEvent>,
    config: ConnectionConfig,
) {
    let heartbeat_request = Request::authenticate(config.password.clone());
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_inbound = Instant::now();

    let reason = loop {
        let silence_deadline = last_inbound + config.keepalive_timeout;
        tokio::select! {
            biased;
            () = connection.inner.lost.cancelled() => break connection.reason(),
            item = reader.next() => match item {
                Some(Ok(decoded)) => {
                    last_inbound = Instant::now();
                    let event = match decoded {
                        Ok(frame) if connection.absorbs(&frame) => {
                            tracing::trace!("Heartbeat acknowledged");
                            continue;
                        }
                        Ok(frame) => ConnectionEvent::Frame(frame),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipped corrupt input");
                            ConnectionEvent::Corrupt(e)
                        }
                    };
                    if events.send(event).await.is_err() {
                        break DisconnectReason::Closed;
                    }
                }
                Some(Err(e)) => break DisconnectReason::ReadFailed(e.to_string()),
                None => break DisconnectReason::PeerClosed,
            },
            _ = heartbeat.tick() => {
                let connection = connection.clone();
                let request = heartbeat_request.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection.send_as(&request, PingOrigin::Heartbeat).await {
                        tracing::debug!(error = %e, "Heartbeat not sent");
                    }
                });
            }
            () = tokio::time::sleep_until(silence_deadline) => {
                break DisconnectReason::KeepAliveTimeout(config.keepalive_timeout);
            }
        }
    };

    connection.fail(reason);
    let reason = connection.reason();
    drop(reader);

    if let Ok(mut writer) = connection.inner.writer.try_lock() {
        let _ = tokio::time::timeout(CLOSE_GRACE, writer.close()).await;
    }

    match &reason {
        DisconnectReason::Closed => {
            tracing::debug!(addr = %connection.addr(), "Connection closed");
        }
        other => {
            tracing::warn!(addr = %connection.addr(), reason = %other, "Connection lost");
        }
    }
    let _ = events.send(ConnectionEvent::Lost(reason)).await;
}
