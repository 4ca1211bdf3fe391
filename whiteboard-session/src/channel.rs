//! One logical connection to the room relay.
//!
//! Provides:
//! - [`SyncChannel`]: fire-and-forget send, ordered receive of envelopes
//! - [`ChannelSink`]: the transport seam for the outbound half
//! - [`Connector`]: opens a channel and performs the handshake
//! - [`WsConnector`]: WebSocket transport (tokio-tungstenite)
//!
//! Sending resolves once the frame is queued to the transport. There is no
//! per-message acknowledgement; peers converge through full scene
//! snapshots instead.

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{Envelope, Frame, Hello};

/// Outbound half of a transport.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Queue an envelope, waiting for room in the queue if necessary.
    async fn send(&self, envelope: Envelope) -> Result<(), SessionError>;

    /// Queue an envelope or drop it when the queue is full.
    fn try_send(&self, envelope: Envelope) -> Result<(), SessionError>;

    /// Tear the connection down. Must be idempotent.
    fn close(&self);
}

/// Opens channels to a relay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, relay_url: &str, hello: Hello) -> Result<SyncChannel, SessionError>;
}

/// A connected, bidirectional message stream for one room.
pub struct SyncChannel {
    sink: Box<dyn ChannelSink>,
    incoming: mpsc::Receiver<Envelope>,
}

impl SyncChannel {
    pub fn new(sink: Box<dyn ChannelSink>, incoming: mpsc::Receiver<Envelope>) -> Self {
        Self { sink, incoming }
    }

    /// An in-memory channel and the far end of it.
    pub fn memory(capacity: usize) -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let channel = Self::new(Box::new(QueueSink::new(out_tx)), in_rx);
        (
            channel,
            RemoteEnd {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    pub async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.sink.send(envelope).await
    }

    pub fn try_send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.sink.try_send(envelope)
    }

    /// Next inbound envelope; `None` once the transport has closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.incoming.recv().await
    }

    /// Non-blocking receive. `Ok(None)` means nothing is buffered.
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, SessionError> {
        match self.incoming.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::TransportLost),
        }
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        self.sink.close();
    }
}

/// The relay side of [`SyncChannel::memory`].
pub struct RemoteEnd {
    /// Envelopes the channel owner sent.
    pub outbound: mpsc::Receiver<Envelope>,
    /// Feed envelopes to the channel owner. Dropping it closes the channel.
    pub inbound: mpsc::Sender<Envelope>,
}

impl RemoteEnd {
    /// Drain everything sent so far.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut sent = Vec::new();
        while let Ok(envelope) = self.outbound.try_recv() {
            sent.push(envelope);
        }
        sent
    }
}

/// Sink backed by a bounded mpsc queue.
pub struct QueueSink {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Envelope>, SessionError> {
        self.tx.lock().clone().ok_or(SessionError::TransportLost)
    }
}

#[async_trait]
impl ChannelSink for QueueSink {
    async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.sender()?
            .send(envelope)
            .await
            .map_err(|_| SessionError::TransportLost)
    }

    fn try_send(&self, envelope: Envelope) -> Result<(), SessionError> {
        match self.sender()?.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => {
                log::debug!("Outbound queue full, dropping {}", envelope.message.kind());
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::TransportLost),
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

/// Commands sent to the WebSocket writer task.
enum WsCommand {
    Send(Envelope),
    Close,
}

struct WsSink {
    commands: mpsc::Sender<WsCommand>,
}

#[async_trait]
impl ChannelSink for WsSink {
    async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.commands
            .send(WsCommand::Send(envelope))
            .await
            .map_err(|_| SessionError::TransportLost)
    }

    fn try_send(&self, envelope: Envelope) -> Result<(), SessionError> {
        match self.commands.try_send(WsCommand::Send(envelope)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("WebSocket writer busy, dropping frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::TransportLost),
        }
    }

    fn close(&self) {
        let _ = self.commands.try_send(WsCommand::Close);
    }
}

/// Connects to a relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    capacity: usize,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            capacity: config.channel_capacity.max(1),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, relay_url: &str, hello: Hello) -> Result<SyncChannel, SessionError> {
        log::info!("Connecting to relay {relay_url} for room {}", hello.room_id);
        let (ws_stream, _) = tokio_tungstenite::connect_async(relay_url)
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
        let (mut writer, mut reader) = ws_stream.split();

        let hello_bytes = Frame::Hello(hello).encode()?;
        writer
            .send(WsMessage::Binary(hello_bytes.into()))
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let answer = tokio::time::timeout(self.handshake_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| SessionError::ConnectFailed("handshake timed out".into()))??;
        match answer {
            Frame::Welcome { members } => {
                log::debug!("Handshake accepted, {members} member(s) connected");
            }
            Frame::Rejected { reason } => return Err(SessionError::RoomUnavailable(reason)),
            _ => {
                return Err(crate::error::ProtocolError::UnexpectedFrame { expected: "welcome" }.into())
            }
        }

        // Writer task: forward queued commands to the socket
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(self.capacity);
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WsCommand::Send(envelope) => {
                        let bytes = match Frame::Message(envelope).encode() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                log::error!("Failed to encode frame: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = writer.send(WsMessage::Binary(bytes.into())).await {
                            log::error!("WebSocket send error: {e}");
                            break;
                        }
                    }
                    WsCommand::Close => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        });

        // Reader task: decode frames until the socket closes
        let (in_tx, in_rx) = mpsc::channel::<Envelope>(self.capacity);
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(WsMessage::Binary(data)) => {
                        match Frame::decode(&data).and_then(Frame::into_envelope) {
                            Ok(envelope) => {
                                if in_tx.send(envelope).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Dropping malformed frame: {e}"),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Err(e) => {
                        log::error!("WebSocket read error: {e}");
                        break;
                    }
                    Ok(_) => {}
                }
            }
            log::info!("Relay connection closed");
        });

        Ok(SyncChannel::new(Box::new(WsSink { commands: cmd_tx }), in_rx))
    }
}

/// Read the next binary frame, skipping control messages.
pub(crate) async fn read_frame<S>(reader: &mut S) -> Result<Frame, SessionError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => return Ok(Frame::decode(&data)?),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(SessionError::ConnectFailed(e.to_string())),
        }
    }
    Err(SessionError::ConnectFailed("connection closed during handshake".into()))
}
