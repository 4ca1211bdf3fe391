//! WebSocket relay server over a [`RelayHub`].
//!
//! ```text
//! Client A ──┐                         ┌── Client A
//!             ├── Hello ── RelayHub ────┤
//! Client B ──┘   (route/fan-out)       └── Client B
//! ```
//!
//! Each connection performs the `Hello` → `Welcome | Rejected` handshake,
//! then pumps frames in both directions until either side ends, at which
//! point the member is detached from the hub.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::channel::read_frame;
use crate::config::RelayConfig;
use crate::error::{ProtocolError, SessionError};
use crate::loopback::RelayHub;
use crate::protocol::Frame;

pub struct RelayServer {
    hub: Arc<RelayHub>,
    config: RelayConfig,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind the listener. Use port 0 to let the OS choose.
    pub async fn bind(hub: Arc<RelayHub>, config: RelayConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        Ok(Self {
            hub,
            config,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let capacity = self.config.channel_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, hub, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<RelayHub>,
    capacity: usize,
) -> Result<(), SessionError> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let hello = match read_frame(&mut ws_receiver).await? {
        Frame::Hello(hello) => hello,
        _ => return Err(ProtocolError::UnexpectedFrame { expected: "hello" }.into()),
    };

    let mut attachment = match hub.attach(hello, capacity) {
        Ok(attachment) => attachment,
        Err(e) => {
            let rejected = Frame::Rejected {
                reason: e.to_string(),
            }
            .encode()?;
            let _ = ws_sender.send(WsMessage::Binary(rejected.into())).await;
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };

    let welcome = Frame::Welcome {
        members: attachment.members,
    }
    .encode()?;
    if let Err(e) = ws_sender.send(WsMessage::Binary(welcome.into())).await {
        hub.detach(&attachment.room_id, attachment.member_id, attachment.connection);
        return Err(SessionError::ConnectFailed(e.to_string()));
    }

    loop {
        tokio::select! {
            // Hub → client
            outbound = attachment.incoming.recv() => {
                let Some(envelope) = outbound else {
                    // Kicked, superseded or dropped by the hub
                    break;
                };
                let bytes = match Frame::Message(envelope).encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("Failed to encode frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::Binary(bytes.into())).await {
                    log::error!("WebSocket send error: {e}");
                    break;
                }
            }

            // Client → hub
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Binary(data))) => {
                        match Frame::decode(&data).and_then(Frame::into_envelope) {
                            Ok(envelope) => {
                                let routed = hub.route(
                                    &attachment.room_id,
                                    attachment.member_id,
                                    attachment.connection,
                                    envelope,
                                );
                                if routed.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Dropping malformed frame: {e}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::error!("WebSocket read error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.detach(&attachment.room_id, attachment.member_id, attachment.connection);
    let _ = ws_sender.close().await;
    Ok(())
}
