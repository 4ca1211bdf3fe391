//! # whiteboard-session — collaboration sessions for a shared whiteboard
//!
//! Room lifecycle, owner-approved joins, collaborator presence,
//! change-gated scene broadcast and reconnect supervision. The drawing
//! surface is external: it feeds scene snapshots and pointer positions
//! in and applies the remote snapshots this crate hands back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  commands   ┌───────────────────┐   Envelope    ┌─────────────┐
//! │ Session (handle) │ ──────────► │ SessionController │ ◄───────────► │ SyncChannel │
//! └──────────────────┘ ◄────────── │  JoinGate         │               └──────┬──────┘
//!        view / events             │  PresenceRegistry │                      │ WebSocket
//!                                  │  ChangeDetector   │                      │ or in-process
//!                                  │  ReconnectSuperv. │               ┌──────┴──────┐
//!                                  └─────────┬─────────┘               │  RelayHub   │
//!                                            │ HTTP                    │ (fan-out)   │
//!                                     ┌──────┴──────┐                  └─────────────┘
//!                                     │RoomDirectory│
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`] — session state machine
//! - [`runtime`] — single-writer task and the [`Session`] handle
//! - [`join_gate`] — owner-side FIFO of join requests
//! - [`presence`] — ordered collaborator registry with timeouts
//! - [`fingerprint`] — cheap change detection for scene broadcasts
//! - [`channel`] — relay connection (WebSocket transport)
//! - [`supervisor`] — reconnect backoff
//! - [`directory`] — room directory client (HTTP/JSON)
//! - [`protocol`] — bincode wire frames
//! - [`loopback`] / [`relay`] — room relay, in-process and over WebSocket

pub mod channel;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod fingerprint;
pub mod join_gate;
pub mod loopback;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod runtime;
pub mod scene;
pub mod supervisor;

// Re-exports for convenience
pub use channel::{ChannelSink, Connector, SyncChannel, WsConnector};
pub use config::{RelayConfig, SessionConfig};
pub use controller::{RoomSession, SessionController, SessionEvent, SessionPhase, SessionView};
pub use directory::{HttpRoomDirectory, RoomDirectory, RoomInfo};
pub use error::{ProtocolError, SessionError};
pub use fingerprint::{ChangeDetector, ChangeFingerprint, should_broadcast};
pub use join_gate::{Decision, DenyReason, JoinGate, PendingJoinRequest};
pub use loopback::{LocalConnector, LocalDirectory, RelayHub};
pub use presence::{Activity, Collaborator, Identity, PresenceRegistry, Role};
pub use protocol::{Envelope, Frame, Hello, Message};
pub use relay::RelayServer;
pub use runtime::{Session, StopHandle};
pub use scene::{Element, Pointer, SceneSnapshot};
pub use supervisor::{Backoff, ConnectionState, ReconnectSupervisor, Supervision};
