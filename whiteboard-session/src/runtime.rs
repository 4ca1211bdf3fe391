//! Single-writer event loop around a [`SessionController`].
//!
//! ```text
//! Session handle ──commands──┐
//! relay channel ──envelopes──┼──► select! ──► SessionController ──► watch<SessionView>
//! reconnect deadline ────────┤                                  └─► broadcast<SessionEvent>
//! tick interval ─────────────┘
//! ```
//!
//! The controller lives inside one task; handles only talk to it through
//! the command queue. When every handle is dropped the session is stopped
//! and the task ends.

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::controller::{SessionController, SessionEvent, SessionView};
use crate::scene::{Pointer, SceneSnapshot};

enum Command {
    Start {
        room_id: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SyncLocalChange(SceneSnapshot),
    PointerUpdate(Pointer),
    Approve {
        request_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Deny {
        request_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    CancelPending {
        reply: oneshot::Sender<bool>,
    },
    Kick {
        target: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Reconnect {
        reply: oneshot::Sender<bool>,
    },
    SetInCall(bool),
    ClearError,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    events: broadcast::Sender<SessionEvent>,
}

/// Tears down the session started by [`Session::start_collaboration`].
#[derive(Clone)]
pub struct StopHandle {
    commands: mpsc::Sender<Command>,
}

impl StopHandle {
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = done.await;
        }
    }
}

impl Session {
    /// Move `controller` into its own task.
    pub fn spawn(controller: SessionController) -> Self {
        let (commands, rx) = mpsc::channel(controller.config().channel_capacity.max(1));
        let view = controller.watch();
        let events = controller.event_sender();
        tokio::spawn(run(controller, rx));
        Self {
            commands,
            view,
            events,
        }
    }

    /// Create (no id) or join a room. Failures surface only through
    /// [`SessionView::error_message`].
    pub async fn start_collaboration(&self, room_id: Option<&str>) -> Option<StopHandle> {
        let started = self
            .request(|reply| Command::Start {
                room_id: room_id.map(str::to_string),
                reply,
            })
            .await
            .unwrap_or(false);
        started.then(|| StopHandle {
            commands: self.commands.clone(),
        })
    }

    pub async fn stop_session(&self) {
        StopHandle {
            commands: self.commands.clone(),
        }
        .stop()
        .await;
    }

    pub async fn sync_local_change(&self, snapshot: SceneSnapshot) {
        self.fire(Command::SyncLocalChange(snapshot)).await;
    }

    /// Never waits: pointer traffic is dropped when the queue is full.
    pub fn send_pointer_update(&self, pointer: Pointer) {
        let _ = self.commands.try_send(Command::PointerUpdate(pointer));
    }

    pub async fn approve_join_request(&self, request_id: Uuid) -> bool {
        self.request(|reply| Command::Approve { request_id, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn deny_join_request(&self, request_id: Uuid) -> bool {
        self.request(|reply| Command::Deny { request_id, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn cancel_pending_approval(&self) -> bool {
        self.request(|reply| Command::CancelPending { reply })
            .await
            .unwrap_or(false)
    }

    pub async fn send_kick_message(&self, target: Uuid) -> bool {
        self.request(|reply| Command::Kick { target, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn reconnect(&self) -> bool {
        self.request(|reply| Command::Reconnect { reply })
            .await
            .unwrap_or(false)
    }

    pub async fn set_in_call(&self, in_call: bool) {
        self.fire(Command::SetInCall(in_call)).await;
    }

    pub async fn clear_error(&self) {
        self.fire(Command::ClearError).await;
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn fire(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            log::warn!("Session task has ended");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(command(reply)).await.ok()?;
        answer.await.ok()
    }
}

async fn run(mut controller: SessionController, mut commands: mpsc::Receiver<Command>) {
    let mut ticker = tokio::time::interval(controller.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = controller.reconnect_deadline();

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    log::debug!("All session handles dropped, stopping");
                    controller.stop_session().await;
                    break;
                };
                execute(&mut controller, command).await;
            }

            inbound = controller.next_inbound() => {
                match inbound {
                    Some(envelope) => controller.handle_envelope(envelope).await,
                    None => controller.on_transport_lost(),
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                controller.attempt_reconnect().await;
            }

            _ = ticker.tick() => {
                controller.tick(Instant::now()).await;
            }
        }
    }
}

async fn execute(controller: &mut SessionController, command: Command) {
    match command {
        Command::Start { room_id, reply } => {
            let started = controller
                .start_collaboration(room_id.as_deref())
                .await
                .is_ok();
            let _ = reply.send(started);
        }
        Command::Stop { reply } => {
            controller.stop_session().await;
            let _ = reply.send(());
        }
        Command::SyncLocalChange(snapshot) => {
            controller.sync_local_change(snapshot).await;
        }
        Command::PointerUpdate(pointer) => {
            controller.send_pointer_update(pointer);
        }
        Command::Approve { request_id, reply } => {
            let _ = reply.send(controller.approve_join_request(&request_id).await);
        }
        Command::Deny { request_id, reply } => {
            let _ = reply.send(controller.deny_join_request(&request_id).await);
        }
        Command::CancelPending { reply } => {
            let _ = reply.send(controller.cancel_pending_approval().await);
        }
        Command::Kick { target, reply } => {
            let _ = reply.send(controller.send_kick_message(target).await);
        }
        Command::Reconnect { reply } => {
            let _ = reply.send(controller.reconnect().await);
        }
        Command::SetInCall(in_call) => controller.set_in_call(in_call).await,
        Command::ClearError => controller.clear_error(),
    }
}
