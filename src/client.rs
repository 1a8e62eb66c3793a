//! Clock client — the single actor that owns all protocol state.
//!
//! DESIGN
//! ======
//! Channel events, local commands from the UI, and control verdicts are
//! serialized onto one `select!` loop, so no two mutations interleave. The
//! only concurrent work is the operator prompt, which runs on its own task
//! and re-enters the loop as a verdict message.
//!
//! After every loop iteration the current announcement is published on a
//! watch channel; the event channel reads it at each connect attempt.
//!
//! LIFECYCLE
//! =========
//! 1. First `Connected`: the relay already has our announcement from the
//!    connect query, nothing to send.
//! 2. Every later `Connected`: push the full exam list (`exam_update`).
//! 3. Channel closed: the loop ends with `Ok(())`.
//! 4. Too many consecutive id clashes: the loop ends with
//!    [`SyncError::IdentityCollision`].

use std::sync::Arc;
use std::time::Duration;

use frames::Frame;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelConfig, ChannelError, ChannelEvent, ConnectivityState, EventChannel, EventSender};
use crate::collision::CollisionResolver;
use crate::control::{ControlArbiter, ControlVerdict, OperatorPrompt};
use crate::error::SyncError;
use crate::events::{Announcement, Inbound, MalformedFrame, Outbound};
use crate::exam::Exam;
use crate::identity::{ClockIdentity, IdentityStore};
use crate::occupancy::OccupancyState;
use crate::sync::{DisplaySink, Synchronizer};

// =============================================================================
// COMMANDS
// =============================================================================

/// A mutation requested by the local operator.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalCommand {
    AddExam(Exam),
    EditExam(Exam),
    RemoveExam(String),
    SetOccupancy { flag: String, occupied: bool },
    ToggleOccupancy(String),
    Rename(String),
    Resync,
}

/// Point-in-time copy of the client's state for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSnapshot {
    pub identity: ClockIdentity,
    pub exams: Vec<Exam>,
    pub occupancy: Vec<(String, bool)>,
}

enum Request {
    Apply(LocalCommand, oneshot::Sender<Result<(), SyncError>>),
    Snapshot(oneshot::Sender<ClockSnapshot>),
}

/// Cloneable handle the UI uses to talk to the client loop.
#[derive(Clone)]
pub struct ClockHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl ClockHandle {
    /// Apply a local mutation and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns the mutation's own error, or [`SyncError::ClientStopped`] if
    /// the client loop is gone.
    pub async fn apply(&self, command: LocalCommand) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Apply(command, reply))
            .map_err(|_| SyncError::ClientStopped)?;
        rx.await.map_err(|_| SyncError::ClientStopped)?
    }

    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the client loop is gone.
    pub async fn snapshot(&self) -> Result<ClockSnapshot, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot(reply))
            .map_err(|_| SyncError::ClientStopped)?;
        rx.await.map_err(|_| SyncError::ClientStopped)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Collaborators and settings the client is built from.
pub struct ClientParts {
    pub identity: IdentityStore,
    pub occupancy: OccupancyState,
    pub display: Arc<dyn DisplaySink>,
    pub prompt: Arc<dyn OperatorPrompt>,
    pub open_to_requests: watch::Receiver<bool>,
    pub decision_timeout: Duration,
    pub max_collision_retries: u32,
}

pub struct ClockClient {
    identity: IdentityStore,
    sync: Synchronizer,
    collisions: CollisionResolver,
    arbiter: ControlArbiter,
    outbox: EventSender,
    announcement: watch::Sender<Announcement>,
    requests: mpsc::UnboundedReceiver<Request>,
    verdicts: mpsc::UnboundedReceiver<ControlVerdict>,
    connected_once: bool,
}

impl ClockClient {
    #[must_use]
    pub fn new(parts: ClientParts, outbox: EventSender, announcement: watch::Sender<Announcement>) -> (Self, ClockHandle) {
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (verdict_tx, verdicts) = mpsc::unbounded_channel();

        let arbiter =
            ControlArbiter::new(parts.open_to_requests, parts.prompt, parts.decision_timeout, verdict_tx, outbox.clone());
        let client = Self {
            identity: parts.identity,
            sync: Synchronizer::new(parts.occupancy, outbox.clone(), parts.display),
            collisions: CollisionResolver::new(parts.max_collision_retries, outbox.clone()),
            arbiter,
            outbox,
            announcement,
            requests,
            verdicts,
            connected_once: false,
        };
        (client, ClockHandle { tx: request_tx })
    }

    /// Process events until the channel closes or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IdentityCollision`] when id clashes keep coming
    /// past the retry bound.
    pub async fn run(
        mut self,
        mut channel: mpsc::Receiver<ChannelEvent>,
        mut connectivity: watch::Receiver<ConnectivityState>,
    ) -> Result<(), SyncError> {
        info!(clock_id = %self.identity.current().id, "client: started");
        self.publish_announcement();
        let mut watching_connectivity = true;

        loop {
            tokio::select! {
                event = channel.recv() => match event {
                    Some(ChannelEvent::Connected) => self.on_connected(),
                    Some(ChannelEvent::Frame(frame)) => self.on_frame(&frame)?,
                    None => break,
                },
                Some(request) = self.requests.recv() => self.on_request(request),
                Some(verdict) = self.verdicts.recv() => self.arbiter.on_verdict(verdict),
                changed = connectivity.changed(), if watching_connectivity => {
                    if changed.is_ok() {
                        let state = *connectivity.borrow_and_update();
                        self.sync.connectivity_changed(state);
                    } else {
                        watching_connectivity = false;
                    }
                }
            }
            self.publish_announcement();
        }

        info!("client: channel closed, stopping");
        Ok(())
    }

    fn on_connected(&mut self) {
        if self.connected_once {
            self.sync.resync();
        }
        self.connected_once = true;
    }

    fn on_frame(&mut self, frame: &Frame) -> Result<(), SyncError> {
        debug!(event = %frame.event, id = %frame.id, "client: inbound");
        let inbound = match Inbound::decode(frame) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                debug!(event = %frame.event, "client: unhandled event");
                self.collisions.reset();
                return Ok(());
            }
            Err(MalformedFrame { sender, error }) => {
                self.collisions.reset();
                match sender {
                    Some(sender) => self.sync.on_malformed(&sender, &error),
                    None => warn!(error = %error, "client: malformed event without sender"),
                }
                return Ok(());
            }
        };

        if inbound != Inbound::ClockIdClash {
            self.collisions.reset();
        }
        match inbound {
            Inbound::ClockIdClash => match self.collisions.on_clash(&mut self.identity, &self.sync) {
                Ok(_) => {}
                Err(e @ SyncError::IdentityCollision { .. }) => return Err(e),
                Err(e) => warn!(error = %e, "client: clash resolution failed"),
            },
            Inbound::NewExam { sender, fields } => self.sync.on_remote_new_exam(&sender, &fields),
            Inbound::EditExam { sender, target_id, fields } => {
                self.sync.on_remote_edit_exam(&sender, &target_id, &fields);
            }
            Inbound::DeleteExam { sender, target_id } => self.sync.on_remote_delete_exam(&sender, &target_id),
            Inbound::Occupancy(update) => self.sync.on_remote_occupancy(&update),
            Inbound::ControlRequest(request) => self.arbiter.on_request(request),
        }
        Ok(())
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Apply(command, reply) => {
                let result = self.apply(command);
                if let Err(e) = &result {
                    warn!(error = %e, "client: local command failed");
                }
                let _ = reply.send(result);
            }
            Request::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn apply(&mut self, command: LocalCommand) -> Result<(), SyncError> {
        match command {
            LocalCommand::AddExam(exam) => self.sync.on_local_exam_added(exam),
            LocalCommand::EditExam(exam) => self.sync.on_local_exam_edited(exam),
            LocalCommand::RemoveExam(id) => self.sync.on_local_exam_removed(&id).map(|_| ()),
            LocalCommand::SetOccupancy { flag, occupied } => self.sync.on_local_occupancy_changed(&flag, occupied),
            LocalCommand::ToggleOccupancy(flag) => self.sync.on_local_occupancy_toggled(&flag).map(|_| ()),
            LocalCommand::Rename(name) => {
                self.identity.rename(name.clone())?;
                info!(%name, "client: renamed");
                self.outbox.send(Outbound::Rename(name))
            }
            LocalCommand::Resync => {
                self.sync.resync();
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            identity: self.identity.current().clone(),
            exams: self.sync.exams().to_vec(),
            occupancy: self
                .sync
                .occupancy()
                .iter()
                .map(|(flag, occupied)| (flag.to_owned(), occupied))
                .collect(),
        }
    }

    fn publish_announcement(&self) {
        let next = self.sync.announcement(self.identity.current());
        self.announcement.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

// =============================================================================
// WIRING
// =============================================================================

/// A connected clock: UI handle, transport, and the client loop task.
pub struct RunningClock {
    pub handle: ClockHandle,
    pub channel: EventChannel,
    pub task: JoinHandle<Result<(), SyncError>>,
}

/// Connect to the relay and spawn the client loop.
///
/// # Errors
///
/// Returns a [`ChannelError`] if the relay URL is unusable.
pub fn start(config: ChannelConfig, parts: ClientParts) -> Result<RunningClock, ChannelError> {
    let initial = Announcement { identity: parts.identity.current().clone(), exams: Vec::new() };
    let (announce_tx, announce_rx) = watch::channel(initial);

    let (channel, events) = EventChannel::connect(config, announce_rx)?;
    let (client, handle) = ClockClient::new(parts, channel.sender(), announce_tx);
    let task = tokio::spawn(client.run(events, channel.subscribe_state()));

    Ok(RunningClock { handle, channel, task })
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
