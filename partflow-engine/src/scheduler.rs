//! Part scheduler
//!
//! A single task owns the registry, the readiness set and the in-flight
//! counter. Uploader handles send it commands, pumps and part tasks send it
//! events; it never awaits anything but its two channels, so every state
//! transition happens between suspension points.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use partflow_core::*;

use crate::config::{SelectionPolicy, UploaderConfig};
use crate::registry::{spawn_shared, Registry, Session, SharedResult, StartUpload};
use crate::source::Drain;

/// Signals from pumps and part tasks
#[derive(Debug)]
pub(crate) enum Event {
    DataAvailable(SessionId),
    PartSettled {
        id: SessionId,
        part_number: u32,
        size: usize,
        outcome: Result<String>,
    },
    /// Finalization failed or was dropped; allow another attempt
    Released(SessionId),
    /// Finalization succeeded
    Finalized(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeKind {
    Complete,
    Abort,
}

/// What a finalizer needs from a session, taken while it is locked for
/// finalization.
///
/// Dropping the ticket without calling [`FinalizeTicket::finish`] unlocks
/// the session again, wherever the drop happens.
pub(crate) struct FinalizeTicket {
    pub key: String,
    pub upload_id: SharedResult<String>,
    pub sliced: SharedResult<()>,
    pub metadata: Option<serde_json::Value>,
    id: SessionId,
    events: mpsc::UnboundedSender<Event>,
    finished: bool,
}

impl FinalizeTicket {
    /// Remove the session from the registry
    pub fn finish(mut self) {
        self.finished = true;
        let _ = self.events.send(Event::Finalized(self.id));
    }
}

impl Drop for FinalizeTicket {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.events.send(Event::Released(self.id));
        }
    }
}

/// Requests from uploader handles
pub(crate) enum Command {
    Start {
        request: StartUpload,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    UploadId {
        id: SessionId,
        reply: oneshot::Sender<Result<SharedResult<String>>>,
    },
    Parts {
        id: SessionId,
        reply: oneshot::Sender<Result<Vec<SharedResult<PartResult>>>>,
    },
    Finalize {
        id: SessionId,
        kind: FinalizeKind,
        reply: oneshot::Sender<Result<FinalizeTicket>>,
    },
    Ids {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub sessions: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

pub(crate) struct Scheduler {
    config: UploaderConfig,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    ready: BTreeSet<SessionId>,
    in_flight: usize,
    max_in_flight: usize,
    cursor: Option<SessionId>,
    rng: StdRng,
    events: mpsc::UnboundedSender<Event>,
    progress: broadcast::Sender<PartUploaded>,
}

impl Scheduler {
    pub fn new(
        config: UploaderConfig,
        store: Arc<dyn ObjectStore>,
        events: mpsc::UnboundedSender<Event>,
        progress: broadcast::Sender<PartUploaded>,
    ) -> Self {
        Scheduler {
            config,
            store,
            registry: Registry::new(),
            ready: BTreeSet::new(),
            in_flight: 0,
            max_in_flight: 0,
            cursor: None,
            rng: StdRng::from_entropy(),
            events,
            progress,
        }
    }

    /// Serve commands until every uploader handle is gone
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!("Scheduler started for bucket {}", self.config.bucket);
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }
        debug!(
            "Scheduler stopped with {} sessions registered, {} parts in flight",
            self.registry.len(),
            self.in_flight
        );
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::DataAvailable(id) => {
                let readable = self
                    .registry
                    .get(&id)
                    .map(|session| session.reader.is_some())
                    .unwrap_or(false);
                if readable {
                    self.ready.insert(id);
                }
            }
            Event::PartSettled {
                id,
                part_number,
                size,
                outcome,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match outcome {
                    Ok(tag) => {
                        debug!("Session {} part {} uploaded ({} bytes)", id, part_number, size);
                        // No subscribers is fine
                        let _ = self.progress.send(PartUploaded {
                            session: id,
                            part_number,
                            tag,
                            size,
                        });
                    }
                    Err(e) => warn!("Session {} part {} failed: {}", id, part_number, e),
                }
            }
            Event::Released(id) => {
                if let Ok(session) = self.registry.get_mut(&id) {
                    session.finalizing = false;
                }
            }
            Event::Finalized(id) => {
                self.ready.remove(&id);
                if let Some(session) = self.registry.remove(&id) {
                    info!(
                        "Removed upload session {} ({} parts submitted)",
                        id,
                        session.submitted()
                    );
                }
            }
        }
        self.schedule();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => {
                let events = self.events.clone();
                let created = self.registry.create(request, &self.store, &self.config, move |id| {
                    let _ = events.send(Event::DataAvailable(id));
                });
                let _ = reply.send(created);
            }
            Command::UploadId { id, reply } => {
                let upload_id = self.registry.get(&id).map(|s| s.upload_id.clone());
                let _ = reply.send(upload_id);
            }
            Command::Parts { id, reply } => {
                let parts = self.registry.get(&id).map(|s| s.parts.clone());
                let _ = reply.send(parts);
            }
            Command::Finalize { id, kind, reply } => {
                let _ = reply.send(self.begin_finalize(id, kind));
            }
            Command::Ids { reply } => {
                let _ = reply.send(self.registry.ids());
            }
            Command::Stats { reply } => {
                let _ = reply.send(SchedulerStats {
                    sessions: self.registry.len(),
                    ready: self.ready.len(),
                    in_flight: self.in_flight,
                    max_in_flight: self.max_in_flight,
                });
            }
        }
    }

    fn begin_finalize(&mut self, id: SessionId, kind: FinalizeKind) -> Result<FinalizeTicket> {
        let session = self.registry.get_mut(&id)?;
        if session.finalizing {
            return Err(UploadError::FinalizationInProgress(id));
        }
        session.finalizing = true;

        if kind == FinalizeKind::Abort {
            session.close();
            self.ready.remove(&id);
        }

        Ok(FinalizeTicket {
            key: session.target.key.clone(),
            upload_id: session.upload_id.clone(),
            sliced: session.sliced.clone(),
            metadata: session.metadata.clone(),
            id,
            events: self.events.clone(),
            finished: false,
        })
    }

    /// Service ready sessions until the cap is reached or none are ready
    fn schedule(&mut self) {
        while self.in_flight < self.config.concurrency {
            let Some(id) = self.select() else {
                break;
            };
            self.drain(id);
        }
    }

    fn select(&mut self) -> Option<SessionId> {
        match self.config.selection {
            SelectionPolicy::Random => {
                let ready: Vec<SessionId> = self.ready.iter().copied().collect();
                ready.choose(&mut self.rng).copied()
            }
            SelectionPolicy::RoundRobin => {
                let next = match self.cursor {
                    Some(cursor) => self
                        .ready
                        .range((Bound::Excluded(cursor), Bound::Unbounded))
                        .next()
                        .or_else(|| self.ready.iter().next())
                        .copied(),
                    None => self.ready.iter().next().copied(),
                };
                self.cursor = next;
                next
            }
        }
    }

    /// Cut parts off one session while the cap allows
    fn drain(&mut self, id: SessionId) {
        while self.in_flight < self.config.concurrency {
            let Ok(session) = self.registry.get_mut(&id) else {
                self.ready.remove(&id);
                return;
            };
            let Some(reader) = session.reader.as_ref() else {
                self.ready.remove(&id);
                return;
            };

            match reader.try_drain(self.config.part_size) {
                Drain::Chunk(body) => {
                    let Some(part_number) = session.next_part_number() else {
                        warn!(
                            "Session {} has no part number left after {} parts, stopping its source",
                            id,
                            session.submitted()
                        );
                        session.fail(UploadError::PartLimitExceeded(id));
                        self.ready.remove(&id);
                        return;
                    };
                    dispatch_part(
                        session,
                        part_number,
                        body,
                        &self.store,
                        &self.config.bucket,
                        &self.events,
                    );
                    self.in_flight += 1;
                    self.max_in_flight = self.max_in_flight.max(self.in_flight);
                }
                Drain::NotReady => {
                    self.ready.remove(&id);
                    return;
                }
                Drain::Exhausted => {
                    debug!(
                        "Session {} source exhausted after {} parts",
                        id,
                        session.submitted()
                    );
                    session.mark_sliced(Ok(()));
                    self.ready.remove(&id);
                    return;
                }
                Drain::Failed(e) => {
                    warn!("Session {} source failed: {}", id, e);
                    session.mark_sliced(Err(e));
                    self.ready.remove(&id);
                    return;
                }
            }
        }
    }
}

/// Record the part's pending result, then start the request.
///
/// The result is appended before the task can run so the next number
/// handed out already accounts for this part.
fn dispatch_part(
    session: &mut Session,
    part_number: u32,
    body: Bytes,
    store: &Arc<dyn ObjectStore>,
    bucket: &str,
    events: &mpsc::UnboundedSender<Event>,
) {
    let id = session.id;
    let size = body.len();
    let upload_id = session.upload_id.clone();
    let key = session.target.key.clone();
    let store = store.clone();
    let bucket = bucket.to_string();
    let events = events.clone();

    debug!("Session {} dispatching part {} ({} bytes)", id, part_number, size);

    let part = spawn_shared(async move {
        let outcome = async {
            let upload_id = upload_id.await?;
            store
                .upload_part(&bucket, &key, part_number, &upload_id, body)
                .await
        }
        .await;

        let _ = events.send(Event::PartSettled {
            id,
            part_number,
            size,
            outcome: outcome.clone(),
        });

        outcome.map(|tag| PartResult::new(part_number, tag))
    });

    session.push_part(part);
}
