mod availability;
mod directory;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;
mod validator;
#[cfg(test)]
mod tests;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use error::{CancellationError, CreateError, EngineError, StoreError};
pub use store::{IntervalStore, SharedResourceState};
pub use validator::{
    find_conflicts, resolve_team, Admission, Field, RangeError, RejectReason, Rejection,
    ReservationValidator, ValidationOutcome,
};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::warn!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so stray buffered bytes don't
    // ride along with the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking engine: rooms and their reservations, the team/user
/// directory, and the log that makes both durable.
pub struct Engine {
    pub store: IntervalStore,
    pub(super) teams: DashMap<Ulid, Team>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) validator: ReservationValidator,
    /// Reservations that already had their reminder sent.
    pub(super) reminded: DashSet<Ulid>,
}

/// Apply a room-scoped event to a state whose write guard the caller holds.
fn apply_to_resource(store: &IntervalStore, rs: &mut ResourceState, event: &Event) {
    match event {
        Event::ResourceUpdated {
            name,
            capacity,
            description,
            ..
        } => {
            rs.name = name.clone();
            rs.capacity = *capacity;
            rs.description = description.clone();
        }
        Event::ResourceActivationChanged { active, .. } => rs.active = *active,
        Event::ResourceDeleted { .. } => store.remove_resource_locked(rs),
        Event::ReservationCreated { interval } => {
            if let Err(e) = store.insert_locked(rs, interval.clone()) {
                tracing::warn!("skipping logged reservation {}: {e}", interval.id);
            }
        }
        Event::ReservationCancelled { id, .. } => {
            let _ = store.remove_locked(rs, *id);
        }
        Event::TeamDeleted { id } => {
            store.remove_where_locked(rs, |i| i.team_id == *id);
        }
        _ => {}
    }
}

/// The room an event is scoped to, if any.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceUpdated { id, .. }
        | Event::ResourceActivationChanged { id, .. }
        | Event::ResourceDeleted { id } => Some(*id),
        Event::ReservationCreated { interval } => Some(interval.resource_id),
        Event::ReservationCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceCreated { .. }
        | Event::TeamCreated { .. }
        | Event::TeamRenamed { .. }
        | Event::TeamDeleted { .. }
        | Event::UserRegistered { .. }
        | Event::UserUpdated { .. }
        | Event::UserRemoved { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        validator: ReservationValidator,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: IntervalStore::new(validator.site_offset()),
            teams: DashMap::new(),
            users: DashMap::new(),
            wal_tx,
            notify,
            validator,
            reminded: DashSet::new(),
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events from {}: {} rooms, {} reservations",
            events.len(),
            wal_path.display(),
            engine.store.resource_count(),
            engine.store.interval_count()
        );
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE)
            .set(engine.store.resource_count() as f64);
        Ok(engine)
    }

    /// Replay never validates: the log only holds events that were admitted.
    /// Nothing else holds these locks yet, so `try_write` cannot fail.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated {
                id,
                name,
                capacity,
                description,
            } => {
                self.store.insert_resource(ResourceState::new(
                    *id,
                    name.clone(),
                    *capacity,
                    description.clone(),
                ));
            }
            Event::TeamDeleted { .. } => {
                self.apply_directory(event);
                for rs in self.store.resources() {
                    if let Ok(mut guard) = rs.try_write() {
                        apply_to_resource(&self.store, &mut guard, event);
                    }
                }
            }
            other => match event_resource_id(other) {
                Some(resource_id) => {
                    if let Some(rs) = self.store.get_resource(&resource_id)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        apply_to_resource(&self.store, &mut guard, other);
                    }
                }
                None => self.apply_directory(other),
            },
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply, then broadcast. Caller holds the room's write guard.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(&self.store, rs, event);
        self.notify.send(resource_id, event);
        Ok(())
    }

    pub fn validator(&self) -> &ReservationValidator {
        &self.validator
    }
}
