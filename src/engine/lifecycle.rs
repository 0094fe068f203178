use std::time::Instant;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notice, NoticeKind, Notifier};
use crate::observability::{self, reason_label};

use super::error::{CancellationError, CreateError, EngineError, StoreError};
use super::validator::{Admission, Field, RejectReason, Rejection, ValidationOutcome};
use super::Engine;

impl Engine {
    /// Validate and commit a proposal.
    ///
    /// The room's write guard is held from validation through insertion,
    /// so two overlapping proposals for the same room can never both be
    /// admitted. A rejection leaves no trace; the committed interval gets a
    /// fresh id and the team chosen by permission narrowing.
    pub async fn create_reservation(
        &self,
        proposal: Proposal,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<ReservedInterval, CreateError> {
        let result = self.create_inner(proposal, actor, &now).await;
        match &result {
            Ok(interval) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    "reserved {} on room {} for team {} ({} .. {})",
                    interval.id,
                    interval.resource_id,
                    interval.team_id,
                    interval.start.to_rfc3339(),
                    interval.end.to_rfc3339()
                );
            }
            Err(CreateError::Rejected(rejection)) => {
                metrics::counter!(
                    observability::RESERVATIONS_REJECTED_TOTAL,
                    "reason" => reason_label(&rejection.reason)
                )
                .increment(1);
                tracing::debug!("proposal by {} rejected: {rejection}", actor.user_id);
            }
            Err(CreateError::Engine(e)) => tracing::warn!("reservation not stored: {e}"),
        }
        result
    }

    async fn create_inner(
        &self,
        proposal: Proposal,
        actor: &Actor,
        now: &Timestamp,
    ) -> Result<ReservedInterval, CreateError> {
        self.precheck(&proposal, now)?;
        let rs = self.store.get_resource(&proposal.resource_id).ok_or_else(|| {
            Rejection::new(RejectReason::NotFound(proposal.resource_id), Field::Resource)
        })?;

        let lock_start = Instant::now();
        let mut guard = rs.write().await;
        let result = self.commit_locked(&mut guard, proposal, actor, now).await;
        drop(guard);
        metrics::histogram!(observability::CREATE_LOCK_SECONDS)
            .record(lock_start.elapsed().as_secs_f64());
        result
    }

    async fn commit_locked(
        &self,
        rs: &mut ResourceState,
        proposal: Proposal,
        actor: &Actor,
        now: &Timestamp,
    ) -> Result<ReservedInterval, CreateError> {
        let admission = self.admit(&proposal, actor, rs, now, None)?;
        if rs.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(Rejection::new(
                RejectReason::LimitExceeded("too many reservations on room"),
                Field::Resource,
            )
            .into());
        }
        let interval = ReservedInterval {
            id: Ulid::new(),
            resource_id: rs.id,
            team_id: admission.team_id,
            requester_id: proposal.requester_id,
            start: proposal.start,
            end: proposal.end,
            note: proposal.note.clone(),
        };

        match self.store.insert_locked(rs, interval.clone()) {
            Ok(()) => {}
            Err(StoreError::InsertConflict(ids)) => {
                // Second line of defense disagreed with the validator: ask once more.
                self.admit(&proposal, actor, rs, now, None)?;
                return Err(Rejection::new(RejectReason::Conflict(ids), Field::Window).into());
            }
            Err(StoreError::Duplicate(id)) => return Err(EngineError::AlreadyExists(id).into()),
            Err(StoreError::NotFound(id)) => return Err(EngineError::NotFound(id).into()),
        }

        let event = Event::ReservationCreated {
            interval: interval.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            let _ = self.store.remove_locked(rs, interval.id);
            return Err(e.into());
        }
        self.notify.send(rs.id, &event);
        Ok(interval)
    }

    /// Run the full rule set without committing. `exclude_id` lets an edit
    /// preview ignore the reservation being edited.
    pub async fn check_reservation(
        &self,
        proposal: &Proposal,
        actor: &Actor,
        now: &Timestamp,
        exclude_id: Option<Ulid>,
    ) -> ValidationOutcome {
        if let Err(rejection) = self.precheck(proposal, now) {
            return ValidationOutcome::Rejected(rejection);
        }
        let Some(rs) = self.store.get_resource(&proposal.resource_id) else {
            return ValidationOutcome::Rejected(Rejection::new(
                RejectReason::NotFound(proposal.resource_id),
                Field::Resource,
            ));
        };
        let guard = rs.read().await;
        self.admit(proposal, actor, &guard, now, exclude_id).into()
    }

    /// Temporal rules first, so a malformed window is reported before any
    /// size limit.
    fn precheck(&self, proposal: &Proposal, now: &Timestamp) -> Result<(), Rejection> {
        self.validator
            .check_window(&proposal.start, &proposal.end, now)?;
        check_note(proposal)
    }

    /// Validator rules plus the directory lookup they cannot do themselves.
    fn admit(
        &self,
        proposal: &Proposal,
        actor: &Actor,
        rs: &ResourceState,
        now: &Timestamp,
        exclude_id: Option<Ulid>,
    ) -> Result<Admission, Rejection> {
        let admission = self.validator.check(proposal, actor, rs, now, exclude_id)?;
        if actor.manages_everything() && !self.teams.contains_key(&admission.team_id) {
            return Err(Rejection::new(
                RejectReason::NotFound(admission.team_id),
                Field::Team,
            ));
        }
        Ok(admission)
    }

    /// Remove a reservation and tell its team.
    ///
    /// The removal is logged and applied under the room's write guard; the
    /// guard is released before the notifier runs, and a failed notice
    /// never brings the reservation back.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        actor: &Actor,
        notifier: &dyn Notifier,
    ) -> Result<ReservedInterval, CancellationError> {
        let resource_id = self
            .store
            .resource_for(&id)
            .ok_or(CancellationError::NotFound(id))?;
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(CancellationError::NotFound(id))?;
        let mut guard = rs.write().await;
        // A concurrent cancel may have won the lock first.
        let interval = guard
            .get_interval(id)
            .cloned()
            .ok_or(CancellationError::NotFound(id))?;
        if !actor.manages_team(interval.team_id) {
            tracing::debug!("{} may not cancel {id}", actor.user_id);
            return Err(CancellationError::PermissionDenied);
        }

        let event = Event::ReservationCancelled { id, resource_id };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        let room_name = guard.name.clone();
        drop(guard);

        self.reminded.remove(&id);
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        tracing::info!("cancelled {id} on room {resource_id} by {}", actor.user_id);

        let notice = Notice {
            kind: NoticeKind::Cancelled,
            reservation: interval.clone(),
            room_name,
            recipients: self.team_members(interval.team_id),
        };
        self.deliver(notifier, &notice).await;
        Ok(interval)
    }

    /// Hand a notice to the notifier. Failures are logged and counted only.
    pub async fn deliver(&self, notifier: &dyn Notifier, notice: &Notice) -> bool {
        if notice.recipients.is_empty() {
            tracing::debug!("no recipients for notice on {}", notice.reservation.id);
            return false;
        }
        match notifier.send(notice).await {
            Ok(()) => true,
            Err(e) => {
                let kind = match notice.kind {
                    NoticeKind::Cancelled => "cancelled",
                    NoticeKind::Reminder => "reminder",
                };
                metrics::counter!(observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => kind)
                    .increment(1);
                tracing::warn!("{kind} notice for {} not delivered: {e}", notice.reservation.id);
                false
            }
        }
    }
}

fn check_note(proposal: &Proposal) -> Result<(), Rejection> {
    match &proposal.note {
        Some(note) if note.len() > MAX_NOTE_LEN => Err(Rejection::new(
            RejectReason::LimitExceeded("note too long"),
            Field::Note,
        )),
        _ => Ok(()),
    }
}
