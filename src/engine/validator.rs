use chrono::{FixedOffset, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::config::{Config, OpenHours};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    EndNotAfterStart,
    SpansDays,
}

/// Why a proposal was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidRange(RangeError),
    OutOfHours { open: NaiveTime, close: NaiveTime },
    Expired,
    PermissionDenied,
    ResourceInactive(Ulid),
    /// Carries the ids of every overlapping reservation.
    Conflict(Vec<Ulid>),
    NotFound(Ulid),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InvalidRange(RangeError::EndNotAfterStart) => {
                write!(f, "end time must be after start time")
            }
            RejectReason::InvalidRange(RangeError::SpansDays) => {
                write!(f, "start and end must fall on the same day")
            }
            RejectReason::OutOfHours { open, close } => write!(
                f,
                "start and end must both be between {} and {}",
                open.format("%H:%M"),
                close.format("%H:%M")
            ),
            RejectReason::Expired => write!(f, "the requested time has already passed"),
            RejectReason::PermissionDenied => {
                write!(f, "permission denied: you may not book for this team")
            }
            RejectReason::ResourceInactive(id) => {
                write!(f, "room {id} is not accepting reservations")
            }
            RejectReason::Conflict(ids) => {
                write!(f, "overlaps existing reservation(s):")?;
                for id in ids {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            RejectReason::NotFound(id) => write!(f, "not found: {id}"),
            RejectReason::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

/// Input the caller should highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Start,
    End,
    Window,
    Team,
    Resource,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub field: Field,
}

impl Rejection {
    pub fn new(reason: RejectReason, field: Field) -> Self {
        Self { reason, field }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for Rejection {}

/// Accepted proposal. `team_id` is the effective team after permission narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub team_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Admitted(Admission),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ValidationOutcome::Admitted(_))
    }
}

impl From<Result<Admission, Rejection>> for ValidationOutcome {
    fn from(r: Result<Admission, Rejection>) -> Self {
        match r {
            Ok(a) => ValidationOutcome::Admitted(a),
            Err(r) => ValidationOutcome::Rejected(r),
        }
    }
}

/// Pure business rules for a proposed reservation.
///
/// Checks run cheapest first and stop at the first failure:
/// ordering, same day, open hours, not in the past, permission,
/// room active, overlap.
#[derive(Debug, Clone, Copy)]
pub struct ReservationValidator {
    open_hours: OpenHours,
    site_offset: FixedOffset,
}

impl ReservationValidator {
    pub fn new(open_hours: OpenHours, site_offset: FixedOffset) -> Self {
        Self {
            open_hours,
            site_offset,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.open_hours, config.site_offset)
    }

    pub fn site_offset(&self) -> FixedOffset {
        self.site_offset
    }

    pub fn validate(
        &self,
        proposal: &Proposal,
        actor: &Actor,
        resource: &ResourceState,
        now: &Timestamp,
        exclude_id: Option<Ulid>,
    ) -> ValidationOutcome {
        self.check(proposal, actor, resource, now, exclude_id).into()
    }

    pub(super) fn check(
        &self,
        proposal: &Proposal,
        actor: &Actor,
        resource: &ResourceState,
        now: &Timestamp,
        exclude_id: Option<Ulid>,
    ) -> Result<Admission, Rejection> {
        debug_assert_eq!(proposal.resource_id, resource.id);
        self.check_window(&proposal.start, &proposal.end, now)?;
        let team_id = resolve_team(proposal.team_id, actor)?;
        if !resource.active {
            return Err(Rejection::new(
                RejectReason::ResourceInactive(resource.id),
                Field::Resource,
            ));
        }
        let conflicts = find_conflicts(resource, &proposal.start, &proposal.end, exclude_id);
        if !conflicts.is_empty() {
            return Err(Rejection::new(RejectReason::Conflict(conflicts), Field::Window));
        }
        Ok(Admission { team_id })
    }

    /// The temporal rules alone: ordering, same day, open hours, expiry.
    pub fn check_window(
        &self,
        start: &Timestamp,
        end: &Timestamp,
        now: &Timestamp,
    ) -> Result<(), Rejection> {
        if end <= start {
            return Err(Rejection::new(
                RejectReason::InvalidRange(RangeError::EndNotAfterStart),
                Field::End,
            ));
        }
        let local_start = start.with_timezone(&self.site_offset);
        let local_end = end.with_timezone(&self.site_offset);
        if local_start.date_naive() != local_end.date_naive() {
            return Err(Rejection::new(
                RejectReason::InvalidRange(RangeError::SpansDays),
                Field::End,
            ));
        }
        let out_of_hours = RejectReason::OutOfHours {
            open: self.open_hours.open,
            close: self.open_hours.close,
        };
        if !self.open_hours.contains(local_start.time()) {
            return Err(Rejection::new(out_of_hours, Field::Start));
        }
        if !self.open_hours.contains(local_end.time()) {
            return Err(Rejection::new(out_of_hours, Field::End));
        }
        if end <= now {
            return Err(Rejection::new(RejectReason::Expired, Field::End));
        }
        Ok(())
    }

    pub fn local_date(&self, t: &Timestamp) -> NaiveDate {
        t.with_timezone(&self.site_offset).date_naive()
    }

    /// `[date 00:00, next day 00:00)` in the site offset.
    pub fn day_bounds(&self, date: NaiveDate) -> (Timestamp, Timestamp) {
        day_bounds(date, self.site_offset)
    }

    /// Opening and closing instants of `date`.
    pub fn open_window(&self, date: NaiveDate) -> (Timestamp, Timestamp) {
        (
            local_timestamp(date, self.open_hours.open, self.site_offset),
            local_timestamp(date, self.open_hours.close, self.site_offset),
        )
    }
}

/// Decide the effective team from trusted actor flags.
///
/// Admins and global managers book for any team. Team managers always book
/// for their own team, whatever was submitted. Everyone else is refused.
pub fn resolve_team(requested: Ulid, actor: &Actor) -> Result<Ulid, Rejection> {
    if actor.manages_everything() {
        return Ok(requested);
    }
    if actor.can_manage_own_team_reservations
        && let Some(own) = actor.team_id
    {
        return Ok(own);
    }
    Err(Rejection::new(RejectReason::PermissionDenied, Field::Team))
}

/// Ids of reservations on `resource` overlapping `[start, end)`, in start order.
pub fn find_conflicts(
    resource: &ResourceState,
    start: &Timestamp,
    end: &Timestamp,
    exclude_id: Option<Ulid>,
) -> Vec<Ulid> {
    resource
        .overlapping(start, end)
        .filter(|i| Some(i.id) != exclude_id)
        .map(|i| i.id)
        .collect()
}
