use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for the per-resource index.
pub type Ms = i64;

/// Timezone-aware instant. The offset is preserved through the WAL and JSON.
pub type Timestamp = DateTime<FixedOffset>;

/// Build the instant for a wall-clock `date` + `time` in `offset`.
pub fn local_timestamp(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Timestamp {
    let utc = date.and_time(time) - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// `[date 00:00, next day 00:00)` as seen from `offset`.
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> (Timestamp, Timestamp) {
    let start = local_timestamp(date, NaiveTime::MIN, offset);
    (start, start + TimeDelta::days(1))
}

/// Unix milliseconds rounded up, so a sub-millisecond remainder is kept
/// inside the span.
fn ceil_millis(t: &Timestamp) -> Ms {
    let ms = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 { ms } else { ms + 1 }
}

/// Half-open interval `[start, end)` in whole milliseconds.
///
/// Only used for free-time arithmetic. Overlap between reservations is
/// decided on the full-precision timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Smallest millisecond span covering `[start, end)`. Requires `start < end`.
    pub fn between(start: &Timestamp, end: &Timestamp) -> Self {
        Self::new(start.timestamp_millis(), ceil_millis(end))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One confirmed booking of a room by a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedInterval {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub team_id: Ulid,
    pub requester_id: Ulid,
    pub start: Timestamp,
    pub end: Timestamp,
    pub note: Option<String>,
}

impl ReservedInterval {
    pub fn span(&self) -> Span {
        Span::between(&self.start, &self.end)
    }

    /// Half-open overlap with `[start, end)`, exact to the nanosecond.
    pub fn overlaps(&self, start: &Timestamp, end: &Timestamp) -> bool {
        self.start < *end && *start < self.end
    }
}

/// A room plus its reservations, sorted by start.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub description: Option<String>,
    /// Inactive rooms keep their history but admit nothing new.
    pub active: bool,
    pub intervals: Vec<ReservedInterval>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, capacity: u32, description: Option<String>) -> Self {
        Self {
            id,
            name,
            capacity,
            description,
            active: true,
            intervals: Vec::new(),
        }
    }

    /// Insert keeping sort order by start. Equal starts keep insertion order.
    pub fn insert_interval(&mut self, interval: ReservedInterval) {
        let pos = self.intervals.partition_point(|i| i.start <= interval.start);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<ReservedInterval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn get_interval(&self, id: Ulid) -> Option<&ReservedInterval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    /// Reservations overlapping `[start, end)`.
    /// Binary search skips everything starting at or after `end`.
    pub fn overlapping(
        &self,
        start: &Timestamp,
        end: &Timestamp,
    ) -> impl Iterator<Item = &ReservedInterval> {
        let (start, end) = (*start, *end);
        let right_bound = self.intervals.partition_point(|i| i.start < end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.overlaps(&start, &end))
    }

    /// Reservations whose start lies inside `[from, until)`.
    pub fn starting_within(
        &self,
        from: &Timestamp,
        until: &Timestamp,
    ) -> impl Iterator<Item = &ReservedInterval> {
        let lo = self.intervals.partition_point(|i| i.start < *from);
        let hi = self.intervals.partition_point(|i| i.start < *until);
        self.intervals[lo..hi].iter()
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            description: self.description.clone(),
            active: self.active,
        }
    }
}

/// Who is acting. The flags are resolved by the caller; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub team_id: Option<Ulid>,
    pub can_manage_all_reservations: bool,
    pub can_manage_own_team_reservations: bool,
    pub is_admin: bool,
}

impl Actor {
    pub fn admin(user_id: Ulid) -> Self {
        Self {
            user_id,
            team_id: None,
            can_manage_all_reservations: true,
            can_manage_own_team_reservations: true,
            is_admin: true,
        }
    }

    pub fn team_leader(user_id: Ulid, team_id: Ulid) -> Self {
        Self {
            user_id,
            team_id: Some(team_id),
            can_manage_all_reservations: false,
            can_manage_own_team_reservations: true,
            is_admin: false,
        }
    }

    pub fn member(user_id: Ulid, team_id: Option<Ulid>) -> Self {
        Self {
            user_id,
            team_id,
            can_manage_all_reservations: false,
            can_manage_own_team_reservations: false,
            is_admin: false,
        }
    }

    pub fn manages_everything(&self) -> bool {
        self.is_admin || self.can_manage_all_reservations
    }

    /// Whether this actor may touch reservations owned by `team_id`.
    pub fn manages_team(&self, team_id: Ulid) -> bool {
        self.manages_everything()
            || (self.can_manage_own_team_reservations && self.team_id == Some(team_id))
    }
}

/// A requested booking, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub resource_id: Ulid,
    pub team_id: Ulid,
    pub requester_id: Ulid,
    pub start: Timestamp,
    pub end: Timestamp,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub team_id: Option<Ulid>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// The WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    },
    ResourceActivationChanged {
        id: Ulid,
        active: bool,
    },
    ResourceDeleted {
        id: Ulid,
    },
    TeamCreated {
        id: Ulid,
        name: String,
    },
    TeamRenamed {
        id: Ulid,
        name: String,
    },
    TeamDeleted {
        id: Ulid,
    },
    UserRegistered {
        user: User,
    },
    UserUpdated {
        user: User,
    },
    UserRemoved {
        id: Ulid,
    },
    ReservationCreated {
        interval: ReservedInterval,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub description: Option<String>,
    pub active: bool,
}
