use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::error::StoreError;
use super::validator::find_conflicts;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Per-room index of reservations.
///
/// Each room's reservations live in a start-sorted vector behind its own
/// `RwLock`; holding that room's write guard is what serializes
/// check-then-insert. The `*_locked` methods work on a guard the caller
/// already holds, the async ones take the lock themselves.
pub struct IntervalStore {
    resources: DashMap<Ulid, SharedResourceState>,
    /// Reverse lookup: reservation id → room id.
    entity_to_resource: DashMap<Ulid, Ulid>,
    site_offset: FixedOffset,
}

impl IntervalStore {
    pub fn new(site_offset: FixedOffset) -> Self {
        Self {
            resources: DashMap::new(),
            entity_to_resource: DashMap::new(),
            site_offset,
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn insert_resource(&self, state: ResourceState) {
        self.resources.insert(state.id, Arc::new(RwLock::new(state)));
    }

    /// Drop a room and forget its reservations. Caller holds the room's guard.
    pub fn remove_resource_locked(&self, rs: &mut ResourceState) {
        for interval in rs.intervals.drain(..) {
            self.entity_to_resource.remove(&interval.id);
        }
        self.resources.remove(&rs.id);
    }

    pub fn resources(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn resource_for(&self, interval_id: &Ulid) -> Option<Ulid> {
        self.entity_to_resource.get(interval_id).map(|e| *e.value())
    }

    pub fn contains_interval(&self, interval_id: &Ulid) -> bool {
        self.entity_to_resource.contains_key(interval_id)
    }

    pub fn interval_count(&self) -> usize {
        self.entity_to_resource.len()
    }

    /// Insert into a room whose write guard the caller holds.
    ///
    /// Refuses a duplicate id, and refuses any overlap as an exclusion
    /// constraint independent of the validator.
    pub fn insert_locked(
        &self,
        rs: &mut ResourceState,
        interval: ReservedInterval,
    ) -> Result<(), StoreError> {
        debug_assert_eq!(rs.id, interval.resource_id);
        if self.entity_to_resource.contains_key(&interval.id) {
            return Err(StoreError::Duplicate(interval.id));
        }
        let clashes = find_conflicts(rs, &interval.start, &interval.end, None);
        if !clashes.is_empty() {
            return Err(StoreError::InsertConflict(clashes));
        }
        self.entity_to_resource.insert(interval.id, rs.id);
        rs.insert_interval(interval);
        Ok(())
    }

    pub fn remove_locked(
        &self,
        rs: &mut ResourceState,
        interval_id: Ulid,
    ) -> Result<ReservedInterval, StoreError> {
        let removed = rs
            .remove_interval(interval_id)
            .ok_or(StoreError::NotFound(interval_id))?;
        self.entity_to_resource.remove(&interval_id);
        Ok(removed)
    }

    /// Drop every reservation matching `doomed`, returning them in start order.
    pub fn remove_where_locked(
        &self,
        rs: &mut ResourceState,
        doomed: impl Fn(&ReservedInterval) -> bool,
    ) -> Vec<ReservedInterval> {
        let (removed, kept): (Vec<_>, Vec<_>) = rs.intervals.drain(..).partition(|i| doomed(i));
        rs.intervals = kept;
        for interval in &removed {
            self.entity_to_resource.remove(&interval.id);
        }
        removed
    }

    pub async fn insert(&self, interval: ReservedInterval) -> Result<(), StoreError> {
        let rs = self
            .get_resource(&interval.resource_id)
            .ok_or(StoreError::NotFound(interval.resource_id))?;
        let mut guard = rs.write().await;
        self.insert_locked(&mut guard, interval)
    }

    pub async fn remove(&self, interval_id: Ulid) -> Result<ReservedInterval, StoreError> {
        let resource_id = self
            .resource_for(&interval_id)
            .ok_or(StoreError::NotFound(interval_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(StoreError::NotFound(interval_id))?;
        let mut guard = rs.write().await;
        self.remove_locked(&mut guard, interval_id)
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn get(&self, interval_id: Ulid) -> Option<ReservedInterval> {
        let resource_id = self.resource_for(&interval_id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.get_interval(interval_id).cloned()
    }

    /// Reservations on a room overlapping `[start, end)`, in start order.
    /// Unknown rooms and empty windows yield nothing.
    pub async fn find_overlapping(
        &self,
        resource_id: Ulid,
        start: &Timestamp,
        end: &Timestamp,
        exclude_id: Option<Ulid>,
    ) -> Vec<ReservedInterval> {
        if end <= start {
            return Vec::new();
        }
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .overlapping(start, end)
            .filter(|i| Some(i.id) != exclude_id)
            .cloned()
            .collect()
    }

    /// Reservations on a room starting on `date` (site offset), in start order.
    pub async fn find_by_resource_and_date(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Vec<ReservedInterval> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let (from, until) = day_bounds(date, self.site_offset);
        let guard = rs.read().await;
        guard.starting_within(&from, &until).cloned().collect()
    }

    /// Every room's reservations starting on `date`, ordered by start then id.
    pub async fn find_by_date(&self, date: NaiveDate) -> Vec<ReservedInterval> {
        let (from, until) = day_bounds(date, self.site_offset);
        self.find_starting_within(&from, &until).await
    }

    /// Reservations (any room) starting inside `[from, until)`, ordered by
    /// start then id.
    pub async fn find_starting_within(
        &self,
        from: &Timestamp,
        until: &Timestamp,
    ) -> Vec<ReservedInterval> {
        let mut found = Vec::new();
        for rs in self.resources() {
            let guard = rs.read().await;
            found.extend(guard.starting_within(from, until).cloned());
        }
        sort_by_start(&mut found);
        found
    }

    /// A team's reservations with `end >= as_of`, ordered by start then id.
    pub async fn find_upcoming_for_team(
        &self,
        team_id: Ulid,
        as_of: &Timestamp,
    ) -> Vec<ReservedInterval> {
        let mut found = Vec::new();
        for rs in self.resources() {
            let guard = rs.read().await;
            found.extend(
                guard
                    .intervals
                    .iter()
                    .filter(|i| i.team_id == team_id && i.end >= *as_of)
                    .cloned(),
            );
        }
        sort_by_start(&mut found);
        found
    }
}

fn sort_by_start(intervals: &mut [ReservedInterval]) {
    intervals.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
}
