use chrono::{DateTime, NaiveDate, TimeDelta};
use futures::future::join_all;
use ulid::Ulid;

use crate::calendar::{CalendarEvent, CalendarFeed};
use crate::model::*;
use crate::notify::{Notice, NoticeKind};

use super::availability::free_spans;
use super::{Engine, EngineError};

impl Engine {
    /// All rooms, ordered by name.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let reads = self
            .store
            .resources()
            .into_iter()
            .map(|rs| async move {
                let guard = rs.read().await;
                guard.info()
            });
        let mut rooms = join_all(reads).await;
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn get_resource_info(&self, id: Ulid) -> Option<ResourceInfo> {
        let rs = self.store.get_resource(&id)?;
        let info = rs.read().await.info();
        Some(info)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<ReservedInterval> {
        self.store.get(id).await
    }

    /// Every reservation starting on `date`, as a calendar feed.
    pub async fn calendar_day(&self, date: NaiveDate) -> CalendarFeed {
        let mut events = Vec::new();
        for interval in self.store.find_by_date(date).await {
            let Some(rs) = self.store.get_resource(&interval.resource_id) else {
                continue;
            };
            let room = rs.read().await.name.clone();
            let team = self
                .get_team(&interval.team_id)
                .map_or_else(|| interval.team_id.to_string(), |t| t.name);
            let reserver = self
                .get_user(&interval.requester_id)
                .map_or_else(|| interval.requester_id.to_string(), |u| u.username);
            events.push(CalendarEvent::new(&interval, team, room, reserver));
        }
        CalendarFeed { date, events }
    }

    /// Bookable gaps in a room on `date`: the open-hours window minus
    /// that day's reservations.
    pub async fn free_windows(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<(Timestamp, Timestamp)>, EngineError> {
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let (open, close) = self.validator.open_window(date);
        if close <= open {
            return Ok(Vec::new());
        }
        let window = Span::between(&open, &close);
        let booked: Vec<Span> = {
            let guard = rs.read().await;
            guard.overlapping(&open, &close).map(|i| i.span()).collect()
        };

        let offset = self.validator.site_offset();
        let at = |ms: Ms| DateTime::from_timestamp_millis(ms).map(|t| t.with_timezone(&offset));
        Ok(free_spans(&window, &booked)
            .into_iter()
            .filter_map(|s| Some((at(s.start)?, at(s.end)?)))
            .collect())
    }

    /// Reminder notices for reservations starting within `lead` of `now`.
    /// Each reservation is returned once over the engine's lifetime.
    pub async fn collect_due_reminders(&self, now: &Timestamp, lead: TimeDelta) -> Vec<Notice> {
        self.reminded.retain(|id| self.store.contains_interval(id));
        if lead <= TimeDelta::zero() {
            return Vec::new();
        }
        let Some(until) = now.checked_add_signed(lead) else {
            return Vec::new();
        };
        let mut notices = Vec::new();
        for interval in self.store.find_starting_within(now, &until).await {
            if !self.reminded.insert(interval.id) {
                continue;
            }
            let Some(info) = self.get_resource_info(interval.resource_id).await else {
                continue;
            };
            notices.push(Notice {
                kind: NoticeKind::Reminder,
                recipients: self.team_members(interval.team_id),
                room_name: info.name,
                reservation: interval,
            });
        }
        notices
    }
}
