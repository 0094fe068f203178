use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{ReservedInterval, Timestamp};

pub const EVENT_COLOR: &str = "green";

/// JSON feed consumed by calendar front-ends: `{ "events": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFeed {
    pub date: NaiveDate,
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Ulid,
    /// Owning team's name.
    pub title: String,
    pub room: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub resource_id: Ulid,
    pub extended_props: ExtendedProps,
    pub background_color: String,
    pub border_color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedProps {
    pub note: Option<String>,
    /// Username of whoever made the reservation.
    pub reserver: String,
}

impl CalendarEvent {
    pub fn new(interval: &ReservedInterval, team: String, room: String, reserver: String) -> Self {
        Self {
            id: interval.id,
            title: team,
            room,
            start: interval.start,
            end: interval.end,
            resource_id: interval.resource_id,
            extended_props: ExtendedProps {
                note: interval.note.clone(),
                reserver,
            },
            background_color: EVENT_COLOR.to_string(),
            border_color: EVENT_COLOR.to_string(),
        }
    }
}

impl CalendarFeed {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
