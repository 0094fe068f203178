use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, ReservedInterval, User};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of applied events, one channel per room.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a room. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, resource_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

// ── Outbound notices ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Cancelled,
    Reminder,
}

/// One message about one reservation, addressed to a whole team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub reservation: ReservedInterval,
    pub room_name: String,
    pub recipients: Vec<User>,
}

impl Notice {
    pub fn subject(&self) -> &'static str {
        match self.kind {
            NoticeKind::Cancelled => "Meeting Cancelled",
            NoticeKind::Reminder => "Meeting time reminder...",
        }
    }

    pub fn body_for(&self, recipient: &User) -> String {
        let r = &self.reservation;
        match self.kind {
            NoticeKind::Cancelled => format!(
                "{}, please note, reservation for your team's meeting from {} to {} in {} has been CANCELLED.",
                recipient.full_name(),
                r.start.to_rfc3339(),
                r.end.to_rfc3339(),
                self.room_name,
            ),
            NoticeKind::Reminder => format!(
                "{}, please note, reservation for your team's meeting in {} will be held at {}.",
                recipient.full_name(),
                self.room_name,
                r.start.to_rfc3339(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The delivery provider refused or failed.
    Delivery(String),
    Unavailable,
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Delivery(e) => write!(f, "notice delivery failed: {e}"),
            NotifyError::Unavailable => write!(f, "notice provider unavailable"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Delivery sink for notices (mail, chat, ...). Best effort from the engine's side.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        for user in &notice.recipients {
            tracing::info!(
                to = %user.email,
                subject = notice.subject(),
                "{}",
                notice.body_for(user)
            );
        }
        Ok(())
    }
}
