use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, WalCommand};

fn check_room_fields(
    name: &str,
    capacity: u32,
    description: Option<&str>,
) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("room description too long"));
    }
    if capacity == 0 {
        return Err(EngineError::InvalidCapacity);
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        if self.store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        check_room_fields(&name, capacity, description.as_deref())?;
        if self.store.contains_resource(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            capacity,
            description: description.clone(),
        };
        self.wal_append(&event).await?;
        self.store
            .insert_resource(ResourceState::new(id, name, capacity, description));
        self.notify.send(id, &event);
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.store.resource_count() as f64);
        tracing::info!("created room {id}");
        Ok(())
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        check_room_fields(&name, capacity, description.as_deref())?;
        let rs = self.store.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceUpdated {
            id,
            name,
            capacity,
            description,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Deactivated rooms keep their reservations but admit no new ones.
    pub async fn set_resource_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let rs = self.store.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.active == active {
            return Ok(());
        }
        let event = Event::ResourceActivationChanged { id, active };
        self.persist_and_apply(id, &mut guard, &event).await?;
        tracing::info!("room {id} {}", if active { "activated" } else { "deactivated" });
        Ok(())
    }

    /// Delete a room together with its reservations. No notices are sent.
    pub async fn delete_resource(&self, id: Ulid) -> Result<Vec<ReservedInterval>, EngineError> {
        let rs = self.store.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !self.store.contains_resource(&id) {
            return Err(EngineError::NotFound(id));
        }
        let dropped = guard.intervals.clone();
        let event = Event::ResourceDeleted { id };
        self.persist_and_apply(id, &mut guard, &event).await?;
        drop(guard);

        for interval in &dropped {
            self.reminded.remove(&interval.id);
        }
        self.notify.remove(&id);
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.store.resource_count() as f64);
        tracing::info!("deleted room {id} and {} reservations", dropped.len());
        Ok(dropped)
    }

    /// Rewrite the WAL with only the events needed to rebuild current state:
    /// teams, users, then each room followed by its reservations.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events: Vec<Event> = self
            .teams
            .iter()
            .map(|t| Event::TeamCreated {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();
        events.extend(self.users.iter().map(|u| Event::UserRegistered {
            user: u.value().clone(),
        }));

        for rs in self.store.resources() {
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
            });
            if !guard.active {
                events.push(Event::ResourceActivationChanged {
                    id: guard.id,
                    active: false,
                });
            }
            events.extend(guard.intervals.iter().map(|i| Event::ReservationCreated {
                interval: i.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
