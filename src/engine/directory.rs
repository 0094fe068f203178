use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{apply_to_resource, Engine, EngineError};

fn check_user_fields(user: &User) -> Result<(), EngineError> {
    let names = [&user.username, &user.first_name, &user.last_name];
    if names.iter().any(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("user name too long"));
    }
    if user.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    Ok(())
}

impl Engine {
    /// Apply a team or user event to the in-memory directory.
    pub(super) fn apply_directory(&self, event: &Event) {
        match event {
            Event::TeamCreated { id, name } | Event::TeamRenamed { id, name } => {
                self.teams.insert(
                    *id,
                    Team {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::TeamDeleted { id } => {
                self.teams.remove(id);
            }
            Event::UserRegistered { user } | Event::UserUpdated { user } => {
                self.users.insert(user.id, user.clone());
            }
            Event::UserRemoved { id } => {
                self.users.remove(id);
            }
            _ => {}
        }
    }

    async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_directory(event);
        Ok(())
    }

    fn check_team_ref(&self, team_id: Option<Ulid>) -> Result<(), EngineError> {
        match team_id {
            Some(id) if !self.teams.contains_key(&id) => Err(EngineError::NotFound(id)),
            _ => Ok(()),
        }
    }

    // ── Teams ────────────────────────────────────────────────

    pub async fn create_team(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if self.teams.len() >= MAX_TEAMS {
            return Err(EngineError::LimitExceeded("too many teams"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("team name too long"));
        }
        if self.teams.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_directory(&Event::TeamCreated { id, name }).await
    }

    pub async fn rename_team(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("team name too long"));
        }
        if !self.teams.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_directory(&Event::TeamRenamed { id, name }).await
    }

    /// Delete a team that no user belongs to anymore, dropping its
    /// reservations in every room. Returns the dropped reservations.
    pub async fn delete_team(&self, id: Ulid) -> Result<Vec<ReservedInterval>, EngineError> {
        if !self.teams.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.users.iter().any(|u| u.team_id == Some(id)) {
            return Err(EngineError::TeamInUse(id));
        }

        let event = Event::TeamDeleted { id };
        self.persist_directory(&event).await?;

        let mut dropped = Vec::new();
        for rs in self.store.resources() {
            let mut guard = rs.write().await;
            let before = guard.intervals.len();
            let owned: Vec<_> = guard
                .intervals
                .iter()
                .filter(|i| i.team_id == id)
                .cloned()
                .collect();
            apply_to_resource(&self.store, &mut guard, &event);
            if guard.intervals.len() != before {
                self.notify.send(guard.id, &event);
            }
            dropped.extend(owned);
        }
        for interval in &dropped {
            self.reminded.remove(&interval.id);
        }
        tracing::info!("deleted team {id} and {} reservations", dropped.len());
        Ok(dropped)
    }

    pub fn get_team(&self, id: &Ulid) -> Option<Team> {
        self.teams.get(id).map(|t| t.value().clone())
    }

    /// All teams, ordered by name.
    pub fn list_teams(&self) -> Vec<Team> {
        let mut teams: Vec<Team> = self.teams.iter().map(|t| t.value().clone()).collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        teams
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(&self, user: User) -> Result<(), EngineError> {
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        check_user_fields(&user)?;
        if self.users.contains_key(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }
        self.check_team_ref(user.team_id)?;
        self.persist_directory(&Event::UserRegistered { user }).await
    }

    /// Replace a user's profile, including team membership.
    pub async fn update_user(&self, user: User) -> Result<(), EngineError> {
        check_user_fields(&user)?;
        if !self.users.contains_key(&user.id) {
            return Err(EngineError::NotFound(user.id));
        }
        self.check_team_ref(user.team_id)?;
        self.persist_directory(&Event::UserUpdated { user }).await
    }

    /// Reservations the user requested stay; they keep the bare requester id.
    pub async fn remove_user(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_directory(&Event::UserRemoved { id }).await
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    /// Members of a team, ordered by username.
    pub fn team_members(&self, team_id: Ulid) -> Vec<User> {
        let mut members: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.team_id == Some(team_id))
            .map(|u| u.value().clone())
            .collect();
        members.sort_by(|a, b| a.username.cmp(&b.username));
        members
    }
}
