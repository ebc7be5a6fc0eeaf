//! Server-side spawn and despawn of networked entities

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::authority::Endpoint;
use super::entity::{Entity, EntityId, EntityKind, LifecycleState, SpawnSpec};
use super::field::FieldSnapshot;
use super::world::World;

/// Lifecycle notification sent to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Entity became Active, with every field's initial value
    Spawned {
        kind: EntityKind,
        snapshot: Vec<FieldSnapshot>,
    },
    Despawned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLifecycle {
    pub entity_id: EntityId,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

/// Id allocation and delayed despawn bookkeeping
#[derive(Debug)]
pub struct LifecycleManager {
    next_id: u64,
    /// (due time, entity) pairs
    scheduled: Vec<(f64, EntityId)>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            scheduled: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Ids are never reused, so anything below `next_id` was handed out
    pub fn was_allocated(&self, entity_id: EntityId) -> bool {
        entity_id.0 >= 1 && entity_id.0 < self.next_id
    }

    /// Schedule a despawn, keeping the earlier time if one is already pending
    pub fn schedule(&mut self, entity_id: EntityId, at: f64) {
        if let Some(entry) = self.scheduled.iter_mut().find(|(_, id)| *id == entity_id) {
            entry.0 = entry.0.min(at);
        } else {
            self.scheduled.push((at, entity_id));
        }
    }

    pub fn is_scheduled(&self, entity_id: EntityId) -> bool {
        self.scheduled.iter().any(|(_, id)| *id == entity_id)
    }

    pub fn cancel(&mut self, entity_id: EntityId) {
        self.scheduled.retain(|(_, id)| *id != entity_id);
    }

    /// Remove and return every entity due at `now`, earliest first
    pub fn take_due(&mut self, now: f64) -> Vec<EntityId> {
        let mut due: Vec<(f64, EntityId)> = Vec::new();
        self.scheduled.retain(|entry| {
            if entry.0 <= now {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter().map(|(_, id)| id).collect()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an entity and announce it to every observer
    pub fn spawn(&mut self, owner: Endpoint, spec: SpawnSpec) -> EntityId {
        let id = self.lifecycle.allocate();
        let mut entity = Entity::new(id, owner, spec);
        entity.transition(LifecycleState::Active);

        let kind = entity.kind();
        let snapshot = entity.snapshot();
        self.entities.insert(id, entity);

        self.outbox.push_lifecycle(EntityLifecycle {
            entity_id: id,
            event: LifecycleEvent::Spawned { kind, snapshot },
        });

        info!(entity_id = %id, kind = ?kind, owner = %owner, "Entity spawned");
        id
    }

    /// Remove an entity from every observer. Unknown or already removed ids
    /// are a no-op. Returns whether a despawn happened.
    pub fn despawn(&mut self, entity_id: EntityId) -> bool {
        let Some(kind) = self.begin_despawn(entity_id) else {
            return false;
        };

        // A controller takes its ship with it
        let cascade = self
            .entities
            .get(&entity_id)
            .and_then(Entity::as_controller)
            .and_then(|c| *c.avatar.get());
        if let Some(avatar_id) = cascade {
            self.despawn(avatar_id);
        }

        self.finish_despawn(entity_id, kind);
        true
    }

    /// Active -> Destroying. `None` when the entity is unknown or not Active.
    pub(crate) fn begin_despawn(&mut self, entity_id: EntityId) -> Option<EntityKind> {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            debug!(entity_id = %entity_id, "Despawn of unknown entity ignored");
            return None;
        };
        if !entity.transition(LifecycleState::Destroying) {
            return None;
        }

        self.lifecycle.cancel(entity_id);
        Some(entity.kind())
    }

    /// Destroying -> Destroyed, then drop the entity and tell observers
    pub(crate) fn finish_despawn(&mut self, entity_id: EntityId, kind: EntityKind) {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return;
        };
        if !entity.transition(LifecycleState::Destroyed) {
            return;
        }
        self.entities.remove(&entity_id);

        self.outbox.push_lifecycle(EntityLifecycle {
            entity_id,
            event: LifecycleEvent::Despawned,
        });

        info!(entity_id = %entity_id, kind = ?kind, "Entity despawned");
    }

    /// Server-side lifecycle state. Ids that were spawned and are gone report Destroyed.
    pub fn lifecycle_state(&self, entity_id: EntityId) -> Option<LifecycleState> {
        match self.entities.get(&entity_id) {
            Some(entity) => Some(entity.state),
            None if self.lifecycle.was_allocated(entity_id) => Some(LifecycleState::Destroyed),
            None => None,
        }
    }

    /// Despawn `entity_id` once simulation time reaches `now + delay`
    pub fn schedule_despawn(&mut self, entity_id: EntityId, delay: f64, now: f64) {
        if !self.entities.contains_key(&entity_id) {
            return;
        }
        self.lifecycle.schedule(entity_id, now + delay);
        debug!(entity_id = %entity_id, delay, "Despawn scheduled");
    }

    /// Run every delayed despawn that is due
    pub fn process_scheduled_despawns(&mut self, now: f64) {
        for entity_id in self.lifecycle.take_due(now) {
            self.despawn(entity_id);
        }
    }
}
