//! Networked entities and their replicated fields

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::authority::Endpoint;
use super::field::{FieldKey, FieldSnapshot, Replicated};
use super::physics::Vec3;

/// Server-allocated entity identifier, never reused within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Prefab an entity was spawned from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Per-client input proxy
    Controller,
    /// Player ship
    Avatar,
    /// NPC ship
    Enemy,
}

/// Server-side lifecycle. Observers only ever see Active and Destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Spawning,
    Active,
    Destroying,
    Destroyed,
}

impl LifecycleState {
    /// States only move forward, one step at a time
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Spawning, LifecycleState::Active)
                | (LifecycleState::Active, LifecycleState::Destroying)
                | (LifecycleState::Destroying, LifecycleState::Destroyed)
        )
    }
}

/// What to spawn and with which initial values
#[derive(Debug, Clone)]
pub enum SpawnSpec {
    Controller,
    Avatar {
        controller: EntityId,
        variant: u32,
        position: Vec3,
    },
    Enemy {
        position: Vec3,
        heading: Vec3,
        speed: f32,
    },
}

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub identity: Replicated<u64>,
    /// Pointer-driven target, locked to the X axis
    pub position: Replicated<Vec3>,
    pub avatar: Replicated<Option<EntityId>>,
    pub score: Replicated<f32>,
}

#[derive(Debug, Clone)]
pub struct AvatarState {
    pub variant: Replicated<u32>,
    pub position: Replicated<Vec3>,
    pub health: Replicated<f32>,
    pub controller: Replicated<Option<EntityId>>,
    pub is_shooting: Replicated<bool>,
    pub heat_level: Replicated<f32>,
    pub overheat: Replicated<bool>,

    // Server-only
    pub heading: Vec3,
    /// Weapon heat in firing ticks, mirrored to `heat_level`
    pub fire_ticks: f64,
    pub overheat_since: Option<f64>,
    /// Enemies currently overlapping this avatar
    pub contacts: HashSet<EntityId>,
}

#[derive(Debug, Clone)]
pub struct EnemyState {
    pub position: Replicated<Vec3>,
    pub health: Replicated<f32>,

    // Server-only
    pub heading: Vec3,
    pub speed: f32,
    /// Set once the delayed despawn has been scheduled
    pub dying: bool,
}

impl EnemyState {
    pub fn is_alive(&self) -> bool {
        *self.health.get() > 0.0
    }
}

#[derive(Debug, Clone)]
pub enum EntityBody {
    Controller(ControllerState),
    Avatar(AvatarState),
    Enemy(EnemyState),
}

/// A networked object owned by the server
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub state: LifecycleState,
    /// Command authority holder
    pub owner: Replicated<Endpoint>,
    pub body: EntityBody,
}

impl Entity {
    /// Build a new entity in the Spawning state
    pub fn new(id: EntityId, owner: Endpoint, spec: SpawnSpec) -> Self {
        let body = match spec {
            SpawnSpec::Controller => EntityBody::Controller(ControllerState {
                identity: Replicated::new(id, FieldKey::Identity, 0),
                position: Replicated::new(id, FieldKey::Position, Vec3::ZERO),
                avatar: Replicated::new(id, FieldKey::Avatar, None),
                score: Replicated::new(id, FieldKey::Score, 0.0),
            }),
            SpawnSpec::Avatar {
                controller,
                variant,
                position,
            } => EntityBody::Avatar(AvatarState {
                variant: Replicated::new(id, FieldKey::Variant, variant),
                position: Replicated::new(id, FieldKey::Position, position),
                health: Replicated::new(id, FieldKey::Health, 1.0),
                controller: Replicated::new(id, FieldKey::Controller, Some(controller)),
                is_shooting: Replicated::new(id, FieldKey::IsShooting, false),
                heat_level: Replicated::new(id, FieldKey::HeatLevel, 0.0),
                overheat: Replicated::new(id, FieldKey::Overheat, false),
                heading: Vec3::FORWARD,
                fire_ticks: 0.0,
                overheat_since: None,
                contacts: HashSet::new(),
            }),
            SpawnSpec::Enemy {
                position,
                heading,
                speed,
            } => EntityBody::Enemy(EnemyState {
                position: Replicated::new(id, FieldKey::Position, position),
                health: Replicated::new(id, FieldKey::Health, 1.0),
                heading,
                speed,
                dying: false,
            }),
        };

        Self {
            id,
            state: LifecycleState::Spawning,
            owner: Replicated::new(id, FieldKey::Owner, owner),
            body,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Controller(_) => EntityKind::Controller,
            EntityBody::Avatar(_) => EntityKind::Avatar,
            EntityBody::Enemy(_) => EntityKind::Enemy,
        }
    }

    /// Move to the next lifecycle state, false when that would skip or reverse one
    pub fn transition(&mut self, next: LifecycleState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    /// Current value of every replicated field, owner first
    pub fn snapshot(&self) -> Vec<FieldSnapshot> {
        let mut fields = vec![self.owner.snapshot()];
        match &self.body {
            EntityBody::Controller(c) => fields.extend([
                c.identity.snapshot(),
                c.position.snapshot(),
                c.avatar.snapshot(),
                c.score.snapshot(),
            ]),
            EntityBody::Avatar(a) => fields.extend([
                a.variant.snapshot(),
                a.position.snapshot(),
                a.health.snapshot(),
                a.controller.snapshot(),
                a.is_shooting.snapshot(),
                a.heat_level.snapshot(),
                a.overheat.snapshot(),
            ]),
            EntityBody::Enemy(e) => fields.extend([e.position.snapshot(), e.health.snapshot()]),
        }
        fields
    }

    pub fn view(&self) -> EntityView {
        EntityView {
            entity_id: self.id,
            kind: self.kind(),
            state: self.state,
            fields: self.snapshot(),
        }
    }

    pub fn as_controller(&self) -> Option<&ControllerState> {
        match &self.body {
            EntityBody::Controller(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_controller_mut(&mut self) -> Option<&mut ControllerState> {
        match &mut self.body {
            EntityBody::Controller(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_avatar(&self) -> Option<&AvatarState> {
        match &self.body {
            EntityBody::Avatar(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_avatar_mut(&mut self) -> Option<&mut AvatarState> {
        match &mut self.body {
            EntityBody::Avatar(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_enemy(&self) -> Option<&EnemyState> {
        match &self.body {
            EntityBody::Enemy(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_enemy_mut(&mut self) -> Option<&mut EnemyState> {
        match &mut self.body {
            EntityBody::Enemy(e) => Some(e),
            _ => None,
        }
    }
}

/// Read-only server view of one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityView {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub state: LifecycleState,
    pub fields: Vec<FieldSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::EndpointId;
    use crate::game::field::FieldValue;

    #[test]
    fn test_new_avatar_defaults() {
        let entity = Entity::new(
            EntityId(5),
            Endpoint::Server,
            SpawnSpec::Avatar {
                controller: EntityId(4),
                variant: 2,
                position: Vec3::new(12.0, 0.0, 0.0),
            },
        );

        assert_eq!(entity.kind(), EntityKind::Avatar);
        assert_eq!(entity.state, LifecycleState::Spawning);

        let avatar = entity.as_avatar().unwrap();
        assert_eq!(*avatar.health.get(), 1.0);
        assert_eq!(*avatar.controller.get(), Some(EntityId(4)));
        assert!(!*avatar.is_shooting.get());
        assert_eq!(avatar.heading, Vec3::FORWARD);
        assert!(entity.as_controller().is_none());
    }

    #[test]
    fn test_lifecycle_never_skips_a_state() {
        use LifecycleState::*;
        let mut entity = Entity::new(EntityId(1), Endpoint::Server, SpawnSpec::Controller);

        assert!(!entity.transition(Destroying));
        assert!(!entity.transition(Destroyed));
        assert!(entity.transition(Active));
        assert!(!entity.transition(Spawning));
        assert!(!entity.transition(Destroyed));
        assert!(entity.transition(Destroying));
        assert!(!entity.transition(Active));
        assert!(entity.transition(Destroyed));
        assert_eq!(entity.state, Destroyed);
    }

    #[test]
    fn test_snapshot_lists_owner_first() {
        let client = Endpoint::Client(EndpointId::new());
        let entity = Entity::new(EntityId(1), client, SpawnSpec::Controller);
        let snapshot = entity.snapshot();

        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot[0].field, FieldKey::Owner);
        assert_eq!(snapshot[0].value, FieldValue::Endpoint(client));
        assert!(snapshot
            .iter()
            .any(|f| f.field == FieldKey::Avatar && f.value == FieldValue::Entity(None)));
    }

    #[test]
    fn test_enemy_snapshot() {
        let entity = Entity::new(
            EntityId(9),
            Endpoint::Server,
            SpawnSpec::Enemy {
                position: Vec3::new(0.0, 0.0, 400.0),
                heading: Vec3::BACK,
                speed: 20.0,
            },
        );

        let fields: Vec<FieldKey> = entity.snapshot().iter().map(|f| f.field).collect();
        assert_eq!(
            fields,
            vec![FieldKey::Owner, FieldKey::Position, FieldKey::Health]
        );
        assert!(entity.as_enemy().unwrap().is_alive());
    }
}
