//! Authoritative world state owned by the session task

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::auth::IdentityPolicy;
use crate::config::GameSettings;

use super::authority::{AuthorityError, AuthorityView, Endpoint};
use super::entity::{Entity, EntityId, EntityKind, EntityView};
use super::field::{ChangeSink, FieldChange};
use super::lifecycle::{EntityLifecycle, LifecycleManager};

/// One replication message produced by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationEvent {
    Field(FieldChange),
    Lifecycle(EntityLifecycle),
}

impl ReplicationEvent {
    pub fn entity_id(&self) -> EntityId {
        match self {
            ReplicationEvent::Field(change) => change.entity_id,
            ReplicationEvent::Lifecycle(lifecycle) => lifecycle.entity_id,
        }
    }
}

/// Ordered queue of replication events awaiting broadcast
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<ReplicationEvent>,
}

impl Outbox {
    pub fn push_lifecycle(&mut self, lifecycle: EntityLifecycle) {
        self.events.push(ReplicationEvent::Lifecycle(lifecycle));
    }

    pub fn drain(&mut self) -> Vec<ReplicationEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl ChangeSink for Outbox {
    fn field_changed(&mut self, change: FieldChange) {
        self.events.push(ReplicationEvent::Field(change));
    }
}

/// Active entity counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub controllers: usize,
    pub avatars: usize,
    pub enemies: usize,
}

/// Canonical state of every networked entity
pub struct World {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) outbox: Outbox,
    pub(crate) settings: GameSettings,
    pub(crate) identity_policy: IdentityPolicy,
    pub(crate) rng: ChaCha8Rng,
    /// Simulation time of the next enemy spawn
    pub(crate) next_enemy_spawn: f64,
}

impl World {
    pub fn new(settings: GameSettings, identity_policy: IdentityPolicy, seed: u64) -> Self {
        Self {
            entities: BTreeMap::new(),
            lifecycle: LifecycleManager::new(),
            outbox: Outbox::default(),
            settings,
            identity_policy,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_enemy_spawn: 0.0,
        }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&Entity> {
        self.entities.get(&entity_id)
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    /// Entities in id order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn view(&self, entity_id: EntityId) -> Option<EntityView> {
        self.entities.get(&entity_id).map(Entity::view)
    }

    pub fn counts(&self) -> EntityCounts {
        let mut counts = EntityCounts::default();
        for entity in self.entities.values().filter(|e| e.is_active()) {
            match entity.kind() {
                EntityKind::Controller => counts.controllers += 1,
                EntityKind::Avatar => counts.avatars += 1,
                EntityKind::Enemy => counts.enemies += 1,
            }
        }
        counts
    }

    /// Take every pending replication event in write order
    pub fn drain_events(&mut self) -> Vec<ReplicationEvent> {
        self.outbox.drain()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Hand command authority over an entity to another endpoint
    pub fn transfer_ownership(
        &mut self,
        entity_id: EntityId,
        new_owner: Endpoint,
        actor: Endpoint,
    ) -> Result<(), AuthorityError> {
        if !actor.can_write_fields() {
            return Err(AuthorityError::NotServer);
        }

        let entity = self
            .entities
            .get_mut(&entity_id)
            .filter(|e| e.is_active())
            .ok_or(AuthorityError::UnknownEntity(entity_id))?;

        entity.owner.write(new_owner, &mut self.outbox);

        info!(entity_id = %entity_id, owner = %new_owner, "Ownership transferred");
        Ok(())
    }
}

impl AuthorityView for World {
    fn owner_of(&self, entity_id: EntityId) -> Option<Endpoint> {
        self.entities.get(&entity_id).map(|e| *e.owner.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::EndpointId;
    use crate::game::entity::SpawnSpec;
    use crate::game::field::{FieldKey, FieldValue};

    fn world() -> World {
        World::new(GameSettings::default(), IdentityPolicy::Open, 7)
    }

    #[test]
    fn test_client_controller_authority() {
        let mut world = world();
        let endpoint = EndpointId::new();
        let controller = world.spawn(Endpoint::Client(endpoint), SpawnSpec::Controller);

        assert!(!world.has_authority(controller, Endpoint::Client(EndpointId::new())));
        assert!(world.has_authority(controller, Endpoint::Client(endpoint)));
        assert!(!world.has_authority(controller, Endpoint::Server));
    }

    #[test]
    fn test_transfer_ownership_is_server_only() {
        let mut world = world();
        let a = EndpointId::new();
        let b = EndpointId::new();
        let controller = world.spawn(Endpoint::Client(a), SpawnSpec::Controller);
        world.drain_events();

        assert_eq!(
            world.transfer_ownership(controller, Endpoint::Client(b), Endpoint::Client(a)),
            Err(AuthorityError::NotServer)
        );
        assert!(!world.has_pending_events());

        world
            .transfer_ownership(controller, Endpoint::Client(b), Endpoint::Server)
            .unwrap();
        assert!(world.has_authority(controller, Endpoint::Client(b)));

        let events = world.drain_events();
        assert_eq!(
            events,
            vec![ReplicationEvent::Field(FieldChange {
                entity_id: controller,
                field: FieldKey::Owner,
                value: FieldValue::Endpoint(Endpoint::Client(b)),
            })]
        );
    }

    #[test]
    fn test_transfer_ownership_unknown_entity() {
        let mut world = world();
        assert_eq!(
            world.transfer_ownership(EntityId(99), Endpoint::Server, Endpoint::Server),
            Err(AuthorityError::UnknownEntity(EntityId(99)))
        );
    }

    #[test]
    fn test_counts_by_kind() {
        let mut world = world();
        let endpoint = EndpointId::new();
        let controller = world.spawn(Endpoint::Client(endpoint), SpawnSpec::Controller);
        world.spawn(
            Endpoint::Server,
            SpawnSpec::Avatar {
                controller,
                variant: 0,
                position: Default::default(),
            },
        );

        let counts = world.counts();
        assert_eq!(counts.controllers, 1);
        assert_eq!(counts.avatars, 1);
        assert_eq!(counts.enemies, 0);
    }
}
