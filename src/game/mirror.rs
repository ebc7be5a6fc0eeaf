//! Observer-side read-only replica of the server world
//!
//! A [`Mirror`] applies replication events in delivery order and never
//! validates them. Presentation code hooks field reactions and lifecycle
//! listeners to learn about changes.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::authority::{AuthorityView, Endpoint};
use super::command::{Command, CommandEnvelope, CommandRejection};
use super::entity::{EntityId, EntityKind};
use super::field::{FieldChange, FieldKey, FieldSnapshot, FieldValue};
use super::lifecycle::{EntityLifecycle, LifecycleEvent};
use super::world::ReplicationEvent;

/// Callback run whenever a mirrored field is delivered. `old` is `None` on
/// the initial sync after spawn.
pub type FieldReaction = Box<dyn FnMut(EntityId, Option<&FieldValue>, &FieldValue) + Send>;

/// Callback run on spawn and despawn
pub type LifecycleListener = Box<dyn FnMut(&EntityLifecycle) + Send>;

/// Mirrored copy of one entity
#[derive(Debug, Clone)]
pub struct MirrorEntity {
    pub kind: EntityKind,
    fields: HashMap<FieldKey, FieldValue>,
}

impl MirrorEntity {
    pub fn field(&self, key: FieldKey) -> Option<&FieldValue> {
        self.fields.get(&key)
    }
}

pub struct Mirror {
    local: Endpoint,
    entities: BTreeMap<EntityId, MirrorEntity>,
    reactions: HashMap<FieldKey, Vec<FieldReaction>>,
    listeners: Vec<LifecycleListener>,
}

impl Mirror {
    pub fn new(local: Endpoint) -> Self {
        Self {
            local,
            entities: BTreeMap::new(),
            reactions: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    /// Register a reaction for every entity's `key` field
    pub fn on_changed(&mut self, key: FieldKey, reaction: FieldReaction) {
        self.reactions.entry(key).or_default().push(reaction);
    }

    pub fn on_lifecycle(&mut self, listener: LifecycleListener) {
        self.listeners.push(listener);
    }

    pub fn apply_all(&mut self, events: impl IntoIterator<Item = ReplicationEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Apply one replication event
    pub fn apply(&mut self, event: ReplicationEvent) {
        match event {
            ReplicationEvent::Field(change) => self.apply_change(change),
            ReplicationEvent::Lifecycle(lifecycle) => self.apply_lifecycle(lifecycle),
        }
    }

    /// Rebuild from a full snapshot after missed batches. Entities missing
    /// from it are despawned, known ones get every field delivered as a
    /// change, and new ones spawn as usual.
    pub fn resync(&mut self, snapshot: impl IntoIterator<Item = ReplicationEvent>) {
        let snapshot: Vec<ReplicationEvent> = snapshot.into_iter().collect();
        let live: HashSet<EntityId> = snapshot.iter().map(ReplicationEvent::entity_id).collect();

        let stale: Vec<EntityId> = self
            .entities
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for entity_id in stale {
            self.apply_lifecycle(EntityLifecycle {
                entity_id,
                event: LifecycleEvent::Despawned,
            });
        }

        for event in snapshot {
            match event {
                ReplicationEvent::Lifecycle(EntityLifecycle {
                    entity_id,
                    event: LifecycleEvent::Spawned { snapshot, .. },
                }) if self.entities.contains_key(&entity_id) => {
                    for FieldSnapshot { field, value } in snapshot {
                        self.apply_change(FieldChange {
                            entity_id,
                            field,
                            value,
                        });
                    }
                }
                other => self.apply(other),
            }
        }

        debug!(entities = self.entities.len(), "Mirror resynced");
    }

    fn apply_change(&mut self, change: FieldChange) {
        let Some(entity) = self.entities.get_mut(&change.entity_id) else {
            debug!(entity_id = %change.entity_id, "Change for unknown entity ignored");
            return;
        };

        let old = entity.fields.insert(change.field, change.value.clone());
        if let Some(reactions) = self.reactions.get_mut(&change.field) {
            for reaction in reactions.iter_mut() {
                reaction(change.entity_id, old.as_ref(), &change.value);
            }
        }
    }

    fn apply_lifecycle(&mut self, lifecycle: EntityLifecycle) {
        match &lifecycle.event {
            LifecycleEvent::Spawned { kind, snapshot } => {
                let fields = snapshot
                    .iter()
                    .map(|FieldSnapshot { field, value }| (*field, value.clone()))
                    .collect();
                self.entities.insert(
                    lifecycle.entity_id,
                    MirrorEntity {
                        kind: *kind,
                        fields,
                    },
                );

                for FieldSnapshot { field, value } in snapshot {
                    if let Some(reactions) = self.reactions.get_mut(field) {
                        for reaction in reactions.iter_mut() {
                            reaction(lifecycle.entity_id, None, value);
                        }
                    }
                }
            }
            LifecycleEvent::Despawned => {
                if self.entities.remove(&lifecycle.entity_id).is_none() {
                    return;
                }
            }
        }

        for listener in self.listeners.iter_mut() {
            listener(&lifecycle);
        }
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&MirrorEntity> {
        self.entities.get(&entity_id)
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn field(&self, entity_id: EntityId, key: FieldKey) -> Option<&FieldValue> {
        self.entities.get(&entity_id).and_then(|e| e.field(key))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Build a command for the server, refused when this endpoint lacks authority
    pub fn send_command(
        &self,
        entity_id: EntityId,
        command: Command,
    ) -> Result<CommandEnvelope, CommandRejection> {
        if !self.contains(entity_id) {
            return Err(CommandRejection::UnknownEntity(entity_id));
        }
        if !self.has_authority(entity_id, self.local) {
            return Err(CommandRejection::NotAuthorized {
                entity_id,
                sender: self.local,
            });
        }

        Ok(CommandEnvelope {
            entity_id,
            sender: self.local,
            command,
        })
    }

    /// The controller this endpoint has authority over
    pub fn local_controller(&self) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(id, e)| e.kind == EntityKind::Controller && self.has_authority(**id, self.local))
            .map(|(id, _)| *id)
    }

    /// True when the local controller has no ship and should offer a respawn
    pub fn needs_respawn_prompt(&self) -> bool {
        self.local_controller()
            .and_then(|id| self.field(id, FieldKey::Avatar))
            .and_then(FieldValue::as_entity)
            .is_some_and(|avatar| avatar.is_none())
    }
}

impl AuthorityView for Mirror {
    fn owner_of(&self, entity_id: EntityId) -> Option<Endpoint> {
        self.field(entity_id, FieldKey::Owner)
            .and_then(FieldValue::as_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::EndpointId;
    use crate::game::physics::Vec3;
    use std::sync::{Arc, Mutex};

    fn spawned(entity_id: u64, kind: EntityKind, snapshot: Vec<FieldSnapshot>) -> ReplicationEvent {
        ReplicationEvent::Lifecycle(EntityLifecycle {
            entity_id: EntityId(entity_id),
            event: LifecycleEvent::Spawned { kind, snapshot },
        })
    }

    fn change(entity_id: u64, field: FieldKey, value: impl Into<FieldValue>) -> ReplicationEvent {
        ReplicationEvent::Field(FieldChange {
            entity_id: EntityId(entity_id),
            field,
            value: value.into(),
        })
    }

    fn controller_snapshot(owner: Endpoint, avatar: Option<EntityId>) -> Vec<FieldSnapshot> {
        vec![
            FieldSnapshot {
                field: FieldKey::Owner,
                value: owner.into(),
            },
            FieldSnapshot {
                field: FieldKey::Position,
                value: Vec3::ZERO.into(),
            },
            FieldSnapshot {
                field: FieldKey::Avatar,
                value: avatar.into(),
            },
        ]
    }

    #[test]
    fn test_reaction_fires_on_initial_sync_and_updates() {
        let seen: Arc<Mutex<Vec<(Option<FieldValue>, FieldValue)>>> = Arc::default();
        let mut mirror = Mirror::new(Endpoint::Client(EndpointId::new()));

        let log = seen.clone();
        mirror.on_changed(
            FieldKey::Health,
            Box::new(move |_: EntityId, old: Option<&FieldValue>, new: &FieldValue| {
                log.lock().unwrap().push((old.cloned(), new.clone()))
            }),
        );

        mirror.apply(spawned(
            2,
            EntityKind::Enemy,
            vec![
                FieldSnapshot {
                    field: FieldKey::Owner,
                    value: Endpoint::Server.into(),
                },
                FieldSnapshot {
                    field: FieldKey::Health,
                    value: 1.0f32.into(),
                },
            ],
        ));
        mirror.apply(change(2, FieldKey::Health, 0.8f32));
        mirror.apply(change(2, FieldKey::Health, 0.8f32));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (None, FieldValue::Float(1.0)),
                (Some(FieldValue::Float(1.0)), FieldValue::Float(0.8)),
                (Some(FieldValue::Float(0.8)), FieldValue::Float(0.8)),
            ]
        );
    }

    #[test]
    fn test_mirror_tracks_latest_value() {
        let mut mirror = Mirror::new(Endpoint::Client(EndpointId::new()));
        mirror.apply(spawned(1, EntityKind::Controller, controller_snapshot(Endpoint::Server, None)));

        for x in [1.0, 5.0, -3.0] {
            mirror.apply(change(1, FieldKey::Position, Vec3::new(x, 0.0, 0.0)));
        }

        assert_eq!(
            mirror.field(EntityId(1), FieldKey::Position),
            Some(&FieldValue::Vector(Vec3::new(-3.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn test_despawn_is_idempotent_for_listeners() {
        let count = Arc::new(Mutex::new(0));
        let mut mirror = Mirror::new(Endpoint::Client(EndpointId::new()));

        let counter = count.clone();
        mirror.on_lifecycle(Box::new(move |event: &EntityLifecycle| {
            if event.event == LifecycleEvent::Despawned {
                *counter.lock().unwrap() += 1;
            }
        }));

        mirror.apply(spawned(1, EntityKind::Controller, controller_snapshot(Endpoint::Server, None)));
        let despawn = ReplicationEvent::Lifecycle(EntityLifecycle {
            entity_id: EntityId(1),
            event: LifecycleEvent::Despawned,
        });
        mirror.apply(despawn.clone());
        mirror.apply(despawn);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_resync_replaces_missed_state() {
        let lifecycle: Arc<Mutex<Vec<EntityLifecycle>>> = Arc::default();
        let positions: Arc<Mutex<Vec<(EntityId, Option<FieldValue>)>>> = Arc::default();
        let mut mirror = Mirror::new(Endpoint::Client(EndpointId::new()));

        let log = lifecycle.clone();
        mirror.on_lifecycle(Box::new(move |event: &EntityLifecycle| {
            log.lock().unwrap().push(event.clone())
        }));
        let log = positions.clone();
        mirror.on_changed(
            FieldKey::Position,
            Box::new(move |entity_id: EntityId, old: Option<&FieldValue>, _: &FieldValue| {
                log.lock().unwrap().push((entity_id, old.cloned()))
            }),
        );

        mirror.apply(spawned(1, EntityKind::Controller, controller_snapshot(Endpoint::Server, None)));
        mirror.apply(spawned(2, EntityKind::Controller, controller_snapshot(Endpoint::Server, None)));
        lifecycle.lock().unwrap().clear();
        positions.lock().unwrap().clear();

        // Entity 2 went away and 3 arrived while batches were missed
        let mut moved = controller_snapshot(Endpoint::Server, None);
        moved[1].value = Vec3::new(40.0, 0.0, 0.0).into();
        mirror.resync(vec![
            spawned(1, EntityKind::Controller, moved),
            spawned(3, EntityKind::Controller, controller_snapshot(Endpoint::Server, None)),
        ]);

        assert!(mirror.contains(EntityId(1)));
        assert!(!mirror.contains(EntityId(2)));
        assert!(mirror.contains(EntityId(3)));
        assert_eq!(
            mirror.field(EntityId(1), FieldKey::Position),
            Some(&FieldValue::Vector(Vec3::new(40.0, 0.0, 0.0)))
        );

        let events: Vec<(EntityId, bool)> = lifecycle
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.entity_id, e.event == LifecycleEvent::Despawned))
            .collect();
        assert_eq!(events, vec![(EntityId(2), true), (EntityId(3), false)]);

        // The known entity reports its previous value, the new one reports none
        assert_eq!(
            *positions.lock().unwrap(),
            vec![
                (EntityId(1), Some(FieldValue::Vector(Vec3::ZERO))),
                (EntityId(3), None),
            ]
        );
    }

    #[test]
    fn test_send_command_requires_local_authority() {
        let local = Endpoint::Client(EndpointId::new());
        let other = Endpoint::Client(EndpointId::new());
        let mut mirror = Mirror::new(local);

        mirror.apply(spawned(1, EntityKind::Controller, controller_snapshot(local, None)));
        mirror.apply(spawned(2, EntityKind::Controller, controller_snapshot(other, None)));

        let envelope = mirror.send_command(EntityId(1), Command::StartShooting).unwrap();
        assert_eq!(envelope.sender, local);

        assert!(matches!(
            mirror.send_command(EntityId(2), Command::StartShooting),
            Err(CommandRejection::NotAuthorized { .. })
        ));
        assert!(matches!(
            mirror.send_command(EntityId(3), Command::StartShooting),
            Err(CommandRejection::UnknownEntity(_))
        ));
        assert_eq!(mirror.local_controller(), Some(EntityId(1)));
    }

    #[test]
    fn test_respawn_prompt_follows_avatar_binding() {
        let local = Endpoint::Client(EndpointId::new());
        let mut mirror = Mirror::new(local);

        mirror.apply(spawned(1, EntityKind::Controller, controller_snapshot(local, Some(EntityId(2)))));
        assert!(!mirror.needs_respawn_prompt());

        mirror.apply(change(1, FieldKey::Avatar, None::<EntityId>));
        assert!(mirror.needs_respawn_prompt());
    }
}
