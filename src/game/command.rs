//! Command channel: client intents validated and applied by the server

use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

use super::authority::{AuthorityView, Endpoint};
use super::combat::HeatModel;
use super::entity::{Entity, EntityId, EntityKind, SpawnSpec};
use super::physics::Vec3;
use super::world::World;

/// Intent sent by the client holding authority over a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    StartShooting,
    StopShooting,
    SetIdentity {
        identity: u64,
        #[serde(default)]
        ticket: String,
    },
    SpawnAvatar {
        option: u32,
    },
    MoveTo {
        x: f32,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartShooting => "start_shooting",
            Command::StopShooting => "stop_shooting",
            Command::SetIdentity { .. } => "set_identity",
            Command::SpawnAvatar { .. } => "spawn_avatar",
            Command::MoveTo { .. } => "move_to",
        }
    }
}

/// A command addressed to an entity, tagged with the endpoint it came from
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub entity_id: EntityId,
    pub sender: Endpoint,
    pub command: Command,
}

/// How a rejected command is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Sender does not hold command authority
    AuthorityViolation,
    /// Legal sender, failed domain check
    PreconditionFailure,
    /// Entity unknown, despawned or not Active
    StaleReference,
}

/// Why a command was not applied
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandRejection {
    #[error("Entity {0} does not exist")]
    UnknownEntity(EntityId),

    #[error("Entity {0} is not active")]
    NotActive(EntityId),

    #[error("{sender} has no authority over entity {entity_id}")]
    NotAuthorized {
        entity_id: EntityId,
        sender: Endpoint,
    },

    #[error("Entity {entity_id} is a {kind:?}, commands target controllers")]
    WrongTarget {
        entity_id: EntityId,
        kind: EntityKind,
    },

    #[error("Controller {0} has no active avatar")]
    NoAvatar(EntityId),

    #[error("Weapon is overheated")]
    Overheated,

    #[error("Controller {0} already has an avatar")]
    AvatarAlreadyBound(EntityId),

    #[error("Avatar option {option} out of range (0..{available})")]
    InvalidOption { option: u32, available: usize },

    #[error("Identity rejected: {0}")]
    IdentityRejected(#[from] AuthError),

    #[error("Position must be finite")]
    InvalidPosition,
}

impl CommandRejection {
    pub fn class(&self) -> FailureClass {
        match self {
            CommandRejection::UnknownEntity(_) | CommandRejection::NotActive(_) => {
                FailureClass::StaleReference
            }
            CommandRejection::NotAuthorized { .. } => FailureClass::AuthorityViolation,
            _ => FailureClass::PreconditionFailure,
        }
    }
}

impl World {
    /// Validate and apply one command. A rejected command leaves the world
    /// untouched and emits nothing.
    pub fn handle_command(&mut self, envelope: CommandEnvelope) -> Result<(), CommandRejection> {
        let CommandEnvelope {
            entity_id,
            sender,
            command,
        } = envelope;

        let entity = self
            .entities
            .get(&entity_id)
            .ok_or(CommandRejection::UnknownEntity(entity_id))?;
        if !entity.is_active() {
            return Err(CommandRejection::NotActive(entity_id));
        }
        if !self.has_authority(entity_id, sender) {
            return Err(CommandRejection::NotAuthorized { entity_id, sender });
        }
        if entity.kind() != EntityKind::Controller {
            return Err(CommandRejection::WrongTarget {
                entity_id,
                kind: entity.kind(),
            });
        }

        match command {
            Command::StartShooting => {
                let avatar_id = self.bound_avatar(entity_id)?;
                let avatar = self
                    .entities
                    .get_mut(&avatar_id)
                    .and_then(Entity::as_avatar_mut)
                    .ok_or(CommandRejection::NoAvatar(entity_id))?;
                if !HeatModel::can_start_shooting(*avatar.heat_level.get()) {
                    return Err(CommandRejection::Overheated);
                }
                avatar.is_shooting.write(true, &mut self.outbox);
            }
            Command::StopShooting => {
                let avatar_id = self.bound_avatar(entity_id)?;
                let avatar = self
                    .entities
                    .get_mut(&avatar_id)
                    .and_then(Entity::as_avatar_mut)
                    .ok_or(CommandRejection::NoAvatar(entity_id))?;
                avatar.is_shooting.write(false, &mut self.outbox);
            }
            Command::SetIdentity { identity, ticket } => {
                self.identity_policy.check(identity, &ticket)?;
                if let Some(controller) = self
                    .entities
                    .get_mut(&entity_id)
                    .and_then(Entity::as_controller_mut)
                {
                    controller.identity.write(identity, &mut self.outbox);
                }
            }
            Command::SpawnAvatar { option } => {
                let available = self.settings.avatar_options;
                if option as usize >= available {
                    return Err(CommandRejection::InvalidOption { option, available });
                }

                let controller = self
                    .entities
                    .get(&entity_id)
                    .and_then(Entity::as_controller)
                    .ok_or(CommandRejection::UnknownEntity(entity_id))?;
                if controller.avatar.get().is_some() {
                    return Err(CommandRejection::AvatarAlreadyBound(entity_id));
                }
                let position = *controller.position.get();

                let avatar_id = self.spawn(
                    Endpoint::Server,
                    SpawnSpec::Avatar {
                        controller: entity_id,
                        variant: option,
                        position,
                    },
                );
                if let Some(controller) = self
                    .entities
                    .get_mut(&entity_id)
                    .and_then(Entity::as_controller_mut)
                {
                    controller.avatar.write(Some(avatar_id), &mut self.outbox);
                }
            }
            Command::MoveTo { x } => {
                if !x.is_finite() {
                    return Err(CommandRejection::InvalidPosition);
                }
                let half_width = self.settings.arena_half_width;
                let target = Vec3::new(x.clamp(-half_width, half_width), 0.0, 0.0);
                if let Some(controller) = self
                    .entities
                    .get_mut(&entity_id)
                    .and_then(Entity::as_controller_mut)
                {
                    controller.position.write(target, &mut self.outbox);
                }
            }
        }

        Ok(())
    }

    /// Active avatar bound to a controller
    fn bound_avatar(&self, controller_id: EntityId) -> Result<EntityId, CommandRejection> {
        self.entities
            .get(&controller_id)
            .and_then(Entity::as_controller)
            .and_then(|c| *c.avatar.get())
            .filter(|avatar_id| {
                self.entities
                    .get(avatar_id)
                    .is_some_and(|a| a.is_active() && a.kind() == EntityKind::Avatar)
            })
            .ok_or(CommandRejection::NoAvatar(controller_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign_ticket, IdentityPolicy};
    use crate::config::GameSettings;
    use crate::game::authority::EndpointId;
    use crate::game::field::{FieldKey, FieldValue};
    use crate::game::world::ReplicationEvent;

    struct Fixture {
        world: World,
        client: Endpoint,
        controller: EntityId,
    }

    fn fixture_with(policy: IdentityPolicy) -> Fixture {
        let mut world = World::new(GameSettings::default(), policy, 3);
        let client = Endpoint::Client(EndpointId::new());
        let controller = world.spawn(client, SpawnSpec::Controller);
        world.drain_events();
        Fixture {
            world,
            client,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(IdentityPolicy::Open)
    }

    impl Fixture {
        fn send(&mut self, command: Command) -> Result<(), CommandRejection> {
            self.world.handle_command(CommandEnvelope {
                entity_id: self.controller,
                sender: self.client,
                command,
            })
        }

        fn avatar(&self) -> Option<EntityId> {
            *self
                .world
                .get(self.controller)
                .and_then(Entity::as_controller)
                .unwrap()
                .avatar
                .get()
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd: Command = serde_json::from_str(r#"{"name":"start_shooting"}"#).unwrap();
        assert_eq!(cmd, Command::StartShooting);

        let cmd: Command = serde_json::from_str(r#"{"name":"move_to","x":12.5}"#).unwrap();
        assert_eq!(cmd, Command::MoveTo { x: 12.5 });

        let cmd: Command = serde_json::from_str(r#"{"name":"set_identity","identity":42}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetIdentity {
                identity: 42,
                ticket: String::new()
            }
        );
    }

    #[test]
    fn test_spawn_avatar_binds_both_ways() {
        let mut f = fixture();
        f.send(Command::MoveTo { x: 50.0 }).unwrap();
        f.send(Command::SpawnAvatar { option: 1 }).unwrap();

        let avatar_id = f.avatar().expect("controller bound");
        let avatar = f.world.get(avatar_id).and_then(Entity::as_avatar).unwrap();
        assert_eq!(*avatar.controller.get(), Some(f.controller));
        assert_eq!(*avatar.variant.get(), 1);
        assert_eq!(*avatar.health.get(), 1.0);
        assert_eq!(avatar.position.get().x, 50.0);
        assert_eq!(*f.world.get(avatar_id).unwrap().owner.get(), Endpoint::Server);
    }

    #[test]
    fn test_spawn_avatar_preconditions() {
        let mut f = fixture();
        assert_eq!(
            f.send(Command::SpawnAvatar { option: 3 }),
            Err(CommandRejection::InvalidOption {
                option: 3,
                available: 3
            })
        );

        f.send(Command::SpawnAvatar { option: 0 }).unwrap();
        f.world.drain_events();

        let err = f.send(Command::SpawnAvatar { option: 0 }).unwrap_err();
        assert_eq!(err, CommandRejection::AvatarAlreadyBound(f.controller));
        assert_eq!(err.class(), FailureClass::PreconditionFailure);
        assert!(!f.world.has_pending_events());
    }

    #[test]
    fn test_start_shooting_requires_avatar_and_cool_weapon() {
        let mut f = fixture();
        assert_eq!(
            f.send(Command::StartShooting),
            Err(CommandRejection::NoAvatar(f.controller))
        );

        f.send(Command::SpawnAvatar { option: 0 }).unwrap();
        let avatar_id = f.avatar().unwrap();
        f.world.drain_events();

        f.send(Command::StartShooting).unwrap();
        assert_eq!(
            f.world.drain_events(),
            vec![ReplicationEvent::Field(crate::game::field::FieldChange {
                entity_id: avatar_id,
                field: FieldKey::IsShooting,
                value: FieldValue::Bool(true),
            })]
        );

        f.world
            .entities
            .get_mut(&avatar_id)
            .and_then(Entity::as_avatar_mut)
            .unwrap()
            .heat_level
            .write(1.0, &mut f.world.outbox);
        f.world.drain_events();

        assert_eq!(f.send(Command::StartShooting), Err(CommandRejection::Overheated));
        assert!(!f.world.has_pending_events());

        f.send(Command::StopShooting).unwrap();
        let avatar = f.world.get(avatar_id).and_then(Entity::as_avatar).unwrap();
        assert!(!*avatar.is_shooting.get());
    }

    #[test]
    fn test_non_authority_sender_is_rejected_without_effect() {
        let mut f = fixture();
        let intruder = Endpoint::Client(EndpointId::new());

        let err = f
            .world
            .handle_command(CommandEnvelope {
                entity_id: f.controller,
                sender: intruder,
                command: Command::MoveTo { x: 10.0 },
            })
            .unwrap_err();

        assert_eq!(err.class(), FailureClass::AuthorityViolation);
        assert!(!f.world.has_pending_events());
        let controller = f.world.get(f.controller).and_then(Entity::as_controller).unwrap();
        assert_eq!(*controller.position.get(), Vec3::ZERO);
    }

    #[test]
    fn test_commands_to_avatars_are_rejected() {
        let mut f = fixture();
        f.send(Command::SpawnAvatar { option: 0 }).unwrap();
        let avatar_id = f.avatar().unwrap();

        // The client has no authority over its ship
        let err = f
            .world
            .handle_command(CommandEnvelope {
                entity_id: avatar_id,
                sender: f.client,
                command: Command::StartShooting,
            })
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::AuthorityViolation);

        let err = f
            .world
            .handle_command(CommandEnvelope {
                entity_id: avatar_id,
                sender: Endpoint::Server,
                command: Command::StartShooting,
            })
            .unwrap_err();
        assert!(matches!(err, CommandRejection::WrongTarget { .. }));
    }

    #[test]
    fn test_stale_entity_is_dropped() {
        let mut f = fixture();
        f.world.despawn(f.controller);

        let err = f.send(Command::MoveTo { x: 1.0 }).unwrap_err();
        assert_eq!(err, CommandRejection::UnknownEntity(f.controller));
        assert_eq!(err.class(), FailureClass::StaleReference);
    }

    #[test]
    fn test_move_to_is_clamped_to_x_axis() {
        let mut f = fixture();
        f.send(Command::MoveTo { x: 1200.0 }).unwrap();

        let controller = f.world.get(f.controller).and_then(Entity::as_controller).unwrap();
        assert_eq!(*controller.position.get(), Vec3::new(400.0, 0.0, 0.0));

        assert_eq!(
            f.send(Command::MoveTo { x: f32::NAN }),
            Err(CommandRejection::InvalidPosition)
        );
    }

    #[test]
    fn test_set_identity_checks_ticket() {
        let secret = "identity-secret";
        let mut f = fixture_with(IdentityPolicy::Signed(secret.to_string()));

        let err = f
            .send(Command::SetIdentity {
                identity: 76561198000000042,
                ticket: "00".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::PreconditionFailure);

        let ticket = sign_ticket(76561198000000042, secret).unwrap();
        f.send(Command::SetIdentity {
            identity: 76561198000000042,
            ticket,
        })
        .unwrap();

        let controller = f.world.get(f.controller).and_then(Entity::as_controller).unwrap();
        assert_eq!(*controller.identity.get(), 76561198000000042);
    }
}
