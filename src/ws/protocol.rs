//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::{
    Command, EndpointId, EntityId, EntityKind, EntityLifecycle, FieldChange, FieldKey,
    FieldSnapshot, FieldValue, LifecycleEvent, ReplicationEvent, Resynced,
};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Intent for an entity the client has authority over
    Command {
        entity_id: EntityId,
        command: Command,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after the endpoint joined the session
    Welcome {
        endpoint_id: EndpointId,
        /// Controller the client has authority over
        controller_id: EntityId,
        server_time: u64,
        tick_rate: u32,
    },

    /// Entity became active, with every field's current value
    Spawned {
        entity_id: EntityId,
        kind: EntityKind,
        snapshot: Vec<FieldSnapshot>,
    },

    /// Entity removed
    Despawned { entity_id: EntityId },

    /// A replicated field was written on the server
    FieldChange {
        entity_id: EntityId,
        field: FieldKey,
        value: FieldValue,
    },

    /// The connection fell behind. Replace local state with these `spawned`
    /// entries; later messages continue after `as_of`.
    Resync {
        as_of: u64,
        entities: Vec<ServerMsg>,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },

    /// Error message
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<Resynced> for ServerMsg {
    fn from(resynced: Resynced) -> Self {
        ServerMsg::Resync {
            as_of: resynced.as_of,
            entities: resynced.snapshot.into_iter().map(ServerMsg::from).collect(),
        }
    }
}

impl From<ReplicationEvent> for ServerMsg {
    fn from(event: ReplicationEvent) -> Self {
        match event {
            ReplicationEvent::Field(FieldChange {
                entity_id,
                field,
                value,
            }) => ServerMsg::FieldChange {
                entity_id,
                field,
                value,
            },
            ReplicationEvent::Lifecycle(EntityLifecycle { entity_id, event }) => match event {
                LifecycleEvent::Spawned { kind, snapshot } => ServerMsg::Spawned {
                    entity_id,
                    kind,
                    snapshot,
                },
                LifecycleEvent::Despawned => ServerMsg::Despawned { entity_id },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::Vec3;

    #[test]
    fn test_parse_command_message() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"command","entity_id":3,"command":{"name":"start_shooting"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMsg::Command {
                entity_id: EntityId(3),
                command: Command::StartShooting,
            }
        );

        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"command","entity_id":3,"command":{"name":"spawn_avatar","option":1}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMsg::Command {
                command: Command::SpawnAvatar { option: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_command_is_a_parse_error() {
        let parsed = serde_json::from_str::<ClientMsg>(
            r#"{"type":"command","entity_id":3,"command":{"name":"self_destruct"}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_field_change_message_shape() {
        let msg = ServerMsg::from(ReplicationEvent::Field(FieldChange {
            entity_id: EntityId(8),
            field: FieldKey::Position,
            value: FieldValue::Vector(Vec3::new(1.0, 0.0, 0.0)),
        }));

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "field_change");
        assert_eq!(json["entity_id"], 8);
        assert_eq!(json["field"], "position");
        assert_eq!(json["value"]["vector"]["x"], 1.0);
    }

    #[test]
    fn test_resync_message_carries_spawned_entities() {
        let msg = ServerMsg::from(Resynced {
            as_of: 41,
            snapshot: vec![ReplicationEvent::Lifecycle(EntityLifecycle {
                entity_id: EntityId(5),
                event: LifecycleEvent::Spawned {
                    kind: EntityKind::Enemy,
                    snapshot: vec![FieldSnapshot {
                        field: FieldKey::Health,
                        value: FieldValue::Float(0.5),
                    }],
                },
            })],
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "resync");
        assert_eq!(json["as_of"], 41);
        assert_eq!(json["entities"][0]["type"], "spawned");
        assert_eq!(json["entities"][0]["entity_id"], 5);
    }

    #[test]
    fn test_despawned_message_shape() {
        let event = ReplicationEvent::Lifecycle(EntityLifecycle {
            entity_id: EntityId(2),
            event: LifecycleEvent::Despawned,
        });

        let json = serde_json::to_string(&ServerMsg::from(event)).unwrap();
        assert_eq!(json, r#"{"type":"despawned","entity_id":2}"#);

        let msg: ServerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, ServerMsg::Despawned { entity_id: EntityId(2) });
    }
}
