//! Entity authority model
//!
//! Every entity has exactly one endpoint allowed to send it commands. Field
//! writes always belong to the server, whoever holds command authority.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::entity::EntityId;

/// Identifier assigned to a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A participant in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    Server,
    Client(EndpointId),
}

impl Endpoint {
    pub fn is_server(&self) -> bool {
        matches!(self, Endpoint::Server)
    }

    /// Only the server may write replicated fields
    pub fn can_write_fields(&self) -> bool {
        self.is_server()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Server => f.write_str("server"),
            Endpoint::Client(id) => write!(f, "client:{}", id),
        }
    }
}

/// Authority lookup shared by the server world and client mirrors
pub trait AuthorityView {
    /// Recorded command authority for `entity_id`, `None` when unknown
    fn owner_of(&self, entity_id: EntityId) -> Option<Endpoint>;

    fn has_authority(&self, entity_id: EntityId, endpoint: Endpoint) -> bool {
        self.owner_of(entity_id) == Some(endpoint)
    }
}

/// Authority errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("Only the server may change ownership")]
    NotServer,

    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
}
