//! Game simulation and replication modules

pub mod authority;
pub mod combat;
pub mod command;
pub mod entity;
pub mod feed;
pub mod field;
pub mod lifecycle;
pub mod mirror;
pub mod physics;
pub mod reconcile;
pub mod session;
pub mod snapshot;
pub mod world;

pub use authority::{AuthorityView, Endpoint, EndpointId};
pub use command::{Command, CommandEnvelope, CommandRejection, FailureClass};
pub use entity::{EntityId, EntityKind, EntityView, LifecycleState};
pub use feed::{FeedEvent, ReplicationFeed};
pub use field::{FieldChange, FieldKey, FieldSnapshot, FieldValue};
pub use lifecycle::{EntityLifecycle, LifecycleEvent};
pub use mirror::Mirror;
pub use session::{
    GameSession, Joined, ReplicationBatch, Resynced, SessionError, SessionHandle, SessionPhase,
};
pub use world::{ReplicationEvent, World};
