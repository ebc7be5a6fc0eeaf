//! Replicated fields and change notification
//!
//! A [`Replicated`] value lives only in the server's world. Every `write`
//! pushes a [`FieldChange`] into a [`ChangeSink`]; observers learn values
//! exclusively from those notifications and never write back.

use serde::{Deserialize, Serialize};

use super::authority::Endpoint;
use super::entity::EntityId;
use super::physics::Vec3;

/// Name of a replicated field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    /// Endpoint holding command authority
    Owner,
    /// Platform identity of the player behind a controller
    Identity,
    Position,
    /// Controller -> avatar binding
    Avatar,
    Score,
    /// Selected ship option of an avatar
    Variant,
    Health,
    /// Avatar -> controller binding
    Controller,
    IsShooting,
    HeatLevel,
    Overheat,
}

/// Value carried by a replicated field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Float(f32),
    Bool(bool),
    Vector(Vec3),
    Entity(Option<EntityId>),
    Identity(u64),
    Variant(u32),
    Endpoint(Endpoint),
}

impl FieldValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vec3> {
        match self {
            Self::Vector(v) => Some(*v),
            _ => None,
        }
    }

    /// `Some(None)` is an empty reference, `None` means the value is not a reference
    pub fn as_entity(&self) -> Option<Option<EntityId>> {
        match self {
            Self::Entity(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_endpoint(&self) -> Option<Endpoint> {
        match self {
            Self::Endpoint(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec3> for FieldValue {
    fn from(v: Vec3) -> Self {
        Self::Vector(v)
    }
}

impl From<Option<EntityId>> for FieldValue {
    fn from(v: Option<EntityId>) -> Self {
        Self::Entity(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Identity(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Variant(v)
    }
}

impl From<Endpoint> for FieldValue {
    fn from(v: Endpoint) -> Self {
        Self::Endpoint(v)
    }
}

/// One field value inside a spawn snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub field: FieldKey,
    pub value: FieldValue,
}

/// Notification that a field was written on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub entity_id: EntityId,
    pub field: FieldKey,
    pub value: FieldValue,
}

/// Receiver of field change notifications
pub trait ChangeSink {
    fn field_changed(&mut self, change: FieldChange);
}

impl ChangeSink for Vec<FieldChange> {
    fn field_changed(&mut self, change: FieldChange) {
        self.push(change);
    }
}

/// Server-owned field value that notifies a sink on every write
#[derive(Debug, Clone)]
pub struct Replicated<T> {
    entity_id: EntityId,
    key: FieldKey,
    value: T,
}

impl<T> Replicated<T>
where
    T: Clone + PartialEq + Into<FieldValue>,
{
    pub fn new(entity_id: EntityId, key: FieldKey, value: T) -> Self {
        Self {
            entity_id,
            key,
            value,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    /// Store `value` and notify. Redundant writes still notify.
    pub fn write(&mut self, value: T, sink: &mut impl ChangeSink) {
        self.value = value;
        sink.field_changed(FieldChange {
            entity_id: self.entity_id,
            field: self.key,
            value: self.value.clone().into(),
        });
    }

    /// Write only when `value` differs from the current one
    pub fn set_if_changed(&mut self, value: T, sink: &mut impl ChangeSink) -> bool {
        if self.value == value {
            return false;
        }
        self.write(value, sink);
        true
    }

    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            field: self.key,
            value: self.value.clone().into(),
        }
    }
}
