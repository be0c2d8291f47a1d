//! Identifiers for the world outside the engine: entities, fields, actors
//!
//! The engine never owns content entities. It refers to them through
//! `EntityRef` and reads/writes their workflow field through the entity
//! adapter in `stateflow-engine`. A single entity may carry more than one
//! independent workflow, keyed by field name.

use serde::{Deserialize, Serialize};

/// The field name every entity's primary workflow lives under.
pub const BASE_FIELD: &str = "workflow";

// ── Actor ────────────────────────────────────────────────────────────

/// Unique identifier for an actor (a user or a system principal)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Field ────────────────────────────────────────────────────────────

/// The name of the entity field a workflow is attached to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldName(pub String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default workflow field shared by entities with a single workflow
    pub fn base() -> Self {
        Self(BASE_FIELD.to_string())
    }

    /// Whether this is the default workflow field.
    ///
    /// Transitions on the base field affect how the entity renders, so the
    /// scheduler emits a cache-invalidation signal for them.
    pub fn is_base(&self) -> bool {
        self.0 == BASE_FIELD
    }
}

impl Default for FieldName {
    fn default() -> Self {
        Self::base()
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Entity reference ─────────────────────────────────────────────────

/// A reference to a content entity carrying a workflow field.
///
/// `entity_id` is `None` for entities that have not been saved yet; such
/// entities have no history and sit in their workflow's creation state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// The entity type (e.g. "article", "page")
    pub entity_type: String,
    /// The entity id; `None` until the entity is first saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Optional revision id, for revisionable entity types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: Some(entity_id.into()),
            revision_id: None,
        }
    }

    /// Reference to an entity that has not been saved yet
    pub fn unsaved(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: None,
            revision_id: None,
        }
    }

    pub fn with_revision(mut self, revision_id: impl Into<String>) -> Self {
        self.revision_id = Some(revision_id.into());
        self
    }

    /// Whether this entity has been saved yet
    pub fn is_new(&self) -> bool {
        self.entity_id.is_none()
    }

    /// Stable key identifying the entity regardless of revision
    pub fn storage_key(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{}:{}", self.entity_type, id),
            None => format!("{}:new", self.entity_type),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}
