//! Entity adapter: the engine's only window onto content entities
//!
//! The engine never owns entity persistence. For immediate transitions it
//! writes the new state into the entity's workflow field and leaves saving
//! the entity to the caller's own save flow, avoiding double-writes.

use crate::{EngineError, EngineResult};
use async_trait::async_trait;
use stateflow_types::{ActorId, EntityRef, FieldName, StateId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Narrow interface implemented per target entity type outside the engine
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    /// The state currently stored on the entity's workflow field, if any
    async fn current_state_value(&self, entity: &EntityRef, field: &FieldName)
        -> Option<StateId>;

    /// Write a state into the entity's workflow field (in memory; the
    /// caller persists the entity)
    async fn set_state_value(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        state: StateId,
    ) -> EngineResult<()>;

    /// The entity's owner
    async fn owner(&self, entity: &EntityRef) -> Option<ActorId>;

    /// Whether the entity can be resolved at all
    async fn exists(&self, entity: &EntityRef) -> bool;

    /// Persist the entity itself. The engine never calls this for
    /// immediate transitions; schedulers and CLI glue may.
    async fn save(&self, entity: &EntityRef) -> EngineResult<()>;
}

// ── In-memory reference adapter ──────────────────────────────────────

#[derive(Clone, Debug)]
struct EntityRecord {
    owner: ActorId,
    fields: HashMap<String, StateId>,
}

/// In-memory entity adapter for tests and CLI glue
#[derive(Default)]
pub struct InMemoryEntityAdapter {
    records: RwLock<HashMap<String, EntityRecord>>,
}

impl InMemoryEntityAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an entity record
    pub fn insert_entity(&self, entity: &EntityRef, owner: ActorId) {
        if let Ok(mut guard) = self.records.write() {
            guard.insert(
                entity.storage_key(),
                EntityRecord {
                    owner,
                    fields: HashMap::new(),
                },
            );
        }
    }

    /// Synchronous read of a field value. Test helper.
    pub fn state_of(&self, entity: &EntityRef, field: &FieldName) -> Option<StateId> {
        self.records
            .read()
            .ok()?
            .get(&entity.storage_key())?
            .fields
            .get(&field.0)
            .cloned()
    }
}

#[async_trait]
impl EntityAdapter for InMemoryEntityAdapter {
    async fn current_state_value(
        &self,
        entity: &EntityRef,
        field: &FieldName,
    ) -> Option<StateId> {
        self.state_of(entity, field)
    }

    async fn set_state_value(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        state: StateId,
    ) -> EngineResult<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| EngineError::Adapter("entity lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&entity.storage_key())
            .ok_or_else(|| EngineError::Adapter(format!("unknown entity {entity}")))?;
        record.fields.insert(field.0.clone(), state);
        Ok(())
    }

    async fn owner(&self, entity: &EntityRef) -> Option<ActorId> {
        self.records
            .read()
            .ok()?
            .get(&entity.storage_key())
            .map(|record| record.owner.clone())
    }

    async fn exists(&self, entity: &EntityRef) -> bool {
        self.records
            .read()
            .map(|guard| guard.contains_key(&entity.storage_key()))
            .unwrap_or(false)
    }

    async fn save(&self, _entity: &EntityRef) -> EngineResult<()> {
        // Nothing to flush; records live in memory already
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let adapter = InMemoryEntityAdapter::new();
        let entity = EntityRef::new("article", "1");
        adapter.insert_entity(&entity, ActorId::new("author"));

        assert!(adapter.exists(&entity).await);
        assert_eq!(adapter.owner(&entity).await, Some(ActorId::new("author")));
        assert!(adapter
            .current_state_value(&entity, &FieldName::base())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_set_state_value() {
        let adapter = InMemoryEntityAdapter::new();
        let entity = EntityRef::new("article", "1");
        adapter.insert_entity(&entity, ActorId::new("author"));

        adapter
            .set_state_value(&entity, &FieldName::base(), StateId::new("review"))
            .await
            .unwrap();
        assert_eq!(
            adapter.current_state_value(&entity, &FieldName::base()).await,
            Some(StateId::new("review"))
        );
    }

    #[tokio::test]
    async fn test_set_state_on_unknown_entity_fails() {
        let adapter = InMemoryEntityAdapter::new();
        let entity = EntityRef::new("article", "404");
        let result = adapter
            .set_state_value(&entity, &FieldName::base(), StateId::new("review"))
            .await;
        assert!(matches!(result, Err(EngineError::Adapter(_))));
    }
}
