//! In-memory reference implementation of the transition store.
//!
//! Deterministic and test-friendly. Production deployments should use the
//! PostgreSQL adapter for source-of-truth data.

use crate::traits::{DeletionScope, QueryWindow, TransitionStore};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stateflow_types::{EntityRef, FieldName, Transition, TransitionId};
use std::collections::HashMap;
use std::sync::RwLock;

type ScheduleKey = (String, String);

fn schedule_key(entity: &EntityRef, field: &FieldName) -> ScheduleKey {
    (entity.storage_key(), field.to_string())
}

/// In-memory transition store.
#[derive(Default)]
pub struct InMemoryTransitionStore {
    /// Executed history in append (chronological) order
    executed: RwLock<Vec<Transition>>,
    /// At most one pending scheduled transition per (entity, field)
    scheduled: RwLock<HashMap<ScheduleKey, Transition>>,
}

impl InMemoryTransitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total executed records, across all entities. Test helper.
    pub fn executed_count(&self) -> usize {
        self.executed.read().map(|v| v.len()).unwrap_or(0)
    }

    /// Total pending scheduled records, across all entities. Test helper.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.read().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TransitionStore for InMemoryTransitionStore {
    async fn save_executed(&self, transition: &mut Transition) -> StoreResult<TransitionId> {
        if !transition.is_executed() {
            return Err(StoreError::InvalidInput(
                "only executed transitions belong in history".to_string(),
            ));
        }
        let id = TransitionId::generate();
        transition.record_persisted(id);

        let mut guard = self
            .executed
            .write()
            .map_err(|_| StoreError::Backend("history lock poisoned".to_string()))?;
        guard.push(transition.clone());
        Ok(id)
    }

    async fn save_scheduled(&self, transition: &Transition) -> StoreResult<()> {
        if !transition.is_scheduled() || transition.is_executed() {
            return Err(StoreError::InvalidInput(
                "only pending scheduled transitions belong in the schedule".to_string(),
            ));
        }
        let mut guard = self
            .scheduled
            .write()
            .map_err(|_| StoreError::Backend("schedule lock poisoned".to_string()))?;
        guard.insert(
            schedule_key(&transition.entity, &transition.field),
            transition.clone(),
        );
        Ok(())
    }

    async fn last_executed(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        exclude: Option<&TransitionId>,
    ) -> StoreResult<Option<Transition>> {
        let guard = self
            .executed
            .read()
            .map_err(|_| StoreError::Backend("history lock poisoned".to_string()))?;
        let key = entity.storage_key();
        Ok(guard
            .iter()
            .rev()
            .find(|t| {
                t.entity.storage_key() == key
                    && &t.field == field
                    && (exclude.is_none() || t.id() != exclude)
            })
            .cloned())
    }

    async fn history(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        window: QueryWindow,
    ) -> StoreResult<Vec<Transition>> {
        let guard = self
            .executed
            .read()
            .map_err(|_| StoreError::Backend("history lock poisoned".to_string()))?;
        let key = entity.storage_key();
        let limit = if window.limit == 0 {
            usize::MAX
        } else {
            window.limit
        };
        Ok(guard
            .iter()
            .rev()
            .filter(|t| t.entity.storage_key() == key && &t.field == field)
            .skip(window.offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn scheduled_for(
        &self,
        entity: &EntityRef,
        field: &FieldName,
    ) -> StoreResult<Option<Transition>> {
        let guard = self
            .scheduled
            .read()
            .map_err(|_| StoreError::Backend("schedule lock poisoned".to_string()))?;
        Ok(guard.get(&schedule_key(entity, field)).cloned())
    }

    async fn due_scheduled(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Transition>> {
        let guard = self
            .scheduled
            .read()
            .map_err(|_| StoreError::Backend("schedule lock poisoned".to_string()))?;
        let mut due: Vec<Transition> = guard
            .values()
            .filter(|t| t.timestamp > start && t.timestamp <= end)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.timestamp);
        Ok(due)
    }

    async fn delete_scheduled(&self, entity: &EntityRef, field: &FieldName) -> StoreResult<()> {
        let mut guard = self
            .scheduled
            .write()
            .map_err(|_| StoreError::Backend("schedule lock poisoned".to_string()))?;
        guard.remove(&schedule_key(entity, field));
        Ok(())
    }

    async fn delete_for_entity(
        &self,
        entity: &EntityRef,
        field: Option<&FieldName>,
        scope: DeletionScope,
    ) -> StoreResult<()> {
        let key = entity.storage_key();

        {
            let mut guard = self
                .scheduled
                .write()
                .map_err(|_| StoreError::Backend("schedule lock poisoned".to_string()))?;
            guard.retain(|(entity_key, field_name), _| {
                let matches =
                    entity_key == &key && field.map(|f| f.0 == *field_name).unwrap_or(true);
                !matches
            });
        }

        if scope == DeletionScope::All {
            let mut guard = self
                .executed
                .write()
                .map_err(|_| StoreError::Backend("history lock poisoned".to_string()))?;
            guard.retain(|t| {
                let matches = t.entity.storage_key() == key
                    && field.map(|f| &t.field == f).unwrap_or(true);
                !matches
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateflow_types::{AccessRule, ActorId, ConfigTransition, State, StateId, WorkflowType};

    fn make_workflow() -> WorkflowType {
        let mut wf = WorkflowType::new("editorial", "Editorial");
        wf.add_state(State::new("draft", "Draft").creation()).unwrap();
        wf.add_state(State::new("review", "In review")).unwrap();
        wf.add_state(State::new("published", "Published")).unwrap();
        wf.add_transition(ConfigTransition::new(
            StateId::new("draft"),
            StateId::new("review"),
            AccessRule::capability("submit"),
        ))
        .unwrap();
        wf
    }

    fn make_transition(entity_id: &str, from: &str, to: &str) -> Transition {
        Transition::new(
            stateflow_types::WorkflowTypeId::new("editorial"),
            StateId::new(from),
            StateId::new(to),
            EntityRef::new("article", entity_id),
            FieldName::base(),
            ActorId::new("editor"),
        )
    }

    fn executed(entity_id: &str, from: &str, to: &str) -> Transition {
        let mut t = make_transition(entity_id, from, to);
        t.mark_executed();
        t
    }

    #[tokio::test]
    async fn test_save_executed_assigns_id() {
        let store = InMemoryTransitionStore::new();
        let mut t = executed("1", "draft", "review");
        let id = store.save_executed(&mut t).await.unwrap();
        assert_eq!(t.id(), Some(&id));
        assert_eq!(store.executed_count(), 1);
    }

    #[tokio::test]
    async fn test_save_executed_rejects_pending() {
        let store = InMemoryTransitionStore::new();
        let mut t = make_transition("1", "draft", "review");
        let result = store.save_executed(&mut t).await;
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_current_state_follows_history() {
        let store = InMemoryTransitionStore::new();
        let wf = make_workflow();
        let entity = EntityRef::new("article", "1");
        let field = FieldName::base();

        // No history yet: creation state
        let state = store.current_state(&wf, &entity, &field).await.unwrap();
        assert_eq!(state, StateId::new("draft"));

        store
            .save_executed(&mut executed("1", "draft", "review"))
            .await
            .unwrap();
        store
            .save_executed(&mut executed("1", "review", "published"))
            .await
            .unwrap();

        let state = store.current_state(&wf, &entity, &field).await.unwrap();
        assert_eq!(state, StateId::new("published"));
    }

    #[tokio::test]
    async fn test_previous_state_excludes_in_flight_record() {
        let store = InMemoryTransitionStore::new();
        let wf = make_workflow();
        let entity = EntityRef::new("article", "1");
        let field = FieldName::base();

        let mut first = executed("1", "draft", "review");
        store.save_executed(&mut first).await.unwrap();
        let mut second = executed("1", "review", "published");
        let second_id = store.save_executed(&mut second).await.unwrap();

        let previous = store
            .previous_state(&wf, &entity, &field, Some(&second_id))
            .await
            .unwrap();
        assert_eq!(previous, StateId::new("review"));

        // Brand-new entity: creation state
        let fresh = EntityRef::new("article", "999");
        let previous = store
            .previous_state(&wf, &fresh, &field, None)
            .await
            .unwrap();
        assert_eq!(previous, StateId::new("draft"));
    }

    #[tokio::test]
    async fn test_save_scheduled_replaces_existing() {
        let store = InMemoryTransitionStore::new();
        let due = Utc::now() + chrono::Duration::hours(1);

        let mut first = make_transition("1", "draft", "review");
        first.schedule_at(due).unwrap();
        store.save_scheduled(&first).await.unwrap();

        let mut second = make_transition("1", "draft", "published");
        second.schedule_at(due + chrono::Duration::hours(1)).unwrap();
        store.save_scheduled(&second).await.unwrap();

        assert_eq!(store.scheduled_count(), 1);
        let pending = store
            .scheduled_for(&EntityRef::new("article", "1"), &FieldName::base())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.to_state(), &StateId::new("published"));
    }

    #[tokio::test]
    async fn test_due_scheduled_window_is_half_open() {
        let store = InMemoryTransitionStore::new();
        let base = Utc::now();

        for (entity_id, offset) in [("1", 0i64), ("2", 30), ("3", 90)] {
            let mut t = make_transition(entity_id, "draft", "review");
            t.schedule_at(base + chrono::Duration::minutes(offset)).unwrap();
            store.save_scheduled(&t).await.unwrap();
        }

        // (base, base + 1h]: excludes the record exactly at window start,
        // includes the one thirty minutes in, excludes the later one.
        let due = store
            .due_scheduled(base, base + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity.entity_id.as_deref(), Some("2"));

        // Boundary at the end of the window is included
        let due = store
            .due_scheduled(base - chrono::Duration::seconds(1), base)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity.entity_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_due_scheduled_ordered_ascending() {
        let store = InMemoryTransitionStore::new();
        let base = Utc::now();

        for (entity_id, offset) in [("late", 50i64), ("early", 10), ("mid", 30)] {
            let mut t = make_transition(entity_id, "draft", "review");
            t.schedule_at(base + chrono::Duration::minutes(offset)).unwrap();
            store.save_scheduled(&t).await.unwrap();
        }

        let due = store
            .due_scheduled(base, base + chrono::Duration::hours(1))
            .await
            .unwrap();
        let order: Vec<&str> = due
            .iter()
            .map(|t| t.entity.entity_id.as_deref().unwrap())
            .collect();
        assert_eq!(order, vec!["early", "mid", "late"]);
    }

    #[tokio::test]
    async fn test_delete_scheduled_is_idempotent() {
        let store = InMemoryTransitionStore::new();
        let entity = EntityRef::new("article", "1");
        store
            .delete_scheduled(&entity, &FieldName::base())
            .await
            .unwrap();
        assert_eq!(store.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_for_entity_scopes() {
        let store = InMemoryTransitionStore::new();
        store
            .save_executed(&mut executed("1", "draft", "review"))
            .await
            .unwrap();
        let mut pending = make_transition("1", "review", "published");
        pending
            .schedule_at(Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        store.save_scheduled(&pending).await.unwrap();

        let entity = EntityRef::new("article", "1");

        // ScheduledOnly keeps history
        store
            .delete_for_entity(&entity, Some(&FieldName::base()), DeletionScope::ScheduledOnly)
            .await
            .unwrap();
        assert_eq!(store.scheduled_count(), 0);
        assert_eq!(store.executed_count(), 1);

        // All wipes history too
        store
            .delete_for_entity(&entity, None, DeletionScope::All)
            .await
            .unwrap();
        assert_eq!(store.executed_count(), 0);
    }

    #[tokio::test]
    async fn test_history_paging_newest_first() {
        let store = InMemoryTransitionStore::new();
        store
            .save_executed(&mut executed("1", "draft", "review"))
            .await
            .unwrap();
        store
            .save_executed(&mut executed("1", "review", "published"))
            .await
            .unwrap();
        store
            .save_executed(&mut executed("2", "draft", "review"))
            .await
            .unwrap();

        let entity = EntityRef::new("article", "1");
        let all = store
            .history(&entity, &FieldName::base(), QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].to_state(), &StateId::new("published"));

        let paged = store
            .history(&entity, &FieldName::base(), QueryWindow { limit: 1, offset: 1 })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].to_state(), &StateId::new("review"));
    }
}
