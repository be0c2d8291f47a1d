use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stateflow_types::{EntityRef, FieldName, StateId, Transition, TransitionId, WorkflowType};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    /// Maximum records to return; 0 means unbounded
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn limited(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

/// What `delete_for_entity` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionScope {
    /// Only pending scheduled records (cleaning a stale schedule)
    ScheduledOnly,
    /// Scheduled records and executed history (the field or entity is
    /// being removed)
    All,
}

/// Storage interface for executed transition history and pending
/// scheduled transitions.
///
/// All operations are scoped by entity-type + entity-id + field unless
/// noted. Revision ids are carried on records but never partition them.
#[async_trait]
pub trait TransitionStore: Send + Sync {
    /// Append an executed transition to history and assign its id.
    ///
    /// Rejects transitions that are not marked executed.
    async fn save_executed(&self, transition: &mut Transition) -> StoreResult<TransitionId>;

    /// Persist a pending scheduled transition, replacing any existing
    /// scheduled transition for the same (entity, field) pair.
    ///
    /// Rejects transitions that are not marked scheduled.
    async fn save_scheduled(&self, transition: &Transition) -> StoreResult<()>;

    /// The most recent executed transition for (entity, field), optionally
    /// excluding one id (the record currently being processed).
    async fn last_executed(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        exclude: Option<&TransitionId>,
    ) -> StoreResult<Option<Transition>>;

    /// Executed history for (entity, field), newest first.
    async fn history(
        &self,
        entity: &EntityRef,
        field: &FieldName,
        window: QueryWindow,
    ) -> StoreResult<Vec<Transition>>;

    /// The pending scheduled transition for (entity, field), if any.
    async fn scheduled_for(
        &self,
        entity: &EntityRef,
        field: &FieldName,
    ) -> StoreResult<Option<Transition>>;

    /// All scheduled transitions due within the half-open window
    /// `(start, end]`, ordered by due time ascending.
    async fn due_scheduled(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Transition>>;

    /// Delete the pending scheduled transition for (entity, field).
    /// Deleting a nonexistent record is not an error.
    async fn delete_scheduled(&self, entity: &EntityRef, field: &FieldName) -> StoreResult<()>;

    /// Delete records for an entity. `field == None` matches every field
    /// (entity deletion); `Some` limits the sweep to one field.
    async fn delete_for_entity(
        &self,
        entity: &EntityRef,
        field: Option<&FieldName>,
        scope: DeletionScope,
    ) -> StoreResult<()>;

    /// The entity's current state: the most recent executed transition's
    /// target, falling back through `previous_state` to the workflow's
    /// creation state.
    async fn current_state(
        &self,
        workflow: &WorkflowType,
        entity: &EntityRef,
        field: &FieldName,
    ) -> StoreResult<StateId> {
        match self.last_executed(entity, field, None).await? {
            Some(transition) => Ok(transition.to_state().clone()),
            None => self.previous_state(workflow, entity, field, None).await,
        }
    }

    /// The state the entity held before the transition currently being
    /// processed; for entities with no prior history, the creation state.
    async fn previous_state(
        &self,
        workflow: &WorkflowType,
        entity: &EntityRef,
        field: &FieldName,
        exclude: Option<&TransitionId>,
    ) -> StoreResult<StateId> {
        if let Some(transition) = self.last_executed(entity, field, exclude).await? {
            return Ok(transition.to_state().clone());
        }
        workflow
            .creation_state()
            .map(|state| state.id.clone())
            .ok_or_else(|| {
                StoreError::InvariantViolation(format!("workflow {} has no states", workflow.id))
            })
    }
}
