//! Execution engine: the validate → authorize → persist → sync pipeline
//!
//! `execute` is the single entry point for state changes, immediate or
//! scheduled. Its failure semantics are deliberately lopsided: bad
//! configuration, denied authorization, and observer vetoes all resolve
//! to "return the unchanged from-state and log", while a store failure is
//! a hard error, since losing a state change silently is unacceptable.
//!
//! History is persisted before the entity field is written, so a failed
//! write can never leave an unrecorded state change behind.

use crate::access::{ActorContext, AuthorizationEngine, CapabilityProvider};
use crate::adapter::EntityAdapter;
use crate::context::ExecutionContext;
use crate::observer::ObserverRegistry;
use crate::registry::WorkflowRegistry;
use crate::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use stateflow_store::TransitionStore;
use stateflow_types::{
    ActorId, CommentPolicy, EntityRef, FieldName, State, StateId, Transition, WorkflowTypeId,
};
use std::sync::Arc;

/// Orchestrates transition execution against one registry, store, and
/// entity adapter.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn TransitionStore>,
    adapter: Arc<dyn EntityAdapter>,
    authorizer: AuthorizationEngine,
    observers: Arc<ObserverRegistry>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        store: Arc<dyn TransitionStore>,
        adapter: Arc<dyn EntityAdapter>,
        capabilities: Arc<dyn CapabilityProvider>,
    ) -> Self {
        Self {
            registry,
            store,
            adapter,
            authorizer: AuthorizationEngine::new(capabilities),
            observers: Arc::new(ObserverRegistry::new()),
        }
    }

    /// Replace the observer registry. Observers are wired once at startup.
    pub fn with_observers(mut self, observers: ObserverRegistry) -> Self {
        self.observers = Arc::new(observers);
        self
    }

    pub fn registry(&self) -> Arc<WorkflowRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn TransitionStore> {
        self.store.clone()
    }

    pub fn authorizer(&self) -> &AuthorizationEngine {
        &self.authorizer
    }

    /// Execute a transition and return the entity's resulting state id.
    ///
    /// Returns the target state on success and the unchanged source state
    /// on every soft failure path (unresolvable entity, unconfigured or
    /// denied move, observer veto, scheduling disabled). Store failures
    /// propagate as [`EngineError::Persistence`].
    pub async fn execute(
        &self,
        transition: &mut Transition,
        ctx: &mut ExecutionContext,
        force: bool,
    ) -> EngineResult<StateId> {
        let from = transition.from_state().clone();

        // Unknown workflow type: fail closed, nothing to persist
        let Some(workflow) = self.registry.get(&transition.workflow) else {
            tracing::warn!(
                workflow = %transition.workflow,
                entity = %transition.entity,
                "Transition references an unknown workflow type"
            );
            return Ok(from);
        };
        let workflow = workflow.clone();

        // Resolve the target entity
        if !transition.entity.is_new() && !self.adapter.exists(&transition.entity).await {
            tracing::warn!(
                entity = %transition.entity,
                "Transition target entity cannot be resolved"
            );
            return Ok(from);
        }

        // Duplicate-execution guard: the same (entity, field, state pair)
        // already ran in this context
        let guard_key = transition.dup_key();
        if !transition.is_empty() {
            if let Some(prior) = ctx.prior_outcome(&guard_key) {
                tracing::info!(
                    entity = %transition.entity,
                    field = %transition.field,
                    pair = %transition.state_pair_label(),
                    "Duplicate execution suppressed; returning prior outcome"
                );
                return Ok(prior.clone());
            }
        }
        // Provisional marker so reentrant calls see this execution
        ctx.record(guard_key.clone(), from.clone());

        // Both endpoints must belong to the workflow
        if !workflow.has_state(&from) || !workflow.has_state(transition.to_state()) {
            tracing::warn!(
                workflow = %workflow.id,
                from = %from,
                to = %transition.to_state(),
                "Transition endpoints are not states of this workflow"
            );
            return Ok(from);
        }

        // A required comment is part of validation, not authorization
        if workflow.settings.comment == CommentPolicy::Required
            && transition.has_state_change()
            && !force
            && transition.comment().trim().is_empty()
        {
            tracing::warn!(
                workflow = %workflow.id,
                entity = %transition.entity,
                "Transition rejected; this workflow requires a comment"
            );
            return Ok(from);
        }

        let actor = self.actor_context(transition).await;

        // Authorization applies only to real state changes
        if transition.has_state_change()
            && !force
            && !self.authorizer.is_allowed(&workflow, transition, &actor, false)
        {
            return Ok(from);
        }

        // Pre-transition observers may veto
        if !self.observers.allows(transition, &actor) {
            tracing::warn!(
                entity = %transition.entity,
                pair = %transition.state_pair_label(),
                "Transition vetoed by a pre-transition observer"
            );
            return Ok(from);
        }

        if force {
            transition.forced = true;
        }

        if transition.is_scheduled() {
            // Deferred: record the schedule; the entity's current state
            // does not change yet
            if !workflow.settings.schedule_enabled {
                tracing::warn!(
                    workflow = %workflow.id,
                    entity = %transition.entity,
                    "Scheduling is disabled for this workflow type"
                );
                return Ok(from);
            }
            self.store.save_scheduled(transition).await?;
            tracing::debug!(
                entity = %transition.entity,
                due = %transition.timestamp,
                pair = %transition.state_pair_label(),
                "Transition scheduled"
            );
            return Ok(from);
        }

        transition.mark_executed();
        self.observers.amend(transition);

        if !transition.is_empty() {
            // History first; a failed entity write must never leave an
            // unrecorded state change
            self.store.save_executed(transition).await?;
            if transition.has_state_change() {
                self.adapter
                    .set_state_value(
                        &transition.entity,
                        &transition.field,
                        transition.to_state().clone(),
                    )
                    .await?;
            }
            if workflow.settings.watchdog_logging {
                tracing::info!(
                    workflow = %workflow.id,
                    entity = %transition.entity,
                    actor = %transition.actor,
                    from = %workflow.state_label(&from),
                    to = %workflow.state_label(transition.to_state()),
                    forced = transition.is_forced(),
                    "State transition executed"
                );
            }
        }

        self.observers.notify(transition, &actor);

        let outcome = transition.to_state().clone();
        ctx.record(guard_key, outcome.clone());
        Ok(outcome)
    }

    /// Defer a transition to a future due time.
    ///
    /// Runs the ordinary pipeline with the scheduled flag set, so the
    /// move is validated and authorized now, persisted as a pending
    /// schedule, and the entity keeps its current state until the
    /// scheduler fires it.
    pub async fn schedule(
        &self,
        transition: &mut Transition,
        due: DateTime<Utc>,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<StateId> {
        transition.schedule_at(due)?;
        self.execute(transition, ctx, false).await
    }

    /// Undo the most recent executed transition for (entity, field) by
    /// executing its inverse through ordinary authorization.
    ///
    /// Returns the resulting state: unchanged when there is nothing to
    /// revert or the last transition is not revertable.
    pub async fn revert_last(
        &self,
        workflow_id: &WorkflowTypeId,
        entity: &EntityRef,
        field: &FieldName,
        actor: &ActorId,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<StateId> {
        let workflow = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.clone()))?;

        let current = self.store.current_state(workflow, entity, field).await?;
        let Some(last) = self.store.last_executed(entity, field, None).await? else {
            tracing::info!(entity = %entity, "No executed transition to revert");
            return Ok(current);
        };

        if !last.is_revertable(workflow) {
            tracing::warn!(
                entity = %entity,
                pair = %last.state_pair_label(),
                "Last transition is not revertable"
            );
            return Ok(current);
        }

        let comment = format!(
            "Reverted from '{}' back to '{}'",
            workflow.state_label(last.to_state()),
            workflow.state_label(last.from_state()),
        );
        let mut inverse = last.revert(actor.clone()).with_comment(comment);
        self.execute(&mut inverse, ctx, false).await
    }

    /// The states `actor` may move the entity to from its current state,
    /// ordered by weight. Empty when the workflow id is unknown.
    pub async fn available_states(
        &self,
        workflow_id: &WorkflowTypeId,
        entity: &EntityRef,
        field: &FieldName,
        actor: &ActorId,
        force: bool,
    ) -> EngineResult<Vec<State>> {
        let Some(workflow) = self.registry.get(workflow_id) else {
            return Ok(Vec::new());
        };

        let current = self.store.current_state(workflow, entity, field).await?;
        let is_owner = self.is_owner(entity, actor).await;
        let actor = ActorContext::new(actor.clone(), is_owner);

        Ok(self
            .authorizer
            .reachable_states(workflow, &current, &actor, force)
            .into_iter()
            .cloned()
            .collect())
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn actor_context(&self, transition: &Transition) -> ActorContext {
        let is_owner = self.is_owner(&transition.entity, &transition.actor).await;
        ActorContext::new(transition.actor.clone(), is_owner)
    }

    /// New entities are always owned by the acting user
    async fn is_owner(&self, entity: &EntityRef, actor: &ActorId) -> bool {
        if entity.is_new() {
            return true;
        }
        self.adapter
            .owner(entity)
            .await
            .map(|owner| &owner == actor)
            .unwrap_or(false)
    }
}
