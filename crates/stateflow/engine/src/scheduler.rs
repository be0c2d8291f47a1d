//! Scheduler: fires scheduled transitions whose due time has arrived
//!
//! Runs periodically (one cron tick = one call) over a half-open time
//! window. Before firing, each due transition is re-validated against the
//! entity's *current* state: if the world changed since scheduling, the
//! pending record is discarded with a warning rather than executed. That
//! staleness check is the only cancellation path; there is no automatic
//! re-targeting to the entity's new state.

use crate::context::ExecutionContext;
use crate::executor::ExecutionEngine;
use crate::EngineResult;
use chrono::{DateTime, Utc};
use stateflow_store::TransitionStore;
use std::collections::HashSet;
use std::sync::Arc;

/// Receives an invalidation signal when a scheduler run changed the state
/// of entities on their base workflow field, so cached rendering that
/// depends on entity state can be flushed. The surrounding system owns
/// the actual cache.
pub trait RenderCacheInvalidator: Send + Sync {
    fn invalidate(&self, entity_type: &str);
}

/// Outcome of one scheduler run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Due transitions that executed
    pub fired: usize,
    /// Due transitions discarded as stale or orphaned
    pub discarded: usize,
}

/// Processes due scheduled transitions in ascending due-time order
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<ExecutionEngine>,
    invalidator: Option<Arc<dyn RenderCacheInvalidator>>,
}

impl Scheduler {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            invalidator: None,
        }
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn RenderCacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Process every scheduled transition due within `(window_start,
    /// window_end]`.
    ///
    /// Each transition executes forced: authorization was the caller's
    /// responsibility at schedule time. Soft failures inside execution
    /// are logged and skipped; only store failures abort the run.
    pub async fn run_due(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<RunSummary> {
        let store = self.engine.store();
        let registry = self.engine.registry();

        let due = store.due_scheduled(window_start, window_end).await?;
        tracing::debug!(
            count = due.len(),
            start = %window_start,
            end = %window_end,
            "Scheduler window loaded"
        );

        // One guard context for the whole batch run
        let mut ctx = ExecutionContext::new();
        let mut summary = RunSummary::default();
        let mut base_field_types: HashSet<String> = HashSet::new();

        for mut transition in due {
            let Some(workflow) = registry.get(&transition.workflow) else {
                tracing::warn!(
                    workflow = %transition.workflow,
                    entity = %transition.entity,
                    "Scheduled transition references an unknown workflow type; discarding"
                );
                store
                    .delete_scheduled(&transition.entity, &transition.field)
                    .await?;
                summary.discarded += 1;
                continue;
            };

            // The world may have changed since scheduling: another
            // transition fired, or the field was written directly
            let current = store
                .current_state(workflow, &transition.entity, &transition.field)
                .await?;
            if &current != transition.from_state() {
                tracing::warn!(
                    entity = %transition.entity,
                    field = %transition.field,
                    expected = %transition.from_state(),
                    actual = %current,
                    "Stale scheduled transition discarded; entity state changed since scheduling"
                );
                store
                    .delete_scheduled(&transition.entity, &transition.field)
                    .await?;
                summary.discarded += 1;
                continue;
            }

            if transition.comment().trim().is_empty() {
                transition.set_comment(format!(
                    "Scheduled by system; due {}",
                    transition.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }

            // Consume the pending record, then replay through the engine
            transition.unschedule()?;
            store
                .delete_scheduled(&transition.entity, &transition.field)
                .await?;

            let result = self.engine.execute(&mut transition, &mut ctx, true).await?;
            if &result == transition.to_state() {
                summary.fired += 1;
                if transition.field.is_base() {
                    base_field_types.insert(transition.entity.entity_type.clone());
                }
            }
        }

        if let Some(invalidator) = &self.invalidator {
            for entity_type in &base_field_types {
                invalidator.invalidate(entity_type);
            }
        }

        tracing::info!(
            fired = summary.fired,
            discarded = summary.discarded,
            "Scheduler run complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{ActorContext, StaticCapabilityProvider};
    use crate::adapter::InMemoryEntityAdapter;
    use crate::observer::{ObserverRegistry, PostTransitionObserver};
    use crate::registry::WorkflowRegistry;
    use stateflow_store::{InMemoryTransitionStore, TransitionStore};
    use stateflow_types::{
        AccessRule, ActorId, ConfigTransition, EntityRef, FieldName, State, StateId, Transition,
        WorkflowType, WorkflowTypeId,
    };
    use std::sync::Mutex;

    fn make_editorial() -> WorkflowType {
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
        wf.add_transition(ConfigTransition::new(
            StateId::new("review"),
            StateId::new("published"),
            AccessRule::capability("publish"),
        ))
        .unwrap();
        wf
    }

    struct Fixture {
        engine: Arc<ExecutionEngine>,
        store: Arc<InMemoryTransitionStore>,
        adapter: Arc<InMemoryEntityAdapter>,
    }

    fn setup() -> Fixture {
        setup_with_observers(ObserverRegistry::new())
    }

    fn setup_with_observers(observers: ObserverRegistry) -> Fixture {
        let mut registry = WorkflowRegistry::new();
        registry.register(make_editorial()).unwrap();

        let store = Arc::new(InMemoryTransitionStore::new());
        let adapter = Arc::new(InMemoryEntityAdapter::new());
        for id in ["1", "2"] {
            adapter.insert_entity(&EntityRef::new("article", id), ActorId::new("author"));
        }

        let provider = StaticCapabilityProvider::new()
            .grant("editor", "submit")
            .grant("publisher", "submit")
            .grant("publisher", "publish");

        let engine = Arc::new(
            ExecutionEngine::new(
                Arc::new(registry),
                store.clone(),
                adapter.clone(),
                Arc::new(provider),
            )
            .with_observers(observers),
        );

        Fixture {
            engine,
            store,
            adapter,
        }
    }

    fn make_transition(entity_id: &str, actor: &str, from: &str, to: &str) -> Transition {
        Transition::new(
            WorkflowTypeId::new("editorial"),
            StateId::new(from),
            StateId::new(to),
            EntityRef::new("article", entity_id),
            FieldName::base(),
            ActorId::new(actor),
        )
    }

    async fn schedule(fx: &Fixture, transition: &mut Transition, due: DateTime<Utc>) {
        let mut ctx = ExecutionContext::new();
        fx.engine.schedule(transition, due, &mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_due_transition_fires() {
        // P5: scheduled A->B for an entity still in A
        let fx = setup();
        let now = Utc::now();
        let due = now + chrono::Duration::minutes(30);

        let mut t = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut t, due).await;

        let scheduler = Scheduler::new(fx.engine.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { fired: 1, discarded: 0 });
        assert_eq!(fx.store.executed_count(), 1);
        assert_eq!(fx.store.scheduled_count(), 0);
        assert_eq!(
            fx.adapter
                .state_of(&EntityRef::new("article", "1"), &FieldName::base()),
            Some(StateId::new("review"))
        );

        // Scheduled transitions always execute forced
        let history = fx
            .store
            .history(
                &EntityRef::new("article", "1"),
                &FieldName::base(),
                Default::default(),
            )
            .await
            .unwrap();
        assert!(history[0].is_forced());
    }

    #[tokio::test]
    async fn test_stale_transition_discarded() {
        // P4: the entity moved on before the due time arrived
        let fx = setup();
        let now = Utc::now();

        let mut pending = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut pending, now + chrono::Duration::minutes(30)).await;

        // A direct transition beats the schedule to it
        let mut ctx = ExecutionContext::new();
        let mut direct = make_transition("1", "editor", "draft", "review");
        fx.engine.execute(&mut direct, &mut ctx, false).await.unwrap();

        let scheduler = Scheduler::new(fx.engine.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { fired: 0, discarded: 1 });
        // The direct record is the only history; the stale schedule is gone
        assert_eq!(fx.store.executed_count(), 1);
        assert_eq!(fx.store.scheduled_count(), 0);
        assert_eq!(
            fx.adapter
                .state_of(&EntityRef::new("article", "1"), &FieldName::base()),
            Some(StateId::new("review"))
        );
    }

    #[tokio::test]
    async fn test_not_yet_due_stays_pending() {
        let fx = setup();
        let now = Utc::now();

        let mut t = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut t, now + chrono::Duration::hours(10)).await;

        let scheduler = Scheduler::new(fx.engine.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(fx.store.scheduled_count(), 1);
        assert_eq!(fx.store.executed_count(), 0);
    }

    #[tokio::test]
    async fn test_default_comment_synthesized() {
        let fx = setup();
        let now = Utc::now();

        let mut t = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut t, now + chrono::Duration::minutes(5)).await;

        let scheduler = Scheduler::new(fx.engine.clone());
        scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let history = fx
            .store
            .history(
                &EntityRef::new("article", "1"),
                &FieldName::base(),
                Default::default(),
            )
            .await
            .unwrap();
        assert!(history[0].comment().starts_with("Scheduled by system"));
    }

    #[tokio::test]
    async fn test_supplied_comment_preserved() {
        let fx = setup();
        let now = Utc::now();

        let mut t = make_transition("1", "editor", "draft", "review")
            .with_comment("publish after the embargo lifts");
        schedule(&fx, &mut t, now + chrono::Duration::minutes(5)).await;

        let scheduler = Scheduler::new(fx.engine.clone());
        scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let history = fx
            .store
            .history(
                &EntityRef::new("article", "1"),
                &FieldName::base(),
                Default::default(),
            )
            .await
            .unwrap();
        assert_eq!(history[0].comment(), "publish after the embargo lifts");
    }

    #[tokio::test]
    async fn test_processes_in_due_time_order() {
        struct RecordOrder(Arc<Mutex<Vec<String>>>);
        impl PostTransitionObserver for RecordOrder {
            fn after_transition(&self, transition: &Transition, _: &ActorContext) {
                if let Ok(mut order) = self.0.lock() {
                    order.push(transition.entity.entity_id.clone().unwrap_or_default());
                }
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut observers = ObserverRegistry::new();
        observers.register_post(Arc::new(RecordOrder(order.clone())));
        let fx = setup_with_observers(observers);
        let now = Utc::now();

        // Entity 2 is due before entity 1
        let mut later = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut later, now + chrono::Duration::minutes(45)).await;
        let mut earlier = make_transition("2", "editor", "draft", "review");
        schedule(&fx, &mut earlier, now + chrono::Duration::minutes(15)).await;

        let scheduler = Scheduler::new(fx.engine.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary.fired, 2);
        assert_eq!(*order.lock().unwrap(), vec!["2".to_string(), "1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidation_signal_for_base_field() {
        #[derive(Default)]
        struct Recording(Mutex<Vec<String>>);
        impl RenderCacheInvalidator for Recording {
            fn invalidate(&self, entity_type: &str) {
                if let Ok(mut types) = self.0.lock() {
                    types.push(entity_type.to_string());
                }
            }
        }

        let fx = setup();
        let now = Utc::now();
        let invalidator = Arc::new(Recording::default());

        let mut t = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut t, now + chrono::Duration::minutes(5)).await;

        let scheduler =
            Scheduler::new(fx.engine.clone()).with_invalidator(invalidator.clone());
        scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(*invalidator.0.lock().unwrap(), vec!["article".to_string()]);
    }

    #[tokio::test]
    async fn test_no_invalidation_for_scoped_field() {
        #[derive(Default)]
        struct Recording(Mutex<Vec<String>>);
        impl RenderCacheInvalidator for Recording {
            fn invalidate(&self, entity_type: &str) {
                if let Ok(mut types) = self.0.lock() {
                    types.push(entity_type.to_string());
                }
            }
        }

        let fx = setup();
        let now = Utc::now();
        let invalidator = Arc::new(Recording::default());

        let mut t = Transition::new(
            WorkflowTypeId::new("editorial"),
            StateId::new("draft"),
            StateId::new("review"),
            EntityRef::new("article", "1"),
            FieldName::new("side_workflow"),
            ActorId::new("editor"),
        );
        schedule(&fx, &mut t, now + chrono::Duration::minutes(5)).await;

        let scheduler =
            Scheduler::new(fx.engine.clone()).with_invalidator(invalidator.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary.fired, 1);
        assert!(invalidator.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_stale_record_does_not_abort_batch() {
        let fx = setup();
        let now = Utc::now();

        // Entity 1's schedule will go stale; entity 2's stays valid
        let mut one = make_transition("1", "editor", "draft", "review");
        schedule(&fx, &mut one, now + chrono::Duration::minutes(10)).await;
        let mut two = make_transition("2", "editor", "draft", "review");
        schedule(&fx, &mut two, now + chrono::Duration::minutes(20)).await;

        let mut ctx = ExecutionContext::new();
        let mut direct = make_transition("1", "editor", "draft", "review");
        fx.engine.execute(&mut direct, &mut ctx, false).await.unwrap();

        let scheduler = Scheduler::new(fx.engine.clone());
        let summary = scheduler
            .run_due(now, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { fired: 1, discarded: 1 });
        assert_eq!(
            fx.adapter
                .state_of(&EntityRef::new("article", "2"), &FieldName::base()),
            Some(StateId::new("review"))
        );
    }
}
