//! Transitions: concrete state changes for one entity/field pair
//!
//! A Transition moves through three phases of its own: pending-immediate,
//! pending-scheduled, and executed. The phase is carried by the
//! `scheduled` and `executed` flags rather than by subtypes; the execution
//! engine branches on them. Once executed, the state fields are frozen.
//! The record is history, and only the comment stays editable.

use crate::{ActorId, EntityRef, FieldName, StateId, WorkflowError, WorkflowResult, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a persisted transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub uuid::Uuid);

impl TransitionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Transition ───────────────────────────────────────────────────────

/// One concrete state change for a specific entity and field.
///
/// For scheduled transitions, `timestamp` is the *due* time, not the
/// creation time; for executed ones it is the execution time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Persisted id; `None` until the store has recorded it
    id: Option<TransitionId>,
    /// The workflow type both endpoint states belong to
    pub workflow: crate::WorkflowTypeId,
    /// Source state
    from: StateId,
    /// Target state
    to: StateId,
    /// The entity whose workflow field is changing
    pub entity: EntityRef,
    /// The workflow field on the entity
    pub field: FieldName,
    /// Who initiated the change
    pub actor: ActorId,
    /// Due time when scheduled; execution time once executed
    pub timestamp: DateTime<Utc>,
    /// Free-text comment shown in history listings
    comment: String,
    /// Deferred to a future due time
    scheduled: bool,
    /// Executed and recorded as history
    executed: bool,
    /// Executed with authorization bypassed
    pub forced: bool,
    /// Whether attached field data changed alongside the state.
    /// Feeds `is_empty`; set by the entity-save layer, never derived here.
    #[serde(default)]
    pub attached_changes: bool,
}

impl Transition {
    pub fn new(
        workflow: crate::WorkflowTypeId,
        from: StateId,
        to: StateId,
        entity: EntityRef,
        field: FieldName,
        actor: ActorId,
    ) -> Self {
        Self {
            id: None,
            workflow,
            from,
            to,
            entity,
            field,
            actor,
            timestamp: Utc::now(),
            comment: String::new(),
            scheduled: false,
            executed: false,
            forced: false,
            attached_changes: false,
        }
    }

    /// Rebuild a transition from persisted parts. Storage adapters only.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Option<TransitionId>,
        workflow: crate::WorkflowTypeId,
        from: StateId,
        to: StateId,
        entity: EntityRef,
        field: FieldName,
        actor: ActorId,
        timestamp: DateTime<Utc>,
        comment: String,
        scheduled: bool,
        executed: bool,
        forced: bool,
    ) -> Self {
        Self {
            id,
            workflow,
            from,
            to,
            entity,
            field,
            actor,
            timestamp,
            comment,
            scheduled,
            executed,
            forced,
            attached_changes: false,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attached_changes(mut self) -> Self {
        self.attached_changes = true;
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> Option<&TransitionId> {
        self.id.as_ref()
    }

    pub fn from_state(&self) -> &StateId {
        &self.from
    }

    pub fn to_state(&self) -> &StateId {
        &self.to
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    // ── Guarded mutation ─────────────────────────────────────────────

    /// Change the target state. Rejected once executed.
    pub fn set_target_state(&mut self, to: StateId) -> WorkflowResult<()> {
        if self.executed {
            return Err(WorkflowError::AlreadyExecuted);
        }
        self.to = to;
        Ok(())
    }

    /// Defer execution until `due`. Rejected once executed.
    pub fn schedule_at(&mut self, due: DateTime<Utc>) -> WorkflowResult<()> {
        if self.executed {
            return Err(WorkflowError::AlreadyExecuted);
        }
        self.scheduled = true;
        self.timestamp = due;
        Ok(())
    }

    /// Clear the scheduled flag so the transition executes immediately.
    /// The scheduler calls this when a due transition fires.
    pub fn unschedule(&mut self) -> WorkflowResult<()> {
        if self.executed {
            return Err(WorkflowError::AlreadyExecuted);
        }
        self.scheduled = false;
        Ok(())
    }

    /// The comment stays editable even after execution
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Freeze the state fields; the execution engine calls this just
    /// before persisting the history record.
    pub fn mark_executed(&mut self) {
        self.executed = true;
        self.scheduled = false;
    }

    /// Record the id assigned by the store
    pub fn record_persisted(&mut self, id: TransitionId) {
        self.id = Some(id);
    }

    // ── Predicates ───────────────────────────────────────────────────

    /// Whether the transition actually moves between two different states
    pub fn has_state_change(&self) -> bool {
        self.from != self.to
    }

    /// No state change, no comment, no attached-field changes: a no-op
    /// save, not an error. Such transitions are never persisted.
    pub fn is_empty(&self) -> bool {
        !self.has_state_change() && self.comment.trim().is_empty() && !self.attached_changes
    }

    /// Whether this executed transition can be undone by moving back to
    /// its source state. The source must be an active, non-creation state.
    pub fn is_revertable(&self, workflow: &WorkflowType) -> bool {
        if !self.has_state_change() {
            return false;
        }
        match workflow.state(&self.from) {
            Some(state) => state.is_active() && !state.is_creation(),
            None => false,
        }
    }

    /// Build the inverse transition: the target becomes the new source.
    /// Goes through ordinary authorization when executed.
    pub fn revert(&self, actor: ActorId) -> Transition {
        Transition::new(
            self.workflow.clone(),
            self.to.clone(),
            self.from.clone(),
            self.entity.clone(),
            self.field.clone(),
            actor,
        )
    }

    /// "from-to" label used in logs and the duplicate-execution guard
    pub fn state_pair_label(&self) -> String {
        format!("{}-{}", self.from, self.to)
    }

    /// Duplicate-execution guard key: one per (entity, field, state pair)
    pub fn dup_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.entity.storage_key(),
            self.field,
            self.state_pair_label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessRule, ConfigTransition, State};

    fn make_workflow() -> WorkflowType {
        let mut wf = WorkflowType::new("editorial", "Editorial");
        wf.add_state(State::new("draft", "Draft").creation()).unwrap();
        wf.add_state(State::new("review", "In review")).unwrap();
        wf.add_state(State::new("published", "Published")).unwrap();
        wf.add_state(State::new("retired", "Retired").inactive())
            .unwrap();
        wf.add_transition(ConfigTransition::new(
            StateId::new("draft"),
            StateId::new("review"),
            AccessRule::capability("submit"),
        ))
        .unwrap();
        wf
    }

    fn make_transition(from: &str, to: &str) -> Transition {
        Transition::new(
            crate::WorkflowTypeId::new("editorial"),
            StateId::new(from),
            StateId::new(to),
            EntityRef::new("article", "1"),
            FieldName::base(),
            ActorId::new("editor"),
        )
    }

    #[test]
    fn test_new_transition_is_pending() {
        let t = make_transition("draft", "review");
        assert!(t.id().is_none());
        assert!(!t.is_scheduled());
        assert!(!t.is_executed());
        assert!(t.has_state_change());
    }

    #[test]
    fn test_schedule_and_unschedule() {
        let mut t = make_transition("draft", "review");
        let due = Utc::now() + chrono::Duration::hours(2);
        t.schedule_at(due).unwrap();
        assert!(t.is_scheduled());
        assert_eq!(t.timestamp, due);

        t.unschedule().unwrap();
        assert!(!t.is_scheduled());
    }

    #[test]
    fn test_executed_freezes_state_fields() {
        let mut t = make_transition("draft", "review");
        t.mark_executed();

        assert!(t.is_executed());
        assert!(matches!(
            t.set_target_state(StateId::new("published")),
            Err(WorkflowError::AlreadyExecuted)
        ));
        assert!(matches!(
            t.schedule_at(Utc::now()),
            Err(WorkflowError::AlreadyExecuted)
        ));

        // Only the comment survives as editable
        t.set_comment("published after the fact");
        assert_eq!(t.comment(), "published after the fact");
    }

    #[test]
    fn test_is_empty() {
        let t = make_transition("draft", "draft");
        assert!(t.is_empty());

        let with_comment = make_transition("draft", "draft").with_comment("note");
        assert!(!with_comment.is_empty());

        let with_fields = make_transition("draft", "draft").with_attached_changes();
        assert!(!with_fields.is_empty());

        let real_change = make_transition("draft", "review");
        assert!(!real_change.is_empty());
    }

    #[test]
    fn test_revert_eligibility() {
        let wf = make_workflow();

        // No state change: not revertable
        assert!(!make_transition("review", "review").is_revertable(&wf));

        // Source is the creation state: not revertable
        assert!(!make_transition("draft", "review").is_revertable(&wf));

        // Source inactive: not revertable
        assert!(!make_transition("retired", "draft").is_revertable(&wf));

        // Active non-creation source: revertable
        assert!(make_transition("review", "published").is_revertable(&wf));

        // Source unknown to the workflow: not revertable
        assert!(!make_transition("limbo", "draft").is_revertable(&wf));
    }

    #[test]
    fn test_revert_builds_inverse() {
        let t = make_transition("review", "published");
        let inverse = t.revert(ActorId::new("moderator"));
        assert_eq!(inverse.from_state(), &StateId::new("published"));
        assert_eq!(inverse.to_state(), &StateId::new("review"));
        assert_eq!(inverse.actor, ActorId::new("moderator"));
        assert!(!inverse.is_executed());
        assert!(inverse.id().is_none());
    }

    #[test]
    fn test_dup_key_scopes_entity_field_and_pair() {
        let t = make_transition("draft", "review");
        assert_eq!(t.dup_key(), "article:1/workflow/draft-review");

        let other_field = Transition::new(
            crate::WorkflowTypeId::new("editorial"),
            StateId::new("draft"),
            StateId::new("review"),
            EntityRef::new("article", "1"),
            FieldName::new("side_workflow"),
            ActorId::new("editor"),
        );
        assert_ne!(t.dup_key(), other_field.dup_key());
    }

    #[test]
    fn test_restore_round_trip() {
        let id = TransitionId::generate();
        let t = Transition::restore(
            Some(id),
            crate::WorkflowTypeId::new("editorial"),
            StateId::new("draft"),
            StateId::new("review"),
            EntityRef::new("article", "9"),
            FieldName::base(),
            ActorId::new("editor"),
            Utc::now(),
            "imported".into(),
            false,
            true,
            false,
        );
        assert_eq!(t.id(), Some(&id));
        assert!(t.is_executed());
        assert_eq!(t.comment(), "imported");
    }

    #[test]
    fn test_serde_round_trip() {
        let t = make_transition("draft", "review").with_comment("ready");
        let json = serde_json::to_string(&t).unwrap();
        let back: Transition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.from_state(), t.from_state());
        assert_eq!(back.to_state(), t.to_state());
        assert_eq!(back.comment(), "ready");
    }
}
