//! Authorization: who may move an entity between workflow states
//!
//! The decision is a pure function over the actor's capability set, the
//! entity's ownership, and the workflow's configured transitions. Being
//! the entity's owner grants the implicit author role for the duration of
//! one check; no actor object is ever mutated.

use stateflow_types::{ActorId, State, StateId, Transition, WorkflowType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Capability that exempts an actor from all transition access checks
pub const BYPASS_TRANSITION_ACCESS: &str = "bypass workflow transition access";

/// Answers capability questions about actors
pub trait CapabilityProvider: Send + Sync {
    fn has_capability(&self, actor: &ActorId, capability: &str) -> bool;
}

/// Fixed capability grants, loaded once. Suits tests and CLI glue;
/// real deployments implement [`CapabilityProvider`] over their own
/// account system.
#[derive(Clone, Debug, Default)]
pub struct StaticCapabilityProvider {
    grants: HashMap<ActorId, HashSet<String>>,
}

impl StaticCapabilityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, actor: impl Into<String>, capability: impl Into<String>) -> Self {
        self.grants
            .entry(ActorId::new(actor))
            .or_default()
            .insert(capability.into());
        self
    }
}

impl CapabilityProvider for StaticCapabilityProvider {
    fn has_capability(&self, actor: &ActorId, capability: &str) -> bool {
        self.grants
            .get(actor)
            .map(|caps| caps.contains(capability))
            .unwrap_or(false)
    }
}

/// The effective actor for one authorization check.
///
/// `is_owner` is computed from the entity adapter (new entities always
/// count as owned) and stands in for the implicit author role.
#[derive(Clone, Debug)]
pub struct ActorContext {
    pub id: ActorId,
    pub is_owner: bool,
}

impl ActorContext {
    pub fn new(id: ActorId, is_owner: bool) -> Self {
        Self { id, is_owner }
    }

    /// An actor acting on their own entity
    pub fn owner(id: ActorId) -> Self {
        Self { id, is_owner: true }
    }
}

/// Decides whether an actor may move an entity from state A to state B
#[derive(Clone)]
pub struct AuthorizationEngine {
    provider: Arc<dyn CapabilityProvider>,
}

impl AuthorizationEngine {
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { provider }
    }

    /// Whether `actor` may take `transition`.
    ///
    /// Forced transitions bypass everything: scheduled execution and
    /// administrative overrides already carry an authorized intent.
    /// Denials are logged with state labels; they must never be silent.
    pub fn is_allowed(
        &self,
        workflow: &WorkflowType,
        transition: &Transition,
        actor: &ActorContext,
        force: bool,
    ) -> bool {
        if force || transition.is_forced() {
            return true;
        }

        if self
            .provider
            .has_capability(&actor.id, BYPASS_TRANSITION_ACCESS)
        {
            return true;
        }

        let from = transition.from_state();
        let to = transition.to_state();
        let edges = workflow.config_transitions(from, to);
        if edges.is_empty() {
            tracing::warn!(
                workflow = %workflow.id,
                actor = %actor.id,
                from = %workflow.state_label(from),
                to = %workflow.state_label(to),
                "Transition is not configured"
            );
            return false;
        }

        let granted = edges.iter().any(|edge| self.rule_grants(&edge.rule, actor));
        if !granted {
            tracing::warn!(
                workflow = %workflow.id,
                actor = %actor.id,
                from = %workflow.state_label(from),
                to = %workflow.state_label(to),
                "Transition denied"
            );
        }
        granted
    }

    /// The states `actor` may move to from `from`, ordered by weight with
    /// ties broken by declaration order. The current state itself is
    /// always offered (staying put needs no transition). Unknown state
    /// ids yield an empty list; "nothing reachable" is a caller-level
    /// condition, not an engine error.
    pub fn reachable_states<'a>(
        &self,
        workflow: &'a WorkflowType,
        from: &StateId,
        actor: &ActorContext,
        force: bool,
    ) -> Vec<&'a State> {
        if !workflow.has_state(from) {
            return Vec::new();
        }

        // Force and the bypass capability precede the configured-edge
        // check, exactly as in `is_allowed`: both offer every active state
        let bypass = force
            || self
                .provider
                .has_capability(&actor.id, BYPASS_TRANSITION_ACCESS);

        workflow
            .states_by_weight()
            .into_iter()
            .filter(|candidate| {
                if &candidate.id == from {
                    return true;
                }
                if !candidate.is_active() {
                    return false;
                }
                if bypass {
                    return true;
                }
                workflow
                    .config_transitions(from, &candidate.id)
                    .iter()
                    .any(|edge| self.rule_grants(&edge.rule, actor))
            })
            .collect()
    }

    fn rule_grants(&self, rule: &stateflow_types::AccessRule, actor: &ActorContext) -> bool {
        if rule.allow_author && actor.is_owner {
            return true;
        }
        rule.capabilities
            .iter()
            .any(|capability| self.provider.has_capability(&actor.id, capability))
    }
}
