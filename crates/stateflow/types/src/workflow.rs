//! Workflow type definitions: the blueprint a state machine is built from
//!
//! A WorkflowType is an ordered set of states plus the allowed transitions
//! between them. Definitions are authored as configuration (JSON), loaded
//! at startup, validated once, and never modified at runtime.

use crate::{ConfigTransition, WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow type
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowTypeId(pub String);

impl WorkflowTypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a state within a workflow type
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── State ────────────────────────────────────────────────────────────

/// One node of a workflow's state machine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    /// Unique identifier within the owning workflow type
    pub id: StateId,
    /// Human-readable label
    pub label: String,
    /// Sort weight; ties in reachable-state listings break on this
    #[serde(default)]
    pub weight: i32,
    /// Whether this is the workflow's creation (initial) state
    #[serde(default)]
    pub creation: bool,
    /// Inactive states are retired: still valid in history, but not
    /// revertable-to and not offered as targets
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl State {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: StateId::new(id),
            label: label.into(),
            weight: 0,
            creation: false,
            active: true,
        }
    }

    /// Mark this state as the workflow's creation state
    pub fn creation(mut self) -> Self {
        self.creation = true;
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_creation(&self) -> bool {
        self.creation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

// ── Settings ─────────────────────────────────────────────────────────

/// How the comment box behaves when a transition is made
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CommentPolicy {
    /// No comment is collected
    Hidden,
    /// Comment may be supplied
    #[default]
    Optional,
    /// Comment must be supplied
    Required,
}

/// Per-workflow-type behavior switches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Comment collection policy
    #[serde(default)]
    pub comment: CommentPolicy,
    /// Whether transitions may be scheduled for a future due time
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,
    /// Whether executions and denials are written to the audit log
    #[serde(default = "default_true")]
    pub watchdog_logging: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            comment: CommentPolicy::Optional,
            schedule_enabled: true,
            watchdog_logging: true,
        }
    }
}

// ── Workflow type ────────────────────────────────────────────────────

/// An immutable workflow state-machine definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowType {
    /// Unique identifier
    pub id: WorkflowTypeId,
    /// Human-readable label
    pub label: String,
    /// The states, in declaration order
    pub states: Vec<State>,
    /// The allowed transitions between states
    #[serde(default)]
    pub transitions: Vec<ConfigTransition>,
    /// Behavior switches
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowType {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: WorkflowTypeId::new(id),
            label: label.into(),
            states: Vec::new(),
            transitions: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a state to the workflow
    pub fn add_state(&mut self, state: State) -> WorkflowResult<()> {
        if self.states.iter().any(|s| s.id == state.id) {
            return Err(WorkflowError::DuplicateState(state.id));
        }
        self.states.push(state);
        Ok(())
    }

    /// Add an allowed transition between two known states
    pub fn add_transition(&mut self, transition: ConfigTransition) -> WorkflowResult<()> {
        for endpoint in [&transition.from, &transition.to] {
            if !self.has_state(endpoint) {
                return Err(WorkflowError::ForeignState {
                    state: endpoint.clone(),
                    workflow: self.id.clone(),
                });
            }
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Get a state by id
    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn has_state(&self, id: &StateId) -> bool {
        self.state(id).is_some()
    }

    /// The creation (initial) state: entities with no recorded history sit here
    pub fn creation_state(&self) -> Option<&State> {
        self.states
            .iter()
            .find(|s| s.is_creation())
            .or_else(|| self.states.first())
    }

    /// All config transitions from `from` to `to`.
    ///
    /// More than one may exist between the same pair of states, each with
    /// its own access rule; a move is allowed if any of them grants it.
    pub fn config_transitions(&self, from: &StateId, to: &StateId) -> Vec<&ConfigTransition> {
        self.transitions
            .iter()
            .filter(|t| &t.from == from && &t.to == to)
            .collect()
    }

    /// All config transitions leaving `from`
    pub fn transitions_from(&self, from: &StateId) -> Vec<&ConfigTransition> {
        self.transitions.iter().filter(|t| &t.from == from).collect()
    }

    /// States ordered by weight, ties broken by declaration order
    pub fn states_by_weight(&self) -> Vec<&State> {
        let mut states: Vec<&State> = self.states.iter().collect();
        states.sort_by_key(|s| s.weight);
        states
    }

    /// Human label for a state id, falling back to the raw id
    pub fn state_label(&self, id: &StateId) -> String {
        self.state(id)
            .map(|s| s.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Validate the definition for structural correctness.
    ///
    /// Called once at registration; a definition that fails here is never
    /// installed, so the engine can trust registered workflows.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.states.is_empty() {
            return Err(WorkflowError::NoStates(self.id.clone()));
        }

        let creation_count = self.states.iter().filter(|s| s.is_creation()).count();
        if creation_count == 0 {
            return Err(WorkflowError::NoCreationState(self.id.clone()));
        }
        if creation_count > 1 {
            return Err(WorkflowError::MultipleCreationStates(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(&state.id) {
                return Err(WorkflowError::DuplicateState(state.id.clone()));
            }
        }

        for transition in &self.transitions {
            for endpoint in [&transition.from, &transition.to] {
                if !self.has_state(endpoint) {
                    return Err(WorkflowError::ForeignState {
                        state: endpoint.clone(),
                        workflow: self.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}
