//! Workflow registry: holds the validated workflow definitions
//!
//! Definitions are configuration. They are registered once at startup,
//! validated on the way in, and immutable afterwards; the engine trusts
//! every workflow it finds here.

use stateflow_types::{WorkflowResult, WorkflowType, WorkflowTypeId};
use std::collections::HashMap;

/// Registry of workflow type definitions
#[derive(Clone, Debug, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<WorkflowTypeId, WorkflowType>,
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition.
    ///
    /// Validates the definition before storing; an invalid definition is
    /// never installed.
    pub fn register(&mut self, workflow: WorkflowType) -> WorkflowResult<WorkflowTypeId> {
        workflow.validate()?;
        let id = workflow.id.clone();
        self.workflows.insert(id.clone(), workflow);
        tracing::info!(workflow = %id, "Workflow type registered");
        Ok(id)
    }

    /// Get a definition by id. Unknown ids resolve to `None`, never an
    /// error: callers treat a missing workflow as "no states reachable".
    pub fn get(&self, id: &WorkflowTypeId) -> Option<&WorkflowType> {
        self.workflows.get(id)
    }

    pub fn contains(&self, id: &WorkflowTypeId) -> bool {
        self.workflows.contains_key(id)
    }

    /// List all registered definitions
    pub fn list(&self) -> Vec<&WorkflowType> {
        self.workflows.values().collect()
    }

    /// Total number of registered definitions
    pub fn count(&self) -> usize {
        self.workflows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateflow_types::{AccessRule, ConfigTransition, State, StateId, WorkflowError};

    fn make_valid_workflow(id: &str) -> WorkflowType {
        let mut wf = WorkflowType::new(id, "Test Workflow");
        wf.add_state(State::new("draft", "Draft").creation()).unwrap();
        wf.add_state(State::new("done", "Done")).unwrap();
        wf.add_transition(ConfigTransition::new(
            StateId::new("draft"),
            StateId::new("done"),
            AccessRule::capability("finish"),
        ))
        .unwrap();
        wf
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = WorkflowRegistry::new();
        let id = registry.register(make_valid_workflow("basic")).unwrap();

        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().label, "Test Workflow");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_register_invalid_rejected() {
        let mut registry = WorkflowRegistry::new();
        let empty = WorkflowType::new("empty", "Empty");
        let result = registry.register(empty);
        assert!(matches!(result, Err(WorkflowError::NoStates(_))));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let registry = WorkflowRegistry::new();
        assert!(registry.get(&WorkflowTypeId::new("nope")).is_none());
    }

    #[test]
    fn test_list() {
        let mut registry = WorkflowRegistry::new();
        registry.register(make_valid_workflow("a")).unwrap();
        registry.register(make_valid_workflow("b")).unwrap();
        assert_eq!(registry.list().len(), 2);
    }
}
