//! Config transitions: the allowed edges of a workflow's state machine
//!
//! Every edge carries an access rule. A move from A to B is permitted
//! when at least one configured A->B edge grants it to the acting user;
//! there is no implicit "adjacent states are reachable" behavior.

use crate::StateId;
use serde::{Deserialize, Serialize};

/// Who may take a configured transition.
///
/// `capabilities` is an any-of set checked against the authorization
/// provider. `allow_author` additionally grants the move to the entity's
/// owner, independent of capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessRule {
    /// Capability strings; holding any one of them grants the move
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Whether the entity's owner may take this transition
    #[serde(default)]
    pub allow_author: bool,
}

impl AccessRule {
    /// Rule granted by a single capability
    pub fn capability(capability: impl Into<String>) -> Self {
        Self {
            capabilities: vec![capability.into()],
            allow_author: false,
        }
    }

    /// Rule granted to the entity's owner only
    pub fn author() -> Self {
        Self {
            capabilities: Vec::new(),
            allow_author: true,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn or_author(mut self) -> Self {
        self.allow_author = true;
        self
    }

    /// A rule that names nobody grants nothing
    pub fn grants_nobody(&self) -> bool {
        self.capabilities.is_empty() && !self.allow_author
    }
}

/// An allowed (from, to) edge plus its access rule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigTransition {
    /// Source state
    pub from: StateId,
    /// Target state
    pub to: StateId,
    /// Who may take this edge
    #[serde(default)]
    pub rule: AccessRule,
}

impl ConfigTransition {
    pub fn new(from: StateId, to: StateId, rule: AccessRule) -> Self {
        Self { from, to, rule }
    }

    /// Whether this edge connects the given pair of states
    pub fn connects(&self, from: &StateId, to: &StateId) -> bool {
        &self.from == from && &self.to == to
    }
}
