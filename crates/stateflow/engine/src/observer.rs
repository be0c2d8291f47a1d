//! Transition observers: explicit, ordered hooks around execution
//!
//! Three tagged roles, registered at startup and invoked in registration
//! order:
//! - pre-transition observers may veto (any `false` stops the transition)
//! - comment mutators may amend the comment before it is persisted
//! - post-transition observers are notified and cannot affect the outcome

use crate::access::ActorContext;
use stateflow_types::Transition;
use std::sync::Arc;

/// Runs before a transition persists; returning `false` vetoes it
pub trait PreTransitionObserver: Send + Sync {
    fn before_transition(&self, transition: &Transition, actor: &ActorContext) -> bool;
}

/// May rewrite the comment of a transition about to be persisted
pub trait CommentMutator: Send + Sync {
    fn amend_comment(&self, transition: &Transition, comment: &mut String);
}

/// Notified after a transition executed; purely informational
pub trait PostTransitionObserver: Send + Sync {
    fn after_transition(&self, transition: &Transition, actor: &ActorContext);
}

/// Ordered collection of all registered observers
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    pre: Vec<Arc<dyn PreTransitionObserver>>,
    comment: Vec<Arc<dyn CommentMutator>>,
    post: Vec<Arc<dyn PostTransitionObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre(&mut self, observer: Arc<dyn PreTransitionObserver>) {
        self.pre.push(observer);
    }

    pub fn register_comment(&mut self, mutator: Arc<dyn CommentMutator>) {
        self.comment.push(mutator);
    }

    pub fn register_post(&mut self, observer: Arc<dyn PostTransitionObserver>) {
        self.post.push(observer);
    }

    /// Whether every pre-transition observer allows the transition
    pub fn allows(&self, transition: &Transition, actor: &ActorContext) -> bool {
        self.pre
            .iter()
            .all(|observer| observer.before_transition(transition, actor))
    }

    /// Run every comment mutator over the transition's comment
    pub fn amend(&self, transition: &mut Transition) {
        if self.comment.is_empty() {
            return;
        }
        let mut comment = transition.comment().to_string();
        for mutator in &self.comment {
            mutator.amend_comment(transition, &mut comment);
        }
        transition.set_comment(comment);
    }

    /// Notify every post-transition observer
    pub fn notify(&self, transition: &Transition, actor: &ActorContext) {
        for observer in &self.post {
            observer.after_transition(transition, actor);
        }
    }
}
