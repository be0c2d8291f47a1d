//! Workflow execution engine for Stateflow
//!
//! The engine validates, authorizes, and executes state transitions on
//! content entities, immediately or at a scheduled due time, and records
//! an auditable history through `stateflow-store`.
//!
//! # Key Principle
//!
//! **Soft failures return the unchanged state; they never throw.**
//!
//! A denied, vetoed, or misconfigured transition leaves the entity where
//! it was, logs the reason, and hands the caller the from-state id so a
//! batch of transitions is never aborted by one bad record. Only
//! persistence failures (and caller misuse such as an unknown workflow
//! id) surface as hard errors.
//!
//! # Architecture
//!
//! - [`WorkflowRegistry`] — validated workflow definitions, immutable at runtime
//! - [`AuthorizationEngine`] — decides who may move an entity between states
//! - [`ExecutionEngine`] — the validate → authorize → persist → sync pipeline
//! - [`ExecutionContext`] — request-scoped duplicate-execution guard
//! - [`Scheduler`] — fires due scheduled transitions, discarding stale ones
//! - [`EntityAdapter`] / [`CapabilityProvider`] — the narrow seams to the
//!   surrounding system

#![deny(unsafe_code)]

pub mod access;
pub mod adapter;
pub mod context;
pub mod errors;
pub mod executor;
pub mod observer;
pub mod registry;
pub mod scheduler;

pub use access::{ActorContext, AuthorizationEngine, CapabilityProvider, StaticCapabilityProvider};
pub use access::BYPASS_TRANSITION_ACCESS;
pub use adapter::{EntityAdapter, InMemoryEntityAdapter};
pub use context::ExecutionContext;
pub use errors::{EngineError, EngineResult};
pub use executor::ExecutionEngine;
pub use observer::{
    CommentMutator, ObserverRegistry, PostTransitionObserver, PreTransitionObserver,
};
pub use registry::WorkflowRegistry;
pub use scheduler::{RenderCacheInvalidator, RunSummary, Scheduler};
