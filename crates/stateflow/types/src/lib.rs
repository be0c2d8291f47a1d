//! Workflow domain types for Stateflow
//!
//! Stateflow attaches finite-state workflows to arbitrary content
//! entities. This crate holds the pure domain model:
//!
//! - **WorkflowType**: an immutable state-machine definition: its states,
//!   its allowed state-to-state transitions with authorization rules, and
//!   its creation (initial) state.
//! - **State**: one node of a workflow's state machine.
//! - **ConfigTransition**: an allowed (from, to) edge plus the access rule
//!   that governs who may take it.
//! - **Transition**: one concrete state change for one entity/field pair,
//!   either pending, scheduled for a future due time, or executed and
//!   recorded as history.
//!
//! # Design Principles
//!
//! 1. Definitions are configuration: loaded at startup, validated once,
//!    immutable at runtime.
//! 2. An executed transition is history. Its state fields never change
//!    again; only the comment stays editable.
//! 3. No I/O here. Execution, authorization, and persistence live in
//!    `stateflow-engine` and `stateflow-store`.

#![deny(unsafe_code)]

mod entity;
mod errors;
mod rule;
mod transition;
mod workflow;

pub use entity::*;
pub use errors::*;
pub use rule::*;
pub use transition::*;
pub use workflow::*;
