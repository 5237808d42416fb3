//! Shared domain types for Stepwise.
//!
//! This crate contains the serializable records that cross every boundary of
//! the engine: templates and their steps, executions and per-step state, the
//! tool and remedy-oracle message shapes, engine configuration, and the
//! error enums shared between layers.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod remedy;
pub mod tool;
pub mod workflow;
