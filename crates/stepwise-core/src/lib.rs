//! Business logic and storage trait definitions for Stepwise.
//!
//! This crate defines the "ports" (storage, tool, oracle traits) that the
//! infrastructure layer and callers implement, plus the workflow engine that
//! drives runs over them. It depends only on `stepwise-types` -- never on
//! `stepwise-infra` or any database/IO crate.

pub mod storage;
pub mod template;
pub mod tool;
pub mod workflow;
