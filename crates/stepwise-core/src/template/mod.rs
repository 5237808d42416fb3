//! Template persistence and management.
//!
//! `TemplateStore` maps templates onto the KV contract and serializes
//! statistic updates; `TemplateManager` layers validation, the
//! owner-to-shared fallback, listing order, YAML import/export and promotion
//! on top of it.

pub mod manager;
pub mod store;

pub use manager::{TemplateManager, validate_template};
pub use store::TemplateStore;
