//! Workflow execution.
//!
//! - `substitution`: `{{...}}` token rendering against run input and prior results.
//! - `resolver`: placeholder parameters bound from prior results.
//! - `condition`: JEXL step conditions.
//! - `summary`: size-bounded digests of prior results.
//! - `remedy`: oracle consultation for failed attempts.
//! - `control`: cancel/pause handles for live runs.
//! - `history`: bounded record of finished runs.
//! - `engine`: the step loop tying the above together.

pub mod condition;
pub mod control;
pub mod engine;
pub mod history;
pub mod remedy;
pub mod resolver;
pub mod substitution;
pub mod summary;

pub use control::{RunControl, RunRegistry};
pub use engine::{Engine, EngineError, compile_output};
pub use history::ExecutionHistory;
pub use remedy::{NoopOracle, OracleError, RemedyOracle, RemedyOutcome, RemedyReasoner};
pub use resolver::{PlaceholderResolver, ResolveError, ResolveOutcome};
pub use summary::{BudgetSummarizer, ResultSummarizer};
