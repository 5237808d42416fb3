//! JEXL evaluation of step `condition` clauses.
//!
//! A condition sees the run input and the state of prior steps:
//!
//! ```json
//! {
//!   "input": { ... },
//!   "steps": { "<step_id>": { "status": "completed", "result": <value> }, ... }
//! }
//! ```
//!
//! Payloads are always passed as context objects, never interpolated into
//! expression strings.

use serde_json::{Map, Value, json};
use stepwise_types::workflow::WorkflowExecution;

/// Errors that can occur during condition evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("condition evaluation failed: {0}")]
    EvalFailed(String),
}

/// JEXL evaluator with a small set of transforms registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });
        Self { evaluator }
    }

    /// Evaluate `expression` against `context`, coerced to a boolean with
    /// JavaScript-like truthiness.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, ConditionError> {
        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ConditionError::EvalFailed(e.to_string()))?;
        Ok(truthy(&result))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a condition with a freshly built evaluator.
///
/// The evaluator is not kept across await points, so callers inside async
/// flows stay `Send`.
pub fn evaluate_condition(expression: &str, context: &Value) -> Result<bool, ConditionError> {
    ConditionEvaluator::new().evaluate(expression, context)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Build the condition context from steps declared before `before_index`.
pub fn condition_context(execution: &WorkflowExecution, before_index: usize) -> Value {
    let mut steps = Map::new();
    for step in execution.steps.iter().take(before_index) {
        steps.insert(
            step.step_id.clone(),
            json!({
                "status": step.status,
                "result": step.result.clone().unwrap_or(Value::Null),
            }),
        );
    }
    json!({
        "input": execution.input,
        "steps": steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::workflow::{StepStatus, WorkflowStep, WorkflowTemplate};

    fn execution() -> WorkflowExecution {
        let template = WorkflowTemplate::new(
            "t",
            "alice",
            vec![
                WorkflowStep::new("search", "web", "search", json!({})),
                WorkflowStep::new("notify", "mail", "send", json!({})),
            ],
        );
        let mut run = WorkflowExecution::new(&template, "alice", json!({"notify": true, "to": "Bob"}));
        let search = run.step_mut("search").unwrap();
        search.status = StepStatus::Completed;
        search.result = Some(json!({"hits": [1, 2, 3]}));
        run
    }

    #[test]
    fn test_condition_on_input() {
        let eval = ConditionEvaluator::new();
        let ctx = condition_context(&execution(), 1);
        assert!(eval.evaluate("input.notify == true", &ctx).unwrap());
        assert!(!eval.evaluate("input.to == 'Alice'", &ctx).unwrap());
    }

    #[test]
    fn test_condition_on_prior_step() {
        let eval = ConditionEvaluator::new();
        let ctx = condition_context(&execution(), 1);
        assert!(eval
            .evaluate("steps.search.status == 'completed'", &ctx)
            .unwrap());
        assert!(eval
            .evaluate("steps.search.result.hits|length > 2", &ctx)
            .unwrap());
    }

    #[test]
    fn test_later_steps_not_visible() {
        let ctx = condition_context(&execution(), 1);
        assert!(ctx["steps"].get("notify").is_none());
    }

    #[test]
    fn test_truthiness() {
        let eval = ConditionEvaluator::new();
        let ctx = json!({"input": {"empty": "", "n": 0.0, "list": []}});
        assert!(!eval.evaluate("input.empty", &ctx).unwrap());
        assert!(!eval.evaluate("input.n", &ctx).unwrap());
        assert!(eval.evaluate("input.list", &ctx).unwrap());
        assert!(!eval.evaluate("input.missing", &ctx).unwrap());
    }

    #[test]
    fn test_invalid_expression_errors() {
        let eval = ConditionEvaluator::new();
        let err = eval.evaluate("input.a ==", &json!({"input": {}})).unwrap_err();
        assert!(err.to_string().contains("condition evaluation failed"));
    }
}
