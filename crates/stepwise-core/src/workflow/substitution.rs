//! `{{...}}` variable substitution.
//!
//! String leaves of a step input are parsed into literal and token segments,
//! then evaluated against a `Scope` (run input plus prior step results).
//!
//! Token forms:
//! - `{{name}}` -- run input field (dotted paths walk objects and arrays)
//! - `{{name|default}}` -- that field, or `default` when absent, null or ""
//! - `{{step_id.field}}` -- `field` of a prior step's result; when `step_id`
//!   has no recorded result the whole dotted path is tried against the input
//!
//! A string made of exactly one token takes the raw JSON value of that token.
//! Tokens embedded in longer text are rendered as text. Tokens that cannot be
//! resolved stay verbatim and are reported in `Substituted::unresolved`.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Result of a step that finished before the one being resolved.
#[derive(Debug, Clone, Copy)]
pub struct PriorResult<'a> {
    pub step_id: &'a str,
    /// 1-based position of the step in the template.
    pub position: usize,
    pub value: &'a Value,
}

/// Data visible to a step while its input is resolved.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub input: &'a Value,
    /// Completed prior results in declared order.
    pub prior: Vec<PriorResult<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(input: &'a Value) -> Self {
        Self {
            input,
            prior: Vec::new(),
        }
    }

    /// Builder: add a prior result.
    pub fn with_result(mut self, step_id: &'a str, position: usize, value: &'a Value) -> Self {
        self.prior.push(PriorResult {
            step_id,
            position,
            value,
        });
        self
    }

    pub fn result_of(&self, step_id: &str) -> Option<&'a Value> {
        self.prior
            .iter()
            .find(|p| p.step_id == step_id)
            .map(|p| p.value)
    }

    /// Result of the step at 1-based template position `n`.
    pub fn result_at(&self, n: usize) -> Option<&'a Value> {
        self.prior.iter().find(|p| p.position == n).map(|p| p.value)
    }

    /// Prior results, most recent first.
    pub fn most_recent_first(&self) -> impl Iterator<Item = &PriorResult<'a>> {
        self.prior.iter().rev()
    }
}

// ---------------------------------------------------------------------------
// Parsed form
// ---------------------------------------------------------------------------

/// What a token points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Input(Vec<String>),
    Step { step_id: String, path: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token text as written, braces included.
    pub raw: String,
    pub reference: Reference,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Token(Token),
}

/// Outcome of substituting one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Substituted {
    pub value: Value,
    /// Raw text of tokens left verbatim.
    pub unresolved: Vec<String>,
    /// Raw text of tokens whose object/array value was rendered as JSON text.
    pub coerced: Vec<String>,
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$')
}

fn parse_token(raw: &str, body: &str) -> Option<Token> {
    let (path_part, default) = match body.split_once('|') {
        Some((p, d)) => (p, Some(d.trim().to_string())),
        None => (body, None),
    };
    let path: Vec<String> = path_part.trim().split('.').map(|s| s.trim().to_string()).collect();
    if path.iter().any(|s| s.is_empty() || !s.chars().all(is_path_char)) {
        return None;
    }

    let reference = if path.len() > 1 {
        Reference::Step {
            step_id: path[0].clone(),
            path: path[1..].to_vec(),
        }
    } else {
        Reference::Input(path)
    };
    Some(Token {
        raw: raw.to_string(),
        reference,
        default,
    })
}

/// Split a string leaf into literal and token segments.
///
/// Malformed tokens (unterminated `{{`, empty or non-identifier bodies) are
/// kept as literal text.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        let body = &after_open[..end];

        // `{{ a {{b}}`: the first opener is plain text.
        if let Some(inner) = body.find("{{") {
            literal.push_str(&rest[..start + 2 + inner]);
            rest = &rest[start + 2 + inner..];
            continue;
        }

        let raw = &rest[start..start + 2 + end + 2];
        literal.push_str(&rest[..start]);
        match parse_token(raw, body) {
            Some(token) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Token(token));
            }
            None => literal.push_str(raw),
        }
        rest = &rest[start + 2 + end + 2..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Walk `path` through objects (by key) and arrays (by index).
pub fn lookup_path<'v>(root: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl Token {
    /// Resolve the token, applying the default clause. `None` = unresolved.
    fn resolve(&self, scope: &Scope<'_>) -> Option<Value> {
        let found = match &self.reference {
            Reference::Input(path) => lookup_path(scope.input, path),
            Reference::Step { step_id, path } => match scope.result_of(step_id) {
                Some(result) => lookup_path(result, path),
                None => {
                    let mut full = Vec::with_capacity(path.len() + 1);
                    full.push(step_id.clone());
                    full.extend(path.iter().cloned());
                    lookup_path(scope.input, &full)
                }
            },
        };

        match (found, &self.default) {
            (Some(v), Some(default)) if is_blank(v) => Some(Value::String(default.clone())),
            (Some(v), _) => Some(v.clone()),
            (None, Some(default)) => Some(Value::String(default.clone())),
            (None, None) => None,
        }
    }
}

fn render(value: &Value) -> (String, bool) {
    match value {
        Value::String(s) => (s.clone(), false),
        Value::Null => (String::new(), false),
        Value::Bool(_) | Value::Number(_) => (value.to_string(), false),
        Value::Array(_) | Value::Object(_) => (value.to_string(), true),
    }
}

fn substitute_str(text: &str, scope: &Scope<'_>, out: &mut Substituted) -> Value {
    let segments = parse_segments(text);

    if let [Segment::Token(token)] = segments.as_slice() {
        return match token.resolve(scope) {
            Some(value) => value,
            None => {
                out.unresolved.push(token.raw.clone());
                Value::String(text.to_string())
            }
        };
    }

    let mut rendered = String::with_capacity(text.len());
    for segment in &segments {
        match segment {
            Segment::Literal(s) => rendered.push_str(s),
            Segment::Token(token) => match token.resolve(scope) {
                Some(value) => {
                    let (s, coerced) = render(&value);
                    if coerced {
                        out.coerced.push(token.raw.clone());
                    }
                    rendered.push_str(&s);
                }
                None => {
                    out.unresolved.push(token.raw.clone());
                    rendered.push_str(&token.raw);
                }
            },
        }
    }
    Value::String(rendered)
}

fn substitute_value(expr: &Value, scope: &Scope<'_>, out: &mut Substituted) -> Value {
    match expr {
        Value::String(s) => substitute_str(s, scope, out),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, scope, out))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, scope, out)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute every token in `expr`. Object keys are left untouched.
pub fn substitute(expr: &Value, scope: &Scope<'_>) -> Substituted {
    let mut out = Substituted {
        value: Value::Null,
        unresolved: Vec::new(),
        coerced: Vec::new(),
    };
    let value = substitute_value(expr, scope, &mut out);
    out.value = value;
    out
}
