//! Placeholder resolution over irregularly shaped tool results.
//!
//! Runs after `{{...}}` substitution on the top-level parameters of a step
//! input. A parameter is a placeholder when its value is:
//!
//! - a back-reference: `$step_N.field` or `$step_N` (1-based template position)
//! - a substitution token that stayed verbatim, e.g. `{{draft.page_id}}`
//!   (requested field = last path segment)
//! - a generic token such as `NEW_PAGE_ID` / `LAST_MESSAGE_ID` or `<page_id>`
//!   (requested field = the parameter key, then the name inside the token)
//!
//! Each result is searched with the same ladder: exact key, one level under
//! a wrapper key, alias keys, then list elements (a single element directly,
//! several elements disambiguated by a name context built from sibling
//! parameters and the step's name and description).

use serde_json::{Map, Value};
use stepwise_types::workflow::WorkflowStep;

use super::substitution::{Reference, Scope, Segment, lookup_path, parse_segments};

/// Keys that commonly wrap the payload of a tool response.
pub const WRAPPER_KEYS: &[&str] = &[
    "data", "result", "results", "response", "output", "payload", "body", "item", "record",
];

/// Fields read as a list element's display name.
const DISPLAY_FIELDS: &[&str] = &["name", "title", "display_name", "label", "subject"];

/// Identifier fields accepted when a generic token finds no better match.
const KNOWN_ID_FIELDS: &[&str] = &["id", "uuid", "_id", "identifier"];

const GENERIC_PREFIXES: &[&str] = &["NEW_", "PREVIOUS_", "LAST_", "CREATED_"];

/// Extra names accepted for common fields, beyond the `<x>_id` rule.
const ALIAS_TABLE: &[(&str, &[&str])] = &[
    ("id", &["_id", "uuid", "identifier"]),
    ("url", &["link", "href", "permalink", "web_url", "webUrl"]),
    ("email", &["email_address", "emailAddress", "mail"]),
    ("name", &["title", "display_name", "displayName", "label"]),
    ("text", &["content", "body", "message"]),
];

/// Shortest token eligible for an approximate (edit distance 1) match.
const NEAR_MATCH_MIN_LEN: usize = 5;

/// Where a resolved value was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionSource {
    /// `$step_N` without a field: the whole result.
    WholeResult,
    /// Dotted path walked directly.
    Path,
    TopLevel,
    Wrapper(String),
    Alias(String),
    SingleElement { list: String },
    NameMatch { list: String, index: usize },
    /// No name matched; the first candidate was used.
    AmbiguousFallback { list: String, candidates: usize },
    /// Generic token fell back to a known identifier field.
    RecentIdentifier(String),
}

impl ResolutionSource {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ResolutionSource::AmbiguousFallback { .. })
    }
}

/// One placeholder that was replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub param: String,
    pub value: Value,
    pub source: ResolutionSource,
    /// Step whose result supplied the value.
    pub from_step: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("ambiguous match for '{param}': {candidates} candidates in '{list}', none matched the step context")]
    Ambiguous {
        param: String,
        list: String,
        candidates: usize,
    },
}

/// Resolved step input plus what happened to each placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub input: Map<String, Value>,
    pub resolutions: Vec<Resolution>,
    /// Parameters whose placeholder could not be resolved (left verbatim).
    pub unresolved: Vec<String>,
}

// ---------------------------------------------------------------------------
// Placeholder detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    BackReference {
        position: usize,
        path: Vec<String>,
    },
    Verbatim {
        field: String,
    },
    Generic {
        field: String,
        /// Field named by the token itself when it differs from the key.
        embedded: Option<String>,
    },
}

fn is_generic_token(s: &str) -> bool {
    GENERIC_PREFIXES.iter().any(|p| s.starts_with(p))
        && s.len() > 4
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_angle_token(s: &str) -> bool {
    s.len() > 2
        && s.starts_with('<')
        && s.ends_with('>')
        && s[1..s.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Field a generic token names: `NEW_PAGE_ID` -> `page_id`, `<thread_id>` -> `thread_id`.
fn embedded_field(token: &str) -> String {
    if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return inner.to_string();
    }
    GENERIC_PREFIXES
        .iter()
        .find_map(|p| token.strip_prefix(p))
        .unwrap_or(token)
        .to_ascii_lowercase()
}

fn classify(key: &str, value: &Value) -> Option<Placeholder> {
    let s = value.as_str()?.trim();

    if let Some(rest) = s.strip_prefix("$step_") {
        let (n, path) = match rest.split_once('.') {
            Some((n, path)) => (n, path.split('.').map(str::to_string).collect()),
            None => (rest, Vec::new()),
        };
        let position = n.parse::<usize>().ok().filter(|n| *n >= 1)?;
        return Some(Placeholder::BackReference { position, path });
    }

    if s.starts_with("{{") {
        if let [Segment::Token(token)] = parse_segments(s).as_slice() {
            let field = match &token.reference {
                Reference::Input(path) => path.last(),
                Reference::Step { path, .. } => path.last(),
            }?;
            return Some(Placeholder::Verbatim {
                field: field.clone(),
            });
        }
        return None;
    }

    if is_generic_token(s) || is_angle_token(s) {
        let embedded = Some(embedded_field(s)).filter(|f| !f.is_empty() && f != key);
        return Some(Placeholder::Generic {
            field: key.to_string(),
            embedded,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Field aliases
// ---------------------------------------------------------------------------

fn snake_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper = false;
    for c in s.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Names accepted for `field`, the field itself first.
pub fn field_aliases(field: &str) -> Vec<String> {
    let mut names = vec![field.to_string()];
    let mut push = |name: String| {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    };

    let snake = if field.chars().any(|c| c.is_ascii_uppercase()) {
        camel_to_snake(field)
    } else {
        field.to_string()
    };
    push(snake.clone());
    push(snake_to_camel(&snake));

    if let Some(stem) = snake.strip_suffix("_id") {
        push("id".to_string());
        push(format!("{stem}Id"));
        push(format!("{}Id", snake_to_camel(stem)));
    }

    for (key, extra) in ALIAS_TABLE {
        if *key == snake {
            for name in extra.iter() {
                push(name.to_string());
            }
        }
    }
    names
}

fn is_id_like(field: &str) -> bool {
    field == "id" || field.ends_with("_id") || field.ends_with("Id")
}

// ---------------------------------------------------------------------------
// Name matching
// ---------------------------------------------------------------------------

/// Lowercase and drop everything but ASCII letters and digits.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    a.len() >= NEAR_MATCH_MIN_LEN
        && b.len() >= NEAR_MATCH_MIN_LEN
        && strsim::levenshtein(a, b) <= 1
}

/// Text the step gives about which element it wants.
struct NameContext {
    fragments: Vec<String>,
    tokens: Vec<String>,
}

impl NameContext {
    fn build(step: &WorkflowStep, siblings: &[&str]) -> Self {
        let mut raw: Vec<&str> = siblings.to_vec();
        raw.push(&step.name);
        if let Some(description) = &step.description {
            raw.push(description);
        }
        Self {
            fragments: raw
                .iter()
                .map(|s| normalize(s))
                .filter(|s| s.len() >= 3)
                .collect(),
            tokens: raw.iter().flat_map(|s| tokens(s)).collect(),
        }
    }

    /// Match strength of a candidate display name (0 = no match).
    fn score(&self, display: &str) -> usize {
        let candidate = normalize(display);
        if candidate.is_empty() {
            return 0;
        }

        let containment = self
            .fragments
            .iter()
            .map(|f| {
                if *f == candidate {
                    1000
                } else if f.contains(&candidate) {
                    500 + candidate.len()
                } else if candidate.contains(f.as_str()) {
                    200 + f.len()
                } else {
                    0
                }
            })
            .max()
            .unwrap_or(0);
        if containment > 0 {
            return containment;
        }

        tokens(display)
            .iter()
            .filter(|t| self.tokens.iter().any(|c| tokens_match(t, c)))
            .count()
    }
}

fn display_name(element: &Map<String, Value>) -> Option<&str> {
    DISPLAY_FIELDS
        .iter()
        .find_map(|f| element.get(*f).and_then(Value::as_str))
}

// ---------------------------------------------------------------------------
// Lookup ladder
// ---------------------------------------------------------------------------

fn present(map: &Map<String, Value>, key: &str) -> Option<Value> {
    map.get(key).filter(|v| !v.is_null()).cloned()
}

fn first_alias(map: &Map<String, Value>, names: &[String]) -> Option<Value> {
    names.iter().find_map(|n| present(map, n))
}

/// Objects searched by the exact/alias steps: the result, then wrappers.
fn levels(result: &Value) -> Vec<(Option<&str>, &Map<String, Value>)> {
    let mut levels = Vec::new();
    if let Value::Object(map) = result {
        levels.push((None, map));
        for w in WRAPPER_KEYS {
            if let Some(Value::Object(inner)) = map.get(*w) {
                levels.push((Some(*w), inner));
            }
        }
    }
    levels
}

/// Arrays searched by the list steps, with a label for each.
fn lists(result: &Value) -> Vec<(String, &Vec<Value>)> {
    let mut lists = Vec::new();
    match result {
        Value::Array(items) => lists.push(("$".to_string(), items)),
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Array(items) => lists.push((key.clone(), items)),
                    Value::Object(inner) if WRAPPER_KEYS.contains(&key.as_str()) => {
                        for (inner_key, inner_value) in inner {
                            if let Value::Array(items) = inner_value {
                                lists.push((format!("{key}.{inner_key}"), items));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    lists
}

/// Resolves placeholders in a step input.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderResolver {
    strict: bool,
}

impl PlaceholderResolver {
    /// With `strict`, an ambiguous list pick is an error instead of a guess.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Search one result for `field` using the full ladder.
    fn find(
        &self,
        result: &Value,
        field: &str,
        context: &NameContext,
    ) -> Option<(Value, ResolutionSource)> {
        let names = field_aliases(field);
        let levels = levels(result);

        for (wrapper, map) in &levels {
            if let Some(value) = present(map, field) {
                let source = match wrapper {
                    None => ResolutionSource::TopLevel,
                    Some(w) => ResolutionSource::Wrapper(w.to_string()),
                };
                return Some((value, source));
            }
        }

        for (_, map) in &levels {
            for name in names.iter().skip(1) {
                if let Some(value) = present(map, name) {
                    return Some((value, ResolutionSource::Alias(name.clone())));
                }
            }
        }

        for (list, items) in lists(result) {
            let candidates: Vec<(usize, &Map<String, Value>, Value)> = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let obj = item.as_object()?;
                    first_alias(obj, &names).map(|v| (i, obj, v))
                })
                .collect();

            match candidates.as_slice() {
                [] => continue,
                [(_, _, value)] => {
                    return Some((value.clone(), ResolutionSource::SingleElement { list }));
                }
                _ => {}
            }

            let scores: Vec<usize> = candidates
                .iter()
                .map(|(_, obj, _)| display_name(obj).map_or(0, |d| context.score(d)))
                .collect();
            let best = scores.iter().copied().max().unwrap_or(0);

            // Equal scores go to the earliest element.
            if best > 0 {
                if let Some(pos) = scores.iter().position(|s| *s == best) {
                    let (index, _, value) = &candidates[pos];
                    return Some((
                        value.clone(),
                        ResolutionSource::NameMatch {
                            list,
                            index: *index,
                        },
                    ));
                }
            }

            let (_, _, value) = &candidates[0];
            return Some((
                value.clone(),
                ResolutionSource::AmbiguousFallback {
                    list,
                    candidates: candidates.len(),
                },
            ));
        }
        None
    }

    fn recent_identifier<'s>(&self, scope: &Scope<'s>) -> Option<(Value, ResolutionSource, &'s str)> {
        scope.most_recent_first().find_map(|prior| {
            levels(prior.value).into_iter().find_map(|(_, map)| {
                KNOWN_ID_FIELDS.iter().find_map(|f| {
                    present(map, f)
                        .map(|v| (v, ResolutionSource::RecentIdentifier(f.to_string()), prior.step_id))
                })
            })
        })
    }

    fn resolve_one<'s>(
        &self,
        placeholder: &Placeholder,
        scope: &Scope<'s>,
        context: &NameContext,
    ) -> Option<(Value, ResolutionSource, &'s str)> {
        match placeholder {
            Placeholder::BackReference { position, path } => {
                let prior = scope.prior.iter().find(|p| p.position == *position)?;
                if path.is_empty() {
                    return Some((prior.value.clone(), ResolutionSource::WholeResult, prior.step_id));
                }
                if path.len() > 1 {
                    if let Some(value) = lookup_path(prior.value, path) {
                        return Some((value.clone(), ResolutionSource::Path, prior.step_id));
                    }
                }
                let field = path.last()?;
                self.find(prior.value, field, context)
                    .map(|(v, s)| (v, s, prior.step_id))
            }
            Placeholder::Verbatim { field } => scope.most_recent_first().find_map(|prior| {
                self.find(prior.value, field, context)
                    .map(|(v, s)| (v, s, prior.step_id))
            }),
            Placeholder::Generic { field, embedded } => {
                let fields: Vec<&str> = std::iter::once(field.as_str())
                    .chain(embedded.as_deref())
                    .collect();
                fields
                    .iter()
                    .find_map(|f| {
                        scope.most_recent_first().find_map(|prior| {
                            self.find(prior.value, f, context)
                                .map(|(v, s)| (v, s, prior.step_id))
                        })
                    })
                    .or_else(|| {
                        if fields.iter().any(|f| is_id_like(f)) {
                            self.recent_identifier(scope)
                        } else {
                            None
                        }
                    })
            }
        }
    }

    /// Replace every placeholder parameter of `input` it can resolve.
    pub fn resolve(
        &self,
        input: Map<String, Value>,
        step: &WorkflowStep,
        scope: &Scope<'_>,
    ) -> Result<ResolveOutcome, ResolveError> {
        let placeholders: Vec<(String, Placeholder)> = input
            .iter()
            .filter_map(|(k, v)| classify(k, v).map(|p| (k.clone(), p)))
            .collect();

        let mut outcome = ResolveOutcome {
            input,
            resolutions: Vec::new(),
            unresolved: Vec::new(),
        };
        if placeholders.is_empty() {
            return Ok(outcome);
        }

        let siblings: Vec<&str> = outcome
            .input
            .iter()
            .filter(|(k, _)| !placeholders.iter().any(|(p, _)| p == *k))
            .filter_map(|(_, v)| v.as_str())
            .collect();
        let context = NameContext::build(step, &siblings);

        let mut replacements = Vec::new();
        for (param, placeholder) in &placeholders {
            match self.resolve_one(placeholder, scope, &context) {
                Some((value, source, from_step)) => {
                    if let ResolutionSource::AmbiguousFallback { list, candidates } = &source {
                        if self.strict {
                            return Err(ResolveError::Ambiguous {
                                param: param.clone(),
                                list: list.clone(),
                                candidates: *candidates,
                            });
                        }
                        tracing::warn!(
                            step_id = %step.id,
                            param = %param,
                            list = %list,
                            candidates,
                            "ambiguous placeholder match, using first candidate"
                        );
                    } else {
                        tracing::debug!(
                            step_id = %step.id,
                            param = %param,
                            from_step,
                            source = ?source,
                            "placeholder resolved"
                        );
                    }
                    replacements.push(Resolution {
                        param: param.clone(),
                        value,
                        source,
                        from_step: from_step.to_string(),
                    });
                }
                None => {
                    tracing::warn!(
                        step_id = %step.id,
                        param = %param,
                        "placeholder left unresolved"
                    );
                    outcome.unresolved.push(param.clone());
                }
            }
        }

        for resolution in &replacements {
            outcome
                .input
                .insert(resolution.param.clone(), resolution.value.clone());
        }
        outcome.resolutions = replacements;
        Ok(outcome)
    }
}
