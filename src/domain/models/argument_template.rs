//! Argument templates: JSON values whose strings may reference prior task
//! outputs via `$OUTPUT[task_id]` or `$OUTPUT[task_id].path.to.field[0]`
//! (`spec.md` §3, §9).
//!
//! Resolution happens immediately before a task is invoked, against the
//! completed-output map built up by the executor. Mixed-type access
//! (indexing into an object, or field access into an array) is the Open
//! Question `spec.md` §9 leaves to the implementer; we resolve it as a
//! hard [`MediatorError::ResolutionError`] rather than guessing.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::domain::errors::MediatorError;

/// One segment of a `$OUTPUT[...]` path: a field name or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed `$OUTPUT[task_id].path.to.field[idx]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    pub task_id: Uuid,
    pub path: Vec<PathSegment>,
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$OUTPUT\[([0-9a-fA-F-]{36})\]((?:\.[A-Za-z_][A-Za-z0-9_]*|\[\d+\])*)").unwrap()
    })
}

/// Parses a single reference expression. Returns `None` if `text` is not
/// (wholly or partially) shaped like a reference.
#[must_use]
pub fn parse_ref(task_id_str: &str, path_str: &str) -> Option<OutputRef> {
    let task_id = Uuid::parse_str(task_id_str).ok()?;
    let mut path = Vec::new();
    let mut rest = path_str;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(stripped.len());
            path.push(PathSegment::Field(stripped[..end].to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']')?;
            let idx: usize = stripped[..end].parse().ok()?;
            path.push(PathSegment::Index(idx));
            rest = &stripped[end + 1..];
        } else {
            return None;
        }
    }
    Some(OutputRef { task_id, path })
}

/// Finds every `$OUTPUT[...]` reference anywhere within a JSON value,
/// used by the planner to infer dependency edges (`spec.md` §4.3).
#[must_use]
pub fn find_refs(value: &Value) -> Vec<OutputRef> {
    let mut found = Vec::new();
    collect_refs(value, &mut found);
    found
}

fn collect_refs(value: &Value, out: &mut Vec<OutputRef>) {
    match value {
        Value::String(s) => {
            for caps in reference_pattern().captures_iter(s) {
                if let Some(r) = parse_ref(&caps[1], &caps[2]) {
                    out.push(r);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Resolves every `$OUTPUT[...]` reference in `template` against the
/// completed-output map, producing a concrete argument value.
///
/// When a string is *exactly* one reference, the resolved JSON value is
/// substituted in place (preserving its type). When a reference appears
/// embedded in a larger string, the resolved value is stringified and
/// spliced in.
pub fn resolve(template: &Value, outputs: &HashMap<Uuid, Value>) -> Result<Value, MediatorError> {
    match template {
        Value::String(s) => resolve_string(s, outputs),
        Value::Array(items) => {
            let resolved: Result<Vec<_>, _> = items.iter().map(|v| resolve(v, outputs)).collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (k, v) in map {
                resolved.insert(k.clone(), resolve(v, outputs)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, outputs: &HashMap<Uuid, Value>) -> Result<Value, MediatorError> {
    let pattern = reference_pattern();
    let Some(full_match) = pattern.find(s) else {
        return Ok(Value::String(s.to_string()));
    };

    let is_whole_string = full_match.start() == 0 && full_match.end() == s.len();
    let caps = pattern.captures(s).expect("find succeeded above");
    let output_ref = parse_ref(&caps[1], &caps[2])
        .ok_or_else(|| MediatorError::ResolutionError(format!("malformed reference: {s}")))?;
    let value = resolve_path(&output_ref, outputs)?;

    if is_whole_string {
        return Ok(value);
    }

    // Embedded reference: splice the stringified value into the larger string.
    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;
    for m in pattern.find_iter(s) {
        let caps = pattern.captures(&s[m.start()..m.end()]).unwrap();
        let r = parse_ref(&caps[1], &caps[2])
            .ok_or_else(|| MediatorError::ResolutionError(format!("malformed reference: {s}")))?;
        let resolved = resolve_path(&r, outputs)?;
        result.push_str(&s[last_end..m.start()]);
        result.push_str(&value_to_plain_string(&resolved));
        last_end = m.end();
    }
    result.push_str(&s[last_end..]);
    Ok(Value::String(result))
}

fn value_to_plain_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_path(output_ref: &OutputRef, outputs: &HashMap<Uuid, Value>) -> Result<Value, MediatorError> {
    let mut current = outputs
        .get(&output_ref.task_id)
        .ok_or_else(|| MediatorError::MissingDependency {
            task_id: Uuid::nil(),
            dep_id: output_ref.task_id,
        })?
        .clone();

    for segment in &output_ref.path {
        current = match (segment, &current) {
            (PathSegment::Field(name), Value::Object(map)) => map
                .get(name)
                .cloned()
                .ok_or_else(|| MediatorError::ResolutionError(format!("no field `{name}` in output")))?,
            (PathSegment::Index(idx), Value::Array(items)) => items
                .get(*idx)
                .cloned()
                .ok_or_else(|| MediatorError::ResolutionError(format!("index {idx} out of bounds")))?,
            (PathSegment::Field(name), _) => {
                return Err(MediatorError::ResolutionError(format!(
                    "cannot access field `{name}` on non-object value"
                )))
            }
            (PathSegment::Index(idx), _) => {
                return Err(MediatorError::ResolutionError(format!(
                    "cannot index [{idx}] into non-array value"
                )))
            }
        };
    }
    Ok(current)
}
