//! Per-run variable scope with step output tracking and `$path` resolution.
//!
//! `VariableScope` is the mutable state that flows through a run. It maps
//! names (`ctx`, `trigger`, step ids, dependency ids, loop `item`/`index`)
//! to JSON values. Strings reference those values with `$name.field.0`
//! tokens. Resolution is plain path lookup: there are no operators, calls or
//! arithmetic, and a token that does not resolve is left in place verbatim.

use std::ops::Range;

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Characters of the serialized output kept in a truncation marker.
const TRUNCATED_PREVIEW_CHARS: usize = 512;

/// Names the engine binds itself; steps may not use them as ids.
pub const RESERVED_NAMES: &[&str] = &["ctx", "trigger", "item", "index", "event", "result"];

// ---------------------------------------------------------------------------
// VariableScope
// ---------------------------------------------------------------------------

/// Mapping from names to values, scoped to exactly one run (or one loop
/// iteration / parallel branch, which receive clones).
#[derive(Debug, Clone)]
pub struct VariableScope {
    /// Step outputs keyed by step id, in completion order.
    step_outputs: Map<String, Value>,
    /// Engine-bound names (`ctx`, `trigger`, dependencies, `item`, `index`).
    variables: Map<String, Value>,
    max_output_size: usize,
}

impl Default for VariableScope {
    fn default() -> Self {
        Self::new(MAX_STEP_OUTPUT_SIZE)
    }
}

impl VariableScope {
    pub fn new(max_output_size: usize) -> Self {
        Self {
            step_outputs: Map::new(),
            variables: Map::new(),
            max_output_size,
        }
    }

    /// Bind an engine-provided name.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Store a step's output and return the value actually stored.
    ///
    /// Outputs whose serialized form exceeds the size cap are replaced with a
    /// `_truncated` marker so a single step cannot blow up the scope.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) -> Value {
        let stored = cap_output_size(step_id, output, self.max_output_size);
        self.step_outputs.insert(step_id.to_string(), stored.clone());
        stored
    }

    /// Look up a root name. Engine variables shadow step outputs.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).or_else(|| self.step_outputs.get(name))
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// All step outputs produced so far.
    pub fn step_outputs(&self) -> &Map<String, Value> {
        &self.step_outputs
    }

    /// Resolve a dotted path (`fetch.body.items.0`, leading `$` optional).
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        let path = path.strip_prefix('$').unwrap_or(path);
        let mut segments = path.split('.');
        let root = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.get(root)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Substitute every resolvable `$token` in `template` with its string form.
    pub fn resolve_str(&self, template: &str) -> String {
        let tokens = scan_tokens(template);
        if tokens.is_empty() {
            return template.to_string();
        }
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for range in tokens {
            out.push_str(&template[last..range.start]);
            let token = &template[range.clone()];
            match self.lookup_path(token) {
                Some(value) => out.push_str(&value_to_string(value)),
                None => out.push_str(token),
            }
            last = range.end;
        }
        out.push_str(&template[last..]);
        out
    }

    /// Resolve a string to a value. A string consisting of exactly one
    /// resolvable token yields the referenced value with its JSON type intact.
    pub fn resolve_value(&self, template: &str) -> Value {
        let trimmed = template.trim();
        let tokens = scan_tokens(trimmed);
        if let [only] = tokens.as_slice() {
            if only.start == 0 && only.end == trimmed.len() {
                if let Some(value) = self.lookup_path(trimmed) {
                    return value.clone();
                }
            }
        }
        Value::String(self.resolve_str(template))
    }

    /// Resolve every string leaf of `value`, recursing through arrays and objects.
    pub fn resolve_deep(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_value(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_deep(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_deep(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Byte ranges of `$identifier(.segment)*` tokens in `input`.
fn scan_tokens(input: &str) -> Vec<Range<usize>> {
    let bytes = input.as_bytes();
    let is_start = |b: u8| b.is_ascii_alphabetic() || b == b'_';
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' || i + 1 >= bytes.len() || !is_start(bytes[i + 1]) {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        while end < bytes.len() && is_word(bytes[end]) {
            end += 1;
        }
        while end + 1 < bytes.len() && bytes[end] == b'.' && is_word(bytes[end + 1]) {
            end += 1;
            while end < bytes.len() && is_word(bytes[end]) {
                end += 1;
            }
        }
        tokens.push(start..end);
        i = end;
    }
    tokens
}

fn cap_output_size(step_id: &str, output: Value, max: usize) -> Value {
    let serialized = match serde_json::to_string(&output) {
        Ok(s) => s,
        Err(_) => return output,
    };
    if serialized.len() <= max {
        return output;
    }
    tracing::warn!(
        step_id,
        size = serialized.len(),
        max,
        "step output exceeds size limit, truncating"
    );
    let preview: String = serialized.chars().take(TRUNCATED_PREVIEW_CHARS).collect();
    json!({
        "_truncated": true,
        "_original_size": serialized.len(),
        "_preview": preview,
    })
}

/// Convert a JSON value to a display string for template resolution.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
