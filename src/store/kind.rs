use std::fmt;

use serde_json::Value;

/// Value category a slot is locked to when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Boolean,
    Number,
    String,
    Object,
    List,
}

impl Kind {
    /// Kind of `value`, or `None` for `null` (no storable kind).
    pub fn of(value: &Value) -> Option<Kind> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Kind::Boolean),
            Value::Number(_) => Some(Kind::Number),
            Value::String(_) => Some(Kind::String),
            Value::Object(_) => Some(Kind::Object),
            Value::Array(_) => Some(Kind::List),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Object => "object",
            Kind::List => "list",
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        Kind::of(value) == Some(self)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind name used in mismatch errors, including `null`.
pub(crate) fn kind_name(value: &Value) -> &'static str {
    Kind::of(value).map(Kind::name).unwrap_or("null")
}

// ── Durable text form ──────────────────────────────────────────────────

/// Text stored for a persistent slot.
///
/// Strings are stored raw, booleans and numbers through their display
/// form, objects and lists as JSON.
pub(crate) fn encode(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Inverse of [`encode`] for a slot of `kind`.
///
/// Returns `None` when the stored text does not decode to a value of that
/// kind; the caller falls back to the slot's default.
pub(crate) fn decode(kind: Kind, text: &str) -> Option<Value> {
    let value = match kind {
        Kind::String => return Some(Value::String(text.to_string())),
        Kind::Boolean => match text.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return None,
        },
        Kind::Number | Kind::Object | Kind::List => serde_json::from_str(text.trim()).ok()?,
    };
    kind.matches(&value).then_some(value)
}
