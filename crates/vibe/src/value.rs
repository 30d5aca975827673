//! Runtime value representation.
//!
//! The dynamic value domain is a single sum type: plain data (`Null`, `Bool`,
//! `Number`, `Text`, `Array`, `Object`) plus opaque handles for models,
//! functions, tools and bound built-in methods, plus the AI result wrapper.
//! Handles carry names only -- no closures or host references -- so every value
//! survives a state snapshot round-trip.

use std::fmt::{self, Display, Write as _};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<Value>),
    /// Insertion-ordered mapping from field name to value.
    Object(IndexMap<String, Value>),
    /// A configured AI endpoint, bound `const` by a `model` declaration.
    Model(ModelHandle),
    /// A user-defined function, referenced by declaration name.
    UserFn(String),
    /// A native function imported from a host-language module.
    ImportedHostFn(String),
    /// A function imported from another vibe module.
    ImportedSourceFn { name: String, module: String },
    /// A declared tool; offered to AI models, never callable from user code.
    Tool(String),
    /// An array/string built-in method bound to its receiver.
    BoundMethod(BoundMethod),
    /// The wrapper produced by AI calls: behaves as its primitive `value` for
    /// operators, exposes per-call metadata through member access.
    AiResult(Box<AiResultValue>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    /// The value's surface-language type name, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
            Self::Object(_) => "json",
            Self::Model(_) => "model",
            Self::UserFn(_) => "function",
            Self::ImportedHostFn(_) => "imported function",
            Self::ImportedSourceFn { .. } => "imported function",
            Self::Tool(_) => "tool",
            Self::BoundMethod(_) => "method",
            Self::AiResult(_) => "ai result",
        }
    }

    /// Unwraps an AI result wrapper to its primitive value; other values pass
    /// through unchanged. Nested wrappers are flattened.
    #[must_use]
    pub fn unwrapped(&self) -> &Value {
        match self {
            Self::AiResult(inner) => inner.value.unwrapped(),
            other => other,
        }
    }

    /// Mutable access through AI result wrappers, for in-place mutation of a
    /// wrapped array.
    pub fn unwrapped_mut(&mut self) -> &mut Value {
        match self {
            Self::AiResult(inner) => inner.value.unwrapped_mut(),
            other => other,
        }
    }

    /// Consuming variant of [`Value::unwrapped`].
    #[must_use]
    pub fn into_unwrapped(self) -> Value {
        match self {
            Self::AiResult(inner) => inner.value.into_unwrapped(),
            other => other,
        }
    }

    /// Renders the value the way interpolation and context building show it:
    /// bare text for strings, canonical numbers, JSON for structured data.
    #[must_use]
    pub fn render(&self) -> String {
        match self.unwrapped() {
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            value @ (Value::Array(_) | Value::Object(_)) => {
                serde_json::to_string(&value.to_json()).unwrap_or_else(|_| value.type_name().to_owned())
            }
            Value::Model(model) => format!("model({})", model.name),
            Value::UserFn(name) => format!("function {name}"),
            Value::ImportedHostFn(name) | Value::ImportedSourceFn { name, .. } => format!("function {name}"),
            Value::Tool(name) => format!("tool {name}"),
            Value::BoundMethod(method) => format!("method {}", method.method),
            Value::AiResult(_) => unreachable!("unwrapped() flattens wrappers"),
        }
    }

    /// Converts plain data to a `serde_json` value. Handles render as their
    /// display strings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self.unwrapped() {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            other => serde_json::Value::String(other.render()),
        }
    }

    /// Converts a `serde_json` value to a runtime value, preserving object
    /// field order.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            serde_json::Value::Object(fields) => {
                Self::Object(fields.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
        }
    }

    /// True for the value kinds that skip context rendering.
    #[must_use]
    pub fn is_model(&self) -> bool {
        matches!(self.unwrapped(), Value::Model(_))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Formats a number the way the language displays it: integral values without
/// a fractional part, everything else in shortest round-trip form.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        let mut out = String::new();
        let _ = write!(out, "{}", n as i64);
        out
    } else {
        let mut buffer = ryu::Buffer::new();
        buffer.format(n).to_owned()
    }
}

/// An immutable, const-bound value representing a configured AI endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// The model name field (e.g. an endpoint model id).
    pub name: String,
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub provider: Option<String>,
    pub max_retries_on_error: Option<u32>,
    pub thinking_level: Option<String>,
    /// Names of declared tools offered to this model.
    pub tools: Vec<String>,
}

impl ModelHandle {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: None,
            url: None,
            provider: None,
            max_retries_on_error: None,
            thinking_level: None,
            tools: Vec::new(),
        }
    }
}

/// The payload of an AI result wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResultValue {
    /// The primitive value the wrapper stands in for.
    pub value: Value,
    /// Tool-call rounds made during the interaction, in causal order.
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AiResultValue {
    /// Wraps a value, producing the runtime representation of an AI response.
    #[must_use]
    pub fn wrap(value: Value, tool_calls: Vec<ToolCallRecord>) -> Value {
        Value::AiResult(Box::new(Self { value, tool_calls }))
    }
}

/// One tool invocation made by a model during an AI interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub tool_call_id: String,
    pub args: IndexMap<String, Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolCallRecord {
    /// Renders the record as a value for `toolCalls` member access.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = IndexMap::new();
        fields.insert("name".to_owned(), Value::Text(self.name.clone()));
        fields.insert("toolCallId".to_owned(), Value::Text(self.tool_call_id.clone()));
        fields.insert("args".to_owned(), Value::Object(self.args.clone()));
        if let Some(result) = &self.result {
            fields.insert("result".to_owned(), result.clone());
        }
        if let Some(error) = &self.error {
            fields.insert("error".to_owned(), Value::Text(error.clone()));
        }
        Value::Object(fields)
    }
}

/// An array/string built-in method bound to its receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundMethod {
    pub method: BuiltinMethod,
    pub target: MethodTarget,
}

/// Built-in methods by receiver type: arrays support `len`/`push`/`pop`,
/// strings support `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinMethod {
    Len,
    Push,
    Pop,
}

/// Where a bound method writes mutations back to.
///
/// When the receiver expression was a bare identifier the method mutates the
/// variable through the scope chain; any other receiver operates on a detached
/// copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MethodTarget {
    Variable(String),
    Detached(Box<Value>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn ai_result_unwraps_for_rendering() {
        let wrapped = AiResultValue::wrap(Value::Number(4.0), vec![]);
        assert_eq!(wrapped.render(), "4");
        assert_eq!(wrapped.unwrapped(), &Value::Number(4.0));
    }

    #[test]
    fn object_render_preserves_field_order() {
        let mut fields = IndexMap::new();
        fields.insert("z".to_owned(), Value::Number(1.0));
        fields.insert("a".to_owned(), Value::Number(2.0));
        assert_eq!(Value::Object(fields).render(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let json: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":[true,null]}"#).unwrap();
        let value = Value::from_json(json);
        assert_eq!(value.render(), r#"{"b":1,"a":[true,null]}"#);
    }
}
