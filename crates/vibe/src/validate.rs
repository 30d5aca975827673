//! Variable lookup and strict type validation.
//!
//! Lookup walks the lexical scope chain (`parent_frame_index`), then falls
//! back to declared functions, tools, imported host functions, imported
//! source functions, and other imported values -- in that order. Coercion is
//! strict: booleans are never truthy-coerced, numbers must be finite, and the
//! `json` type is the only place a string is parsed.

use crate::{
    ast::{BaseType, TypeAnnotation},
    error::{EngineError, RunResult},
    frame::{StackFrame, Variable},
    state::RuntimeState,
    value::{AiResultValue, Value},
};

/// Walks the scope chain looking for a variable binding.
#[must_use]
pub fn lookup_scope<'a>(call_stack: &'a [StackFrame], name: &str) -> Option<&'a Variable> {
    let mut index = call_stack.len().checked_sub(1)?;
    loop {
        let frame = &call_stack[index];
        if let Some(variable) = frame.locals.get(name) {
            return Some(variable);
        }
        index = frame.parent_frame_index?;
    }
}

/// Mutable scope-chain lookup, for assignment and mutating bound methods.
pub fn lookup_scope_mut<'a>(call_stack: &'a mut [StackFrame], name: &str) -> Option<&'a mut Variable> {
    let mut index = call_stack.len().checked_sub(1)?;
    let found = loop {
        let frame = &call_stack[index];
        if frame.locals.contains_key(name) {
            break index;
        }
        index = frame.parent_frame_index?;
    };
    call_stack[found].locals.get_mut(name)
}

/// Index of the frame owning a binding, walking the scope chain.
#[must_use]
pub fn owning_frame_index(call_stack: &[StackFrame], name: &str) -> Option<usize> {
    let mut index = call_stack.len().checked_sub(1)?;
    loop {
        let frame = &call_stack[index];
        if frame.locals.contains_key(name) {
            return Some(index);
        }
        index = frame.parent_frame_index?;
    }
}

/// Resolves a name to a value: scope chain, then declared functions, tools,
/// imported host functions, imported source functions, imported values.
#[must_use]
pub fn lookup_value(state: &RuntimeState, name: &str) -> Option<Value> {
    if let Some(variable) = lookup_scope(&state.call_stack, name) {
        return Some(variable.value.clone());
    }
    if state.functions.contains_key(name) {
        return Some(Value::UserFn(name.to_owned()));
    }
    if state.tools.contains_key(name) {
        return Some(Value::Tool(name.to_owned()));
    }
    let imported = state.imported_names.get(name)?;
    match imported.kind {
        crate::modules::ModuleKind::Host => Some(Value::ImportedHostFn(name.to_owned())),
        crate::modules::ModuleKind::Source => {
            let module = state.source_modules.get(&imported.source_path)?;
            if module.functions.contains_key(name) {
                Some(Value::ImportedSourceFn {
                    name: name.to_owned(),
                    module: imported.source_path.clone(),
                })
            } else {
                module.values.get(name).cloned()
            }
        }
    }
}

/// Like [`lookup_value`] but raises a `ReferenceError` on a miss.
pub fn resolve_name(state: &RuntimeState, name: &str) -> RunResult<Value> {
    lookup_value(state, name).ok_or_else(|| EngineError::reference(format!("Variable '{name}' is not defined")))
}

/// Validates a value against an optional declared type.
///
/// Returns the coerced value and the display form of the validated (or
/// inferred) type. AI result wrappers are validated against their primitive
/// value and rebuilt, preserving the per-call metadata.
pub fn validate_and_coerce(
    value: Value,
    declared: Option<&TypeAnnotation>,
    name: &str,
) -> RunResult<(Value, String)> {
    if let Value::AiResult(inner) = value {
        let AiResultValue { value, tool_calls } = *inner;
        let (coerced, ty) = validate_and_coerce(value, declared, name)?;
        return Ok((AiResultValue::wrap(coerced, tool_calls), ty));
    }
    match declared {
        None => {
            // The finite-number invariant holds on untyped bindings too; this
            // is the boundary where embedder/host inputs enter a frame.
            if matches!(&value, Value::Number(n) if !n.is_finite()) {
                return Err(EngineError::type_error(format!("'{name}' expected a finite number")));
            }
            let ty = infer_type(&value);
            Ok((value, ty.to_owned()))
        }
        Some(ty) => {
            let coerced = coerce(value, ty, name)?;
            Ok((coerced, ty.to_string()))
        }
    }
}

fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Text(_) => "text",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Object(_) | Value::Array(_) => "json",
        Value::Model(_) => "model",
        Value::UserFn(_) | Value::ImportedHostFn(_) | Value::ImportedSourceFn { .. } => "function",
        Value::Tool(_) => "tool",
        _ => "unknown",
    }
}

fn coerce(value: Value, ty: &TypeAnnotation, name: &str) -> RunResult<Value> {
    if ty.is_array() {
        let Value::Array(items) = value else {
            return Err(mismatch(name, ty, &value));
        };
        let element_ty = ty.element();
        let coerced = items
            .into_iter()
            .map(|item| {
                if let Value::AiResult(inner) = item {
                    let AiResultValue { value, tool_calls } = *inner;
                    coerce(value, &element_ty, name).map(|v| AiResultValue::wrap(v, tool_calls))
                } else {
                    coerce(item, &element_ty, name)
                }
            })
            .collect::<RunResult<Vec<_>>>()?;
        return Ok(Value::Array(coerced));
    }
    match &ty.base {
        BaseType::Text | BaseType::Prompt => match value {
            Value::Text(_) => Ok(value),
            other => Err(mismatch(name, ty, &other)),
        },
        BaseType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            other => Err(mismatch(name, ty, &other)),
        },
        BaseType::Number => match value {
            Value::Number(n) if n.is_finite() => Ok(value),
            Value::Number(_) => Err(EngineError::type_error(format!("'{name}' expected a finite number"))),
            other => Err(mismatch(name, ty, &other)),
        },
        BaseType::Json => match value {
            Value::Object(_) | Value::Array(_) => Ok(value),
            Value::Text(text) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
                    EngineError::type_error(format!("'{name}' expected json, failed to parse: {err}"))
                })?;
                match Value::from_json(parsed) {
                    parsed @ (Value::Object(_) | Value::Array(_)) => Ok(parsed),
                    other => Err(mismatch(name, ty, &other)),
                }
            }
            other => Err(mismatch(name, ty, &other)),
        },
        // Named types reference imported host types; the engine treats them
        // as opaque and the host validates on its side.
        BaseType::Named(_) => Ok(value),
    }
}

fn mismatch(name: &str, expected: &TypeAnnotation, got: &Value) -> EngineError {
    EngineError::type_error(format!(
        "'{name}' expected {expected}, got {}",
        got.type_name()
    ))
}

/// Strict boolean requirement; `if`/`while` conditions and logical operands
/// are never truthy-coerced.
pub fn require_boolean(value: &Value, what: &str) -> RunResult<bool> {
    match value.unwrapped() {
        Value::Bool(b) => Ok(*b),
        other => Err(EngineError::type_error(format!(
            "{what} must be a boolean, got {}",
            other.type_name()
        ))),
    }
}

/// Requires a finite number.
pub fn require_number(value: &Value, what: &str) -> RunResult<f64> {
    match value.unwrapped() {
        Value::Number(n) if n.is_finite() => Ok(*n),
        Value::Number(_) => Err(EngineError::type_error(format!("{what} must be a finite number"))),
        other => Err(EngineError::type_error(format!(
            "{what} must be a number, got {}",
            other.type_name()
        ))),
    }
}

/// Requires an integral finite number, as for array indices and range bounds.
pub fn require_integer(value: &Value, message: &str) -> RunResult<i64> {
    match value.unwrapped() {
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as i64),
        _ => Err(EngineError::type_error(message.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(base: BaseType, array_depth: u8) -> TypeAnnotation {
        TypeAnnotation { base, array_depth }
    }

    #[test]
    fn infers_primitive_types() {
        let (_, t) = validate_and_coerce(Value::Text("hi".to_owned()), None, "x").unwrap();
        assert_eq!(t, "text");
        let (_, t) = validate_and_coerce(Value::Number(1.0), None, "x").unwrap();
        assert_eq!(t, "number");
        let (_, t) = validate_and_coerce(Value::Array(vec![]), None, "x").unwrap();
        assert_eq!(t, "json");
    }

    #[test]
    fn json_type_parses_strings() {
        let (value, t) = validate_and_coerce(
            Value::Text(r#"{"a": 1}"#.to_owned()),
            Some(&ty(BaseType::Json, 0)),
            "cfg",
        )
        .unwrap();
        assert_eq!(t, "json");
        assert!(matches!(value, Value::Object(_)));
    }

    #[test]
    fn json_type_rejects_scalar_strings() {
        let err = validate_and_coerce(Value::Text("42".to_owned()), Some(&ty(BaseType::Json, 0)), "cfg").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
    }

    #[test]
    fn array_elements_validate_recursively() {
        let err = validate_and_coerce(
            Value::Array(vec![Value::Number(1.0), Value::Text("two".to_owned())]),
            Some(&ty(BaseType::Number, 1)),
            "xs",
        )
        .unwrap_err();
        assert!(err.message.contains("'xs'"), "message should name the variable: {err}");
    }

    #[test]
    fn untyped_bindings_reject_non_finite_numbers() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = validate_and_coerce(Value::Number(bad), None, "seed").unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
            assert!(err.message.contains("'seed'"), "message should name the binding: {err}");
        }
    }

    #[test]
    fn boolean_requires_actual_boolean() {
        let err = require_boolean(&Value::Number(1.0), "Condition of 'if'").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
        assert!(err.message.contains("got number"));
    }

    #[test]
    fn ai_result_wrapper_survives_validation() {
        let wrapped = AiResultValue::wrap(Value::Text("hi".to_owned()), vec![]);
        let (value, t) = validate_and_coerce(wrapped, Some(&ty(BaseType::Text, 0)), "r").unwrap();
        assert_eq!(t, "text");
        assert!(matches!(value, Value::AiResult(_)));
    }
}
