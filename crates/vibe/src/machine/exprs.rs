//! Expression lowering and the value-stack primitives.

use indexmap::IndexMap;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, UnaryOp},
    error::{CodeLoc, EngineError, RunResult},
    instruction::{InstrKind, Instruction},
    machine::{pop_value, pop_values, prepend, set_result},
    state::RuntimeState,
    validate::{require_boolean, require_integer, require_number, resolve_name},
    value::{BoundMethod, BuiltinMethod, MethodTarget, Value},
};

/// Lowers one expression into its instruction sequence (or produces the
/// result directly for identifiers).
pub(super) fn exec_expr(state: &mut RuntimeState, expr: Expr) -> RunResult<()> {
    let loc = expr.loc;
    match expr.kind {
        ExprKind::Ident(name) => {
            let value = resolve_name(state, &name)?;
            set_result(state, value);
            Ok(())
        }
        ExprKind::Str(text) => {
            prepend(state, vec![Instruction::new(InstrKind::InterpolateString(text), loc)]);
            Ok(())
        }
        ExprKind::Template(text) => {
            prepend(state, vec![Instruction::new(InstrKind::InterpolateTemplate(text), loc)]);
            Ok(())
        }
        ExprKind::Number(n) => {
            prepend(state, vec![Instruction::new(InstrKind::Literal(Value::Number(n)), loc)]);
            Ok(())
        }
        ExprKind::Bool(b) => {
            prepend(state, vec![Instruction::new(InstrKind::Literal(Value::Bool(b)), loc)]);
            Ok(())
        }
        ExprKind::ObjectLit(fields) => {
            let mut instructions = Vec::with_capacity(fields.len() * 2 + 1);
            let mut keys = Vec::with_capacity(fields.len());
            for (key, value) in fields {
                let value_loc = value.loc;
                instructions.push(Instruction::new(InstrKind::ExecExpr(Box::new(value)), value_loc));
                instructions.push(Instruction::new(InstrKind::PushValue, value_loc));
                keys.push(key);
            }
            instructions.push(Instruction::new(InstrKind::BuildObject { keys }, loc));
            prepend(state, instructions);
            Ok(())
        }
        ExprKind::ArrayLit(items) => {
            let len = items.len();
            let mut instructions = Vec::with_capacity(len * 2 + 1);
            for item in items {
                let item_loc = item.loc;
                instructions.push(Instruction::new(InstrKind::ExecExpr(Box::new(item)), item_loc));
                instructions.push(Instruction::new(InstrKind::PushValue, item_loc));
            }
            instructions.push(Instruction::new(InstrKind::BuildArray { len }, loc));
            prepend(state, instructions);
            Ok(())
        }
        ExprKind::Binary { op, left, right } if matches!(op, BinaryOp::And | BinaryOp::Or) => {
            let left_loc = left.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(left), left_loc),
                    Instruction::new(InstrKind::LogicBranch { op, right }, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Binary { op, left, right } => {
            let left_loc = left.loc;
            let right_loc = right.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(left), left_loc),
                    Instruction::new(InstrKind::PushValue, left_loc),
                    Instruction::new(InstrKind::ExecExpr(right), right_loc),
                    Instruction::new(InstrKind::PushValue, right_loc),
                    Instruction::new(InstrKind::BinaryOp(op), loc),
                ],
            );
            Ok(())
        }
        ExprKind::Unary { op, operand } => {
            let operand_loc = operand.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(operand), operand_loc),
                    Instruction::new(InstrKind::UnaryOp(op), loc),
                ],
            );
            Ok(())
        }
        ExprKind::Range { start, end } => {
            let start_loc = start.loc;
            let end_loc = end.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(start), start_loc),
                    Instruction::new(InstrKind::PushValue, start_loc),
                    Instruction::new(InstrKind::ExecExpr(end), end_loc),
                    Instruction::new(InstrKind::PushValue, end_loc),
                    Instruction::new(InstrKind::BuildRange, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Index { object, index } => {
            let object_loc = object.loc;
            let index_loc = index.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(object), object_loc),
                    Instruction::new(InstrKind::PushValue, object_loc),
                    Instruction::new(InstrKind::ExecExpr(index), index_loc),
                    Instruction::new(InstrKind::PushValue, index_loc),
                    Instruction::new(InstrKind::IndexAccess, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Slice { object, start, end } => {
            let object_loc = object.loc;
            let mut instructions = vec![
                Instruction::new(InstrKind::ExecExpr(object), object_loc),
                Instruction::new(InstrKind::PushValue, object_loc),
            ];
            let has_start = start.is_some();
            let has_end = end.is_some();
            for bound in [start, end].into_iter().flatten() {
                let bound_loc = bound.loc;
                instructions.push(Instruction::new(InstrKind::ExecExpr(bound), bound_loc));
                instructions.push(Instruction::new(InstrKind::PushValue, bound_loc));
            }
            instructions.push(Instruction::new(InstrKind::SliceAccess { has_start, has_end }, loc));
            prepend(state, instructions);
            Ok(())
        }
        ExprKind::Member { object, name } => {
            let origin = match &object.kind {
                ExprKind::Ident(ident) => Some(ident.clone()),
                _ => None,
            };
            let object_loc = object.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(object), object_loc),
                    Instruction::new(InstrKind::PushValue, object_loc),
                    Instruction::new(InstrKind::MemberAccess { name, origin }, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Assign { target, value } => {
            let value_loc = value.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(value), value_loc),
                    Instruction::new(InstrKind::AssignVar { name: target }, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Call { callee, args } => {
            let arg_count = args.len();
            let callee_loc = callee.loc;
            let mut instructions = vec![
                Instruction::new(InstrKind::ExecExpr(callee), callee_loc),
                Instruction::new(InstrKind::PushValue, callee_loc),
            ];
            for arg in args {
                let arg_loc = arg.loc;
                instructions.push(Instruction::new(InstrKind::ExecExpr(Box::new(arg)), arg_loc));
                instructions.push(Instruction::new(InstrKind::PushValue, arg_loc));
            }
            instructions.push(Instruction::new(InstrKind::CallFunction { arg_count }, loc));
            prepend(state, instructions);
            Ok(())
        }
        ExprKind::Ai(ai) => {
            let prompt_loc = ai.prompt.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(ai.prompt), prompt_loc),
                    Instruction::new(
                        InstrKind::AiCall {
                            model: ai.model,
                            context: ai.context,
                            kind: ai.kind,
                            cache: ai.cache,
                        },
                        loc,
                    ),
                ],
            );
            Ok(())
        }
        ExprKind::Ask { prompt } => {
            let prompt_loc = prompt.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(prompt), prompt_loc),
                    Instruction::new(InstrKind::AskUser, loc),
                ],
            );
            Ok(())
        }
        ExprKind::Host(escape) => {
            prepend(
                state,
                vec![Instruction::new(
                    InstrKind::HostEval {
                        params: escape.params.into_iter().collect(),
                        body: escape.body,
                    },
                    loc,
                )],
            );
            Ok(())
        }
    }
}

pub(super) fn build_object(state: &mut RuntimeState, keys: Vec<String>) -> RunResult<()> {
    let values = pop_values(state, keys.len())?;
    let mut object = IndexMap::with_capacity(keys.len());
    for (key, value) in keys.into_iter().zip(values) {
        object.insert(key, value);
    }
    set_result(state, Value::Object(object));
    Ok(())
}

pub(super) fn build_array(state: &mut RuntimeState, len: usize) -> RunResult<()> {
    let values = pop_values(state, len)?;
    set_result(state, Value::Array(values));
    Ok(())
}

/// Builds the inclusive integer array `[a, a+1, …, b]`. Descending bounds
/// yield an empty array.
pub(super) fn build_range(state: &mut RuntimeState) -> RunResult<()> {
    let [start, end]: [Value; 2] = pop_values(state, 2)?
        .try_into()
        .map_err(|_| EngineError::runtime("value stack underflow"))?;
    let start = range_bound(&start)?;
    let end = range_bound(&end)?;
    let items = if start > end {
        Vec::new()
    } else {
        (start..=end).map(|i| Value::Number(i as f64)).collect()
    };
    set_result(state, Value::Array(items));
    Ok(())
}

fn range_bound(value: &Value) -> RunResult<i64> {
    match value.unwrapped() {
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as i64),
        other => Err(EngineError::runtime(format!(
            "Range bounds must be integers, got {}",
            other.type_name()
        ))),
    }
}

/// Short-circuit decision point for `and`/`or`. The right operand is lowered
/// only when the left operand does not decide, so a suspending right operand
/// is never reached otherwise.
pub(super) fn logic_branch(state: &mut RuntimeState, op: BinaryOp, right: Box<Expr>, loc: CodeLoc) -> RunResult<()> {
    let left = require_boolean(&state.last_result, &format!("Left operand of '{op}'"))?;
    let decided = match op {
        BinaryOp::Or => left,
        BinaryOp::And => !left,
        _ => unreachable!("logic_branch only lowers 'and'/'or'"),
    };
    if decided {
        set_result(state, Value::Bool(left));
        return Ok(());
    }
    let right_loc = right.loc;
    prepend(
        state,
        vec![
            Instruction::new(InstrKind::ExecExpr(right), right_loc),
            Instruction::new(
                InstrKind::CheckBoolean {
                    what: format!("Right operand of '{op}'"),
                },
                loc,
            ),
        ],
    );
    Ok(())
}

pub(super) fn check_boolean(state: &mut RuntimeState, what: &str) -> RunResult<()> {
    let value = require_boolean(&state.last_result, what)?;
    set_result(state, Value::Bool(value));
    Ok(())
}

pub(super) fn binary_op(state: &mut RuntimeState, op: BinaryOp) -> RunResult<()> {
    let right = pop_value(state)?;
    let left = pop_value(state)?;
    let result = match op {
        BinaryOp::Eq => Value::Bool(left.unwrapped() == right.unwrapped()),
        BinaryOp::Ne => Value::Bool(left.unwrapped() != right.unwrapped()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = require_number(&left, &format!("Left operand of '{op}'"))?;
            let r = require_number(&right, &format!("Right operand of '{op}'"))?;
            Value::Bool(match op {
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                BinaryOp::Gt => l > r,
                BinaryOp::Ge => l >= r,
                _ => unreachable!(),
            })
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let l = require_number(&left, &format!("Left operand of '{op}'"))?;
            let r = require_number(&right, &format!("Right operand of '{op}'"))?;
            let n = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Mod => l % r,
                _ => unreachable!(),
            };
            if !n.is_finite() {
                return Err(EngineError::runtime(format!(
                    "Arithmetic '{op}' produced a non-finite number"
                )));
            }
            Value::Number(n)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators lower through logic_branch"),
    };
    set_result(state, result);
    Ok(())
}

pub(super) fn unary_op(state: &mut RuntimeState, op: UnaryOp) -> RunResult<()> {
    let result = match op {
        UnaryOp::Not => Value::Bool(!require_boolean(&state.last_result, "Operand of 'not'")?),
        UnaryOp::Neg => Value::Number(-require_number(&state.last_result, "Operand of unary '-'")?),
    };
    set_result(state, result);
    Ok(())
}

/// Integer indexing with Python-style negative indices; objects index by
/// field name.
pub(super) fn index_access(state: &mut RuntimeState) -> RunResult<()> {
    let index = pop_value(state)?;
    let receiver = pop_value(state)?;
    let result = match receiver.unwrapped() {
        Value::Array(items) => {
            let i = normalize_index(&index, items.len())?;
            items[i].clone()
        }
        Value::Text(text) => {
            let chars: Vec<char> = text.chars().collect();
            let i = normalize_index(&index, chars.len())?;
            Value::Text(chars[i].to_string())
        }
        Value::Object(fields) => match index.unwrapped() {
            Value::Text(key) => fields
                .get(key)
                .cloned()
                .ok_or_else(|| EngineError::runtime(format!("No field '{key}' on object")))?,
            other => {
                return Err(EngineError::type_error(format!(
                    "Object index must be text, got {}",
                    other.type_name()
                )));
            }
        },
        other => {
            return Err(EngineError::runtime(format!(
                "Cannot index value of type {}",
                other.type_name()
            )));
        }
    };
    set_result(state, result);
    Ok(())
}

fn normalize_index(index: &Value, len: usize) -> RunResult<usize> {
    let raw = require_integer(index, "Array index must be an integer")?;
    let adjusted = if raw < 0 { raw + len as i64 } else { raw };
    if adjusted < 0 || adjusted as usize >= len {
        return Err(EngineError::runtime(format!(
            "Index {raw} out of bounds (length {len})"
        )));
    }
    Ok(adjusted as usize)
}

/// Slicing with exclusive end; negative bounds normalize by `+ length` before
/// clamping.
pub(super) fn slice_access(state: &mut RuntimeState, has_start: bool, has_end: bool) -> RunResult<()> {
    let end = if has_end { Some(pop_value(state)?) } else { None };
    let start = if has_start { Some(pop_value(state)?) } else { None };
    let receiver = pop_value(state)?;
    let bound = |value: Option<&Value>, default: i64| -> RunResult<i64> {
        value.map_or(Ok(default), |v| require_integer(v, "Slice bounds must be integers"))
    };
    let clamp = |raw: i64, len: usize| -> usize {
        let adjusted = if raw < 0 { raw + len as i64 } else { raw };
        adjusted.clamp(0, len as i64) as usize
    };
    let result = match receiver.unwrapped() {
        Value::Array(items) => {
            let len = items.len();
            let from = clamp(bound(start.as_ref(), 0)?, len);
            let to = clamp(bound(end.as_ref(), len as i64)?, len);
            Value::Array(if from < to { items[from..to].to_vec() } else { Vec::new() })
        }
        Value::Text(text) => {
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len();
            let from = clamp(bound(start.as_ref(), 0)?, len);
            let to = clamp(bound(end.as_ref(), len as i64)?, len);
            Value::Text(if from < to {
                chars[from..to].iter().collect()
            } else {
                String::new()
            })
        }
        other => {
            return Err(EngineError::runtime(format!(
                "Cannot slice value of type {}",
                other.type_name()
            )));
        }
    };
    set_result(state, result);
    Ok(())
}

pub(super) fn member_access(state: &mut RuntimeState, name: &str, origin: Option<String>) -> RunResult<()> {
    let receiver = pop_value(state)?;
    let result = member_value(receiver, name, origin)?;
    set_result(state, result);
    Ok(())
}

fn member_value(receiver: Value, name: &str, origin: Option<String>) -> RunResult<Value> {
    match receiver {
        Value::AiResult(inner) => match name {
            "value" => Ok(inner.value.clone()),
            "toolCalls" => Ok(Value::Array(inner.tool_calls.iter().map(|t| t.to_value()).collect())),
            // Other members delegate to the primitive value.
            _ => member_value(inner.value, name, origin),
        },
        Value::Object(fields) => fields
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::runtime(format!("No field '{name}' on object"))),
        Value::Array(_) => match name.parse::<BuiltinMethod>() {
            Ok(method) => Ok(bound(method, origin, receiver)),
            Err(_) => Err(EngineError::runtime(format!("Unknown array member '{name}'"))),
        },
        Value::Text(_) => match name {
            "len" => Ok(bound(BuiltinMethod::Len, origin, receiver)),
            _ => Err(EngineError::runtime(format!("Unknown text member '{name}'"))),
        },
        other => Err(EngineError::runtime(format!(
            "Cannot access member '{name}' on {}",
            other.type_name()
        ))),
    }
}

fn bound(method: BuiltinMethod, origin: Option<String>, receiver: Value) -> Value {
    let target = match origin {
        Some(variable) => MethodTarget::Variable(variable),
        None => MethodTarget::Detached(Box::new(receiver)),
    };
    Value::BoundMethod(BoundMethod { method, target })
}
