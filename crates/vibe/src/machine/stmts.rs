//! Statement lowering and declaration handlers.

use crate::{
    ast::{Expr, ModelDecl, Stmt, StmtKind, ToolDecl, MODEL_FIELDS},
    error::{CodeLoc, EngineError, RunResult},
    frame::{Variable, VarSource},
    instruction::{InstrKind, Instruction},
    machine::{pop_values, prepend, set_result},
    state::RuntimeState,
    tools::build_tool_spec,
    validate::{owning_frame_index, require_boolean, validate_and_coerce},
    value::{ModelHandle, Value},
};

/// Lowers one statement into its instruction sequence.
pub(super) fn exec_stmt(state: &mut RuntimeState, stmt: Stmt) -> RunResult<()> {
    let loc = stmt.loc;
    match stmt.kind {
        // Imports are resolved by the module loader before execution.
        StmtKind::Import { .. } => Ok(()),
        StmtKind::Export(inner) => {
            // Function declarations are collected at construction.
            if matches!(inner.kind, StmtKind::Function(_)) {
                Ok(())
            } else {
                exec_stmt(state, *inner)
            }
        }
        StmtKind::Let { name, ty, init } => lower_declaration(state, name, ty, init, false, loc),
        StmtKind::Const { name, ty, init } => lower_declaration(state, name, ty, init, true, loc),
        StmtKind::Model(decl) => lower_model(state, decl, loc),
        StmtKind::Function(_) => Ok(()),
        StmtKind::Tool(decl) => {
            prepend(state, vec![Instruction::new(InstrKind::ExecToolDecl(Box::new(decl)), loc)]);
            Ok(())
        }
        StmtKind::Return(value) => {
            let first = match value {
                Some(expr) => {
                    let expr_loc = expr.loc;
                    Instruction::new(InstrKind::ExecExpr(Box::new(expr)), expr_loc)
                }
                None => Instruction::new(InstrKind::Literal(Value::Null), loc),
            };
            prepend(state, vec![first, Instruction::new(InstrKind::ReturnValue, loc)]);
            Ok(())
        }
        StmtKind::If { cond, then, alt } => {
            let cond_loc = cond.loc;
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(Box::new(cond)), cond_loc),
                    Instruction::new(InstrKind::IfBranch { then, alt }, loc),
                ],
            );
            Ok(())
        }
        StmtKind::ForIn {
            var,
            iterable,
            body,
            mode,
        } => {
            let iterable_loc = iterable.loc;
            let stmt = Stmt::new(
                StmtKind::ForIn {
                    var,
                    iterable: iterable.clone(),
                    body,
                    mode,
                },
                loc,
            );
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(Box::new(iterable)), iterable_loc),
                    Instruction::new(InstrKind::ForInInit { stmt: Box::new(stmt) }, loc),
                ],
            );
            Ok(())
        }
        StmtKind::While { cond, body, mode } => {
            let cond_loc = cond.loc;
            let saved = state.current_frame().local_names();
            let stmt = Stmt::new(
                StmtKind::While {
                    cond: cond.clone(),
                    body,
                    mode,
                },
                loc,
            );
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecExpr(Box::new(cond)), cond_loc),
                    Instruction::new(
                        InstrKind::WhileInit {
                            stmt: Box::new(stmt),
                            saved,
                        },
                        loc,
                    ),
                ],
            );
            Ok(())
        }
        StmtKind::Block(stmts) => {
            let saved = state.current_frame().local_names();
            prepend(
                state,
                vec![
                    Instruction::new(InstrKind::ExecStmts { stmts, index: 0 }, loc),
                    Instruction::new(InstrKind::ExitBlock { saved }, loc),
                ],
            );
            Ok(())
        }
        StmtKind::Expr(expr) => {
            let expr_loc = expr.loc;
            prepend(state, vec![Instruction::new(InstrKind::ExecExpr(Box::new(expr)), expr_loc)]);
            Ok(())
        }
    }
}

fn lower_declaration(
    state: &mut RuntimeState,
    name: String,
    ty: Option<crate::ast::TypeAnnotation>,
    init: Expr,
    is_const: bool,
    loc: CodeLoc,
) -> RunResult<()> {
    let init_loc = init.loc;
    prepend(
        state,
        vec![
            Instruction::new(InstrKind::ExecExpr(Box::new(init)), init_loc),
            Instruction::new(InstrKind::DeclareVar { name, is_const, ty }, loc),
        ],
    );
    Ok(())
}

/// Drives a statement list one element at a time, cloning only the statement
/// about to run.
pub(super) fn exec_stmts(state: &mut RuntimeState, stmts: Vec<Stmt>, index: usize, loc: CodeLoc) -> RunResult<()> {
    if index >= stmts.len() {
        return Ok(());
    }
    let stmt = stmts[index].clone();
    let stmt_loc = stmt.loc;
    prepend(
        state,
        vec![
            Instruction::new(InstrKind::ExecStmt(Box::new(stmt)), stmt_loc),
            Instruction::new(InstrKind::ExecStmts { stmts, index: index + 1 }, loc),
        ],
    );
    Ok(())
}

/// Binds `last_result` as a new variable in the current frame.
pub(super) fn declare_var(
    state: &mut RuntimeState,
    name: &str,
    is_const: bool,
    ty: Option<crate::ast::TypeAnnotation>,
) -> RunResult<()> {
    let (value, ty_display) = validate_and_coerce(state.last_result.clone(), ty.as_ref(), name)?;
    let variable = Variable {
        value: value.clone(),
        is_const,
        declared_type: ty,
        source: state.last_result_source,
    };
    state.current_frame_mut().record_binding(name, variable, ty_display);
    state.last_result = value;
    Ok(())
}

/// Assigns `last_result` to an existing variable found via the scope chain.
/// The snapshot entry is appended to the frame that owns the binding.
pub(super) fn assign_var(state: &mut RuntimeState, name: &str) -> RunResult<()> {
    let Some(frame_index) = owning_frame_index(&state.call_stack, name) else {
        return Err(EngineError::reference(format!("Variable '{name}' is not defined")));
    };
    let existing = &state.call_stack[frame_index].locals[name];
    if existing.is_const {
        return Err(EngineError::assignment(format!("Cannot reassign constant '{name}'")));
    }
    let declared_type = existing.declared_type.clone();
    let (value, ty_display) = validate_and_coerce(state.last_result.clone(), declared_type.as_ref(), name)?;
    let variable = Variable {
        value: value.clone(),
        is_const: false,
        declared_type,
        source: state.last_result_source,
    };
    state.call_stack[frame_index].record_binding(name, variable, ty_display);
    state.last_result = value;
    Ok(())
}

/// Dispatches on a strict boolean condition; the taken branch runs as a
/// single block statement.
pub(super) fn if_branch(state: &mut RuntimeState, then: Box<Stmt>, alt: Option<Box<Stmt>>) -> RunResult<()> {
    let condition = require_boolean(&state.last_result, "Condition of 'if'")?;
    let branch = if condition { Some(then) } else { alt };
    if let Some(branch) = branch {
        let loc = branch.loc;
        prepend(state, vec![Instruction::new(InstrKind::ExecStmt(branch), loc)]);
    }
    Ok(())
}

/// Registers a tool into the per-state registry.
pub(super) fn exec_tool_decl(state: &mut RuntimeState, decl: ToolDecl) -> RunResult<()> {
    let spec = build_tool_spec(&decl, &state.imported_names)?;
    state.tools.insert(decl.name, spec);
    Ok(())
}

/// Lowers a `model` declaration: evaluate each recognized field expression,
/// push it, and finish with `declare_model` consuming the values in field
/// order.
fn lower_model(state: &mut RuntimeState, decl: ModelDecl, loc: CodeLoc) -> RunResult<()> {
    let mut instructions = Vec::new();
    let mut fields = Vec::new();
    for (field, expr) in decl.fields {
        if !MODEL_FIELDS.contains(&field.as_str()) {
            // Unknown fields are the semantic analyzer's concern.
            continue;
        }
        let expr_loc = expr.loc;
        instructions.push(Instruction::new(InstrKind::ExecExpr(Box::new(expr)), expr_loc));
        instructions.push(Instruction::new(InstrKind::PushValue, expr_loc));
        fields.push(field);
    }
    instructions.push(Instruction::new(
        InstrKind::DeclareModel {
            name: decl.name,
            fields,
        },
        loc,
    ));
    prepend(state, instructions);
    Ok(())
}

/// Pops the evaluated field values and binds an immutable model handle.
pub(super) fn declare_model(state: &mut RuntimeState, name: &str, fields: &[String]) -> RunResult<()> {
    let values = pop_values(state, fields.len())?;
    let mut handle = ModelHandle::named(name);
    for (field, value) in fields.iter().zip(values) {
        apply_model_field(&mut handle, field, value)?;
    }
    let variable = Variable {
        value: Value::Model(handle),
        is_const: true,
        declared_type: None,
        source: VarSource::None,
    };
    let value = variable.value.clone();
    state.current_frame_mut().record_binding(name, variable, "model".to_owned());
    set_result(state, value);
    Ok(())
}

fn apply_model_field(handle: &mut ModelHandle, field: &str, value: Value) -> RunResult<()> {
    let text = |value: &Value, field: &str| -> RunResult<String> {
        match value.unwrapped() {
            Value::Text(s) => Ok(s.clone()),
            other => Err(EngineError::type_error(format!(
                "Model field '{field}' must be text, got {}",
                other.type_name()
            ))),
        }
    };
    match field {
        "name" => handle.name = text(&value, field)?,
        "apiKey" => handle.api_key = Some(text(&value, field)?),
        "url" => handle.url = Some(text(&value, field)?),
        "provider" => handle.provider = Some(text(&value, field)?),
        "thinkingLevel" => handle.thinking_level = Some(text(&value, field)?),
        "maxRetriesOnError" => {
            let n = crate::validate::require_integer(&value, "Model field 'maxRetriesOnError' must be an integer")?;
            if n < 0 {
                return Err(EngineError::type_error(
                    "Model field 'maxRetriesOnError' must not be negative",
                ));
            }
            handle.max_retries_on_error = Some(n as u32);
        }
        "tools" => {
            let Value::Array(items) = value.into_unwrapped() else {
                return Err(EngineError::type_error("Model field 'tools' must be an array"));
            };
            let mut tools = Vec::with_capacity(items.len());
            for item in items {
                match item.into_unwrapped() {
                    Value::Tool(name) | Value::Text(name) => tools.push(name),
                    other => {
                        return Err(EngineError::type_error(format!(
                            "Entries of 'tools' must be tools, got {}",
                            other.type_name()
                        )));
                    }
                }
            }
            handle.tools = tools;
        }
        _ => unreachable!("lower_model only emits recognized fields"),
    }
    Ok(())
}
