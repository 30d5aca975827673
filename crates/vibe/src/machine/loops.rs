//! `for-in` and `while` iteration, and the scope-exit context modes.
//!
//! Loops do not push frames: they run in the enclosing frame and only add
//! scope markers to its entry log. The loop body gets block scoping through
//! the saved-name set, and the loop's context mode is applied when the loop
//! completes.

use crate::{
    ast::{CompressArg, ContextMode, Stmt, StmtKind},
    context::{apply_forget, apply_verbose, entries_to_summarize},
    error::{CodeLoc, EngineError, RunResult},
    frame::{FrameEntry, NameList, ScopeKind, Variable, VarSource},
    instruction::{InstrKind, Instruction},
    machine::prepend,
    state::{PendingCompress, RuntimeState, Status},
    validate::{lookup_value, require_boolean, validate_and_coerce},
    value::Value,
};

/// Coerces the iterable, records `scope_enter`, and schedules the first
/// iteration.
pub(super) fn for_in_init(state: &mut RuntimeState, stmt: Stmt, loc: CodeLoc) -> RunResult<()> {
    let StmtKind::ForIn { var, body, mode, .. } = stmt.kind else {
        return Err(EngineError::runtime("for_in_init without a for statement"));
    };
    let items = match state.last_result.clone().into_unwrapped() {
        // A bare integer N iterates over [1..N].
        Value::Number(n) => {
            if !n.is_finite() || n.fract() != 0.0 || n < 0.0 {
                return Err(EngineError::type_error(
                    "Loop iterable must be a non-negative integer or an array",
                ));
            }
            (1..=n as i64).map(|i| Value::Number(i as f64)).collect()
        }
        Value::Array(items) => items,
        other => {
            return Err(EngineError::type_error(format!(
                "Cannot iterate value of type {}",
                other.type_name()
            )));
        }
    };
    let frame = state.current_frame_mut();
    let saved = frame.local_names();
    let entry_index = frame.ordered_entries.len();
    frame.ordered_entries.push(FrameEntry::ScopeEnter {
        kind: ScopeKind::For,
        label: Some(var.clone()),
    });
    prepend(
        state,
        vec![Instruction::new(
            InstrKind::ForInIterate {
                label: var.clone(),
                var,
                items,
                index: 0,
                body,
                saved,
                mode,
                entry_index,
            },
            loc,
        )],
    );
    Ok(())
}

/// Runs one iteration, or finishes the loop when the items are exhausted.
#[expect(clippy::too_many_arguments, reason = "the iterate opcode carries its full payload")]
pub(super) fn for_in_iterate(
    state: &mut RuntimeState,
    var: String,
    items: Vec<Value>,
    index: usize,
    body: Vec<Stmt>,
    saved: NameList,
    mode: ContextMode,
    label: String,
    entry_index: usize,
    loc: CodeLoc,
) -> RunResult<()> {
    if index >= items.len() {
        return finish_loop(state, ScopeKind::For, Some(label), entry_index, mode, &saved);
    }
    let value = items[index].clone();
    // Declare on the first pass, reassign on later ones; each pass appends a
    // fresh snapshot entry.
    let (value, ty_display) = validate_and_coerce(value, None, &var)?;
    state.current_frame_mut().record_binding(
        &var,
        Variable {
            value,
            is_const: false,
            declared_type: None,
            source: VarSource::None,
        },
        ty_display,
    );
    // Body locals are dropped each pass; the loop variable survives until the
    // loop completes.
    let mut body_saved = saved.clone();
    body_saved.push(var.clone());
    prepend(
        state,
        vec![
            Instruction::new(
                InstrKind::ExecStmts {
                    stmts: body.clone(),
                    index: 0,
                },
                loc,
            ),
            Instruction::new(InstrKind::ExitBlock { saved: body_saved }, loc),
            Instruction::new(
                InstrKind::ForInIterate {
                    var,
                    items,
                    index: index + 1,
                    body,
                    saved,
                    mode,
                    label,
                    entry_index,
                },
                loc,
            ),
        ],
    );
    Ok(())
}

/// Checks the first `while` condition. A loop that never runs enters no scope
/// and records no markers.
pub(super) fn while_init(state: &mut RuntimeState, stmt: Stmt, saved: NameList, loc: CodeLoc) -> RunResult<()> {
    if !require_boolean(&state.last_result, "Condition of 'while'")? {
        return Ok(());
    }
    let frame = state.current_frame_mut();
    let entry_index = frame.ordered_entries.len();
    frame.ordered_entries.push(FrameEntry::ScopeEnter {
        kind: ScopeKind::While,
        label: None,
    });
    prepend(
        state,
        vec![Instruction::new(
            InstrKind::WhileIterate {
                stmt: Box::new(stmt),
                saved,
                entry_index,
            },
            loc,
        )],
    );
    Ok(())
}

/// Schedules one body pass, block cleanup, and the condition re-check.
pub(super) fn while_iterate(
    state: &mut RuntimeState,
    stmt: Stmt,
    saved: NameList,
    entry_index: usize,
    loc: CodeLoc,
) -> RunResult<()> {
    let StmtKind::While { cond, body, .. } = &stmt.kind else {
        return Err(EngineError::runtime("while_iterate without a while statement"));
    };
    let cond = cond.clone();
    let cond_loc = cond.loc;
    let body_instruction = Instruction::new(
        InstrKind::ExecStmts {
            stmts: body.clone(),
            index: 0,
        },
        loc,
    );
    prepend(
        state,
        vec![
            body_instruction,
            Instruction::new(InstrKind::ExitBlock { saved: saved.clone() }, loc),
            Instruction::new(InstrKind::ExecExpr(Box::new(cond)), cond_loc),
            Instruction::new(
                InstrKind::WhileCheck {
                    stmt: Box::new(stmt),
                    saved,
                    entry_index,
                },
                loc,
            ),
        ],
    );
    Ok(())
}

/// Repeats or exits the `while` loop, applying the context mode on exit.
pub(super) fn while_check(
    state: &mut RuntimeState,
    stmt: Stmt,
    saved: NameList,
    entry_index: usize,
    loc: CodeLoc,
) -> RunResult<()> {
    if require_boolean(&state.last_result, "Condition of 'while'")? {
        prepend(
            state,
            vec![Instruction::new(
                InstrKind::WhileIterate {
                    stmt: Box::new(stmt),
                    saved,
                    entry_index,
                },
                loc,
            )],
        );
        return Ok(());
    }
    let StmtKind::While { mode, .. } = stmt.kind else {
        return Err(EngineError::runtime("while_check without a while statement"));
    };
    finish_loop(state, ScopeKind::While, None, entry_index, mode, &saved)
}

/// Cleans up loop-scoped locals and applies the context mode. `compress`
/// suspends unless the loop contributed at most one entry, in which case it
/// degrades to `verbose`.
fn finish_loop(
    state: &mut RuntimeState,
    kind: ScopeKind,
    label: Option<String>,
    entry_index: usize,
    mode: ContextMode,
    saved: &NameList,
) -> RunResult<()> {
    state.current_frame_mut().retain_locals(saved);
    match mode {
        ContextMode::Verbose => {
            apply_verbose(state.current_frame_mut(), kind, label);
            Ok(())
        }
        ContextMode::Forget => {
            apply_forget(state.current_frame_mut(), entry_index);
            Ok(())
        }
        ContextMode::Compress(args) => {
            let inner_entries = state
                .current_frame()
                .ordered_entries
                .len()
                .saturating_sub(entry_index + 1);
            if inner_entries <= 1 {
                apply_verbose(state.current_frame_mut(), kind, label);
                return Ok(());
            }
            let (prompt, model) = resolve_compress_args(state, &args)?;
            let Some(model) = model.or_else(|| state.last_used_model.clone()) else {
                return Err(EngineError::runtime("No model available for compression"));
            };
            let entries = entries_to_summarize(state.current_frame(), entry_index);
            state.pending_compress = Some(PendingCompress {
                prompt,
                model,
                entries_to_summarize: entries,
                entry_index,
                scope_kind: kind,
                label,
            });
            state.status = Status::AwaitingCompress;
            Ok(())
        }
    }
}

/// Resolves the `compress(arg1?, arg2?)` arguments: a string literal is the
/// summarization prompt, an identifier bound to a model is the model, any
/// other identifier contributes its string value as the prompt.
fn resolve_compress_args(state: &RuntimeState, args: &[CompressArg]) -> RunResult<(Option<String>, Option<String>)> {
    let mut prompt = None;
    let mut model = None;
    for arg in args {
        match arg {
            CompressArg::Str(text) => {
                if prompt.is_none() {
                    prompt = Some(text.clone());
                }
            }
            CompressArg::Ident(name) => match lookup_value(state, name) {
                Some(value) if value.is_model() => model = Some(name.clone()),
                Some(value) => {
                    if prompt.is_none() {
                        prompt = Some(value.render());
                    }
                }
                None => {
                    return Err(EngineError::reference(format!("Variable '{name}' is not defined")));
                }
            },
        }
    }
    Ok((prompt, model))
}
