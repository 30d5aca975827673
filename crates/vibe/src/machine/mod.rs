//! The instruction scheduler and its handlers.
//!
//! `step` is a value-to-value function: it pops the head of the instruction
//! stack, dispatches on opcode, and returns the next state. Any error raised
//! by a handler is caught here -- once -- and folded into `status = error` with
//! the current instruction's location attached. Handlers are grouped by
//! concern: statement lowering, expression primitives, calls, loops, and the
//! suspension points.

mod ai;
mod calls;
mod exprs;
mod loops;
mod stmts;

use crate::{
    context,
    error::{EngineError, RunResult},
    frame::VarSource,
    instruction::{InstrKind, Instruction},
    state::{RuntimeState, Status},
    tracer::{NoopTracer, StepTracer},
    value::Value,
};

/// Executes exactly one instruction.
///
/// Statuses other than `running` are fixed points: stepping a completed,
/// errored, paused, or awaiting state returns it unchanged.
#[must_use]
pub fn step(state: RuntimeState) -> RuntimeState {
    step_traced(state, &mut NoopTracer)
}

/// [`step`] with a tracer hooked into instruction dispatch.
#[must_use]
pub fn step_traced(mut state: RuntimeState, tracer: &mut impl StepTracer) -> RuntimeState {
    if state.status != Status::Running {
        return state;
    }
    state.local_context = context::local_context(&state.call_stack);
    state.global_context = context::global_context(&state.call_stack);
    let Some(instruction) = state.instruction_stack.pop_front() else {
        let old = state.status;
        state.status = Status::Completed;
        tracer.on_status_change(old, state.status);
        return state;
    };
    tracer.on_instruction(&instruction, &state);
    if state.options.trace_execution {
        state.execution_log.push(format!(
            "{} at line {}, column {}",
            instruction.kind.name(),
            instruction.loc.line,
            instruction.loc.column
        ));
    }
    let loc = instruction.loc;
    let before = state.status;
    if let Err(mut err) = dispatch(&mut state, instruction.kind, loc) {
        if err.loc.is_none() {
            err.loc = Some(loc);
        }
        state.status = Status::Error;
        state.error = Some(err);
    }
    if state.status != before {
        tracer.on_status_change(before, state.status);
    }
    state
}

fn dispatch(state: &mut RuntimeState, kind: InstrKind, loc: crate::error::CodeLoc) -> RunResult<()> {
    match kind {
        InstrKind::ExecStmt(stmt) => stmts::exec_stmt(state, *stmt),
        InstrKind::ExecExpr(expr) => exprs::exec_expr(state, *expr),
        InstrKind::ExecStmts { stmts, index } => stmts::exec_stmts(state, stmts, index, loc),
        InstrKind::DeclareVar { name, is_const, ty } => stmts::declare_var(state, &name, is_const, ty),
        InstrKind::AssignVar { name } => stmts::assign_var(state, &name),
        InstrKind::PushValue => {
            state.value_stack.push(state.last_result.clone());
            Ok(())
        }
        InstrKind::BuildObject { keys } => exprs::build_object(state, keys),
        InstrKind::BuildArray { len } => exprs::build_array(state, len),
        InstrKind::BuildRange => exprs::build_range(state),
        InstrKind::CallFunction { arg_count } => calls::call_function(state, arg_count, loc),
        InstrKind::PopFrame => calls::pop_frame(state),
        InstrKind::ReturnValue => calls::return_value(state),
        InstrKind::ExitBlock { saved } => {
            state.current_frame_mut().retain_locals(&saved);
            Ok(())
        }
        InstrKind::AiCall {
            model,
            context,
            kind,
            cache,
        } => ai::ai_call(state, &model, &context, kind, cache),
        InstrKind::AskUser => ai::ask_user(state),
        InstrKind::HostEval { params, body } => ai::host_eval(state, &params, body),
        InstrKind::IfBranch { then, alt } => stmts::if_branch(state, then, alt),
        InstrKind::LogicBranch { op, right } => exprs::logic_branch(state, op, right, loc),
        InstrKind::CheckBoolean { what } => exprs::check_boolean(state, &what),
        InstrKind::ForInInit { stmt } => loops::for_in_init(state, *stmt, loc),
        InstrKind::ForInIterate {
            var,
            items,
            index,
            body,
            saved,
            mode,
            label,
            entry_index,
        } => loops::for_in_iterate(state, var, items, index, body, saved, mode, label, entry_index, loc),
        InstrKind::WhileInit { stmt, saved } => loops::while_init(state, *stmt, saved, loc),
        InstrKind::WhileIterate {
            stmt,
            saved,
            entry_index,
        } => loops::while_iterate(state, *stmt, saved, entry_index, loc),
        InstrKind::WhileCheck {
            stmt,
            saved,
            entry_index,
        } => loops::while_check(state, *stmt, saved, entry_index, loc),
        InstrKind::Literal(value) => {
            set_result(state, value);
            Ok(())
        }
        InstrKind::InterpolateString(template) => {
            let text = crate::interpolate::interpolate_string(&template, &state.call_stack);
            set_result(state, Value::Text(text));
            Ok(())
        }
        InstrKind::InterpolateTemplate(template) => {
            let text = crate::interpolate::interpolate_template(&template, &state.call_stack);
            set_result(state, Value::Text(text));
            Ok(())
        }
        InstrKind::BinaryOp(op) => exprs::binary_op(state, op),
        InstrKind::UnaryOp(op) => exprs::unary_op(state, op),
        InstrKind::IndexAccess => exprs::index_access(state),
        InstrKind::SliceAccess { has_start, has_end } => exprs::slice_access(state, has_start, has_end),
        InstrKind::MemberAccess { name, origin } => exprs::member_access(state, &name, origin),
        InstrKind::ExecToolDecl(decl) => stmts::exec_tool_decl(state, *decl),
        InstrKind::DeclareModel { name, fields } => stmts::declare_model(state, &name, &fields),
    }
}

/// Prepends instructions so that the first element of `instructions` is the
/// next one executed.
pub(crate) fn prepend(state: &mut RuntimeState, instructions: Vec<Instruction>) {
    for instruction in instructions.into_iter().rev() {
        state.instruction_stack.push_front(instruction);
    }
}

/// Sets `last_result` from an ordinary (non-AI, non-user) computation.
pub(crate) fn set_result(state: &mut RuntimeState, value: Value) {
    state.last_result = value;
    state.last_result_source = VarSource::None;
}

/// Pops one value from the value stack; an empty stack is a lowering bug.
pub(crate) fn pop_value(state: &mut RuntimeState) -> RunResult<Value> {
    state
        .value_stack
        .pop()
        .ok_or_else(|| EngineError::runtime("value stack underflow"))
}

/// Pops `n` values, returned in the order they were pushed.
pub(crate) fn pop_values(state: &mut RuntimeState, n: usize) -> RunResult<Vec<Value>> {
    if state.value_stack.len() < n {
        return Err(EngineError::runtime("value stack underflow"));
    }
    let split = state.value_stack.len() - n;
    Ok(state.value_stack.split_off(split))
}
