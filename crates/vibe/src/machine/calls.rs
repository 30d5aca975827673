//! Function-call dispatch, frame lifecycle, and built-in methods.

use crate::{
    ast::FunctionDecl,
    error::{CodeLoc, EngineError, RunResult},
    frame::{StackFrame, Variable, VarSource},
    instruction::{InstrKind, Instruction},
    machine::{pop_value, pop_values, prepend, set_result},
    state::{PendingImportedHostCall, RuntimeState, Status},
    validate::{lookup_scope_mut, validate_and_coerce},
    value::{BoundMethod, BuiltinMethod, MethodTarget, Value},
};

/// Pops the arguments and callee, then dispatches on the callee tag.
pub(super) fn call_function(state: &mut RuntimeState, arg_count: usize, loc: CodeLoc) -> RunResult<()> {
    let args = pop_values(state, arg_count)?;
    let callee = pop_value(state)?;
    match callee.into_unwrapped() {
        Value::UserFn(name) => {
            let decl = state
                .functions
                .get(&name)
                .cloned()
                .ok_or_else(|| EngineError::reference(format!("Function '{name}' is not defined")))?;
            invoke_source_function(state, &decl, args, loc)
        }
        Value::ImportedSourceFn { name, module } => {
            let decl = state
                .source_modules
                .get(&module)
                .and_then(|m| m.functions.get(&name))
                .cloned()
                .ok_or_else(|| {
                    EngineError::reference(format!("Function '{name}' is not exported by '{module}'"))
                })?;
            invoke_source_function(state, &decl, args, loc)
        }
        Value::ImportedHostFn(name) => {
            // AI result wrappers resolve to their primitive values before
            // crossing the host boundary.
            let args = args.into_iter().map(Value::into_unwrapped).collect();
            state.pending_imported_host_call = Some(PendingImportedHostCall { name, args });
            state.status = Status::AwaitingImportedHostCall;
            Ok(())
        }
        Value::Tool(name) => Err(EngineError::runtime(format!(
            "Tool '{name}' cannot be called from code; offer it to a model through the 'tools' field"
        ))),
        Value::BoundMethod(method) => builtin_method(state, method, args),
        other => Err(EngineError::runtime(format!(
            "Value of type {} is not callable",
            other.type_name()
        ))),
    }
}

/// Builds the callee frame and schedules the body followed by the `pop_frame`
/// teardown marker.
fn invoke_source_function(
    state: &mut RuntimeState,
    decl: &FunctionDecl,
    args: Vec<Value>,
    loc: CodeLoc,
) -> RunResult<()> {
    if args.len() != decl.params.len() {
        return Err(EngineError::runtime(format!(
            "Function '{}' expects {} arguments, got {}",
            decl.name,
            decl.params.len(),
            args.len()
        )));
    }
    if state.call_stack.len() >= state.options.max_call_depth {
        return Err(EngineError::runtime(format!(
            "Maximum call depth of {} exceeded",
            state.options.max_call_depth
        )));
    }
    // The lexical parent of a top-level function is the entry frame.
    let mut frame = StackFrame::new(decl.name.clone(), Some(0));
    frame.return_type = decl.return_type.clone();
    for (param, arg) in decl.params.iter().zip(args) {
        let (value, ty_display) = validate_and_coerce(arg, param.ty.as_ref(), &param.name)?;
        frame.record_binding(
            &param.name,
            Variable {
                value,
                is_const: false,
                declared_type: param.ty.clone(),
                source: VarSource::None,
            },
            ty_display,
        );
    }
    state.call_stack.push(frame);
    prepend(
        state,
        vec![
            Instruction::new(
                InstrKind::ExecStmts {
                    stmts: decl.body.clone(),
                    index: 0,
                },
                loc,
            ),
            Instruction::new(InstrKind::PopFrame, loc),
        ],
    );
    Ok(())
}

/// Teardown for a function body that fell through without `return`. Ordinary
/// functions always discard their own frame's entries on exit.
pub(super) fn pop_frame(state: &mut RuntimeState) -> RunResult<()> {
    if state.call_stack.len() <= 1 {
        return Err(EngineError::runtime("pop_frame on the entry frame"));
    }
    state.call_stack.pop();
    set_result(state, Value::Null);
    Ok(())
}

/// Validates the return value, pops the frame, and rewinds the instruction
/// stack past the matching `pop_frame` marker. Returning from the last frame
/// completes the program.
pub(super) fn return_value(state: &mut RuntimeState) -> RunResult<()> {
    if state.call_stack.len() == 1 {
        state.instruction_stack.clear();
        state.status = Status::Completed;
        return Ok(());
    }
    let frame = state.current_frame();
    if let Some(return_type) = frame.return_type.clone() {
        let label = format!("{} return value", frame.name);
        let (value, _) = validate_and_coerce(state.last_result.clone(), Some(&return_type), &label)?;
        state.last_result = value;
    }
    state.call_stack.pop();
    while let Some(instruction) = state.instruction_stack.pop_front() {
        if matches!(instruction.kind, InstrKind::PopFrame) {
            break;
        }
    }
    Ok(())
}

/// Executes an array/string built-in synchronously.
fn builtin_method(state: &mut RuntimeState, method: BoundMethod, args: Vec<Value>) -> RunResult<()> {
    match method.method {
        BuiltinMethod::Len => {
            if !args.is_empty() {
                return Err(EngineError::runtime("len() takes no arguments"));
            }
            let value = target_value(state, &method.target)?;
            let len = match value.unwrapped() {
                Value::Array(items) => items.len(),
                Value::Text(text) => text.chars().count(),
                other => {
                    return Err(EngineError::runtime(format!(
                        "len() is not supported on {}",
                        other.type_name()
                    )));
                }
            };
            set_result(state, Value::Number(len as f64));
            Ok(())
        }
        BuiltinMethod::Push => {
            let [item]: [Value; 1] = args
                .try_into()
                .map_err(|_| EngineError::runtime("push() takes exactly one argument"))?;
            let updated = mutate_array(state, &method.target, "push", move |items| {
                items.push(item);
                Ok(None)
            })?;
            // push returns the (mutated) array.
            set_result(state, updated);
            Ok(())
        }
        BuiltinMethod::Pop => {
            if !args.is_empty() {
                return Err(EngineError::runtime("pop() takes no arguments"));
            }
            // pop returns the removed element; mutate_array places it in
            // last_result.
            mutate_array(state, &method.target, "pop", |items| {
                items.pop().map(Some).ok_or_else(|| EngineError::runtime("pop() on an empty array"))
            })?;
            Ok(())
        }
    }
}

/// Applies `mutate` to the target array, writing back through the scope chain
/// when the receiver was a variable. Returns the array after mutation.
fn mutate_array(
    state: &mut RuntimeState,
    target: &MethodTarget,
    op: &str,
    mutate: impl FnOnce(&mut Vec<Value>) -> RunResult<Option<Value>>,
) -> RunResult<Value> {
    match target {
        MethodTarget::Variable(name) => {
            let Some(variable) = lookup_scope_mut(&mut state.call_stack, name) else {
                return Err(EngineError::reference(format!("Variable '{name}' is not defined")));
            };
            let receiver_type = variable.value.type_name();
            let Value::Array(items) = variable.value.unwrapped_mut() else {
                return Err(EngineError::type_error(format!(
                    "{op}() requires an array, got {receiver_type}"
                )));
            };
            let removed = mutate(items)?;
            let updated = variable.value.clone();
            if let Some(removed) = removed {
                set_result(state, removed);
            }
            Ok(updated)
        }
        MethodTarget::Detached(value) => {
            let mut detached = value.as_ref().clone();
            let receiver_type = detached.type_name();
            let Value::Array(items) = detached.unwrapped_mut() else {
                return Err(EngineError::type_error(format!(
                    "{op}() requires an array, got {receiver_type}"
                )));
            };
            let removed = mutate(items)?;
            if let Some(removed) = removed {
                set_result(state, removed);
            }
            Ok(detached)
        }
    }
}

/// Resolves the receiver of a non-mutating bound method.
fn target_value(state: &RuntimeState, target: &MethodTarget) -> RunResult<Value> {
    match target {
        MethodTarget::Variable(name) => crate::validate::lookup_scope(&state.call_stack, name)
            .map(|variable| variable.value.clone())
            .ok_or_else(|| EngineError::reference(format!("Variable '{name}' is not defined"))),
        MethodTarget::Detached(value) => Ok(value.as_ref().clone()),
    }
}
