//! The suspension points: AI calls, user input, and inline host escapes.

use crate::{
    ast::{AiKind, ContextSpec},
    context::context_for_spec,
    error::{EngineError, RunResult},
    frame::NameList,
    state::{PendingAi, PendingHost, PendingUser, RuntimeState, ScopeParam, Status},
    validate::{lookup_value, resolve_name},
    value::Value,
};

/// Suspends for an AI call. The prompt text is in `last_result`; the model
/// argument must name a model-handle binding.
pub(super) fn ai_call(
    state: &mut RuntimeState,
    model: &str,
    context: &ContextSpec,
    kind: AiKind,
    cache: bool,
) -> RunResult<()> {
    let prompt = match state.last_result.unwrapped() {
        Value::Text(text) => text.clone(),
        other => {
            return Err(EngineError::type_error(format!(
                "AI prompt must be text, got {}",
                other.type_name()
            )));
        }
    };
    let model_value = resolve_name(state, model)?;
    if !model_value.is_model() {
        return Err(EngineError::type_error(format!("'{model}' is not a model")));
    }
    let context_source = match context {
        ContextSpec::Variable(name) => lookup_value(state, name),
        _ => None,
    };
    let context_entries = context_for_spec(context, &state.call_stack, context_source.as_ref());
    let vibe_scope_params = (kind == AiKind::Vibe).then(|| {
        state
            .current_frame()
            .locals
            .iter()
            .filter(|(_, variable)| !variable.value.is_model())
            .map(|(name, variable)| ScopeParam {
                name: name.clone(),
                ty: variable
                    .declared_type
                    .as_ref()
                    .map_or_else(|| infer_display(&variable.value), ToString::to_string),
                value: variable.value.unwrapped().clone(),
            })
            .collect()
    });
    state.last_used_model = Some(model.to_owned());
    state.pending_ai = Some(PendingAi {
        kind,
        prompt,
        model: model.to_owned(),
        context: context_entries,
        vibe_scope_params,
        cache,
        tool_rounds: Vec::new(),
    });
    state.status = Status::AwaitingAi;
    Ok(())
}

fn infer_display(value: &Value) -> String {
    match value.unwrapped() {
        Value::Text(_) => "text".to_owned(),
        Value::Bool(_) => "boolean".to_owned(),
        Value::Number(_) => "number".to_owned(),
        Value::Array(_) | Value::Object(_) => "json".to_owned(),
        other => other.type_name().to_owned(),
    }
}

/// Suspends for user input; the prompt is `last_result` rendered as text.
pub(super) fn ask_user(state: &mut RuntimeState) -> RunResult<()> {
    state.pending_user = Some(PendingUser {
        prompt: state.last_result.render(),
    });
    state.status = Status::AwaitingUser;
    Ok(())
}

/// Suspends for an inline host-language escape, resolving the captured
/// parameter values through the scope chain. AI result wrappers resolve to
/// their primitive values before crossing the boundary.
pub(super) fn host_eval(state: &mut RuntimeState, params: &NameList, body: String) -> RunResult<()> {
    let param_values = params
        .iter()
        .map(|name| resolve_name(state, name).map(Value::into_unwrapped))
        .collect::<RunResult<Vec<_>>>()?;
    state.pending_host = Some(PendingHost {
        params: params.iter().cloned().collect(),
        body,
        param_values,
    });
    state.status = Status::AwaitingHost;
    Ok(())
}
