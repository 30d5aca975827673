//! Behavioral tests for suspension and resumption: AI calls, user input,
//! host escapes, tool rounds, snapshots, and the pending-slot invariants.

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use vibe::{
    parse, AiKind, EngineOptions, FrameEntry, PromptKind, RuntimeState, Status, Value, VarSource,
};

fn start(source: &str) -> RuntimeState {
    let program = parse(source, "test.vibe").unwrap();
    RuntimeState::new(program, EngineOptions::default())
}

fn run(source: &str) -> RuntimeState {
    start(source).run_until_pause()
}

fn global(state: &RuntimeState, name: &str) -> Value {
    state.call_stack[0].locals[name].value.unwrapped().clone()
}

// === do ===

#[test]
fn do_suspends_with_prompt_and_model_binding_name() {
    let state = run("model m = { name: \"x\", apiKey: \"k\", url: \"u\" }\nlet r = do \"hi\" m default");
    assert_eq!(state.status, Status::AwaitingAi);
    assert_eq!(state.occupied_pending_slots(), 1);
    let pending = state.pending_ai.as_ref().unwrap();
    assert_eq!(pending.kind, AiKind::Do);
    assert_eq!(pending.prompt, "hi");
    assert_eq!(pending.model, "m");
    assert!(pending.vibe_scope_params.is_none());
}

#[test]
fn do_resume_produces_ai_sourced_result_and_prompt_entry() {
    let state = run("model m = { name: \"x\", apiKey: \"k\", url: \"u\" }\nlet r = do \"hi\" m default");
    let state = state.resume_with_ai_response("hello", None, None).unwrap();
    assert_eq!(state.status, Status::Running);
    assert_eq!(state.last_result_source, VarSource::Ai);
    let state = state.run_until_pause();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "r"), Value::Text("hello".to_owned()));
    assert_eq!(state.call_stack[0].locals["r"].source, VarSource::Ai);
    let last = state.call_stack[0].ordered_entries.last().unwrap();
    assert!(
        matches!(
            last,
            FrameEntry::Prompt { ai_type: PromptKind::Do, prompt, response: Some(response), .. }
                if prompt == "hi" && response == "hello"
        ),
        "frame should end with the completed prompt entry: {last:?}"
    );
}

#[test]
fn do_prompt_is_interpolated_before_suspension() {
    let state = run(concat!(
        "model m = { name: \"x\" }\n",
        "let topic = \"rust\"\n",
        "let r = do \"explain {topic}\" m local\n",
    ));
    assert_eq!(state.pending_ai.as_ref().unwrap().prompt, "explain rust");
}

#[test]
fn do_model_must_be_a_model_binding() {
    let state = run("let m = 1\nlet r = do \"hi\" m default");
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.error.unwrap().kind, vibe::ErrorKind::TypeError);
}

#[test]
fn local_context_carries_current_frame_entries_without_models() {
    let state = run(concat!(
        "model m = { name: \"x\" }\n",
        "let a = 1\n",
        "let r = do \"hi\" m local\n",
    ));
    let context = &state.pending_ai.as_ref().unwrap().context;
    assert_eq!(context.len(), 1, "model bindings are skipped: {context:?}");
    assert!(matches!(&context[0].entry, FrameEntry::Variable { name, .. } if name == "a"));
    assert_eq!(context[0].depth, 0);
}

#[test]
fn context_variable_spec_uses_the_array_binding() {
    let state = run(concat!(
        "model m = { name: \"x\" }\n",
        "let notes = [\"one\", \"two\"]\n",
        "let r = do \"hi\" m notes\n",
    ));
    let context = &state.pending_ai.as_ref().unwrap().context;
    assert_eq!(context.len(), 2);
    assert!(matches!(&context[0].entry, FrameEntry::Summary { text } if text == "one"));
}

#[test]
fn default_context_orders_closest_frame_first() {
    let state = run(concat!(
        "model m = { name: \"x\" }\n",
        "let outer = 1\n",
        "function f(inner: number): text { return do \"go\" m default }\n",
        "let r = f(2)\n",
    ));
    assert_eq!(state.status, Status::AwaitingAi);
    let context = &state.pending_ai.as_ref().unwrap().context;
    assert!(context.len() >= 2, "expected entries from both frames: {context:?}");
    assert_eq!(context[0].frame, "f");
    assert_eq!(context[0].depth, 0);
    assert!(matches!(&context[0].entry, FrameEntry::Variable { name, .. } if name == "inner"));
    assert!(context.iter().any(|e| e.frame == "main" && e.depth == 1));
}

#[test]
fn ai_history_is_recorded_when_enabled() {
    let program = parse(
        "model m = { name: \"x\" }\nlet r = do \"hi\" m default",
        "test.vibe",
    )
    .unwrap();
    let state = RuntimeState::new(
        program,
        EngineOptions {
            log_ai_interactions: true,
            ..EngineOptions::default()
        },
    )
    .run_until_pause();
    let state = state
        .resume_with_ai_response("hello", Some("raw log".to_owned()), None)
        .unwrap();
    assert_eq!(state.ai_history.len(), 1);
    assert_eq!(state.ai_history[0].kind, "do");
    assert_eq!(state.ai_history[0].response, "hello");
    assert_eq!(state.ai_history[0].interaction.as_deref(), Some("raw log"));
}

// === vibe & tools ===

const TOOL_PROGRAM: &str = concat!(
    "tool lookup(query: text): text\n",
    "  @description \"Search the knowledge base\"\n",
    "  @param query \"free-text query\"\n",
    "  { return kb.search(query); }\n",
    "model m = { name: \"x\", tools: [lookup] }\n",
    "let found = vibe \"find things\" m\n",
);

#[test]
fn vibe_suspends_with_scope_params() {
    let state = run("model m = { name: \"x\" }\nlet count = 3\nlet r = vibe \"go\" m");
    assert_eq!(state.status, Status::AwaitingAi);
    let pending = state.pending_ai.as_ref().unwrap();
    assert_eq!(pending.kind, AiKind::Vibe);
    let params = pending.vibe_scope_params.as_ref().unwrap();
    assert_eq!(params.len(), 1, "model bindings are excluded: {params:?}");
    assert_eq!(params[0].name, "count");
    assert_eq!(params[0].ty, "number");
    assert_eq!(params[0].value, Value::Number(3.0));
}

#[test]
fn tool_declaration_registers_schema() {
    let state = run(TOOL_PROGRAM);
    let spec = &state.tools["lookup"];
    assert_eq!(spec.description, "Search the knowledge base");
    assert_eq!(spec.params.len(), 1);
    assert_eq!(spec.params[0].description.as_deref(), Some("free-text query"));
    let schema = spec.schema_json();
    assert_eq!(schema["parameters"]["properties"]["query"]["type"], "string");
}

#[test]
fn model_tools_field_resolves_declared_tools() {
    let state = run(TOOL_PROGRAM);
    let Value::Model(handle) = state.call_stack[0].locals["m"].value.clone() else {
        panic!("expected a model binding");
    };
    assert_eq!(handle.tools, ["lookup"]);
}

#[test]
fn tool_round_trip_returns_to_awaiting_ai_with_the_round_recorded() {
    let state = run(TOOL_PROGRAM);
    assert_eq!(state.status, Status::AwaitingAi);
    let mut args = IndexMap::new();
    args.insert("query".to_owned(), Value::Text("rust".to_owned()));
    let state = state.begin_tool_call("lookup", "call-1", args).unwrap();
    assert_eq!(state.status, Status::AwaitingTool);
    assert_eq!(state.occupied_pending_slots(), 1, "pending_ai moved into pending_tool");
    let pending = state.pending_tool.as_ref().unwrap();
    assert_eq!(pending.name, "lookup");
    assert_eq!(pending.tool_call_id, "call-1");
    assert!(pending.executor.body.contains("kb.search"));

    let state = state
        .resume_with_tool_result(Ok(Value::Text("found it".to_owned())))
        .unwrap();
    assert_eq!(state.status, Status::AwaitingAi);
    let rounds = &state.pending_ai.as_ref().unwrap().tool_rounds;
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].result, Some(Value::Text("found it".to_owned())));

    let state = state.resume_with_ai_response("done", None, None).unwrap().run_until_pause();
    assert_eq!(state.status, Status::Completed);
    // The prompt entry embeds the tool rounds before the response.
    let last = state.call_stack[0].ordered_entries.last().unwrap();
    let FrameEntry::Prompt {
        ai_type: PromptKind::Vibe,
        tool_calls,
        response,
        ..
    } = last
    else {
        panic!("expected a vibe prompt entry, got {last:?}");
    };
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].name, "lookup");
    assert_eq!(response.as_deref(), Some("done"));
}

#[test]
fn tool_errors_are_recorded_in_the_round() {
    let state = run(TOOL_PROGRAM);
    let state = state
        .begin_tool_call("lookup", "call-1", IndexMap::new())
        .unwrap()
        .resume_with_tool_result(Err("index offline".to_owned()))
        .unwrap();
    let rounds = &state.pending_ai.as_ref().unwrap().tool_rounds;
    assert_eq!(rounds[0].error.as_deref(), Some("index offline"));
    assert_eq!(rounds[0].result, None);
}

#[test]
fn begin_tool_call_rejects_unknown_tools() {
    let state = run(TOOL_PROGRAM);
    let err = state.begin_tool_call("nope", "call-1", IndexMap::new()).unwrap_err();
    assert!(err.message.contains("'nope'"));
}

#[test]
fn tools_are_not_callable_from_user_code() {
    let source = concat!(
        "tool lookup(query: text): text @description \"d\" { return 1; }\n",
        "let r = lookup(\"x\")\n",
    );
    let state = run(source);
    assert_eq!(state.status, Status::Error);
    let err = state.error.unwrap();
    assert_eq!(err.kind, vibe::ErrorKind::RuntimeError);
    assert!(err.message.contains("'lookup'"));
}

#[test]
fn ai_result_exposes_tool_calls_through_member_access() {
    let source = concat!(
        "tool lookup(query: text): text @description \"d\" { return kb.search(query); }\n",
        "model m = { name: \"x\", tools: [lookup] }\n",
        "let found = vibe \"find\" m\n",
        "let calls = found.toolCalls\n",
        "let plain = found.value\n",
    );
    let state = run(source);
    let mut args = IndexMap::new();
    args.insert("query".to_owned(), Value::Text("q".to_owned()));
    let state = state
        .begin_tool_call("lookup", "id-1", args)
        .unwrap()
        .resume_with_tool_result(Ok(Value::Text("hit".to_owned())))
        .unwrap()
        .resume_with_ai_response("done", None, None)
        .unwrap()
        .run_until_pause();
    assert_eq!(state.status, Status::Completed);
    let Value::Array(calls) = global(&state, "calls") else {
        panic!("toolCalls should be an array");
    };
    assert_eq!(calls.len(), 1);
    assert_eq!(global(&state, "plain"), Value::Text("done".to_owned()));
}

// === ask ===

#[test]
fn ask_suspends_for_user_input() {
    let state = run("let name = ask \"Who goes there?\"");
    assert_eq!(state.status, Status::AwaitingUser);
    assert_eq!(state.pending_user.as_ref().unwrap().prompt, "Who goes there?");
    let state = state.resume_with_user_input("Ada").unwrap().run_until_pause();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "name"), Value::Text("Ada".to_owned()));
    assert_eq!(state.call_stack[0].locals["name"].source, VarSource::User);
    let last = state.call_stack[0].ordered_entries.last().unwrap();
    assert!(matches!(
        last,
        FrameEntry::Prompt { ai_type: PromptKind::Ask, response: Some(r), .. } if r == "Ada"
    ));
}

// === host escapes ===

#[test]
fn host_escape_suspends_with_resolved_captures() {
    let state = run("let a = 2\nlet b = ts (a) { return a * 2; }");
    assert_eq!(state.status, Status::AwaitingHost);
    let pending = state.pending_host.as_ref().unwrap();
    assert_eq!(pending.params, ["a"]);
    assert_eq!(pending.param_values, [Value::Number(2.0)]);
    assert_eq!(pending.body, "return a * 2;");
    let state = state.resume_with_host_result(Value::Number(4.0)).unwrap().run_until_pause();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "b"), Value::Number(4.0));
}

#[test]
fn host_results_cannot_bind_non_finite_numbers() {
    let state = run("let b = ts { return 1 / 0; }");
    assert_eq!(state.status, Status::AwaitingHost);
    let state = state
        .resume_with_host_result(Value::Number(f64::INFINITY))
        .unwrap()
        .run_until_pause();
    assert_eq!(state.status, Status::Error);
    let err = state.error.unwrap();
    assert_eq!(err.kind, vibe::ErrorKind::TypeError);
    assert!(err.message.contains("'b'"), "message should name the binding: {err}");
}

#[test]
fn host_escape_with_undefined_capture_is_a_reference_error() {
    let state = run("let b = ts (missing) { return missing; }");
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.error.unwrap().kind, vibe::ErrorKind::ReferenceError);
}

// === resume validation ===

#[test]
fn resume_with_wrong_status_raises_to_the_embedder() {
    let completed = run("let x = 1");
    let err = completed.resume_with_ai_response("hi", None, None).unwrap_err();
    assert!(err.message.contains("awaiting_ai"), "message should name the expected status: {err}");
}

#[test]
fn pause_and_resume_round_trip() {
    let state = start("let x = 1\nlet y = 2").step_n(2);
    let paused = state.pause_execution().unwrap();
    assert_eq!(paused.status, Status::Paused);
    // A paused state does not advance.
    let still_paused = paused.step();
    assert_eq!(still_paused.status, Status::Paused);
    let state = still_paused.resume_execution().unwrap().run_until_pause();
    assert_eq!(state.status, Status::Completed);
}

#[test]
fn pause_requires_a_running_state() {
    let completed = run("let x = 1");
    assert!(completed.pause_execution().is_err());
}

// === pending-slot invariants ===

#[test]
fn exactly_one_pending_slot_per_awaiting_status() {
    let ai = run("model m = { name: \"x\" }\nlet r = do \"hi\" m default");
    assert_eq!((ai.status, ai.occupied_pending_slots()), (Status::AwaitingAi, 1));

    let user = run("let r = ask \"q\"");
    assert_eq!((user.status, user.occupied_pending_slots()), (Status::AwaitingUser, 1));

    let host = run("let r = ts { return 1; }");
    assert_eq!((host.status, host.occupied_pending_slots()), (Status::AwaitingHost, 1));

    let compress = run("model m = { name: \"x\" }\nfor i in 2 { let y = i } compress(\"s\", m)");
    assert_eq!(
        (compress.status, compress.occupied_pending_slots()),
        (Status::AwaitingCompress, 1)
    );
}

#[test]
fn resumed_states_have_no_occupied_slots() {
    let state = run("model m = { name: \"x\" }\nlet r = do \"hi\" m default")
        .resume_with_ai_response("ok", None, None)
        .unwrap();
    assert_eq!(state.occupied_pending_slots(), 0);
    let state = state.run_until_pause();
    assert_eq!(state.occupied_pending_slots(), 0);
}

// === snapshots ===

#[test]
fn suspended_state_round_trips_through_binary_snapshots() {
    let state = run("model m = { name: \"x\" }\nlet a = 1\nlet r = do \"hi {a}\" m local");
    assert_eq!(state.status, Status::AwaitingAi);
    let bytes = state.dump().unwrap();
    let restored = RuntimeState::load(&bytes).unwrap();
    assert_eq!(state, restored);
    // The restored state resumes exactly like the original.
    let finished = restored
        .resume_with_ai_response("hello", None, None)
        .unwrap()
        .run_until_pause();
    assert_eq!(finished.status, Status::Completed);
    assert_eq!(global(&finished, "r"), Value::Text("hello".to_owned()));
}

#[test]
fn determinism_same_inputs_same_states() {
    let source = "model m = { name: \"x\" }\nlet r = do \"hi\" m default";
    let a = run(source).resume_with_ai_response("ok", None, None).unwrap().run_until_pause();
    let b = run(source).resume_with_ai_response("ok", None, None).unwrap().run_until_pause();
    assert_eq!(a, b);
}
