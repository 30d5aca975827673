//! Behavioral tests for the core engine: expressions, statements, functions,
//! strict typing, and the error taxonomy.

use pretty_assertions::assert_eq;
use vibe::{parse, EngineOptions, ErrorKind, RuntimeState, Status, Value};

fn start(source: &str) -> RuntimeState {
    let program = parse(source, "test.vibe").unwrap();
    RuntimeState::new(program, EngineOptions::default())
}

fn run(source: &str) -> RuntimeState {
    start(source).run_until_pause()
}

/// Value of a binding in the entry frame, unwrapped from any AI result
/// wrapper.
fn global(state: &RuntimeState, name: &str) -> Value {
    state.call_stack[0].locals[name].value.unwrapped().clone()
}

fn expect_error(source: &str, kind: ErrorKind) -> vibe::EngineError {
    let state = run(source);
    assert_eq!(state.status, Status::Error, "expected an error state");
    let err = state.error.expect("error status carries an error value");
    assert_eq!(err.kind, kind, "wrong error kind: {err}");
    err
}

// === Arithmetic & precedence ===

#[test]
fn multiplication_binds_tighter_than_addition() {
    let state = run("let x = 1 + 2 * 3");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "x"), Value::Number(7.0));
}

#[test]
fn parentheses_override_precedence() {
    let state = run("let x = (1 + 2) * 3");
    assert_eq!(global(&state, "x"), Value::Number(9.0));
}

#[test]
fn division_and_modulo() {
    let state = run("let a = 7 / 2\nlet b = 7 % 2");
    assert_eq!(global(&state, "a"), Value::Number(3.5));
    assert_eq!(global(&state, "b"), Value::Number(1.0));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    expect_error("let x = 1 / 0", ErrorKind::RuntimeError);
}

#[test]
fn plus_does_not_concatenate_strings() {
    let err = expect_error("let x = \"a\" + \"b\"", ErrorKind::TypeError);
    assert!(err.message.contains("'+'"), "message should name the operator: {err}");
}

#[test]
fn unary_minus_and_not() {
    let state = run("let a = -3\nlet b = not false");
    assert_eq!(global(&state, "a"), Value::Number(-3.0));
    assert_eq!(global(&state, "b"), Value::Bool(true));
}

// === Comparison & logic ===

#[test]
fn strict_equality_on_primitives() {
    let state = run("let a = 1 == 1\nlet b = \"x\" == \"x\"\nlet c = 1 == 2\nlet d = \"1\" == 1");
    assert_eq!(global(&state, "a"), Value::Bool(true));
    assert_eq!(global(&state, "b"), Value::Bool(true));
    assert_eq!(global(&state, "c"), Value::Bool(false));
    assert_eq!(global(&state, "d"), Value::Bool(false));
}

#[test]
fn comparison_requires_numbers() {
    expect_error("let x = \"a\" < \"b\"", ErrorKind::TypeError);
}

#[test]
fn and_short_circuits_without_evaluating_right() {
    // boom is undefined; evaluating it would be a ReferenceError.
    let state = run("let x = false and boom");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "x"), Value::Bool(false));
}

#[test]
fn or_short_circuits_without_evaluating_right() {
    let state = run("let x = true or boom");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "x"), Value::Bool(true));
}

#[test]
fn logical_operands_must_be_booleans() {
    expect_error("let x = 1 and true", ErrorKind::TypeError);
    expect_error("let x = false or 2", ErrorKind::TypeError);
}

// === Variables, constants, typing ===

#[test]
fn let_infers_and_records_type() {
    let state = run("let x = 1 + 2 * 3");
    let entries = &state.call_stack[0].ordered_entries;
    assert_eq!(entries.len(), 1);
    match &entries[0] {
        vibe::FrameEntry::Variable { name, snapshot, ty, .. } => {
            assert_eq!(name, "x");
            assert_eq!(snapshot, &Value::Number(7.0));
            assert_eq!(ty, "number");
        }
        other => panic!("expected a variable entry, got {other:?}"),
    }
}

#[test]
fn reassignment_updates_value() {
    let state = run("let x = 1\nx = 2\nlet y = x");
    assert_eq!(global(&state, "y"), Value::Number(2.0));
}

#[test]
fn const_reassignment_fails_and_preserves_value() {
    let state = run("const c = 1\nc = 2");
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.error.as_ref().unwrap().kind, ErrorKind::AssignmentError);
    assert_eq!(global(&state, "c"), Value::Number(1.0));
}

#[test]
fn undefined_variable_is_a_reference_error() {
    let err = expect_error("let x = missing", ErrorKind::ReferenceError);
    assert!(err.message.contains("'missing'"));
}

#[test]
fn declared_type_mismatch_names_the_variable() {
    let err = expect_error("let x: number = \"nope\"", ErrorKind::TypeError);
    assert!(err.message.contains("'x'"), "message should name the variable: {err}");
    assert!(err.message.contains("number"));
    assert!(err.message.contains("text"));
}

#[test]
fn json_type_parses_string_initializer() {
    let state = run("let cfg: json = \"[1, 2]\"");
    assert_eq!(
        global(&state, "cfg"),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
    );
}

#[test]
fn array_type_validates_elements() {
    let state = run("const xs: number[] = [1, 2, 3]\nlet s = xs[1]");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "s"), Value::Number(2.0));
    expect_error("const xs: number[] = [1, \"two\"]", ErrorKind::TypeError);
}

// === Strings ===

#[test]
fn string_interpolation_substitutes_scope_names() {
    let state = run("let name = \"Ada\"\nlet s = \"hi {name}\"");
    assert_eq!(global(&state, "s"), Value::Text("hi Ada".to_owned()));
}

#[test]
fn unresolved_placeholders_stay_literal() {
    let state = run("let s = \"hi {missing}\"");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "s"), Value::Text("hi {missing}".to_owned()));
}

#[test]
fn template_literals_use_dollar_syntax() {
    let state = run("let n = 3\nlet s = `count: ${n}, literal: {n}`");
    assert_eq!(global(&state, "s"), Value::Text("count: 3, literal: {n}".to_owned()));
}

// === Indexing & slicing ===

#[test]
fn negative_index_counts_from_the_end() {
    let state = run("let xs = [10, 20, 30]\nlet last = xs[-1]\nlet first = xs[-3]");
    assert_eq!(global(&state, "last"), Value::Number(30.0));
    assert_eq!(global(&state, "first"), Value::Number(10.0));
}

#[test]
fn index_one_past_negative_range_is_out_of_bounds() {
    expect_error("let xs = [10, 20, 30]\nlet x = xs[-4]", ErrorKind::RuntimeError);
}

#[test]
fn string_index_raises_the_canonical_type_error() {
    let err = expect_error("const xs: text[] = [\"a\"]\nlet x = xs[\"0\"]", ErrorKind::TypeError);
    assert_eq!(err.message, "Array index must be an integer");
}

#[test]
fn slice_has_exclusive_end_and_defaults() {
    let state = run(concat!(
        "let xs = [1, 2, 3, 4]\n",
        "let mid = xs[1, 3]\n",
        "let head = xs[, 2]\n",
        "let tail = xs[2,]\n",
    ));
    assert_eq!(
        global(&state, "mid"),
        Value::Array(vec![Value::Number(2.0), Value::Number(3.0)])
    );
    assert_eq!(
        global(&state, "head"),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
    );
    assert_eq!(
        global(&state, "tail"),
        Value::Array(vec![Value::Number(3.0), Value::Number(4.0)])
    );
}

#[test]
fn negative_slice_bounds_normalize_before_clamping() {
    let state = run("let xs = [1, 2, 3, 4]\nlet s = xs[-3, -1]");
    assert_eq!(
        global(&state, "s"),
        Value::Array(vec![Value::Number(2.0), Value::Number(3.0)])
    );
}

#[test]
fn range_builds_inclusive_array() {
    let state = run("let r = 2..5");
    assert_eq!(
        global(&state, "r"),
        Value::Array((2..=5).map(|i| Value::Number(f64::from(i))).collect())
    );
}

#[test]
fn descending_range_is_empty() {
    let state = run("let r = 5..2");
    assert_eq!(global(&state, "r"), Value::Array(vec![]));
}

// === Objects ===

#[test]
fn object_literals_preserve_key_order() {
    let state = run("let o = { z: 1, a: 2 }");
    let Value::Object(fields) = global(&state, "o") else {
        panic!("expected an object");
    };
    let keys: Vec<&String> = fields.keys().collect();
    assert_eq!(keys, ["z", "a"]);
}

#[test]
fn member_access_reads_fields() {
    let state = run("let o = { size: 4 }\nlet s = o.size");
    assert_eq!(global(&state, "s"), Value::Number(4.0));
}

#[test]
fn missing_field_is_a_runtime_error() {
    expect_error("let o = { a: 1 }\nlet x = o.b", ErrorKind::RuntimeError);
}

// === Built-in methods ===

#[test]
fn array_methods_len_push_pop() {
    let state = run(concat!(
        "let xs = [1]\n",
        "xs.push(2)\n",
        "let n = xs.len()\n",
        "let last = xs.pop()\n",
        "let m = xs.len()\n",
    ));
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "n"), Value::Number(2.0));
    assert_eq!(global(&state, "last"), Value::Number(2.0));
    assert_eq!(global(&state, "m"), Value::Number(1.0));
}

#[test]
fn pop_on_empty_array_is_a_runtime_error() {
    expect_error("let xs = []\nlet x = xs.pop()", ErrorKind::RuntimeError);
}

#[test]
fn string_len_counts_characters() {
    let state = run("let s = \"hello\"\nlet n = s.len()");
    assert_eq!(global(&state, "n"), Value::Number(5.0));
}

// === Conditionals ===

#[test]
fn if_takes_the_boolean_branch() {
    let state = run("let x = 0\nif true { x = 1 } else { x = 2 }");
    assert_eq!(global(&state, "x"), Value::Number(1.0));
    let state = run("let x = 0\nif false { x = 1 } else { x = 2 }");
    assert_eq!(global(&state, "x"), Value::Number(2.0));
}

#[test]
fn else_if_chains() {
    let state = run("let x = 2\nlet r = 0\nif x == 1 { r = 1 } else if x == 2 { r = 2 } else { r = 3 }");
    assert_eq!(global(&state, "r"), Value::Number(2.0));
}

#[test]
fn if_condition_must_be_boolean() {
    let err = expect_error("if 1 { }", ErrorKind::TypeError);
    assert!(err.message.contains("'if'"), "message should name the construct: {err}");
}

#[test]
fn while_condition_must_be_boolean() {
    expect_error("while 1 { }", ErrorKind::TypeError);
}

// === Blocks ===

#[test]
fn block_scoped_names_are_dropped_on_exit() {
    let state = run("let a = 1\n{ let b = 2 }\nlet c = b");
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.error.unwrap().kind, ErrorKind::ReferenceError);
}

#[test]
fn blocks_do_not_push_frames() {
    let state = run("{ let b = 2 }");
    assert_eq!(state.call_stack.len(), 1);
    assert_eq!(state.status, Status::Completed);
}

// === Functions ===

#[test]
fn function_call_returns_value_and_destroys_frame() {
    let state = run(concat!(
        "function add(a: number, b: number): number { return a + b }\n",
        "let r = add(2, 5)\n",
    ));
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "r"), Value::Number(7.0));
    assert_eq!(state.call_stack.len(), 1, "callee frame must be destroyed on return");
    // The caller frame gains no entries from the call.
    let entries = &state.call_stack[0].ordered_entries;
    assert_eq!(entries.len(), 1, "only the `r` binding should be recorded");
}

#[test]
fn function_without_return_yields_null() {
    let state = run("function noop() { let x = 1 }\nlet r = noop()");
    assert_eq!(global(&state, "r"), Value::Null);
}

#[test]
fn parameter_types_are_validated() {
    let err = {
        let state = run("function f(n: number) { return n }\nlet r = f(\"text\")");
        assert_eq!(state.status, Status::Error);
        state.error.unwrap()
    };
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("'n'"));
}

#[test]
fn return_type_is_validated() {
    expect_error(
        "function f(): number { return \"nope\" }\nlet r = f()",
        ErrorKind::TypeError,
    );
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    expect_error("function f(a: number) { return a }\nlet r = f()", ErrorKind::RuntimeError);
}

#[test]
fn functions_see_globals_through_the_lexical_chain() {
    let state = run(concat!(
        "let base = 10\n",
        "function bump(n: number): number { return base + n }\n",
        "let r = bump(5)\n",
    ));
    assert_eq!(global(&state, "r"), Value::Number(15.0));
}

#[test]
fn recursion_is_bounded_by_call_depth() {
    let source = "function f(): number { return f() }\nlet r = f()";
    let program = parse(source, "test.vibe").unwrap();
    let state = RuntimeState::new(
        program,
        EngineOptions {
            max_call_depth: 16,
            ..EngineOptions::default()
        },
    )
    .run_until_pause();
    assert_eq!(state.status, Status::Error);
    assert_eq!(state.error.unwrap().kind, ErrorKind::RuntimeError);
}

#[test]
fn calling_a_non_function_is_a_runtime_error() {
    expect_error("let x = 1\nlet r = x()", ErrorKind::RuntimeError);
}

#[test]
fn top_level_return_completes_the_program() {
    let state = run("let x = 1\nreturn 42\nlet y = 2");
    assert_eq!(state.status, Status::Completed);
    assert_eq!(state.last_result.unwrapped(), &Value::Number(42.0));
    assert!(!state.call_stack[0].locals.contains_key("y"));
}

// === Terminal-state discipline ===

#[test]
fn completed_state_has_empty_instruction_stack_and_entry_frame() {
    let state = run("let x = 1");
    assert_eq!(state.status, Status::Completed);
    assert!(state.instruction_stack.is_empty());
    assert_eq!(state.call_stack.len(), 1);
}

#[test]
fn step_is_identity_on_terminal_states() {
    let completed = run("let x = 1");
    assert_eq!(completed.clone().step(), completed);
    let errored = run("let x = missing");
    assert_eq!(errored.clone().step(), errored);
}

#[test]
fn error_carries_the_instruction_location() {
    let state = run("let a = 1\nlet x = missing");
    let err = state.error.unwrap();
    assert_eq!(err.loc.unwrap().line, 2);
}

#[test]
fn empty_program_completes_immediately() {
    let state = run("");
    assert_eq!(state.status, Status::Completed);
}

// === Stepping API ===

#[test]
fn step_n_stops_early_on_suspension() {
    let source = "model m = { name: \"x\" }\nlet r = do \"hi\" m default\nlet after = 1";
    let state = start(source).step_n(10_000);
    assert_eq!(state.status, Status::AwaitingAi);
    assert!(!state.call_stack[0].locals.contains_key("after"));
}

#[test]
fn step_until_statement_stops_before_the_statement_runs() {
    let state = start("let a = 1\nfor i in 2 { let b = i }").step_until_statement("for");
    assert_eq!(state.status, Status::Running);
    assert!(state.call_stack[0].locals.contains_key("a"));
    assert!(!state.call_stack[0].locals.contains_key("i"));
}

#[test]
fn step_until_op_stops_at_the_opcode() {
    let state = start("model m = { name: \"x\" }\nlet r = do \"hi\" m default").step_until_op("ai_call");
    assert_eq!(state.status, Status::Running);
    assert!(state.pending_ai.is_none(), "the ai_call has not executed yet");
}

#[test]
fn embedder_inputs_are_visible_to_the_program() {
    let program = parse("let doubled = seed * 2", "test.vibe").unwrap();
    let state = RuntimeState::with_inputs(
        program,
        EngineOptions::default(),
        vec![("seed".to_owned(), Value::Number(21.0))],
    )
    .unwrap()
    .run_until_pause();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(global(&state, "doubled"), Value::Number(42.0));
}

#[test]
fn embedder_inputs_reject_non_finite_numbers() {
    let program = parse("let doubled = seed * 2", "test.vibe").unwrap();
    let err = RuntimeState::with_inputs(
        program,
        EngineOptions::default(),
        vec![("seed".to_owned(), Value::Number(f64::NAN))],
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("'seed'"), "message should name the input: {err}");
}

#[test]
fn recording_tracer_observes_dispatch_and_completion() {
    let mut tracer = vibe::RecordingTracer::new();
    let state = start("let x = 1").run_until_pause_traced(&mut tracer);
    assert_eq!(state.status, Status::Completed);
    let ops = tracer.ops();
    assert!(ops.contains(&"exec_stmt"), "missing exec_stmt in {ops:?}");
    assert!(ops.contains(&"declare_var"), "missing declare_var in {ops:?}");
    assert!(tracer.events.iter().any(|event| matches!(
        event,
        vibe::TraceEvent::StatusChange {
            new: Status::Completed,
            ..
        }
    )));
}

#[test]
fn execution_log_records_opcodes_when_enabled() {
    let program = parse("let x = 1", "test.vibe").unwrap();
    let state = RuntimeState::new(
        program,
        EngineOptions {
            trace_execution: true,
            ..EngineOptions::default()
        },
    )
    .run_until_pause();
    assert!(state.execution_log.iter().any(|line| line.starts_with("declare_var")));
}
