use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use vibe::{
    load_imports, parse, EngineOptions, FsModuleSource, NoHostModules, RuntimeState, Status, Value,
};

const USAGE: &str = "usage: vibe <file.vibe> [--ai-response TEXT] [--trace]";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut file_path = None;
    let mut ai_response = None;
    let mut trace = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ai-response" => match iter.next() {
                Some(text) => ai_response = Some(text),
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::FAILURE;
                }
            },
            "--trace" => trace = true,
            _ => file_path = Some(arg),
        }
    }
    let Some(file_path) = file_path else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let code = match fs::read_to_string(&file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: cannot read '{file_path}': {err}");
            return ExitCode::FAILURE;
        }
    };
    let program = match parse(&code, &file_path) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };
    let options = EngineOptions {
        trace_execution: trace,
        ..EngineOptions::default()
    };
    let state = RuntimeState::new(program, options);
    let mut state = match load_imports(state, &file_path, &FsModuleSource, &NoHostModules) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };

    // Answer every suspension point until the program settles.
    loop {
        state = state.run_until_pause();
        let next = match state.status {
            Status::Completed => {
                println!("{}", state.last_result.render());
                return ExitCode::SUCCESS;
            }
            Status::Error => {
                match state.error {
                    Some(err) => eprintln!("error:\n{err}"),
                    None => eprintln!("error: execution failed"),
                }
                return ExitCode::FAILURE;
            }
            Status::AwaitingAi => {
                let pending = state.pending_ai.clone().expect("awaiting_ai carries a request");
                eprintln!("[ai] {} \"{}\" -> model {}", pending.kind, pending.prompt, pending.model);
                // Without a provider we echo the prompt (or a canned reply).
                let response = ai_response
                    .clone()
                    .unwrap_or_else(|| format!("(mock response to: {})", pending.prompt));
                state.resume_with_ai_response(response, None, None)
            }
            Status::AwaitingUser => {
                let pending = state.pending_user.clone().expect("awaiting_user carries a request");
                eprint!("{} ", pending.prompt);
                io::stderr().flush().ok();
                let mut line = String::new();
                if io::stdin().lock().read_line(&mut line).is_err() {
                    line.clear();
                }
                state.resume_with_user_input(line.trim_end().to_owned())
            }
            Status::AwaitingHost => {
                let pending = state.pending_host.clone().expect("awaiting_host carries a request");
                eprintln!("[host] cannot evaluate host block ({} lines); returning null", pending.body.lines().count());
                state.resume_with_host_result(Value::Null)
            }
            Status::AwaitingImportedHostCall => {
                let pending = state
                    .pending_imported_host_call
                    .clone()
                    .expect("awaiting_imported_host_call carries a request");
                eprintln!("[host] cannot call imported '{}'; returning null", pending.name);
                state.resume_with_imported_host_result(Value::Null)
            }
            Status::AwaitingTool => {
                let pending = state.pending_tool.clone().expect("awaiting_tool carries a request");
                eprintln!("[tool] cannot execute '{}'; reporting an error", pending.name);
                state.resume_with_tool_result(Err("tool execution unavailable in the CLI".to_owned()))
            }
            Status::AwaitingCompress => {
                let pending = state
                    .pending_compress
                    .clone()
                    .expect("awaiting_compress carries a request");
                // Stand-in summary: first rendered entry plus a count.
                let summary = format!("{} entries compressed", pending.entries_to_summarize.len());
                state.resume_with_compress_result(summary)
            }
            Status::Running | Status::Paused => unreachable!("run_until_pause only stops on non-running statuses"),
        };
        state = match next {
            Ok(state) => state,
            Err(err) => {
                eprintln!("error:\n{err}");
                return ExitCode::FAILURE;
            }
        };
    }
}
