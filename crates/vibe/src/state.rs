//! Execution state.
//!
//! `RuntimeState` owns everything: the program, the call/instruction/value
//! stacks, registries, pending-request slots, and the captured error. It is a
//! plain value -- cloneable, comparable, fully serializable -- so an execution
//! can be snapshotted at any suspension point and restored later.

use std::collections::VecDeque;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    ast::{AiKind, FunctionDecl, HostEscape, Program, StmtKind},
    context::ContextEntry,
    error::{CodeLoc, EngineError},
    frame::{FrameEntry, ScopeKind, StackFrame, VarSource},
    instruction::{InstrKind, Instruction},
    modules::{HostModule, ImportedName, SourceModule},
    tools::ToolSpec,
    value::{ToolCallRecord, Value},
};

/// Execution status. Exactly one `pending_*` slot is occupied iff the status
/// is the corresponding `awaiting_*` variant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Running,
    Paused,
    AwaitingAi,
    AwaitingUser,
    AwaitingHost,
    AwaitingImportedHostCall,
    AwaitingTool,
    AwaitingCompress,
    Completed,
    Error,
}

impl Status {
    /// True for `completed` and `error`: `step` is the identity on these.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Engine construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Record every AI interaction into `ai_history`.
    pub log_ai_interactions: bool,
    /// Record one line per executed instruction into `execution_log`.
    pub trace_execution: bool,
    /// Advisory root directory passed through to tool implementations.
    pub root_dir: Option<String>,
    /// Maximum call stack depth before a `RuntimeError`.
    pub max_call_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            log_ai_interactions: false,
            trace_execution: false,
            root_dir: None,
            max_call_depth: 200,
        }
    }
}

/// A visible variable handed to the external agent for a `vibe` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeParam {
    pub name: String,
    pub ty: String,
    pub value: Value,
}

/// A pending AI request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAi {
    pub kind: AiKind,
    pub prompt: String,
    /// The model *binding* name (the identifier in the program).
    pub model: String,
    pub context: Vec<ContextEntry>,
    /// For `vibe`: every visible non-model variable in the current frame.
    pub vibe_scope_params: Option<Vec<ScopeParam>>,
    /// The `vibe` cache flag, passed through to provider adapters.
    pub cache: bool,
    /// Tool rounds accumulated through `begin_tool_call` /
    /// `resume_with_tool_result` while this request was outstanding.
    pub tool_rounds: Vec<ToolCallRecord>,
}

/// A pending `ask` (user input) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUser {
    pub prompt: String,
}

/// A pending inline host-language escape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHost {
    pub params: Vec<String>,
    pub body: String,
    /// Values of `params`, resolved through the scope chain at suspension.
    pub param_values: Vec<Value>,
}

/// A pending imported host-function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingImportedHostCall {
    pub name: String,
    pub args: Vec<Value>,
}

/// A pending tool execution requested by a model during a `vibe` interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTool {
    pub name: String,
    pub tool_call_id: String,
    pub args: indexmap::IndexMap<String, Value>,
    /// The host escape the embedder runs to produce the result.
    pub executor: HostEscape,
    /// The AI request this tool call interrupted; restored (with the round
    /// appended) by `resume_with_tool_result`.
    pub resume: PendingAi,
}

/// A pending scope-exit compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCompress {
    /// Summarization prompt; `None` selects the embedder's default.
    pub prompt: Option<String>,
    /// Model binding name.
    pub model: String,
    pub entries_to_summarize: Vec<FrameEntry>,
    /// Index of the scope's `scope_enter` entry in the current frame.
    pub entry_index: usize,
    pub scope_kind: ScopeKind,
    pub label: Option<String>,
}

/// One logged AI interaction (enabled by `log_ai_interactions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInteraction {
    pub kind: String,
    pub prompt: String,
    pub model: String,
    pub response: String,
    /// Raw interaction log supplied by the embedder, if any.
    pub interaction: Option<String>,
}

/// The complete execution state of one program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: Status,
    pub program: Program,
    /// Top-level (and exported) function declarations, collected at
    /// construction.
    pub functions: AHashMap<String, FunctionDecl>,
    /// The per-state tool registry, populated by `tool` declarations.
    pub tools: AHashMap<String, ToolSpec>,
    /// Host-language modules, keyed by resolved path.
    pub ts_modules: AHashMap<String, HostModule>,
    /// Same-language modules, keyed by resolved path.
    pub source_modules: AHashMap<String, SourceModule>,
    /// Flat map from local binding name to its import origin.
    pub imported_names: AHashMap<String, ImportedName>,
    pub call_stack: Vec<StackFrame>,
    /// Consumed from the front; handlers prepend.
    pub instruction_stack: VecDeque<Instruction>,
    pub value_stack: Vec<Value>,
    pub last_result: Value,
    /// How `last_result` was produced (`ai` after an AI response, `user`
    /// after user input).
    pub last_result_source: VarSource,
    pub ai_history: Vec<AiInteraction>,
    pub execution_log: Vec<String>,
    /// Rebuilt from the call stack before each step.
    pub local_context: Vec<ContextEntry>,
    pub global_context: Vec<ContextEntry>,
    pub pending_ai: Option<PendingAi>,
    pub pending_user: Option<PendingUser>,
    pub pending_compress: Option<PendingCompress>,
    pub pending_host: Option<PendingHost>,
    pub pending_imported_host_call: Option<PendingImportedHostCall>,
    pub pending_tool: Option<PendingTool>,
    /// Binding name of the most recently used model; `compress` falls back to
    /// it when no model argument is given.
    pub last_used_model: Option<String>,
    /// Advisory root directory for tool implementations.
    pub root_dir: Option<String>,
    pub error: Option<EngineError>,
    pub options: EngineOptions,
}

impl RuntimeState {
    /// Builds the initial state for a parsed program: one entry frame and a
    /// single instruction driving the top-level statement list.
    #[must_use]
    pub fn new(program: Program, options: EngineOptions) -> Self {
        let functions = collect_functions(&program);
        let mut instruction_stack = VecDeque::new();
        if program.statements.is_empty() {
            // Nothing to run; the first step observes the empty stack.
        } else {
            instruction_stack.push_back(Instruction::new(
                InstrKind::ExecStmts {
                    stmts: program.statements.clone(),
                    index: 0,
                },
                CodeLoc::synthetic(),
            ));
        }
        Self {
            status: Status::Running,
            program,
            functions,
            tools: AHashMap::new(),
            ts_modules: AHashMap::new(),
            source_modules: AHashMap::new(),
            imported_names: AHashMap::new(),
            call_stack: vec![StackFrame::new("main", None)],
            instruction_stack,
            value_stack: Vec::new(),
            last_result: Value::Null,
            last_result_source: VarSource::None,
            ai_history: Vec::new(),
            execution_log: Vec::new(),
            local_context: Vec::new(),
            global_context: Vec::new(),
            pending_ai: None,
            pending_user: None,
            pending_compress: None,
            pending_host: None,
            pending_imported_host_call: None,
            pending_tool: None,
            last_used_model: None,
            root_dir: options.root_dir.clone(),
            error: None,
            options,
        }
    }

    /// Builds an initial state with embedder-provided input bindings
    /// pre-declared in the entry frame.
    ///
    /// Inputs behave like ordinary `let` bindings: they are validated by
    /// inference, snapshotted into the frame's entry log, and visible to the
    /// whole program.
    ///
    /// # Errors
    /// Returns an error if an input value fails validation.
    pub fn with_inputs(
        program: Program,
        options: EngineOptions,
        inputs: Vec<(String, Value)>,
    ) -> crate::error::RunResult<Self> {
        let mut state = Self::new(program, options);
        for (name, value) in inputs {
            let (value, ty_display) = crate::validate::validate_and_coerce(value, None, &name)?;
            state.current_frame_mut().record_binding(
                &name,
                crate::frame::Variable {
                    value,
                    is_const: false,
                    declared_type: None,
                    source: VarSource::None,
                },
                ty_display,
            );
        }
        Ok(state)
    }

    /// The innermost frame. The call stack is never empty while the machine
    /// is live, so this panics only on a corrupted state.
    #[must_use]
    pub fn current_frame(&self) -> &StackFrame {
        self.call_stack.last().expect("call stack is never empty")
    }

    pub fn current_frame_mut(&mut self) -> &mut StackFrame {
        self.call_stack.last_mut().expect("call stack is never empty")
    }

    /// Number of occupied `pending_*` slots; at most one on any reachable
    /// state.
    #[must_use]
    pub fn occupied_pending_slots(&self) -> usize {
        usize::from(self.pending_ai.is_some())
            + usize::from(self.pending_user.is_some())
            + usize::from(self.pending_compress.is_some())
            + usize::from(self.pending_host.is_some())
            + usize::from(self.pending_imported_host_call.is_some())
            + usize::from(self.pending_tool.is_some())
    }

    /// Serializes the state to a binary snapshot.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a state from a binary snapshot produced by `dump()`.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Constructs an initial state; alias for [`RuntimeState::new`].
#[must_use]
pub fn initial_state(program: Program, options: EngineOptions) -> RuntimeState {
    RuntimeState::new(program, options)
}

fn collect_functions(program: &Program) -> AHashMap<String, FunctionDecl> {
    let mut functions = AHashMap::new();
    for stmt in &program.statements {
        let kind = match &stmt.kind {
            StmtKind::Export(inner) => &inner.kind,
            other => other,
        };
        if let StmtKind::Function(decl) = kind {
            functions.insert(decl.name.clone(), decl.clone());
        }
    }
    functions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_entry_frame_and_running_status() {
        let state = RuntimeState::new(Program::default(), EngineOptions::default());
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.call_stack.len(), 1);
        assert_eq!(state.current_frame().name, "main");
        assert_eq!(state.occupied_pending_slots(), 0);
    }

    #[test]
    fn status_serializes_in_snake_case() {
        assert_eq!(Status::AwaitingAi.to_string(), "awaiting_ai");
        assert_eq!(
            "awaiting_imported_host_call".parse::<Status>().unwrap(),
            Status::AwaitingImportedHostCall
        );
    }

    #[test]
    fn empty_state_round_trips_through_postcard() {
        let state = RuntimeState::new(Program::default(), EngineOptions::default());
        let bytes = state.dump().unwrap();
        let restored = RuntimeState::load(&bytes).unwrap();
        assert_eq!(state, restored);
    }
}
