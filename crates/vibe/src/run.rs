//! The embedder-facing API.
//!
//! The embedder drives progress by stepping the machine and fulfilling the
//! typed pending request whenever the status moves to an `awaiting_*`
//! variant. Every resume validates the status/pending pair and returns an
//! error to the embedder directly (never through the state) on mismatch.

use crate::{
    ast::AiKind,
    context::apply_summary,
    error::{EngineError, RunResult},
    frame::{FrameEntry, PromptKind, VarSource},
    instruction::{InstrKind, Instruction},
    machine::{step, step_traced},
    state::{AiInteraction, PendingTool, RuntimeState, Status},
    tracer::StepTracer,
    value::{AiResultValue, ToolCallRecord, Value},
};

impl RuntimeState {
    /// Executes exactly one instruction; see [`crate::machine::step`].
    #[must_use]
    pub fn step(self) -> Self {
        step(self)
    }

    /// Executes up to `n` instructions, stopping early when the status leaves
    /// `running`.
    #[must_use]
    pub fn step_n(mut self, n: usize) -> Self {
        for _ in 0..n {
            if self.status != Status::Running {
                break;
            }
            self = step(self);
        }
        self
    }

    /// Steps until the status leaves `running` (suspension, completion, or
    /// error).
    #[must_use]
    pub fn run_until_pause(mut self) -> Self {
        while self.status == Status::Running {
            self = step(self);
        }
        self
    }

    /// [`RuntimeState::run_until_pause`] with a tracer hooked into dispatch.
    #[must_use]
    pub fn run_until_pause_traced(mut self, tracer: &mut impl StepTracer) -> Self {
        while self.status == Status::Running {
            self = step_traced(self, tracer);
        }
        self
    }

    /// Advances until the predicate holds for the next instruction, the
    /// status leaves `running`, or the program completes. The matched
    /// instruction is not executed.
    #[must_use]
    pub fn step_until(mut self, predicate: impl Fn(&Self, &Instruction) -> bool) -> Self {
        loop {
            if self.status != Status::Running {
                return self;
            }
            match self.instruction_stack.front() {
                Some(next) if predicate(&self, next) => return self,
                Some(_) => {}
                // An empty stack completes on the next step.
                None => {}
            }
            self = step(self);
        }
    }

    /// Advances until the next instruction lowers a statement of the given
    /// form (e.g. `"let"`, `"for"`, `"return"`).
    #[must_use]
    pub fn step_until_statement(self, statement: &str) -> Self {
        self.step_until(|_, instruction| {
            matches!(&instruction.kind, InstrKind::ExecStmt(stmt) if stmt.kind.name() == statement)
        })
    }

    /// Advances until the next instruction's opcode name matches (e.g.
    /// `"ai_call"`, `"call_function"`).
    #[must_use]
    pub fn step_until_op(self, op: &str) -> Self {
        self.step_until(|_, instruction| instruction.kind.name() == op)
    }

    /// Manual pause; only a `running` state can be paused.
    ///
    /// # Errors
    /// Returns an error if the status is not `running`.
    pub fn pause_execution(mut self) -> RunResult<Self> {
        self.require_status(Status::Running, "pause_execution")?;
        self.status = Status::Paused;
        Ok(self)
    }

    /// Resumes a manually paused state.
    ///
    /// # Errors
    /// Returns an error if the status is not `paused`.
    pub fn resume_execution(mut self) -> RunResult<Self> {
        self.require_status(Status::Paused, "resume_execution")?;
        self.status = Status::Running;
        Ok(self)
    }

    /// Fulfills an `awaiting_ai` suspension with the model's final response.
    ///
    /// The completed prompt entry is appended to the current frame with the
    /// tool-call log embedded inline, preserving the order
    /// "prompt → tool calls → response".
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_ai`.
    pub fn resume_with_ai_response(
        mut self,
        response: impl Into<String>,
        interaction: Option<String>,
        tool_rounds: Option<Vec<ToolCallRecord>>,
    ) -> RunResult<Self> {
        self.require_status(Status::AwaitingAi, "resume_with_ai_response")?;
        let pending = self
            .pending_ai
            .take()
            .ok_or_else(|| EngineError::runtime("awaiting_ai state without a pending AI request"))?;
        let response = response.into();
        let mut rounds = pending.tool_rounds;
        rounds.extend(tool_rounds.unwrap_or_default());
        let ai_type = match pending.kind {
            AiKind::Do => PromptKind::Do,
            AiKind::Vibe => PromptKind::Vibe,
        };
        self.current_frame_mut().ordered_entries.push(FrameEntry::Prompt {
            ai_type,
            prompt: pending.prompt.clone(),
            tool_calls: rounds.clone(),
            response: Some(response.clone()),
        });
        if self.options.log_ai_interactions {
            self.ai_history.push(AiInteraction {
                kind: pending.kind.to_string(),
                prompt: pending.prompt,
                model: pending.model,
                response: response.clone(),
                interaction,
            });
        }
        self.last_result = AiResultValue::wrap(Value::Text(response), rounds);
        self.last_result_source = VarSource::Ai;
        self.status = Status::Running;
        Ok(self)
    }

    /// Fulfills an `awaiting_user` suspension with the user's input.
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_user`.
    pub fn resume_with_user_input(mut self, input: impl Into<String>) -> RunResult<Self> {
        self.require_status(Status::AwaitingUser, "resume_with_user_input")?;
        let pending = self
            .pending_user
            .take()
            .ok_or_else(|| EngineError::runtime("awaiting_user state without a pending request"))?;
        let input = input.into();
        self.current_frame_mut().ordered_entries.push(FrameEntry::Prompt {
            ai_type: PromptKind::Ask,
            prompt: pending.prompt,
            tool_calls: Vec::new(),
            response: Some(input.clone()),
        });
        self.last_result = Value::Text(input);
        self.last_result_source = VarSource::User;
        self.status = Status::Running;
        Ok(self)
    }

    /// Fulfills an inline host-escape suspension with the evaluated value.
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_host`.
    pub fn resume_with_host_result(mut self, value: Value) -> RunResult<Self> {
        self.require_status(Status::AwaitingHost, "resume_with_host_result")?;
        self.pending_host = None;
        self.last_result = value;
        self.last_result_source = VarSource::None;
        self.status = Status::Running;
        Ok(self)
    }

    /// Fulfills an imported host-function suspension with the return value.
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_imported_host_call`.
    pub fn resume_with_imported_host_result(mut self, value: Value) -> RunResult<Self> {
        self.require_status(Status::AwaitingImportedHostCall, "resume_with_imported_host_result")?;
        self.pending_imported_host_call = None;
        self.last_result = value;
        self.last_result_source = VarSource::None;
        self.status = Status::Running;
        Ok(self)
    }

    /// Reports a model-initiated tool invocation during a `vibe` interaction.
    ///
    /// The outstanding AI request moves inside the new `pending_tool` and is
    /// restored (with this round appended) by
    /// [`RuntimeState::resume_with_tool_result`].
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_ai`, the interaction
    /// is not a `vibe` call, or the tool is not registered.
    pub fn begin_tool_call(
        mut self,
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        args: indexmap::IndexMap<String, Value>,
    ) -> RunResult<Self> {
        self.require_status(Status::AwaitingAi, "begin_tool_call")?;
        let pending = self
            .pending_ai
            .take()
            .ok_or_else(|| EngineError::runtime("awaiting_ai state without a pending AI request"))?;
        if pending.kind != AiKind::Vibe {
            self.pending_ai = Some(pending);
            return Err(EngineError::runtime("Tools are only available during 'vibe' calls"));
        }
        let name = name.into();
        let Some(spec) = self.tools.get(&name) else {
            self.pending_ai = Some(pending);
            return Err(EngineError::runtime(format!("Tool '{name}' is not declared")));
        };
        let executor = spec.executor.clone();
        self.pending_tool = Some(PendingTool {
            name,
            tool_call_id: tool_call_id.into(),
            args,
            executor,
            resume: pending,
        });
        self.status = Status::AwaitingTool;
        Ok(self)
    }

    /// Fulfills an `awaiting_tool` suspension with the executor's result (or
    /// error), returning to `awaiting_ai` with the round recorded.
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_tool`.
    pub fn resume_with_tool_result(mut self, result: Result<Value, String>) -> RunResult<Self> {
        self.require_status(Status::AwaitingTool, "resume_with_tool_result")?;
        let pending = self
            .pending_tool
            .take()
            .ok_or_else(|| EngineError::runtime("awaiting_tool state without a pending request"))?;
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        let mut resume = pending.resume;
        resume.tool_rounds.push(ToolCallRecord {
            name: pending.name,
            tool_call_id: pending.tool_call_id,
            args: pending.args,
            result,
            error,
        });
        self.pending_ai = Some(resume);
        self.status = Status::AwaitingAi;
        Ok(self)
    }

    /// Fulfills an `awaiting_compress` suspension with the summary text. The
    /// compressed scope's entries are replaced by exactly three:
    /// `scope_enter`, `summary`, `scope_exit`.
    ///
    /// # Errors
    /// Returns an error if the status is not `awaiting_compress`.
    pub fn resume_with_compress_result(mut self, summary: impl Into<String>) -> RunResult<Self> {
        self.require_status(Status::AwaitingCompress, "resume_with_compress_result")?;
        let pending = self
            .pending_compress
            .take()
            .ok_or_else(|| EngineError::runtime("awaiting_compress state without a pending request"))?;
        let summary = summary.into();
        if self.options.log_ai_interactions {
            self.ai_history.push(AiInteraction {
                kind: "compress".to_owned(),
                prompt: pending.prompt.clone().unwrap_or_default(),
                model: pending.model.clone(),
                response: summary.clone(),
                interaction: None,
            });
        }
        apply_summary(
            self.current_frame_mut(),
            pending.entry_index,
            pending.scope_kind,
            pending.label,
            summary,
        );
        self.status = Status::Running;
        Ok(self)
    }

    fn require_status(&self, expected: Status, what: &str) -> RunResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(EngineError::runtime(format!(
                "{what} requires status {expected}, found {}",
                self.status
            )))
        }
    }
}
