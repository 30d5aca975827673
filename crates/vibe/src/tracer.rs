//! Step tracing infrastructure.
//!
//! A trait-based hook into the instruction scheduler. The default
//! [`NoopTracer`] compiles away entirely via monomorphization; the other
//! implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Event recording for post-mortem analysis |

use crate::{
    instruction::Instruction,
    state::{RuntimeState, Status},
};

/// Hook points at key scheduler events.
///
/// All methods have empty defaults, so implementations override only what
/// they care about.
pub trait StepTracer {
    /// Called before an instruction is dispatched.
    fn on_instruction(&mut self, _instruction: &Instruction, _state: &RuntimeState) {}

    /// Called when a step changes the execution status (suspension,
    /// completion, error).
    fn on_status_change(&mut self, _old: Status, _new: Status) {}
}

/// Zero-cost no-op tracer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl StepTracer for NoopTracer {}

/// Writes one line per instruction to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl StepTracer for StderrTracer {
    fn on_instruction(&mut self, instruction: &Instruction, state: &RuntimeState) {
        eprintln!(
            "[{}] {} at line {}, column {} (stack depth {})",
            state.status,
            instruction.kind.name(),
            instruction.loc.line,
            instruction.loc.column,
            state.call_stack.len()
        );
    }

    fn on_status_change(&mut self, old: Status, new: Status) {
        eprintln!("[status] {old} -> {new}");
    }
}

/// A recorded scheduler event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction {
        op: &'static str,
        line: u32,
        column: u32,
        stack_depth: usize,
    },
    /// The execution status changed.
    StatusChange { old: Status, new: Status },
}

/// Records every scheduler event for replay or post-mortem analysis.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opcode names in dispatch order.
    #[must_use]
    pub fn ops(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Instruction { op, .. } => Some(*op),
                TraceEvent::StatusChange { .. } => None,
            })
            .collect()
    }
}

impl StepTracer for RecordingTracer {
    fn on_instruction(&mut self, instruction: &Instruction, state: &RuntimeState) {
        self.events.push(TraceEvent::Instruction {
            op: instruction.kind.name(),
            line: instruction.loc.line,
            column: instruction.loc.column,
            stack_depth: state.call_stack.len(),
        });
    }

    fn on_status_change(&mut self, old: Status, new: Status) {
        self.events.push(TraceEvent::StatusChange { old, new });
    }
}
