//! Low-level instructions consumed by the scheduler.
//!
//! High-level AST nodes never execute directly: every statement/expression
//! handler either produces a primitive result or prepends a small fixed
//! sequence of lower-level instructions. This keeps every external interaction
//! point visible as a single instruction, which is what makes suspension
//! atomic.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{AiKind, BinaryOp, ContextMode, ContextSpec, Expr, Stmt, ToolDecl, TypeAnnotation, UnaryOp},
    error::CodeLoc,
    frame::NameList,
    value::Value,
};

/// An opcode with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstrKind,
    pub loc: CodeLoc,
}

impl Instruction {
    #[must_use]
    pub fn new(kind: InstrKind, loc: CodeLoc) -> Self {
        Self { kind, loc }
    }
}

/// The instruction set.
///
/// The stack is consumed from the front; handlers prepend. `exec_stmt` /
/// `exec_expr` are the lowering entry points; the rest are the primitives
/// they lower to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrKind {
    /// Lower one statement.
    ExecStmt(Box<Stmt>),
    /// Lower one expression.
    ExecExpr(Box<Expr>),
    /// Drive a statement sequence one element at a time.
    ExecStmts { stmts: Vec<Stmt>, index: usize },
    /// Bind `last_result` as a new variable in the current frame.
    DeclareVar {
        name: String,
        is_const: bool,
        ty: Option<TypeAnnotation>,
    },
    /// Assign `last_result` to an existing variable via the scope chain.
    AssignVar { name: String },
    /// Push `last_result` onto the value stack.
    PushValue,
    /// Pop one value per key (in reverse) and build an ordered object.
    BuildObject { keys: Vec<String> },
    /// Pop `len` values and build an array.
    BuildArray { len: usize },
    /// Pop end and start, build an inclusive integer range array.
    BuildRange,
    /// Pop `arg_count` arguments plus the callee and dispatch on the callee tag.
    CallFunction { arg_count: usize },
    /// Function-frame teardown marker; executes only when the body falls
    /// through without `return`.
    PopFrame,
    /// Validate `last_result` against the frame's return type, pop the frame,
    /// rewind past the matching `PopFrame`.
    ReturnValue,
    /// Drop locals added since the saved name set was captured.
    ExitBlock { saved: NameList },
    /// Suspend for an AI call; `last_result` holds the prompt text.
    AiCall {
        model: String,
        context: ContextSpec,
        kind: AiKind,
        cache: bool,
    },
    /// Suspend for user input; `last_result` holds the prompt text.
    AskUser,
    /// Suspend for an inline host-language escape.
    HostEval { params: NameList, body: String },
    /// Dispatch on a boolean condition; branches are single block statements.
    IfBranch {
        then: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    /// Short-circuit continuation for `and`/`or`: decides on the left operand
    /// in `last_result`, lowering the right operand only when needed.
    LogicBranch { op: BinaryOp, right: Box<Expr> },
    /// Require `last_result` to be a boolean (right operand of `and`/`or`).
    CheckBoolean { what: String },
    /// Coerce the iterable in `last_result`, record `scope_enter`, schedule
    /// the first iteration.
    ForInInit { stmt: Box<Stmt> },
    /// One `for-in` iteration step.
    ForInIterate {
        var: String,
        items: Vec<Value>,
        index: usize,
        body: Vec<Stmt>,
        saved: NameList,
        mode: ContextMode,
        label: String,
        entry_index: usize,
    },
    /// Check the first `while` condition; enters the scope only when true.
    WhileInit { stmt: Box<Stmt>, saved: NameList },
    /// Schedule one `while` body pass followed by a condition re-check.
    WhileIterate {
        stmt: Box<Stmt>,
        saved: NameList,
        entry_index: usize,
    },
    /// Decide whether the `while` loop repeats or exits.
    WhileCheck {
        stmt: Box<Stmt>,
        saved: NameList,
        entry_index: usize,
    },
    /// Set `last_result` to a literal value.
    Literal(Value),
    /// Substitute `{name}` placeholders in a plain string.
    InterpolateString(String),
    /// Substitute `${name}` placeholders in a template literal.
    InterpolateTemplate(String),
    /// Pop two operands and apply a non-logical binary operator.
    BinaryOp(BinaryOp),
    /// Apply a unary operator to `last_result`.
    UnaryOp(UnaryOp),
    /// Pop index and receiver, perform integer (or object-key) indexing.
    IndexAccess,
    /// Pop bounds and receiver, produce a sub-array/substring.
    SliceAccess { has_start: bool, has_end: bool },
    /// Pop the receiver and access a member, possibly producing a bound method.
    MemberAccess {
        name: String,
        /// Set when the receiver expression was a bare identifier, so mutating
        /// methods can write back through the scope chain.
        origin: Option<String>,
    },
    /// Register a tool declaration into the per-state registry.
    ExecToolDecl(Box<ToolDecl>),
    /// Pop evaluated field values (in field order) and bind a model handle.
    DeclareModel { name: String, fields: Vec<String> },
}

impl InstrKind {
    /// Short opcode name, used by `step_until_op`, the tracer, and the
    /// execution log.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecStmt(_) => "exec_stmt",
            Self::ExecExpr(_) => "exec_expr",
            Self::ExecStmts { .. } => "exec_stmts",
            Self::DeclareVar { .. } => "declare_var",
            Self::AssignVar { .. } => "assign_var",
            Self::PushValue => "push_value",
            Self::BuildObject { .. } => "build_object",
            Self::BuildArray { .. } => "build_array",
            Self::BuildRange => "build_range",
            Self::CallFunction { .. } => "call_function",
            Self::PopFrame => "pop_frame",
            Self::ReturnValue => "return_value",
            Self::ExitBlock { .. } => "exit_block",
            Self::AiCall { .. } => "ai_call",
            Self::AskUser => "ask_user",
            Self::HostEval { .. } => "host_eval",
            Self::IfBranch { .. } => "if_branch",
            Self::LogicBranch { .. } => "logic_branch",
            Self::CheckBoolean { .. } => "check_boolean",
            Self::ForInInit { .. } => "for_in_init",
            Self::ForInIterate { .. } => "for_in_iterate",
            Self::WhileInit { .. } => "while_init",
            Self::WhileIterate { .. } => "while_iterate",
            Self::WhileCheck { .. } => "while_check",
            Self::Literal(_) => "literal",
            Self::InterpolateString(_) => "interpolate_string",
            Self::InterpolateTemplate(_) => "interpolate_template",
            Self::BinaryOp(_) => "binary_op",
            Self::UnaryOp(_) => "unary_op",
            Self::IndexAccess => "index_access",
            Self::SliceAccess { .. } => "slice_access",
            Self::MemberAccess { .. } => "member_access",
            Self::ExecToolDecl(_) => "exec_tool_decl",
            Self::DeclareModel { .. } => "declare_model",
        }
    }
}
