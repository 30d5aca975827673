#![doc = include_str!("../../../README.md")]

mod ast;
mod context;
mod error;
mod frame;
mod instruction;
mod interpolate;
mod lexer;
mod machine;
mod modules;
mod parser;
mod run;
mod state;
mod tools;
mod tracer;
mod validate;
mod value;

pub use crate::{
    ast::{
        AiExpr, AiKind, BaseType, BinaryOp, CompressArg, ContextMode, ContextSpec, Expr, ExprKind, FunctionDecl,
        HostEscape, ModelDecl, Param, Program, Stmt, StmtKind, ToolDecl, TypeAnnotation, UnaryOp, MODEL_FIELDS,
    },
    context::{global_context, local_context, render_entry, ContextEntry},
    error::{CodeLoc, EngineError, ErrorKind, RunResult},
    frame::{FrameEntry, NameList, PromptKind, ScopeKind, StackFrame, VarSource, Variable},
    instruction::{InstrKind, Instruction},
    lexer::{Lexer, Token, TokenKind},
    machine::{step, step_traced},
    modules::{
        load_imports, FsModuleSource, HostModule, HostModuleLoader, ImportedName, MapModuleSource, ModuleKind,
        ModuleSource, NoHostModules, SourceModule, StaticHostModules,
    },
    parser::parse,
    state::{
        initial_state, AiInteraction, EngineOptions, PendingAi, PendingCompress, PendingHost,
        PendingImportedHostCall, PendingTool, PendingUser, RuntimeState, ScopeParam, Status,
    },
    tools::{build_tool_spec, SchemaType, ToolParamSchema, ToolSpec},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, StepTracer, TraceEvent},
    value::{format_number, AiResultValue, BoundMethod, BuiltinMethod, MethodTarget, ModelHandle, ToolCallRecord, Value},
};
