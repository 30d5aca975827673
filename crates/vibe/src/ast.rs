//! Abstract syntax tree for the vibe language.
//!
//! Statements and expressions are closed tagged unions; every node carries the
//! source location it originated from so runtime errors can point back at the
//! program text. The tree is fully serializable: a parsed program can be
//! snapshotted together with the execution state that runs it.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::CodeLoc;

/// A parsed program: an ordered list of top-level statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    #[must_use]
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// A statement with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: CodeLoc,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, loc: CodeLoc) -> Self {
        Self { kind, loc }
    }
}

/// The closed union of statement forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `import { a, b } from "path"` -- resolved by the module loader before
    /// execution; a no-op at runtime.
    Import { names: Vec<String>, path: String },
    /// `export <decl>` -- marks the inner declaration as visible to importers.
    Export(Box<Stmt>),
    /// `let name[: ty] = init`
    Let {
        name: String,
        ty: Option<TypeAnnotation>,
        init: Expr,
    },
    /// `const name[: ty] = init`
    Const {
        name: String,
        ty: Option<TypeAnnotation>,
        init: Expr,
    },
    /// `model m = { name: "...", apiKey: "...", ... }`
    Model(ModelDecl),
    /// `function f(a: ty, ...)[: ty] { ... }` -- collected at state
    /// construction; a no-op at runtime.
    Function(FunctionDecl),
    /// `tool t(a: ty)[: ty] @description "..." @param a "..." { ... }`
    Tool(ToolDecl),
    /// `return [expr]`
    Return(Option<Expr>),
    /// `if cond { } [else ...]` -- branches are always `Block` statements so
    /// the branch body gets block scoping.
    If {
        cond: Expr,
        then: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    /// `for var in iterable { body } [mode]`
    ForIn {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        mode: ContextMode,
    },
    /// `while cond { body } [mode]`
    While {
        cond: Expr,
        body: Vec<Stmt>,
        mode: ContextMode,
    },
    /// A bare `{ ... }` block. Does not push a frame; names declared inside
    /// are dropped on exit.
    Block(Vec<Stmt>),
    /// An expression evaluated for its value/effects.
    Expr(Expr),
}

impl StmtKind {
    /// Short name of the statement form, used by `step_until_statement`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Import { .. } => "import",
            Self::Export(_) => "export",
            Self::Let { .. } => "let",
            Self::Const { .. } => "const",
            Self::Model(_) => "model",
            Self::Function(_) => "function",
            Self::Tool(_) => "tool",
            Self::Return(_) => "return",
            Self::If { .. } => "if",
            Self::ForIn { .. } => "for",
            Self::While { .. } => "while",
            Self::Block(_) => "block",
            Self::Expr(_) => "expression",
        }
    }
}

/// A `model` declaration. Field order is preserved: the declaration lowers to
/// one evaluate-and-push pair per recognized field, consumed in order by
/// `declare_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDecl {
    pub name: String,
    pub fields: Vec<(String, Expr)>,
}

/// Recognized model declaration fields, in canonical order.
pub const MODEL_FIELDS: &[&str] = &[
    "name",
    "apiKey",
    "url",
    "provider",
    "maxRetriesOnError",
    "thinkingLevel",
    "tools",
];

/// A user-defined function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Vec<Stmt>,
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeAnnotation>,
}

/// A `tool` declaration: a named, described, typed, AI-callable wrapper over a
/// host-language escape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    /// Text of the `@description` decorator.
    pub description: String,
    /// `@param name "doc"` decorators, in source order.
    pub param_docs: Vec<(String, String)>,
    /// The host-language escape that implements the tool.
    pub body: HostEscape,
}

/// An inline escape to the host language: a raw code body plus the names of
/// the variables it captures. The engine never evaluates the body itself; it
/// suspends and hands body + resolved parameter values to the embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEscape {
    pub params: Vec<String>,
    pub body: String,
}

/// Policy applied to a loop's frame entries when the loop completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextMode {
    /// Keep every entry and append a `scope_exit` marker.
    Verbose,
    /// Truncate the frame's entries back to their length before `scope_enter`.
    Forget,
    /// Suspend so an external AI can summarize the loop's entries. Arguments
    /// are resolved at scope exit: a string literal is the summarization
    /// prompt, an identifier bound to a model is the summarization model, any
    /// other identifier contributes its string value as the prompt.
    Compress(Vec<CompressArg>),
}

impl Default for ContextMode {
    fn default() -> Self {
        Self::Verbose
    }
}

/// One argument of a `compress(...)` context mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompressArg {
    Str(String),
    Ident(String),
}

/// An expression with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: CodeLoc,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, loc: CodeLoc) -> Self {
        Self { kind, loc }
    }
}

/// The closed union of expression forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Ident(String),
    /// `"..."` -- `{name}` placeholders are substituted at evaluation time;
    /// unresolved names remain literal.
    Str(String),
    /// `` `...` `` -- `${name}` placeholders, same semantics as `Str`.
    Template(String),
    Number(f64),
    Bool(bool),
    /// `{ key: expr, ... }` -- key order is preserved.
    ObjectLit(Vec<(String, Expr)>),
    /// `[a, b, c]`
    ArrayLit(Vec<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `a..b` -- inclusive integer range.
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    /// `a[i]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `a[start, end]` -- exclusive end; either bound may be omitted.
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    /// `a.name`
    Member {
        object: Box<Expr>,
        name: String,
    },
    /// `name = expr`
    Assign {
        target: String,
        value: Box<Expr>,
    },
    /// `callee(args...)`
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `do`/`vibe` AI operation.
    Ai(AiExpr),
    /// `ask prompt` -- suspends for user input.
    Ask {
        prompt: Box<Expr>,
    },
    /// Inline host-language escape.
    Host(HostEscape),
}

/// An AI operation expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiExpr {
    pub kind: AiKind,
    pub prompt: Box<Expr>,
    /// Identifier of the model binding; must resolve to a model handle.
    pub model: String,
    /// Context selector (only meaningful for `do`).
    pub context: ContextSpec,
    /// `vibe` cache flag.
    pub cache: bool,
}

/// The two AI expression forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum AiKind {
    /// Single-round call.
    Do,
    /// Multi-round tool-using call with a pre-assembled context.
    Vibe,
}

/// Context selector on an AI call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextSpec {
    /// The current frame's entries.
    Local,
    /// Entries from all frames, closest first.
    Default,
    /// A variable holding an array used directly as the context.
    Variable(String),
}

/// Binary operators, lowest to highest precedence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum BinaryOp {
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum UnaryOp {
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "-")]
    Neg,
}

/// A declared semantic type: a base type plus an array suffix depth
/// (`number[][]` has depth 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAnnotation {
    pub base: BaseType,
    pub array_depth: u8,
}

impl TypeAnnotation {
    #[must_use]
    pub fn scalar(base: BaseType) -> Self {
        Self { base, array_depth: 0 }
    }

    /// The annotation one array level down, for element validation.
    #[must_use]
    pub fn element(&self) -> Self {
        Self {
            base: self.base.clone(),
            array_depth: self.array_depth.saturating_sub(1),
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.array_depth > 0
    }
}

impl Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for _ in 0..self.array_depth {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Base semantic types. `text` and `prompt` share the string carrier; `json`
/// accepts a parseable string or an object/array. `Named` types only appear in
/// tool parameter schemas where they reference imported host types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseType {
    Text,
    Prompt,
    Json,
    Boolean,
    Number,
    Named(String),
}

impl Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Prompt => write!(f, "prompt"),
            Self::Json => write!(f, "json"),
            Self::Boolean => write!(f, "boolean"),
            Self::Number => write!(f, "number"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_annotation_display_includes_array_suffix() {
        let ty = TypeAnnotation {
            base: BaseType::Number,
            array_depth: 2,
        };
        assert_eq!(ty.to_string(), "number[][]");
        assert_eq!(ty.element().to_string(), "number[]");
    }

    #[test]
    fn operator_display_matches_surface_syntax() {
        assert_eq!(BinaryOp::Add.to_string(), "+");
        assert_eq!(BinaryOp::And.to_string(), "and");
        assert_eq!(UnaryOp::Not.to_string(), "not");
    }

    #[test]
    fn ai_kind_parses_from_keyword() {
        assert_eq!("do".parse::<AiKind>().unwrap(), AiKind::Do);
        assert_eq!("vibe".parse::<AiKind>().unwrap(), AiKind::Vibe);
    }
}
