use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce an engine error.
pub type RunResult<T> = Result<T, EngineError>;

/// Error categories raised by the engine.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed source text (unterminated string, unknown character).
    LexerError,
    /// Source that tokenized but does not form a valid program.
    ParserError,
    /// Declaration-level misuse caught at registration time (e.g. a `@param`
    /// decorator naming a parameter that does not exist).
    SemanticError,
    /// An undefined name.
    ReferenceError,
    /// Coercion, assignment, or strict-boolean violations.
    TypeError,
    /// Reassignment of a `const` binding.
    AssignmentError,
    /// Out-of-bounds access, non-callable calls, arithmetic on non-finite
    /// numbers, bad range bounds, and other dynamic failures.
    RuntimeError,
    /// Import collisions, missing files, and cycle-induced collisions.
    ImportError,
}

/// A line/column position in source code, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Placeholder location for nodes synthesized by the engine.
    #[must_use]
    pub fn synthetic() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A typed engine error with an optional source location and context snippet.
///
/// All engine internals return `RunResult<T>`; the instruction scheduler is the
/// single catch point that folds an `Err` into `status = error` on the state.
/// Errors raised outside `step` (module loading, resume validators) propagate
/// to the embedder directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<CodeLoc>,
    /// The offending source line, used for caret diagnostics on lexer/parser errors.
    pub context_line: Option<String>,
}

impl EngineError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            context_line: None,
        }
    }

    #[must_use]
    pub fn with_loc(mut self, loc: CodeLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// Attaches the offending source line for caret rendering.
    #[must_use]
    pub fn with_context_line(mut self, line: impl Into<String>) -> Self {
        self.context_line = Some(line.into());
        self
    }

    pub fn lexer(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self::new(ErrorKind::LexerError, message).with_loc(loc)
    }

    pub fn parser(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self::new(ErrorKind::ParserError, message).with_loc(loc)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SemanticError, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn assignment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssignmentError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImportError, message)
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{} at {}: {}", self.kind, loc, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let (Some(loc), Some(line)) = (self.loc, self.context_line.as_deref()) {
            let mut caret = String::new();
            for _ in 1..loc.column {
                caret.push(' ');
            }
            caret.push('^');
            write!(f, "\n  {line}\n  {caret}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_location() {
        let err = EngineError::type_error("Variable 'x' expected number, got text").with_loc(CodeLoc::new(3, 7));
        assert_eq!(
            err.to_string(),
            "TypeError at line 3, column 7: Variable 'x' expected number, got text"
        );
    }

    #[test]
    fn caret_diagnostic_points_at_column() {
        let err = EngineError::parser("Expected '}'", CodeLoc::new(1, 5)).with_context_line("let x { 1");
        let rendered = err.to_string();
        assert!(rendered.contains("let x { 1"), "context line missing: {rendered}");
        assert!(rendered.ends_with("    ^"), "caret misplaced: {rendered}");
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!("TypeError".parse::<ErrorKind>().unwrap(), ErrorKind::TypeError);
        assert_eq!(ErrorKind::ImportError.to_string(), "ImportError");
    }
}
