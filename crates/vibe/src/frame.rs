//! Call stack frames and the per-frame ordered entry log.
//!
//! A frame owns its named locals (insertion-ordered) and an append-only log of
//! events: variable snapshots, AI prompts, scope markers, summaries. The log
//! is the raw material the context model renders for AI calls. Lexical
//! nesting is encoded as a plain index into the call stack -- no pointers, so
//! the whole stack serializes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString};

use crate::{
    ast::TypeAnnotation,
    value::{ToolCallRecord, Value},
};

/// A short list of local names, captured when entering a block scope so the
/// names added inside can be dropped on exit. Most scopes hold a handful of
/// names, so the list stays inline.
pub type NameList = SmallVec<[String; 4]>;

/// How a binding's current value was produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum VarSource {
    Ai,
    User,
    #[default]
    None,
}

/// A variable binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub value: Value,
    pub is_const: bool,
    pub declared_type: Option<TypeAnnotation>,
    pub source: VarSource,
}

/// The scope kinds that emit enter/exit markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    For,
    While,
    Function,
}

/// The AI operation kinds recorded in prompt entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum PromptKind {
    Do,
    Vibe,
    Ask,
}

/// One atomic event recorded in a stack frame, in program order.
///
/// Variable entries are snapshots taken at the moment of declaration or
/// assignment; later mutation of the binding appends a new entry rather than
/// rewriting an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameEntry {
    Variable {
        name: String,
        snapshot: Value,
        /// Display form of the validated/inferred type at snapshot time.
        ty: String,
        is_const: bool,
        source: VarSource,
    },
    Prompt {
        ai_type: PromptKind,
        prompt: String,
        /// Tool rounds made during the interaction, recorded before the
        /// response so causal order is preserved.
        tool_calls: Vec<ToolCallRecord>,
        response: Option<String>,
    },
    ScopeEnter {
        kind: ScopeKind,
        label: Option<String>,
    },
    ScopeExit {
        kind: ScopeKind,
        label: Option<String>,
    },
    /// The result of `compress`.
    Summary {
        text: String,
    },
    ToolCall {
        name: String,
        args: IndexMap<String, Value>,
        result: Option<Value>,
        error: Option<String>,
    },
}

impl FrameEntry {
    /// True for variable entries whose snapshot is a model handle; these are
    /// skipped when rendering context for AI calls.
    #[must_use]
    pub fn is_model_binding(&self) -> bool {
        matches!(self, Self::Variable { snapshot, .. } if snapshot.is_model())
    }
}

/// One frame of the call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub name: String,
    /// Insertion-ordered named locals.
    pub locals: IndexMap<String, Variable>,
    /// Index of the lexical parent frame in the call stack (not the dynamic
    /// caller); free-variable lookup climbs this chain.
    pub parent_frame_index: Option<usize>,
    /// Declared return type, validated by `return_value`. `None` on the entry
    /// frame and on untyped functions.
    pub return_type: Option<TypeAnnotation>,
    pub ordered_entries: Vec<FrameEntry>,
}

impl StackFrame {
    #[must_use]
    pub fn new(name: impl Into<String>, parent_frame_index: Option<usize>) -> Self {
        Self {
            name: name.into(),
            locals: IndexMap::new(),
            parent_frame_index,
            return_type: None,
            ordered_entries: Vec::new(),
        }
    }

    /// The current set of local names, captured before entering a block or
    /// loop so newly added names can be dropped on exit.
    #[must_use]
    pub fn local_names(&self) -> NameList {
        self.locals.keys().cloned().collect()
    }

    /// Drops every local whose name is not in `saved`, preserving the
    /// insertion order of the survivors.
    pub fn retain_locals(&mut self, saved: &[String]) {
        self.locals.retain(|name, _| saved.iter().any(|s| s == name));
    }

    /// Records a binding event: stores the variable and appends its snapshot
    /// entry.
    pub fn record_binding(&mut self, name: &str, variable: Variable, ty_display: String) {
        self.ordered_entries.push(FrameEntry::Variable {
            name: name.to_owned(),
            snapshot: variable.value.clone(),
            ty: ty_display,
            is_const: variable.is_const,
            source: variable.source,
        });
        self.locals.insert(name.to_owned(), variable);
    }
}
