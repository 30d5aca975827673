//! The context model: rendering frame entry logs for AI calls and applying
//! scope-exit policies.
//!
//! The context presented to an AI call is built from the call stack's ordered
//! entries, deepest frame first (depth 0 = current frame), skipping
//! model-typed bindings. Loops apply a context mode on exit: `verbose` keeps
//! everything, `forget` truncates, `compress` suspends so an external AI can
//! replace the loop's entries with a summary.

use serde::{Deserialize, Serialize};

use crate::{
    ast::ContextSpec,
    frame::{FrameEntry, ScopeKind, StackFrame},
    value::Value,
};

/// One rendered context entry: a frame event tagged with the frame it came
/// from and its depth below the current frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub frame: String,
    pub depth: usize,
    pub entry: FrameEntry,
}

/// Renders the current frame's entries (depth 0).
#[must_use]
pub fn local_context(call_stack: &[StackFrame]) -> Vec<ContextEntry> {
    call_stack.last().map_or_else(Vec::new, |frame| frame_entries(frame, 0))
}

/// Renders entries from all frames, closest first.
#[must_use]
pub fn global_context(call_stack: &[StackFrame]) -> Vec<ContextEntry> {
    call_stack
        .iter()
        .rev()
        .enumerate()
        .flat_map(|(depth, frame)| frame_entries(frame, depth))
        .collect()
}

fn frame_entries(frame: &StackFrame, depth: usize) -> Vec<ContextEntry> {
    frame
        .ordered_entries
        .iter()
        .filter(|entry| !entry.is_model_binding())
        .map(|entry| ContextEntry {
            frame: frame.name.clone(),
            depth,
            entry: entry.clone(),
        })
        .collect()
}

/// Resolves the context specifier of an AI call against the call stack.
///
/// `variable v` uses the array held by `v` directly as the context, rendering
/// each element as a summary-style entry; a non-array binding yields an empty
/// context.
#[must_use]
pub fn context_for_spec(spec: &ContextSpec, call_stack: &[StackFrame], lookup: Option<&Value>) -> Vec<ContextEntry> {
    match spec {
        ContextSpec::Local => local_context(call_stack),
        ContextSpec::Default => global_context(call_stack),
        ContextSpec::Variable(name) => match lookup.map(Value::unwrapped) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| ContextEntry {
                    frame: name.clone(),
                    depth: 0,
                    entry: FrameEntry::Summary { text: item.render() },
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

/// Applies `verbose` on scope exit: all entries remain, closed by a marker.
pub fn apply_verbose(frame: &mut StackFrame, kind: ScopeKind, label: Option<String>) {
    frame.ordered_entries.push(FrameEntry::ScopeExit { kind, label });
}

/// Applies `forget` on scope exit: every entry produced by the loop
/// (including its `scope_enter`) is removed.
pub fn apply_forget(frame: &mut StackFrame, entry_index: usize) {
    frame.ordered_entries.truncate(entry_index);
}

/// Replaces a compressed scope's entries with exactly three:
/// `scope_enter`, `summary`, `scope_exit`.
pub fn apply_summary(frame: &mut StackFrame, entry_index: usize, kind: ScopeKind, label: Option<String>, text: String) {
    frame.ordered_entries.truncate(entry_index);
    frame.ordered_entries.push(FrameEntry::ScopeEnter {
        kind,
        label: label.clone(),
    });
    frame.ordered_entries.push(FrameEntry::Summary { text });
    frame.ordered_entries.push(FrameEntry::ScopeExit { kind, label });
}

/// The entries a `compress` hands to the summarization model: everything the
/// loop appended after its `scope_enter` marker.
#[must_use]
pub fn entries_to_summarize(frame: &StackFrame, entry_index: usize) -> Vec<FrameEntry> {
    frame.ordered_entries.get(entry_index + 1..).map_or_else(Vec::new, <[FrameEntry]>::to_vec)
}

/// Renders a frame entry as one line of prompt text for summarization and
/// provider adapters.
#[must_use]
pub fn render_entry(entry: &FrameEntry) -> String {
    match entry {
        FrameEntry::Variable { name, snapshot, ty, .. } => {
            format!("{name}: {ty} = {}", snapshot.render())
        }
        FrameEntry::Prompt {
            ai_type,
            prompt,
            response,
            ..
        } => match response {
            Some(response) => format!("{ai_type} \"{prompt}\" -> {response}"),
            None => format!("{ai_type} \"{prompt}\""),
        },
        FrameEntry::ScopeEnter { kind, label } => match label {
            Some(label) => format!("enter {kind} {label}"),
            None => format!("enter {kind}"),
        },
        FrameEntry::ScopeExit { kind, label } => match label {
            Some(label) => format!("exit {kind} {label}"),
            None => format!("exit {kind}"),
        },
        FrameEntry::Summary { text } => format!("summary: {text}"),
        FrameEntry::ToolCall { name, args, result, error } => {
            let args = Value::Object(args.clone()).render();
            match (result, error) {
                (_, Some(error)) => format!("tool {name}({args}) failed: {error}"),
                (Some(result), None) => format!("tool {name}({args}) -> {}", result.render()),
                (None, None) => format!("tool {name}({args})"),
            }
        }
    }
}
