//! String interpolation.
//!
//! Plain strings substitute `{name}` placeholders, template literals
//! substitute `${name}`. Names are resolved by a scope-chain walk; unresolved
//! placeholders stay literal so prompt builders can fill them downstream.

use crate::{frame::StackFrame, validate::lookup_scope};

/// Substitutes `{name}` placeholders in a plain string.
#[must_use]
pub fn interpolate_string(template: &str, call_stack: &[StackFrame]) -> String {
    interpolate(template, call_stack, false)
}

/// Substitutes `${name}` placeholders in a template literal.
#[must_use]
pub fn interpolate_template(template: &str, call_stack: &[StackFrame]) -> String {
    interpolate(template, call_stack, true)
}

fn interpolate(template: &str, call_stack: &[StackFrame], dollar: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let open = if dollar {
            chars[i] == '$' && chars.get(i + 1) == Some(&'{')
        } else {
            chars[i] == '{'
        };
        if !open {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let name_start = if dollar { i + 2 } else { i + 1 };
        match placeholder_end(&chars, name_start) {
            Some(end) => {
                let name: String = chars[name_start..end].iter().collect();
                match lookup_scope(call_stack, &name) {
                    Some(variable) => out.push_str(&variable.value.render()),
                    // Unknown names stay literal; they may be filled later.
                    None => out.extend(&chars[i..=end]),
                }
                i = end + 1;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

/// Returns the index of the closing `}` if the characters starting at `start`
/// form a valid identifier placeholder.
fn placeholder_end(chars: &[char], start: usize) -> Option<usize> {
    let first = *chars.get(start)?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let mut i = start + 1;
    while let Some(&c) = chars.get(i) {
        if c == '}' {
            return Some(i);
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        i += 1;
    }
    None
}
