//! Tolerant JSON parsing for model replies.
//!
//! Generated output is often almost-JSON: wrapped in a Markdown fence,
//! surrounded by prose, carrying trailing commas, or cut off mid-array by a
//! token limit. [`parse`] tries a strict parse first, then runs an ordered
//! cascade of pure text repairs, feeding each repair's output into the next:
//!
//! | # | Repair | Fixes |
//! |---|--------|-------|
//! | 1 | [`extract_fenced_block`] | ```` ```json … ``` ```` wrappers |
//! | 2 | [`strip_trailing_commas`] | `[1, 2,]`, `{"a": 1,}` |
//! | 3 | [`balance_brackets`] | missing closers, unterminated string |
//! | 4 | [`fix_truncated_array`] | half-written last array element |
//! | 5 | [`extract_outer_span`] | prose before / after the payload |
//!
//! If the chain fails, each top-level bracket span of the *original* text is
//! tried in order, retrying repairs 2–4 on it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::truncate_for_log;

/// Characters of the raw reply kept in a [`ParseError`].
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON could be recovered after {attempts} attempts: {snippet}")]
    Exhausted { attempts: usize, snippet: String },

    #[error("parsed output failed validation: {reason}: {snippet}")]
    Invalid { reason: String, snippet: String },
}

/// A successfully parsed value and whether any repair was needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub repaired: bool,
}

/// Untyped parsed output as stored on a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub value: serde_json::Value,
    pub repaired: bool,
}

/// A typed output with structural checks beyond what deserialization enforces.
pub trait OutputShape: DeserializeOwned + Serialize {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

type Repair = fn(&str) -> Option<String>;

const CASCADE: &[(&str, Repair)] = &[
    ("fenced_block", extract_fenced_block),
    ("trailing_commas", strip_trailing_commas),
    ("balance_brackets", balance_brackets),
    ("truncated_array", fix_truncated_array),
    ("outer_span", extract_outer_span),
];

const SPAN_FALLBACK: &[(&str, Repair)] = &[
    ("trailing_commas", strip_trailing_commas),
    ("balance_brackets", balance_brackets),
    ("truncated_array", fix_truncated_array),
];

/// Run `repairs` in order over `start`, returning the first text that parses.
fn run_chain<T: DeserializeOwned>(
    start: String,
    repairs: &[(&str, Repair)],
    attempts: &mut usize,
) -> Option<T> {
    let mut current = start;
    for (name, repair) in repairs {
        let Some(next) = repair(&current) else {
            continue;
        };
        *attempts += 1;
        if let Ok(value) = serde_json::from_str::<T>(&next) {
            tracing::debug!(repair = *name, "recovered JSON from model output");
            return Some(value);
        }
        current = next;
    }
    None
}

/// Parse `raw` as `T`, repairing common defects if the strict parse fails.
///
/// Idempotent on valid JSON: the strict parse wins and `repaired` is false.
pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<Parsed<T>, ParseError> {
    if let Ok(value) = serde_json::from_str::<T>(raw) {
        return Ok(Parsed {
            value,
            repaired: false,
        });
    }

    let mut attempts = 1;
    if let Some(value) = run_chain(raw.to_string(), CASCADE, &mut attempts) {
        return Ok(Parsed {
            value,
            repaired: true,
        });
    }

    for span in top_level_spans(raw) {
        let span = span.trim();
        if span == raw.trim() {
            continue;
        }
        attempts += 1;
        if let Ok(value) = serde_json::from_str::<T>(span) {
            return Ok(Parsed {
                value,
                repaired: true,
            });
        }
        if let Some(value) = run_chain(span.to_string(), SPAN_FALLBACK, &mut attempts) {
            return Ok(Parsed {
                value,
                repaired: true,
            });
        }
    }

    Err(ParseError::Exhausted {
        attempts,
        snippet: truncate_for_log(raw.trim(), SNIPPET_CHARS),
    })
}

/// Parse into an [`OutputShape`] and run its validation.
pub fn parse_output<S: OutputShape>(raw: &str) -> Result<Parsed<S>, ParseError> {
    let parsed = parse::<S>(raw)?;
    parsed.value.validate().map_err(|reason| ParseError::Invalid {
        reason,
        snippet: truncate_for_log(raw.trim(), SNIPPET_CHARS),
    })?;
    Ok(parsed)
}

impl<S: OutputShape> Parsed<S> {
    /// Erase the type for storage on a run.
    pub fn into_output(self) -> Result<ParsedOutput, serde_json::Error> {
        Ok(ParsedOutput {
            value: serde_json::to_value(&self.value)?,
            repaired: self.repaired,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Repairs
// ═══════════════════════════════════════════════════════════════════════

/// Content of the first ```` ``` ```` fenced block. A missing closing fence
/// takes everything to the end of the text.
pub fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the info string (`json`, `JSON`, …) on the opening line.
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => after_fence,
    };
    let inner = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// Remove commas that directly precede `]` or `}` outside string literals.
pub fn strip_trailing_commas(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some(']') | Some('}')) {
                    changed = true;
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    changed.then_some(out)
}

/// Outcome of a string-aware bracket scan.
struct Scan {
    /// Expected closers for still-open brackets, innermost last.
    open: Vec<char>,
    in_string: bool,
    /// Byte offsets of commas separating elements of an array, where the
    /// preceding element was an object.
    object_element_commas: Vec<usize>,
}

/// Scan brackets, returning `None` on a mismatched or unopened closer.
fn scan_brackets(text: &str) -> Option<Scan> {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;
    let mut object_element_commas = Vec::new();

    for (pos, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last_significant = Some('"');
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.pop() != Some(c) {
                    return None;
                }
            }
            ',' if open.last() == Some(&']') && last_significant == Some('}') => {
                object_element_commas.push(pos);
            }
            _ => {}
        }
        if !c.is_whitespace() && c != '"' {
            last_significant = Some(c);
        }
    }
    Some(Scan {
        open,
        in_string,
        object_element_commas,
    })
}

/// Close an unterminated string and append closers for unmatched openers.
///
/// A dangling `,` is dropped and a dangling `:` gets a `null` value so the
/// result has a chance of parsing.
pub fn balance_brackets(text: &str) -> Option<String> {
    let scan = scan_brackets(text)?;
    if scan.open.is_empty() && !scan.in_string {
        return None;
    }

    let mut out = text.trim_end().to_string();
    if scan.in_string {
        out.push('"');
    } else {
        if out.ends_with(',') {
            out.pop();
        }
        if out.ends_with(':') {
            out.push_str(" null");
        }
    }
    out.extend(scan.open.iter().rev());
    Some(out)
}

/// Cut back to the last complete object element of an array, then balance.
///
/// The final element is assumed to be the one a token limit cut short.
pub fn fix_truncated_array(text: &str) -> Option<String> {
    let scan = scan_brackets(text)?;
    let cut = *scan.object_element_commas.last()?;
    let head = &text[..cut];
    Some(balance_brackets(head).unwrap_or_else(|| head.to_string()))
}

/// Every top-level bracketed span of `text`, in order.
///
/// Brackets are matched string-aware inside a span; quotes in surrounding
/// prose are ignored. A span left unclosed runs to the end of the text.
pub fn top_level_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (pos, c) in text.char_indices() {
        if depth == 0 {
            if matches!(c, '{' | '[') {
                depth = 1;
                start = pos;
            }
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..pos + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    if depth > 0 {
        spans.push(&text[start..]);
    }
    spans
}

/// The longest top-level bracketed span, so a stray `[1]` or link in the
/// prose does not shadow the payload.
pub fn extract_outer_span(text: &str) -> Option<String> {
    let span = top_level_spans(text)
        .into_iter()
        .fold(None::<&str>, |best, span| match best {
            Some(b) if b.len() >= span.len() => Some(b),
            _ => Some(span),
        })?
        .trim();
    if span == text.trim() {
        None
    } else {
        Some(span.to_string())
    }
}
