//! Identifier extraction from free-text titles and tool arguments.
//!
//! Pure functions, no state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Maximum characters kept from tool arguments on a start marker.
pub const ARGS_PREVIEW_CHARS: usize = 256;
/// Maximum characters kept from tool output on an end marker.
pub const OUTPUT_PREVIEW_CHARS: usize = 256;
/// Maximum characters kept from a handoff task description.
pub const DESCRIPTION_CHARS: usize = 512;

/// Tools that dispatch work to another unit.
pub const DELEGATE_TOOLS: &[&str] = &["task", "delegate"];

/// Phase label for delegated types with no explicit mapping.
pub const DEFAULT_PHASE: &str = "delegation";

const PHASES: &[(&str, &str)] = &[
    ("plan", "planning"),
    ("planner", "planning"),
    ("explore", "exploration"),
    ("explorer", "exploration"),
    ("worker", "implementation"),
    ("general", "implementation"),
    ("build", "implementation"),
    ("review", "review"),
    ("reviewer", "review"),
    ("test", "verification"),
    ("tester", "verification"),
    ("docs", "documentation"),
    ("writer", "documentation"),
];

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Z0-9]+-\d+)\b").expect("static regex"));

static TRACKER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(bd-[a-z0-9]{3,})\b").expect("static regex"));

static SUBAGENT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(@([a-z0-9_-]+) subagent\)").expect("static regex")
});

/// Extract a work-ticket tag (`ENG-142`, `bd-a1f3`) from free text.
///
/// Issue keys win over tracker ids; the first match of the winning form is
/// returned.
pub fn ticket_tag(text: &str) -> Option<String> {
    ISSUE_KEY
        .captures(text)
        .or_else(|| TRACKER_ID.captures(text))
        .map(|caps| caps[1].to_string())
}

/// Extract the delegated-unit type from a title like `Scan repo (@explore subagent)`.
pub fn delegated_type_from_title(title: &str) -> Option<String> {
    SUBAGENT_SUFFIX
        .captures(title)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Map a delegated-unit type to its workflow phase name.
pub fn phase_for(delegated_type: &str) -> &'static str {
    let key = delegated_type.to_ascii_lowercase();
    PHASES
        .iter()
        .find(|(agent, _)| *agent == key)
        .map(|(_, phase)| *phase)
        .unwrap_or(DEFAULT_PHASE)
}

/// Truncate `text` to at most `max_chars` characters, marking the cut with `…`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + 3);
            out.push_str(&text[..cut]);
            out.push('…');
            out
        }
    }
}

/// Compact preview of JSON tool arguments.
pub fn args_preview(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::String(s) => preview(s, ARGS_PREVIEW_CHARS),
        other => preview(&other.to_string(), ARGS_PREVIEW_CHARS),
    }
}

/// A delegate-work request read from tool arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRequest {
    pub delegated_type: String,
    pub description: Option<String>,
}

/// Whether `tool` dispatches work to another unit.
pub fn is_delegate_tool(tool: &str) -> bool {
    DELEGATE_TOOLS
        .iter()
        .any(|name| name.eq_ignore_ascii_case(tool))
}

/// Read a delegate-work request from a tool invocation.
///
/// Returns `None` for ordinary tools. A delegate tool without a type still
/// yields a request with type `general`.
pub fn delegate_request(tool: &str, args: &Value) -> Option<DelegateRequest> {
    if !is_delegate_tool(tool) {
        return None;
    }

    let delegated_type = str_field(args, &["subagent_type", "agent"])
        .unwrap_or("general")
        .to_ascii_lowercase();
    let description =
        str_field(args, &["description", "prompt"]).map(|d| preview(d, DESCRIPTION_CHARS));

    Some(DelegateRequest {
        delegated_type,
        description,
    })
}

fn str_field<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
