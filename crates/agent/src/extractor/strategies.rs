//! The individual parse strategies, strictest first.

use std::sync::LazyLock;

use ferrocall_core::tool::ToolCallCandidate;
use regex_lite::Regex;
use serde_json::{Map, Value};

use super::{
    NAME_ANCHOR, ParseStrategy, Region, RegionKind, argument_object_span, candidates_from_value,
};
use crate::json_repair;

const TOOL_CALLS_MARKER: &str = "tool_calls";

// ── 1. Strict JSON ──────────────────────────────────────────────────────────

/// `{"tool_calls": [...]}` parsed with a standard JSON parser.
pub struct FencedStrictJson;

impl ParseStrategy for FencedStrictJson {
    fn name(&self) -> &'static str {
        "fenced_strict_json"
    }

    fn accepts(&self, kind: RegionKind) -> bool {
        matches!(kind, RegionKind::Fenced | RegionKind::Document)
    }

    fn parse(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>> {
        let value: Value = serde_json::from_str(region.text.trim()).ok()?;
        candidates_from_value(&value)
    }
}

// ── 2. Lenient key scan ─────────────────────────────────────────────────────

/// Rebuilds an object from the lines of a block that mentions `tool_calls`
/// but is not valid JSON (bare keys, single quotes, trailing commas, a
/// missing outer brace).
pub struct LenientKeyScan;

impl ParseStrategy for LenientKeyScan {
    fn name(&self) -> &'static str {
        "lenient_key_scan"
    }

    fn accepts(&self, kind: RegionKind) -> bool {
        matches!(kind, RegionKind::Fenced | RegionKind::Document)
    }

    fn parse(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>> {
        let reconstructed = reconstruct_tool_calls(region.text)?;
        let value = json_repair::parse_lenient(&reconstructed)?;
        candidates_from_value(&value)
    }
}

/// Cut from the `tool_calls` key to the last line that closes a bracket,
/// and make sure the result is wrapped in an object.
fn reconstruct_tool_calls(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| l.contains(TOOL_CALLS_MARKER))?;
    let last = lines
        .iter()
        .rposition(|l| l.contains(']') || l.contains('}'))
        .filter(|&last| last >= first)
        .unwrap_or(lines.len() - 1);

    let head = lines[first];
    let start = key_start(head, head.find(TOOL_CALLS_MARKER)?);

    let mut body = String::from(&head[start..]);
    for line in &lines[first + 1..=last] {
        body.push('\n');
        body.push_str(line);
    }

    let body = body.trim();
    if body.starts_with('{') {
        Some(body.to_string())
    } else {
        Some(format!("{{{body}}}"))
    }
}

/// Widen a key match to include its opening quote and an object brace
/// directly before it.
fn key_start(line: &str, key: usize) -> usize {
    let before = &line[..key];
    let quoted = before.ends_with('"') || before.ends_with('\'');
    let start = if quoted { key - 1 } else { key };

    let prefix = line[..start].trim_end();
    if prefix.ends_with('{') {
        prefix.len() - 1
    } else {
        start
    }
}

// ── 3. Regex pair ───────────────────────────────────────────────────────────

/// `"name": "<id>"` followed by a `"params": {...}` object, with bare keys
/// and single quotes normalised before parsing.
pub struct RegexPairScan;

impl ParseStrategy for RegexPairScan {
    fn name(&self) -> &'static str {
        "regex_pair"
    }

    fn accepts(&self, kind: RegionKind) -> bool {
        kind == RegionKind::Anchored
    }

    fn parse(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>> {
        let (name, after_name) = anchored_name(region.text)?;
        let (open, end) = argument_object_span(region.text, after_name)?;

        match json_repair::parse_lenient(&region.text[open..end])? {
            Value::Object(arguments) => Some(vec![ToolCallCandidate::new(name, arguments)]),
            _ => None,
        }
    }
}

// ── 4. Bare path ────────────────────────────────────────────────────────────

static PATH_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bpath\b["']?\s*:\s*(?:"([^"]*)"|'([^']*)'|["']?([^\s,}\]"']+))"#)
        .expect("valid path regex")
});

/// Last resort for the single-path case: `{path: ./README.md}` and other
/// punctuation the JSON repair pass cannot fix. Only the argument object
/// after a `params` key is searched; a bare `"path"` elsewhere is ignored.
pub struct BarePathFallback;

impl ParseStrategy for BarePathFallback {
    fn name(&self) -> &'static str {
        "bare_path"
    }

    fn accepts(&self, kind: RegionKind) -> bool {
        kind == RegionKind::Anchored
    }

    fn parse(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>> {
        let (name, after_name) = anchored_name(region.text)?;
        let (open, end) = argument_object_span(region.text, after_name)?;
        let caps = PATH_PAIR.captures(&region.text[open..end])?;
        let path = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))?
            .as_str()
            .trim();
        if path.is_empty() {
            return None;
        }

        let mut arguments = Map::new();
        arguments.insert("path".into(), Value::String(path.to_string()));
        Some(vec![ToolCallCandidate::new(name, arguments)])
    }
}

/// The tool name at the start of an anchored region, and where it ends.
fn anchored_name(text: &str) -> Option<(&str, usize)> {
    let caps = NAME_ANCHOR.captures(text)?;
    let whole = caps.get(0)?;
    Some((caps.get(1)?.as_str(), whole.end()))
}
