//! Tool-call extraction from assembled model output.
//!
//! Models without native function calling express tool calls as text. The
//! [`Extractor`] cuts a response into regions and runs an ordered list of
//! [`ParseStrategy`] values over each one; the first strategy that yields at
//! least one candidate decides that region. Candidates come back in the
//! order they appear in the text.
//!
//! Regions:
//!
//! - every closed triple-backtick block, whatever its tag ([`RegionKind::Fenced`]);
//! - a response that is nothing but one JSON object, as produced in
//!   structured-json mode ([`RegionKind::Document`]);
//! - one region per `"name": "<id>"` anchor, for text outside fences and for
//!   fenced blocks no block-level strategy could read ([`RegionKind::Anchored`]).
//!
//! Extraction is pure: no registry lookup, no side effects. Unknown tool
//! names are passed through and rejected at execution time.

mod strategies;

use std::sync::LazyLock;

use ferrocall_core::tool::ToolCallCandidate;
use regex_lite::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

pub use strategies::{BarePathFallback, FencedStrictJson, LenientKeyScan, RegexPairScan};

/// What kind of text a region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// The inner text of a triple-backtick block
    Fenced,
    /// The whole response, when it is a single JSON object
    Document,
    /// Text starting at a `"name": "<id>"` anchor
    Anchored,
}

/// A slice of the response handed to the strategies.
#[derive(Debug, Clone, Copy)]
pub struct Region<'a> {
    pub kind: RegionKind,
    pub text: &'a str,
    /// Byte offset of `text` in the full response
    pub offset: usize,
}

/// One independent way of reading tool calls out of a region.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy should be tried on regions of `kind`.
    fn accepts(&self, kind: RegionKind) -> bool;

    /// `None` (or an empty list) means "not mine, try the next strategy".
    fn parse(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>>;
}

/// Runs the strategy pipeline over every region of a response.
pub struct Extractor {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for Extractor {
    /// Strict JSON, lenient key scan, regex pair, bare `path` fallback.
    fn default() -> Self {
        Self::new(vec![
            Box::new(FencedStrictJson),
            Box::new(LenientKeyScan),
            Box::new(RegexPairScan),
            Box::new(BarePathFallback),
        ])
    }
}

impl Extractor {
    /// Build an extractor with a custom strategy order.
    pub fn new(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Strategy names in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract every tool call candidate from `text`, in text order.
    pub fn extract(&self, text: &str) -> Vec<ToolCallCandidate> {
        let mut candidates = Vec::new();

        for segment in segments(text) {
            if let Some(kind) = segment.block_kind {
                let region = Region {
                    kind,
                    text: &text[segment.start..segment.end],
                    offset: segment.start,
                };
                if let Some(found) = self.run(&region) {
                    candidates.extend(found);
                    continue;
                }
            }

            for (start, end) in anchored_spans(&text[segment.start..segment.end]) {
                let region = Region {
                    kind: RegionKind::Anchored,
                    text: &text[segment.start + start..segment.start + end],
                    offset: segment.start + start,
                };
                if let Some(found) = self.run(&region) {
                    candidates.extend(found);
                }
            }
        }

        debug!(count = candidates.len(), "Tool call extraction finished");
        candidates
    }

    fn run(&self, region: &Region<'_>) -> Option<Vec<ToolCallCandidate>> {
        for strategy in self.strategies.iter().filter(|s| s.accepts(region.kind)) {
            match strategy.parse(region) {
                Some(found) if !found.is_empty() => {
                    debug!(
                        strategy = strategy.name(),
                        kind = ?region.kind,
                        offset = region.offset,
                        count = found.len(),
                        "Recovered tool calls"
                    );
                    return Some(found);
                }
                _ => trace!(strategy = strategy.name(), offset = region.offset, "No match"),
            }
        }
        None
    }
}

// ── Segmentation ────────────────────────────────────────────────────────────

/// A stretch of the response: either a whole-block region or plain text.
struct Segment {
    start: usize,
    end: usize,
    /// Set for fenced bodies and whole-document JSON
    block_kind: Option<RegionKind>,
}

const FENCE: &str = "```";

/// Split `text` into fenced bodies and the plain text between them.
///
/// An opening fence without a closing one is treated as plain text.
fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut cursor = 0;

    while let Some(open_rel) = text[cursor..].find(FENCE) {
        let open = cursor + open_rel;
        let body_start = skip_fence_tag(text, open + FENCE.len());
        let Some(close_rel) = text[body_start..].find(FENCE) else {
            break;
        };
        let close = body_start + close_rel;

        if open > cursor {
            out.push(Segment {
                start: cursor,
                end: open,
                block_kind: None,
            });
        }
        out.push(Segment {
            start: body_start,
            end: close,
            block_kind: Some(RegionKind::Fenced),
        });
        cursor = close + FENCE.len();
    }

    if cursor < text.len() {
        let rest = &text[cursor..];
        let trimmed = rest.trim();
        let is_document =
            out.is_empty() && trimmed.starts_with('{') && trimmed.ends_with('}');
        out.push(Segment {
            start: cursor,
            end: text.len(),
            block_kind: is_document.then_some(RegionKind::Document),
        });
    }

    out
}

/// Skip an info string like `json` or `tool_call` after an opening fence,
/// plus the newline that ends it.
fn skip_fence_tag(text: &str, after_fence: usize) -> usize {
    let rest = &text[after_fence..];
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    let after_tag = &rest[tag_len..];
    let trailing = after_tag.len() - after_tag.trim_start_matches([' ', '\t']).len();
    let after_space = &after_tag[trailing..];

    if after_space.starts_with("\r\n") {
        after_fence + tag_len + trailing + 2
    } else if after_space.starts_with('\n') {
        after_fence + tag_len + trailing + 1
    } else {
        // Inline block such as ```{"tool_calls": ...}```
        after_fence
    }
}

// ── Anchors ─────────────────────────────────────────────────────────────────

pub(crate) static NAME_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']name["']\s*:\s*["']([A-Za-z_][\w.\-]*)["']"#).expect("valid anchor regex")
});

pub(crate) static PARAMS_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?(?:params|parameters|arguments)["']?\s*:\s*\{"#).expect("valid params regex")
});

/// Byte spans (relative to `text`) starting at each `"name": "<id>"` anchor.
///
/// An anchor that falls inside the argument object of the previous anchor
/// (a parameter literally called `name`) does not start a new span.
fn anchored_spans(text: &str) -> Vec<(usize, usize)> {
    let mut starts: Vec<usize> = Vec::new();
    let mut covered_until = 0;

    for m in NAME_ANCHOR.find_iter(text) {
        if m.start() < covered_until {
            continue;
        }
        starts.push(m.start());
        covered_until = argument_object_span(text, m.end())
            .map(|(_, end)| end)
            .unwrap_or(m.end());
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| (start, starts.get(i + 1).copied().unwrap_or(text.len())))
        .collect()
}

/// Locate the `{...}` following a `params`/`parameters`/`arguments` key at
/// or after `from`. The end is `text.len()` when the object never closes.
pub(crate) fn argument_object_span(text: &str, from: usize) -> Option<(usize, usize)> {
    let m = PARAMS_KEY.find(&text[from..])?;
    let open = from + m.end() - 1;
    let end = balanced_end(text, open).unwrap_or(text.len());
    Some((open, end))
}

/// Index one past the brace that closes the one at `open`.
///
/// Both quote styles are honoured so braces inside strings don't count.
pub(crate) fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escape = false;

    for (i, ch) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Shared interpretation ───────────────────────────────────────────────────

/// Read `{"tool_calls": [{name, parameters|params|arguments}, ...]}`.
///
/// Items without a usable name, or whose arguments are not an object, are
/// skipped. Missing arguments mean "no arguments".
pub(crate) fn candidates_from_value(value: &Value) -> Option<Vec<ToolCallCandidate>> {
    let calls = value.get("tool_calls")?.as_array()?;

    let found: Vec<ToolCallCandidate> = calls
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let arguments = arguments_of(item)?;
            Some(ToolCallCandidate::new(name, arguments))
        })
        .collect();

    (!found.is_empty()).then_some(found)
}

fn arguments_of(item: &Value) -> Option<Map<String, Value>> {
    let raw = ["parameters", "params", "arguments"]
        .iter()
        .find_map(|key| item.get(*key));

    match raw {
        None | Some(Value::Null) => Some(Map::new()),
        Some(Value::Object(map)) => Some(map.clone()),
        // OpenAI-style stringified arguments
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        Some(_) => None,
    }
}
