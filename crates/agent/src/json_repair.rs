//! Best-effort JSON repair for malformed model output.
//!
//! Small models routinely emit object literals instead of JSON: bare keys,
//! single-quoted strings, trailing commas, missing closing braces. The
//! helpers here turn the common cases back into something `serde_json`
//! accepts. Nothing here guesses at unquoted *values*.

use serde_json::Value;

/// Normalise quoting and keys, then [`repair_json`].
pub fn parse_lenient(input: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(input) {
        return Some(v);
    }
    let normalized = quote_bare_keys(&normalize_quotes(input));
    repair_json(&normalized)
}

/// Attempt to parse `input` as JSON, applying simple repairs when the
/// initial parse fails.
///
/// Repairs applied (in order):
/// 1. Strip `//` line comments.
/// 2. Remove trailing commas before `}` or `]`.
/// 3. Balance unclosed braces/brackets by appending the missing closers.
pub fn repair_json(input: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(input) {
        return Some(v);
    }

    let cleaned = strip_trailing_commas(&strip_line_comments(input));
    if let Ok(v) = serde_json::from_str(&cleaned) {
        return Some(v);
    }

    serde_json::from_str(&close_unbalanced(&cleaned)).ok()
}

/// Rewrite `'single'` quoted strings as `"double"` quoted ones.
///
/// Apostrophes inside double-quoted strings are left alone; double quotes
/// inside single-quoted strings are escaped.
pub fn normalize_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    let mut escape = false;

    for ch in input.chars() {
        match quote {
            None => {
                if ch == '\'' {
                    quote = Some('\'');
                    out.push('"');
                } else {
                    if ch == '"' {
                        quote = Some('"');
                    }
                    out.push(ch);
                }
            }
            Some(q) => {
                if escape {
                    escape = false;
                    // `\'` has no meaning in JSON
                    if q == '\'' && ch == '\'' {
                        out.pop();
                    }
                    out.push(ch);
                    continue;
                }
                match ch {
                    '\\' => {
                        escape = true;
                        out.push(ch);
                    }
                    c if c == q => {
                        quote = None;
                        out.push('"');
                    }
                    '"' if q == '\'' => out.push_str("\\\""),
                    _ => out.push(ch),
                }
            }
        }
    }

    out
}

/// Wrap bare object keys (`{path: ...}`) in double quotes.
pub fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut in_string = false;
    let mut escape = false;
    // Last non-whitespace char emitted outside a string
    let mut last_sig = '\0';
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if in_string {
            out.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
                last_sig = '"';
            }
            i += 1;
            continue;
        }

        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }

        if (ch.is_ascii_alphabetic() || ch == '_') && matches!(last_sig, '{' | ',' | '\0') {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if j < chars.len() && chars[j] == ':' {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            last_sig = chars[i - 1];
            continue;
        }

        if !ch.is_whitespace() {
            last_sig = ch;
        }
        out.push(ch);
        i += 1;
    }

    out
}

fn strip_line_comments(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_string {
            buf.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
            buf.push(ch);
            continue;
        }
        if ch == '/' && chars.peek() == Some(&'/') {
            for c in chars.by_ref() {
                if c == '\n' {
                    buf.push('\n');
                    break;
                }
            }
            continue;
        }
        buf.push(ch);
    }

    buf
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut cleaned = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            cleaned.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        cleaned.push(ch);
    }

    cleaned
}

fn close_unbalanced(input: &str) -> String {
    let mut out = input.to_string();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in input.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
