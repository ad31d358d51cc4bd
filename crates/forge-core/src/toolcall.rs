// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-call payload parsing.
//!
//! Two dialects are accepted, matching what different model families emit
//! between the tool markers:
//!
//! * **Tagged**: structured fields as tags, nested argument tags re-entered
//!   recursively.  Text content may use entity escapes (`&lt;` etc.) or a
//!   `<![CDATA[...]]>` section, which is preserved verbatim and exempt from
//!   scalar coercion.
//!
//!   ```text
//!   <server_name>local</server_name>
//!   <tool_name>write_file</tool_name>
//!   <arguments>
//!     <path>src/main.rs</path>
//!     <create>true</create>
//!   </arguments>
//!   ```
//!
//! * **Compact**: a single JSON object with the same keys.  JSON already
//!   carries types, so its leaves are preserved as-is.
//!
//! Both parse into the canonical [`ToolCall`].  Parsing is a pure function
//! of the body text, so replaying the same bytes yields the same call.

use serde_json::{Map, Value};

/// Marker opening a tool section inside the model's message text.
pub const TOOL_CALL_OPEN: &str = "<tool_call>";
/// Marker closing a tool section.
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";
/// Server name assumed when the payload does not carry one.
pub const DEFAULT_SERVER_NAME: &str = "local";

/// Canonical parsed form of a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub server_name: String,
    pub tool_name: String,
    /// Structured argument payload, preserved so downstream tools can
    /// re-parse it in their own schema.
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    #[error("empty tool call")]
    Empty,
    #[error("tool call is missing the tool name")]
    MissingToolName,
    #[error("malformed tool call payload: {0}")]
    Malformed(String),
}

/// The payload dialect of a tool body, detected from its first
/// non-whitespace byte.  Outbound recovery messages match the dialect the
/// model last used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Tagged,
    Compact,
}

pub fn detect_dialect(body: &str) -> Dialect {
    if body.trim_start().starts_with('{') {
        Dialect::Compact
    } else {
        Dialect::Tagged
    }
}

/// Parse a tool body (the text between the markers) into a [`ToolCall`].
pub fn parse_tool_call(body: &str) -> Result<ToolCall, ToolCallError> {
    let mut body = body.trim();
    // Defensive: accept a body that still carries the outer markers.
    if let Some(stripped) = body.strip_prefix(TOOL_CALL_OPEN) {
        body = stripped.strip_suffix(TOOL_CALL_CLOSE).unwrap_or(stripped);
        body = body.trim();
    }
    if body.is_empty() {
        return Err(ToolCallError::Empty);
    }
    match detect_dialect(body) {
        Dialect::Compact => parse_compact(body),
        Dialect::Tagged => parse_tagged(body),
    }
}

/// Try to identify the tool name in a partial body, for early UI display
/// while arguments are still streaming.
pub fn sniff_tool_name(partial: &str) -> Option<String> {
    if let Some(m) = regex::Regex::new(r"<tool_name>\s*([^<]+?)\s*</tool_name>")
        .expect("static regex")
        .captures(partial)
    {
        return Some(m[1].to_string());
    }
    if let Some(m) = regex::Regex::new(r#""tool_name"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .expect("static regex")
        .captures(partial)
    {
        return Some(m[1].to_string());
    }
    None
}

// ─── Compact dialect ─────────────────────────────────────────────────────────

fn parse_compact(body: &str) -> Result<ToolCall, ToolCallError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ToolCallError::Malformed(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ToolCallError::Malformed("payload is not an object".into()))?;

    let tool_name = match obj.get("tool_name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(ToolCallError::MissingToolName),
    };
    let server_name = obj
        .get("server_name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SERVER_NAME)
        .to_string();
    let arguments = obj
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    Ok(ToolCall {
        server_name,
        tool_name,
        arguments,
    })
}

// ─── Tagged dialect ──────────────────────────────────────────────────────────

fn parse_tagged(body: &str) -> Result<ToolCall, ToolCallError> {
    let children = parse_children(body).map_err(ToolCallError::Malformed)?;
    if children.is_empty() {
        // No recognisable structure at all: report the offending text.
        return Err(ToolCallError::Malformed(snippet(body)));
    }

    let mut server_name: Option<String> = None;
    let mut tool_name: Option<String> = None;
    let mut arguments = Value::Object(Map::new());

    for (name, inner) in children {
        match name.as_str() {
            "server_name" => server_name = Some(decode_text(&inner)),
            "tool_name" => tool_name = Some(decode_text(&inner)),
            "arguments" => {
                // An empty arguments tag is a call with no parameters.
                arguments = if inner.trim().is_empty() {
                    Value::Object(Map::new())
                } else {
                    parse_value(&inner)
                };
            }
            other => {
                tracing::debug!(tag = other, "ignoring unknown tool-call field");
            }
        }
    }

    let tool_name = match tool_name {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ToolCallError::MissingToolName),
    };
    let server_name = server_name
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string());

    Ok(ToolCall {
        server_name,
        tool_name,
        arguments,
    })
}

/// Parse one level of `<name>inner</name>` elements.  Text between elements
/// is ignored at the structural level.  Returns `(tag_name, raw_inner)`
/// pairs in document order.
fn parse_children(s: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(rel) = s[pos..].find('<') else { break };
        let start = pos + rel;

        // CDATA at structural level belongs to surrounding text; skip it.
        if s[start..].starts_with("<![CDATA[") {
            match s[start..].find("]]>") {
                Some(end) => {
                    pos = start + end + 3;
                    continue;
                }
                None => break,
            }
        }
        // A stray close tag here means the input is not well-formed.
        if s[start..].starts_with("</") {
            return Err(format!("unexpected closing tag at offset {start}"));
        }

        let Some(name) = read_tag_name(&s[start..]) else {
            // Not a tag (e.g. a bare '<' in prose); treat as text.
            pos = start + 1;
            continue;
        };
        let open_len = name.len() + 2; // '<' + name + '>'
        let inner_start = start + open_len;
        let (inner_end, after) = find_matching_close(s, &name, inner_start)
            .ok_or_else(|| format!("missing closing tag for <{name}>"))?;
        out.push((name, s[inner_start..inner_end].to_string()));
        pos = after;
    }
    Ok(out)
}

/// Read a `<name>` tag at the start of `s`; returns the name when `s`
/// begins with a well-formed open tag.
fn read_tag_name(s: &str) -> Option<String> {
    let rest = s.strip_prefix('<')?;
    let mut name = String::new();
    for (i, c) in rest.char_indices() {
        match c {
            '>' if !name.is_empty() => return Some(name),
            c if (c.is_ascii_alphanumeric() || c == '_' || c == '-')
                && !(i == 0 && c.is_ascii_digit()) =>
            {
                name.push(c)
            }
            _ => return None,
        }
    }
    None
}

/// Find the close of `<name>` whose body starts at `from`, skipping CDATA
/// sections and counting nested same-name elements.  Returns
/// `(inner_end, position_after_close)`.
fn find_matching_close(s: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let mut depth = 1usize;
    let mut pos = from;

    while pos < s.len() {
        let rel = s[pos..].find('<')?;
        let at = pos + rel;
        if s[at..].starts_with("<![CDATA[") {
            match s[at..].find("]]>") {
                Some(end) => {
                    pos = at + end + 3;
                    continue;
                }
                None => return None,
            }
        }
        if s[at..].starts_with(&close) {
            depth -= 1;
            if depth == 0 {
                return Some((at, at + close.len()));
            }
            pos = at + close.len();
        } else if s[at..].starts_with(&open) {
            depth += 1;
            pos = at + open.len();
        } else {
            pos = at + 1;
        }
    }
    None
}

/// Parse the raw inner text of a tag: an object when it contains child
/// elements, otherwise a coerced scalar leaf.
fn parse_value(inner: &str) -> Value {
    if has_child_element(inner) {
        match parse_children(inner) {
            Ok(children) if !children.is_empty() => {
                let mut map = Map::new();
                for (name, raw) in children {
                    let val = parse_value(&raw);
                    match map.get_mut(&name) {
                        // Repeated sibling tags aggregate into an array.
                        Some(Value::Array(arr)) => arr.push(val),
                        Some(existing) => {
                            let prev = existing.take();
                            *existing = Value::Array(vec![prev, val]);
                        }
                        None => {
                            map.insert(name, val);
                        }
                    }
                }
                Value::Object(map)
            }
            // Structure looked nested but did not parse; fall back to leaf.
            _ => parse_leaf(inner),
        }
    } else {
        parse_leaf(inner)
    }
}

/// True when `inner` contains at least one well-formed child element.
fn has_child_element(inner: &str) -> bool {
    let mut pos = 0;
    while let Some(rel) = inner[pos..].find('<') {
        let at = pos + rel;
        if inner[at..].starts_with("<![CDATA[") {
            match inner[at..].find("]]>") {
                Some(end) => {
                    pos = at + end + 3;
                    continue;
                }
                None => return false,
            }
        }
        if let Some(name) = read_tag_name(&inner[at..]) {
            if inner[at..].contains(&format!("</{name}>")) {
                return true;
            }
        }
        pos = at + 1;
    }
    false
}

fn parse_leaf(raw: &str) -> Value {
    let trimmed = raw.trim();
    let verbatim = trimmed.contains("<![CDATA[");
    let text = decode_text(trimmed);
    if verbatim {
        // CDATA content is exactly what the model wrote; never coerce it.
        Value::String(text)
    } else {
        coerce_scalar(text)
    }
}

/// Decode a leaf's text: CDATA sections verbatim, entity escapes elsewhere.
fn decode_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw.trim();
    while let Some(idx) = rest.find("<![CDATA[") {
        out.push_str(&unescape_entities(&rest[..idx]));
        let after = &rest[idx + "<![CDATA[".len()..];
        match after.find("]]>") {
            Some(end) => {
                out.push_str(&after[..end]);
                rest = &after[end + 3..];
            }
            None => {
                // Unterminated CDATA (truncated stream): take the rest verbatim.
                out.push_str(after);
                rest = "";
            }
        }
    }
    out.push_str(&unescape_entities(rest));
    out
}

fn unescape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let (decoded, used) = if tail.starts_with("&lt;") {
            ('<', 4)
        } else if tail.starts_with("&gt;") {
            ('>', 4)
        } else if tail.starts_with("&amp;") {
            ('&', 5)
        } else if tail.starts_with("&quot;") {
            ('"', 6)
        } else if tail.starts_with("&apos;") {
            ('\'', 6)
        } else {
            ('&', 1)
        };
        out.push(decoded);
        rest = &tail[used..];
    }
    out.push_str(rest);
    out
}

/// Convert a decoded leaf to its typed JSON value.
///
/// `true`/`false` (case-insensitive) become booleans, `null` becomes null,
/// integer-looking text becomes an integer (widest available, falling back
/// through u64 to f64 on overflow), decimal/scientific text becomes a
/// float; everything else stays a string.
fn coerce_scalar(text: String) -> Value {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if t.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if t.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if looks_like_integer(t) {
        if let Ok(i) = t.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(u) = t.parse::<u64>() {
            return Value::from(u);
        }
        if let Ok(f) = t.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    if looks_like_float(t) {
        if let Ok(f) = t.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(text)
}

fn looks_like_integer(t: &str) -> bool {
    let digits = t.strip_prefix(['-', '+']).unwrap_or(t);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn looks_like_float(t: &str) -> bool {
    let body = t.strip_prefix(['-', '+']).unwrap_or(t);
    if body.is_empty() {
        return false;
    }
    let mut saw_digit = false;
    let mut saw_dot = false;
    let mut saw_exp = false;
    let mut prev: Option<char> = None;
    for c in body.chars() {
        match c {
            '0'..='9' => saw_digit = true,
            '.' if !saw_dot && !saw_exp => saw_dot = true,
            'e' | 'E' if saw_digit && !saw_exp => saw_exp = true,
            '-' | '+' if matches!(prev, Some('e') | Some('E')) => {}
            _ => return false,
        }
        prev = Some(c);
    }
    saw_digit && (saw_dot || saw_exp)
}

fn snippet(body: &str) -> String {
    const MAX: usize = 120;
    let t = body.trim();
    if t.len() <= MAX {
        t.to_string()
    } else {
        let mut end = MAX;
        while !t.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &t[..end])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TAGGED: &str = "\
<server_name>local</server_name>
<tool_name>write_file</tool_name>
<arguments>
  <path>src/main.rs</path>
  <create>true</create>
  <line>42</line>
</arguments>";

    #[test]
    fn tagged_payload_parses() {
        let tc = parse_tool_call(TAGGED).unwrap();
        assert_eq!(tc.server_name, "local");
        assert_eq!(tc.tool_name, "write_file");
        assert_eq!(
            tc.arguments,
            json!({"path": "src/main.rs", "create": true, "line": 42})
        );
    }

    #[test]
    fn compact_payload_parses() {
        let body = r#"{"tool_name": "write_file", "arguments": {"path": "a.rs", "line": 42}}"#;
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.server_name, "local");
        assert_eq!(tc.tool_name, "write_file");
        assert_eq!(tc.arguments, json!({"path": "a.rs", "line": 42}));
    }

    #[test]
    fn parsing_is_idempotent() {
        let a = parse_tool_call(TAGGED).unwrap();
        let b = parse_tool_call(TAGGED).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_arguments_tag_is_an_empty_object() {
        let tc = parse_tool_call("<tool_name>t</tool_name><arguments></arguments>").unwrap();
        assert_eq!(tc.arguments, json!({}));
        let tc = parse_tool_call("<tool_name>t</tool_name>").unwrap();
        assert_eq!(tc.arguments, json!({}));
    }

    #[test]
    fn server_name_defaults_to_local() {
        let tc = parse_tool_call("<tool_name>t</tool_name>").unwrap();
        assert_eq!(tc.server_name, "local");
        let tc = parse_tool_call(r#"{"tool_name": "t"}"#).unwrap();
        assert_eq!(tc.server_name, "local");
    }

    #[test]
    fn empty_body_is_empty_error() {
        assert_eq!(parse_tool_call("   \n  "), Err(ToolCallError::Empty));
    }

    #[test]
    fn missing_tool_name_tagged() {
        let body = "<arguments><x>1</x></arguments>";
        assert_eq!(parse_tool_call(body), Err(ToolCallError::MissingToolName));
    }

    #[test]
    fn missing_tool_name_compact() {
        let body = r#"{"arguments": {"x": 1}}"#;
        assert_eq!(parse_tool_call(body), Err(ToolCallError::MissingToolName));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_tool_call(r#"{"tool_name": "#).unwrap_err();
        assert!(matches!(err, ToolCallError::Malformed(_)));
    }

    #[test]
    fn garbage_text_is_malformed() {
        let err = parse_tool_call("just some prose, no structure").unwrap_err();
        assert!(matches!(err, ToolCallError::Malformed(_)));
    }

    #[test]
    fn outer_markers_are_tolerated() {
        let body = format!("{TOOL_CALL_OPEN}<tool_name>t</tool_name>{TOOL_CALL_CLOSE}");
        let tc = parse_tool_call(&body).unwrap();
        assert_eq!(tc.tool_name, "t");
    }

    #[test]
    fn entity_escapes_are_decoded() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><expr>1 &lt; 2 &amp;&amp; 3 &gt; 2</expr></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["expr"], json!("1 < 2 && 3 > 2"));
    }

    #[test]
    fn cdata_is_verbatim_and_never_coerced() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><content><![CDATA[true]]></content></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["content"], json!("true"));
    }

    #[test]
    fn cdata_preserves_markup_bytes() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><content><![CDATA[<p>&amp; raw</p>]]></content></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["content"], json!("<p>&amp; raw</p>"));
    }

    #[test]
    fn nested_argument_tags_recurse() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><options><force>false</force><depth>3</depth></options></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["options"], json!({"force": false, "depth": 3}));
    }

    #[test]
    fn repeated_sibling_tags_become_array() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><file>a.rs</file><file>b.rs</file><file>c.rs</file></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["file"], json!(["a.rs", "b.rs", "c.rs"]));
    }

    #[test]
    fn scalar_coercion_booleans_case_insensitive() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><a>TRUE</a><b>False</b></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!(true));
        assert_eq!(tc.arguments["b"], json!(false));
    }

    #[test]
    fn scalar_coercion_null() {
        let body = "<tool_name>t</tool_name><arguments><a>null</a></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], Value::Null);
    }

    #[test]
    fn scalar_coercion_integers_and_negatives() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><a>100</a><b>-7</b></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!(100));
        assert_eq!(tc.arguments["b"], json!(-7));
    }

    #[test]
    fn scalar_coercion_large_unsigned_integer() {
        // Larger than i64::MAX but fits u64.
        let body = "<tool_name>t</tool_name>\
                    <arguments><a>18446744073709551615</a></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!(18_446_744_073_709_551_615u64));
    }

    #[test]
    fn scalar_coercion_floats_and_scientific() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><a>3.25</a><b>1e3</b><c>-2.5e-2</c></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!(3.25));
        assert_eq!(tc.arguments["b"], json!(1000.0));
        assert_eq!(tc.arguments["c"], json!(-0.025));
    }

    #[test]
    fn non_numeric_text_stays_string() {
        let body = "<tool_name>t</tool_name>\
                    <arguments><a>1.2.3</a><b>42abc</b></arguments>";
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!("1.2.3"));
        assert_eq!(tc.arguments["b"], json!("42abc"));
    }

    #[test]
    fn compact_leaves_are_preserved_verbatim() {
        // JSON already carries types; "true" the string must stay a string.
        let body = r#"{"tool_name": "t", "arguments": {"a": "true", "b": "100"}}"#;
        let tc = parse_tool_call(body).unwrap();
        assert_eq!(tc.arguments["a"], json!("true"));
        assert_eq!(tc.arguments["b"], json!("100"));
    }

    #[test]
    fn dialect_detection() {
        assert_eq!(detect_dialect("  {\"tool_name\":1}"), Dialect::Compact);
        assert_eq!(detect_dialect("<tool_name>t</tool_name>"), Dialect::Tagged);
    }

    #[test]
    fn sniff_tool_name_tagged() {
        assert_eq!(
            sniff_tool_name("<tool_name>calculator</tool_name><argum"),
            Some("calculator".into())
        );
        assert_eq!(sniff_tool_name("<tool_name>calcul"), None);
    }

    #[test]
    fn sniff_tool_name_compact() {
        assert_eq!(
            sniff_tool_name(r#"{"tool_name": "grep", "argum"#),
            Some("grep".into())
        );
    }

    #[test]
    fn unclosed_tag_is_malformed() {
        let err = parse_tool_call("<tool_name>t</tool_name><arguments><path>x").unwrap_err();
        assert!(matches!(err, ToolCallError::Malformed(_)));
    }
}
