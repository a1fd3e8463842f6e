//! Extraction of tagged fenced JSON blocks from free-form model output.
//!
//! The model-facing protocol is a fence tagged `json:<type>` whose body is a
//! JSON object, for example:
//!
//! ````text
//! ```json:function
//! {"name": "web_search", "args": {"query": "rust"}}
//! ```
//! ````
//!
//! Bodies are located with a brace-balanced scan instead of a regex so that
//! generated code with nested or quoted braces survives intact.

pub mod repair;

use crate::utils::preview;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Function,
    Delegation,
}

impl BlockType {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Delegation => "delegation",
        }
    }

    fn marker(self) -> String {
        format!("```json:{}", self.tag())
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedBlock {
    pub block_type: BlockType,
    pub data: Map<String, Value>,
    pub raw_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

/// Byte span of one tagged fence: where the marker starts and where the
/// balanced JSON body starts and ends (exclusive).
#[derive(Debug, Clone, Copy)]
struct FenceSpan {
    fence_start: usize,
    body_start: usize,
    body_end: usize,
}

/// True when the object's first key is written as `\"key\"`, meaning the
/// whole payload had its quotes escaped once more.
fn is_escaped_payload(body: &str) -> bool {
    let mut rest = &body[1..];
    loop {
        let trimmed = rest.trim_start();
        match ["\\n", "\\r", "\\t"].iter().find(|e| trimmed.starts_with(**e)) {
            Some(e) => rest = &trimmed[e.len()..],
            None => return trimmed.starts_with("\\\""),
        }
    }
}

/// Length in bytes of the balanced `{...}` object at the start of `s`.
///
/// `s` must begin with `{`. Braces inside string literals are ignored. When
/// the payload is escaped one level (`{\"name\": ...}`), each `\x` pair is
/// read as `x` first, so `\"` delimits strings there.
pub fn find_balanced_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }
    let unescape = is_escaped_payload(s);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < bytes.len() {
        let mut b = bytes[i];
        if unescape && b == b'\\' && i + 1 < bytes.len() {
            i += 1;
            b = bytes[i];
        }
        i += 1;
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// A fence header may only contain whitespace, possibly written as literal
/// `\n`/`\r`/`\t` escapes by models that escape their whole output.
fn header_is_blank(header: &str) -> bool {
    header
        .replace("\\n", "")
        .replace("\\r", "")
        .replace("\\t", "")
        .trim()
        .is_empty()
}

fn scan_tagged(text: &str, block_type: BlockType) -> Vec<FenceSpan> {
    // ASCII lowering keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let marker = block_type.marker();
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = lower[cursor..].find(&marker) {
        let fence_start = cursor + rel;
        let marker_end = fence_start + marker.len();
        cursor = marker_end;

        let Some(brace_rel) = text[marker_end..].find('{') else {
            break;
        };
        if !header_is_blank(&text[marker_end..marker_end + brace_rel]) {
            continue;
        }
        let body_start = marker_end + brace_rel;
        match find_balanced_end(&text[body_start..]) {
            Some(len) => {
                spans.push(FenceSpan {
                    fence_start,
                    body_start,
                    body_end: body_start + len,
                });
                cursor = body_start + len;
            }
            None => {
                warn!(
                    "unbalanced braces in {} block at byte {}, skipping",
                    block_type, fence_start
                );
            }
        }
    }
    spans
}

/// Untagged ```` ``` ```` or ```` ```json ```` fences, used only to recover
/// function calls the model forgot to tag.
fn scan_loose(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find("```") {
        let after_ticks = cursor + rel + 3;
        cursor = after_ticks;

        let rest = &text[after_ticks..];
        let lang_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let lang = &rest[..lang_len];
        let plain_or_json = lang.is_empty() || lang.eq_ignore_ascii_case("json");
        if !plain_or_json || rest[lang_len..].starts_with(':') {
            continue;
        }
        let header_start = after_ticks + lang_len;
        let Some(brace_rel) = text[header_start..].find('{') else {
            break;
        };
        if !header_is_blank(&text[header_start..header_start + brace_rel]) {
            continue;
        }
        let body_start = header_start + brace_rel;
        if let Some(len) = find_balanced_end(&text[body_start..]) {
            spans.push((body_start, body_start + len));
            cursor = body_start + len;
        }
    }
    spans
}

/// Extract every `block_type` block from `text`, in document order.
///
/// Blocks whose JSON cannot be recovered are dropped. For function blocks
/// only, when no tagged fence parses, untagged JSON fences carrying both a
/// `name` and an `args` key are accepted instead.
pub fn extract_blocks(text: &str, block_type: BlockType) -> Vec<ParsedBlock> {
    let mut blocks: Vec<ParsedBlock> = scan_tagged(text, block_type)
        .into_iter()
        .filter_map(|span| {
            let raw = &text[span.body_start..span.body_end];
            repair::parse_object(raw, block_type.tag()).map(|data| ParsedBlock {
                block_type,
                data,
                raw_text: raw.to_string(),
            })
        })
        .collect();

    if blocks.is_empty() && block_type == BlockType::Function {
        for (start, end) in scan_loose(text) {
            let raw = &text[start..end];
            if let Some(data) = repair::parse_object(raw, "untagged")
                && data.contains_key("name")
                && data.contains_key("args")
            {
                debug!("recovered untagged function block");
                blocks.push(ParsedBlock {
                    block_type,
                    data,
                    raw_text: raw.to_string(),
                });
            }
        }
    }

    blocks
}

/// Parse every function block into a [`ToolCall`].
///
/// A block without a non-empty string `name` is discarded with a warning.
/// String-encoded `args` are decoded; anything else that is not an object
/// becomes `{}`.
pub fn parse_function_calls(text: &str) -> Vec<ToolCall> {
    extract_blocks(text, BlockType::Function)
        .into_iter()
        .filter_map(|block| {
            let name = block
                .data
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty());
            let Some(name) = name else {
                warn!(
                    "function block missing name, skipping: {}",
                    preview(&block.raw_text, 100)
                );
                return None;
            };
            let args = match block.data.get("args") {
                Some(Value::Object(map)) => Value::Object(map.clone()),
                Some(Value::String(s)) => repair::parse_object(s, "function args")
                    .map_or_else(empty_args, Value::Object),
                _ => empty_args(),
            };
            Some(ToolCall {
                name: name.trim().to_string(),
                args,
            })
        })
        .collect()
}

/// `text` with every balanced `block_type` fence removed, including its
/// closing backticks. What remains is the model's visible reasoning.
pub fn strip_blocks(text: &str, block_type: BlockType) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in scan_tagged(text, block_type) {
        out.push_str(&text[last..span.fence_start]);
        let tail = &text[span.body_end..];
        let trimmed = tail.trim_start();
        last = if trimmed.starts_with("```") {
            span.body_end + (tail.len() - trimmed.len()) + 3
        } else {
            span.body_end
        };
    }
    out.push_str(&text[last..]);
    out.trim().to_string()
}
