//! Recovery for malformed JSON object bodies emitted by models.
//!
//! Strategies run in a fixed order and the first one that yields a JSON
//! object wins. Every strategy parses permissively: raw control characters
//! inside string literals are escaped before handing the text to serde.

use crate::utils::preview;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Direct,
    BackslashRepair,
    Unescape,
    Hybrid,
}

impl std::fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::BackslashRepair => "backslash repair",
            Self::Unescape => "unescape",
            Self::Hybrid => "unescape + backslash repair",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub value: Map<String, Value>,
    pub strategy: RepairStrategy,
}

/// Parse `raw` as a JSON object, falling back through the repair strategies.
///
/// `label` names the block type in log lines. Returns `None` when nothing
/// produces an object.
pub fn repair_json(raw: &str, label: &str) -> Option<RepairOutcome> {
    if let Some(value) = parse_permissive(raw) {
        return Some(RepairOutcome {
            value,
            strategy: RepairStrategy::Direct,
        });
    }

    warn!("malformed JSON in {} block, attempting repair", label);

    let attempts: [(RepairStrategy, fn(&str) -> String); 3] = [
        (RepairStrategy::BackslashRepair, repair_backslashes),
        (RepairStrategy::Unescape, unescape_literal),
        (RepairStrategy::Hybrid, |s| {
            repair_backslashes(&unescape_literal(s))
        }),
    ];
    for (strategy, transform) in attempts {
        if let Some(value) = parse_permissive(&transform(raw)) {
            info!("repaired {} block JSON via {}", label, strategy);
            return Some(RepairOutcome { value, strategy });
        }
    }

    error!("failed to parse {} block JSON after all repair strategies", label);
    debug!("unparseable {} content: {}", label, preview(raw, 200));
    None
}

/// Convenience wrapper returning only the parsed object.
pub fn parse_object(raw: &str, label: &str) -> Option<Map<String, Value>> {
    repair_json(raw, label).map(|outcome| outcome.value)
}

fn parse_permissive(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(&escape_control_in_strings(raw)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Escape raw control characters that appear inside string literals.
fn escape_control_in_strings(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

fn is_hex4(chars: &[char]) -> bool {
    chars.len() >= 4 && chars[..4].iter().all(char::is_ascii_hexdigit)
}

/// Double every backslash that does not begin a legal JSON escape.
///
/// Scans pairwise so an existing `\\` stays intact and a trailing lone
/// backslash is doubled.
pub(crate) fn repair_backslashes(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let legal = match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => true,
            Some('u') => is_hex4(&chars[i + 2..]),
            _ => false,
        };
        if legal {
            out.push(c);
            out.push(chars[i + 1]);
            i += 2;
        } else {
            out.push_str("\\\\");
            i += 1;
        }
    }
    out
}

/// Decode literal escape sequences as if `raw` were itself a string literal.
///
/// Unknown escapes are kept verbatim.
pub(crate) fn unescape_literal(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 >= chars.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = chars[i + 1];
        let simple = match next {
            '\\' => Some('\\'),
            '"' => Some('"'),
            '\'' => Some('\''),
            '/' => Some('/'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'b' => Some('\u{8}'),
            'f' => Some('\u{c}'),
            _ => None,
        };
        if let Some(decoded) = simple {
            out.push(decoded);
            i += 2;
            continue;
        }
        match next {
            'u' if is_hex4(&chars[i + 2..]) => {
                let (decoded, consumed) = decode_unicode(&chars[i..]);
                out.push(decoded);
                i += consumed;
            }
            'x' if chars.len() >= i + 4
                && chars[i + 2..i + 4].iter().all(char::is_ascii_hexdigit) =>
            {
                let hex: String = chars[i + 2..i + 4].iter().collect();
                let code = u32::from_str_radix(&hex, 16).unwrap_or(0xFFFD);
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                i += 4;
            }
            _ => {
                out.push(c);
                out.push(next);
                i += 2;
            }
        }
    }
    out
}

/// Decode `\uXXXX` (and a following low surrogate when present).
/// Returns the char and the number of input chars consumed.
fn decode_unicode(chars: &[char]) -> (char, usize) {
    let hex = |s: &[char]| {
        u32::from_str_radix(&s.iter().collect::<String>(), 16).unwrap_or(0xFFFD)
    };
    let high = hex(&chars[2..6]);
    if (0xD800..0xDC00).contains(&high)
        && chars.len() >= 12
        && chars[6] == '\\'
        && chars[7] == 'u'
        && is_hex4(&chars[8..])
    {
        let low = hex(&chars[8..12]);
        if (0xDC00..0xE000).contains(&low) {
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return (char::from_u32(code).unwrap_or('\u{FFFD}'), 12);
        }
    }
    (char::from_u32(high).unwrap_or('\u{FFFD}'), 6)
}
