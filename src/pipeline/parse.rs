//! Response parsing: raw model text → typed TOC candidates.
//!
//! The system prompt asks for a bare JSON array, but vision models routinely
//! wrap it in ```` ```json ```` fences, prepend a sentence of prose, or nest
//! the array inside an object. Parsing therefore runs in two bounded stages:
//!
//! 1. **Strict** — strip outer fences, decode the remainder as JSON. An
//!    array, or an object wrapping an array, is accepted.
//! 2. **Recovery** — decode the text between the first `[` and the last `]`.
//!    Attempted exactly once; there is no open-ended repair loop.
//!
//! Individual objects are then coerced leniently: `page` becomes an optional
//! integer, `level` defaults to 1, and objects without a usable title are
//! dropped and counted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One heading read from one TOC page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocCandidate {
    /// Heading text, trimmed, never empty.
    pub title: String,
    /// Page number as printed in the image; `None` if the model could not read it.
    pub printed_page: Option<i64>,
    /// Hierarchy depth as reported by the model, ≥ 1.
    pub level: u32,
}

/// Candidates decoded from one response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedEntries {
    pub candidates: Vec<TocCandidate>,
    /// Objects discarded for lacking a non-empty string title.
    pub dropped: usize,
}

/// Outcome of a successful parse, recording which stage produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The (fence-stripped) text was valid JSON.
    Strict(ParsedEntries),
    /// Only the `[`…`]` slice of the text decoded.
    Recovered(ParsedEntries),
}

impl Decoded {
    pub fn entries(&self) -> &ParsedEntries {
        match self {
            Decoded::Strict(e) | Decoded::Recovered(e) => e,
        }
    }

    pub fn into_entries(self) -> ParsedEntries {
        match self {
            Decoded::Strict(e) | Decoded::Recovered(e) => e,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, Decoded::Recovered(_))
    }
}

/// Neither stage produced an entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub raw_text: String,
}

/// Keys under which models commonly nest the list when they answer with an object.
const WRAPPER_KEYS: [&str; 4] = ["toc", "table_of_contents", "entries", "sections"];

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Remove a markdown code fence around the payload, if there is one.
///
/// The first fenced block wins; prose before or after it is discarded.
fn strip_fences(raw: &str) -> &str {
    match RE_FENCED.captures(raw) {
        Some(caps) => caps.get(1).map_or(raw, |m| m.as_str()).trim(),
        None => raw.trim(),
    }
}

/// Parse a raw completion into TOC candidates.
pub fn parse(raw_text: &str) -> Result<Decoded, ParseFailure> {
    let stripped = strip_fences(raw_text);

    if let Some(items) = serde_json::from_str::<Value>(stripped)
        .ok()
        .and_then(into_item_list)
    {
        let entries = coerce_items(items);
        debug!(
            "Parsed {} candidates ({} dropped) via strict decode",
            entries.candidates.len(),
            entries.dropped
        );
        return Ok(Decoded::Strict(entries));
    }

    if let Some(items) = bracket_slice(raw_text)
        .and_then(|slice| serde_json::from_str::<Value>(slice).ok())
        .and_then(into_item_list)
    {
        let entries = coerce_items(items);
        debug!(
            "Recovered {} candidates ({} dropped) from bracketed slice",
            entries.candidates.len(),
            entries.dropped
        );
        return Ok(Decoded::Recovered(entries));
    }

    Err(ParseFailure {
        raw_text: raw_text.to_string(),
    })
}

/// The substring from the first `[` to the last `]`, inclusive.
fn bracket_slice(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Accept a bare array, or an object that wraps one.
///
/// A well-known wrapper key wins; otherwise the first array-valued field in
/// document order is taken (serde_json is built with `preserve_order`).
fn into_item_list(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            let mut first_array = None;
            for (key, value) in map {
                if let Value::Array(items) = value {
                    if WRAPPER_KEYS.contains(&key.as_str()) {
                        return Some(items);
                    }
                    first_array.get_or_insert(items);
                }
            }
            first_array
        }
        _ => None,
    }
}

/// Loosely-typed shape of one entry before coercion.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    title: Value,
    #[serde(default, alias = "page_number")]
    page: Value,
    #[serde(default)]
    level: Value,
}

fn coerce_items(items: Vec<Value>) -> ParsedEntries {
    let mut entries = ParsedEntries::default();
    for item in items {
        match serde_json::from_value::<RawCandidate>(item)
            .ok()
            .and_then(coerce_candidate)
        {
            Some(candidate) => entries.candidates.push(candidate),
            None => entries.dropped += 1,
        }
    }
    entries
}

fn coerce_candidate(raw: RawCandidate) -> Option<TocCandidate> {
    let title = match raw.title {
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if title.is_empty() {
        return None;
    }

    let level = coerce_integer(&raw.level)
        .filter(|l| *l >= 1)
        .and_then(|l| u32::try_from(l).ok())
        .unwrap_or(1);

    Some(TocCandidate {
        title,
        printed_page: coerce_integer(&raw.page),
        level,
    })
}

/// Integers, integral floats and numeric strings become `Some`; anything else `None`.
fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
