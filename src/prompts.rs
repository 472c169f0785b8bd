//! System prompt for TOC extraction.
//!
//! Kept in one place so the instruction sent to the vision endpoint can be
//! inspected by tests and changed without touching transport or parsing code.
//! Callers can override it via [`crate::config::BookmarkConfig::system_prompt`].
//!
//! The prompt asks for bare JSON, but models do not always comply; the
//! response parser ([`crate::pipeline::parse`]) tolerates fences and prose.

/// Default instruction: a JSON array of `{"title", "page", "level"}` objects,
/// no markdown wrapping.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a structure extraction assistant. I will provide an image of a book's \
Table of Contents. It might be dual-column or complex. Output strictly a JSON list \
of objects: [{\"title\": \"Section Name\", \"page\": 123, \"level\": 1}]. \
'page' is the page number printed in the image. 'level' is the hierarchy (1 for chapter, 2 for section). \
Do not output markdown, just the JSON string.";

/// Resolve the prompt to send: the caller's override, or the default.
pub fn system_prompt(custom: Option<&str>) -> &str {
    match custom {
        Some(p) if !p.trim().is_empty() => p,
        _ => DEFAULT_SYSTEM_PROMPT,
    }
}
