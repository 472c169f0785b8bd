//! Pipeline stages for TOC-page-to-outline bookmarking.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the two I/O backends (pdfium, the vision endpoint)
//! can be replaced behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ vision ──▶ parse ──▶ normalize ──▶ reconcile ──▶ write
//! (bytes)   (pdfium)   (VLM)      (JSON)    (offset)      (levels)      (lopdf)
//! ```
//!
//! 1. [`input`]     — load a path or URL into memory and check the magic
//! 2. [`render`]    — rasterise one page to PNG; runs in `spawn_blocking`
//! 3. [`encode`]    — PNG encoding and base64 payloads for the request body
//! 4. [`vision`]    — one request per page; the only stage with network I/O
//! 5. [`parse`]     — tolerant decode of the model's near-JSON answer
//! 6. [`normalize`] — printed page numbers → physical pages, with clamping
//! 7. [`reconcile`] — merge pages in order and repair the level nesting
//! 8. [`write`]     — validate and commit the outline into the document

pub mod encode;
pub mod input;
pub mod normalize;
pub mod parse;
pub mod reconcile;
pub mod render;
pub mod vision;
pub mod write;
