//! Outline reconciliation: per-page entry lists → one well-formed outline.
//!
//! Entries arrive in the order their TOC pages were processed, which is also
//! reading order. A single pass keeps a stack of open ancestors and attaches
//! each entry under the nearest one. Two repairs make the result valid for
//! any input:
//!
//! * **Level clamp** — an entry is never placed more than one level below
//!   its predecessor. Models often misjudge indentation; `[1, 3, 2, 1]`
//!   becomes `[1, 2, 2, 1]`.
//! * **Page order** — an entry pointing before its predecessor is moved
//!   forward to the predecessor's page, so the outline reads front to back.
//!
//! Both repairs are recorded as warnings. The effective (repaired) level is
//! what the outline carries, not the level the model reported.

use crate::error::ValidationWarning;
use crate::pipeline::normalize::NormalizedEntry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One bookmark in flat, pre-order form, tagged with its effective level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    pub physical_page: usize,
    pub level: u32,
}

/// One bookmark in tree form. Children are exactly one level deeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    pub physical_page: usize,
    pub level: u32,
    pub children: Vec<OutlineNode>,
}

/// The reconciled outline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outline {
    entries: Vec<OutlineEntry>,
}

impl Outline {
    /// Flat pre-order sequence, ready for the outline writer.
    pub fn entries(&self) -> &[OutlineEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<OutlineEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tree form of the outline.
    pub fn roots(&self) -> Vec<OutlineNode> {
        // Open path from a root to the most recent node; stack[i] has level i + 1.
        let mut roots: Vec<OutlineNode> = Vec::new();
        let mut stack: Vec<OutlineNode> = Vec::new();

        for entry in &self.entries {
            let depth = entry.level as usize;
            while stack.len() >= depth {
                close_top(&mut stack, &mut roots);
            }
            stack.push(OutlineNode {
                title: entry.title.clone(),
                physical_page: entry.physical_page,
                level: entry.level,
                children: Vec::new(),
            });
        }
        while !stack.is_empty() {
            close_top(&mut stack, &mut roots);
        }
        roots
    }

    /// Indented, human-readable listing (two spaces per level).
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let indent = "  ".repeat(entry.level.saturating_sub(1) as usize);
            out.push_str(&format!(
                "{}{} (p. {})\n",
                indent, entry.title, entry.physical_page
            ));
        }
        out
    }
}

fn close_top(stack: &mut Vec<OutlineNode>, roots: &mut Vec<OutlineNode>) {
    if let Some(node) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }
}

/// Accumulates entries page by page and repairs them as they arrive.
#[derive(Debug, Default)]
pub struct Reconciler {
    entries: Vec<OutlineEntry>,
    /// Effective level of each open ancestor; `open.len()` is the current depth.
    open: Vec<u32>,
    warnings: Vec<ValidationWarning>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one page's entries. Pages must be pushed in processing order.
    pub fn push_page(&mut self, entries: Vec<NormalizedEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    fn push(&mut self, entry: NormalizedEntry) {
        let reported = entry.level.max(1) as usize;
        let effective = reported.min(self.open.len() + 1);
        if effective != reported {
            debug!(
                "'{}': level {} follows depth {}, attached at level {}",
                entry.title,
                reported,
                self.open.len(),
                effective
            );
        }
        self.open.truncate(effective - 1);
        self.open.push(effective as u32);

        let mut physical_page = entry.physical_page;
        if let Some(prev) = self.entries.last() {
            if physical_page < prev.physical_page {
                self.warnings.push(ValidationWarning::PageRegression {
                    title: entry.title.clone(),
                    reported: physical_page,
                    raised_to: prev.physical_page,
                });
                physical_page = prev.physical_page;
            }
        }

        self.entries.push(OutlineEntry {
            title: entry.title,
            physical_page,
            level: effective as u32,
        });
    }

    /// Number of entries accepted so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish the pass, returning the outline and the repair warnings.
    pub fn finish(self) -> (Outline, Vec<ValidationWarning>) {
        (
            Outline {
                entries: self.entries,
            },
            self.warnings,
        )
    }
}

/// Reconcile per-page entry lists, given in page order, into one outline.
pub fn reconcile<I>(pages: I) -> (Outline, Vec<ValidationWarning>)
where
    I: IntoIterator<Item = Vec<NormalizedEntry>>,
{
    let mut reconciler = Reconciler::new();
    for page in pages {
        reconciler.push_page(page);
    }
    reconciler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, page: usize, level: u32) -> NormalizedEntry {
        NormalizedEntry {
            title: title.into(),
            physical_page: page,
            level,
            source_page: 1,
        }
    }

    fn levels(outline: &Outline) -> Vec<u32> {
        outline.entries().iter().map(|e| e.level).collect()
    }

    #[test]
    fn level_jump_is_clamped() {
        let (outline, _) = reconcile(vec![vec![
            entry("A", 1, 1),
            entry("B", 2, 3),
            entry("C", 3, 2),
            entry("D", 4, 1),
        ]]);
        assert_eq!(levels(&outline), vec![1, 2, 2, 1]);

        let roots = outline.roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].title, "A");
        let children: Vec<&str> = roots[0].children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(children, vec!["B", "C"]);
        assert!(roots[1].children.is_empty());
    }

    #[test]
    fn first_entry_is_always_top_level() {
        let (outline, _) = reconcile(vec![vec![entry("Deep", 1, 4), entry("Deeper", 2, 5)]]);
        assert_eq!(levels(&outline), vec![1, 2]);
    }

    #[test]
    fn large_gap_after_lower_levels() {
        let (outline, _) = reconcile(vec![vec![
            entry("1", 1, 1),
            entry("1.1", 2, 2),
            entry("1.1.1", 3, 3),
            entry("2", 4, 1),
            entry("?", 5, 5),
        ]]);
        assert_eq!(levels(&outline), vec![1, 2, 3, 1, 2]);
    }

    #[test]
    fn levels_continue_across_pages() {
        let (outline, _) = reconcile(vec![
            vec![entry("Chapter 1", 15, 1)],
            vec![entry("Section 1.1", 17, 2)],
        ]);
        let roots = outline.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].physical_page, 15);
        assert_eq!(roots[0].children[0].title, "Section 1.1");
        assert_eq!(roots[0].children[0].physical_page, 17);
        assert_eq!(roots[0].children[0].level, 2);
    }

    #[test]
    fn jump_never_exceeds_one() {
        let input = vec![
            entry("a", 1, 3),
            entry("b", 1, 1),
            entry("c", 2, 6),
            entry("d", 3, 2),
            entry("e", 4, 9),
            entry("f", 5, 4),
            entry("g", 6, 1),
        ];
        let (outline, _) = reconcile(vec![input]);
        let mut prev = 0;
        for e in outline.entries() {
            assert!(e.level >= 1);
            assert!(e.level <= prev + 1, "{} jumps from {prev}", e.title);
            prev = e.level;
        }
    }

    #[test]
    fn page_regression_is_repaired() {
        let (outline, warnings) = reconcile(vec![vec![
            entry("One", 10, 1),
            entry("Misread", 4, 1),
            entry("Three", 12, 1),
        ]]);
        let pages: Vec<usize> = outline.entries().iter().map(|e| e.physical_page).collect();
        assert_eq!(pages, vec![10, 10, 12]);
        assert_eq!(
            warnings,
            vec![ValidationWarning::PageRegression {
                title: "Misread".into(),
                reported: 4,
                raised_to: 10,
            }]
        );
    }

    #[test]
    fn reconciling_twice_is_identical() {
        let pages = vec![
            vec![entry("A", 1, 1), entry("B", 3, 4)],
            vec![entry("C", 2, 2), entry("D", 9, 1)],
        ];
        let first = reconcile(pages.clone());
        let second = reconcile(pages);
        assert_eq!(first, second);
        assert_eq!(first.0.roots(), second.0.roots());
    }

    #[test]
    fn roots_flatten_back_to_entries() {
        let (outline, _) = reconcile(vec![vec![
            entry("A", 1, 1),
            entry("A.1", 2, 2),
            entry("A.1.a", 3, 3),
            entry("A.2", 4, 2),
            entry("B", 5, 1),
        ]]);

        fn walk(nodes: &[OutlineNode], out: &mut Vec<(String, u32)>) {
            for n in nodes {
                for c in &n.children {
                    assert_eq!(c.level, n.level + 1);
                }
                out.push((n.title.clone(), n.level));
                walk(&n.children, out);
            }
        }
        let mut flat = Vec::new();
        walk(&outline.roots(), &mut flat);
        let expected: Vec<(String, u32)> = outline
            .entries()
            .iter()
            .map(|e| (e.title.clone(), e.level))
            .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn render_text_indents_by_level() {
        let (outline, _) = reconcile(vec![vec![entry("Intro", 1, 1), entry("Scope", 2, 2)]]);
        assert_eq!(outline.render_text(), "Intro (p. 1)\n  Scope (p. 2)\n");
    }

    #[test]
    fn empty_input_gives_empty_outline() {
        let (outline, warnings) = reconcile(Vec::<Vec<NormalizedEntry>>::new());
        assert!(outline.is_empty());
        assert!(outline.roots().is_empty());
        assert!(warnings.is_empty());
    }
}
