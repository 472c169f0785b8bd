//! Outline writing: flat, level-tagged entries → the PDF's `/Outlines` tree.
//!
//! The writer is the last line of defence for structural validity. It
//! refuses (never truncates) any sequence that does not start at level 1,
//! rises by more than one level at a time, has an empty title, or points
//! outside the document. The reconciler never produces such a sequence, so a
//! rejection here is a bug, reported as [`BookmarkError::IntegrityViolation`].
//!
//! The outline dictionary layout follows PDF 32000-1 §12.3.3: every item
//! links to `Parent`, `Prev`/`Next` siblings and `First`/`Last` children;
//! items with children are closed (negative `Count`).

use crate::error::BookmarkError;
use crate::pipeline::reconcile::OutlineEntry;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Commits a reconciled outline into a document's bookmark storage.
pub trait OutlineWriter {
    /// Replace the document's outline with `entries` (flat, pre-order).
    fn commit(&mut self, entries: &[OutlineEntry]) -> Result<(), BookmarkError>;
}

/// Check the structural contract of a flat outline against a document of
/// `page_count` pages.
pub fn validate(entries: &[OutlineEntry], page_count: usize) -> Result<(), BookmarkError> {
    let violation = |index: usize, detail: String| BookmarkError::IntegrityViolation { index, detail };

    let mut prev: Option<&OutlineEntry> = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.title.trim().is_empty() {
            return Err(violation(index, "empty title".into()));
        }
        if entry.level == 0 {
            return Err(violation(index, "level 0 is not a valid depth".into()));
        }
        if entry.physical_page == 0 || entry.physical_page > page_count {
            return Err(violation(
                index,
                format!(
                    "page {} outside document of {} pages",
                    entry.physical_page, page_count
                ),
            ));
        }
        match prev {
            None if entry.level != 1 => {
                return Err(violation(
                    index,
                    format!("outline starts at level {}", entry.level),
                ));
            }
            Some(p) if entry.level > p.level + 1 => {
                return Err(violation(
                    index,
                    format!("level jumps from {} to {}", p.level, entry.level),
                ));
            }
            Some(p) if entry.physical_page < p.physical_page => {
                return Err(violation(
                    index,
                    format!(
                        "page {} precedes previous entry's page {}",
                        entry.physical_page, p.physical_page
                    ),
                ));
            }
            _ => {}
        }
        prev = Some(entry);
    }
    Ok(())
}

/// Encode a title as a PDF text string: literal for printable ASCII,
/// UTF-16BE with byte-order mark otherwise.
fn text_string(title: &str) -> Object {
    if title.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Object::string_literal(title);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in title.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

struct TreeItem {
    id: ObjectId,
    title: String,
    page_id: ObjectId,
    children: Vec<TreeItem>,
}

/// [`OutlineWriter`] over an in-memory lopdf document.
pub struct LopdfOutlineWriter {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfOutlineWriter {
    /// Parse `bytes` for editing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BookmarkError> {
        let document = Document::load_mem(bytes).map_err(|e| BookmarkError::CorruptPdf {
            detail: e.to_string(),
        })?;
        Self::from_document(document)
    }

    pub fn from_document(document: Document) -> Result<Self, BookmarkError> {
        if document.is_encrypted() {
            return Err(BookmarkError::OutlineWrite(
                "encrypted documents cannot be rewritten; decrypt first (qpdf --decrypt)".into(),
            ));
        }
        let pages = document.get_pages();
        Ok(Self { document, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// Serialise the (possibly modified) document.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, BookmarkError> {
        let mut buf = Vec::new();
        self.document
            .save_to(&mut buf)
            .map_err(|e| BookmarkError::OutlineWrite(e.to_string()))?;
        Ok(buf)
    }

    /// Write the document to `path` atomically: a temp file in the target
    /// directory is written first and then renamed over `path`.
    pub fn save_atomic(&mut self, path: &Path) -> Result<(), BookmarkError> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes)
    }

    fn catalog_id(&self) -> Result<ObjectId, BookmarkError> {
        self.document
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| BookmarkError::OutlineWrite(format!("document has no catalog: {e}")))
    }

    /// Turn the validated flat list into a tree of items with fresh object ids.
    fn build_tree(&mut self, entries: &[OutlineEntry]) -> Result<Vec<TreeItem>, BookmarkError> {
        let mut roots: Vec<TreeItem> = Vec::new();
        let mut stack: Vec<TreeItem> = Vec::new();

        fn close(stack: &mut Vec<TreeItem>, roots: &mut Vec<TreeItem>) {
            if let Some(item) = stack.pop() {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(item),
                    None => roots.push(item),
                }
            }
        }

        for entry in entries {
            let page_id = *self
                .pages
                .get(&(entry.physical_page as u32))
                .ok_or_else(|| BookmarkError::OutlineWrite(format!(
                    "page {} has no page object",
                    entry.physical_page
                )))?;
            while stack.len() >= entry.level as usize {
                close(&mut stack, &mut roots);
            }
            stack.push(TreeItem {
                id: self.document.new_object_id(),
                title: entry.title.clone(),
                page_id,
                children: Vec::new(),
            });
        }
        while !stack.is_empty() {
            close(&mut stack, &mut roots);
        }
        Ok(roots)
    }

    fn insert_level(&mut self, items: &[TreeItem], parent_id: ObjectId) {
        for (i, item) in items.iter().enumerate() {
            let mut dict = dictionary! {
                "Title" => text_string(&item.title),
                "Parent" => parent_id,
                "Dest" => vec![Object::Reference(item.page_id), "Fit".into()],
            };
            if i > 0 {
                dict.set("Prev", items[i - 1].id);
            }
            if i + 1 < items.len() {
                dict.set("Next", items[i + 1].id);
            }
            if let (Some(first), Some(last)) = (item.children.first(), item.children.last()) {
                dict.set("First", first.id);
                dict.set("Last", last.id);
                dict.set("Count", -(item.children.len() as i64));
                self.insert_level(&item.children, item.id);
            }
            self.document.objects.insert(item.id, Object::Dictionary(dict));
        }
    }
}

impl OutlineWriter for LopdfOutlineWriter {
    fn commit(&mut self, entries: &[OutlineEntry]) -> Result<(), BookmarkError> {
        validate(entries, self.page_count())?;

        let catalog_id = self.catalog_id()?;
        let roots = self.build_tree(entries)?;

        let outlines_id = if let (Some(first), Some(last)) = (roots.first(), roots.last()) {
            let outlines_id = self.document.new_object_id();
            self.document.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Outlines",
                    "First" => first.id,
                    "Last" => last.id,
                    "Count" => roots.len() as i64,
                }),
            );
            self.insert_level(&roots, outlines_id);
            Some(outlines_id)
        } else {
            None
        };

        let catalog = self
            .document
            .get_object_mut(catalog_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| BookmarkError::OutlineWrite(format!("catalog is not a dictionary: {e}")))?;
        if catalog.has(b"Outlines") {
            warn!("Replacing the document's existing outline");
        }
        match outlines_id {
            Some(id) => {
                catalog.set("Outlines", id);
                catalog.set("PageMode", "UseOutlines");
            }
            None => {
                catalog.remove(b"Outlines");
            }
        }

        let pruned = self.document.prune_objects();
        debug!("Pruned {} unreachable objects", pruned.len());
        info!("Wrote outline with {} bookmarks", entries.len());
        Ok(())
    }
}

/// Write `bytes` to `path` via a temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BookmarkError> {
    let write_err = |source: std::io::Error| BookmarkError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Read a document's outline back as a flat, pre-order list.
///
/// Items whose destination is not a direct page reference get page 0.
/// An item reached twice through `/Next` or `/First` is reported as
/// [`BookmarkError::OutlineWrite`] instead of being walked again.
pub fn read_outline(document: &Document) -> Result<Vec<OutlineEntry>, BookmarkError> {
    let err = |e: lopdf::Error| BookmarkError::OutlineWrite(e.to_string());

    let page_numbers: HashMap<ObjectId, usize> = document
        .get_pages()
        .into_iter()
        .map(|(num, id)| (id, num as usize))
        .collect();

    let catalog = document.catalog().map_err(err)?;
    let outlines_id = match catalog.get(b"Outlines").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => return Ok(Vec::new()),
    };
    let outlines = document.get_dictionary(outlines_id).map_err(err)?;

    let mut out = Vec::new();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut cursor: Vec<(Option<ObjectId>, u32)> =
        vec![(outlines.get(b"First").and_then(Object::as_reference).ok(), 1)];

    // Iterative pre-order walk; each frame is (next sibling to visit, level).
    while let Some((next, level)) = cursor.pop() {
        let Some(id) = next else { continue };
        if !visited.insert(id) {
            return Err(BookmarkError::OutlineWrite(format!(
                "outline item {} {} R is linked more than once (cyclic /Next or /First)",
                id.0, id.1
            )));
        }
        let item: &Dictionary = document.get_dictionary(id).map_err(err)?;

        let title = item
            .get(b"Title")
            .and_then(Object::as_str)
            .map(decode_text_string)
            .unwrap_or_default();
        let physical_page = item
            .get(b"Dest")
            .and_then(Object::as_array)
            .ok()
            .and_then(|dest| dest.first())
            .and_then(|first| first.as_reference().ok())
            .and_then(|page_id| page_numbers.get(&page_id).copied())
            .unwrap_or(0);
        out.push(OutlineEntry {
            title,
            physical_page,
            level,
        });

        cursor.push((item.get(b"Next").and_then(Object::as_reference).ok(), level));
        cursor.push((
            item.get(b"First").and_then(Object::as_reference).ok(),
            level + 1,
        ));
    }
    Ok(out)
}
