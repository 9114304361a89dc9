use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::{fs, io};

use log::{debug, warn};

use super::graph::{ElementGraph, ElementId};
use super::loader::load_document;
use super::uri::{AbsoluteId, normalize_path};
use super::DocumentError;
use crate::diagnostics::Diagnostics;

// ─── Document sources ─────────────────────────────────────────────────────────

/// Supplies document text by path. Loading is synchronous and demand-driven.
pub trait DocumentSource {
    fn read(&mut self, path: &str) -> io::Result<String>;
}

impl<T: DocumentSource + ?Sized> DocumentSource for &mut T {
    fn read(&mut self, path: &str) -> io::Result<String> {
        (**self).read(path)
    }
}

/// Reads documents from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl DocumentSource for FileSource {
    fn read(&mut self, path: &str) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// In-memory documents keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, text: &str) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: &str, text: &str) {
        self.files.insert(normalize_path(path), text.to_string());
    }
}

impl DocumentSource for MemorySource {
    fn read(&mut self, path: &str) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no document {path}")))
    }
}

// ─── Scoped identifier paths ──────────────────────────────────────────────────

/// A parsed scoped-identifier path such as `node/joint/transform.X`.
///
/// `container` is the id of the element the search starts from, or `.` for
/// the root of the referencing document. A trailing selector (`.X`, `.ANGLE`,
/// `(0)(1)`) addresses a value inside the target and is not part of the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidPath {
    pub container: String,
    pub segments: Vec<String>,
}

impl SidPath {
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        let mut parts: Vec<&str> = path.split('/').collect();
        let last = parts.pop()?;

        let (last, selector) = match last.find(['.', '(']) {
            // A leading dot is the "this document" container, not a selector.
            Some(0) if last == "." => (last, None),
            Some(index) => {
                let selector = &last[index..];
                (&last[..index], Some(selector.strip_prefix('.').unwrap_or(selector)))
            }
            None => (last, None),
        };
        parts.push(last);

        if parts.iter().any(|segment| segment.is_empty()) || selector == Some("") {
            return None;
        }

        let container = parts.remove(0).to_string();
        Some(Self {
            container,
            segments: parts.into_iter().map(str::to_string).collect(),
        })
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// Handle to the result of a queued reference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefSlot(u32);

#[derive(Debug, Clone)]
struct IdRequest {
    target: AbsoluteId,
    slot: RefSlot,
    origin: ElementId,
}

#[derive(Debug, Clone, Copy)]
enum SidRoot {
    Element(ElementId),
    Slot(RefSlot),
}

#[derive(Debug, Clone)]
struct SidRequest {
    root: SidRoot,
    segments: Vec<String>,
    text: String,
    slot: RefSlot,
    origin: ElementId,
}

/// All state of one conversion batch: the element arena, pending reference
/// requests, their result slots and the warnings produced on the way.
pub struct Session<S: DocumentSource> {
    graph: ElementGraph,
    source: S,
    slots: Vec<Option<ElementId>>,
    pending_ids: Vec<IdRequest>,
    pending_sids: Vec<SidRequest>,
    failed_sids: Vec<SidRequest>,
    id_memo: BTreeMap<AbsoluteId, RefSlot>,
    sid_memo: BTreeMap<(String, String), RefSlot>,
    load_queue: VecDeque<String>,
    unreadable: BTreeSet<String>,
    diagnostics: Diagnostics,
}

impl<S: DocumentSource> Session<S> {
    pub fn new(source: S) -> Self {
        Self {
            graph: ElementGraph::default(),
            source,
            slots: Vec::new(),
            pending_ids: Vec::new(),
            pending_sids: Vec::new(),
            failed_sids: Vec::new(),
            id_memo: BTreeMap::new(),
            sid_memo: BTreeMap::new(),
            load_queue: VecDeque::new(),
            unreadable: BTreeSet::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn graph(&self) -> &ElementGraph {
        &self.graph
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Load a document explicitly and return its root element.
    pub fn load(&mut self, path: &str) -> Result<ElementId, DocumentError> {
        let path = normalize_path(path);
        if let Some(root) = self
            .graph
            .document_by_path(&path)
            .and_then(|document| self.graph.document(document).root)
        {
            return Ok(root);
        }

        self.load_queue.retain(|queued| *queued != path);
        let text = self.source.read(&path).map_err(|source| DocumentError::Read {
            path: path.clone(),
            source,
        })?;
        load_document(&mut self.graph, &path, &text)
    }

    /// Queue an id reference (`#frag` or `file#frag`) made from `origin`.
    pub fn request_id(
        &mut self,
        origin: ElementId,
        reference: &str,
    ) -> Result<RefSlot, DocumentError> {
        let base = self.graph.document_of(origin).path.clone();
        let target = AbsoluteId::parse(&base, reference)?;
        Ok(self.request_absolute(origin, target))
    }

    /// Queue a scoped-identifier path made from `origin`.
    pub fn request_sid(&mut self, origin: ElementId, path: &str) -> Result<RefSlot, DocumentError> {
        let document = self.graph.document_of(origin).clone();
        let malformed = || DocumentError::MalformedReference {
            reference: path.to_string(),
            path: document.path.clone(),
        };
        let parsed = SidPath::parse(path).ok_or_else(malformed)?;

        let key = (document.path.clone(), path.trim().to_string());
        if let Some(slot) = self.sid_memo.get(&key) {
            return Ok(*slot);
        }

        let root = if parsed.container == "." {
            SidRoot::Element(document.root.ok_or_else(malformed)?)
        } else {
            let container = AbsoluteId {
                document: document.path.clone(),
                fragment: parsed.container.clone(),
            };
            SidRoot::Slot(self.request_absolute(origin, container))
        };

        let slot = self.new_slot();
        self.pending_sids.push(SidRequest {
            root,
            segments: parsed.segments,
            text: key.1.clone(),
            slot,
            origin,
        });
        self.sid_memo.insert(key, slot);
        Ok(slot)
    }

    pub fn target(&self, slot: RefSlot) -> Option<ElementId> {
        self.slots[slot.0 as usize]
    }

    pub fn pending_count(&self) -> usize {
        self.pending_ids.len() + self.pending_sids.len()
    }

    /// Resolve one reference made from `origin` right away. References
    /// containing `#` are ids, anything else is a scoped path.
    pub fn resolve(
        &mut self,
        origin: ElementId,
        reference: &str,
    ) -> Result<Option<ElementId>, DocumentError> {
        let slot = if reference.contains('#') {
            self.request_id(origin, reference)?
        } else {
            self.request_sid(origin, reference)?
        };
        self.resolve_pending()?;
        Ok(self.target(slot))
    }

    /// Run id and sid rounds, loading queued documents in between, until no
    /// queue shrinks. Whatever is still pending afterwards is reported as a
    /// warning and dropped.
    pub fn resolve_pending(&mut self) -> Result<(), DocumentError> {
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let before = (self.pending_ids.len(), self.pending_sids.len());
            self.resolve_id_round();
            self.resolve_sid_round();
            let loaded = self.load_queued_documents()?;

            let shrunk =
                self.pending_ids.len() < before.0 || self.pending_sids.len() < before.1;
            if !shrunk && !loaded {
                break;
            }
        }
        debug!("reference resolution converged after {rounds} round(s)");

        self.report_unresolved();
        Ok(())
    }

    /// `root` itself or the first element below it whose sid (or id) is
    /// `sid`, in document order.
    pub fn find_sid(&self, root: ElementId, sid: &str) -> Option<ElementId> {
        let element = self.graph.get(root);
        if element.sid.as_deref() == Some(sid) || element.id.as_deref() == Some(sid) {
            return Some(root);
        }
        find_scoped(&self.graph, root, &[sid.to_string()])
    }

    /// Tear down all per-batch state, keeping the document source.
    pub fn reset(&mut self) {
        self.graph.clear();
        self.slots.clear();
        self.pending_ids.clear();
        self.pending_sids.clear();
        self.failed_sids.clear();
        self.id_memo.clear();
        self.sid_memo.clear();
        self.load_queue.clear();
        self.unreadable.clear();
        self.diagnostics.clear();
    }

    fn new_slot(&mut self) -> RefSlot {
        self.slots.push(None);
        RefSlot((self.slots.len() - 1) as u32)
    }

    fn request_absolute(&mut self, origin: ElementId, target: AbsoluteId) -> RefSlot {
        if let Some(slot) = self.id_memo.get(&target).copied() {
            if self.slots[slot.0 as usize].is_none() {
                self.slots[slot.0 as usize] = self.graph.lookup(&target);
            }
            return slot;
        }

        let slot = self.new_slot();
        match self.graph.lookup(&target) {
            Some(element) => self.slots[slot.0 as usize] = Some(element),
            None => {
                self.queue_document(&target.document);
                self.pending_ids.push(IdRequest {
                    target: target.clone(),
                    slot,
                    origin,
                });
            }
        }
        self.id_memo.insert(target, slot);
        slot
    }

    fn queue_document(&mut self, path: &str) {
        if self.graph.is_loaded(path)
            || self.unreadable.contains(path)
            || self.load_queue.iter().any(|queued| queued == path)
        {
            return;
        }
        debug!("queueing referenced document {path}");
        self.load_queue.push_back(path.to_string());
    }

    fn resolve_id_round(&mut self) {
        let graph = &self.graph;
        let slots = &mut self.slots;
        self.pending_ids.retain(|request| match graph.lookup(&request.target) {
            Some(element) => {
                slots[request.slot.0 as usize] = Some(element);
                false
            }
            None => true,
        });
    }

    fn resolve_sid_round(&mut self) {
        let pending = std::mem::take(&mut self.pending_sids);
        for request in pending {
            let root = match request.root {
                SidRoot::Element(element) => Some(element),
                SidRoot::Slot(slot) => self.slots[slot.0 as usize],
            };
            let Some(root) = root else {
                self.pending_sids.push(request);
                continue;
            };

            match find_scoped(&self.graph, root, &request.segments) {
                Some(element) => self.slots[request.slot.0 as usize] = Some(element),
                // The container subtree is final; a miss now is a miss forever.
                None => self.failed_sids.push(request),
            }
        }
    }

    fn load_queued_documents(&mut self) -> Result<bool, DocumentError> {
        let mut loaded = false;
        while let Some(path) = self.load_queue.pop_front() {
            if self.graph.is_loaded(&path) {
                continue;
            }
            match self.source.read(&path) {
                Ok(text) => {
                    load_document(&mut self.graph, &path, &text)?;
                    loaded = true;
                }
                Err(err) => {
                    warn!("failed to load referenced document {path}: {err}");
                    self.diagnostics.warn(
                        "DOCUMENT_UNREADABLE",
                        format!("referenced document {path} could not be read: {err}"),
                    );
                    self.unreadable.insert(path);
                }
            }
        }
        Ok(loaded)
    }

    fn report_unresolved(&mut self) {
        for request in std::mem::take(&mut self.pending_ids) {
            let origin = self.graph.describe(request.origin);
            self.diagnostics.warn(
                "UNRESOLVED_ID",
                format!("reference {} from {origin} could not be resolved", request.target),
            );
        }

        let mut unresolved_sids = std::mem::take(&mut self.failed_sids);
        unresolved_sids.append(&mut self.pending_sids);
        for request in unresolved_sids {
            let origin = self.graph.describe(request.origin);
            self.diagnostics.warn(
                "UNRESOLVED_SID",
                format!(
                    "scoped path \"{}\" from {origin} could not be resolved",
                    request.text
                ),
            );
        }
    }
}

/// Depth-first search below `container`, consuming one segment per element
/// whose sid (or id) matches and descending through elements that do not.
fn find_scoped(graph: &ElementGraph, container: ElementId, segments: &[String]) -> Option<ElementId> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(container);
    };

    for child in graph.children(container) {
        let element = graph.get(child);
        let matches = element.sid.as_deref() == Some(segment.as_str())
            || element.id.as_deref() == Some(segment.as_str());
        if matches && let Some(found) = find_scoped(graph, child, rest) {
            return Some(found);
        }
        if let Some(found) = find_scoped(graph, child, segments) {
            return Some(found);
        }
    }
    None
}
