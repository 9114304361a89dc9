use std::collections::BTreeMap;

use super::{AbsoluteId, DocumentError, ElementKind};

/// Index of an element in the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(u32);

impl ElementId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a loaded document in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(u32);

/// A parsed document element. Immutable once its document has been loaded.
#[derive(Debug, Clone)]
pub struct Element {
    pub kind: ElementKind,
    pub id: Option<String>,
    pub sid: Option<String>,
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    pub document: DocumentId,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whitespace-separated tokens of the text content.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: String,
    pub root: Option<ElementId>,
}

/// Arena owning every element of every document loaded in one session.
#[derive(Debug, Default)]
pub struct ElementGraph {
    elements: Vec<Element>,
    documents: Vec<DocumentInfo>,
    ids: BTreeMap<AbsoluteId, ElementId>,
    documents_by_path: BTreeMap<String, DocumentId>,
}

impl ElementGraph {
    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn kind(&self, id: ElementId) -> &ElementKind {
        &self.get(id).kind
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.get(id).parent
    }

    pub fn children(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        self.get(id).children.iter().copied()
    }

    pub fn children_of_kind<'a>(
        &'a self,
        id: ElementId,
        kind: &'a ElementKind,
    ) -> impl Iterator<Item = ElementId> + 'a {
        self.children(id).filter(move |child| self.kind(*child) == kind)
    }

    pub fn first_child_of_kind(&self, id: ElementId, kind: &ElementKind) -> Option<ElementId> {
        self.children_of_kind(id, kind).next()
    }

    pub fn require_child(
        &self,
        id: ElementId,
        kind: ElementKind,
    ) -> Result<ElementId, DocumentError> {
        self.first_child_of_kind(id, &kind)
            .ok_or_else(|| DocumentError::MissingChild {
                element: self.describe(id),
                child: kind.tag().to_string(),
            })
    }

    pub fn require_attribute(&self, id: ElementId, name: &str) -> Result<&str, DocumentError> {
        self.get(id)
            .attribute(name)
            .ok_or_else(|| DocumentError::MissingAttribute {
                element: self.describe(id),
                attribute: name.to_string(),
            })
    }

    pub fn next_sibling(&self, id: ElementId) -> Option<ElementId> {
        let parent = self.parent(id)?;
        let siblings = &self.get(parent).children;
        let position = siblings.iter().position(|sibling| *sibling == id)?;
        siblings.get(position + 1).copied()
    }

    /// First ancestor (excluding `id` itself) of the given kind.
    pub fn find_ancestor(&self, id: ElementId, kind: &ElementKind) -> Option<ElementId> {
        let mut current = self.parent(id);
        while let Some(element) = current {
            if self.kind(element) == kind {
                return Some(element);
            }
            current = self.parent(element);
        }
        None
    }

    /// Pre-order walk of the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.get(current).children.iter().rev().copied());
        }
        out
    }

    pub fn document(&self, id: DocumentId) -> &DocumentInfo {
        &self.documents[id.0 as usize]
    }

    pub fn document_of(&self, id: ElementId) -> &DocumentInfo {
        self.document(self.get(id).document)
    }

    pub fn document_by_path(&self, path: &str) -> Option<DocumentId> {
        self.documents_by_path.get(path).copied()
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.documents_by_path.contains_key(path)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentInfo> {
        self.documents.iter()
    }

    pub fn lookup(&self, id: &AbsoluteId) -> Option<ElementId> {
        self.ids.get(id).copied()
    }

    /// Short human-readable location used in error messages.
    pub fn describe(&self, id: ElementId) -> String {
        let element = self.get(id);
        let path = &self.document(element.document).path;
        match (&element.id, &element.sid) {
            (Some(element_id), _) => format!("<{} id=\"{element_id}\"> in {path}", element.kind.tag()),
            (None, Some(sid)) => format!("<{} sid=\"{sid}\"> in {path}", element.kind.tag()),
            (None, None) => match element.parent.and_then(|parent| self.get(parent).id.clone()) {
                Some(parent_id) => format!(
                    "<{}> under \"{parent_id}\" in {path}",
                    element.kind.tag()
                ),
                None => format!("<{}> in {path}", element.kind.tag()),
            },
        }
    }

    /// Parse the text content as floats.
    pub fn floats(&self, id: ElementId) -> Result<Vec<f32>, DocumentError> {
        self.get(id)
            .tokens()
            .map(|token| {
                token.parse::<f32>().map_err(|_| DocumentError::InvalidNumber {
                    value: token.to_string(),
                    element: self.describe(id),
                })
            })
            .collect()
    }

    /// Parse the text content as non-negative integers.
    pub fn unsigned(&self, id: ElementId) -> Result<Vec<u32>, DocumentError> {
        self.get(id)
            .tokens()
            .map(|token| {
                token.parse::<u32>().map_err(|_| DocumentError::InvalidNumber {
                    value: token.to_string(),
                    element: self.describe(id),
                })
            })
            .collect()
    }

    /// Parse the text content as signed integers (skin indices use -1).
    pub fn integers(&self, id: ElementId) -> Result<Vec<i64>, DocumentError> {
        self.get(id)
            .tokens()
            .map(|token| {
                token.parse::<i64>().map_err(|_| DocumentError::InvalidNumber {
                    value: token.to_string(),
                    element: self.describe(id),
                })
            })
            .collect()
    }

    pub(super) fn begin_document(&mut self, path: &str) -> DocumentId {
        let id = DocumentId(self.documents.len() as u32);
        self.documents.push(DocumentInfo {
            path: path.to_string(),
            root: None,
        });
        self.documents_by_path.insert(path.to_string(), id);
        id
    }

    pub(super) fn set_root(&mut self, document: DocumentId, root: ElementId) {
        self.documents[document.0 as usize].root = Some(root);
    }

    /// Append an element and register its id. A second element with the same
    /// id in one document is a parse error.
    pub(super) fn push_element(
        &mut self,
        mut element: Element,
    ) -> Result<ElementId, DocumentError> {
        let id = ElementId(self.elements.len() as u32);
        element.children.clear();

        if let Some(element_id) = &element.id {
            let key = AbsoluteId {
                document: self.document(element.document).path.clone(),
                fragment: element_id.clone(),
            };
            if self.ids.contains_key(&key) {
                return Err(DocumentError::DuplicateId {
                    id: element_id.clone(),
                    path: key.document,
                });
            }
            self.ids.insert(key, id);
        }

        if let Some(parent) = element.parent {
            self.elements[parent.index()].children.push(id);
        }
        self.elements.push(element);
        Ok(id)
    }

    /// Drop a partially loaded document after a parse failure so the session
    /// never exposes half a tree.
    pub(super) fn discard_document(&mut self, document: DocumentId, first_element: usize) {
        let path = self.document(document).path.clone();
        self.ids.retain(|key, _| key.document != path);
        self.elements.truncate(first_element);
        self.documents_by_path.remove(&path);
        self.documents.truncate(document.0 as usize);
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.documents.clear();
        self.ids.clear();
        self.documents_by_path.clear();
    }
}
