use std::collections::BTreeMap;

use log::debug;
use xmltree::XMLNode;

use super::graph::{DocumentId, Element, ElementGraph, ElementId};
use super::{DocumentError, ElementKind};

/// Parse `text` as one document and append its elements to `graph` in a
/// single top-to-bottom pass. On failure nothing of the document remains.
pub(super) fn load_document(
    graph: &mut ElementGraph,
    path: &str,
    text: &str,
) -> Result<ElementId, DocumentError> {
    let xml = xmltree::Element::parse(text.as_bytes()).map_err(|err| DocumentError::Xml {
        path: path.to_string(),
        message: err.to_string(),
    })?;

    let first_element = graph.len();
    let document = graph.begin_document(path);
    match append_element(graph, document, None, &xml) {
        Ok(root) => {
            graph.set_root(document, root);
            debug!(
                "loaded {path}: {} elements",
                graph.len() - first_element
            );
            Ok(root)
        }
        Err(err) => {
            graph.discard_document(document, first_element);
            Err(err)
        }
    }
}

fn append_element(
    graph: &mut ElementGraph,
    document: DocumentId,
    parent: Option<ElementId>,
    xml: &xmltree::Element,
) -> Result<ElementId, DocumentError> {
    // HashMap order is not stable; the arena keeps attributes sorted.
    let attributes: BTreeMap<String, String> = xml
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut text = String::new();
    for node in &xml.children {
        match node {
            XMLNode::Text(chunk) | XMLNode::CData(chunk) => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(chunk.trim());
            }
            XMLNode::Element(_) | XMLNode::Comment(_) | XMLNode::ProcessingInstruction(..) => {}
        }
    }

    let element = Element {
        kind: ElementKind::from_tag(&xml.name),
        id: non_empty(attributes.get("id")),
        sid: non_empty(attributes.get("sid")),
        name: non_empty(attributes.get("name")),
        attributes,
        text,
        parent,
        children: Vec::new(),
        document,
    };
    let id = graph.push_element(element)?;

    for node in &xml.children {
        if let XMLNode::Element(child) = node {
            append_element(graph, document, Some(id), child)?;
        }
    }

    Ok(id)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|value| !value.is_empty()).cloned()
}
