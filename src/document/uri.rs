use std::fmt;

use super::DocumentError;

/// Session-wide identifier of an element: normalized document path plus
/// the element's id inside that document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbsoluteId {
    pub document: String,
    pub fragment: String,
}

impl fmt::Display for AbsoluteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.fragment)
    }
}

impl AbsoluteId {
    /// Parse `#frag`, `other.dae#frag` or `file:///abs/other.dae#frag`
    /// relative to the document that contains the reference.
    pub fn parse(base_document: &str, reference: &str) -> Result<Self, DocumentError> {
        let malformed = || DocumentError::MalformedReference {
            reference: reference.to_string(),
            path: base_document.to_string(),
        };

        let reference = reference.trim();
        let Some((path, fragment)) = reference.split_once('#') else {
            return Err(malformed());
        };
        if fragment.is_empty() || fragment.contains('#') || fragment.contains(char::is_whitespace)
        {
            return Err(malformed());
        }

        let document = if path.is_empty() {
            base_document.to_string()
        } else {
            resolve_document_path(base_document, path)
        };

        Ok(Self {
            document,
            fragment: fragment.to_string(),
        })
    }
}

/// Resolve `relative` against the directory of `base_document`.
pub fn resolve_document_path(base_document: &str, relative: &str) -> String {
    let relative = relative.strip_prefix("file://").unwrap_or(relative);
    if relative.starts_with('/') || relative.contains(':') {
        return normalize_path(relative);
    }

    let base_dir = match base_document.rfind(['/', '\\']) {
        Some(index) => &base_document[..=index],
        None => "",
    };
    normalize_path(&format!("{base_dir}{relative}"))
}

/// Collapse `.` and `..` segments and unify separators to `/`.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_local_fragment_when_parsing_then_base_document_is_used() {
        let id = AbsoluteId::parse("scenes/main.dae", "#geom").unwrap();
        assert_eq!(id.document, "scenes/main.dae");
        assert_eq!(id.fragment, "geom");
        assert_eq!(id.to_string(), "scenes/main.dae#geom");
    }

    #[test]
    fn given_relative_file_when_parsing_then_path_is_resolved_against_base_dir() {
        let id = AbsoluteId::parse("scenes/main.dae", "../props/crate.dae#box").unwrap();
        assert_eq!(id.document, "props/crate.dae");
        assert_eq!(id.fragment, "box");
    }

    #[test]
    fn given_file_url_when_parsing_then_scheme_is_stripped() {
        let id = AbsoluteId::parse("main.dae", "file:///assets/a.dae#n").unwrap();
        assert_eq!(id.document, "/assets/a.dae");
    }

    #[test]
    fn given_malformed_references_when_parsing_then_error_is_returned() {
        for reference in ["", "#", "geom", "a.dae#", "#a#b", "#a b"] {
            assert!(
                matches!(
                    AbsoluteId::parse("main.dae", reference),
                    Err(DocumentError::MalformedReference { .. })
                ),
                "{reference:?} should be rejected"
            );
        }
    }

    #[test]
    fn given_windows_separators_when_normalizing_then_forward_slashes_are_used() {
        assert_eq!(normalize_path("a\\b\\..\\c.dae"), "a/c.dae");
        assert_eq!(normalize_path("./x/./y.dae"), "x/y.dae");
        assert_eq!(normalize_path("../up.dae"), "../up.dae");
    }
}
