use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Severity level used by conversion issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single issue produced while resolving or converting a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Issues batched for one document, reported once when the document is done.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    issues: Vec<ValidationIssue>,
}

impl Diagnostics {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.push(ValidationIssue::warning(code, message));
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
            .count()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    /// Emit every collected issue through the log facade.
    pub fn log_all(&self, document: &str) {
        for issue in &self.issues {
            match issue.severity {
                Severity::Error | Severity::Warning => {
                    warn!("{document}: [{}] {}", issue.code, issue.message)
                }
                Severity::Info => info!("{document}: [{}] {}", issue.code, issue.message),
            }
        }
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }

    pub fn clear(&mut self) {
        self.issues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_mixed_issues_when_counting_warnings_then_info_is_ignored() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.warn("UNRESOLVED_ID", "missing #a");
        diagnostics.push(ValidationIssue::info("GENERATED_NORMALS", "mesh0"));

        assert_eq!(diagnostics.warning_count(), 1);
        assert!(diagnostics.has_code("GENERATED_NORMALS"));
        assert!(!diagnostics.has_code("UNKNOWN"));
    }
}
