//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::diagnostic::{Diagnostic, Severity};
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of diagnostics
    pub total: usize,

    /// Number of errors
    pub errors: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of info messages
    pub info: usize,

    /// Sources whose graph was built
    pub sources_processed: usize,

    /// Sources that failed fatally
    pub sources_failed: usize,

    pub jobs: usize,
    pub datasets: usize,
    pub dependency_edges: usize,
    pub unresolved_edges: usize,
    pub lineage_edges: usize,
    pub bridge_edges: usize,
}

/// Per-source fatal failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    /// Instance label of the failed source
    pub source: String,
    pub message: String,
}

/// Run report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SourceFailure>,

    /// All diagnostics
    pub diagnostics: Vec<Diagnostic>,

    /// Whether the run was cancelled before every source was processed
    #[serde(default)]
    pub cancelled: bool,
}

impl Report {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary::default(),
            failures: Vec::new(),
            diagnostics: Vec::new(),
            cancelled: false,
        }
    }

    /// Create a report from diagnostics
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let mut report = Self::new();
        for diagnostic in diagnostics {
            report.add_diagnostic(diagnostic);
        }
        report
    }

    /// Add a diagnostic to the report
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => self.summary.info += 1,
        }

        self.summary.total += 1;
        self.diagnostics.push(diagnostic);
    }

    /// Record a fatal per-source failure
    pub fn add_failure(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.summary.sources_failed += 1;
        self.failures.push(SourceFailure {
            source: source.into(),
            message: message.into(),
        });
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0 || !self.failures.is_empty()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Diagnostic, DiagnosticCode, Severity};

    #[test]
    fn empty_report() {
        let report = Report::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total, 0);
        assert!(!report.has_errors());
    }

    #[test]
    fn report_with_diagnostics() {
        let diagnostics = vec![
            Diagnostic::new(DiagnosticCode::ArtifactMalformed, Severity::Error, "bad XML"),
            Diagnostic::new(DiagnosticCode::DependencyCycle, Severity::Warn, "A -> B -> A"),
            Diagnostic::new(DiagnosticCode::Info, Severity::Info, "done"),
        ];

        let report = Report::from_diagnostics(diagnostics);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.info, 1);
        assert!(report.has_errors());
    }

    #[test]
    fn failures_count_as_errors() {
        let mut report = Report::new();
        report.add_failure("oracle", "no artifacts");
        assert_eq!(report.summary.sources_failed, 1);
        assert!(report.has_errors());
    }

    #[test]
    fn report_serialization() {
        let report = Report::new();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"diagnostics\""));
        assert!(!json.contains("\"failures\""));
    }
}
