//! Diagnostic codes and anomaly reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Malformed artifacts (1xxx)
    /// An artifact could not be read at all (bad XML, bad JSON, no statements)
    ArtifactMalformed,

    /// A scheduler condition string failed to tokenize or parse
    ConditionParseError,

    /// An embedded SQL statement could not be parsed
    SqlParseError,

    /// A field-mapping expression could not be parsed
    MappingParseError,

    /// A calc script has unbalanced blocks or unreadable statements
    CalcParseError,

    // Unresolvable references (2xxx)
    /// A dependency names a job absent from the artifact set
    UnresolvedJobReference,

    /// A lineage edge names a dataset absent from the artifact set
    UnresolvedDatasetReference,

    /// A column reference could not be attributed to any input
    UnresolvedColumn,

    /// A bridge candidate did not match any job of the target graph
    UnresolvedBridgeTarget,

    // Ambiguous inference (3xxx)
    /// A column could come from more than one input relation
    AmbiguousColumn,

    /// SQL is assembled at runtime; only table-level lineage was recovered
    SqlDynamic,

    /// SELECT * encountered but cannot expand (no schema hint)
    SqlSelectStarUnexpandable,

    /// Statement kind carries no lineage we know how to trace
    SqlUnsupportedStatement,

    // Structural anomalies (4xxx)
    /// Dependency edges form a cycle
    DependencyCycle,

    /// A job depends on itself
    SelfDependency,

    /// Two records with the same identity key disagree on a property
    IdentityConflict,

    // General (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactMalformed => "ARTIFACT_MALFORMED",
            Self::ConditionParseError => "CONDITION_PARSE_ERROR",
            Self::SqlParseError => "SQL_PARSE_ERROR",
            Self::MappingParseError => "MAPPING_PARSE_ERROR",
            Self::CalcParseError => "CALC_PARSE_ERROR",
            Self::UnresolvedJobReference => "UNRESOLVED_JOB_REFERENCE",
            Self::UnresolvedDatasetReference => "UNRESOLVED_DATASET_REFERENCE",
            Self::UnresolvedColumn => "UNRESOLVED_COLUMN",
            Self::UnresolvedBridgeTarget => "UNRESOLVED_BRIDGE_TARGET",
            Self::AmbiguousColumn => "AMBIGUOUS_COLUMN",
            Self::SqlDynamic => "SQL_DYNAMIC",
            Self::SqlSelectStarUnexpandable => "SQL_SELECT_STAR_UNEXPANDABLE",
            Self::SqlUnsupportedStatement => "SQL_UNSUPPORTED_STATEMENT",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
            Self::SelfDependency => "SELF_DEPENDENCY",
            Self::IdentityConflict => "IDENTITY_CONFLICT",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }

    /// Error category this code is reported under
    pub fn category(&self) -> DiagnosticCategory {
        match self {
            Self::ArtifactMalformed
            | Self::ConditionParseError
            | Self::SqlParseError
            | Self::MappingParseError
            | Self::CalcParseError => DiagnosticCategory::MalformedArtifact,
            Self::UnresolvedJobReference
            | Self::UnresolvedDatasetReference
            | Self::UnresolvedColumn
            | Self::UnresolvedBridgeTarget => DiagnosticCategory::UnresolvableReference,
            Self::AmbiguousColumn
            | Self::SqlDynamic
            | Self::SqlSelectStarUnexpandable
            | Self::SqlUnsupportedStatement => DiagnosticCategory::AmbiguousInference,
            Self::DependencyCycle | Self::SelfDependency | Self::IdentityConflict => {
                DiagnosticCategory::StructuralAnomaly
            }
            Self::Info | Self::Warning => DiagnosticCategory::General,
        }
    }

    /// Severity used when no override is configured
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::ArtifactMalformed
            | Self::ConditionParseError
            | Self::SqlParseError
            | Self::MappingParseError
            | Self::CalcParseError
            | Self::DependencyCycle
            | Self::UnresolvedJobReference
            | Self::UnresolvedDatasetReference
            | Self::UnresolvedColumn
            | Self::AmbiguousColumn
            | Self::SqlDynamic
            | Self::SqlSelectStarUnexpandable
            | Self::SelfDependency
            | Self::IdentityConflict
            | Self::Warning => Severity::Warn,
            Self::UnresolvedBridgeTarget | Self::SqlUnsupportedStatement | Self::Info => {
                Severity::Info
            }
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recoverable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    MalformedArtifact,
    UnresolvableReference,
    AmbiguousInference,
    StructuralAnomaly,
    General,
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - output is usable but incomplete
    Warn,

    /// Error - the affected artifact contributed nothing
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Position inside a source artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Artifact identifier (file name, object name)
    pub artifact: String,

    /// Optional line number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    /// Optional column number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Location {
    /// Create a new location with just an artifact name
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            line: None,
            column: None,
        }
    }

    /// Create a location with artifact and line number
    pub fn with_line(artifact: impl Into<String>, line: usize) -> Self {
        Self {
            artifact: artifact.into(),
            line: Some(line),
            column: None,
        }
    }

    /// Create a location with artifact, line, and column
    pub fn with_position(artifact: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            artifact: artifact.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{}:{}:{}", self.artifact, line, col),
            (Some(line), None) => write!(f, "{}:{}", self.artifact, line),
            _ => write!(f, "{}", self.artifact),
        }
    }
}

/// An anomaly record with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Entity the diagnostic is about (job key, dataset name, column)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Other entities involved (cycle members, candidate columns)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            subject: None,
            related: Vec::new(),
        }
    }

    /// Create a diagnostic at the code's default severity
    pub fn of(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, code.default_severity(), message)
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the location to a bare artifact name
    pub fn in_artifact(self, artifact: impl Into<String>) -> Self {
        self.with_location(Location::new(artifact))
    }

    /// Set the subject entity
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set related entities
    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }

    /// Artifact identifier, if any
    pub fn artifact(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.artifact.as_str())
    }
}
