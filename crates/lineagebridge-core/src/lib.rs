//! LineageBridge Core
//!
//! Shared entity model, diagnostics, configuration and sink contracts.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod identity;
pub mod model;
pub mod report;
pub mod sink;

pub use config::{BridgeRuleConfig, Config, ConfigError, DialectConfig, SeverityThreshold, SourceConfig};
pub use diagnostic::{Diagnostic, DiagnosticCategory, DiagnosticCode, Location, Severity};
pub use identity::{content_hash, normalize_dataset_name, preview, EntityKey, EntityType};
pub use model::{
    BridgeEdge, Confidence, Container, ContainerId, Dataset, DatasetId, DependencyEdge,
    DependencyKind, Field, FieldPath, GraphId, Job, JobId, JobKind, JobRef, LineageEdge,
    LineageEndpoint, LineageFact, SourceSystem, Transformation, TransformationKind,
};
pub use report::{Report, ReportSummary, ReportVersion, SourceFailure};
pub use sink::{DiagnosticsSink, EmissionRecord, EmissionSink, JsonLinesSink, SinkError};
