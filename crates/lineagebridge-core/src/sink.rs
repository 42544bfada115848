//! Emission and diagnostics sinks
//!
//! The finished graph leaves the engine as a flat sequence of typed records.
//! Sinks are write-only and order-insensitive; deduplication and versioning
//! belong to whatever storage sits behind them.

use crate::diagnostic::Diagnostic;
use crate::model::{
    Confidence, DependencyKind, Field, FieldPath, GraphId, JobKind, Transformation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum EmissionRecord {
    Container {
        graph: GraphId,
        urn: String,
        key: String,
        name: String,
        /// Member job keys in first-seen order
        jobs: Vec<String>,
        properties: BTreeMap<String, String>,
    },
    Job {
        graph: GraphId,
        urn: String,
        key: String,
        name: String,
        container: String,
        kind: JobKind,
        reads: Vec<String>,
        writes: Vec<String>,
        properties: BTreeMap<String, String>,
    },
    Dataset {
        graph: GraphId,
        urn: String,
        name: String,
        fields: Vec<Field>,
        declared: bool,
        properties: BTreeMap<String, String>,
    },
    Dependency {
        graph: GraphId,
        from: String,
        to: String,
        kind: DependencyKind,
        resolved: bool,
    },
    Lineage {
        graph: GraphId,
        source: FieldPath,
        target: FieldPath,
        transformation: Transformation,
        confidence: Confidence,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job: Option<String>,
    },
    Bridge {
        from_graph: GraphId,
        from_job: String,
        to_graph: GraphId,
        to_job: String,
        matched: String,
    },
}

impl EmissionRecord {
    /// Record type tag
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Container { .. } => "container",
            Self::Job { .. } => "job",
            Self::Dataset { .. } => "dataset",
            Self::Dependency { .. } => "dependency",
            Self::Lineage { .. } => "lineage",
            Self::Bridge { .. } => "bridge",
        }
    }
}

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives finished graph records
pub trait EmissionSink {
    fn emit(&mut self, record: EmissionRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Receives recoverable anomaly records
pub trait DiagnosticsSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl EmissionSink for Vec<EmissionRecord> {
    fn emit(&mut self, record: EmissionRecord) -> Result<(), SinkError> {
        self.push(record);
        Ok(())
    }
}

impl DiagnosticsSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of records written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EmissionSink for JsonLinesSink<W> {
    fn emit(&mut self, record: EmissionRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
