//! Extraction runs
//!
//! Sources are processed one after another; a fatal failure in one source
//! is recorded and the run moves on. Bridges are applied once every graph
//! is built.

use crate::bridge::{apply_rules, BridgeRule};
use crate::builder::GraphBuilder;
use crate::context::SourceContext;
use crate::graph::SourceGraph;
use crate::sources::extractor_for;
use lineagebridge_core::{
    BridgeEdge, Config, Diagnostic, DiagnosticCode, DiagnosticsSink, EmissionRecord, EmissionSink, Report,
    SinkError, SourceConfig, SourceFailure,
};
use lineagebridge_readers::{read_artifact, Artifact};
use lineagebridge_sql::SchemaHint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A failure that leaves a source without a graph
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("source '{instance}' has no artifacts")]
    NoArtifacts { instance: String },

    #[error("none of the {count} artifacts of source '{instance}' could be read")]
    Unreadable { instance: String, count: usize },

    #[error("source '{instance}' is misconfigured: {message}")]
    Config { instance: String, message: String },
}

/// One configured source with its artifacts loaded
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub config: SourceConfig,
    pub artifacts: Vec<Artifact>,
    /// Column lists loaded from the source's hint files
    pub hints: SchemaHint,
}

impl SourceInput {
    pub fn new(config: SourceConfig, artifacts: Vec<Artifact>) -> Self {
        Self {
            config,
            artifacts,
            hints: SchemaHint::new(),
        }
    }

    pub fn with_hints(mut self, hints: SchemaHint) -> Self {
        self.hints = hints;
        self
    }
}

/// Build the graph of one source
///
/// Unreadable artifacts are reported and skipped; the source fails only
/// when it has no artifacts or none of them can be read.
pub fn extract_source(input: &SourceInput, config: &Config) -> Result<SourceGraph, FatalError> {
    let instance = input.config.instance().to_string();
    if input.artifacts.is_empty() {
        return Err(FatalError::NoArtifacts { instance });
    }

    let ctx = SourceContext::new(&input.config, config, input.hints.clone()).map_err(|e| FatalError::Config {
        instance: instance.clone(),
        message: format!("input_namespace: {}", e),
    })?;
    tracing::info!(source = %ctx.graph, artifacts = input.artifacts.len(), "extracting source");

    let mut builder = GraphBuilder::new(ctx.graph.clone());
    let mut extractor = extractor_for(&ctx);
    let mut readable = 0usize;

    for artifact in &input.artifacts {
        builder.set_artifact(Some(&artifact.name));
        match read_artifact(input.config.system, artifact, ctx.default_folder()) {
            Ok(parsed) => {
                readable += 1;
                tracing::debug!(artifact = %artifact.name, "artifact read");
                extractor.extract(artifact, parsed, &mut builder);
            }
            Err(err) => {
                tracing::warn!(artifact = %artifact.name, error = %err, "skipping unreadable artifact");
                builder.report(
                    Diagnostic::of(
                        DiagnosticCode::ArtifactMalformed,
                        format!("cannot read '{}': {}", artifact.name, err),
                    )
                    .in_artifact(artifact.name.clone()),
                );
            }
        }
    }

    if readable == 0 {
        return Err(FatalError::Unreadable {
            instance,
            count: input.artifacts.len(),
        });
    }

    builder.set_artifact(None);
    extractor.finish(&mut builder);

    let mut graph = builder.finish();
    for diagnostic in &mut graph.diagnostics {
        diagnostic.severity = config.severity.get_severity(diagnostic.code, diagnostic.severity);
    }
    tracing::info!(
        source = %graph.id,
        jobs = graph.jobs.len(),
        datasets = graph.datasets.len(),
        dependencies = graph.dependencies.len(),
        lineage = graph.lineage.len(),
        diagnostics = graph.diagnostics.len(),
        "source extracted"
    );
    Ok(graph)
}

/// Result of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub graphs: Vec<SourceGraph>,
    pub bridges: Vec<BridgeEdge>,
    pub failures: Vec<SourceFailure>,
    /// Run-level diagnostics (bridging); per-source ones live on the graphs
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
}

impl RunOutcome {
    /// Every diagnostic of the run, graph by graph, then run-level ones
    pub fn all_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.graphs
            .iter()
            .flat_map(|g| g.diagnostics.iter())
            .chain(self.diagnostics.iter())
    }

    /// True when sources were configured and none produced a graph
    pub fn all_failed(&self) -> bool {
        self.graphs.is_empty() && !self.failures.is_empty()
    }

    fn bridge_record(&self, bridge: &BridgeEdge) -> Option<EmissionRecord> {
        let key = |graph: &lineagebridge_core::GraphId, job| {
            self.graphs
                .iter()
                .find(|g| &g.id == graph)
                .and_then(|g| g.job(job))
                .map(|j| j.key.clone())
        };
        Some(EmissionRecord::Bridge {
            from_graph: bridge.from_graph.clone(),
            from_job: key(&bridge.from_graph, bridge.from_job)?,
            to_graph: bridge.to_graph.clone(),
            to_job: key(&bridge.to_graph, bridge.to_job)?,
            matched: bridge.matched.clone(),
        })
    }

    /// Write every record and diagnostic of the run
    pub fn emit(
        &self,
        env: &str,
        records: &mut dyn EmissionSink,
        diagnostics: &mut dyn DiagnosticsSink,
    ) -> Result<(), SinkError> {
        for graph in &self.graphs {
            for record in graph.to_records(env) {
                records.emit(record)?;
            }
        }
        for bridge in &self.bridges {
            if let Some(record) = self.bridge_record(bridge) {
                records.emit(record)?;
            }
        }
        records.flush()?;

        for diagnostic in self.all_diagnostics() {
            diagnostics.report(diagnostic.clone());
        }
        Ok(())
    }

    /// Summary report of the run
    pub fn report(&self) -> Report {
        let mut report = Report::from_diagnostics(self.all_diagnostics().cloned().collect());
        for failure in &self.failures {
            report.add_failure(failure.source.clone(), failure.message.clone());
        }

        let summary = &mut report.summary;
        summary.sources_processed = self.graphs.len();
        for graph in &self.graphs {
            summary.jobs += graph.jobs.len();
            summary.datasets += graph.datasets.len();
            summary.dependency_edges += graph.dependencies.len();
            summary.unresolved_edges += graph.unresolved().count();
            summary.lineage_edges += graph.lineage.len();
        }
        summary.bridge_edges = self.bridges.len();
        report.cancelled = self.cancelled;
        report
    }
}

/// Runs every configured source, then bridges the resulting graphs
pub struct ExtractionRun {
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl ExtractionRun {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run before the next source when set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn execute(&self, inputs: &[SourceInput]) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        for input in inputs {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(source = %input.config.instance(), "run cancelled");
                outcome.cancelled = true;
                break;
            }
            match extract_source(input, &self.config) {
                Ok(graph) => outcome.graphs.push(graph),
                Err(err) => {
                    tracing::warn!(source = %input.config.instance(), error = %err, "source failed");
                    outcome.failures.push(SourceFailure {
                        source: input.config.instance().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut rules = Vec::new();
        for rule in self.config.effective_bridges() {
            match BridgeRule::from_config(&rule) {
                Ok(rule) => rules.push(rule),
                Err(err) => outcome.diagnostics.push(
                    Diagnostic::of(DiagnosticCode::Warning, err.to_string())
                        .with_subject(format!("{} -> {}", rule.from, rule.to)),
                ),
            }
        }
        let (bridges, diagnostics) = apply_rules(&rules, &outcome.graphs);
        tracing::info!(graphs = outcome.graphs.len(), bridges = bridges.len(), "run finished");
        outcome.bridges = bridges;
        outcome.diagnostics.extend(diagnostics);
        for diagnostic in &mut outcome.diagnostics {
            diagnostic.severity = self.config.severity.get_severity(diagnostic.code, diagnostic.severity);
        }
        outcome
    }
}
