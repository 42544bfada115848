//! Dataflow graph files: record formats, transforms and I/O bindings
//!
//! Everything is collected first and bound in `finish`, since a transform
//! and the graph it belongs to usually live in different files.

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_core::{Confidence, Diagnostic, DiagnosticCode, Field, JobKind, LineageFact};
use lineagebridge_readers::{Artifact, GraphIo, ParsedArtifact, RecordFormat, XfrStatement};
use std::collections::BTreeMap;

const DATA_EXTENSIONS: &[&str] = &["dat", "txt", "csv", "gz", "dml"];

/// Dataset name of a graph input or output: the file name without its data
/// file extension, or the name as written when it is not a path
pub fn dataset_of_path(path: &str) -> String {
    let file = path
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .trim();
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && DATA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => {
            stem.to_string()
        }
        _ => file.to_string(),
    }
}

struct PendingTransform {
    artifact: String,
    stem: String,
    statements: Vec<XfrStatement>,
}

pub struct AbInitioExtractor<'a> {
    ctx: &'a SourceContext,
    records: Vec<RecordFormat>,
    transforms: Vec<PendingTransform>,
    io: BTreeMap<String, GraphIo>,
    graphs: Vec<String>,
}

impl<'a> AbInitioExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self {
            ctx,
            records: Vec::new(),
            transforms: Vec::new(),
            io: BTreeMap::new(),
            graphs: Vec::new(),
        }
    }

    fn add_graphs(&self, builder: &mut GraphBuilder) {
        let project = self.ctx.project();
        let container = builder.container(project, project);

        let mut names: Vec<&str> = self.graphs.iter().map(String::as_str).collect();
        for name in self.io.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }

        for name in names {
            let mut spec = JobSpec::new(name, name, container, JobKind::DataflowGraph);
            if let Some(io) = self.io.get(name) {
                spec = spec
                    .property("inputs", io.inputs.join(","))
                    .property("outputs", io.outputs.join(","));
            }
            let job = builder.job(spec);
            let Some(io) = self.io.get(name) else {
                continue;
            };
            for input in &io.inputs {
                let id = builder.dataset(&dataset_of_path(input));
                builder.add_read(job, id);
            }
            for output in &io.outputs {
                let id = builder.dataset(&dataset_of_path(output));
                builder.add_write(job, id);
            }
        }
    }

    fn bind_transform(&self, transform: &PendingTransform, builder: &mut GraphBuilder) {
        builder.set_artifact(Some(&transform.artifact));
        let transform_lineage = self
            .ctx
            .mapping
            .infer_transform(transform.statements.iter().map(|s| s.text.as_str()));
        for diagnostic in transform_lineage.all_diagnostics() {
            builder.report(diagnostic.clone().with_subject(transform.stem.clone()));
        }
        let lineages = &transform_lineage.outputs;

        let bound = self
            .io
            .iter()
            .find(|(graph, _)| graph.eq_ignore_ascii_case(&transform.stem))
            .and_then(|(graph, io)| Some((graph, io.inputs.first()?, io.outputs.first()?)));

        match bound {
            Some((graph, input, output)) => {
                let job = builder.job_id(graph);
                let (source, target) = (dataset_of_path(input), dataset_of_path(output));
                for lineage in lineages {
                    builder.add_facts(lineage.to_facts(&source, &target), job);
                }
            }
            None if self.records.len() >= 2 => {
                let (source, target) = (&self.records[0].name, &self.records[1].name);
                tracing::debug!(transform = %transform.stem, %source, %target, "transform bound by record order");
                for lineage in lineages {
                    let facts = lineage.to_facts(source, target).into_iter().map(|fact| LineageFact {
                        confidence: Confidence::Low,
                        ..fact
                    });
                    builder.add_facts(facts, None);
                }
            }
            None => builder.report(
                Diagnostic::of(
                    DiagnosticCode::UnresolvedDatasetReference,
                    format!(
                        "transform '{}' is bound to no graph and fewer than two record formats are known",
                        transform.stem
                    ),
                )
                .with_subject(transform.stem.clone()),
            ),
        }
    }
}

impl SourceExtractor for AbInitioExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        match parsed {
            ParsedArtifact::RecordFormat(record) => {
                let fields = record
                    .fields
                    .iter()
                    .map(|f| Field::typed(f.name.clone(), f.data_type.clone()));
                let id = builder.declare_dataset(&record.name, fields.collect::<Vec<_>>());
                builder.dataset_property(id, "record_format", artifact.name.as_str());
                self.records.push(record);
            }
            ParsedArtifact::Transform(statements) => self.transforms.push(PendingTransform {
                artifact: artifact.name.clone(),
                stem: artifact.stem().to_string(),
                statements,
            }),
            ParsedArtifact::IoMapping(io) => self.io.extend(io),
            ParsedArtifact::Graph(name) => {
                if !self.graphs.contains(&name) {
                    self.graphs.push(name);
                }
            }
            _ => {}
        }
    }

    fn finish(&mut self, builder: &mut GraphBuilder) {
        builder.set_artifact(None);
        self.add_graphs(builder);
        for transform in &self.transforms {
            self.bind_transform(transform, builder);
        }
        builder.set_artifact(None);
    }
}
