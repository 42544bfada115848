//! Workflow repository exports (pmrep XML)
//!
//! Folders become containers; workflows, sessions and mappings become jobs
//! keyed `folder/name`. Mapping column lineage is traced upstream from each
//! target port through connectors and port expressions.

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_core::{
    Confidence, ContainerId, DependencyKind, Diagnostic, DiagnosticCode, Field, FieldPath, JobId,
    JobKind, LineageFact, Transformation, TransformationKind,
};
use lineagebridge_readers::informatica::{
    Connector, Folder, Instance, InstanceRole, Mapping, Port, Session, SqlAttribute, TableDef, Workflow,
};
use lineagebridge_readers::{Artifact, ParsedArtifact};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static LINK_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstatus\s*(=|<>|!=)\s*'?([A-Za-z_]+)").expect("valid regex")
});

/// Dependency kind of a workflow link condition
///
/// Only `Status = <state>` tests are understood; empty and other conditions
/// are `unknown`.
pub fn link_kind(condition: Option<&str>) -> DependencyKind {
    let Some(caps) = condition.and_then(|c| LINK_STATUS.captures(c)) else {
        return DependencyKind::Unknown;
    };
    if &caps[1] != "=" {
        return DependencyKind::Unknown;
    }
    match caps[2].to_ascii_uppercase().as_str() {
        "SUCCEEDED" => DependencyKind::Success,
        "FAILED" | "ABORTED" => DependencyKind::Failure,
        _ => DependencyKind::Unknown,
    }
}

fn is_start(name: &str, task_type: &str) -> bool {
    task_type.eq_ignore_ascii_case("start") || name.eq_ignore_ascii_case("start")
}

pub struct InformaticaExtractor<'a> {
    ctx: &'a SourceContext,
    /// (session, mapping key) pairs resolved once every artifact is read
    sessions: Vec<(JobId, String)>,
}

impl<'a> InformaticaExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self {
            ctx,
            sessions: Vec::new(),
        }
    }

    fn key(folder: &Folder, name: &str) -> String {
        format!("{}/{}", folder.name, name)
    }

    fn declare(&self, def: &TableDef, builder: &mut GraphBuilder) -> String {
        let name = self.ctx.table(&def.qualified_name());
        let fields = def.fields.iter().map(|(field, data_type)| Field {
            name: field.clone(),
            data_type: data_type.clone(),
        });
        builder.declare_dataset(&name, fields);
        name
    }

    fn apply_sql(&self, job: JobId, attributes: &[SqlAttribute], builder: &mut GraphBuilder) {
        for attribute in attributes {
            let lineage = self.ctx.infer_sql(&attribute.text, None);
            tracing::debug!(attribute = %attribute.name, kind = %lineage.kind, "embedded SQL");
            builder.apply_sql(job, &lineage);
        }
    }

    fn add_folder(&mut self, folder: &Folder, builder: &mut GraphBuilder) {
        let container = builder.container(&folder.name, &folder.name);
        for def in folder.sources.iter().chain(&folder.targets) {
            self.declare(def, builder);
        }
        for mapping in &folder.mappings {
            self.add_mapping(folder, mapping, container, builder);
        }
        for session in &folder.sessions {
            self.add_session(folder, session, container, builder);
        }
        for workflow in &folder.workflows {
            self.add_workflow(folder, workflow, container, builder);
        }
    }

    fn add_mapping(&self, folder: &Folder, mapping: &Mapping, container: ContainerId, builder: &mut GraphBuilder) {
        let key = Self::key(folder, &mapping.name);
        let job = builder.job(JobSpec::new(&key, &mapping.name, container, JobKind::Mapping));

        for def in mapping.sources.iter().chain(&mapping.targets) {
            self.declare(def, builder);
        }

        let dataset_of = |instance: &Instance, defs: [&[TableDef]; 2]| {
            defs.iter()
                .flat_map(|d| d.iter())
                .find(|d| d.name.eq_ignore_ascii_case(&instance.reference))
                .map(|d| self.ctx.table(&d.qualified_name()))
                .unwrap_or_else(|| self.ctx.table(&instance.reference))
        };

        let mut tracer = MappingTracer::new(self.ctx, folder, mapping);
        for instance in &mapping.instances {
            match instance.role {
                InstanceRole::Source => {
                    let name = dataset_of(instance, [mapping.sources.as_slice(), folder.sources.as_slice()]);
                    let id = builder.dataset(&name);
                    builder.add_read(job, id);
                    tracer.sources.insert(instance.name.as_str(), name);
                }
                InstanceRole::Target => {
                    let name = dataset_of(instance, [mapping.targets.as_slice(), folder.targets.as_slice()]);
                    let id = builder.dataset(&name);
                    builder.add_write(job, id);
                    tracer.targets.insert(instance.name.as_str(), name);
                }
                InstanceRole::Transformation => {}
            }
        }

        let facts = tracer.target_facts();
        builder.add_facts(facts, Some(job));
        for diagnostic in tracer.diagnostics {
            builder.report(diagnostic.with_subject(key.clone()));
        }

        self.apply_sql(job, &mapping.sql, builder);
    }

    fn add_session(&mut self, folder: &Folder, session: &Session, container: ContainerId, builder: &mut GraphBuilder) {
        let mut spec = JobSpec::new(Self::key(folder, &session.name), &session.name, container, JobKind::Session);
        if let Some(mapping) = &session.mapping {
            spec = spec.property("mapping", mapping.as_str());
        }
        let job = builder.job(spec);
        if let Some(mapping) = &session.mapping {
            self.sessions.push((job, Self::key(folder, mapping)));
        }
        self.apply_sql(job, &session.sql, builder);
    }

    fn add_workflow(&self, folder: &Folder, workflow: &Workflow, container: ContainerId, builder: &mut GraphBuilder) {
        let job = builder.job(JobSpec::new(
            Self::key(folder, &workflow.name),
            &workflow.name,
            container,
            JobKind::Workflow,
        ));
        self.apply_sql(job, &workflow.sql, builder);

        let mut task_keys: HashMap<&str, String> = HashMap::new();
        let mut start_tasks: HashSet<&str> = HashSet::new();
        for task in &workflow.tasks {
            if is_start(&task.name, &task.task_type) {
                start_tasks.insert(task.name.as_str());
                continue;
            }
            let kind = JobKind::from_informatica_task(&task.task_type);
            let key = match kind {
                JobKind::Session | JobKind::Workflow => Self::key(folder, &task.task_name),
                _ => format!("{}/{}/{}", folder.name, workflow.name, task.name),
            };
            builder.job(
                JobSpec::new(&key, &task.task_name, container, kind)
                    .property("workflow", workflow.name.as_str()),
            );
            task_keys.insert(task.name.as_str(), key);
        }

        let key_of = |task: &str| {
            task_keys
                .get(task)
                .cloned()
                .unwrap_or_else(|| Self::key(folder, task))
        };
        for link in &workflow.links {
            if start_tasks.contains(link.from_task.as_str()) || is_start(&link.from_task, "") {
                continue;
            }
            let to_key = key_of(&link.to_task);
            let waiting = match builder.job_id(&to_key) {
                Some(id) => id,
                None => builder.job(JobSpec::new(&to_key, &link.to_task, container, JobKind::Unknown)),
            };
            builder.depend(waiting, &key_of(&link.from_task), link_kind(link.condition.as_deref()));
        }
    }
}

impl SourceExtractor for InformaticaExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        let ParsedArtifact::Repository(export) = parsed else {
            return;
        };
        tracing::debug!(artifact = %artifact.name, folders = export.folders.len(), "repository export");
        for folder in &export.folders {
            self.add_folder(folder, builder);
        }
    }

    fn finish(&mut self, builder: &mut GraphBuilder) {
        builder.set_artifact(None);
        for (session, mapping_key) in std::mem::take(&mut self.sessions) {
            let Some(mapping) = builder.job_id(&mapping_key) else {
                let session_key = builder.job_ref(session).map(|j| j.key.clone()).unwrap_or_default();
                builder.report(
                    Diagnostic::of(
                        DiagnosticCode::UnresolvedJobReference,
                        format!("session '{}' runs mapping '{}', which is not in this export", session_key, mapping_key),
                    )
                    .with_subject(session_key)
                    .with_related(vec![mapping_key]),
                );
                continue;
            };
            let (reads, writes) = builder.io_of(mapping);
            for id in reads {
                builder.add_read(session, id);
            }
            for id in writes {
                builder.add_write(session, id);
            }
        }
    }
}

/// Where a traced value comes from, and what it went through on the way
#[derive(Debug, Clone, Default)]
struct Trace {
    expressions: Vec<String>,
    aggregation: Option<String>,
    unparsed: bool,
}

impl Trace {
    /// This step followed by the steps further upstream
    fn then(&self, upstream: &Trace) -> Trace {
        let mut expressions = self.expressions.clone();
        expressions.extend(upstream.expressions.iter().cloned());
        Trace {
            expressions,
            aggregation: self.aggregation.clone().or_else(|| upstream.aggregation.clone()),
            unparsed: self.unparsed || upstream.unparsed,
        }
    }

    fn transformation(&self, fallback: String) -> Transformation {
        let description = if self.expressions.is_empty() {
            fallback
        } else {
            self.expressions.join("; ")
        };
        match (&self.aggregation, self.expressions.is_empty()) {
            (Some(function), _) => Transformation::aggregation(function.clone(), description),
            (None, true) => Transformation::direct(description),
            (None, false) => Transformation::new(TransformationKind::Derived, description),
        }
    }
}

/// A source field reached from a port
#[derive(Debug, Clone)]
struct Origin {
    dataset: String,
    field: String,
    trace: Trace,
}

/// Add `origin`, merging it into an earlier origin for the same source field
fn absorb(origins: &mut Vec<Origin>, origin: Origin) {
    let Some(idx) = origins
        .iter()
        .position(|o| o.dataset == origin.dataset && o.field == origin.field)
    else {
        origins.push(origin);
        return;
    };
    let existing = &mut origins[idx];
    for expression in origin.trace.expressions {
        if !existing.trace.expressions.contains(&expression) {
            existing.trace.expressions.push(expression);
        }
    }
    if existing.trace.aggregation.is_none() {
        existing.trace.aggregation = origin.trace.aggregation;
    }
    existing.trace.unparsed |= origin.trace.unparsed;
}

struct MappingTracer<'m> {
    ctx: &'m SourceContext,
    folder: &'m Folder,
    mapping: &'m Mapping,
    instances: HashMap<&'m str, &'m Instance>,
    /// Connectors by (to instance, lowercase to field)
    incoming: HashMap<(String, String), Vec<&'m Connector>>,
    sources: HashMap<&'m str, String>,
    targets: HashMap<&'m str, String>,
    /// Origins by (instance, lowercase field)
    traced: HashMap<(String, String), Vec<Origin>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'m> MappingTracer<'m> {
    fn new(ctx: &'m SourceContext, folder: &'m Folder, mapping: &'m Mapping) -> Self {
        let mut incoming: HashMap<(String, String), Vec<&Connector>> = HashMap::new();
        for connector in &mapping.connectors {
            incoming
                .entry((connector.to_instance.clone(), connector.to_field.to_lowercase()))
                .or_default()
                .push(connector);
        }
        Self {
            ctx,
            folder,
            mapping,
            instances: mapping.instances.iter().map(|i| (i.name.as_str(), i)).collect(),
            incoming,
            sources: HashMap::new(),
            targets: HashMap::new(),
            traced: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn port(&self, instance: &str, field: &str) -> Option<&'m Port> {
        let reference = self.instances.get(instance).map(|i| i.reference.as_str()).unwrap_or(instance);
        self.mapping
            .transformations
            .iter()
            .chain(&self.folder.transformations)
            .filter(|t| t.name == reference || t.name == instance)
            .flat_map(|t| t.ports.iter())
            .chain(
                self.mapping
                    .loose_ports
                    .iter()
                    .filter(|(owner, _)| owner == instance)
                    .map(|(_, port)| port),
            )
            .find(|p| p.name.eq_ignore_ascii_case(field))
    }

    /// Facts for every connector that lands on a target instance
    fn target_facts(&mut self) -> Vec<LineageFact> {
        let mapping = self.mapping;
        let mut facts = Vec::new();
        for connector in &mapping.connectors {
            let Some(target) = self.targets.get(connector.to_instance.as_str()).cloned() else {
                continue;
            };
            let (origins, _) = self.trace(&connector.from_instance, &connector.from_field, &mut HashSet::new());

            for origin in origins {
                let fact = LineageFact::new(
                    FieldPath::column(origin.dataset, origin.field.clone()),
                    FieldPath::column(target.clone(), connector.to_field.clone()),
                    origin.trace.transformation(origin.field),
                    if origin.trace.unparsed { Confidence::Low } else { Confidence::High },
                );
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
            }
        }
        facts
    }

    /// Source fields feeding `instance.field`, each with the steps in between
    ///
    /// Paths reaching the same source field are merged, and results are
    /// cached per port. The flag is set when a loop cut the walk
    /// short; such partial results are not cached.
    fn trace(
        &mut self,
        instance: &str,
        field: &str,
        visiting: &mut HashSet<(String, String)>,
    ) -> (Vec<Origin>, bool) {
        let node = (instance.to_string(), field.to_lowercase());
        if let Some(cached) = self.traced.get(&node) {
            return (cached.clone(), false);
        }
        if !visiting.insert(node.clone()) {
            return (Vec::new(), true);
        }

        let mut origins = Vec::new();
        let mut cut = false;
        if let Some(dataset) = self.sources.get(instance) {
            origins.push(Origin {
                dataset: dataset.clone(),
                field: field.to_string(),
                trace: Trace::default(),
            });
        } else {
            let expression = self
                .port(instance, field)
                .and_then(|p| p.expression.as_deref())
                .map(str::trim)
                .filter(|e| !e.is_empty() && !e.eq_ignore_ascii_case(field));

            match expression {
                Some(expression) => {
                    let lineage = self.ctx.mapping.infer(field, expression, true);
                    self.diagnostics.extend(lineage.diagnostics.iter().cloned());

                    let step = Trace {
                        expressions: vec![expression.to_string()],
                        aggregation: match lineage.transformation.kind {
                            TransformationKind::Aggregation => lineage.transformation.aggregation.clone(),
                            _ => None,
                        },
                        unparsed: lineage.confidence == Confidence::Low,
                    };
                    for input in &lineage.inputs {
                        let (upstream, truncated) = self.trace(instance, &input.field, visiting);
                        cut |= truncated;
                        for origin in upstream {
                            absorb(
                                &mut origins,
                                Origin {
                                    trace: step.then(&origin.trace),
                                    ..origin
                                },
                            );
                        }
                    }
                }
                None => {
                    let upstream: Vec<&Connector> = self.incoming.get(&node).cloned().unwrap_or_default();
                    for connector in upstream {
                        let (found, truncated) = self.trace(&connector.from_instance, &connector.from_field, visiting);
                        cut |= truncated;
                        for origin in found {
                            absorb(&mut origins, origin);
                        }
                    }
                }
            }
        }

        visiting.remove(&node);
        if !cut {
            self.traced.insert(node, origins.clone());
        }
        (origins, cut)
    }
}
