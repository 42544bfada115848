//! Entity graph builder
//!
//! Collects containers, jobs, datasets and edges for one source system and
//! closes them into a [`SourceGraph`]. Records sharing a key are merged:
//! collections are unioned, scalar properties are last-write-wins, and a
//! conflicting redefinition is reported rather than rejected.

use crate::cycles::find_cycles;
use crate::graph::SourceGraph;
use lineagebridge_core::{
    Container, ContainerId, Dataset, DatasetId, DependencyEdge, DependencyKind, Diagnostic,
    DiagnosticCode, Field, FieldPath, GraphId, Job, JobId, JobKind, JobRef, LineageEdge,
    LineageEndpoint, LineageFact, Location,
};
use lineagebridge_sql::SqlLineage;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One job record as a reader describes it
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub key: String,
    pub name: String,
    pub container: ContainerId,
    pub kind: JobKind,
    pub properties: BTreeMap<String, String>,
    /// Changes to a job that may be defined in another artifact
    pub update: bool,
    /// False when `container` is a placeholder the record did not name
    pub container_stated: bool,
}

impl JobSpec {
    pub fn new(key: impl Into<String>, name: impl Into<String>, container: ContainerId, kind: JobKind) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            container,
            kind,
            properties: BTreeMap::new(),
            update: false,
            container_stated: true,
        }
    }

    /// Mark the record as an update
    ///
    /// An update sets only what it names: its values replace earlier ones
    /// without a conflict, and an unstated container keeps the job where a
    /// full definition put it.
    pub fn as_update(mut self, container_stated: bool) -> Self {
        self.update = true;
        self.container_stated = container_stated;
        self
    }

    /// Add a property; empty values are dropped
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.properties.insert(key.into(), value);
        }
        self
    }
}

#[derive(Debug, Clone)]
struct PendingDependency {
    from: JobId,
    target: String,
    kind: DependencyKind,
    artifact: Option<String>,
}

pub struct GraphBuilder {
    id: GraphId,
    containers: Vec<Container>,
    container_keys: HashMap<String, ContainerId>,
    jobs: Vec<Job>,
    job_keys: HashMap<String, JobId>,
    /// Jobs sitting in a placeholder container until a definition names one
    placeholder_container: HashSet<JobId>,
    datasets: Vec<Dataset>,
    dataset_keys: HashMap<String, DatasetId>,
    dependencies: Vec<PendingDependency>,
    lineage: Vec<(LineageFact, Option<JobId>)>,
    diagnostics: Vec<Diagnostic>,
    artifact: Option<String>,
}

impl GraphBuilder {
    pub fn new(id: GraphId) -> Self {
        Self {
            id,
            containers: Vec::new(),
            container_keys: HashMap::new(),
            jobs: Vec::new(),
            job_keys: HashMap::new(),
            placeholder_container: HashSet::new(),
            datasets: Vec::new(),
            dataset_keys: HashMap::new(),
            dependencies: Vec::new(),
            lineage: Vec::new(),
            diagnostics: Vec::new(),
            artifact: None,
        }
    }

    pub fn id(&self) -> &GraphId {
        &self.id
    }

    /// Artifact that diagnostics without a location are attributed to
    pub fn set_artifact(&mut self, artifact: Option<&str>) {
        self.artifact = artifact.map(str::to_string);
    }

    /// Get or create a container
    pub fn container(&mut self, key: &str, name: &str) -> ContainerId {
        if let Some(&id) = self.container_keys.get(key) {
            if !name.is_empty() {
                self.containers[id.index()].name = name.to_string();
            }
            return id;
        }

        let id = ContainerId(self.containers.len() as u32);
        self.containers.push(Container {
            id,
            key: key.to_string(),
            name: if name.is_empty() { key.to_string() } else { name.to_string() },
            jobs: Vec::new(),
            properties: BTreeMap::new(),
        });
        self.container_keys.insert(key.to_string(), id);
        id
    }

    pub fn container_property(&mut self, id: ContainerId, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(container) = self.containers.get_mut(id.index()) {
            if !value.trim().is_empty() {
                container.properties.insert(key.to_string(), value);
            }
        }
    }

    /// Add a job, or merge it into the job already holding its key
    pub fn job(&mut self, spec: JobSpec) -> JobId {
        let Some(&id) = self.job_keys.get(&spec.key) else {
            let id = JobId(self.jobs.len() as u32);
            if let Some(container) = self.containers.get_mut(spec.container.index()) {
                container.jobs.push(id);
            }
            self.jobs.push(Job {
                id,
                key: spec.key.clone(),
                name: spec.name,
                container: spec.container,
                kind: spec.kind,
                reads: Vec::new(),
                writes: Vec::new(),
                properties: spec.properties,
            });
            if !spec.container_stated {
                self.placeholder_container.insert(id);
            }
            self.job_keys.insert(spec.key, id);
            return id;
        };

        let mut conflicts = Vec::new();
        let previous_container = self.jobs[id.index()].container;
        if spec.container_stated {
            let placeholder = self.placeholder_container.remove(&id);
            if previous_container != spec.container {
                if !placeholder && !spec.update {
                    conflicts.push("container".to_string());
                }
                if let Some(old) = self.containers.get_mut(previous_container.index()) {
                    old.jobs.retain(|&j| j != id);
                }
                if let Some(new) = self.containers.get_mut(spec.container.index()) {
                    new.jobs.push(id);
                }
                self.jobs[id.index()].container = spec.container;
            }
        }

        let job = &mut self.jobs[id.index()];
        if !spec.name.is_empty() {
            job.name = spec.name;
        }
        if spec.kind != JobKind::Unknown {
            if !spec.update && job.kind != JobKind::Unknown && job.kind != spec.kind {
                conflicts.push("kind".to_string());
            }
            job.kind = spec.kind;
        }
        for (key, value) in spec.properties {
            if value.trim().is_empty() {
                continue;
            }
            if !spec.update && job.properties.get(&key).is_some_and(|old| !old.is_empty() && *old != value) {
                conflicts.push(key.clone());
            }
            job.properties.insert(key, value);
        }

        if !conflicts.is_empty() {
            let message = format!(
                "job '{}' is defined more than once with different {}; the last definition wins",
                spec.key,
                conflicts.join(", ")
            );
            self.report(
                Diagnostic::of(DiagnosticCode::IdentityConflict, message)
                    .with_subject(spec.key)
                    .with_related(conflicts),
            );
        }
        id
    }

    pub fn job_id(&self, key: &str) -> Option<JobId> {
        self.job_keys.get(key).copied()
    }

    pub fn job_ref(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.index())
    }

    pub fn set_job_property(&mut self, id: JobId, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(job) = self.jobs.get_mut(id.index()) {
            if !value.trim().is_empty() {
                job.properties.insert(key.to_string(), value);
            }
        }
    }

    /// Get or create a dataset that is only referenced
    pub fn dataset(&mut self, name: &str) -> DatasetId {
        let key = name.trim().to_lowercase();
        if let Some(&id) = self.dataset_keys.get(&key) {
            return id;
        }

        let id = DatasetId(self.datasets.len() as u32);
        self.datasets.push(Dataset {
            id,
            name: name.trim().to_string(),
            fields: Vec::new(),
            declared: false,
            properties: BTreeMap::new(),
        });
        self.dataset_keys.insert(key, id);
        id
    }

    /// Get or create a dataset the artifacts describe, unioning its fields
    pub fn declare_dataset(&mut self, name: &str, fields: impl IntoIterator<Item = Field>) -> DatasetId {
        let id = self.dataset(name);
        let dataset = &mut self.datasets[id.index()];
        dataset.declared = true;
        for field in fields {
            merge_field(&mut dataset.fields, field);
        }
        id
    }

    pub fn dataset_property(&mut self, id: DatasetId, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(dataset) = self.datasets.get_mut(id.index()) {
            if !value.trim().is_empty() {
                dataset.properties.insert(key.to_string(), value);
            }
        }
    }

    pub fn add_read(&mut self, job: JobId, dataset: DatasetId) {
        if let Some(job) = self.jobs.get_mut(job.index()) {
            if !job.reads.contains(&dataset) {
                job.reads.push(dataset);
            }
        }
    }

    pub fn add_write(&mut self, job: JobId, dataset: DatasetId) {
        if let Some(job) = self.jobs.get_mut(job.index()) {
            if !job.writes.contains(&dataset) {
                job.writes.push(dataset);
            }
        }
    }

    /// Datasets a job reads and writes so far
    pub fn io_of(&self, job: JobId) -> (Vec<DatasetId>, Vec<DatasetId>) {
        self.jobs
            .get(job.index())
            .map(|j| (j.reads.clone(), j.writes.clone()))
            .unwrap_or_default()
    }

    /// Record that `from` waits on the job keyed `target`
    ///
    /// Resolution happens in [`finish`](Self::finish), so the target may be
    /// defined later in the artifact stream or not at all.
    pub fn depend(&mut self, from: JobId, target: &str, kind: DependencyKind) {
        self.dependencies.push(PendingDependency {
            from,
            target: target.trim().to_string(),
            kind,
            artifact: self.artifact.clone(),
        });
    }

    /// Add a lineage fact; column endpoints become fields of their dataset
    pub fn add_lineage(&mut self, fact: LineageFact, job: Option<JobId>) {
        for path in [&fact.source, &fact.target] {
            let id = self.dataset(&path.dataset);
            if let Some(field) = &path.field {
                merge_field(&mut self.datasets[id.index()].fields, Field::new(field.clone()));
            }
        }
        self.lineage.push((fact, job));
    }

    pub fn add_facts(&mut self, facts: impl IntoIterator<Item = LineageFact>, job: Option<JobId>) {
        for fact in facts {
            self.add_lineage(fact, job);
        }
    }

    /// Attach what the SQL inferencer found to `job`
    pub fn apply_sql(&mut self, job: JobId, lineage: &SqlLineage) {
        for table in &lineage.inputs {
            let id = self.dataset(table);
            self.add_read(job, id);
        }
        for table in &lineage.outputs {
            let id = self.dataset(table);
            self.add_write(job, id);
        }
        self.add_facts(lineage.facts.iter().cloned(), Some(job));

        let subject = self.jobs.get(job.index()).map(|j| j.key.clone());
        for diagnostic in &lineage.diagnostics {
            let mut diagnostic = diagnostic.clone();
            if diagnostic.subject.is_none() {
                if let Some(subject) = &subject {
                    diagnostic = diagnostic.with_subject(subject.clone());
                }
            }
            self.report(diagnostic);
        }
    }

    /// Record a recoverable anomaly
    pub fn report(&mut self, diagnostic: Diagnostic) {
        let diagnostic = match (&diagnostic.location, &self.artifact) {
            (None, Some(artifact)) => diagnostic.in_artifact(artifact.clone()),
            _ => diagnostic,
        };
        self.diagnostics.push(diagnostic);
    }

    /// Resolve references, detect anomalies and close the graph
    pub fn finish(mut self) -> SourceGraph {
        let mut dependencies = Vec::new();
        let mut seen = HashSet::new();
        let pending = std::mem::take(&mut self.dependencies);

        for dep in pending {
            let to = match self.job_keys.get(&dep.target) {
                Some(&id) => JobRef::Resolved(id),
                None => JobRef::Unresolved(dep.target.clone()),
            };
            let edge = DependencyEdge {
                from: dep.from,
                to,
                kind: dep.kind,
            };
            if !seen.insert(edge.clone()) {
                continue;
            }

            let from_key = self.jobs[dep.from.index()].key.clone();
            let located = |d: Diagnostic| match &dep.artifact {
                Some(artifact) => d.with_location(Location::new(artifact.clone())),
                None => d,
            };
            match &edge.to {
                JobRef::Unresolved(target) => self.diagnostics.push(located(
                    Diagnostic::of(
                        DiagnosticCode::UnresolvedJobReference,
                        format!("'{}' depends on '{}', which is not defined in this export", from_key, target),
                    )
                    .with_subject(from_key.clone())
                    .with_related(vec![target.clone()]),
                )),
                JobRef::Resolved(id) if *id == dep.from => self.diagnostics.push(located(
                    Diagnostic::of(
                        DiagnosticCode::SelfDependency,
                        format!("'{}' depends on itself ({})", from_key, dep.kind),
                    )
                    .with_subject(from_key.clone()),
                )),
                JobRef::Resolved(_) => {}
            }
            dependencies.push(edge);
        }

        for cycle in find_cycles(self.jobs.len(), &dependencies) {
            let key = |id: &JobId| self.jobs[id.index()].key.clone();
            let keys: Vec<String> = cycle.jobs.iter().map(key).collect();
            let mut path: Vec<String> = cycle.path.iter().map(key).collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            self.diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::DependencyCycle,
                    format!("dependency cycle among {} jobs: {}", keys.len(), path.join(" -> ")),
                )
                .with_subject(keys.first().cloned().unwrap_or_default())
                .with_related(keys),
            );
        }

        let mut lineage: Vec<LineageEdge> = Vec::new();
        for (fact, job) in std::mem::take(&mut self.lineage) {
            let source = self.endpoint(&fact.source);
            let target = self.endpoint(&fact.target);
            match lineage.iter_mut().find(|e| {
                e.source == source && e.target == target && e.transformation == fact.transformation && e.job == job
            }) {
                Some(existing) => existing.confidence = existing.confidence.max(fact.confidence),
                None => lineage.push(LineageEdge {
                    source,
                    target,
                    transformation: fact.transformation,
                    confidence: fact.confidence,
                    job,
                }),
            }
        }

        tracing::debug!(
            graph = %self.id,
            jobs = self.jobs.len(),
            datasets = self.datasets.len(),
            dependencies = dependencies.len(),
            lineage = lineage.len(),
            "graph closed"
        );

        SourceGraph {
            id: self.id,
            containers: self.containers,
            jobs: self.jobs,
            datasets: self.datasets,
            dependencies,
            lineage,
            diagnostics: self.diagnostics,
        }
    }

    fn endpoint(&self, path: &FieldPath) -> LineageEndpoint {
        let key = path.dataset.trim().to_lowercase();
        LineageEndpoint {
            // add_lineage registered every endpoint dataset
            dataset: self.dataset_keys.get(&key).copied().unwrap_or(DatasetId(0)),
            field: path.field.clone(),
        }
    }
}

fn merge_field(fields: &mut Vec<Field>, field: Field) {
    match fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(&field.name)) {
        Some(existing) => {
            if field.data_type.is_some() {
                existing.data_type = field.data_type;
            }
        }
        None => fields.push(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineagebridge_core::{Confidence, SourceSystem, Transformation};
    use pretty_assertions::assert_eq;

    fn builder() -> GraphBuilder {
        GraphBuilder::new(GraphId::of(SourceSystem::Autosys))
    }

    fn codes(graph: &SourceGraph) -> Vec<DiagnosticCode> {
        graph.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn jobs_keep_first_seen_order_within_container() {
        let mut b = builder();
        let daily = b.container("BOX_DAILY", "BOX_DAILY");
        for key in ["C", "A", "B"] {
            b.job(JobSpec::new(key, key, daily, JobKind::SchedulerCommand));
        }
        b.job(JobSpec::new("A", "A", daily, JobKind::SchedulerCommand));
        let graph = b.finish();

        let order: Vec<&str> = graph.containers[0]
            .jobs
            .iter()
            .map(|&id| graph.job(id).unwrap().key.as_str())
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
        assert!(graph.diagnostics.is_empty());
    }

    #[test]
    fn merge_unions_collections_and_reports_conflicts() {
        let mut b = builder();
        let first = b.container("BOX_A", "BOX_A");
        let second = b.container("BOX_B", "BOX_B");

        let job = b.job(JobSpec::new("LOAD", "LOAD", first, JobKind::SchedulerCommand).property("command", "run.sh"));
        let orders = b.dataset("stg.orders");
        b.add_read(job, orders);

        let again = b.job(
            JobSpec::new("LOAD", "LOAD", second, JobKind::SchedulerCommand)
                .property("command", "run_v2.sh")
                .property("owner", "etl"),
        );
        assert_eq!(job, again);
        let customers = b.dataset("STG.Customers");
        b.add_read(job, customers);
        b.add_read(job, orders);

        let graph = b.finish();
        let load = graph.job_by_key("LOAD").unwrap();
        assert_eq!(load.reads, vec![orders, customers]);
        assert_eq!(load.properties["command"], "run_v2.sh");
        assert_eq!(load.properties["owner"], "etl");
        assert_eq!(load.container, second);
        assert!(graph.containers[0].jobs.is_empty());
        assert_eq!(graph.containers[1].jobs, vec![job]);

        assert_eq!(codes(&graph), vec![DiagnosticCode::IdentityConflict]);
        assert_eq!(graph.diagnostics[0].related, vec!["container", "command"]);
    }

    #[test]
    fn updates_change_only_what_they_name() {
        let mut b = builder();
        let top = b.container("__top__", "__top__");
        let nightly = b.container("BOX_NIGHTLY", "BOX_NIGHTLY");

        let job = b.job(JobSpec::new("LOAD", "LOAD", nightly, JobKind::SchedulerCommand).property("owner", "etl"));
        b.job(
            JobSpec::new("LOAD", "LOAD", top, JobKind::Unknown)
                .property("owner", "ops")
                .as_update(false),
        );
        // Update first, full definition later
        let early = b.job(JobSpec::new("PURGE", "PURGE", top, JobKind::Unknown).as_update(false));
        b.job(JobSpec::new("PURGE", "PURGE", nightly, JobKind::SchedulerFileWatcher));

        let graph = b.finish();
        let load = graph.job(job).unwrap();
        assert_eq!(load.container, nightly);
        assert_eq!(load.kind, JobKind::SchedulerCommand);
        assert_eq!(load.properties["owner"], "ops");

        let purge = graph.job(early).unwrap();
        assert_eq!(purge.container, nightly);
        assert_eq!(purge.kind, JobKind::SchedulerFileWatcher);
        assert!(graph.containers[top.index()].jobs.is_empty());
        assert_eq!(graph.containers[nightly.index()].jobs, vec![job, early]);
        assert!(graph.diagnostics.is_empty());
    }

    #[test]
    fn datasets_merge_case_insensitively() {
        let mut b = builder();
        let a = b.dataset("DW.Orders");
        let c = b.declare_dataset("dw.orders", [Field::typed("id", "int")]);
        assert_eq!(a, c);
        let graph = b.finish();
        assert_eq!(graph.datasets.len(), 1);
        assert!(graph.datasets[0].declared);
        assert_eq!(graph.datasets[0].name, "DW.Orders");
    }

    #[test]
    fn unresolved_edges_are_kept_once() {
        let mut b = builder();
        let c = b.container("__autosys__", "__autosys__");
        let job = b.job(JobSpec::new("JOB_C", "JOB_C", c, JobKind::SchedulerCommand));
        b.set_artifact(Some("daily.jil"));
        b.depend(job, "JOB_X", DependencyKind::Success);
        b.depend(job, "JOB_X", DependencyKind::Success);
        let graph = b.finish();

        assert_eq!(graph.dependencies.len(), 1);
        assert!(!graph.dependencies[0].resolved());
        assert_eq!(codes(&graph), vec![DiagnosticCode::UnresolvedJobReference]);
        assert_eq!(graph.diagnostics[0].artifact(), Some("daily.jil"));
    }

    #[test]
    fn self_dependency_and_cycles_are_reported() {
        let mut b = builder();
        let c = b.container("BOX", "BOX");
        let a = b.job(JobSpec::new("A", "A", c, JobKind::SchedulerCommand));
        let bj = b.job(JobSpec::new("B", "B", c, JobKind::SchedulerCommand));
        b.depend(a, "A", DependencyKind::Success);
        b.depend(a, "B", DependencyKind::Success);
        b.depend(bj, "A", DependencyKind::Failure);
        let graph = b.finish();

        assert_eq!(graph.dependencies.len(), 3);
        assert_eq!(
            codes(&graph),
            vec![DiagnosticCode::SelfDependency, DiagnosticCode::DependencyCycle]
        );
        assert_eq!(graph.diagnostics[1].message, "dependency cycle among 2 jobs: A -> B -> A");
    }

    #[test]
    fn duplicate_lineage_keeps_strongest_confidence() {
        let mut b = builder();
        let fact = |confidence| {
            LineageFact::new(
                FieldPath::column("stg.orders", "amount"),
                FieldPath::column("dw.orders", "amount"),
                Transformation::direct("amount"),
                confidence,
            )
        };
        b.add_lineage(fact(Confidence::Low), None);
        b.add_lineage(fact(Confidence::High), None);
        let graph = b.finish();

        assert_eq!(graph.lineage.len(), 1);
        assert_eq!(graph.lineage[0].confidence, Confidence::High);
        assert_eq!(graph.datasets.len(), 2);
        assert_eq!(graph.datasets[1].fields, vec![Field::new("amount")]);
        assert!(!graph.datasets[1].declared);
    }
}
