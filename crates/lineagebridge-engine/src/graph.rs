//! Finished graph of one source system instance
//!
//! Built once by [`GraphBuilder::finish`](crate::builder::GraphBuilder::finish)
//! and read-only afterwards.

use lineagebridge_core::{
    Container, ContainerId, Dataset, DatasetId, DependencyEdge, Diagnostic, EmissionRecord,
    EntityKey, EntityType, FieldPath, GraphId, Job, JobId, JobRef, LineageEdge, LineageEndpoint,
};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Serialize)]
pub struct SourceGraph {
    pub id: GraphId,
    pub containers: Vec<Container>,
    pub jobs: Vec<Job>,
    pub datasets: Vec<Dataset>,
    /// Unique per (from, to, kind); unresolved targets keep their raw name
    pub dependencies: Vec<DependencyEdge>,
    pub lineage: Vec<LineageEdge>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceGraph {
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.index())
    }

    pub fn dataset(&self, id: DatasetId) -> Option<&Dataset> {
        self.datasets.get(id.index())
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(id.index())
    }

    pub fn job_by_key(&self, key: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.key == key)
    }

    pub fn dataset_by_name(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Resolve a name written by another tool
    ///
    /// Tries the exact key, the exact name, then both again ignoring case.
    /// The first job in first-seen order wins when several share a name.
    pub fn find_job(&self, candidate: &str) -> Option<JobId> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }
        self.jobs
            .iter()
            .find(|j| j.key == candidate)
            .or_else(|| self.jobs.iter().find(|j| j.name == candidate))
            .or_else(|| self.jobs.iter().find(|j| j.key.eq_ignore_ascii_case(candidate)))
            .or_else(|| self.jobs.iter().find(|j| j.name.eq_ignore_ascii_case(candidate)))
            .map(|j| j.id)
    }

    /// `name`, `key`, or a job property
    pub fn job_field<'a>(&'a self, job: &'a Job, field: &str) -> Option<&'a str> {
        match field {
            "name" => Some(job.name.as_str()),
            "key" => Some(job.key.as_str()),
            other => job.properties.get(other).map(String::as_str),
        }
    }

    /// Edges leaving `job`
    pub fn dependencies_of(&self, job: JobId) -> impl Iterator<Item = &DependencyEdge> {
        self.dependencies.iter().filter(move |e| e.from == job)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.dependencies.iter().filter(|e| !e.resolved())
    }

    /// Every job `job` transitively waits on
    pub fn upstream(&self, job: JobId) -> Vec<JobId> {
        self.walk(job, |edge| (edge.from, edge.target_id()))
    }

    /// Every job transitively waiting on `job`
    pub fn downstream(&self, job: JobId) -> Vec<JobId> {
        self.walk(job, |edge| match edge.target_id() {
            Some(to) => (to, Some(edge.from)),
            None => (edge.from, None),
        })
    }

    fn walk(&self, start: JobId, step: impl Fn(&DependencyEdge) -> (JobId, Option<JobId>)) -> Vec<JobId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in &self.dependencies {
                let (from, to) = step(edge);
                let Some(to) = to.filter(|_| from == current) else {
                    continue;
                };
                if to != start && visited.insert(to) {
                    result.push(to);
                    queue.push_back(to);
                }
            }
        }

        result
    }

    /// Path of a lineage endpoint by dataset name
    pub fn endpoint_path(&self, endpoint: &LineageEndpoint) -> Option<FieldPath> {
        let dataset = self.dataset(endpoint.dataset)?;
        Some(FieldPath {
            dataset: dataset.name.clone(),
            field: endpoint.field.clone(),
        })
    }

    /// The graph as flat emission records
    pub fn to_records(&self, env: &str) -> Vec<EmissionRecord> {
        let system = self.id.system;
        let job_key = |id: JobId| self.job(id).map(|j| j.key.clone()).unwrap_or_default();
        let dataset_name = |id: DatasetId| self.dataset(id).map(|d| d.name.clone()).unwrap_or_default();

        let mut records = Vec::with_capacity(
            self.containers.len()
                + self.jobs.len()
                + self.datasets.len()
                + self.dependencies.len()
                + self.lineage.len(),
        );

        for container in &self.containers {
            records.push(EmissionRecord::Container {
                graph: self.id.clone(),
                urn: EntityKey::new(EntityType::Container, system, &container.key).urn(env),
                key: container.key.clone(),
                name: container.name.clone(),
                jobs: container.jobs.iter().map(|&id| job_key(id)).collect(),
                properties: container.properties.clone(),
            });
        }

        for job in &self.jobs {
            records.push(EmissionRecord::Job {
                graph: self.id.clone(),
                urn: EntityKey::new(EntityType::Job, system, &job.key).urn(env),
                key: job.key.clone(),
                name: job.name.clone(),
                container: self
                    .container(job.container)
                    .map(|c| c.key.clone())
                    .unwrap_or_default(),
                kind: job.kind,
                reads: job.reads.iter().map(|&id| dataset_name(id)).collect(),
                writes: job.writes.iter().map(|&id| dataset_name(id)).collect(),
                properties: job.properties.clone(),
            });
        }

        for dataset in &self.datasets {
            records.push(EmissionRecord::Dataset {
                graph: self.id.clone(),
                urn: EntityKey::new(EntityType::Dataset, system, &dataset.name).urn(env),
                name: dataset.name.clone(),
                fields: dataset.fields.clone(),
                declared: dataset.declared,
                properties: dataset.properties.clone(),
            });
        }

        for edge in &self.dependencies {
            let (to, resolved) = match &edge.to {
                JobRef::Resolved(id) => (job_key(*id), true),
                JobRef::Unresolved(raw) => (raw.clone(), false),
            };
            records.push(EmissionRecord::Dependency {
                graph: self.id.clone(),
                from: job_key(edge.from),
                to,
                kind: edge.kind,
                resolved,
            });
        }

        for edge in &self.lineage {
            let (Some(source), Some(target)) =
                (self.endpoint_path(&edge.source), self.endpoint_path(&edge.target))
            else {
                continue;
            };
            records.push(EmissionRecord::Lineage {
                graph: self.id.clone(),
                source,
                target,
                transformation: edge.transformation.clone(),
                confidence: edge.confidence,
                job: edge.job.map(job_key),
            });
        }

        records
    }
}
