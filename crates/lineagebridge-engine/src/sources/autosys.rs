//! Scheduler definitions (JIL)

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_condition::dependencies_of;
use lineagebridge_core::{Diagnostic, DiagnosticCode, JobKind, Location};
use lineagebridge_readers::{Artifact, JilJob, ParsedArtifact};

/// Container of jobs outside any box
pub const TOP_LEVEL_CONTAINER: &str = "__autosys__";

pub struct AutosysExtractor<'a> {
    ctx: &'a SourceContext,
}

impl<'a> AutosysExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    fn add_job(&self, job: &JilJob, artifact: &str, builder: &mut GraphBuilder) {
        // An update names only what it changes
        let default_kind = if job.update_only {
            JobKind::Unknown
        } else {
            JobKind::SchedulerCommand
        };
        let kind = job.job_type().map(JobKind::from_jil_type).unwrap_or(default_kind);
        let container_key = job.box_name().unwrap_or(TOP_LEVEL_CONTAINER);
        let container = builder.container(container_key, container_key);
        if kind == JobKind::SchedulerBox {
            builder.container(&job.name, &job.name);
        }

        let mut spec = JobSpec::new(&job.name, &job.name, container, kind);
        if job.update_only {
            spec = spec.as_update(job.box_name().is_some());
        }
        for (key, value) in &job.attributes {
            if key == "command" {
                for (name, text) in self.ctx.text_properties("command", value) {
                    spec = spec.property(name, text);
                }
            } else {
                spec = spec.property(key.as_str(), value.as_str());
            }
        }
        let id = builder.job(spec);

        let Some(condition) = job.condition() else {
            return;
        };
        match dependencies_of(condition) {
            Ok(dependencies) => {
                for dep in dependencies {
                    builder.depend(id, &dep.job, dep.kind);
                }
            }
            Err(err) => builder.report(
                Diagnostic::of(
                    DiagnosticCode::ConditionParseError,
                    format!("cannot parse condition of '{}': {}", job.name, err),
                )
                .with_subject(job.name.clone())
                .with_location(Location::with_line(artifact, job.line)),
            ),
        }
    }
}

impl SourceExtractor for AutosysExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        let ParsedArtifact::Jil(document) = parsed else {
            return;
        };

        for warning in &document.warnings {
            builder.report(
                Diagnostic::of(DiagnosticCode::ArtifactMalformed, warning.message.clone())
                    .with_location(Location::with_line(&artifact.name, warning.line)),
            );
        }

        let jobs = document.jobs();
        tracing::debug!(artifact = %artifact.name, jobs = jobs.len(), "scheduler definitions");
        for job in &jobs {
            self.add_job(job, &artifact.name, builder);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::run::{extract_source, SourceInput};
    use lineagebridge_core::{Config, DependencyKind, DiagnosticCode, JobKind, JobRef, SourceConfig, SourceSystem};
    use lineagebridge_readers::Artifact;
    use pretty_assertions::assert_eq;

    const JIL: &str = r#"
insert_job: BOX_DAILY   job_type: BOX
owner: etl

insert_job: JOB_A   job_type: CMD
box_name: BOX_DAILY
command: /opt/etl/extract.sh

insert_job: JOB_B   job_type: CMD
box_name: BOX_DAILY
command: /opt/etl/stage.sh

insert_job: JOB_C   job_type: CMD
box_name: BOX_DAILY
command: pmcmd startworkflow -f SALES wf_load_orders
condition: s(JOB_A) & s(JOB_B) | f(JOB_GONE)

insert_job: JOB_D   job_type: CMD
condition: s(JOB_A &
"#;

    fn graph() -> crate::graph::SourceGraph {
        let input = SourceInput::new(
            SourceConfig::new(SourceSystem::Autosys),
            vec![Artifact::new("daily.jil", JIL)],
        );
        extract_source(&input, &Config::default()).unwrap()
    }

    #[test]
    fn boxes_become_containers_and_jobs() {
        let graph = graph();
        let keys: Vec<&str> = graph.containers.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["__autosys__", "BOX_DAILY"]);

        let daily = &graph.containers[1];
        let members: Vec<&str> = daily.jobs.iter().map(|&id| graph.job(id).unwrap().name.as_str()).collect();
        assert_eq!(members, vec!["JOB_A", "JOB_B", "JOB_C"]);

        let boxed = graph.job_by_key("BOX_DAILY").unwrap();
        assert_eq!(boxed.kind, JobKind::SchedulerBox);
        assert_eq!(boxed.properties["owner"], "etl");

        let c = graph.job_by_key("JOB_C").unwrap();
        assert!(c.properties.contains_key("command_hash"));
        assert_eq!(c.properties["command"], "pmcmd startworkflow -f SALES wf_load_orders");
    }

    #[test]
    fn conditions_become_edges() {
        let graph = graph();
        let c = graph.find_job("JOB_C").unwrap();
        let edges: Vec<(String, DependencyKind)> = graph
            .dependencies_of(c)
            .map(|e| {
                let to = match &e.to {
                    JobRef::Resolved(id) => graph.job(*id).unwrap().key.clone(),
                    JobRef::Unresolved(raw) => format!("?{}", raw),
                };
                (to, e.kind)
            })
            .collect();
        assert_eq!(
            edges,
            vec![
                ("JOB_A".to_string(), DependencyKind::Success),
                ("JOB_B".to_string(), DependencyKind::Success),
                ("?JOB_GONE".to_string(), DependencyKind::Failure),
            ]
        );
    }

    #[test]
    fn broken_condition_yields_no_edges_and_one_diagnostic() {
        let graph = graph();
        let d = graph.find_job("JOB_D").unwrap();
        assert_eq!(graph.dependencies_of(d).count(), 0);

        let codes: Vec<DiagnosticCode> = graph.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![DiagnosticCode::ConditionParseError, DiagnosticCode::UnresolvedJobReference]
        );
        assert_eq!(graph.diagnostics[0].artifact(), Some("daily.jil"));
    }

    #[test]
    fn update_in_a_later_artifact_keeps_box_and_type() {
        let input = SourceInput::new(
            SourceConfig::new(SourceSystem::Autosys),
            vec![
                Artifact::new(
                    "a.jil",
                    "insert_job: BOX_D job_type: b\n\ninsert_job: JOB_A job_type: c\nbox_name: BOX_D\ncommand: a.sh\n",
                ),
                Artifact::new("b.jil", "update_job: JOB_A\ncondition: s(JOB_Z)\n"),
            ],
        );
        let graph = extract_source(&input, &Config::default()).unwrap();

        let job = graph.job_by_key("JOB_A").unwrap();
        assert_eq!(graph.containers[job.container.index()].key, "BOX_D");
        assert_eq!(job.kind, JobKind::SchedulerCommand);
        assert_eq!(job.properties["command"], "a.sh");

        let codes: Vec<DiagnosticCode> = graph.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::UnresolvedJobReference]);
        assert_eq!(graph.dependencies_of(job.id).count(), 1);
    }
}
