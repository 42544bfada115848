//! Package files (DTSX)

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_core::{
    Confidence, ContainerId, DependencyKind, FieldPath, JobId, JobKind, LineageFact, Transformation,
    TransformationKind,
};
use lineagebridge_readers::ssis::{ComponentRole, Executable};
use lineagebridge_readers::{Artifact, Package, ParsedArtifact};

/// Precedence constraint value: 0 success, 1 failure, 2 completion
pub fn constraint_kind(value: u8) -> DependencyKind {
    match value {
        0 => DependencyKind::Success,
        1 => DependencyKind::Failure,
        _ => DependencyKind::Unknown,
    }
}

pub struct SsisExtractor<'a> {
    ctx: &'a SourceContext,
}

impl<'a> SsisExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    fn add_executable(
        &self,
        package: &str,
        exe: &Executable,
        container: ContainerId,
        builder: &mut GraphBuilder,
    ) -> JobId {
        let mut spec = JobSpec::new(
            format!("{}/{}", package, exe.ref_id),
            &exe.name,
            container,
            JobKind::from_ssis_type(&exe.executable_type),
        )
        .property("executable_type", exe.executable_type.as_str());
        if let Some(parent) = &exe.parent {
            spec = spec.property("parent", format!("{}/{}", package, parent));
        }
        let job = builder.job(spec);

        let mut calls = Vec::new();
        for (i, sql) in exe.sql_statements.iter().enumerate() {
            let lineage = self.ctx.infer_sql(sql, None);
            let prefix = if exe.sql_statements.len() == 1 {
                "sql".to_string()
            } else {
                format!("sql.{:03}", i + 1)
            };
            for (name, value) in self.ctx.text_properties(&prefix, sql) {
                builder.set_job_property(job, &name, value);
            }
            calls.extend(lineage.calls.iter().cloned());
            builder.apply_sql(job, &lineage);
        }
        if !calls.is_empty() {
            builder.set_job_property(job, "calls", calls.join(","));
        }

        self.add_data_flow(job, exe, builder);
        job
    }

    /// Reads and writes of a pipeline, plus one table-level edge per
    /// source and destination pair
    fn add_data_flow(&self, job: JobId, exe: &Executable, builder: &mut GraphBuilder) {
        let mut sources: Vec<String> = Vec::new();
        let mut destinations: Vec<String> = Vec::new();

        for component in &exe.components {
            match component.role {
                ComponentRole::Source => {
                    let tables = match (&component.table, &component.sql_command) {
                        (Some(table), _) => vec![self.ctx.table(table)],
                        (None, Some(sql)) => {
                            let lineage = self.ctx.infer_sql(sql, None);
                            builder.apply_sql(job, &lineage);
                            lineage.inputs
                        }
                        (None, None) => Vec::new(),
                    };
                    for table in tables {
                        let id = builder.dataset(&table);
                        builder.add_read(job, id);
                        if !sources.contains(&table) {
                            sources.push(table);
                        }
                    }
                }
                ComponentRole::Destination => {
                    let Some(table) = &component.table else {
                        continue;
                    };
                    let table = self.ctx.table(table);
                    let id = builder.dataset(&table);
                    builder.add_write(job, id);
                    if !destinations.contains(&table) {
                        destinations.push(table);
                    }
                }
                ComponentRole::Transform => {}
            }
        }

        for source in &sources {
            for destination in &destinations {
                builder.add_lineage(
                    LineageFact::new(
                        FieldPath::table(source.clone()),
                        FieldPath::table(destination.clone()),
                        Transformation::new(TransformationKind::Derived, format!("data flow '{}'", exe.name)),
                        Confidence::Medium,
                    ),
                    Some(job),
                );
            }
        }
    }

    fn add_package(&self, artifact: &Artifact, package: &Package, builder: &mut GraphBuilder) {
        let name = package.name.clone().unwrap_or_else(|| artifact.stem().to_string());
        let container = builder.container(&name, &name);
        builder.container_property(container, "file", artifact.name.as_str());

        let jobs: Vec<JobId> = package
            .executables
            .iter()
            .map(|exe| self.add_executable(&name, exe, container, builder))
            .collect();
        tracing::debug!(package = %name, executables = jobs.len(), "package");

        for constraint in &package.constraints {
            let waiting_key = format!("{}/{}", name, constraint.to);
            let waiting = match builder.job_id(&waiting_key) {
                Some(id) => id,
                None => builder.job(JobSpec::new(&waiting_key, &constraint.to, container, JobKind::Unknown)),
            };
            builder.depend(
                waiting,
                &format!("{}/{}", name, constraint.from),
                constraint_kind(constraint.value),
            );
        }
    }
}

impl SourceExtractor for SsisExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        if let ParsedArtifact::Package(package) = parsed {
            self.add_package(artifact, &package, builder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{extract_source, SourceInput};
    use lineagebridge_core::{Config, JobRef, SourceConfig, SourceSystem};
    use pretty_assertions::assert_eq;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    xmlns:SQLTask="www.microsoft.com/sqlserver/dts/tasks/sqltask"
    DTS:refId="Package" DTS:ObjectName="DailyLoad" DTS:ExecutableType="Microsoft.Package">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Truncate" DTS:ObjectName="Truncate" DTS:ExecutableType="Microsoft.ExecuteSQLTask">
      <DTS:ObjectData>
        <SQLTask:SqlTaskData SQLTask:SqlStatementSource="TRUNCATE TABLE stg.orders"/>
      </DTS:ObjectData>
    </DTS:Executable>
    <DTS:Executable DTS:refId="Package\Load" DTS:ObjectName="Load" DTS:ExecutableType="Microsoft.Pipeline">
      <DTS:ObjectData>
        <pipeline>
          <components>
            <component refId="c1" name="OLE DB Source" componentClassID="Microsoft.OLEDBSource">
              <properties>
                <property name="OpenRowset">[dbo].[orders]</property>
              </properties>
            </component>
            <component refId="c3" name="OLE DB Destination" componentClassID="Microsoft.OLEDBDestination">
              <properties>
                <property name="OpenRowset">[stg].[orders]</property>
              </properties>
            </component>
          </components>
        </pipeline>
      </DTS:ObjectData>
    </DTS:Executable>
    <DTS:Executable DTS:refId="Package\Notify" DTS:ObjectName="Notify" DTS:ExecutableType="Microsoft.SendMailTask"/>
  </DTS:Executables>
  <DTS:PrecedenceConstraints>
    <DTS:PrecedenceConstraint DTS:From="Package\Truncate" DTS:To="Package\Load"/>
    <DTS:PrecedenceConstraint DTS:From="Package\Load" DTS:To="Package\Notify" DTS:Value="1"/>
  </DTS:PrecedenceConstraints>
</DTS:Executable>"#;

    fn graph() -> crate::graph::SourceGraph {
        let input = SourceInput::new(
            SourceConfig::new(SourceSystem::Ssis),
            vec![Artifact::new("daily_load.dtsx", PACKAGE)],
        );
        extract_source(&input, &Config::default()).unwrap()
    }

    #[test]
    fn constraint_values() {
        assert_eq!(constraint_kind(0), DependencyKind::Success);
        assert_eq!(constraint_kind(1), DependencyKind::Failure);
        assert_eq!(constraint_kind(2), DependencyKind::Unknown);
    }

    #[test]
    fn executables_become_jobs_of_the_package() {
        let graph = graph();
        assert_eq!(graph.containers.len(), 1);
        assert_eq!(graph.containers[0].name, "DailyLoad");

        let kinds: Vec<(&str, JobKind)> = graph.jobs.iter().map(|j| (j.key.as_str(), j.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("DailyLoad/Package\\Truncate", JobKind::SqlTask),
                ("DailyLoad/Package\\Load", JobKind::DataFlowTask),
                ("DailyLoad/Package\\Notify", JobKind::Unknown),
            ]
        );

        let truncate = graph.job_by_key("DailyLoad/Package\\Truncate").unwrap();
        let writes: Vec<&str> = truncate.writes.iter().map(|&id| graph.dataset(id).unwrap().name.as_str()).collect();
        assert_eq!(writes, vec!["stg.orders"]);
    }

    #[test]
    fn pipeline_pairs_sources_with_destinations() {
        let graph = graph();
        assert_eq!(graph.lineage.len(), 1);
        let edge = &graph.lineage[0];
        assert_eq!(graph.endpoint_path(&edge.source).unwrap().to_string(), "dbo.orders");
        assert_eq!(graph.endpoint_path(&edge.target).unwrap().to_string(), "stg.orders");
        assert_eq!(edge.confidence, Confidence::Medium);
    }

    #[test]
    fn constraints_point_downstream_to_upstream() {
        let graph = graph();
        let edges: Vec<(String, String, DependencyKind)> = graph
            .dependencies
            .iter()
            .map(|e| {
                let JobRef::Resolved(to) = e.to else {
                    panic!("unresolved constraint");
                };
                (
                    graph.job(e.from).unwrap().name.clone(),
                    graph.job(to).unwrap().name.clone(),
                    e.kind,
                )
            })
            .collect();
        assert_eq!(
            edges,
            vec![
                ("Load".to_string(), "Truncate".to_string(), DependencyKind::Success),
                ("Notify".to_string(), "Load".to_string(), DependencyKind::Failure),
            ]
        );
    }
}
