//! OLAP cube snapshots

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_core::{
    Confidence, ContainerId, Diagnostic, DiagnosticCode, Field, FieldPath, JobId, JobKind, LineageFact,
    Transformation, TransformationKind,
};
use lineagebridge_readers::essbase::LoadRuleSnapshot;
use lineagebridge_readers::{Artifact, CubeSnapshot, ParsedArtifact};
use lineagebridge_sql::{calc_facts, formula_facts, member_field, parse_calc_script, rollup_facts, OutlineMember};

pub struct EssbaseExtractor<'a> {
    ctx: &'a SourceContext,
}

impl<'a> EssbaseExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    fn add_cube(&self, cube: &CubeSnapshot, builder: &mut GraphBuilder) {
        let container = builder.container(&cube.application, &cube.application);
        let cube_key = cube.dataset_name();
        let mut spec = JobSpec::new(&cube_key, &cube.cube, container, JobKind::Cube);
        if let Some(description) = &cube.description {
            spec = spec.property("description", description.as_str());
        }
        let job = builder.job(spec);

        let fields = cube.dimensions.iter().flat_map(|dimension| {
            std::iter::once(Field::new(dimension.name.clone())).chain(
                dimension
                    .members
                    .iter()
                    .filter(|m| !m.name.eq_ignore_ascii_case(&dimension.name))
                    .map(|m| Field::new(member_field(&dimension.name, &m.name))),
            )
        });
        let dataset = builder.declare_dataset(&cube_key, fields.collect::<Vec<_>>());
        builder.add_write(job, dataset);
        for dimension in &cube.dimensions {
            if let Some(storage) = &dimension.storage_type {
                builder.dataset_property(dataset, &format!("dimension.{}.storage", dimension.name), storage.as_str());
            }
        }

        let dimension_of = |member: &str| cube.dimension_of(member).map(|d| d.name.clone());

        for dimension in &cube.dimensions {
            let members = dimension.members.iter().map(|m| OutlineMember {
                name: &m.name,
                parent: m.parent_name.as_deref(),
                consolidation: m.consolidation.as_deref(),
            });
            builder.add_facts(rollup_facts(&cube_key, &dimension.name, members), Some(job));

            for member in &dimension.members {
                if let Some(formula) = member.formula() {
                    builder.add_facts(formula_facts(&cube_key, &member.name, formula, &dimension_of), Some(job));
                }
            }
        }

        for script in &cube.calc_scripts {
            let script_job = builder.job(
                JobSpec::new(format!("{}/calc/{}", cube_key, script.name), &script.name, container, JobKind::CalcScript)
                    .property("cube", cube_key.as_str()),
            );
            for (name, value) in self.ctx.text_properties("script", &script.content) {
                builder.set_job_property(script_job, &name, value);
            }
            builder.add_read(script_job, dataset);
            builder.add_write(script_job, dataset);

            match parse_calc_script(&script.content) {
                Ok(statements) => {
                    builder.add_facts(calc_facts(&cube_key, &statements, &dimension_of), Some(script_job));
                }
                Err(err) => builder.report(
                    Diagnostic::of(
                        DiagnosticCode::CalcParseError,
                        format!("cannot parse calc script '{}': {}", script.name, err),
                    )
                    .with_subject(format!("{}/calc/{}", cube_key, script.name)),
                ),
            }
        }

        for rule in &cube.load_rules {
            self.add_load_rule(cube, rule, container, builder);
        }
    }

    fn add_load_rule(&self, cube: &CubeSnapshot, rule: &LoadRuleSnapshot, container: ContainerId, builder: &mut GraphBuilder) {
        let cube_key = cube.dataset_name();
        let kind = if rule.is_dimension_build() {
            JobKind::DimensionLoadRule
        } else {
            JobKind::DataLoadRule
        };
        let key = format!("{}/rule/{}", cube_key, rule.name);
        let job = builder.job(JobSpec::new(&key, &rule.name, container, kind).property("cube", cube_key.as_str()));

        let sources = self.rule_sources(job, rule, builder);
        let cube_dataset = builder.dataset(&cube_key);
        builder.add_write(job, cube_dataset);

        let Some(first) = sources.first() else {
            if !rule.field_mappings.is_empty() {
                builder.report(
                    Diagnostic::of(
                        DiagnosticCode::UnresolvedDatasetReference,
                        format!("load rule '{}' maps fields but names no data source", rule.name),
                    )
                    .with_subject(key),
                );
            }
            return;
        };
        let confidence = if sources.len() == 1 {
            Confidence::High
        } else {
            Confidence::Medium
        };

        for mapping in &rule.field_mappings {
            let (Some(source_field), Some(dimension)) = (&mapping.source_field, &mapping.dimension) else {
                continue;
            };
            let transformation = match &mapping.transformation {
                Some(text) if !text.trim().is_empty() => Transformation::new(TransformationKind::Derived, text.trim()),
                _ => Transformation::direct(source_field.as_str()),
            };
            builder.add_lineage(
                LineageFact::new(
                    FieldPath::column(first.clone(), source_field.clone()),
                    FieldPath::column(cube_key.clone(), dimension.clone()),
                    transformation,
                    confidence,
                ),
                Some(job),
            );
        }
    }

    /// Datasets the rule's data source reads
    fn rule_sources(&self, job: JobId, rule: &LoadRuleSnapshot, builder: &mut GraphBuilder) -> Vec<String> {
        let Some(source) = &rule.data_source else {
            return Vec::new();
        };
        if let Some(source_type) = &source.source_type {
            builder.set_job_property(job, "source_type", source_type.as_str());
        }
        if let Some(connection) = &source.connection {
            builder.set_job_property(job, "connection", connection.as_str());
        }

        if let Some(sql) = source.sql_text() {
            for (name, value) in self.ctx.text_properties("sql", sql) {
                builder.set_job_property(job, &name, value);
            }
            let lineage = self.ctx.infer_sql(sql, None);
            builder.apply_sql(job, &lineage);
            return lineage.inputs;
        }

        let Some(name) = source
            .path
            .as_deref()
            .or(source.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
        else {
            return Vec::new();
        };
        let id = builder.dataset(name);
        builder.add_read(job, id);
        vec![name.to_string()]
    }
}

impl SourceExtractor for EssbaseExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        let ParsedArtifact::Cubes(cubes) = parsed else {
            return;
        };
        tracing::debug!(artifact = %artifact.name, cubes = cubes.len(), "cube snapshots");
        for cube in &cubes {
            self.add_cube(cube, builder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{extract_source, SourceInput};
    use lineagebridge_core::{Config, SourceConfig, SourceSystem};
    use pretty_assertions::assert_eq;

    const CUBE: &str = r#"{
        "application": "Sample",
        "cube": "Basic",
        "dimensions": [
            {"name": "Measures", "storageType": "dense", "members": [
                {"name": "Profit", "parentName": "Measures", "consolidation": "~"},
                {"name": "Sales", "parentName": "Profit", "consolidation": "+"},
                {"name": "COGS", "parentName": "Profit", "consolidation": "-"},
                {"name": "Margin", "formula": "\"Profit\" / \"Sales\";"}
            ]},
            {"name": "Product", "members": [
                {"name": "Colas", "parentName": "Product", "consolidation": "+"}
            ]}
        ],
        "calcScripts": [
            {"name": "CopyPlan", "content": "DATACOPY Sales TO COGS;"},
            {"name": "Broken", "content": "FIX (Sales) CALC DIM (Product);"}
        ],
        "loadRules": [{
            "name": "LdSales",
            "type": "data",
            "dataSource": {"type": "sql", "sql": "SELECT product, amount FROM stg.sales"},
            "fieldMappings": [{"fieldNumber": 1, "sourceField": "product", "dimension": "Product"}]
        }]
    }"#;

    fn graph() -> crate::graph::SourceGraph {
        let input = SourceInput::new(
            SourceConfig::new(SourceSystem::Essbase),
            vec![Artifact::new("sample.json", CUBE)],
        );
        extract_source(&input, &Config::default()).unwrap()
    }

    fn edges(graph: &crate::graph::SourceGraph, kind: TransformationKind) -> Vec<(String, String)> {
        graph
            .lineage
            .iter()
            .filter(|e| e.transformation.kind == kind)
            .map(|e| {
                (
                    graph.endpoint_path(&e.source).unwrap().to_string(),
                    graph.endpoint_path(&e.target).unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn cube_writes_a_dataset_of_members() {
        let graph = graph();
        let cube = graph.job_by_key("Sample.Basic").unwrap();
        assert_eq!(cube.kind, JobKind::Cube);
        let dataset = graph.dataset(cube.writes[0]).unwrap();
        assert!(dataset.declared);
        let fields: Vec<&str> = dataset.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            &fields[..6],
            &["Measures", "Measures.Profit", "Measures.Sales", "Measures.COGS", "Measures.Margin", "Product"]
        );
    }

    #[test]
    fn consolidation_and_formulas() {
        let graph = graph();
        assert_eq!(
            edges(&graph, TransformationKind::Aggregation),
            vec![
                ("Sample.Basic.Measures.Sales".to_string(), "Sample.Basic.Measures.Profit".to_string()),
                ("Sample.Basic.Measures.COGS".to_string(), "Sample.Basic.Measures.Profit".to_string()),
                ("Sample.Basic.Product.Colas".to_string(), "Sample.Basic.Product".to_string()),
            ]
        );
        assert_eq!(
            edges(&graph, TransformationKind::Derived),
            vec![
                ("Sample.Basic.Measures.Profit".to_string(), "Sample.Basic.Measures.Margin".to_string()),
                ("Sample.Basic.Measures.Sales".to_string(), "Sample.Basic.Measures.Margin".to_string()),
            ]
        );
    }

    #[test]
    fn calc_scripts_are_jobs() {
        let graph = graph();
        let copy = graph.job_by_key("Sample.Basic/calc/CopyPlan").unwrap();
        assert_eq!(copy.kind, JobKind::CalcScript);
        assert_eq!(
            edges(&graph, TransformationKind::Copy),
            vec![("Sample.Basic.Measures.Sales".to_string(), "Sample.Basic.Measures.COGS".to_string())]
        );

        let broken: Vec<&Diagnostic> = graph
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::CalcParseError)
            .collect();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].subject.as_deref(), Some("Sample.Basic/calc/Broken"));
    }

    #[test]
    fn load_rule_reads_its_source_and_feeds_dimensions() {
        let graph = graph();
        let rule = graph.job_by_key("Sample.Basic/rule/LdSales").unwrap();
        assert_eq!(rule.kind, JobKind::DataLoadRule);
        let reads: Vec<&str> = rule.reads.iter().map(|&id| graph.dataset(id).unwrap().name.as_str()).collect();
        assert_eq!(reads, vec!["stg.sales"]);

        let mapped: Vec<&lineagebridge_core::LineageEdge> =
            graph.lineage.iter().filter(|e| e.job == Some(rule.id)).collect();
        assert!(mapped.iter().any(|e| {
            graph.endpoint_path(&e.source).unwrap().to_string() == "stg.sales.product"
                && graph.endpoint_path(&e.target).unwrap().to_string() == "Sample.Basic.Product"
                && e.confidence == Confidence::High
        }));
    }
}
