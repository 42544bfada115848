//! Stored procedure sources and `V$SQL` telemetry

use super::SourceExtractor;
use crate::builder::{GraphBuilder, JobSpec};
use crate::context::SourceContext;
use lineagebridge_core::{JobId, JobKind};
use lineagebridge_readers::oracle::{ObservedStatement, ProcedureSource};
use lineagebridge_readers::{split_plsql_statements, Artifact, OracleArtifact, ParsedArtifact};
use lineagebridge_sql::{InferenceOptions, LineageInferencer};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static UNIT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*(?:CREATE\s+(?:OR\s+REPLACE\s+)?)?(?:(?:NON)?EDITIONABLE\s+)?(?:PROCEDURE|FUNCTION|PACKAGE\s+BODY|TRIGGER)\b.*?\b(?:AS|IS)\b",
    )
    .expect("valid regex")
});

/// Block and branch openers in front of the first real statement
static CONTROL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*(?:BEGIN|DECLARE|ELSE|LOOP|EXCEPTION|THEN|(?:IF|ELSIF|WHEN)\b.*?\bTHEN|(?:FOR|WHILE)\b.*?\bLOOP)\b",
    )
    .expect("valid regex")
});

static DATA_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:INSERT|UPDATE|DELETE|MERGE|SELECT|WITH|TRUNCATE|EXECUTE\s+IMMEDIATE)\b")
        .expect("valid regex")
});

static PROCEDURE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:CALL\s+|EXEC(?:UTE)?\s+)?(?P<name>[A-Za-z_][\w$#]*(?:\.[A-Za-z_][\w$#]*)*)\s*(?:\(|$)")
        .expect("valid regex")
});

const NOT_CALLS: &[&str] = &[
    "NULL", "COMMIT", "ROLLBACK", "RETURN", "END", "EXIT", "CONTINUE", "RAISE", "SAVEPOINT", "GOTO",
    "CLOSE", "OPEN", "FETCH", "BEGIN", "DECLARE", "ELSE", "LOOP", "EXCEPTION",
];

fn is_system_call(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.starts_with("DBMS_")
        || upper.starts_with("UTL_")
        || upper.starts_with("SYS.DBMS_")
        || upper.starts_with("SYS.UTL_")
        || upper == "RAISE_APPLICATION_ERROR"
}

/// Statement text without the unit header and leading control keywords,
/// and the number of lines that were cut off
fn strip_prefixes(text: &str) -> (&str, usize) {
    let mut rest = text;
    if let Some(m) = UNIT_HEADER.find(rest) {
        rest = &rest[m.end()..];
    }
    while let Some(m) = CONTROL_PREFIX.find(rest) {
        rest = &rest[m.end()..];
    }
    let trimmed = rest.trim_start();
    let skipped = &text[..text.len() - trimmed.len()];
    (trimmed, skipped.matches('\n').count())
}

/// Procedure a statement invokes, unless it is a system package or a keyword
pub fn called_procedure(statement: &str) -> Option<String> {
    let caps = PROCEDURE_CALL.captures(statement.trim())?;
    let name = caps["name"].to_string();
    if NOT_CALLS.iter().any(|k| name.eq_ignore_ascii_case(k)) || is_system_call(&name) {
        return None;
    }
    Some(name)
}

pub struct OracleExtractor<'a> {
    ctx: &'a SourceContext,
    /// Inferencers defaulting to one parsing schema
    by_schema: HashMap<String, LineageInferencer>,
}

impl<'a> OracleExtractor<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self {
            ctx,
            by_schema: HashMap::new(),
        }
    }

    fn add_procedure(&self, unit: &ProcedureSource, builder: &mut GraphBuilder) {
        let container_key = unit
            .owner
            .as_deref()
            .or(self.ctx.source.default_schema.as_deref())
            .unwrap_or(self.ctx.source.instance());
        let container = builder.container(container_key, container_key);
        let key = unit.qualified_name();
        let mut spec = JobSpec::new(&key, &unit.name, container, JobKind::StoredProcedure)
            .property("unit_type", unit.kind.as_str())
            .property("line", unit.first_line.to_string());
        for (name, value) in self.ctx.text_properties("source", &unit.body) {
            spec = spec.property(name, value);
        }
        let job = builder.job(spec);

        let mut substeps = 0usize;
        let mut calls: Vec<String> = Vec::new();
        for statement in split_plsql_statements(&unit.body, unit.first_line) {
            let (text, skipped) = strip_prefixes(&statement.text);
            if text.is_empty() {
                continue;
            }
            let line = statement.line + skipped;

            if DATA_STATEMENT.is_match(text) {
                substeps += 1;
                let lineage = self.ctx.infer_sql(text, None);
                let prefix = format!("substep.{:03}", substeps);
                builder.set_job_property(job, &format!("{}.operation", prefix), lineage.kind.as_str());
                builder.set_job_property(job, &format!("{}.line", prefix), line.to_string());
                builder.set_job_property(job, &format!("{}.preview", prefix), lineage.preview.clone());
                builder.set_job_property(job, &format!("{}.query_hash", prefix), lineage.query_hash.clone());
                builder.apply_sql(job, &lineage);
            } else if let Some(name) = called_procedure(text) {
                if !calls.contains(&name) {
                    calls.push(name);
                }
            }
        }

        for (i, name) in calls.iter().enumerate() {
            builder.set_job_property(job, &format!("call.{:03}", i + 1), name.as_str());
        }
        if !calls.is_empty() {
            builder.set_job_property(job, "calls", calls.join(","));
        }
        tracing::debug!(unit = %key, substeps, calls = calls.len(), "stored procedure");
    }

    fn inferencer_for(&mut self, schema: &str) -> &LineageInferencer {
        let ctx = self.ctx;
        self.by_schema.entry(schema.to_lowercase()).or_insert_with(|| {
            let options = InferenceOptions {
                default_schema: Some(schema.to_string()),
                ..ctx.sql.options().clone()
            };
            LineageInferencer::new(options, ctx.sql.hints().clone())
        })
    }

    fn add_statement(&mut self, row: &ObservedStatement, builder: &mut GraphBuilder) {
        let schema = row
            .schema
            .clone()
            .or_else(|| self.ctx.source.default_schema.clone())
            .unwrap_or_else(|| self.ctx.source.instance().to_string());
        let container = builder.container(&schema, &schema);

        let mut spec = JobSpec::new(&row.sql_id, &row.sql_id, container, JobKind::ObservedStatement)
            .property("parsing_schema", schema.as_str());
        for (name, value) in self.ctx.text_properties("sql", &row.sql_text) {
            spec = spec.property(name, value);
        }
        if let Some(time) = &row.last_active_time {
            spec = spec.property("last_active_time", time.as_str());
        }
        if let Some(executions) = row.executions {
            spec = spec.property("executions", executions.to_string());
        }
        let job: JobId = builder.job(spec);

        let lineage = self.inferencer_for(&schema).infer(&row.sql_text, None);
        builder.set_job_property(job, "operation", lineage.kind.as_str());
        builder.apply_sql(job, &lineage);
    }
}

impl SourceExtractor for OracleExtractor<'_> {
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder) {
        let ParsedArtifact::Oracle(oracle) = parsed else {
            return;
        };
        match oracle {
            OracleArtifact::Procedures(units) => {
                tracing::debug!(artifact = %artifact.name, units = units.len(), "procedure sources");
                for unit in &units {
                    self.add_procedure(unit, builder);
                }
            }
            OracleArtifact::Statements(rows) => {
                tracing::debug!(artifact = %artifact.name, rows = rows.len(), "observed statements");
                for row in &rows {
                    self.add_statement(row, builder);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SourceGraph;
    use crate::run::{extract_source, SourceInput};
    use lineagebridge_core::{Config, SourceConfig, SourceSystem};
    use pretty_assertions::assert_eq;

    const PROCEDURE: &str = "\
CREATE OR REPLACE PROCEDURE etl.proc_update_orders AS
  v_count NUMBER;
BEGIN
  INSERT INTO etl.orders (id, total)
  SELECT id, amount FROM prod.customers;
  UPDATE etl.orders o SET total = (SELECT SUM(amount) FROM prod.payments p WHERE p.id = o.id);
  EXECUTE IMMEDIATE 'DELETE FROM etl.order_staging WHERE processed = ''Y''';
  etl.refresh_totals(v_count);
  DBMS_OUTPUT.PUT_LINE('done');
  COMMIT;
END;
/
";

    fn graph(name: &str, text: &str) -> SourceGraph {
        let input = SourceInput::new(SourceConfig::new(SourceSystem::Oracle), vec![Artifact::new(name, text)]);
        extract_source(&input, &Config::default()).unwrap()
    }

    fn names(graph: &SourceGraph, ids: &[lineagebridge_core::DatasetId]) -> Vec<String> {
        ids.iter().map(|&id| graph.dataset(id).unwrap().name.clone()).collect()
    }

    #[test]
    fn prefixes_are_stripped() {
        assert_eq!(
            strip_prefixes("CREATE OR REPLACE PROCEDURE p AS\n  v NUMBER"),
            ("v NUMBER", 1)
        );
        assert_eq!(strip_prefixes("BEGIN\n  IF x > 0 THEN\n    DELETE FROM t"), ("DELETE FROM t", 2));
        assert_eq!(strip_prefixes("END IF"), ("END IF", 0));
    }

    #[test]
    fn calls_skip_system_packages_and_keywords() {
        assert_eq!(called_procedure("etl.load_dim(1)"), Some("etl.load_dim".to_string()));
        assert_eq!(called_procedure("refresh_all"), Some("refresh_all".to_string()));
        assert_eq!(called_procedure("DBMS_STATS.GATHER_TABLE_STATS('ETL', 'T')"), None);
        assert_eq!(called_procedure("RAISE_APPLICATION_ERROR(-20001, 'x')"), None);
        assert_eq!(called_procedure("COMMIT"), None);
        assert_eq!(called_procedure("v_count := 1"), None);
    }

    #[test]
    fn procedure_substeps_in_order() {
        let graph = graph("procs.sql", PROCEDURE);
        let job = graph.job_by_key("etl.proc_update_orders").unwrap();
        assert_eq!(job.kind, JobKind::StoredProcedure);
        assert_eq!(graph.container(job.container).unwrap().key, "etl");

        let operations: Vec<(&str, &str)> = ["001", "002", "003"]
            .iter()
            .map(|n| {
                (
                    job.properties[&format!("substep.{}.operation", n)].as_str(),
                    job.properties[&format!("substep.{}.line", n)].as_str(),
                )
            })
            .collect();
        assert_eq!(operations, vec![("insert", "4"), ("update", "6"), ("dynamic", "7")]);
        assert!(!job.properties.contains_key("substep.004.operation"));
        assert_eq!(job.properties["substep.001.query_hash"].len(), 16);

        assert_eq!(job.properties["calls"], "etl.refresh_totals");
        assert_eq!(job.properties["call.001"], "etl.refresh_totals");
    }

    #[test]
    fn procedure_reads_and_writes() {
        let graph = graph("procs.sql", PROCEDURE);
        let job = graph.job_by_key("etl.proc_update_orders").unwrap();
        let reads = names(&graph, &job.reads);
        assert!(reads.contains(&"prod.customers".to_string()));
        assert!(reads.contains(&"prod.payments".to_string()));
        let writes = names(&graph, &job.writes);
        assert!(writes.contains(&"etl.orders".to_string()));
        assert!(writes.contains(&"etl.order_staging".to_string()));
    }

    #[test]
    fn observed_statements_default_to_their_parsing_schema() {
        let rows = r#"[
            {"sql_id": "abc123", "parsing_schema_name": "ETL", "sql_text": "INSERT INTO t SELECT * FROM s", "executions": 4},
            {"sql_id": "def456", "parsing_schema_name": "RPT", "sql_text": "SELECT * FROM s"}
        ]"#;
        let graph = graph("vsql.json", rows);

        let keys: Vec<&str> = graph.containers.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["ETL", "RPT"]);

        let insert = graph.job_by_key("abc123").unwrap();
        assert_eq!(insert.kind, JobKind::ObservedStatement);
        assert_eq!(insert.properties["executions"], "4");
        assert_eq!(names(&graph, &insert.writes), vec!["etl.t"]);
        assert_eq!(names(&graph, &insert.reads), vec!["etl.s"]);

        let select = graph.job_by_key("def456").unwrap();
        assert_eq!(names(&graph, &select.reads), vec!["rpt.s"]);
    }
}
