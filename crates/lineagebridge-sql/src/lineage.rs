//! SQL to lineage inference
//!
//! Traces each output column of a statement back to the base table columns
//! feeding it through projections, joins, derived tables, CTEs, aggregates,
//! CASE expressions and scalar subqueries.

use crate::fallback::{self, ExtractedTables};
use crate::hint::SchemaHint;
use crate::parser::SqlParser;
use crate::scope::{kind_rank, resolve_column, ColumnFlow, Resolution, Scope, ScopeEntry};
use lineagebridge_core::identity::{short_name, split_qualified};
use lineagebridge_core::{
    content_hash, normalize_dataset_name, preview, Confidence, DialectConfig, Diagnostic, DiagnosticCode,
    FieldPath, LineageFact, Transformation, TransformationKind,
};
use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Expr, FromTable, Ident, MergeAction, MergeInsertKind, ObjectName, Query,
    Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Visit, Visitor,
};
use std::ops::ControlFlow;

const AGGREGATES: &[&str] = &[
    "COUNT", "COUNT_BIG", "SUM", "AVG", "MIN", "MAX", "STDDEV", "STDDEV_POP", "STDDEV_SAMP", "VARIANCE",
    "VAR_POP", "VAR_SAMP", "ARRAY_AGG", "STRING_AGG", "LISTAGG", "GROUP_CONCAT", "MEDIAN",
    "PERCENTILE_CONT", "PERCENTILE_DISC", "APPROX_COUNT_DISTINCT", "ANY_VALUE", "BOOL_AND", "BOOL_OR",
];

/// Bare identifiers that are not columns
const PSEUDO_COLUMNS: &[&str] = &[
    "SYSDATE", "SYSTIMESTAMP", "ROWNUM", "ROWID", "LEVEL", "USER", "CURRENT_DATE", "CURRENT_TIMESTAMP",
    "CURRENT_USER", "SESSION_USER", "NULL", "TRUE", "FALSE",
];

/// What a statement does to its tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    SelectInto,
    Insert,
    Update,
    Delete,
    Merge,
    CreateTableAs,
    CreateView,
    Truncate,
    Call,
    Dynamic,
    Ddl,
    Other,
    Unparsed,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::SelectInto => "select_into",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Merge => "merge",
            Self::CreateTableAs => "create_table_as",
            Self::CreateView => "create_view",
            Self::Truncate => "truncate",
            Self::Call => "call",
            Self::Dynamic => "dynamic",
            Self::Ddl => "ddl",
            Self::Other => "other",
            Self::Unparsed => "unparsed",
        }
    }

    /// Whether the statement changes data in a table
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::SelectInto
                | Self::Insert
                | Self::Update
                | Self::Delete
                | Self::Merge
                | Self::CreateTableAs
                | Self::CreateView
                | Self::Truncate
        )
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lineage inferred from one SQL text (one or more statements)
#[derive(Debug, Clone, Serialize)]
pub struct SqlLineage {
    pub kind: StatementKind,
    /// Normalized tables read, first-seen order
    pub inputs: Vec<String>,
    /// Normalized tables written, first-seen order
    pub outputs: Vec<String>,
    pub facts: Vec<LineageFact>,
    /// Procedures invoked with CALL/EXEC
    pub calls: Vec<String>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
    pub query_hash: String,
    pub preview: String,
}

impl SqlLineage {
    fn empty(sql: &str, preview_chars: usize) -> Self {
        Self {
            kind: StatementKind::Other,
            inputs: Vec::new(),
            outputs: Vec::new(),
            facts: Vec::new(),
            calls: Vec::new(),
            diagnostics: Vec::new(),
            query_hash: content_hash(sql),
            preview: preview(sql.trim(), preview_chars),
        }
    }

    fn set_kind(&mut self, kind: StatementKind) {
        let weak = |k: StatementKind| matches!(k, StatementKind::Other | StatementKind::Select | StatementKind::Ddl);
        if weak(self.kind) && !weak(kind) || self.kind == StatementKind::Other {
            self.kind = kind;
        }
    }

    fn add_input(&mut self, table: String) {
        if !self.inputs.contains(&table) {
            self.inputs.push(table);
        }
    }

    fn add_output(&mut self, table: String) {
        if !self.outputs.contains(&table) {
            self.outputs.push(table);
        }
    }

    fn add_fact(&mut self, fact: LineageFact) {
        match self.facts.iter_mut().find(|f| {
            f.source == fact.source && f.target == fact.target && f.transformation == fact.transformation
        }) {
            Some(existing) => existing.confidence = existing.confidence.max(fact.confidence),
            None => self.facts.push(fact),
        }
    }

    fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        if !self
            .diagnostics
            .iter()
            .any(|d| d.code == diagnostic.code && d.message == diagnostic.message)
        {
            self.diagnostics.push(diagnostic);
        }
    }

    /// Column-level facts only
    pub fn column_facts(&self) -> impl Iterator<Item = &LineageFact> {
        self.facts.iter().filter(|f| !f.target.is_table_level())
    }
}

#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub dialect: DialectConfig,
    pub default_db: Option<String>,
    pub default_schema: Option<String>,
    /// SQL `LIKE` patterns of tables to leave out; `DUAL` is always ignored
    pub ignore_tables: Vec<String>,
    pub preview_chars: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            dialect: DialectConfig::Ansi,
            default_db: None,
            default_schema: None,
            ignore_tables: Vec::new(),
            preview_chars: 500,
        }
    }
}

fn like_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?i)^");
    for c in pattern.trim().chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Infers lineage from SQL text
pub struct LineageInferencer {
    parser: SqlParser,
    hints: SchemaHint,
    options: InferenceOptions,
    ignore: Vec<Regex>,
}

impl LineageInferencer {
    pub fn new(options: InferenceOptions, hints: SchemaHint) -> Self {
        let ignore = options.ignore_tables.iter().filter_map(|p| like_to_regex(p)).collect();
        Self {
            parser: SqlParser::from_dialect(&options.dialect),
            hints,
            options,
            ignore,
        }
    }

    pub fn hints(&self) -> &SchemaHint {
        &self.hints
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Normalize a table reference with the configured defaults
    pub fn normalize_table(&self, raw: &str) -> String {
        normalize_dataset_name(
            raw,
            self.options.default_db.as_deref(),
            self.options.default_schema.as_deref(),
        )
    }

    pub fn is_ignored(&self, normalized: &str) -> bool {
        let short = short_name(normalized);
        short.eq_ignore_ascii_case("dual")
            || self
                .ignore
                .iter()
                .any(|re| re.is_match(normalized) || re.is_match(short))
    }

    /// Infer lineage for `sql`
    ///
    /// `target_hint` names the table a bare query feeds (a load target, a
    /// session target); it is ignored for statements that name their own.
    pub fn infer(&self, sql: &str, target_hint: Option<&str>) -> SqlLineage {
        let mut out = SqlLineage::empty(sql, self.options.preview_chars);
        if sql.trim().is_empty() {
            return out;
        }

        if fallback::is_dynamic(sql) {
            out.kind = StatementKind::Dynamic;
            let tables = fallback::extract_tables(&fallback::literal_text(sql));
            self.table_level_fallback(&mut out, tables, "dynamic SQL");
            out.add_diagnostic(Diagnostic::of(
                DiagnosticCode::SqlDynamic,
                "SQL is built at runtime; only table-level lineage from its literal text",
            ));
            return out;
        }

        if let Some(procedure) = fallback::called_procedure(sql) {
            out.kind = StatementKind::Call;
            out.calls.push(procedure);
            return out;
        }

        let parsed = match self.parser.parse(sql, None) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(error = %err, "falling back to pattern extraction");
                out.kind = StatementKind::Unparsed;
                out.add_diagnostic(err.to_diagnostic());
                self.table_level_fallback(&mut out, fallback::extract_tables(sql), "unparsed SQL");
                return out;
            }
        };

        for statement in &parsed.statements {
            let mut analyzer = Analyzer {
                inferencer: self,
                ctes: Vec::new(),
                star_unexpanded: false,
                out: &mut out,
            };
            analyzer.statement(statement, target_hint);
        }
        out
    }

    fn table_level_fallback(&self, out: &mut SqlLineage, tables: ExtractedTables, label: &str) {
        for raw in tables.writes {
            let table = self.normalize_table(&raw);
            if !self.is_ignored(&table) {
                out.add_output(table);
            }
        }
        for raw in tables.reads {
            let table = self.normalize_table(&raw);
            if !self.is_ignored(&table) {
                out.add_input(table);
            }
        }
        for input in out.inputs.clone() {
            for output in out.outputs.clone() {
                if input != output {
                    out.add_fact(LineageFact::new(
                        FieldPath::table(input.clone()),
                        FieldPath::table(output),
                        Transformation::new(TransformationKind::Unknown, label),
                        Confidence::Low,
                    ));
                }
            }
        }
    }
}

/// Collects what an expression references, without entering subqueries
#[derive(Default)]
struct ExprCollector {
    depth: usize,
    columns: Vec<(Option<String>, String)>,
    aggregate: Option<String>,
    window: bool,
    conditional: bool,
    subqueries: Vec<Query>,
}

impl ExprCollector {
    fn push_column(&mut self, qualifier: Option<String>, ident: &Ident) {
        let name = &ident.value;
        if name.starts_with('@') || name.starts_with(':') {
            return;
        }
        if qualifier.is_none()
            && ident.quote_style.is_none()
            && PSEUDO_COLUMNS.iter().any(|p| name.eq_ignore_ascii_case(p))
        {
            return;
        }
        let entry = (qualifier, name.clone());
        if !self.columns.contains(&entry) {
            self.columns.push(entry);
        }
    }
}

impl Visitor for ExprCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.subqueries.push(query.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::Identifier(ident) => self.push_column(None, ident),
            Expr::CompoundIdentifier(idents) => {
                if let Some((column, qualifier)) = idents.split_last() {
                    let qualifier = qualifier
                        .iter()
                        .map(|i| i.value.as_str())
                        .collect::<Vec<_>>()
                        .join(".");
                    self.push_column(Some(qualifier).filter(|q| !q.is_empty()), column);
                }
            }
            Expr::Function(func) => {
                let full = func.name.to_string().to_uppercase();
                let name = short_name(&full).to_string();
                if func.over.is_some() {
                    self.window = true;
                } else if self.aggregate.is_none() && AGGREGATES.contains(&name.as_str()) {
                    self.aggregate = Some(name);
                }
            }
            Expr::Case { .. } => self.conditional = true,
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Collects relation names, skipping CTE references
#[derive(Default)]
struct RelationCollector {
    names: Vec<String>,
    ctes: Vec<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            self.ctes
                .extend(with.cte_tables.iter().map(|cte| cte.alias.name.value.to_lowercase()));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.names.push(relation.to_string());
        ControlFlow::Continue(())
    }
}

fn is_plain_column(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => true,
        Expr::Nested(inner) => is_plain_column(inner),
        _ => false,
    }
}

fn projected_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| i.value.to_lowercase()),
        Expr::Nested(inner) => projected_name(inner),
        _ => None,
    }
}

fn assignment_column(assignment: &Assignment) -> Option<String> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => name.0.last().map(|i| i.value.to_lowercase()),
        AssignmentTarget::Tuple(_) => None,
    }
}

fn factor_table(factor: &TableFactor) -> Option<(&ObjectName, Option<&str>)> {
    match factor {
        TableFactor::Table { name, alias, .. } => Some((name, alias.as_ref().map(|a| a.name.value.as_str()))),
        _ => None,
    }
}

struct Analyzer<'a> {
    inferencer: &'a LineageInferencer,
    /// Visible CTEs, innermost last
    ctes: Vec<(String, Vec<ColumnFlow>)>,
    star_unexpanded: bool,
    out: &'a mut SqlLineage,
}

impl<'a> Analyzer<'a> {
    fn cte(&self, name: &str) -> Option<&Vec<ColumnFlow>> {
        self.ctes
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, cols)| cols)
    }

    fn table(&self, name: &ObjectName) -> String {
        self.inferencer.normalize_table(&name.to_string())
    }

    fn statement(&mut self, statement: &Statement, target_hint: Option<&str>) {
        match statement {
            Statement::Query(query) => self.query_statement(query, target_hint),

            Statement::Insert(insert) => {
                self.out.set_kind(StatementKind::Insert);
                let target = self.table(&insert.table_name);
                let Some(source) = &insert.source else {
                    self.out.add_output(target);
                    return;
                };
                let explicit: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
                self.load(source, &target, &explicit, "insert");
            }

            Statement::Update {
                table,
                assignments,
                ..
            } => {
                self.out.set_kind(StatementKind::Update);
                let Some((name, _)) = factor_table(&table.relation) else {
                    return;
                };
                let target = self.inferencer.normalize_table(&name.to_string());

                let mut scope = Scope::default();
                self.add_table_with_joins(table, &mut scope);
                let mut scopes = vec![scope];
                let flows: Vec<(String, ColumnFlow)> = assignments
                    .iter()
                    .filter_map(|a| {
                        let column = assignment_column(a)?;
                        Some((column.clone(), self.expr_flow(Some(column), &a.value, &mut scopes)))
                    })
                    .collect();

                self.collect_reads(statement, Some(&target));
                self.write_flows(&target, flows, false);
                self.finish_target(&target, "update");
            }

            Statement::Delete(delete) => {
                self.out.set_kind(StatementKind::Delete);
                let tables = match &delete.from {
                    FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
                };
                let target = tables
                    .first()
                    .and_then(|t| factor_table(&t.relation))
                    .map(|(name, _)| self.table(name));
                self.collect_reads(statement, target.as_deref());
                if let Some(target) = target {
                    self.out.add_output(target);
                }
            }

            Statement::Merge {
                table,
                source,
                clauses,
                ..
            } => {
                self.out.set_kind(StatementKind::Merge);
                let Some((name, _)) = factor_table(table) else {
                    return;
                };
                let target = self.table(name);

                let mut scope = Scope::default();
                self.add_factor(table, &mut scope);
                self.add_factor(source, &mut scope);
                let mut scopes = vec![scope];

                let mut flows = Vec::new();
                for clause in clauses {
                    match &clause.action {
                        MergeAction::Update { assignments } => {
                            for a in assignments {
                                if let Some(column) = assignment_column(a) {
                                    let flow = self.expr_flow(Some(column.clone()), &a.value, &mut scopes);
                                    flows.push((column, flow));
                                }
                            }
                        }
                        MergeAction::Insert(insert) => {
                            if let MergeInsertKind::Values(values) = &insert.kind {
                                for row in &values.rows {
                                    for (column, expr) in insert.columns.iter().zip(row) {
                                        let column = column.value.to_lowercase();
                                        let flow = self.expr_flow(Some(column.clone()), expr, &mut scopes);
                                        flows.push((column, flow));
                                    }
                                }
                            }
                        }
                        MergeAction::Delete => {}
                    }
                }

                let mut reads = RelationCollector::default();
                let _ = source.visit(&mut reads);
                self.add_reads(reads, Some(&target));
                self.write_flows(&target, flows, false);
                self.finish_target(&target, "merge");
            }

            Statement::CreateTable(create) => match &create.query {
                Some(query) => {
                    self.out.set_kind(StatementKind::CreateTableAs);
                    let target = self.table(&create.name);
                    let explicit: Vec<String> =
                        create.columns.iter().map(|c| c.name.value.to_lowercase()).collect();
                    self.load(query, &target, &explicit, "create table as");
                }
                None => self.out.set_kind(StatementKind::Ddl),
            },

            Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => {
                self.out.set_kind(StatementKind::CreateView);
                let target = self.table(name);
                let explicit: Vec<String> = columns.iter().map(|c| c.name.value.to_lowercase()).collect();
                self.load(query, &target, &explicit, "create view");
            }

            Statement::Call(function) => {
                self.out.set_kind(StatementKind::Call);
                self.out.calls.push(function.name.to_string());
            }

            Statement::Truncate { .. } => {
                self.out.set_kind(StatementKind::Truncate);
                for raw in fallback::extract_tables(&statement.to_string()).writes {
                    let table = self.inferencer.normalize_table(&raw);
                    self.out.add_output(table);
                }
            }

            other => {
                let text = other.to_string();
                if let Some(procedure) = fallback::called_procedure(&text) {
                    self.out.set_kind(StatementKind::Call);
                    self.out.calls.push(procedure);
                    return;
                }
                self.out.set_kind(StatementKind::Other);
                let keyword = text.split_whitespace().next().unwrap_or("statement").to_uppercase();
                self.out.add_diagnostic(Diagnostic::of(
                    DiagnosticCode::SqlUnsupportedStatement,
                    format!("{} statements carry no lineage", keyword),
                ));
            }
        }
    }

    fn query_statement(&mut self, query: &Query, target_hint: Option<&str>) {
        let into = match query.body.as_ref() {
            SetExpr::Select(select) => select.into.as_ref(),
            _ => None,
        };

        let creates_table = matches!(
            self.inferencer.options.dialect,
            DialectConfig::MsSql | DialectConfig::Postgres
        );
        let target = match into {
            // PL/SQL SELECT INTO fills variables, not tables
            Some(into) if creates_table => {
                self.out.set_kind(StatementKind::SelectInto);
                Some(self.table(&into.name))
            }
            Some(_) => {
                self.out.set_kind(StatementKind::SelectInto);
                None
            }
            None => {
                self.out.set_kind(StatementKind::Select);
                target_hint.map(|t| self.inferencer.normalize_table(t))
            }
        };

        match target {
            Some(target) => self.load(query, &target, &[], "select"),
            None => {
                let mut reads = RelationCollector::default();
                let _ = query.visit(&mut reads);
                self.add_reads(reads, None);
            }
        }
    }

    /// Data flowing from `source` into `target`
    fn load(&mut self, source: &Query, target: &str, explicit: &[String], label: &str) {
        self.star_unexpanded = false;
        let flows = self.query_columns(source, &mut Vec::new());

        let mut reads = RelationCollector::default();
        let _ = source.visit(&mut reads);
        self.add_reads(reads, None);

        let target_columns: Vec<Option<String>> = if !explicit.is_empty() {
            explicit.iter().cloned().map(Some).collect()
        } else if let Some(hinted) = self.inferencer.hints.columns(target) {
            hinted.iter().cloned().map(Some).collect()
        } else {
            flows.iter().map(|f| f.name.clone()).collect()
        };

        if self.star_unexpanded {
            self.out.add_diagnostic(
                Diagnostic::of(
                    DiagnosticCode::SqlSelectStarUnexpandable,
                    format!("SELECT * into {} cannot be expanded without a schema hint; table-level lineage only", target),
                )
                .with_subject(target.to_string()),
            );
        } else {
            let pairs = target_columns
                .into_iter()
                .zip(flows)
                .filter_map(|(column, flow)| column.map(|c| (c, flow)))
                .collect();
            self.write_flows(target, pairs, true);
        }
        self.finish_target(target, label);
    }

    /// Column facts for `flows`
    ///
    /// A flow that reads no column (`COUNT(*)`, a literal) is fed by the rows
    /// of every input when `row_inputs` is set; otherwise it is flagged.
    fn write_flows(&mut self, target: &str, flows: Vec<(String, ColumnFlow)>, row_inputs: bool) {
        for (column, flow) in flows {
            let target_path = FieldPath::column(target.to_string(), column.clone());
            let transformation = Transformation {
                kind: flow.kind,
                description: flow.text.clone(),
                aggregation: flow.aggregation.clone(),
            };
            if flow.sources.is_empty() {
                self.write_sourceless(target_path, transformation, row_inputs);
                continue;
            }
            for source in &flow.sources {
                self.out.add_fact(LineageFact::new(
                    source.path.clone(),
                    target_path.clone(),
                    transformation.clone(),
                    source.confidence,
                ));
            }
        }
    }

    fn write_sourceless(&mut self, target_path: FieldPath, transformation: Transformation, row_inputs: bool) {
        let inputs: Vec<String> = if row_inputs {
            self.out
                .inputs
                .iter()
                .filter(|input| **input != target_path.dataset)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        if inputs.is_empty() {
            self.out.add_diagnostic(
                Diagnostic::of(
                    DiagnosticCode::Info,
                    format!("{} is not fed by any input column ({})", target_path, transformation.description),
                )
                .with_subject(target_path.dataset.clone()),
            );
            return;
        }
        for input in inputs {
            self.out.add_fact(LineageFact::new(
                FieldPath::table(input),
                target_path.clone(),
                transformation.clone(),
                Confidence::High,
            ));
        }
    }

    /// Register `target` as written and add table-level facts from every input
    fn finish_target(&mut self, target: &str, label: &str) {
        let kind = self
            .out
            .column_facts()
            .filter(|f| f.target.dataset == target)
            .map(|f| f.transformation.kind)
            .max_by_key(|k| kind_rank(*k))
            .unwrap_or(TransformationKind::Direct);

        for input in self.out.inputs.clone() {
            if input == target {
                continue;
            }
            self.out.add_fact(LineageFact::new(
                FieldPath::table(input),
                FieldPath::table(target.to_string()),
                Transformation::new(kind, label),
                Confidence::High,
            ));
        }
        self.out.add_output(target.to_string());
    }

    fn collect_reads(&mut self, statement: &Statement, exclude: Option<&str>) {
        let mut reads = RelationCollector::default();
        let _ = statement.visit(&mut reads);
        self.add_reads(reads, exclude);
    }

    fn add_reads(&mut self, reads: RelationCollector, exclude: Option<&str>) {
        for raw in reads.names {
            if split_qualified(&raw).len() == 1 && reads.ctes.iter().any(|c| c.eq_ignore_ascii_case(&raw)) {
                continue;
            }
            let table = self.inferencer.normalize_table(&raw);
            if self.inferencer.is_ignored(&table) || exclude == Some(table.as_str()) {
                continue;
            }
            self.out.add_input(table);
        }
    }

    fn query_columns(&mut self, query: &Query, scopes: &mut Vec<Scope>) -> Vec<ColumnFlow> {
        let mark = self.ctes.len();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let columns = self.query_columns(&cte.query, &mut Vec::new());
                self.ctes.push((cte.alias.name.value.to_lowercase(), columns));
            }
        }
        let columns = self.set_expr_columns(&query.body, scopes);
        self.ctes.truncate(mark);
        columns
    }

    fn set_expr_columns(&mut self, body: &SetExpr, scopes: &mut Vec<Scope>) -> Vec<ColumnFlow> {
        match body {
            SetExpr::Select(select) => self.select_columns(select, scopes),
            SetExpr::Query(query) => self.query_columns(query, scopes),
            SetExpr::SetOperation { left, right, .. } => {
                let mut columns = self.set_expr_columns(left, scopes);
                let right = self.set_expr_columns(right, scopes);
                for (column, other) in columns.iter_mut().zip(right) {
                    for source in other.sources {
                        column.add_source(source);
                    }
                    column.absorb_kind(other.kind, other.aggregation.as_deref());
                }
                columns
            }
            SetExpr::Values(values) => {
                let mut columns: Vec<ColumnFlow> = Vec::new();
                for row in &values.rows {
                    for (idx, expr) in row.iter().enumerate() {
                        let flow = self.expr_flow(None, expr, scopes);
                        match columns.get_mut(idx) {
                            Some(column) => {
                                for source in flow.sources {
                                    column.add_source(source);
                                }
                                column.absorb_kind(flow.kind, flow.aggregation.as_deref());
                            }
                            None => columns.push(flow),
                        }
                    }
                }
                columns
            }
            _ => Vec::new(),
        }
    }

    fn select_columns(&mut self, select: &Select, scopes: &mut Vec<Scope>) -> Vec<ColumnFlow> {
        let mut scope = Scope::default();
        for table in &select.from {
            self.add_table_with_joins(table, &mut scope);
        }
        scopes.push(scope);

        let mut columns = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    let flow = self.expr_flow(projected_name(expr), expr, scopes);
                    columns.push(flow);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let flow = self.expr_flow(Some(alias.value.to_lowercase()), expr, scopes);
                    columns.push(flow);
                }
                SelectItem::Wildcard(_) => {
                    let entries = scopes.last().map(|s| s.entries.clone()).unwrap_or_default();
                    for entry in &entries {
                        self.expand_star(entry, &mut columns);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.to_string();
                    let entry = scopes
                        .last()
                        .and_then(|s| s.entries.iter().find(|e| e.answers_to(&qualifier)).cloned());
                    match entry {
                        Some(entry) => self.expand_star(&entry, &mut columns),
                        None => self.star_unexpanded = true,
                    }
                }
            }
        }

        scopes.pop();
        columns
    }

    fn expand_star(&mut self, entry: &ScopeEntry, columns: &mut Vec<ColumnFlow>) {
        match entry.star_columns() {
            Some(expanded) => columns.extend(expanded),
            None => self.star_unexpanded = true,
        }
    }

    fn add_table_with_joins(&mut self, table: &TableWithJoins, scope: &mut Scope) {
        self.add_factor(&table.relation, scope);
        for join in &table.joins {
            self.add_factor(&join.relation, scope);
        }
    }

    fn add_factor(&mut self, factor: &TableFactor, scope: &mut Scope) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let raw = name.to_string();
                let alias = alias.as_ref().map(|a| a.name.value.as_str());
                if name.0.len() == 1 {
                    if let Some(columns) = self.cte(&name.0[0].value).cloned() {
                        let key = alias.unwrap_or(name.0[0].value.as_str());
                        scope.entries.push(ScopeEntry::derived(Some(key), columns));
                        return;
                    }
                }
                let table = self.inferencer.normalize_table(&raw);
                if self.inferencer.is_ignored(&table) {
                    return;
                }
                let columns = self.inferencer.hints.columns(&table).map(|c| c.to_vec());
                scope.entries.push(ScopeEntry::table(&table, alias, columns));
            }
            TableFactor::Derived { subquery, alias, .. } => {
                let columns = self.query_columns(subquery, &mut Vec::new());
                let alias = alias.as_ref().map(|a| a.name.value.as_str());
                scope.entries.push(ScopeEntry::derived(alias, columns));
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.add_table_with_joins(table_with_joins, scope);
            }
            _ => {}
        }
    }

    fn expr_flow(&mut self, name: Option<String>, expr: &Expr, scopes: &mut Vec<Scope>) -> ColumnFlow {
        let mut collector = ExprCollector::default();
        let _ = expr.visit(&mut collector);

        let mut flow = ColumnFlow::new(name, expr.to_string());
        for (qualifier, column) in &collector.columns {
            let part = match resolve_column(scopes, qualifier.as_deref(), column) {
                Resolution::Unique(part) => part,
                Resolution::Ambiguous { flow: part, candidates } => {
                    self.out.add_diagnostic(
                        Diagnostic::of(
                            DiagnosticCode::AmbiguousColumn,
                            format!("column '{}' could come from any of: {}", column, candidates.join(", ")),
                        )
                        .with_subject(column.clone())
                        .with_related(candidates),
                    );
                    part
                }
                Resolution::NotInHint { flow: part, table } => {
                    self.out.add_diagnostic(
                        Diagnostic::of(
                            DiagnosticCode::UnresolvedColumn,
                            format!("column '{}' is not in the schema hint for {}", column, table),
                        )
                        .with_subject(format!("{}.{}", table, column.to_lowercase())),
                    );
                    part
                }
                Resolution::Unresolved => continue,
            };
            for source in part.sources {
                flow.add_source(source);
            }
            flow.absorb_kind(part.kind, part.aggregation.as_deref());
        }

        for subquery in &collector.subqueries {
            if let Some(first) = self.query_columns(subquery, scopes).into_iter().next() {
                for source in first.sources {
                    flow.add_source(source);
                }
                flow.absorb_kind(first.kind, first.aggregation.as_deref());
            }
        }

        let own = if collector.aggregate.is_some() {
            TransformationKind::Aggregation
        } else if collector.window {
            TransformationKind::Window
        } else if collector.conditional {
            TransformationKind::Conditional
        } else if is_plain_column(expr) {
            TransformationKind::Direct
        } else {
            TransformationKind::Derived
        };
        flow.absorb_kind(own, collector.aggregate.as_deref());
        flow
    }
}
