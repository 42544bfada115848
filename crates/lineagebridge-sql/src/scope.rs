//! Relations visible to a query block and column resolution against them

use lineagebridge_core::identity::short_name;
use lineagebridge_core::{Confidence, FieldPath, TransformationKind};

/// One base column feeding an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRef {
    pub path: FieldPath,
    pub confidence: Confidence,
}

/// Provenance of one output column of a query block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFlow {
    /// Output name (alias or column name); `None` for unnamed expressions
    pub name: Option<String>,
    /// Expression text as written
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub kind: TransformationKind,
    /// Aggregate function name when `kind` is aggregation
    pub aggregation: Option<String>,
}

impl ColumnFlow {
    pub fn new(name: Option<String>, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
            sources: Vec::new(),
            kind: TransformationKind::Direct,
            aggregation: None,
        }
    }

    pub fn add_source(&mut self, source: SourceRef) {
        match self.sources.iter_mut().find(|s| s.path == source.path) {
            Some(existing) => existing.confidence = existing.confidence.max(source.confidence),
            None => self.sources.push(source),
        }
    }

    /// Fold another flow's kind into this one, keeping the stronger kind
    pub fn absorb_kind(&mut self, kind: TransformationKind, aggregation: Option<&str>) {
        if kind_rank(kind) > kind_rank(self.kind) {
            self.kind = kind;
            self.aggregation = aggregation.map(str::to_string);
        } else if kind == self.kind && self.aggregation.is_none() {
            self.aggregation = aggregation.map(str::to_string);
        }
    }
}

/// Aggregation > Window > Conditional > Copy > Derived > Direct
pub fn kind_rank(kind: TransformationKind) -> u8 {
    match kind {
        TransformationKind::Direct => 0,
        TransformationKind::Unknown => 1,
        TransformationKind::Derived => 2,
        TransformationKind::Copy => 3,
        TransformationKind::Conditional => 4,
        TransformationKind::Window => 5,
        TransformationKind::Aggregation => 6,
    }
}

#[derive(Debug, Clone)]
pub enum EntrySource {
    /// Base table; `columns` comes from a schema hint
    Table {
        name: String,
        columns: Option<Vec<String>>,
    },
    /// Subquery or CTE
    Derived { columns: Vec<ColumnFlow> },
}

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    /// Lowercase names the relation can be referenced by
    pub keys: Vec<String>,
    pub source: EntrySource,
}

impl ScopeEntry {
    pub fn table(name: &str, alias: Option<&str>, columns: Option<Vec<String>>) -> Self {
        let mut keys = Vec::new();
        if let Some(alias) = alias {
            keys.push(alias.to_lowercase());
        }
        keys.push(name.to_lowercase());
        let short = short_name(name).to_lowercase();
        if !keys.contains(&short) {
            keys.push(short);
        }
        Self {
            keys,
            source: EntrySource::Table {
                name: name.to_string(),
                columns,
            },
        }
    }

    pub fn derived(alias: Option<&str>, columns: Vec<ColumnFlow>) -> Self {
        Self {
            keys: alias.map(|a| vec![a.to_lowercase()]).unwrap_or_default(),
            source: EntrySource::Derived { columns },
        }
    }

    pub fn answers_to(&self, qualifier: &str) -> bool {
        let q = qualifier.to_lowercase();
        self.keys.iter().any(|k| *k == q || short_name(k) == q)
            || self.keys.iter().any(|k| short_name(&q) == k.as_str())
    }

    /// `Some(true/false)` when the column set is known, `None` otherwise
    pub fn has_column(&self, column: &str) -> Option<bool> {
        match &self.source {
            EntrySource::Table { columns: Some(cols), .. } => {
                Some(cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
            }
            EntrySource::Table { columns: None, .. } => None,
            EntrySource::Derived { columns } => Some(columns.iter().any(|c| {
                c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(column))
            })),
        }
    }

    /// Flow contributed by `column` of this relation, capped at `confidence`
    pub fn column_flow(&self, column: &str, confidence: Confidence) -> ColumnFlow {
        let column = column.to_lowercase();
        match &self.source {
            EntrySource::Table { name, .. } => {
                let mut flow = ColumnFlow::new(Some(column.clone()), column.clone());
                flow.add_source(SourceRef {
                    path: FieldPath::column(name.clone(), column),
                    confidence,
                });
                flow
            }
            EntrySource::Derived { columns } => {
                let mut flow = ColumnFlow::new(Some(column.clone()), column.clone());
                if let Some(inner) = columns.iter().find(|c| {
                    c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&column))
                }) {
                    for source in &inner.sources {
                        flow.add_source(SourceRef {
                            path: source.path.clone(),
                            confidence: source.confidence.min(confidence),
                        });
                    }
                    flow.absorb_kind(inner.kind, inner.aggregation.as_deref());
                }
                flow
            }
        }
    }

    /// Output columns when the relation is expanded by `*`
    pub fn star_columns(&self) -> Option<Vec<ColumnFlow>> {
        match &self.source {
            EntrySource::Table { columns: Some(cols), .. } => Some(
                cols.iter()
                    .map(|c| self.column_flow(c, Confidence::High))
                    .collect(),
            ),
            EntrySource::Table { columns: None, .. } => None,
            EntrySource::Derived { columns } => {
                if columns.iter().all(|c| c.name.is_some()) {
                    Some(columns.clone())
                } else {
                    None
                }
            }
        }
    }

    pub fn table_name(&self) -> Option<&str> {
        match &self.source {
            EntrySource::Table { name, .. } => Some(name),
            EntrySource::Derived { .. } => None,
        }
    }
}

/// Relations of one query block
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub entries: Vec<ScopeEntry>,
}

/// Result of resolving one column reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Attributed to exactly one relation
    Unique(ColumnFlow),
    /// Several relations could own the column; all are returned at low confidence
    Ambiguous { flow: ColumnFlow, candidates: Vec<String> },
    /// A hinted table lacks the column; kept at medium confidence
    NotInHint { flow: ColumnFlow, table: String },
    /// No relation in any enclosing block can own the column
    Unresolved,
}

fn entry_label(entry: &ScopeEntry) -> String {
    entry
        .table_name()
        .map(str::to_string)
        .or_else(|| entry.keys.first().cloned())
        .unwrap_or_else(|| "(subquery)".to_string())
}

fn merged(entries: &[&ScopeEntry], column: &str, confidence: Confidence) -> ColumnFlow {
    let mut flow = ColumnFlow::new(Some(column.to_lowercase()), column.to_lowercase());
    for entry in entries {
        let part = entry.column_flow(column, confidence);
        for source in part.sources {
            flow.add_source(source);
        }
        flow.absorb_kind(part.kind, part.aggregation.as_deref());
    }
    flow
}

/// Resolve `qualifier.column` against the block stack, innermost last
pub fn resolve_column(scopes: &[Scope], qualifier: Option<&str>, column: &str) -> Resolution {
    if let Some(qualifier) = qualifier {
        for scope in scopes.iter().rev() {
            if let Some(entry) = scope.entries.iter().find(|e| e.answers_to(qualifier)) {
                return match entry.has_column(column) {
                    Some(false) => match entry.table_name() {
                        Some(table) => Resolution::NotInHint {
                            flow: entry.column_flow(column, Confidence::Medium),
                            table: table.to_string(),
                        },
                        None => Resolution::Unresolved,
                    },
                    _ => Resolution::Unique(entry.column_flow(column, Confidence::High)),
                };
            }
        }
        return Resolution::Unresolved;
    }

    for scope in scopes.iter().rev() {
        if scope.entries.is_empty() {
            continue;
        }

        let known: Vec<&ScopeEntry> = scope
            .entries
            .iter()
            .filter(|e| e.has_column(column) == Some(true))
            .collect();
        let unknown: Vec<&ScopeEntry> = scope
            .entries
            .iter()
            .filter(|e| e.has_column(column).is_none())
            .collect();

        match (known.len(), unknown.len()) {
            (1, 0) => return Resolution::Unique(merged(&known, column, Confidence::High)),
            (0, 1) => return Resolution::Unique(merged(&unknown, column, Confidence::High)),
            (0, 0) => {
                // Every relation here is known to lack it; try the enclosing block
                if scopes.len() > 1 {
                    continue;
                }
                if let [single] = scope.entries.as_slice() {
                    if let Some(table) = single.table_name() {
                        return Resolution::NotInHint {
                            flow: single.column_flow(column, Confidence::Medium),
                            table: table.to_string(),
                        };
                    }
                }
                return Resolution::Unresolved;
            }
            _ => {
                // Relations without a hint may own the column as well
                let possible: Vec<&ScopeEntry> = scope
                    .entries
                    .iter()
                    .filter(|e| e.has_column(column) != Some(false))
                    .collect();
                return Resolution::Ambiguous {
                    flow: merged(&possible, column, Confidence::Low),
                    candidates: possible.iter().map(|e| entry_label(e)).collect(),
                };
            }
        }
    }

    Resolution::Unresolved
}
