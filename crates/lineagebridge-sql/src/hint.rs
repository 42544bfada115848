//! Schema hints: table name to ordered column list

use lineagebridge_core::identity::short_name;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema hint for '{0}' must be a list of columns or a column -> type object")]
    Shape(String),

    #[error("schema hint must be a JSON object keyed by table name")]
    NotAnObject,
}

/// Known column lists, keyed by lowercase table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHint {
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaHint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{table: [cols]}` or `{table: {col: type}}`
    pub fn from_json(json: &str) -> Result<Self, HintError> {
        let Value::Object(map) = serde_json::from_str::<Value>(json)? else {
            return Err(HintError::NotAnObject);
        };

        let mut hint = Self::new();
        for (table, columns) in map {
            let columns: Vec<String> = match columns {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        _ => Err(HintError::Shape(table.clone())),
                    })
                    .collect::<Result<_, _>>()?,
                Value::Object(cols) => cols.into_iter().map(|(name, _)| name).collect(),
                _ => return Err(HintError::Shape(table)),
            };
            hint.insert(&table, columns);
        }
        Ok(hint)
    }

    pub fn insert<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tables.insert(
            table.trim().to_lowercase(),
            columns.into_iter().map(|c| c.as_ref().trim().to_lowercase()).collect(),
        );
    }

    /// Add every table of `other`, replacing existing entries
    pub fn merge(&mut self, other: SchemaHint) {
        self.tables.extend(other.tables);
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Columns of `table`
    ///
    /// Falls back to a unique match on the unqualified name, so a hint keyed
    /// `orders` serves `dw.sales.orders` and the other way round.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        let key = table.to_lowercase();
        if let Some(cols) = self.tables.get(&key) {
            return Some(cols);
        }

        let short = short_name(&key);
        let mut matches = self
            .tables
            .iter()
            .filter(|(name, _)| short_name(name) == short);
        match (matches.next(), matches.next()) {
            (Some((_, cols)), None) => Some(cols),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn both_json_shapes() {
        let hint = SchemaHint::from_json(
            r#"{"Source": ["A", "b"], "dw.target": {"a": "int", "total": "decimal"}}"#,
        )
        .unwrap();
        assert_eq!(hint.len(), 2);
        assert_eq!(hint.columns("source").unwrap(), ["a", "b"]);
        assert_eq!(hint.columns("DW.TARGET").unwrap(), ["a", "total"]);
    }

    #[test]
    fn short_name_fallback_requires_a_unique_match() {
        let mut hint = SchemaHint::new();
        hint.insert("sales.orders", ["id"]);
        assert_eq!(hint.columns("orders").unwrap(), ["id"]);
        assert_eq!(hint.columns("db.sales.orders").unwrap(), ["id"]);

        hint.insert("archive.orders", ["id", "archived_at"]);
        assert_eq!(hint.columns("orders"), None);
        assert_eq!(hint.columns("archive.orders").unwrap().len(), 2);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(SchemaHint::from_json("[1]"), Err(HintError::NotAnObject)));
        assert!(matches!(SchemaHint::from_json(r#"{"t": 3}"#), Err(HintError::Shape(_))));
        assert!(matches!(SchemaHint::from_json(r#"{"t": [3]}"#), Err(HintError::Shape(_))));
    }
}
