//! Database artifacts: stored procedure sources and execution telemetry
//!
//! Three shapes are accepted:
//! - PL/SQL text with `CREATE [OR REPLACE] PROCEDURE|FUNCTION|PACKAGE BODY` units
//! - `all_source` row dumps as JSON (`owner, name, type, line, text`)
//! - `v$sql` row dumps as JSON (`sql_id, parsing_schema_name, sql_text, ...`)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

static UNIT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?im)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:NON)?EDITIONABLE\s+)?(?P<kind>PROCEDURE|FUNCTION|PACKAGE\s+BODY|TRIGGER)\s+(?P<name>(?:"[^"]+"|[\w$#]+)(?:\s*\.\s*(?:"[^"]+"|[\w$#]+))?)"#,
    )
    .expect("valid regex")
});

static SQL_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(select|insert|update|delete|merge|execute\s+immediate)\b").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureSource {
    pub owner: Option<String>,
    pub name: String,
    /// PROCEDURE, FUNCTION, PACKAGE BODY, TRIGGER or SCRIPT
    pub kind: String,
    pub body: String,
    /// Line of `body` within the artifact (1-indexed)
    pub first_line: usize,
}

impl ProcedureSource {
    /// `owner.name`, or the bare name
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// One row of `v$sql`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStatement {
    pub sql_id: String,
    pub schema: Option<String>,
    pub sql_text: String,
    pub last_active_time: Option<String>,
    pub executions: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleArtifact {
    Procedures(Vec<ProcedureSource>),
    Statements(Vec<ObservedStatement>),
}

/// One `;`-terminated statement of a PL/SQL body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlsqlStatement {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON rows are neither all_source nor v$sql rows")]
    UnknownRows,

    #[error("no PL/SQL units or SQL statements found")]
    Empty,
}

fn field<'a>(row: &'a Value, name: &str) -> Option<&'a Value> {
    row.as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn string_field(row: &Value, name: &str) -> Option<String> {
    match field(row, name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(row: &Value, name: &str) -> Option<i64> {
    match field(row, name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn unquote_name(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn rows(json: &str) -> Result<Vec<Value>, OracleError> {
    match serde_json::from_str::<Value>(json)? {
        Value::Array(rows) => Ok(rows),
        obj @ Value::Object(_) => match field(&obj, "items").or_else(|| field(&obj, "rows")) {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            _ => Ok(vec![obj]),
        },
        _ => Err(OracleError::UnknownRows),
    }
}

fn statements_from_rows(rows: &[Value]) -> Vec<ObservedStatement> {
    rows.iter()
        .filter_map(|row| {
            let sql_text = string_field(row, "sql_fulltext").or_else(|| string_field(row, "sql_text"))?;
            Some(ObservedStatement {
                sql_id: string_field(row, "sql_id")?,
                schema: string_field(row, "parsing_schema_name"),
                sql_text,
                last_active_time: string_field(row, "last_active_time"),
                executions: int_field(row, "executions"),
            })
        })
        .collect()
}

fn procedures_from_rows(rows: &[Value]) -> Vec<ProcedureSource> {
    let mut grouped: BTreeMap<(String, String, String), Vec<(i64, String)>> = BTreeMap::new();
    let mut order: Vec<(String, String, String)> = Vec::new();

    for row in rows {
        let (Some(name), Some(text)) = (string_field(row, "name"), string_field(row, "text")) else {
            continue;
        };
        let key = (
            string_field(row, "owner").unwrap_or_default(),
            name,
            string_field(row, "type").unwrap_or_else(|| "PROCEDURE".to_string()),
        );
        let line = int_field(row, "line").unwrap_or(i64::MAX);
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped
            .entry(key)
            .or_default()
            .push((line, text.trim_end_matches(['\r', '\n']).to_string()));
    }

    order
        .into_iter()
        .filter_map(|key| {
            let mut lines = grouped.remove(&key)?;
            lines.sort_by_key(|(line, _)| *line);
            let first_line = lines.first().map(|(l, _)| *l).filter(|l| *l > 0 && *l != i64::MAX);
            let (owner, name, kind) = key;
            Some(ProcedureSource {
                owner: Some(owner).filter(|o| !o.is_empty()),
                name,
                kind,
                body: lines.into_iter().map(|(_, t)| t).collect::<Vec<_>>().join("\n"),
                first_line: first_line.map(|l| l as usize).unwrap_or(1),
            })
        })
        .collect()
}

fn procedures_from_text(name: &str, text: &str) -> Vec<ProcedureSource> {
    let headers: Vec<_> = UNIT_HEADER.captures_iter(text).collect();

    if headers.is_empty() {
        if !SQL_HINT.is_match(text) {
            return Vec::new();
        }
        return vec![ProcedureSource {
            owner: None,
            name: name.to_string(),
            kind: "SCRIPT".to_string(),
            body: text.to_string(),
            first_line: 1,
        }];
    }

    let mut units = Vec::new();
    for (idx, caps) in headers.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let end = headers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let mut body = &text[whole.start()..end];

        // A line holding only `/` terminates the unit
        if let Some(slash) = body.lines().position(|l| l.trim() == "/") {
            let cut: usize = body.lines().take(slash).map(|l| l.len() + 1).sum();
            body = &body[..cut.min(body.len())];
        }

        let raw_name = &caps["name"];
        let parts: Vec<String> = raw_name.split('.').map(unquote_name).collect();
        let (owner, unit_name) = match parts.as_slice() {
            [owner, name] => (Some(owner.clone()), name.clone()),
            _ => (None, unquote_name(raw_name)),
        };
        let kind = caps["kind"]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();

        let leading_ws = body.len() - body.trim_start().len();
        units.push(ProcedureSource {
            owner,
            name: unit_name,
            kind,
            body: body.trim().to_string(),
            first_line: text[..whole.start() + leading_ws].matches('\n').count() + 1,
        });
    }
    units
}

/// Parse one artifact; `name` is used for anonymous scripts
pub fn parse_oracle_artifact(name: &str, text: &str) -> Result<OracleArtifact, OracleError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let rows = rows(text)?;
        let looks_like = |key: &str| rows.iter().any(|r| field(r, key).is_some());

        if looks_like("sql_id") {
            let statements = statements_from_rows(&rows);
            if statements.is_empty() {
                return Err(OracleError::Empty);
            }
            return Ok(OracleArtifact::Statements(statements));
        }
        if looks_like("text") && looks_like("name") {
            let procedures = procedures_from_rows(&rows);
            if procedures.is_empty() {
                return Err(OracleError::Empty);
            }
            return Ok(OracleArtifact::Procedures(procedures));
        }
        return Err(OracleError::UnknownRows);
    }

    let procedures = procedures_from_text(name, text);
    if procedures.is_empty() {
        return Err(OracleError::Empty);
    }
    Ok(OracleArtifact::Procedures(procedures))
}

/// Split a PL/SQL body on `;` outside string literals and comments
///
/// Comments are dropped from the returned text. `first_line` is the line of
/// the body's first character within its artifact.
pub fn split_plsql_statements(body: &str, first_line: usize) -> Vec<PlsqlStatement> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut line = first_line;
    let mut start_line = first_line;
    let mut chars = body.chars().peekable();
    let mut in_string = false;

    let flush = |current: &mut String, start_line: usize, out: &mut Vec<PlsqlStatement>| {
        let text = current.trim();
        if !text.is_empty() {
            out.push(PlsqlStatement {
                text: text.to_string(),
                line: start_line,
            });
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }

        if in_string {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else {
                    in_string = false;
                }
            }
            continue;
        }

        match c {
            '-' if chars.peek() == Some(&'-') => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
                continue;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if n == '\n' {
                        line += 1;
                    }
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                current.push(' ');
                continue;
            }
            ';' => {
                flush(&mut current, start_line, &mut out);
                continue;
            }
            '\'' => in_string = true,
            _ => {}
        }

        if !c.is_whitespace() && current.trim().is_empty() {
            start_line = line;
        }
        current.push(c);
    }
    flush(&mut current, start_line, &mut out);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROCEDURE: &str = "\
CREATE OR REPLACE PROCEDURE etl.proc_update_orders AS
  v_count NUMBER;
BEGIN
  INSERT INTO etl.orders (id, total)
  SELECT id, amount FROM prod.customers;
  -- reconcile
  UPDATE etl.orders o SET total = (SELECT SUM(amount) FROM prod.payments p WHERE p.id = o.id);
  EXECUTE IMMEDIATE 'DELETE FROM etl.order_staging WHERE processed = ''Y''';
END;
/
CREATE FUNCTION count_rows RETURN NUMBER IS
BEGIN
  RETURN 1;
END;
";

    #[test]
    fn splits_units_and_statements() {
        let OracleArtifact::Procedures(units) = parse_oracle_artifact("procs.sql", PROCEDURE).unwrap() else {
            panic!("expected procedures");
        };
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].qualified_name(), "etl.proc_update_orders");
        assert_eq!(units[0].kind, "PROCEDURE");
        assert_eq!(units[0].first_line, 1);
        assert!(!units[0].body.contains("count_rows"));
        assert_eq!(units[1].owner, None);
        assert_eq!(units[1].kind, "FUNCTION");
        assert_eq!(units[1].first_line, 11);

        let statements = split_plsql_statements(&units[0].body, units[0].first_line);
        let lines: Vec<usize> = statements.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 3, 7, 8, 9]);
        assert!(statements[1].text.starts_with("BEGIN\n  INSERT INTO etl.orders"));
        assert_eq!(
            statements[3].text,
            "EXECUTE IMMEDIATE 'DELETE FROM etl.order_staging WHERE processed = ''Y'''"
        );
    }

    #[test]
    fn all_source_rows_are_grouped_in_line_order() {
        let json = r#"[
            {"OWNER": "ETL", "NAME": "P1", "TYPE": "PROCEDURE", "LINE": 2, "TEXT": "BEGIN NULL; END;\n"},
            {"OWNER": "ETL", "NAME": "P1", "TYPE": "PROCEDURE", "LINE": 1, "TEXT": "PROCEDURE p1 AS\n"}
        ]"#;
        let OracleArtifact::Procedures(units) = parse_oracle_artifact("src.json", json).unwrap() else {
            panic!("expected procedures");
        };
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].qualified_name(), "ETL.P1");
        assert_eq!(units[0].body, "PROCEDURE p1 AS\nBEGIN NULL; END;");
    }

    #[test]
    fn vsql_rows() {
        let json = r#"{"items": [
            {"sql_id": "abc123", "parsing_schema_name": "ETL", "sql_text": "INSERT INTO t SELECT * FROM s", "executions": "4"},
            {"sql_id": "noop"}
        ]}"#;
        let OracleArtifact::Statements(rows) = parse_oracle_artifact("vsql.json", json).unwrap() else {
            panic!("expected statements");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].schema.as_deref(), Some("ETL"));
        assert_eq!(rows[0].executions, Some(4));
    }

    #[test]
    fn anonymous_scripts_and_empty_input() {
        let OracleArtifact::Procedures(units) =
            parse_oracle_artifact("adhoc", "DELETE FROM t WHERE 1 = 0;").unwrap()
        else {
            panic!("expected procedures");
        };
        assert_eq!(units[0].kind, "SCRIPT");
        assert_eq!(units[0].name, "adhoc");

        assert!(matches!(parse_oracle_artifact("x", "-- nothing here"), Err(OracleError::Empty)));
        assert!(matches!(parse_oracle_artifact("x", "[{\"a\": 1}]"), Err(OracleError::UnknownRows)));
    }
}
