//! Pattern-based table extraction for dynamic or unparsable SQL
//!
//! Only table names are recovered; anything found here is reported as
//! table-level lineage at low confidence.

use once_cell::sync::Lazy;
use regex::Regex;

const TABLE: &str = r#"(?P<table>(?:[A-Za-z_#@]|\[|")[\w$#@\[\]".]*)"#;

static WRITE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bINSERT\s+(?:ALL\s+)?(?:OVERWRITE\s+)?(?:INTO\s+)?(?:TABLE\s+)?",
        r"\bUPDATE\s+",
        r"\bDELETE\s+(?:FROM\s+)?",
        r"\bMERGE\s+(?:INTO\s+)?",
        r"\bTRUNCATE\s+TABLE\s+",
        r"\bCREATE\s+(?:OR\s+REPLACE\s+)?(?:GLOBAL\s+)?(?:TEMP(?:ORARY)?\s+)?(?:TABLE|VIEW)\s+(?:IF\s+NOT\s+EXISTS\s+)?",
    ]
    .iter()
    .map(|prefix| Regex::new(&format!("(?is){}{}", prefix, TABLE)).expect("valid regex"))
    .collect()
});

static READ_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\b(?:FROM|JOIN|USING)\s+{}", TABLE)).expect("valid regex")
});

static DYNAMIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bEXECUTE\s+IMMEDIATE\b|\bsp_executesql\b|\bEXEC(?:UTE)?\s*\(\s*@|\bDBMS_SQL\.PARSE\b")
        .expect("valid regex")
});

static CALL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:CALL|EXEC(?:UTE)?)\s+(?P<name>[A-Za-z_][\w$#.\[\]]*)").expect("valid regex")
});

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"'((?:[^']|'')*)'").expect("valid regex"));

/// Words the table pattern can pick up that are never tables
const NOT_TABLES: &[&str] = &[
    "select", "where", "set", "values", "table", "as", "on", "into", "from", "join", "dual",
    "lateral", "unnest", "the", "with", "immediate", "only", "all",
];

/// Whether the statement builds and runs SQL at runtime
pub fn is_dynamic(sql: &str) -> bool {
    DYNAMIC_PATTERN.is_match(sql)
}

/// Procedure invoked by a `CALL`/`EXEC` statement
pub fn called_procedure(sql: &str) -> Option<String> {
    if is_dynamic(sql) {
        return None;
    }
    CALL_PATTERN
        .captures(sql)
        .map(|c| c["name"].to_string())
        .filter(|name| !name.eq_ignore_ascii_case("immediate"))
}

/// Static text of the string literals in `sql`, joined by spaces
pub fn literal_text(sql: &str) -> String {
    QUOTED
        .captures_iter(sql)
        .map(|c| c[1].replace("''", "'"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_table(raw: &str) -> Option<String> {
    let name = raw.trim_end_matches(['.', ',']).trim();
    if name.is_empty() || NOT_TABLES.iter().any(|w| name.eq_ignore_ascii_case(w)) {
        return None;
    }
    if name.starts_with('@') && !name.starts_with("@@") {
        // table variable or parameter
        return None;
    }
    Some(name.to_string())
}

fn push_unique(list: &mut Vec<String>, name: String) {
    if !list.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
        list.push(name);
    }
}

/// Tables read and written, as written in the text (unnormalized)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTables {
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

/// Find table names by keyword patterns
pub fn extract_tables(sql: &str) -> ExtractedTables {
    let mut found = ExtractedTables::default();
    let mut masked = sql.to_string();

    for pattern in WRITE_PATTERNS.iter() {
        for caps in pattern.captures_iter(sql) {
            let Some(table) = caps.name("table") else {
                continue;
            };
            if let Some(name) = clean_table(table.as_str()) {
                push_unique(&mut found.writes, name);
                // Keep `DELETE FROM t` from also counting as a read of `t`
                masked.replace_range(table.start()..table.end(), &" ".repeat(table.len()));
            }
        }
    }

    for caps in READ_PATTERN.captures_iter(&masked) {
        if let Some(name) = caps.name("table").and_then(|t| clean_table(t.as_str())) {
            push_unique(&mut found.reads, name);
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dml_keywords() {
        let t = extract_tables("INSERT INTO etl.orders SELECT * FROM prod.customers c JOIN prod.regions r ON c.r = r.id");
        assert_eq!(t.writes, vec!["etl.orders"]);
        assert_eq!(t.reads, vec!["prod.customers", "prod.regions"]);

        let t = extract_tables("DELETE FROM staging WHERE processed = 'Y'");
        assert_eq!(t.writes, vec!["staging"]);
        assert!(t.reads.is_empty());

        let t = extract_tables("MERGE INTO dw.dim d USING stg.dim s ON (d.id = s.id) WHEN MATCHED THEN UPDATE SET d.v = s.v");
        assert_eq!(t.writes, vec!["dw.dim"]);
        assert_eq!(t.reads, vec!["stg.dim"]);
    }

    #[test]
    fn bracketed_and_subquery_sources() {
        let t = extract_tables("TRUNCATE TABLE [stg].[orders]; INSERT [stg].[orders] SELECT id FROM (SELECT id FROM dbo.src) x");
        assert_eq!(t.writes, vec!["[stg].[orders]"]);
        assert_eq!(t.reads, vec!["dbo.src"]);
    }

    #[test]
    fn dynamic_detection_and_literals() {
        let sql = "EXECUTE IMMEDIATE 'DELETE FROM staging WHERE flag = ''Y'''";
        assert!(is_dynamic(sql));
        assert_eq!(literal_text(sql), "DELETE FROM staging WHERE flag = 'Y'");
        assert!(is_dynamic("EXEC sp_executesql @stmt"));
        assert!(is_dynamic("EXEC (@sql)"));
        assert!(!is_dynamic("EXEC dbo.load_orders"));
    }

    #[test]
    fn calls() {
        assert_eq!(called_procedure("EXEC dbo.load_orders @day = 1").as_deref(), Some("dbo.load_orders"));
        assert_eq!(called_procedure("call etl.refresh()").as_deref(), Some("etl.refresh"));
        assert_eq!(called_procedure("EXECUTE IMMEDIATE 'x'"), None);
        assert_eq!(called_procedure("SELECT 1"), None);
    }
}
