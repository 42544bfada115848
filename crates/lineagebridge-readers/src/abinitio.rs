//! Dataflow graph artifacts: record formats (DML), transforms (XFR) and
//! graph input/output mappings (JSON)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

static COLON_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z_][\w\-]*)\s*:\s*(?P<type>.+)$").expect("valid regex")
});

static TRAILING_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<name>[A-Za-z_]\w*)\s*$").expect("valid regex"));

static BEGIN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bbegin\b").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlField {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFormat {
    pub name: String,
    pub fields: Vec<DmlField>,
}

/// One `;`-terminated transform statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrStatement {
    pub text: String,
    /// 1-indexed line the statement starts on
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GraphIo {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AbInitioError {
    #[error("record format declares no fields")]
    EmptyRecord,

    #[error("transform contains no rules")]
    EmptyTransform,

    #[error("invalid I/O mapping: {0}")]
    IoMapping(#[from] serde_json::Error),
}

/// Split on `;` outside quotes and parentheses, dropping comments
fn split_statements(text: &str, hash_comments: bool) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut at_line_start = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == q {
                quote = None;
            }
            if c == '\n' {
                line += 1;
            }
            continue;
        }

        match c {
            '\n' => {
                line += 1;
                at_line_start = true;
                current.push(c);
                continue;
            }
            '/' if chars.peek() == Some(&'/') => {
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
                continue;
            }
            '#' if hash_comments && at_line_start => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
                continue;
            }
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    out.push((stmt.to_string(), start_line));
                }
                current.clear();
                continue;
            }
            _ => {}
        }

        if !c.is_whitespace() {
            if current.trim().is_empty() {
                start_line = line;
            }
            at_line_start = false;
        }
        current.push(c);
    }

    let rest = current.trim();
    if !rest.is_empty() {
        out.push((rest.to_string(), start_line));
    }
    out
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> &'a str {
    let trimmed = text.trim_start();
    match trimmed.get(..keyword.len()) {
        Some(head)
            if head.eq_ignore_ascii_case(keyword)
                && trimmed[keyword.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_alphanumeric() && c != '_') =>
        {
            &trimmed[keyword.len()..]
        }
        _ => text,
    }
}

/// Drop a default value (`= ...`) outside quotes and parentheses
fn without_default(decl: &str) -> &str {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, c) in decl.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, '=') if depth == 0 => return &decl[..idx],
            _ => {}
        }
    }
    decl
}

fn parse_field(decl: &str) -> Option<DmlField> {
    let decl = decl.trim();
    if let Some(caps) = COLON_FIELD.captures(decl) {
        return Some(DmlField {
            name: caps["name"].to_string(),
            data_type: caps["type"].trim().to_string(),
        });
    }

    let decl = without_default(decl).trim();
    let caps = TRAILING_NAME.captures(decl)?;
    let name = caps.name("name")?;
    let data_type = decl[..name.start()].trim();
    if data_type.is_empty() {
        return None;
    }
    Some(DmlField {
        name: name.as_str().to_string(),
        data_type: data_type.to_string(),
    })
}

/// Parse a record format; `name` is usually the file stem
pub fn parse_dml(name: &str, text: &str) -> Result<RecordFormat, AbInitioError> {
    let statements = split_statements(text, true);
    let semicolon_syntax = statements.len() > 1;

    let mut fields = Vec::new();
    if semicolon_syntax {
        for (stmt, _) in statements {
            let stmt = strip_keyword(&stmt, "record");
            let stmt = stmt.trim();
            if stmt.is_empty() || stmt.eq_ignore_ascii_case("end") {
                continue;
            }
            fields.extend(parse_field(stmt));
        }
    } else {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = COLON_FIELD.captures(line) {
                fields.push(DmlField {
                    name: caps["name"].to_string(),
                    data_type: caps["type"].trim().to_string(),
                });
            }
        }
    }

    if fields.is_empty() {
        return Err(AbInitioError::EmptyRecord);
    }

    Ok(RecordFormat {
        name: name.to_string(),
        fields,
    })
}

/// Split a transform into rule statements, dropping the function header
pub fn parse_xfr(text: &str) -> Result<Vec<XfrStatement>, AbInitioError> {
    let mut rules = Vec::new();

    for (stmt, line) in split_statements(text, true) {
        let mut body = stmt.as_str();
        let mut line = line;
        if let Some(m) = BEGIN_KEYWORD.find_iter(body).last() {
            line += body[..m.end()].matches('\n').count();
            body = &body[m.end()..];
        }
        let leading = body.len() - body.trim_start().len();
        line += body[..leading].matches('\n').count();
        let body = body.trim();
        if body.is_empty() || body.eq_ignore_ascii_case("end") {
            continue;
        }
        rules.push(XfrStatement {
            text: body.to_string(),
            line,
        });
    }

    if rules.is_empty() {
        return Err(AbInitioError::EmptyTransform);
    }
    Ok(rules)
}

/// Parse `{graph: {inputs: [...], outputs: [...]}}`
pub fn parse_io_mapping(json: &str) -> Result<BTreeMap<String, GraphIo>, AbInitioError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn colon_style_record() {
        let dml = parse_dml("customers", "# customer feed\ncustomer_id: string(10)\nbalance: decimal(12,2)\n").unwrap();
        assert_eq!(dml.name, "customers");
        assert_eq!(
            dml.fields,
            vec![
                DmlField { name: "customer_id".into(), data_type: "string(10)".into() },
                DmlField { name: "balance".into(), data_type: "decimal(12,2)".into() },
            ]
        );
    }

    #[test]
    fn record_block_with_delimiters_and_defaults() {
        let dml = parse_dml(
            "orders",
            "record\n  string(\";\") order_id;\n  decimal(10,2) amount = 0;\n  date(\"YYYY-MM-DD\") order_date; // placed\nend;\n",
        )
        .unwrap();
        let names: Vec<&str> = dml.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["order_id", "amount", "order_date"]);
        assert_eq!(dml.fields[0].data_type, "string(\";\")");
        assert_eq!(dml.fields[1].data_type, "decimal(10,2)");
    }

    #[test]
    fn transform_statements_skip_header() {
        let rules = parse_xfr(
            "out :: reformat(in) =\nbegin\n  out.id :: in.id;\n  /* name */\n  out.full_name :: string_concat(in.first_name, \" \", in.last_name);\nend;\n",
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].text, "out.id :: in.id");
        assert_eq!(rules[0].line, 3);
        assert_eq!(
            rules[1].text,
            "out.full_name :: string_concat(in.first_name, \" \", in.last_name)"
        );
        assert_eq!(rules[1].line, 5);
    }

    #[test]
    fn io_mapping() {
        let io = parse_io_mapping(r#"{"load_orders": {"inputs": ["orders"], "outputs": ["dw.orders"]}, "noop": {}}"#).unwrap();
        assert_eq!(io["load_orders"].inputs, vec!["orders"]);
        assert!(io["noop"].outputs.is_empty());
        assert!(parse_io_mapping("[1, 2]").is_err());
    }

    #[test]
    fn empty_inputs_are_errors() {
        assert!(matches!(parse_dml("x", "# nothing"), Err(AbInitioError::EmptyRecord)));
        assert!(matches!(parse_xfr("begin end;"), Err(AbInitioError::EmptyTransform)));
    }
}
