//! Calc scripts and member formulas
//!
//! Scripts are split into `FIX ... ENDFIX` blocks and `;`-terminated
//! statements. Lineage comes from assignments (`"Margin" = "Sales" - "COGS";`)
//! and `DATACOPY a TO b;`.

use crate::rollup::member_field;
use lineagebridge_core::{Confidence, FieldPath, LineageFact, Transformation, TransformationKind};
use once_cell::sync::Lazy;
use regex::Regex;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]+)"|\[([^\]]+)\]|@([A-Za-z_]\w*)|(#[A-Za-z]+)|([A-Za-z_][\w.]*)"#).expect("valid regex")
});

static DATACOPY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^DATACOPY\s+(.+?)\s+TO\s+(.+)$"#).expect("valid regex"));

const KEYWORDS: &[&str] = &[
    "IF", "ELSE", "ELSEIF", "ENDIF", "AND", "OR", "NOT", "FIX", "ENDFIX", "LOOP", "ENDLOOP", "TO",
];

const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MAX", "MIN"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("FIX opened on line {line} is never closed")]
    UnbalancedFix { line: usize },

    #[error("ENDFIX on line {line} has no matching FIX")]
    UnexpectedEndFix { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalcStatement {
    Fix { members: Vec<String>, body: Vec<CalcStatement> },
    Agg(Vec<String>),
    CalcDim(Vec<String>),
    CalcAll,
    DataCopy { from: String, to: String },
    ClearData(String),
    ClearBlock(String),
    Set(String),
    Var(String),
    Assignment { target: String, expression: String },
    Other(String),
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_quote = false;
    while let Some(c) = chars.next() {
        if in_quote {
            in_quote = c != '"';
            out.push(c);
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_quote = true;
                out.push(c);
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    // keep line numbers stable
                    if inner == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ('/', Some('/')) => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Unquote a member reference
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')))
        .unwrap_or(raw)
        .trim()
        .to_string()
}

/// Split on commas outside quotes and parentheses
fn split_members(list: &str) -> Vec<String> {
    let mut members = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0usize;
    for c in list.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                members.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    members.push(current);
    members
        .iter()
        .map(|m| unquote(m))
        .filter(|m| !m.is_empty())
        .collect()
}

fn parenthesized(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text)
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.get(..word.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(word))
        && !text[word.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Byte offset of the first `=` that is an assignment, outside quotes
fn assignment_at(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_quote = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quote = !in_quote,
            b'=' if !in_quote => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if !matches!(prev, Some(b'=' | b'<' | b'>' | b'!')) && next != Some(b'=') {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn classify(text: &str) -> CalcStatement {
    let text = text.trim();
    if starts_with_word(text, "AGG") {
        return CalcStatement::Agg(split_members(parenthesized(&text[3..])));
    }
    if starts_with_word(text, "CALC") {
        let rest = text[4..].trim_start();
        if starts_with_word(rest, "ALL") {
            return CalcStatement::CalcAll;
        }
        if starts_with_word(rest, "DIM") {
            return CalcStatement::CalcDim(split_members(parenthesized(&rest[3..])));
        }
    }
    if let Some(caps) = DATACOPY.captures(text) {
        return CalcStatement::DataCopy {
            from: unquote(&caps[1]),
            to: unquote(&caps[2]),
        };
    }
    if starts_with_word(text, "CLEARDATA") {
        return CalcStatement::ClearData(text[9..].trim().to_string());
    }
    if starts_with_word(text, "CLEARBLOCK") {
        return CalcStatement::ClearBlock(text[10..].trim().to_string());
    }
    if starts_with_word(text, "SET") {
        return CalcStatement::Set(text[3..].trim().to_string());
    }
    if starts_with_word(text, "VAR") {
        return CalcStatement::Var(text[3..].trim().to_string());
    }
    if let Some(eq) = assignment_at(text) {
        // The target is the last member named left of `=`, which skips
        // member-block openers such as `"Sales" (`
        let lhs = &text[..eq];
        if let Some(target) = formula_references(lhs).members.pop() {
            return CalcStatement::Assignment {
                target,
                expression: text[eq + 1..].trim().to_string(),
            };
        }
    }
    CalcStatement::Other(text.to_string())
}

/// Next statement of `rest` and the text after it
///
/// A statement ends at `;` or right before a `FIX`/`ENDFIX` keyword, which
/// lets member blocks like `"Sales" ( ... )` close without a terminator.
fn split_statement(rest: &str) -> (&str, &str) {
    let mut in_quote = false;
    let mut prev_word_char = false;
    for (i, c) in rest.char_indices() {
        if c == '"' {
            in_quote = !in_quote;
        } else if !in_quote {
            if c == ';' {
                return (&rest[..i], &rest[i + 1..]);
            }
            let keyword = starts_with_word(&rest[i..], "ENDFIX") || starts_with_word(&rest[i..], "FIX");
            if i > 0 && !prev_word_char && keyword {
                return (&rest[..i], &rest[i..]);
            }
        }
        prev_word_char = c.is_alphanumeric() || c == '_';
    }
    (rest, "")
}

/// Split a calc script into statements, nesting `FIX` blocks
pub fn parse_calc_script(text: &str) -> Result<Vec<CalcStatement>, CalcError> {
    let text = strip_comments(text);
    // (members, body, line of FIX)
    let mut stack: Vec<(Vec<String>, Vec<CalcStatement>, usize)> = Vec::new();
    let mut top: Vec<CalcStatement> = Vec::new();

    let mut rest = text.as_str();
    let mut line = 1;

    fn push(stack: &mut [(Vec<String>, Vec<CalcStatement>, usize)], top: &mut Vec<CalcStatement>, s: CalcStatement) {
        match stack.last_mut() {
            Some((_, body, _)) => body.push(s),
            None => top.push(s),
        }
    }

    loop {
        let trimmed = rest.trim_start();
        line += rest[..rest.len() - trimmed.len()].matches('\n').count();
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        if starts_with_word(rest, "ENDFIX") {
            let Some((members, body, _)) = stack.pop() else {
                return Err(CalcError::UnexpectedEndFix { line });
            };
            push(&mut stack, &mut top, CalcStatement::Fix { members, body });
            rest = rest[6..].trim_start_matches([' ', '\t']);
            rest = rest.strip_prefix(';').unwrap_or(rest);
            continue;
        }

        if starts_with_word(rest, "FIX") && rest[3..].trim_start().starts_with('(') {
            let open = rest.len() - rest[3..].trim_start().len();
            let mut depth = 0usize;
            let mut in_quote = false;
            let mut close = None;
            for (i, c) in rest[open..].char_indices() {
                match c {
                    '"' => in_quote = !in_quote,
                    '(' if !in_quote => depth += 1,
                    ')' if !in_quote => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(open + i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let Some(close) = close else {
                return Err(CalcError::UnbalancedFix { line });
            };
            let header = &rest[open + 1..close];
            stack.push((split_members(header), Vec::new(), line));
            line += header.matches('\n').count();
            rest = &rest[close + 1..];
            continue;
        }

        let (statement, next) = split_statement(rest);
        line += statement.matches('\n').count();
        if !statement.trim().is_empty() {
            push(&mut stack, &mut top, classify(statement));
        }
        rest = next;
    }

    if let Some((_, _, line)) = stack.first() {
        return Err(CalcError::UnbalancedFix { line: *line });
    }
    Ok(top)
}

/// Members and aggregate function a formula references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaRefs {
    pub members: Vec<String>,
    pub aggregation: Option<String>,
}

/// Member references in a formula: `"quoted"`, `[bracketed]`, `Dim->Member`
/// parts and bare names; `@functions`, `#MISSING` and keywords are skipped
pub fn formula_references(formula: &str) -> FormulaRefs {
    let mut refs = FormulaRefs::default();
    for caps in REFERENCE.captures_iter(formula) {
        let member = if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            m.as_str().trim().to_string()
        } else if let Some(func) = caps.get(3) {
            let name = func.as_str().to_uppercase();
            if refs.aggregation.is_none() && AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                refs.aggregation = Some(name);
            }
            continue;
        } else if caps.get(4).is_some() {
            continue;
        } else {
            let word = &caps[5];
            if KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k)) {
                continue;
            }
            word.to_string()
        };
        if !member.is_empty() && !refs.members.contains(&member) {
            refs.members.push(member);
        }
    }
    refs
}

/// Lineage of `target` computed by `formula`
///
/// `dimension_of` maps a member to its dimension; members it does not know
/// are kept under their own name at medium confidence.
pub fn formula_facts(
    dataset: &str,
    target: &str,
    formula: &str,
    dimension_of: &dyn Fn(&str) -> Option<String>,
) -> Vec<LineageFact> {
    let refs = formula_references(formula);
    let kind = if refs.aggregation.is_some() {
        TransformationKind::Aggregation
    } else {
        TransformationKind::Derived
    };
    let field = |member: &str| match dimension_of(member) {
        Some(dimension) => (member_field(&dimension, member), true),
        None => (member.to_string(), false),
    };

    let (target_field, target_known) = field(target);
    refs.members
        .iter()
        .filter(|m| !m.eq_ignore_ascii_case(target))
        .map(|member| {
            let (source_field, known) = field(member);
            LineageFact::new(
                FieldPath::column(dataset, source_field),
                FieldPath::column(dataset, target_field.clone()),
                Transformation {
                    kind,
                    description: formula.trim().to_string(),
                    aggregation: refs.aggregation.clone(),
                },
                if known && target_known {
                    Confidence::High
                } else {
                    Confidence::Medium
                },
            )
        })
        .collect()
}

/// Lineage of every assignment and `DATACOPY` in a parsed script
pub fn calc_facts(
    dataset: &str,
    statements: &[CalcStatement],
    dimension_of: &dyn Fn(&str) -> Option<String>,
) -> Vec<LineageFact> {
    let mut facts = Vec::new();
    for statement in statements {
        match statement {
            CalcStatement::Fix { body, .. } => facts.extend(calc_facts(dataset, body, dimension_of)),
            CalcStatement::Assignment { target, expression } => {
                facts.extend(formula_facts(dataset, target, expression, dimension_of));
            }
            CalcStatement::DataCopy { from, to } => {
                let field = |m: &str| {
                    dimension_of(m)
                        .map(|d| member_field(&d, m))
                        .unwrap_or_else(|| m.to_string())
                };
                facts.push(LineageFact::new(
                    FieldPath::column(dataset, field(from)),
                    FieldPath::column(dataset, field(to)),
                    Transformation::new(TransformationKind::Copy, format!("DATACOPY {} TO {}", from, to)),
                    Confidence::High,
                ));
            }
            _ => {}
        }
    }
    let mut unique = Vec::with_capacity(facts.len());
    for fact in facts {
        if !unique.contains(&fact) {
            unique.push(fact);
        }
    }
    unique
}
