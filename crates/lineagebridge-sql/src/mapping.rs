//! Field-mapping expressions
//!
//! Covers the transform rule languages embedded in dataflow tools:
//! `out.x :: f(in.a, in.b)`, `x = expr`, `let type v = expr` and bare port
//! expressions such as `IIF(ISNULL(A), 'n/a', A || B)`.
//!
//! Grammar (Pratt, binding power increases downward):
//!
//! ```text
//! expr    := unary (binop unary)*
//! binop   := or | || | and | && | == = != <> < <= > >= | + - | * / %
//! unary   := (- | ! | not) unary | postfix
//! postfix := primary ('[' expr ']')*
//! primary := NUMBER | STRING | path | path '(' args ')' | '(' expr ')'
//!          | if '(' expr ')' expr [else expr]
//! path    := IDENT ('.' IDENT)*
//! ```

use lineagebridge_core::{
    Confidence, Diagnostic, DiagnosticCode, FieldPath, LineageFact, Transformation, TransformationKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

const AGGREGATES: &[&str] = &[
    "SUM", "COUNT", "AVG", "MIN", "MAX", "FIRST", "LAST", "MEDIAN", "STDDEV", "VARIANCE",
    "ROLLUP_SUM", "ROLLUP_COUNT", "ACCUMULATION",
];

const CONDITIONALS: &[&str] = &["IIF", "DECODE", "CASE", "IF", "CHOOSE", "FIRST_DEFINED"];

/// Dotted input path in an unparsable expression
static PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\.([A-Za-z_][\w.]*)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unexpected {found} at offset {offset}")]
    Unexpected { found: String, offset: usize },

    #[error("expression ended early")]
    UnexpectedEnd,

    #[error("empty expression")]
    Empty,

    #[error("expression nests deeper than {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },
}

/// Nesting allowed before an expression is rejected
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(String),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<>", "<=", ">=", "<", ">", "=", "+", "-", "*", "/", "%", "!",
];

fn lex(text: &str) -> Result<Vec<(Tok, usize)>, MappingError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let rest = &text[offset..];

        if c.is_whitespace() {
            i += 1;
        } else if rest.starts_with("//") || rest.starts_with("--") {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
        } else if rest.starts_with("/*") {
            match rest.find("*/") {
                Some(end) => {
                    let stop = offset + end + 2;
                    while i < chars.len() && chars[i].0 < stop {
                        i += 1;
                    }
                }
                None => i = chars.len(),
            }
        } else if c == '"' || c == '\'' {
            let mut value = String::new();
            let mut j = i + 1;
            loop {
                match chars.get(j) {
                    None => return Err(MappingError::UnterminatedString { offset }),
                    Some(&(_, '\\')) if c == '"' => {
                        if let Some(&(_, escaped)) = chars.get(j + 1) {
                            value.push(escaped);
                        }
                        j += 2;
                    }
                    Some(&(_, ch)) if ch == c => {
                        if c == '\'' && chars.get(j + 1).map(|p| p.1) == Some('\'') {
                            value.push('\'');
                            j += 2;
                        } else {
                            break;
                        }
                    }
                    Some(&(_, ch)) => {
                        value.push(ch);
                        j += 1;
                    }
                }
            }
            tokens.push((Tok::Str(value), offset));
            i = j + 1;
        } else if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_ascii_alphanumeric() || chars[j].1 == '.') {
                j += 1;
            }
            let end = chars.get(j).map(|p| p.0).unwrap_or(text.len());
            tokens.push((Tok::Number(text[offset..end].to_string()), offset));
            i = j;
        } else if c.is_alphabetic() || c == '_' || c == '$' || c == ':' || c == '@' {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].1.is_alphanumeric() || matches!(chars[j].1, '_' | '$' | '#')) {
                j += 1;
            }
            let end = chars.get(j).map(|p| p.0).unwrap_or(text.len());
            tokens.push((Tok::Ident(text[offset..end].to_string()), offset));
            i = j;
        } else {
            let tok = match c {
                '(' => Some(Tok::LParen),
                ')' => Some(Tok::RParen),
                '[' => Some(Tok::LBracket),
                ']' => Some(Tok::RBracket),
                ',' => Some(Tok::Comma),
                '.' => Some(Tok::Dot),
                _ => None,
            };
            if let Some(tok) = tok {
                tokens.push((tok, offset));
                i += 1;
                continue;
            }
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err(MappingError::Unexpected {
                    found: format!("'{}'", c),
                    offset,
                });
            };
            tokens.push((Tok::Op(*op), offset));
            i += op.chars().count();
        }
    }
    Ok(tokens)
}

/// Parsed mapping expression
#[derive(Debug, Clone, PartialEq)]
pub enum MapExpr {
    /// Dotted path, `in.first_name` is `["in", "first_name"]`
    Ident(Vec<String>),
    Literal(String),
    Call { name: String, args: Vec<MapExpr> },
    Unary { op: String, operand: Box<MapExpr> },
    Binary { op: String, left: Box<MapExpr>, right: Box<MapExpr> },
    If {
        condition: Box<MapExpr>,
        then: Box<MapExpr>,
        otherwise: Option<Box<MapExpr>>,
    },
}

impl MapExpr {
    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a MapExpr)) {
        visit(self);
        match self {
            Self::Ident(_) | Self::Literal(_) => {}
            Self::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Self::Unary { operand, .. } => operand.walk(visit),
            Self::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::If {
                condition,
                then,
                otherwise,
            } => {
                condition.walk(visit);
                then.walk(visit);
                if let Some(otherwise) = otherwise {
                    otherwise.walk(visit);
                }
            }
        }
    }

    /// Every identifier path, first-seen order, function names excluded
    pub fn identifiers(&self) -> Vec<&[String]> {
        let mut found: Vec<&[String]> = Vec::new();
        self.walk(&mut |e| {
            if let MapExpr::Ident(path) = e {
                if !found.contains(&path.as_slice()) {
                    found.push(path);
                }
            }
        });
        found
    }

    /// Kind of transformation the expression applies, with the aggregate name
    pub fn kind(&self) -> (TransformationKind, Option<String>) {
        if let Self::Ident(_) = self {
            return (TransformationKind::Direct, None);
        }
        let mut aggregate = None;
        let mut conditional = false;
        self.walk(&mut |e| match e {
            MapExpr::Call { name, .. } => {
                let upper = name.to_uppercase();
                if aggregate.is_none() && AGGREGATES.contains(&upper.as_str()) {
                    aggregate = Some(upper);
                } else if CONDITIONALS.contains(&upper.as_str()) {
                    conditional = true;
                }
            }
            MapExpr::If { .. } => conditional = true,
            _ => {}
        });
        match (aggregate, conditional) {
            (Some(name), _) => (TransformationKind::Aggregation, Some(name)),
            (None, true) => (TransformationKind::Conditional, None),
            (None, false) => (TransformationKind::Derived, None),
        }
    }
}

struct ExprParser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    depth: usize,
}

fn binding_power(tok: &Tok) -> Option<(u8, &'static str)> {
    match tok {
        Tok::Op(op @ "||") => Some((1, *op)),
        Tok::Ident(word) if word.eq_ignore_ascii_case("or") => Some((1, "or")),
        Tok::Op(op @ "&&") => Some((2, *op)),
        Tok::Ident(word) if word.eq_ignore_ascii_case("and") => Some((2, "and")),
        Tok::Op(op @ ("==" | "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=")) => Some((3, *op)),
        Tok::Op(op @ ("+" | "-")) => Some((4, *op)),
        Tok::Op(op @ ("*" | "/" | "%")) => Some((5, *op)),
        _ => None,
    }
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Tok, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn unexpected(&self) -> MappingError {
        match self.tokens.get(self.pos) {
            Some((tok, offset)) => MappingError::Unexpected {
                found: format!("{:?}", tok),
                offset: *offset,
            },
            None => MappingError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, want: Tok) -> Result<(), MappingError> {
        if self.peek() == Some(&want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expr(&mut self, min_bp: u8) -> Result<MapExpr, MappingError> {
        let mut left = self.unary()?;
        while let Some((bp, op)) = self.peek().and_then(binding_power) {
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let right = self.expr(bp + 1)?;
            left = MapExpr::Binary {
                op: op.to_string(),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Every recursive path passes through here, so the nesting guard lives here
    fn unary(&mut self) -> Result<MapExpr, MappingError> {
        if self.depth >= MAX_NESTING {
            let offset = self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or_default();
            return Err(MappingError::TooDeep {
                limit: MAX_NESTING,
                offset,
            });
        }
        self.depth += 1;
        let result = self.unary_inner();
        self.depth -= 1;
        result
    }

    fn unary_inner(&mut self) -> Result<MapExpr, MappingError> {
        let op = match self.peek() {
            Some(Tok::Op(op @ ("-" | "!" | "+"))) => Some(op.to_string()),
            Some(Tok::Ident(word)) if word.eq_ignore_ascii_case("not") => Some("not".to_string()),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(MapExpr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<MapExpr, MappingError> {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            let index = self.expr(0)?;
            self.expect(Tok::RBracket)?;
            expr = MapExpr::Binary {
                op: "[]".to_string(),
                left: Box::new(expr),
                right: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<MapExpr, MappingError> {
        let Some((tok, offset)) = self.next() else {
            return Err(MappingError::UnexpectedEnd);
        };
        match tok {
            Tok::Number(n) => Ok(MapExpr::Literal(n)),
            Tok::Str(s) => Ok(MapExpr::Literal(s)),
            Tok::LParen => {
                let inner = self.expr(0)?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::Ident(word) if word.eq_ignore_ascii_case("if") && self.peek() == Some(&Tok::LParen) => {
                self.pos += 1;
                let condition = self.expr(0)?;
                self.expect(Tok::RParen)?;
                let then = self.expr(0)?;
                let otherwise = match self.peek() {
                    Some(Tok::Ident(w)) if w.eq_ignore_ascii_case("else") => {
                        self.pos += 1;
                        Some(Box::new(self.expr(0)?))
                    }
                    _ => None,
                };
                Ok(MapExpr::If {
                    condition: Box::new(condition),
                    then: Box::new(then),
                    otherwise,
                })
            }
            Tok::Ident(word) => {
                let mut path = vec![word];
                while self.peek() == Some(&Tok::Dot) {
                    self.pos += 1;
                    match self.next() {
                        Some((Tok::Ident(part), _)) => path.push(part),
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected());
                        }
                    }
                }
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            args.push(self.expr(0)?);
                            if self.peek() == Some(&Tok::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen)?;
                    return Ok(MapExpr::Call {
                        name: path.join("."),
                        args,
                    });
                }
                Ok(MapExpr::Ident(path))
            }
            other => Err(MappingError::Unexpected {
                found: format!("{:?}", other),
                offset,
            }),
        }
    }
}

/// Parse one expression; a trailing `;` is allowed
pub fn parse_expression(text: &str) -> Result<MapExpr, MappingError> {
    let trimmed = text.trim().trim_end_matches(';').trim_end();
    let tokens = lex(trimmed)?;
    if tokens.is_empty() {
        return Err(MappingError::Empty);
    }
    let mut parser = ExprParser { tokens, pos: 0, depth: 0 };
    let expr = parser.expr(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

/// Identifiers an expression reads (dotted paths joined with `.`)
///
/// Falls back to a pattern scan when the expression does not parse.
pub fn referenced_identifiers(text: &str) -> Vec<String> {
    match parse_expression(text) {
        Ok(expr) => expr.identifiers().iter().map(|p| p.join(".")).collect(),
        Err(_) => {
            let mut found: Vec<String> = Vec::new();
            for caps in PATH.captures_iter(text) {
                let name = caps[0].to_string();
                if !found.contains(&name) {
                    found.push(name);
                }
            }
            found
        }
    }
}

/// What a rule assigns to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// `out.x` or bare `x`
    Field { namespace: Option<String>, name: String },
    /// `let type v`
    Local(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub target: RuleTarget,
    pub expression: String,
}

fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'=' => {
                    let prev = i.checked_sub(1).map(|p| bytes[p]);
                    let next = bytes.get(i + 1).copied();
                    if !matches!(prev, Some(b'=' | b'<' | b'>' | b'!' | b':')) && next != Some(b'=') {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn field_target(raw: &str) -> Option<RuleTarget> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        return None;
    }
    Some(match raw.split_once('.') {
        Some((namespace, name)) => RuleTarget::Field {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        },
        None => RuleTarget::Field {
            namespace: None,
            name: raw.to_string(),
        },
    })
}

/// Split a transform rule into target and expression text
pub fn parse_rule(text: &str) -> Option<MappingRule> {
    let text = text.trim().trim_end_matches(';').trim_end();

    if let Some((lhs, rhs)) = text.split_once("::") {
        return Some(MappingRule {
            target: field_target(lhs)?,
            expression: rhs.trim().to_string(),
        });
    }

    let eq = find_assignment(text)?;
    let (lhs, rhs) = (text[..eq].trim(), text[eq + 1..].trim());
    if let Some(decl) = lhs.strip_prefix("let ").or_else(|| lhs.strip_prefix("let\t")) {
        let name = decl.split_whitespace().last()?;
        return Some(MappingRule {
            target: RuleTarget::Local(name.to_string()),
            expression: rhs.to_string(),
        });
    }
    Some(MappingRule {
        target: field_target(lhs)?,
        expression: rhs.to_string(),
    })
}

/// One input field feeding a mapped output
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MappedInput {
    /// Namespace prefix (`in`, `in0`); `None` for bare port names
    pub namespace: Option<String>,
    pub field: String,
}

/// Lineage of one output field
#[derive(Debug, Clone, PartialEq)]
pub struct MappingLineage {
    pub output: String,
    pub inputs: Vec<MappedInput>,
    pub transformation: Transformation,
    pub confidence: Confidence,
    pub diagnostics: Vec<Diagnostic>,
}

impl MappingLineage {
    /// One fact per input, all sharing the expression text
    pub fn to_facts(&self, source_dataset: &str, target_dataset: &str) -> Vec<LineageFact> {
        self.inputs
            .iter()
            .map(|input| {
                LineageFact::new(
                    FieldPath::column(source_dataset, input.field.clone()),
                    FieldPath::column(target_dataset, self.output.clone()),
                    self.transformation.clone(),
                    self.confidence,
                )
            })
            .collect()
    }
}

/// Lineage of a whole transform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformLineage {
    pub outputs: Vec<MappingLineage>,
    /// Rules that could not be split into target and expression
    pub diagnostics: Vec<Diagnostic>,
}

impl TransformLineage {
    /// Every diagnostic, output-level ones first
    pub fn all_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.outputs
            .iter()
            .flat_map(|o| o.diagnostics.iter())
            .chain(self.diagnostics.iter())
    }
}

/// Infers field lineage from mapping expressions
#[derive(Debug, Clone)]
pub struct MappingInferencer {
    input_namespace: Regex,
}

impl Default for MappingInferencer {
    fn default() -> Self {
        Self {
            input_namespace: Regex::new(r"^in\d*$").expect("valid regex"),
        }
    }
}

impl MappingInferencer {
    pub fn new(input_namespace: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            input_namespace: Regex::new(input_namespace)?,
        })
    }

    pub fn is_input_namespace(&self, namespace: &str) -> bool {
        self.input_namespace.is_match(namespace)
    }

    /// Lineage of `output` computed by `expression`
    ///
    /// With `bare_inputs` set, unqualified identifiers count as input ports
    /// (port expressions); otherwise only namespaced paths do.
    pub fn infer(&self, output: &str, expression: &str, bare_inputs: bool) -> MappingLineage {
        self.infer_with_locals(output, expression, bare_inputs, &BTreeMap::new())
    }

    fn infer_with_locals(
        &self,
        output: &str,
        expression: &str,
        bare_inputs: bool,
        locals: &BTreeMap<String, MappingLineage>,
    ) -> MappingLineage {
        let expr = match parse_expression(expression) {
            Ok(expr) => expr,
            Err(err) => return self.fallback(output, expression, &err),
        };

        let (mut kind, mut aggregation) = expr.kind();
        let mut confidence = Confidence::High;
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut inputs: Vec<MappedInput> = Vec::new();
        let mut push = |input: MappedInput| {
            if !inputs.contains(&input) {
                inputs.push(input);
            }
        };

        for path in expr.identifiers() {
            match path {
                [name] => {
                    if let Some(local) = locals.get(name) {
                        local.inputs.iter().cloned().for_each(&mut push);
                        confidence = confidence.min(local.confidence);
                        for diagnostic in &local.diagnostics {
                            if !diagnostics.contains(diagnostic) {
                                diagnostics.push(diagnostic.clone());
                            }
                        }
                        if local.transformation.kind == TransformationKind::Aggregation {
                            kind = TransformationKind::Aggregation;
                            aggregation = local.transformation.aggregation.clone();
                        } else if kind == TransformationKind::Direct {
                            kind = TransformationKind::Derived;
                        }
                    } else if bare_inputs {
                        push(MappedInput {
                            namespace: None,
                            field: name.clone(),
                        });
                    }
                }
                [namespace, rest @ ..] if self.is_input_namespace(namespace) => push(MappedInput {
                    namespace: Some(namespace.clone()),
                    field: rest.join("."),
                }),
                _ => {}
            }
        }

        MappingLineage {
            output: output.to_string(),
            inputs,
            transformation: Transformation {
                kind,
                description: expression.trim().trim_end_matches(';').trim_end().to_string(),
                aggregation,
            },
            confidence,
            diagnostics,
        }
    }

    fn fallback(&self, output: &str, expression: &str, err: &MappingError) -> MappingLineage {
        let mut inputs = Vec::new();
        for caps in PATH.captures_iter(expression) {
            if self.is_input_namespace(&caps[1]) {
                let input = MappedInput {
                    namespace: Some(caps[1].to_string()),
                    field: caps[2].to_string(),
                };
                if !inputs.contains(&input) {
                    inputs.push(input);
                }
            }
        }
        MappingLineage {
            output: output.to_string(),
            inputs,
            transformation: Transformation::new(TransformationKind::Unknown, expression.trim()),
            confidence: Confidence::Low,
            diagnostics: vec![Diagnostic::of(
                DiagnosticCode::MappingParseError,
                format!("cannot parse mapping expression for '{}': {}", output, err),
            )
            .with_subject(output.to_string())],
        }
    }

    /// Lineage of every output field a transform assigns
    ///
    /// Locals declared with `let` feed later rules and pass on their
    /// confidence and diagnostics. Rules that do not split into target and
    /// expression are reported, not guessed at.
    pub fn infer_transform<'a>(&self, rules: impl IntoIterator<Item = &'a str>) -> TransformLineage {
        let mut locals: BTreeMap<String, MappingLineage> = BTreeMap::new();
        let mut outputs = Vec::new();
        let mut diagnostics = Vec::new();

        for text in rules {
            let Some(rule) = parse_rule(text) else {
                let text = text.trim();
                if !text.is_empty() {
                    diagnostics.push(Diagnostic::of(
                        DiagnosticCode::MappingParseError,
                        format!("cannot split mapping rule into target and expression: '{}'", text),
                    ));
                }
                continue;
            };
            match rule.target {
                RuleTarget::Local(name) => {
                    let lineage = self.infer_with_locals(&name, &rule.expression, false, &locals);
                    locals.insert(name, lineage);
                }
                RuleTarget::Field { name, .. } => {
                    outputs.push(self.infer_with_locals(&name, &rule.expression, false, &locals));
                }
            }
        }
        TransformLineage { outputs, diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields(lineage: &MappingLineage) -> Vec<&str> {
        lineage.inputs.iter().map(|i| i.field.as_str()).collect()
    }

    #[test]
    fn parses_calls_and_precedence() {
        let expr = parse_expression("a + b * c").unwrap();
        let MapExpr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, "+");
        assert!(matches!(*right, MapExpr::Binary { ref op, .. } if op == "*"));

        let expr = parse_expression("string_concat(in.first, \" \", in.last);").unwrap();
        assert!(matches!(expr, MapExpr::Call { ref name, ref args } if name == "string_concat" && args.len() == 3));
    }

    #[test]
    fn if_else_and_indexing() {
        let expr = parse_expression("if (in.qty > 0) in.amount / in.qty else 0").unwrap();
        assert_eq!(expr.kind().0, TransformationKind::Conditional);
        let ids: Vec<String> = expr.identifiers().iter().map(|p| p.join(".")).collect();
        assert_eq!(ids, vec!["in.qty", "in.amount"]);

        let expr = parse_expression("in.items[0]").unwrap();
        assert_eq!(expr.identifiers().len(), 1);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_expression("  "), Err(MappingError::Empty));
        assert_eq!(parse_expression("f(a,"), Err(MappingError::UnexpectedEnd));
        assert!(matches!(parse_expression("'open"), Err(MappingError::UnterminatedString { offset: 0 })));
        assert!(matches!(parse_expression("a b"), Err(MappingError::Unexpected { offset: 2, .. })));
    }

    #[test]
    fn rule_forms() {
        let rule = parse_rule("out.total :: in.a + in.b;").unwrap();
        assert_eq!(
            rule.target,
            RuleTarget::Field {
                namespace: Some("out".into()),
                name: "total".into()
            }
        );
        assert_eq!(rule.expression, "in.a + in.b");

        let rule = parse_rule("let decimal(10) v_rate = in.rate / 100;").unwrap();
        assert_eq!(rule.target, RuleTarget::Local("v_rate".into()));

        let rule = parse_rule("flag = in.a == in.b").unwrap();
        assert_eq!(
            rule.target,
            RuleTarget::Field {
                namespace: None,
                name: "flag".into()
            }
        );
        assert_eq!(rule.expression, "in.a == in.b");

        assert_eq!(parse_rule("begin"), None);
    }

    #[test]
    fn kinds() {
        let inf = MappingInferencer::default();
        assert_eq!(inf.infer("x", "in.x", false).transformation.kind, TransformationKind::Direct);
        assert_eq!(inf.infer("x", "upper(in.x)", false).transformation.kind, TransformationKind::Derived);

        let agg = inf.infer("total", "SUM(AMOUNT)", true);
        assert_eq!(agg.transformation.kind, TransformationKind::Aggregation);
        assert_eq!(agg.transformation.aggregation.as_deref(), Some("SUM"));
        assert_eq!(fields(&agg), vec!["AMOUNT"]);

        let iif = inf.infer("tier", "IIF(ISNULL(AMT), 'none', AMT)", true);
        assert_eq!(iif.transformation.kind, TransformationKind::Conditional);
        assert_eq!(fields(&iif), vec!["AMT"]);
    }

    #[test]
    fn locals_carry_their_inputs() {
        let inf = MappingInferencer::default();
        let out = inf.infer_transform([
            "let decimal(10) v_net = in.gross - in.tax;",
            "out.net :: v_net;",
            "out.id :: in.id;",
        ]);
        assert_eq!(out.outputs.len(), 2);
        assert_eq!(out.outputs[0].output, "net");
        assert_eq!(fields(&out.outputs[0]), vec!["gross", "tax"]);
        assert_eq!(out.outputs[0].transformation.kind, TransformationKind::Derived);
        assert_eq!(out.outputs[0].confidence, Confidence::High);
        assert_eq!(out.outputs[1].transformation.kind, TransformationKind::Direct);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn unparsable_local_lowers_what_reads_it() {
        let inf = MappingInferencer::default();
        let out = inf.infer_transform(["let string v = in.a +* ;", "out.x :: v;", "out.y :: in.b;"]);
        assert_eq!(out.outputs.len(), 2);

        let x = &out.outputs[0];
        assert_eq!(x.output, "x");
        assert_eq!(fields(x), vec!["a"]);
        assert_eq!(x.confidence, Confidence::Low);
        assert_eq!(x.diagnostics.len(), 1);
        assert_eq!(x.diagnostics[0].code, DiagnosticCode::MappingParseError);

        assert_eq!(out.outputs[1].confidence, Confidence::High);
        assert_eq!(out.all_diagnostics().count(), 1);
    }

    #[test]
    fn unsplittable_rule_is_reported() {
        let inf = MappingInferencer::default();
        let out = inf.infer_transform(["out.id :: in.id;", "nonsense", "   "]);
        assert_eq!(out.outputs.len(), 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code, DiagnosticCode::MappingParseError);
        assert!(out.diagnostics[0].message.contains("nonsense"));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let deep = format!("{}in.a{}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(
            parse_expression(&deep),
            Err(MappingError::TooDeep { limit: MAX_NESTING, .. })
        ));
        assert!(matches!(
            parse_expression(&format!("{}1", "- ".repeat(5000))),
            Err(MappingError::TooDeep { .. })
        ));

        let lineage = MappingInferencer::default().infer("x", &deep, false);
        assert_eq!(lineage.confidence, Confidence::Low);
        assert_eq!(fields(&lineage), vec!["a"]);

        let shallow = format!("{}in.a{}", "(".repeat(50), ")".repeat(50));
        assert!(parse_expression(&shallow).is_ok());
    }

    #[test]
    fn unparsable_expression_falls_back_to_low() {
        let inf = MappingInferencer::default();
        let lineage = inf.infer("x", "in.a ?? in.b", false);
        assert_eq!(lineage.confidence, Confidence::Low);
        assert_eq!(fields(&lineage), vec!["a", "b"]);
        assert_eq!(lineage.diagnostics[0].code, DiagnosticCode::MappingParseError);
    }

    #[test]
    fn custom_namespace_and_identifiers() {
        let inf = MappingInferencer::new("^(in|lkp)$").unwrap();
        let lineage = inf.infer("x", "in.a + lkp.b + other.c", false);
        assert_eq!(fields(&lineage), vec!["a", "b"]);
        assert_eq!(referenced_identifiers("A || :LKP.rates(B)"), vec!["A", "B"]);
    }
}
