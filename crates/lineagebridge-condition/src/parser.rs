//! Recursive-descent parser for condition strings
//!
//! ```text
//! condition := and_expr (('|' | 'or') and_expr)*
//! and_expr  := primary (('&' | 'and') primary)*
//! primary   := '(' condition ')' | predicate
//! predicate := KEYWORD '(' NAME [',' LOOKBACK] ')' [CMP VALUE]
//! ```

use crate::ast::{Comparison, Condition, Predicate, Status};
use crate::lexer::{tokenize, LexError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("condition is empty")]
    Empty,

    #[error("expected {expected} at offset {offset}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("expected {expected} at end of condition")]
    UnexpectedEnd { expected: &'static str },

    #[error("parentheses nest deeper than {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },
}

/// Parenthesis nesting allowed in one condition
pub const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> ConditionError {
        match self.tokens.get(self.pos) {
            Some(token) => ConditionError::Unexpected {
                expected,
                found: token.kind.describe(),
                offset: token.offset,
            },
            None => ConditionError::UnexpectedEnd { expected },
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<(), ConditionError> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn at_word_operator(&self, word: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionError> {
        let mut items = vec![self.parse_and()?];
        while matches!(self.peek(), Some(TokenKind::Or)) || self.at_word_operator("or") {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Condition::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionError> {
        let mut items = vec![self.parse_primary()?];
        while matches!(self.peek(), Some(TokenKind::And)) || self.at_word_operator("and") {
            self.pos += 1;
            items.push(self.parse_primary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Condition::And(items)
        })
    }

    fn parse_primary(&mut self) -> Result<Condition, ConditionError> {
        match self.peek() {
            Some(TokenKind::LParen) => {
                if self.depth >= MAX_DEPTH {
                    return Err(ConditionError::TooDeep {
                        limit: MAX_DEPTH,
                        offset: self.tokens[self.pos].offset,
                    });
                }
                self.pos += 1;
                self.depth += 1;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            Some(TokenKind::Word(_)) => self.parse_predicate().map(Condition::Predicate),
            _ => Err(self.unexpected("a predicate or '('")),
        }
    }

    fn parse_value(&mut self, expected: &'static str) -> Result<String, ConditionError> {
        match self.peek() {
            Some(TokenKind::Word(_) | TokenKind::Str(_)) => match self.advance().map(|t| t.kind) {
                Some(TokenKind::Word(v) | TokenKind::Str(v)) => Ok(v),
                _ => Err(self.unexpected(expected)),
            },
            _ => Err(self.unexpected(expected)),
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, ConditionError> {
        let keyword = self.parse_value("a predicate keyword")?;
        self.expect(TokenKind::LParen, "'(' after predicate keyword")?;
        let job = self.parse_value("a job name")?;

        let lookback = if self.peek() == Some(&TokenKind::Comma) {
            self.pos += 1;
            Some(self.parse_value("a look-back value")?)
        } else {
            None
        };
        self.expect(TokenKind::RParen, "')'")?;

        let comparison = match self.peek() {
            Some(TokenKind::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                Some(Comparison {
                    op,
                    value: self.parse_value("a comparison value")?,
                })
            }
            _ => None,
        };

        Ok(Predicate {
            status: Status::from_keyword(&keyword),
            job,
            lookback,
            comparison,
        })
    }
}

/// Parse a condition string into an expression tree
pub fn parse_condition(text: &str) -> Result<Condition, ConditionError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ConditionError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let condition = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected("'&', '|' or end of condition"));
    }
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::CmpOp;
    use pretty_assertions::assert_eq;

    fn pred(status: Status, job: &str) -> Condition {
        Condition::Predicate(Predicate {
            status,
            job: job.to_string(),
            lookback: None,
            comparison: None,
        })
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let cond = parse_condition("s(A) | s(B) & f(C)").unwrap();
        assert_eq!(
            cond,
            Condition::Or(vec![
                pred(Status::Success, "A"),
                Condition::And(vec![pred(Status::Success, "B"), pred(Status::Failure, "C")]),
            ])
        );
    }

    #[test]
    fn nested_parentheses() {
        let cond = parse_condition("((s(A) or n(B))) AND (d(C) & (t(D) | success(E)))").unwrap();
        assert_eq!(
            cond,
            Condition::And(vec![
                Condition::Or(vec![pred(Status::Success, "A"), pred(Status::NotRunning, "B")]),
                Condition::And(vec![
                    pred(Status::Done, "C"),
                    Condition::Or(vec![pred(Status::Terminated, "D"), pred(Status::Success, "E")]),
                ]),
            ])
        );
    }

    #[test]
    fn lookback_and_comparison() {
        let cond = parse_condition("e(LOAD, 02.00) > 4").unwrap();
        let Condition::Predicate(p) = cond else {
            panic!("expected a predicate");
        };
        assert_eq!(p.status, Status::ExitCode);
        assert_eq!(p.lookback.as_deref(), Some("02.00"));
        assert_eq!(
            p.comparison,
            Some(Comparison {
                op: CmpOp::Gt,
                value: "4".to_string()
            })
        );
    }

    #[test]
    fn unknown_keywords_are_kept() {
        let cond = parse_condition("zz(A)").unwrap();
        assert_eq!(cond, pred(Status::Other("zz".to_string()), "A"));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_condition("   "), Err(ConditionError::Empty));
        assert_eq!(
            parse_condition("s(A) &"),
            Err(ConditionError::UnexpectedEnd {
                expected: "a predicate or '('"
            })
        );
        assert_eq!(
            parse_condition("s A"),
            Err(ConditionError::Unexpected {
                expected: "'(' after predicate keyword",
                found: "'A'".to_string(),
                offset: 2,
            })
        );
        assert!(matches!(parse_condition("(s(A)"), Err(ConditionError::UnexpectedEnd { .. })));
        assert!(matches!(parse_condition("s(A) s(B)"), Err(ConditionError::Unexpected { .. })));
        assert!(matches!(parse_condition("s(A) ; s(B)"), Err(ConditionError::Lex(_))));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let deep = format!("{}s(A){}", "(".repeat(5000), ")".repeat(5000));
        assert_eq!(
            parse_condition(&deep),
            Err(ConditionError::TooDeep {
                limit: MAX_DEPTH,
                offset: MAX_DEPTH,
            })
        );

        let fine = format!("{}s(A){}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse_condition(&fine), Ok(pred(Status::Success, "A")));
    }

    #[test]
    fn display_reparses_to_the_same_tree() {
        for text in [
            "s(A)&s(B)",
            "s(A) | (f(B) & v(flag) = on)",
            "((e(J, 01.00) >= 2)) or zz(K^PRD)",
        ] {
            let first = parse_condition(text).unwrap();
            let again = parse_condition(&first.to_string()).unwrap();
            assert_eq!(first, again, "{}", text);
        }
    }
}
