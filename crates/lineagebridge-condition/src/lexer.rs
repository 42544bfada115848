//! Tokenizer for scheduler condition strings

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword, job name, look-back or bare value
    Word(String),
    /// Quoted value (quotes removed)
    Str(String),
    LParen,
    RParen,
    Comma,
    /// `&` or `&&`
    And,
    /// `|` or `||`
    Or,
    Cmp(CmpOp),
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{}'", w),
            Self::Str(s) => format!("\"{}\"", s),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Comma => "','".to_string(),
            Self::And => "'&'".to_string(),
            Self::Or => "'|'".to_string(),
            Self::Cmp(op) => format!("'{}'", op.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset in the condition text
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated quoted value starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '&' | '|' | '<' | '>' | '=' | '!' | '"' | '\'' | ';' | '{' | '}' | '[' | ']' | '`')
}

/// Split condition text into tokens
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '&' => {
                chars.next_if(|&(_, n)| n == '&');
                TokenKind::And
            }
            '|' => {
                chars.next_if(|&(_, n)| n == '|');
                TokenKind::Or
            }
            '=' => {
                chars.next_if(|&(_, n)| n == '=');
                TokenKind::Cmp(CmpOp::Eq)
            }
            '!' => match chars.next_if(|&(_, n)| n == '=') {
                Some(_) => TokenKind::Cmp(CmpOp::Ne),
                None => return Err(LexError::UnexpectedChar { ch: c, offset }),
            },
            '<' => {
                if chars.next_if(|&(_, n)| n == '=').is_some() {
                    TokenKind::Cmp(CmpOp::Le)
                } else if chars.next_if(|&(_, n)| n == '>').is_some() {
                    TokenKind::Cmp(CmpOp::Ne)
                } else {
                    TokenKind::Cmp(CmpOp::Lt)
                }
            }
            '>' => match chars.next_if(|&(_, n)| n == '=') {
                Some(_) => TokenKind::Cmp(CmpOp::Ge),
                None => TokenKind::Cmp(CmpOp::Gt),
            },
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == c {
                        closed = true;
                        break;
                    }
                    value.push(n);
                }
                if !closed {
                    return Err(LexError::UnterminatedString { offset });
                }
                TokenKind::Str(value)
            }
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some((_, n)) = chars.next_if(|&(_, n)| is_word_char(n)) {
                    word.push(n);
                }
                TokenKind::Word(word)
            }
            ch => return Err(LexError::UnexpectedChar { ch, offset }),
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn predicates_and_operators() {
        assert_eq!(
            kinds("s(JOB_A) && f(box.job-1^PRD)|n(X)"),
            vec![
                TokenKind::Word("s".into()),
                TokenKind::LParen,
                TokenKind::Word("JOB_A".into()),
                TokenKind::RParen,
                TokenKind::And,
                TokenKind::Word("f".into()),
                TokenKind::LParen,
                TokenKind::Word("box.job-1^PRD".into()),
                TokenKind::RParen,
                TokenKind::Or,
                TokenKind::Word("n".into()),
                TokenKind::LParen,
                TokenKind::Word("X".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn comparisons_and_lookback() {
        assert_eq!(
            kinds("e(J, 02.30) >= 4 & v(flag) <> \"on\""),
            vec![
                TokenKind::Word("e".into()),
                TokenKind::LParen,
                TokenKind::Word("J".into()),
                TokenKind::Comma,
                TokenKind::Word("02.30".into()),
                TokenKind::RParen,
                TokenKind::Cmp(CmpOp::Ge),
                TokenKind::Word("4".into()),
                TokenKind::And,
                TokenKind::Word("v".into()),
                TokenKind::LParen,
                TokenKind::Word("flag".into()),
                TokenKind::RParen,
                TokenKind::Cmp(CmpOp::Ne),
                TokenKind::Str("on".into()),
            ]
        );
    }

    #[test]
    fn offsets_point_at_token_start() {
        let tokens = tokenize("  s(A)").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[2].offset, 4);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            tokenize("s(A) ; s(B)"),
            Err(LexError::UnexpectedChar { ch: ';', offset: 5 })
        );
        assert_eq!(tokenize("v(x) = 'open"), Err(LexError::UnterminatedString { offset: 7 }));
        assert!(matches!(tokenize("!s(A)"), Err(LexError::UnexpectedChar { ch: '!', .. })));
    }
}
