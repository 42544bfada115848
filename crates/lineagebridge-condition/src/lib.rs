//! Scheduler condition expressions
//!
//! Parses boolean combinations of job-state predicates (`s(JOB_A) & f(JOB_B)`)
//! into an explicit tree and derives the jobs a condition waits on.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{Comparison, Condition, ConditionDependency, Predicate, Status};
pub use lexer::{tokenize, CmpOp, LexError, Token, TokenKind};
pub use parser::{parse_condition, ConditionError, MAX_DEPTH};

/// Parse `text` and return the distinct (job, kind) pairs it waits on
pub fn dependencies_of(text: &str) -> Result<Vec<ConditionDependency>, ConditionError> {
    Ok(parse_condition(text)?.dependencies())
}
