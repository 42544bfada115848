//! SQL parsing using datafusion-sqlparser-rs
//!
//! Parses SQL into AST and provides error handling with diagnostics.

use lineagebridge_core::{DialectConfig, Diagnostic, DiagnosticCode, Location};
use sqlparser::ast::Statement;
use sqlparser::dialect::{
    BigQueryDialect, Dialect, GenericDialect, MsSqlDialect, PostgreSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::{Parser, ParserError};

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
    config: DialectConfig,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self::from_dialect(&DialectConfig::Ansi)
    }

    /// Create a parser from a dialect config
    ///
    /// PL/SQL has no dedicated dialect upstream; the generic one accepts the
    /// DML subset lineage needs.
    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        let boxed: Box<dyn Dialect> = match dialect {
            DialectConfig::BigQuery => Box::new(BigQueryDialect {}),
            DialectConfig::Snowflake => Box::new(SnowflakeDialect {}),
            DialectConfig::Postgres => Box::new(PostgreSqlDialect {}),
            DialectConfig::MsSql => Box::new(MsSqlDialect {}),
            DialectConfig::Ansi | DialectConfig::Oracle => Box::new(GenericDialect {}),
        };
        Self {
            dialect: boxed,
            config: *dialect,
        }
    }

    pub fn dialect(&self) -> DialectConfig {
        self.config
    }

    /// Parse SQL string into AST
    ///
    /// `artifact` names the file or object the text came from and is only
    /// used for diagnostics.
    pub fn parse(&self, sql: &str, artifact: Option<&str>) -> Result<ParsedSql, ParseError> {
        let cleaned = strip_terminators(sql);

        match Parser::parse_sql(&*self.dialect, cleaned) {
            Ok(statements) => Ok(ParsedSql {
                sql: sql.to_string(),
                statements,
            }),
            Err(error) => Err(ParseError {
                sql: sql.to_string(),
                error,
                artifact: artifact.map(str::to_string),
            }),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop trailing `;` and SQL*Plus `/` terminators
fn strip_terminators(sql: &str) -> &str {
    let mut text = sql.trim();
    loop {
        let trimmed = text
            .strip_suffix('/')
            .or_else(|| text.strip_suffix(';'))
            .map(str::trim_end);
        match trimmed {
            Some(t) if t.len() < text.len() => text = t,
            _ => return text,
        }
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

/// SQL parsing error with diagnostic information
#[derive(Debug)]
pub struct ParseError {
    /// Original SQL string
    pub sql: String,

    /// Parser error from sqlparser
    pub error: ParserError,

    /// Artifact the SQL came from
    pub artifact: Option<String>,
}

impl ParseError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::of(
            DiagnosticCode::SqlParseError,
            format!("Failed to parse SQL: {}", self.error),
        );

        match &self.artifact {
            Some(artifact) => diag.with_location(Location::new(artifact.clone())),
            None => diag,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SQL parse error: {}", self.error)
    }
}

impl std::error::Error for ParseError {}
