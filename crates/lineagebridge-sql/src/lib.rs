//! LineageBridge SQL
//!
//! Lineage inference for embedded SQL, field-mapping expressions, outline
//! consolidations and calc scripts.

pub mod calc;
pub mod fallback;
pub mod hint;
pub mod lineage;
pub mod mapping;
pub mod parser;
pub mod rollup;
pub mod scope;

pub use calc::{calc_facts, formula_facts, formula_references, parse_calc_script, CalcError, CalcStatement};
pub use hint::{HintError, SchemaHint};
pub use lineage::{InferenceOptions, LineageInferencer, SqlLineage, StatementKind};
pub use mapping::{
    parse_expression, parse_rule, referenced_identifiers, MapExpr, MappedInput, MappingError,
    MappingInferencer, MappingLineage, MappingRule, RuleTarget, TransformLineage, MAX_NESTING,
};
pub use parser::{ParseError, ParsedSql, SqlParser};
pub use rollup::{member_field, rollup_facts, Consolidation, OutlineMember};
