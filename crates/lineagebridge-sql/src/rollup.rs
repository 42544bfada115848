//! Outline consolidation lineage
//!
//! A parent member's value is the consolidation of its children, so each
//! child is an aggregation edge into its parent tagged with the operator.

use lineagebridge_core::{Confidence, FieldPath, LineageFact, Transformation};

/// Consolidation operator of an outline member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consolidation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Percent,
    /// `~`: excluded from the parent
    Ignore,
    /// `^`: never consolidated in any dimension
    Never,
}

impl Consolidation {
    /// Parse an operator symbol or its spelled-out REST form; missing means `+`
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = raw.map(str::trim).unwrap_or("");
        match raw.to_ascii_lowercase().as_str() {
            "" | "+" | "add" | "addition" => Self::Add,
            "-" | "sub" | "subtract" | "subtraction" => Self::Subtract,
            "*" | "mul" | "multiply" | "multiplication" => Self::Multiply,
            "/" | "div" | "divide" | "division" => Self::Divide,
            "%" | "percent" => Self::Percent,
            "~" | "ignore" => Self::Ignore,
            "^" | "never" => Self::Never,
            _ => Self::Add,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Percent => "%",
            Self::Ignore => "~",
            Self::Never => "^",
        }
    }

    /// Aggregation tag of the edge into the parent; `None` when the child does not feed it
    pub fn aggregation_tag(&self) -> Option<&'static str> {
        match self {
            Self::Add => Some("SUM"),
            Self::Subtract => Some("SUBTRACT"),
            Self::Multiply => Some("MULTIPLY"),
            Self::Divide => Some("DIVIDE"),
            Self::Percent => Some("PERCENT"),
            Self::Ignore | Self::Never => None,
        }
    }
}

/// Field name of a member: `Dimension.Member`, or `Dimension` for the root
pub fn member_field(dimension: &str, member: &str) -> String {
    if member.eq_ignore_ascii_case(dimension) {
        dimension.to_string()
    } else {
        format!("{}.{}", dimension, member)
    }
}

/// One outline member as the rollup sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineMember<'a> {
    pub name: &'a str,
    pub parent: Option<&'a str>,
    pub consolidation: Option<&'a str>,
}

/// Aggregation edges from every child into its parent
///
/// Members without a parent are dimension roots and feed nothing; a parent
/// equal to the dimension name is the dimension field itself.
pub fn rollup_facts<'a>(
    dataset: &str,
    dimension: &str,
    members: impl IntoIterator<Item = OutlineMember<'a>>,
) -> Vec<LineageFact> {
    let mut facts = Vec::new();
    for member in members {
        let Some(parent) = member.parent.filter(|p| !p.trim().is_empty()) else {
            continue;
        };
        let op = Consolidation::parse(member.consolidation);
        let Some(tag) = op.aggregation_tag() else {
            continue;
        };

        let fact = LineageFact::new(
            FieldPath::column(dataset, member_field(dimension, member.name)),
            FieldPath::column(dataset, member_field(dimension, parent)),
            Transformation::aggregation(tag, format!("{} ({})", member.name, op.symbol())),
            Confidence::High,
        );
        if !facts.contains(&fact) {
            facts.push(fact);
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineagebridge_core::TransformationKind;
    use pretty_assertions::assert_eq;

    fn member<'a>(name: &'a str, parent: &'a str, consolidation: &'a str) -> OutlineMember<'a> {
        OutlineMember {
            name,
            parent: Some(parent),
            consolidation: Some(consolidation),
        }
    }

    #[test]
    fn operators() {
        assert_eq!(Consolidation::parse(None), Consolidation::Add);
        assert_eq!(Consolidation::parse(Some(" - ")), Consolidation::Subtract);
        assert_eq!(Consolidation::parse(Some("Multiplication")), Consolidation::Multiply);
        assert_eq!(Consolidation::parse(Some("%")).aggregation_tag(), Some("PERCENT"));
        assert_eq!(Consolidation::parse(Some("~")).aggregation_tag(), None);
        assert_eq!(Consolidation::parse(Some("^")).aggregation_tag(), None);
    }

    #[test]
    fn one_edge_per_child() {
        let members = [
            OutlineMember {
                name: "Profit",
                parent: Some("Measures"),
                consolidation: None,
            },
            member("Sales", "Profit", "+"),
            member("COGS", "Profit", "-"),
            member("Headcount", "Profit", "~"),
            OutlineMember {
                name: "Measures",
                parent: None,
                consolidation: None,
            },
        ];
        let facts = rollup_facts("sample.basic", "Measures", members);

        let edges: Vec<(String, String, Option<&str>)> = facts
            .iter()
            .map(|f| {
                (
                    f.source.to_string(),
                    f.target.to_string(),
                    f.transformation.aggregation.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            edges,
            vec![
                ("sample.basic.Measures.Profit".to_string(), "sample.basic.Measures".to_string(), Some("SUM")),
                ("sample.basic.Measures.Sales".to_string(), "sample.basic.Measures.Profit".to_string(), Some("SUM")),
                ("sample.basic.Measures.COGS".to_string(), "sample.basic.Measures.Profit".to_string(), Some("SUBTRACT")),
            ]
        );
        assert!(facts
            .iter()
            .all(|f| f.transformation.kind == TransformationKind::Aggregation && f.confidence == Confidence::High));
    }
}
