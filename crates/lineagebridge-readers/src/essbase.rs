//! OLAP cube snapshots (JSON captured from the REST API)
//!
//! A snapshot file holds one cube, a list of cubes, or an `{"items": [...]}`
//! page of cubes.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub name: String,
    #[serde(default)]
    pub parent_name: Option<String>,
    /// `+ - * / % ~ ^`
    #[serde(default)]
    pub consolidation: Option<String>,
    #[serde(default)]
    pub data_storage: Option<String>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub level_number: Option<i64>,
    #[serde(default)]
    pub generation_number: Option<i64>,
    #[serde(default)]
    pub udas: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl MemberSnapshot {
    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSnapshot {
    pub name: String,
    /// dense / sparse
    #[serde(default)]
    pub storage_type: Option<String>,
    /// accounts / time / attribute / ...
    #[serde(default)]
    pub dimension_type: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcScriptSnapshot {
    pub name: String,
    #[serde(default, alias = "script")]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(default, rename = "type")]
    pub source_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl DataSource {
    /// SQL text of a relational source
    pub fn sql_text(&self) -> Option<&str> {
        self.sql
            .as_deref()
            .or(self.query.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default)]
    pub field_number: Option<i64>,
    #[serde(default)]
    pub source_field: Option<String>,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub transformation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRuleSnapshot {
    pub name: String,
    /// `data` or `dimension`
    #[serde(default, alias = "type")]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

impl LoadRuleSnapshot {
    pub fn is_dimension_build(&self) -> bool {
        self.rule_type
            .as_deref()
            .is_some_and(|t| t.to_ascii_lowercase().starts_with("dim"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeSnapshot {
    #[serde(alias = "applicationName")]
    pub application: String,
    #[serde(alias = "cubeName", alias = "database")]
    pub cube: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<DimensionSnapshot>,
    #[serde(default)]
    pub calc_scripts: Vec<CalcScriptSnapshot>,
    #[serde(default)]
    pub load_rules: Vec<LoadRuleSnapshot>,
}

impl CubeSnapshot {
    /// Dataset name of the cube (`app.cube`)
    pub fn dataset_name(&self) -> String {
        format!("{}.{}", self.application, self.cube)
    }

    /// Dimension owning a member name
    pub fn dimension_of(&self, member: &str) -> Option<&DimensionSnapshot> {
        self.dimensions
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(member) || d.members.iter().any(|m| m.name.eq_ignore_ascii_case(member)))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Many(Vec<CubeSnapshot>),
    Page { items: Vec<CubeSnapshot> },
    One(Box<CubeSnapshot>),
}

#[derive(Debug, thiserror::Error)]
pub enum EssbaseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is not a cube, a list of cubes or an items page")]
    Shape,

    #[error("snapshot contains no cubes")]
    Empty,
}

/// Parse one snapshot file
pub fn parse_snapshots(json: &str) -> Result<Vec<CubeSnapshot>, EssbaseError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let file: SnapshotFile = serde_json::from_value(value).map_err(|_| EssbaseError::Shape)?;
    let cubes = match file {
        SnapshotFile::Many(cubes) | SnapshotFile::Page { items: cubes } => cubes,
        SnapshotFile::One(cube) => vec![*cube],
    };
    if cubes.is_empty() {
        return Err(EssbaseError::Empty);
    }
    Ok(cubes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE: &str = r#"{
        "application": "Sample",
        "cube": "Basic",
        "dimensions": [
            {"name": "Measures", "storageType": "dense", "dimensionType": "accounts", "members": [
                {"name": "Profit", "consolidation": "+"},
                {"name": "Sales", "parentName": "Profit", "consolidation": "+", "levelNumber": 0},
                {"name": "COGS", "parentName": "Profit", "consolidation": "-", "udas": ["Expense"]},
                {"name": "Margin %", "dataStorage": "dynamic_calc", "formula": " \"Profit\" / \"Sales\" "}
            ]}
        ],
        "calcScripts": [{"name": "CalcAll", "content": "CALC ALL;"}],
        "loadRules": [{
            "name": "LdSales",
            "type": "data",
            "dataSource": {"type": "sql", "sql": "SELECT product, amount FROM stg.sales"},
            "fieldMappings": [{"fieldNumber": 1, "sourceField": "product", "dimension": "Product"}]
        }]
    }"#;

    #[test]
    fn parses_single_cube() {
        let cubes = parse_snapshots(CUBE).unwrap();
        assert_eq!(cubes.len(), 1);
        let cube = &cubes[0];
        assert_eq!(cube.dataset_name(), "Sample.Basic");
        let measures = &cube.dimensions[0];
        assert_eq!(measures.storage_type.as_deref(), Some("dense"));
        assert_eq!(measures.members[2].consolidation.as_deref(), Some("-"));
        assert_eq!(measures.members[2].udas, vec!["Expense"]);
        assert_eq!(measures.members[3].formula(), Some("\"Profit\" / \"Sales\""));
        assert_eq!(cube.calc_scripts[0].content, "CALC ALL;");

        let rule = &cube.load_rules[0];
        assert!(!rule.is_dimension_build());
        assert_eq!(
            rule.data_source.as_ref().and_then(|d| d.sql_text()),
            Some("SELECT product, amount FROM stg.sales")
        );
        assert_eq!(rule.field_mappings[0].dimension.as_deref(), Some("Product"));
        assert_eq!(cube.dimension_of("cogs").map(|d| d.name.as_str()), Some("Measures"));
    }

    #[test]
    fn accepts_lists_and_pages() {
        let list = format!("[{}, {{\"application\": \"A\", \"cube\": \"B\"}}]", CUBE);
        assert_eq!(parse_snapshots(&list).unwrap().len(), 2);

        let page = format!("{{\"items\": [{}]}}", CUBE);
        assert_eq!(parse_snapshots(&page).unwrap()[0].cube, "Basic");
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(parse_snapshots("{not json"), Err(EssbaseError::Json(_))));
        assert!(matches!(parse_snapshots(r#"{"foo": 1}"#), Err(EssbaseError::Shape)));
        assert!(matches!(parse_snapshots("[]"), Err(EssbaseError::Empty)));
    }
}
