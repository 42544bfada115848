//! Per-source extraction settings and inferencers

use lineagebridge_core::identity::preview;
use lineagebridge_core::{content_hash, Config, GraphId, SourceConfig};
use lineagebridge_sql::{InferenceOptions, LineageInferencer, MappingInferencer, SchemaHint, SqlLineage};

/// Everything an extractor needs besides the artifacts themselves
pub struct SourceContext {
    pub graph: GraphId,
    pub source: SourceConfig,
    pub sql: LineageInferencer,
    pub mapping: MappingInferencer,
    /// Characters kept in long text properties
    pub max_text_chars: usize,
    pub preview_chars: usize,
}

impl SourceContext {
    /// Combine global settings, the source's section and loaded schema hints
    ///
    /// Inline `hints` from the source section override file hints for the
    /// same table.
    pub fn new(source: &SourceConfig, config: &Config, mut hints: SchemaHint) -> Result<Self, regex::Error> {
        for (table, columns) in &source.hints {
            hints.insert(table, columns);
        }

        let options = InferenceOptions {
            dialect: source.effective_dialect(),
            default_db: source.default_db.clone(),
            default_schema: source.default_schema.clone(),
            ignore_tables: source.ignore_tables.clone(),
            preview_chars: config.preview_chars,
        };
        let mapping = match &source.input_namespace {
            Some(pattern) => MappingInferencer::new(pattern)?,
            None => MappingInferencer::default(),
        };

        Ok(Self {
            graph: GraphId::new(source.system, source.instance()),
            source: source.clone(),
            sql: LineageInferencer::new(options, hints),
            mapping,
            max_text_chars: config.max_text_chars,
            preview_chars: config.preview_chars,
        })
    }

    /// Folder used when a repository export names none
    pub fn default_folder(&self) -> &str {
        self.source.folder.as_deref().unwrap_or("default")
    }

    /// Container of dataflow graphs
    pub fn project(&self) -> &str {
        self.source.project.as_deref().unwrap_or(self.source.instance())
    }

    /// Normalized dataset name of a table reference
    pub fn table(&self, raw: &str) -> String {
        self.sql.normalize_table(raw)
    }

    pub fn infer_sql(&self, sql: &str, target_hint: Option<&str>) -> SqlLineage {
        self.sql.infer(sql, target_hint)
    }

    /// Long text cut to `max_text_chars`
    pub fn text_property(&self, text: &str) -> String {
        preview(text.trim(), self.max_text_chars)
    }

    /// (`<prefix>`, `<prefix>_hash`) property pair for a source text
    pub fn text_properties(&self, prefix: &str, text: &str) -> [(String, String); 2] {
        [
            (prefix.to_string(), self.text_property(text)),
            (format!("{}_hash", prefix), content_hash(text.trim())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineagebridge_core::{DialectConfig, SourceSystem};
    use pretty_assertions::assert_eq;

    #[test]
    fn settings_come_from_the_source_section() {
        let mut source = SourceConfig::new(SourceSystem::Oracle);
        source.name = Some("ora_prod".to_string());
        source.default_db = Some("DWH".to_string());
        source.hints.insert("dwh.etl.orders".to_string(), vec!["id".to_string()]);
        let config = Config {
            max_text_chars: 8,
            ..Config::default()
        };

        let ctx = SourceContext::new(&source, &config, SchemaHint::new()).unwrap();
        assert_eq!(ctx.graph.to_string(), "oracle:ora_prod");
        assert_eq!(ctx.sql.options().dialect, DialectConfig::Oracle);
        assert_eq!(ctx.table("etl.orders"), "dwh.etl.orders");
        assert_eq!(ctx.sql.hints().columns("dwh.etl.orders"), Some(&["id".to_string()][..]));
        assert_eq!(ctx.text_property("  0123456789  "), "01234567");
        assert_eq!(ctx.project(), "ora_prod");
        assert_eq!(ctx.default_folder(), "default");
    }

    #[test]
    fn invalid_namespace_pattern_is_rejected() {
        let mut source = SourceConfig::new(SourceSystem::AbInitio);
        source.input_namespace = Some("(".to_string());
        assert!(SourceContext::new(&source, &Config::default(), SchemaHint::new()).is_err());
    }
}
