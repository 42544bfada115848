//! Configuration schema (lineagebridge.toml)

use crate::diagnostic::{DiagnosticCode, Severity};
use crate::model::SourceSystem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default pattern bridging scheduler commands to workflow names
pub const DEFAULT_AUTOSYS_INFORMATICA_PATTERN: &str =
    r"(?im)\b(?:pmcmd\s+startworkflow|infa|informatica)\b.*?\s(?P<target>[A-Za-z0-9_.\-]+)\s*$";

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// Generic ANSI SQL
    Ansi,

    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// PostgreSQL SQL dialect
    Postgres,

    /// T-SQL (SSIS packages)
    MsSql,

    /// PL/SQL (parsed with the generic dialect)
    Oracle,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self::Ansi
    }
}

impl DialectConfig {
    /// Dialect used when a source does not configure one
    pub fn default_for(system: SourceSystem) -> Self {
        match system {
            SourceSystem::Ssis => Self::MsSql,
            SourceSystem::Oracle => Self::Oracle,
            _ => Self::Ansi,
        }
    }
}

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "lineagebridge=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One configured source system instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub system: SourceSystem,

    /// Instance label; defaults to the system tag
    #[serde(default)]
    pub name: Option<String>,

    /// Files or directories holding the artifacts
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub default_db: Option<String>,

    #[serde(default)]
    pub default_schema: Option<String>,

    #[serde(default)]
    pub dialect: Option<DialectConfig>,

    /// JSON schema hint files (`{table: [cols]}` or `{table: {col: type}}`)
    #[serde(default)]
    pub schema_hints: Vec<PathBuf>,

    /// Inline schema hints
    #[serde(default)]
    pub hints: HashMap<String, Vec<String>>,

    /// Table name patterns (SQL LIKE syntax) never reported as datasets
    #[serde(default)]
    pub ignore_tables: Vec<String>,

    /// Regex selecting the input record prefix in mapping expressions
    #[serde(default)]
    pub input_namespace: Option<String>,

    /// Container name for dataflow graph projects
    #[serde(default)]
    pub project: Option<String>,

    /// Folder used when a repository export has none
    #[serde(default)]
    pub folder: Option<String>,
}

impl SourceConfig {
    pub fn new(system: SourceSystem) -> Self {
        Self {
            system,
            name: None,
            paths: Vec::new(),
            default_db: None,
            default_schema: None,
            dialect: None,
            schema_hints: Vec::new(),
            hints: HashMap::new(),
            ignore_tables: Vec::new(),
            input_namespace: None,
            project: None,
            folder: None,
        }
    }

    /// Instance label of this source
    pub fn instance(&self) -> &str {
        self.name.as_deref().unwrap_or(self.system.tag())
    }

    /// Configured dialect, or the system's default
    pub fn effective_dialect(&self) -> DialectConfig {
        self.dialect.unwrap_or_else(|| DialectConfig::default_for(self.system))
    }
}

/// Which job attribute a bridge pattern is applied to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRuleConfig {
    /// Source graph (instance label or system tag)
    pub from: String,

    /// Target graph (instance label or system tag)
    pub to: String,

    pub pattern: String,

    /// `name`, `key`, or a job property such as `command`
    #[serde(default = "default_bridge_field")]
    pub field: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_bridge_field() -> String {
    "command".to_string()
}

fn default_true() -> bool {
    true
}

impl BridgeRuleConfig {
    /// Scheduler commands that start workflows
    pub fn autosys_to_informatica() -> Self {
        Self {
            from: SourceSystem::Autosys.tag().to_string(),
            to: SourceSystem::Informatica.tag().to_string(),
            pattern: DEFAULT_AUTOSYS_INFORMATICA_PATTERN.to_string(),
            field: default_bridge_field(),
            enabled: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Environment label used in URNs
    #[serde(default = "default_env")]
    pub env: String,

    /// Characters kept in source-text previews
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Characters kept in long text properties (commands, SQL)
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub bridges: Vec<BridgeRuleConfig>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_env() -> String {
    "PROD".to_string()
}

fn default_preview_chars() -> usize {
    500
}

fn default_max_text_chars() -> usize {
    20_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: default_env(),
            preview_chars: default_preview_chars(),
            max_text_chars: default_max_text_chars(),
            severity: SeverityThreshold::default(),
            logging: LoggingConfig::default(),
            sources: Vec::new(),
            bridges: Vec::new(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Bridge rules in effect, including the implicit scheduler-to-workflow rule
    pub fn effective_bridges(&self) -> Vec<BridgeRuleConfig> {
        if !self.bridges.is_empty() {
            return self.bridges.iter().filter(|b| b.enabled).cloned().collect();
        }

        let has = |system| self.sources.iter().any(|s| s.system == system);
        if has(SourceSystem::Autosys) && has(SourceSystem::Informatica) {
            vec![BridgeRuleConfig::autosys_to_informatica()]
        } else {
            Vec::new()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.instance().to_string()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source instance '{}'",
                    source.instance()
                )));
            }
            if let Some(ns) = &source.input_namespace {
                regex::Regex::new(ns).map_err(|e| {
                    ConfigError::Invalid(format!("input_namespace for '{}': {}", source.instance(), e))
                })?;
            }
        }
        for bridge in &self.bridges {
            regex::Regex::new(&bridge.pattern).map_err(|e| {
                ConfigError::Invalid(format!("bridge {} -> {}: {}", bridge.from, bridge.to, e))
            })?;
        }
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.env, "PROD");
        assert_eq!(config.preview_chars, 500);
        assert_eq!(config.max_text_chars, 20_000);
        assert!(config.effective_bridges().is_empty());
    }

    #[test]
    fn severity_override() {
        let mut threshold = SeverityThreshold::default();
        threshold.set_override(DiagnosticCode::AmbiguousColumn, Severity::Info);

        assert_eq!(
            threshold.get_severity(DiagnosticCode::AmbiguousColumn, Severity::Warn),
            Severity::Info
        );
        assert_eq!(
            threshold.get_severity(DiagnosticCode::DependencyCycle, Severity::Warn),
            Severity::Warn
        );
    }

    #[test]
    fn parses_sources_and_bridges() {
        let config = Config::from_toml(
            r#"
            env = "DEV"

            [[sources]]
            system = "autosys"
            paths = ["jil/"]

            [[sources]]
            system = "ssis"
            name = "ssis_finance"
            paths = ["packages/"]
            default_schema = "dbo"

            [sources.hints]
            "dbo.orders" = ["id", "amount"]

            [[bridges]]
            from = "autosys"
            to = "ssis_finance"
            pattern = 'dtexec\s+/f\s+(\S+)'
            "#,
        )
        .unwrap();

        assert_eq!(config.env, "DEV");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].instance(), "autosys");
        assert_eq!(config.sources[1].instance(), "ssis_finance");
        assert_eq!(config.sources[1].effective_dialect(), DialectConfig::MsSql);
        assert_eq!(config.sources[1].hints["dbo.orders"], vec!["id", "amount"]);
        assert_eq!(config.bridges[0].field, "command");
        assert!(config.bridges[0].enabled);
    }

    #[test]
    fn implicit_scheduler_bridge() {
        let mut config = Config::default();
        config.sources.push(SourceConfig::new(SourceSystem::Autosys));
        config.sources.push(SourceConfig::new(SourceSystem::Informatica));

        let bridges = config.effective_bridges();
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].from, "autosys");
        assert_eq!(bridges[0].to, "informatica");
    }

    #[test]
    fn rejects_duplicate_instances_and_bad_patterns() {
        let dup = Config::from_toml(
            r#"
            [[sources]]
            system = "oracle"
            [[sources]]
            system = "oracle"
            "#,
        );
        assert!(matches!(dup, Err(ConfigError::Invalid(_))));

        let bad = Config::from_toml(
            r#"
            [[bridges]]
            from = "autosys"
            to = "informatica"
            pattern = "("
            "#,
        );
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut config = Config::default();
        config.sources.push(SourceConfig::new(SourceSystem::Essbase));
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(parsed.sources[0].system, SourceSystem::Essbase);
    }
}
