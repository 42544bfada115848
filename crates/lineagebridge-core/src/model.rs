//! Entity model shared by every extractor
//!
//! The finished graph is an arena: containers, jobs and datasets live in
//! vectors and refer to each other through integer ids. Edges carry ids,
//! never references, so cyclic dependency graphs need no shared ownership.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The tool an artifact set was exported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    /// Job scheduler definitions (JIL)
    Autosys,
    /// Workflow repository export (pmrep XML)
    Informatica,
    /// Stored procedure sources and execution telemetry
    Oracle,
    /// OLAP cube snapshots
    Essbase,
    /// Package XML (DTSX)
    Ssis,
    /// Dataflow graphs, record formats and transforms
    AbInitio,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 6] = [
        Self::Autosys,
        Self::Informatica,
        Self::Oracle,
        Self::Essbase,
        Self::Ssis,
        Self::AbInitio,
    ];

    /// Stable lowercase tag used in keys and URNs
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Autosys => "autosys",
            Self::Informatica => "informatica",
            Self::Oracle => "oracle",
            Self::Essbase => "essbase",
            Self::Ssis => "ssis",
            Self::AbInitio => "abinitio",
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "autosys" | "jil" => Ok(Self::Autosys),
            "informatica" | "infa" => Ok(Self::Informatica),
            "oracle" => Ok(Self::Oracle),
            "essbase" => Ok(Self::Essbase),
            "ssis" | "dtsx" => Ok(Self::Ssis),
            "abinitio" => Ok(Self::AbInitio),
            other => Err(format!("unknown source system '{}'", other)),
        }
    }
}

/// Closed set of unit-of-work kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SchedulerCommand,
    SchedulerBox,
    SchedulerFileWatcher,
    Workflow,
    Session,
    Mapping,
    WorkflowTask,
    Cube,
    CalcScript,
    DataLoadRule,
    DimensionLoadRule,
    SqlTask,
    DataFlowTask,
    ExecutePackageTask,
    ScriptTask,
    ControlFlowContainer,
    DataflowGraph,
    StoredProcedure,
    ObservedStatement,
    Unknown,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchedulerCommand => "scheduler_command",
            Self::SchedulerBox => "scheduler_box",
            Self::SchedulerFileWatcher => "scheduler_file_watcher",
            Self::Workflow => "workflow",
            Self::Session => "session",
            Self::Mapping => "mapping",
            Self::WorkflowTask => "workflow_task",
            Self::Cube => "cube",
            Self::CalcScript => "calc_script",
            Self::DataLoadRule => "data_load_rule",
            Self::DimensionLoadRule => "dimension_load_rule",
            Self::SqlTask => "sql_task",
            Self::DataFlowTask => "data_flow_task",
            Self::ExecutePackageTask => "execute_package_task",
            Self::ScriptTask => "script_task",
            Self::ControlFlowContainer => "control_flow_container",
            Self::DataflowGraph => "dataflow_graph",
            Self::StoredProcedure => "stored_procedure",
            Self::ObservedStatement => "observed_statement",
            Self::Unknown => "unknown",
        }
    }

    /// Map a JIL `job_type` value
    pub fn from_jil_type(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "c" | "cmd" | "command" => Self::SchedulerCommand,
            "b" | "box" => Self::SchedulerBox,
            "f" | "fw" | "file_watcher" | "filewatcher" => Self::SchedulerFileWatcher,
            _ => Self::Unknown,
        }
    }

    /// Map a DTSX `ExecutableType` (last dotted segment decides)
    pub fn from_ssis_type(raw: &str) -> Self {
        let lowered = raw
            .split(',')
            .next()
            .unwrap_or(raw)
            .trim()
            .to_ascii_lowercase();
        let last = lowered
            .rsplit(['.', ':'])
            .find(|seg| !seg.is_empty() && !seg.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or("");
        match last {
            "executesqltask" => Self::SqlTask,
            "pipeline" => Self::DataFlowTask,
            "executepackagetask" => Self::ExecutePackageTask,
            "scripttask" => Self::ScriptTask,
            "sequence" | "forloop" | "foreachloop" => Self::ControlFlowContainer,
            _ => Self::Unknown,
        }
    }

    /// Map a workflow task instance `TASKTYPE`
    pub fn from_informatica_task(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "session" => Self::Session,
            "worklet" | "workflow" => Self::Workflow,
            "" => Self::Unknown,
            _ => Self::WorkflowTask,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one job waits on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Success,
    Failure,
    #[serde(rename = "notrun")]
    NotRunning,
    #[serde(rename = "exitcode")]
    ExitCode,
    Unknown,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::NotRunning => "notrun",
            Self::ExitCode => "exitcode",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certainty of an inferred lineage edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

/// How a target value is produced from its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationKind {
    Direct,
    Derived,
    Conditional,
    Aggregation,
    Window,
    Copy,
    Unknown,
}

impl std::fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Derived => "derived",
            Self::Conditional => "conditional",
            Self::Aggregation => "aggregation",
            Self::Window => "window",
            Self::Copy => "copy",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Transformation description attached to a lineage edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Transformation {
    pub kind: TransformationKind,

    /// Source text of the expression (or a short label for table-level edges)
    pub description: String,

    /// Aggregation function tag (SUM, COUNT, ...) when kind is aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
}

impl Transformation {
    pub fn new(kind: TransformationKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            aggregation: None,
        }
    }

    pub fn direct(description: impl Into<String>) -> Self {
        Self::new(TransformationKind::Direct, description)
    }

    pub fn aggregation(function: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: TransformationKind::Aggregation,
            description: description.into(),
            aggregation: Some(function.into()),
        }
    }
}

/// A field of a dataset, with optional type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
        }
    }
}

/// A dataset, or one field of it, addressed by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldPath {
    pub dataset: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl FieldPath {
    pub fn table(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            field: None,
        }
    }

    pub fn column(dataset: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            field: Some(field.into()),
        }
    }

    pub fn is_table_level(&self) -> bool {
        self.field.is_none()
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}", self.dataset, field),
            None => f.write_str(&self.dataset),
        }
    }
}

/// Lineage produced by an inferencer, before it is attached to a graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageFact {
    pub source: FieldPath,
    pub target: FieldPath,
    pub transformation: Transformation,
    pub confidence: Confidence,
}

impl LineageFact {
    pub fn new(
        source: FieldPath,
        target: FieldPath,
        transformation: Transformation,
        confidence: Confidence,
    ) -> Self {
        Self {
            source,
            target,
            transformation,
            confidence,
        }
    }
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a container in its graph
    ContainerId
);
arena_id!(
    /// Index of a job in its graph
    JobId
);
arena_id!(
    /// Index of a dataset in its graph
    DatasetId
);

/// A named grouping of jobs (box, folder, application, package, project)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub key: String,
    pub name: String,
    /// Member jobs in first-seen order
    pub jobs: Vec<JobId>,
    pub properties: BTreeMap<String, String>,
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub key: String,
    pub name: String,
    pub container: ContainerId,
    pub kind: JobKind,
    pub reads: Vec<DatasetId>,
    pub writes: Vec<DatasetId>,
    pub properties: BTreeMap<String, String>,
}

/// A physical or logical data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub fields: Vec<Field>,
    /// False when the dataset is only referenced, never described, by the artifacts
    pub declared: bool,
    pub properties: BTreeMap<String, String>,
}

impl Dataset {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Target of a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRef {
    Resolved(JobId),
    /// Raw target name, kept because partial exports are expected
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The waiting job
    pub from: JobId,
    /// The job waited on
    pub to: JobRef,
    pub kind: DependencyKind,
}

impl DependencyEdge {
    pub fn resolved(&self) -> bool {
        matches!(self.to, JobRef::Resolved(_))
    }

    pub fn target_id(&self) -> Option<JobId> {
        match self.to {
            JobRef::Resolved(id) => Some(id),
            JobRef::Unresolved(_) => None,
        }
    }
}

/// A dataset, or one of its fields, inside a finished graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageEndpoint {
    pub dataset: DatasetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageEdge {
    pub source: LineageEndpoint,
    pub target: LineageEndpoint,
    pub transformation: Transformation,
    pub confidence: Confidence,
    /// Job whose artifact yielded the edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
}

/// Identifies one independently built graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId {
    pub system: SourceSystem,
    /// Instance label; defaults to the system tag
    pub instance: String,
}

impl GraphId {
    pub fn new(system: SourceSystem, instance: impl Into<String>) -> Self {
        Self {
            system,
            instance: instance.into(),
        }
    }

    pub fn of(system: SourceSystem) -> Self {
        Self::new(system, system.tag())
    }

    /// Whether a configured label (instance name or system tag) refers to this graph
    pub fn matches_label(&self, label: &str) -> bool {
        self.instance.eq_ignore_ascii_case(label) || self.system.tag().eq_ignore_ascii_case(label)
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance == self.system.tag() {
            f.write_str(self.system.tag())
        } else {
            write!(f, "{}:{}", self.system, self.instance)
        }
    }
}

/// Cross-graph reference between two jobs; never merges identities
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BridgeEdge {
    pub from_graph: GraphId,
    pub from_job: JobId,
    pub to_graph: GraphId,
    pub to_job: JobId,
    /// Candidate text the pattern extracted
    pub matched: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert_eq!(
            [Confidence::Medium, Confidence::High, Confidence::Low].iter().max(),
            Some(&Confidence::High)
        );
    }

    #[test]
    fn source_system_parses_aliases() {
        assert_eq!("AutoSys".parse::<SourceSystem>(), Ok(SourceSystem::Autosys));
        assert_eq!("ab_initio".parse::<SourceSystem>(), Ok(SourceSystem::AbInitio));
        assert_eq!("dtsx".parse::<SourceSystem>(), Ok(SourceSystem::Ssis));
        assert!("airflow".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn job_kind_from_tool_tags() {
        assert_eq!(JobKind::from_jil_type("CMD"), JobKind::SchedulerCommand);
        assert_eq!(JobKind::from_jil_type("b"), JobKind::SchedulerBox);
        assert_eq!(JobKind::from_jil_type("fw"), JobKind::SchedulerFileWatcher);
        assert_eq!(JobKind::from_jil_type("SAP"), JobKind::Unknown);

        assert_eq!(JobKind::from_ssis_type("Microsoft.ExecuteSQLTask"), JobKind::SqlTask);
        assert_eq!(JobKind::from_ssis_type("SSIS.Pipeline.3"), JobKind::DataFlowTask);
        assert_eq!(
            JobKind::from_ssis_type(
                "Microsoft.SqlServer.Dts.Tasks.ExecuteSQLTask.ExecuteSQLTask, Microsoft.SqlServer.SQLTask"
            ),
            JobKind::SqlTask
        );
        assert_eq!(JobKind::from_ssis_type("STOCK:SEQUENCE"), JobKind::ControlFlowContainer);
        assert_eq!(JobKind::from_ssis_type("Microsoft.SendMailTask"), JobKind::Unknown);

        assert_eq!(JobKind::from_informatica_task("Session"), JobKind::Session);
        assert_eq!(JobKind::from_informatica_task("Command"), JobKind::WorkflowTask);
    }

    #[test]
    fn dependency_kind_serializes_short_tags() {
        assert_eq!(serde_json::to_string(&DependencyKind::NotRunning).unwrap(), "\"notrun\"");
        assert_eq!(serde_json::to_string(&DependencyKind::ExitCode).unwrap(), "\"exitcode\"");
    }

    #[test]
    fn graph_id_matches_labels() {
        let id = GraphId::new(SourceSystem::Informatica, "infa_prod");
        assert!(id.matches_label("informatica"));
        assert!(id.matches_label("INFA_PROD"));
        assert!(!id.matches_label("ssis"));
        assert_eq!(id.to_string(), "informatica:infa_prod");
        assert_eq!(GraphId::of(SourceSystem::Ssis).to_string(), "ssis");
    }
}
