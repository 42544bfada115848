//! Artifact readers
//!
//! This crate turns raw export files into structured, system-specific
//! records:
//! - Scheduler definitions (JIL)
//! - Workflow repository exports (XML)
//! - Stored procedure sources and statement telemetry
//! - Cube snapshots (JSON)
//! - Packages (DTSX)
//! - Record formats, transforms and graph I/O mappings
//!
//! Readers never resolve references across artifacts; that is the engine's job.

pub mod abinitio;
pub mod artifact;
pub mod essbase;
pub mod informatica;
pub mod jil;
pub mod oracle;
pub mod ssis;
pub mod xml;

pub use abinitio::{parse_dml, parse_io_mapping, parse_xfr, AbInitioError, DmlField, GraphIo, RecordFormat, XfrStatement};
pub use artifact::Artifact;
pub use essbase::{parse_snapshots, CubeSnapshot, EssbaseError};
pub use informatica::{parse_repository, InformaticaError, RepositoryExport};
pub use jil::{parse_jil, JilDocument, JilError, JilJob};
pub use oracle::{parse_oracle_artifact, split_plsql_statements, OracleArtifact, OracleError, PlsqlStatement};
pub use ssis::{parse_package, Package, SsisError};
pub use xml::{parse_document, XmlElement, XmlError};

use lineagebridge_core::SourceSystem;
use std::collections::BTreeMap;

/// File extensions (lowercase, without dot) read for each source system
pub fn extensions(system: SourceSystem) -> &'static [&'static str] {
    match system {
        SourceSystem::Autosys => &["jil", "txt"],
        SourceSystem::Informatica => &["xml"],
        SourceSystem::Oracle => &["sql", "pls", "plsql", "pkb", "prc", "fnc", "json"],
        SourceSystem::Essbase => &["json"],
        SourceSystem::Ssis => &["dtsx"],
        SourceSystem::AbInitio => &["dml", "xfr", "mp", "g", "json"],
    }
}

/// One artifact after system-specific parsing
#[derive(Debug, Clone)]
pub enum ParsedArtifact {
    Jil(JilDocument),
    Repository(RepositoryExport),
    Oracle(OracleArtifact),
    Cubes(Vec<CubeSnapshot>),
    Package(Package),
    RecordFormat(RecordFormat),
    Transform(Vec<XfrStatement>),
    IoMapping(BTreeMap<String, GraphIo>),
    /// Graph definition; only its name is used
    Graph(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("artifact is empty")]
    Blank,

    #[error("{system} does not read .{extension} files")]
    UnsupportedExtension { system: SourceSystem, extension: String },

    #[error(transparent)]
    Jil(#[from] JilError),

    #[error(transparent)]
    Informatica(#[from] InformaticaError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Essbase(#[from] EssbaseError),

    #[error(transparent)]
    Ssis(#[from] SsisError),

    #[error(transparent)]
    AbInitio(#[from] AbInitioError),
}

/// Parse an artifact with the reader for `system`
///
/// `default_folder` names the pseudo-folder used when a repository export
/// carries no FOLDER element.
pub fn read_artifact(
    system: SourceSystem,
    artifact: &Artifact,
    default_folder: &str,
) -> Result<ParsedArtifact, ReadError> {
    if artifact.is_blank() {
        return Err(ReadError::Blank);
    }

    let extension = artifact.extension().unwrap_or_default();
    tracing::debug!(artifact = %artifact.name, %system, %extension, "reading artifact");

    let parsed = match system {
        SourceSystem::Autosys => ParsedArtifact::Jil(parse_jil(&artifact.content)?),
        SourceSystem::Informatica => {
            ParsedArtifact::Repository(parse_repository(&artifact.content, default_folder)?)
        }
        SourceSystem::Oracle => {
            ParsedArtifact::Oracle(parse_oracle_artifact(artifact.stem(), &artifact.content)?)
        }
        SourceSystem::Essbase => ParsedArtifact::Cubes(parse_snapshots(&artifact.content)?),
        SourceSystem::Ssis => ParsedArtifact::Package(parse_package(&artifact.content)?),
        SourceSystem::AbInitio => match extension.as_str() {
            "dml" => ParsedArtifact::RecordFormat(parse_dml(artifact.stem(), &artifact.content)?),
            "xfr" => ParsedArtifact::Transform(parse_xfr(&artifact.content)?),
            "json" => ParsedArtifact::IoMapping(parse_io_mapping(&artifact.content)?),
            "mp" | "g" => ParsedArtifact::Graph(artifact.stem().to_string()),
            _ => return Err(ReadError::UnsupportedExtension { system, extension }),
        },
    };
    Ok(parsed)
}
