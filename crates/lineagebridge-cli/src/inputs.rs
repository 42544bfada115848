//! Loading configured sources from disk

use anyhow::{Context, Result};
use lineagebridge_core::{Config, SourceConfig, SourceSystem};
use lineagebridge_engine::SourceInput;
use lineagebridge_readers::{extensions, Artifact};
use lineagebridge_sql::SchemaHint;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        root.join(path)
    } else {
        path.to_path_buf()
    }
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

/// Files under `paths` holding artifacts of `system`
///
/// Directories are walked in file-name order and filtered by extension;
/// files named directly are always taken. Missing paths are skipped.
pub fn collect_files(paths: &[PathBuf], root: &Path, system: SourceSystem) -> Vec<PathBuf> {
    let allowed = extensions(system);
    let mut files = Vec::new();

    for path in paths {
        let path = resolve(root, path);
        if !path.exists() {
            tracing::warn!(path = %path.display(), %system, "configured path does not exist");
            continue;
        }
        for entry in WalkDir::new(&path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.depth() == 0 || has_extension(entry.path(), allowed) {
                let file = entry.into_path();
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
    }
    files
}

/// Read files as artifacts named by their path relative to `root`
pub fn load_artifacts(files: &[PathBuf], root: &Path) -> Result<Vec<Artifact>> {
    files
        .iter()
        .map(|file| {
            let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
            let name = file.strip_prefix(root).unwrap_or(file).display().to_string();
            Ok(Artifact::from_bytes(name, &bytes))
        })
        .collect()
}

/// Merge the source's schema hint files
pub fn load_hints(files: &[PathBuf], root: &Path) -> Result<SchemaHint> {
    let mut hints = SchemaHint::new();
    for file in files {
        let path = resolve(root, file);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read schema hints {}", path.display()))?;
        let loaded = SchemaHint::from_json(&json)
            .with_context(|| format!("invalid schema hints in {}", path.display()))?;
        hints.merge(loaded);
    }
    Ok(hints)
}

fn source_input(source: &SourceConfig, root: &Path) -> Result<SourceInput> {
    let files = collect_files(&source.paths, root, source.system);
    tracing::debug!(source = %source.instance(), files = files.len(), "artifact files");
    let artifacts = load_artifacts(&files, root)?;
    let hints = load_hints(&source.schema_hints, root)?;
    Ok(SourceInput::new(source.clone(), artifacts).with_hints(hints))
}

/// One input per configured source, in configuration order
pub fn source_inputs(config: &Config) -> Result<Vec<SourceInput>> {
    config
        .sources
        .iter()
        .map(|source| source_input(source, &config.project_root))
        .collect()
}
