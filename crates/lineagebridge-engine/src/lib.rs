//! LineageBridge engine - graph construction
//!
//! This crate turns parsed artifacts into per-source graphs:
//! - One extractor per source system
//! - Dependency and lineage edges with deduplication
//! - Cycle detection
//! - Cross-system bridge edges
//! - Run orchestration, emission and reporting

pub mod bridge;
pub mod builder;
pub mod context;
pub mod cycles;
pub mod graph;
pub mod run;
pub mod sources;

pub use bridge::{apply_rules, BridgeError, BridgeRule};
pub use builder::{GraphBuilder, JobSpec};
pub use context::SourceContext;
pub use cycles::{find_cycles, Cycle};
pub use graph::SourceGraph;
pub use run::{extract_source, ExtractionRun, FatalError, RunOutcome, SourceInput};
pub use sources::{extractor_for, SourceExtractor};
