//! Per-system extractors
//!
//! Each extractor turns parsed artifacts of one tool into builder calls.
//! Artifacts arrive one at a time; work that needs the whole artifact set
//! (cross-file bindings, inherited I/O) happens in `finish`.

mod abinitio;
mod autosys;
mod essbase;
mod informatica;
mod oracle;
mod ssis;

pub use abinitio::AbInitioExtractor;
pub use autosys::AutosysExtractor;
pub use essbase::EssbaseExtractor;
pub use informatica::InformaticaExtractor;
pub use oracle::OracleExtractor;
pub use ssis::SsisExtractor;

use crate::builder::GraphBuilder;
use crate::context::SourceContext;
use lineagebridge_core::SourceSystem;
use lineagebridge_readers::{Artifact, ParsedArtifact};

pub trait SourceExtractor {
    /// Add one parsed artifact to the graph
    fn extract(&mut self, artifact: &Artifact, parsed: ParsedArtifact, builder: &mut GraphBuilder);

    /// Work that needs every artifact; runs once before the graph is closed
    fn finish(&mut self, _builder: &mut GraphBuilder) {}
}

/// Extractor for the context's source system
pub fn extractor_for(ctx: &SourceContext) -> Box<dyn SourceExtractor + '_> {
    match ctx.source.system {
        SourceSystem::Autosys => Box::new(AutosysExtractor::new(ctx)),
        SourceSystem::Informatica => Box::new(InformaticaExtractor::new(ctx)),
        SourceSystem::Oracle => Box::new(OracleExtractor::new(ctx)),
        SourceSystem::Essbase => Box::new(EssbaseExtractor::new(ctx)),
        SourceSystem::Ssis => Box::new(SsisExtractor::new(ctx)),
        SourceSystem::AbInitio => Box::new(AbInitioExtractor::new(ctx)),
    }
}
