//! Long-term memory subsystem: extraction validation, persistence glue and
//! the consolidation job.

pub mod consolidate;
pub mod cooldown;
pub mod curator;
pub mod errors;
pub mod extractor;

pub use consolidate::{ConsolidationCounters, Consolidator, map_legacy_category};
pub use cooldown::CooldownGate;
pub use curator::{CaptureReport, MemoryCurator, should_capture};
pub use errors::{MemoryError, MemoryResult};
pub use extractor::{
    ExtractionOutcome, ExtractionRequest, MemoryExtractor, RawCandidate,
    build_extraction_request, build_transcript, parse_extraction_payload, render_memory_context,
};
