//! The staged resume pipeline.
//!
//! Four stages run in order over one working document, each owning a set
//! of top-level keys. A stage that is already valid is skipped; otherwise
//! it calls the content service, escalates on invalid output, and merges
//! only what validates. Deterministic backfill and fallback then close the
//! remaining gaps before the full-schema gate.

pub mod artifacts;
pub mod backfill;
pub mod enrich;
pub mod processor;
pub mod stages;

pub use processor::{ProcessError, Processor};
