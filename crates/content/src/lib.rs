//! Structured content extraction and multi-section generation.
//!
//! Consumes raw model output from `copymill-llm` and turns it into
//! validated structured content: safe JSON extraction with recovery
//! heuristics, lenient schema validation with field stripping, and a
//! bounded-parallelism section batch runner.

pub mod extract;
pub mod schema;
pub mod sections;

pub use extract::{parse_json_lenient, parse_json_safe, ExtractError};
pub use schema::{ContentSchema, SchemaCatalog, ValidationReport};
pub use sections::{BatchOutcome, ErrorCategory, SectionPipeline, SectionResult, SectionTask};
