//! Evidence root indexing and path pattern resolution.

#[cfg(feature = "archive_evidence")]
pub mod archive;
pub mod pattern;
mod seeker;

pub use seeker::{EvidenceKind, EvidenceLocator};
