//! # rust-artifact-report
//!
//! Turns an extracted mobile-device file system into forensic reports.
//!
//! ## Overview
//!
//! Each artifact is a small extraction routine with a descriptor naming the
//! evidence files it reads. A run resolves those files, invokes the routines
//! concurrently, and fans every result out to the report sinks: paginated
//! HTML, TSV, a merged timeline, KML placemarks and a SQLite case database.
//! A `manifest.json` records the outcome of every artifact.
//!
//! ## Usage
//!
//! ### Running Every Artifact
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_artifact_report::artifacts::builtin_registry;
//! use rust_artifact_report::config::RunConfig;
//! use rust_artifact_report::orchestrator::{Orchestrator, RunRequest, Selection};
//!
//! # fn main() -> anyhow::Result<()> {
//! let registry = Arc::new(builtin_registry()?);
//! let mut orchestrator = Orchestrator::new(registry, RunConfig::default());
//!
//! let request = RunRequest::new("/cases/001/extraction", "/cases/001/report", Selection::All);
//! let manifest = orchestrator.run_blocking(request)?;
//!
//! println!("{} artifacts succeeded", manifest.counts.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing an Artifact
//!
//! ```no_run
//! use rust_artifact_report::dispatch::{ArtifactPlugin, ExtractionContext};
//! use rust_artifact_report::models::ArtifactResult;
//!
//! struct FileSizes;
//!
//! impl ArtifactPlugin for FileSizes {
//!     fn extract(&self, ctx: &ExtractionContext<'_>) -> anyhow::Result<ArtifactResult> {
//!         let mut result = ArtifactResult::new(&["Path", "Size"]);
//!         for file in ctx.files {
//!             let size = std::fs::metadata(file)?.len() as i64;
//!             result.push_row(vec![file.display().to_string().into(), size.into()]);
//!         }
//!         Ok(result)
//!     }
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`models`]: Cell values, result tables and the run context
//! - [`registry`]: Artifact descriptors and the catalog
//! - [`locator`]: Evidence indexing and path-pattern resolution
//! - [`dispatch`]: Single-artifact execution with failure containment
//! - [`sinks`]: HTML, TSV, timeline, KML and case database writers
//! - [`orchestrator`]: The run state machine
//! - [`artifacts`]: Built-in extraction routines
//! - [`config`]: YAML run configuration
//! - [`utils`]: Hashing and the run manifest
//!
//! ## Feature Flags
//!
//! - `archive_evidence` (default): accept a ZIP container as evidence root

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Error types shared across components
pub mod errors;

/// Application constants and configuration values
pub mod constants;

/// Run configuration
pub mod config;

/// Evidence indexing and path resolution
pub mod locator;

/// Artifact catalog
pub mod registry;

/// Single-artifact execution
pub mod dispatch;

/// Report writers
pub mod sinks;

/// Run state machine
pub mod orchestrator;

/// Built-in artifacts
pub mod artifacts;

/// Utility functions for hashing and manifests
pub mod utils;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
