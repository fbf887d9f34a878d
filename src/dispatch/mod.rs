//! Runs one artifact end to end: resolve, invoke, validate.
//!
//! Every failure an extraction routine can cause (an `Err`, a panic, a result
//! that breaks the tabular contract) is turned into an [`ArtifactError`] here
//! and never travels further up as a panic or fault.

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{ArtifactError, ErrorKind, Stage};
use crate::locator::EvidenceLocator;
use crate::models::{ArtifactResult, RunContext};
use crate::registry::RegisteredArtifact;

/// What an extraction routine gets to see for one invocation
pub struct ExtractionContext<'a> {
    pub key: &'a str,
    /// Resolved source files, sorted; empty only for file-less artifacts
    pub files: &'a [PathBuf],
    /// `<output>/<key>/`, created before the routine runs
    pub report_dir: &'a Path,
    pub locator: &'a EvidenceLocator,
    pub run: &'a RunContext,
}

impl ExtractionContext<'_> {
    pub fn first_file(&self) -> Option<&Path> {
        self.files.first().map(PathBuf::as_path)
    }
}

/// An extraction routine. Implementations decode their sources into a table.
pub trait ArtifactPlugin: Send + Sync {
    fn extract(&self, ctx: &ExtractionContext<'_>) -> anyhow::Result<ArtifactResult>;
}

/// Terminal status of an artifact in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Succeeded,
    Skipped,
    Failed,
    Cancelled,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactStatus::Succeeded => write!(f, "succeeded"),
            ArtifactStatus::Skipped => write!(f, "skipped"),
            ArtifactStatus::Failed => write!(f, "failed"),
            ArtifactStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Succeeded {
        result: ArtifactResult,
        duration: Duration,
    },
    /// No evidence matched the artifact's patterns
    Skipped { duration: Duration },
    Failed {
        error: ArtifactError,
        duration: Duration,
    },
}

impl DispatchOutcome {
    pub fn status(&self) -> ArtifactStatus {
        match self {
            DispatchOutcome::Succeeded { .. } => ArtifactStatus::Succeeded,
            DispatchOutcome::Skipped { .. } => ArtifactStatus::Skipped,
            DispatchOutcome::Failed { .. } => ArtifactStatus::Failed,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            DispatchOutcome::Succeeded { duration, .. }
            | DispatchOutcome::Skipped { duration }
            | DispatchOutcome::Failed { duration, .. } => *duration,
        }
    }
}

/// Shared, cheaply clonable handle used by every worker of a run
#[derive(Clone)]
pub struct Dispatcher {
    locator: Arc<EvidenceLocator>,
    run: Arc<RunContext>,
}

impl Dispatcher {
    pub fn new(locator: Arc<EvidenceLocator>, run: Arc<RunContext>) -> Self {
        Dispatcher { locator, run }
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    /// Resolve, invoke and validate a single artifact.
    pub fn run(&self, artifact: &RegisteredArtifact) -> DispatchOutcome {
        let started = Instant::now();
        let descriptor = &artifact.descriptor;
        let key = descriptor.key.as_str();

        let files = match self.locator.resolve(&descriptor.paths) {
            Ok(files) => files,
            Err(e) => {
                return DispatchOutcome::Failed {
                    error: ArtifactError::new(key, Stage::Locate, ErrorKind::LocatorIo, e.to_string()),
                    duration: started.elapsed(),
                };
            }
        };

        if files.is_empty() && descriptor.requires_files {
            info!("No data available for {}", key);
            return DispatchOutcome::Skipped {
                duration: started.elapsed(),
            };
        }
        debug!("{}: {} source file(s)", key, files.len());

        let report_dir = self.run.report_dir(key);
        if let Err(e) = fs::create_dir_all(&report_dir) {
            return DispatchOutcome::Failed {
                error: ArtifactError::new(
                    key,
                    Stage::Write,
                    ErrorKind::SinkWriteError,
                    format!("cannot create report directory {}", report_dir.display()),
                )
                .with_cause(e.to_string()),
                duration: started.elapsed(),
            };
        }

        let ctx = ExtractionContext {
            key,
            files: &files,
            report_dir: &report_dir,
            locator: &self.locator,
            run: &self.run,
        };

        let invoked = panic::catch_unwind(AssertUnwindSafe(|| artifact.plugin.extract(&ctx)));
        let duration = started.elapsed();

        let mut result = match invoked {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("{} failed: {:#}", key, e);
                return DispatchOutcome::Failed {
                    error: ArtifactError::from_plugin(key, &e),
                    duration,
                };
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("{} panicked: {}", key, message);
                return DispatchOutcome::Failed {
                    error: ArtifactError::new(
                        key,
                        Stage::Parse,
                        ErrorKind::ParseError,
                        format!("extraction routine panicked: {}", message),
                    ),
                    duration,
                };
            }
        };

        if let Err(violation) = result.validate() {
            warn!("{} returned an invalid result: {}", key, violation);
            return DispatchOutcome::Failed {
                error: ArtifactError::new(
                    key,
                    Stage::Parse,
                    ErrorKind::PluginContractViolation,
                    violation.to_string(),
                ),
                duration,
            };
        }

        if result.source_paths.is_empty() {
            result.source_paths = files;
        }

        info!(
            "{} produced {} rows in {:.3}s",
            key,
            result.rows.len(),
            duration.as_secs_f64()
        );
        DispatchOutcome::Succeeded { result, duration }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
