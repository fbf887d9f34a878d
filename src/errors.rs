//! Error types shared across the pipeline.
//!
//! Artifact-scoped failures ([`ArtifactError`]) stop at the dispatcher boundary
//! and end up in the manifest. Only an [`OrchestratorFault`] aborts a run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage an artifact failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Locate,
    Parse,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Locate => write!(f, "locate"),
            Stage::Parse => write!(f, "parse"),
            Stage::Write => write!(f, "write"),
        }
    }
}

/// Classification of an artifact failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Evidence tree could not be read while resolving patterns
    LocatorIo,
    /// The extraction routine failed or panicked
    ParseError,
    /// The routine returned a result that breaks the result model contract
    PluginContractViolation,
    /// A report sink could not persist the result
    SinkWriteError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::LocatorIo => write!(f, "LocatorIo"),
            ErrorKind::ParseError => write!(f, "ParseError"),
            ErrorKind::PluginContractViolation => write!(f, "PluginContractViolation"),
            ErrorKind::SinkWriteError => write!(f, "SinkWriteError"),
        }
    }
}

/// A failure attributed to one artifact.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("[{key}] {kind} during {stage}: {message}")]
pub struct ArtifactError {
    pub key: String,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// Rendered cause chain, if the failure wrapped another error
    pub cause: Option<String>,
}

impl ArtifactError {
    pub fn new(key: &str, stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        ArtifactError {
            key: key.to_string(),
            stage,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Wrap an error returned by an extraction routine.
    pub fn from_plugin(key: &str, err: &anyhow::Error) -> Self {
        let chain: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        let error = ArtifactError::new(key, Stage::Parse, ErrorKind::ParseError, err.to_string());
        if chain.is_empty() {
            error
        } else {
            error.with_cause(chain.join(": "))
        }
    }
}

/// A result that does not satisfy the tabular contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("result has no headers")]
    NoHeaders,

    #[error("duplicate header '{0}'")]
    DuplicateHeader(String),

    #[error("row {row} has {actual} values, expected {expected}")]
    RowArity {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("rendering hint references column {column} but only {columns} columns exist")]
    HintOutOfRange { column: usize, columns: usize },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("artifact key '{0}' is registered twice")]
    DuplicateKey(String),

    #[error("artifact '{0}' requires file input but declares no path patterns")]
    MissingPaths(String),

    #[error("artifact key must not be empty")]
    EmptyKey,

    #[error("unknown artifact '{0}'")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("evidence root not found: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to index evidence tree at {path}: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid path pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("I/O error reading evidence: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "archive_evidence")]
    #[error("failed to read evidence archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("case database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Run-level fault: the run stops before (or instead of) dispatching artifacts.
#[derive(Error, Debug)]
pub enum OrchestratorFault {
    #[error("cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open evidence: {0}")]
    Evidence(#[from] LocatorError),

    #[error(transparent)]
    Selection(#[from] RegistryError),

    #[error("no artifacts selected")]
    EmptySelection,

    #[error("cannot initialize {sink} sink: {message}")]
    SinkInit { sink: String, message: String },

    #[error("cannot write run manifest: {0}")]
    Manifest(String),

    #[error("orchestrator called in state {0}")]
    InvalidState(String),

    #[error("failed to create Tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
