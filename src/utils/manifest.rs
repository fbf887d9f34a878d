use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::ArtifactStatus;
use crate::errors::ArtifactError;
use crate::models::{DeviceFact, DeviceInfo};
use crate::sinks::atomic::write_atomic;

/// A resolved evidence file and its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub size: Option<u64>,
    /// Absent when hashing is disabled or the file exceeds the size limit
    pub sha256: Option<String>,
}

/// A sink that could not persist an artifact's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkFailure {
    pub sink: String,
    pub message: String,
}

/// One artifact's line in the run manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub key: String,
    pub name: String,
    pub category: String,
    pub status: ArtifactStatus,
    pub duration_ms: u64,
    pub row_count: usize,
    pub sources: Vec<SourceFile>,
    /// Output files relative to the output directory, '/'-separated
    pub outputs: Vec<String>,
    pub error: Option<ArtifactError>,
    pub sink_errors: Vec<SinkFailure>,
}

impl ArtifactEntry {
    pub fn new(key: &str, name: &str, category: &str, status: ArtifactStatus) -> Self {
        ArtifactEntry {
            key: key.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            status,
            duration_ms: 0,
            row_count: 0,
            sources: Vec::new(),
            outputs: Vec::new(),
            error: None,
            sink_errors: Vec::new(),
        }
    }

    /// Main HTML page of this artifact, if one was written.
    pub fn html_page(&self) -> Option<&str> {
        let key = &self.key;
        self.outputs
            .iter()
            .map(String::as_str)
            .find(|o| o.ends_with(&format!("{}/{}.html", key, key)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Machine-readable record of a report run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub tool_version: String,
    pub examiner_host: String,
    pub evidence_root: String,
    pub output_dir: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub device: DeviceInfo,
    pub device_facts: Vec<DeviceFact>,
    pub cancelled: bool,
    pub counts: RunCounts,
    pub artifacts: Vec<ArtifactEntry>,
    /// Run-level outputs (timeline, KML, case database, index)
    pub outputs: Vec<String>,
    /// Consolidated outputs that could not be written
    pub finalize_errors: Vec<SinkFailure>,
}

impl RunManifest {
    pub fn new(run_id: &str, examiner_host: &str, evidence_root: &Path, output_dir: &Path, timezone: &str) -> Self {
        RunManifest {
            run_id: run_id.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            examiner_host: examiner_host.to_string(),
            evidence_root: evidence_root.display().to_string(),
            output_dir: output_dir.display().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            timezone: timezone.to_string(),
            device: DeviceInfo::default(),
            device_facts: Vec::new(),
            cancelled: false,
            counts: RunCounts::default(),
            artifacts: Vec::new(),
            outputs: Vec::new(),
            finalize_errors: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: ArtifactEntry) {
        self.artifacts.push(entry);
    }

    pub fn add_device_facts(&mut self, facts: &[DeviceFact]) {
        self.device_facts.extend_from_slice(facts);
    }

    pub fn add_output(&mut self, relative: String) {
        if !self.outputs.contains(&relative) {
            self.outputs.push(relative);
        }
    }

    /// Seal the manifest: order entries, de-duplicate facts, recount.
    pub fn finish(&mut self, cancelled: bool) {
        self.finished_at = Some(Utc::now());
        self.cancelled = cancelled;
        self.artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        self.device_facts.sort();
        self.device_facts.dedup();
        self.outputs.sort();
        self.counts = count_statuses(&self.artifacts);
    }

    pub fn entry(&self, key: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|e| e.key == key)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run manifest to JSON")
    }

    /// Write the manifest as pretty JSON, atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("Failed to write manifest to {}", path.display()))
    }
}

fn count_statuses(entries: &[ArtifactEntry]) -> RunCounts {
    let mut counts = RunCounts::default();
    for entry in entries {
        match entry.status {
            ArtifactStatus::Succeeded => counts.succeeded += 1,
            ArtifactStatus::Skipped => counts.skipped += 1,
            ArtifactStatus::Failed => counts.failed += 1,
            ArtifactStatus::Cancelled => counts.cancelled += 1,
        }
    }
    counts
}

/// `path` relative to `base`, '/'-separated; the full path when outside `base`.
pub fn relative_output(base: &Path, path: &Path) -> String {
    let relative = match path.strip_prefix(base) {
        Ok(relative) => relative,
        Err(_) => return path.display().to_string(),
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}
