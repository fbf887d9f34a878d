//! Run orchestration: selection, bounded concurrent dispatch, fan-out to the
//! report sinks and finalization.
//!
//! A run moves through `Idle → Selecting → Running → Finalizing → Done`. Any
//! failure before dispatch ends in `Failed` with an [`OrchestratorFault`];
//! once dispatch starts, artifact-level failures are only recorded in the
//! manifest.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use futures::future;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Semaphore};
use tokio::task;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::system_version;
use crate::config::{OutputKind, RunConfig};
use crate::constants::{
    ARCHIVE_EXTRACT_DIR_NAME, INDEX_FILE_NAME, MANIFEST_FILE_NAME, MAX_CONCURRENCY,
    SYSTEM_VERSION_PATTERN,
};
use crate::dispatch::{ArtifactStatus, DispatchOutcome, Dispatcher};
use crate::errors::{ArtifactError, ErrorKind, OrchestratorFault, Stage};
use crate::locator::EvidenceLocator;
use crate::models::{DeviceFact, DeviceInfo, RunContext};
use crate::registry::{ArtifactFilter, ArtifactRegistry, RegisteredArtifact};
use crate::sinks::{build_sinks, html, ReportSink, SinkMeta};
use crate::utils::hash::describe_source;
use crate::utils::manifest::{relative_output, ArtifactEntry, RunManifest, SinkFailure};

/// Which artifacts a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Keys(Vec<String>),
    Categories(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Selecting,
    Running,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Selecting => "selecting",
            RunState::Running => "running",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Caller-supplied parameters of one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub evidence_root: PathBuf,
    pub output_dir: PathBuf,
    pub selection: Selection,
    pub timezone: FixedOffset,
    pub wrap_text: bool,
    /// Overrides the configured concurrency
    pub concurrency: Option<usize>,
    /// Cancel the run once this much time has passed
    pub timeout: Option<Duration>,
    /// Cancel the run on Ctrl-C
    pub cancel_on_interrupt: bool,
}

impl RunRequest {
    pub fn new(evidence_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, selection: Selection) -> Self {
        RunRequest {
            evidence_root: evidence_root.into(),
            output_dir: output_dir.into(),
            selection,
            timezone: Utc.fix(),
            wrap_text: false,
            concurrency: None,
            timeout: None,
            cancel_on_interrupt: false,
        }
    }
}

/// Everything the per-artifact worker needs besides the artifact itself
struct Worker {
    dispatcher: Dispatcher,
    sinks: Arc<Vec<Box<dyn ReportSink>>>,
    hash_sources: bool,
    hash_max_size_mb: u64,
}

pub struct Orchestrator {
    registry: Arc<ArtifactRegistry>,
    config: RunConfig,
    state: RunState,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(registry: Arc<ArtifactRegistry>, config: RunConfig) -> Self {
        Orchestrator {
            registry,
            config,
            state: RunState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops dequeuing further artifacts when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run on a fresh multi-thread runtime.
    pub fn run_blocking(&mut self, request: RunRequest) -> Result<RunManifest, OrchestratorFault> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(OrchestratorFault::Runtime)?;

        runtime.block_on(self.run(request))
    }

    /// Execute one run. An orchestrator runs at most once.
    pub async fn run(&mut self, request: RunRequest) -> Result<RunManifest, OrchestratorFault> {
        if self.state != RunState::Idle {
            return Err(OrchestratorFault::InvalidState(self.state.to_string()));
        }

        self.state = RunState::Selecting;
        let prepared = match self.select(&request) {
            Ok(prepared) => prepared,
            Err(fault) => {
                error!("Run failed before dispatch: {}", fault);
                self.state = RunState::Failed;
                return Err(fault);
            }
        };

        self.state = RunState::Running;
        let manifest = self.dispatch_all(&request, &prepared).await;

        self.state = RunState::Finalizing;
        match self.finalize(manifest, &prepared) {
            Ok(manifest) => {
                self.state = RunState::Done;
                Ok(manifest)
            }
            Err(fault) => {
                error!("Run failed while finalizing: {}", fault);
                self.state = RunState::Failed;
                Err(fault)
            }
        }
    }

    fn select(&self, request: &RunRequest) -> Result<Prepared, OrchestratorFault> {
        let artifacts = select_artifacts(&self.registry, &request.selection)?;
        info!("Selected {} artifact(s)", artifacts.len());

        fs::create_dir_all(&request.output_dir).map_err(|e| OrchestratorFault::OutputDir {
            path: request.output_dir.clone(),
            source: e,
        })?;

        let locator = EvidenceLocator::open(
            &request.evidence_root,
            &request.output_dir.join(ARCHIVE_EXTRACT_DIR_NAME),
            &self.config.extra_layout_rewrites,
        )?;
        info!(
            "Opened evidence {} ({} files)",
            locator.root().display(),
            locator.file_count()
        );

        let device = probe_device(&locator);
        let concurrency = request
            .concurrency
            .map(|n| n.clamp(1, MAX_CONCURRENCY))
            .unwrap_or_else(|| self.config.effective_concurrency());

        let run = RunContext {
            evidence_root: locator.root().to_path_buf(),
            output_dir: request.output_dir.clone(),
            selected: artifacts.iter().map(|a| a.descriptor.key.clone()).collect(),
            device,
            timezone: request.timezone,
            wrap_text: request.wrap_text,
            concurrency,
        };

        let run_id = Uuid::new_v4().to_string();
        let sinks = build_sinks(&self.config, &run, &run_id)?;
        debug!(
            "Sinks: {}",
            sinks.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );

        let examiner_host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut manifest = RunManifest::new(
            &run_id,
            &examiner_host,
            &run.evidence_root,
            &run.output_dir,
            &run.timezone.to_string(),
        );
        manifest.device = run.device.clone();

        Ok(Prepared {
            artifacts,
            run: Arc::new(run),
            locator: Arc::new(locator),
            sinks: Arc::new(sinks),
            manifest,
        })
    }

    async fn dispatch_all(&self, request: &RunRequest, prepared: &Prepared) -> RunManifest {
        let semaphore = Arc::new(Semaphore::new(prepared.run.concurrency));
        let manifest = Arc::new(Mutex::new(prepared.manifest.clone()));
        let worker = Arc::new(Worker {
            dispatcher: Dispatcher::new(Arc::clone(&prepared.locator), Arc::clone(&prepared.run)),
            sinks: Arc::clone(&prepared.sinks),
            hash_sources: self.config.hash_sources,
            hash_max_size_mb: self.config.hash_max_size_mb,
        });

        let mut watchers = Vec::new();
        if let Some(timeout) = request.timeout {
            let token = self.cancel.clone();
            watchers.push(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Timeout of {}s reached, cancelling run", timeout.as_secs());
                token.cancel();
            }));
        }
        if request.cancel_on_interrupt {
            let token = self.cancel.clone();
            watchers.push(tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    token.cancel();
                }
            }));
        }

        info!(
            "Dispatching {} artifact(s) with concurrency {}",
            prepared.artifacts.len(),
            prepared.run.concurrency
        );

        let futures = prepared.artifacts.iter().map(|artifact| {
            let semaphore = Arc::clone(&semaphore);
            let manifest = Arc::clone(&manifest);
            let worker = Arc::clone(&worker);
            let cancel = self.cancel.clone();
            let artifact = artifact.clone();

            async move {
                let descriptor = artifact.descriptor.clone();
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let (entry, facts) = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        let worker = Arc::clone(&worker);
                        match task::spawn_blocking(move || worker.process(&artifact)).await {
                            Ok(done) => done,
                            Err(e) => {
                                error!("Worker for {} did not complete: {}", descriptor.key, e);
                                let mut entry = ArtifactEntry::new(
                                    &descriptor.key,
                                    &descriptor.name,
                                    &descriptor.category,
                                    ArtifactStatus::Failed,
                                );
                                entry.error = Some(ArtifactError::new(
                                    &descriptor.key,
                                    Stage::Parse,
                                    ErrorKind::ParseError,
                                    format!("worker task failed: {}", e),
                                ));
                                (entry, Vec::new())
                            }
                        }
                    }
                    _ => {
                        debug!("{} not started: run cancelled", descriptor.key);
                        let entry = ArtifactEntry::new(
                            &descriptor.key,
                            &descriptor.name,
                            &descriptor.category,
                            ArtifactStatus::Cancelled,
                        );
                        (entry, Vec::new())
                    }
                };

                let mut manifest = manifest.lock().await;
                manifest.add_device_facts(&facts);
                manifest.record(entry);
            }
        });

        future::join_all(futures).await;

        for watcher in watchers {
            watcher.abort();
        }

        let collected = manifest.lock().await.clone();
        collected
    }

    fn finalize(&self, mut manifest: RunManifest, prepared: &Prepared) -> Result<RunManifest, OrchestratorFault> {
        let output_dir = &prepared.run.output_dir;

        for sink in prepared.sinks.iter() {
            match sink.finalize(&prepared.run) {
                Ok(files) => {
                    for file in files {
                        manifest.add_output(relative_output(output_dir, &file));
                    }
                }
                Err(e) => {
                    error!("Failed to finalize {} output: {}", sink.name(), e);
                    manifest.finalize_errors.push(SinkFailure {
                        sink: sink.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let html_enabled = self.config.sink_enabled(OutputKind::Html);
        manifest.add_output(MANIFEST_FILE_NAME.to_string());
        if html_enabled {
            manifest.add_output(INDEX_FILE_NAME.to_string());
        }

        let cancelled = self.cancel.is_cancelled();
        manifest.finish(cancelled);

        if html_enabled {
            if let Err(e) = html::write_index(&output_dir.join(INDEX_FILE_NAME), &manifest) {
                error!("Failed to write {}: {}", INDEX_FILE_NAME, e);
                manifest.finalize_errors.push(SinkFailure {
                    sink: "html".to_string(),
                    message: e.to_string(),
                });
            }
        }

        manifest
            .write(&output_dir.join(MANIFEST_FILE_NAME))
            .map_err(|e| OrchestratorFault::Manifest(format!("{:#}", e)))?;

        let counts = manifest.counts;
        info!(
            "Run {} finished: {} succeeded, {} skipped, {} failed, {} cancelled",
            manifest.run_id, counts.succeeded, counts.skipped, counts.failed, counts.cancelled
        );
        Ok(manifest)
    }
}

/// State carried from Selecting into Running and Finalizing
struct Prepared {
    artifacts: Vec<RegisteredArtifact>,
    run: Arc<RunContext>,
    locator: Arc<EvidenceLocator>,
    sinks: Arc<Vec<Box<dyn ReportSink>>>,
    manifest: RunManifest,
}

impl Worker {
    /// Dispatch one artifact and fan a successful result out to the sinks.
    fn process(&self, artifact: &RegisteredArtifact) -> (ArtifactEntry, Vec<DeviceFact>) {
        let descriptor = &artifact.descriptor;
        let run = self.dispatcher.run_context();
        let outcome = self.dispatcher.run(artifact);

        let mut entry = ArtifactEntry::new(
            &descriptor.key,
            &descriptor.name,
            &descriptor.category,
            outcome.status(),
        );
        entry.duration_ms = outcome.duration().as_millis() as u64;

        let result = match outcome {
            DispatchOutcome::Succeeded { result, .. } => result,
            DispatchOutcome::Skipped { .. } => return (entry, Vec::new()),
            DispatchOutcome::Failed { error, .. } => {
                entry.error = Some(error);
                return (entry, Vec::new());
            }
        };

        entry.row_count = result.rows.len();
        entry.sources = result
            .source_paths
            .iter()
            .map(|path| describe_source(path, self.hash_sources, self.hash_max_size_mb))
            .collect();

        let meta = SinkMeta { descriptor, run };
        let mut outputs = BTreeSet::new();
        for sink in self.sinks.iter() {
            if !descriptor.accepts(sink.kind()) {
                continue;
            }
            match sink.write(&result, &meta) {
                Ok(outcome) => {
                    for file in outcome.files {
                        outputs.insert(relative_output(&run.output_dir, &file));
                    }
                }
                Err(e) => {
                    warn!("{} sink could not write {}: {}", sink.name(), descriptor.key, e);
                    entry.sink_errors.push(SinkFailure {
                        sink: sink.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let report_dir = run.report_dir(&descriptor.key);
        for extra in &result.extra_outputs {
            let path = if extra.is_absolute() { extra.clone() } else { report_dir.join(extra) };
            outputs.insert(relative_output(&run.output_dir, &path));
        }
        entry.outputs = outputs.into_iter().collect();

        (entry, result.device_facts)
    }
}

/// Resolve a selection to registered artifacts, sorted and de-duplicated by key.
pub fn select_artifacts(
    registry: &ArtifactRegistry,
    selection: &Selection,
) -> Result<Vec<RegisteredArtifact>, OrchestratorFault> {
    let keys: BTreeSet<String> = match selection {
        Selection::All => registry
            .list(&ArtifactFilter::default())
            .into_iter()
            .map(|d| d.key.clone())
            .collect(),
        Selection::Keys(keys) => {
            for key in keys {
                registry.get(key)?;
            }
            keys.iter().cloned().collect()
        }
        Selection::Categories(categories) => registry
            .list(&ArtifactFilter::categories(categories))
            .into_iter()
            .map(|d| d.key.clone())
            .collect(),
    };

    if keys.is_empty() {
        return Err(OrchestratorFault::EmptySelection);
    }

    keys.iter()
        .map(|key| registry.get(key).cloned().map_err(OrchestratorFault::from))
        .collect()
}

/// Device metadata from the evidence's SystemVersion.plist; empty when absent.
fn probe_device(locator: &EvidenceLocator) -> DeviceInfo {
    let candidates = match locator.resolve(&[SYSTEM_VERSION_PATTERN]) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Could not search for SystemVersion.plist: {}", e);
            return DeviceInfo::default();
        }
    };

    let Some(path) = candidates.first() else {
        info!("No SystemVersion.plist found; device version unknown");
        return DeviceInfo::default();
    };

    match system_version::read_device_info(path) {
        Ok(device) => {
            info!(
                "Device: {} {} ({})",
                device.product_name.as_deref().unwrap_or("unknown"),
                device.os_version.as_deref().unwrap_or("?"),
                device.build_version.as_deref().unwrap_or("?")
            );
            device
        }
        Err(e) => {
            warn!("Failed to read {}: {:#}", path.display(), e);
            DeviceInfo::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ArtifactPlugin, ExtractionContext};
    use crate::models::{ArtifactResult, ColumnHint, Value};
    use crate::registry::{ArtifactDescriptor, RegistryBuilder};
    use crate::test_utils::fixtures::write_system_version;
    use tempfile::TempDir;

    struct Rows(usize);

    impl ArtifactPlugin for Rows {
        fn extract(&self, ctx: &ExtractionContext<'_>) -> anyhow::Result<ArtifactResult> {
            let mut result = ArtifactResult::new(&["N", "Source"]).with_hint(0, ColumnHint::LongText);
            for n in 0..self.0 {
                result.push_row(vec![Value::Integer(n as i64), ctx.key.into()]);
            }
            Ok(result)
        }
    }

    struct Cancels(CancellationToken);

    impl ArtifactPlugin for Cancels {
        fn extract(&self, _ctx: &ExtractionContext<'_>) -> anyhow::Result<ArtifactResult> {
            self.0.cancel();
            Ok(ArtifactResult::new(&["A"]))
        }
    }

    fn registry(extra: Vec<(ArtifactDescriptor, Arc<dyn ArtifactPlugin>)>) -> Arc<ArtifactRegistry> {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                ArtifactDescriptor::new("alpha", "Alpha", "Misc").paths(&["*/alpha.db"]),
                Arc::new(Rows(2)),
            )
            .unwrap()
            .register(
                ArtifactDescriptor::new("beta", "Beta", "Other").paths(&["*/beta.db"]),
                Arc::new(Rows(1)),
            )
            .unwrap();
        for (descriptor, plugin) in extra {
            builder.register(descriptor, plugin).unwrap();
        }
        Arc::new(builder.build())
    }

    fn evidence(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("evidence");
        fs::create_dir_all(root.join("fs/data")).unwrap();
        fs::write(root.join("fs/data/alpha.db"), b"alpha").unwrap();
        root
    }

    fn request(dir: &TempDir, selection: Selection) -> RunRequest {
        let mut request = RunRequest::new(evidence(dir), dir.path().join("out"), selection);
        request.concurrency = Some(1);
        request
    }

    fn tsv_only() -> RunConfig {
        RunConfig {
            enabled_sinks: vec![OutputKind::Tsv],
            ..Default::default()
        }
    }

    #[test]
    fn test_select_artifacts() {
        let registry = registry(Vec::new());

        let all = select_artifacts(&registry, &Selection::All).unwrap();
        assert_eq!(all.len(), 2);

        let keys = Selection::Keys(vec!["beta".into(), "alpha".into(), "beta".into()]);
        let chosen: Vec<String> = select_artifacts(&registry, &keys)
            .unwrap()
            .into_iter()
            .map(|a| a.descriptor.key)
            .collect();
        assert_eq!(chosen, vec!["alpha", "beta"]);

        let by_category = select_artifacts(&registry, &Selection::Categories(vec!["other".into()])).unwrap();
        assert_eq!(by_category[0].descriptor.key, "beta");

        assert!(matches!(
            select_artifacts(&registry, &Selection::Keys(vec!["nope".into()])),
            Err(OrchestratorFault::Selection(_))
        ));
        assert!(matches!(
            select_artifacts(&registry, &Selection::Categories(vec!["none".into()])),
            Err(OrchestratorFault::EmptySelection)
        ));
    }

    #[tokio::test]
    async fn test_run_records_every_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());

        let manifest = orchestrator.run(request(&temp_dir, Selection::All)).await.unwrap();

        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(manifest.counts.succeeded, 1);
        assert_eq!(manifest.counts.skipped, 1);
        let alpha = manifest.entry("alpha").unwrap();
        assert_eq!(alpha.row_count, 2);
        assert_eq!(alpha.outputs, vec!["alpha/alpha.tsv"]);
        assert!(alpha.sources[0].sha256.is_some());
        assert!(temp_dir.path().join("out/manifest.json").is_file());
        assert!(!temp_dir.path().join("out/index.html").exists());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());
        orchestrator.run(request(&temp_dir, Selection::All)).await.unwrap();

        let again = orchestrator.run(request(&temp_dir, Selection::All)).await;
        assert!(matches!(again, Err(OrchestratorFault::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_unknown_key_fails_before_dispatch() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());

        let result = orchestrator
            .run(request(&temp_dir, Selection::Keys(vec!["missing".into()])))
            .await;

        assert!(matches!(result, Err(OrchestratorFault::Selection(_))));
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert!(!temp_dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_evidence_is_fault() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());
        let request = RunRequest::new(temp_dir.path().join("absent"), temp_dir.path().join("out"), Selection::All);

        let result = orchestrator.run(request).await;
        assert!(matches!(result, Err(OrchestratorFault::Evidence(_))));
        assert_eq!(orchestrator.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dequeuing() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let registry = {
            let mut builder = RegistryBuilder::new();
            builder
                .register(
                    ArtifactDescriptor::new("aaa", "First", "Misc").without_files(),
                    Arc::new(Cancels(token.clone())),
                )
                .unwrap()
                .register(
                    ArtifactDescriptor::new("alpha", "Alpha", "Misc").paths(&["*/alpha.db"]),
                    Arc::new(Rows(1)),
                )
                .unwrap();
            Arc::new(builder.build())
        };

        let mut orchestrator = Orchestrator::new(registry, tsv_only()).with_cancellation_token(token);
        let manifest = orchestrator.run(request(&temp_dir, Selection::All)).await.unwrap();

        assert!(manifest.cancelled);
        assert_eq!(manifest.entry("aaa").unwrap().status, ArtifactStatus::Succeeded);
        assert_eq!(manifest.entry("alpha").unwrap().status, ArtifactStatus::Cancelled);
        assert!(!temp_dir.path().join("out/alpha").exists());
    }

    #[tokio::test]
    async fn test_device_probe_populates_context() {
        let temp_dir = TempDir::new().unwrap();
        let request = request(&temp_dir, Selection::Keys(vec!["alpha".into()]));
        write_system_version(&request.evidence_root, "16.2", "20C65");

        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());
        let manifest = orchestrator.run(request).await.unwrap();

        assert_eq!(manifest.device.os_version.as_deref(), Some("16.2"));
        assert_eq!(manifest.device.build_version.as_deref(), Some("20C65"));
    }

    #[test]
    fn test_run_blocking() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(registry(Vec::new()), tsv_only());
        let manifest = orchestrator
            .run_blocking(request(&temp_dir, Selection::Keys(vec!["alpha".into()])))
            .unwrap();
        assert_eq!(manifest.artifacts.len(), 1);
    }
}
