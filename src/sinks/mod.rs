//! Report writers.
//!
//! Every sink receives validated results by shared reference. Per-artifact
//! sinks write as results arrive; barrier sinks (timeline, KML) collect and
//! write their consolidated outputs in `finalize`.

use std::path::PathBuf;

use crate::config::{OutputKind, RunConfig};
use crate::errors::{OrchestratorFault, SinkError};
use crate::models::{ArtifactResult, RunContext};
use crate::registry::ArtifactDescriptor;

pub mod atomic;
pub mod case_db;
pub mod html;
pub mod kml;
pub mod timeline;
pub mod tsv;

pub use case_db::CaseDbSink;
pub use html::HtmlSink;
pub use kml::KmlSink;
pub use timeline::TimelineSink;
pub use tsv::TsvSink;

/// Per-write context handed to a sink alongside the result
pub struct SinkMeta<'a> {
    pub descriptor: &'a ArtifactDescriptor,
    pub run: &'a RunContext,
}

impl SinkMeta<'_> {
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }
}

/// Files a sink produced for one artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOutcome {
    pub files: Vec<PathBuf>,
}

impl SinkOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn written(files: Vec<PathBuf>) -> Self {
        SinkOutcome { files }
    }
}

pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output kind an artifact must declare to reach this sink
    fn kind(&self) -> OutputKind;

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError>;

    /// Flush consolidated outputs once every artifact has been written.
    fn finalize(&self, _run: &RunContext) -> Result<Vec<PathBuf>, SinkError> {
        Ok(Vec::new())
    }
}

/// Instantiate the sinks enabled in `config`, in a fixed order.
///
/// A sink that cannot be opened is reported by its output kind name.
pub fn build_sinks(
    config: &RunConfig,
    run: &RunContext,
    run_id: &str,
) -> Result<Vec<Box<dyn ReportSink>>, OrchestratorFault> {
    let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();

    for kind in OutputKind::ALL {
        if !config.sink_enabled(kind) {
            continue;
        }
        let sink: Box<dyn ReportSink> = match kind {
            OutputKind::Html => Box::new(HtmlSink::new(
                config.html_page_size,
                config.html_max_inline_image_bytes,
            )),
            OutputKind::Tsv => Box::new(TsvSink::new()),
            OutputKind::Timeline => Box::new(TimelineSink::new()),
            OutputKind::Kml => Box::new(KmlSink::new(config.kml_sentinels.clone())),
            OutputKind::CaseDb => {
                let path = config
                    .case_db_path
                    .clone()
                    .unwrap_or_else(|| run.output_dir.join(crate::constants::CASE_DB_FILE_NAME));
                let sink = CaseDbSink::open(&path, run_id, &run.evidence_root).map_err(|e| {
                    OrchestratorFault::SinkInit {
                        sink: kind.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Box::new(sink)
            }
        };
        sinks.push(sink);
    }

    Ok(sinks)
}
