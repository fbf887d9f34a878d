use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info};

use crate::config::OutputKind;
use crate::constants::{TIMELINE_DIR_NAME, TIMELINE_FILE_NAME};
use crate::errors::SinkError;
use crate::models::{format_timestamp, ArtifactResult, ColumnHint, RunContext};
use crate::sinks::atomic::write_atomic_with;
use crate::sinks::tsv::{escape_field, tsv_cell};
use crate::sinks::{ReportSink, SinkMeta, SinkOutcome};

#[derive(Debug, Clone)]
struct TimelineEvent {
    instant: DateTime<Utc>,
    key: String,
    row: usize,
    column: String,
    data: String,
}

/// Merges every timestamped row of every artifact into one sorted TSV.
#[derive(Debug, Default)]
pub struct TimelineSink {
    events: Mutex<Vec<TimelineEvent>>,
}

impl TimelineSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    fn collect(result: &ArtifactResult, key: &str, offset: &FixedOffset) -> Vec<TimelineEvent> {
        let columns = result.columns_with(ColumnHint::Timestamp);
        let mut events = Vec::new();

        for (row_index, row) in result.rows.iter().enumerate() {
            for &column in &columns {
                let Some(instant) = row.get(column).and_then(|v| v.as_timestamp()) else {
                    continue;
                };
                let data: Vec<String> = result
                    .headers
                    .iter()
                    .zip(row.iter())
                    .enumerate()
                    .filter(|(i, (_, value))| *i != column && !value.is_null())
                    .map(|(_, (header, value))| format!("{}: {}", escape_field(header), tsv_cell(value, offset)))
                    .collect();

                events.push(TimelineEvent {
                    instant,
                    key: key.to_string(),
                    row: row_index,
                    column: result.headers[column].clone(),
                    data: data.join("; "),
                });
            }
        }
        events
    }
}

fn poisoned() -> SinkError {
    SinkError::Rejected("timeline collector lock poisoned".to_string())
}

impl ReportSink for TimelineSink {
    fn name(&self) -> &'static str {
        "timeline"
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Timeline
    }

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError> {
        if !result.has_hint(ColumnHint::Timestamp) {
            return Ok(SinkOutcome::none());
        }

        let events = Self::collect(result, meta.key(), &meta.run.timezone);
        debug!("{} contributed {} timeline events", meta.key(), events.len());
        self.events.lock().map_err(|_| poisoned())?.extend(events);
        Ok(SinkOutcome::none())
    }

    fn finalize(&self, run: &RunContext) -> Result<Vec<PathBuf>, SinkError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        // Arrival order depends on scheduling; the tie-breakers make output deterministic
        events.sort_by(|a, b| {
            a.instant
                .cmp(&b.instant)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.row.cmp(&b.row))
        });

        let path = run.output_dir.join(TIMELINE_DIR_NAME).join(TIMELINE_FILE_NAME);
        write_atomic_with(&path, |writer| {
            writeln!(writer, "Timestamp\tArtifact\tColumn\tData")?;
            for event in events.iter() {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}",
                    format_timestamp(&event.instant, &run.timezone),
                    escape_field(&event.key),
                    escape_field(&event.column),
                    event.data
                )?;
            }
            Ok(())
        })?;

        info!("Wrote {} timeline events to {}", events.len(), path.display());
        Ok(vec![path])
    }
}
