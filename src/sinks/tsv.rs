use std::io::Write;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::FixedOffset;
use log::debug;

use crate::config::OutputKind;
use crate::errors::SinkError;
use crate::models::{ArtifactResult, Value};
use crate::sinks::atomic::write_atomic_with;
use crate::sinks::{ReportSink, SinkMeta, SinkOutcome};

/// Escape a field so it cannot break the tab/newline framing.
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Render a cell for TSV output.
pub fn tsv_cell(value: &Value, offset: &FixedOffset) -> String {
    match value {
        Value::Bytes(bytes) => format!("base64:{}", BASE64.encode(bytes)),
        other => escape_field(&other.render(offset)),
    }
}

/// Write the header line and every row of `result` to `writer`.
pub fn write_table(
    writer: &mut dyn Write,
    result: &ArtifactResult,
    offset: &FixedOffset,
) -> std::io::Result<()> {
    let header: Vec<String> = result.headers.iter().map(|h| escape_field(h)).collect();
    writeln!(writer, "{}", header.join("\t"))?;

    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(|v| tsv_cell(v, offset)).collect();
        writeln!(writer, "{}", cells.join("\t"))?;
    }
    Ok(())
}

/// `<output>/<key>/<key>.tsv`
#[derive(Debug, Default)]
pub struct TsvSink;

impl TsvSink {
    pub fn new() -> Self {
        TsvSink
    }
}

impl ReportSink for TsvSink {
    fn name(&self) -> &'static str {
        "tsv"
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Tsv
    }

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError> {
        let key = meta.key();
        let path = meta.run.report_dir(key).join(format!("{}.tsv", key));

        write_atomic_with(&path, |writer| write_table(writer, result, &meta.run.timezone))?;

        debug!("Wrote {} rows to {}", result.rows.len(), path.display());
        Ok(SinkOutcome::written(vec![path]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_descriptor, test_run_context};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("a\tb"), "a\\tb");
        assert_eq!(escape_field("line1\r\nline2"), "line1\\r\\nline2");
        assert_eq!(escape_field("C:\\path"), "C:\\\\path");
        assert_eq!(escape_field("plain"), "plain");
    }

    #[test]
    fn test_bytes_are_base64_prefixed() {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(tsv_cell(&Value::Bytes(vec![1, 2, 3]), &utc), "base64:AQID");
    }

    #[test]
    fn test_write_tsv_file() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let descriptor = sample_descriptor("adId", "Identifiers");

        let mut result = ArtifactResult::new(&["Key", "Data"]);
        result.push_row(vec!["Advertiser Identifier".into(), "multi\nline".into()]);
        result.push_row(vec!["Empty".into(), Value::Null]);

        let outcome = TsvSink::new()
            .write(&result, &SinkMeta { descriptor: &descriptor, run: &run })
            .unwrap();

        let path = run.output_dir.join("adId/adId.tsv");
        assert_eq!(outcome.files, vec![path.clone()]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Key\tData\nAdvertiser Identifier\tmulti\\nline\nEmpty\t\n"
        );
    }
}
