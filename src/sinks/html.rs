//! Searchable HTML reports.
//!
//! Each artifact gets `<key>/<key>.html`, continued on `<key>_page2.html` and
//! so on once it exceeds the page size. The cross-artifact `index.html` is
//! rendered from the run manifest after every artifact has finished.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::FixedOffset;
use html_escape::{encode_double_quoted_attribute, encode_text};
use log::debug;

use crate::config::OutputKind;
use crate::dispatch::ArtifactStatus;
use crate::errors::SinkError;
use crate::models::{ArtifactResult, ColumnHint, Value};
use crate::registry::ArtifactDescriptor;
use crate::sinks::atomic::write_atomic;
use crate::sinks::{ReportSink, SinkMeta, SinkOutcome};
use crate::utils::manifest::{ArtifactEntry, RunManifest};

const STYLE: &str = r#"body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2em; color: #222; }
h1 { font-size: 1.5em; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; }
th { background: #f0f0f0; position: sticky; top: 0; }
td.long { white-space: normal; }
.nav { margin: 1em 0; }
.nav a, .nav span { margin-right: 0.5em; }
.filter { margin: 1em 0; padding: 4px; width: 30em; }
.status-failed { color: #a00; }
.status-skipped, .status-cancelled { color: #777; }
img.inline { max-width: 320px; max-height: 320px; }
"#;

const FILTER_SCRIPT: &str = r#"function filterRows(input) {
  var needle = input.value.toLowerCase();
  var rows = document.querySelectorAll('table.data tbody tr');
  for (var i = 0; i < rows.length; i++) {
    var text = rows[i].textContent.toLowerCase();
    rows[i].style.display = text.indexOf(needle) === -1 ? 'none' : '';
  }
}
"#;

/// MIME type of an image blob, recognised by its magic bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

/// File name of page `page` (1-based) of an artifact report.
pub fn page_file_name(key: &str, page: usize) -> String {
    if page <= 1 {
        format!("{}.html", key)
    } else {
        format!("{}_page{}.html", key, page)
    }
}

pub struct HtmlSink {
    page_size: usize,
    max_inline_image_bytes: usize,
}

impl HtmlSink {
    pub fn new(page_size: usize, max_inline_image_bytes: usize) -> Self {
        HtmlSink {
            page_size: page_size.max(1),
            max_inline_image_bytes,
        }
    }

    fn render_cell(&self, value: &Value, image: bool, long_text: bool, wrap_text: bool, offset: &FixedOffset) -> String {
        if let Value::Bytes(bytes) = value {
            if image {
                return match sniff_image_mime(bytes) {
                    Some(mime) if bytes.len() <= self.max_inline_image_bytes => format!(
                        "<td><img class=\"inline\" src=\"data:{};base64,{}\" alt=\"embedded image\"></td>",
                        mime,
                        BASE64.encode(bytes)
                    ),
                    Some(_) => format!("<td>[image, {} bytes, not inlined]</td>", bytes.len()),
                    None => format!("<td>[binary data, {} bytes]</td>", bytes.len()),
                };
            }
        }

        let rendered = value.render(offset);
        let text = encode_text(&rendered);
        if long_text && wrap_text {
            format!("<td class=\"long\">{}</td>", text.replace("\r\n", "\n").replace('\n', "<br>"))
        } else {
            format!("<td>{}</td>", text)
        }
    }

    fn render_page(
        &self,
        descriptor: &ArtifactDescriptor,
        result: &ArtifactResult,
        rows: &[Vec<Value>],
        page: usize,
        pages: usize,
        wrap_text: bool,
        offset: &FixedOffset,
    ) -> String {
        let key = &descriptor.key;
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}</style>\n<script>\n{}</script>\n</head>\n<body>\n",
            encode_text(&descriptor.name),
            STYLE,
            FILTER_SCRIPT
        );
        let _ = writeln!(html, "<p class=\"nav\"><a href=\"../index.html\">Report index</a></p>");
        let _ = writeln!(html, "<h1>{}</h1>", encode_text(&descriptor.name));
        if !descriptor.description.is_empty() {
            let _ = writeln!(html, "<p>{}</p>", encode_text(&descriptor.description));
        }
        let _ = writeln!(
            html,
            "<p>Category: {} &middot; {} record(s)</p>",
            encode_text(&descriptor.category),
            result.rows.len()
        );

        if !result.source_paths.is_empty() {
            let _ = writeln!(html, "<p>Source:</p>\n<ul>");
            for source in &result.source_paths {
                let _ = writeln!(html, "<li>{}</li>", encode_text(&source.display().to_string()));
            }
            let _ = writeln!(html, "</ul>");
        }

        if pages > 1 {
            html.push_str(&page_navigation(key, page, pages));
        }

        let _ = writeln!(
            html,
            "<input class=\"filter\" type=\"text\" placeholder=\"Filter rows\" onkeyup=\"filterRows(this)\">"
        );
        let _ = writeln!(html, "<table class=\"data\">\n<thead>\n<tr>");
        for header in &result.headers {
            let _ = writeln!(html, "<th>{}</th>", encode_text(header));
        }
        let _ = writeln!(html, "</tr>\n</thead>\n<tbody>");

        if rows.is_empty() {
            let _ = writeln!(
                html,
                "<tr><td colspan=\"{}\">No records</td></tr>",
                result.headers.len()
            );
        }
        for row in rows {
            html.push_str("<tr>");
            for (column, value) in row.iter().enumerate() {
                let image = result.column_has_hint(column, ColumnHint::Image);
                let long_text = result.column_has_hint(column, ColumnHint::LongText);
                html.push_str(&self.render_cell(value, image, long_text, wrap_text, offset));
            }
            html.push_str("</tr>\n");
        }
        let _ = writeln!(html, "</tbody>\n</table>");

        if pages > 1 {
            html.push_str(&page_navigation(key, page, pages));
        }
        html.push_str("</body>\n</html>\n");
        html
    }
}

fn page_navigation(key: &str, page: usize, pages: usize) -> String {
    let mut nav = String::from("<p class=\"nav\">");
    if page > 1 {
        let href = page_file_name(key, page - 1);
        let _ = write!(nav, "<a href=\"{}\">Previous</a>", encode_double_quoted_attribute(&href));
    }
    for n in 1..=pages {
        if n == page {
            let _ = write!(nav, "<span>{}</span>", n);
        } else {
            let href = page_file_name(key, n);
            let _ = write!(nav, "<a href=\"{}\">{}</a>", encode_double_quoted_attribute(&href), n);
        }
    }
    if page < pages {
        let href = page_file_name(key, page + 1);
        let _ = write!(nav, "<a href=\"{}\">Next</a>", encode_double_quoted_attribute(&href));
    }
    nav.push_str("</p>\n");
    nav
}

impl ReportSink for HtmlSink {
    fn name(&self) -> &'static str {
        "html"
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Html
    }

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError> {
        let key = meta.key();
        let report_dir = meta.run.report_dir(key);

        let chunks: Vec<&[Vec<Value>]> = if result.rows.is_empty() {
            vec![&result.rows[..]]
        } else {
            result.rows.chunks(self.page_size).collect()
        };
        let pages = chunks.len();

        let mut files = Vec::with_capacity(pages);
        for (index, rows) in chunks.into_iter().enumerate() {
            let page = index + 1;
            let html = self.render_page(
                meta.descriptor,
                result,
                rows,
                page,
                pages,
                meta.run.wrap_text,
                &meta.run.timezone,
            );
            let path = report_dir.join(page_file_name(key, page));
            write_atomic(&path, html.as_bytes())?;
            files.push(path);
        }

        debug!("Wrote {} HTML page(s) for {}", pages, key);
        Ok(SinkOutcome::written(files))
    }
}

fn status_cell(entry: &ArtifactEntry) -> String {
    match entry.status {
        ArtifactStatus::Succeeded => format!("{} record(s)", entry.row_count),
        ArtifactStatus::Skipped => "no data available".to_string(),
        ArtifactStatus::Cancelled => "cancelled".to_string(),
        ArtifactStatus::Failed => match &entry.error {
            Some(error) => format!("failed: {}", encode_text(&error.message)),
            None => "failed".to_string(),
        },
    }
}

/// Render the cross-artifact index page.
pub fn render_index(manifest: &RunManifest) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Artifact Report</title>\n<style>\n{}</style>\n</head>\n<body>\n",
        STYLE
    );
    let _ = writeln!(html, "<h1>Artifact Report</h1>");
    let _ = writeln!(html, "<table>");
    let run_rows = [
        ("Run ID", manifest.run_id.clone()),
        ("Tool version", manifest.tool_version.clone()),
        ("Examiner host", manifest.examiner_host.clone()),
        ("Evidence", manifest.evidence_root.clone()),
        ("Started", manifest.started_at.to_rfc3339()),
        (
            "Finished",
            manifest.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ),
        ("Timezone", manifest.timezone.clone()),
        (
            "Artifacts",
            format!(
                "{} succeeded, {} skipped, {} failed, {} cancelled",
                manifest.counts.succeeded,
                manifest.counts.skipped,
                manifest.counts.failed,
                manifest.counts.cancelled
            ),
        ),
    ];
    for (label, value) in run_rows.iter() {
        let _ = writeln!(html, "<tr><th>{}</th><td>{}</td></tr>", label, encode_text(value));
    }
    let _ = writeln!(html, "</table>");
    if manifest.cancelled {
        let _ = writeln!(html, "<p class=\"status-failed\">The run was cancelled before every artifact ran.</p>");
    }

    let _ = writeln!(html, "<h2>Device information</h2>");
    if manifest.device_facts.is_empty() {
        let _ = writeln!(html, "<p>No device information available</p>");
    } else {
        let _ = writeln!(html, "<table>\n<tr><th>Category</th><th>Property</th><th>Value</th><th>Source</th></tr>");
        for fact in &manifest.device_facts {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                encode_text(&fact.category),
                encode_text(&fact.label),
                encode_text(&fact.value),
                encode_text(&fact.source)
            );
        }
        let _ = writeln!(html, "</table>");
    }

    let mut by_category: BTreeMap<&str, Vec<&ArtifactEntry>> = BTreeMap::new();
    for entry in &manifest.artifacts {
        by_category.entry(entry.category.as_str()).or_default().push(entry);
    }

    for (category, entries) in by_category {
        let _ = writeln!(html, "<h2>{}</h2>", encode_text(category));
        let _ = writeln!(html, "<table>\n<tr><th>Artifact</th><th>Status</th><th>Duration</th></tr>");
        for entry in entries {
            let name = match entry.html_page() {
                Some(page) => format!(
                    "<a href=\"{}\">{}</a>",
                    encode_double_quoted_attribute(page),
                    encode_text(&entry.name)
                ),
                None => encode_text(&entry.name).into_owned(),
            };
            let _ = write!(
                html,
                "<tr><td>{}</td><td class=\"status-{}\">{}",
                name,
                entry.status,
                status_cell(entry)
            );
            for failure in &entry.sink_errors {
                let _ = write!(
                    html,
                    "<br>{} output failed: {}",
                    encode_text(&failure.sink),
                    encode_text(&failure.message)
                );
            }
            let _ = writeln!(html, "</td><td>{:.3}s</td></tr>", entry.duration_ms as f64 / 1000.0);
        }
        let _ = writeln!(html, "</table>");
    }

    if !manifest.outputs.is_empty() {
        let _ = writeln!(html, "<h2>Run outputs</h2>\n<ul>");
        for output in &manifest.outputs {
            let _ = writeln!(
                html,
                "<li><a href=\"{}\">{}</a></li>",
                encode_double_quoted_attribute(output),
                encode_text(output)
            );
        }
        let _ = writeln!(html, "</ul>");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Write `index.html` for `manifest` to `path`.
pub fn write_index(path: &Path, manifest: &RunManifest) -> Result<PathBuf, SinkError> {
    write_atomic(path, render_index(manifest).as_bytes())?;
    Ok(path.to_path_buf())
}
