use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TIMESTAMP_DISPLAY_FORMAT;
use crate::errors::ContractViolation;

/// A single cell of an artifact table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Render the cell as display text, converting timestamps into `offset`.
    pub fn render(&self, offset: &FixedOffset) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Bytes(b) => BASE64.encode(b),
            Value::Timestamp(ts) => format_timestamp(ts, offset),
        }
    }

    /// Numeric view used for coordinates.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Interpret the cell as an instant.
    ///
    /// Text is accepted as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC),
    /// integers as Unix seconds.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Integer(secs) => Utc.timestamp_opt(*secs, 0).single(),
            Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                            .ok()
                            .map(|naive| naive.and_utc())
                    })
            }
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Text(if b { "true" } else { "false" }.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Format an instant in the run's timezone.
pub fn format_timestamp(ts: &DateTime<Utc>, offset: &FixedOffset) -> String {
    ts.with_timezone(offset).format(TIMESTAMP_DISPLAY_FORMAT).to_string()
}

/// How a column should be treated by the report sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnHint {
    LongText,
    Image,
    Latitude,
    Longitude,
    Timestamp,
}

impl fmt::Display for ColumnHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnHint::LongText => write!(f, "long_text"),
            ColumnHint::Image => write!(f, "image"),
            ColumnHint::Latitude => write!(f, "latitude"),
            ColumnHint::Longitude => write!(f, "longitude"),
            ColumnHint::Timestamp => write!(f, "timestamp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderHint {
    pub column: usize,
    pub kind: ColumnHint,
}

/// A fact about the device under examination, surfaced on the index page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceFact {
    pub category: String,
    pub label: String,
    pub value: String,
    pub source: String,
}

impl DeviceFact {
    pub fn new(category: &str, label: &str, value: impl Into<String>, source: impl Into<String>) -> Self {
        DeviceFact {
            category: category.to_string(),
            label: label.to_string(),
            value: value.into(),
            source: source.into(),
        }
    }
}

/// Tabular output of one extraction routine.
#[derive(Debug, Clone, Default)]
pub struct ArtifactResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub source_paths: Vec<PathBuf>,
    pub hints: Vec<RenderHint>,
    pub device_facts: Vec<DeviceFact>,
    /// Files the routine wrote itself under its report directory
    pub extra_outputs: Vec<PathBuf>,
}

impl ArtifactResult {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        ArtifactResult {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_paths.push(path.into());
        self
    }

    pub fn with_hint(mut self, column: usize, kind: ColumnHint) -> Self {
        self.hints.push(RenderHint { column, kind });
        self
    }

    pub fn add_device_fact(&mut self, fact: DeviceFact) {
        self.device_facts.push(fact);
    }

    /// Column indices carrying the given hint, in declaration order.
    pub fn columns_with(&self, kind: ColumnHint) -> Vec<usize> {
        self.hints
            .iter()
            .filter(|h| h.kind == kind)
            .map(|h| h.column)
            .collect()
    }

    pub fn has_hint(&self, kind: ColumnHint) -> bool {
        self.hints.iter().any(|h| h.kind == kind)
    }

    pub fn column_has_hint(&self, column: usize, kind: ColumnHint) -> bool {
        self.hints.iter().any(|h| h.column == column && h.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check the tabular contract: unique headers, row arity, hint bounds.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.headers.is_empty() {
            return Err(ContractViolation::NoHeaders);
        }

        let mut seen = HashSet::with_capacity(self.headers.len());
        for header in &self.headers {
            if !seen.insert(header.as_str()) {
                return Err(ContractViolation::DuplicateHeader(header.clone()));
            }
        }

        let expected = self.headers.len();
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != expected {
                return Err(ContractViolation::RowArity {
                    row: index,
                    expected,
                    actual: row.len(),
                });
            }
        }

        if let Some(hint) = self.hints.iter().find(|h| h.column >= expected) {
            return Err(ContractViolation::HintOutOfRange {
                column: hint.column,
                columns: expected,
            });
        }

        Ok(())
    }
}

/// Device metadata probed once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os_version: Option<String>,
    pub build_version: Option<String>,
    pub product_name: Option<String>,
}

impl DeviceInfo {
    /// Major OS version, e.g. `17` for "17.4.1".
    pub fn os_major(&self) -> Option<u32> {
        self.os_version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.trim().parse().ok())
    }
}

/// Everything an extraction routine may know about the run.
///
/// Built once by the orchestrator and passed by reference into every plugin
/// invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub evidence_root: PathBuf,
    pub output_dir: PathBuf,
    pub selected: Vec<String>,
    pub device: DeviceInfo,
    pub timezone: FixedOffset,
    pub wrap_text: bool,
    pub concurrency: usize,
}

impl RunContext {
    pub fn report_dir(&self, key: &str) -> PathBuf {
        self.output_dir.join(key)
    }
}

/// Parse a UTC offset such as `UTC`, `+05:30`, `-0400` or `-4`.
pub fn parse_utc_offset(input: &str) -> Result<FixedOffset> {
    let s = input.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid offset"));
    }

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => (1, s),
    };

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h, m)
    } else if rest.len() == 4 && rest.is_ascii() {
        rest.split_at(2)
    } else {
        (rest, "0")
    };

    let hours: i32 = hours
        .parse()
        .map_err(|_| anyhow!("invalid timezone offset '{}'", input))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| anyhow!("invalid timezone offset '{}'", input))?;
    if !(0..=14).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(anyhow!("timezone offset out of range: '{}'", input));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("timezone offset out of range: '{}'", input))
}
