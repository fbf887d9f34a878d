use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use rusqlite::{Connection, OpenFlags};

use crate::artifacts::labels::ROUTINED_LABELS;
use crate::constants::COCOA_EPOCH_OFFSET_SECS;
use crate::dispatch::{ArtifactPlugin, ExtractionContext};
use crate::models::{ArtifactResult, ColumnHint, Value};
use crate::registry::ArtifactDescriptor;

pub const KEY: &str = "routinedCacheLocations";

const QUERY: &str = "
SELECT ZTIMESTAMP, ZLATITUDE, ZLONGITUDE, ZHORIZONTALACCURACY, ZSIGNALENVIRONMENTTYPE
FROM ZRTCLLOCATIONMO
ORDER BY ZTIMESTAMP, Z_PK";

pub fn descriptor() -> ArtifactDescriptor {
    ArtifactDescriptor::new(KEY, "Routined Cache Locations", "Locations")
        .description("Location fixes cached by routined in Cache.sqlite")
        .paths(&["*/private/var/mobile/Library/Caches/com.apple.routined/Cache.sqlite"])
        .schema_hint("iOS 10-12: two-level signal environment")
        .schema_hint("iOS 13+: four-level signal environment")
        .version("0.3")
}

/// Convert Cocoa (Mac absolute) seconds to a UTC instant.
pub fn cocoa_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    let secs = (whole as i64).checked_add(COCOA_EPOCH_OFFSET_SECS)?;
    Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("Failed to open {}", path.display()))
}

pub struct RoutinedCacheLocations;

impl ArtifactPlugin for RoutinedCacheLocations {
    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<ArtifactResult> {
        let os_major = ctx.run.device.os_major();
        let mut result = ArtifactResult::new(&[
            "Timestamp",
            "Latitude",
            "Longitude",
            "Horizontal Accuracy",
            "Signal Environment",
        ])
        .with_hint(0, ColumnHint::Timestamp)
        .with_hint(1, ColumnHint::Latitude)
        .with_hint(2, ColumnHint::Longitude);

        for path in ctx.files {
            let conn = open_read_only(path)?;
            let mut stmt = conn
                .prepare(QUERY)
                .with_context(|| format!("Failed to query ZRTCLLOCATIONMO in {}", path.display()))?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?;

            let before = result.rows.len();
            for row in rows {
                let (timestamp, latitude, longitude, accuracy, signal) = row?;
                result.push_row(vec![
                    timestamp.and_then(cocoa_to_utc).into(),
                    latitude.into(),
                    longitude.into(),
                    accuracy.into(),
                    signal
                        .map(|code| ROUTINED_LABELS.label_or_code("ZSIGNALENVIRONMENTTYPE", os_major, code))
                        .into(),
                ]);
            }
            debug!("{}: {} rows from {}", KEY, result.rows.len() - before, path.display());
            result.source_paths.push(path.clone());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::EvidenceLocator;
    use crate::models::DeviceInfo;
    use crate::test_utils::fixtures::write_routined_cache;
    use crate::test_utils::test_run_context;
    use tempfile::TempDir;

    #[test]
    fn test_cocoa_to_utc() {
        let expected = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(cocoa_to_utc(0.0), Some(expected));
        let later = cocoa_to_utc(736_000_000.5).unwrap();
        assert_eq!(later.timestamp(), 736_000_000 + COCOA_EPOCH_OFFSET_SECS);
        assert_eq!(later.timestamp_subsec_millis(), 500);
        assert_eq!(cocoa_to_utc(f64::NAN), None);
        assert_eq!(cocoa_to_utc(1e30), None);
        assert_eq!(cocoa_to_utc(-1e30), None);
        assert_eq!(cocoa_to_utc(i64::MAX as f64), None);
    }

    #[test]
    fn test_extract_labels_and_hints() {
        let temp_dir = TempDir::new().unwrap();
        let mut run = test_run_context(temp_dir.path());
        run.device = DeviceInfo {
            os_version: Some("17.1".to_string()),
            ..Default::default()
        };
        write_routined_cache(
            &run.evidence_root,
            &[
                (736_000_100.0, 37.33, -122.03, 10.0, 3),
                (736_000_000.0, -180.0, -180.0, -1.0, 0),
            ],
        );
        let locator = EvidenceLocator::open_directory(&run.evidence_root, &[]).unwrap();
        let files = locator.resolve(&descriptor().paths).unwrap();
        assert_eq!(files.len(), 1);

        let ctx = ExtractionContext {
            key: KEY,
            files: &files,
            report_dir: temp_dir.path(),
            locator: &locator,
            run: &run,
        };
        let result = RoutinedCacheLocations.extract(&ctx).unwrap();

        assert!(result.validate().is_ok());
        assert_eq!(result.rows.len(), 2);
        // Ordered by timestamp
        assert_eq!(result.rows[0][1], Value::Real(-180.0));
        assert_eq!(result.rows[1][4], Value::from("Urban"));
        assert_eq!(result.columns_with(ColumnHint::Timestamp), vec![0]);
        assert_eq!(result.source_paths, files);
    }

    #[test]
    fn test_missing_table_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let path = run.evidence_root.join("Cache.sqlite");
        std::fs::create_dir_all(&run.evidence_root).unwrap();
        Connection::open(&path).unwrap().execute_batch("CREATE TABLE other (x);").unwrap();
        let locator = EvidenceLocator::open_directory(&run.evidence_root, &[]).unwrap();

        let files = vec![path];
        let ctx = ExtractionContext {
            key: KEY,
            files: &files,
            report_dir: temp_dir.path(),
            locator: &locator,
            run: &run,
        };
        assert!(RoutinedCacheLocations.extract(&ctx).is_err());
    }
}
