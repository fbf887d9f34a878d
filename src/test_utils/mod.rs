//! Test utilities for the report pipeline
//!
//! Shared fixtures: run contexts, descriptors and small evidence trees.

#![cfg(test)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;

use crate::models::{DeviceInfo, RunContext};
use crate::registry::ArtifactDescriptor;

/// Run context rooted in `dir`: evidence under `evidence/`, reports under `out/`
pub fn test_run_context(dir: &Path) -> RunContext {
    RunContext {
        evidence_root: dir.join("evidence"),
        output_dir: dir.join("out"),
        selected: Vec::new(),
        device: DeviceInfo::default(),
        timezone: FixedOffset::east_opt(0).unwrap(),
        wrap_text: false,
        concurrency: 2,
    }
}

/// Descriptor with a single catch-all path pattern
pub fn sample_descriptor(key: &str, category: &str) -> ArtifactDescriptor {
    let pattern = format!("*/{}.db", key);
    ArtifactDescriptor::new(key, key, category).paths(&[pattern.as_str()])
}

/// Builders for evidence files the built-in artifacts read
pub mod fixtures {
    use super::*;
    use plist::{Dictionary, Value as PlistValue};
    use rusqlite::{params, Connection};

    fn ensure_parent(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
    }

    /// Write an XML plist holding the given string keys
    pub fn write_plist(path: &Path, entries: &[(&str, &str)]) {
        ensure_parent(path);
        let mut dict = Dictionary::new();
        for (key, value) in entries {
            dict.insert(key.to_string(), PlistValue::String(value.to_string()));
        }
        PlistValue::Dictionary(dict).to_file_xml(path).unwrap();
    }

    pub fn write_system_version(root: &Path, version: &str, build: &str) -> PathBuf {
        let path = root.join("fs/System/Library/CoreServices/SystemVersion.plist");
        write_plist(
            &path,
            &[
                ("ProductName", "iPhone OS"),
                ("ProductVersion", version),
                ("ProductBuildVersion", build),
            ],
        );
        path
    }

    pub fn write_ad_id(root: &Path, identifier: &str) -> PathBuf {
        let path = root.join(
            "fs/private/var/containers/Shared/SystemGroup/8B5E7E1A/Library/Caches/com.apple.lsdidentifiers.plist",
        );
        write_plist(&path, &[("LSAdvertiserIdentifier", identifier)]);
        path
    }

    /// Create a routined cache with `(cocoa_seconds, lat, lon, accuracy, signal)` rows
    pub fn write_routined_cache(root: &Path, rows: &[(f64, f64, f64, f64, i64)]) -> PathBuf {
        let path = root.join("fs/private/var/mobile/Library/Caches/com.apple.routined/Cache.sqlite");
        ensure_parent(&path);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ZRTCLLOCATIONMO (
                Z_PK INTEGER PRIMARY KEY,
                ZTIMESTAMP REAL,
                ZLATITUDE REAL,
                ZLONGITUDE REAL,
                ZHORIZONTALACCURACY REAL,
                ZSIGNALENVIRONMENTTYPE INTEGER
            );",
        )
        .unwrap();
        for row in rows {
            conn.execute(
                "INSERT INTO ZRTCLLOCATIONMO
                 (ZTIMESTAMP, ZLATITUDE, ZLONGITUDE, ZHORIZONTALACCURACY, ZSIGNALENVIRONMENTTYPE)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.0, row.1, row.2, row.3, row.4],
            )
            .unwrap();
        }
        path
    }
}
