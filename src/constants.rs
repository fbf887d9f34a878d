//! Global constants for the report pipeline.
//!
//! This module centralizes hardcoded values: output layout names, rendering
//! limits and format strings.

// Output layout
/// Run manifest file name, written at the output root
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Cross-artifact index page
pub const INDEX_FILE_NAME: &str = "index.html";

/// Run log written next to the reports
pub const RUN_LOG_FILE_NAME: &str = "run.log";

/// Directory holding the consolidated timeline
pub const TIMELINE_DIR_NAME: &str = "_Timeline";
pub const TIMELINE_FILE_NAME: &str = "timeline.tsv";

/// Directory holding KML exports
pub const KML_DIR_NAME: &str = "_KML Exports";
pub const KML_COMBINED_FILE_NAME: &str = "all_locations.kml";

/// Default case database file name
pub const CASE_DB_FILE_NAME: &str = "case.db";

/// Directory archive entries are extracted into
pub const ARCHIVE_EXTRACT_DIR_NAME: &str = "_Evidence";

// Rendering
/// Rows per HTML page before paginating
pub const DEFAULT_HTML_PAGE_SIZE: usize = 1000;

/// Largest blob rendered inline as an image (256KB)
pub const DEFAULT_MAX_INLINE_IMAGE_BYTES: usize = 256 * 1024;

/// Display format for timestamps converted to the run's offset
pub const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

/// Coordinate value artifacts use for "unset"
pub const DEFAULT_COORDINATE_SENTINELS: &[f64] = &[-180.0];

/// Seconds between the Unix epoch and the Cocoa epoch (2001-01-01)
pub const COCOA_EPOCH_OFFSET_SECS: i64 = 978_307_200;

// Hashing
/// Largest source file hashed for the manifest (in MB)
pub const DEFAULT_HASH_MAX_SIZE_MB: u64 = 512;

/// Upper bound on concurrently running artifacts
pub const MAX_CONCURRENCY: usize = 32;

// Device probe
/// Pattern of the plist the device metadata probe reads
pub const SYSTEM_VERSION_PATTERN: &str = "*/System/Library/CoreServices/SystemVersion.plist";
