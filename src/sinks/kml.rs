use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::FixedOffset;
use html_escape::encode_text;
use log::{debug, info};

use crate::config::OutputKind;
use crate::constants::{KML_COMBINED_FILE_NAME, KML_DIR_NAME};
use crate::errors::SinkError;
use crate::models::{ArtifactResult, ColumnHint, RunContext};
use crate::sinks::atomic::write_atomic;
use crate::sinks::{ReportSink, SinkMeta, SinkOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Geospatial export of latitude/longitude-hinted columns.
pub struct KmlSink {
    sentinels: Vec<f64>,
    placemarks: Mutex<BTreeMap<String, Vec<Placemark>>>,
}

impl KmlSink {
    pub fn new(sentinels: Vec<f64>) -> Self {
        KmlSink {
            sentinels,
            placemarks: Mutex::new(BTreeMap::new()),
        }
    }

    /// A coordinate pair worth plotting: finite, in range, not a sentinel.
    pub fn is_valid_coordinate(&self, latitude: f64, longitude: f64) -> bool {
        if !latitude.is_finite() || !longitude.is_finite() {
            return false;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return false;
        }
        !self
            .sentinels
            .iter()
            .any(|s| *s == latitude || *s == longitude)
    }

    fn placemarks_for(&self, result: &ArtifactResult, key: &str, offset: &FixedOffset) -> Vec<Placemark> {
        let (Some(&lat_col), Some(&lon_col)) = (
            result.columns_with(ColumnHint::Latitude).first(),
            result.columns_with(ColumnHint::Longitude).first(),
        ) else {
            return Vec::new();
        };
        let name_col = result.columns_with(ColumnHint::Timestamp).first().copied();

        let mut placemarks = Vec::new();
        for (index, row) in result.rows.iter().enumerate() {
            let (Some(latitude), Some(longitude)) = (row[lat_col].as_f64(), row[lon_col].as_f64()) else {
                continue;
            };
            if !self.is_valid_coordinate(latitude, longitude) {
                continue;
            }

            let name = name_col
                .map(|col| row[col].render(offset))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("{} row {}", key, index + 1));
            let description: Vec<String> = result
                .headers
                .iter()
                .zip(row.iter())
                .filter(|(_, value)| !value.is_null())
                .map(|(header, value)| format!("{}: {}", header, value.render(offset)))
                .collect();

            placemarks.push(Placemark {
                name,
                description: description.join("\n"),
                latitude,
                longitude,
            });
        }
        placemarks
    }
}

fn push_placemarks(kml: &mut String, placemarks: &[Placemark]) {
    for placemark in placemarks {
        let _ = writeln!(
            kml,
            "<Placemark><name>{}</name><description>{}</description><Point><coordinates>{},{}</coordinates></Point></Placemark>",
            encode_text(&placemark.name),
            encode_text(&placemark.description),
            placemark.longitude,
            placemark.latitude
        );
    }
}

fn document(name: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n<Document>\n<name>{}</name>\n{}</Document>\n</kml>\n",
        encode_text(name),
        body
    )
}

fn poisoned() -> SinkError {
    SinkError::Rejected("KML collector lock poisoned".to_string())
}

impl ReportSink for KmlSink {
    fn name(&self) -> &'static str {
        "kml"
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Kml
    }

    fn write(&self, result: &ArtifactResult, meta: &SinkMeta<'_>) -> Result<SinkOutcome, SinkError> {
        let key = meta.key();
        let placemarks = self.placemarks_for(result, key, &meta.run.timezone);
        if placemarks.is_empty() {
            return Ok(SinkOutcome::none());
        }

        let mut body = String::new();
        push_placemarks(&mut body, &placemarks);
        let path = meta
            .run
            .output_dir
            .join(KML_DIR_NAME)
            .join(format!("{}.kml", key));
        write_atomic(&path, document(key, &body).as_bytes())?;
        debug!("Wrote {} placemarks for {}", placemarks.len(), key);

        self.placemarks
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), placemarks);
        Ok(SinkOutcome::written(vec![path]))
    }

    fn finalize(&self, run: &RunContext) -> Result<Vec<PathBuf>, SinkError> {
        let placemarks = self.placemarks.lock().map_err(|_| poisoned())?;
        if placemarks.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = String::new();
        let mut total = 0;
        for (key, marks) in placemarks.iter() {
            let _ = writeln!(body, "<Folder>\n<name>{}</name>", encode_text(key));
            push_placemarks(&mut body, marks);
            body.push_str("</Folder>\n");
            total += marks.len();
        }

        let path = run.output_dir.join(KML_DIR_NAME).join(KML_COMBINED_FILE_NAME);
        write_atomic(&path, document("All locations", &body).as_bytes())?;
        info!("Wrote {} placemarks to {}", total, path.display());
        Ok(vec![path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use crate::test_utils::{sample_descriptor, test_run_context};
    use std::fs;
    use tempfile::TempDir;

    fn located(rows: &[(f64, f64)]) -> ArtifactResult {
        let mut result = ArtifactResult::new(&["Timestamp", "Latitude", "Longitude"])
            .with_hint(0, ColumnHint::Timestamp)
            .with_hint(1, ColumnHint::Latitude)
            .with_hint(2, ColumnHint::Longitude);
        for (lat, lon) in rows {
            result.push_row(vec!["2024-05-01 08:00:00".into(), Value::Real(*lat), Value::Real(*lon)]);
        }
        result
    }

    #[test]
    fn test_coordinate_validation() {
        let sink = KmlSink::new(vec![-180.0]);
        assert!(sink.is_valid_coordinate(51.5, -0.12));
        assert!(!sink.is_valid_coordinate(-180.0, -180.0));
        assert!(!sink.is_valid_coordinate(45.0, -180.0));
        assert!(!sink.is_valid_coordinate(91.0, 10.0));
        assert!(!sink.is_valid_coordinate(f64::NAN, 10.0));
        assert!(!sink.is_valid_coordinate(10.0, f64::INFINITY));
    }

    #[test]
    fn test_sentinels_never_emitted() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let sink = KmlSink::new(vec![-180.0]);
        let descriptor = sample_descriptor("locs", "Locations");

        let result = located(&[(37.33, -122.03), (-180.0, -180.0), (40.7, 200.0)]);
        let outcome = sink.write(&result, &SinkMeta { descriptor: &descriptor, run: &run }).unwrap();

        let path = run.output_dir.join("_KML Exports/locs.kml");
        assert_eq!(outcome.files, vec![path.clone()]);
        let kml = fs::read_to_string(&path).unwrap();
        assert_eq!(kml.matches("<Placemark>").count(), 1);
        assert!(kml.contains("<coordinates>-122.03,37.33</coordinates>"));
        assert!(kml.contains("<name>2024-05-01 08:00:00</name>"));
        assert!(!kml.contains("-180"));
    }

    #[test]
    fn test_combined_export_has_folder_per_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let sink = KmlSink::new(vec![-180.0]);

        let b = sample_descriptor("b_locs", "Locations");
        let a = sample_descriptor("a_locs", "Locations");
        sink.write(&located(&[(1.0, 2.0)]), &SinkMeta { descriptor: &b, run: &run }).unwrap();
        sink.write(&located(&[(3.0, 4.0), (5.0, 6.0)]), &SinkMeta { descriptor: &a, run: &run }).unwrap();

        let files = sink.finalize(&run).unwrap();
        let kml = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(kml.matches("<Folder>").count(), 2);
        assert_eq!(kml.matches("<Placemark>").count(), 3);
        assert!(kml.find("a_locs").unwrap() < kml.find("b_locs").unwrap());
    }

    #[test]
    fn test_no_geo_hints_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let sink = KmlSink::new(vec![-180.0]);
        let descriptor = sample_descriptor("plain", "Test");

        let mut result = ArtifactResult::new(&["Latitude"]);
        result.push_row(vec![Value::Real(1.0)]);
        let outcome = sink.write(&result, &SinkMeta { descriptor: &descriptor, run: &run }).unwrap();
        assert!(outcome.files.is_empty());
        assert!(sink.finalize(&run).unwrap().is_empty());
    }
}
