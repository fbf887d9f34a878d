use anyhow::{anyhow, Context, Result};
use log::info;
use plist::Value as PlistValue;

use crate::artifacts::plist_cell;
use crate::dispatch::{ArtifactPlugin, ExtractionContext};
use crate::models::{ArtifactResult, DeviceFact};
use crate::registry::ArtifactDescriptor;

pub const KEY: &str = "adId";

pub fn descriptor() -> ArtifactDescriptor {
    ArtifactDescriptor::new(KEY, "Advertiser Identifier", "Identifiers")
        .description("Advertiser Identifier of the device")
        .paths(&["*/containers/Shared/SystemGroup/*/Library/Caches/com.apple.lsdidentifiers.plist"])
        .author("@AlexisBrignoni")
        .version("0.2")
}

pub struct AdvertiserId;

impl ArtifactPlugin for AdvertiserId {
    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<ArtifactResult> {
        let path = ctx
            .first_file()
            .ok_or_else(|| anyhow!("no lsdidentifiers plist resolved"))?;
        let source = path.display().to_string();

        let dict = PlistValue::from_file(path)
            .with_context(|| format!("Failed to read plist {}", source))?
            .into_dictionary()
            .ok_or_else(|| anyhow!("{} is not a dictionary plist", source))?;

        let mut result = ArtifactResult::new(&["Key", "Data"]).with_source(path);
        if dict.is_empty() {
            info!("No Advertiser Identifier available");
            return Ok(result);
        }

        if let Some(value) = dict.get("LSAdvertiserIdentifier") {
            let cell = plist_cell(value);
            if let Some(identifier) = value.as_string() {
                result.add_device_fact(DeviceFact::new(
                    "Device Information",
                    "Advertiser Identifier",
                    identifier,
                    &source,
                ));
            }
            result.push_row(vec!["Advertiser Identifier".into(), cell]);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::EvidenceLocator;
    use crate::models::Value;
    use crate::test_utils::fixtures::{write_ad_id, write_plist};
    use crate::test_utils::test_run_context;
    use tempfile::TempDir;

    #[test]
    fn test_pattern_resolves_and_extracts() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        write_ad_id(&run.evidence_root, "3F1C9A2E-0000-4000-8000-0123456789AB");
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
        let result = AdvertiserId.extract(&ctx).unwrap();
        assert_eq!(
            result.rows,
            vec![vec![
                Value::from("Advertiser Identifier"),
                Value::from("3F1C9A2E-0000-4000-8000-0123456789AB")
            ]]
        );
        assert_eq!(result.device_facts[0].label, "Advertiser Identifier");
    }

    #[test]
    fn test_empty_plist_yields_no_rows() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let path = run.evidence_root.join("empty.plist");
        write_plist(&path, &[]);
        let locator = EvidenceLocator::open_directory(&run.evidence_root, &[]).unwrap();

        let files = vec![path];
        let ctx = ExtractionContext {
            key: KEY,
            files: &files,
            report_dir: temp_dir.path(),
            locator: &locator,
            run: &run,
        };
        let result = AdvertiserId.extract(&ctx).unwrap();
        assert!(result.rows.is_empty());
        assert!(result.device_facts.is_empty());
    }
}
