use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;
use plist::Value as PlistValue;

use crate::artifacts::plist_cell;
use crate::config::{OutputKind, OutputKinds};
use crate::constants::SYSTEM_VERSION_PATTERN;
use crate::dispatch::{ArtifactPlugin, ExtractionContext};
use crate::models::{ArtifactResult, DeviceFact, DeviceInfo};
use crate::registry::ArtifactDescriptor;

pub const KEY: &str = "systemVersionPlist";

pub fn descriptor() -> ArtifactDescriptor {
    ArtifactDescriptor::new(KEY, "System Version plist", "IOS Build")
        .description(
            "Basic data from the acquisition's SystemVersion.plist, including the iOS version \
             of the device being analyzed",
        )
        .paths(&[SYSTEM_VERSION_PATTERN])
        .output_kinds(OutputKinds::only(&[OutputKind::Html, OutputKind::Tsv, OutputKind::CaseDb]))
        .author("Scott Koenig")
        .version("1.1")
}

fn read_dictionary(path: &Path) -> Result<plist::Dictionary> {
    let value = PlistValue::from_file(path)
        .with_context(|| format!("Failed to read plist {}", path.display()))?;
    value
        .into_dictionary()
        .ok_or_else(|| anyhow!("{} is not a dictionary plist", path.display()))
}

/// Device metadata from a SystemVersion.plist.
pub fn read_device_info(path: &Path) -> Result<DeviceInfo> {
    let dict = read_dictionary(path)?;
    let text = |key: &str| dict.get(key).and_then(|v| v.as_string()).map(str::to_string);

    Ok(DeviceInfo {
        os_version: text("ProductVersion"),
        build_version: text("ProductBuildVersion"),
        product_name: text("ProductName"),
    })
}

pub struct SystemVersionPlist;

impl ArtifactPlugin for SystemVersionPlist {
    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<ArtifactResult> {
        let path = ctx
            .first_file()
            .ok_or_else(|| anyhow!("no SystemVersion.plist resolved"))?;
        let source = path.display().to_string();
        let dict = read_dictionary(path)?;

        let mut result = ArtifactResult::new(&["Property", "Property Value"]).with_source(path);
        for (key, value) in dict.iter() {
            result.push_row(vec![key.as_str().into(), plist_cell(value)]);

            let Some(text) = value.as_string() else {
                continue;
            };
            match key.as_str() {
                "ProductBuildVersion" => {
                    result.add_device_fact(DeviceFact::new("Device Information", "ProductBuildVersion", text, &source))
                }
                "ProductVersion" => {
                    info!("iOS version: {}", text);
                    result.add_device_fact(DeviceFact::new("Device Information", "iOS version", text, &source))
                }
                "ProductName" => {
                    result.add_device_fact(DeviceFact::new("Device Information", "Product Name", text, &source))
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::EvidenceLocator;
    use crate::test_utils::fixtures::write_system_version;
    use crate::test_utils::test_run_context;
    use tempfile::TempDir;

    #[test]
    fn test_read_device_info() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_system_version(temp_dir.path(), "17.4.1", "21E236");

        let device = read_device_info(&path).unwrap();
        assert_eq!(device.os_version.as_deref(), Some("17.4.1"));
        assert_eq!(device.build_version.as_deref(), Some("21E236"));
        assert_eq!(device.product_name.as_deref(), Some("iPhone OS"));
        assert_eq!(device.os_major(), Some(17));
    }

    #[test]
    fn test_extract_rows_and_facts() {
        let temp_dir = TempDir::new().unwrap();
        let run = test_run_context(temp_dir.path());
        let path = write_system_version(&run.evidence_root, "16.2", "20C65");
        let locator = EvidenceLocator::open_directory(&run.evidence_root, &[]).unwrap();

        let files = vec![path.clone()];
        let ctx = ExtractionContext {
            key: KEY,
            files: &files,
            report_dir: temp_dir.path(),
            locator: &locator,
            run: &run,
        };
        let result = SystemVersionPlist.extract(&ctx).unwrap();

        assert_eq!(result.headers, vec!["Property", "Property Value"]);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.device_facts.len(), 3);
        assert!(result
            .device_facts
            .iter()
            .any(|f| f.label == "iOS version" && f.value == "16.2"));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_not_a_plist_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("SystemVersion.plist");
        std::fs::write(&path, b"definitely not a plist").unwrap();
        assert!(read_device_info(&path).is_err());
    }
}
