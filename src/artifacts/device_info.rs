use anyhow::Result;

use crate::config::{OutputKind, OutputKinds};
use crate::dispatch::{ArtifactPlugin, ExtractionContext};
use crate::models::ArtifactResult;
use crate::registry::ArtifactDescriptor;

pub const KEY: &str = "deviceInfo";

pub fn descriptor() -> ArtifactDescriptor {
    ArtifactDescriptor::new(KEY, "Device Information", "Device Info")
        .description("Device metadata probed at the start of the run")
        .output_kinds(OutputKinds::only(&[OutputKind::Html, OutputKind::Tsv, OutputKind::CaseDb]))
        .without_files()
}

/// Tabulates the run context; reads no evidence of its own.
pub struct DeviceInfoReport;

impl ArtifactPlugin for DeviceInfoReport {
    fn extract(&self, ctx: &ExtractionContext<'_>) -> Result<ArtifactResult> {
        let device = &ctx.run.device;
        let mut result = ArtifactResult::new(&["Property", "Value"]);

        result.push_row(vec!["Product Name".into(), device.product_name.clone().into()]);
        result.push_row(vec!["OS Version".into(), device.os_version.clone().into()]);
        result.push_row(vec!["Build Version".into(), device.build_version.clone().into()]);
        result.push_row(vec![
            "Evidence Root".into(),
            ctx.run.evidence_root.display().to_string().into(),
        ]);
        result.push_row(vec!["Report Timezone".into(), ctx.run.timezone.to_string().into()]);

        Ok(result)
    }
}
