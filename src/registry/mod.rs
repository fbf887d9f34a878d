//! Static catalog of extraction routines.
//!
//! Artifacts are registered once through a [`RegistryBuilder`]; the built
//! [`ArtifactRegistry`] has no mutation API.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{OutputKind, OutputKinds};
use crate::dispatch::ArtifactPlugin;
use crate::errors::RegistryError;

/// Immutable description of one extraction routine
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDescriptor {
    pub key: String,
    pub name: String,
    pub description: String,
    /// Glob patterns relative to the evidence root
    pub paths: Vec<String>,
    pub category: String,
    pub output_kinds: OutputKinds,
    /// Schema versions the routine knows how to read, e.g. "iOS 13-17"
    pub schema_hints: Vec<String>,
    /// False for pseudo-artifacts built from the run context alone
    pub requires_files: bool,
    pub author: String,
    pub version: String,
}

impl ArtifactDescriptor {
    pub fn new(key: &str, name: &str, category: &str) -> Self {
        ArtifactDescriptor {
            key: key.to_string(),
            name: name.to_string(),
            description: String::new(),
            paths: Vec::new(),
            category: category.to_string(),
            output_kinds: OutputKinds::all(),
            schema_hints: Vec::new(),
            requires_files: true,
            author: String::new(),
            version: "0.1".to_string(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn paths(mut self, paths: &[&str]) -> Self {
        self.paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn output_kinds(mut self, kinds: OutputKinds) -> Self {
        self.output_kinds = kinds;
        self
    }

    pub fn schema_hint(mut self, hint: &str) -> Self {
        self.schema_hints.push(hint.to_string());
        self
    }

    pub fn without_files(mut self) -> Self {
        self.requires_files = false;
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn accepts(&self, kind: OutputKind) -> bool {
        self.output_kinds.contains(kind)
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.key, self.name, self.category)
    }
}

/// A descriptor paired with the routine that implements it
#[derive(Clone)]
pub struct RegisteredArtifact {
    pub descriptor: ArtifactDescriptor,
    pub plugin: Arc<dyn ArtifactPlugin>,
}

impl fmt::Debug for RegisteredArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredArtifact")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Narrows `list` to a subset of artifacts. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub keys: Vec<String>,
    pub categories: Vec<String>,
    pub output_kind: Option<OutputKind>,
}

impl ArtifactFilter {
    pub fn keys<S: AsRef<str>>(keys: &[S]) -> Self {
        ArtifactFilter {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn categories<S: AsRef<str>>(categories: &[S]) -> Self {
        ArtifactFilter {
            categories: categories.iter().map(|c| c.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_output_kind(mut self, kind: OutputKind) -> Self {
        self.output_kind = Some(kind);
        self
    }

    fn matches(&self, descriptor: &ArtifactDescriptor) -> bool {
        if !self.keys.is_empty() && !self.keys.iter().any(|k| k == &descriptor.key) {
            return false;
        }
        if !self.categories.is_empty()
            && !self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&descriptor.category))
        {
            return false;
        }
        match self.output_kind {
            Some(kind) => descriptor.accepts(kind),
            None => true,
        }
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    artifacts: BTreeMap<String, RegisteredArtifact>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact; fails on a duplicate key or a file artifact without paths.
    pub fn register(
        &mut self,
        descriptor: ArtifactDescriptor,
        plugin: Arc<dyn ArtifactPlugin>,
    ) -> Result<&mut Self, RegistryError> {
        if descriptor.key.trim().is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if descriptor.requires_files && descriptor.paths.is_empty() {
            return Err(RegistryError::MissingPaths(descriptor.key));
        }
        if self.artifacts.contains_key(&descriptor.key) {
            return Err(RegistryError::DuplicateKey(descriptor.key));
        }

        self.artifacts
            .insert(descriptor.key.clone(), RegisteredArtifact { descriptor, plugin });
        Ok(self)
    }

    pub fn build(self) -> ArtifactRegistry {
        ArtifactRegistry {
            artifacts: self.artifacts,
        }
    }
}

/// Read-only artifact catalog, ordered by key
pub struct ArtifactRegistry {
    artifacts: BTreeMap<String, RegisteredArtifact>,
}

impl ArtifactRegistry {
    pub fn get(&self, key: &str) -> Result<&RegisteredArtifact, RegistryError> {
        self.artifacts
            .get(key)
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))
    }

    pub fn descriptor(&self, key: &str) -> Result<&ArtifactDescriptor, RegistryError> {
        self.get(key).map(|artifact| &artifact.descriptor)
    }

    /// Descriptors matching `filter`, sorted by key.
    pub fn list(&self, filter: &ArtifactFilter) -> Vec<&ArtifactDescriptor> {
        self.artifacts
            .values()
            .map(|artifact| &artifact.descriptor)
            .filter(|descriptor| filter.matches(descriptor))
            .collect()
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .artifacts
            .values()
            .map(|a| a.descriptor.category.as_str())
            .collect();
        set.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ExtractionContext;
    use crate::models::ArtifactResult;

    struct NoopPlugin;

    impl ArtifactPlugin for NoopPlugin {
        fn extract(&self, _ctx: &ExtractionContext<'_>) -> anyhow::Result<ArtifactResult> {
            Ok(ArtifactResult::new(&["Key"]))
        }
    }

    fn descriptor(key: &str, category: &str) -> ArtifactDescriptor {
        ArtifactDescriptor::new(key, key, category).paths(&["*/file.db"])
    }

    fn sample_registry() -> ArtifactRegistry {
        let mut builder = RegistryBuilder::new();
        builder
            .register(descriptor("zeta", "Locations"), Arc::new(NoopPlugin))
            .unwrap()
            .register(
                descriptor("alpha", "Identifiers")
                    .output_kinds(OutputKinds::only(&[OutputKind::Html, OutputKind::Tsv])),
                Arc::new(NoopPlugin),
            )
            .unwrap()
            .register(descriptor("mid", "locations"), Arc::new(NoopPlugin))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(descriptor("adId", "Identifiers"), Arc::new(NoopPlugin))
            .unwrap();
        let result = builder.register(descriptor("adId", "Other"), Arc::new(NoopPlugin));
        assert!(matches!(result, Err(RegistryError::DuplicateKey(key)) if key == "adId"));
    }

    #[test]
    fn test_missing_paths_rejected_unless_fileless() {
        let mut builder = RegistryBuilder::new();
        let result = builder.register(
            ArtifactDescriptor::new("broken", "Broken", "Misc"),
            Arc::new(NoopPlugin),
        );
        assert!(matches!(result, Err(RegistryError::MissingPaths(_))));

        let result = builder.register(
            ArtifactDescriptor::new("deviceInfo", "Device Info", "Device Info").without_files(),
            Arc::new(NoopPlugin),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut builder = RegistryBuilder::new();
        let result = builder.register(descriptor("  ", "Misc"), Arc::new(NoopPlugin));
        assert!(matches!(result, Err(RegistryError::EmptyKey)));
    }

    #[test]
    fn test_get_and_not_found() {
        let registry = sample_registry();
        assert_eq!(registry.get("alpha").unwrap().descriptor.category, "Identifiers");
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let registry = sample_registry();

        let keys: Vec<&str> = registry
            .list(&ArtifactFilter::default())
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);

        let keys: Vec<&str> = registry
            .list(&ArtifactFilter::categories(&["LOCATIONS"]))
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(keys, vec!["mid", "zeta"]);

        let keys: Vec<&str> = registry
            .list(&ArtifactFilter::default().with_output_kind(OutputKind::Kml))
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(keys, vec!["mid", "zeta"]);

        let keys: Vec<&str> = registry
            .list(&ArtifactFilter::keys(&["zeta", "alpha"]))
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_categories() {
        let registry = sample_registry();
        assert_eq!(registry.categories(), vec!["Identifiers", "Locations", "locations"]);
        assert_eq!(registry.len(), 3);
    }
}
