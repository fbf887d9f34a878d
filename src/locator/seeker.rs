use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

#[cfg(feature = "archive_evidence")]
use crate::locator::archive::ArchiveEvidence;
use crate::config::LayoutRewrite;
use crate::errors::LocatorError;
use crate::locator::pattern::{glob_to_regex, layout_variants};

/// What kind of container the evidence root is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Directory,
    Archive,
}

enum Source {
    Directory,
    #[cfg(feature = "archive_evidence")]
    Archive(ArchiveEvidence),
}

/// Read-only index over an evidence root, resolving artifact path patterns
/// to concrete files.
pub struct EvidenceLocator {
    root: PathBuf,
    source: Source,
    /// Relative, '/'-separated file paths, sorted
    index: Vec<String>,
    rewrites: Vec<LayoutRewrite>,
}

impl EvidenceLocator {
    /// Index a directory evidence root.
    pub fn open_directory(root: &Path, rewrites: &[LayoutRewrite]) -> Result<Self, LocatorError> {
        if !root.is_dir() {
            return Err(LocatorError::MissingRoot(root.to_path_buf()));
        }

        let mut index = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                // The root itself must be readable; nested failures only cost their subtree
                Err(e) if e.depth() == 0 => {
                    return Err(LocatorError::Index {
                        path: root.to_path_buf(),
                        source: e,
                    })
                }
                Err(e) => {
                    warn!("Skipping unreadable evidence entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = relative_string(entry.path(), root) {
                index.push(rel);
            }
        }
        index.sort();

        info!("Indexed {} evidence files under {}", index.len(), root.display());
        Ok(EvidenceLocator {
            root: root.to_path_buf(),
            source: Source::Directory,
            index,
            rewrites: rewrites.to_vec(),
        })
    }

    /// Index a ZIP container; matched entries are extracted below `extract_dir`.
    #[cfg(feature = "archive_evidence")]
    pub fn open_archive(
        archive_path: &Path,
        extract_dir: &Path,
        rewrites: &[LayoutRewrite],
    ) -> Result<Self, LocatorError> {
        if !archive_path.is_file() {
            return Err(LocatorError::MissingRoot(archive_path.to_path_buf()));
        }

        let archive = ArchiveEvidence::open(archive_path, extract_dir)?;
        let mut index: Vec<String> = archive.entry_names().cloned().collect();
        index.sort();

        info!("Indexed {} archive entries in {}", index.len(), archive_path.display());
        Ok(EvidenceLocator {
            root: archive_path.to_path_buf(),
            source: Source::Archive(archive),
            index,
            rewrites: rewrites.to_vec(),
        })
    }

    /// Open whatever `root` is: a directory, or a `.zip` container.
    pub fn open(root: &Path, extract_dir: &Path, rewrites: &[LayoutRewrite]) -> Result<Self, LocatorError> {
        #[cfg(feature = "archive_evidence")]
        {
            let is_zip = root
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);
            if root.is_file() && is_zip {
                return Self::open_archive(root, extract_dir, rewrites);
            }
        }
        #[cfg(not(feature = "archive_evidence"))]
        let _ = extract_dir;

        Self::open_directory(root, rewrites)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> EvidenceKind {
        match self.source {
            Source::Directory => EvidenceKind::Directory,
            #[cfg(feature = "archive_evidence")]
            Source::Archive(_) => EvidenceKind::Archive,
        }
    }

    pub fn file_count(&self) -> usize {
        self.index.len()
    }

    /// Resolve patterns to absolute paths, sorted and de-duplicated.
    ///
    /// An empty result means the evidence holds no data for these patterns.
    pub fn resolve<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<PathBuf>, LocatorError> {
        let mut matched: Vec<&str> = Vec::new();
        for pattern in patterns {
            matched.extend(self.match_pattern(pattern.as_ref())?);
        }
        matched.sort_unstable();
        matched.dedup();

        let mut paths = Vec::with_capacity(matched.len());
        for rel in matched {
            paths.push(self.absolute(rel)?);
        }
        paths.sort();
        Ok(paths)
    }

    /// Match one pattern, falling back through the layout variants.
    fn match_pattern(&self, pattern: &str) -> Result<Vec<&str>, LocatorError> {
        let hits = self.match_exact(pattern)?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        for variant in layout_variants(pattern, &self.rewrites) {
            let hits = self.match_exact(&variant)?;
            if !hits.is_empty() {
                debug!("Pattern {} matched via layout variant {}", pattern, variant);
                return Ok(hits);
            }
        }

        Ok(Vec::new())
    }

    fn match_exact(&self, pattern: &str) -> Result<Vec<&str>, LocatorError> {
        let regex = glob_to_regex(pattern)?;
        Ok(self
            .index
            .iter()
            .filter(|rel| regex.is_match(rel))
            .map(String::as_str)
            .collect())
    }

    fn absolute(&self, rel: &str) -> Result<PathBuf, LocatorError> {
        match &self.source {
            Source::Directory => Ok(self.root.join(rel)),
            #[cfg(feature = "archive_evidence")]
            Source::Archive(archive) => archive.materialize(rel),
        }
    }
}

/// Path of `path` relative to `base`, with '/' separators.
fn relative_string(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
