//! ZIP containers as evidence roots.
//!
//! Entries are indexed by name at open time and extracted on demand, the
//! first time a pattern resolves to them.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use tempfile::NamedTempFile;
use zip::ZipArchive;

use crate::errors::LocatorError;

pub struct ArchiveEvidence {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
    extract_dir: PathBuf,
    entries: HashMap<String, usize>,
}

impl ArchiveEvidence {
    pub fn open(path: &Path, extract_dir: &Path) -> Result<Self, LocatorError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut entries = HashMap::new();
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            match entry.enclosed_name().and_then(relative_name) {
                Some(name) => {
                    entries.insert(name, index);
                }
                None => warn!("Skipping unsafe archive entry: {}", entry.name()),
            }
        }

        debug!("Indexed {} entries in {}", entries.len(), path.display());
        Ok(ArchiveEvidence {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            extract_dir: extract_dir.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    /// Relative entry names, unsorted.
    pub fn entry_names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Extract `name` below the extraction directory, once, and return its path.
    ///
    /// The entry is streamed into a sibling temp file and renamed into place,
    /// so an interrupted extraction never leaves a truncated file behind.
    pub fn materialize(&self, name: &str) -> Result<PathBuf, LocatorError> {
        let index = *self.entries.get(name).ok_or_else(|| {
            LocatorError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not an entry of {}", name, self.path.display()),
            ))
        })?;
        let dest = self.extract_dir.join(name);

        let mut archive = self
            .archive
            .lock()
            .map_err(|_| LocatorError::Io(io::Error::new(io::ErrorKind::Other, "archive lock poisoned")))?;
        if dest.exists() {
            return Ok(dest);
        }

        let parent = dest.parent().unwrap_or(&self.extract_dir);
        fs::create_dir_all(parent)?;
        let mut entry = archive.by_index(index)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        io::copy(&mut entry, temp.as_file_mut())?;
        temp.persist(&dest).map_err(|e| LocatorError::Io(e.error))?;
        debug!("Extracted {} to {}", name, dest.display());

        Ok(dest)
    }
}

/// '/'-joined name built from normal components only.
fn relative_name(path: &Path) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
