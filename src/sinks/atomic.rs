use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::errors::SinkError;

/// Write `contents` to `path` through a sibling temp file and a rename.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SinkError> {
    write_atomic_with(path, |writer| writer.write_all(contents))
}

/// Stream into a sibling temp file, then rename it over `path`.
///
/// If `fill` fails the temp file is removed and `path` is left untouched.
pub fn write_atomic_with<F>(path: &Path, fill: F) -> Result<(), SinkError>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        fill(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SinkError::Io(e.error))?;
    Ok(())
}
