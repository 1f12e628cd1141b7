use std::{
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

/// Replaces the contents of `path` with `bytes`.
///
/// The data is written and synced to a uniquely named temp file in the same
/// directory, then renamed over the destination, so readers see either the
/// old or the new contents even when several writers race on one path.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    // Dropping the temp file on an early return removes it.
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}
