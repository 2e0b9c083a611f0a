//! Scratch storage used when the buffered backlog outgrows memory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::warn;

/// Picks the directory used for scratch files.
///
/// A configured path is used when it is a directory, and created when it
/// does not exist yet. Anything else falls back to the platform temporary
/// directory.
pub fn resolve_scratch_dir(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path.filter(|path| !path.as_os_str().is_empty()) {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return path.to_path_buf(),
            Ok(_) => {
                warn!(target = "timeshift", path = %path.display(), "scratch path is not a directory");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => match fs::create_dir_all(path) {
                Ok(()) => return path.to_path_buf(),
                Err(err) => {
                    warn!(target = "timeshift", path = %path.display(), error = %err, "cannot create scratch directory");
                }
            },
            Err(err) => {
                warn!(target = "timeshift", path = %path.display(), error = %err, "cannot inspect scratch path");
            }
        }
    }
    std::env::temp_dir()
}

/// Opens a uniquely named scratch file in `dir`, removed when dropped.
pub fn open_scratch_file(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("timeshift.")
        .tempfile_in(dir)
}
