//! Durable YAML documents that are replaced atomically.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Reads a YAML document, or `None` if the file does not exist.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io("error reading state file", e)),
    };

    serde_yaml::from_str(&data)
        .map(Some)
        .map_err(|e| Error::Deserialize {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Replaces `path` with the YAML encoding of `value`.
///
/// The document is written to a temporary file in the same directory,
/// flushed to disk and renamed over the target, so a crash leaves either the
/// old or the new document and never a partial one.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_yaml::to_string(value).map_err(|e| Error::Serialize(e.to_string()))?;

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::Io("error creating state directory", e))?;

    let mut file =
        NamedTempFile::new_in(dir).map_err(|e| Error::Io("error creating temporary file", e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| Error::Io("error writing temporary file", e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| Error::Io("error syncing temporary file", e))?;
    file.persist(path)
        .map_err(|e| Error::Io("error replacing state file", e.error))?;

    sync_dir(dir)
}

/// Removes `path`; a missing file is not an error.
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::Io("error removing state file", e)),
    }

    path.parent().map_or(Ok(()), sync_dir)
}

fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| Error::Io("error syncing state directory", e))
}
