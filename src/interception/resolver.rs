use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;

use super::FileIdentity;
use super::FileResolver;
use crate::WatchError;

/// Resolves paths against the local filesystem.
///
/// Only regular files the caller can open for reading are accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsResolver;

impl FileResolver for FsResolver {
    fn resolve(
        &self,
        path: &Path,
    ) -> Result<FileIdentity, WatchError> {
        let metadata = fs::metadata(path).map_err(|e| io_to_watch_error(path, e))?;
        if !metadata.is_file() {
            debug!(?path, "monitor target is not a regular file");
            return Err(WatchError::NotFound {
                path: path.to_path_buf(),
                source: None,
            });
        }

        // watching requires read permission on the target
        File::open(path).map_err(|e| io_to_watch_error(path, e))?;

        Ok(FileIdentity::of(&metadata))
    }
}

fn io_to_watch_error(
    path: &Path,
    e: io::Error,
) -> WatchError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => WatchError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => WatchError::NotFound {
            path: path.to_path_buf(),
            source: Some(e),
        },
    }
}
