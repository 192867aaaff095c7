//! Seams between the tracking core and the host environment.
//!
//! The core needs two things from outside: a way to turn a path into a
//! stable file identity, and a write-interception layer that reports every
//! accepted write and size-reducing truncation for a hooked file. Both are
//! traits so hosts can plug in their own notification primitive; the crate
//! ships [`FsResolver`] and the in-process [`InstrumentedFiles`].

mod instrumented;
mod resolver;
pub use instrumented::*;
pub use resolver::*;


use std::path::Path;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::WatchError;

/// Rename-proof identity of a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub fn new(
        dev: u64,
        ino: u64,
    ) -> Self {
        Self { dev, ino }
    }

    pub fn of(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Receiver of write events for one hooked file
pub trait WriteSink: Send + Sync {
    /// A write of `length` bytes at `offset` was accepted by storage
    fn on_write(
        &self,
        offset: u64,
        length: u64,
    );

    /// The file shrank to `new_size` bytes
    fn on_truncate(
        &self,
        new_size: u64,
    );
}

/// Installs and removes per-file write hooks.
///
/// At most one hook is installed per identity at a time. Implementations
/// must not hold internal locks while calling into a sink, and must not
/// call into the sink from `install` itself.
#[cfg_attr(test, automock)]
pub trait WriteInterceptor: Send + Sync {
    fn install(
        &self,
        identity: FileIdentity,
        sink: Arc<dyn WriteSink>,
    ) -> Result<(), WatchError>;

    fn uninstall(
        &self,
        identity: FileIdentity,
    );
}

/// Maps a monitor target to the file it currently names
#[cfg_attr(test, automock)]
pub trait FileResolver: Send + Sync {
    fn resolve(
        &self,
        path: &Path,
    ) -> Result<FileIdentity, WatchError>;
}
