use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::FileIdentity;
use super::WriteInterceptor;
use super::WriteSink;
use crate::WatchError;

/// In-process write interception by explicit instrumentation.
///
/// Files opened through [`InstrumentedFiles::open`] report each accepted
/// write and each shrinking `set_len` to whatever sink is hooked for their
/// identity at that moment. Writes to unhooked files pass through untouched.
pub struct InstrumentedFiles {
    hooks: DashMap<FileIdentity, Arc<dyn WriteSink>>,
    /// Installed hooks; a slot is claimed before its entry is inserted
    installed: AtomicUsize,
    max_hooks: usize,
}

impl std::fmt::Debug for InstrumentedFiles {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InstrumentedFiles")
            .field("hooks", &self.hooks.len())
            .field("max_hooks", &self.max_hooks)
            .finish()
    }
}

impl InstrumentedFiles {
    pub fn new(max_hooks: usize) -> Arc<Self> {
        Arc::new(Self {
            hooks: DashMap::new(),
            installed: AtomicUsize::new(0),
            max_hooks,
        })
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_hooked(
        &self,
        identity: &FileIdentity,
    ) -> bool {
        self.hooks.contains_key(identity)
    }

    /// Opens `path` with `options`, returning a handle whose writes are reported.
    pub fn open(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
        options: &OpenOptions,
    ) -> io::Result<TrackedFile> {
        let file = options.open(path.as_ref())?;
        let identity = FileIdentity::of(&file.metadata()?);
        Ok(TrackedFile {
            file,
            identity,
            hooks: Arc::clone(self),
        })
    }

    // The sink is cloned out so no shard lock is held while it runs.
    fn sink_for(
        &self,
        identity: &FileIdentity,
    ) -> Option<Arc<dyn WriteSink>> {
        self.hooks.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    pub fn notify_write(
        &self,
        identity: &FileIdentity,
        offset: u64,
        length: u64,
    ) {
        if let Some(sink) = self.sink_for(identity) {
            trace!(?identity, offset, length, "intercepted write");
            sink.on_write(offset, length);
        }
    }

    pub fn notify_truncate(
        &self,
        identity: &FileIdentity,
        new_size: u64,
    ) {
        if let Some(sink) = self.sink_for(identity) {
            trace!(?identity, new_size, "intercepted truncate");
            sink.on_truncate(new_size);
        }
    }
}

impl WriteInterceptor for InstrumentedFiles {
    fn install(
        &self,
        identity: FileIdentity,
        sink: Arc<dyn WriteSink>,
    ) -> Result<(), WatchError> {
        match self.hooks.entry(identity) {
            Entry::Occupied(_) => Err(WatchError::HookInstallFailed {
                reason: format!("hook already installed for {identity:?}"),
            }),
            Entry::Vacant(slot) => {
                self.installed
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < self.max_hooks).then_some(n + 1)
                    })
                    .map_err(|_| WatchError::HookInstallFailed {
                        reason: format!("hook limit {} reached", self.max_hooks),
                    })?;
                slot.insert(sink);
                info!(?identity, "write hook installed");
                Ok(())
            }
        }
    }

    fn uninstall(
        &self,
        identity: FileIdentity,
    ) {
        if self.hooks.remove(&identity).is_some() {
            self.installed.fetch_sub(1, Ordering::AcqRel);
            info!(?identity, "write hook removed");
        } else {
            debug!(?identity, "uninstall for a file without hook");
        }
    }
}

/// A file handle whose writes feed the change tracker.
#[derive(Debug)]
pub struct TrackedFile {
    file: File,
    identity: FileIdentity,
    hooks: Arc<InstrumentedFiles>,
}

impl TrackedFile {
    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn get_ref(&self) -> &File {
        &self.file
    }

    /// Positional write; the cursor is left untouched.
    pub fn write_at(
        &self,
        buf: &[u8],
        offset: u64,
    ) -> io::Result<usize> {
        let written = self.file.write_at(buf, offset)?;
        if written > 0 {
            self.hooks.notify_write(&self.identity, offset, written as u64);
        }
        Ok(written)
    }

    pub fn write_all_at(
        &self,
        mut buf: &[u8],
        mut offset: u64,
    ) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resizes the file; only a shrink is reported.
    pub fn set_len(
        &self,
        new_size: u64,
    ) -> io::Result<()> {
        let old_size = self.file.metadata()?.len();
        self.file.set_len(new_size)?;
        if new_size < old_size {
            self.hooks.notify_truncate(&self.identity, new_size);
        }
        Ok(())
    }

    pub fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl Write for TrackedFile {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        if written > 0 {
            // the cursor now sits right after the written bytes, append mode included
            let end = self.file.stream_position()?;
            let offset = end.saturating_sub(written as u64);
            self.hooks.notify_write(&self.identity, offset, written as u64);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Read for TrackedFile {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for TrackedFile {
    fn seek(
        &mut self,
        pos: SeekFrom,
    ) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
