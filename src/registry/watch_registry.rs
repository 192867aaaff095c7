use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ObserverId;
use super::WatchHandle;
use crate::ChangeSet;
use crate::FileIdentity;
use crate::FileResolver;
use crate::FileTracker;
use crate::SlotId;
use crate::TrackingConfig;
use crate::WatchError;
use crate::WriteInterceptor;

enum WatchEntry {
    /// Handle number reserved while the attach is in flight
    Pending,
    Attached {
        tracker: Arc<FileTracker>,
        slot: SlotId,
    },
}

/// Root of watch lifetime management.
///
/// Owns one [`FileTracker`] per watched file and the per-observer handle
/// tables. The handle-table lock is only held for lookup, insert and
/// remove; tracker operations always run after it has been released.
pub struct WatchRegistry {
    config: TrackingConfig,
    resolver: Arc<dyn FileResolver>,
    interceptor: Arc<dyn WriteInterceptor>,
    trackers: DashMap<FileIdentity, Arc<FileTracker>>,
    observers: Mutex<HashMap<ObserverId, HashMap<WatchHandle, WatchEntry>>>,
    next_observer: AtomicU64,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("tracked_files", &self.trackers.len())
            .field("observers", &self.observers.lock().len())
            .finish()
    }
}

impl WatchRegistry {
    pub fn new(
        config: TrackingConfig,
        resolver: Arc<dyn FileResolver>,
        interceptor: Arc<dyn WriteInterceptor>,
    ) -> Self {
        Self {
            config,
            resolver,
            interceptor,
            trackers: DashMap::new(),
            observers: Mutex::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    /// Allocates an id for a new observer session and opens its handle table.
    ///
    /// Only registered, unreleased observers can monitor.
    pub fn register_observer(&self) -> ObserverId {
        let observer = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().insert(observer, HashMap::new());
        debug!(observer, "observer registered");
        observer
    }

    /// Number of files with at least one attached observer
    pub fn tracked_file_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn watch_count(
        &self,
        observer: ObserverId,
    ) -> usize {
        self.observers
            .lock()
            .get(&observer)
            .map_or(0, |handles| handles.len())
    }

    /// Starts tracking `path` for `observer` at `block_size` granularity.
    ///
    /// Monitoring the same file twice yields two independent watches.
    pub fn monitor(
        &self,
        observer: ObserverId,
        path: &Path,
        block_size: i64,
    ) -> Result<WatchHandle, WatchError> {
        if block_size <= 0 {
            return Err(WatchError::InvalidBlockSize(block_size));
        }
        let path_len = path.as_os_str().len();
        if path_len > self.config.max_path_len {
            return Err(WatchError::PathTooLong {
                len: path_len,
                max: self.config.max_path_len,
            });
        }

        let identity = self.resolver.resolve(path)?;
        let handle = self.reserve_handle(observer)?;

        let (tracker, slot) = match self.attach(observer, identity, block_size as u64) {
            Ok(attached) => attached,
            Err(e) => {
                warn!(observer, ?path, "monitor failed: {}", e);
                self.unreserve_handle(observer, handle);
                return Err(e);
            }
        };

        self.commit_handle(observer, handle, tracker, slot)?;
        info!(observer, handle, ?path, ?identity, block_size, "monitor");
        Ok(handle)
    }

    /// Stops the watch `handle` owned by `observer`.
    pub fn forget(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
    ) -> Result<(), WatchError> {
        let removed = {
            let mut observers = self.observers.lock();
            observers.get_mut(&observer).and_then(|handles| {
                // pending handles are not forgettable yet
                let attached = matches!(handles.get(&handle), Some(WatchEntry::Attached { .. }));
                if attached {
                    handles.remove(&handle)
                } else {
                    None
                }
            })
        };

        match removed {
            Some(WatchEntry::Attached { tracker, slot }) => {
                self.detach_slot(&tracker, slot);
                info!(observer, handle, "forget");
                Ok(())
            }
            _ => Err(WatchError::BadHandle { handle }),
        }
    }

    /// Drains up to `max_items` dirty units from the watch `handle`.
    pub fn query(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
        max_items: usize,
    ) -> Result<ChangeSet, WatchError> {
        self.query_within(observer, handle, max_items, u64::MAX)
    }

    /// Like [`query`](Self::query), but no reported unit reaches past
    /// `max_block`; dirtiness beyond it is folded in with `overflowed` status.
    pub fn query_within(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
        max_items: usize,
        max_block: u64,
    ) -> Result<ChangeSet, WatchError> {
        let (tracker, slot) = self.lookup(observer, handle)?;
        let changes = tracker
            .drain_within(slot, max_items, max_block)
            .map_err(|e| match e {
                WatchError::ObserverReleased => WatchError::BadHandle { handle },
                other => other,
            })?;
        debug!(
            observer,
            handle,
            status = ?changes.status,
            units = changes.units.len(),
            "query"
        );
        Ok(changes)
    }

    /// Detaches every watch owned by `observer`. Safe to call more than once.
    pub fn release_observer(
        &self,
        observer: ObserverId,
    ) {
        let Some(handles) = self.observers.lock().remove(&observer) else {
            return;
        };

        let released = handles.len();
        for (_, entry) in handles {
            if let WatchEntry::Attached { tracker, slot } = entry {
                self.detach_slot(&tracker, slot);
            }
        }
        info!(observer, released, "observer released");
    }

    /// Releases every observer, leaving the registry empty.
    pub fn shutdown(&self) {
        let observers: Vec<ObserverId> = self.observers.lock().keys().copied().collect();
        for observer in observers {
            self.release_observer(observer);
        }
        debug!(remaining = self.trackers.len(), "registry shut down");
    }

    fn lookup(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
    ) -> Result<(Arc<FileTracker>, SlotId), WatchError> {
        let observers = self.observers.lock();
        match observers.get(&observer).and_then(|handles| handles.get(&handle)) {
            Some(WatchEntry::Attached { tracker, slot }) => Ok((Arc::clone(tracker), *slot)),
            _ => Err(WatchError::BadHandle { handle }),
        }
    }

    fn reserve_handle(
        &self,
        observer: ObserverId,
    ) -> Result<WatchHandle, WatchError> {
        let mut observers = self.observers.lock();
        // a released observer stays released
        let handles = observers
            .get_mut(&observer)
            .ok_or(WatchError::ObserverReleased)?;

        let limit = self.config.max_watches_per_observer;
        if handles.len() >= limit {
            return Err(WatchError::TooManyWatches { limit });
        }
        handles
            .try_reserve(1)
            .map_err(|_| WatchError::NoMemory("reserving a watch handle"))?;

        // lowest free number; the limit keeps this scan short
        let handle = (0..=WatchHandle::MAX)
            .find(|h| !handles.contains_key(h))
            .ok_or(WatchError::TooManyWatches { limit })?;
        handles.insert(handle, WatchEntry::Pending);
        Ok(handle)
    }

    fn unreserve_handle(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
    ) {
        let mut observers = self.observers.lock();
        if let Some(handles) = observers.get_mut(&observer) {
            if matches!(handles.get(&handle), Some(WatchEntry::Pending)) {
                handles.remove(&handle);
            }
        }
    }

    fn commit_handle(
        &self,
        observer: ObserverId,
        handle: WatchHandle,
        tracker: Arc<FileTracker>,
        slot: SlotId,
    ) -> Result<(), WatchError> {
        {
            let mut observers = self.observers.lock();
            let entry = observers
                .get_mut(&observer)
                .and_then(|handles| handles.get_mut(&handle));
            if let Some(entry) = entry {
                if matches!(entry, WatchEntry::Pending) {
                    *entry = WatchEntry::Attached { tracker, slot };
                    return Ok(());
                }
            }
        }

        // the session ended while we were attaching
        warn!(observer, handle, "observer released during monitor, undoing attach");
        self.detach_slot(&tracker, slot);
        Err(WatchError::ObserverReleased)
    }

    fn attach(
        &self,
        observer: ObserverId,
        identity: FileIdentity,
        block_size: u64,
    ) -> Result<(Arc<FileTracker>, SlotId), WatchError> {
        loop {
            let tracker = Arc::clone(
                self.trackers
                    .entry(identity)
                    .or_insert_with(|| FileTracker::new(identity, Arc::clone(&self.interceptor)))
                    .value(),
            );

            match tracker.attach(observer, block_size, self.config.max_ranges_per_watch) {
                Ok(Some(slot)) => return Ok((tracker, slot)),
                // lost a race with the last detach; start over with a fresh tracker
                Ok(None) => self.remove_if_retired(&tracker),
                Err(e) => {
                    self.remove_if_retired(&tracker);
                    return Err(e);
                }
            }
        }
    }

    fn detach_slot(
        &self,
        tracker: &Arc<FileTracker>,
        slot: SlotId,
    ) {
        if tracker.detach(slot) {
            self.remove_if_retired(tracker);
        }
    }

    // Retirement is final, so checking before taking the map lock is enough.
    fn remove_if_retired(
        &self,
        tracker: &Arc<FileTracker>,
    ) {
        if tracker.is_retired() {
            self.trackers
                .remove_if(&tracker.identity(), |_, current| Arc::ptr_eq(current, tracker));
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        // installed hooks hold their trackers alive; drop them with the registry
        self.shutdown();
    }
}
