use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::BlockRangeSet;
use super::ChangeSet;
use crate::FileIdentity;
use crate::ObserverId;
use crate::WatchError;
use crate::WriteInterceptor;
use crate::WriteSink;

/// Identifies one observer's [`BlockRangeSet`] inside a tracker
pub type SlotId = u64;

/// Every watch on one file.
///
/// A single lock serializes observer-set changes, event broadcast and
/// drains, so a drain never sees a half-applied write. The external hook is
/// installed with the first attachment and removed with the last; after
/// that the tracker is retired and refuses new attachments.
pub struct FileTracker {
    identity: FileIdentity,
    interceptor: Arc<dyn WriteInterceptor>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    observers: HashMap<SlotId, BlockRangeSet>,
    next_slot: SlotId,
    hook_installed: bool,
    retired: bool,
}

impl std::fmt::Debug for FileTracker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FileTracker")
            .field("identity", &self.identity)
            .field("observers", &state.observers.len())
            .field("hook_installed", &state.hook_installed)
            .field("retired", &state.retired)
            .finish()
    }
}

impl FileTracker {
    pub fn new(
        identity: FileIdentity,
        interceptor: Arc<dyn WriteInterceptor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            interceptor,
            state: Mutex::new(TrackerState::default()),
        })
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    pub fn hook_installed(&self) -> bool {
        self.state.lock().hook_installed
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Adds a fresh range set for `observer`.
    ///
    /// Returns `Ok(None)` when the tracker has already been retired; the
    /// caller should look up (or create) a new tracker and try again. If the
    /// hook cannot be installed the attachment is rolled back and a tracker
    /// left without observers retires.
    pub fn attach(
        self: &Arc<Self>,
        observer: ObserverId,
        block_size: u64,
        capacity: usize,
    ) -> Result<Option<SlotId>, WatchError> {
        let mut state = self.state.lock();
        if state.retired {
            return Ok(None);
        }

        if !state.hook_installed {
            let sink: Arc<dyn WriteSink> = Arc::clone(self) as Arc<dyn WriteSink>;
            if let Err(e) = self.interceptor.install(self.identity, sink) {
                warn!(identity = ?self.identity, observer, "hook install failed: {}", e);
                if state.observers.is_empty() {
                    state.retired = true;
                }
                return Err(e);
            }
            state.hook_installed = true;
        }

        let slot = state.next_slot;
        state.next_slot += 1;
        state
            .observers
            .insert(slot, BlockRangeSet::new(block_size, capacity));

        info!(
            identity = ?self.identity,
            observer,
            slot,
            block_size,
            observers = state.observers.len(),
            "observer attached"
        );
        Ok(Some(slot))
    }

    /// Removes one range set. Returns `true` if this retired the tracker.
    pub fn detach(
        &self,
        slot: SlotId,
    ) -> bool {
        let mut state = self.state.lock();
        if state.observers.remove(&slot).is_none() {
            debug!(identity = ?self.identity, slot, "detach of unknown slot");
            return false;
        }

        info!(
            identity = ?self.identity,
            slot,
            observers = state.observers.len(),
            "observer detached"
        );

        if state.observers.is_empty() {
            if state.hook_installed {
                self.interceptor.uninstall(self.identity);
                state.hook_installed = false;
            }
            state.retired = true;
            return true;
        }
        false
    }

    /// Drains the set behind `slot`.
    pub fn drain(
        &self,
        slot: SlotId,
        max_items: usize,
    ) -> Result<ChangeSet, WatchError> {
        self.drain_within(slot, max_items, u64::MAX)
    }

    /// Drains the set behind `slot`, folding blocks past `max_block`.
    pub fn drain_within(
        &self,
        slot: SlotId,
        max_items: usize,
        max_block: u64,
    ) -> Result<ChangeSet, WatchError> {
        let mut state = self.state.lock();
        match state.observers.get_mut(&slot) {
            Some(set) => set.drain_within(max_items, max_block),
            // forgotten concurrently; the registry maps this to a bad handle
            None => Err(WatchError::ObserverReleased),
        }
    }

    pub fn on_write(
        &self,
        offset: u64,
        length: u64,
    ) {
        let mut state = self.state.lock();
        for set in state.observers.values_mut() {
            set.record(offset, length);
        }
    }

    /// Each set is cut at its own granularity.
    ///
    /// The kept block count rounds up on purpose: a partially kept last
    /// block stays dirty rather than being dropped.
    pub fn on_truncate(
        &self,
        new_size: u64,
    ) {
        let mut state = self.state.lock();
        for set in state.observers.values_mut() {
            let new_block_count = new_size.div_ceil(set.block_size());
            set.notify_truncate(new_block_count);
        }
    }
}

impl WriteSink for FileTracker {
    fn on_write(
        &self,
        offset: u64,
        length: u64,
    ) {
        FileTracker::on_write(self, offset, length)
    }

    fn on_truncate(
        &self,
        new_size: u64,
    ) {
        FileTracker::on_truncate(self, new_size)
    }
}
