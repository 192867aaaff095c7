use std::collections::BTreeMap;

use tracing::debug;
use tracing::trace;

use super::ChangeSet;
use super::DirtyUnit;
use super::DrainStatus;
use crate::WatchError;

/// Dirty-block record for one (file, observer) pair.
///
/// Ranges are kept sorted, disjoint and separated by at least one clean
/// block; anything closer is merged on insert. When the number of ranges
/// would exceed `capacity` the set collapses into a single bounding range
/// and stays collapsed until a drain empties it.
#[derive(Debug, Clone)]
pub struct BlockRangeSet {
    block_size: u64,
    capacity: usize,
    /// first block -> last block (inclusive)
    ranges: BTreeMap<u64, u64>,
    overflowed: bool,
    truncated: bool,
}

impl BlockRangeSet {
    /// `block_size` and `capacity` must both be non-zero; the registry
    /// validates them before a set is created.
    pub fn new(
        block_size: u64,
        capacity: usize,
    ) -> Self {
        debug_assert!(block_size > 0);
        debug_assert!(capacity > 0);
        Self {
            block_size,
            capacity,
            ranges: BTreeMap::new(),
            overflowed: false,
            truncated: false,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges currently held
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Current ranges in ascending order, without draining them
    pub fn units(&self) -> impl Iterator<Item = DirtyUnit> + '_ {
        self.ranges
            .iter()
            .map(|(&first, &last)| DirtyUnit::from_span(first, last))
    }

    /// Status the next drain would report
    pub fn status(&self) -> DrainStatus {
        if self.truncated {
            DrainStatus::Truncated
        } else if self.overflowed {
            DrainStatus::Overflowed
        } else {
            DrainStatus::Ok
        }
    }

    /// Marks every block touched by the byte span `[start_offset, start_offset + length)`.
    pub fn record(
        &mut self,
        start_offset: u64,
        length: u64,
    ) {
        if length == 0 {
            return;
        }
        let end_offset = start_offset.saturating_add(length - 1);
        let first = start_offset / self.block_size;
        let last = end_offset / self.block_size;
        trace!(start_offset, length, first, last, "record write");
        self.insert_span(first, last);
    }

    fn insert_span(
        &mut self,
        mut first: u64,
        mut last: u64,
    ) {
        if self.overflowed {
            // widen the single bounding range
            if let Some((lo, hi)) = self.bounds() {
                first = first.min(lo);
                last = last.max(hi);
            }
            self.ranges.clear();
            self.ranges.insert(first, last);
            return;
        }

        // Absorb every range overlapping or adjacent to [first, last]. Walking
        // down from the last range starting at or before `last + 1` visits
        // them in descending order; the first non-touching one ends the run.
        loop {
            let upper = last.saturating_add(1);
            let touching = self
                .ranges
                .range(..=upper)
                .next_back()
                .map(|(&f, &l)| (f, l))
                .filter(|&(_, l)| l.saturating_add(1) >= first);

            match touching {
                Some((f, l)) => {
                    self.ranges.remove(&f);
                    first = first.min(f);
                    last = last.max(l);
                }
                None => break,
            }
        }
        self.ranges.insert(first, last);

        if self.ranges.len() > self.capacity {
            self.collapse();
        }
    }

    fn bounds(&self) -> Option<(u64, u64)> {
        let (&lo, _) = self.ranges.first_key_value()?;
        let (_, &hi) = self.ranges.last_key_value()?;
        Some((lo, hi))
    }

    fn collapse(&mut self) {
        if let Some((lo, hi)) = self.bounds() {
            debug!(
                ranges = self.ranges.len(),
                capacity = self.capacity,
                lo,
                hi,
                "range limit exceeded, collapsing to bounding range"
            );
            self.ranges.clear();
            self.ranges.insert(lo, hi);
        }
        self.overflowed = true;
    }

    fn fold_beyond(
        &mut self,
        max_block: u64,
    ) {
        let Some((_, &hi)) = self.ranges.last_key_value() else {
            return;
        };
        if hi <= max_block {
            return;
        }

        let beyond = self.ranges.split_off(&(max_block + 1));
        if let Some(mut tail) = self.ranges.last_entry() {
            if *tail.get() > max_block {
                *tail.get_mut() = max_block;
            }
        }
        if !beyond.is_empty() {
            // merges with a tail that already ends at or next to max_block
            self.insert_span(max_block, max_block);
        }
        self.overflowed = true;
        debug!(max_block, folded = beyond.len(), "dirty blocks beyond reportable range folded");
    }

    /// Drops every block at or beyond `new_block_count` and flags the set as truncated.
    pub fn notify_truncate(
        &mut self,
        new_block_count: u64,
    ) {
        self.truncated = true;
        // everything starting past the new end goes
        let _dropped = self.ranges.split_off(&new_block_count);

        if let Some(mut tail) = self.ranges.last_entry() {
            let limit = new_block_count.saturating_sub(1);
            if *tail.get() > limit {
                *tail.get_mut() = limit;
            }
        }
        debug!(new_block_count, remaining = self.ranges.len(), "truncated");
    }

    /// Hands out up to `max_items` units in ascending block order.
    ///
    /// Units that do not fit stay behind for the next drain, and so do the
    /// `overflowed`/`truncated` flags: they are cleared only once the set
    /// has been emptied.
    pub fn drain(
        &mut self,
        max_items: usize,
    ) -> Result<ChangeSet, WatchError> {
        self.drain_within(max_items, u64::MAX)
    }

    /// Like [`drain`](Self::drain), but no unit reaches past `max_block`.
    ///
    /// Dirty blocks beyond `max_block` are folded into a range ending at
    /// `max_block` and the set is flagged overflowed, so the caller can
    /// still tell that its record is approximate there.
    pub fn drain_within(
        &mut self,
        max_items: usize,
        max_block: u64,
    ) -> Result<ChangeSet, WatchError> {
        self.fold_beyond(max_block);
        let status = self.status();
        let take = max_items.min(self.ranges.len());

        let mut units = Vec::new();
        units
            .try_reserve_exact(take)
            .map_err(|_| WatchError::NoMemory("reserving the drain buffer"))?;

        while units.len() < take {
            let Some((first, last)) = self.ranges.pop_first() else {
                break;
            };
            units.push(DirtyUnit::from_span(first, last));
        }

        if self.ranges.is_empty() {
            self.overflowed = false;
            self.truncated = false;
        }

        Ok(ChangeSet { status, units })
    }
}
