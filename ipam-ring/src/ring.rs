//! The replicated ownership CRDT.

use std::collections::{BTreeSet, HashSet};

use ipam_types::{Addr, PeerName, Range};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::entry::Entry;
use crate::error::{RingError, Result};

/// A conflict-free map from address ranges to owning peers.
///
/// `entries` is always sorted by `start` and always partitions `universe`
/// with no gaps: `entries[0].start == universe.start`, and `entries[i]` owns
/// up to (but not including) `entries[i + 1].start`, with the final entry
/// reaching `universe.end`. An empty ring (no entries) represents a replica
/// that has not yet learned the outcome of the seeding consensus round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    universe: Range,
    seeds: Vec<PeerName>,
    entries: Vec<Entry>,
    local_peer: PeerName,
}

impl Ring {
    /// Creates an empty ring over `universe`, owned locally by `me`.
    ///
    /// `me` is not itself an entry owner until [`Ring::claim_for_peers`] or
    /// [`Ring::merge`] populates the entry list; it is retained so that
    /// operations like [`Ring::grant_range`] and [`Ring::owned_by_me`] don't
    /// need the caller to repeat it on every call.
    #[must_use]
    pub fn new(universe: Range, me: PeerName) -> Self {
        Self {
            universe,
            seeds: Vec::new(),
            entries: Vec::new(),
            local_peer: me,
        }
    }

    #[must_use]
    pub fn universe(&self) -> Range {
        self.universe
    }

    #[must_use]
    pub fn is_seeded(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Partitions the universe among `peers`, as close to evenly as
    /// possible, and seeds the ring with version 1 for every entry. Must be
    /// called exactly once, on a ring with no existing entries — this is
    /// how the outcome of the bootstrap consensus round gets turned into a
    /// ring.
    pub fn claim_for_peers(&mut self, peers: &[PeerName]) -> Result<()> {
        if self.is_seeded() {
            return Err(RingError::AlreadySeeded);
        }
        let mut sorted: Vec<PeerName> = peers.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.is_empty() {
            return Err(RingError::EmptyRange);
        }

        let total = self.universe.count() as u64;
        let n = sorted.len() as u64;
        let base = total / n;
        let remainder = total % n;

        let mut cursor = self.universe.start.0;
        let mut entries = Vec::with_capacity(sorted.len());
        for (i, peer) in sorted.iter().enumerate() {
            let share = base + u64::from((i as u64) < remainder);
            entries.push(Entry::new(Addr(cursor), *peer, 1));
            cursor += share as u32;
        }
        debug_assert_eq!(cursor, self.universe.end.0);

        self.seeds = sorted;
        self.entries = entries;
        Ok(())
    }

    /// Merges `other` into `self`: if this ring is unseeded and `other` is
    /// seeded, adopt it verbatim; otherwise the two rings must agree on seed
    /// set and universe, and entries are reconciled position by position
    /// with the higher version winning.
    pub fn merge(&mut self, other: &Ring) -> Result<()> {
        if !self.is_seeded() && other.is_seeded() {
            let local_peer = self.local_peer;
            *self = other.clone();
            self.local_peer = local_peer;
            return Ok(());
        }

        if self.universe != other.universe {
            return Err(RingError::DifferentRange);
        }
        if self.is_seeded() && other.is_seeded() && self.seeds != other.seeds {
            return Err(RingError::DifferentSeeds);
        }
        if !other.is_seeded() {
            // Nothing new to learn.
            return Ok(());
        }

        let mut boundaries: BTreeSet<u32> = BTreeSet::new();
        for e in &self.entries {
            boundaries.insert(e.start.0);
        }
        for e in &other.entries {
            boundaries.insert(e.start.0);
        }

        let mut merged = Vec::with_capacity(boundaries.len());
        for start in boundaries {
            let addr = Addr(start);
            let local = covering(&self.entries, addr);
            let remote = covering(&other.entries, addr);
            let winner = match (local, remote) {
                (Some(l), Some(r)) => {
                    if l.version > r.version {
                        l
                    } else if r.version > l.version {
                        r
                    } else if l.owner == r.owner {
                        l
                    } else {
                        return Err(RingError::Invalid);
                    }
                }
                (Some(l), None) => l,
                (None, Some(r)) => r,
                (None, None) => unreachable!("boundary came from one of the two entry lists"),
            };
            merged.push(Entry {
                start: addr,
                owner: winner.owner,
                version: winner.version,
                free_count_hint: winner.free_count_hint,
                tombstone: winner.tombstone,
            });
        }

        coalesce(&mut merged);
        self.entries = merged;
        self.seeds = other.seeds.clone();
        trace!(entries = self.entries.len(), "ring merged");
        Ok(())
    }

    /// Reassigns `[start, end)` from `self.local_peer` to `to`. The entire
    /// range must currently be owned by the local peer.
    pub fn grant_range(&mut self, start: Addr, end: Addr, to: PeerName) -> Result<()> {
        let range = Range::new(start, end);
        if range.is_empty() {
            return Err(RingError::EmptyRange);
        }
        let me = self.local_peer;
        self.reassign(range, me, to)
    }

    /// Reassigns every range owned by `from` to `to` in one step, for the
    /// handover case where a peer leaves and another absorbs all of its
    /// ranges. Returns the ranges that were transferred.
    pub fn transfer(&mut self, from: PeerName, to: PeerName) -> Result<Vec<Range>> {
        let ranges = self.owned_ranges(from);
        for r in &ranges {
            self.reassign(*r, from, to)?;
        }
        Ok(ranges)
    }

    fn reassign(&mut self, range: Range, from: PeerName, to: PeerName) -> Result<()> {
        if !self.universe.contains_range(&range) {
            return Err(RingError::EmptyRange);
        }

        // Verify full ownership by `from` before mutating anything.
        let bounds = self.bounds();
        for (i, entry) in self.entries.iter().enumerate() {
            let entry_range = Range::new(entry.start, bounds[i + 1]);
            if entry_range.overlaps(&range) && entry.owner != from {
                return Err(RingError::NotOwner(from));
            }
        }

        let split_points = [range.start, range.end];
        for &point in &split_points {
            self.split_at(point);
        }

        let bounds = self.bounds();
        let overlapped_versions: Vec<u64> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, e)| Range::new(e.start, bounds[i + 1]).overlaps(&range))
            .map(|(_, e)| e.version)
            .collect();
        let new_version = overlapped_versions.into_iter().max().unwrap_or(0) + 1;

        for entry in &mut self.entries {
            if range.contains(entry.start) {
                entry.owner = to;
                entry.version = new_version;
            }
        }

        coalesce(&mut self.entries);
        debug!(%from, %to, %range, "range reassigned");
        Ok(())
    }

    /// Splits the entry covering `at` into two, if `at` is not already a
    /// boundary. No-op at the universe's own edges.
    fn split_at(&mut self, at: Addr) {
        if at == self.universe.start || at == self.universe.end {
            return;
        }
        if self.entries.iter().any(|e| e.start == at) {
            return;
        }
        let Some(idx) = self.entries.iter().rposition(|e| e.start.0 < at.0) else {
            return;
        };
        let original = self.entries[idx].clone();
        let mut tail = original.clone();
        tail.start = at;
        self.entries.insert(idx + 1, tail);
    }

    /// End boundaries for every entry, with a trailing `universe.end`.
    fn bounds(&self) -> Vec<Addr> {
        let mut bounds: Vec<Addr> = self.entries.iter().map(|e| e.start).collect();
        bounds.push(self.universe.end);
        bounds
    }

    /// Coalesced ranges currently owned by `peer`.
    #[must_use]
    pub fn owned_ranges(&self, peer: PeerName) -> Vec<Range> {
        let bounds = self.bounds();
        let mut ranges: Vec<Range> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.owner != peer {
                continue;
            }
            let entry_range = Range::new(entry.start, bounds[i + 1]);
            match ranges.last_mut() {
                Some(last) if last.end == entry_range.start => last.end = entry_range.end,
                _ => ranges.push(entry_range),
            }
        }
        ranges
    }

    /// Ranges currently owned by the ring's configured local peer.
    #[must_use]
    pub fn owned_by_me(&self) -> Vec<Range> {
        self.owned_ranges(self.local_peer)
    }

    #[must_use]
    pub fn local_peer(&self) -> PeerName {
        self.local_peer
    }

    /// Every peer that currently owns at least one entry.
    #[must_use]
    pub fn peer_names(&self) -> HashSet<PeerName> {
        self.entries.iter().map(|e| e.owner).collect()
    }

    /// Picks any other peer owning at least one entry for whom `is_valid`
    /// holds (e.g. "still reachable"), tie-broken by lowest `PeerName` for
    /// determinism. Unlike [`Self::pick_donor`], free-count plays no part
    /// here — this chooses a successor to hand an entire range to, not the
    /// peer with the most space to spare.
    pub fn pick_peer_for_transfer(&self, is_valid: impl Fn(PeerName) -> bool) -> Option<PeerName> {
        self.entries
            .iter()
            .filter(|e| e.owner != self.local_peer && is_valid(e.owner))
            .map(|e| e.owner)
            .min_by_key(|&owner| owner)
    }

    /// The peer that owns `addr`, or `None` if the ring is unseeded.
    #[must_use]
    pub fn owner_of(&self, addr: Addr) -> Option<PeerName> {
        covering(&self.entries, addr).map(|e| e.owner)
    }

    /// Picks a peer (other than the local one) to request space from for
    /// `range`: among entries whose span overlaps `range` and satisfy
    /// `is_valid` (e.g. "currently reachable"), prefers the one with the
    /// highest free-count hint.
    pub fn pick_donor(&self, range: Range, is_valid: impl Fn(PeerName) -> bool) -> Option<PeerName> {
        let bounds = self.bounds();
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                e.owner != self.local_peer
                    && is_valid(e.owner)
                    && Range::new(e.start, bounds[i + 1]).overlaps(&range)
            })
            .map(|(_, e)| e)
            .max_by_key(|e| (e.free_count_hint, std::cmp::Reverse(e.owner)))
            .map(|e| e.owner)
    }

    /// Updates the free-count hints on the local peer's own entries, e.g.
    /// after a local [`crate`]-external space accounting pass, bumping
    /// their versions so the new hints propagate on the next merge.
    pub fn report_free(&mut self, free_by_start: &std::collections::HashMap<Addr, u32>) {
        for entry in &mut self.entries {
            if entry.owner != self.local_peer {
                continue;
            }
            if let Some(&count) = free_by_start.get(&entry.start) {
                if entry.free_count_hint != count {
                    entry.free_count_hint = count;
                    entry.version += 1;
                }
            }
        }
    }
}

fn covering(entries: &[Entry], addr: Addr) -> Option<&Entry> {
    entries.iter().rev().find(|e| e.start.0 <= addr.0)
}

/// Merges adjacent entries with the same owner, bumping the surviving
/// entry's version past whatever either side had seen.
fn coalesce(entries: &mut Vec<Entry>) {
    let mut i = 0;
    while i + 1 < entries.len() {
        if entries[i].owner == entries[i + 1].owner {
            let next = entries.remove(i + 1);
            entries[i].version = entries[i].version.max(next.version) + 1;
            entries[i].free_count_hint = entries[i].free_count_hint.max(next.free_count_hint);
        } else {
            i += 1;
        }
    }
}
