//! Free/taken accounting over the ranges a peer currently owns.

use std::collections::BTreeSet;

use ipam_types::{Addr, Range};
use tracing::debug;

use crate::error::{Result, SpaceError};

/// Smallest chunk size [`Space::donate`] will hand out; below this a
/// donation isn't worth the gossip round trip.
pub const MIN_SUBNET_SIZE: u32 = 4;

#[derive(Debug, Clone)]
struct Block {
    range: Range,
    taken: BTreeSet<Addr>,
}

/// Local free/taken accounting, scoped to whatever ranges the ring
/// currently says we own.
///
/// `Space` never consults the ring directly — [`Space::update_ranges`] is
/// the only way its owned set changes, keeping the two in sync without a
/// circular dependency between the crates.
#[derive(Debug, Clone, Default)]
pub struct Space {
    blocks: Vec<Block>,
}

impl Space {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles local accounting with the ring's current ownership set.
    /// Ranges no longer owned are dropped (their addresses simply stop
    /// being tracked); newly owned ranges start out entirely free; ranges
    /// that persist keep whatever taken addresses still fall inside them.
    pub fn update_ranges(&mut self, new_ranges: &[Range]) {
        let mut sorted = new_ranges.to_vec();
        sorted.sort_by_key(|r| r.start);

        let old = std::mem::take(&mut self.blocks);
        self.blocks = sorted
            .into_iter()
            .map(|range| {
                let taken = old
                    .iter()
                    .filter(|b| b.range.overlaps(&range))
                    .flat_map(|b| b.taken.iter().copied())
                    .filter(|a| range.contains(*a))
                    .collect();
                Block { range, taken }
            })
            .collect();
    }

    /// The ranges currently tracked. Must equal the ring's
    /// `owned_ranges(me)` immediately after every [`Space::update_ranges`]
    /// call.
    #[must_use]
    pub fn owned_ranges(&self) -> Vec<Range> {
        self.blocks.iter().map(|b| b.range).collect()
    }

    fn block_containing(&self, addr: Addr) -> Option<&Block> {
        self.blocks.iter().find(|b| b.range.contains(addr))
    }

    fn block_containing_mut(&mut self, addr: Addr) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.range.contains(addr))
    }

    /// Marks `addr` taken.
    pub fn claim(&mut self, addr: Addr) -> Result<()> {
        let Some(block) = self.block_containing_mut(addr) else {
            return Err(SpaceError::NotOwned(addr));
        };
        if !block.taken.insert(addr) {
            return Err(SpaceError::AlreadyTaken(addr));
        }
        Ok(())
    }

    /// Marks `addr` free again. A no-op if `addr` isn't ours (it may have
    /// been donated away since it was claimed).
    pub fn free(&mut self, addr: Addr) {
        if let Some(block) = self.block_containing_mut(addr) {
            block.taken.remove(&addr);
        }
    }

    /// Returns a free address within `range`, preferring `preferred` (if
    /// given) before falling back to the owned range with the most free
    /// addresses overall. The address is marked taken before it's
    /// returned.
    pub fn allocate_in(&mut self, range: Range, preferred: Option<Range>) -> Option<Addr> {
        let addr = self.pick_free(range, preferred)?;
        self.claim(addr).expect("address just selected was free");
        Some(addr)
    }

    fn pick_free(&self, range: Range, preferred: Option<Range>) -> Option<Addr> {
        if let Some(p) = preferred {
            if let Some(ix) = p.intersect(&range) {
                if let Some(addr) = self.lowest_free_in(ix) {
                    return Some(addr);
                }
            }
        }

        let mut best: Option<(&Block, u32)> = None;
        for block in &self.blocks {
            if !block.range.overlaps(&range) {
                continue;
            }
            let free_here = self.num_free(block.range);
            if free_here == 0 {
                continue;
            }
            if best.map_or(true, |(_, f)| free_here > f) {
                best = Some((block, free_here));
            }
        }
        let (block, _) = best?;
        let ix = block.range.intersect(&range)?;
        self.lowest_free_in(ix)
    }

    fn lowest_free_in(&self, range: Range) -> Option<Addr> {
        self.blocks
            .iter()
            .filter_map(|b| b.range.intersect(&range))
            .flat_map(|ix| (ix.start.0..ix.end.0).map(Addr))
            .find(|a| !self.is_taken(*a))
    }

    fn is_taken(&self, addr: Addr) -> bool {
        self.block_containing(addr)
            .is_some_and(|b| b.taken.contains(&addr))
    }

    /// Number of free addresses within `range`.
    #[must_use]
    pub fn num_free(&self, range: Range) -> u32 {
        self.blocks
            .iter()
            .filter_map(|b| {
                let ix = b.range.intersect(&range)?;
                let taken_in_ix = b.taken.iter().filter(|a| ix.contains(**a)).count() as u32;
                Some(ix.count() - taken_in_ix)
            })
            .sum()
    }

    /// Total free addresses across everything we own.
    #[must_use]
    pub fn num_free_total(&self) -> u32 {
        self.blocks
            .iter()
            .map(|b| b.range.count() - b.taken.len() as u32)
            .sum()
    }

    /// Picks the largest fully-free chunk of at least [`MIN_SUBNET_SIZE`]
    /// addresses within an owned range overlapping `requested`, removes it
    /// from local accounting, and returns it. Returns `(None, false)` if no
    /// chunk that large is available.
    pub fn donate(&mut self, requested: Range) -> (Option<Range>, bool) {
        let mut best: Option<(usize, Range)> = None;
        for (i, block) in self.blocks.iter().enumerate() {
            if let Some(chunk) = largest_free_chunk(block, requested) {
                if best.as_ref().is_none_or(|(_, b)| chunk.count() > b.count()) {
                    best = Some((i, chunk));
                }
            }
        }

        let Some((idx, chunk)) = best else {
            return (None, false);
        };
        if chunk.count() < MIN_SUBNET_SIZE {
            return (None, false);
        }

        self.carve_out(idx, chunk);
        debug!(%chunk, "donated chunk to peer");
        (Some(chunk), true)
    }

    /// Removes `chunk` (known fully free) from block `idx`, splitting the
    /// block around it.
    fn carve_out(&mut self, idx: usize, chunk: Range) {
        let block = self.blocks.remove(idx);
        let mut remainder = Vec::new();
        if block.range.start.0 < chunk.start.0 {
            let range = Range::new(block.range.start, chunk.start);
            let taken = block
                .taken
                .iter()
                .copied()
                .filter(|a| range.contains(*a))
                .collect();
            remainder.push(Block { range, taken });
        }
        if chunk.end.0 < block.range.end.0 {
            let range = Range::new(chunk.end, block.range.end);
            let taken = block
                .taken
                .iter()
                .copied()
                .filter(|a| range.contains(*a))
                .collect();
            remainder.push(Block { range, taken });
        }
        self.blocks.extend(remainder);
        self.blocks.sort_by_key(|b| b.range.start);
    }
}

fn largest_free_chunk(block: &Block, search: Range) -> Option<Range> {
    let ix = block.range.intersect(&search)?;
    let mut best: Option<Range> = None;
    let mut run_start: Option<u32> = None;
    for a in ix.start.0..=ix.end.0 {
        let free = a < ix.end.0 && !block.taken.contains(&Addr(a));
        if free {
            run_start.get_or_insert(a);
        } else if let Some(s) = run_start.take() {
            let candidate = Range::new(Addr(s), Addr(a));
            if best.is_none_or(|b| candidate.count() > b.count()) {
                best = Some(candidate);
            }
        }
    }
    best
}
