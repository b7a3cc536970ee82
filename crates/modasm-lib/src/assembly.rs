//! Greedy assembly path extension
//!
//! A path is a chain of nodes, each a fingerprint ID with a strand bit in the
//! same packing as read hits. Starting from a single-copy seed, the reads
//! containing the seed vote on the next node; the candidate backed by more
//! than `majority_fraction` of the active reads is appended and the walk
//! repeats until no candidate wins. Active reads that missed the last node
//! still count towards the majority while they wait to resync.
//!
//! The reads that took part in the walk are placed along the path; the
//! resulting [`Layout`] is the draft layout of the region around the seed.

use std::io::{self, Write};

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::AssemblyConfig;
use crate::constants::{TOPBIT, TOPMASK};
use crate::error::{ModError, ModResult};
use crate::readset::Readset;

/// Where an assembly starts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seed {
    /// A single-copy fingerprint ID
    Fingerprint(u32),
    /// The first single-copy fingerprint of a read
    Read(u32),
}

impl Seed {
    /// Resolve to a single-copy fingerprint ID
    pub fn resolve(self, readset: &Readset) -> ModResult<u32> {
        let ms = readset.modset();
        match self {
            Seed::Fingerprint(id) => {
                if id == 0 || id > ms.max() {
                    return Err(ModError::UnknownFingerprint { id, max: ms.max() });
                }
                if !ms.is_copy1(id) {
                    return Err(ModError::SeedNotUnique {
                        id,
                        copy: ms.copy(id),
                    });
                }
                Ok(id)
            }
            Seed::Read(ix) => {
                readset.check_read(ix)?;
                readset
                    .hits(ix)
                    .iter()
                    .map(|&h| h & TOPMASK)
                    .find(|&id| ms.is_copy1(id))
                    .ok_or(ModError::NoUniqueSeed { read: ix })
            }
        }
    }
}

#[inline]
fn flip(node: u32) -> u32 {
    node ^ TOPBIT
}

/// Directed step between consecutive hits of one read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Source node
    pub from: u32,
    /// Target node
    pub to: u32,
    /// Bases between the two fingerprints
    pub distance: u32,
    /// Read the step was taken from
    pub read: u32,
    /// Index of the source hit in the read
    pub from_index: u32,
    /// Step runs against the read's hit order
    pub reversed: bool,
}

/// Edges of a set of reads, sorted by source node
#[derive(Clone, Debug, Default)]
pub struct EdgeList {
    edges: Vec<Edge>,
}

impl EdgeList {
    /// Edges of `reads`, sorted
    pub fn build(readset: &Readset, reads: impl IntoIterator<Item = u32>) -> Self {
        let mut list = Self::default();
        for iy in reads {
            list.add_read(readset, iy);
        }
        list.sort();
        list
    }

    /// Append both traversal directions of read `iy`; call [`Self::sort`] after
    pub fn add_read(&mut self, readset: &Readset, iy: u32) {
        let hits = readset.hits(iy);
        let dx = readset.dx(iy);
        for j in 1..hits.len() {
            self.edges.push(Edge {
                from: hits[j - 1],
                to: hits[j],
                distance: dx[j],
                read: iy,
                from_index: j as u32 - 1,
                reversed: false,
            });
            self.edges.push(Edge {
                from: flip(hits[j]),
                to: flip(hits[j - 1]),
                distance: dx[j],
                read: iy,
                from_index: j as u32,
                reversed: true,
            });
        }
    }

    /// Restore source order
    pub fn sort(&mut self) {
        self.edges
            .sort_unstable_by_key(|e| (e.from, e.read, e.from_index, e.reversed));
    }

    /// Edges leaving `node`
    pub fn leaving(&self, node: u32) -> &[Edge] {
        let lo = self.edges.partition_point(|e| e.from < node);
        let hi = self.edges.partition_point(|e| e.from <= node);
        &self.edges[lo..hi]
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether there are no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// State of a walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkState {
    /// The last step appended a node
    Extending,
    /// No further node can be chosen
    Terminated,
}

/// One node of an assembly path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    /// Fingerprint ID
    pub id: u32,
    /// Strand of the fingerprint along the path
    pub is_forward: bool,
    /// Start of the fingerprint in path coordinates
    pub position: i64,
    /// Reads that voted for it (reads at the seed for the first node)
    pub support: u32,
}

/// A read placed along a path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Read ID
    pub read: u32,
    /// First base in path coordinates
    pub start: i64,
    /// One past the last base
    pub end: i64,
    /// Read runs along the path in its own orientation
    pub is_forward: bool,
    /// Path nodes the read supported
    pub support: u32,
}

/// Draft layout from one assembly run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    /// Path nodes in path order
    pub nodes: Vec<PathNode>,
    /// Read placements, by start
    pub placements: Vec<Placement>,
}

impl Layout {
    /// Extent of the placed reads
    pub fn span(&self) -> Option<(i64, i64)> {
        let start = self.placements.iter().map(|p| p.start).min()?;
        let end = self.placements.iter().map(|p| p.end).max()?;
        Some((start, end))
    }

    /// Write `AN` node lines, `AP` placement lines and an `AL` summary
    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        for n in &self.nodes {
            writeln!(
                out,
                "AN\t{}\t{}\t{}\t{}",
                n.id,
                if n.is_forward { '+' } else { '-' },
                n.position,
                n.support
            )?;
        }
        for p in &self.placements {
            writeln!(
                out,
                "AP\t{}\t{}\t{}\t{}\t{}",
                p.read,
                p.start,
                p.end,
                if p.is_forward { '+' } else { '-' },
                p.support
            )?;
        }
        let (start, end) = self.span().unwrap_or((0, 0));
        writeln!(
            out,
            "AL\tnodes {}\treads {}\tspan {}",
            self.nodes.len(),
            self.placements.len(),
            end - start
        )
    }
}

#[derive(Clone, Debug)]
struct ActiveRead {
    /// Hit matching the last node the read followed
    index: usize,
    reversed: bool,
    /// The read's current hit is the path's current node
    synced: bool,
    misses: u32,
    start: i64,
    support: u32,
    /// Dropped with the read when it ends
    edges: EdgeList,
}

/// One walk from a seed node
pub struct PathExtender<'a> {
    readset: &'a Readset,
    config: &'a AssemblyConfig,
    active: AHashMap<u32, ActiveRead>,
    seen: AHashSet<u32>,
    on_path: AHashSet<u32>,
    nodes: Vec<PathNode>,
    placements: Vec<Placement>,
    current: u32,
    position: i64,
    state: WalkState,
}

impl<'a> PathExtender<'a> {
    /// Start at `node` (fingerprint ID with strand bit) with the good reads
    /// containing it
    pub fn new(readset: &'a Readset, node: u32, config: &'a AssemblyConfig) -> Self {
        let mut walk = Self {
            readset,
            config,
            active: AHashMap::new(),
            seen: AHashSet::new(),
            on_path: AHashSet::new(),
            nodes: Vec::new(),
            placements: Vec::new(),
            current: node,
            position: 0,
            state: WalkState::Extending,
        };
        let support = walk.admit(node, 0) as u32;
        walk.on_path.insert(node & TOPMASK);
        walk.nodes.push(PathNode {
            id: node & TOPMASK,
            is_forward: node & TOPBIT != 0,
            position: 0,
            support,
        });
        debug!(
            "walk from {} with {} reads, {} edges",
            node & TOPMASK,
            support,
            walk.edge_count()
        );
        walk
    }

    /// Current state
    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Edges held by the reads still active
    pub fn edge_count(&self) -> usize {
        self.active.values().map(|a| a.edges.len()).sum()
    }

    /// Try to append one node
    pub fn step(&mut self) -> WalkState {
        if self.state == WalkState::Terminated {
            return self.state;
        }
        if self.nodes.len() >= self.config.max_steps {
            return self.terminate("step limit");
        }

        let mut votes: Vec<(u32, u32, u32)> = Vec::new();
        for (&r, a) in &self.active {
            if !a.synced {
                continue;
            }
            for e in a.edges.leaving(self.current) {
                if a.index == e.from_index as usize && a.reversed == e.reversed {
                    votes.push((r, e.to, e.distance));
                }
            }
        }

        // synced reads without a vote have no hits left
        let voters: AHashSet<u32> = votes.iter().map(|v| v.0).collect();
        let mut ended: Vec<u32> = self
            .active
            .iter()
            .filter(|&(r, a)| a.synced && !voters.contains(r))
            .map(|(&r, _)| r)
            .collect();
        ended.sort_unstable();
        for r in ended {
            self.finish(r);
        }
        if votes.is_empty() {
            return self.terminate("no read continues");
        }

        let mut tally: AHashMap<u32, u32> = AHashMap::new();
        for v in &votes {
            *tally.entry(v.1).or_insert(0) += 1;
        }
        let Some((winner, support)) = tally
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        else {
            return self.terminate("no candidate");
        };
        if support as f64 <= self.config.majority_fraction * self.active.len() as f64 {
            return self.terminate("no majority");
        }
        if self.on_path.contains(&(winner & TOPMASK)) {
            return self.terminate("fingerprint already on path");
        }

        let mut distances: Vec<u32> = votes
            .iter()
            .filter(|v| v.1 == winner)
            .map(|v| v.2)
            .collect();
        distances.sort_unstable();
        let distance = distances[(distances.len() - 1) / 2];
        let spread = distances[distances.len() - 1] - distances[0];
        if spread > self.config.distance_tolerance {
            debug!(
                "distances to {} spread over {} bases, using median {}",
                winner & TOPMASK,
                spread,
                distance
            );
        }

        let winners: AHashSet<u32> = votes
            .iter()
            .filter(|v| v.1 == winner)
            .map(|v| v.0)
            .collect();
        let readset = self.readset;
        let lookahead = self.config.lookahead;
        let mut dropped = Vec::new();
        for (&r, a) in self.active.iter_mut() {
            if winners.contains(&r) {
                a.index = if a.reversed { a.index - 1 } else { a.index + 1 };
                a.synced = true;
                a.support += 1;
                continue;
            }
            match find_ahead(readset.hits(r), a, winner, lookahead) {
                Some(index) => {
                    a.index = index;
                    a.synced = true;
                    a.support += 1;
                }
                None => {
                    a.synced = false;
                    a.misses += 1;
                    if a.misses > self.config.max_misses {
                        dropped.push(r);
                    }
                }
            }
        }
        dropped.sort_unstable();
        for r in dropped {
            self.finish(r);
        }

        self.position += distance as i64;
        self.current = winner;
        self.on_path.insert(winner & TOPMASK);
        self.nodes.push(PathNode {
            id: winner & TOPMASK,
            is_forward: winner & TOPBIT != 0,
            position: self.position,
            support,
        });
        if self.config.admit_new_reads {
            self.admit(winner, self.position);
        }
        self.state
    }

    /// Step until terminated
    pub fn run(mut self) -> Layout {
        while self.step() == WalkState::Extending {}
        self.placements
            .sort_unstable_by_key(|p| (p.start, p.read));
        Layout {
            nodes: self.nodes,
            placements: self.placements,
        }
    }

    /// Add the good reads containing `node` not seen before; returns how many
    fn admit(&mut self, node: u32, position: i64) -> usize {
        let readset = self.readset;
        let id = node & TOPMASK;
        let k = readset.modset().hasher().k() as i64;
        let mut added = 0;
        for &iy in readset.inverse().reads_containing(id) {
            if readset.read(iy).is_bad() || self.seen.contains(&iy) {
                continue;
            }
            let hits = readset.hits(iy);
            let Some(index) = hits.iter().position(|&h| h & TOPMASK == id) else {
                continue;
            };
            self.seen.insert(iy);
            let reversed = hits[index] != node;
            let p = readset.positions(iy)[index] as i64;
            let offset = if reversed {
                readset.read(iy).len as i64 - k - p
            } else {
                p
            };
            self.active.insert(
                iy,
                ActiveRead {
                    index,
                    reversed,
                    synced: true,
                    misses: 0,
                    start: position - offset,
                    support: 1,
                    edges: EdgeList::build(readset, [iy]),
                },
            );
            added += 1;
        }
        added
    }

    fn finish(&mut self, r: u32) {
        if let Some(a) = self.active.remove(&r) {
            self.placements.push(Placement {
                read: r,
                start: a.start,
                end: a.start + self.readset.read(r).len as i64,
                is_forward: !a.reversed,
                support: a.support,
            });
        }
    }

    fn terminate(&mut self, reason: &str) -> WalkState {
        debug!(
            "walk stopped after {} nodes at {}: {}",
            self.nodes.len(),
            self.current & TOPMASK,
            reason
        );
        let mut remaining: Vec<u32> = self.active.keys().copied().collect();
        remaining.sort_unstable();
        for r in remaining {
            self.finish(r);
        }
        self.state = WalkState::Terminated;
        self.state
    }
}

/// Index of `winner` within `lookahead` hits past the read's current hit
fn find_ahead(hits: &[u32], a: &ActiveRead, winner: u32, lookahead: usize) -> Option<usize> {
    (1..=lookahead).find_map(|step| {
        let index = if a.reversed {
            a.index.checked_sub(step)?
        } else {
            a.index + step
        };
        let h = *hits.get(index)?;
        let node = if a.reversed { flip(h) } else { h };
        (node == winner).then_some(index)
    })
}

/// Walk from `seed` along its forward strand
pub fn assemble(readset: &Readset, seed: Seed, config: &AssemblyConfig) -> ModResult<Layout> {
    let id = seed.resolve(readset)?;
    Ok(PathExtender::new(readset, id | TOPBIT, config).run())
}

/// Walk from `seed` in both directions and join the two halves
///
/// Path coordinates have the seed fingerprint starting at 0.
pub fn assemble_both_ways(readset: &Readset, seed: Seed, config: &AssemblyConfig) -> ModResult<Layout> {
    let id = seed.resolve(readset)?;
    let k = readset.modset().hasher().k() as i64;
    let forward = PathExtender::new(readset, id | TOPBIT, config).run();
    let backward = PathExtender::new(readset, id, config).run();

    let seeded: AHashSet<u32> = readset
        .inverse()
        .reads_containing(id)
        .iter()
        .copied()
        .filter(|&iy| !readset.read(iy).is_bad())
        .collect();

    let mut nodes: Vec<PathNode> = backward
        .nodes
        .iter()
        .skip(1)
        .rev()
        .map(|n| PathNode {
            id: n.id,
            is_forward: !n.is_forward,
            position: -n.position,
            support: n.support,
        })
        .collect();
    nodes.extend(forward.nodes);

    let mut placed: AHashMap<u32, Placement> = AHashMap::new();
    for p in forward.placements {
        placed.insert(p.read, p);
    }
    for p in backward.placements {
        let mirrored = Placement {
            read: p.read,
            start: k - p.end,
            end: k - p.start,
            is_forward: !p.is_forward,
            support: p.support,
        };
        match placed.get_mut(&p.read) {
            Some(q) => {
                q.start = q.start.min(mirrored.start);
                q.end = q.end.max(mirrored.end);
                q.support += mirrored.support;
                if seeded.contains(&p.read) {
                    q.support -= 1;
                }
            }
            None => {
                placed.insert(p.read, mirrored);
            }
        }
    }
    let mut placements: Vec<Placement> = placed.into_values().collect();
    placements.sort_unstable_by_key(|p| (p.start, p.read));

    let layout = Layout { nodes, placements };
    info!(
        "AS  seed {}: {} nodes, {} reads, span {}",
        id,
        layout.nodes.len(),
        layout.placements.len(),
        layout.span().map_or(0, |(s, e)| e - s)
    );
    Ok(layout)
}

/// Assemble independent seeds in parallel on the current rayon pool
pub fn assemble_seeds(readset: &Readset, seeds: &[Seed], config: &AssemblyConfig) -> ModResult<Vec<Layout>> {
    seeds
        .par_iter()
        .map(|&seed| assemble_both_ways(readset, seed, config))
        .collect()
}
