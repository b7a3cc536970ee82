//! Whole-set read classification
//!
//! Bad-read marking runs the overlap query for every read, then resolves the
//! bad overlaps in three passes so that one corrupt read does not drag its
//! good partners down with it:
//!
//! 1. reads implicated in at least `decisive_bad_overlaps` bad overlaps are
//!    ORDER10;
//! 2. reads still listing at least `multiple_bad_overlaps` bad partners that
//!    are not yet flagged are ORDER1;
//! 3. reads still listing any such partner are ORDER1.
//!
//! Partners flagged by an earlier pass are removed from every list before the
//! next pass. Passes only ever add flags.
//!
//! All overlap queries run before any flag is applied, so the outcome does
//! not depend on read order.

use rayon::prelude::*;
use tracing::info;

use crate::config::{ClassifierConfig, OverlapConfig};
use crate::error::ModResult;
use crate::overlap::{find_all_overlaps, find_overlaps, OverlapReport, OverlapScratch};
use crate::readset::{BadFlags, Readset};

/// Per-read bad-overlap bookkeeping for the three marking passes
#[derive(Clone, Debug)]
pub struct BadPartnerTally {
    /// Times each read was the partner in a bad overlap
    implicated: Vec<u32>,
    /// Bad partners of each read, capped at `max_bad_partners`
    partners: Vec<Vec<u32>>,
    config: ClassifierConfig,
}

impl BadPartnerTally {
    /// Empty tally for `readset`
    pub fn new(readset: &Readset, config: &ClassifierConfig) -> Self {
        let n = readset.reads().len();
        Self {
            implicated: vec![0; n],
            partners: vec![Vec::new(); n],
            config: config.clone(),
        }
    }

    /// Count the bad overlaps of one query
    ///
    /// A partner is only listed while it has been implicated fewer than
    /// `decisive_bad_overlaps` times; pass 1 flags it anyway.
    pub fn record(&mut self, report: &OverlapReport) {
        let ix = report.read as usize;
        for o in report.overlaps.iter().filter(|o| o.is_bad) {
            let iy = o.target as usize;
            self.implicated[iy] += 1;
            if self.implicated[iy] < self.config.decisive_bad_overlaps
                && self.partners[ix].len() < self.config.max_bad_partners
            {
                self.partners[ix].push(o.target);
            }
        }
    }

    /// Times `ix` was implicated
    pub fn implicated(&self, ix: u32) -> u32 {
        self.implicated[ix as usize]
    }

    /// Remaining bad partners of `ix`
    pub fn partners(&self, ix: u32) -> &[u32] {
        &self.partners[ix as usize]
    }

    /// Pass 1: flag ORDER10 on decisively bad reads; returns how many
    pub fn pass_decisive(&mut self, readset: &mut Readset) -> u32 {
        let mut n = 0;
        for ix in readset.read_ids() {
            if self.implicated[ix as usize] >= self.config.decisive_bad_overlaps {
                readset.read_mut(ix).bad |= BadFlags::ORDER10;
                self.partners[ix as usize].clear();
                n += 1;
            }
        }
        n
    }

    /// Drop partners that are now flagged bad from every list
    pub fn remove_bad_partners(&mut self, readset: &Readset) {
        for list in self.partners.iter_mut() {
            list.retain(|&iy| !readset.read(iy).is_bad());
        }
    }

    /// Pass 2: flag ORDER1 on reads with multiple bad partners left
    pub fn pass_multiple(&mut self, readset: &mut Readset) -> u32 {
        let min = self.config.multiple_bad_overlaps as usize;
        self.flag_lists(readset, min)
    }

    /// Pass 3: flag ORDER1 on reads with any bad partner left
    pub fn pass_single(&mut self, readset: &mut Readset) -> u32 {
        self.flag_lists(readset, 1)
    }

    fn flag_lists(&mut self, readset: &mut Readset, min: usize) -> u32 {
        let mut n = 0;
        for ix in readset.read_ids() {
            let list = &mut self.partners[ix as usize];
            if list.len() >= min {
                readset.read_mut(ix).bad |= BadFlags::ORDER1;
                list.clear();
                n += 1;
            }
        }
        n
    }
}

/// Counts from [`mark_bad_reads`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BadReadSummary {
    /// Reads flagged ORDER10 in pass 1
    pub decisive: u32,
    /// Reads flagged ORDER1 in pass 2
    pub multiple: u32,
    /// Reads flagged ORDER1 in pass 3
    pub single: u32,
    /// Reads with any flag at the end
    pub total_bad: u32,
}

/// Clear and recompute every read's bad flags
pub fn mark_bad_reads(
    readset: &mut Readset,
    overlap_config: &OverlapConfig,
    config: &ClassifierConfig,
) -> ModResult<BadReadSummary> {
    readset.clear_bad();
    let reports = find_all_overlaps(readset, overlap_config)?;

    let mut tally = BadPartnerTally::new(readset, config);
    for report in &reports {
        readset.read_mut(report.read).bad |= report.flags;
        tally.record(report);
    }

    let mut summary = BadReadSummary {
        decisive: tally.pass_decisive(readset),
        ..BadReadSummary::default()
    };
    info!("MB  {} with >={} bad overlaps", summary.decisive, config.decisive_bad_overlaps);

    tally.remove_bad_partners(readset);
    summary.multiple = tally.pass_multiple(readset);
    info!("MB  {} with multiple bad overlaps", summary.multiple);

    tally.remove_bad_partners(readset);
    summary.single = tally.pass_single(readset);
    info!("MB  {} with single bad overlaps", summary.single);

    summary.total_bad = readset.read_ids().filter(|&ix| readset.read(ix).is_bad()).count() as u32;
    Ok(summary)
}

/// Counts from [`mark_contained`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainmentSummary {
    /// Good reads with a containing read
    pub contained: u32,
    /// Good reads without one
    pub not_contained: u32,
    /// Mean length of the reads without one
    pub mean_len: f64,
}

/// For every good read, record the containing read with most shared hits
pub fn mark_contained(readset: &mut Readset, overlap_config: &OverlapConfig) -> ModResult<ContainmentSummary> {
    let rs: &Readset = readset;
    let found: Vec<(u32, u32)> = rs
        .read_ids()
        .into_par_iter()
        .filter(|&ix| !rs.read(ix).is_bad())
        .map_init(
            || OverlapScratch::new(rs),
            |scratch, ix| {
                let report = find_overlaps(rs, ix, scratch, overlap_config)?;
                let best = report
                    .overlaps
                    .iter()
                    .filter(|o| o.is_contained && o.target != ix)
                    .fold(None::<(u32, u32)>, |best, o| match best {
                        Some((_, n)) if n >= o.n_hit => best,
                        _ => Some((o.target, o.n_hit)),
                    });
                Ok((ix, best.map_or(0, |(target, _)| target)))
            },
        )
        .collect::<ModResult<_>>()?;

    for ix in readset.read_ids() {
        readset.read_mut(ix).contained = 0;
    }
    let mut summary = ContainmentSummary::default();
    let mut free_len = 0u64;
    for (ix, target) in found {
        readset.read_mut(ix).contained = target;
        if target != 0 {
            summary.contained += 1;
        } else {
            summary.not_contained += 1;
            free_len += readset.read(ix).len as u64;
        }
    }
    if summary.not_contained > 0 {
        summary.mean_len = free_len as f64 / summary.not_contained as f64;
    }
    info!(
        "MC  found {} contained reads, leaving {} not contained, av length {:.1}",
        summary.contained, summary.not_contained, summary.mean_len
    );
    Ok(summary)
}
