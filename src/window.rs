//! Upstream (promoter) window arithmetic.
//!
//! Coordinates follow the feature table: 1-based, inclusive. For a `+` gene the
//! window is the `upstream_len` bases ending just before `start`; for a `-` gene
//! it is the `upstream_len` bases starting just after `end`, which is upstream
//! in transcript terms. This is the only place that looks at strand to decide
//! where a promoter lies.
//!
//! Position 0 is not a base. A window may start at 0 when it is truncated at
//! the chromosome origin, but it is never requested from 0: the region sent to
//! the sequence service starts at 1, and a window ending at 0 is empty.

use std::fmt;

use serde::Serialize;

use crate::domain::{Assembly, GeneId, GeneRecord, Strand};

pub const DEFAULT_UPSTREAM_LEN: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExtractionWindow {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub gene: GeneId,
    pub orientation: Strand,
}

impl ExtractionWindow {
    pub fn for_record(record: &GeneRecord, upstream_len: u64) -> Self {
        compute(
            &record.id,
            &record.chromosome,
            record.start,
            record.end,
            record.strand,
            upstream_len,
        )
    }

    /// True when the window holds no bases, e.g. a `+` gene starting at the
    /// chromosome origin.
    pub fn is_empty(&self) -> bool {
        self.end == 0 || self.end < self.start
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.first_base() + 1
        }
    }

    fn first_base(&self) -> u64 {
        self.start.max(1)
    }

    /// Region string for the sequence service, e.g. `chr1A_Fielder:3000-4999`.
    pub fn query(&self, assembly: Assembly) -> String {
        self.region().query(assembly)
    }

    /// Key used to pair a window with the service response, independent of the
    /// gene that asked for it.
    pub fn region(&self) -> Region {
        Region {
            chromosome: self.chromosome.clone(),
            start: self.first_base(),
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn query(&self, assembly: Assembly) -> String {
        format!(
            "{}_{}:{}-{}",
            self.chromosome,
            assembly.chromosome_suffix(),
            self.start,
            self.end
        )
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

pub fn compute(
    gene: &GeneId,
    chromosome: &str,
    start: u64,
    end: u64,
    strand: Strand,
    upstream_len: u64,
) -> ExtractionWindow {
    let (window_start, window_end) = match strand {
        Strand::Forward => (start.saturating_sub(upstream_len), start.saturating_sub(1)),
        Strand::Reverse => (end.saturating_add(1), end.saturating_add(upstream_len)),
    };
    ExtractionWindow {
        chromosome: chromosome.to_string(),
        start: window_start,
        end: window_end,
        gene: gene.clone(),
        orientation: strand,
    }
}
