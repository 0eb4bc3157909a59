use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::{GeneId, NA};
use crate::fasta::FastaRecord;
use crate::sequence::{LINE_WIDTH, clean, wrap};

static CDS_RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CDS=(\d+)-(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptSequences {
    pub gene: GeneId,
    pub cdna: Option<String>,
    pub cds: Option<String>,
}

impl TranscriptSequences {
    pub fn missing(gene: &GeneId) -> Self {
        Self {
            gene: gene.clone(),
            cdna: None,
            cds: None,
        }
    }

    /// Builds both sequences from a transcript block: the header line carries
    /// `CDS=start-end` (1-based, inclusive) and the remaining lines hold the
    /// cDNA. Blocks without sequence lines count as missing.
    pub fn from_block(gene: &GeneId, raw: &str) -> Self {
        let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty());
        let Some(header) = lines.next() else {
            return Self::missing(gene);
        };
        let seq: String = lines.map(clean).collect();
        if seq.is_empty() {
            return Self::missing(gene);
        }
        let cds = cds_range(header)
            .map(|(start, end)| (start, end.min(seq.len())))
            .filter(|&(start, end)| start >= 1 && start <= end)
            .and_then(|(start, end)| seq.get(start - 1..end))
            .map(|cds| wrap(cds, LINE_WIDTH));
        Self {
            gene: gene.clone(),
            cdna: Some(wrap(&seq, LINE_WIDTH)),
            cds,
        }
    }

    pub fn is_found(&self) -> bool {
        self.cdna.is_some()
    }

    pub fn cdna_record(&self) -> FastaRecord {
        FastaRecord {
            header: self.gene.to_string(),
            body: self.cdna.clone().unwrap_or_else(|| NA.to_string()),
        }
    }

    pub fn cds_record(&self) -> FastaRecord {
        FastaRecord {
            header: self.gene.to_string(),
            body: self.cds.clone().unwrap_or_else(|| NA.to_string()),
        }
    }
}

pub fn cds_range(header: &str) -> Option<(usize, usize)> {
    let caps = CDS_RANGE.captures(header)?;
    let start = caps[1].parse().ok()?;
    let end = caps[2].parse().ok()?;
    Some((start, end))
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptReport {
    pub records: Vec<TranscriptSequences>,
    pub failed: Vec<GeneId>,
}
