use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GeneBatchError;

pub const NOT_FOUND: &str = "not found";
pub const ERROR: &str = "error";
pub const NA: &str = "NA";
pub const SEQUENCE_NOT_FOUND: &str = "sequence not found";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneId(String);

impl GeneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transcript identifier of the first isoform (`<id>.1`), as used by the
    /// WheatOmics transcript database.
    pub fn first_isoform(&self) -> String {
        if self.0.ends_with(".1") {
            self.0.clone()
        } else {
            format!("{}.1", self.0)
        }
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = GeneBatchError;

    /// Any non-blank line is accepted. Whether it names a real gene is for the
    /// lookup to decide, so a malformed line is reported per item later.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(GeneBatchError::InvalidGeneId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Parses a plain-text gene list: one identifier per line, surrounding
/// whitespace trimmed, blank lines ignored. Order and duplicates are kept.
pub fn parse_gene_list(text: &str) -> Result<Vec<GeneId>, GeneBatchError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

impl Strand {
    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Strand {
    type Err = GeneBatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Err(GeneBatchError::InvalidStrand(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    LocalIndex,
    RemoteLookup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneRecord {
    pub id: GeneId,
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub provenance: Provenance,
}

impl GeneRecord {
    pub fn new(
        id: GeneId,
        chromosome: impl Into<String>,
        start: u64,
        end: u64,
        strand: Strand,
        provenance: Provenance,
    ) -> Result<Self, GeneBatchError> {
        if end < start {
            return Err(GeneBatchError::Malformed(format!(
                "{id}: end {end} is before start {start}"
            )));
        }
        Ok(Self {
            id,
            chromosome: chromosome.into(),
            start,
            end,
            strand,
            provenance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedReason {
    /// Unknown upstream, absent from the feature table, or still unreachable
    /// after every retry.
    NotFound,
    /// A record exists but its location or strand is missing.
    Incomplete,
    /// Unparseable page or unexpected status.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(GeneRecord),
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn record(&self) -> Option<&GeneRecord> {
        match self {
            Resolution::Resolved(record) => Some(record),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// The two reference assemblies served by WheatOmics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Assembly {
    ChineseSpring,
    Fielder,
}

impl Assembly {
    /// Suffix appended to chromosome names in sequence queries.
    pub fn chromosome_suffix(self) -> &'static str {
        match self {
            Assembly::ChineseSpring => "Chinese_Spring1.0",
            Assembly::Fielder => "Fielder",
        }
    }

    /// Genome database name understood by the sequence service.
    pub fn sequence_database(self) -> &'static str {
        match self {
            Assembly::ChineseSpring => "all_genomes",
            Assembly::Fielder => "Fielder.genome",
        }
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assembly::ChineseSpring => write!(f, "chinese-spring"),
            Assembly::Fielder => write!(f, "fielder"),
        }
    }
}

impl FromStr for Assembly {
    type Err = GeneBatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chinese-spring" | "chinese_spring" | "cs" => Ok(Assembly::ChineseSpring),
            "fielder" => Ok(Assembly::Fielder),
            _ => Err(GeneBatchError::InvalidAssembly(value.to_string())),
        }
    }
}
