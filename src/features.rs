use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::{debug, warn};

use crate::domain::{GeneId, GeneRecord, Provenance, Strand};
use crate::error::GeneBatchError;

const TRANSCRIPT_FEATURES: &[&str] = &["mRNA", "transcript"];

/// In-memory lookup from transcript id to coordinates, built from a GFF3
/// feature table.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    records: HashMap<GeneId, GeneRecord>,
}

impl FeatureIndex {
    /// Opens a feature table on disk. `.gz` files are decompressed on the fly,
    /// and a missing plain path falls back to `<path>.gz`.
    pub fn open(path: &Path, wanted: &[GeneId]) -> Result<Self, GeneBatchError> {
        let path = locate(path)?;
        let file = File::open(&path).map_err(|err| GeneBatchError::FeatureTableRead {
            path: path.clone(),
            message: err.to_string(),
        })?;
        let reader: Box<dyn Read> = if is_gzip(&path) {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let index = Self::build(BufReader::new(reader), wanted).map_err(|err| match err {
            GeneBatchError::Filesystem(message) => GeneBatchError::FeatureTableRead {
                path: path.clone(),
                message,
            },
            other => other,
        })?;
        debug!(path = %path.display(), transcripts = index.len(), "feature table indexed");
        Ok(index)
    }

    /// Indexes transcript rows whose `ID` is in `wanted`; an empty `wanted`
    /// indexes every transcript.
    pub fn build<R: BufRead>(reader: R, wanted: &[GeneId]) -> Result<Self, GeneBatchError> {
        let wanted: HashSet<&str> = wanted.iter().map(GeneId::as_str).collect();
        let mut records = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| GeneBatchError::Filesystem(err.to_string()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = trimmed.split('\t').collect();
            if cols.len() < 9 || !TRANSCRIPT_FEATURES.contains(&cols[2]) {
                continue;
            }
            let attrs = parse_attributes(cols[8]);
            let Some(id) = attrs.get("ID") else {
                continue;
            };
            if !wanted.is_empty() && !wanted.contains(id) {
                continue;
            }
            match parse_row(id, &cols) {
                Ok(record) => {
                    records.entry(record.id.clone()).or_insert(record);
                }
                Err(err) => warn!(line = line_no + 1, error = %err, "skipping feature row"),
            }
        }
        Ok(Self { records })
    }

    pub fn lookup(&self, id: &GeneId) -> Option<&GeneRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_row(id: &str, cols: &[&str]) -> Result<GeneRecord, GeneBatchError> {
    let id: GeneId = id.parse()?;
    let start = cols[3]
        .trim()
        .parse::<u64>()
        .map_err(|err| GeneBatchError::Malformed(format!("{id}: start {:?}: {err}", cols[3])))?;
    let end = cols[4]
        .trim()
        .parse::<u64>()
        .map_err(|err| GeneBatchError::Malformed(format!("{id}: end {:?}: {err}", cols[4])))?;
    let strand: Strand = cols[6]
        .parse()
        .map_err(|_| GeneBatchError::Malformed(format!("{id}: strand {:?}", cols[6])))?;
    GeneRecord::new(id, cols[0], start, end, strand, Provenance::LocalIndex)
}

/// `key=value;key=value`; pairs without `=` or with an empty key are dropped.
pub fn parse_attributes(raw: &str) -> HashMap<&str, &str> {
    raw.split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn locate(path: &Path) -> Result<PathBuf, GeneBatchError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let mut gz = path.as_os_str().to_owned();
    gz.push(".gz");
    let gz = PathBuf::from(gz);
    if gz.exists() {
        return Ok(gz);
    }
    Err(GeneBatchError::MissingFeatureTable(path.to_path_buf()))
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}
