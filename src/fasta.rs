use std::fmt;

use serde::Serialize;

use crate::domain::{GeneId, NA, SEQUENCE_NOT_FOUND, Strand};
use crate::sequence::{LINE_WIDTH, clean, reverse_complement, wrap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FastaRecord {
    pub header: String,
    pub body: String,
}

impl FastaRecord {
    pub fn is_found(&self) -> bool {
        self.body != SEQUENCE_NOT_FOUND && self.body != NA
    }
}

impl fmt::Display for FastaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">{}\n{}", self.header, self.body)
    }
}

/// Builds the promoter record for one gene. The raw block may still carry its
/// service header line; `-` strand sequences are reverse complemented so the
/// record reads 5'->3' towards the transcription start.
pub fn assemble(gene: &GeneId, strand: Strand, raw: Option<&str>) -> FastaRecord {
    let header = format!("{gene} ({strand} strand)");
    let sequence = raw.map(sequence_only).unwrap_or_default();
    if sequence.is_empty() {
        return FastaRecord {
            header,
            body: SEQUENCE_NOT_FOUND.to_string(),
        };
    }
    let oriented = match strand {
        Strand::Forward => sequence,
        Strand::Reverse => reverse_complement(&sequence),
    };
    FastaRecord {
        header,
        body: wrap(&oriented, LINE_WIDTH),
    }
}

pub fn unresolved(gene: &GeneId) -> FastaRecord {
    FastaRecord {
        header: format!("{gene} (coordinates unresolved)"),
        body: SEQUENCE_NOT_FOUND.to_string(),
    }
}

fn sequence_only(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with('>'))
        .map(clean)
        .collect()
}

/// Splits multi-record FASTA text into `(id, sequence)` pairs. The id is the
/// first whitespace-delimited token of the header; records without sequence
/// are kept with an empty string so positions line up with the request.
pub fn parse_blocks(text: &str) -> Vec<(String, String)> {
    text.split('>')
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut lines = block.lines();
            let id = lines
                .next()
                .and_then(|header| header.split_whitespace().next())
                .unwrap_or_default()
                .to_string();
            let seq = lines.map(clean).collect::<String>();
            (id, seq)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene() -> GeneId {
        "TraesCS1A02G000100".parse().unwrap()
    }

    #[test]
    fn assemble_forward_strips_header_noise() {
        let record = assemble(
            &gene(),
            Strand::Forward,
            Some(">chr1A:1-8\nACGT ACGT\n"),
        );
        assert_eq!(record.header, "TraesCS1A02G000100 (+ strand)");
        assert_eq!(record.body, "ACGTACGT");
    }

    #[test]
    fn assemble_reverse_complements_minus_strand() {
        let record = assemble(&gene(), Strand::Reverse, Some("AACG"));
        assert_eq!(record.body, "CGTT");
        assert_eq!(record.to_string(), ">TraesCS1A02G000100 (- strand)\nCGTT");
    }

    #[test]
    fn assemble_wraps_at_sixty() {
        let record = assemble(&gene(), Strand::Forward, Some(&"C".repeat(61)));
        assert_eq!(record.body.lines().count(), 2);
    }

    #[test]
    fn assemble_without_block_keeps_the_gene() {
        let record = assemble(&gene(), Strand::Reverse, None);
        assert_eq!(record.body, SEQUENCE_NOT_FOUND);
        assert!(!record.is_found());
        let record = assemble(&gene(), Strand::Forward, Some(">header only\n"));
        assert_eq!(record.body, SEQUENCE_NOT_FOUND);
    }

    #[test]
    fn parse_blocks_reads_ids_and_sequences() {
        let blocks = parse_blocks(">a desc\nAC\nGT\n>b\n\n>c x\nNN\n");
        assert_eq!(
            blocks,
            vec![
                ("a".to_string(), "ACGT".to_string()),
                ("b".to_string(), String::new()),
                ("c".to_string(), "NN".to_string()),
            ]
        );
    }
}
