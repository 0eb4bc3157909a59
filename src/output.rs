use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::annotation::AnnotationResult;
use crate::app::{ProgressEvent, ProgressSink};
use crate::fasta::FastaRecord;
use crate::homolog::HomologResult;
use crate::transcript::TranscriptReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct Report<'a, T: Serialize> {
    pub generated_at: DateTime<Utc>,
    pub command: &'static str,
    pub genes: usize,
    pub results: &'a T,
}

impl<'a, T: Serialize> Report<'a, T> {
    pub fn new(command: &'static str, genes: usize, results: &'a T) -> Self {
        Self {
            generated_at: Utc::now(),
            command,
            genes,
            results,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_annotations(results: &[AnnotationResult]) -> io::Result<()> {
        Self::print_json(&Report::new("annotate", results.len(), &results))
    }

    pub fn print_promoters(records: &[FastaRecord]) -> io::Result<()> {
        Self::print_json(&Report::new("promoters", records.len(), &records))
    }

    pub fn print_transcripts(report: &TranscriptReport) -> io::Result<()> {
        Self::print_json(&Report::new("transcripts", report.records.len(), report))
    }

    pub fn print_homologs(rows: &[HomologResult]) -> io::Result<()> {
        Self::print_json(&Report::new("homologs", rows.len(), &rows))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub const TSV_HEADER: &'static str = "gene_id\tthird_party_id\tdescription\ttranslated";
    pub const HOMOLOG_HEADER: &'static str = "query\tfielder_id";

    pub fn write_tsv<W: Write>(out: &mut W, results: &[AnnotationResult]) -> io::Result<()> {
        writeln!(out, "{}", Self::TSV_HEADER)?;
        for result in results {
            writeln!(out, "{}", result.tsv_row())?;
        }
        Ok(())
    }

    pub fn write_fasta<W: Write>(out: &mut W, records: &[FastaRecord]) -> io::Result<()> {
        for record in records {
            writeln!(out, "{record}")?;
        }
        Ok(())
    }

    pub fn write_homologs<W: Write>(out: &mut W, rows: &[HomologResult]) -> io::Result<()> {
        writeln!(out, "{}", Self::HOMOLOG_HEADER)?;
        for row in rows {
            writeln!(out, "{}", row.tsv_row())?;
        }
        Ok(())
    }

    /// cDNA records, a blank line, then CDS records.
    pub fn write_transcripts<W: Write>(out: &mut W, report: &TranscriptReport) -> io::Result<()> {
        for seqs in &report.records {
            writeln!(out, "{}", seqs.cdna_record())?;
        }
        writeln!(out)?;
        for seqs in &report.records {
            writeln!(out, "{}", seqs.cds_record())?;
        }
        Ok(())
    }
}

/// Sends progress to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        let percent = (event.fraction * 100.0).round() as u32;
        info!(percent, "{}", event.message);
    }
}

/// Discards progress.
pub struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeneId;
    use crate::transcript::TranscriptSequences;

    fn gene(raw: &str) -> GeneId {
        raw.parse().unwrap()
    }

    #[test]
    fn tsv_has_header_and_one_row_per_result() {
        let results = vec![AnnotationResult {
            gene: gene("TraesCS1A02G000100"),
            third_party_id: "TraesCS1A01G000100".to_string(),
            description: "kinase".to_string(),
            translated: "激酶".to_string(),
        }];
        let mut buf = Vec::new();
        TextOutput::write_tsv(&mut buf, &results).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], TextOutput::TSV_HEADER);
        assert_eq!(lines[1], "TraesCS1A02G000100\tTraesCS1A01G000100\tkinase\t激酶");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn transcripts_list_cdna_before_cds() {
        let id = gene("g1");
        let report = TranscriptReport {
            records: vec![TranscriptSequences::from_block(&id, ">g1.1 CDS=1-2\nACGT\n")],
            failed: Vec::new(),
        };
        let mut buf = Vec::new();
        TextOutput::write_transcripts(&mut buf, &report).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), ">g1\nACGT\n\n>g1\nAC\n");
    }

    #[test]
    fn homolog_table_keeps_sentinels() {
        let rows = vec![
            HomologResult::sentinel("TraesCS1A02G000100", "TraesFLD1A01G000100"),
            HomologResult::sentinel("TraesCS2B02G000200", crate::homolog::SUBMIT_FAILED),
        ];
        let mut buf = Vec::new();
        TextOutput::write_homologs(&mut buf, &rows).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "query\tfielder_id\nTraesCS1A02G000100\tTraesFLD1A01G000100\nTraesCS2B02G000200\tsubmit failed\n"
        );
    }

    #[test]
    fn json_report_carries_timestamp() {
        let results: Vec<AnnotationResult> = Vec::new();
        let value = serde_json::to_value(Report::new("annotate", 0, &results)).unwrap();
        assert_eq!(value["command"], "annotate");
        assert!(value["generated_at"].is_string());
        assert_eq!(value["results"], serde_json::json!([]));
    }
}
