use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::debug;

use crate::domain::{
    Assembly, GeneId, GeneRecord, Provenance, Resolution, Strand, UnresolvedReason,
};
use crate::error::GeneBatchError;
use crate::fasta::parse_blocks;
use crate::window::Region;

pub const DEFAULT_BASE_URL: &str = "http://wheatomics.sdau.edu.cn/cgi-bin";

/// Gene detail lookups (coordinates, strand, description).
pub trait GeneMetadataClient: Send + Sync {
    /// `Unresolved(NotFound)` when the gene is unknown, `Unresolved(Incomplete)`
    /// when the page lacks a location or strand.
    fn resolve(&self, id: &GeneId) -> Result<Resolution, GeneBatchError>;

    fn describe(&self, id: &GeneId) -> Result<Option<GeneDescription>, GeneBatchError>;
}

/// Raw sequence retrieval.
pub trait SequenceClient: Send + Sync {
    /// One slot per requested region, `None` where the service returned nothing.
    fn fetch_sequences(
        &self,
        assembly: Assembly,
        regions: &[Region],
    ) -> Result<Vec<Option<String>>, GeneBatchError>;

    /// Raw FASTA block (header included) of the gene's first transcript.
    fn fetch_transcript(&self, id: &GeneId) -> Result<Option<String>, GeneBatchError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneDescription {
    pub third_party_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenePage {
    pub third_party_id: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub strand: Option<String>,
}

#[derive(Clone)]
pub struct WheatOmicsHttpClient {
    client: Client,
    base_url: String,
}

impl WheatOmicsHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeneBatchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("genebatch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeneBatchError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn gene_page(&self, id: &GeneId) -> Result<Option<GenePage>, GeneBatchError> {
        let url = format!("{}/geneDetail.py", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("search", id.as_str())])
            .send()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::handle_status(response)?;
        let html = response
            .text()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(parse_gene_page(&html))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, GeneBatchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "WheatOmics request failed".to_string());
        Err(GeneBatchError::Status { status, message })
    }
}

impl GeneMetadataClient for WheatOmicsHttpClient {
    fn resolve(&self, id: &GeneId) -> Result<Resolution, GeneBatchError> {
        let Some(page) = self.gene_page(id)? else {
            return Ok(Resolution::Unresolved(UnresolvedReason::NotFound));
        };
        let (Some(location), Some(strand)) = (page.location, page.strand) else {
            return Ok(Resolution::Unresolved(UnresolvedReason::Incomplete));
        };
        let (chromosome, start, end) = parse_location(&location)?;
        let strand: Strand = strand
            .parse()
            .map_err(|_| GeneBatchError::Malformed(format!("{id}: strand {strand:?}")))?;
        let record = GeneRecord::new(
            id.clone(),
            chromosome,
            start,
            end,
            strand,
            Provenance::RemoteLookup,
        )?;
        Ok(Resolution::Resolved(record))
    }

    fn describe(&self, id: &GeneId) -> Result<Option<GeneDescription>, GeneBatchError> {
        Ok(self.gene_page(id)?.map(|page| GeneDescription {
            third_party_id: page.third_party_id,
            description: page.description,
        }))
    }
}

impl SequenceClient for WheatOmicsHttpClient {
    fn fetch_sequences(
        &self,
        assembly: Assembly,
        regions: &[Region],
    ) -> Result<Vec<Option<String>>, GeneBatchError> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        let queries: Vec<String> = regions.iter().map(|r| r.query(assembly)).collect();
        let url = format!("{}/get_fasta_bedtools.py", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("database", assembly.sequence_database()),
                ("ID", queries.join("\n").as_str()),
            ])
            .send()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let html = response
            .text()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        let Some(text) = extract_sequence_div(&html) else {
            debug!(regions = regions.len(), "sequence service returned no sequence block");
            return Ok(vec![None; regions.len()]);
        };
        Ok(match_blocks(&queries, &text))
    }

    fn fetch_transcript(&self, id: &GeneId) -> Result<Option<String>, GeneBatchError> {
        let url = format!("{}/get_fasta_bedtools.py", self.base_url);
        let isoform = id.first_isoform();
        let response = self
            .client
            .get(&url)
            .query(&[("database", "all_gene"), ("ID", isoform.as_str())])
            .send()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let html = response
            .text()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(extract_sequence_div(&html))
    }
}

static GENE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table\b[^>]*\bid\s*=\s*["']?genetable\b["']?[^>]*>(.*?)</table>"#).unwrap()
});
pub(crate) static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static HEADER_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<th\b[^>]*>(.*?)</th>").unwrap());
pub(crate) static DATA_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").unwrap());
static SEQ_DIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<div\b[^>]*\bid\s*=\s*["']?seq\b["']?[^>]*>(.*?)</div>"#).unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Text lines of an HTML fragment, tags treated as line breaks.
fn text_lines(fragment: &str) -> Vec<String> {
    TAG.replace_all(fragment, "\n")
        .lines()
        .map(|line| decode_entities(line.trim()))
        .filter(|line| !line.is_empty())
        .collect()
}

pub(crate) fn cell_text(fragment: &str) -> String {
    text_lines(fragment).join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Extracts the fields of a gene detail page. `None` when the page has no
/// gene table, which is how the portal reports an unknown gene.
pub fn parse_gene_page(html: &str) -> Option<GenePage> {
    let table = GENE_TABLE.captures(html)?.get(1)?.as_str();
    let mut page = GenePage {
        third_party_id: DATA_CELL
            .captures(table)
            .and_then(|cell| text_lines(&cell[1]).into_iter().nth(2)),
        ..GenePage::default()
    };
    for row in ROW.captures_iter(table) {
        let (Some(th), Some(td)) = (HEADER_CELL.captures(&row[1]), DATA_CELL.captures(&row[1]))
        else {
            continue;
        };
        match cell_text(&th[1]).as_str() {
            "Location:" => page.location = Some(cell_text(&td[1])),
            "Strand:" => page.strand = Some(cell_text(&td[1])),
            _ => {}
        }
    }
    // The description row may sit outside the gene table.
    for row in ROW.captures_iter(html) {
        let (Some(th), Some(td)) = (HEADER_CELL.captures(&row[1]), DATA_CELL.captures(&row[1]))
        else {
            continue;
        };
        if cell_text(&th[1]) == "Description:" {
            let text = cell_text(&td[1]);
            if !text.is_empty() {
                page.description = Some(text);
            }
            break;
        }
    }
    Some(page)
}

/// Parses `Chinese_Spring1.0_chr1A:1,234 - 5,678` into `("chr1A", 1234, 5678)`.
pub fn parse_location(location: &str) -> Result<(String, u64, u64), GeneBatchError> {
    let malformed = || GeneBatchError::Malformed(format!("location {location:?}"));
    let (chrom, positions) = location.split_once(':').ok_or_else(malformed)?;
    let chrom = chrom.trim();
    let chrom = chrom
        .strip_prefix(&format!("{}_", Assembly::ChineseSpring.chromosome_suffix()))
        .unwrap_or(chrom);
    let positions = positions.replace(',', "");
    let (start, end) = positions.split_once('-').ok_or_else(malformed)?;
    let start = start.trim().parse::<u64>().map_err(|_| malformed())?;
    let end = end.trim().parse::<u64>().map_err(|_| malformed())?;
    if chrom.is_empty() {
        return Err(malformed());
    }
    Ok((chrom.to_string(), start, end))
}

pub fn extract_sequence_div(html: &str) -> Option<String> {
    let inner = SEQ_DIV.captures(html)?.get(1)?.as_str();
    let text = text_lines(inner).join("\n");
    (!text.is_empty()).then_some(text)
}

/// Pairs FASTA blocks with the queries that produced them. Blocks are matched
/// by header first; unmatched queries fall back to the block at the same
/// position when the counts agree.
pub fn match_blocks(queries: &[String], text: &str) -> Vec<Option<String>> {
    let blocks = parse_blocks(text);
    let positional = blocks.len() == queries.len();
    queries
        .iter()
        .enumerate()
        .map(|(idx, query)| {
            blocks
                .iter()
                .find(|(header, _)| header == query)
                .or_else(|| positional.then(|| &blocks[idx]).filter(|(header, _)| {
                    !queries.iter().any(|other| other == header)
                }))
                .map(|(_, seq)| seq.clone())
                .filter(|seq| !seq.is_empty())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const PAGE: &str = r#"<html><body>
<table id="genetable" class="t">
<tr><th>Gene ID:</th><td>TraesCS1A02G000100<br/>TraesCS1A01G000100<br/> TraesCS1A03G0000100 </td></tr>
<tr><th>Location:</th><td>Chinese_Spring1.0_chr1A:40,098 - 70,338</td></tr>
<tr><th>Strand:</th><td>-</td></tr>
</table>
<table><tr><th>Description:</th><td>Disease resistance protein &amp; kinase</td></tr></table>
</body></html>"#;

    #[test]
    fn parses_gene_page() {
        let page = parse_gene_page(PAGE).unwrap();
        assert_eq!(page.third_party_id.as_deref(), Some("TraesCS1A03G0000100"));
        assert_eq!(
            page.location.as_deref(),
            Some("Chinese_Spring1.0_chr1A:40,098 - 70,338")
        );
        assert_eq!(page.strand.as_deref(), Some("-"));
        assert_eq!(
            page.description.as_deref(),
            Some("Disease resistance protein & kinase")
        );
    }

    #[test]
    fn page_without_gene_table_is_unknown() {
        assert!(parse_gene_page("<html><p>No result</p></html>").is_none());
    }

    #[test]
    fn parses_location() {
        let (chrom, start, end) =
            parse_location("Chinese_Spring1.0_chr1A:40,098 - 70,338").unwrap();
        assert_eq!(chrom, "chr1A");
        assert_eq!((start, end), (40098, 70338));
    }

    #[test]
    fn malformed_location_is_reported() {
        assert_matches!(
            parse_location("chr1A 40098"),
            Err(GeneBatchError::Malformed(_))
        );
        assert_matches!(
            parse_location("chr1A:abc - 3"),
            Err(GeneBatchError::Malformed(_))
        );
    }

    #[test]
    fn extracts_sequence_div() {
        let html = r#"<div id="seq">&gt;chr1A_Fielder:1-8<br>ACGT<br>ACGT</div>"#;
        assert_eq!(
            extract_sequence_div(html).as_deref(),
            Some(">chr1A_Fielder:1-8\nACGT\nACGT")
        );
        assert!(extract_sequence_div("<div id=\"other\">x</div>").is_none());
    }

    #[test]
    fn matches_blocks_by_header_then_position() {
        let queries = vec!["c_F:1-4".to_string(), "c_F:9-12".to_string()];
        let text = ">c_F:9-12\nGGGG\n>c_F:1-4\nAAAA\n";
        assert_eq!(
            match_blocks(&queries, text),
            vec![Some("AAAA".to_string()), Some("GGGG".to_string())]
        );
        let text = ">x\nAAAA\n>y\n\n";
        assert_eq!(
            match_blocks(&queries, text),
            vec![Some("AAAA".to_string()), None]
        );
    }
}
