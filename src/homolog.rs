//! Chinese Spring to Fielder homolog lookup through the WheatOmics BLAST
//! service: submit a blastn job per query sequence, then poll its result page
//! for the top Fielder gene hit.

use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::blocking::multipart::Form;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{ERROR, NOT_FOUND};
use crate::error::GeneBatchError;
use crate::fasta::parse_blocks;
use crate::retry::RetryPolicy;
use crate::wheatomics::{DATA_CELL, ROW, cell_text};

pub const DEFAULT_BLAST_URL: &str = "http://wheatomics.sdau.edu.cn/blast";
pub const SUBMIT_FAILED: &str = "submit failed";
pub const DEFAULT_POLL_ATTEMPTS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Form fields of a blastn search against the Fielder gene set, minus the query.
const SEARCH_FIELDS: [(&str, &str); 18] = [
    ("program", "blastn"),
    ("blastpath", "./blast+/bin"),
    ("group", "all_genes"),
    ("NWheat_IWGSC_RefSeq_v1.0_chromosomesdb[]", "Fielder_gene"),
    ("dbType", "N"),
    ("patientIDarrayChoix[]", "Fielder_gene"),
    ("patientIDarray[]", "Fielder_gene"),
    ("blast_flag", "1"),
    ("expect", "0.0001"),
    ("wordSize", "15"),
    ("targetSeqs", "50"),
    ("mmScore", "2,-3"),
    ("gapCost", "Existence: 5, Extension: 2"),
    ("filter", "T"),
    ("softMask", "m"),
    ("outFmt", "5"),
    ("OTHER_ADVANCED", ""),
    ("searchType", "basic"),
];

static JOB_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"job id is (\d+)").unwrap());
static TBODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tbody\b[^>]*>(.*?)</tbody>").unwrap());
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap());

/// Asynchronous sequence similarity search.
pub trait HomologClient: Send + Sync {
    /// Job id of the accepted search, `None` when the service answered
    /// without one.
    fn submit(&self, name: &str, sequence: &str) -> Result<Option<String>, GeneBatchError>;

    /// Top hit of a job, `None` while its result page is not ready.
    fn top_hit(&self, job: &str) -> Result<Option<String>, GeneBatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySequence {
    pub name: String,
    pub sequence: String,
}

/// Reads query sequences from FASTA text. The name is the first token of the
/// header; records without sequence are skipped.
pub fn parse_queries(text: &str) -> Vec<QuerySequence> {
    parse_blocks(text)
        .into_iter()
        .filter(|(_, sequence)| !sequence.is_empty())
        .map(|(name, sequence)| QuerySequence { name, sequence })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HomologResult {
    pub query: String,
    pub fielder_id: String,
}

impl HomologResult {
    pub fn sentinel(query: &str, value: &str) -> Self {
        Self {
            query: query.to_string(),
            fielder_id: value.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        ![NOT_FOUND, ERROR, SUBMIT_FAILED].contains(&self.fielder_id.as_str())
    }

    pub fn tsv_row(&self) -> String {
        [self.query.as_str(), self.fielder_id.as_str()]
            .map(|field| field.replace(['\t', '\n'], " "))
            .join("\t")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Submits one query and waits for its top hit. Never fails: a rejected
/// submission, a job without hits and a broken result page each map to a
/// sentinel in the returned row.
pub fn search(
    client: &dyn HomologClient,
    query: &QuerySequence,
    retry: &RetryPolicy,
    poll: &PollPolicy,
) -> HomologResult {
    let job = match retry.run("blast submit", || client.submit(&query.name, &query.sequence)) {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(query = %query.name, "BLAST service returned no job id");
            return HomologResult::sentinel(&query.name, SUBMIT_FAILED);
        }
        Err(err) => {
            warn!(query = %query.name, error = %err, "BLAST submission failed");
            return HomologResult::sentinel(&query.name, SUBMIT_FAILED);
        }
    };
    debug!(query = %query.name, job = %job, "BLAST job submitted");

    let attempts = poll.attempts.max(1);
    for attempt in 1..=attempts {
        match retry.run("blast result", || client.top_hit(&job)) {
            Ok(Some(hit)) => {
                return HomologResult {
                    query: query.name.clone(),
                    fielder_id: hit,
                };
            }
            Ok(None) => {}
            Err(err @ GeneBatchError::RetriesExhausted { .. }) => {
                warn!(query = %query.name, job = %job, error = %err, "BLAST result unavailable");
                return HomologResult::sentinel(&query.name, NOT_FOUND);
            }
            Err(err) => {
                warn!(query = %query.name, job = %job, error = %err, "BLAST result unreadable");
                return HomologResult::sentinel(&query.name, ERROR);
            }
        }
        if attempt < attempts && !poll.interval.is_zero() {
            thread::sleep(poll.interval);
        }
    }
    debug!(query = %query.name, job = %job, attempts, "no BLAST hit");
    HomologResult::sentinel(&query.name, NOT_FOUND)
}

#[derive(Clone)]
pub struct WheatOmicsBlastClient {
    client: Client,
    base_url: String,
}

impl WheatOmicsBlastClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeneBatchError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|err| GeneBatchError::Http(err.to_string()))
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            header(&format!("genebatch/{}", env!("CARGO_PKG_VERSION")))?,
        );
        headers.insert(REFERER, header(&format!("{base_url}/blast.html"))?);
        headers.insert(ORIGIN, header(origin(&base_url))?);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(Self { client, base_url })
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
            .unwrap_or_else(|_| "BLAST request failed".to_string());
        Err(GeneBatchError::Status { status, message })
    }
}

impl HomologClient for WheatOmicsBlastClient {
    fn submit(&self, _name: &str, sequence: &str) -> Result<Option<String>, GeneBatchError> {
        let label: String = sequence.chars().take(10).collect();
        let form = SEARCH_FIELDS.iter().fold(
            Form::new().text("querySeq", format!(">{label}\n{sequence}")),
            |form, (name, value)| form.text(*name, *value),
        );
        let response = self
            .client
            .post(format!("{}/blastresult2.php", self.base_url))
            .multipart(form)
            .send()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let html = response
            .text()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(parse_job_id(&html))
    }

    fn top_hit(&self, job: &str) -> Result<Option<String>, GeneBatchError> {
        let response = self
            .client
            .get(format!("{}/data/{job}.blast2.html", self.base_url))
            .send()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::handle_status(response)?;
        let html = response
            .text()
            .map_err(|err| GeneBatchError::Http(err.to_string()))?;
        Ok(parse_top_hit(&html))
    }
}

/// `scheme://host` part of a URL.
fn origin(url: &str) -> &str {
    let host_start = url.find("://").map_or(0, |idx| idx + 3);
    match url[host_start..].find('/') {
        Some(idx) => &url[..host_start + idx],
        None => url,
    }
}

pub fn parse_job_id(html: &str) -> Option<String> {
    JOB_ID.captures(html).map(|caps| caps[1].to_string())
}

/// Link text in the last cell of the first hit row. The first row of the
/// result table holds column titles.
pub fn parse_top_hit(html: &str) -> Option<String> {
    let body = TBODY.captures(html)?.get(1)?.as_str();
    let row = ROW.captures_iter(body).nth(1)?;
    let last_cell = DATA_CELL.captures_iter(&row[1]).last()?;
    let link = ANCHOR.captures(&last_cell[1])?;
    let text = cell_text(&link[1]);
    (!text.is_empty()).then_some(text)
}
