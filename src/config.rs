use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Assembly;
use crate::error::GeneBatchError;
use crate::homolog::{DEFAULT_BLAST_URL, PollPolicy};
use crate::pipeline::StageConcurrency;
use crate::resolver::CoordinateSource;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::translate::DEFAULT_TRANSLATE_URL;
use crate::wheatomics::DEFAULT_BASE_URL;
use crate::window::DEFAULT_UPSTREAM_LEN;

pub const DEFAULT_CONFIG_FILE: &str = "genebatch.json";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_FEATURE_TABLE: &str = "data/Fielder.gff.gz";
pub const DEFAULT_SEQUENCE_BATCH_SIZE: usize = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Workers of the second stage: translation for `annotate`, sequence
    /// requests for `promoters`.
    #[serde(default, alias = "translate_concurrency")]
    pub transform_concurrency: Option<usize>,
    /// Promoter regions sent per sequence request.
    #[serde(default)]
    pub sequence_batch_size: Option<usize>,
    #[serde(default)]
    pub upstream_len: Option<u64>,
    #[serde(default)]
    pub source: Option<CoordinateSource>,
    #[serde(default)]
    pub assembly: Option<Assembly>,
    #[serde(default)]
    pub feature_table: Option<Utf8PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub translate: Option<TranslateEntry>,
    #[serde(default)]
    pub homolog: Option<HomologEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub min_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TranslateEntry {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HomologEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub poll_attempts: Option<usize>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HomologSettings {
    pub base_url: String,
    pub poll: PollPolicy,
}

#[derive(Debug, Clone)]
pub struct TranslateSettings {
    pub endpoint: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub concurrency: StageConcurrency,
    pub sequence_batch_size: usize,
    pub upstream_len: u64,
    pub source: CoordinateSource,
    pub assembly: Assembly,
    pub feature_table: Utf8PathBuf,
    pub timeout: Duration,
    pub base_url: String,
    pub retry: RetryPolicy,
    pub translate: TranslateSettings,
    pub homolog: HomologSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `genebatch.json` in the working directory when no path
    /// is given. A missing default file means built-in defaults; a missing
    /// explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GeneBatchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GeneBatchError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GeneBatchError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GeneBatchError> {
        let fetch = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        let transform = config.transform_concurrency.unwrap_or(fetch);
        for workers in [fetch, transform] {
            if workers == 0 {
                return Err(GeneBatchError::InvalidConcurrency(workers));
            }
        }

        let sequence_batch_size = config
            .sequence_batch_size
            .unwrap_or(DEFAULT_SEQUENCE_BATCH_SIZE);
        if sequence_batch_size == 0 {
            return Err(GeneBatchError::ConfigParse(
                "sequence_batch_size must be at least 1".to_string(),
            ));
        }

        let upstream_len = config.upstream_len.unwrap_or(DEFAULT_UPSTREAM_LEN);
        if upstream_len == 0 {
            return Err(GeneBatchError::ConfigParse(
                "upstream_len must be at least 1".to_string(),
            ));
        }

        let source = config.source.unwrap_or(CoordinateSource::Remote);
        let retry_entry = config.retry.unwrap_or_default();
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: retry_entry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            min_backoff: retry_entry
                .min_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_backoff),
            max_backoff: retry_entry
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        };
        if retry.max_backoff < retry.min_backoff {
            return Err(GeneBatchError::ConfigParse(
                "retry.max_backoff_ms is below retry.min_backoff_ms".to_string(),
            ));
        }

        let translate = config.translate.unwrap_or_default();
        let homolog = config.homolog.unwrap_or_default();
        let poll_defaults = PollPolicy::default();

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            concurrency: StageConcurrency { fetch, transform },
            sequence_batch_size,
            upstream_len,
            source,
            assembly: config.assembly.unwrap_or(source.default_assembly()),
            feature_table: config
                .feature_table
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_FEATURE_TABLE)),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            retry,
            translate: TranslateSettings {
                endpoint: translate
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_TRANSLATE_URL.to_string()),
                source_lang: translate.source_lang.unwrap_or_else(|| "en".to_string()),
                target_lang: translate
                    .target_lang
                    .unwrap_or_else(|| "zh-CN".to_string()),
            },
            homolog: HomologSettings {
                base_url: homolog
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BLAST_URL.to_string()),
                poll: PollPolicy {
                    attempts: homolog
                        .poll_attempts
                        .unwrap_or(poll_defaults.attempts)
                        .max(1),
                    interval: homolog
                        .poll_interval_ms
                        .map(Duration::from_millis)
                        .unwrap_or(poll_defaults.interval),
                },
            },
        })
    }
}
