use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::GeneBatchError;

pub const DEFAULT_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// Free-text translation used for gene descriptions.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> Result<String, GeneBatchError>;
}

#[derive(Clone)]
pub struct GoogleTranslateClient {
    client: Client,
    endpoint: String,
    source: String,
    target: String,
}

impl GoogleTranslateClient {
    pub fn new(
        endpoint: &str,
        source: &str,
        target: &str,
        timeout: Duration,
    ) -> Result<Self, GeneBatchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("genebatch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeneBatchError::Translation(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GeneBatchError::Translation(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}

impl Translator for GoogleTranslateClient {
    fn translate(&self, text: &str) -> Result<String, GeneBatchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", self.source.as_str()),
                ("tl", self.target.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .map_err(|err| GeneBatchError::Translation(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "translation request failed".to_string());
            return Err(GeneBatchError::Status { status, message });
        }
        let payload: Value = response
            .json()
            .map_err(|err| GeneBatchError::Malformed(format!("translation response: {err}")))?;
        extract_translation(&payload)
    }
}

/// Joins the translated segments of a `translate_a/single` response:
/// `[[["segment", "source", ...], ...], ...]`. A payload of any other shape
/// is `Malformed`, which is not retried.
pub fn extract_translation(payload: &Value) -> Result<String, GeneBatchError> {
    let segments = payload
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GeneBatchError::Malformed("unexpected translation response shape".to_string())
        })?;
    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(GeneBatchError::Malformed("empty translation".to_string()));
    }
    Ok(text)
}
