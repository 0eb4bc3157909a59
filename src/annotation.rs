use serde::Serialize;
use tracing::warn;

use crate::domain::{ERROR, GeneId, NOT_FOUND};
use crate::error::GeneBatchError;
use crate::pipeline::TwoStageJob;
use crate::retry::RetryPolicy;
use crate::translate::Translator;
use crate::wheatomics::{GeneDescription, GeneMetadataClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationResult {
    pub gene: GeneId,
    pub third_party_id: String,
    pub description: String,
    pub translated: String,
}

impl AnnotationResult {
    fn sentinel(gene: &GeneId, value: &str) -> Self {
        Self {
            gene: gene.clone(),
            third_party_id: value.to_string(),
            description: value.to_string(),
            translated: value.to_string(),
        }
    }

    /// Tab-separated row: gene, resolved id, description, translation.
    pub fn tsv_row(&self) -> String {
        [
            self.gene.as_str(),
            &self.third_party_id,
            &self.description,
            &self.translated,
        ]
        .map(|field| field.replace(['\t', '\n'], " "))
        .join("\t")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Described {
    Found(GeneDescription),
    NotFound,
    Failed,
}

/// Stage one looks up the third-party id and English description of each
/// gene; stage two translates each distinct description once.
pub struct AnnotationJob<'a> {
    pub metadata: &'a dyn GeneMetadataClient,
    pub translator: &'a dyn Translator,
    pub retry: RetryPolicy,
}

impl TwoStageJob for AnnotationJob<'_> {
    type Fetched = Described;
    type Key = String;
    type Transformed = String;
    type Output = AnnotationResult;

    fn fetch(&self, id: &GeneId) -> Described {
        match self.retry.run("describe", || self.metadata.describe(id)) {
            Ok(Some(description)) => Described::Found(description),
            Ok(None) => Described::NotFound,
            Err(err @ GeneBatchError::RetriesExhausted { .. }) => {
                warn!(gene = %id, error = %err, "description lookup exhausted retries");
                Described::NotFound
            }
            Err(err) => {
                warn!(gene = %id, error = %err, "description lookup failed");
                Described::Failed
            }
        }
    }

    fn fetch_panicked(&self, _id: &GeneId, _message: &str) -> Described {
        Described::Failed
    }

    fn stage_two_key(&self, fetched: &Described) -> Option<String> {
        match fetched {
            Described::Found(GeneDescription {
                description: Some(text),
                ..
            }) => Some(text.clone()),
            _ => None,
        }
    }

    fn transform(&self, text: &String) -> String {
        match self.retry.run("translate", || self.translator.translate(text)) {
            Ok(translated) => translated,
            Err(err) => {
                warn!(error = %err, "translation failed");
                format!("translation failed: {}", root_cause(&err))
            }
        }
    }

    fn transform_panicked(&self, _text: &String, message: &str) -> String {
        format!("translation failed: {message}")
    }

    fn merge(
        &self,
        id: &GeneId,
        fetched: &Described,
        translated: Option<&String>,
    ) -> AnnotationResult {
        match fetched {
            Described::Found(found) => AnnotationResult {
                gene: id.clone(),
                third_party_id: found
                    .third_party_id
                    .clone()
                    .unwrap_or_else(|| NOT_FOUND.to_string()),
                description: found
                    .description
                    .clone()
                    .unwrap_or_else(|| NOT_FOUND.to_string()),
                translated: translated
                    .cloned()
                    .unwrap_or_else(|| NOT_FOUND.to_string()),
            },
            Described::NotFound => AnnotationResult::sentinel(id, NOT_FOUND),
            Described::Failed => AnnotationResult::sentinel(id, ERROR),
        }
    }
}

fn root_cause(err: &GeneBatchError) -> &GeneBatchError {
    match err {
        GeneBatchError::RetriesExhausted { last, .. } => last,
        other => other,
    }
}
