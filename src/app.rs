use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::annotation::{AnnotationJob, AnnotationResult};
use crate::domain::{Assembly, ERROR, GeneId};
use crate::error::GeneBatchError;
use crate::fasta::FastaRecord;
use crate::homolog::{self, HomologClient, HomologResult, PollPolicy, QuerySequence};
use crate::pipeline::{ProgressRange, Stage, StageConcurrency, run_two_stage};
use crate::promoter::PromoterJob;
use crate::resolver::{CoordinateResolver, CoordinateSource};
use crate::retry::RetryPolicy;
use crate::transcript::{TranscriptReport, TranscriptSequences};
use crate::translate::Translator;
use crate::wheatomics::{GeneMetadataClient, SequenceClient};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Overall completion in `[0, 1]`, never decreasing within one batch.
    pub fraction: f64,
    pub message: String,
}

/// Receives progress from worker threads, one call at a time.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub concurrency: StageConcurrency,
    pub retry: RetryPolicy,
    pub assembly: Assembly,
    pub upstream_len: u64,
    /// Promoter regions per sequence request.
    pub sequence_batch_size: usize,
    pub poll: PollPolicy,
}

/// Runs batch operations against the clients it was constructed with. Build
/// one per run; nothing is shared between runs.
pub struct App<M, S, T, H>
where
    M: GeneMetadataClient,
    S: SequenceClient,
    T: Translator,
    H: HomologClient,
{
    metadata: M,
    sequences: S,
    translator: T,
    homologs: H,
    settings: BatchSettings,
}

impl<M, S, T, H> App<M, S, T, H>
where
    M: GeneMetadataClient,
    S: SequenceClient,
    T: Translator,
    H: HomologClient,
{
    pub fn new(
        metadata: M,
        sequences: S,
        translator: T,
        homologs: H,
        settings: BatchSettings,
    ) -> Self {
        Self {
            metadata,
            sequences,
            translator,
            homologs,
            settings,
        }
    }

    /// Third-party id, English description and translated description per gene.
    pub fn annotate(
        &self,
        ids: &[GeneId],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<AnnotationResult>, GeneBatchError> {
        info!(genes = ids.len(), "annotating genes");
        let job = AnnotationJob {
            metadata: &self.metadata,
            translator: &self.translator,
            retry: self.settings.retry,
        };
        run_two_stage(ids, &job, self.settings.concurrency, sink)
    }

    pub fn resolver(
        &self,
        source: CoordinateSource,
        feature_table: &Path,
        ids: &[GeneId],
    ) -> Result<CoordinateResolver<'_>, GeneBatchError> {
        CoordinateResolver::for_source(source, feature_table, ids, &self.metadata)
    }

    /// One promoter record per submitted gene, in submission order.
    pub fn promoters(
        &self,
        ids: &[GeneId],
        resolver: &CoordinateResolver<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<FastaRecord>, GeneBatchError> {
        info!(
            genes = ids.len(),
            source = %resolver.source(),
            assembly = %self.settings.assembly,
            upstream_len = self.settings.upstream_len,
            "fetching promoters"
        );
        let job = PromoterJob {
            resolver,
            sequences: &self.sequences,
            assembly: self.settings.assembly,
            upstream_len: self.settings.upstream_len,
            batch_size: self.settings.sequence_batch_size,
            retry: self.settings.retry,
        };
        let records = run_two_stage(ids, &job, self.settings.concurrency, sink)?;
        let missing = records.iter().filter(|record| !record.is_found()).count();
        if missing > 0 {
            warn!(missing, "some promoters could not be retrieved");
        }
        Ok(records)
    }

    /// cDNA and CDS of each gene's first transcript.
    pub fn transcripts(
        &self,
        ids: &[GeneId],
        sink: &dyn ProgressSink,
    ) -> Result<TranscriptReport, GeneBatchError> {
        if self.settings.concurrency.fetch == 0 {
            return Err(GeneBatchError::InvalidConcurrency(0));
        }
        if ids.is_empty() {
            return Ok(TranscriptReport {
                records: Vec::new(),
                failed: Vec::new(),
            });
        }
        info!(genes = ids.len(), "fetching transcript sequences");
        let stage = Stage::new("transcript", self.settings.concurrency.fetch)?;
        let mut distinct: Vec<GeneId> = ids.to_vec();
        distinct.sort();
        distinct.dedup();

        let fetched: HashMap<&GeneId, TranscriptSequences> = distinct
            .iter()
            .zip(stage.run(&distinct, ProgressRange::FULL, sink, |id| {
                self.fetch_transcript(id)
            }))
            .map(|(id, result)| {
                let sequences = result.unwrap_or_else(|panicked| {
                    warn!(gene = %id, message = %panicked.message, "transcript task panicked");
                    TranscriptSequences::missing(id)
                });
                (id, sequences)
            })
            .collect();

        let records: Vec<TranscriptSequences> = ids
            .iter()
            .map(|id| {
                fetched
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| TranscriptSequences::missing(id))
            })
            .collect();
        let failed = records
            .iter()
            .filter(|record| !record.is_found())
            .map(|record| record.gene.clone())
            .collect();
        Ok(TranscriptReport { records, failed })
    }

    /// Fielder homolog of each query sequence, one row per query in input
    /// order. Each query is a separate BLAST job.
    pub fn homologs(
        &self,
        queries: &[QuerySequence],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<HomologResult>, GeneBatchError> {
        if self.settings.concurrency.fetch == 0 {
            return Err(GeneBatchError::InvalidConcurrency(0));
        }
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        info!(queries = queries.len(), "searching Fielder homologs");
        let stage = Stage::new("blast", self.settings.concurrency.fetch)?;
        let results = stage.run(queries, ProgressRange::FULL, sink, |query| {
            homolog::search(
                &self.homologs,
                query,
                &self.settings.retry,
                &self.settings.poll,
            )
        });
        let rows: Vec<HomologResult> = queries
            .iter()
            .zip(results)
            .map(|(query, result)| {
                result.unwrap_or_else(|panicked| {
                    warn!(query = %query.name, message = %panicked.message, "BLAST task panicked");
                    HomologResult::sentinel(&query.name, ERROR)
                })
            })
            .collect();
        let missing = rows.iter().filter(|row| !row.is_found()).count();
        if missing > 0 {
            warn!(missing, "no homolog for some queries");
        }
        Ok(rows)
    }

    fn fetch_transcript(&self, id: &GeneId) -> TranscriptSequences {
        match self
            .settings
            .retry
            .run("transcript", || self.sequences.fetch_transcript(id))
        {
            Ok(Some(raw)) => TranscriptSequences::from_block(id, &raw),
            Ok(None) => TranscriptSequences::missing(id),
            Err(err) => {
                warn!(gene = %id, error = %err, "transcript fetch failed");
                TranscriptSequences::missing(id)
            }
        }
    }
}
