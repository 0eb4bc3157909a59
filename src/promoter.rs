use std::slice;

use tracing::warn;

use crate::domain::{Assembly, GeneId, Resolution, UnresolvedReason};
use crate::fasta::{self, FastaRecord};
use crate::pipeline::TwoStageJob;
use crate::resolver::CoordinateResolver;
use crate::retry::RetryPolicy;
use crate::wheatomics::SequenceClient;
use crate::window::{ExtractionWindow, Region};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub resolution: Resolution,
    pub window: Option<ExtractionWindow>,
}

/// Stage one resolves coordinates and derives the upstream window; stage two
/// fetches each distinct region from the sequence service, `batch_size`
/// regions per request.
pub struct PromoterJob<'a> {
    pub resolver: &'a CoordinateResolver<'a>,
    pub sequences: &'a dyn SequenceClient,
    pub assembly: Assembly,
    pub upstream_len: u64,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl TwoStageJob for PromoterJob<'_> {
    type Fetched = Located;
    type Key = Region;
    type Transformed = Option<String>;
    type Output = FastaRecord;

    fn fetch(&self, id: &GeneId) -> Located {
        let resolution = self.resolver.resolve(id, &self.retry);
        let window = resolution
            .record()
            .map(|record| ExtractionWindow::for_record(record, self.upstream_len));
        Located { resolution, window }
    }

    fn fetch_panicked(&self, _id: &GeneId, _message: &str) -> Located {
        Located {
            resolution: Resolution::Unresolved(UnresolvedReason::Error),
            window: None,
        }
    }

    fn stage_two_key(&self, fetched: &Located) -> Option<Region> {
        fetched
            .window
            .as_ref()
            .filter(|window| !window.is_empty())
            .map(ExtractionWindow::region)
    }

    fn transform(&self, region: &Region) -> Option<String> {
        self.transform_batch(slice::from_ref(region))
            .into_iter()
            .next()
            .flatten()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// A failed request leaves every region of the batch without sequence.
    fn transform_batch(&self, regions: &[Region]) -> Vec<Option<String>> {
        let Some(first) = regions.first() else {
            return Vec::new();
        };
        let fetched = self.retry.run("sequence", || {
            self.sequences.fetch_sequences(self.assembly, regions)
        });
        match fetched {
            Ok(mut blocks) => {
                blocks.resize(regions.len(), None);
                blocks
            }
            Err(err) => {
                warn!(regions = regions.len(), first = %first, error = %err, "sequence fetch failed");
                vec![None; regions.len()]
            }
        }
    }

    fn transform_panicked(&self, _region: &Region, _message: &str) -> Option<String> {
        None
    }

    fn merge(
        &self,
        id: &GeneId,
        fetched: &Located,
        block: Option<&Option<String>>,
    ) -> FastaRecord {
        match (&fetched.resolution, &fetched.window) {
            (Resolution::Resolved(record), Some(_)) => {
                fasta::assemble(id, record.strand, block.and_then(Option::as_deref))
            }
            _ => fasta::unresolved(id),
        }
    }
}
