use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Assembly, GeneId, Resolution, UnresolvedReason};
use crate::error::GeneBatchError;
use crate::features::FeatureIndex;
use crate::retry::RetryPolicy;
use crate::wheatomics::GeneMetadataClient;

/// Where gene coordinates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSource {
    /// Local GFF3 feature table (Fielder).
    Local,
    /// WheatOmics gene detail pages (Chinese Spring).
    Remote,
}

impl CoordinateSource {
    pub fn default_assembly(self) -> Assembly {
        match self {
            CoordinateSource::Local => Assembly::Fielder,
            CoordinateSource::Remote => Assembly::ChineseSpring,
        }
    }
}

impl fmt::Display for CoordinateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateSource::Local => write!(f, "local"),
            CoordinateSource::Remote => write!(f, "remote"),
        }
    }
}

pub enum CoordinateResolver<'a> {
    LocalIndex(FeatureIndex),
    RemoteService(&'a dyn GeneMetadataClient),
}

impl<'a> CoordinateResolver<'a> {
    /// Builds the resolver for `source`. The local variant loads the feature
    /// table up front, so a missing table aborts before any gene is processed.
    pub fn for_source(
        source: CoordinateSource,
        feature_table: &Path,
        wanted: &[GeneId],
        metadata: &'a dyn GeneMetadataClient,
    ) -> Result<Self, GeneBatchError> {
        match source {
            CoordinateSource::Local => Ok(Self::LocalIndex(FeatureIndex::open(
                feature_table,
                wanted,
            )?)),
            CoordinateSource::Remote => Ok(Self::RemoteService(metadata)),
        }
    }

    pub fn source(&self) -> CoordinateSource {
        match self {
            CoordinateResolver::LocalIndex(_) => CoordinateSource::Local,
            CoordinateResolver::RemoteService(_) => CoordinateSource::Remote,
        }
    }

    /// Never fails: lookup problems come back as `Resolution::Unresolved`.
    pub fn resolve(&self, id: &GeneId, retry: &RetryPolicy) -> Resolution {
        match self {
            CoordinateResolver::LocalIndex(index) => match index.lookup(id) {
                Some(record) => Resolution::Resolved(record.clone()),
                None => Resolution::Unresolved(UnresolvedReason::NotFound),
            },
            CoordinateResolver::RemoteService(client) => {
                match retry.run("resolve", || client.resolve(id)) {
                    Ok(resolution) => resolution,
                    Err(err @ GeneBatchError::RetriesExhausted { .. }) => {
                        warn!(gene = %id, error = %err, "coordinate lookup exhausted retries");
                        Resolution::Unresolved(UnresolvedReason::NotFound)
                    }
                    Err(err) => {
                        warn!(gene = %id, error = %err, "coordinate lookup failed");
                        Resolution::Unresolved(UnresolvedReason::Error)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{GeneRecord, Provenance, Strand};
    use crate::wheatomics::GeneDescription;

    struct Flaky {
        failures: Mutex<usize>,
    }

    impl GeneMetadataClient for Flaky {
        fn resolve(&self, id: &GeneId) -> Result<Resolution, GeneBatchError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(GeneBatchError::Http("timed out".to_string()));
            }
            Ok(Resolution::Resolved(GeneRecord::new(
                id.clone(),
                "chr1A",
                10,
                20,
                Strand::Forward,
                Provenance::RemoteLookup,
            )?))
        }

        fn describe(&self, _id: &GeneId) -> Result<Option<GeneDescription>, GeneBatchError> {
            Ok(None)
        }
    }

    #[test]
    fn local_index_lookup() {
        let table = "chr1A\ts\tmRNA\t10\t20\t.\t-\t.\tID=g.1\n";
        let index = FeatureIndex::build(Cursor::new(table), &[]).unwrap();
        let resolver = CoordinateResolver::LocalIndex(index);
        let found = resolver.resolve(&"g.1".parse().unwrap(), &RetryPolicy::immediate(1));
        assert_eq!(found.record().unwrap().strand, Strand::Reverse);
        let missing = resolver.resolve(&"h.1".parse().unwrap(), &RetryPolicy::immediate(1));
        assert_eq!(missing, Resolution::Unresolved(UnresolvedReason::NotFound));
        assert_eq!(resolver.source(), CoordinateSource::Local);
    }

    #[test]
    fn remote_lookup_retries_transient_failures() {
        let client = Flaky {
            failures: Mutex::new(2),
        };
        let resolver = CoordinateResolver::RemoteService(&client);
        let resolution = resolver.resolve(&"g".parse().unwrap(), &RetryPolicy::immediate(3));
        assert_eq!(
            resolution.record().unwrap().provenance,
            Provenance::RemoteLookup
        );
    }

    #[test]
    fn remote_exhaustion_becomes_not_found() {
        let client = Flaky {
            failures: Mutex::new(5),
        };
        let resolver = CoordinateResolver::RemoteService(&client);
        let resolution = resolver.resolve(&"g".parse().unwrap(), &RetryPolicy::immediate(3));
        assert_eq!(
            resolution,
            Resolution::Unresolved(UnresolvedReason::NotFound)
        );
    }
}
