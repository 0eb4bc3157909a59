use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use genebatch::annotation::AnnotationJob;
use genebatch::app::{App, BatchSettings, ProgressEvent, ProgressSink};
use genebatch::domain::{
    Assembly, GeneId, GeneRecord, NOT_FOUND, Provenance, Resolution, SEQUENCE_NOT_FOUND, Strand,
    UnresolvedReason, parse_gene_list,
};
use genebatch::error::GeneBatchError;
use genebatch::homolog::{HomologClient, PollPolicy, QuerySequence, SUBMIT_FAILED};
use genebatch::pipeline::{StageConcurrency, run_two_stage};
use genebatch::promoter::PromoterJob;
use genebatch::resolver::{CoordinateResolver, CoordinateSource};
use genebatch::retry::RetryPolicy;
use genebatch::translate::Translator;
use genebatch::wheatomics::{GeneDescription, GeneMetadataClient, SequenceClient};
use genebatch::window::Region;

#[derive(Default)]
struct MockMetadata {
    records: HashMap<String, (String, u64, u64, Strand)>,
    descriptions: HashMap<String, GeneDescription>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockMetadata {
    fn with_record(mut self, id: &str, chrom: &str, start: u64, end: u64, strand: Strand) -> Self {
        self.records
            .insert(id.to_string(), (chrom.to_string(), start, end, strand));
        self
    }

    fn with_description(mut self, id: &str, third_party: &str, text: &str) -> Self {
        self.descriptions.insert(
            id.to_string(),
            GeneDescription {
                third_party_id: Some(third_party.to_string()),
                description: Some(text.to_string()),
            },
        );
        self
    }

    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn count(&self, id: &GeneId) {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;
    }
}

impl GeneMetadataClient for MockMetadata {
    fn resolve(&self, id: &GeneId) -> Result<Resolution, GeneBatchError> {
        self.count(id);
        if id.as_str().starts_with("unreachable") {
            return Err(GeneBatchError::Http("connection reset".to_string()));
        }
        match self.records.get(id.as_str()) {
            Some((chrom, start, end, strand)) => Ok(Resolution::Resolved(GeneRecord::new(
                id.clone(),
                chrom.as_str(),
                *start,
                *end,
                *strand,
                Provenance::RemoteLookup,
            )?)),
            None => Ok(Resolution::Unresolved(UnresolvedReason::NotFound)),
        }
    }

    fn describe(&self, id: &GeneId) -> Result<Option<GeneDescription>, GeneBatchError> {
        self.count(id);
        if id.as_str().starts_with("unreachable") {
            return Err(GeneBatchError::Status {
                status: 503,
                message: "busy".to_string(),
            });
        }
        Ok(self.descriptions.get(id.as_str()).cloned())
    }
}

#[derive(Default)]
struct MockSequences {
    regions: Mutex<Vec<Region>>,
    requests: Arc<Mutex<Vec<usize>>>,
    transcripts: HashMap<String, String>,
}

impl SequenceClient for MockSequences {
    fn fetch_sequences(
        &self,
        assembly: Assembly,
        regions: &[Region],
    ) -> Result<Vec<Option<String>>, GeneBatchError> {
        self.regions.lock().unwrap().extend(regions.iter().cloned());
        self.requests.lock().unwrap().push(regions.len());
        Ok(regions
            .iter()
            .map(|region| Some(format!(">{}\nAACG\n", region.query(assembly))))
            .collect())
    }

    fn fetch_transcript(&self, id: &GeneId) -> Result<Option<String>, GeneBatchError> {
        Ok(self.transcripts.get(id.as_str()).cloned())
    }
}

#[derive(Default)]
struct MockTranslator {
    seen: Mutex<Vec<String>>,
}

impl Translator for MockTranslator {
    fn translate(&self, text: &str) -> Result<String, GeneBatchError> {
        self.seen.lock().unwrap().push(text.to_string());
        if text == "untranslatable" {
            return Err(GeneBatchError::Status {
                status: 400,
                message: "bad request".to_string(),
            });
        }
        Ok(format!("zh:{text}"))
    }
}

/// BLAST stand-in: jobs are named after their sequence, and a result page
/// appears after `pending_polls` checks.
#[derive(Default)]
struct MockHomologs {
    hits: HashMap<String, String>,
    pending_polls: usize,
    polls: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockHomologs {
    fn with_hit(mut self, sequence: &str, fielder_id: &str) -> Self {
        self.hits.insert(sequence.to_string(), fielder_id.to_string());
        self
    }
}

impl HomologClient for MockHomologs {
    fn submit(&self, name: &str, sequence: &str) -> Result<Option<String>, GeneBatchError> {
        if name.starts_with("unreachable") {
            return Err(GeneBatchError::Http("connection refused".to_string()));
        }
        if sequence.starts_with('N') {
            return Ok(None);
        }
        Ok(Some(format!("job-{sequence}")))
    }

    fn top_hit(&self, job: &str) -> Result<Option<String>, GeneBatchError> {
        let mut polls = self.polls.lock().unwrap();
        let seen = polls.entry(job.to_string()).or_default();
        *seen += 1;
        if *seen <= self.pending_polls {
            return Ok(None);
        }
        Ok(job
            .strip_prefix("job-")
            .and_then(|sequence| self.hits.get(sequence))
            .cloned())
    }
}

fn query(name: &str, sequence: &str) -> QuerySequence {
    QuerySequence {
        name: name.to_string(),
        sequence: sequence.to_string(),
    }
}

#[derive(Default)]
struct Recorder {
    fractions: Mutex<Vec<f64>>,
}

impl ProgressSink for Recorder {
    fn event(&self, event: ProgressEvent) {
        self.fractions.lock().unwrap().push(event.fraction);
    }
}

impl Recorder {
    fn assert_completed_once(&self) {
        let fractions = self.fractions.lock().unwrap();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{fractions:?}");
        assert_eq!(fractions.iter().filter(|f| **f == 1.0).count(), 1);
        assert_eq!(fractions.last().copied(), Some(1.0));
    }
}

fn settings(assembly: Assembly) -> BatchSettings {
    BatchSettings {
        concurrency: StageConcurrency::uniform(3),
        retry: RetryPolicy::immediate(3),
        assembly,
        upstream_len: 4,
        sequence_batch_size: 1,
        poll: PollPolicy {
            attempts: 3,
            interval: Duration::ZERO,
        },
    }
}

fn ids(values: &[&str]) -> Vec<GeneId> {
    values.iter().map(|v| v.parse().unwrap()).collect()
}

#[test]
fn remote_promoters_survive_a_permanently_failing_gene() {
    let metadata = MockMetadata::default()
        .with_record("g1", "chr1A", 5000, 6000, Strand::Forward)
        .with_record("g2", "chr2B", 100, 200, Strand::Reverse);
    let app = App::new(
        metadata,
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let genes = ids(&["g1", "unreachable1", "g2"]);
    let resolver = app
        .resolver(CoordinateSource::Remote, Path::new("unused.gff"), &genes)
        .unwrap();
    let sink = Recorder::default();

    let records = app.promoters(&genes, &resolver, &sink).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].header, "g1 (+ strand)");
    assert_eq!(records[0].body, "AACG");
    assert_eq!(records[1].header, "unreachable1 (coordinates unresolved)");
    assert_eq!(records[1].body, SEQUENCE_NOT_FOUND);
    assert_eq!(records[2].header, "g2 (- strand)");
    assert_eq!(records[2].body, "CGTT");
    sink.assert_completed_once();
}

#[test]
fn remote_lookup_is_retried_up_to_the_attempt_limit() {
    let metadata = MockMetadata::default();
    let resolver = CoordinateResolver::RemoteService(&metadata);
    let gene: GeneId = "unreachable1".parse().unwrap();

    let resolution = resolver.resolve(&gene, &RetryPolicy::immediate(3));

    assert_eq!(resolution, Resolution::Unresolved(UnresolvedReason::NotFound));
    assert_eq!(metadata.calls("unreachable1"), 3);
}

#[test]
fn remote_windows_use_the_canonical_convention() {
    let metadata = MockMetadata::default()
        .with_record("g1", "chr1A", 5000, 6000, Strand::Forward)
        .with_record("g2", "chr2B", 100, 200, Strand::Reverse);
    let sequences = MockSequences::default();
    let job_genes = ids(&["g1", "g2"]);
    let resolver = CoordinateResolver::RemoteService(&metadata);
    let job = PromoterJob {
        resolver: &resolver,
        sequences: &sequences,
        assembly: Assembly::ChineseSpring,
        upstream_len: 4,
        batch_size: 1,
        retry: RetryPolicy::immediate(1),
    };
    run_two_stage(
        &job_genes,
        &job,
        StageConcurrency::uniform(1),
        &Recorder::default(),
    )
    .unwrap();
    let mut regions = sequences.regions.lock().unwrap().clone();
    regions.sort();
    assert_eq!(
        regions,
        vec![
            Region {
                chromosome: "chr1A".to_string(),
                start: 4996,
                end: 4999
            },
            Region {
                chromosome: "chr2B".to_string(),
                start: 201,
                end: 204
            },
        ]
    );
}

fn write_gz_table(dir: &Path) -> PathBuf {
    let path = dir.join("Fielder.gff.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let rows = [
        "##gff-version 3",
        "chr1A\tIWGSC\tgene\t1000\t3000\t.\t+\t.\tID=TraesFLD1A01G000100",
        "chr1A\tIWGSC\tmRNA\t1000\t3000\t.\t+\t.\tID=TraesFLD1A01G000100;Parent=TraesFLD1A01G000100",
        "chr3D\tIWGSC\tmRNA\t50\t80\t.\t-\t.\tID=TraesFLD3D01G000200",
        "chr3D\tIWGSC\tmRNA\tbad\t80\t.\t-\t.\tID=TraesFLD3D01G000300",
        "",
    ];
    encoder.write_all(rows.join("\n").as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

#[test]
fn local_promoters_fetch_each_distinct_window_once() {
    let temp = tempfile::tempdir().unwrap();
    let table = write_gz_table(temp.path());
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::Fielder),
    );
    let genes = ids(&[
        "TraesFLD1A01G000100",
        "TraesFLD3D01G000300",
        "TraesFLD1A01G000100",
        "TraesFLD3D01G000200",
    ]);
    let resolver = app
        .resolver(CoordinateSource::Local, &table, &genes)
        .unwrap();
    let sink = Recorder::default();

    let records = app.promoters(&genes, &resolver, &sink).unwrap();

    let headers: Vec<&str> = records.iter().map(|r| r.header.as_str()).collect();
    assert_eq!(
        headers,
        vec![
            "TraesFLD1A01G000100 (+ strand)",
            "TraesFLD3D01G000300 (coordinates unresolved)",
            "TraesFLD1A01G000100 (+ strand)",
            "TraesFLD3D01G000200 (- strand)",
        ]
    );
    assert_eq!(records[0], records[2]);
    assert_eq!(records[3].body, "CGTT");
    sink.assert_completed_once();
}

#[test]
fn missing_feature_table_aborts_before_any_lookup() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::Fielder),
    );
    let genes = ids(&["TraesFLD1A01G000100"]);
    let err = app
        .resolver(
            CoordinateSource::Local,
            &temp.path().join("absent.gff"),
            &genes,
        )
        .err()
        .unwrap();
    assert_matches!(err, GeneBatchError::MissingFeatureTable(_));
    assert!(err.is_fatal());
}

#[test]
fn annotate_translates_each_distinct_description_once() {
    let metadata = MockMetadata::default()
        .with_description("g1", "TraesCS1A01G000100", "protein kinase")
        .with_description("g2", "TraesCS2B01G000200", "untranslatable")
        .with_description("g3", "TraesCS3D01G000300", "protein kinase");
    let app = App::new(
        metadata,
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let sink = Recorder::default();

    let results = app
        .annotate(&ids(&["g1", "g2", "g3", "missing", "unreachable1"]), &sink)
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results[0].third_party_id, "TraesCS1A01G000100");
    assert_eq!(results[0].translated, "zh:protein kinase");
    assert!(results[1].translated.starts_with("translation failed"));
    assert_eq!(results[2].translated, "zh:protein kinase");
    for result in &results[3..] {
        assert_eq!(result.third_party_id, NOT_FOUND);
        assert_eq!(result.description, NOT_FOUND);
        assert_eq!(result.translated, NOT_FOUND);
    }
    sink.assert_completed_once();
}

#[test]
fn annotate_calls_translator_once_per_description() {
    let metadata = MockMetadata::default()
        .with_description("g1", "a", "heat shock protein")
        .with_description("g2", "b", "heat shock protein");
    let translator = MockTranslator::default();
    let job = AnnotationJob {
        metadata: &metadata,
        translator: &translator,
        retry: RetryPolicy::immediate(2),
    };
    run_two_stage(
        &ids(&["g1", "g2", "g1"]),
        &job,
        StageConcurrency::uniform(2),
        &Recorder::default(),
    )
    .unwrap();
    assert_eq!(*translator.seen.lock().unwrap(), vec!["heat shock protein"]);
    assert_eq!(metadata.calls("g1"), 1);
}

#[test]
fn transcripts_report_missing_genes() {
    let mut sequences = MockSequences::default();
    sequences.transcripts.insert(
        "g1".to_string(),
        ">g1.1 CDS=4-9\nTTTATGGCC\nTAATT\n".to_string(),
    );
    let app = App::new(
        MockMetadata::default(),
        sequences,
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let sink = Recorder::default();

    let report = app.transcripts(&ids(&["g1", "g2", "g1"]), &sink).unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.records[0].cdna.as_deref(), Some("TTTATGGCCTAATT"));
    assert_eq!(report.records[0].cds.as_deref(), Some("ATGGCC"));
    assert!(!report.records[1].is_found());
    assert_eq!(report.records[2], report.records[0]);
    assert_eq!(report.failed, ids(&["g2"]));
    sink.assert_completed_once();
}

#[test]
fn zero_concurrency_is_rejected_up_front() {
    let mut settings = settings(Assembly::ChineseSpring);
    settings.concurrency = StageConcurrency {
        fetch: 0,
        transform: 2,
    };
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings,
    );
    let err = app.annotate(&ids(&["g1"]), &Recorder::default()).unwrap_err();
    assert_matches!(err, GeneBatchError::InvalidConcurrency(0));
    let err = app
        .transcripts(&ids(&["g1"]), &Recorder::default())
        .unwrap_err();
    assert_matches!(err, GeneBatchError::InvalidConcurrency(0));
}

#[test]
fn empty_batch_reports_nothing() {
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let sink = Recorder::default();
    assert!(app.annotate(&[], &sink).unwrap().is_empty());
    assert!(sink.fractions.lock().unwrap().is_empty());
}

#[test]
fn a_line_with_spaces_is_reported_in_place() {
    let metadata = MockMetadata::default()
        .with_description("g1", "TraesCS1A01G000100", "protein kinase")
        .with_description("g3", "TraesCS3D01G000300", "heat shock protein");
    let app = App::new(
        metadata,
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let genes = parse_gene_list("g1\ng2 putative kinase\ng3\n").unwrap();

    let results = app.annotate(&genes, &Recorder::default()).unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].translated, "zh:protein kinase");
    assert_eq!(results[1].gene.as_str(), "g2 putative kinase");
    assert_eq!(results[1].third_party_id, NOT_FOUND);
    assert_eq!(results[2].translated, "zh:heat shock protein");
}

#[test]
fn promoter_regions_share_batched_requests() {
    let metadata = MockMetadata::default()
        .with_record("g1", "chr1A", 5000, 6000, Strand::Forward)
        .with_record("g2", "chr2B", 100, 200, Strand::Reverse)
        .with_record("g3", "chr3D", 900, 1000, Strand::Forward);
    let mut settings = settings(Assembly::ChineseSpring);
    settings.sequence_batch_size = 2;
    let sequences = MockSequences::default();
    let requests = Arc::clone(&sequences.requests);
    let app = App::new(
        metadata,
        sequences,
        MockTranslator::default(),
        MockHomologs::default(),
        settings,
    );
    let genes = ids(&["g1", "g2", "g3", "g1"]);
    let resolver = app
        .resolver(CoordinateSource::Remote, Path::new("unused.gff"), &genes)
        .unwrap();
    let sink = Recorder::default();

    let records = app.promoters(&genes, &resolver, &sink).unwrap();

    let headers: Vec<&str> = records.iter().map(|r| r.header.as_str()).collect();
    assert_eq!(
        headers,
        vec!["g1 (+ strand)", "g2 (- strand)", "g3 (+ strand)", "g1 (+ strand)"]
    );
    assert!(records.iter().all(|record| record.is_found()));
    assert_eq!(records[1].body, "CGTT");
    let mut requests = requests.lock().unwrap().clone();
    requests.sort();
    assert_eq!(requests, vec![1, 2]);
    sink.assert_completed_once();
}

#[test]
fn homologs_keep_input_order_and_mark_failures() {
    let homologs = MockHomologs {
        pending_polls: 1,
        ..MockHomologs::default()
    }
    .with_hit("ATGGCC", "TraesFLD1A01G000100");
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        homologs,
        settings(Assembly::ChineseSpring),
    );
    let queries = vec![
        query("TraesCS1A02G000100", "ATGGCC"),
        query("TraesCS2B02G000200", "NNNNAT"),
        query("TraesCS3D02G000300", "CCCGGG"),
        query("unreachable1", "TTTAAA"),
    ];
    let sink = Recorder::default();

    let rows = app.homologs(&queries, &sink).unwrap();

    let rows: Vec<(&str, &str)> = rows
        .iter()
        .map(|row| (row.query.as_str(), row.fielder_id.as_str()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("TraesCS1A02G000100", "TraesFLD1A01G000100"),
            ("TraesCS2B02G000200", SUBMIT_FAILED),
            ("TraesCS3D02G000300", NOT_FOUND),
            ("unreachable1", SUBMIT_FAILED),
        ]
    );
    sink.assert_completed_once();
}

#[test]
fn homolog_polling_stops_at_the_attempt_limit() {
    let homologs = MockHomologs {
        pending_polls: 5,
        ..MockHomologs::default()
    }
    .with_hit("ATGGCC", "TraesFLD1A01G000100");
    let polls = Arc::clone(&homologs.polls);
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        homologs,
        settings(Assembly::ChineseSpring),
    );

    let rows = app
        .homologs(&[query("slow", "ATGGCC")], &Recorder::default())
        .unwrap();

    assert_eq!(rows[0].fielder_id, NOT_FOUND);
    assert_eq!(polls.lock().unwrap().get("job-ATGGCC").copied(), Some(3));
}

#[test]
fn empty_homolog_batch_reports_nothing() {
    let app = App::new(
        MockMetadata::default(),
        MockSequences::default(),
        MockTranslator::default(),
        MockHomologs::default(),
        settings(Assembly::ChineseSpring),
    );
    let sink = Recorder::default();
    assert!(app.homologs(&[], &sink).unwrap().is_empty());
    assert!(sink.fractions.lock().unwrap().is_empty());
}
