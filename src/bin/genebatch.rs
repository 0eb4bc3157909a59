use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use genebatch::app::{App, BatchSettings, ProgressSink};
use genebatch::config::{ConfigLoader, ResolvedConfig};
use genebatch::domain::{Assembly, GeneId, parse_gene_list};
use genebatch::error::GeneBatchError;
use genebatch::homolog::{QuerySequence, WheatOmicsBlastClient, parse_queries};
use genebatch::output::{JsonOutput, LogProgress, OutputMode, Quiet, TextOutput};
use genebatch::resolver::CoordinateSource;
use genebatch::translate::GoogleTranslateClient;
use genebatch::wheatomics::WheatOmicsHttpClient;

type HttpApp =
    App<WheatOmicsHttpClient, WheatOmicsHttpClient, GoogleTranslateClient, WheatOmicsBlastClient>;

#[derive(Parser)]
#[command(name = "genebatch")]
#[command(about = "Batch gene annotation and promoter/transcript sequence retrieval for wheat")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./genebatch.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Suppress progress logging.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Look up third-party ids and descriptions, with translations")]
    Annotate(AnnotateArgs),
    #[command(about = "Fetch upstream promoter sequences as FASTA")]
    Promoters(PromoterArgs),
    #[command(about = "Fetch cDNA and CDS of each gene's first transcript")]
    Transcripts(BatchArgs),
    #[command(about = "Find the Fielder homolog of each query sequence with BLAST")]
    Homologs(HomologArgs),
}

#[derive(Args, Clone)]
struct BatchArgs {
    /// Gene list, one id per line (stdin when omitted).
    #[arg(long)]
    input: Option<Utf8PathBuf>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct AnnotateArgs {
    #[command(flatten)]
    batch: BatchArgs,

    /// Translation workers.
    #[arg(long, alias = "translate-concurrency")]
    transform_concurrency: Option<usize>,
}

#[derive(Args, Clone)]
struct PromoterArgs {
    #[command(flatten)]
    batch: BatchArgs,

    #[arg(long, value_enum)]
    source: Option<CoordinateSource>,

    #[arg(long)]
    feature_table: Option<Utf8PathBuf>,

    #[arg(long, value_enum)]
    assembly: Option<Assembly>,

    /// Promoter length in bases.
    #[arg(long)]
    upstream: Option<u64>,

    /// Sequence request workers.
    #[arg(long)]
    transform_concurrency: Option<usize>,

    /// Promoter regions per sequence request.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Args, Clone)]
struct HomologArgs {
    /// Query sequences as FASTA (stdin when omitted).
    #[arg(long)]
    input: Option<Utf8PathBuf>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Result page checks per job before giving up.
    #[arg(long)]
    poll_attempts: Option<usize>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GeneBatchError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeneBatchError) -> u8 {
    match error {
        GeneBatchError::MissingFeatureTable(_)
        | GeneBatchError::ConfigRead(_)
        | GeneBatchError::ConfigParse(_) => 2,
        GeneBatchError::Http(_)
        | GeneBatchError::Status { .. }
        | GeneBatchError::Translation(_)
        | GeneBatchError::RetriesExhausted { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let sink: &dyn ProgressSink = if cli.quiet { &Quiet } else { &LogProgress };

    match cli.command {
        Commands::Annotate(args) => run_annotate(args, config, sink),
        Commands::Promoters(args) => run_promoters(args, config, sink),
        Commands::Transcripts(args) => run_transcripts(args, config, sink),
        Commands::Homologs(args) => run_homologs(args, config, sink),
    }
}

fn run_annotate(
    args: AnnotateArgs,
    mut config: ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    apply_concurrency(&mut config, args.batch.concurrency, args.transform_concurrency)?;
    let ids = read_gene_ids(args.batch.input.as_ref())?;
    let app = build_app(&config)?;

    let results = app.annotate(&ids, sink)?;
    match output_mode(&args.batch) {
        OutputMode::Json => JsonOutput::print_annotations(&results).into_diagnostic()?,
        OutputMode::Text => TextOutput::write_tsv(&mut io::stdout().lock(), &results)
            .into_diagnostic()?,
    }
    Ok(())
}

fn run_promoters(
    args: PromoterArgs,
    mut config: ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    apply_concurrency(&mut config, args.batch.concurrency, args.transform_concurrency)?;
    if let Some(size) = args.batch_size {
        if size == 0 {
            return Err(miette::Report::msg("--batch-size must be at least 1"));
        }
        config.sequence_batch_size = size;
    }
    if let Some(source) = args.source {
        config.source = source;
        config.assembly = source.default_assembly();
    }
    if let Some(assembly) = args.assembly {
        config.assembly = assembly;
    }
    if let Some(path) = args.feature_table {
        config.feature_table = path;
    }
    if let Some(upstream) = args.upstream {
        if upstream == 0 {
            return Err(miette::Report::msg("--upstream must be at least 1"));
        }
        config.upstream_len = upstream;
    }

    let ids = read_gene_ids(args.batch.input.as_ref())?;
    let app = build_app(&config)?;
    let resolver = app.resolver(config.source, config.feature_table.as_std_path(), &ids)?;

    let records = app.promoters(&ids, &resolver, sink)?;
    match output_mode(&args.batch) {
        OutputMode::Json => JsonOutput::print_promoters(&records).into_diagnostic()?,
        OutputMode::Text => TextOutput::write_fasta(&mut io::stdout().lock(), &records)
            .into_diagnostic()?,
    }
    Ok(())
}

fn run_transcripts(
    args: BatchArgs,
    mut config: ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    apply_concurrency(&mut config, args.concurrency, None)?;
    let ids = read_gene_ids(args.input.as_ref())?;
    let app = build_app(&config)?;

    let report = app.transcripts(&ids, sink)?;
    if !report.failed.is_empty() {
        warn!(
            failed = report.failed.len(),
            "no transcript sequence for some genes"
        );
    }
    match output_mode(&args) {
        OutputMode::Json => JsonOutput::print_transcripts(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::write_transcripts(&mut io::stdout().lock(), &report)
            .into_diagnostic()?,
    }
    Ok(())
}

fn run_homologs(
    args: HomologArgs,
    mut config: ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    apply_concurrency(&mut config, args.concurrency, None)?;
    if let Some(attempts) = args.poll_attempts {
        config.homolog.poll.attempts = attempts.max(1);
    }
    let queries = read_queries(args.input.as_ref())?;
    let app = build_app(&config)?;

    let rows = app.homologs(&queries, sink)?;
    if args.json {
        JsonOutput::print_homologs(&rows).into_diagnostic()?;
    } else {
        TextOutput::write_homologs(&mut io::stdout().lock(), &rows).into_diagnostic()?;
    }
    Ok(())
}

fn apply_concurrency(
    config: &mut ResolvedConfig,
    fetch: Option<usize>,
    transform: Option<usize>,
) -> Result<(), GeneBatchError> {
    if let Some(workers) = fetch {
        config.concurrency.fetch = workers;
        config.concurrency.transform = transform.unwrap_or(workers);
    } else if let Some(workers) = transform {
        config.concurrency.transform = workers;
    }
    for workers in [config.concurrency.fetch, config.concurrency.transform] {
        if workers == 0 {
            return Err(GeneBatchError::InvalidConcurrency(workers));
        }
    }
    Ok(())
}

fn build_app(config: &ResolvedConfig) -> Result<HttpApp, GeneBatchError> {
    let wheatomics = WheatOmicsHttpClient::new(&config.base_url, config.timeout)?;
    let translator = GoogleTranslateClient::new(
        &config.translate.endpoint,
        &config.translate.source_lang,
        &config.translate.target_lang,
        config.timeout,
    )?;
    let blast = WheatOmicsBlastClient::new(&config.homolog.base_url, config.timeout)?;
    let settings = BatchSettings {
        concurrency: config.concurrency,
        retry: config.retry,
        assembly: config.assembly,
        upstream_len: config.upstream_len,
        sequence_batch_size: config.sequence_batch_size,
        poll: config.homolog.poll,
    };
    Ok(App::new(
        wheatomics.clone(),
        wheatomics,
        translator,
        blast,
        settings,
    ))
}

fn read_input(input: Option<&Utf8PathBuf>) -> miette::Result<String> {
    match input {
        Some(path) => fs::read_to_string(path).into_diagnostic(),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).into_diagnostic()?;
            Ok(text)
        }
    }
}

fn read_queries(input: Option<&Utf8PathBuf>) -> miette::Result<Vec<QuerySequence>> {
    let queries = parse_queries(&read_input(input)?);
    if queries.is_empty() {
        warn!("no query sequences in input");
    }
    Ok(queries)
}

fn read_gene_ids(input: Option<&Utf8PathBuf>) -> miette::Result<Vec<GeneId>> {
    let text = read_input(input)?;
    let ids = parse_gene_list(&text)?;
    if ids.is_empty() {
        warn!("gene list is empty");
    }
    Ok(ids)
}

fn output_mode(args: &BatchArgs) -> OutputMode {
    if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}
