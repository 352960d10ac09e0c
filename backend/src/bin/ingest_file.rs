//! Ingest one corpus file and reduce it before exiting.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use tokio::runtime::Builder;
use tracing_subscriber::{EnvFilter, fmt};

use lesion_bank::domain::ingestion::{IngestOutcome, IngestRequest};
use lesion_bank::domain::ports::DerivedFileRepository;
use lesion_bank::domain::{FileCategory, FileDescriptor, FileTags, TaxonomyLevel};
use lesion_bank::outbound::queue::InlineReductionQueue;
use lesion_bank::server::{CorpusAdapters, ReferenceData, load_settings, reference};

/// `ingest-file` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ingest-file",
    about = "Store a corpus file and run its parcelwise reduction",
    version
)]
struct CliArgs {
    /// File to ingest.
    #[arg(long = "file", value_name = "path")]
    path: PathBuf,
    /// Declared filename. Defaults to the file's own name.
    #[arg(long, value_name = "name")]
    filename: Option<String>,
    /// `roi`, `connectivity`, or `group_level_map`.
    #[arg(long, value_name = "category", value_parser = parse_category)]
    category: FileCategory,
    /// Owning subject of `roi` and `connectivity` files.
    #[arg(long = "subject-id", value_name = "id")]
    subject_id: Option<i64>,
    /// Connectome of a connectivity map.
    #[arg(long, value_name = "name")]
    connectome: Option<String>,
    /// Statistic stored in the map.
    #[arg(long, value_name = "name")]
    statistic: Option<String>,
    /// Taxonomy level of a group-level map.
    #[arg(long = "taxonomy-level", value_name = "level", value_parser = parse_level)]
    taxonomy_level: Option<TaxonomyLevel>,
    /// Taxon of a group-level map.
    #[arg(long, value_name = "name")]
    taxon: Option<String>,
    /// Map family of a group-level map.
    #[arg(long = "map-type", value_name = "name")]
    map_type: Option<String>,
    /// Replace an existing file with the same content or path.
    #[arg(long = "override")]
    override_existing: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
    let args = CliArgs::parse();
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: CliArgs) -> Result<()> {
    let descriptor = FileDescriptor::from_tags(
        args.category,
        FileTags {
            subject_id: args.subject_id,
            connectome: args.connectome,
            statistic: args.statistic,
            taxonomy_level: args.taxonomy_level,
            taxon: args.taxon,
            map_type: args.map_type,
        },
    )
    .map_err(|err| eyre!("{err}"))?;
    let filename = match args.filename {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("{} has no file name", args.path.display()))?,
    };
    let bytes = reference::read_file(&args.path)?;

    let (settings, pipeline) = load_settings("ingest-file")?;
    let adapters = CorpusAdapters::connect(&settings).await?;
    let reference_data = ReferenceData::load(&settings, &adapters.codec)?;
    let worker = Arc::new(adapters.reduction_worker(&reference_data, &pipeline));
    let ingestion = adapters.ingestion(Arc::new(InlineReductionQueue::new(worker)), &pipeline);

    let outcome = ingestion
        .ingest(IngestRequest {
            bytes,
            filename,
            descriptor,
            override_existing: args.override_existing,
        })
        .await
        .map_err(|err| eyre!("ingestion failed: {err}"))?;
    // The inline queue has already reduced the file; report its final state.
    let record = adapters
        .files
        .find(outcome.record().id)
        .await
        .map_err(|err| eyre!("failed to reload file: {err}"))?
        .unwrap_or_else(|| outcome.record().clone());

    let status = match &outcome {
        IngestOutcome::Stored(_) => "stored".to_owned(),
        IngestOutcome::Replaced {
            replaced_file_id, ..
        } => format!("replaced:{replaced_file_id}"),
        IngestOutcome::DuplicateSkipped(_) => "duplicate_skipped".to_owned(),
    };
    println!("status={status}");
    println!("file_id={}", record.id);
    println!("path={}", record.path);
    println!("content_hash={}", record.content_hash);
    println!("index_status={}", record.index_status.as_str());
    if let Some(error) = &record.index_error {
        println!("index_error={error}");
    }
    Ok(())
}

fn parse_category(raw: &str) -> Result<FileCategory, String> {
    raw.parse().map_err(|err: lesion_bank::domain::Error| err.to_string())
}

fn parse_level(raw: &str) -> Result<TaxonomyLevel, String> {
    raw.parse().map_err(|err: lesion_bank::domain::Error| err.to_string())
}
