//! Register a parcellation atlas against the reference mask.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use tokio::runtime::Builder;
use tracing_subscriber::{EnvFilter, fmt};

use lesion_bank::domain::content_hash;
use lesion_bank::domain::imaging::FileKind;
use lesion_bank::domain::parcellation::{AtlasDefinition, RegistrationOutcome};
use lesion_bank::domain::ports::VolumeCodec;
use lesion_bank::server::{CorpusAdapters, load_settings, reference};

/// `register-parcellation` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "register-parcellation",
    about = "Register an integer-labelled atlas and build its voxelwise index",
    version
)]
struct CliArgs {
    /// Path to the atlas `.nii` or `.nii.gz` file.
    #[arg(long = "atlas", value_name = "path")]
    atlas_path: PathBuf,
    /// Unique atlas name.
    #[arg(long, value_name = "name")]
    name: String,
    /// Free-text description.
    #[arg(long, value_name = "text", default_value = "")]
    description: String,
    /// JSON object mapping label values to region names.
    #[arg(long = "labels", value_name = "path")]
    labels_path: Option<PathBuf>,
    /// Reference mask. Falls back to `LESION_BANK_MASK_PATH` when omitted.
    #[arg(long = "mask", value_name = "path")]
    mask_path: Option<PathBuf>,
    /// Rebuild an existing atlas of the same name.
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
    let (settings, _pipeline) = load_settings("register-parcellation")?;
    let adapters = CorpusAdapters::connect(&settings).await?;
    let mask_path = match args.mask_path.as_deref() {
        Some(path) => path,
        None => settings.mask_path()?,
    };
    let mask = reference::load_reference_mask(mask_path, adapters.codec.as_ref())?;

    let bytes = reference::read_file(&args.atlas_path)?;
    let labels = adapters
        .codec
        .decode_volume(&bytes, &FileKind::from_filename(&file_name(&args.atlas_path)))
        .map_err(|err| eyre!("unreadable atlas {}: {err}", args.atlas_path.display()))?;
    let label_names = match args.labels_path.as_deref() {
        Some(path) => read_label_names(path)?,
        None => BTreeMap::new(),
    };

    let outcome = adapters
        .registry(Arc::new(mask))
        .register(
            AtlasDefinition {
                name: args.name,
                description: args.description,
                labels,
                label_names,
                content_hash: content_hash(&bytes),
            },
            args.override_existing,
        )
        .await
        .map_err(|err| eyre!("registration failed: {err}"))?;

    print_outcome(&outcome)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_label_names(path: &Path) -> Result<BTreeMap<i32, String>> {
    let bytes = reference::read_file(path)?;
    serde_json::from_slice(&bytes)
        .wrap_err_with(|| format!("failed to parse label names at {}", path.display()))
}

fn print_outcome(outcome: &RegistrationOutcome) -> Result<()> {
    match outcome {
        RegistrationOutcome::Registered {
            parcellation,
            parcel_count,
            voxel_count,
            unlabeled_mask_voxels,
        } => {
            println!("status=registered");
            println!("parcellation_id={}", parcellation.id);
            println!("content_hash={}", parcellation.content_hash);
            println!("parcel_count={parcel_count}");
            println!("voxel_count={voxel_count}");
            println!("unlabeled_mask_voxels={unlabeled_mask_voxels}");
        }
        RegistrationOutcome::Unchanged(parcellation) => {
            println!("status=unchanged");
            println!("parcellation_id={}", parcellation.id);
        }
        RegistrationOutcome::Overridden {
            report,
            voxel_count,
        } => {
            println!("status=overridden");
            println!("parcellation_id={}", report.parcellation.id);
            println!("voxel_count={voxel_count}");
            println!("reattached={}", report.reattached);
            println!("orphaned={}", report.orphaned.len());
            if !report.orphaned.is_empty() {
                let orphans = serde_json::to_string(&report.orphaned)
                    .wrap_err("failed to encode orphaned rows")?;
                println!("orphaned_rows={orphans}");
            }
        }
    }
    Ok(())
}
