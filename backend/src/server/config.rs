//! Layered settings loaded via OrthoConfig.
//!
//! Values come from command-line flags, `LESION_BANK_*` and
//! `LESION_PIPELINE_*` environment variables, and configuration files.
//! Accessors apply defaults and convert into the domain configuration
//! structs.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::VisibilityScope;
use crate::domain::analysis_orchestrator::OrchestratorConfig;
use crate::domain::connectivity_mapping::ConnectivityMappingConfig;
use crate::domain::decode::DecodeConfig;
use crate::domain::ingestion::IngestionConfig;
use crate::domain::parcelwise_reduction_worker::ParcelwiseReductionConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BLOB_ROOT: &str = "blobs";
const DEFAULT_PUBLIC_BASE_URL: &str = "/files";
const DEFAULT_REDUCTION_ATLAS: &str = "3209c91v";
const DEFAULT_CONNECTOME: &str = "GSP1000MF";
const DEFAULT_POOL_SIZE: u32 = 10;

/// Settings that cannot be used as given.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A setting without a default was not provided.
    #[error("{0} must be configured")]
    Missing(&'static str),
    /// Flags, environment, or configuration files could not be read.
    #[error("failed to load settings: {0}")]
    Load(String),
    /// A setting could not be parsed.
    #[error("{name} is invalid: {message}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// Parse failure.
        message: String,
    },
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, name: &'static str) -> Result<&'a T, SettingsError> {
    value.ok_or(SettingsError::Missing(name))
}

/// Load both settings groups for `program`.
///
/// Only the program name is passed to the argument layer, so the binaries
/// keep their own command-line parsing.
pub fn load_settings(program: &str) -> Result<(ServerSettings, PipelineSettings), SettingsError> {
    let argv = [OsString::from(program)];
    let server = ServerSettings::load_from_iter(argv.clone())
        .map_err(|err| SettingsError::Load(err.to_string()))?;
    let pipeline = PipelineSettings::load_from_iter(argv)
        .map_err(|err| SettingsError::Load(err.to_string()))?;
    Ok((server, pipeline))
}

/// Service locations and corpus visibility.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LESION_BANK")]
pub struct ServerSettings {
    /// Socket address the HTTP server binds to.
    pub bind_addr: Option<String>,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    pub pool_max_size: Option<u32>,
    /// Directory holding stored blobs.
    pub blob_root: Option<PathBuf>,
    /// URL prefix under which blobs are served.
    pub public_base_url: Option<String>,
    /// Reference brain mask on the template grid.
    pub mask_path: Option<PathBuf>,
    /// Label volume of the atlas used for parcelwise reduction.
    pub reduction_atlas_path: Option<PathBuf>,
    /// Registered name of the reduction atlas.
    pub reduction_atlas_name: Option<String>,
    /// Normative connectome whose chunk maps drive full analyses.
    pub connectome: Option<String>,
    /// Include internal-only subjects and symptoms in decodes.
    #[ortho_config(default = false)]
    pub internal_scope: bool,
}

impl ServerSettings {
    /// Parsed bind address, defaulting to `0.0.0.0:8080`.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.bind_addr
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
            .map_err(|err: std::net::AddrParseError| SettingsError::Invalid {
                name: "bind_addr",
                message: err.to_string(),
            })
    }

    /// Database connection string.
    pub fn database_url(&self) -> Result<&str, SettingsError> {
        required(self.database_url.as_deref(), "database_url")
    }

    /// Pool size, defaulting to 10.
    pub fn pool_max_size(&self) -> u32 {
        self.pool_max_size.unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Blob directory, defaulting to `./blobs`.
    pub fn blob_root(&self) -> &Path {
        self.blob_root
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_BLOB_ROOT))
    }

    /// Public blob URL prefix, defaulting to `/files`.
    pub fn public_base_url(&self) -> &str {
        self.public_base_url
            .as_deref()
            .unwrap_or(DEFAULT_PUBLIC_BASE_URL)
    }

    /// Reference mask path.
    pub fn mask_path(&self) -> Result<&Path, SettingsError> {
        required(self.mask_path.as_deref(), "mask_path")
    }

    /// Reduction atlas path.
    pub fn reduction_atlas_path(&self) -> Result<&Path, SettingsError> {
        required(self.reduction_atlas_path.as_deref(), "reduction_atlas_path")
    }

    /// Reduction atlas name, defaulting to `3209c91v`.
    pub fn reduction_atlas_name(&self) -> &str {
        self.reduction_atlas_name
            .as_deref()
            .unwrap_or(DEFAULT_REDUCTION_ATLAS)
    }

    /// Connectome name, defaulting to `GSP1000MF`.
    pub fn connectome(&self) -> &str {
        self.connectome.as_deref().unwrap_or(DEFAULT_CONNECTOME)
    }

    /// Visibility applied to decode submissions.
    pub fn scope(&self) -> VisibilityScope {
        if self.internal_scope {
            VisibilityScope::Internal
        } else {
            VisibilityScope::Public
        }
    }
}

/// Worker pool sizes, limits, and timeouts.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LESION_PIPELINE")]
pub struct PipelineSettings {
    /// Reductions running at once.
    pub worker_concurrency: Option<usize>,
    /// Reductions waiting before ingestion is rejected.
    pub queue_capacity: Option<usize>,
    /// Largest accepted upload or query image.
    pub max_upload_bytes: Option<usize>,
    /// Seconds one reduction may take.
    pub reduction_timeout_secs: Option<u64>,
    /// Analysis tasks running at once.
    pub max_concurrent_tasks: Option<usize>,
    /// Seconds one analysis task may take.
    pub task_timeout_secs: Option<u64>,
    /// Seconds one connectivity chunk may take.
    pub chunk_timeout_secs: Option<u64>,
    /// Subject maps a decode loads concurrently.
    pub decode_fetch_concurrency: Option<usize>,
}

impl PipelineSettings {
    /// Reduction worker concurrency, defaulting to 2.
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency.unwrap_or(2).max(1)
    }

    /// Reduction queue capacity, defaulting to 256.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(256).max(1)
    }

    /// Ingestion limits.
    pub fn ingestion_config(&self) -> IngestionConfig {
        let defaults = IngestionConfig::default();
        IngestionConfig {
            max_upload_bytes: self.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
        }
    }

    /// Reduction worker limits.
    pub fn reduction_config(&self) -> ParcelwiseReductionConfig {
        let defaults = ParcelwiseReductionConfig::default();
        ParcelwiseReductionConfig {
            timeout: self
                .reduction_timeout_secs
                .map_or(defaults.timeout, Duration::from_secs),
        }
    }

    /// Orchestrator pool size and task timeout.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            max_concurrent_tasks: self
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            task_timeout: self
                .task_timeout_secs
                .map_or(defaults.task_timeout, Duration::from_secs),
        }
    }

    /// Connectivity mapping against `connectome`.
    pub fn mapping_config(&self, connectome: &str) -> ConnectivityMappingConfig {
        let defaults = ConnectivityMappingConfig::default();
        ConnectivityMappingConfig {
            connectome: connectome.to_owned(),
            chunk_timeout: self
                .chunk_timeout_secs
                .map_or(defaults.chunk_timeout, Duration::from_secs),
        }
    }

    /// Decode fetch concurrency.
    pub fn decode_config(&self) -> DecodeConfig {
        let defaults = DecodeConfig::default();
        DecodeConfig {
            fetch_concurrency: self
                .decode_fetch_concurrency
                .unwrap_or(defaults.fetch_concurrency),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings parsing and defaults.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const SERVER_VARS: [&str; 10] = [
        "LESION_BANK_BIND_ADDR",
        "LESION_BANK_DATABASE_URL",
        "LESION_BANK_POOL_MAX_SIZE",
        "LESION_BANK_BLOB_ROOT",
        "LESION_BANK_PUBLIC_BASE_URL",
        "LESION_BANK_MASK_PATH",
        "LESION_BANK_REDUCTION_ATLAS_PATH",
        "LESION_BANK_REDUCTION_ATLAS_NAME",
        "LESION_BANK_CONNECTOME",
        "LESION_BANK_INTERNAL_SCOPE",
    ];

    fn cleared_server_env() -> Vec<(&'static str, Option<String>)> {
        SERVER_VARS.iter().map(|name| (*name, None)).collect()
    }

    fn load_server() -> ServerSettings {
        ServerSettings::load_from_iter([OsString::from("lesion-bank")])
            .expect("server settings load")
    }

    fn load_pipeline() -> PipelineSettings {
        PipelineSettings::load_from_iter([OsString::from("lesion-bank")])
            .expect("pipeline settings load")
    }

    #[rstest]
    fn server_defaults_apply_when_unset() {
        let _guard = lock_env(cleared_server_env());

        let settings = load_server();

        assert_eq!(settings.bind_addr(), Ok("0.0.0.0:8080".parse().expect("addr")));
        assert_eq!(settings.blob_root(), Path::new("blobs"));
        assert_eq!(settings.public_base_url(), "/files");
        assert_eq!(settings.reduction_atlas_name(), "3209c91v");
        assert_eq!(settings.connectome(), "GSP1000MF");
        assert_eq!(settings.scope(), VisibilityScope::Public);
        assert_eq!(
            settings.database_url(),
            Err(SettingsError::Missing("database_url"))
        );
        assert_eq!(settings.mask_path(), Err(SettingsError::Missing("mask_path")));
    }

    #[rstest]
    fn server_environment_overrides_are_respected() {
        let mut vars = cleared_server_env();
        vars.extend([
            ("LESION_BANK_BIND_ADDR", Some("127.0.0.1:9000".to_owned())),
            (
                "LESION_BANK_DATABASE_URL",
                Some("postgres://corpus@localhost/corpus".to_owned()),
            ),
            ("LESION_BANK_MASK_PATH", Some("/data/mask.nii.gz".to_owned())),
            ("LESION_BANK_INTERNAL_SCOPE", Some("true".to_owned())),
        ]);
        let _guard = lock_env(vars);

        let settings = load_server();

        assert_eq!(settings.bind_addr(), Ok("127.0.0.1:9000".parse().expect("addr")));
        assert_eq!(
            settings.database_url(),
            Ok("postgres://corpus@localhost/corpus")
        );
        assert_eq!(settings.mask_path(), Ok(Path::new("/data/mask.nii.gz")));
        assert_eq!(settings.scope(), VisibilityScope::Internal);
    }

    #[rstest]
    fn malformed_bind_address_is_invalid() {
        let settings = ServerSettings {
            bind_addr: Some("not-an-address".to_owned()),
            ..ServerSettings::default()
        };
        assert!(matches!(
            settings.bind_addr(),
            Err(SettingsError::Invalid { name: "bind_addr", .. })
        ));
    }

    #[rstest]
    fn pipeline_settings_convert_into_domain_configs() {
        let _guard = lock_env([
            ("LESION_PIPELINE_WORKER_CONCURRENCY", Some("0".to_owned())),
            ("LESION_PIPELINE_MAX_UPLOAD_BYTES", Some("1024".to_owned())),
            ("LESION_PIPELINE_TASK_TIMEOUT_SECS", Some("30".to_owned())),
            ("LESION_PIPELINE_CHUNK_TIMEOUT_SECS", Some("5".to_owned())),
            ("LESION_PIPELINE_QUEUE_CAPACITY", None),
            ("LESION_PIPELINE_REDUCTION_TIMEOUT_SECS", None),
            ("LESION_PIPELINE_MAX_CONCURRENT_TASKS", None),
            ("LESION_PIPELINE_DECODE_FETCH_CONCURRENCY", None),
        ]);

        let settings = load_pipeline();

        assert_eq!(settings.worker_concurrency(), 1);
        assert_eq!(settings.queue_capacity(), 256);
        assert_eq!(settings.ingestion_config().max_upload_bytes, 1024);
        assert_eq!(settings.reduction_config(), ParcelwiseReductionConfig::default());
        let orchestrator = settings.orchestrator_config();
        assert_eq!(orchestrator.task_timeout, Duration::from_secs(30));
        assert_eq!(
            orchestrator.max_concurrent_tasks,
            OrchestratorConfig::default().max_concurrent_tasks
        );
        let mapping = settings.mapping_config("yeo1000");
        assert_eq!(mapping.connectome, "yeo1000");
        assert_eq!(mapping.chunk_timeout, Duration::from_secs(5));
        assert_eq!(settings.decode_config(), DecodeConfig::default());
    }
}
