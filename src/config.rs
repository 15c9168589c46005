use crate::{
    errors::ConfigError,
    services::{coordinator::SyncMode, downloader::PathLayout, lister::ObjectFilter},
    store::s3::S3Settings,
};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

const DEFAULT_CONFIG_FILE: &str = "config.json";
const MAX_PAGE_SIZE: usize = 1000;

/// Where objects are mirrored from.
#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// S3-compatible service (AWS S3, Tencent COS, MinIO).
    #[default]
    S3,
    /// A local directory whose subdirectories are buckets.
    Dir,
}

/// Centralized application configuration.
/// Combines the JSON config file, environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceKind,
    pub s3: Option<S3Settings>,
    pub source_root: Option<PathBuf>,
    pub bucket: String,
    pub prefix: String,
    pub page_size: usize,
    pub output_dir: PathBuf,
    pub filter: ObjectFilter,
    pub workers: usize,
    pub retry_limit: u32,
    pub show_progress: bool,
    pub mode: SyncMode,
    pub layout: PathLayout,
    pub index_path: PathBuf,
    pub report_dir: PathBuf,
    pub prune_deleted: bool,
    pub inventory: Option<PathBuf>,
}

/// Command-line configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Mirror an object store bucket to a local directory")]
pub struct Args {
    /// JSON config file (default: ./config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Object store kind
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Bucket name (overrides MIRROR_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Region (overrides MIRROR_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint URL (overrides MIRROR_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub force_path_style: bool,

    /// Root directory for `--source dir` (overrides MIRROR_SOURCE_ROOT)
    #[arg(long)]
    pub source_root: Option<PathBuf>,

    /// Object prefix to filter by
    #[arg(long)]
    pub prefix: Option<String>,

    /// File extensions to keep, e.g. `--extensions mp3 wav`
    #[arg(long, num_args = 1..)]
    pub extensions: Option<Vec<String>>,

    /// Minimum object size in bytes
    #[arg(long)]
    pub min_size: Option<u64>,

    /// Maximum object size in bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Output directory (overrides MIRROR_OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Number of concurrent download workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempts per object before it is reported as failed
    #[arg(long)]
    pub retry: Option<u32>,

    /// Keys requested per listing page (1-1000)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Diff against the local index and download only new or changed objects
    #[arg(long)]
    pub sync: bool,

    /// Local path layout for downloaded keys
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// SQLite index location (overrides MIRROR_INDEX_PATH)
    #[arg(long)]
    pub index_path: Option<PathBuf>,

    /// Directory for download reports
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// In sync mode, delete local files whose remote object is gone
    #[arg(long)]
    pub prune: bool,

    /// Write the remote object inventory to this JSON file and exit
    #[arg(long)]
    pub inventory: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutArg {
    Tree,
    Flat,
}

impl From<LayoutArg> for PathLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Tree => PathLayout::Tree,
            LayoutArg::Flat => PathLayout::Flat,
        }
    }
}

/// On-disk JSON configuration.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FileConfig {
    pub source: Option<SourceKind>,
    pub cos_config: StoreSection,
    pub options: OptionsSection,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct StoreSection {
    pub secret_id: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: Option<bool>,
    pub source_root: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct OptionsSection {
    pub prefix: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub max_keys_per_request: Option<usize>,
    pub extensions: Option<Vec<String>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub max_workers: Option<usize>,
    pub retry_times: Option<u32>,
    pub show_progress: Option<bool>,
    pub sync: Option<bool>,
    pub layout: Option<PathLayout>,
    pub index_path: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub prune_deleted: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl AppConfig {
    /// Parse CLI args, the process environment and the config file.
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        let args = Args::parse();
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                FileConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => FileConfig::default(),
        };
        Self::resolve(args, file, |name| env::var(name).ok())
    }

    /// Merge with precedence CLI > environment > file > default.
    pub fn resolve(
        args: Args,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let store = file.cos_config;
        let opts = file.options;

        let source = args
            .source
            .or_else(|| {
                env("MIRROR_SOURCE").and_then(|v| SourceKind::from_str(&v, true).ok())
            })
            .or(file.source)
            .unwrap_or_default();

        let bucket = args
            .bucket
            .or_else(|| env("MIRROR_BUCKET"))
            .or(store.bucket_name)
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::Missing("bucket"))?;

        let (s3, source_root) = match source {
            SourceKind::S3 => {
                let settings = S3Settings {
                    region: args
                        .region
                        .or_else(|| env("MIRROR_REGION"))
                        .or(store.region)
                        .ok_or(ConfigError::Missing("region"))?,
                    secret_id: env("MIRROR_SECRET_ID")
                        .or(store.secret_id)
                        .ok_or(ConfigError::Missing("secret_id"))?,
                    secret_key: env("MIRROR_SECRET_KEY")
                        .or(store.secret_key)
                        .ok_or(ConfigError::Missing("secret_key"))?,
                    endpoint: args
                        .endpoint
                        .or_else(|| env("MIRROR_ENDPOINT"))
                        .or(store.endpoint),
                    force_path_style: args.force_path_style
                        || store.force_path_style.unwrap_or(false),
                };
                (Some(settings), None)
            }
            SourceKind::Dir => {
                let root = args
                    .source_root
                    .or_else(|| env("MIRROR_SOURCE_ROOT").map(PathBuf::from))
                    .or(store.source_root)
                    .ok_or(ConfigError::Missing("source_root"))?;
                (None, Some(root))
            }
        };

        let page_size = args
            .page_size
            .or(opts.max_keys_per_request)
            .unwrap_or(MAX_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "page_size",
                reason: "must be at least 1".into(),
            });
        }

        let workers = args.workers.or(opts.max_workers).unwrap_or(5);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                name: "workers",
                reason: "must be at least 1".into(),
            });
        }

        let retry_limit = args.retry.or(opts.retry_times).unwrap_or(3);
        if retry_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "retry",
                reason: "must be at least 1".into(),
            });
        }

        let min_size = args.min_size.or(opts.min_size);
        let max_size = args.max_size.or(opts.max_size);
        if let (Some(min), Some(max)) = (min_size, max_size)
            && min > max
        {
            return Err(ConfigError::Invalid {
                name: "min_size",
                reason: format!("{min} is larger than max_size {max}"),
            });
        }
        let extensions = args.extensions.or(opts.extensions).unwrap_or_default();

        Ok(Self {
            source,
            s3,
            source_root,
            bucket,
            prefix: args.prefix.or(opts.prefix).unwrap_or_default(),
            page_size: page_size.min(MAX_PAGE_SIZE),
            output_dir: args
                .output_dir
                .or_else(|| env("MIRROR_OUTPUT_DIR").map(PathBuf::from))
                .or(opts.download_dir)
                .unwrap_or_else(|| PathBuf::from("downloads")),
            filter: ObjectFilter::new(&extensions, min_size, max_size),
            workers,
            retry_limit,
            show_progress: !args.no_progress && opts.show_progress.unwrap_or(true),
            mode: if args.sync || opts.sync.unwrap_or(false) {
                SyncMode::Diff
            } else {
                SyncMode::Mirror
            },
            layout: args
                .layout
                .map(PathLayout::from)
                .or(opts.layout)
                .unwrap_or_default(),
            index_path: args
                .index_path
                .or_else(|| env("MIRROR_INDEX_PATH").map(PathBuf::from))
                .or(opts.index_path)
                .unwrap_or_else(|| PathBuf::from("download_index.db")),
            report_dir: args
                .report_dir
                .or(opts.report_dir)
                .unwrap_or_else(|| PathBuf::from("logs")),
            prune_deleted: args.prune || opts.prune_deleted.unwrap_or(false),
            inventory: args.inventory,
        })
    }
}
