// rust/pipeline-core/src/config.rs

//! Configuration management for the input pipeline.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.
//!
//! Data sources may be written either as tables or as the positional
//! `[train_glob, eval_glob, stitch, datatype, weight]` tuples used by
//! existing training configurations:
//!
//! ```toml
//! data_path = "gs://bucket/datasets"
//! batch_size = 8
//! n_ctx = 1024
//! datasets = [
//!     ["openwebtext/train_*.tfrecords", "openwebtext/eval_*.tfrecords", 4, "random_sample", 1.0],
//!     { train_glob = "books/train_*", eval_glob = "books/eval_*", stitch = 2, datatype = "sample", weight = 0.5 },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::{Token, END_OF_TEXT};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix joined in front of every source glob.
    pub data_path: String,
    /// Input sources mixed into one stream.
    pub datasets: Vec<SourceConfig>,
    /// Number of examples per batch.
    pub batch_size: usize,
    /// Steps per accelerator loop; prefetch depth is `iterations * 2`.
    pub iterations: usize,
    /// Context window size in tokens.
    pub n_ctx: usize,
    /// Path to the tokenizer assets used for prediction input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_path: Option<PathBuf>,
    /// Token placed between stitched documents.
    pub boundary_token: Token,
    /// Optional seed for shuffling and window sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub storage: StorageConfig,
    pub reader: RecordConfig,
}

/// How records of a source are turned into examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// Stitch, then take one window at a uniformly random offset.
    RandomSample,
    /// Stitch, then take the left-aligned window.
    Sample,
    /// Records are already exactly `n_ctx` tokens long.
    Chunk,
}

impl Datatype {
    /// Returns true for the datatypes that stitch and window their records.
    pub fn is_sampling(self) -> bool {
        matches!(self, Self::RandomSample | Self::Sample)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RandomSample => "random_sample",
            Self::Sample => "sample",
            Self::Chunk => "chunk",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datatype {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random_sample" | "random-sample" => Ok(Self::RandomSample),
            "sample" => Ok(Self::Sample),
            "chunk" => Ok(Self::Chunk),
            other => Err(PipelineError::config(format!(
                "unknown datatype '{other}' (expected random_sample, sample or chunk)"
            ))),
        }
    }
}

/// Which glob of a source to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Eval,
}

/// One input source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub train_glob: String,
    pub eval_glob: String,
    /// Number of records concatenated per stitched sequence.
    pub stitch: usize,
    pub datatype: Datatype,
    /// Relative mixing weight; weights need not sum to one.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl SourceConfig {
    /// Returns the glob for the given split.
    pub fn glob(&self, split: Split) -> &str {
        match split {
            Split::Train => &self.train_glob,
            Split::Eval => &self.eval_glob,
        }
    }

    /// Capacity of the shuffle buffer placed in front of the stitcher.
    pub fn shuffle_capacity(&self) -> usize {
        1000 * self.stitch
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendType {
    /// Local filesystem storage.
    #[default]
    Local,
    /// S3-compatible object storage.
    S3,
}

/// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type: "local" or "s3".
    pub backend: StorageBackendType,
    /// Base path for all storage operations (local path or S3 key prefix).
    pub base_path: PathBuf,
    /// Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    /// Whether to use memory-mapped I/O (local storage only).
    pub use_mmap: bool,
    /// File size threshold (bytes) above which to use mmap (local storage only).
    pub mmap_threshold: u64,
    /// S3-specific configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

/// S3-compatible storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 bucket name.
    pub bucket: String,
    /// AWS region (e.g., "us-east-1").
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// AWS access key ID (if not using instance credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// AWS secret access key (if not using instance credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    /// AWS session token (for temporary credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Maximum number of retries for failed requests.
    pub max_retries: u32,
    /// Initial delay (milliseconds) between retries.
    pub retry_delay_ms: u64,
    /// Maximum delay (milliseconds) between retries.
    pub max_retry_delay_ms: u64,
    /// Whether to use path-style addressing (required for MinIO).
    pub force_path_style: bool,
    /// Whether to allow HTTP (non-TLS) connections.
    pub allow_http: bool,
}

/// Record reader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Number of files read concurrently.
    pub cycle_length: usize,
    /// Decoded records buffered between the file workers and the consumer.
    pub channel_buffer: usize,
    /// Whether to verify the CRC32C checksums of every record frame.
    pub verify_checksums: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: String::new(),
            datasets: Vec::new(),
            batch_size: 8,
            iterations: 1,
            n_ctx: 1024,
            encoder_path: None,
            boundary_token: END_OF_TEXT,
            seed: None,
            storage: StorageConfig::default(),
            reader: RecordConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::Local,
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
            s3: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            max_retries: 5,
            retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
            force_path_style: false,
            allow_http: false,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            cycle_length: 4,
            channel_buffer: 1024,
            verify_checksums: true,
        }
    }
}

impl S3Config {
    /// Apply environment variable overrides to S3 configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("TPIPE_S3_BUCKET") {
            self.bucket = val;
        }
        if let Ok(val) = std::env::var("TPIPE_S3_REGION") {
            self.region = val;
        }
        if let Ok(val) = std::env::var("TPIPE_S3_ENDPOINT") {
            self.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("TPIPE_S3_ACCESS_KEY_ID") {
            self.access_key_id = Some(val);
        }
        if let Ok(val) = std::env::var("TPIPE_S3_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(val);
        }
        if let Ok(val) = std::env::var("TPIPE_S3_SESSION_TOKEN") {
            self.session_token = Some(val);
        }
        if let Ok(val) = std::env::var("TPIPE_S3_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_S3_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_S3_MAX_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.max_retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_S3_FORCE_PATH_STYLE") {
            if let Ok(v) = val.parse() {
                self.force_path_style = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_S3_ALLOW_HTTP") {
            if let Ok(v) = val.parse() {
                self.allow_http = v;
            }
        }
        self
    }

    /// Validate S3 configuration.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(PipelineError::config("s3.bucket must not be empty"));
        }
        if self.region.is_empty() {
            return Err(PipelineError::config("s3.region must not be empty"));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(PipelineError::config(
                "s3.max_retry_delay_ms must not be less than s3.retry_delay_ms",
            ));
        }
        Ok(())
    }
}

impl FromStr for PipelineConfig {
    type Err = PipelineError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| PipelineError::config_with_source("failed to parse TOML config", e))
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables are prefixed with `TPIPE_` and use underscores
    /// to separate nested fields. For example:
    /// - `TPIPE_DATA_PATH` overrides `data_path`
    /// - `TPIPE_N_CTX` overrides `n_ctx`
    /// - `TPIPE_STORAGE_BACKEND` overrides `storage.backend` ("local" or "s3")
    /// - `TPIPE_READER_CYCLE_LENGTH` overrides `reader.cycle_length`
    /// - `TPIPE_S3_BUCKET` overrides `storage.s3.bucket`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("TPIPE_DATA_PATH") {
            self.data_path = val;
        }
        if let Ok(val) = std::env::var("TPIPE_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.iterations = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_N_CTX") {
            if let Ok(v) = val.parse() {
                self.n_ctx = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_ENCODER_PATH") {
            self.encoder_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("TPIPE_SEED") {
            if let Ok(v) = val.parse() {
                self.seed = Some(v);
            }
        }

        // Storage overrides
        if let Ok(val) = std::env::var("TPIPE_STORAGE_BACKEND") {
            match val.to_lowercase().as_str() {
                "local" => self.storage.backend = StorageBackendType::Local,
                "s3" => self.storage.backend = StorageBackendType::S3,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(val) = std::env::var("TPIPE_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TPIPE_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        // S3 overrides - create S3Config if any S3 env vars are set
        if std::env::var("TPIPE_S3_BUCKET").is_ok() {
            let s3_config = self.storage.s3.take().unwrap_or_default().with_env_overrides();
            self.storage.s3 = Some(s3_config);
        } else if let Some(s3_config) = self.storage.s3.take() {
            self.storage.s3 = Some(s3_config.with_env_overrides());
        }

        // Reader overrides
        if let Ok(val) = std::env::var("TPIPE_READER_CYCLE_LENGTH") {
            if let Ok(v) = val.parse() {
                self.reader.cycle_length = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_READER_CHANNEL_BUFFER") {
            if let Ok(v) = val.parse() {
                self.reader.channel_buffer = v;
            }
        }
        if let Ok(val) = std::env::var("TPIPE_READER_VERIFY_CHECKSUMS") {
            if let Ok(v) = val.parse() {
                self.reader.verify_checksums = v;
            }
        }

        self
    }

    /// Validate all configuration values.
    ///
    /// The stitch/record-length/n_ctx relationship is not checked here; it
    /// depends on the data and surfaces as a window error at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be greater than 0"));
        }
        if self.iterations == 0 {
            return Err(PipelineError::config("iterations must be greater than 0"));
        }
        if self.n_ctx == 0 {
            return Err(PipelineError::config("n_ctx must be greater than 0"));
        }

        for (i, source) in self.datasets.iter().enumerate() {
            if source.stitch == 0 {
                return Err(PipelineError::config(format!(
                    "datasets[{i}].stitch must be greater than 0"
                )));
            }
            if !source.weight.is_finite() || source.weight < 0.0 {
                return Err(PipelineError::config(format!(
                    "datasets[{i}].weight must be a non-negative finite number"
                )));
            }
        }
        if !self.datasets.is_empty() && self.datasets.iter().all(|s| s.weight == 0.0) {
            return Err(PipelineError::config(
                "at least one dataset must have a positive weight",
            ));
        }

        // Storage validation
        if self.storage.buffer_size == 0 {
            return Err(PipelineError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }
        if self.storage.backend == StorageBackendType::S3 {
            match &self.storage.s3 {
                Some(s3_config) => s3_config.validate()?,
                None => {
                    return Err(PipelineError::config(
                        "storage.s3 configuration is required when backend is 's3'",
                    ));
                }
            }
        }

        // Reader validation
        if self.reader.cycle_length == 0 {
            return Err(PipelineError::config(
                "reader.cycle_length must be greater than 0",
            ));
        }
        if self.reader.channel_buffer == 0 {
            return Err(PipelineError::config(
                "reader.channel_buffer must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Number of batches buffered ahead of the consumer.
    pub fn prefetch_depth(&self) -> usize {
        self.iterations * 2
    }

    /// Joins `data_path` and a source glob into a storage pattern.
    pub fn resolve_glob(&self, glob: &str) -> String {
        if self.data_path.is_empty() {
            glob.to_string()
        } else {
            format!("{}/{}", self.data_path.trim_end_matches('/'), glob.trim_start_matches('/'))
        }
    }
}
