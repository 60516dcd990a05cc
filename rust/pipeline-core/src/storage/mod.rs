// rust/pipeline-core/src/storage/mod.rs

//! Storage abstraction for the input pipeline.
//!
//! Record files are resolved by glob pattern and opened through a
//! [`StorageBackend`], so the same pipeline runs against the local
//! filesystem or (with the `s3` feature) an S3-compatible object store.
//!
//! # Example
//!
//! ```no_run
//! use pipeline_core::config::StorageConfig;
//! use pipeline_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Read;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//!
//! for path in storage.glob("data/train_*.tfrecords").unwrap() {
//!     let mut reader = storage.open_read(&path).unwrap();
//!     let mut bytes = Vec::new();
//!     reader.read_to_end(&mut bytes).unwrap();
//! }
//! ```

use std::sync::Arc;

use crate::config::{StorageBackendType, StorageConfig};
use crate::error::{PipelineError, Result};

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader};

// S3 storage (requires feature flag)
#[cfg(feature = "s3")]
mod retry;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "s3")]
pub use retry::Backoff;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

/// Builds the backend selected by `config.backend`.
///
/// # Errors
///
/// Returns an error if the backend cannot be initialized, or if S3 is
/// requested in a build without the `s3` feature.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend {
        StorageBackendType::Local => Ok(Arc::new(LocalStorage::new(config)?)),
        StorageBackendType::S3 => open_s3(config),
    }
}

#[cfg(feature = "s3")]
fn open_s3(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let s3_config = config.s3.as_ref().ok_or_else(|| {
        PipelineError::config("storage.s3 configuration is required when backend is 's3'")
    })?;
    let prefix = config.base_path.to_string_lossy().to_string();
    let prefix = if prefix == "." { String::new() } else { prefix };
    Ok(Arc::new(S3Storage::new(s3_config, prefix)?))
}

#[cfg(not(feature = "s3"))]
fn open_s3(_config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(PipelineError::config(
        "storage backend 's3' requires building with the 's3' feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        };

        std::fs::write(temp_dir.path().join("a.tfrecords"), b"x").unwrap();

        let storage = open_storage(&config).unwrap();
        assert_eq!(
            storage.glob("*.tfrecords").unwrap(),
            vec![std::path::PathBuf::from("a.tfrecords")]
        );
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_requires_feature() {
        let config = StorageConfig {
            backend: StorageBackendType::S3,
            ..Default::default()
        };

        let err = open_storage(&config).err().unwrap();
        assert!(err.to_string().contains("'s3' feature"));
    }
}
