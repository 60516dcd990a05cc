// rust/pipeline-core/src/storage/s3.rs

//! S3-compatible storage backend using the object_store crate.
//!
//! Record files are fetched whole and served from memory. Every request goes
//! through the retry policy, so transient network failures never reach the
//! pipeline. The async client is driven by a small runtime owned by the
//! backend, which lets the record reader's worker threads use the same
//! synchronous [`StorageBackend`] interface as for local files.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::ObjectStore;

use super::retry::{with_backoff, Attempt, Backoff};
use super::traits::{StorageBackend, StorageReader};
use crate::config::S3Config;
use crate::error::{PipelineError, Result};

/// S3-compatible storage backend.
pub struct S3Storage {
    /// The underlying object store client.
    store: Arc<AmazonS3>,
    /// Base prefix for all keys.
    base_prefix: String,
    backoff: Backoff,
    /// Runtime driving the async client.
    runtime: tokio::runtime::Runtime,
}

impl S3Storage {
    /// Creates a new S3Storage from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client or its runtime cannot be built.
    pub fn new(config: &S3Config, base_prefix: impl Into<String>) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Set endpoint if provided (for MinIO, LocalStack, etc.)
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        // Set credentials if provided
        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        if config.force_path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            PipelineError::config_with_source("failed to build S3 client", e)
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tpipe-s3")
            .enable_all()
            .build()
            .map_err(|e| PipelineError::config_with_source("failed to start S3 runtime", e))?;

        Ok(Self {
            store: Arc::new(store),
            base_prefix: base_prefix.into(),
            backoff: Backoff::from(config),
            runtime,
        })
    }

    /// Resolves a path to an object_store path with the base prefix.
    fn resolve_path(&self, path: &Path) -> object_store::path::Path {
        object_store::path::Path::from(self.resolve_key(&path.to_string_lossy()))
    }

    fn resolve_key(&self, key: &str) -> String {
        if self.base_prefix.is_empty() {
            key.trim_start_matches('/').to_string()
        } else {
            format!(
                "{}/{}",
                self.base_prefix.trim_end_matches('/'),
                key.trim_start_matches('/')
            )
        }
    }

    /// Strips the base prefix from a listed key.
    fn relative_key(&self, key: &str) -> PathBuf {
        let prefix = self.base_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return PathBuf::from(key);
        }
        match key.strip_prefix(prefix) {
            Some(rest) => PathBuf::from(rest.trim_start_matches('/')),
            None => PathBuf::from(key),
        }
    }

    /// Converts an object_store error to a PipelineError.
    fn convert_error(path: &Path, message: &str, error: object_store::Error) -> PipelineError {
        PipelineError::storage(path, format!("{}: {}", message, error))
    }

    /// Errors worth another attempt.
    fn is_transient(error: &object_store::Error) -> bool {
        matches!(error, object_store::Error::Generic { .. })
            || error.to_string().contains("timeout")
            || error.to_string().contains("connection")
            || error.to_string().contains("503")
            || error.to_string().contains("500")
    }
}

impl StorageBackend for S3Storage {
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let object_path = self.resolve_path(path);

        let data = self
            .runtime
            .block_on(with_backoff(&self.backoff, || {
                let store = self.store.clone();
                let obj_path = object_path.clone();
                async move {
                    match store.get(&obj_path).await {
                        Ok(result) => match result.bytes().await {
                            Ok(bytes) => Attempt::Done(bytes),
                            Err(e) if Self::is_transient(&e) => Attempt::Transient(e),
                            Err(e) => Attempt::Fatal(e),
                        },
                        Err(e) if Self::is_transient(&e) => Attempt::Transient(e),
                        Err(e) => Attempt::Fatal(e),
                    }
                }
            }))
            .map_err(|e| Self::convert_error(path, "failed to read object", e))?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "fetched object");
        Ok(Box::new(Cursor::new(data)))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let full_pattern = self.resolve_key(pattern);
        let matcher = glob::Pattern::new(&full_pattern).map_err(|e| {
            PipelineError::config_with_source(format!("invalid glob pattern '{pattern}'"), e)
        })?;

        let list_prefix = literal_prefix(&full_pattern);
        let prefix_path = object_store::path::Path::from(list_prefix.as_str());

        let entries = self
            .runtime
            .block_on(with_backoff(&self.backoff, || {
                let store = self.store.clone();
                let prefix = prefix_path.clone();
                async move {
                    let stream = store.list(Some(&prefix));
                    match stream.try_collect::<Vec<_>>().await {
                        Ok(entries) => Attempt::Done(entries),
                        Err(e) if Self::is_transient(&e) => Attempt::Transient(e),
                        Err(e) => Attempt::Fatal(e),
                    }
                }
            }))
            .map_err(|e| Self::convert_error(Path::new(pattern), "failed to list objects", e))?;

        let mut paths: Vec<PathBuf> = entries
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| matcher.matches(key))
            .map(|key| self.relative_key(&key))
            .collect();

        paths.sort();
        Ok(paths)
    }

}

/// Returns the directory part of `pattern` that precedes its first wildcard.
fn literal_prefix(pattern: &str) -> String {
    let wildcard = pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len());
    let literal = &pattern[..wildcard];
    match literal.rfind('/') {
        Some(idx) => literal[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage(prefix: &str) -> S3Storage {
        let config = S3Config {
            bucket: "test-bucket".to_string(),
            allow_http: true,
            ..Default::default()
        };
        S3Storage::new(&config, prefix).unwrap()
    }

    #[test]
    fn test_resolve_path() {
        let storage = test_storage("prefix");

        let resolved = storage.resolve_path(Path::new("file.tfrecords"));
        assert_eq!(resolved.to_string(), "prefix/file.tfrecords");

        let resolved = storage.resolve_path(Path::new("/file.tfrecords"));
        assert_eq!(resolved.to_string(), "prefix/file.tfrecords");
    }

    #[test]
    fn test_resolve_path_empty_prefix() {
        let storage = test_storage("");

        let resolved = storage.resolve_path(Path::new("file.tfrecords"));
        assert_eq!(resolved.to_string(), "file.tfrecords");
    }

    #[test]
    fn test_relative_key() {
        let storage = test_storage("prefix/");
        assert_eq!(
            storage.relative_key("prefix/owt/train_0.tfrecords"),
            PathBuf::from("owt/train_0.tfrecords")
        );
        assert_eq!(storage.relative_key("other/x"), PathBuf::from("other/x"));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("data/owt/train_*.tfrecords"), "data/owt");
        assert_eq!(literal_prefix("data/*/train_0.tfrecords"), "data");
        assert_eq!(literal_prefix("train_?.tfrecords"), "");
        assert_eq!(literal_prefix("data/train_0.tfrecords"), "data");
    }

    // Note: Full integration tests require a running S3-compatible server (MinIO)
    // and should be marked with #[ignore] to skip in regular test runs.
}
