// rust/pipeline-core/src/storage/traits.rs

//! Read-side storage interface used by the record reader.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A forward-only byte stream over one stored object.
pub trait StorageReader: Read + Send {}

impl<T: Read + Send> StorageReader for T {}

/// Where record files live.
///
/// Shared across the record reader's worker threads as
/// `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Opens an object for reading. Relative paths resolve against the
    /// backend's base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Expands a glob pattern into the matching object paths, sorted.
    ///
    /// Matches under the base path come back relative to it, so they can be
    /// handed straight to [`open_read`](Self::open_read). A pattern that
    /// matches nothing yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is malformed or the listing fails.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}
