// rust/pipeline-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Record files are read either through a buffered reader or, above a size
//! threshold, straight out of a memory map.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{StorageBackend, StorageReader};
use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path that relative paths and patterns are resolved against.
    base_path: PathBuf,
    buffer_size: usize,
    use_mmap: bool,
    /// File size at or above which files are memory-mapped.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path does not exist or is not a directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.is_dir() {
            return Err(PipelineError::storage(
                &base_path,
                "base path does not exist or is not a directory",
            ));
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Inverse of `resolve_path` for paths under the base path.
    fn relative_path(&self, path: PathBuf) -> PathBuf {
        match path.strip_prefix(&self.base_path) {
            Ok(rest) => rest.to_path_buf(),
            Err(_) => path,
        }
    }
}

impl StorageBackend for LocalStorage {
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| PipelineError::storage_with_source(&full_path, "failed to open file", e))?;

        let size = file
            .metadata()
            .map_err(|e| {
                PipelineError::storage_with_source(&full_path, "failed to read file metadata", e)
            })?
            .len();

        // Empty files cannot be mapped
        if self.use_mmap && size > 0 && size >= self.mmap_threshold {
            // SAFETY: the file is opened read-only and the map is owned by
            // the returned reader.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                PipelineError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;
            Ok(Box::new(Cursor::new(mmap)))
        } else {
            Ok(Box::new(BufReader::with_capacity(self.buffer_size, file)))
        }
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let full_pattern = self.resolve_path(Path::new(pattern));
        let pattern_str = full_pattern.to_string_lossy();

        let entries = glob::glob(&pattern_str).map_err(|e| {
            PipelineError::config_with_source(format!("invalid glob pattern '{pattern}'"), e)
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                PipelineError::storage_with_source(path, "failed to read glob entry", e.into_error())
            })?;
            if path.is_file() {
                paths.push(self.relative_path(path));
            }
        }

        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn storage_at(base_path: &Path) -> LocalStorage {
        let config = StorageConfig {
            base_path: base_path.to_path_buf(),
            buffer_size: 4096,
            use_mmap: true,
            mmap_threshold: 1024,
            ..Default::default()
        };
        LocalStorage::new(&config).unwrap()
    }

    fn write_file(base: &Path, name: &str, data: &[u8]) {
        let path = base.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    fn read_all(storage: &LocalStorage, path: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        storage.open_read(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_new_requires_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().join("missing"),
            ..Default::default()
        };

        assert!(LocalStorage::new(&config).is_err());
    }

    #[test]
    fn test_buffered_and_mapped_reads() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage_at(temp_dir.path());
        let large: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
        write_file(temp_dir.path(), "small.bin", b"hello world");
        write_file(temp_dir.path(), "large.bin", &large);

        assert_eq!(read_all(&storage, Path::new("small.bin")), b"hello world");
        assert_eq!(read_all(&storage, Path::new("large.bin")), large);
    }

    #[test]
    fn test_read_empty_file_with_zero_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            mmap_threshold: 0,
            ..Default::default()
        };
        let storage = LocalStorage::new(&config).unwrap();
        fs::write(temp_dir.path().join("empty.bin"), b"").unwrap();

        assert!(read_all(&storage, Path::new("empty.bin")).is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage_at(temp_dir.path());

        let err = storage.open_read(Path::new("nope.tfrecords")).err().unwrap();
        assert!(matches!(err, PipelineError::Storage { .. }));
    }

    #[test]
    fn test_glob_sorted_relative_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage_at(temp_dir.path());
        write_file(temp_dir.path(), "data/train_2.tfrecords", b"2");
        write_file(temp_dir.path(), "data/train_0.tfrecords", b"0");
        write_file(temp_dir.path(), "data/train_1.tfrecords", b"1");
        write_file(temp_dir.path(), "data/eval_0.tfrecords", b"e");
        fs::create_dir_all(temp_dir.path().join("data/train_dir.tfrecords")).unwrap();

        let paths = storage.glob("data/train_*.tfrecords").unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("data/train_0.tfrecords"),
                PathBuf::from("data/train_1.tfrecords"),
                PathBuf::from("data/train_2.tfrecords"),
            ]
        );
        assert_eq!(read_all(&storage, &paths[1]), b"1");
    }

    #[test]
    fn test_glob_with_relative_base_path() {
        let cwd = std::env::current_dir().unwrap();
        let temp_dir = TempDir::new_in(&cwd).unwrap();
        let base = temp_dir.path().strip_prefix(&cwd).unwrap().join("datasets");
        assert!(base.is_relative());
        write_file(&base, "a.tfrecords", b"abc");

        let storage = storage_at(&base);
        let paths = storage.glob("*.tfrecords").unwrap();

        assert_eq!(paths, vec![PathBuf::from("a.tfrecords")]);
        assert_eq!(read_all(&storage, &paths[0]), b"abc");
    }

    #[test]
    fn test_glob_absolute_pattern_outside_base() {
        let base_dir = TempDir::new().unwrap();
        let other_dir = TempDir::new().unwrap();
        write_file(other_dir.path(), "x.tfrecords", b"x");

        let storage = storage_at(base_dir.path());
        let pattern = other_dir.path().join("*.tfrecords");
        let paths = storage.glob(&pattern.to_string_lossy()).unwrap();

        assert_eq!(paths, vec![other_dir.path().join("x.tfrecords")]);
        assert_eq!(read_all(&storage, &paths[0]), b"x");
    }

    #[test]
    fn test_glob_no_match() {
        let temp_dir = TempDir::new().unwrap();
        assert!(storage_at(temp_dir.path()).glob("nothing_*.tfrecords").unwrap().is_empty());
    }

    #[test]
    fn test_glob_invalid_pattern() {
        let temp_dir = TempDir::new().unwrap();
        assert!(storage_at(temp_dir.path()).glob("data/[").is_err());
    }
}
