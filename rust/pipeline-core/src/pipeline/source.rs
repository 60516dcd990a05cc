// rust/pipeline-core/src/pipeline/source.rs

//! The per-source stream: read, shuffle, stitch and window, repeated forever.

use std::path::PathBuf;
use std::sync::Arc;

use super::shuffle::Shuffled;
use super::stitch::Stitcher;
use super::types::{Element, FixedSeq};
use super::window::{RngOffsetSampler, WindowPolicy, Windower};
use super::{stage_rng, ElementStream, SHUFFLE_STAGE, WINDOW_STAGE};
use crate::config::{PipelineConfig, RecordConfig, SourceConfig, Split};
use crate::error::{PipelineError, Result};
use crate::record::RecordReader;
use crate::storage::StorageBackend;
use crate::Token;

/// Endless stream of elements from one source.
///
/// Each pass re-reads every file. Sampling datatypes are reshuffled on every
/// pass; with a configured seed the order of each pass is reproducible for a
/// single-file source.
pub struct SourcePipeline {
    name: String,
    storage: Arc<dyn StorageBackend>,
    files: Vec<PathBuf>,
    source: SourceConfig,
    n_ctx: usize,
    boundary: Token,
    reader_config: RecordConfig,
    seed: Option<u64>,
    index: u64,
    pass: u64,
    yielded_this_pass: u64,
    current: Option<ElementStream>,
    failed: bool,
}

impl SourcePipeline {
    /// Builds the stream over an explicit file list.
    ///
    /// `index` identifies the source among its siblings and decorrelates
    /// their random streams.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        files: Vec<PathBuf>,
        config: &PipelineConfig,
        source: &SourceConfig,
        index: usize,
    ) -> Result<Self> {
        let name = source.train_glob.clone();
        if files.is_empty() {
            return Err(PipelineError::dataset(name, "no record files to read"));
        }

        Ok(Self {
            name,
            storage,
            files,
            source: source.clone(),
            n_ctx: config.n_ctx,
            boundary: config.boundary_token,
            reader_config: config.reader.clone(),
            seed: config.seed,
            index: index as u64,
            pass: 0,
            yielded_this_pass: 0,
            current: None,
            failed: false,
        })
    }

    /// Resolves the source's glob for `split` and builds the stream.
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        config: &PipelineConfig,
        source: &SourceConfig,
        split: Split,
        index: usize,
    ) -> Result<Self> {
        let pattern = config.resolve_glob(source.glob(split));
        let files = storage.glob(&pattern)?;
        if files.is_empty() {
            tracing::warn!(pattern = %pattern, "glob matched no record files");
            return Err(PipelineError::dataset(
                source.glob(split),
                format!("glob '{pattern}' matched no files"),
            ));
        }

        tracing::info!(
            pattern = %pattern,
            files = files.len(),
            datatype = %source.datatype,
            stitch = source.stitch,
            weight = source.weight,
            "opened source"
        );

        let mut pipeline = Self::new(storage, files, config, source, index)?;
        pipeline.name = source.glob(split).to_string();
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of completed passes over the files.
    pub fn passes(&self) -> u64 {
        self.pass
    }

    fn open_pass(&self) -> Result<ElementStream> {
        let reader = RecordReader::new(
            self.storage.clone(),
            self.files.clone(),
            self.source.datatype,
            &self.reader_config,
        )?;
        let stream_id = (self.index << 32) | (self.pass & 0xffff_ffff);

        let stream: ElementStream = match WindowPolicy::for_datatype(self.source.datatype) {
            Some(policy) => {
                let shuffled = Shuffled::new(
                    reader,
                    self.source.shuffle_capacity(),
                    stage_rng(self.seed, SHUFFLE_STAGE, stream_id),
                );
                let stitched = Stitcher::new(shuffled, self.source.stitch, self.boundary);
                let sampler = RngOffsetSampler::new(stage_rng(self.seed, WINDOW_STAGE, stream_id));
                Box::new(Windower::new(stitched, self.n_ctx, policy, Box::new(sampler)))
            }
            None => {
                let n_ctx = self.n_ctx;
                Box::new(reader.map(move |record| {
                    record
                        .and_then(|record| FixedSeq::new(record.tokens, n_ctx))
                        .map(Element::Sequence)
                }))
            }
        };
        Ok(stream)
    }
}

impl Iterator for SourcePipeline {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if self.current.is_none() {
                match self.open_pass() {
                    Ok(stream) => self.current = Some(stream),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }

            let next = self.current.as_mut().and_then(Iterator::next);
            match next {
                Some(Ok(element)) => {
                    self.yielded_this_pass += 1;
                    return Some(Ok(element));
                }
                Some(Err(e)) => {
                    self.failed = true;
                    self.current = None;
                    return Some(Err(e));
                }
                None => {
                    self.current = None;
                    if self.yielded_this_pass == 0 {
                        self.failed = true;
                        return Some(Err(PipelineError::dataset(
                            self.name.clone(),
                            "a full pass over the files produced no elements",
                        )));
                    }
                    tracing::debug!(
                        source = %self.name,
                        pass = self.pass,
                        elements = self.yielded_this_pass,
                        "finished pass"
                    );
                    self.pass += 1;
                    self.yielded_this_pass = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Datatype, StorageConfig};
    use crate::pipeline::testutil::write_record_file;
    use crate::storage::LocalStorage;
    use std::path::Path;
    use tempfile::TempDir;

    fn storage(dir: &Path) -> Arc<dyn StorageBackend> {
        let config = StorageConfig {
            base_path: dir.to_path_buf(),
            ..Default::default()
        };
        Arc::new(LocalStorage::new(&config).unwrap())
    }

    fn source(glob: &str, stitch: usize, datatype: Datatype) -> SourceConfig {
        SourceConfig {
            train_glob: glob.to_string(),
            eval_glob: glob.to_string(),
            stitch,
            datatype,
            weight: 1.0,
        }
    }

    fn config(n_ctx: usize) -> PipelineConfig {
        PipelineConfig {
            n_ctx,
            seed: Some(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_source_repeats() {
        let temp_dir = TempDir::new().unwrap();
        write_record_file(temp_dir.path(), "c.tfrecords", &[vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);

        let src = source("c.tfrecords", 1, Datatype::Chunk);
        let mut pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(4), &src, Split::Train, 0).unwrap();

        let elements: Vec<_> = (&mut pipeline).take(6).map(|r| r.unwrap()).collect();
        let firsts: Vec<Token> = elements
            .iter()
            .map(|e| match e {
                Element::Sequence(seq) => seq.as_slice()[0],
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(firsts, vec![1, 5, 1, 5, 1, 5]);
        assert_eq!(pipeline.passes(), 2);
    }

    #[test]
    fn test_chunk_length_mismatch_is_shape_error() {
        let temp_dir = TempDir::new().unwrap();
        write_record_file(temp_dir.path(), "c.tfrecords", &[vec![1, 2, 3]]);

        let src = source("c.tfrecords", 1, Datatype::Chunk);
        let mut pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(4), &src, Split::Train, 0).unwrap();

        assert!(matches!(pipeline.next(), Some(Err(PipelineError::Shape { .. }))));
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_sample_source_stitches_and_windows() {
        let temp_dir = TempDir::new().unwrap();
        let records: Vec<Vec<Token>> = (0..20u32).map(|i| vec![i * 10; 5]).collect();
        write_record_file(temp_dir.path(), "s.tfrecords", &records);

        // Two stitched records give 5 + 1 + 5 = 11 tokens, enough for n_ctx 8
        let src = source("s.tfrecords", 2, Datatype::Sample);
        let pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(8), &src, Split::Train, 0).unwrap();

        for element in pipeline.take(25) {
            match element.unwrap() {
                Element::Pair(pair) => {
                    assert_eq!(pair.input.len(), 8);
                    assert_eq!(pair.input.as_slice()[5], crate::END_OF_TEXT);
                    assert_eq!(pair.target.as_slice()[4], crate::END_OF_TEXT);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_undersized_stitch_is_window_error() {
        let temp_dir = TempDir::new().unwrap();
        write_record_file(temp_dir.path(), "s.tfrecords", &[vec![1, 2], vec![3, 4]]);

        let src = source("s.tfrecords", 1, Datatype::RandomSample);
        let mut pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(8), &src, Split::Train, 0).unwrap();

        assert!(matches!(pipeline.next(), Some(Err(PipelineError::Window { .. }))));
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_pass_without_elements_is_dataset_error() {
        let temp_dir = TempDir::new().unwrap();
        // One record cannot fill a group of three
        write_record_file(temp_dir.path(), "s.tfrecords", &[vec![1, 2, 3]]);

        let src = source("s.tfrecords", 3, Datatype::Sample);
        let mut pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(2), &src, Split::Train, 0).unwrap();

        assert!(matches!(pipeline.next(), Some(Err(PipelineError::Dataset { .. }))));
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_empty_glob_is_dataset_error() {
        let temp_dir = TempDir::new().unwrap();
        let src = source("missing_*.tfrecords", 1, Datatype::Chunk);

        let err = SourcePipeline::open(storage(temp_dir.path()), &config(4), &src, Split::Eval, 0)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Dataset { .. }));
        assert!(err.to_string().contains("matched no files"));
    }

    #[test]
    fn test_relative_base_path() {
        let cwd = std::env::current_dir().unwrap();
        let temp_dir = TempDir::new_in(&cwd).unwrap();
        let base = temp_dir.path().strip_prefix(&cwd).unwrap().join("datasets");
        write_record_file(&base, "owt/train_0.tfrecords", &[vec![4, 5, 6]]);

        let src = source("owt/train_*.tfrecords", 1, Datatype::Chunk);
        let mut pipeline =
            SourcePipeline::open(storage(&base), &config(3), &src, Split::Train, 0).unwrap();

        assert_eq!(pipeline.files(), &[PathBuf::from("owt/train_0.tfrecords")]);
        match pipeline.next().unwrap().unwrap() {
            Element::Sequence(seq) => assert_eq!(seq.as_slice(), &[4, 5, 6]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_split_selects_glob() {
        let temp_dir = TempDir::new().unwrap();
        write_record_file(temp_dir.path(), "train.tfrecords", &[vec![1, 1]]);
        write_record_file(temp_dir.path(), "eval.tfrecords", &[vec![2, 2]]);

        let src = SourceConfig {
            train_glob: "train.tfrecords".to_string(),
            eval_glob: "eval.tfrecords".to_string(),
            ..source("", 1, Datatype::Chunk)
        };
        let mut pipeline =
            SourcePipeline::open(storage(temp_dir.path()), &config(2), &src, Split::Eval, 0).unwrap();

        assert_eq!(pipeline.name(), "eval.tfrecords");
        assert_eq!(pipeline.files().len(), 1);
        match pipeline.next().unwrap().unwrap() {
            Element::Sequence(seq) => assert_eq!(seq.as_slice(), &[2, 2]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
