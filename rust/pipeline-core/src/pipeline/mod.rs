// rust/pipeline-core/src/pipeline/mod.rs

//! The training and evaluation input pipeline.
//!
//! Stages, per source:
//!
//! ```text
//! files -> RecordReader -> Shuffled -> Stitcher -> Windower --+
//!                       (chunk: records used as-is) ----------+-> Mixer -> Batcher -> Prefetcher
//! ```
//!
//! Every stage is a fallible iterator. Errors are fatal: the first one is
//! passed downstream and ends the stream.
//!
//! # Example
//!
//! ```no_run
//! use pipeline_core::config::{PipelineConfig, Split};
//! use pipeline_core::pipeline::InputPipeline;
//! use pipeline_core::storage::open_storage;
//!
//! let config = PipelineConfig::from_file("pipeline.toml").unwrap();
//! let storage = open_storage(&config.storage).unwrap();
//!
//! for batch in InputPipeline::generic_text(storage, &config, Split::Train).unwrap().take(10) {
//!     let batch = batch.unwrap();
//!     println!("{:?}", batch.shape());
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{PipelineConfig, SourceConfig, Split};
use crate::error::{PipelineError, Result};
use crate::storage::StorageBackend;

mod batch;
mod mixer;
mod prefetch;
mod shuffle;
mod source;
mod stitch;
mod types;
mod window;

pub use batch::{assemble_batch, Batcher};
pub use mixer::{Mixer, WeightedSampler};
pub use prefetch::Prefetcher;
pub use shuffle::{ShuffleBuffer, Shuffled};
pub use source::SourcePipeline;
pub use stitch::{stitch_group, Stitcher};
pub use types::{Batch, Element, FixedSeq, TokenMatrix, WindowPair};
pub use window::{extract_window, OffsetSampler, RngOffsetSampler, WindowPolicy, Windower};

/// A boxed stream of source elements.
pub type ElementStream = Box<dyn Iterator<Item = Result<Element>> + Send>;

pub(crate) const SHUFFLE_STAGE: u64 = 1;
pub(crate) const WINDOW_STAGE: u64 = 2;
pub(crate) const MIXER_STAGE: u64 = 3;

/// RNG for one stage of the pipeline.
///
/// With a seed, each `(stage, stream)` pair gets its own reproducible
/// sequence. Without one, the RNG is seeded from entropy.
pub(crate) fn stage_rng(seed: Option<u64>, stage: u64, stream: u64) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed ^ stage.wrapping_mul(0x9e37_79b9_7f4a_7c15));
            rng.set_stream(stream);
            rng
        }
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Endless stream of prefetched batches.
pub struct InputPipeline {
    batches: Prefetcher<Batch>,
}

impl InputPipeline {
    /// Builds the mixed pipeline over every configured source for `split`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or if any source
    /// glob matches no files.
    pub fn generic_text(
        storage: Arc<dyn StorageBackend>,
        config: &PipelineConfig,
        split: Split,
    ) -> Result<Self> {
        config.validate()?;
        if config.datasets.is_empty() {
            return Err(PipelineError::config("no datasets configured"));
        }

        let mut streams: Vec<ElementStream> = Vec::with_capacity(config.datasets.len());
        let mut weights = Vec::with_capacity(config.datasets.len());
        for (index, source) in config.datasets.iter().enumerate() {
            let pipeline = SourcePipeline::open(storage.clone(), config, source, split, index)?;
            streams.push(Box::new(pipeline));
            weights.push(source.weight);
        }

        let mixer = Mixer::new(streams, &weights, stage_rng(config.seed, MIXER_STAGE, 0))?;

        tracing::info!(
            sources = config.datasets.len(),
            split = ?split,
            batch_size = config.batch_size,
            n_ctx = config.n_ctx,
            prefetch = config.prefetch_depth(),
            "built input pipeline"
        );

        Self::batched(mixer, config)
    }

    /// Builds a batched pipeline over one source and an explicit file list.
    pub fn text_dataset(
        storage: Arc<dyn StorageBackend>,
        files: Vec<PathBuf>,
        config: &PipelineConfig,
        source: &SourceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = SourcePipeline::new(storage, files, config, source, 0)?;

        tracing::info!(
            source = %pipeline.name(),
            files = pipeline.files().len(),
            batch_size = config.batch_size,
            "built single-source pipeline"
        );

        Self::batched(pipeline, config)
    }

    fn batched<I>(elements: I, config: &PipelineConfig) -> Result<Self>
    where
        I: Iterator<Item = Result<Element>> + Send + 'static,
    {
        let batcher = Batcher::new(elements, config.batch_size);
        Ok(Self {
            batches: Prefetcher::new(batcher, config.prefetch_depth())?,
        })
    }

    /// Returns the next batch.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        self.batches.next_item()
    }
}

impl Iterator for InputPipeline {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches.next()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs::File;
    use std::path::Path;

    use crate::record::{encode_record, RawRecord, TfRecordWriter};
    use crate::Token;

    /// Writes `records` as a record file `name` under `dir`.
    pub fn write_record_file(dir: &Path, name: &str, records: &[Vec<Token>]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut writer = TfRecordWriter::new(File::create(&path).unwrap());
        for tokens in records {
            let record = RawRecord::new(tokens.clone()).with_hash(format!("{:x}", tokens.len()));
            writer.write_record(&encode_record(&record)).unwrap();
        }
        writer.finish().unwrap();
    }
}
