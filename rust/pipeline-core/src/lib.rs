// rust/pipeline-core/src/lib.rs

//! Token Pipeline - Core Library
//!
//! This crate provides the input pipeline for training and evaluating a
//! language model: reading sharded record files, stitching and windowing
//! token sequences, mixing weighted sources, batching and prefetching, plus
//! the single-batch input used for interactive inference.

pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod record;
pub mod storage;

/// A vocabulary token id.
pub type Token = u32;

/// Boundary token placed between stitched records.
pub const END_OF_TEXT: Token = 50256;

// Re-export commonly used types for convenience
pub use config::{Datatype, PipelineConfig, SourceConfig, Split};
pub use error::{PipelineError, Result};
pub use inference::{prediction_input, BpeEncoder, PredictionInput, TextEncoder, MAX_PROMPT_TOKENS};
pub use pipeline::{Batch, Element, FixedSeq, InputPipeline, TokenMatrix, WindowPair};
pub use record::{RawRecord, RecordReader};
pub use storage::{open_storage, LocalStorage, StorageBackend, StorageReader};
