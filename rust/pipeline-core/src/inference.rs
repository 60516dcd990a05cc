// rust/pipeline-core/src/inference.rs

//! Input for interactive text continuation.
//!
//! A prompt is encoded, cut to [`MAX_PROMPT_TOKENS`], and repeated once per
//! batch row so the model sees a full batch of identical prompts.

use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::pipeline::TokenMatrix;
use crate::Token;

/// Longest prompt passed to the model; longer encodings are truncated.
pub const MAX_PROMPT_TOKENS: usize = 1024;

/// Turns text into token ids.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<Token>>;
}

/// Byte-level BPE encoder backed by a HuggingFace `tokenizer.json`.
pub struct BpeEncoder {
    inner: tokenizers::Tokenizer,
}

impl BpeEncoder {
    /// Loads a tokenizer from a `tokenizer.json` file, or from a directory
    /// containing one.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join("tokenizer.json")
        } else {
            path.to_path_buf()
        };
        if !file.exists() {
            return Err(PipelineError::tokenizer(format!(
                "tokenizer file not found: {}",
                file.display()
            )));
        }

        let inner = tokenizers::Tokenizer::from_file(&file).map_err(|e| {
            PipelineError::tokenizer(format!("failed to load {}: {e}", file.display()))
        })?;
        tracing::debug!(path = %file.display(), "loaded tokenizer");
        Ok(Self { inner })
    }
}

impl TextEncoder for BpeEncoder {
    fn encode(&self, text: &str) -> Result<Vec<Token>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| PipelineError::tokenizer(format!("encode failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Encodes `text` and broadcasts it to a `[batch_size, len]` matrix.
///
/// Encodings longer than [`MAX_PROMPT_TOKENS`] are truncated without
/// warning.
///
/// # Errors
///
/// Returns a `Tokenizer` error if the prompt encodes to zero tokens or the
/// encoder fails, and a `Config` error if `batch_size` is 0.
pub fn prediction_input(
    encoder: &dyn TextEncoder,
    text: &str,
    batch_size: usize,
) -> Result<TokenMatrix> {
    if batch_size == 0 {
        return Err(PipelineError::config("batch_size must be greater than 0"));
    }

    let mut tokens = encoder.encode(text)?;
    if tokens.is_empty() {
        return Err(PipelineError::tokenizer("prompt encodes to zero tokens"));
    }
    tokens.truncate(MAX_PROMPT_TOKENS);

    Ok(TokenMatrix::broadcast(&tokens, batch_size))
}

/// Yields the prompt batch exactly once.
pub struct PredictionInput {
    batch: Option<TokenMatrix>,
}

impl PredictionInput {
    pub fn new(encoder: &dyn TextEncoder, text: &str, batch_size: usize) -> Result<Self> {
        Ok(Self {
            batch: Some(prediction_input(encoder, text, batch_size)?),
        })
    }
}

impl Iterator for PredictionInput {
    type Item = TokenMatrix;

    fn next(&mut self) -> Option<Self::Item> {
        self.batch.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per byte.
    struct ByteEncoder;

    impl TextEncoder for ByteEncoder {
        fn encode(&self, text: &str) -> Result<Vec<Token>> {
            Ok(text.bytes().map(Token::from).collect())
        }
    }

    #[test]
    fn test_short_prompt_broadcast() {
        let text = "a".repeat(500);
        let matrix = prediction_input(&ByteEncoder, &text, 8).unwrap();

        assert_eq!(matrix.shape(), (8, 500));
        let first = matrix.row(0).unwrap().to_vec();
        assert!(matrix.iter_rows().all(|row| row == first.as_slice()));
    }

    #[test]
    fn test_long_prompt_truncated() {
        let text: String = (0..3000).map(|i| if i % 2 == 0 { 'x' } else { 'y' }).collect();
        let matrix = prediction_input(&ByteEncoder, &text, 2).unwrap();

        assert_eq!(matrix.shape(), (2, MAX_PROMPT_TOKENS));
        assert_eq!(matrix.row(1).unwrap()[..2], [u32::from(b'x'), u32::from(b'y')]);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let err = prediction_input(&ByteEncoder, "", 4).unwrap_err();
        assert!(matches!(err, PipelineError::Tokenizer { .. }));
    }

    #[test]
    fn test_zero_batch_rejected() {
        assert!(prediction_input(&ByteEncoder, "hi", 0).is_err());
    }

    #[test]
    fn test_prediction_input_is_single_shot() {
        let mut input = PredictionInput::new(&ByteEncoder, "hello", 3).unwrap();

        let batch = input.next().unwrap();
        assert_eq!(batch.shape(), (3, 5));
        assert!(input.next().is_none());
    }

    #[test]
    fn test_missing_tokenizer_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = BpeEncoder::from_path(temp_dir.path()).err().unwrap();
        assert!(err.to_string().contains("tokenizer file not found"));
    }

    #[test]
    fn test_invalid_tokenizer_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("tokenizer.json");
        std::fs::write(&path, "not json").unwrap();

        let err = BpeEncoder::from_path(&path).err().unwrap();
        assert!(matches!(err, PipelineError::Tokenizer { .. }));
    }
}
