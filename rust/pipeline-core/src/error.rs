// rust/pipeline-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Decode error in '{path}': {message}")]
    Decode {
        path: PathBuf,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shape error: expected {expected} tokens, got {actual} ({context})")]
    Shape {
        expected: usize,
        actual: usize,
        context: String,
    },

    #[error("Cannot extract a {n_ctx}-token window from a {len}-token sequence")]
    Window {
        n_ctx: usize,
        len: usize,
    },

    #[error("Dataset '{name}' error: {message}")]
    Dataset {
        name: String,
        message: String,
    },

    #[error("Tokenizer error: {message}")]
    Tokenizer {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// Convenience constructors
impl PipelineError {

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn shape(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        Self::Shape {
            expected,
            actual,
            context: context.into(),
        }
    }

    pub fn window(n_ctx: usize, len: usize) -> Self {
        Self::Window { n_ctx, len }
    }

    pub fn dataset(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dataset {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn tokenizer(message: impl Into<String>) -> Self {
        Self::Tokenizer {
            message: message.into(),
        }
    }

    /// Attaches a file path to a decode error raised without one.
    pub(crate) fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Decode { path: p, message } if p.as_os_str().is_empty() => Self::Decode {
                path: path.into(),
                message,
            },
            other => other,
        }
    }
}
