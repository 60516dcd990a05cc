// rust/pipeline-core/src/pipeline/types.rs

//! Core data types flowing through the pipeline stages.

use crate::error::{PipelineError, Result};
use crate::Token;

/// A token sequence whose length was checked at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSeq {
    tokens: Vec<Token>,
}

impl FixedSeq {
    /// Wraps `tokens`, failing unless exactly `len` tokens are given.
    pub fn new(tokens: Vec<Token>, len: usize) -> Result<Self> {
        if tokens.len() != len {
            return Err(PipelineError::shape(len, tokens.len(), "fixed-length sequence"));
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_slice(&self) -> &[Token] {
        &self.tokens
    }

    pub fn into_inner(self) -> Vec<Token> {
        self.tokens
    }
}

/// An `(input, target)` training pair; `target` is `input` shifted by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPair {
    pub input: FixedSeq,
    pub target: FixedSeq,
}

/// One element of a source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Produced by sampling datatypes.
    Pair(WindowPair),
    /// Produced by chunk datatypes.
    Sequence(FixedSeq),
}

impl Element {
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Pair(_) => "pair",
            Element::Sequence(_) => "sequence",
        }
    }

    /// Row length of the element.
    pub fn width(&self) -> usize {
        match self {
            Element::Pair(pair) => pair.input.len(),
            Element::Sequence(seq) => seq.len(),
        }
    }
}

/// Row-major 2-D token tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Token>,
}

impl TokenMatrix {
    /// Stacks rows of equal length.
    pub fn from_rows<'a, I>(rows: I, cols: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [Token]>,
    {
        let mut data = Vec::new();
        let mut count = 0;
        for row in rows {
            if row.len() != cols {
                return Err(PipelineError::shape(
                    cols,
                    row.len(),
                    format!("row {count} of token matrix"),
                ));
            }
            data.extend_from_slice(row);
            count += 1;
        }
        Ok(Self {
            rows: count,
            cols,
            data,
        })
    }

    /// Repeats one row `rows` times.
    pub fn broadcast(row: &[Token], rows: usize) -> Self {
        let mut data = Vec::with_capacity(row.len() * rows);
        for _ in 0..rows {
            data.extend_from_slice(row);
        }
        Self {
            rows,
            cols: row.len(),
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns row `index`, or `None` if out of bounds.
    pub fn row(&self, index: usize) -> Option<&[Token]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[Token]> {
        (0..self.rows).filter_map(move |i| self.row(i))
    }
}

/// A batch of `batch_size` elements of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    Pairs {
        inputs: TokenMatrix,
        targets: TokenMatrix,
    },
    Sequences {
        tokens: TokenMatrix,
    },
}

impl Batch {
    /// `(batch_size, n_ctx)` of the batch.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Batch::Pairs { inputs, .. } => inputs.shape(),
            Batch::Sequences { tokens } => tokens.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
