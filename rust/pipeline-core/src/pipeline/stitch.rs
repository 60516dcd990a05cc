// rust/pipeline-core/src/pipeline/stitch.rs

//! Concatenation of consecutive records into one sequence.

use crate::error::Result;
use crate::record::RawRecord;
use crate::Token;

/// Joins `records` with `boundary` between neighbours.
///
/// The result has `Σ len + (records.len() - 1)` tokens.
pub fn stitch_group(records: &[RawRecord], boundary: Token) -> Vec<Token> {
    let total: usize = records.iter().map(RawRecord::len).sum::<usize>()
        + records.len().saturating_sub(1);
    let mut out = Vec::with_capacity(total);

    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(boundary);
        }
        out.extend_from_slice(&record.tokens);
    }
    out
}

/// Groups exactly `stitch` records at a time and stitches each group.
///
/// A trailing group with fewer than `stitch` records is dropped.
pub struct Stitcher<I> {
    inner: I,
    stitch: usize,
    boundary: Token,
    done: bool,
}

impl<I> Stitcher<I>
where
    I: Iterator<Item = Result<RawRecord>>,
{
    pub fn new(inner: I, stitch: usize, boundary: Token) -> Self {
        Self {
            inner,
            stitch: stitch.max(1),
            boundary,
            done: false,
        }
    }
}

impl<I> Iterator for Stitcher<I>
where
    I: Iterator<Item = Result<RawRecord>>,
{
    type Item = Result<Vec<Token>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut group = Vec::with_capacity(self.stitch);
        while group.len() < self.stitch {
            match self.inner.next() {
                Some(Ok(record)) => group.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }

        Some(Ok(stitch_group(&group, self.boundary)))
    }
}
