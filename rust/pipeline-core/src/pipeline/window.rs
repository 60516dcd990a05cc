// rust/pipeline-core/src/pipeline/window.rs

//! Extraction of fixed-length `(input, target)` windows.
//!
//! A window of `n_ctx` tokens needs `n_ctx + 1` tokens of context, since the
//! target is the input shifted left by one position.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::types::{Element, FixedSeq, WindowPair};
use crate::config::Datatype;
use crate::error::{PipelineError, Result};
use crate::Token;

/// Where a window starts within a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Uniformly random offset.
    Random,
    /// Offset zero.
    LeftAligned,
}

impl WindowPolicy {
    /// Policy for a datatype; chunk records are not windowed.
    pub fn for_datatype(datatype: Datatype) -> Option<Self> {
        match datatype {
            Datatype::RandomSample => Some(WindowPolicy::Random),
            Datatype::Sample => Some(WindowPolicy::LeftAligned),
            Datatype::Chunk => None,
        }
    }
}

/// Source of random window offsets.
pub trait OffsetSampler: Send {
    /// Returns an offset uniformly distributed in `[0, upper)`; `upper > 0`.
    fn sample(&mut self, upper: usize) -> usize;
}

pub struct RngOffsetSampler {
    rng: ChaCha8Rng,
}

impl RngOffsetSampler {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }
}

impl OffsetSampler for RngOffsetSampler {
    fn sample(&mut self, upper: usize) -> usize {
        self.rng.gen_range(0..upper)
    }
}

/// Slices one window from `seq`.
///
/// With [`WindowPolicy::Random`] the offset is drawn from
/// `[0, len - (n_ctx + 1))`; an empty range is an error rather than being
/// clamped. With [`WindowPolicy::LeftAligned`] the sequence only needs
/// `n_ctx + 1` tokens.
pub fn extract_window(
    seq: &[Token],
    n_ctx: usize,
    policy: WindowPolicy,
    sampler: &mut dyn OffsetSampler,
) -> Result<WindowPair> {
    let len = seq.len();
    let offset = match policy {
        WindowPolicy::Random => {
            let upper = len
                .checked_sub(n_ctx + 1)
                .filter(|&upper| upper > 0)
                .ok_or_else(|| PipelineError::window(n_ctx, len))?;
            sampler.sample(upper)
        }
        WindowPolicy::LeftAligned => {
            if len < n_ctx + 1 {
                return Err(PipelineError::window(n_ctx, len));
            }
            0
        }
    };

    let input = seq
        .get(offset..offset + n_ctx)
        .ok_or_else(|| PipelineError::window(n_ctx, len))?;
    let target = seq
        .get(offset + 1..offset + 1 + n_ctx)
        .ok_or_else(|| PipelineError::window(n_ctx, len))?;

    Ok(WindowPair {
        input: FixedSeq::new(input.to_vec(), n_ctx)?,
        target: FixedSeq::new(target.to_vec(), n_ctx)?,
    })
}

/// Maps stitched sequences to windowed elements.
pub struct Windower<I> {
    inner: I,
    n_ctx: usize,
    policy: WindowPolicy,
    sampler: Box<dyn OffsetSampler>,
}

impl<I> Windower<I>
where
    I: Iterator<Item = Result<Vec<Token>>>,
{
    pub fn new(inner: I, n_ctx: usize, policy: WindowPolicy, sampler: Box<dyn OffsetSampler>) -> Self {
        Self {
            inner,
            n_ctx,
            policy,
            sampler,
        }
    }
}

impl<I> Iterator for Windower<I>
where
    I: Iterator<Item = Result<Vec<Token>>>,
{
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        let seq = self.inner.next()?;
        Some(seq.and_then(|seq| {
            extract_window(&seq, self.n_ctx, self.policy, self.sampler.as_mut()).map(Element::Pair)
        }))
    }
}
