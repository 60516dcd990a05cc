// rust/pipeline-core/src/pipeline/mixer.rs

//! Weighted mixing of several source streams.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::types::Element;
use super::ElementStream;
use crate::error::{PipelineError, Result};

/// Draws source indices with probability proportional to their weight.
pub struct WeightedSampler {
    rng: ChaCha8Rng,
    cumulative_weights: Vec<f64>,
    total_weight: f64,
}

impl WeightedSampler {
    /// # Errors
    ///
    /// Returns a configuration error if `weights` is empty, contains a
    /// negative or non-finite value, or sums to zero.
    pub fn new(weights: &[f64], rng: ChaCha8Rng) -> Result<Self> {
        if weights.is_empty() {
            return Err(PipelineError::config("at least one mixing weight is required"));
        }

        let mut cumulative_weights = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            if !w.is_finite() || w < 0.0 {
                return Err(PipelineError::config(format!(
                    "mixing weight {i} must be finite and non-negative, got {w}"
                )));
            }
            total += w;
            cumulative_weights.push(total);
        }

        if total <= 0.0 {
            return Err(PipelineError::config("mixing weights must not all be zero"));
        }

        Ok(Self {
            rng,
            cumulative_weights,
            total_weight: total,
        })
    }

    pub fn num_sources(&self) -> usize {
        self.cumulative_weights.len()
    }

    /// Normalized selection probability of each source.
    pub fn probabilities(&self) -> Vec<f64> {
        let mut previous = 0.0;
        self.cumulative_weights
            .iter()
            .map(|&c| {
                let p = (c - previous) / self.total_weight;
                previous = c;
                p
            })
            .collect()
    }

    pub fn sample_index(&mut self) -> usize {
        let target = self.rng.gen::<f64>() * self.total_weight;
        // First source whose cumulative weight exceeds the target; zero-weight
        // sources are never picked.
        let index = self.cumulative_weights.partition_point(|&c| c <= target);
        index.min(self.cumulative_weights.len() - 1)
    }
}

/// Interleaves source streams, picking the next source per element.
pub struct Mixer {
    sources: Vec<ElementStream>,
    sampler: Option<WeightedSampler>,
    done: bool,
}

impl Mixer {
    /// # Errors
    ///
    /// Returns a configuration error if there are no sources, the weight
    /// count does not match, or the weights are invalid.
    pub fn new(sources: Vec<ElementStream>, weights: &[f64], rng: ChaCha8Rng) -> Result<Self> {
        if sources.is_empty() {
            return Err(PipelineError::config("at least one dataset is required"));
        }
        if sources.len() != weights.len() {
            return Err(PipelineError::config(format!(
                "{} datasets but {} mixing weights",
                sources.len(),
                weights.len()
            )));
        }

        let sampler = WeightedSampler::new(weights, rng)?;
        let sampler = if sources.len() == 1 { None } else { Some(sampler) };

        Ok(Self {
            sources,
            sampler,
            done: false,
        })
    }
}

impl Iterator for Mixer {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let index = match self.sampler.as_mut() {
            Some(sampler) => sampler.sample_index(),
            None => 0,
        };

        match self.sources[index].next() {
            Some(Ok(element)) => Some(Ok(element)),
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            // Sources repeat forever; a finished one ends the mix
            None => {
                self.done = true;
                None
            }
        }
    }
}
