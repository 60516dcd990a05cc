// rust/pipeline-core/src/pipeline/shuffle.rs

//! Bounded shuffle buffer.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;

/// A randomized reservoir holding at most `capacity` items.
pub struct ShuffleBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    rng: ChaCha8Rng,
}

impl<T> ShuffleBuffer<T> {
    pub fn new(capacity: usize, rng: ChaCha8Rng) -> Self {
        Self {
            items: Vec::new(),
            capacity: capacity.max(1),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds an item. Callers check [`is_full`](Self::is_full) first.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Removes and returns a uniformly chosen buffered item.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.items.len());
        Some(self.items.swap_remove(index))
    }
}

/// Iterator adapter that shuffles a fallible stream through a
/// [`ShuffleBuffer`].
///
/// The buffer is refilled to capacity before every pull, so each output is
/// drawn from the next `capacity` upstream items. Once upstream ends the
/// remaining items drain in random order. An upstream error is returned
/// immediately and ends the stream.
pub struct Shuffled<I, T> {
    inner: I,
    buffer: ShuffleBuffer<T>,
    upstream_done: bool,
    failed: bool,
}

impl<I, T> Shuffled<I, T>
where
    I: Iterator<Item = Result<T>>,
{
    pub fn new(inner: I, capacity: usize, rng: ChaCha8Rng) -> Self {
        Self {
            inner,
            buffer: ShuffleBuffer::new(capacity, rng),
            upstream_done: false,
            failed: false,
        }
    }
}

impl<I, T> Iterator for Shuffled<I, T>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while !self.upstream_done && !self.buffer.is_full() {
            match self.inner.next() {
                Some(Ok(item)) => self.buffer.push(item),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => self.upstream_done = true,
            }
        }

        self.buffer.pop().map(Ok)
    }
}
