// rust/pipeline-core/src/pipeline/prefetch.rs

//! Prefetching iterator for reducing stalls in the consumer.
//!
//! A background thread pulls items from the wrapped iterator into a bounded
//! channel, so upstream work overlaps with the consumer's compute. The
//! producer blocks once `depth` items are waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::error::{PipelineError, Result};

type BoxedStream<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

/// A prefetching wrapper around a fallible iterator.
///
/// With `depth == 0` no thread is started and items are pulled inline.
pub struct Prefetcher<T> {
    /// Channel of prefetched items; `None` when iterating inline.
    receiver: Option<Receiver<Result<T>>>,
    /// Flag to signal the prefetch thread to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the prefetch thread.
    prefetch_thread: Option<JoinHandle<()>>,
    /// Iterator used when prefetching is disabled.
    inline: Option<BoxedStream<T>>,
    exhausted: bool,
}

impl<T: Send + 'static> Prefetcher<T> {
    /// Starts prefetching up to `depth` items from `iter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefetch thread cannot be spawned.
    pub fn new<I>(iter: I, depth: usize) -> Result<Self>
    where
        I: Iterator<Item = Result<T>> + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));

        if depth == 0 {
            return Ok(Self {
                receiver: None,
                stop_flag,
                prefetch_thread: None,
                inline: Some(Box::new(iter)),
                exhausted: false,
            });
        }

        let (tx, rx) = channel::bounded(depth);
        let stop_flag_clone = stop_flag.clone();

        let prefetch_thread = thread::Builder::new()
            .name("tpipe-prefetch".to_string())
            .spawn(move || {
                let mut iter = iter;
                while !stop_flag_clone.load(Ordering::Relaxed) {
                    let Some(item) = iter.next() else {
                        break;
                    };
                    let is_err = item.is_err();
                    // Send fails once the consumer is gone
                    if tx.send(item).is_err() || is_err {
                        break;
                    }
                }
            })
            .map_err(|e| PipelineError::dataset("prefetch", format!("failed to spawn thread: {e}")))?;

        Ok(Self {
            receiver: Some(rx),
            stop_flag,
            prefetch_thread: Some(prefetch_thread),
            inline: None,
            exhausted: false,
        })
    }
}

impl<T> Prefetcher<T> {
    /// Gets the next item, or `Ok(None)` at the end of the stream.
    pub fn next_item(&mut self) -> Result<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }

        let item = match (&self.receiver, &mut self.inline) {
            // A disconnected channel means the producer finished
            (Some(receiver), _) => receiver.recv().ok(),
            (None, Some(iter)) => iter.next(),
            (None, None) => None,
        };

        match item {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Stops the prefetch thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a producer waiting on a full channel
        self.receiver = None;
        self.exhausted = true;
        if let Some(thread) = self.prefetch_thread.take() {
            let _ = thread.join();
        }
    }
}

impl<T> Iterator for Prefetcher<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

impl<T> Drop for Prefetcher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_prefetch_preserves_order() {
        let items = (0..100u32).map(Ok);
        let prefetcher = Prefetcher::new(items, 4).unwrap();

        let out: Vec<u32> = prefetcher.map(|r| r.unwrap()).collect();
        assert_eq!(out, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_inline_when_depth_zero() {
        let mut prefetcher = Prefetcher::new((0..3u32).map(Ok), 0).unwrap();
        assert!(prefetcher.prefetch_thread.is_none());

        assert_eq!(prefetcher.next_item().unwrap(), Some(0));
        assert_eq!(prefetcher.by_ref().count(), 2);
        assert_eq!(prefetcher.next_item().unwrap(), None);
    }

    #[test]
    fn test_error_ends_stream() {
        let items = vec![Ok(1u32), Err(PipelineError::dataset("d", "boom")), Ok(2)];
        let mut prefetcher = Prefetcher::new(items.into_iter(), 2).unwrap();

        assert_eq!(prefetcher.next_item().unwrap(), Some(1));
        assert!(prefetcher.next_item().is_err());
        assert_eq!(prefetcher.next_item().unwrap(), None);
    }

    #[test]
    fn test_producer_bounded_by_depth() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let items = (0..).map(move |i: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(i)
        });

        let mut prefetcher = Prefetcher::new(items, 3).unwrap();
        assert_eq!(prefetcher.next_item().unwrap(), Some(0));
        thread::sleep(Duration::from_millis(50));

        // One taken, three buffered, at most one more blocked in send
        assert!(produced.load(Ordering::SeqCst) <= 5);
    }

    #[test]
    fn test_drop_stops_endless_producer() {
        let prefetcher = Prefetcher::new((0..).map(|i: u64| Ok(i)), 2).unwrap();
        // Must not hang
        drop(prefetcher);
    }
}
