// rust/pipeline-core/src/record/reader.rs

//! Parallel interleaved reading of record files.
//!
//! Up to `cycle_length` worker threads each take the next file from a shared
//! queue and push decoded records into one bounded channel. Records from
//! different files interleave in whatever order the workers produce them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::example::{decode_record, RawRecord};
use super::tfrecord::TfRecordReader;
use crate::config::{Datatype, RecordConfig};
use crate::error::{PipelineError, Result};
use crate::storage::StorageBackend;

/// Streams decoded records from a set of files.
///
/// The stream ends once every file has been read. The first error from any
/// worker is delivered to the consumer and ends the stream.
pub struct RecordReader {
    receiver: Receiver<Result<RawRecord>>,
    stop_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    exhausted: bool,
}

impl RecordReader {
    /// Starts reading `files` from `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        files: Vec<PathBuf>,
        datatype: Datatype,
        config: &RecordConfig,
    ) -> Result<Self> {
        let workers_needed = config.cycle_length.max(1).min(files.len());
        let (record_tx, record_rx) = channel::bounded(config.channel_buffer.max(1));
        let (file_tx, file_rx) = channel::unbounded();
        for file in files {
            // The receiver is alive, so this cannot fail.
            let _ = file_tx.send(file);
        }
        drop(file_tx);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(workers_needed);

        for worker_id in 0..workers_needed {
            let storage = storage.clone();
            let files = file_rx.clone();
            let records = record_tx.clone();
            let stop_flag = stop_flag.clone();
            let verify = config.verify_checksums;

            let handle = thread::Builder::new()
                .name(format!("tpipe-reader-{worker_id}"))
                .spawn(move || {
                    while let Ok(path) = files.recv() {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        let keep_going =
                            read_file(storage.as_ref(), &path, datatype, verify, &records, &stop_flag);
                        if !keep_going {
                            return;
                        }
                    }
                })
                .map_err(|e| {
                    PipelineError::dataset("reader", format!("failed to spawn worker: {e}"))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            receiver: record_rx,
            stop_flag,
            workers,
            exhausted: false,
        })
    }

    /// Returns the next record, or `Ok(None)` once every file is consumed.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.receiver.recv() {
            Ok(Ok(record)) => Ok(Some(record)),
            Ok(Err(e)) => {
                self.exhausted = true;
                self.stop();
                Err(e)
            }
            // Every worker has finished and dropped its sender
            Err(_) => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Signals the workers to stop and waits for them to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Replacing the receiver unblocks any worker waiting on a full channel.
        self.receiver = channel::never();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl Drop for RecordReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads one file into the channel. Returns false if the worker should exit.
fn read_file(
    storage: &dyn StorageBackend,
    path: &Path,
    datatype: Datatype,
    verify_checksums: bool,
    records: &Sender<Result<RawRecord>>,
    stop_flag: &AtomicBool,
) -> bool {
    let source = match storage.open_read(path) {
        Ok(source) => source,
        Err(e) => {
            stop_flag.store(true, Ordering::Relaxed);
            let _ = records.send(Err(e));
            return false;
        }
    };

    tracing::debug!(path = %path.display(), "reading record file");
    let mut frames = TfRecordReader::new(source, verify_checksums);

    for frame in &mut frames {
        if stop_flag.load(Ordering::Relaxed) {
            return false;
        }

        let record = frame.and_then(|bytes| decode_record(&bytes, datatype));
        match record {
            Ok(record) => {
                if records.send(Ok(record)).is_err() {
                    return false;
                }
            }
            Err(e) => {
                stop_flag.store(true, Ordering::Relaxed);
                let _ = records.send(Err(e.with_path(path)));
                return false;
            }
        }
    }

    tracing::debug!(path = %path.display(), records = frames.records_read(), "finished record file");
    true
}
