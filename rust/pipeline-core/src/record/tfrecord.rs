// rust/pipeline-core/src/record/tfrecord.rs

//! TFRecord framing.
//!
//! Each record on disk is laid out as:
//!
//! ```text
//! +----------------------------+
//! | Length (8 bytes)           |  <- u64 little-endian
//! +----------------------------+
//! | Length CRC (4 bytes)       |  <- masked crc32c of the length bytes
//! +----------------------------+
//! | Payload (Length bytes)     |  <- serialized Example
//! +----------------------------+
//! | Payload CRC (4 bytes)      |  <- masked crc32c of the payload
//! +----------------------------+
//! ```

use std::io::{self, Read, Write};

use crate::error::{PipelineError, Result};

const LENGTH_BYTES: usize = 8;
const CRC_BYTES: usize = 4;
const MASK_DELTA: u32 = 0xa282_ead8;

/// Masked CRC32C as stored in record frames.
pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Reads framed records from a byte stream.
pub struct TfRecordReader<R> {
    reader: R,
    verify_checksums: bool,
    records_read: u64,
    done: bool,
}

impl<R: Read> TfRecordReader<R> {
    pub fn new(reader: R, verify_checksums: bool) -> Self {
        Self {
            reader,
            verify_checksums,
            records_read: 0,
            done: false,
        }
    }

    /// Number of records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Reads the next record payload.
    ///
    /// Returns `Ok(None)` at a clean end of stream. A stream that ends inside
    /// a frame, or a checksum mismatch, is a decode error.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; LENGTH_BYTES];
        let filled = read_fully(&mut self.reader, &mut header)
            .map_err(|e| self.io_error("failed to read record length", e))?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < LENGTH_BYTES {
            return Err(self.truncated("length header"));
        }

        let length_crc = self.read_u32("length checksum")?;
        if self.verify_checksums && masked_crc(&header) != length_crc {
            return Err(PipelineError::decode(
                "",
                format!("length checksum mismatch in record {}", self.records_read),
            ));
        }

        let length = u64::from_le_bytes(header);
        let mut payload = Vec::new();
        let read = (&mut self.reader).take(length).read_to_end(&mut payload);
        let read = read.map_err(|e| self.io_error("failed to read record payload", e))?;
        if (read as u64) < length {
            return Err(self.truncated("payload"));
        }

        let payload_crc = self.read_u32("payload checksum")?;
        if self.verify_checksums && masked_crc(&payload) != payload_crc {
            return Err(PipelineError::decode(
                "",
                format!("payload checksum mismatch in record {}", self.records_read),
            ));
        }

        self.records_read += 1;
        Ok(Some(payload))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; CRC_BYTES];
        let filled = read_fully(&mut self.reader, &mut buf)
            .map_err(|e| self.io_error("failed to read record checksum", e))?;
        if filled < CRC_BYTES {
            return Err(self.truncated(what));
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn truncated(&self, what: &str) -> PipelineError {
        PipelineError::decode(
            "",
            format!("truncated {what} in record {}", self.records_read),
        )
    }

    fn io_error(&self, message: &str, e: io::Error) -> PipelineError {
        PipelineError::decode("", format!("{message} (record {}): {e}", self.records_read))
    }
}

impl<R: Read> Iterator for TfRecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes framed records to a byte sink.
pub struct TfRecordWriter<W> {
    writer: W,
}

impl<W: Write> TfRecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        let header = (payload.len() as u64).to_le_bytes();
        self.writer.write_all(&header)?;
        self.writer.write_all(&masked_crc(&header).to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.write_all(&masked_crc(payload).to_le_bytes())?;
        Ok(())
    }

    /// Flushes and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
