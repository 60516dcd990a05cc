// rust/pipeline-core/src/record/mod.rs

//! Record files: TFRecord framing, the Example schema, and the parallel
//! interleaved reader that turns a file list into a stream of records.

mod example;
mod reader;
mod tfrecord;

pub use example::{
    decode_record, encode_record, feature, BytesList, Example, Feature, Features, FloatList,
    Int64List, RawRecord, HASH_FEATURE, TEXT_FEATURE,
};
pub use reader::RecordReader;
pub use tfrecord::{masked_crc, TfRecordReader, TfRecordWriter};
