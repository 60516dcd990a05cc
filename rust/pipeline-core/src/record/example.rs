// rust/pipeline-core/src/record/example.rs

//! `tf.train.Example` messages and the record schema used by the pipeline.
//!
//! Every record stores a variable-length int64 feature `text` holding the
//! token ids. Records of the sampling datatypes may also carry a string
//! feature `hash`, which is decoded but never consumed downstream.

use std::collections::HashMap;

use prost::Message;

use crate::config::Datatype;
use crate::error::{PipelineError, Result};
use crate::Token;

pub const TEXT_FEATURE: &str = "text";
pub const HASH_FEATURE: &str = "hash";

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

/// A decoded record: the token sequence plus the optional document hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub tokens: Vec<Token>,
    pub hash: Option<String>,
}

impl RawRecord {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, hash: None }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Decodes one serialized Example.
///
/// The `hash` feature is only read for sampling datatypes; chunk records
/// carry text alone. A record without tokens is rejected.
pub fn decode_record(bytes: &[u8], datatype: Datatype) -> Result<RawRecord> {
    let example = Example::decode(bytes)
        .map_err(|e| PipelineError::decode("", format!("invalid Example message: {e}")))?;
    let mut features = example.features.map(|f| f.feature).unwrap_or_default();

    let tokens = match features.remove(TEXT_FEATURE).and_then(|f| f.kind) {
        Some(feature::Kind::Int64List(list)) => list
            .value
            .into_iter()
            .map(to_token)
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(PipelineError::decode(
                "",
                format!("feature '{TEXT_FEATURE}' is not an int64 list"),
            ))
        }
        None => {
            return Err(PipelineError::decode(
                "",
                format!("missing feature '{TEXT_FEATURE}'"),
            ))
        }
    };

    if tokens.is_empty() {
        return Err(PipelineError::decode(
            "",
            format!("feature '{TEXT_FEATURE}' is empty"),
        ));
    }

    let hash = if datatype.is_sampling() {
        match features.remove(HASH_FEATURE).and_then(|f| f.kind) {
            Some(feature::Kind::BytesList(list)) => list
                .value
                .into_iter()
                .next()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            Some(_) => {
                return Err(PipelineError::decode(
                    "",
                    format!("feature '{HASH_FEATURE}' is not a bytes list"),
                ))
            }
            None => None,
        }
    } else {
        None
    };

    Ok(RawRecord { tokens, hash })
}

/// Serializes a record into an Example message.
pub fn encode_record(record: &RawRecord) -> Vec<u8> {
    let mut feature = HashMap::new();
    feature.insert(
        TEXT_FEATURE.to_string(),
        Feature {
            kind: Some(feature::Kind::Int64List(Int64List {
                value: record.tokens.iter().map(|&t| i64::from(t)).collect(),
            })),
        },
    );
    if let Some(hash) = &record.hash {
        feature.insert(
            HASH_FEATURE.to_string(),
            Feature {
                kind: Some(feature::Kind::BytesList(BytesList {
                    value: vec![hash.as_bytes().to_vec()],
                })),
            },
        );
    }

    Example {
        features: Some(Features { feature }),
    }
    .encode_to_vec()
}

fn to_token(value: i64) -> Result<Token> {
    Token::try_from(value)
        .map_err(|_| PipelineError::decode("", format!("token id {value} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_with(name: &str, kind: feature::Kind) -> Vec<u8> {
        let mut feature = HashMap::new();
        feature.insert(name.to_string(), Feature { kind: Some(kind) });
        Example {
            features: Some(Features { feature }),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_decode_sample_record() {
        let record = RawRecord::new(vec![464, 2068, 7586, 21831]).with_hash("abc123");
        let bytes = encode_record(&record);

        let decoded = decode_record(&bytes, Datatype::RandomSample).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.len(), 4);

        let decoded = decode_record(&bytes, Datatype::Sample).unwrap();
        assert_eq!(decoded.hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_chunk_ignores_hash() {
        let record = RawRecord::new(vec![1, 2, 3]).with_hash("ignored");
        let decoded = decode_record(&encode_record(&record), Datatype::Chunk).unwrap();

        assert_eq!(decoded.tokens, vec![1, 2, 3]);
        assert!(decoded.hash.is_none());
    }

    #[test]
    fn test_missing_hash_is_allowed() {
        let bytes = encode_record(&RawRecord::new(vec![7]));
        let decoded = decode_record(&bytes, Datatype::RandomSample).unwrap();
        assert!(decoded.hash.is_none());
    }

    #[test]
    fn test_missing_text_rejected() {
        let bytes = example_with(
            HASH_FEATURE,
            feature::Kind::BytesList(BytesList { value: vec![b"h".to_vec()] }),
        );
        let err = decode_record(&bytes, Datatype::Sample).unwrap_err();
        assert!(err.to_string().contains("missing feature 'text'"));
    }

    #[test]
    fn test_empty_text_rejected() {
        let bytes = encode_record(&RawRecord::new(Vec::new()));
        let err = decode_record(&bytes, Datatype::Chunk).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn test_wrong_feature_kind_rejected() {
        let bytes = example_with(
            TEXT_FEATURE,
            feature::Kind::FloatList(FloatList { value: vec![1.0] }),
        );
        let err = decode_record(&bytes, Datatype::Chunk).unwrap_err();
        assert!(err.to_string().contains("not an int64 list"));
    }

    #[test]
    fn test_out_of_range_token_rejected() {
        let bytes = example_with(
            TEXT_FEATURE,
            feature::Kind::Int64List(Int64List { value: vec![1, -5] }),
        );
        let err = decode_record(&bytes, Datatype::Chunk).unwrap_err();
        assert!(err.to_string().contains("token id -5 out of range"));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decode_record(&[0xff, 0xff, 0xff], Datatype::Chunk).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
    }
}
