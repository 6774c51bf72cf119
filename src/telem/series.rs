//! Typed sample columns.

use super::TimeStamp;
use serde::{Deserialize, Serialize};

/// The element type of a series, as declared on its cluster channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float64,
    Float32,
    Uint8,
    Uint64,
    Timestamp,
    String,
}

/// A fixed-length column of samples sharing one data type.
///
/// Series are moved, not copied: a source builds one per channel per read and
/// hands ownership to the frame, which hands it to the cluster writer.
#[derive(Clone, Debug, PartialEq)]
pub enum Series {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Uint8(Vec<u8>),
    Uint64(Vec<u64>),
    Timestamp(Vec<TimeStamp>),
    Str(Vec<String>),
}

impl Series {
    pub fn data_type(&self) -> DataType {
        match self {
            Series::Float64(_) => DataType::Float64,
            Series::Float32(_) => DataType::Float32,
            Series::Uint8(_) => DataType::Uint8,
            Series::Uint64(_) => DataType::Uint64,
            Series::Timestamp(_) => DataType::Timestamp,
            Series::Str(_) => DataType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Series::Float64(v) => v.len(),
            Series::Float32(v) => v.len(),
            Series::Uint8(v) => v.len(),
            Series::Uint64(v) => v.len(),
            Series::Timestamp(v) => v.len(),
            Series::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn float64(&self) -> Option<&[f64]> {
        match self {
            Series::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn float32(&self) -> Option<&[f32]> {
        match self {
            Series::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn uint8(&self) -> Option<&[u8]> {
        match self {
            Series::Uint8(v) => Some(v),
            _ => None,
        }
    }

    pub fn uint64(&self) -> Option<&[u64]> {
        match self {
            Series::Uint64(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamps(&self) -> Option<&[TimeStamp]> {
        match self {
            Series::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    pub fn strings(&self) -> Option<&[String]> {
        match self {
            Series::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vec<f64>> for Series {
    fn from(v: Vec<f64>) -> Self {
        Series::Float64(v)
    }
}

impl From<Vec<f32>> for Series {
    fn from(v: Vec<f32>) -> Self {
        Series::Float32(v)
    }
}

impl From<Vec<u8>> for Series {
    fn from(v: Vec<u8>) -> Self {
        Series::Uint8(v)
    }
}

impl From<Vec<u64>> for Series {
    fn from(v: Vec<u64>) -> Self {
        Series::Uint64(v)
    }
}

impl From<Vec<TimeStamp>> for Series {
    fn from(v: Vec<TimeStamp>) -> Self {
        Series::Timestamp(v)
    }
}

impl From<Vec<String>> for Series {
    fn from(v: Vec<String>) -> Self {
        Series::Str(v)
    }
}
