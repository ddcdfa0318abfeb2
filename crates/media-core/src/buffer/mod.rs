//! Timestamp-addressed sample storage

mod sample_array;

pub use sample_array::{IntSampleArray, SampleArray, ShortSampleArray, SIZE_MIX_BUFFER};
