//! AAC configuration and ADTS framing.

pub mod adts;
pub mod types;

pub use adts::{AdtsHeader, ADTS_HEADER_LEN};
pub use types::{sample_rate_index, AudioObjectType, AudioSpecificConfig, SAMPLES_PER_FRAME};
