//! # H.264/AVC helpers
//!
//! Only what the containers need: NAL classification, SPS parsing for the
//! picture size, the avcC [`ParameterSetRecord`], and re-framing between MP4
//! length prefixes and Annex B start codes.
//!
//! ```rust
//! use fragmux::codec::h264::ParameterSetRecord;
//!
//! # fn main() -> fragmux::Result<()> {
//! let sps = [0x67, 0x42, 0xC0, 0x1E, 0xDA];
//! let pps = [0x68, 0xCE, 0x3C, 0x80];
//! let record = ParameterSetRecord::encode(&sps, &pps)?;
//! let (s, p) = ParameterSetRecord::decode(&record)?;
//! assert_eq!((s.as_ref(), p.as_ref()), (&sps[..], &pps[..]));
//! # Ok(())
//! # }
//! ```

pub mod annexb;
pub mod parser;
pub mod record;
pub mod types;

pub use parser::{parse_sps, H264Parser};
pub use record::ParameterSetRecord;
pub use types::{NalUnit, NalUnitType, SpsInfo};
