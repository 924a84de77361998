//! # MPEG Transport Stream (TS) output
//!
//! A single-program TS writer: PAT and PMT, one PES stream per added stream,
//! PCR on the video PID (or the first PID for audio-only programs).
//!
//! H.264 samples are converted from length-prefixed form to Annex B with an
//! access unit delimiter, and keyframes carry SPS/PPS. AAC frames get an ADTS
//! header.
//!
//! ## Example Usage
//!
//! ```rust
//! use fragmux::av::{CodecType, Frame, StreamDescriptor, Timebase};
//! use fragmux::format::ts::{TSMuxer, TS_PACKET_SIZE};
//! use fragmux::io::{IoPort, MemoryBuffer};
//!
//! # fn main() -> fragmux::Result<()> {
//! let sink = MemoryBuffer::new();
//! let mut muxer = TSMuxer::new(IoPort::new(sink.clone()));
//! muxer.add_stream(StreamDescriptor::audio(CodecType::AAC, Timebase::new(1, 48000), 48000, 2))?;
//! muxer.write_header()?;
//! muxer.write_frame(&Frame::new(vec![0x21u8; 32]).with_timestamp(0).with_key_flag(true))?;
//! muxer.write_trailer()?;
//! assert_eq!(sink.len() % TS_PACKET_SIZE, 0);
//! # Ok(())
//! # }
//! ```

/// TS muxer writing to an `IoPort`
pub mod muxer;

/// PES header encoding
pub mod pes;

/// Core TS types and constants
pub mod types;

pub use muxer::TSMuxer;
pub use pes::PESHeader;
pub use types::{
    TSHeader, PID_ES_BASE, PID_PAT, PID_PMT, STREAM_TYPE_AAC, STREAM_TYPE_H264, TS_PACKET_SIZE,
};
