#![doc(html_root_url = "https://docs.rs/fragmux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # fragmux - incremental MP4 and MPEG-TS muxing
//!
//! `fragmux` writes fragmented MP4 and MPEG-TS from already-encoded H.264 and
//! AAC frames, and reads MP4 (progressive or fragmented) back into frames.
//! Every byte goes through an [`io::IoPort`] wrapping a caller-supplied
//! [`io::Transport`], so output can go to a file, a socket or memory without
//! the library ever opening a path itself.
//!
//! ## Features
//!
//! - Fragmented MP4 writer: init segment, one `moof`+`mdat` per fragment, an
//!   optional `mfra` index on finalize
//! - MP4 reader for progressive (`moov` before or after `mdat`) and fragmented
//!   files, with frame-index seeking
//! - Single-program MPEG-TS muxer with PCR, PAT/PMT repetition and ADTS framing
//! - Presentation-time interleaving of a video and an audio source
//! - Copy, concatenation and merge remuxing between any source and muxer
//!
//! ## Quick Start
//!
//! ```rust
//! use fragmux::av::{CodecType, Frame, StreamDescriptor, Timebase};
//! use fragmux::config::Config;
//! use fragmux::format::mp4::{FragmentWriter, Mp4Reader};
//! use fragmux::format::ElementaryStreamSource;
//! use fragmux::io::{IoPort, MemoryBuffer};
//!
//! # fn main() -> fragmux::Result<()> {
//! let config = Config::default();
//! let out = MemoryBuffer::new();
//! let mut writer = FragmentWriter::new(IoPort::with_config(out.clone(), &config), &config);
//! writer.add_stream(StreamDescriptor::audio(CodecType::AAC, Timebase::new(1, 44100), 44100, 2))?;
//! writer.write_header()?;
//! for i in 0..4 {
//!     let frame = Frame::new(vec![0x21u8; 64])
//!         .with_timestamp(i * 1024)
//!         .with_duration(1024)
//!         .with_key_flag(true);
//!     writer.write_frame(0, &frame)?;
//! }
//! writer.finalize()?;
//! writer.close()?;
//!
//! let mut reader = Mp4Reader::open(
//!     IoPort::with_config(MemoryBuffer::from_bytes(out.to_vec()), &config),
//!     &config,
//! )?;
//! let mut frames = 0;
//! while reader.read_frame()?.is_some() {
//!     frames += 1;
//! }
//! assert_eq!(frames, 4);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`av`]: frames, stream descriptors and timebase arithmetic
//! - [`codec`]: H.264 parameter sets and AAC configuration
//! - [`format`]: container readers, writers and remuxing
//! - [`io`]: the transport abstraction and its buffered port
//! - [`config`]: session configuration
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`] with a [`MuxError`]. A writer that
//! fails while emitting its header stays failed; later calls return a state
//! error instead of producing a corrupt file.

pub mod av;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod utils;

pub use error::{MuxError, Result};
