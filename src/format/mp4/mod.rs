//! ISO base media file format: a fragmented writer and a demuxer for
//! progressive or fragmented input.

pub mod boxes;
pub mod parse;
pub mod reader;
pub mod writer;

pub use reader::Mp4Reader;
pub use writer::{FragmentWriter, WriterState, DEFAULT_AUDIO_TIMEBASE, DEFAULT_VIDEO_TIMEBASE};
