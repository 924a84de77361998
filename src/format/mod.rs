use crate::av::{Frame, StreamDescriptor};
use crate::Result;

pub mod interleave;
pub mod mp4;
pub mod remux;
pub mod ts;

/// Pull-based demuxer.
pub trait ElementaryStreamSource {
    /// Stream layout, fixed once the source is open.
    fn streams(&self) -> &[StreamDescriptor];

    /// Next frame in the stream's own timebase, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Positions the source so the next frame is at or before frame `index`.
    fn seek_to_frame(&mut self, index: u64) -> Result<()>;
}

impl<S: ElementaryStreamSource + ?Sized> ElementaryStreamSource for Box<S> {
    fn streams(&self) -> &[StreamDescriptor] {
        (**self).streams()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn seek_to_frame(&mut self, index: u64) -> Result<()> {
        (**self).seek_to_frame(index)
    }
}

/// Common trait for container writers
pub trait Muxer {
    /// Declares a stream and returns its index.
    fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize>;

    fn streams(&self) -> &[StreamDescriptor];

    fn write_header(&mut self) -> Result<()>;

    /// Writes a frame to the stream named by `frame.stream_index`.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Closes the current fragment, for containers that have them.
    fn flush_fragment(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()>;
}

pub mod tests {
    //! In-memory doubles for exercising orchestration code.
    use super::*;
    use std::collections::VecDeque;

    /// Records everything written to it.
    #[derive(Debug, Default)]
    pub struct TestMuxer {
        pub streams: Vec<StreamDescriptor>,
        pub frames: Vec<Frame>,
        /// Number of frames written when each fragment flush was requested.
        pub fragment_flushes: Vec<usize>,
        pub header_written: bool,
        pub trailer_written: bool,
    }

    impl TestMuxer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pts_of(&self, stream_index: usize) -> Vec<i64> {
            self.frames
                .iter()
                .filter(|f| f.stream_index == stream_index)
                .map(|f| f.pts)
                .collect()
        }
    }

    impl Muxer for TestMuxer {
        fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize> {
            self.streams.push(descriptor);
            Ok(self.streams.len() - 1)
        }

        fn streams(&self) -> &[StreamDescriptor] {
            &self.streams
        }

        fn write_header(&mut self) -> Result<()> {
            self.header_written = true;
            Ok(())
        }

        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn flush_fragment(&mut self) -> Result<()> {
            self.fragment_flushes.push(self.frames.len());
            Ok(())
        }

        fn write_trailer(&mut self) -> Result<()> {
            self.trailer_written = true;
            Ok(())
        }
    }

    /// Replays a fixed list of frames.
    #[derive(Debug, Clone)]
    pub struct TestSource {
        streams: Vec<StreamDescriptor>,
        all: Vec<Frame>,
        pending: VecDeque<Frame>,
    }

    impl TestSource {
        pub fn new(streams: Vec<StreamDescriptor>, frames: Vec<Frame>) -> Self {
            Self {
                streams,
                pending: frames.iter().cloned().collect(),
                all: frames,
            }
        }

        /// Single-stream source with `pts = dts` and a fixed duration.
        pub fn with_timestamps(stream: StreamDescriptor, pts: &[i64], duration: i64) -> Self {
            let frames = pts
                .iter()
                .map(|&ts| {
                    Frame::new(vec![0u8; 4])
                        .with_timestamp(ts)
                        .with_duration(duration)
                        .with_key_flag(true)
                })
                .collect();
            Self::new(vec![stream], frames)
        }
    }

    impl ElementaryStreamSource for TestSource {
        fn streams(&self) -> &[StreamDescriptor] {
            &self.streams
        }

        fn read_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.pending.pop_front())
        }

        fn seek_to_frame(&mut self, index: u64) -> Result<()> {
            self.pending = self.all.iter().skip(index as usize).cloned().collect();
            Ok(())
        }
    }
}
