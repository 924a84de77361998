//! Orchestration: moves frames from sources into a muxer.
//!
//! The [`Remuxer`] owns the policy the writers deliberately leave out: output
//! stream layout, timestamp rescaling and offsets, and where fragments end.

use super::interleave::{InterleavingScheduler, TrackInput};
use super::mp4::{FragmentWriter, Mp4Reader};
use super::ts::TSMuxer;
use super::{ElementaryStreamSource, Muxer};
use crate::av::{rescale, Frame, MediaKind, Timebase};
use crate::config::{Config, RemuxConfig};
use crate::error::{MuxError, Result};
use crate::io::IoPort;

/// What a remux run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemuxStats {
    /// Frames written per output stream.
    pub frames: Vec<u64>,
    /// Fragments emitted (fragment boundaries requested, for muxers that do
    /// not report their own count).
    pub fragments: u64,
    /// Output size, header and trailer included.
    pub bytes_written: u64,
}

impl RemuxStats {
    /// Frames written across all output streams.
    pub fn total_frames(&self) -> u64 {
        self.frames.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StreamOffset {
    pts: i64,
    dts: i64,
}

/// Drives one source (or several, for concat and merge) into one muxer.
pub struct Remuxer {
    config: RemuxConfig,
}

impl Remuxer {
    /// Takes the `remux` section of `config`; the sink keeps its own.
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.remux.clone(),
        }
    }

    /// Pass-through of every stream of `source`. Output streams mirror the
    /// input descriptors.
    pub fn copy<S, M>(&self, source: &mut S, sink: &mut M) -> Result<RemuxStats>
    where
        S: ElementaryStreamSource + ?Sized,
        M: Muxer + ?Sized,
    {
        let mapping = add_streams(source, sink)?;
        sink.write_header()?;
        let mut stats = RemuxStats {
            frames: vec![0; sink.streams().len()],
            ..Default::default()
        };
        while let Some(frame) = source.read_frame()? {
            let (from, to, out) = mapping.route(&frame, &*sink)?;
            let frame = retime(frame, from, to, out, StreamOffset::default());
            self.emit(&frame, sink, &mut stats)?;
        }
        sink.write_trailer()?;
        log::info!("copied {} frames", stats.total_frames());
        Ok(stats)
    }

    /// Same-codec concatenation. Each input after the first is shifted per
    /// stream so it starts where the previous input's last frame ended.
    pub fn concat<S, M>(&self, sources: impl IntoIterator<Item = S>, sink: &mut M) -> Result<RemuxStats>
    where
        S: ElementaryStreamSource,
        M: Muxer + ?Sized,
    {
        let mut sources = sources.into_iter();
        let mut first = sources
            .next()
            .ok_or_else(|| MuxError::Configuration("concat needs at least one input".into()))?;
        let mut mapping = add_streams(&mut first, sink)?;
        sink.write_header()?;

        let mut stats = RemuxStats {
            frames: vec![0; sink.streams().len()],
            ..Default::default()
        };
        let mut offsets = vec![StreamOffset::default(); mapping.outputs.len()];
        let mut input_number = 0;
        for mut source in std::iter::once(first).chain(sources) {
            input_number += 1;
            if input_number > 1 {
                check_same_layout(&mapping, &source, &*sink)?;
                mapping.inputs = source.streams().iter().map(|d| d.timebase).collect();
            }
            let mut ends = offsets.clone();
            while let Some(frame) = source.read_frame()? {
                let stream = frame.stream_index;
                let (from, to, out) = mapping.route(&frame, &*sink)?;
                let frame = retime(frame, from, to, out, offsets[stream]);
                ends[stream] = StreamOffset {
                    pts: frame.pts.saturating_add(frame.duration),
                    dts: frame.dts.saturating_add(frame.duration),
                };
                self.emit(&frame, sink, &mut stats)?;
            }
            log::debug!("input {} done, next offsets {:?}", input_number, ends);
            offsets = ends;
        }
        sink.write_trailer()?;
        log::info!(
            "concatenated {} inputs into {} frames",
            input_number,
            stats.total_frames()
        );
        Ok(stats)
    }

    /// Interleaves stream 0 of a video source and stream 0 of an audio source.
    /// Either side may be absent.
    pub fn merge<S, M>(&self, video: Option<S>, audio: Option<S>, sink: &mut M) -> Result<RemuxStats>
    where
        S: ElementaryStreamSource,
        M: Muxer + ?Sized,
    {
        if video.is_none() && audio.is_none() {
            return Err(MuxError::Configuration("merge needs at least one input".into()));
        }
        let mut track = |source: Option<S>, kind: MediaKind| -> Result<Option<TrackInput<S>>> {
            let Some(source) = source else {
                return Ok(None);
            };
            let descriptor = source
                .streams()
                .first()
                .cloned()
                .ok_or_else(|| MuxError::Format("input has no streams".into()))?;
            if descriptor.kind() != kind {
                return Err(MuxError::Format(format!(
                    "expected a {:?} input, found {:?}",
                    kind,
                    descriptor.kind()
                )));
            }
            let timebase = descriptor.timebase;
            let index = sink.add_stream(descriptor)?;
            Ok(Some(TrackInput::new(source, index, timebase)))
        };
        let video = track(video, MediaKind::Video)?;
        let audio = track(audio, MediaKind::Audio)?;
        sink.write_header()?;

        let mut stats = RemuxStats {
            frames: vec![0; sink.streams().len()],
            ..Default::default()
        };
        let mut scheduler = InterleavingScheduler::new(video, audio)?;
        while let Some(frame) = scheduler.next()? {
            self.emit(&frame, sink, &mut stats)?;
        }
        sink.write_trailer()?;
        log::info!("merged {} frames", stats.total_frames());
        Ok(stats)
    }

    fn emit<M: Muxer + ?Sized>(&self, frame: &Frame, sink: &mut M, stats: &mut RemuxStats) -> Result<()> {
        let is_video = sink
            .streams()
            .get(frame.stream_index)
            .map_or(false, |s| s.kind() == MediaKind::Video);
        if self.config.fragment_on_keyframe && is_video && frame.is_key && stats.total_frames() > 0 {
            sink.flush_fragment()?;
            stats.fragments += 1;
        }
        sink.write_frame(frame)?;
        stats.frames[frame.stream_index] += 1;
        Ok(())
    }
}

/// Input stream index to output stream index, for one source layout.
struct StreamMapping {
    outputs: Vec<usize>,
    inputs: Vec<Timebase>,
}

impl StreamMapping {
    fn route<M: Muxer + ?Sized>(&self, frame: &Frame, sink: &M) -> Result<(Timebase, Timebase, usize)> {
        let stream = frame.stream_index;
        let (from, out) = self
            .inputs
            .get(stream)
            .zip(self.outputs.get(stream))
            .ok_or_else(|| MuxError::Format(format!("frame for unknown stream {}", stream)))?;
        let to = sink.streams()[*out].timebase;
        Ok((*from, to, *out))
    }
}

fn add_streams<S, M>(source: &mut S, sink: &mut M) -> Result<StreamMapping>
where
    S: ElementaryStreamSource + ?Sized,
    M: Muxer + ?Sized,
{
    let mut mapping = StreamMapping {
        outputs: Vec::new(),
        inputs: Vec::new(),
    };
    for descriptor in source.streams() {
        mapping.inputs.push(descriptor.timebase);
        mapping.outputs.push(sink.add_stream(descriptor.clone())?);
    }
    Ok(mapping)
}

fn check_same_layout<S, M>(mapping: &StreamMapping, source: &S, sink: &M) -> Result<()>
where
    S: ElementaryStreamSource + ?Sized,
    M: Muxer + ?Sized,
{
    let streams = source.streams();
    if streams.len() != mapping.outputs.len() {
        return Err(MuxError::Format(format!(
            "concat input has {} streams, expected {}",
            streams.len(),
            mapping.outputs.len()
        )));
    }
    for (index, (descriptor, &out)) in streams.iter().zip(&mapping.outputs).enumerate() {
        if descriptor.codec != sink.streams()[out].codec {
            return Err(MuxError::Format(format!(
                "concat input stream {:?} does not match output {:?}",
                descriptor.codec,
                sink.streams()[out].codec
            )));
        }
        if descriptor.timebase != mapping.inputs[index] {
            log::debug!(
                "concat input stream {} changes timebase {} -> {}",
                index,
                mapping.inputs[index],
                descriptor.timebase
            );
        }
    }
    Ok(())
}

fn retime(mut frame: Frame, from: Timebase, to: Timebase, out: usize, offset: StreamOffset) -> Frame {
    frame.pts = offset.pts.saturating_add(rescale(frame.pts, from, to));
    frame.dts = offset.dts.saturating_add(rescale(frame.dts, from, to));
    frame.duration = rescale(frame.duration, from, to);
    frame.stream_index = out;
    frame
}

/// Rewrites an MP4 (progressive or fragmented) as fragmented MP4.
pub fn remux_to_fragmented(input: IoPort, output: IoPort, config: &Config) -> Result<RemuxStats> {
    let mut reader = Mp4Reader::open(input, config)?;
    let mut writer = FragmentWriter::new(output, config);
    let mut stats = Remuxer::new(config).copy(&mut reader, &mut writer)?;
    stats.fragments = writer.fragments_written();
    stats.bytes_written = writer.bytes_written();
    Ok(stats)
}

/// Concatenates same-codec MP4 inputs into one fragmented MP4.
pub fn concat_to_fragmented(
    inputs: impl IntoIterator<Item = IoPort>,
    output: IoPort,
    config: &Config,
) -> Result<RemuxStats> {
    let readers = inputs
        .into_iter()
        .map(|port| Mp4Reader::open(port, config))
        .collect::<Result<Vec<_>>>()?;
    let mut writer = FragmentWriter::new(output, config);
    let mut stats = Remuxer::new(config).concat(readers, &mut writer)?;
    stats.fragments = writer.fragments_written();
    stats.bytes_written = writer.bytes_written();
    Ok(stats)
}

/// Muxes a video MP4 and an audio MP4 into one transport stream.
pub fn mp4_to_ts(
    audio: Option<IoPort>,
    video: Option<IoPort>,
    output: IoPort,
    config: &Config,
) -> Result<RemuxStats> {
    let audio = audio.map(|port| Mp4Reader::open(port, config)).transpose()?;
    let video = video.map(|port| Mp4Reader::open(port, config)).transpose()?;
    let mut muxer = TSMuxer::with_config(output, config);
    let mut stats = Remuxer::new(config).merge(video, audio, &mut muxer)?;
    stats.bytes_written = muxer.packets_written() * crate::format::ts::TS_PACKET_SIZE as u64;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{CodecType, StreamDescriptor};
    use crate::format::tests::{TestMuxer, TestSource};
    use pretty_assertions::assert_eq;

    fn video_ms() -> StreamDescriptor {
        StreamDescriptor::video(CodecType::H264, Timebase::MILLISECONDS, 640, 480)
    }

    fn audio_ms() -> StreamDescriptor {
        StreamDescriptor::audio(CodecType::AAC, Timebase::MILLISECONDS, 48000, 2)
    }

    #[test]
    fn test_concat_offsets_second_input() {
        let a = TestSource::with_timestamps(video_ms(), &[0, 40, 1000], 40);
        let b = TestSource::with_timestamps(video_ms(), &[0, 40], 40);
        let mut sink = TestMuxer::new();
        let stats = Remuxer::new(&Config::default())
            .concat(vec![a, b], &mut sink)
            .unwrap();
        assert_eq!(sink.pts_of(0), vec![0, 40, 1000, 1040, 1080]);
        let dts: Vec<i64> = sink.frames.iter().map(|f| f.dts).collect();
        assert_eq!(dts, vec![0, 40, 1000, 1040, 1080]);
        assert_eq!(stats.frames, vec![5]);
        assert!(sink.header_written && sink.trailer_written);
    }

    #[test]
    fn test_concat_rejects_codec_mismatch() {
        let a = TestSource::with_timestamps(video_ms(), &[0], 40);
        let b = TestSource::with_timestamps(audio_ms(), &[0], 40);
        let mut sink = TestMuxer::new();
        let err = Remuxer::new(&Config::default())
            .concat(vec![a, b], &mut sink)
            .unwrap_err();
        assert!(matches!(err, MuxError::Format(_)));
    }

    #[test]
    fn test_fragment_flushed_before_each_video_keyframe() {
        let frames = vec![
            Frame::new(vec![1u8]).with_timestamp(0).with_duration(40).with_key_flag(true),
            Frame::new(vec![2u8]).with_timestamp(40).with_duration(40),
            Frame::new(vec![3u8]).with_timestamp(80).with_duration(40).with_key_flag(true),
            Frame::new(vec![4u8]).with_timestamp(120).with_duration(40),
        ];
        let mut source = TestSource::new(vec![video_ms()], frames);
        let mut sink = TestMuxer::new();
        let stats = Remuxer::new(&Config::default())
            .copy(&mut source, &mut sink)
            .unwrap();
        assert_eq!(sink.fragment_flushes, vec![2]);
        assert_eq!(stats.fragments, 1);

        let mut config = Config::default();
        config.remux.fragment_on_keyframe = false;
        let mut source = TestSource::new(vec![video_ms()], Vec::new());
        let mut sink = TestMuxer::new();
        Remuxer::new(&config).copy(&mut source, &mut sink).unwrap();
        assert!(sink.fragment_flushes.is_empty());
    }

    #[test]
    fn test_copy_rescales_into_sink_timebase() {
        struct NinetyKhzSink(TestMuxer);
        impl Muxer for NinetyKhzSink {
            fn add_stream(&mut self, mut descriptor: StreamDescriptor) -> Result<usize> {
                descriptor.timebase = Timebase::MPEG_TS;
                self.0.add_stream(descriptor)
            }
            fn streams(&self) -> &[StreamDescriptor] {
                self.0.streams()
            }
            fn write_header(&mut self) -> Result<()> {
                self.0.write_header()
            }
            fn write_frame(&mut self, frame: &Frame) -> Result<()> {
                self.0.write_frame(frame)
            }
            fn write_trailer(&mut self) -> Result<()> {
                self.0.write_trailer()
            }
        }

        let mut source = TestSource::with_timestamps(audio_ms(), &[0, 21], 21);
        let mut sink = NinetyKhzSink(TestMuxer::new());
        Remuxer::new(&Config::default())
            .copy(&mut source, &mut sink)
            .unwrap();
        assert_eq!(sink.0.pts_of(0), vec![0, 1890]);
        assert_eq!(sink.0.frames[0].duration, 1890);
    }

    #[test]
    fn test_merge_assigns_output_streams() {
        let v = TestSource::with_timestamps(video_ms(), &[0, 40], 40);
        let a = TestSource::with_timestamps(audio_ms(), &[0, 20, 40], 20);
        let mut sink = TestMuxer::new();
        let stats = Remuxer::new(&Config::default())
            .merge(Some(v), Some(a), &mut sink)
            .unwrap();
        let order: Vec<(usize, i64)> = sink.frames.iter().map(|f| (f.stream_index, f.pts)).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (1, 20), (0, 40), (1, 40)]);
        assert_eq!(stats.frames, vec![2, 3]);

        let a = TestSource::with_timestamps(audio_ms(), &[0], 20);
        let mut sink = TestMuxer::new();
        let err = Remuxer::new(&Config::default())
            .merge(Some(a), None, &mut sink)
            .unwrap_err();
        assert!(matches!(err, MuxError::Format(_)));
    }
}
