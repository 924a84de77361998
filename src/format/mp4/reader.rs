use super::boxes::{MDAT, MOOF, MOOV};
use super::parse::{parse_moof, parse_moov, read_box_header, BoxHeader, Sample, TrackDefaults};
use crate::av::{Frame, MediaKind, StreamDescriptor};
use crate::codec::h264::ParameterSetRecord;
use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::format::ElementaryStreamSource;
use crate::io::{IoPort, Whence};
use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct QueuedSample {
    stream_index: usize,
    sample: Sample,
}

#[derive(Debug)]
struct ReaderTrack {
    track_id: u32,
    timescale: u32,
    /// mdhd duration, in track ticks.
    duration: u64,
    defaults: TrackDefaults,
    /// Decode time following the last parsed sample.
    next_dts: i64,
    first_pts: Option<i64>,
    samples_seen: u64,
}

#[derive(Debug)]
enum Layout {
    Progressive {
        samples: Vec<QueuedSample>,
        cursor: usize,
        /// `mdat` payload read before `moov` on a non-seekable port,
        /// with the file offset of its first byte.
        preloaded: Option<(u64, Bytes)>,
    },
    Fragmented {
        queue: VecDeque<QueuedSample>,
        /// Where the next top-level box starts; `None` once the last box
        /// runs to end of file.
        next_box: Option<u64>,
        first_moof: Option<u64>,
        /// Highest `moof` offset parsed, so rewinds do not recount samples.
        furthest_moof: Option<u64>,
    },
}

/// Demuxes MP4 files, progressive or fragmented, from an [`IoPort`].
///
/// Only H.264 and AAC tracks are exposed; other tracks are skipped with a
/// warning. Frames come out in file order with timestamps in each track's
/// media timescale.
pub struct Mp4Reader {
    port: IoPort,
    frame_seek_ticks: i64,
    streams: Vec<StreamDescriptor>,
    tracks: Vec<ReaderTrack>,
    layout: Layout,
}

impl Mp4Reader {
    /// Reads top-level boxes until `moov` has been parsed.
    pub fn open(mut port: IoPort, config: &Config) -> Result<Self> {
        let mut preloaded = None;
        let moov = loop {
            let header = read_box_header(&mut port)?.ok_or_else(|| {
                MuxError::Format("end of stream before moov".into())
            })?;
            match header.fourcc {
                MOOV => break read_payload(&mut port, &header)?,
                MOOF => return Err(MuxError::Format("moof before moov".into())),
                MDAT if !port.is_seekable() => {
                    log::debug!(
                        "buffering mdat at offset {} ahead of moov",
                        header.offset
                    );
                    let data = read_payload(&mut port, &header)?;
                    preloaded = Some((header.offset + header.header_len, Bytes::from(data)));
                }
                _ => match header.payload_len() {
                    Some(len) => port.skip(len)?,
                    None => return Err(MuxError::Format("end of stream before moov".into())),
                },
            }
        };
        let movie = parse_moov(&moov)?;

        let mut streams = Vec::new();
        let mut tracks = Vec::new();
        let mut progressive = Vec::new();
        for track in movie.tracks {
            let Some(descriptor) = track.descriptor else {
                continue;
            };
            let stream_index = streams.len();
            progressive.extend(track.samples.iter().map(|&sample| QueuedSample {
                stream_index,
                sample,
            }));
            tracks.push(ReaderTrack {
                track_id: track.track_id,
                timescale: track.timescale,
                duration: track.duration,
                defaults: track.defaults,
                next_dts: 0,
                first_pts: track
                    .samples
                    .first()
                    .map(|s| s.dts + s.composition_offset),
                samples_seen: track.samples.len() as u64,
            });
            streams.push(descriptor);
        }
        if streams.is_empty() {
            return Err(MuxError::Format("no H.264 or AAC track".into()));
        }

        let layout = if movie.fragmented {
            Layout::Fragmented {
                queue: VecDeque::new(),
                next_box: Some(port.position()),
                first_moof: None,
                furthest_moof: None,
            }
        } else {
            progressive.sort_by_key(|q| q.sample.offset);
            Layout::Progressive {
                samples: progressive,
                cursor: 0,
                preloaded,
            }
        };
        log::debug!(
            "opened {} mp4 with {} stream(s)",
            if movie.fragmented { "fragmented" } else { "progressive" },
            streams.len()
        );

        Ok(Self {
            port,
            frame_seek_ticks: config.frame_seek_ticks,
            streams,
            tracks,
            layout,
        })
    }

    pub fn media_kind(&self) -> MediaKind {
        self.streams[0].kind()
    }

    /// SPS and PPS of the first stream, when it is H.264.
    pub fn parameter_sets(&self) -> Result<(Bytes, Bytes)> {
        let stream = &self.streams[0];
        match (stream.kind(), stream.extra_data.as_ref()) {
            (MediaKind::Video, Some(record)) => ParameterSetRecord::decode(record),
            _ => Err(MuxError::Format("first stream carries no SPS/PPS".into())),
        }
    }

    pub fn audio_specific_config(&self) -> Option<&[u8]> {
        let stream = &self.streams[0];
        if stream.kind() == MediaKind::Audio {
            stream.extra_data()
        } else {
            None
        }
    }

    /// Playback length of the first stream. For fragmented input this only
    /// covers the fragments parsed so far.
    pub fn duration_ms(&self) -> i64 {
        let track = &self.tracks[0];
        let end = match self.layout {
            Layout::Progressive { .. } if track.duration > 0 => track.duration as i64,
            Layout::Progressive { .. } => self.progressive_end(0),
            Layout::Fragmented { .. } => track.next_dts,
        };
        let start = track.first_pts.unwrap_or(0);
        (end - start).max(0).saturating_mul(1000) / track.timescale as i64
    }

    /// Frames in the first stream, or those parsed so far for fragmented input.
    pub fn num_frames(&self) -> u64 {
        self.tracks[0].samples_seen
    }

    fn progressive_end(&self, stream_index: usize) -> i64 {
        match &self.layout {
            Layout::Progressive { samples, .. } => samples
                .iter()
                .filter(|q| q.stream_index == stream_index)
                .map(|q| q.sample.dts + q.sample.duration as i64)
                .max()
                .unwrap_or(0),
            Layout::Fragmented { .. } => 0,
        }
    }

    /// Hands the next frame to `callback` as `(payload, pts, dts, duration)`.
    /// Returns `false` at end of stream.
    pub fn read_frame_with<F>(&mut self, mut callback: F) -> Result<bool>
    where
        F: FnMut(&[u8], i64, i64, i64),
    {
        match self.read_frame()? {
            Some(frame) => {
                callback(&frame.data, frame.pts, frame.dts, frame.duration);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn goto(&mut self, offset: u64) -> Result<()> {
        let position = self.port.position();
        if offset >= position {
            self.port.skip(offset - position)
        } else {
            self.port.seek(offset as i64, Whence::Start).map(|_| ())
        }
    }

    fn fetch(&mut self, queued: QueuedSample) -> Result<Frame> {
        let sample = queued.sample;
        let preloaded = match &self.layout {
            Layout::Progressive {
                preloaded: Some((start, data)),
                ..
            } if sample.offset >= *start
                && sample.offset + sample.size as u64 <= *start + data.len() as u64 =>
            {
                let from = (sample.offset - start) as usize;
                Some(data.slice(from..from + sample.size as usize))
            }
            _ => None,
        };
        let data = match preloaded {
            Some(data) => data,
            None => {
                self.goto(sample.offset)?;
                Bytes::from(self.port.read_bytes(sample.size as usize)?)
            }
        };
        log::trace!(
            "stream {} sample at {} dts={} size={}",
            queued.stream_index,
            sample.offset,
            sample.dts,
            sample.size
        );
        Ok(Frame::new(data)
            .with_dts(sample.dts)
            .with_pts(sample.dts + sample.composition_offset)
            .with_duration(sample.duration as i64)
            .with_stream_index(queued.stream_index)
            .with_key_flag(sample.is_key))
    }

    /// Parses the next `moof` and queues its samples. Returns `false` at end
    /// of stream.
    fn load_fragment(&mut self) -> Result<bool> {
        let Layout::Fragmented { next_box, .. } = &self.layout else {
            return Ok(false);
        };
        let Some(mut offset) = *next_box else {
            return Ok(false);
        };
        loop {
            self.goto(offset)?;
            let Some(header) = read_box_header(&mut self.port)? else {
                self.set_next_box(None);
                return Ok(false);
            };
            match (header.fourcc, header.end()) {
                (MOOF, Some(end)) => {
                    let payload = read_payload(&mut self.port, &header)?;
                    self.queue_fragment(&payload, &header)?;
                    self.set_next_box(Some(end));
                    self.skip_to_mdat()?;
                    return Ok(true);
                }
                (_, Some(end)) => offset = end,
                (_, None) => {
                    self.set_next_box(None);
                    return Ok(false);
                }
            }
        }
    }

    /// Moves past the boxes between a `moof` and its `mdat`, leaving the port
    /// at the first media byte.
    fn skip_to_mdat(&mut self) -> Result<()> {
        while let Layout::Fragmented {
            next_box: Some(offset),
            ..
        } = self.layout
        {
            self.goto(offset)?;
            let Some(header) = read_box_header(&mut self.port)? else {
                self.set_next_box(None);
                return Ok(());
            };
            self.set_next_box(header.end());
            if header.fourcc == MDAT || header.fourcc == MOOF {
                if header.fourcc == MOOF {
                    self.set_next_box(Some(header.offset));
                }
                return Ok(());
            }
        }
        Ok(())
    }

    fn set_next_box(&mut self, offset: Option<u64>) {
        if let Layout::Fragmented { next_box, .. } = &mut self.layout {
            *next_box = offset;
        }
    }

    fn queue_fragment(&mut self, payload: &[u8], header: &BoxHeader) -> Result<()> {
        let tracks = &self.tracks;
        let runs = parse_moof(
            payload,
            header.offset,
            |id| {
                tracks
                    .iter()
                    .find(|t| t.track_id == id)
                    .map(|t| t.defaults)
                    .unwrap_or_default()
            },
            |id| {
                tracks
                    .iter()
                    .find(|t| t.track_id == id)
                    .map_or(0, |t| t.next_dts)
            },
        )?;
        let Layout::Fragmented {
            queue,
            first_moof,
            furthest_moof,
            ..
        } = &mut self.layout
        else {
            return Ok(());
        };
        let first_visit = furthest_moof.map_or(true, |f| header.offset > f);
        if first_visit {
            *furthest_moof = Some(header.offset);
        }
        first_moof.get_or_insert(header.offset);

        let mut added = Vec::new();
        for run in runs {
            let Some(stream_index) = self.tracks.iter().position(|t| t.track_id == run.track_id)
            else {
                continue;
            };
            let track = &mut self.tracks[stream_index];
            if let Some(last) = run.samples.last() {
                track.next_dts = last.dts + last.duration as i64;
            }
            if first_visit {
                track.samples_seen += run.samples.len() as u64;
                if track.first_pts.is_none() {
                    track.first_pts = run.samples.first().map(|s| s.dts + s.composition_offset);
                }
            }
            added.extend(run.samples.into_iter().map(|sample| QueuedSample {
                stream_index,
                sample,
            }));
        }
        added.sort_by_key(|q| q.sample.offset);
        log::debug!(
            "queued {} sample(s) from moof at {}",
            added.len(),
            header.offset
        );
        queue.extend(added);
        Ok(())
    }

    fn seek_progressive(&mut self, target: i64) {
        if let Layout::Progressive {
            samples, cursor, ..
        } = &mut self.layout
        {
            let is_stream0 = |q: &QueuedSample| q.stream_index == 0;
            *cursor = samples
                .iter()
                .rposition(|q| is_stream0(q) && q.sample.dts <= target)
                .or_else(|| samples.iter().position(is_stream0))
                .unwrap_or(0);
        }
    }

    fn seek_fragmented(&mut self, target: i64) -> Result<()> {
        let seekable = self.port.is_seekable();
        if let Layout::Fragmented {
            queue,
            next_box,
            first_moof,
            ..
        } = &mut self.layout
        {
            if seekable {
                if let Some(first) = *first_moof {
                    queue.clear();
                    *next_box = Some(first);
                    for track in &mut self.tracks {
                        track.next_dts = 0;
                    }
                }
            } else {
                let current = queue
                    .iter()
                    .find(|q| q.stream_index == 0)
                    .map_or(self.tracks[0].next_dts, |q| q.sample.dts);
                if target < current {
                    return Err(MuxError::Io(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "backward seek in fragmented input needs a seekable port",
                    )));
                }
            }
        }

        loop {
            let Layout::Fragmented { queue, .. } = &mut self.layout else {
                return Ok(());
            };
            let at_or_before = queue
                .iter()
                .rposition(|q| q.stream_index == 0 && q.sample.dts <= target);
            if let Some(p) = at_or_before {
                queue.drain(..p);
            }
            if queue.iter().any(|q| q.stream_index == 0 && q.sample.dts > target) {
                return Ok(());
            }
            if !seekable {
                if at_or_before.is_some() {
                    return Ok(());
                }
                queue.clear();
            }
            if !self.load_fragment()? {
                return Ok(());
            }
        }
    }
}

fn read_payload(port: &mut IoPort, header: &BoxHeader) -> Result<Vec<u8>> {
    match header.payload_len() {
        Some(len) => {
            let len = usize::try_from(len).map_err(|_| {
                MuxError::Format(format!("{} byte box does not fit in memory", len))
            })?;
            port.read_bytes(len)
        }
        None => {
            let mut out = Vec::new();
            let mut chunk = vec![0u8; port.buffer_size()];
            loop {
                let n = port.read(&mut chunk)?;
                if n == 0 {
                    return Ok(out);
                }
                out.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

impl ElementaryStreamSource for Mp4Reader {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let next = match &mut self.layout {
                Layout::Progressive {
                    samples, cursor, ..
                } => match samples.get(*cursor) {
                    Some(q) => {
                        *cursor += 1;
                        Some(*q)
                    }
                    None => return Ok(None),
                },
                Layout::Fragmented { queue, .. } => queue.pop_front(),
            };
            match next {
                Some(queued) => return self.fetch(queued).map(Some),
                None => {
                    if !self.load_fragment()? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Positions at the last frame of stream 0 whose dts is at or before
    /// `index * frame_seek_ticks`.
    fn seek_to_frame(&mut self, index: u64) -> Result<()> {
        let target = (index as i64).saturating_mul(self.frame_seek_ticks);
        log::debug!("seeking to frame {} (dts {})", index, target);
        match self.layout {
            Layout::Progressive { .. } => {
                self.seek_progressive(target);
                Ok(())
            }
            Layout::Fragmented { .. } => self.seek_fragmented(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{CodecType, Timebase};
    use crate::format::mp4::boxes::*;
    use crate::format::mp4::FragmentWriter;
    use crate::io::MemoryBuffer;
    use bytes::{BufMut, BytesMut};
    use pretty_assertions::assert_eq;

    fn fragmented_audio(fragments: &[&[i64]]) -> Vec<u8> {
        let sink = MemoryBuffer::new();
        let mut config = Config::default();
        config.fragment.creation_time = Some(0);
        let mut w = FragmentWriter::new(IoPort::new(sink.clone()), &config);
        w.add_audio_stream(44100, 0).unwrap();
        w.write_header().unwrap();
        for pts in fragments {
            for &pts in *pts {
                w.write_audio_packet(&[pts as u8; 3], pts).unwrap();
            }
            w.flush_fragment().unwrap();
        }
        w.finalize().unwrap();
        sink.to_vec()
    }

    /// Progressive audio file with `mdat` placed before or after `moov`.
    fn progressive_audio(payloads: &[&[u8]], mdat_first: bool) -> Vec<u8> {
        let mut ftyp = BytesMut::new();
        write_box(&mut ftyp, FTYP, |buf| buf.put_slice(b"isom\0\0\0\0"));
        let mut mdat = BytesMut::new();
        write_box(&mut mdat, MDAT, |buf| {
            for p in payloads {
                buf.put_slice(p);
            }
        });
        let build_moov = |chunk_offset: u32| {
            let mut moov = BytesMut::new();
            write_box(&mut moov, MOOV, |buf| {
                write_full_box(buf, MVHD, 0, 0, |buf| {
                    buf.put_slice(&[0; 8]);
                    buf.put_u32(1000);
                    buf.put_u32(0);
                    buf.put_slice(&[0; 80]);
                });
                write_box(buf, TRAK, |buf| {
                    write_full_box(buf, TKHD, 0, 3, |buf| {
                        buf.put_slice(&[0; 8]);
                        buf.put_u32(1);
                        buf.put_slice(&[0; 68]);
                    });
                    write_box(buf, MDIA, |buf| {
                        write_full_box(buf, MDHD, 0, 0, |buf| {
                            buf.put_slice(&[0; 8]);
                            buf.put_u32(44100);
                            buf.put_u32(1024 * payloads.len() as u32);
                            buf.put_u32(0);
                        });
                        write_box(buf, MINF, |buf| {
                            write_box(buf, STBL, |buf| {
                                write_full_box(buf, STSD, 0, 0, |buf| {
                                    buf.put_u32(1);
                                    write_box(buf, MP4A, |buf| {
                                        buf.put_slice(&[0; 6]);
                                        buf.put_u16(1);
                                        buf.put_slice(&[0; 8]);
                                        buf.put_u16(2);
                                        buf.put_u16(16);
                                        buf.put_u32(0);
                                        buf.put_u32(44100 << 16);
                                    });
                                });
                                write_full_box(buf, STTS, 0, 0, |buf| {
                                    buf.put_u32(1);
                                    buf.put_u32(payloads.len() as u32);
                                    buf.put_u32(1024);
                                });
                                write_full_box(buf, STSC, 0, 0, |buf| {
                                    buf.put_u32(1);
                                    buf.put_u32(1);
                                    buf.put_u32(payloads.len() as u32);
                                    buf.put_u32(1);
                                });
                                write_full_box(buf, STSZ, 0, 0, |buf| {
                                    buf.put_u32(0);
                                    buf.put_u32(payloads.len() as u32);
                                    for p in payloads {
                                        buf.put_u32(p.len() as u32);
                                    }
                                });
                                write_full_box(buf, STCO, 0, 0, |buf| {
                                    buf.put_u32(1);
                                    buf.put_u32(chunk_offset);
                                });
                            });
                        });
                    });
                });
            });
            moov
        };

        let mut out = ftyp.to_vec();
        if mdat_first {
            let offset = out.len() as u32 + 8;
            out.extend_from_slice(&mdat);
            out.extend_from_slice(&build_moov(offset));
        } else {
            let moov_len = build_moov(0).len();
            let offset = (out.len() + moov_len + 8) as u32;
            out.extend_from_slice(&build_moov(offset));
            out.extend_from_slice(&mdat);
        }
        out
    }

    fn read_all(reader: &mut Mp4Reader) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = reader.read_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_reads_fragmented_output() {
        let data = fragmented_audio(&[&[0, 1024], &[2048]]);
        let port = IoPort::new(MemoryBuffer::from_bytes(data).streaming());
        let mut reader = Mp4Reader::open(port, &Config::default()).unwrap();
        assert_eq!(reader.media_kind(), MediaKind::Audio);
        assert_eq!(reader.streams()[0].timebase, Timebase::new(1, 44100));
        assert_eq!(reader.audio_specific_config(), Some(&[0x12, 0x08][..]));
        assert!(reader.parameter_sets().is_err());

        let frames = read_all(&mut reader);
        let dts: Vec<i64> = frames.iter().map(|f| f.dts).collect();
        assert_eq!(dts, vec![0, 1024, 2048]);
        assert_eq!(frames[1].data.as_ref(), &[0, 0, 0]);
        assert_eq!(frames[2].data.as_ref(), &[0, 0, 0]);
        assert!(frames.iter().all(|f| f.is_key && f.duration == 1024));
        assert_eq!(reader.num_frames(), 3);
        assert_eq!(reader.duration_ms(), 3072 * 1000 / 44100);
    }

    #[test]
    fn test_progressive_with_moov_first_and_mdat_first() {
        let payloads: [&[u8]; 3] = [&[1, 1], &[2, 2, 2], &[3]];
        for mdat_first in [false, true] {
            let data = progressive_audio(&payloads, mdat_first);
            let port = IoPort::new(MemoryBuffer::from_bytes(data).streaming());
            let mut reader = Mp4Reader::open(port, &Config::default()).unwrap();
            assert_eq!(reader.num_frames(), 3);
            assert_eq!(reader.streams()[0].sample_rate(), Some(44100));
            let frames = read_all(&mut reader);
            let data: Vec<&[u8]> = frames.iter().map(|f| f.data.as_ref()).collect();
            assert_eq!(data, payloads.to_vec());
            assert_eq!(frames[2].pts, 2048);
            assert_eq!(reader.duration_ms(), 3072 * 1000 / 44100);
        }
    }

    #[test]
    fn test_read_frame_with_callback() {
        let data = progressive_audio(&[&[9, 9]], false);
        let mut reader =
            Mp4Reader::open(IoPort::new(MemoryBuffer::from_bytes(data)), &Config::default())
                .unwrap();
        let mut seen = Vec::new();
        while reader
            .read_frame_with(|payload, pts, dts, duration| {
                seen.push((payload.to_vec(), pts, dts, duration))
            })
            .unwrap()
        {}
        assert_eq!(seen, vec![(vec![9, 9], 0, 0, 1024)]);
    }

    #[test]
    fn test_seek_progressive_lands_on_last_frame_at_or_before_target() {
        let data = progressive_audio(&[&[0], &[1], &[2], &[3]], false);
        let mut config = Config::default();
        config.frame_seek_ticks = 1000;
        let mut reader =
            Mp4Reader::open(IoPort::new(MemoryBuffer::from_bytes(data)), &config).unwrap();
        read_all(&mut reader);
        reader.seek_to_frame(2).unwrap();
        // dts 2000 falls between samples at 1024 and 2048.
        assert_eq!(reader.read_frame().unwrap().unwrap().dts, 1024);
        reader.seek_to_frame(0).unwrap();
        assert_eq!(reader.read_frame().unwrap().unwrap().data.as_ref(), &[0]);
    }

    #[test]
    fn test_seek_fragmented_rewinds_on_seekable_port() {
        let data = fragmented_audio(&[&[0, 1024], &[2048, 3072]]);
        let mut config = Config::default();
        config.frame_seek_ticks = 2048;
        let mut reader =
            Mp4Reader::open(IoPort::new(MemoryBuffer::from_bytes(data)), &config).unwrap();
        assert_eq!(read_all(&mut reader).len(), 4);

        reader.seek_to_frame(1).unwrap();
        let rest: Vec<i64> = read_all(&mut reader).iter().map(|f| f.dts).collect();
        assert_eq!(rest, vec![2048, 3072]);
        reader.seek_to_frame(0).unwrap();
        assert_eq!(read_all(&mut reader).len(), 4);
        assert_eq!(reader.num_frames(), 4);
    }

    #[test]
    fn test_seek_fragmented_backwards_needs_seekable_port() {
        let data = fragmented_audio(&[&[0, 1024], &[2048]]);
        let port = IoPort::new(MemoryBuffer::from_bytes(data).streaming());
        let mut reader = Mp4Reader::open(port, &Config::default()).unwrap();
        read_all(&mut reader);
        assert!(matches!(reader.seek_to_frame(0), Err(MuxError::Io(_))));
    }

    #[test]
    fn test_missing_moov_is_format_error() {
        let mut data = BytesMut::new();
        write_box(&mut data, FTYP, |buf| buf.put_slice(b"isom"));
        let port = IoPort::new(MemoryBuffer::from_bytes(data.to_vec()));
        assert!(matches!(
            Mp4Reader::open(port, &Config::default()),
            Err(MuxError::Format(_))
        ));
    }

    #[test]
    fn test_oversized_moov_is_format_error() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&(1u64 << 62).to_be_bytes());
        data.extend_from_slice(&[0; 16]);
        for port in [
            IoPort::new(MemoryBuffer::from_bytes(data.clone())),
            IoPort::new(MemoryBuffer::from_bytes(data).streaming()),
        ] {
            assert!(matches!(
                Mp4Reader::open(port, &Config::default()),
                Err(MuxError::Format(_))
            ));
        }
    }

    #[test]
    fn test_video_parameter_sets_survive_round_trip() {
        use crate::codec::h264::parser::test_data::baseline_sps;
        let sink = MemoryBuffer::new();
        let mut w = FragmentWriter::new(IoPort::new(sink.clone()), &Config::default());
        let video = StreamDescriptor::video(CodecType::H264, Timebase::new(1, 90000), 0, 0);
        w.add_stream(video).unwrap();
        w.set_parameter_sets(&baseline_sps(40, 30), &[0x68, 0xEE]).unwrap();
        w.write_header().unwrap();
        w.finalize().unwrap();

        let reader =
            Mp4Reader::open(IoPort::new(MemoryBuffer::from_bytes(sink.to_vec())), &Config::default())
                .unwrap();
        let (sps, pps) = reader.parameter_sets().unwrap();
        assert_eq!(sps.as_ref(), &baseline_sps(40, 30)[..]);
        assert_eq!(pps.as_ref(), &[0x68, 0xEE]);
        assert_eq!(reader.streams()[0].width(), Some(640));
        assert_eq!(reader.num_frames(), 0);
    }
}
