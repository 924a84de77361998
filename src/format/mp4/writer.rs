use super::boxes::*;
use crate::av::{CodecParameters, CodecType, Frame, MediaKind, StreamDescriptor, Timebase};
use crate::codec::aac::{AudioSpecificConfig, SAMPLES_PER_FRAME};
use crate::codec::h264::{parse_sps, H264Parser, ParameterSetRecord};
use crate::config::{Config, FragmentConfig};
use crate::error::{MuxError, Result};
use crate::format::Muxer;
use crate::io::{IoPort, Transport};
use bytes::{BufMut, Bytes, BytesMut};

/// Video clock used by [`FragmentWriter::add_video_stream`].
pub const DEFAULT_VIDEO_TIMEBASE: Timebase = Timebase::new(1, 19200);
/// Audio clock used by [`FragmentWriter::add_audio_stream`].
pub const DEFAULT_AUDIO_TIMEBASE: Timebase = Timebase::new(1, 44100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Created,
    Configured,
    HeaderWritten,
    Writing,
    Finalized,
    Closed,
    /// The header could not be written; nothing else is accepted.
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct PendingSample {
    dts: i64,
    duration: i64,
    size: u32,
    composition_offset: i64,
    is_key: bool,
}

#[derive(Debug, Clone, Copy)]
struct RandomAccessPoint {
    time: u64,
    moof_offset: u64,
    traf_number: u8,
    sample_number: u32,
}

#[derive(Debug)]
struct Track {
    track_id: u32,
    /// Multiplier from stream ticks to media ticks (`timebase.num`).
    tick_scale: i64,
    pending: Vec<PendingSample>,
    data: BytesMut,
    last_duration: i64,
    random_access: Vec<RandomAccessPoint>,
}

impl Track {
    fn scale(&self, ticks: i64, what: &str) -> Result<i64> {
        ticks.checked_mul(self.tick_scale).ok_or_else(|| {
            MuxError::Format(format!(
                "{} {} overflows track {} media clock",
                what, ticks, self.track_id
            ))
        })
    }

    /// Fills in zero durations from the next sample's dts, falling back to the
    /// previous duration for the last sample.
    fn resolve_durations(&mut self) -> Result<()> {
        for i in 0..self.pending.len() {
            if self.pending[i].duration <= 0 {
                self.pending[i].duration = match self.pending.get(i + 1) {
                    Some(next) => next.dts - self.pending[i].dts,
                    None => self.last_duration,
                };
            }
            let duration = self.pending[i].duration;
            if !(0..=u32::MAX as i64).contains(&duration) {
                return Err(MuxError::Format(format!(
                    "sample duration {} on track {} is out of range",
                    duration, self.track_id
                )));
            }
            self.last_duration = duration;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.data.clear();
    }
}

/// Incremental fragmented MP4 writer.
///
/// Emits an init segment (`ftyp` + `moov` with empty sample tables) followed
/// by self-contained `moof` + `mdat` fragments. Nothing is ever rewritten, so
/// the output can go straight to a socket. Fragment boundaries are chosen by
/// the caller through [`flush_fragment`](Self::flush_fragment).
pub struct FragmentWriter {
    port: IoPort,
    config: FragmentConfig,
    state: WriterState,
    streams: Vec<StreamDescriptor>,
    tracks: Vec<Track>,
    sequence_number: u32,
    fragments_written: u64,
}

impl FragmentWriter {
    /// Writer in the `Created` state. Nothing is written until
    /// [`FragmentWriter::write_header`].
    pub fn new(port: IoPort, config: &Config) -> Self {
        Self {
            port,
            config: config.fragment.clone(),
            state: WriterState::Created,
            streams: Vec::new(),
            tracks: Vec::new(),
            sequence_number: 0,
            fragments_written: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn fragments_written(&self) -> u64 {
        self.fragments_written
    }

    /// Bytes handed to the port so far, staged bytes included.
    pub fn bytes_written(&self) -> u64 {
        self.port.position()
    }

    fn expect_state(&self, operation: &'static str, allowed: &[WriterState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MuxError::state(operation, self.state))
        }
    }

    /// Registers a track and returns its index. At most one video and one
    /// audio track; only allowed before the header.
    pub fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize> {
        self.expect_state("add_stream", &[WriterState::Created, WriterState::Configured])?;
        let timebase = descriptor.timebase;
        if !timebase.is_valid() || timebase.den > u32::MAX as i64 {
            return Err(MuxError::Configuration(format!(
                "timebase {} cannot be an MP4 timescale",
                timebase
            )));
        }
        if descriptor.codec.media_kind() != descriptor.kind() {
            return Err(MuxError::Format("codec and parameters disagree".into()));
        }
        if self.streams.len() >= 2 {
            return Err(MuxError::Format(
                "at most one video and one audio stream per output".into(),
            ));
        }
        if self.streams.iter().any(|s| s.kind() == descriptor.kind()) {
            return Err(MuxError::Format(format!(
                "a {:?} stream was already added",
                descriptor.kind()
            )));
        }

        let index = self.streams.len();
        log::debug!(
            "adding {:?} stream {} with timebase {}",
            descriptor.codec,
            index,
            timebase
        );
        self.tracks.push(Track {
            track_id: index as u32 + 1,
            tick_scale: timebase.num,
            pending: Vec::new(),
            data: BytesMut::new(),
            last_duration: 0,
            random_access: Vec::new(),
        });
        self.streams.push(descriptor);
        self.state = WriterState::Configured;
        Ok(index)
    }

    /// H.264 High profile stream in a 1/19200 clock.
    pub fn add_video_stream(&mut self, width: u32, height: u32, bitrate: u32) -> Result<usize> {
        let descriptor =
            StreamDescriptor::video(CodecType::H264, DEFAULT_VIDEO_TIMEBASE, width, height)
                .with_bitrate(bitrate);
        self.add_stream(descriptor)
    }

    /// Mono AAC stream in a 1/44100 clock.
    pub fn add_audio_stream(&mut self, sample_rate: u32, bitrate: u32) -> Result<usize> {
        let descriptor =
            StreamDescriptor::audio(CodecType::AAC, DEFAULT_AUDIO_TIMEBASE, sample_rate, 1)
                .with_bitrate(bitrate);
        self.add_stream(descriptor)
    }

    /// Attaches SPS/PPS to the video stream as a [`ParameterSetRecord`].
    pub fn set_parameter_sets(&mut self, sps: &[u8], pps: &[u8]) -> Result<()> {
        self.expect_state(
            "set_parameter_sets",
            &[WriterState::Created, WriterState::Configured],
        )?;
        let record = ParameterSetRecord::encode(sps, pps)?;
        let index = self
            .stream_of_kind(MediaKind::Video)
            .ok_or_else(|| MuxError::Format("no video stream to attach SPS/PPS to".into()))?;
        let stream = &mut self.streams[index];
        if let CodecParameters::Video {
            width,
            height,
            profile,
            ..
        } = &mut stream.params
        {
            *profile = sps[1];
            if *width == 0 || *height == 0 {
                let rbsp = H264Parser::new().remove_emulation_prevention(&sps[1..]);
                if let Ok(info) = parse_sps(&rbsp) {
                    *width = info.width;
                    *height = info.height;
                }
            }
        }
        stream.extra_data = Some(record);
        Ok(())
    }

    fn stream_of_kind(&self, kind: MediaKind) -> Option<usize> {
        self.streams.iter().position(|s| s.kind() == kind)
    }

    /// Writes `ftyp` and `moov`. A failure here leaves the writer in the
    /// `Failed` state.
    pub fn write_header(&mut self) -> Result<()> {
        self.expect_state("write_header", &[WriterState::Configured])?;
        match self.emit_init_segment() {
            Ok(()) => {
                self.state = WriterState::HeaderWritten;
                log::info!(
                    "wrote init segment for {} stream(s), {} bytes",
                    self.streams.len(),
                    self.port.position()
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("init segment failed: {}", e);
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }

    fn emit_init_segment(&mut self) -> Result<()> {
        for stream in &mut self.streams {
            match stream.codec {
                CodecType::H264 => {
                    let record = stream.extra_data.as_ref().ok_or_else(|| {
                        MuxError::Format("H.264 stream has no parameter-set record".into())
                    })?;
                    ParameterSetRecord::decode(record)?;
                }
                CodecType::AAC => {
                    if stream.extra_data.is_none() {
                        let (rate, channels) = match stream.params {
                            CodecParameters::Audio {
                                sample_rate,
                                channels,
                                ..
                            } => (sample_rate, channels),
                            CodecParameters::Video { .. } => (0, 0),
                        };
                        stream.extra_data =
                            Some(AudioSpecificConfig::new(rate, channels)?.to_bytes());
                    }
                }
            }
        }

        let creation = self
            .config
            .creation_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
            .saturating_add(MP4_EPOCH_OFFSET)
            .clamp(0, u32::MAX as i64) as u32;

        let mut buf = BytesMut::with_capacity(1024);
        self.write_ftyp(&mut buf);
        write_box(&mut buf, MOOV, |buf| {
            write_full_box(buf, MVHD, 0, 0, |buf| {
                buf.put_u32(creation);
                buf.put_u32(creation);
                buf.put_u32(1000);
                buf.put_u32(0); // duration unknown while streaming
                buf.put_u32(0x0001_0000); // rate 1.0
                buf.put_u16(0x0100); // volume 1.0
                buf.put_slice(&[0; 10]);
                put_matrix(buf);
                buf.put_slice(&[0; 24]);
                buf.put_u32(self.streams.len() as u32 + 1);
            });
            for (stream, track) in self.streams.iter().zip(&self.tracks) {
                write_trak(buf, stream, track.track_id, creation);
            }
            write_box(buf, MVEX, |buf| {
                for track in &self.tracks {
                    write_full_box(buf, TREX, 0, 0, |buf| {
                        buf.put_u32(track.track_id);
                        buf.put_u32(1);
                        buf.put_u32(0);
                        buf.put_u32(0);
                        buf.put_u32(0);
                    });
                }
            });
        });

        self.port.write_all(&buf)?;
        self.port.flush()
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        let major = self.config.major_brand;
        let has_video = self.stream_of_kind(MediaKind::Video).is_some();
        write_box(buf, FTYP, |buf| {
            buf.put_slice(&major);
            buf.put_u32(0x200);
            let mut brands: Vec<FourCc> = vec![major, *b"iso5", *b"iso6", *b"mp41"];
            if has_video {
                brands.push(*b"avc1");
            }
            brands.dedup();
            for brand in brands {
                buf.put_slice(&brand);
            }
        });
    }

    /// Buffers one frame for the open fragment. Timestamps are in the
    /// stream's own timebase.
    pub fn write_frame(&mut self, stream_index: usize, frame: &Frame) -> Result<()> {
        self.expect_state(
            "write_frame",
            &[WriterState::HeaderWritten, WriterState::Writing],
        )?;
        let track = self.tracks.get_mut(stream_index).ok_or_else(|| {
            MuxError::Format(format!("unknown stream index {}", stream_index))
        })?;
        if frame.dts < 0 {
            return Err(MuxError::Format(format!(
                "negative decode timestamp {} on stream {}",
                frame.dts, stream_index
            )));
        }
        let size = u32::try_from(frame.data.len())
            .map_err(|_| MuxError::Format("sample larger than 4 GiB".into()))?;
        let dts = track.scale(frame.dts, "dts")?;
        let duration = track.scale(frame.duration, "duration")?;
        let composition_offset = frame.composition_offset().ok_or_else(|| {
            MuxError::Format(format!(
                "pts {} and dts {} on stream {} are too far apart",
                frame.pts, frame.dts, stream_index
            ))
        })?;
        let composition_offset = track.scale(composition_offset, "composition offset")?;
        if i32::try_from(composition_offset).is_err() {
            return Err(MuxError::Format(format!(
                "composition offset {} does not fit a trun entry",
                composition_offset
            )));
        }

        log::trace!(
            "stream {} frame dts={} pts={} size={} key={}",
            stream_index,
            frame.dts,
            frame.pts,
            size,
            frame.is_key
        );
        track.data.put_slice(&frame.data);
        track.pending.push(PendingSample {
            dts,
            duration,
            size,
            composition_offset,
            is_key: frame.is_key,
        });
        self.state = WriterState::Writing;
        Ok(())
    }

    pub fn write_video_frame(
        &mut self,
        buf: &[u8],
        pts: i64,
        dts: i64,
        duration: i64,
        is_key: bool,
    ) -> Result<()> {
        let index = self
            .stream_of_kind(MediaKind::Video)
            .ok_or_else(|| MuxError::Format("no video stream".into()))?;
        let frame = Frame::new(Bytes::copy_from_slice(buf))
            .with_pts(pts)
            .with_dts(dts)
            .with_duration(duration)
            .with_stream_index(index)
            .with_key_flag(is_key);
        self.write_frame(index, &frame)
    }

    /// Raw AAC access unit; always a sync sample lasting 1024 ticks.
    pub fn write_audio_packet(&mut self, buf: &[u8], pts: i64) -> Result<()> {
        let index = self
            .stream_of_kind(MediaKind::Audio)
            .ok_or_else(|| MuxError::Format("no audio stream".into()))?;
        let frame = Frame::new(Bytes::copy_from_slice(buf))
            .with_timestamp(pts)
            .with_duration(SAMPLES_PER_FRAME)
            .with_stream_index(index)
            .with_key_flag(true);
        self.write_frame(index, &frame)
    }

    /// Seals the open fragment and emits it. Does nothing when no frame is
    /// buffered.
    pub fn flush_fragment(&mut self) -> Result<()> {
        self.expect_state(
            "flush_fragment",
            &[WriterState::HeaderWritten, WriterState::Writing],
        )?;
        if self.tracks.iter().all(|t| t.pending.is_empty()) {
            return Ok(());
        }
        let result = self.emit_fragment();
        for track in &mut self.tracks {
            track.clear();
        }
        result
    }

    fn emit_fragment(&mut self) -> Result<()> {
        for track in &mut self.tracks {
            track.resolve_durations()?;
        }
        let sequence_number = self.sequence_number + 1;
        let moof_offset = self.port.position();
        let data_len: usize = self.tracks.iter().map(|t| t.data.len()).sum();
        let mdat_header_len: usize = if data_len + 8 > u32::MAX as usize { 16 } else { 8 };

        let mut moof = BytesMut::with_capacity(256);
        let mut offset_fields = Vec::new();
        let mut random_access = Vec::new();
        write_box(&mut moof, MOOF, |buf| {
            write_full_box(buf, MFHD, 0, 0, |buf| buf.put_u32(sequence_number));
            let mut traf_number = 0u8;
            for (index, track) in self.tracks.iter().enumerate() {
                if track.pending.is_empty() {
                    continue;
                }
                traf_number += 1;
                write_box(buf, TRAF, |buf| {
                    write_full_box(buf, TFHD, 0, tfhd_flags::DEFAULT_BASE_IS_MOOF, |buf| {
                        buf.put_u32(track.track_id)
                    });
                    write_full_box(buf, TFDT, 1, 0, |buf| {
                        buf.put_u64(track.pending[0].dts as u64)
                    });
                    let flags = trun_flags::DATA_OFFSET
                        | trun_flags::SAMPLE_DURATION
                        | trun_flags::SAMPLE_SIZE
                        | trun_flags::SAMPLE_FLAGS
                        | trun_flags::SAMPLE_COMPOSITION_OFFSET;
                    write_full_box(buf, TRUN, 1, flags, |buf| {
                        buf.put_u32(track.pending.len() as u32);
                        offset_fields.push((index, buf.len()));
                        buf.put_u32(0);
                        for sample in &track.pending {
                            buf.put_u32(sample.duration as u32);
                            buf.put_u32(sample.size);
                            buf.put_u32(if sample.is_key {
                                SAMPLE_FLAGS_SYNC
                            } else {
                                SAMPLE_FLAGS_NON_SYNC
                            });
                            buf.put_i32(sample.composition_offset as i32);
                        }
                    });
                });
                if let Some(pos) = track.pending.iter().position(|s| s.is_key) {
                    random_access.push((
                        index,
                        RandomAccessPoint {
                            time: track.pending[pos].dts as u64,
                            moof_offset,
                            traf_number,
                            sample_number: pos as u32 + 1,
                        },
                    ));
                }
            }
        });

        // Data offsets are relative to the first byte of the moof.
        let mut data_start = moof.len() + mdat_header_len;
        for (index, field) in offset_fields {
            let offset = u32::try_from(data_start)
                .map_err(|_| MuxError::Format("fragment too large for trun data offset".into()))?;
            moof[field..field + 4].copy_from_slice(&offset.to_be_bytes());
            data_start += self.tracks[index].data.len();
        }

        self.port.write_all(&moof)?;
        if mdat_header_len == 16 {
            self.port.write_all(&1u32.to_be_bytes())?;
            self.port.write_all(&MDAT)?;
            self.port.write_all(&((data_len + 16) as u64).to_be_bytes())?;
        } else {
            self.port.write_all(&((data_len + 8) as u32).to_be_bytes())?;
            self.port.write_all(&MDAT)?;
        }
        for track in &self.tracks {
            self.port.write_all(&track.data)?;
        }
        self.port.flush()?;

        for (index, point) in random_access {
            self.tracks[index].random_access.push(point);
        }
        self.sequence_number = sequence_number;
        self.fragments_written += 1;
        log::debug!(
            "emitted fragment {} at offset {}: {} bytes of media",
            sequence_number,
            moof_offset,
            data_len
        );
        Ok(())
    }

    /// Emits the open fragment, plus an `mfra` index when configured.
    pub fn finalize(&mut self) -> Result<()> {
        self.expect_state(
            "finalize",
            &[WriterState::HeaderWritten, WriterState::Writing],
        )?;
        self.flush_fragment()?;
        if self.config.write_random_access_index {
            let mfra = self.build_mfra();
            self.port.write_all(&mfra)?;
        }
        self.port.flush()?;
        self.state = WriterState::Finalized;
        log::info!(
            "finalized after {} fragment(s), {} bytes",
            self.fragments_written,
            self.port.position()
        );
        Ok(())
    }

    fn build_mfra(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        write_box(&mut buf, MFRA, |buf| {
            for track in &self.tracks {
                write_full_box(buf, TFRA, 1, 0, |buf| {
                    buf.put_u32(track.track_id);
                    // 1-byte traf and trun numbers, 4-byte sample numbers
                    buf.put_u32(0b00_00_11);
                    buf.put_u32(track.random_access.len() as u32);
                    for point in &track.random_access {
                        buf.put_u64(point.time);
                        buf.put_u64(point.moof_offset);
                        buf.put_u8(point.traf_number);
                        buf.put_u8(1);
                        buf.put_u32(point.sample_number);
                    }
                });
            }
            write_full_box(buf, MFRO, 0, 0, |buf| buf.put_u32(0));
        });
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&(len as u32).to_be_bytes());
        buf
    }

    /// Releases the transport. Fragments already emitted stay valid; an open
    /// fragment on a writer that was never finalized is dropped.
    pub fn close(mut self) -> Result<Box<dyn Transport>> {
        if self.tracks.iter().any(|t| !t.pending.is_empty()) {
            log::debug!("dropping unflushed fragment on close");
        }
        self.state = WriterState::Closed;
        log::debug!("writer {:?}", self.state);
        self.port.into_transport()
    }
}

fn write_trak(buf: &mut BytesMut, stream: &StreamDescriptor, track_id: u32, creation: u32) {
    let is_video = stream.kind() == MediaKind::Video;
    let (width, height) = (stream.width().unwrap_or(0), stream.height().unwrap_or(0));
    write_box(buf, TRAK, |buf| {
        write_full_box(buf, TKHD, 0, 0x000003, |buf| {
            buf.put_u32(creation);
            buf.put_u32(creation);
            buf.put_u32(track_id);
            buf.put_u32(0);
            buf.put_u32(0); // duration
            buf.put_slice(&[0; 8]);
            buf.put_u16(0); // layer
            buf.put_u16(0); // alternate group
            buf.put_u16(if is_video { 0 } else { 0x0100 });
            buf.put_u16(0);
            put_matrix(buf);
            buf.put_u32(width << 16);
            buf.put_u32(height << 16);
        });
        write_box(buf, MDIA, |buf| {
            write_full_box(buf, MDHD, 0, 0, |buf| {
                buf.put_u32(creation);
                buf.put_u32(creation);
                buf.put_u32(stream.timebase.den as u32);
                buf.put_u32(0);
                buf.put_u16(LANGUAGE_UND);
                buf.put_u16(0);
            });
            write_full_box(buf, HDLR, 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_slice(if is_video { b"vide" } else { b"soun" });
                buf.put_slice(&[0; 12]);
                buf.put_slice(if is_video {
                    b"VideoHandler\0"
                } else {
                    b"SoundHandler\0"
                });
            });
            write_box(buf, MINF, |buf| {
                if is_video {
                    write_full_box(buf, VMHD, 0, 1, |buf| buf.put_slice(&[0; 8]));
                } else {
                    write_full_box(buf, SMHD, 0, 0, |buf| buf.put_u32(0));
                }
                write_box(buf, DINF, |buf| {
                    write_full_box(buf, DREF, 0, 0, |buf| {
                        buf.put_u32(1);
                        write_full_box(buf, URL, 0, 1, |_| {});
                    });
                });
                write_box(buf, STBL, |buf| {
                    write_full_box(buf, STSD, 0, 0, |buf| {
                        buf.put_u32(1);
                        write_sample_entry(buf, stream, track_id);
                    });
                    write_full_box(buf, STTS, 0, 0, |buf| buf.put_u32(0));
                    write_full_box(buf, STSC, 0, 0, |buf| buf.put_u32(0));
                    write_full_box(buf, STSZ, 0, 0, |buf| {
                        buf.put_u32(0);
                        buf.put_u32(0);
                    });
                    write_full_box(buf, STCO, 0, 0, |buf| buf.put_u32(0));
                });
            });
        });
    });
}

fn write_sample_entry(buf: &mut BytesMut, stream: &StreamDescriptor, track_id: u32) {
    let extra_data = stream.extra_data().unwrap_or_default();
    match stream.params {
        CodecParameters::Video { width, height, .. } => {
            write_box(buf, AVC1, |buf| {
                buf.put_slice(&[0; 6]);
                buf.put_u16(1); // data reference index
                buf.put_slice(&[0; 16]);
                buf.put_u16(width as u16);
                buf.put_u16(height as u16);
                buf.put_u32(0x0048_0000); // 72 dpi
                buf.put_u32(0x0048_0000);
                buf.put_u32(0);
                buf.put_u16(1); // frame count
                buf.put_slice(&[0; 32]);
                buf.put_u16(0x0018);
                buf.put_i16(-1);
                write_box(buf, AVCC, |buf| buf.put_slice(extra_data));
            });
        }
        CodecParameters::Audio {
            sample_rate,
            channels,
            bitrate,
        } => {
            write_box(buf, MP4A, |buf| {
                buf.put_slice(&[0; 6]);
                buf.put_u16(1);
                buf.put_slice(&[0; 8]);
                buf.put_u16(channels as u16);
                buf.put_u16(16);
                buf.put_u32(0);
                buf.put_u32(sample_rate.min(0xFFFF) << 16);
                write_full_box(buf, ESDS, 0, 0, |buf| {
                    write_descriptor(buf, 0x03, |buf| {
                        buf.put_u16(track_id as u16);
                        buf.put_u8(0);
                        write_descriptor(buf, 0x04, |buf| {
                            buf.put_u8(0x40); // MPEG-4 audio
                            buf.put_u8(0x15); // audio stream
                            buf.put_slice(&[0; 3]);
                            buf.put_u32(bitrate);
                            buf.put_u32(bitrate);
                            write_descriptor(buf, 0x05, |buf| buf.put_slice(extra_data));
                        });
                        write_descriptor(buf, 0x06, |buf| buf.put_u8(0x02));
                    });
                });
            });
        }
    }
}

impl Muxer for FragmentWriter {
    fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize> {
        FragmentWriter::add_stream(self, descriptor)
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn write_header(&mut self) -> Result<()> {
        FragmentWriter::write_header(self)
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        FragmentWriter::write_frame(self, frame.stream_index, frame)
    }

    fn flush_fragment(&mut self) -> Result<()> {
        FragmentWriter::flush_fragment(self)
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::parser::test_data::baseline_sps;
    use crate::format::mp4::parse::{children, parse_moof, parse_moov, TrackDefaults};
    use crate::io::{CallbackTransport, MemoryBuffer};
    use pretty_assertions::assert_eq;

    const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];

    fn writer() -> (FragmentWriter, MemoryBuffer) {
        let sink = MemoryBuffer::new();
        let mut config = Config::default();
        config.fragment.creation_time = Some(0);
        (FragmentWriter::new(IoPort::new(sink.clone()), &config), sink)
    }

    fn top_level(data: &[u8]) -> Vec<(FourCc, usize, usize)> {
        // (fourcc, offset, total size)
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + 8 <= data.len() {
            let size = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(&data[offset + 4..offset + 8]);
            out.push((fourcc, offset, size));
            offset += size;
        }
        out
    }

    fn configured_av_writer() -> (FragmentWriter, MemoryBuffer) {
        let (mut w, sink) = writer();
        w.add_video_stream(1280, 720, 2_000_000).unwrap();
        w.add_audio_stream(44100, 64_000).unwrap();
        w.set_parameter_sets(&baseline_sps(80, 45), &PPS).unwrap();
        (w, sink)
    }

    #[test]
    fn test_write_frame_before_header_is_state_error() {
        let (mut w, _) = writer();
        let frame = Frame::new(vec![0u8; 4]);
        assert!(matches!(
            w.write_frame(0, &frame),
            Err(MuxError::State { .. })
        ));
        w.add_video_stream(640, 480, 0).unwrap();
        assert_eq!(w.state(), WriterState::Configured);
        assert!(matches!(
            w.write_frame(0, &frame),
            Err(MuxError::State { .. })
        ));
        assert!(matches!(w.flush_fragment(), Err(MuxError::State { .. })));
    }

    #[test]
    fn test_add_stream_after_header_is_rejected() {
        let (mut w, _) = configured_av_writer();
        w.write_header().unwrap();
        assert_eq!(w.state(), WriterState::HeaderWritten);
        let err = w.add_audio_stream(48000, 0).unwrap_err();
        assert!(matches!(err, MuxError::State { .. }));
    }

    #[test]
    fn test_stream_limits() {
        let (mut w, _) = writer();
        w.add_video_stream(640, 480, 0).unwrap();
        assert!(matches!(
            w.add_video_stream(640, 480, 0),
            Err(MuxError::Format(_))
        ));
        w.add_audio_stream(48000, 0).unwrap();
        assert!(matches!(
            w.add_audio_stream(48000, 0),
            Err(MuxError::Format(_))
        ));
        let bad = StreamDescriptor::audio(CodecType::AAC, Timebase::new(1, 0), 48000, 2);
        let (mut w, _) = writer();
        assert!(matches!(w.add_stream(bad), Err(MuxError::Configuration(_))));
    }

    #[test]
    fn test_header_without_parameter_sets_fails_permanently() {
        let (mut w, sink) = writer();
        w.add_video_stream(640, 480, 0).unwrap();
        assert!(matches!(w.write_header(), Err(MuxError::Format(_))));
        assert_eq!(w.state(), WriterState::Failed);
        assert!(matches!(w.write_header(), Err(MuxError::State { .. })));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_init_segment_layout() {
        let (mut w, sink) = configured_av_writer();
        w.write_header().unwrap();
        let out = sink.to_vec();
        let boxes = top_level(&out);
        assert_eq!(boxes.len(), 2);
        assert_eq!(&boxes[0].0, b"ftyp");
        assert_eq!(&boxes[1].0, b"moov");
        assert_eq!(boxes[1].1 + boxes[1].2, out.len());

        let moov = &out[boxes[1].1 + 8..];
        let movie = parse_moov(moov).unwrap();
        assert!(movie.fragmented);
        assert_eq!(movie.tracks.len(), 2);
        assert!(movie.tracks.iter().all(|t| t.samples.is_empty()));
        assert_eq!(movie.tracks[0].timescale, 19200);
        assert_eq!(movie.tracks[1].timescale, 44100);

        let video = movie.tracks[0].descriptor.as_ref().unwrap();
        assert_eq!((video.width(), video.height()), (Some(1280), Some(720)));
        let (sps, pps) = ParameterSetRecord::decode(video.extra_data().unwrap()).unwrap();
        assert_eq!(sps.as_ref(), &baseline_sps(80, 45)[..]);
        assert_eq!(pps.as_ref(), &PPS);

        let audio = movie.tracks[1].descriptor.as_ref().unwrap();
        assert_eq!(audio.sample_rate(), Some(44100));
        assert_eq!(audio.extra_data(), Some(&[0x12, 0x08][..]));
    }

    #[test]
    fn test_flush_with_nothing_buffered_is_noop() {
        let (mut w, sink) = configured_av_writer();
        w.write_header().unwrap();
        let header_len = sink.len();
        w.flush_fragment().unwrap();
        w.flush_fragment().unwrap();
        assert_eq!(sink.len(), header_len);
        assert_eq!(w.fragments_written(), 0);

        w.write_video_frame(&[0, 0, 0, 2, 0x65, 0x88], 0, 0, 320, true)
            .unwrap();
        w.flush_fragment().unwrap();
        let out = sink.to_vec();
        let boxes = top_level(&out);
        let moof = boxes.iter().find(|b| &b.0 == b"moof").unwrap();
        // The first emitted fragment carries sequence number 1.
        let mfhd = &out[moof.1 + 8..];
        assert_eq!(&mfhd[4..8], b"mfhd");
        assert_eq!(&mfhd[12..16], &1u32.to_be_bytes());
    }

    #[test]
    fn test_fragment_round_trips_through_parser() {
        let (mut w, sink) = configured_av_writer();
        w.write_header().unwrap();
        w.write_video_frame(&[0, 0, 0, 2, 0x65, 0x88], 0, 0, 320, true)
            .unwrap();
        w.write_audio_packet(&[0x21, 0x00, 0x49], 0).unwrap();
        w.write_video_frame(&[0, 0, 0, 1, 0x41], 960, 320, 0, false)
            .unwrap();
        w.write_audio_packet(&[0x21, 0x10], 1024).unwrap();
        w.finalize().unwrap();
        assert_eq!(w.state(), WriterState::Finalized);

        let out = sink.to_vec();
        let boxes = top_level(&out);
        let names: Vec<_> = boxes.iter().map(|b| b.0).collect();
        assert_eq!(names, vec![*b"ftyp", *b"moov", *b"moof", *b"mdat"]);

        let (_, moof_offset, moof_size) = boxes[2];
        let runs = parse_moof(
            &out[moof_offset + 8..moof_offset + moof_size],
            moof_offset as u64,
            |_| TrackDefaults::default(),
            |_| 0,
        )
        .unwrap();
        assert_eq!(runs.len(), 2);
        let video = &runs[0].samples;
        assert_eq!(video.len(), 2);
        assert!(video[0].is_key && !video[1].is_key);
        assert_eq!(video[1].dts, 320);
        assert_eq!(video[1].composition_offset, 640);
        // A zero duration on the last sample repeats the previous one.
        assert_eq!(video[1].duration, 320);
        let second = &out[video[1].offset as usize..][..video[1].size as usize];
        assert_eq!(second, &[0, 0, 0, 1, 0x41]);

        let audio = &runs[1].samples;
        assert_eq!(audio[1].dts, 1024);
        assert_eq!(audio[0].duration, 1024);
        let first = &out[audio[0].offset as usize..][..audio[0].size as usize];
        assert_eq!(first, &[0x21, 0x00, 0x49]);
    }

    #[test]
    fn test_timebase_numerator_scales_ticks() {
        let (mut w, sink) = writer();
        let descriptor = StreamDescriptor::audio(CodecType::AAC, Timebase::new(2, 96000), 48000, 2);
        w.add_stream(descriptor).unwrap();
        w.write_header().unwrap();
        let frame = Frame::new(vec![1u8, 2]).with_timestamp(512).with_duration(512);
        w.write_frame(0, &frame).unwrap();
        w.flush_fragment().unwrap();

        let out = sink.to_vec();
        let boxes = top_level(&out);
        let (_, off, size) = boxes[2];
        let runs = parse_moof(&out[off + 8..off + size], off as u64, |_| TrackDefaults::default(), |_| 0)
            .unwrap();
        assert_eq!(runs[0].base_decode_time, Some(1024));
        assert_eq!(runs[0].samples[0].duration, 1024);
    }

    #[test]
    fn test_missing_pts_marker_is_format_error() {
        let (mut w, _) = configured_av_writer();
        w.write_header().unwrap();
        let frame = Frame::new(vec![0u8; 4]).with_pts(i64::MIN).with_dts(5);
        assert!(matches!(w.write_frame(0, &frame), Err(MuxError::Format(_))));

        let frame = Frame::new(vec![0u8; 4]).with_timestamp(5).with_key_flag(true);
        assert!(w.write_frame(0, &frame).is_ok());
    }

    #[test]
    fn test_write_after_finalize_is_state_error() {
        let (mut w, _) = configured_av_writer();
        w.write_header().unwrap();
        w.finalize().unwrap();
        assert!(matches!(
            w.write_audio_packet(&[1], 0),
            Err(MuxError::State { .. })
        ));
        assert!(w.close().is_ok());
    }

    #[test]
    fn test_random_access_index_is_optional() {
        let sink = MemoryBuffer::new();
        let mut config = Config::default();
        config.fragment.write_random_access_index = true;
        let mut w = FragmentWriter::new(IoPort::new(sink.clone()), &config);
        w.add_audio_stream(44100, 0).unwrap();
        w.write_header().unwrap();
        w.write_audio_packet(&[1, 2, 3], 0).unwrap();
        w.flush_fragment().unwrap();
        w.write_audio_packet(&[4, 5, 6], 1024).unwrap();
        w.finalize().unwrap();

        let out = sink.to_vec();
        let boxes = top_level(&out);
        let (fourcc, offset, size) = *boxes.last().unwrap();
        assert_eq!(&fourcc, b"mfra");
        assert_eq!(offset + size, out.len());
        assert_eq!(&out[out.len() - 4..], &(size as u32).to_be_bytes());
        let mfra = children(&out[offset + 8..]).unwrap();
        let mut tfra = &mfra[0].1[4..];
        assert_eq!(&tfra[..4], &1u32.to_be_bytes());
        tfra = &tfra[8..];
        assert_eq!(&tfra[..4], &2u32.to_be_bytes());
    }

    #[test]
    fn test_fragment_failure_keeps_earlier_fragments() {
        use std::cell::Cell;
        use std::rc::Rc;

        let fail = Rc::new(Cell::new(false));
        let sink = MemoryBuffer::new();
        let transport = {
            let fail = fail.clone();
            CallbackTransport::new(sink.clone()).with_write(move |mem, buf| {
                if fail.get() {
                    -1
                } else {
                    crate::io::Transport::write(mem, buf).map_or(-1, |n| n as i64)
                }
            })
        };
        let mut w = FragmentWriter::new(IoPort::new(transport), &Config::default());
        w.add_audio_stream(44100, 0).unwrap();
        w.write_header().unwrap();
        w.write_audio_packet(&[1, 2, 3], 0).unwrap();
        w.flush_fragment().unwrap();
        let good_len = sink.len();

        fail.set(true);
        w.write_audio_packet(&[4, 5, 6], 1024).unwrap();
        assert!(matches!(w.flush_fragment(), Err(MuxError::Io(_))));
        assert_eq!(sink.len(), good_len);
        assert_eq!(w.fragments_written(), 1);

        fail.set(false);
        w.write_audio_packet(&[7, 8, 9], 2048).unwrap();
        w.flush_fragment().unwrap();
        assert_eq!(w.fragments_written(), 2);
    }
}
