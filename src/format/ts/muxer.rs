use super::pes::PESHeader;
use super::types::*;
use crate::av::{rescale, CodecParameters, CodecType, Frame, StreamDescriptor, Timebase};
use crate::codec::aac::{AdtsHeader, AudioSpecificConfig};
use crate::codec::h264::annexb::avcc_to_annexb;
use crate::codec::h264::ParameterSetRecord;
use crate::config::{Config, TsConfig};
use crate::error::{MuxError, Result};
use crate::format::Muxer;
use crate::io::{IoPort, Transport};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Configuring,
    Writing,
    Finished,
}

#[derive(Debug)]
struct EsState {
    pid: u16,
    stream_type: u8,
    stream_id: u8,
    continuity_counter: u8,
    parameter_sets: Option<ParameterSetRecord>,
    audio_config: Option<AudioSpecificConfig>,
}

/// MPEG transport stream writer: a single program with one PES stream per
/// added [`StreamDescriptor`].
pub struct TSMuxer {
    port: IoPort,
    config: TsConfig,
    state: MuxerState,
    streams: Vec<StreamDescriptor>,
    es: Vec<EsState>,
    pat_cc: u8,
    pmt_cc: u8,
    pcr_stream: usize,
    /// Last PCR base written, in 90 kHz units.
    last_pcr: Option<u64>,
    stream_discontinuity: bool,
    packets_written: u64,
    payload: BytesMut,
    packet: BytesMut,
}

impl TSMuxer {
    /// Muxer with default PCR timing.
    pub fn new(port: IoPort) -> Self {
        Self::with_config(port, &Config::default())
    }

    /// Muxer with PCR interval and mux delay taken from `config.ts`.
    pub fn with_config(port: IoPort, config: &Config) -> Self {
        Self {
            port,
            config: config.ts.clone(),
            state: MuxerState::Configuring,
            streams: Vec::new(),
            es: Vec::new(),
            pat_cc: 0,
            pmt_cc: 0,
            pcr_stream: 0,
            last_pcr: None,
            stream_discontinuity: false,
            packets_written: 0,
            payload: BytesMut::new(),
            packet: BytesMut::with_capacity(TS_PACKET_SIZE),
        }
    }

    /// 188-byte packets handed to the port so far.
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Declares a stream and assigns it PID `0x100 + index`. At most one
    /// video and one audio stream.
    pub fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize> {
        if self.state != MuxerState::Configuring {
            return Err(MuxError::state("add_stream", self.state));
        }
        if self.streams.len() >= 2 {
            return Err(MuxError::Format(
                "at most one video and one audio stream per program".into(),
            ));
        }
        if self.streams.iter().any(|s| s.kind() == descriptor.kind()) {
            return Err(MuxError::Format(format!(
                "a {:?} stream was already added",
                descriptor.kind()
            )));
        }
        if !descriptor.timebase.is_valid() {
            return Err(MuxError::Configuration(format!(
                "invalid timebase {}",
                descriptor.timebase
            )));
        }
        let index = self.es.len();
        let pid = PID_ES_BASE + index as u16;
        let es = match (descriptor.codec, &descriptor.params) {
            (CodecType::H264, CodecParameters::Video { .. }) => EsState {
                pid,
                stream_type: STREAM_TYPE_H264,
                stream_id: STREAM_ID_H264,
                continuity_counter: 0,
                parameter_sets: descriptor
                    .extra_data()
                    .map(ParameterSetRecord::parse)
                    .transpose()?,
                audio_config: None,
            },
            (
                CodecType::AAC,
                CodecParameters::Audio {
                    sample_rate,
                    channels,
                    ..
                },
            ) => EsState {
                pid,
                stream_type: STREAM_TYPE_AAC,
                stream_id: STREAM_ID_AAC,
                continuity_counter: 0,
                parameter_sets: None,
                audio_config: Some(match descriptor.extra_data() {
                    Some(asc) => AudioSpecificConfig::parse(asc)?,
                    None => AudioSpecificConfig::new(*sample_rate, *channels)?,
                }),
            },
            _ => return Err(MuxError::Format("codec and parameters disagree".into())),
        };
        log::debug!(
            "ts stream {} on pid {:#06x}, stream type {:#04x}",
            index,
            pid,
            es.stream_type
        );
        self.es.push(es);
        self.streams.push(descriptor);
        Ok(index)
    }

    /// Writes PAT and PMT. The PCR goes on the video stream, or on the first
    /// stream of an audio-only program.
    pub fn write_header(&mut self) -> Result<()> {
        if self.state != MuxerState::Configuring {
            return Err(MuxError::state("write_header", self.state));
        }
        if self.es.is_empty() {
            return Err(MuxError::Format("no streams to mux".into()));
        }
        self.pcr_stream = self
            .es
            .iter()
            .position(|es| es.stream_type == STREAM_TYPE_H264)
            .unwrap_or(0);
        self.write_tables()?;
        self.port.flush()?;
        self.state = MuxerState::Writing;
        log::info!(
            "wrote PAT/PMT for {} stream(s), PCR on pid {:#06x}",
            self.es.len(),
            self.es[self.pcr_stream].pid
        );
        Ok(())
    }

    fn write_tables(&mut self) -> Result<()> {
        let mut pat = BytesMut::new();
        PAT {
            entries: vec![PATEntry {
                program_number: PROGRAM_NUMBER,
                program_map_pid: PID_PMT,
            }],
        }
        .write_to(&mut pat);
        let section = psi_section(TABLE_ID_PAT, TRANSPORT_STREAM_ID, &pat);
        let cc = next_cc(&mut self.pat_cc);
        self.write_section(PID_PAT, cc, &section)?;

        let mut pmt = BytesMut::new();
        PMT {
            pcr_pid: self.es[self.pcr_stream].pid,
            elementary_stream_infos: self
                .es
                .iter()
                .map(|es| ElementaryStreamInfo {
                    stream_type: es.stream_type,
                    elementary_pid: es.pid,
                })
                .collect(),
        }
        .write_to(&mut pmt);
        let section = psi_section(TABLE_ID_PMT, PROGRAM_NUMBER, &pmt);
        let cc = next_cc(&mut self.pmt_cc);
        self.write_section(PID_PMT, cc, &section)
    }

    /// One packet: header, pointer field, section, then 0xFF fill.
    fn write_section(&mut self, pid: u16, continuity_counter: u8, section: &[u8]) -> Result<()> {
        if section.len() + 1 > TS_PAYLOAD_SIZE {
            return Err(MuxError::Format("PSI section does not fit a packet".into()));
        }
        self.packet.clear();
        TSHeader {
            payload_unit_start: true,
            pid,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter,
        }
        .write_to(&mut self.packet);
        self.packet.put_u8(0);
        self.packet.put_slice(section);
        self.packet.resize(TS_PACKET_SIZE, 0xFF);
        self.port.write_all(&self.packet)?;
        self.packets_written += 1;
        Ok(())
    }

    /// Writes one access unit as a PES packet. Timestamps are in the stream's
    /// timebase and are converted to 90 kHz here.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.state != MuxerState::Writing {
            return Err(MuxError::state("write_frame", self.state));
        }
        let index = frame.stream_index;
        let descriptor = self
            .streams
            .get(index)
            .ok_or_else(|| MuxError::Format(format!("unknown stream index {}", index)))?;
        let timebase = descriptor.timebase;
        let pts = to_90khz(frame.pts, timebase)?;
        let dts = to_90khz(frame.dts, timebase)?;

        self.payload.clear();
        let es = &self.es[index];
        let stream_id = es.stream_id;
        let is_video = es.stream_type == STREAM_TYPE_H264;
        if is_video {
            avcc_to_annexb(
                &frame.data,
                es.parameter_sets.as_ref(),
                frame.is_key,
                &mut self.payload,
            )?;
        } else if is_adts(&frame.data) {
            self.payload.put_slice(&frame.data);
        } else if let Some(config) = es.audio_config {
            let header = AdtsHeader::for_payload(config, frame.data.len())?;
            self.payload.put_slice(&header.to_bytes());
            self.payload.put_slice(&frame.data);
        }

        if is_video && frame.is_key {
            self.write_tables()?;
        }

        let mut pes = PESHeader::new(stream_id).with_pts(pts);
        pes.data_alignment = true;
        if dts != pts {
            pes = pes.with_dts(dts);
        }
        let mut data = BytesMut::with_capacity(pes.encoded_len() + self.payload.len());
        pes.write_to(&mut data, self.payload.len());
        data.put_slice(&self.payload);

        let pcr = if index == self.pcr_stream {
            self.pcr_for(dts, is_video && frame.is_key)
        } else {
            None
        };
        log::trace!(
            "ts stream {} pes pts={} dts={} bytes={} pcr={:?}",
            index,
            pts,
            dts,
            data.len(),
            pcr
        );
        self.write_pes(index, &data, pcr, frame.is_key)
    }

    /// PCR base to attach to this frame, if one is due.
    fn pcr_for(&mut self, dts: u64, random_access: bool) -> Option<u64> {
        let delay = self.config.mux_delay_ms * 90;
        let pcr = dts.saturating_sub(delay);
        let due = match self.last_pcr {
            None => true,
            Some(last) if pcr < last => {
                log::warn!("PCR regressed from {} to {}", last, pcr);
                self.stream_discontinuity = true;
                true
            }
            Some(last) => random_access || pcr - last >= self.config.pcr_interval_ms * 90,
        };
        if due {
            self.last_pcr = Some(pcr);
            Some(pcr)
        } else {
            None
        }
    }

    fn write_pes(
        &mut self,
        index: usize,
        data: &[u8],
        pcr: Option<u64>,
        random_access: bool,
    ) -> Result<()> {
        let mut offset = 0;
        let mut first = true;
        while offset < data.len() {
            let mut af = AdaptationField::default();
            if first {
                af.pcr = pcr;
                af.random_access = random_access;
                if pcr.is_some() {
                    af.discontinuity = std::mem::take(&mut self.stream_discontinuity);
                }
            }
            let space = TS_PAYLOAD_SIZE - af.len();
            let remaining = data.len() - offset;
            if remaining < space {
                af.stuffing = space - remaining;
            }
            let chunk = remaining.min(TS_PAYLOAD_SIZE - af.len());

            let es = &mut self.es[index];
            self.packet.clear();
            TSHeader {
                payload_unit_start: first,
                pid: es.pid,
                adaptation_field_exists: !af.is_empty(),
                contains_payload: true,
                continuity_counter: next_cc(&mut es.continuity_counter),
            }
            .write_to(&mut self.packet);
            af.write_to(&mut self.packet);
            self.packet.put_slice(&data[offset..offset + chunk]);
            debug_assert_eq!(self.packet.len(), TS_PACKET_SIZE);
            self.port.write_all(&self.packet)?;
            self.packets_written += 1;

            offset += chunk;
            first = false;
        }
        Ok(())
    }

    /// Flushes the port. Transport streams carry no trailer.
    pub fn write_trailer(&mut self) -> Result<()> {
        if self.state != MuxerState::Writing {
            return Err(MuxError::state("write_trailer", self.state));
        }
        self.port.flush()?;
        self.state = MuxerState::Finished;
        log::info!("ts output finished after {} packets", self.packets_written);
        Ok(())
    }

    /// Flushes and returns the transport.
    pub fn close(self) -> Result<Box<dyn Transport>> {
        self.port.into_transport()
    }
}

fn next_cc(counter: &mut u8) -> u8 {
    let current = *counter;
    *counter = (current + 1) & 0x0F;
    current
}

fn to_90khz(ts: i64, timebase: Timebase) -> Result<u64> {
    let ticks = rescale(ts, timebase, Timebase::MPEG_TS);
    u64::try_from(ticks)
        .map_err(|_| MuxError::Format(format!("negative timestamp {} for transport stream", ts)))
}

/// Whether `data` is already one complete ADTS frame.
fn is_adts(data: &[u8]) -> bool {
    AdtsHeader::parse(data).map_or(false, |h| h.frame_length as usize == data.len())
}

impl Muxer for TSMuxer {
    fn add_stream(&mut self, descriptor: StreamDescriptor) -> Result<usize> {
        TSMuxer::add_stream(self, descriptor)
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn write_header(&mut self) -> Result<()> {
        TSMuxer::write_header(self)
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        TSMuxer::write_frame(self, frame)
    }

    fn write_trailer(&mut self) -> Result<()> {
        TSMuxer::write_trailer(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::parser::test_data::baseline_sps;
    use crate::format::ts::pes::read_timestamp;
    use crate::io::MemoryBuffer;
    use crate::utils::crc::MPEG2_CRC;
    use pretty_assertions::assert_eq;

    struct Packet<'a> {
        pid: u16,
        start: bool,
        cc: u8,
        adaptation: Option<&'a [u8]>,
        payload: &'a [u8],
    }

    fn packets(data: &[u8]) -> Vec<Packet<'_>> {
        assert_eq!(data.len() % TS_PACKET_SIZE, 0);
        data.chunks(TS_PACKET_SIZE)
            .map(|p| {
                assert_eq!(p[0], SYNC_BYTE);
                let pid = u16::from_be_bytes([p[1] & 0x1F, p[2]]);
                let has_af = p[3] & 0x20 != 0;
                let (adaptation, payload_start) = if has_af {
                    let len = p[4] as usize;
                    (Some(&p[5..5 + len]), 5 + len)
                } else {
                    (None, 4)
                };
                Packet {
                    pid,
                    start: p[1] & 0x40 != 0,
                    cc: p[3] & 0x0F,
                    adaptation,
                    payload: &p[payload_start..],
                }
            })
            .collect()
    }

    fn video_stream() -> StreamDescriptor {
        let record = ParameterSetRecord::encode(&baseline_sps(80, 45), &[0x68, 0xCE, 0x38, 0x80])
            .unwrap();
        StreamDescriptor::video(CodecType::H264, Timebase::new(1, 90_000), 1280, 720)
            .with_extra_data(record)
    }

    fn audio_stream() -> StreamDescriptor {
        StreamDescriptor::audio(CodecType::AAC, Timebase::new(1, 44_100), 44_100, 2)
    }

    #[test]
    fn test_header_writes_pat_and_pmt() {
        let sink = MemoryBuffer::new();
        let mut muxer = TSMuxer::new(IoPort::new(sink.clone()));
        muxer.add_stream(audio_stream()).unwrap();
        muxer.add_stream(video_stream()).unwrap();
        muxer.write_header().unwrap();

        let out = sink.to_vec();
        let pkts = packets(&out);
        assert_eq!(pkts.len(), 2);
        assert_eq!((pkts[0].pid, pkts[1].pid), (PID_PAT, PID_PMT));

        let pmt = &pkts[1].payload[1..];
        let section_len = (u16::from_be_bytes([pmt[1], pmt[2]]) & 0x3FF) as usize;
        let section = &pmt[..3 + section_len];
        assert_eq!(MPEG2_CRC.calculate(section), 0);
        // PCR follows the video stream even when it was added second.
        assert_eq!(u16::from_be_bytes([section[8], section[9]]) & 0x1FFF, 0x101);
        assert_eq!(&section[12..17], &[STREAM_TYPE_AAC, 0xE1, 0x00, 0xF0, 0x00]);
        assert_eq!(&section[17..22], &[STREAM_TYPE_H264, 0xE1, 0x01, 0xF0, 0x00]);
    }

    #[test]
    fn test_keyframe_gets_tables_pcr_and_parameter_sets() {
        let sink = MemoryBuffer::new();
        let mut muxer = TSMuxer::new(IoPort::new(sink.clone()));
        muxer.add_stream(video_stream()).unwrap();
        muxer.write_header().unwrap();
        let frame = Frame::new(vec![0, 0, 0, 3, 0x65, 0x88, 0x84])
            .with_timestamp(90_000)
            .with_key_flag(true);
        muxer.write_frame(&frame).unwrap();
        muxer.write_trailer().unwrap();

        let out = sink.to_vec();
        let pkts = packets(&out);
        let pids: Vec<u16> = pkts.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![PID_PAT, PID_PMT, PID_PAT, PID_PMT, 0x100]);
        assert_eq!((pkts[2].cc, pkts[3].cc), (1, 1));

        let pes = &pkts[4];
        assert!(pes.start);
        let af = pes.adaptation.unwrap();
        assert_eq!(af[0] & 0x50, 0x50);
        let mut raw = [0u8; 6];
        raw.copy_from_slice(&af[1..7]);
        // 1 s minus the 700 ms mux delay
        assert_eq!(decode_pcr(&raw), 27_000 * 300);

        let payload = pes.payload;
        assert_eq!(&payload[..4], &[0, 0, 1, STREAM_ID_H264]);
        assert_eq!(read_timestamp(&payload[9..]), Some(90_000));
        let es = &payload[14..];
        assert_eq!(&es[..6], &[0, 0, 0, 1, 0x09, 0xF0]);
        assert_eq!(&es[6..11], &[0, 0, 0, 1, 0x67]);
        assert!(es.ends_with(&[0, 0, 0, 1, 0x65, 0x88, 0x84]));
    }

    #[test]
    fn test_audio_gets_adts_and_spans_packets() {
        let sink = MemoryBuffer::new();
        let mut muxer = TSMuxer::new(IoPort::new(sink.clone()));
        muxer.add_stream(audio_stream()).unwrap();
        muxer.write_header().unwrap();
        let data: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        muxer
            .write_frame(&Frame::new(data.clone()).with_timestamp(0).with_key_flag(true))
            .unwrap();
        muxer
            .write_frame(&Frame::new(vec![7u8; 10]).with_timestamp(1024).with_key_flag(true))
            .unwrap();

        let out = sink.to_vec();
        let pkts: Vec<_> = packets(&out).into_iter().filter(|p| p.pid == 0x100).collect();
        let counters: Vec<u8> = pkts.iter().map(|p| p.cc).collect();
        assert_eq!(counters, vec![0, 1, 2, 3]);
        assert!(pkts[0].start && !pkts[1].start && !pkts[2].start && pkts[3].start);

        let mut pes = Vec::new();
        for p in &pkts[..3] {
            pes.extend_from_slice(p.payload);
        }
        assert_eq!(pes.len(), 14 + 7 + 400);
        assert_eq!(u16::from_be_bytes([pes[4], pes[5]]) as usize, pes.len() - 6);
        assert_eq!(&pes[14..16], &[0xFF, 0xF1]);
        assert_eq!(&pes[21..], &data[..]);
    }

    #[test]
    fn test_adts_framed_audio_passes_through() {
        let sink = MemoryBuffer::new();
        let mut muxer = TSMuxer::new(IoPort::new(sink.clone()));
        muxer.add_stream(audio_stream()).unwrap();
        muxer.write_header().unwrap();
        let config = AudioSpecificConfig::new(44_100, 2).unwrap();
        let mut framed = AdtsHeader::for_payload(config, 20).unwrap().to_bytes().to_vec();
        framed.extend_from_slice(&[3u8; 20]);
        muxer
            .write_frame(&Frame::new(framed.clone()).with_timestamp(0).with_key_flag(true))
            .unwrap();
        // Sync word but a length that disagrees: framed again.
        let mut stray = framed.clone();
        stray.push(0);
        muxer
            .write_frame(&Frame::new(stray.clone()).with_timestamp(1024).with_key_flag(true))
            .unwrap();

        let out = sink.to_vec();
        let pkts: Vec<_> = packets(&out).into_iter().filter(|p| p.pid == 0x100).collect();
        let pes = |p: &Packet<'_>| p.payload[14..].to_vec();
        assert_eq!(pes(&pkts[0]), framed);
        assert_eq!(pes(&pkts[1]).len(), 7 + stray.len());
        assert_eq!(&pes(&pkts[1])[7..], &stray[..]);
    }

    #[test]
    fn test_stream_limits() {
        let mut muxer = TSMuxer::new(IoPort::new(MemoryBuffer::new()));
        muxer.add_stream(audio_stream()).unwrap();
        assert!(matches!(
            muxer.add_stream(audio_stream()),
            Err(MuxError::Format(_))
        ));
        muxer.add_stream(video_stream()).unwrap();
        assert!(matches!(
            muxer.add_stream(video_stream()),
            Err(MuxError::Format(_))
        ));
        assert_eq!(muxer.streams().len(), 2);
    }

    #[test]
    fn test_pcr_interval_on_audio_only_program() {
        let sink = MemoryBuffer::new();
        let mut config = Config::default();
        config.ts.mux_delay_ms = 0;
        let mut muxer = TSMuxer::with_config(IoPort::new(sink.clone()), &config);
        let stream = StreamDescriptor::audio(CodecType::AAC, Timebase::MILLISECONDS, 48_000, 2);
        muxer.add_stream(stream).unwrap();
        muxer.write_header().unwrap();
        for ms in [0, 20, 39, 40, 60, 81] {
            let frame = Frame::new(vec![1u8; 8]).with_timestamp(ms).with_key_flag(true);
            muxer.write_frame(&frame).unwrap();
        }

        let out = sink.to_vec();
        let with_pcr: Vec<bool> = packets(&out)
            .iter()
            .filter(|p| p.pid == 0x100)
            .map(|p| p.adaptation.map_or(false, |af| af.len() > 1 && af[0] & 0x10 != 0))
            .collect();
        assert_eq!(with_pcr, vec![true, false, false, true, false, true]);
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut muxer = TSMuxer::new(IoPort::new(MemoryBuffer::new()));
        let frame = Frame::new(vec![1u8]);
        assert!(matches!(
            muxer.write_frame(&frame),
            Err(MuxError::State { .. })
        ));
        assert!(matches!(muxer.write_header(), Err(MuxError::Format(_))));
        muxer.add_stream(audio_stream()).unwrap();
        muxer.write_header().unwrap();
        assert!(matches!(
            muxer.add_stream(audio_stream()),
            Err(MuxError::State { .. })
        ));
        assert!(matches!(
            muxer.write_frame(&frame.clone().with_stream_index(3)),
            Err(MuxError::Format(_))
        ));
        assert!(matches!(
            muxer.write_frame(&frame.with_timestamp(-5)),
            Err(MuxError::Format(_))
        ));
    }
}
