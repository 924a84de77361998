//! In-memory parsing of `moov` and `moof` payloads.

use super::boxes::*;
use crate::av::{CodecParameters, CodecType, StreamDescriptor, Timebase};
use crate::codec::aac::AudioSpecificConfig;
use crate::codec::h264::ParameterSetRecord;
use crate::error::{MuxError, Result};
use crate::io::IoPort;
use bytes::Bytes;

/// Most samples a single table or `trun` may declare.
pub const MAX_SAMPLE_COUNT: usize = 1 << 22;

fn truncated(what: &str) -> MuxError {
    MuxError::Format(format!("truncated {}", what))
}

/// Rejects a declared entry count that exceeds [`MAX_SAMPLE_COUNT`] or
/// cannot fit in what is left of the box.
fn check_count(count: usize, entry_len: usize, r: &ByteReader, what: &str) -> Result<()> {
    if count > MAX_SAMPLE_COUNT {
        return Err(MuxError::Format(format!(
            "{} declares {} entries",
            what, count
        )));
    }
    if count.saturating_mul(entry_len) > r.remaining() {
        return Err(truncated(what));
    }
    Ok(())
}

/// Bounds-checked big-endian cursor over a box payload.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| truncated("box payload"))?;
        let out = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| truncated("box payload"))?;
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn fourcc(&mut self) -> Result<FourCc> {
        let b = self.bytes(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Version byte and 24-bit flags of a full box.
    pub fn full_box_header(&mut self) -> Result<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}

/// Header of a top-level box read from a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub fourcc: FourCc,
    /// File offset of the first header byte.
    pub offset: u64,
    pub header_len: u64,
    /// Total size including the header; `None` runs to end of file.
    pub size: Option<u64>,
}

impl BoxHeader {
    pub fn payload_len(&self) -> Option<u64> {
        self.size.map(|s| s - self.header_len)
    }

    pub fn end(&self) -> Option<u64> {
        self.size.map(|s| self.offset + s)
    }
}

/// Reads the next top-level box header. `Ok(None)` at a clean end of stream.
pub fn read_box_header(port: &mut IoPort) -> Result<Option<BoxHeader>> {
    let offset = port.position();
    let mut raw = [0u8; 8];
    match port.read_full(&mut raw)? {
        0 => return Ok(None),
        8 => {}
        n => {
            return Err(MuxError::Format(format!(
                "truncated box header at offset {} ({} bytes)",
                offset, n
            )))
        }
    }
    let size32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let fourcc = [raw[4], raw[5], raw[6], raw[7]];
    let (header_len, size) = match size32 {
        0 => (8, None),
        1 => {
            let mut large = [0u8; 8];
            port.read_exact(&mut large)?;
            (16, Some(u64::from_be_bytes(large)))
        }
        n => (8, Some(n as u64)),
    };
    if let Some(size) = size {
        if size < header_len {
            return Err(MuxError::Format(format!(
                "box {} at offset {} declares size {}",
                String::from_utf8_lossy(&fourcc),
                offset,
                size
            )));
        }
    }
    Ok(Some(BoxHeader {
        fourcc,
        offset,
        header_len,
        size,
    }))
}

/// Splits a payload into its child boxes.
pub fn children(data: &[u8]) -> Result<Vec<(FourCc, &[u8])>> {
    let mut out = Vec::new();
    let mut reader = ByteReader::new(data);
    while reader.remaining() >= 8 {
        let size = reader.u32()? as u64;
        let fourcc = reader.fourcc()?;
        let (header_len, size) = match size {
            0 => (8, reader.remaining() as u64 + 8),
            1 => (16, reader.u64()?),
            n => (8, n),
        };
        let payload_len = size
            .checked_sub(header_len)
            .ok_or_else(|| truncated("child box"))?;
        let payload = reader.bytes(payload_len as usize)?;
        out.push((fourcc, payload));
    }
    Ok(out)
}

fn child<'a>(boxes: &[(FourCc, &'a [u8])], fourcc: FourCc) -> Option<&'a [u8]> {
    boxes.iter().find(|(f, _)| *f == fourcc).map(|(_, b)| *b)
}

/// One sample with an absolute file offset and timing in track ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub dts: i64,
    pub composition_offset: i64,
    pub duration: u32,
    pub is_key: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackDefaults {
    pub sample_description_index: u32,
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub timescale: u32,
    /// From `mdhd`, in track ticks.
    pub duration: u64,
    /// `None` for codecs this crate cannot carry.
    pub descriptor: Option<StreamDescriptor>,
    pub samples: Vec<Sample>,
    pub defaults: TrackDefaults,
}

#[derive(Debug, Clone)]
pub struct MovieInfo {
    pub timescale: u32,
    pub duration: u64,
    pub fragmented: bool,
    pub tracks: Vec<TrackInfo>,
}

pub fn parse_moov(data: &[u8]) -> Result<MovieInfo> {
    let boxes = children(data)?;
    let mvhd = child(&boxes, MVHD).ok_or_else(|| MuxError::Format("moov without mvhd".into()))?;
    let mut r = ByteReader::new(mvhd);
    let (version, _) = r.full_box_header()?;
    let (timescale, duration) = if version == 1 {
        r.skip(16)?;
        (r.u32()?, r.u64()?)
    } else {
        r.skip(8)?;
        (r.u32()?, r.u32()? as u64)
    };

    let mut tracks = Vec::new();
    for (_, trak) in boxes.iter().filter(|(f, _)| *f == TRAK) {
        tracks.push(parse_trak(trak)?);
    }

    let fragmented = match child(&boxes, MVEX) {
        Some(mvex) => {
            for (fourcc, trex) in children(mvex)? {
                if fourcc != TREX {
                    continue;
                }
                let mut r = ByteReader::new(trex);
                r.full_box_header()?;
                let track_id = r.u32()?;
                let defaults = TrackDefaults {
                    sample_description_index: r.u32()?,
                    duration: r.u32()?,
                    size: r.u32()?,
                    flags: r.u32()?,
                };
                if let Some(track) = tracks.iter_mut().find(|t| t.track_id == track_id) {
                    track.defaults = defaults;
                }
            }
            true
        }
        None => false,
    };

    Ok(MovieInfo {
        timescale,
        duration,
        fragmented,
        tracks,
    })
}

fn parse_trak(data: &[u8]) -> Result<TrackInfo> {
    let boxes = children(data)?;
    let tkhd = child(&boxes, TKHD).ok_or_else(|| MuxError::Format("trak without tkhd".into()))?;
    let mut r = ByteReader::new(tkhd);
    let (version, _) = r.full_box_header()?;
    r.skip(if version == 1 { 16 } else { 8 })?;
    let track_id = r.u32()?;

    let mdia = child(&boxes, MDIA).ok_or_else(|| MuxError::Format("trak without mdia".into()))?;
    let mdia = children(mdia)?;
    let mdhd = child(&mdia, MDHD).ok_or_else(|| MuxError::Format("mdia without mdhd".into()))?;
    let mut r = ByteReader::new(mdhd);
    let (version, _) = r.full_box_header()?;
    let (timescale, duration) = if version == 1 {
        r.skip(16)?;
        (r.u32()?, r.u64()?)
    } else {
        r.skip(8)?;
        (r.u32()?, r.u32()? as u64)
    };
    if timescale == 0 {
        return Err(MuxError::Format(format!(
            "track {} has a zero timescale",
            track_id
        )));
    }

    let stbl = child(&mdia, MINF)
        .map(children)
        .transpose()?
        .and_then(|minf| child(&minf, STBL).map(children))
        .transpose()?
        .ok_or_else(|| MuxError::Format(format!("track {} has no sample table", track_id)))?;

    let timebase = Timebase::from_hz(timescale);
    let descriptor = match child(&stbl, STSD) {
        Some(stsd) => parse_stsd(stsd, timebase)?,
        None => None,
    };
    let samples = expand_sample_table(&stbl)?;

    Ok(TrackInfo {
        track_id,
        timescale,
        duration,
        descriptor,
        samples,
        defaults: TrackDefaults::default(),
    })
}

fn parse_stsd(data: &[u8], timebase: Timebase) -> Result<Option<StreamDescriptor>> {
    let mut r = ByteReader::new(data);
    r.full_box_header()?;
    if r.u32()? == 0 {
        return Ok(None);
    }
    let entries = children(r.rest())?;
    let (fourcc, entry) = match entries.first() {
        Some(e) => *e,
        None => return Ok(None),
    };
    let mut r = ByteReader::new(entry);
    match fourcc {
        AVC1 | AVC3 => {
            r.skip(24)?;
            let width = r.u16()? as u32;
            let height = r.u16()? as u32;
            r.skip(50)?;
            let boxes = children(r.rest())?;
            let mut descriptor = StreamDescriptor::video(CodecType::H264, timebase, width, height);
            if let Some(avcc) = child(&boxes, AVCC) {
                let record = ParameterSetRecord::parse(avcc)?;
                if let CodecParameters::Video { profile, .. } = &mut descriptor.params {
                    *profile = record.profile_level().map_or(*profile, |(p, _)| p);
                }
                descriptor.extra_data = Some(Bytes::copy_from_slice(avcc));
            }
            Ok(Some(descriptor))
        }
        MP4A => {
            r.skip(8)?;
            let sound_version = r.u16()?;
            r.skip(6)?;
            let channels = r.u16()? as u8;
            r.skip(6)?;
            let mut sample_rate = r.u32()? >> 16;
            match sound_version {
                1 => r.skip(16)?,
                2 => r.skip(36)?,
                _ => {}
            }
            let boxes = children(r.rest())?;
            let asc = child(&boxes, ESDS).map(parse_esds).transpose()?.flatten();
            let mut channels = channels;
            if let Some(asc) = &asc {
                if let Ok(config) = AudioSpecificConfig::parse(asc) {
                    sample_rate = config.sample_rate();
                    if config.channel_configuration > 0 {
                        channels = config.channel_configuration;
                    }
                }
            }
            let mut descriptor = StreamDescriptor::audio(CodecType::AAC, timebase, sample_rate, channels);
            descriptor.extra_data = asc;
            Ok(Some(descriptor))
        }
        other => {
            log::warn!(
                "skipping track with unsupported sample entry {}",
                String::from_utf8_lossy(&other)
            );
            Ok(None)
        }
    }
}

fn read_descriptor_header(r: &mut ByteReader) -> Result<(u8, usize)> {
    let tag = r.u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let b = r.u8()?;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

/// Pulls the DecoderSpecificInfo (the AudioSpecificConfig) out of an `esds`.
pub fn parse_esds(data: &[u8]) -> Result<Option<Bytes>> {
    let mut r = ByteReader::new(data);
    r.full_box_header()?;
    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x03 {
        return Ok(None);
    }
    r.skip(2)?; // ES_ID
    let flags = r.u8()?;
    if flags & 0x80 != 0 {
        r.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = r.u8()? as usize;
        r.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        r.skip(2)?;
    }
    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x04 {
        return Ok(None);
    }
    r.skip(13)?;
    while r.remaining() > 0 {
        let (tag, len) = read_descriptor_header(&mut r)?;
        let body = r.bytes(len)?;
        if tag == 0x05 {
            return Ok(Some(Bytes::copy_from_slice(body)));
        }
    }
    Ok(None)
}

fn read_u32_table(data: &[u8], entry_words: usize) -> Result<Vec<Vec<u32>>> {
    let mut r = ByteReader::new(data);
    r.full_box_header()?;
    let count = r.u32()? as usize;
    check_count(count, entry_words * 4, &r, "sample table")?;
    (0..count)
        .map(|_| (0..entry_words).map(|_| r.u32()).collect())
        .collect()
}

fn sample_sizes(stbl: &[(FourCc, &[u8])]) -> Result<Vec<u32>> {
    if let Some(stsz) = child(stbl, STSZ) {
        let mut r = ByteReader::new(stsz);
        r.full_box_header()?;
        let fixed = r.u32()?;
        let count = r.u32()? as usize;
        if fixed != 0 {
            check_count(count, 0, &r, "stsz")?;
            return Ok(vec![fixed; count]);
        }
        check_count(count, 4, &r, "stsz")?;
        return (0..count).map(|_| r.u32()).collect();
    }
    if let Some(stz2) = child(stbl, STZ2) {
        let mut r = ByteReader::new(stz2);
        r.full_box_header()?;
        r.skip(3)?;
        let field_size = r.u8()?;
        let count = r.u32()? as usize;
        check_count(count, field_size as usize / 8, &r, "stz2")?;
        return match field_size {
            4 => {
                let packed = r.bytes((count + 1) / 2)?;
                Ok((0..count)
                    .map(|i| {
                        let b = packed[i / 2];
                        (if i % 2 == 0 { b >> 4 } else { b & 0x0F }) as u32
                    })
                    .collect())
            }
            8 => (0..count).map(|_| r.u8().map(u32::from)).collect(),
            16 => (0..count).map(|_| r.u16().map(u32::from)).collect(),
            other => Err(MuxError::Format(format!(
                "stz2 field size {} is invalid",
                other
            ))),
        };
    }
    Ok(Vec::new())
}

fn chunk_offsets(stbl: &[(FourCc, &[u8])]) -> Result<Vec<u64>> {
    if let Some(stco) = child(stbl, STCO) {
        return Ok(read_u32_table(stco, 1)?.into_iter().map(|e| e[0] as u64).collect());
    }
    if let Some(co64) = child(stbl, CO64) {
        let mut r = ByteReader::new(co64);
        r.full_box_header()?;
        let count = r.u32()? as usize;
        check_count(count, 8, &r, "co64")?;
        return (0..count).map(|_| r.u64()).collect();
    }
    Ok(Vec::new())
}

/// Expands stts/ctts/stsc/stsz/stco/stss into per-sample entries.
pub fn expand_sample_table(stbl: &[(FourCc, &[u8])]) -> Result<Vec<Sample>> {
    let sizes = sample_sizes(stbl)?;
    if sizes.is_empty() {
        return Ok(Vec::new());
    }
    let offsets = chunk_offsets(stbl)?;
    let stsc = match child(stbl, STSC) {
        Some(b) => read_u32_table(b, 3)?,
        None => Vec::new(),
    };
    let stts = match child(stbl, STTS) {
        Some(b) => read_u32_table(b, 2)?,
        None => Vec::new(),
    };
    let ctts = match child(stbl, CTTS) {
        Some(b) => read_u32_table(b, 2)?,
        None => Vec::new(),
    };
    let sync: Option<Vec<u32>> = match child(stbl, STSS) {
        Some(b) => Some(read_u32_table(b, 1)?.into_iter().map(|e| e[0]).collect()),
        None => None,
    };

    let mut durations = stts
        .iter()
        .flat_map(|e| std::iter::repeat(e[1]).take(e[0] as usize));
    let mut composition = ctts
        .iter()
        .flat_map(|e| std::iter::repeat(e[1] as i32 as i64).take(e[0] as usize));

    let mut samples = Vec::with_capacity(sizes.len());
    let mut sample_index = 0usize;
    let mut dts = 0i64;
    for (chunk_index, &chunk_offset) in offsets.iter().enumerate() {
        let chunk_number = chunk_index as u32 + 1;
        let per_chunk = stsc
            .iter()
            .take_while(|e| e[0] <= chunk_number)
            .last()
            .map(|e| e[1])
            .unwrap_or(0);
        let mut offset = chunk_offset;
        for _ in 0..per_chunk {
            let Some(&size) = sizes.get(sample_index) else {
                break;
            };
            let duration = durations.next().unwrap_or(0);
            let number = sample_index as u32 + 1;
            samples.push(Sample {
                offset,
                size,
                dts,
                composition_offset: composition.next().unwrap_or(0),
                duration,
                is_key: sync.as_ref().map_or(true, |s| s.binary_search(&number).is_ok()),
            });
            offset += size as u64;
            dts += duration as i64;
            sample_index += 1;
        }
    }
    if sample_index < sizes.len() {
        return Err(MuxError::Format(format!(
            "sample table maps {} of {} samples to chunks",
            sample_index,
            sizes.len()
        )));
    }
    Ok(samples)
}

/// Samples described by one `traf`.
#[derive(Debug, Clone)]
pub struct FragmentRun {
    pub track_id: u32,
    pub base_decode_time: Option<u64>,
    pub samples: Vec<Sample>,
}

/// Parses a `moof` payload. `moof_offset` is the file offset of the `moof`
/// header; `defaults_for` supplies `trex` values per track id. `next_dts`
/// carries decode time for tracks whose `traf` has no `tfdt`.
pub fn parse_moof(
    data: &[u8],
    moof_offset: u64,
    defaults_for: impl Fn(u32) -> TrackDefaults,
    next_dts: impl Fn(u32) -> i64,
) -> Result<Vec<FragmentRun>> {
    let mut runs = Vec::new();
    for (fourcc, traf) in children(data)? {
        if fourcc != TRAF {
            continue;
        }
        let boxes = children(traf)?;
        let tfhd = child(&boxes, TFHD).ok_or_else(|| MuxError::Format("traf without tfhd".into()))?;
        let mut r = ByteReader::new(tfhd);
        let (_, flags) = r.full_box_header()?;
        let track_id = r.u32()?;
        let mut defaults = defaults_for(track_id);
        let base_offset = if flags & tfhd_flags::BASE_DATA_OFFSET != 0 {
            r.u64()?
        } else {
            moof_offset
        };
        if flags & tfhd_flags::SAMPLE_DESCRIPTION_INDEX != 0 {
            defaults.sample_description_index = r.u32()?;
        }
        if flags & tfhd_flags::DEFAULT_SAMPLE_DURATION != 0 {
            defaults.duration = r.u32()?;
        }
        if flags & tfhd_flags::DEFAULT_SAMPLE_SIZE != 0 {
            defaults.size = r.u32()?;
        }
        if flags & tfhd_flags::DEFAULT_SAMPLE_FLAGS != 0 {
            defaults.flags = r.u32()?;
        }

        let base_decode_time = match child(&boxes, TFDT) {
            Some(tfdt) => {
                let mut r = ByteReader::new(tfdt);
                let (version, _) = r.full_box_header()?;
                Some(if version == 1 { r.u64()? } else { r.u32()? as u64 })
            }
            None => None,
        };

        let mut dts = match base_decode_time {
            Some(t) => t as i64,
            None => next_dts(track_id),
        };
        let mut data_cursor = base_offset;
        let mut samples = Vec::new();
        for (_, trun) in boxes.iter().filter(|(f, _)| *f == TRUN) {
            let mut r = ByteReader::new(trun);
            let (_, flags) = r.full_box_header()?;
            let count = r.u32()?;
            if flags & trun_flags::DATA_OFFSET != 0 {
                data_cursor = (base_offset as i64 + r.u32()? as i32 as i64) as u64;
            }
            let first_flags = if flags & trun_flags::FIRST_SAMPLE_FLAGS != 0 {
                Some(r.u32()?)
            } else {
                None
            };
            let per_sample_fields = [
                trun_flags::SAMPLE_DURATION,
                trun_flags::SAMPLE_SIZE,
                trun_flags::SAMPLE_FLAGS,
                trun_flags::SAMPLE_COMPOSITION_OFFSET,
            ]
            .iter()
            .filter(|&&f| flags & f != 0)
            .count();
            check_count(count as usize, per_sample_fields * 4, &r, "trun")?;
            if samples.len() + count as usize > MAX_SAMPLE_COUNT {
                return Err(MuxError::Format("traf declares too many samples".into()));
            }
            for i in 0..count {
                let duration = if flags & trun_flags::SAMPLE_DURATION != 0 {
                    r.u32()?
                } else {
                    defaults.duration
                };
                let size = if flags & trun_flags::SAMPLE_SIZE != 0 {
                    r.u32()?
                } else {
                    defaults.size
                };
                let sample_flags = if flags & trun_flags::SAMPLE_FLAGS != 0 {
                    r.u32()?
                } else if i == 0 {
                    first_flags.unwrap_or(defaults.flags)
                } else {
                    defaults.flags
                };
                let composition_offset = if flags & trun_flags::SAMPLE_COMPOSITION_OFFSET != 0 {
                    r.u32()? as i32 as i64
                } else {
                    0
                };
                samples.push(Sample {
                    offset: data_cursor,
                    size,
                    dts,
                    composition_offset,
                    duration,
                    is_key: is_sync_sample(sample_flags),
                });
                data_cursor += size as u64;
                dts += duration as i64;
            }
        }
        runs.push(FragmentRun {
            track_id,
            base_decode_time,
            samples,
        });
    }
    Ok(runs)
}
