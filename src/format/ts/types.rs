use crate::utils::crc::MPEG2_CRC;
use bytes::{BufMut, BytesMut};

// Stream IDs
pub const STREAM_ID_H264: u8 = 0xe0;
pub const STREAM_ID_AAC: u8 = 0xc0;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_PMT: u16 = 0x1000;
/// Elementary stream `i` is carried on `PID_ES_BASE + i`.
pub const PID_ES_BASE: u16 = 0x0100;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TRANSPORT_STREAM_ID: u16 = 1;
pub const PROGRAM_NUMBER: u16 = 1;

// Elementary Stream Types
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_AAC: u8 = 0x0f;

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
pub const SYNC_BYTE: u8 = 0x47;
/// PCR ticks per 90 kHz tick.
pub const PCR_EXTENSION_SCALE: u64 = 300;

#[derive(Debug, Clone)]
pub struct PATEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default)]
pub struct PAT {
    pub entries: Vec<PATEntry>,
}

impl PAT {
    pub fn write_to(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

#[derive(Debug, Clone, Default)]
pub struct PMT {
    pub pcr_pid: u16,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl PMT {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);
        // no program descriptors
        buf.put_u16(0xf << 12);
        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);
            buf.put_u16(0xf << 12);
        }
    }
}

/// Wraps a table body in a long-form PSI section, CRC included.
pub fn psi_section(table_id: u8, table_id_extension: u16, body: &[u8]) -> BytesMut {
    let section_length = 5 + body.len() + 4;
    let mut buf = BytesMut::with_capacity(3 + section_length);
    buf.put_u8(table_id);
    buf.put_u16(0xB000 | (section_length as u16 & 0x3FF));
    buf.put_u16(table_id_extension);
    buf.put_u8(0xC1); // version 0, current
    buf.put_u8(0); // section number
    buf.put_u8(0); // last section number
    buf.put_slice(body);
    let crc = MPEG2_CRC.calculate(&buf);
    buf.put_u32(crc);
    buf
}

#[derive(Debug, Default)]
pub struct TSHeader {
    pub payload_unit_start: bool,
    pub pid: u16,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl TSHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(SYNC_BYTE);

        let mut b1 = ((self.pid >> 8) & 0x1f) as u8;
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        buf.put_u8(b1);
        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.continuity_counter & 0x0f;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        buf.put_u8(b3);
    }
}

/// Adaptation field contents for one packet.
#[derive(Debug, Clone, Default)]
pub struct AdaptationField {
    pub random_access: bool,
    pub discontinuity: bool,
    /// 33-bit base in 90 kHz units; the extension is always zero.
    pub pcr: Option<u64>,
    pub stuffing: usize,
}

impl AdaptationField {
    /// Bytes the field occupies, its length byte included.
    pub fn len(&self) -> usize {
        if self.is_empty() && self.stuffing == 0 {
            return 0;
        }
        if !self.has_flags() && self.stuffing == 1 {
            return 1;
        }
        2 + if self.pcr.is_some() { 6 } else { 0 } + self.stuffing_bytes()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_flags() && self.stuffing == 0
    }

    fn has_flags(&self) -> bool {
        self.random_access || self.discontinuity || self.pcr.is_some()
    }

    /// `stuffing` counts the whole padding need; the flags byte absorbs one
    /// of those bytes when only stuffing is present.
    fn stuffing_bytes(&self) -> usize {
        if self.has_flags() {
            self.stuffing
        } else {
            self.stuffing.saturating_sub(2)
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        match self.len() {
            0 => return,
            1 => {
                buf.put_u8(0);
                return;
            }
            len => buf.put_u8((len - 1) as u8),
        }
        let mut flags = 0u8;
        if self.discontinuity {
            flags |= 0x80;
        }
        if self.random_access {
            flags |= 0x40;
        }
        if self.pcr.is_some() {
            flags |= 0x10;
        }
        buf.put_u8(flags);
        if let Some(pcr) = self.pcr {
            buf.put_slice(&encode_pcr(pcr));
        }
        for _ in 0..self.stuffing_bytes() {
            buf.put_u8(0xFF);
        }
    }
}

/// 33-bit base, 6 reserved bits, 9-bit extension (zero).
pub fn encode_pcr(base: u64) -> [u8; 6] {
    let value = (base & 0x1_FFFF_FFFF) << 15 | 0x3f << 9;
    let bytes = value.to_be_bytes();
    [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
}

pub fn decode_pcr(raw: &[u8; 6]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(raw);
    let value = u64::from_be_bytes(bytes);
    (value >> 15) * PCR_EXTENSION_SCALE + (value & 0x1ff)
}
