//! ISO BMFF box serialization.

use bytes::{BufMut, BytesMut};

pub type FourCc = [u8; 4];

pub const FTYP: FourCc = *b"ftyp";
pub const MOOV: FourCc = *b"moov";
pub const MVHD: FourCc = *b"mvhd";
pub const TRAK: FourCc = *b"trak";
pub const TKHD: FourCc = *b"tkhd";
pub const MDIA: FourCc = *b"mdia";
pub const MDHD: FourCc = *b"mdhd";
pub const HDLR: FourCc = *b"hdlr";
pub const MINF: FourCc = *b"minf";
pub const VMHD: FourCc = *b"vmhd";
pub const SMHD: FourCc = *b"smhd";
pub const DINF: FourCc = *b"dinf";
pub const DREF: FourCc = *b"dref";
pub const URL: FourCc = *b"url ";
pub const STBL: FourCc = *b"stbl";
pub const STSD: FourCc = *b"stsd";
pub const STTS: FourCc = *b"stts";
pub const CTTS: FourCc = *b"ctts";
pub const STSC: FourCc = *b"stsc";
pub const STSZ: FourCc = *b"stsz";
pub const STZ2: FourCc = *b"stz2";
pub const STCO: FourCc = *b"stco";
pub const CO64: FourCc = *b"co64";
pub const STSS: FourCc = *b"stss";
pub const AVC1: FourCc = *b"avc1";
pub const AVC3: FourCc = *b"avc3";
pub const AVCC: FourCc = *b"avcC";
pub const MP4A: FourCc = *b"mp4a";
pub const ESDS: FourCc = *b"esds";
pub const MVEX: FourCc = *b"mvex";
pub const TREX: FourCc = *b"trex";
pub const MOOF: FourCc = *b"moof";
pub const MFHD: FourCc = *b"mfhd";
pub const TRAF: FourCc = *b"traf";
pub const TFHD: FourCc = *b"tfhd";
pub const TFDT: FourCc = *b"tfdt";
pub const TRUN: FourCc = *b"trun";
pub const MDAT: FourCc = *b"mdat";
pub const MFRA: FourCc = *b"mfra";
pub const TFRA: FourCc = *b"tfra";
pub const MFRO: FourCc = *b"mfro";

/// Seconds between 1904-01-01 and 1970-01-01.
pub const MP4_EPOCH_OFFSET: i64 = 2_082_844_800;

pub const UNITY_MATRIX: [u32; 9] = [
    0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000,
];

pub mod tfhd_flags {
    pub const BASE_DATA_OFFSET: u32 = 0x00_0001;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
    pub const DEFAULT_SAMPLE_DURATION: u32 = 0x00_0008;
    pub const DEFAULT_SAMPLE_SIZE: u32 = 0x00_0010;
    pub const DEFAULT_SAMPLE_FLAGS: u32 = 0x00_0020;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
}

pub mod trun_flags {
    pub const DATA_OFFSET: u32 = 0x00_0001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
    pub const SAMPLE_DURATION: u32 = 0x00_0100;
    pub const SAMPLE_SIZE: u32 = 0x00_0200;
    pub const SAMPLE_FLAGS: u32 = 0x00_0400;
    pub const SAMPLE_COMPOSITION_OFFSET: u32 = 0x00_0800;
}

/// `sample_depends_on = 2`: a sync sample.
pub const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
/// `sample_depends_on = 1` with `sample_is_non_sync_sample` set.
pub const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

pub fn is_sync_sample(flags: u32) -> bool {
    flags & 0x0001_0000 == 0
}

/// Appends a box whose size is patched in once `body` has run.
pub fn write_box(buf: &mut BytesMut, fourcc: FourCc, body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(&fourcc);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

pub fn write_full_box(
    buf: &mut BytesMut,
    fourcc: FourCc,
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, fourcc, |buf| {
        buf.put_u32((version as u32) << 24 | (flags & 0x00FF_FFFF));
        body(buf);
    })
}

/// MPEG-4 descriptor with the fixed four-byte length form.
pub fn write_descriptor(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_at = buf.len();
    buf.put_slice(&[0x80, 0x80, 0x80, 0x00]);
    let start = buf.len();
    body(buf);
    let len = (buf.len() - start) as u32;
    buf[len_at] = 0x80 | ((len >> 21) & 0x7F) as u8;
    buf[len_at + 1] = 0x80 | ((len >> 14) & 0x7F) as u8;
    buf[len_at + 2] = 0x80 | ((len >> 7) & 0x7F) as u8;
    buf[len_at + 3] = (len & 0x7F) as u8;
}

pub fn put_matrix(buf: &mut BytesMut) {
    for value in UNITY_MATRIX {
        buf.put_u32(value);
    }
}

/// ISO-639-2 "und" packed as three 5-bit letters.
pub const LANGUAGE_UND: u16 = (((b'u' - 0x60) as u16) << 10)
    | (((b'n' - 0x60) as u16) << 5)
    | ((b'd' - 0x60) as u16);
