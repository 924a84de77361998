//! AVC decoder configuration record carrying exactly one SPS and one PPS.
//!
//! Layout:
//!
//! ```text
//! [0x01][profile][compat][level][0xFF][0xE1][u16 spsLen][sps][0x01][u16 ppsLen][pps]
//! ```
//!
//! `0xFF` is six reserved bits plus a 4-byte NAL length size, `0xE1` is three
//! reserved bits plus an SPS count of one.

use crate::error::{MuxError, Result};
use bytes::{BufMut, Bytes, BytesMut};

const CONFIGURATION_VERSION: u8 = 0x01;
const LENGTH_SIZE_BYTE: u8 = 0xFC | 3;
const SPS_COUNT_BYTE: u8 = 0xE0 | 1;
const PPS_COUNT_BYTE: u8 = 0x01;

/// Offset of the SPS length field.
const SPS_LENGTH_OFFSET: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSetRecord {
    pub sps: Bytes,
    pub pps: Bytes,
}

impl ParameterSetRecord {
    pub fn new(sps: impl Into<Bytes>, pps: impl Into<Bytes>) -> Self {
        Self {
            sps: sps.into(),
            pps: pps.into(),
        }
    }

    /// Builds the record. The SPS must include its NAL header byte, since
    /// bytes 1..4 supply the profile, compatibility and level fields.
    pub fn encode(sps: &[u8], pps: &[u8]) -> Result<Bytes> {
        if sps.len() < 4 {
            return Err(MuxError::Configuration(format!(
                "SPS too short for a parameter-set record: {} bytes",
                sps.len()
            )));
        }
        let sps_len = u16::try_from(sps.len()).map_err(|_| {
            MuxError::Configuration(format!("SPS too long: {} bytes", sps.len()))
        })?;
        let pps_len = u16::try_from(pps.len()).map_err(|_| {
            MuxError::Configuration(format!("PPS too long: {} bytes", pps.len()))
        })?;

        let mut out = BytesMut::with_capacity(8 + sps.len() + 3 + pps.len());
        out.put_u8(CONFIGURATION_VERSION);
        out.put_slice(&sps[1..4]);
        out.put_u8(LENGTH_SIZE_BYTE);
        out.put_u8(SPS_COUNT_BYTE);
        out.put_u16(sps_len);
        out.put_slice(sps);
        out.put_u8(PPS_COUNT_BYTE);
        out.put_u16(pps_len);
        out.put_slice(pps);
        Ok(out.freeze())
    }

    /// Splits a record back into `(sps, pps)`.
    ///
    /// Bytes after the PPS (the High-profile chroma extension) are ignored.
    pub fn decode(record: &[u8]) -> Result<(Bytes, Bytes)> {
        if record.len() < SPS_LENGTH_OFFSET + 2 {
            return Err(MuxError::Configuration(format!(
                "parameter-set record too short: {} bytes",
                record.len()
            )));
        }
        check_byte(record, 0, CONFIGURATION_VERSION, "configuration version")?;
        check_byte(record, 4, LENGTH_SIZE_BYTE, "length size")?;
        check_byte(record, 5, SPS_COUNT_BYTE, "SPS count")?;

        let sps_len = read_u16(record, SPS_LENGTH_OFFSET)? as usize;
        let sps_start = SPS_LENGTH_OFFSET + 2;
        let sps = slice(record, sps_start, sps_len, "SPS")?;

        let pps_count_offset = sps_start + sps_len;
        if record.get(pps_count_offset).is_none() {
            return Err(MuxError::Configuration(
                "parameter-set record ends before the PPS count".into(),
            ));
        }
        check_byte(record, pps_count_offset, PPS_COUNT_BYTE, "PPS count")?;
        let pps_len = read_u16(record, sps_len + 9)? as usize;
        let pps = slice(record, sps_len + 11, pps_len, "PPS")?;

        Ok((Bytes::copy_from_slice(sps), Bytes::copy_from_slice(pps)))
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Self::encode(&self.sps, &self.pps)
    }

    /// Reads the first SPS and PPS of an avcC record.
    pub fn parse(record: &[u8]) -> Result<Self> {
        let (sps, pps) = Self::decode(record)?;
        Ok(Self { sps, pps })
    }

    /// `(profile_idc, level_idc)` from the SPS header.
    pub fn profile_level(&self) -> Option<(u8, u8)> {
        Some((*self.sps.get(1)?, *self.sps.get(3)?))
    }
}

fn check_byte(record: &[u8], offset: usize, expected: u8, what: &str) -> Result<()> {
    let actual = record[offset];
    if actual != expected {
        return Err(MuxError::Configuration(format!(
            "bad {} byte at offset {}: expected {:#04x}, got {:#04x}",
            what, offset, expected, actual
        )));
    }
    Ok(())
}

fn read_u16(record: &[u8], offset: usize) -> Result<u16> {
    record
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| {
            MuxError::Configuration(format!(
                "parameter-set record truncated at length field {}",
                offset
            ))
        })
}

fn slice<'a>(record: &'a [u8], start: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    record.get(start..start + len).ok_or_else(|| {
        MuxError::Configuration(format!(
            "{} length {} runs past the end of a {}-byte record",
            what,
            len,
            record.len()
        ))
    })
}
