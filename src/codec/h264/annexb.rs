//! Conversion from length-prefixed (MP4) to start-code (Annex B) NAL framing.

use super::record::ParameterSetRecord;
use super::types::NalUnitType;
use crate::error::{MuxError, Result};
use bytes::{BufMut, BytesMut};

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Access unit delimiter with primary_pic_type 7 (any slice type).
const ACCESS_UNIT_DELIMITER: [u8; 2] = [0x09, 0xF0];

/// Splits a sample of 4-byte length-prefixed NAL units.
pub fn split_avcc(sample: &[u8]) -> Result<Vec<&[u8]>> {
    let mut units = Vec::new();
    let mut rest = sample;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(MuxError::Format(format!(
                "{} stray bytes after the last NAL unit",
                rest.len()
            )));
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let unit = rest.get(4..4 + len).ok_or_else(|| {
            MuxError::Format(format!(
                "NAL length {} exceeds the {} bytes left in the sample",
                len,
                rest.len() - 4
            ))
        })?;
        units.push(unit);
        rest = &rest[4 + len..];
    }
    Ok(units)
}

/// Converts one MP4 video sample to an Annex B access unit for transport
/// streams: an access unit delimiter first, then SPS/PPS from `record` in
/// front of key frames that lack them, then every NAL behind a start code.
pub fn avcc_to_annexb(
    sample: &[u8],
    record: Option<&ParameterSetRecord>,
    is_key: bool,
    out: &mut BytesMut,
) -> Result<()> {
    let units = split_avcc(sample)?;
    let nal_type = |unit: &[u8]| unit.first().map(|b| NalUnitType::from(b & 0x1F));

    if units.first().and_then(|u| nal_type(*u)) != Some(NalUnitType::AccessUnitDelimiter) {
        out.put_slice(&START_CODE);
        out.put_slice(&ACCESS_UNIT_DELIMITER);
    }
    let has_sps = units
        .iter()
        .any(|u| nal_type(*u) == Some(NalUnitType::Sps));
    if is_key && !has_sps {
        if let Some(record) = record {
            out.put_slice(&START_CODE);
            out.put_slice(&record.sps);
            out.put_slice(&START_CODE);
            out.put_slice(&record.pps);
        }
    }
    for unit in units {
        out.put_slice(&START_CODE);
        out.put_slice(unit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_avcc_rejects_overrun() {
        let sample = [0, 0, 0, 2, 0x65, 0x88, 0, 0, 0, 9, 0x41];
        assert!(split_avcc(&sample).is_err());
        assert_eq!(split_avcc(&sample[..6]).unwrap(), vec![&[0x65, 0x88][..]]);
    }

    #[test]
    fn test_keyframe_gets_delimiter_and_parameter_sets() {
        let record = ParameterSetRecord::new(vec![0x67, 0x42, 0x00, 0x1E], vec![0x68, 0xCE]);
        let sample = [0, 0, 0, 3, 0x65, 0x88, 0x84];
        let mut out = BytesMut::new();
        avcc_to_annexb(&sample, Some(&record), true, &mut out).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&START_CODE);
        expected.extend_from_slice(&[0x09, 0xF0]);
        expected.extend_from_slice(&START_CODE);
        expected.extend_from_slice(&[0x67, 0x42, 0x00, 0x1E]);
        expected.extend_from_slice(&START_CODE);
        expected.extend_from_slice(&[0x68, 0xCE]);
        expected.extend_from_slice(&START_CODE);
        expected.extend_from_slice(&[0x65, 0x88, 0x84]);
        assert_eq!(out.as_ref(), &expected[..]);

        let mut out = BytesMut::new();
        avcc_to_annexb(&[0, 0, 0, 2, 0x41, 0x9A], Some(&record), false, &mut out).unwrap();
        assert_eq!(out.as_ref(), &[0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x41, 0x9A]);
    }
}
