use super::types::{NalUnit, NalUnitType, SpsInfo};
use crate::error::{MuxError, Result};
use crate::utils::BitReader;
use bytes::{BufMut, Bytes, BytesMut};

/// Tracks the most recent SPS/PPS seen in a stream.
#[derive(Debug, Default)]
pub struct H264Parser {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    sps_info: Option<SpsInfo>,
    scratch: BytesMut,
}

impl H264Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspects one NAL unit (header byte first) and records parameter sets.
    pub fn parse_nalu(&mut self, data: &[u8]) -> Result<NalUnit> {
        let nalu = NalUnit::new(Bytes::copy_from_slice(data))
            .ok_or_else(|| MuxError::Format("empty NAL unit".into()))?;
        match nalu.nal_type {
            NalUnitType::Sps => {
                let rbsp = self.remove_emulation_prevention(&data[1..]);
                self.sps_info = Some(parse_sps(&rbsp)?);
                self.sps = Some(nalu.data.clone());
            }
            NalUnitType::Pps => self.pps = Some(nalu.data.clone()),
            _ => {}
        }
        Ok(nalu)
    }

    /// Strips `00 00 03` emulation prevention bytes, producing the RBSP.
    pub fn remove_emulation_prevention(&mut self, data: &[u8]) -> Bytes {
        self.scratch.clear();
        let mut zeros = 0;
        for &byte in data {
            if zeros >= 2 && byte == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            self.scratch.put_u8(byte);
        }
        self.scratch.split().freeze()
    }

    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    pub fn sps_info(&self) -> Option<&SpsInfo> {
        self.sps_info.as_ref()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.sps_info.as_ref().map(|sps| (sps.width, sps.height))
    }
}

/// Parses an SPS RBSP (NAL header removed) far enough to get the picture size.
pub fn parse_sps(rbsp: &[u8]) -> Result<SpsInfo> {
    let mut reader = BitReader::new(rbsp);
    let profile_idc = reader.read_bits(8)? as u8;
    let constraint_flags = reader.read_bits(8)? as u8;
    let level_idc = reader.read_bits(8)? as u8;
    reader.read_golomb()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = reader.read_golomb()?;
        if chroma_format_idc == 3 {
            reader.skip_bits(1)?; // separate_colour_plane_flag
        }
        reader.read_golomb()?; // bit_depth_luma_minus8
        reader.read_golomb()?; // bit_depth_chroma_minus8
        reader.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if reader.read_bit()? {
            let lists = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..lists {
                if reader.read_bit()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.read_golomb()?; // log2_max_frame_num_minus4
    match reader.read_golomb()? {
        0 => {
            reader.read_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            reader.skip_bits(1)?;
            reader.read_signed_golomb()?;
            reader.read_signed_golomb()?;
            for _ in 0..reader.read_golomb()? {
                reader.read_signed_golomb()?;
            }
        }
        _ => {}
    }
    reader.read_golomb()?; // max_num_ref_frames
    reader.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let width_mbs = reader.read_golomb()? + 1;
    let height_map_units = reader.read_golomb()? + 1;
    let frame_mbs_only = reader.read_bit()?;
    if !frame_mbs_only {
        reader.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    reader.skip_bits(1)?; // direct_8x8_inference_flag

    let mut width = width_mbs * 16;
    let mut height = (2 - frame_mbs_only as u32) * height_map_units * 16;

    if reader.read_bit()? {
        let left = reader.read_golomb()?;
        let right = reader.read_golomb()?;
        let top = reader.read_golomb()?;
        let bottom = reader.read_golomb()?;
        let (crop_x, crop_y) = match chroma_format_idc {
            0 => (1, 2 - frame_mbs_only as u32),
            1 => (2, 2 * (2 - frame_mbs_only as u32)),
            2 => (2, 2 - frame_mbs_only as u32),
            _ => (1, 2 - frame_mbs_only as u32),
        };
        width = width.saturating_sub((left + right) * crop_x);
        height = height.saturating_sub((top + bottom) * crop_y);
    }

    Ok(SpsInfo {
        profile_idc,
        constraint_flags,
        level_idc,
        width,
        height,
    })
}

fn skip_scaling_list(reader: &mut BitReader, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_data::baseline_sps;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_baseline_sps() {
        let mut parser = H264Parser::new();
        let nalu = parser.parse_nalu(&baseline_sps(80, 45)).unwrap();
        assert_eq!(nalu.nal_type, NalUnitType::Sps);
        assert_eq!(parser.dimensions(), Some((1280, 720)));
        let info = parser.sps_info().unwrap();
        assert_eq!((info.profile_idc, info.level_idc), (66, 30));
    }

    #[test]
    fn test_remove_emulation_prevention() {
        let mut parser = H264Parser::new();
        let out = parser.remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03]);
        assert_eq!(out.as_ref(), &[0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_tracks_parameter_sets() {
        let mut parser = H264Parser::new();
        parser.parse_nalu(&baseline_sps(20, 15)).unwrap();
        parser.parse_nalu(&[0x68, 0xCE, 0x38, 0x80]).unwrap();
        let idr = parser.parse_nalu(&[0x65, 0x88, 0x84]).unwrap();
        assert!(idr.is_idr());
        assert_eq!(parser.pps().unwrap().as_ref(), &[0x68, 0xCE, 0x38, 0x80]);
        assert_eq!(parser.dimensions(), Some((320, 240)));
        assert!(parser.parse_nalu(&[]).is_err());
    }
}
