use super::types::{AudioObjectType, AudioSpecificConfig};
use crate::error::{MuxError, Result};
use crate::utils::{BitReader, BitWriter};

pub const ADTS_HEADER_LEN: usize = 7;

/// The fixed and variable ADTS header fields, without CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsHeader {
    pub config: AudioSpecificConfig,
    /// Header plus payload.
    pub frame_length: u16,
}

impl AdtsHeader {
    /// Header for a raw AAC payload of `payload_len` bytes.
    pub fn for_payload(config: AudioSpecificConfig, payload_len: usize) -> Result<Self> {
        let frame_length = payload_len + ADTS_HEADER_LEN;
        if frame_length > 0x1FFF {
            return Err(MuxError::Format(format!(
                "AAC frame of {} bytes does not fit an ADTS header",
                payload_len
            )));
        }
        Ok(Self {
            config,
            frame_length: frame_length as u16,
        })
    }

    pub fn to_bytes(&self) -> [u8; ADTS_HEADER_LEN] {
        let mut w = BitWriter::new();
        w.write_bits(0xFFF, 12); // syncword
        w.write_bits(0, 1); // MPEG-4
        w.write_bits(0, 2); // layer
        w.write_bits(1, 1); // protection absent
        w.write_bits(self.config.object_type as u32 - 1, 2);
        w.write_bits(self.config.sample_rate_index as u32, 4);
        w.write_bits(0, 1); // private
        w.write_bits(self.config.channel_configuration as u32, 3);
        w.write_bits(0, 4); // original, home, copyright bits
        w.write_bits(self.frame_length as u32, 13);
        w.write_bits(0x7FF, 11); // VBR buffer fullness
        w.write_bits(0, 2); // one raw data block
        let bytes = w.finish();
        let mut out = [0u8; ADTS_HEADER_LEN];
        out.copy_from_slice(&bytes);
        out
    }

    /// Parses the fixed and variable header fields at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ADTS_HEADER_LEN {
            return Err(MuxError::Format("ADTS header too short".into()));
        }
        let mut reader = BitReader::new(data);
        if reader.read_bits(12)? != 0xFFF {
            return Err(MuxError::Format("invalid ADTS sync word".into()));
        }
        reader.skip_bits(4)?; // id, layer, protection_absent
        let object_type = AudioObjectType::try_from(reader.read_bits(2)? as u8 + 1)?;
        let sample_rate_index = reader.read_bits(4)? as u8;
        reader.skip_bits(1)?;
        let channel_configuration = reader.read_bits(3)? as u8;
        reader.skip_bits(4)?;
        let frame_length = reader.read_bits(13)? as u16;
        Ok(Self {
            config: AudioSpecificConfig {
                object_type,
                sample_rate_index,
                channel_configuration,
            },
            frame_length,
        })
    }
}
