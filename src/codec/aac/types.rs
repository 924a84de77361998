use crate::error::{MuxError, Result};
use crate::utils::{BitReader, BitWriter};
use bytes::Bytes;

/// MPEG-4 audio object types that fit in the 2-bit ADTS profile field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioObjectType {
    Main = 1,
    LowComplexity = 2,
    Ssr = 3,
    Ltp = 4,
}

impl TryFrom<u8> for AudioObjectType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(AudioObjectType::Main),
            2 => Ok(AudioObjectType::LowComplexity),
            3 => Ok(AudioObjectType::Ssr),
            4 => Ok(AudioObjectType::Ltp),
            other => Err(MuxError::Format(format!(
                "unsupported AAC object type {}",
                other
            ))),
        }
    }
}

pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Samples per AAC access unit.
pub const SAMPLES_PER_FRAME: i64 = 1024;

pub fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// The two-byte (or longer) MPEG-4 AudioSpecificConfig carried in `esds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: AudioObjectType,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// AAC-LC at a standard sampling rate.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let sample_rate_index = sample_rate_index(sample_rate).ok_or_else(|| {
            MuxError::Format(format!("unsupported AAC sample rate {}", sample_rate))
        })?;
        if channels == 0 || channels > 7 {
            return Err(MuxError::Format(format!(
                "unsupported AAC channel count {}",
                channels
            )));
        }
        Ok(Self {
            object_type: AudioObjectType::LowComplexity,
            sample_rate_index,
            channel_configuration: channels,
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(data);
        let object_type = AudioObjectType::try_from(reader.read_bits(5)? as u8)?;
        let sample_rate_index = reader.read_bits(4)? as u8;
        if sample_rate_index as usize >= SAMPLE_RATES.len() {
            return Err(MuxError::Format(format!(
                "AudioSpecificConfig uses sample rate index {}",
                sample_rate_index
            )));
        }
        let channel_configuration = reader.read_bits(4)? as u8;
        Ok(Self {
            object_type,
            sample_rate_index,
            channel_configuration,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = BitWriter::new();
        w.write_bits(self.object_type as u32, 5);
        w.write_bits(self.sample_rate_index as u32, 4);
        w.write_bits(self.channel_configuration as u32, 4);
        w.write_bits(0, 3); // frame length 1024, no core coder, no extension
        Bytes::from(w.finish())
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }
}
