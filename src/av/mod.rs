use bytes::Bytes;

mod packet;
pub mod timebase;

pub use packet::*;
pub use timebase::{compare_ts, rescale, Timebase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    H264,
    AAC,
}

impl CodecType {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            CodecType::H264 => MediaKind::Video,
            CodecType::AAC => MediaKind::Audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecParameters {
    Video {
        width: u32,
        height: u32,
        /// AVC profile_idc, e.g. 100 for High.
        profile: u8,
        bitrate: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u8,
        bitrate: u32,
    },
}

/// Everything a muxer needs to declare one track.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub codec: CodecType,
    pub timebase: Timebase,
    pub params: CodecParameters,
    /// ParameterSetRecord (avcC) for H.264, AudioSpecificConfig for AAC.
    pub extra_data: Option<Bytes>,
}

impl StreamDescriptor {
    /// Video stream with profile 100 (High) and unknown bitrate.
    pub fn video(codec: CodecType, timebase: Timebase, width: u32, height: u32) -> Self {
        Self {
            codec,
            timebase,
            params: CodecParameters::Video {
                width,
                height,
                profile: 100,
                bitrate: 0,
            },
            extra_data: None,
        }
    }

    pub fn audio(codec: CodecType, timebase: Timebase, sample_rate: u32, channels: u8) -> Self {
        Self {
            codec,
            timebase,
            params: CodecParameters::Audio {
                sample_rate,
                channels,
                bitrate: 0,
            },
            extra_data: None,
        }
    }

    pub fn with_extra_data(mut self, extra_data: impl Into<Bytes>) -> Self {
        self.extra_data = Some(extra_data.into());
        self
    }

    pub fn with_bitrate(mut self, value: u32) -> Self {
        match &mut self.params {
            CodecParameters::Video { bitrate, .. } | CodecParameters::Audio { bitrate, .. } => {
                *bitrate = value
            }
        }
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.media_kind()
    }

    pub fn width(&self) -> Option<u32> {
        match self.params {
            CodecParameters::Video { width, .. } => Some(width),
            CodecParameters::Audio { .. } => None,
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self.params {
            CodecParameters::Video { height, .. } => Some(height),
            CodecParameters::Audio { .. } => None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match self.params {
            CodecParameters::Audio { sample_rate, .. } => Some(sample_rate),
            CodecParameters::Video { .. } => None,
        }
    }

    pub fn extra_data(&self) -> Option<&[u8]> {
        self.extra_data.as_deref()
    }
}
