use bytes::Bytes;

/// One NAL unit, header byte included, emulation prevention bytes left in place.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub nal_ref_idc: u8,
    pub data: Bytes,
}

impl NalUnit {
    /// Returns `None` for an empty buffer.
    pub fn new(data: Bytes) -> Option<Self> {
        let header = *data.first()?;
        Some(Self {
            nal_type: NalUnitType::from(header & 0x1F),
            nal_ref_idc: (header >> 5) & 0x03,
            data,
        })
    }

    pub fn is_idr(&self) -> bool {
        self.nal_type == NalUnitType::CodedSliceIdr
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self.nal_type, NalUnitType::Sps | NalUnitType::Pps)
    }
}

/// Fields of a sequence parameter set that the muxers care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Unspecified,
    CodedSliceNonIdr,
    CodedSliceDataPartitionA,
    CodedSliceDataPartitionB,
    CodedSliceDataPartitionC,
    CodedSliceIdr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    FillerData,
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        match value {
            0 => NalUnitType::Unspecified,
            1 => NalUnitType::CodedSliceNonIdr,
            2 => NalUnitType::CodedSliceDataPartitionA,
            3 => NalUnitType::CodedSliceDataPartitionB,
            4 => NalUnitType::CodedSliceDataPartitionC,
            5 => NalUnitType::CodedSliceIdr,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::FillerData,
            other => NalUnitType::Other(other),
        }
    }
}
