use bytes::{BufMut, BytesMut};

/// Packetized Elementary Stream (PES) header.
///
/// Only the fields this muxer sets are modelled: stream id, timestamps and the
/// data alignment flag. Timestamps are 33-bit values in 90 kHz units.
#[derive(Debug, Clone, Default)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio)
    pub stream_id: u8,
    /// Presentation Time Stamp
    pub pts: Option<u64>,
    /// Decoding Time Stamp, only written alongside a PTS
    pub dts: Option<u64>,
    pub data_alignment: bool,
}

impl PESHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts);
        self
    }

    fn header_data_length(&self) -> usize {
        match (self.pts, self.dts) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) => 5,
            _ => 0,
        }
    }

    /// Bytes written by [`write_to`](Self::write_to).
    pub fn encoded_len(&self) -> usize {
        9 + self.header_data_length()
    }

    /// Writes the header for a payload of `payload_len` bytes. Video streams
    /// and payloads too large for the 16-bit length field get length 0
    /// (unbounded).
    pub fn write_to(&self, buf: &mut BytesMut, payload_len: usize) {
        buf.put_slice(&[0x00, 0x00, 0x01]);
        buf.put_u8(self.stream_id);

        let packet_length = 3 + self.header_data_length() + payload_len;
        let is_video = self.stream_id & 0xF0 == 0xE0;
        if is_video || packet_length > u16::MAX as usize {
            buf.put_u16(0);
        } else {
            buf.put_u16(packet_length as u16);
        }

        // '10' marker bits
        let mut flags = 0x80u8;
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let pts_dts_flags = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0xC0,
            (Some(_), None) => 0x80,
            _ => 0x00,
        };
        buf.put_u8(pts_dts_flags);
        buf.put_u8(self.header_data_length() as u8);

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
            if let Some(dts) = self.dts {
                write_timestamp(buf, 0x10, dts);
            }
        }
    }
}

/// Writes a 33-bit timestamp split across 5 bytes with marker bits.
fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & 0x1_FFFF_FFFF;
    buf.put_u8(marker | ((ts >> 29) & 0x0E) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xFFFE) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xFFFE) | 0x01) as u16);
}

/// Inverse of the 5-byte timestamp encoding.
pub fn read_timestamp(raw: &[u8]) -> Option<u64> {
    let raw = raw.get(..5)?;
    Some(
        ((raw[0] as u64 >> 1) & 0x07) << 30
            | (raw[1] as u64) << 22
            | ((raw[2] as u64) >> 1) << 15
            | (raw[3] as u64) << 7
            | (raw[4] as u64) >> 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pes_header_with_pts_and_dts() {
        let header = PESHeader::new(0xe0).with_pts(183_000).with_dts(180_000);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf, 1000);
        assert_eq!(buf.len(), header.encoded_len());
        assert_eq!(&buf[..9], &[0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0xC0, 10]);
        assert_eq!(buf[9] & 0xF0, 0x30);
        assert_eq!(buf[14] & 0xF0, 0x10);
        assert_eq!(read_timestamp(&buf[9..]), Some(183_000));
        assert_eq!(read_timestamp(&buf[14..]), Some(180_000));
    }

    #[test]
    fn test_audio_pes_carries_length() {
        let header = PESHeader::new(0xc0).with_pts(0x1_2345_6789);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf, 100);
        assert_eq!(&buf[4..6], &(3u16 + 5 + 100).to_be_bytes());
        assert_eq!(read_timestamp(&buf[9..]), Some(0x1_2345_6789));
    }
}
