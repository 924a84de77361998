use bytes::Bytes;

/// One encoded access unit with timing in its stream's timebase.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub stream_index: usize,
    pub is_key: bool,
}

impl Frame {
    /// Frame at time 0 with no duration, on stream 0, not a keyframe.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: 0,
            dts: 0,
            duration: 0,
            stream_index: 0,
            is_key: false,
        }
    }

    /// Sets pts and dts together, for streams without frame reordering.
    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.pts = ts;
        self.dts = ts;
        self
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = dts;
        self
    }

    /// Duration in the stream's timebase; 0 means unknown.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    /// Presentation offset relative to the decode timestamp, or `None` when
    /// the difference does not fit an `i64` (e.g. a `i64::MIN` pts marker).
    pub fn composition_offset(&self) -> Option<i64> {
        self.pts.checked_sub(self.dts)
    }
}
