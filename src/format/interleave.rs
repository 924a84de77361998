//! Two-track interleaving by presentation time.

use super::ElementaryStreamSource;
use crate::av::{compare_ts, rescale, Frame, Timebase};
use crate::error::{MuxError, Result};
use std::cmp::Ordering;

/// One input of the scheduler: stream 0 of a source plus where its frames
/// go. Frames from the source's other streams are skipped.
pub struct TrackInput<S> {
    pub source: S,
    pub output_index: usize,
    pub output_timebase: Timebase,
}

impl<S: ElementaryStreamSource> TrackInput<S> {
    /// Sends stream 0 of `source` to `output_index`, rescaled to
    /// `output_timebase`.
    pub fn new(source: S, output_index: usize, output_timebase: Timebase) -> Self {
        Self {
            source,
            output_index,
            output_timebase,
        }
    }
}

struct Lane<S> {
    input: TrackInput<S>,
    /// Frame read ahead at construction to seed `next_pts`.
    lookahead: Option<Frame>,
    next_pts: i64,
    finished: bool,
}

impl<S: ElementaryStreamSource> Lane<S> {
    fn open(mut input: TrackInput<S>) -> Result<Self> {
        if !input.output_timebase.is_valid() {
            return Err(MuxError::Configuration(format!(
                "invalid output timebase {}",
                input.output_timebase
            )));
        }
        let first = read_rescaled(&mut input)?;
        Ok(Self {
            next_pts: first.as_ref().map_or(0, |f| f.pts),
            finished: first.is_none(),
            lookahead: first,
            input,
        })
    }

    fn pull(&mut self) -> Result<Option<Frame>> {
        let frame = match self.lookahead.take() {
            Some(frame) => Some(frame),
            None => read_rescaled(&mut self.input)?,
        };
        match &frame {
            Some(f) => self.next_pts = f.pts.saturating_add(f.duration),
            None => self.finished = true,
        }
        Ok(frame)
    }
}

fn read_rescaled<S: ElementaryStreamSource>(input: &mut TrackInput<S>) -> Result<Option<Frame>> {
    let mut frame = loop {
        match input.source.read_frame()? {
            Some(frame) if frame.stream_index == 0 => break frame,
            Some(_) => continue,
            None => return Ok(None),
        }
    };
    let from = input
        .source
        .streams()
        .get(frame.stream_index)
        .map(|s| s.timebase)
        .ok_or_else(|| {
            MuxError::Format(format!(
                "source produced frame for unknown stream {}",
                frame.stream_index
            ))
        })?;
    let to = input.output_timebase;
    frame.pts = rescale(frame.pts, from, to);
    frame.dts = rescale(frame.dts, from, to);
    frame.duration = rescale(frame.duration, from, to);
    frame.stream_index = input.output_index;
    Ok(Some(frame))
}

/// Merges a video and an audio source into one presentation-ordered
/// sequence.
///
/// Each step emits from the track whose next presentation time is earlier,
/// comparing across clocks without rounding. Video wins exact ties. Once one
/// track ends the other is drained.
pub struct InterleavingScheduler<S> {
    video: Option<Lane<S>>,
    audio: Option<Lane<S>>,
}

impl<S: ElementaryStreamSource> InterleavingScheduler<S> {
    /// Reads one frame from each track to seed the comparison.
    pub fn new(video: Option<TrackInput<S>>, audio: Option<TrackInput<S>>) -> Result<Self> {
        Ok(Self {
            video: video.map(Lane::open).transpose()?,
            audio: audio.map(Lane::open).transpose()?,
        })
    }

    /// Next frame in output order, or `None` once both tracks are exhausted.
    pub fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            let video = self.video.as_mut().filter(|l| !l.finished);
            let audio = self.audio.as_mut().filter(|l| !l.finished);
            let lane = match (video, audio) {
                (None, None) => return Ok(None),
                (Some(v), None) => v,
                (None, Some(a)) => a,
                (Some(v), Some(a)) => {
                    let order = compare_ts(
                        v.next_pts,
                        v.input.output_timebase,
                        a.next_pts,
                        a.input.output_timebase,
                    );
                    log::trace!(
                        "interleave: video next {} vs audio next {}: {:?}",
                        v.next_pts,
                        a.next_pts,
                        order
                    );
                    if order == Ordering::Greater {
                        a
                    } else {
                        v
                    }
                }
            };
            if let Some(frame) = lane.pull()? {
                return Ok(Some(frame));
            }
        }
    }
}
