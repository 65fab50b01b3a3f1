// src/capture/merger.rs
//
// Multi-stream time merger. One pending frame per stream; every pull refills
// the empty slots, finds the earliest pending timestamp and emits the whole
// set of streams tied at it. Streams from the same recording share
// microsecond timestamps, so ties co-emitting is the normal case, not an
// edge case.

use crate::capture::reader::{CaptureStream, StreamFrame};

/// All frames of one merged instant, in stream order.
#[derive(Debug)]
pub struct MergedFrame {
    pub timestamp_us: u64,
    pub frames: Vec<StreamFrame>,
}

struct StreamSlot {
    stream: CaptureStream,
    pending: Option<StreamFrame>,
}

pub struct FrameMerger {
    slots: Vec<StreamSlot>,
}

impl FrameMerger {
    pub fn new(streams: Vec<CaptureStream>) -> Self {
        Self {
            slots: streams
                .into_iter()
                .map(|stream| StreamSlot {
                    stream,
                    pending: None,
                })
                .collect(),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.slots.len()
    }

    /// Next merged frame set, or None when every stream is exhausted.
    pub fn pull_next(&mut self) -> Option<MergedFrame> {
        for slot in &mut self.slots {
            if slot.pending.is_none() && !slot.stream.is_exhausted() {
                slot.pending = slot.stream.read_next();
            }
        }

        let timestamp_us = self
            .slots
            .iter()
            .filter_map(|slot| slot.pending.as_ref().map(StreamFrame::timestamp_us))
            .min()?;

        let frames = self
            .slots
            .iter_mut()
            .filter(|slot| {
                slot.pending
                    .as_ref()
                    .is_some_and(|frame| frame.timestamp_us() == timestamp_us)
            })
            .filter_map(|slot| slot.pending.take())
            .collect();

        Some(MergedFrame {
            timestamp_us,
            frames,
        })
    }
}
