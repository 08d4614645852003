//! Bounded window of recent concentration frames.
//!
//! Holds the last 24 simulation frames (one simulated day at the 1 h tick)
//! in a fixed-capacity ring; insertion overwrites the oldest entry once the
//! window is full.

use crate::dispersion::ConcentrationGrid;
use serde::{Deserialize, Serialize};

/// Frames retained for exposure aggregation: one simulated day.
pub const FRAME_WINDOW: usize = 24;

/// Fixed-capacity ring of concentration frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameRingBuffer {
    frames: Vec<ConcentrationGrid>,
    /// Oldest entry once the buffer is full; insertion point for overwrite.
    head: usize,
}

impl FrameRingBuffer {
    pub fn new() -> Self {
        FrameRingBuffer {
            frames: Vec::with_capacity(FRAME_WINDOW),
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame, evicting the oldest entry when full.
    pub fn push(&mut self, frame: ConcentrationGrid) {
        if self.frames.len() < FRAME_WINDOW {
            self.frames.push(frame);
        } else {
            self.frames[self.head] = frame;
            self.head = (self.head + 1) % FRAME_WINDOW;
        }
    }

    /// Lazy iterator from the most recently pushed frame to the oldest
    /// currently held, correct across wraparound. Restartable: each call
    /// yields a fresh pass.
    pub fn newest_first(&self) -> NewestFirst<'_> {
        NewestFirst {
            buffer: self,
            yielded: 0,
        }
    }

    /// Widest half-extent among buffered frames, if any.
    pub fn max_half_extent(&self) -> Option<f32> {
        self.frames
            .iter()
            .map(|f| f.half)
            .fold(None, |acc, half| match acc {
                Some(best) if best >= half => Some(best),
                _ => Some(half),
            })
    }

    /// Physical index of the k-th newest frame.
    fn index_from_newest(&self, k: usize) -> usize {
        if self.frames.len() < FRAME_WINDOW {
            self.frames.len() - 1 - k
        } else {
            (self.head + FRAME_WINDOW - 1 - k) % FRAME_WINDOW
        }
    }
}

/// Iterator over buffered frames, newest first.
pub struct NewestFirst<'a> {
    buffer: &'a FrameRingBuffer,
    yielded: usize,
}

impl<'a> Iterator for NewestFirst<'a> {
    type Item = &'a ConcentrationGrid;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.buffer.len() {
            return None;
        }
        let index = self.buffer.index_from_newest(self.yielded);
        self.yielded += 1;
        Some(&self.buffer.frames[index])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.buffer.len() - self.yielded;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for NewestFirst<'_> {}
