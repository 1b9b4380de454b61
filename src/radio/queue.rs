//! Frame Reassembly
//!
//! Inbound frames are queued by the radio and drained by the application
//! one per loop iteration. [`FrameSet`] tracks which sequence numbers of a
//! multi-frame response have been seen so that missing ones can be
//! requested again.

use heapless::Deque;

use crate::config::{FRAME_QUEUE_DEPTH, MAX_FRAME_INDEX};
use crate::packet::{RadioPacket, ALL_FRAMES, TX_REQ_INFO};
use crate::types::Generation;

use super::is_last_frame;

#[cfg(feature = "embedded")]
use defmt::warn;
#[cfg(not(feature = "embedded"))]
use log::warn;

/// The frame queue was full; the new frame was dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded FIFO of received frames
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: Deque<RadioPacket, FRAME_QUEUE_DEPTH>,
    frames_expected: u8,
    dropped: u32,
}

impl FrameQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: Deque::new(),
            frames_expected: 0,
            dropped: 0,
        }
    }

    /// Queue a frame; returns whether it carried the last-frame marker
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue is at capacity.
    pub fn push(&mut self, frame: RadioPacket, generation: Generation) -> Result<bool, QueueFull> {
        let last = is_last_frame(frame.as_bytes(), generation);
        if self.frames.push_back(frame).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            warn!("frame queue full, dropped frame");
            return Err(QueueFull);
        }
        if last && frame.message_id() == (TX_REQ_INFO | ALL_FRAMES) && frame.frame_index() > ALL_FRAMES
        {
            self.frames_expected = frame.frame_index() - ALL_FRAMES;
        }
        Ok(last)
    }

    /// Oldest frame
    pub fn pop(&mut self) -> Option<RadioPacket> {
        self.frames.pop_front()
    }

    /// Queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check for an empty queue
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all queued frames
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Frame count of the last complete response
    #[must_use]
    pub const fn frames_expected(&self) -> u8 {
        self.frames_expected
    }

    /// Override the expected frame count
    pub fn set_frames_expected(&mut self, n: u8) {
        self.frames_expected = n;
    }

    /// Frames dropped because the queue was full
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Sequence numbers received for one response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FrameSet {
    received: u32,
    expected: u8,
}

impl FrameSet {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            received: 0,
            expected: 0,
        }
    }

    /// Record a frame index byte; returns false for out-of-range indices
    pub fn record(&mut self, index_byte: u8) -> bool {
        let index = index_byte & !ALL_FRAMES;
        if index == 0 || index > MAX_FRAME_INDEX {
            return false;
        }
        self.received |= 1 << index;
        if index_byte > ALL_FRAMES {
            self.expected = index;
        }
        true
    }

    /// Check if a sequence number has been seen
    #[must_use]
    pub const fn has(&self, index: u8) -> bool {
        index <= MAX_FRAME_INDEX && self.received & (1 << index) != 0
    }

    /// Number of frames in the response, 0 while the last one is missing
    #[must_use]
    pub const fn expected(&self) -> u8 {
        self.expected
    }

    /// Number of distinct frames seen
    #[must_use]
    pub const fn received_count(&self) -> u32 {
        self.received.count_ones()
    }

    /// All frames up to the last one are present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && (1..=self.expected).all(|i| self.has(i))
    }

    /// Missing sequence numbers.
    ///
    /// Without a last frame, the range extends one past the highest
    /// frame seen.
    pub fn missing(&self) -> impl Iterator<Item = u8> + '_ {
        let upper = if self.expected > 0 {
            self.expected
        } else {
            (self.highest() + 1).min(MAX_FRAME_INDEX)
        };
        (1..=upper).filter(move |i| !self.has(*i))
    }

    /// Forget everything
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn highest(&self) -> u8 {
        match self.received {
            0 => 0,
            bits => (31 - bits.leading_zeros()) as u8,
        }
    }
}
