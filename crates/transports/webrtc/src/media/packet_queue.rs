//! Per-track queue for buffers that arrive before their pad exists

use super::{Buffer, TrackId};
use std::collections::VecDeque;
use tracing::warn;

/// Backlog size at which a pending track is reported as stalled
pub const BACKLOG_WARN_THRESHOLD: usize = 512;

/// Ordered backlog of buffers for a track that is not bound to a pad yet
///
/// Buffers come out of [`PacketQueue::drain`] in the order they were pushed.
/// The queue is not capped; it warns once when the backlog reaches
/// [`BACKLOG_WARN_THRESHOLD`].
#[derive(Debug)]
pub struct PacketQueue {
    track_id: TrackId,
    buffers: VecDeque<Buffer>,
    warned: bool,
}

impl PacketQueue {
    /// Create an empty queue for a track
    pub fn new(track_id: TrackId) -> Self {
        Self {
            track_id,
            buffers: VecDeque::new(),
            warned: false,
        }
    }

    /// Append a buffer at the tail
    pub fn push(&mut self, buffer: Buffer) {
        self.buffers.push_back(buffer);
        if !self.warned && self.buffers.len() >= BACKLOG_WARN_THRESHOLD {
            self.warned = true;
            warn!(
                "Track {} has {} buffers queued and still no output pad",
                self.track_id,
                self.buffers.len()
            );
        }
    }

    /// Whether the backlog has crossed the warning threshold
    pub fn is_stalled(&self) -> bool {
        self.warned
    }

    /// Number of queued buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the queue holds no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Consume the queue, yielding buffers in arrival order
    pub fn drain(self) -> impl Iterator<Item = Buffer> {
        self.buffers.into_iter()
    }
}
