//! Outbound half of a connection
//!
//! Producers (broadcasts, command replies) call [`OutboundQueue::enqueue`]
//! from any task. A single [`SendPipeline`] per connection drains the queue,
//! packing as many whole frames as fit into its write buffer before each
//! write. At most one write is in flight per connection, so frames leave in
//! the order they were queued.

use crate::config::OverflowPolicy;
use log::{debug, trace};
use shared::{Frame, StreamError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

/// Result of handing a frame to a connection's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The frame was queued after evicting the oldest waiting frame
    DroppedOldest,
    /// The queue was full and the new frame was discarded
    DroppedNewest,
    /// The queue was full and the consumer should be disconnected
    Overflow,
    /// The connection is already shut down
    Closed,
}

/// Point-in-time counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted into the queue since it was created
    pub queued: u64,
    /// Frames discarded by the overflow policy
    pub dropped: u64,
    /// Frames currently waiting for the writer
    pub waiting: usize,
    pub write_in_flight: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    write_in_flight: bool,
    closed: bool,
    queued: u64,
    dropped: u64,
}

/// Frames waiting to be written to one connection.
///
/// `write_in_flight` is false exactly when the writer is idle; the producer
/// that flips it to true is the one that wakes the writer.
#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    wakeup: Notify,
    max_frames: Option<usize>,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    pub fn new(max_frames: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            max_frames,
            policy,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    /// Queues a frame and wakes the writer if it is idle
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        let mut state = self.lock();
        if state.closed {
            return EnqueueOutcome::Closed;
        }

        let mut outcome = EnqueueOutcome::Queued;
        if let Some(max_frames) = self.max_frames {
            if state.frames.len() >= max_frames {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        state.dropped += 1;
                        return EnqueueOutcome::DroppedNewest;
                    }
                    OverflowPolicy::DropOldest => {
                        state.frames.pop_front();
                        state.dropped += 1;
                        outcome = EnqueueOutcome::DroppedOldest;
                    }
                    OverflowPolicy::Disconnect => {
                        state.dropped += 1;
                        return EnqueueOutcome::Overflow;
                    }
                }
            }
        }

        state.frames.push_back(frame);
        state.queued += 1;

        if !state.write_in_flight {
            state.write_in_flight = true;
            drop(state);
            self.wakeup.notify_one();
        }

        outcome
    }

    /// Discards waiting frames and rejects future ones. Idempotent.
    ///
    /// A write already in progress finishes; the writer clears
    /// `write_in_flight` once it observes the close.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.frames.clear();
        drop(state);
        self.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.queued,
            dropped: state.dropped,
            waiting: state.frames.len(),
            write_in_flight: state.write_in_flight,
        }
    }

    /// Called after each write; returns true if more frames are waiting
    fn complete_write(&self) -> bool {
        let mut state = self.lock();
        if state.frames.is_empty() {
            state.write_in_flight = false;
            false
        } else {
            true
        }
    }

    // Critical sections never panic, so a poisoned lock still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn waiting_frames(&self) -> Vec<Frame> {
        self.lock().frames.iter().cloned().collect()
    }
}

/// The single writer for one connection
pub struct SendPipeline<W> {
    writer: W,
    queue: Arc<OutboundQueue>,
    write_buffer: Vec<u8>,
}

impl<W> SendPipeline<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, queue: Arc<OutboundQueue>, write_buffer_capacity: usize) -> Self {
        Self {
            writer,
            queue,
            write_buffer: vec![0; write_buffer_capacity],
        }
    }

    /// Flushes queued frames until the queue is closed or a write fails
    pub async fn run(mut self) -> Result<(), StreamError> {
        loop {
            self.queue.wakeup.notified().await;

            loop {
                let Some(len) = self.drain() else {
                    return Ok(());
                };

                if len > 0 {
                    trace!("Writing {} bytes", len);
                    self.writer.write_all(&self.write_buffer[..len]).await?;
                    self.writer.flush().await?;
                }

                if !self.queue.complete_write() {
                    break;
                }
            }
        }
    }

    /// Copies whole frames into the write buffer; `None` once the queue is closed
    fn drain(&mut self) -> Option<usize> {
        let mut state = self.queue.lock();
        if state.closed {
            state.write_in_flight = false;
            return None;
        }

        if let Some(front) = state.frames.front() {
            if front.len() > self.write_buffer.len() {
                debug!(
                    "Growing write buffer from {} to {} bytes",
                    self.write_buffer.len(),
                    front.len()
                );
                self.write_buffer.resize(front.len(), 0);
            }
        }

        let mut offset = 0;
        while let Some(frame) = state.frames.front() {
            let frame_len = frame.len();
            if frame_len > self.write_buffer.len() - offset {
                break;
            }
            self.write_buffer[offset..offset + frame_len].copy_from_slice(frame.as_bytes());
            offset += frame_len;
            state.frames.pop_front();
        }

        Some(offset)
    }
}
