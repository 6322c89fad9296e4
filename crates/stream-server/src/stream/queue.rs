use crate::error::StreamError;
use crate::types::SampleFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Result of offering a frame to a client queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// There was room
    Queued,
    /// The queue was full; the oldest frame was discarded to make room
    ReplacedOldest,
    /// The frame could not be queued (queue closed)
    Dropped,
}

/// Bounded FIFO of frames for one streaming client
///
/// The producer side is synchronous (the frame thread), the consumer side is
/// the async response body. When full, the oldest frame is dropped so a slow
/// client falls behind instead of stalling the producer.
pub struct FrameQueue {
    capacity: usize,
    frames: Mutex<VecDeque<SampleFrame>>,
    /// Signalled when the consumer frees room
    space: Condvar,
    /// Signalled when a frame arrives or the queue closes
    ready: Notify,
    closed: AtomicBool,
    overflows: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Result<Self, StreamError> {
        if capacity == 0 {
            return Err(StreamError::QueueAllocation(capacity));
        }

        Ok(Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            overflows: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SampleFrame>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of frames discarded because this queue was full
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Enqueue a frame, waiting at most `wait` for room before dropping the oldest frame
    pub fn push(&self, frame: SampleFrame, wait: Duration) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Dropped;
        }

        let mut frames = self.lock();

        if frames.len() >= self.capacity && !wait.is_zero() {
            let (guard, _) = self
                .space
                .wait_timeout_while(frames, wait, |f| f.len() >= self.capacity && !self.is_closed())
                .unwrap_or_else(|e| e.into_inner());
            frames = guard;
        }

        let outcome = if frames.len() < self.capacity {
            frames.push_back(frame);
            PushOutcome::Queued
        } else {
            // Make room by discarding exactly one stale frame, then retry without waiting
            frames.pop_front();
            self.overflows.fetch_add(1, Ordering::Relaxed);

            if frames.len() < self.capacity {
                frames.push_back(frame);
                PushOutcome::ReplacedOldest
            } else {
                PushOutcome::Dropped
            }
        };
        drop(frames);

        if outcome != PushOutcome::Dropped {
            self.ready.notify_one();
        }
        outcome
    }

    /// Remove queued frames in FIFO order, up to `max_bytes` total.
    ///
    /// At least one frame is returned when any is queued, even if it alone
    /// exceeds `max_bytes`.
    pub fn drain(&self, max_bytes: usize) -> Vec<SampleFrame> {
        let mut frames = self.lock();
        let mut batch = Vec::new();
        let mut bytes = 0;

        while let Some(front) = frames.front() {
            if !batch.is_empty() && bytes + front.len() > max_bytes {
                break;
            }
            bytes += front.len();
            if let Some(frame) = frames.pop_front() {
                batch.push(frame);
            }
        }
        drop(frames);

        if !batch.is_empty() {
            self.space.notify_all();
        }
        batch
    }

    /// Wait for the next batch of frames. Returns `None` once the queue is closed and empty.
    pub async fn next_batch(&self, max_bytes: usize) -> Option<Vec<SampleFrame>> {
        loop {
            let batch = self.drain(max_bytes);
            if !batch.is_empty() {
                return Some(batch);
            }
            if self.is_closed() {
                return None;
            }
            // notify_one stores a permit when nobody waits, so a push between
            // the drain above and this await is not lost
            self.ready.notified().await;
        }
    }

    /// Stop accepting frames and wake any waiter
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
        self.space.notify_all();
    }
}
