//! Bounded handoff of decoded chunks from the decode thread to the drive tick.
//!
//! - decode thread → [`PcmQueue::push_blocking`] (sleep-retry while full)
//! - drive tick → [`PcmQueue::poll`] (never blocks)
//!
//! The capacity caps memory and paces decoding to playback speed. Each session
//! gets its own queue, so a worker that outlives its session can only fill a
//! queue nobody reads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::chunk::PcmChunk;

/// Result of a producer push attempt loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The chunk was accepted.
    Queued,
    /// The cancel flag was raised before space became available; the chunk was dropped.
    Cancelled,
}

/// Fixed-capacity queue of [`PcmChunk`]s.
pub struct PcmQueue {
    tx: Sender<PcmChunk>,
    rx: Receiver<PcmChunk>,
    capacity: usize,
    low_watermark_ms: AtomicU64,
}

impl PcmQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued chunks (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Offer a chunk without waiting; hands it back when the queue is full.
    pub fn try_push(&self, chunk: PcmChunk) -> Result<(), PcmChunk> {
        match self.tx.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(c)) | Err(TrySendError::Disconnected(c)) => Err(c),
        }
    }

    /// Push a chunk, sleeping `retry` between attempts while the queue is full.
    ///
    /// `cancel` is checked before every attempt so shutdown latency stays
    /// around one retry interval.
    pub fn push_blocking(
        &self,
        chunk: PcmChunk,
        cancel: &AtomicBool,
        retry: Duration,
    ) -> PushOutcome {
        let mut pending = chunk;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return PushOutcome::Cancelled;
            }
            match self.try_push(pending) {
                Ok(()) => return PushOutcome::Queued,
                Err(back) => {
                    pending = back;
                    thread::sleep(retry);
                }
            }
        }
    }

    /// Take the oldest chunk if one is ready.
    pub fn poll(&self) -> Option<PcmChunk> {
        match self.rx.try_recv() {
            Ok(chunk) => {
                self.log_low_watermark();
                Some(chunk)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drop every queued chunk; returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    fn log_low_watermark(&self) {
        let threshold = (self.capacity / 8).max(1);
        let queued = self.rx.len();
        if queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_chunks = queued,
                    threshold_chunks = threshold,
                    "pcm queue low watermark"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn chunk(tag: u8) -> PcmChunk {
        PcmChunk {
            pcm: vec![tag, 0],
            sample_rate: 44_100,
            channels: 1,
            bitrate_bps: 128_000,
        }
    }

    #[test]
    fn poll_empty_returns_none() {
        let q = PcmQueue::new(4);
        assert!(q.poll().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn try_push_rejects_when_full() {
        let q = PcmQueue::new(2);
        assert!(q.try_push(chunk(1)).is_ok());
        assert!(q.try_push(chunk(2)).is_ok());
        let back = q.try_push(chunk(3)).unwrap_err();
        assert_eq!(back.pcm[0], 3);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn poll_is_fifo() {
        let q = PcmQueue::new(4);
        q.try_push(chunk(1)).unwrap();
        q.try_push(chunk(2)).unwrap();
        assert_eq!(q.poll().unwrap().pcm[0], 1);
        assert_eq!(q.poll().unwrap().pcm[0], 2);
    }

    #[test]
    fn push_blocking_waits_for_space_and_never_overflows() {
        let q = Arc::new(PcmQueue::new(3));
        let cancel = Arc::new(AtomicBool::new(false));
        let producer_q = q.clone();
        let producer_cancel = cancel.clone();
        let handle = thread::spawn(move || {
            for i in 0..10u8 {
                let out = producer_q.push_blocking(
                    chunk(i),
                    &producer_cancel,
                    Duration::from_millis(1),
                );
                assert_eq!(out, PushOutcome::Queued);
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 10 {
            assert!(q.len() <= q.capacity());
            if let Some(c) = q.poll() {
                seen.push(c.pcm[0]);
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        handle.join().unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn push_blocking_respects_cancel_when_full() {
        let q = PcmQueue::new(1);
        q.try_push(chunk(1)).unwrap();
        let cancel = AtomicBool::new(true);
        let out = q.push_blocking(chunk(2), &cancel, Duration::from_millis(1));
        assert_eq!(out, PushOutcome::Cancelled);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn clear_discards_everything() {
        let q = PcmQueue::new(4);
        q.try_push(chunk(1)).unwrap();
        q.try_push(chunk(2)).unwrap();
        assert_eq!(q.clear(), 2);
        assert!(q.poll().is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let q = PcmQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(q.try_push(chunk(1)).is_ok());
    }
}
