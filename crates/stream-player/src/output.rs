//! Output device abstraction driven by the playback tick.
//!
//! The device model is a voice fed with a FIFO of fixed buffers: the driver
//! submits a chunk into a free buffer, the device plays queued buffers in
//! order and marks them processed, and the driver reclaims processed buffers
//! for reuse. Stopping a voice marks every queued buffer processed.

use std::collections::VecDeque;

use anyhow::Result;

use crate::chunk::PcmChunk;

pub type VoiceId = u32;
pub type BufferId = u32;

/// Render state of a voice as reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    /// Created, never started.
    Initial,
    Playing,
    Paused,
    /// Explicitly stopped, or ran out of queued buffers while playing.
    Stopped,
}

/// A sink that plays queued PCM buffers on a voice.
///
/// All calls come from the thread that owns the player.
pub trait OutputDevice {
    fn create_voice(&mut self) -> Result<VoiceId>;
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>>;
    /// Fill `buffer` with `chunk` and append it to the voice's queue.
    fn submit(&mut self, voice: VoiceId, buffer: BufferId, chunk: &PcmChunk) -> Result<()>;
    /// Queued buffers the device has finished with and not yet handed back.
    fn buffers_processed(&self, voice: VoiceId) -> usize;
    /// All buffers on the voice's queue, processed ones included.
    fn buffers_queued(&self, voice: VoiceId) -> usize;
    /// Detach the oldest processed buffer from the queue.
    fn unqueue_processed(&mut self, voice: VoiceId) -> Option<BufferId>;
    fn voice_state(&self, voice: VoiceId) -> VoiceState;
    fn play(&mut self, voice: VoiceId);
    fn pause(&mut self, voice: VoiceId);
    /// Halt output; every queued buffer becomes processed.
    fn stop(&mut self, voice: VoiceId);
    fn set_gain(&mut self, voice: VoiceId, gain: f32);
    fn delete_buffers(&mut self, buffers: &[BufferId]);
    fn delete_voice(&mut self, voice: VoiceId);
}

/// Tracks which device buffers are free and which are queued on the voice.
#[derive(Debug, Default)]
pub struct BufferPool {
    all: Vec<BufferId>,
    free: VecDeque<BufferId>,
    in_flight: VecDeque<BufferId>,
}

impl BufferPool {
    pub fn new(buffers: Vec<BufferId>) -> Self {
        Self {
            free: buffers.iter().copied().collect(),
            all: buffers,
            in_flight: VecDeque::new(),
        }
    }

    pub fn all(&self) -> &[BufferId] {
        &self.all
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Next free buffer to fill.
    pub fn take_free(&mut self) -> Option<BufferId> {
        self.free.pop_front()
    }

    /// Put back a buffer that was taken but never submitted.
    pub fn return_free(&mut self, id: BufferId) {
        self.free.push_front(id);
    }

    pub fn mark_in_flight(&mut self, id: BufferId) {
        self.in_flight.push_back(id);
    }

    /// A buffer came back from the device; it is free again.
    pub fn reclaim(&mut self, id: BufferId) {
        if let Some(pos) = self.in_flight.iter().position(|b| *b == id) {
            self.in_flight.remove(pos);
        } else {
            tracing::warn!(buffer = id, "reclaimed buffer was not in flight");
        }
        if !self.free.contains(&id) {
            self.free.push_back(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_cycles_buffers_fifo() {
        let mut pool = BufferPool::new(vec![1, 2, 3]);
        assert_eq!(pool.free_count(), 3);

        let a = pool.take_free().unwrap();
        let b = pool.take_free().unwrap();
        pool.mark_in_flight(a);
        pool.mark_in_flight(b);
        assert_eq!((a, b), (1, 2));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.in_flight_count(), 2);

        pool.reclaim(a);
        assert_eq!(pool.in_flight_count(), 1);
        assert_eq!(pool.take_free(), Some(3));
        assert_eq!(pool.take_free(), Some(1));
        assert_eq!(pool.take_free(), None);
    }

    #[test]
    fn return_free_puts_buffer_back_first() {
        let mut pool = BufferPool::new(vec![7, 8]);
        let id = pool.take_free().unwrap();
        pool.return_free(id);
        assert_eq!(pool.take_free(), Some(7));
    }

    #[test]
    fn reclaim_is_idempotent_for_free_buffers() {
        let mut pool = BufferPool::new(vec![1]);
        pool.reclaim(1);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.all(), &[1]);
    }
}
