//! In-memory stand-ins for the network stream and the output device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::chunk::{DecodedFrame, PcmChunk};
use crate::decode::FrameSource;
use crate::output::{BufferId, OutputDevice, VoiceId, VoiceState};
use crate::source::{OpenedStream, StreamOpener};

pub const FRAME_SAMPLES: usize = 1152;

/// Shape of a synthetic MP3-like stream: 44.1 kHz stereo, 160 kbps, 3.6 MB.
#[derive(Clone, Debug)]
pub struct SyntheticStream {
    pub frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u32,
    pub content_length: Option<u64>,
    /// Fail with a decode error after this many frames.
    pub fail_after: Option<usize>,
}

impl SyntheticStream {
    pub fn seconds(secs: f64) -> Self {
        let frames = (secs * 44_100.0 / FRAME_SAMPLES as f64).ceil() as usize;
        Self {
            frames,
            sample_rate: 44_100,
            channels: 2,
            bitrate_bps: 160_000,
            content_length: Some(3_600_000),
            fail_after: None,
        }
    }

    /// Frames left when starting `offset` bytes into the stream.
    fn frames_from(&self, offset: u64) -> usize {
        match self.content_length {
            Some(len) if len > 0 && offset > 0 => {
                let skipped = (self.frames as u128 * u128::from(offset) / u128::from(len)) as usize;
                self.frames.saturating_sub(skipped)
            }
            _ => self.frames,
        }
    }
}

struct SyntheticFrames {
    remaining: usize,
    emitted: usize,
    stream: SyntheticStream,
}

impl FrameSource for SyntheticFrames {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        if self.stream.fail_after == Some(self.emitted) {
            return Err(anyhow!("synthetic decode failure"));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.emitted += 1;
        Ok(Some(DecodedFrame {
            samples: vec![0; FRAME_SAMPLES * self.stream.channels as usize],
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            bitrate_bps: self.stream.bitrate_bps,
        }))
    }
}

/// Opener returning synthetic frames and recording every requested offset.
#[derive(Clone)]
pub struct FakeOpener {
    stream: SyntheticStream,
    error: Option<String>,
    opened: Arc<Mutex<Vec<(String, u64)>>>,
}

impl FakeOpener {
    pub fn new(stream: SyntheticStream) -> Self {
        Self {
            stream,
            error: None,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(SyntheticStream::seconds(1.0))
        }
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.opened.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }
}

impl StreamOpener for FakeOpener {
    fn open(&self, url: &str, offset: u64) -> Result<OpenedStream> {
        self.opened.lock().unwrap().push((url.to_string(), offset));
        if let Some(msg) = &self.error {
            return Err(anyhow!("{msg}"));
        }
        Ok(OpenedStream {
            frames: Box::new(SyntheticFrames {
                remaining: self.stream.frames_from(offset),
                emitted: 0,
                stream: self.stream.clone(),
            }),
            content_length: self.stream.content_length,
        })
    }
}

/// Observable state of a [`FakeDevice`].
#[derive(Debug)]
pub struct FakeDeviceState {
    pub fail_create: bool,
    pub voices_created: usize,
    pub voices_alive: usize,
    pub buffers_alive: usize,
    pub submitted: usize,
    pub play_calls: usize,
    pub gain: f32,
    pub voice_state: VoiceState,
    /// Queued buffers with the audio duration each holds.
    queue: VecDeque<(BufferId, Duration)>,
    processed: usize,
    consumed: Duration,
    next_id: u32,
}

/// OpenAL-like device whose playback advances only through [`FakeDevice::render`].
#[derive(Clone)]
pub struct FakeDevice {
    inner: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeDeviceState {
                fail_create: false,
                voices_created: 0,
                voices_alive: 0,
                buffers_alive: 0,
                submitted: 0,
                play_calls: 0,
                gain: 1.0,
                voice_state: VoiceState::Initial,
                queue: VecDeque::new(),
                processed: 0,
                consumed: Duration::ZERO,
                next_id: 1,
            })),
        }
    }

    pub fn failing() -> Self {
        let device = Self::new();
        device.state().fail_create = true;
        device
    }

    pub fn state(&self) -> MutexGuard<'_, FakeDeviceState> {
        self.inner.lock().unwrap()
    }

    /// Play `elapsed` worth of queued audio; runs dry into `Stopped`.
    pub fn render(&self, elapsed: Duration) {
        let mut st = self.state();
        if st.voice_state != VoiceState::Playing {
            return;
        }
        let mut left = elapsed;
        loop {
            let idx = st.processed;
            let next = st.queue.get(idx).map(|(_, len)| *len);
            let Some(len) = next else {
                st.voice_state = VoiceState::Stopped;
                return;
            };
            let remaining = len.saturating_sub(st.consumed);
            if left >= remaining {
                left -= remaining;
                st.consumed = Duration::ZERO;
                st.processed += 1;
            } else {
                st.consumed += left;
                return;
            }
        }
    }
}

impl OutputDevice for FakeDevice {
    fn create_voice(&mut self) -> Result<VoiceId> {
        let mut st = self.state();
        if st.fail_create {
            return Err(anyhow!("no audio device available"));
        }
        st.voices_created += 1;
        st.voices_alive += 1;
        st.voice_state = VoiceState::Initial;
        st.queue.clear();
        st.processed = 0;
        st.consumed = Duration::ZERO;
        let id = st.next_id;
        st.next_id += 1;
        Ok(id)
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>> {
        let mut st = self.state();
        st.buffers_alive += count;
        let first = st.next_id;
        st.next_id += count as u32;
        Ok((first..first + count as u32).collect())
    }

    fn submit(&mut self, _voice: VoiceId, buffer: BufferId, chunk: &PcmChunk) -> Result<()> {
        let mut st = self.state();
        st.submitted += 1;
        st.queue.push_back((buffer, chunk.duration()));
        Ok(())
    }

    fn buffers_processed(&self, _voice: VoiceId) -> usize {
        self.state().processed
    }

    fn buffers_queued(&self, _voice: VoiceId) -> usize {
        self.state().queue.len()
    }

    fn unqueue_processed(&mut self, _voice: VoiceId) -> Option<BufferId> {
        let mut st = self.state();
        if st.processed == 0 {
            return None;
        }
        st.processed -= 1;
        st.queue.pop_front().map(|(id, _)| id)
    }

    fn voice_state(&self, _voice: VoiceId) -> VoiceState {
        self.state().voice_state
    }

    fn play(&mut self, _voice: VoiceId) {
        let mut st = self.state();
        st.play_calls += 1;
        st.voice_state = VoiceState::Playing;
    }

    fn pause(&mut self, _voice: VoiceId) {
        let mut st = self.state();
        if st.voice_state == VoiceState::Playing {
            st.voice_state = VoiceState::Paused;
        }
    }

    fn stop(&mut self, _voice: VoiceId) {
        let mut st = self.state();
        st.processed = st.queue.len();
        st.consumed = Duration::ZERO;
        st.voice_state = VoiceState::Stopped;
    }

    fn set_gain(&mut self, _voice: VoiceId, gain: f32) {
        self.state().gain = gain;
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) {
        let mut st = self.state();
        st.buffers_alive = st.buffers_alive.saturating_sub(buffers.len());
    }

    fn delete_voice(&mut self, _voice: VoiceId) {
        let mut st = self.state();
        st.voices_alive = st.voices_alive.saturating_sub(1);
    }
}
